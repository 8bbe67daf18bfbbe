use thiserror::Error;

/// Failures surfaced by the rules oracle and the move sandbox.
///
/// None of these escape `SessionController::handle_input`; the controller
/// logs them and leaves its state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The input resolved to nothing, or to a move the rules reject.
    #[error("Illegal move: {0}")]
    IllegalMove(String),
    /// A sandbox operation was attempted before `MoveSandbox::start`.
    #[error("Sandbox has not been started")]
    NotStarted,
    /// A collaborator had nothing to offer (e.g. no suggestion).
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
