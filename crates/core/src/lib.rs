//! Core session logic for a hands-free chess companion.
//!
//! A [`session::SessionController`] walks between `Idle`, `Active` and
//! `Sandbox` as commands arrive, guarded by a [`timer::CountdownTimer`]. The
//! [`relay::CommandRelay`] carries recognized speech from a recognizer thread
//! to the thread that owns the controller. Replies come from a UCI engine
//! through [`engine::UciEngineSuggester`].

pub mod engine;
pub mod error;
pub mod grammar;
pub mod log;
pub mod relay;
pub mod rules;
pub mod sandbox;
pub mod session;
pub mod timer;
pub mod wake;
mod worker;

pub use engine::UciEngineSuggester;
pub use error::{Result, SessionError};
pub use log::{LogTag, Logger, SessionLog};
pub use relay::{
    CommandRelay, CommandSender, DisplaySurface, GrammarSync, Recognition, RecognitionFrontEnd,
};
pub use rules::{MoveRecord, MoveSuggester, MoveValidator, RandomSuggester, StandardRules};
pub use sandbox::MoveSandbox;
pub use session::{Collaborators, Mode, SessionBudgets, SessionController};
pub use timer::CountdownTimer;
pub use wake::{PhraseWakeDetector, WakeDetector};
