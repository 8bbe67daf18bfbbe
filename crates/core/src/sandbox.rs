//! Move Sandbox
//!
//! The "imagine" branch: a private copy of the game that can be explored and
//! rewound without ever touching the authoritative line. The working position
//! is always the frozen baseline with the recorded history replayed on top.

use crate::error::{Result, SessionError};
use crate::rules::{MoveRecord, MoveSuggester, MoveValidator};
use shakmaty::{Chess, Move};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct SandboxSession {
    baseline: Chess,
    working: Chess,
    history: Vec<MoveRecord>,
}

/// An isolated, resettable what-if copy of a game position.
pub struct MoveSandbox {
    validator: Arc<dyn MoveValidator>,
    suggester: Arc<dyn MoveSuggester>,
    session: Option<SandboxSession>,
}

impl MoveSandbox {
    pub fn new(validator: Arc<dyn MoveValidator>, suggester: Arc<dyn MoveSuggester>) -> Self {
        Self {
            validator,
            suggester,
            session: None,
        }
    }

    fn session(&self) -> Result<&SandboxSession> {
        self.session.as_ref().ok_or(SessionError::NotStarted)
    }

    fn session_mut(&mut self) -> Result<&mut SandboxSession> {
        self.session.as_mut().ok_or(SessionError::NotStarted)
    }

    /// Captures `snapshot` as the new baseline and clears any prior history.
    pub fn start(&mut self, snapshot: &Chess) {
        self.session = Some(SandboxSession {
            baseline: snapshot.clone(),
            working: snapshot.clone(),
            history: Vec::new(),
        });
    }

    /// Rewinds to the baseline. Does nothing if the sandbox was never started.
    pub fn reset(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.working = session.baseline.clone();
            session.history.clear();
        }
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// Plays the move described by `text` on the working position.
    pub fn move_text(&mut self, text: &str) -> Result<MoveRecord> {
        let validator = self.validator.clone();
        let session = self.session_mut()?;
        let mv = validator.parse(text, &session.working)?;
        if !validator.is_legal(&mv, &session.working) {
            return Err(SessionError::IllegalMove(text.trim().to_string()));
        }
        Self::push(validator.as_ref(), session, mv)
    }

    /// Asks the suggester for a move in the working position.
    pub fn suggested_move(&self) -> Result<Option<Move>> {
        let session = self.session()?;
        Ok(self.suggester.suggest(&session.working))
    }

    /// Plays `mv` if it is legal in the working position.
    ///
    /// Suggestions can go stale between being fetched and applied, so an
    /// illegal move is dropped with `Ok(None)` instead of an error.
    pub fn apply_suggested(&mut self, mv: &Move) -> Result<Option<MoveRecord>> {
        let validator = self.validator.clone();
        let session = self.session_mut()?;
        if !validator.is_legal(mv, &session.working) {
            debug!(?mv, "ignoring stale sandbox suggestion");
            return Ok(None);
        }
        Self::push(validator.as_ref(), session, mv.clone()).map(Some)
    }

    /// Undoes the most recent sandbox move. Returns `false` if there was none.
    pub fn back(&mut self) -> Result<bool> {
        let validator = self.validator.clone();
        let session = self.session_mut()?;
        if session.history.pop().is_none() {
            return Ok(false);
        }

        let mut working = session.baseline.clone();
        for record in &session.history {
            working = validator.apply(&record.mv, &working)?.0;
        }
        session.working = working;
        Ok(true)
    }

    pub fn baseline(&self) -> Option<&Chess> {
        self.session.as_ref().map(|s| &s.baseline)
    }

    pub fn working(&self) -> Option<&Chess> {
        self.session.as_ref().map(|s| &s.working)
    }

    /// Moves played in the sandbox since the last start or reset.
    pub fn history(&self) -> &[MoveRecord] {
        self.session.as_ref().map_or(&[], |s| s.history.as_slice())
    }

    fn push(
        validator: &dyn MoveValidator,
        session: &mut SandboxSession,
        mv: Move,
    ) -> Result<MoveRecord> {
        let (next, notation) = validator.apply(&mv, &session.working)?;
        let record = MoveRecord { mv, notation };
        session.working = next;
        session.history.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{MockMoveSuggester, StandardRules};
    use shakmaty::Position;

    fn same_position(a: &Chess, b: &Chess) -> bool {
        a.board() == b.board() && a.turn() == b.turn() && a.fullmoves() == b.fullmoves()
    }

    fn sandbox_with(suggester: MockMoveSuggester) -> MoveSandbox {
        MoveSandbox::new(Arc::new(StandardRules::new()), Arc::new(suggester))
    }

    fn sandbox() -> MoveSandbox {
        sandbox_with(MockMoveSuggester::new())
    }

    #[test]
    fn test_operations_before_start_fail() {
        let mut sandbox = sandbox();
        assert_eq!(sandbox.move_text("e4"), Err(SessionError::NotStarted));
        assert_eq!(sandbox.back(), Err(SessionError::NotStarted));
        assert_eq!(sandbox.suggested_move(), Err(SessionError::NotStarted));
        let mv = StandardRules::new()
            .parse("e4", &Chess::default())
            .expect("legal");
        assert_eq!(sandbox.apply_suggested(&mv), Err(SessionError::NotStarted));
        assert!(sandbox.baseline().is_none());
        assert!(sandbox.history().is_empty());
    }

    #[test]
    fn test_reset_before_start_is_safe() {
        let mut sandbox = sandbox();
        sandbox.reset();
        assert!(!sandbox.is_started());
    }

    #[test]
    fn test_moves_never_touch_the_source_position() {
        let game = Chess::default();
        let mut sandbox = sandbox();
        sandbox.start(&game);

        let record = sandbox.move_text("e4").expect("legal");
        assert_eq!(record.notation, "e4 (e2e4)");
        sandbox.move_text("e5").expect("legal");

        assert!(same_position(&game, &Chess::default()));
        assert!(same_position(sandbox.baseline().expect("started"), &game));
        assert_eq!(sandbox.history().len(), 2);
        assert!(!same_position(sandbox.working().expect("started"), &game));
    }

    #[test]
    fn test_illegal_move_leaves_state_unchanged() {
        let mut sandbox = sandbox();
        sandbox.start(&Chess::default());
        sandbox.move_text("d4").expect("legal");
        let before = sandbox.working().cloned().expect("started");

        assert!(matches!(
            sandbox.move_text("Ke3"),
            Err(SessionError::IllegalMove(_))
        ));
        assert_eq!(sandbox.history().len(), 1);
        assert!(same_position(sandbox.working().expect("started"), &before));
    }

    #[test]
    fn test_back_round_trip_returns_to_baseline() {
        let mut sandbox = sandbox();
        let start = Chess::default();
        sandbox.start(&start);
        let moves = ["e4", "c5", "Nf3", "d6", "d4"];
        for m in moves {
            sandbox.move_text(m).expect("legal");
        }
        for _ in moves {
            assert_eq!(sandbox.back(), Ok(true));
        }

        assert!(sandbox.history().is_empty());
        assert!(same_position(sandbox.working().expect("started"), &start));
    }

    #[test]
    fn test_back_with_empty_history_returns_false() {
        let mut sandbox = sandbox();
        sandbox.start(&Chess::default());
        sandbox.move_text("e4").expect("legal");
        sandbox.move_text("e5").expect("legal");

        assert_eq!(sandbox.back(), Ok(true));
        assert_eq!(sandbox.back(), Ok(true));
        assert_eq!(sandbox.back(), Ok(false));
        assert!(sandbox.history().is_empty());
    }

    #[test]
    fn test_back_rebuilds_intermediate_position() {
        let mut sandbox = sandbox();
        sandbox.start(&Chess::default());
        sandbox.move_text("e4").expect("legal");
        let after_first = sandbox.working().cloned().expect("started");
        sandbox.move_text("e5").expect("legal");

        sandbox.back().expect("started");
        assert!(same_position(sandbox.working().expect("started"), &after_first));
    }

    #[test]
    fn test_castle_keyword_in_sandbox() {
        let mut sandbox = sandbox();
        sandbox.start(&Chess::default());
        for m in ["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5"] {
            sandbox.move_text(m).expect("legal");
        }
        let record = sandbox.move_text("castle").expect("king side castle");
        assert_eq!(record.notation, "O-O (e1g1)");
    }

    #[test]
    fn test_suggestion_is_applied_when_legal() {
        let start = Chess::default();
        let reply = StandardRules::new().parse("d4", &start).expect("legal");
        let mut suggester = MockMoveSuggester::new();
        let scripted = reply.clone();
        suggester
            .expect_suggest()
            .times(1)
            .returning(move |_| Some(scripted.clone()));

        let mut sandbox = sandbox_with(suggester);
        sandbox.start(&start);
        let mv = sandbox
            .suggested_move()
            .expect("started")
            .expect("suggestion");
        assert_eq!(mv, reply);

        let record = sandbox.apply_suggested(&mv).expect("started");
        assert_eq!(record.map(|r| r.notation), Some("d4 (d2d4)".to_string()));
        assert_eq!(sandbox.history().len(), 1);
    }

    #[test]
    fn test_stale_suggestion_is_ignored() {
        let start = Chess::default();
        let stale = StandardRules::new().parse("e4", &start).expect("legal");
        let mut sandbox = sandbox();
        sandbox.start(&start);
        sandbox.move_text("e4").expect("legal");

        assert_eq!(sandbox.apply_suggested(&stale), Ok(None));
        assert_eq!(sandbox.history().len(), 1);
    }

    #[test]
    fn test_restart_discards_previous_excursion() {
        let mut sandbox = sandbox();
        sandbox.start(&Chess::default());
        sandbox.move_text("e4").expect("legal");

        let rules = StandardRules::new();
        let mv = rules.parse("d4", &Chess::default()).expect("legal");
        let (advanced, _) = rules.apply(&mv, &Chess::default()).expect("legal");
        sandbox.start(&advanced);

        assert!(sandbox.history().is_empty());
        assert!(same_position(sandbox.baseline().expect("started"), &advanced));
        assert!(same_position(sandbox.working().expect("started"), &advanced));
    }
}
