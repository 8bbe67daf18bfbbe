//! Session Controller
//!
//! The finite-state machine behind a spoken chess session. It listens for the
//! wake phrase while `Idle`, takes `play <move>` commands while `Active`, and
//! explores hypothetical lines in the `Sandbox`. Each non-idle mode runs on a
//! countdown; running out of time drops the session back to `Idle`.
//!
//! The controller is owned by a single thread. The countdown's expiry is
//! posted to that thread through a channel and consumed by
//! [`SessionController::dispatch_timeouts`], so the tick thread never touches
//! controller state.

use crate::error::{Result, SessionError};
use crate::grammar::{
    BACK_COMMAND, IMAGINE_KEYWORD, PLAY_KEYWORD, RETURN_COMMAND, STOP_COMMAND, TAKE_COMMAND,
};
use crate::log::{LogTag, Logger};
use crate::rules::{MoveRecord, MoveSuggester, MoveValidator, board_diagram};
use crate::sandbox::MoveSandbox;
use crate::timer::CountdownTimer;
use crate::wake::WakeDetector;
use shakmaty::{Chess, Move};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

/// The coarse phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Waiting for the wake phrase.
    #[default]
    Idle,
    /// Accepting commands against the real game.
    Active,
    /// Exploring a detached copy of the game.
    Sandbox,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "IDLE",
            Mode::Active => "ACTIVE",
            Mode::Sandbox => "SANDBOX",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Countdown budgets for the non-idle modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBudgets {
    pub active: Duration,
    pub sandbox: Duration,
}

impl Default for SessionBudgets {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(10),
            sandbox: Duration::from_secs(30),
        }
    }
}

/// The external services a session is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn MoveValidator>,
    pub suggester: Arc<dyn MoveSuggester>,
    pub wake: Arc<dyn WakeDetector>,
    pub logger: Arc<dyn Logger>,
}

/// The session state machine.
pub struct SessionController {
    mode: Mode,
    mode_tx: watch::Sender<Mode>,
    game: Chess,
    game_history: Vec<MoveRecord>,
    sandbox: MoveSandbox,
    timer: Arc<CountdownTimer>,
    expiries: mpsc::UnboundedReceiver<()>,
    validator: Arc<dyn MoveValidator>,
    suggester: Arc<dyn MoveSuggester>,
    wake: Arc<dyn WakeDetector>,
    log: Arc<dyn Logger>,
    budgets: SessionBudgets,
}

impl SessionController {
    /// Creates a controller in `Idle` over a fresh game.
    ///
    /// The controller registers itself as `timer`'s timeout observer,
    /// replacing any callback set earlier.
    pub fn new(
        collaborators: Collaborators,
        timer: Arc<CountdownTimer>,
        budgets: SessionBudgets,
    ) -> Self {
        Self::with_position(collaborators, timer, budgets, Chess::default())
    }

    /// Like [`SessionController::new`], starting from `position`.
    pub fn with_position(
        collaborators: Collaborators,
        timer: Arc<CountdownTimer>,
        budgets: SessionBudgets,
        position: Chess,
    ) -> Self {
        let Collaborators {
            validator,
            suggester,
            wake,
            logger,
        } = collaborators;

        let (expiry_tx, expiries) = mpsc::unbounded_channel();
        timer.on_timeout(move || {
            let _ = expiry_tx.send(());
        });
        let (mode_tx, _) = watch::channel(Mode::Idle);

        let mut controller = Self {
            mode: Mode::Idle,
            mode_tx,
            game: position,
            game_history: Vec::new(),
            sandbox: MoveSandbox::new(validator.clone(), suggester.clone()),
            timer,
            expiries,
            validator,
            suggester,
            wake,
            log: logger,
            budgets,
        };
        controller.enter_state(Mode::Idle);
        controller
    }

    // --- External events ---

    /// Feeds one command into the state machine.
    ///
    /// Blank input is ignored. Failures from collaborators are logged and
    /// leave the session as it was.
    pub fn handle_input(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        debug!(mode = %self.mode, command = text, "handling input");
        match self.mode {
            Mode::Idle => self.handle_idle(text),
            Mode::Active => self.handle_active(text),
            Mode::Sandbox => self.handle_sandbox(text),
        }
    }

    /// Reacts to the countdown running out.
    pub fn handle_timeout(&mut self) {
        match self.mode {
            Mode::Active | Mode::Sandbox => {
                self.log
                    .write(&format!("{} timeout → IDLE", self.mode), LogTag::Session);
                self.set_state(Mode::Idle);
            }
            Mode::Idle => debug!("timeout ignored while idle"),
        }
    }

    /// Handles every expiry posted by the timer since the last call.
    ///
    /// A notice is acted on only if the timer still reports the expiry; one
    /// overtaken by an arm or reset is dropped. Returns whether any timeout
    /// was handled.
    pub fn dispatch_timeouts(&mut self) -> bool {
        let mut handled = false;
        while self.expiries.try_recv().is_ok() {
            if self.timer.fired() {
                self.handle_timeout();
                handled = true;
            } else {
                debug!("discarding stale timeout notice");
            }
        }
        handled
    }

    // --- State handlers ---

    fn handle_idle(&mut self, text: &str) {
        if self.wake.detect(text) {
            self.log
                .write("Wake phrase detected → ACTIVE", LogTag::Session);
            self.set_state(Mode::Active);
        } else {
            self.log.write(
                &format!("Waiting for wake phrase (say '{}').", self.wake.phrase()),
                LogTag::Info,
            );
        }
    }

    fn handle_active(&mut self, text: &str) {
        if let Some(payload) = strip_keyword(text, PLAY_KEYWORD) {
            if payload.is_empty() {
                self.timer.reset(None);
                self.log.write(
                    "ACTIVE: say 'play <move>' to move, or 'imagine'.",
                    LogTag::Info,
                );
            } else {
                self.submit_move(payload);
            }
            return;
        }

        self.timer.reset(None);
        if strip_keyword(text, IMAGINE_KEYWORD).is_some() {
            self.set_state(Mode::Sandbox);
            return;
        }
        self.log.write(
            "ACTIVE: say 'play <move>' or 'imagine' to branch.",
            LogTag::Info,
        );
    }

    fn handle_sandbox(&mut self, text: &str) {
        self.timer.reset(None);
        let lowered = text.to_lowercase();

        match lowered.as_str() {
            RETURN_COMMAND => {
                self.log.write("SANDBOX: return → ACTIVE", LogTag::Session);
                self.set_state(Mode::Active);
            }
            STOP_COMMAND => {
                self.log.write(
                    "SANDBOX: stop (timer reset, staying in sandbox)",
                    LogTag::Info,
                );
            }
            BACK_COMMAND => match self.sandbox.back() {
                Ok(true) => self
                    .log
                    .write("SANDBOX: reverted one imagined move", LogTag::Info),
                Ok(false) => self.log.write("SANDBOX: nothing to undo", LogTag::Info),
                Err(e) => self.sandbox_failure("back", e),
            },
            TAKE_COMMAND => self.take_suggestion(),
            _ => match self.sandbox.move_text(text) {
                Ok(record) => {
                    self.log
                        .write(&format!("Imagine move: {}", record.notation), LogTag::Session);
                    self.log.write_move(&format!("Imagine: {}", record.notation));
                }
                Err(e) => {
                    debug!(error = %e, "sandbox move rejected");
                    self.log
                        .write(&format!("Invalid imagine move: {text}"), LogTag::Session);
                }
            },
        }
    }

    // --- Helpers ---

    fn submit_move(&mut self, move_text: &str) {
        self.timer.reset(None);
        if let Err(e) = self.play_on_board(move_text) {
            debug!(error = %e, "move rejected");
            self.log.write(
                &format!("Invalid move: {move_text}. Try again or wait for the timeout."),
                LogTag::Info,
            );
            return;
        }

        self.reply_move();
        self.timer.reset(None);
        self.log.write("Turn finished", LogTag::Session);
    }

    fn play_on_board(&mut self, move_text: &str) -> Result<()> {
        let mv = self.validator.parse(move_text, &self.game)?;
        let (next, notation) = self.validator.apply(&mv, &self.game)?;
        self.game = next;
        self.log
            .write(&format!("Move accepted: {notation}"), LogTag::Session);
        self.log.write_move(&format!("Player: {notation}"));
        self.log_board();
        self.game_history.push(MoveRecord { mv, notation });
        Ok(())
    }

    fn engine_reply(&self) -> Result<(Move, Chess, String)> {
        let mv = self
            .suggester
            .suggest(&self.game)
            .ok_or_else(|| SessionError::Unavailable("no reply suggested".to_string()))?;
        let (next, notation) = self.validator.apply(&mv, &self.game)?;
        Ok((mv, next, notation))
    }

    fn reply_move(&mut self) {
        match self.engine_reply() {
            Ok((mv, next, notation)) => {
                self.game = next;
                self.log
                    .write(&format!("Engine move: {notation}"), LogTag::Engine);
                self.log.write_move(&format!("Engine: {notation}"));
                self.log_board();
                self.game_history.push(MoveRecord { mv, notation });
            }
            Err(e) => {
                debug!(error = %e, "no engine reply");
                self.log
                    .write("Engine move unavailable or illegal.", LogTag::Engine);
            }
        }
    }

    fn take_suggestion(&mut self) {
        let suggestion = match self.sandbox.suggested_move() {
            Ok(suggestion) => suggestion,
            Err(e) => return self.sandbox_failure("take", e),
        };
        let Some(mv) = suggestion else {
            self.log
                .write("Engine best move unavailable.", LogTag::Engine);
            return;
        };

        match self.sandbox.apply_suggested(&mv) {
            Ok(Some(record)) => {
                self.log.write(
                    &format!("Engine best move (imagine) → {}", record.notation),
                    LogTag::Engine,
                );
                self.log
                    .write_move(&format!("Imagine(Engine): {}", record.notation));
            }
            Ok(None) => self
                .log
                .write("Engine best move was no longer legal.", LogTag::Engine),
            Err(e) => self.sandbox_failure("take", e),
        }
    }

    fn sandbox_failure(&self, op: &str, e: SessionError) {
        error!(op, error = %e, "sandbox used outside an excursion");
        self.log
            .write(&format!("SANDBOX: {op} failed: {e}"), LogTag::Info);
    }

    fn log_board(&self) {
        self.log
            .write(&format!("Board:\n{}", board_diagram(&self.game)), LogTag::Board);
    }

    fn set_state(&mut self, new_mode: Mode) {
        if self.mode == new_mode {
            return;
        }
        self.exit_state(self.mode);
        self.mode = new_mode;
        self.mode_tx.send_replace(new_mode);
        self.enter_state(new_mode);
    }

    fn enter_state(&mut self, mode: Mode) {
        match mode {
            Mode::Idle => {
                self.timer.pause();
                self.timer.reset(Some(false));
                self.log.write(
                    "State → IDLE (listening for wake phrase)",
                    LogTag::Session,
                );
            }
            Mode::Active => {
                self.timer.arm(Some(self.budgets.active), true);
                self.log.write("State → ACTIVE", LogTag::Session);
            }
            Mode::Sandbox => {
                self.sandbox.start(&self.game);
                self.timer.arm(Some(self.budgets.sandbox), true);
                self.log.write("State → SANDBOX", LogTag::Session);
            }
        }
    }

    fn exit_state(&mut self, mode: Mode) {
        if mode == Mode::Sandbox {
            self.sandbox.reset();
        }
    }

    // --- Read accessors ---

    /// The current mode. Only changed by transitions on the owning thread.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// A receiver that always holds the current mode, for other threads.
    pub fn mode_watch(&self) -> watch::Receiver<Mode> {
        self.mode_tx.subscribe()
    }

    /// The position to show: the sandbox's while exploring, else the game's.
    pub fn display_position(&self) -> &Chess {
        match (self.mode, self.sandbox.working()) {
            (Mode::Sandbox, Some(working)) => working,
            _ => &self.game,
        }
    }

    /// The authoritative game, untouched by sandbox moves.
    pub fn game_position(&self) -> &Chess {
        &self.game
    }

    /// Moves played on the real board, player and reply interleaved.
    pub fn game_history(&self) -> &[MoveRecord] {
        &self.game_history
    }

    /// Moves of the current sandbox excursion. Empty outside `Sandbox`.
    pub fn sandbox_history(&self) -> &[MoveRecord] {
        self.sandbox.history()
    }

    /// The position the latest sandbox excursion started from, if any.
    pub fn sandbox_baseline(&self) -> Option<&Chess> {
        self.sandbox.baseline()
    }

    /// The countdown guarding the current mode.
    pub fn timer(&self) -> &Arc<CountdownTimer> {
        &self.timer
    }

    /// Countdown budgets this session arms with.
    pub fn budgets(&self) -> SessionBudgets {
        self.budgets
    }
}

/// Returns the rest of `text`, trimmed, if it starts with `keyword`, ignoring
/// ASCII case.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = text.get(keyword.len()..)?;
    head.eq_ignore_ascii_case(keyword).then(|| rest.trim())
}
