//! Command Relay
//!
//! Bridges a speech recognizer running on its own thread to the single thread
//! that owns the `SessionController`.
//!
//! - The producer (recognition thread) resolves finalized utterances against
//!   the grammar of the mode it *believes* the session is in and pushes the
//!   resulting command strings onto an unbounded FIFO. It never calls into the
//!   controller.
//! - The consumer (owning thread) periodically drains the FIFO in order into
//!   `SessionController::handle_input` and refreshes the display once.
//! - The producer keeps its believed mode, and with it the recognizer's active
//!   grammar, in step with the controller by reading the controller's
//!   published mode after every event.

use crate::grammar;
use crate::log::{LogTag, Logger};
use crate::session::{Mode, SessionController};
use crate::worker::{JOIN_WAIT, Worker};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How often the consumer is expected to call [`CommandRelay::pump`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a recognition front end reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// The acoustic wake-word detector fired.
    Wake,
    /// A finalized utterance.
    Utterance(String),
    /// The audio source is gone; the producer should wind down.
    Closed,
}

/// A speech-to-text front end, driven from the producer thread.
pub trait RecognitionFrontEnd: Send {
    /// Waits up to `timeout` for the next recognition result.
    fn next_event(&mut self, timeout: Duration) -> Option<Recognition>;

    /// Switches the phrases the recognizer listens for.
    fn set_grammar(&mut self, mode: Mode, phrases: &[String]);
}

/// A pull-based view, refreshed by the consumer after each drain.
pub trait DisplaySurface {
    fn refresh(&mut self, session: &SessionController);
}

/// Tracks which grammar the recognizer should be using.
///
/// The believed mode follows the controller's mode, with one exception: after
/// a wake the controller may still read `Idle` because the wake command is
/// sitting in the queue. Those read-backs are ignored until the controller has
/// been seen to change mode, so wake detection is not re-armed early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarSync {
    believed: Mode,
    awaiting_wake_ack: bool,
}

impl GrammarSync {
    pub fn new() -> Self {
        Self {
            believed: Mode::Idle,
            awaiting_wake_ack: false,
        }
    }

    pub fn believed(&self) -> Mode {
        self.believed
    }

    /// Whether a wake has been sent that the controller has not acted on yet.
    pub fn awaiting_wake_ack(&self) -> bool {
        self.awaiting_wake_ack
    }

    /// Records a wake. Returns the new believed mode if it changed.
    pub fn on_wake(&mut self, app_mode: Mode) -> Option<Mode> {
        self.awaiting_wake_ack = true;
        let target = match app_mode {
            Mode::Idle => Mode::Active,
            other => other,
        };
        self.change(target)
    }

    /// Records that the controller changed mode since the last wake. Its
    /// only way out of `Idle` is the wake, so that wake has been handled even
    /// if the controller has already fallen back to `Idle`.
    pub fn note_transition(&mut self) {
        self.awaiting_wake_ack = false;
    }

    /// Reconciles with the controller's mode. Returns the new believed mode if
    /// it changed.
    pub fn observe(&mut self, app_mode: Mode) -> Option<Mode> {
        if self.awaiting_wake_ack {
            if app_mode == Mode::Idle {
                return None;
            }
            self.awaiting_wake_ack = false;
        }
        self.change(app_mode)
    }

    fn change(&mut self, mode: Mode) -> Option<Mode> {
        if mode == self.believed {
            return None;
        }
        self.believed = mode;
        Some(mode)
    }
}

impl Default for GrammarSync {
    fn default() -> Self {
        Self::new()
    }
}

/// The enqueue side of the relay. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<String>,
}

impl CommandSender {
    /// Queues a command. Returns `false` if the relay is gone.
    pub fn submit(&self, command: impl Into<String>) -> bool {
        self.tx.send(command.into()).is_ok()
    }
}

/// The recognition-side half of the relay.
pub struct RelayProducer {
    front_end: Box<dyn RecognitionFrontEnd>,
    commands: CommandSender,
    app_mode: watch::Receiver<Mode>,
    sync: GrammarSync,
    wake_phrase: String,
}

impl RelayProducer {
    /// Creates a producer and loads the `Idle` grammar into `front_end`.
    pub fn new(
        mut front_end: Box<dyn RecognitionFrontEnd>,
        commands: CommandSender,
        app_mode: watch::Receiver<Mode>,
        wake_phrase: &str,
    ) -> Self {
        let wake_phrase = wake_phrase.trim().to_lowercase();
        front_end.set_grammar(Mode::Idle, &grammar::phrases_for(Mode::Idle, &wake_phrase));
        Self {
            front_end,
            commands,
            app_mode,
            sync: GrammarSync::new(),
            wake_phrase,
        }
    }

    pub fn believed_mode(&self) -> Mode {
        self.sync.believed()
    }

    /// Waits for one recognition event, handles it, then resynchronizes the
    /// grammar. Returns `false` once the front end has closed.
    pub fn step(&mut self, timeout: Duration) -> bool {
        let event = self.front_end.next_event(timeout);
        let open = event != Some(Recognition::Closed);
        if let Some(event) = event {
            self.handle(event);
        }
        self.sync_grammar();
        open
    }

    pub fn handle(&mut self, event: Recognition) {
        match event {
            Recognition::Wake => self.on_wake(),
            Recognition::Utterance(text) => self.on_utterance(&text),
            Recognition::Closed => debug!("recognition front end closed"),
        }
    }

    /// Adopts the controller's current mode if the sync rules allow it.
    pub fn sync_grammar(&mut self) {
        let app_mode = self.read_app_mode();
        if let Some(mode) = self.sync.observe(app_mode) {
            self.load_grammar(mode);
        }
    }

    fn read_app_mode(&mut self) -> Mode {
        if self.app_mode.has_changed().unwrap_or(false) {
            self.sync.note_transition();
        }
        *self.app_mode.borrow_and_update()
    }

    fn on_wake(&mut self) {
        self.sync_grammar();
        let app_mode = *self.app_mode.borrow();
        if app_mode != Mode::Idle {
            debug!(mode = %app_mode, "wake suppressed; session already awake");
            return;
        }
        if self.sync.awaiting_wake_ack() {
            debug!("wake suppressed; previous wake still queued");
            return;
        }

        info!("wake detected");
        self.commands.submit(self.wake_phrase.clone());
        if let Some(mode) = self.sync.on_wake(app_mode) {
            self.load_grammar(mode);
        }
    }

    fn on_utterance(&mut self, text: &str) {
        let believed = self.sync.believed();
        match grammar::extract_command(text, believed, &self.wake_phrase) {
            Some(_) if believed == Mode::Idle => self.on_wake(),
            Some(command) => {
                debug!(mode = %believed, utterance = text, command = %command, "recognized");
                self.commands.submit(command);
            }
            None => debug!(mode = %believed, utterance = text, "utterance outside grammar"),
        }
    }

    fn load_grammar(&mut self, mode: Mode) {
        debug!(mode = %mode, "switching recognizer grammar");
        let phrases = grammar::phrases_for(mode, &self.wake_phrase);
        self.front_end.set_grammar(mode, &phrases);
    }
}

/// Owns the command FIFO and, optionally, the producer thread feeding it.
pub struct CommandRelay {
    commands: CommandSender,
    queue: mpsc::UnboundedReceiver<String>,
    log: Arc<dyn Logger>,
    producer: Option<Worker>,
}

impl CommandRelay {
    pub fn new(log: Arc<dyn Logger>) -> Self {
        let (tx, queue) = mpsc::unbounded_channel();
        Self {
            commands: CommandSender { tx },
            queue,
            log,
            producer: None,
        }
    }

    /// A handle for pushing commands directly, bypassing any grammar.
    pub fn sender(&self) -> CommandSender {
        self.commands.clone()
    }

    /// Builds a producer bound to this relay without starting a thread.
    pub fn producer(
        &self,
        front_end: Box<dyn RecognitionFrontEnd>,
        app_mode: watch::Receiver<Mode>,
        wake_phrase: &str,
    ) -> RelayProducer {
        RelayProducer::new(front_end, self.sender(), app_mode, wake_phrase)
    }

    /// Runs a producer for `front_end` on a background thread.
    ///
    /// Replaces (and stops) any producer started earlier.
    pub fn spawn_producer(
        &mut self,
        front_end: Box<dyn RecognitionFrontEnd>,
        app_mode: watch::Receiver<Mode>,
        wake_phrase: &str,
        poll_interval: Duration,
    ) -> std::io::Result<()> {
        self.stop();

        let mut producer = self.producer(front_end, app_mode, wake_phrase);
        let worker = Worker::spawn("relay-producer", move |stop| {
            while !stop.load(Ordering::Acquire) {
                if !producer.step(poll_interval) {
                    break;
                }
            }
            debug!("relay producer finished");
        })?;

        self.producer = Some(worker);
        Ok(())
    }

    /// Drains every queued command into `session`, in order, on the calling
    /// thread, after handling any pending timer expiry.
    ///
    /// `display` is refreshed once if anything happened. Returns the number of
    /// commands drained.
    pub fn pump(
        &mut self,
        session: &mut SessionController,
        display: &mut dyn DisplaySurface,
    ) -> usize {
        let timed_out = session.dispatch_timeouts();

        let mut drained = 0;
        while let Ok(command) = self.queue.try_recv() {
            self.log.write(&command, LogTag::Voice);
            session.handle_input(&command);
            drained += 1;
        }

        if drained > 0 || timed_out {
            display.refresh(session);
        }
        drained
    }

    /// Whether a producer thread is alive.
    pub fn is_producing(&self) -> bool {
        self.producer.as_ref().is_some_and(Worker::is_running)
    }

    /// Stops the producer thread, waiting a bounded time. Idempotent.
    ///
    /// A producer stuck inside its front end past the wait is detached and
    /// exits on its own once the front end returns.
    pub fn stop(&mut self) {
        if let Some(worker) = self.producer.take() {
            worker.stop(JOIN_WAIT);
        }
    }
}

impl Drop for CommandRelay {
    fn drop(&mut self) {
        if self.producer.is_some() {
            warn!("command relay dropped while producing; stopping");
        }
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::SessionLog;
    use crate::rules::{RandomSuggester, StandardRules};
    use crate::session::{Collaborators, SessionBudgets};
    use crate::timer::CountdownTimer;
    use crate::wake::PhraseWakeDetector;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct ScriptedFrontEnd {
        events: Arc<Mutex<VecDeque<Recognition>>>,
        grammars: Arc<Mutex<Vec<Mode>>>,
    }

    impl ScriptedFrontEnd {
        fn grammars(&self) -> Vec<Mode> {
            self.grammars.lock().unwrap().clone()
        }
    }

    impl RecognitionFrontEnd for ScriptedFrontEnd {
        fn next_event(&mut self, _timeout: Duration) -> Option<Recognition> {
            self.events.lock().unwrap().pop_front()
        }

        fn set_grammar(&mut self, mode: Mode, phrases: &[String]) {
            assert!(!phrases.is_empty());
            self.grammars.lock().unwrap().push(mode);
        }
    }

    #[derive(Default)]
    struct CountingDisplay {
        refreshes: usize,
        last_mode: Option<Mode>,
    }

    impl DisplaySurface for CountingDisplay {
        fn refresh(&mut self, session: &SessionController) {
            self.refreshes += 1;
            self.last_mode = Some(session.mode());
        }
    }

    fn controller(log: Arc<SessionLog>) -> SessionController {
        let collaborators = Collaborators {
            validator: Arc::new(StandardRules::new()),
            suggester: Arc::new(RandomSuggester::seeded(3)),
            wake: Arc::new(PhraseWakeDetector::default()),
            logger: log,
        };
        SessionController::new(
            collaborators,
            Arc::new(CountdownTimer::new(Duration::from_secs(10))),
            SessionBudgets::default(),
        )
    }

    fn queued(relay: &mut CommandRelay) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(cmd) = relay.queue.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_grammar_sync_follows_divergence() {
        let mut sync = GrammarSync::new();
        assert_eq!(sync.observe(Mode::Idle), None);
        assert_eq!(sync.observe(Mode::Active), Some(Mode::Active));
        assert_eq!(sync.observe(Mode::Active), None);
        assert_eq!(sync.observe(Mode::Sandbox), Some(Mode::Sandbox));
        assert_eq!(sync.observe(Mode::Idle), Some(Mode::Idle));
    }

    #[test]
    fn test_grammar_sync_holds_through_idle_after_wake() {
        let mut sync = GrammarSync::new();
        assert_eq!(sync.on_wake(Mode::Idle), Some(Mode::Active));
        assert!(sync.awaiting_wake_ack());

        // The wake command has not been processed yet.
        assert_eq!(sync.observe(Mode::Idle), None);
        assert_eq!(sync.observe(Mode::Idle), None);
        assert_eq!(sync.believed(), Mode::Active);

        assert_eq!(sync.observe(Mode::Active), None);
        assert!(!sync.awaiting_wake_ack());
        assert_eq!(sync.observe(Mode::Idle), Some(Mode::Idle));
    }

    #[test]
    fn test_producer_loads_idle_grammar_on_creation() {
        let relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let front_end = ScriptedFrontEnd::default();
        let (_tx, rx) = watch::channel(Mode::Idle);
        let producer = relay.producer(Box::new(front_end.clone()), rx, "hey chess");
        assert_eq!(producer.believed_mode(), Mode::Idle);
        assert_eq!(front_end.grammars(), vec![Mode::Idle]);
    }

    #[test]
    fn test_wake_while_idle_enqueues_wake_phrase() {
        let mut relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let front_end = ScriptedFrontEnd::default();
        let (_tx, rx) = watch::channel(Mode::Idle);
        let mut producer = relay.producer(Box::new(front_end.clone()), rx, "Hey Chess");

        producer.handle(Recognition::Wake);
        producer.sync_grammar();

        assert_eq!(queued(&mut relay), vec!["hey chess"]);
        assert_eq!(producer.believed_mode(), Mode::Active);
        assert_eq!(front_end.grammars(), vec![Mode::Idle, Mode::Active]);
    }

    #[test]
    fn test_wake_suppressed_when_session_already_active() {
        let mut relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let front_end = ScriptedFrontEnd::default();
        let (_tx, rx) = watch::channel(Mode::Active);
        let mut producer = relay.producer(Box::new(front_end.clone()), rx, "hey chess");

        producer.handle(Recognition::Wake);
        producer.handle(Recognition::Utterance("hey chess".to_string()));

        assert!(queued(&mut relay).is_empty());
        assert_eq!(producer.believed_mode(), Mode::Active);
    }

    #[test]
    fn test_utterances_resolve_against_believed_mode() {
        let mut relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let (tx, rx) = watch::channel(Mode::Idle);
        let mut producer =
            relay.producer(Box::new(ScriptedFrontEnd::default()), rx, "hey chess");

        producer.handle(Recognition::Utterance("play e two e four".to_string()));
        assert!(queued(&mut relay).is_empty());

        tx.send_replace(Mode::Active);
        producer.sync_grammar();
        producer.handle(Recognition::Utterance("play e two e four".to_string()));
        producer.handle(Recognition::Utterance("back".to_string()));

        tx.send_replace(Mode::Sandbox);
        producer.sync_grammar();
        producer.handle(Recognition::Utterance("back".to_string()));
        producer.handle(Recognition::Utterance("knight f three".to_string()));

        assert_eq!(queued(&mut relay), vec!["play e2e4", "back", "Nf3"]);
    }

    #[test]
    fn test_spoken_wake_phrase_goes_through_wake_path() {
        let mut relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let (_tx, rx) = watch::channel(Mode::Idle);
        let mut producer =
            relay.producer(Box::new(ScriptedFrontEnd::default()), rx, "hey chess");

        producer.handle(Recognition::Utterance("Hey chess".to_string()));
        assert_eq!(queued(&mut relay), vec!["hey chess"]);
        assert_eq!(producer.believed_mode(), Mode::Active);
    }

    #[test]
    fn test_grammar_follows_controller_without_early_rearm() {
        let log = Arc::new(SessionLog::default());
        let mut relay = CommandRelay::new(log.clone());
        let mut session = controller(log);
        let mut display = CountingDisplay::default();
        let front_end = ScriptedFrontEnd::default();
        let mut producer =
            relay.producer(Box::new(front_end.clone()), session.mode_watch(), "hey chess");

        producer.handle(Recognition::Wake);
        producer.sync_grammar();
        assert_eq!(producer.believed_mode(), Mode::Active);

        relay.pump(&mut session, &mut display);
        assert_eq!(session.mode(), Mode::Active);
        producer.sync_grammar();
        assert_eq!(producer.believed_mode(), Mode::Active);

        session.handle_timeout();
        producer.sync_grammar();
        assert_eq!(producer.believed_mode(), Mode::Idle);
        assert_eq!(
            front_end.grammars(),
            vec![Mode::Idle, Mode::Active, Mode::Idle]
        );
    }

    #[test]
    fn test_step_reports_closed_front_end() {
        let relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let front_end = ScriptedFrontEnd::default();
        front_end
            .events
            .lock()
            .unwrap()
            .extend([Recognition::Wake, Recognition::Closed]);
        let (_tx, rx) = watch::channel(Mode::Idle);
        let mut producer = relay.producer(Box::new(front_end), rx, "hey chess");

        assert!(producer.step(Duration::ZERO));
        assert!(!producer.step(Duration::ZERO));
    }

    #[test]
    fn test_pump_drains_in_order_and_refreshes_once() {
        let log = Arc::new(SessionLog::default());
        let mut relay = CommandRelay::new(log.clone());
        let mut session = controller(log.clone());
        let mut display = CountingDisplay::default();

        let sender = relay.sender();
        assert!(sender.submit("hey chess"));
        assert!(sender.submit("play e4"));
        assert!(sender.submit("imagine"));

        assert_eq!(relay.pump(&mut session, &mut display), 3);
        assert_eq!(display.refreshes, 1);
        assert_eq!(display.last_mode, Some(Mode::Sandbox));
        assert_eq!(session.game_history().len(), 2);
        assert_eq!(log.entries_tagged(LogTag::Voice).len(), 3);

        assert_eq!(relay.pump(&mut session, &mut display), 0);
        assert_eq!(display.refreshes, 1);
    }

    #[test]
    fn test_pump_dispatches_timeouts() {
        let log = Arc::new(SessionLog::default());
        let mut relay = CommandRelay::new(log.clone());
        let mut session = controller(log);
        let mut display = CountingDisplay::default();

        relay.sender().submit("hey chess");
        relay.pump(&mut session, &mut display);
        session.timer().tick(SessionBudgets::default().active);

        assert_eq!(relay.pump(&mut session, &mut display), 0);
        assert_eq!(session.mode(), Mode::Idle);
        assert_eq!(display.refreshes, 2);
    }

    #[test]
    fn test_stop_without_producer_is_noop() {
        let mut relay = CommandRelay::new(Arc::new(SessionLog::default()));
        relay.stop();
        relay.stop();
        assert!(!relay.is_producing());
    }

    #[test]
    fn test_grammar_sync_transition_ends_wait() {
        let mut sync = GrammarSync::new();
        sync.on_wake(Mode::Idle);
        sync.note_transition();
        assert!(!sync.awaiting_wake_ack());
        assert_eq!(sync.observe(Mode::Idle), Some(Mode::Idle));
    }

    #[test]
    fn test_second_wake_before_drain_is_not_queued() {
        let log = Arc::new(SessionLog::default());
        let mut relay = CommandRelay::new(log.clone());
        let mut session = controller(log.clone());
        let mut display = CountingDisplay::default();
        let mut producer = relay.producer(
            Box::new(ScriptedFrontEnd::default()),
            session.mode_watch(),
            "hey chess",
        );

        producer.handle(Recognition::Wake);
        producer.sync_grammar();
        producer.handle(Recognition::Wake);
        producer.handle(Recognition::Utterance("hey chess".to_string()));
        let cycles = session.timer().cycles();

        assert_eq!(relay.pump(&mut session, &mut display), 1);
        assert_eq!(session.mode(), Mode::Active);
        assert_eq!(session.timer().cycles(), cycles + 1);
        assert!(
            !log.history()
                .iter()
                .any(|e| e.text.starts_with("ACTIVE: say"))
        );
    }

    #[test]
    fn test_wake_rearms_after_unobserved_round_trip() {
        let log = Arc::new(SessionLog::default());
        let mut relay = CommandRelay::new(log.clone());
        let mut session = controller(log);
        let mut display = CountingDisplay::default();
        let mut producer = relay.producer(
            Box::new(ScriptedFrontEnd::default()),
            session.mode_watch(),
            "hey chess",
        );

        producer.handle(Recognition::Wake);
        relay.pump(&mut session, &mut display);
        // The session times out before the producer looks again.
        session.handle_timeout();
        assert_eq!(session.mode(), Mode::Idle);

        producer.sync_grammar();
        assert_eq!(producer.believed_mode(), Mode::Idle);

        producer.handle(Recognition::Wake);
        assert_eq!(queued(&mut relay), vec!["hey chess"]);
    }

    struct StuckFrontEnd;

    impl RecognitionFrontEnd for StuckFrontEnd {
        fn next_event(&mut self, _timeout: Duration) -> Option<Recognition> {
            std::thread::sleep(Duration::from_secs(4));
            None
        }

        fn set_grammar(&mut self, _mode: Mode, _phrases: &[String]) {}
    }

    #[test]
    fn test_stop_returns_after_bounded_wait_when_front_end_is_stuck() {
        let mut relay = CommandRelay::new(Arc::new(SessionLog::default()));
        let (_tx, rx) = watch::channel(Mode::Idle);
        relay
            .spawn_producer(Box::new(StuckFrontEnd), rx, "hey chess", Duration::from_millis(10))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(relay.is_producing());

        let started = std::time::Instant::now();
        relay.stop();
        let waited = started.elapsed();

        assert!(waited >= JOIN_WAIT, "waited {waited:?}");
        assert!(waited < JOIN_WAIT + Duration::from_millis(900), "waited {waited:?}");
        assert!(!relay.is_producing());
        relay.stop();
    }
}
