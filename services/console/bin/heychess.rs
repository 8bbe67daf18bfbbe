//! Main Entrypoint for the Heychess Console
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Wiring the session controller to its collaborators.
//! 3. Starting the countdown and the input threads.
//! 4. Pumping the command relay on this thread until the user quits.

use anyhow::Context;
use clap::Parser;
use heychess_console::{
    config::Config,
    console::{LineRecognizer, LineSink, TerminalDisplay, spawn_stdin_reader},
};
use heychess_core::{
    Collaborators, CommandRelay, DisplaySurface, PhraseWakeDetector, SessionController,
    SessionLog, StandardRules, UciEngineSuggester, timer::CountdownTimer,
};
use std::sync::{Arc, mpsc};
use std::thread;
use tracing::info;

/// Play chess hands-free from a terminal.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Route input through the recognizer front end instead of typing commands
    #[arg(long)]
    voice: bool,

    /// Phrase that wakes the session
    #[arg(long)]
    wake_phrase: Option<String>,

    /// Seconds of silence before an active session goes idle
    #[arg(long, value_name = "SECS")]
    active_timeout: Option<f64>,

    /// Seconds of silence before the imagine sandbox goes idle
    #[arg(long, value_name = "SECS")]
    sandbox_timeout: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env()
        .and_then(|c| c.with_overrides(cli.wake_phrase, cli.active_timeout, cli.sandbox_timeout))
        .context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Wiring session...");

    // --- 3. Build the Session ---
    let log = Arc::new(SessionLog::new(config.log_history_limit));
    let collaborators = Collaborators {
        validator: Arc::new(StandardRules::new()),
        suggester: Arc::new(UciEngineSuggester::spawn(
            &config.engine_path,
            config.engine_depth,
        )),
        wake: Arc::new(PhraseWakeDetector::new(&config.wake_phrase)),
        logger: log.clone(),
    };
    let budgets = config.budgets();
    let timer = Arc::new(CountdownTimer::new(budgets.active));
    let mut session = SessionController::new(collaborators, timer.clone(), budgets);
    let mut relay = CommandRelay::new(log);
    let mut display = TerminalDisplay::stdout();

    // --- 4. Start Input ---
    let sink = if cli.voice {
        let (lines, rx) = mpsc::channel();
        relay
            .spawn_producer(
                Box::new(LineRecognizer::new(rx, &config.wake_phrase)),
                session.mode_watch(),
                &config.wake_phrase,
                config.poll_interval,
            )
            .context("Failed to start recognizer thread")?;
        LineSink::Recognizer(lines)
    } else {
        LineSink::Direct(relay.sender())
    };
    let reader = spawn_stdin_reader(sink).context("Failed to start input thread")?;
    timer.start_auto_tick(config.tick_interval);

    info!(
        voice = cli.voice,
        wake_phrase = %config.wake_phrase,
        active_secs = budgets.active.as_secs_f64(),
        sandbox_secs = budgets.sandbox.as_secs_f64(),
        "Session ready. Say '{}' to begin, 'quit' to leave.",
        config.wake_phrase
    );
    display.refresh(&session);

    // --- 5. Run ---
    while !reader.is_finished() {
        relay.pump(&mut session, &mut display);
        thread::sleep(config.poll_interval);
    }
    // Let the producer hand over anything still in flight.
    thread::sleep(config.poll_interval);
    relay.pump(&mut session, &mut display);

    relay.stop();
    timer.stop_auto_tick();
    info!("Session has shut down.");
    Ok(())
}
