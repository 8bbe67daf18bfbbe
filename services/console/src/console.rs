//! Terminal front and back ends for a session.
//!
//! `TerminalDisplay` renders the controller after each relay drain.
//! `LineRecognizer` stands in for a speech recognizer by treating each stdin
//! line as a finalized utterance, so the full recognition path (grammar
//! switching included) can be exercised from a keyboard.

use heychess_core::{
    CommandSender, DisplaySurface, Mode, Recognition, RecognitionFrontEnd, SessionController,
    rules::board_diagram,
};
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lines that end the session.
pub const QUIT_COMMANDS: [&str; 2] = ["quit", "exit"];

pub fn is_quit(line: &str) -> bool {
    let line = line.trim();
    QUIT_COMMANDS.iter().any(|q| line.eq_ignore_ascii_case(q))
}

/// Renders mode, countdown, board and move histories as plain text.
pub struct TerminalDisplay<W: Write> {
    out: W,
}

impl TerminalDisplay<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// The text shown for `session`.
    pub fn render(session: &SessionController) -> String {
        let timer = session.timer().snapshot();
        let mut text = match session.mode() {
            Mode::Idle => format!("== {} ==\n", session.mode()),
            mode => format!(
                "== {mode} == {:.1}s left\n",
                timer.remaining.as_secs_f64()
            ),
        };
        text.push_str(&board_diagram(session.display_position()));

        let game: Vec<&str> = session
            .game_history()
            .iter()
            .map(|r| r.notation.as_str())
            .collect();
        text.push_str(&format!("Game: {}\n", history_line(&game)));

        if session.mode() == Mode::Sandbox {
            let imagined: Vec<&str> = session
                .sandbox_history()
                .iter()
                .map(|r| r.notation.as_str())
                .collect();
            text.push_str(&format!("Imagine: {}\n", history_line(&imagined)));
        }
        text
    }
}

fn history_line(moves: &[&str]) -> String {
    if moves.is_empty() {
        "-".to_string()
    } else {
        moves.join(", ")
    }
}

impl<W: Write> DisplaySurface for TerminalDisplay<W> {
    fn refresh(&mut self, session: &SessionController) {
        let text = Self::render(session);
        if let Err(e) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
        {
            warn!(error = %e, "failed to draw session");
        }
    }
}

/// A recognition front end fed with text lines.
///
/// A line matching the wake phrase is reported as an acoustic wake; other
/// non-blank lines are utterances.
pub struct LineRecognizer {
    lines: mpsc::Receiver<String>,
    wake_phrase: String,
    grammar: Option<(Mode, usize)>,
}

impl LineRecognizer {
    pub fn new(lines: mpsc::Receiver<String>, wake_phrase: &str) -> Self {
        Self {
            lines,
            wake_phrase: normalize(wake_phrase),
            grammar: None,
        }
    }

    /// The mode and size of the grammar last loaded.
    pub fn grammar(&self) -> Option<(Mode, usize)> {
        self.grammar
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl RecognitionFrontEnd for LineRecognizer {
    fn next_event(&mut self, timeout: Duration) -> Option<Recognition> {
        let line = match self.lines.recv_timeout(timeout) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => return Some(Recognition::Closed),
        };

        let text = normalize(&line);
        if text.is_empty() {
            None
        } else if text == self.wake_phrase {
            Some(Recognition::Wake)
        } else {
            Some(Recognition::Utterance(text))
        }
    }

    fn set_grammar(&mut self, mode: Mode, phrases: &[String]) {
        debug!(mode = %mode, phrases = phrases.len(), "grammar loaded");
        self.grammar = Some((mode, phrases.len()));
    }
}

/// Where typed lines go.
pub enum LineSink {
    /// Straight into the relay, bypassing any grammar.
    Direct(CommandSender),
    /// Through a [`LineRecognizer`].
    Recognizer(mpsc::Sender<String>),
}

impl LineSink {
    fn deliver(&self, line: String) -> bool {
        match self {
            LineSink::Direct(commands) => commands.submit(line),
            LineSink::Recognizer(lines) => lines.send(line).is_ok(),
        }
    }
}

/// Forwards lines from `input` to `sink` until a quit command, end of input,
/// or a closed sink.
pub fn forward_lines<R: BufRead>(input: R, sink: &LineSink) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read input");
                break;
            }
        };
        if is_quit(&line) {
            info!("quit requested");
            break;
        }
        if !sink.deliver(line) {
            debug!("input sink closed");
            break;
        }
    }
}

/// Reads stdin on a named thread. The thread finishes when input ends.
pub fn spawn_stdin_reader(sink: LineSink) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || forward_lines(io::stdin().lock(), &sink))
}
