//! UCI Engine Suggester
//!
//! Asks an external UCI engine (Stockfish by default) for a move at a fixed
//! search depth. When the engine cannot be started, or stops answering, the
//! suggester falls back to a random legal move so replies never stall.

use crate::rules::{MoveSuggester, RandomSuggester};
use shakmaty::{Chess, EnPassantMode, Move, fen::Fen, uci::UciMove};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_ENGINE_PATH: &str = "/usr/games/stockfish";
pub const DEFAULT_SEARCH_DEPTH: u32 = 12;

/// A running engine process speaking UCI over its standard streams.
struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl EngineProcess {
    /// Spawns `command` and completes the `uci` / `isready` handshake.
    fn start(mut command: Command) -> io::Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("engine stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("engine stdout is not piped"))?;

        let mut engine = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        engine.send("uci")?;
        engine.read_until("uciok")?;
        engine.send("isready")?;
        engine.read_until("readyok")?;
        Ok(engine)
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "engine closed its output",
            ));
        }
        Ok(line.trim().to_string())
    }

    fn read_until(&mut self, token: &str) -> io::Result<()> {
        while self.read_line()? != token {}
        Ok(())
    }

    /// Searches `fen` to `depth` and returns the engine's move in UCI text.
    fn best_move(&mut self, fen: &str, depth: u32) -> io::Result<Option<String>> {
        self.send(&format!("position fen {fen}"))?;
        self.send(&format!("go depth {depth}"))?;
        loop {
            let line = self.read_line()?;
            if let Some(rest) = line.strip_prefix("bestmove") {
                return Ok(parse_bestmove(rest));
            }
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.send("quit");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Extracts the move from the remainder of a `bestmove` line. `(none)` and
/// the null move mean the side to play has no legal move.
fn parse_bestmove(rest: &str) -> Option<String> {
    rest.split_whitespace()
        .next()
        .filter(|token| *token != "(none)" && *token != "0000")
        .map(str::to_string)
}

/// Move suggestions from a UCI engine searched to a fixed depth.
pub struct UciEngineSuggester {
    engine: Mutex<Option<EngineProcess>>,
    depth: u32,
    fallback: RandomSuggester,
}

impl UciEngineSuggester {
    /// Starts the engine binary at `path`. A missing or broken binary is
    /// logged and leaves the suggester on its random fallback.
    pub fn spawn(path: impl AsRef<Path>, depth: u32) -> Self {
        let path = path.as_ref();
        let suggester = Self::from_command(Command::new(path), depth);
        if suggester.has_engine() {
            info!(path = %path.display(), depth, "Chess engine started");
        } else {
            warn!(path = %path.display(), "Chess engine unavailable; suggesting random moves");
        }
        suggester
    }

    /// Like [`spawn`](Self::spawn), for an engine that needs arguments or a
    /// wrapper.
    pub fn from_command(command: Command, depth: u32) -> Self {
        let engine = match EngineProcess::start(command) {
            Ok(engine) => Some(engine),
            Err(e) => {
                debug!(error = %e, "engine handshake failed");
                None
            }
        };
        Self {
            engine: Mutex::new(engine),
            depth: depth.max(1),
            fallback: RandomSuggester::new(),
        }
    }

    /// Replaces the random fallback, e.g. with a seeded one.
    pub fn with_fallback(mut self, fallback: RandomSuggester) -> Self {
        self.fallback = fallback;
        self
    }

    /// Whether suggestions still come from the engine.
    pub fn has_engine(&self) -> bool {
        self.engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl MoveSuggester for UciEngineSuggester {
    fn suggest(&self, position: &Chess) -> Option<Move> {
        let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(process) = engine.as_mut() {
            let fen = Fen::from_position(position.clone(), EnPassantMode::Legal).to_string();
            match process.best_move(&fen, self.depth) {
                Ok(None) => return None,
                Ok(Some(text)) => {
                    let mv = text
                        .parse::<UciMove>()
                        .ok()
                        .and_then(|uci| uci.to_move(position).ok());
                    if mv.is_some() {
                        return mv;
                    }
                    warn!(engine_move = %text, fen = %fen, "Engine move is not legal here; using fallback");
                }
                Err(e) => {
                    warn!(error = %e, "Chess engine stopped answering; suggesting random moves");
                    *engine = None;
                }
            }
        }
        drop(engine);
        self.fallback.suggest(position)
    }
}
