//! Session Log
//!
//! User-facing narration of what the session is doing ("State → ACTIVE",
//! "Move accepted: e4 (e2e4)"). Entries are mirrored to `tracing` and kept in
//! a bounded in-memory history that displays read back.

use chrono::Local;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use tracing::info;

pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Category attached to each log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Session,
    Info,
    Engine,
    Board,
    Voice,
    Move,
}

impl LogTag {
    pub fn as_str(self) -> &'static str {
        match self {
            LogTag::Session => "SESSION",
            LogTag::Info => "INFO",
            LogTag::Engine => "ENGINE",
            LogTag::Board => "BOARD",
            LogTag::Voice => "VOICE",
            LogTag::Move => "MOVE",
        }
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fire-and-forget sink for session narration. Must never block or panic.
pub trait Logger: Send + Sync {
    fn write(&self, text: &str, tag: LogTag);

    /// Records a played move without cluttering the status messages.
    fn write_move(&self, text: &str);
}

/// A single history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub tag: LogTag,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}] {}", self.timestamp, self.tag, self.text)
    }
}

/// The default [`Logger`]: `tracing` output plus a bounded history.
pub struct SessionLog {
    limit: usize,
    history: Mutex<VecDeque<LogEntry>>,
}

impl SessionLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            history: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
        }
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Entries carrying `tag`, oldest first.
    pub fn entries_tagged(&self, tag: LogTag) -> Vec<LogEntry> {
        self.history().into_iter().filter(|e| e.tag == tag).collect()
    }

    fn record(&self, text: &str, tag: LogTag) {
        let entry = LogEntry {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            tag,
            text: text.to_string(),
        };
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if self.limit == 0 {
            return;
        }
        while history.len() >= self.limit {
            history.pop_front();
        }
        history.push_back(entry);
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl Logger for SessionLog {
    fn write(&self, text: &str, tag: LogTag) {
        info!(target: "heychess::session", tag = %tag, "{text}");
        self.record(text, tag);
    }

    fn write_move(&self, text: &str) {
        info!(target: "heychess::session", tag = %LogTag::Move, "{text}");
        self.record(text, LogTag::Move);
    }
}
