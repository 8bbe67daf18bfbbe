/// The phrase that brings the session out of `Idle` unless configured otherwise.
pub const DEFAULT_WAKE_PHRASE: &str = "hey chess";

/// Decides whether a piece of input is the wake phrase.
pub trait WakeDetector: Send + Sync {
    fn detect(&self, text: &str) -> bool;

    /// The canonical phrase, enqueued when an acoustic wake signal fires.
    fn phrase(&self) -> &str;
}

/// Matches input against a fixed list of phrases, ignoring case and
/// surrounding whitespace.
#[derive(Debug, Clone)]
pub struct PhraseWakeDetector {
    phrases: Vec<String>,
}

impl PhraseWakeDetector {
    /// Creates a detector for `phrase`; additional aliases can be added with
    /// [`PhraseWakeDetector::with_alias`].
    pub fn new(phrase: &str) -> Self {
        Self {
            phrases: vec![normalize(phrase)],
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.phrases.push(normalize(alias));
        self
    }
}

impl Default for PhraseWakeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_PHRASE)
    }
}

impl WakeDetector for PhraseWakeDetector {
    fn detect(&self, text: &str) -> bool {
        let text = normalize(text);
        self.phrases.iter().any(|p| *p == text)
    }

    fn phrase(&self) -> &str {
        &self.phrases[0]
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
