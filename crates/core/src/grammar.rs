//! Command Grammar
//!
//! Turns finalized recognizer text into the command strings the session
//! controller understands, using only the phrases valid in a given mode.
//! Spoken moves are normalized to notation the rules oracle can parse:
//! `"knight f three"` becomes `"Nf3"`, `"e two e four"` becomes `"e2e4"`.

use crate::rules::CASTLE_KEYWORD;
use crate::session::Mode;

/// Submits a move on the real board: `"play <move>"`.
pub const PLAY_KEYWORD: &str = "play";
/// Branches into the sandbox.
pub const IMAGINE_KEYWORD: &str = "imagine";
pub const RETURN_COMMAND: &str = "return";
pub const STOP_COMMAND: &str = "stop";
pub const BACK_COMMAND: &str = "back";
pub const TAKE_COMMAND: &str = "take";

const ACTIVE_COMMANDS: [&str; 2] = [PLAY_KEYWORD, IMAGINE_KEYWORD];
const SANDBOX_COMMANDS: [&str; 4] = [RETURN_COMMAND, TAKE_COMMAND, BACK_COMMAND, STOP_COMMAND];

const PIECES: [(&str, &str); 6] = [
    ("pawn", ""),
    ("knight", "N"),
    ("bishop", "B"),
    ("rook", "R"),
    ("queen", "Q"),
    ("king", "K"),
];
const FILES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
const RANKS: [(&str, char); 8] = [
    ("one", '1'),
    ("two", '2'),
    ("three", '3'),
    ("four", '4'),
    ("five", '5'),
    ("six", '6'),
    ("seven", '7'),
    ("eight", '8'),
];

fn piece_prefix(word: &str) -> Option<&'static str> {
    PIECES.iter().find(|(p, _)| *p == word).map(|(_, s)| *s)
}

fn is_file(word: &str) -> bool {
    FILES.contains(&word)
}

fn rank_digit(word: &str) -> Option<char> {
    RANKS.iter().find(|(r, _)| *r == word).map(|(_, d)| *d)
}

/// Index of the first word at or after `from` accepted by `pred`.
fn first_after(words: &[&str], from: usize, pred: impl Fn(&str) -> bool) -> Option<usize> {
    (from..words.len()).find(|&i| pred(words[i]))
}

/// Finds a `file rank` pair starting at `from`, tolerating filler words.
fn square_after(words: &[&str], from: usize) -> Option<(usize, String)> {
    let f = first_after(words, from, is_file)?;
    let r = first_after(words, f + 1, |w| rank_digit(w).is_some())?;
    let digit = rank_digit(words[r])?;
    Some((r, format!("{}{digit}", words[f])))
}

/// Normalizes a spoken move into SAN- or UCI-like notation.
///
/// Patterns are tried in order: `piece file rank` (`"queen to a four"` →
/// `"Qa4"`), `file rank file rank` (→ `"e2e4"`), then a bare destination
/// (`"e four"` → `"e4"`). The word `castle` passes through unchanged.
pub fn parse_spoken_move(words: &[&str]) -> Option<String> {
    let words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();

    if words.len() == 1 && words[0] == CASTLE_KEYWORD {
        return Some(CASTLE_KEYWORD.to_string());
    }

    if let Some(p) = first_after(&words, 0, |w| piece_prefix(w).is_some()) {
        if let Some((_, square)) = square_after(&words, p + 1) {
            let prefix = piece_prefix(words[p]).unwrap_or_default();
            return Some(format!("{prefix}{square}"));
        }
    }

    if let Some((r1, from)) = square_after(&words, 0) {
        if let Some((_, to)) = square_after(&words, r1 + 1) {
            return Some(format!("{from}{to}"));
        }
        return Some(from);
    }

    None
}

/// Resolves recognizer text against the grammar of `mode`.
///
/// Returns `None` when the text is not a phrase of that mode. In `Idle` only
/// `wake_phrase` is accepted.
pub fn extract_command(text: &str, mode: Mode, wake_phrase: &str) -> Option<String> {
    let text = text.trim().to_lowercase();
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    match mode {
        Mode::Idle => {
            let wake: Vec<String> = wake_phrase
                .split_whitespace()
                .map(str::to_lowercase)
                .collect();
            (words == wake).then(|| wake.join(" "))
        }
        Mode::Active => {
            if words.len() == 1 && ACTIVE_COMMANDS.contains(&words[0]) {
                return Some(words[0].to_string());
            }
            if words[0] == PLAY_KEYWORD {
                return parse_spoken_move(&words[1..]).map(|mv| format!("{PLAY_KEYWORD} {mv}"));
            }
            None
        }
        Mode::Sandbox => {
            if words.len() == 1 && SANDBOX_COMMANDS.contains(&words[0]) {
                return Some(words[0].to_string());
            }
            parse_spoken_move(&words)
        }
    }
}

fn spoken_moves() -> Vec<String> {
    let mut moves = Vec::with_capacity(PIECES.len() * 64 + 64 * 64 + 1);
    for (piece, _) in PIECES {
        for file in FILES {
            for (rank, _) in RANKS {
                moves.push(format!("{piece} {file} {rank}"));
            }
        }
    }
    for f1 in FILES {
        for (r1, _) in RANKS {
            for f2 in FILES {
                for (r2, _) in RANKS {
                    moves.push(format!("{f1} {r1} {f2} {r2}"));
                }
            }
        }
    }
    moves.push(CASTLE_KEYWORD.to_string());
    moves
}

/// Every phrase a recognizer should listen for in `mode`.
pub fn phrases_for(mode: Mode, wake_phrase: &str) -> Vec<String> {
    match mode {
        Mode::Idle => vec![wake_phrase.trim().to_lowercase()],
        Mode::Active => {
            let mut phrases: Vec<String> = ACTIVE_COMMANDS.iter().map(|c| c.to_string()).collect();
            phrases.extend(
                spoken_moves()
                    .into_iter()
                    .map(|mv| format!("{PLAY_KEYWORD} {mv}")),
            );
            phrases
        }
        Mode::Sandbox => {
            let mut phrases: Vec<String> =
                SANDBOX_COMMANDS.iter().map(|c| c.to_string()).collect();
            phrases.extend(spoken_moves());
            phrases
        }
    }
}
