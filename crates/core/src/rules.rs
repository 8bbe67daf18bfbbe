//! Rules Oracle and Move Suggestion
//!
//! The session core never decides chess legality on its own. It asks a
//! `MoveValidator` to turn text into a move and to play it, and a
//! `MoveSuggester` for replies and "take" hints. Both are injected as trait
//! objects so a different rules backend or a real engine can be swapped in.

use crate::error::{Result, SessionError};
use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};
use shakmaty::{
    CastlingMode, CastlingSide, Chess, File, Move, Position, Rank, Square,
    san::{San, SanPlus},
    uci::UciMove,
};
use std::sync::Mutex;

/// The reserved word that asks for whichever castle is legal.
pub const CASTLE_KEYWORD: &str = "castle";

/// A move that has been played, with the notation it was recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub mv: Move,
    /// `"<SAN> (<UCI>)"`, e.g. `"Nf3 (g1f3)"`.
    pub notation: String,
}

/// Resolves and executes moves against a position.
pub trait MoveValidator: Send + Sync {
    /// Turns user or recognizer text into a move that is legal in `position`.
    ///
    /// Implementations must understand [`CASTLE_KEYWORD`], trying the
    /// king-side castle before the queen-side one.
    fn parse(&self, text: &str, position: &Chess) -> Result<Move>;

    /// Plays `mv` on a copy of `position`, returning the new position and the
    /// notation of the move.
    fn apply(&self, mv: &Move, position: &Chess) -> Result<(Chess, String)>;

    fn is_legal(&self, mv: &Move, position: &Chess) -> bool;
}

/// Proposes a move for the side to play.
#[cfg_attr(test, mockall::automock)]
pub trait MoveSuggester: Send + Sync {
    /// Returns `None` when no suggestion is available.
    fn suggest(&self, position: &Chess) -> Option<Move>;
}

/// Standard chess rules backed by `shakmaty`.
///
/// Text is tried as the castle keyword, then SAN (`"Nf3"`, `"exd5"`), then
/// UCI (`"g1f3"`).
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl StandardRules {
    pub fn new() -> Self {
        Self
    }

    fn castle(position: &Chess) -> Result<Move> {
        let legal = position.legal_moves();
        [CastlingSide::KingSide, CastlingSide::QueenSide]
            .into_iter()
            .find_map(|side| {
                legal
                    .iter()
                    .find(|m| m.castling_side() == Some(side))
                    .cloned()
            })
            .ok_or_else(|| SessionError::IllegalMove(CASTLE_KEYWORD.to_string()))
    }
}

impl MoveValidator for StandardRules {
    fn parse(&self, text: &str, position: &Chess) -> Result<Move> {
        let text = text.trim();
        if text.eq_ignore_ascii_case(CASTLE_KEYWORD) {
            return Self::castle(position);
        }

        if let Ok(san) = text.parse::<San>() {
            if let Ok(mv) = san.to_move(position) {
                return Ok(mv);
            }
        }

        text.parse::<UciMove>()
            .ok()
            .and_then(|uci| uci.to_move(position).ok())
            .ok_or_else(|| SessionError::IllegalMove(text.to_string()))
    }

    fn apply(&self, mv: &Move, position: &Chess) -> Result<(Chess, String)> {
        if !position.is_legal(mv) {
            return Err(SessionError::IllegalMove(format!("{mv:?}")));
        }
        let uci = UciMove::from_move(mv, CastlingMode::Standard);
        let mut next = position.clone();
        let san = SanPlus::from_move_and_play_unchecked(&mut next, mv);
        Ok((next, format!("{san} ({uci})")))
    }

    fn is_legal(&self, mv: &Move, position: &Chess) -> bool {
        position.is_legal(mv)
    }
}

/// Renders `position` as an 8x8 grid, rank 8 first, `.` for empty squares.
pub fn board_diagram(position: &Chess) -> String {
    let board = position.board();
    let mut out = String::with_capacity(8 * 16);
    for rank in (0..8u32).rev().map(Rank::new) {
        let row: Vec<String> = (0..8u32)
            .map(File::new)
            .map(|file| {
                board
                    .piece_at(Square::from_coords(file, rank))
                    .map_or('.', |piece| piece.char())
                    .to_string()
            })
            .collect();
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    out
}

/// Picks a uniformly random legal move.
///
/// The fallback behind [`UciEngineSuggester`](crate::engine::UciEngineSuggester)
/// when no engine is running, so replies and "take" always have something to
/// play.
pub struct RandomSuggester {
    rng: Mutex<StdRng>,
}

impl RandomSuggester {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// A deterministic suggester, for reproducible sessions.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomSuggester {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveSuggester for RandomSuggester {
    fn suggest(&self, position: &Chess) -> Option<Move> {
        let legal = position.legal_moves();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        legal.choose(&mut *rng).cloned()
    }
}
