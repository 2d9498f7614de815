use crate::errors::ArenaError;
use crate::opening_book::BookMove;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Playing style used to bias candidate ordering and book selection.
/// Styles never make a losing move playable; they only reorder menus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    Aggressive,
    Defensive,
    Balanced,
    Tactical,
    Positional,
}

impl Personality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Personality::Aggressive => "aggressive",
            Personality::Defensive => "defensive",
            Personality::Balanced => "balanced",
            Personality::Tactical => "tactical",
            Personality::Positional => "positional",
        }
    }

    /// Styles that want captures and checks listed before quiet moves.
    pub fn prefers_forcing(&self) -> bool {
        matches!(self, Personality::Aggressive | Personality::Tactical)
    }

    /// Book-move score: aggressive styles chase sharp, contested lines,
    /// defensive styles chase decisive-result stability, everyone else
    /// follows popularity.
    fn book_score(&self, m: &BookMove) -> f64 {
        let total = m.total_games() as f64;
        match self {
            Personality::Aggressive => total * 0.5 + m.draw_rate() * 1000.0,
            Personality::Defensive => total * 0.5 + (1.0 - m.draw_rate()) * 1000.0,
            _ => total,
        }
    }
}

impl Default for Personality {
    fn default() -> Self {
        Personality::Balanced
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Personality {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aggressive" => Ok(Personality::Aggressive),
            "defensive" => Ok(Personality::Defensive),
            "balanced" => Ok(Personality::Balanced),
            "tactical" => Ok(Personality::Tactical),
            "positional" => Ok(Personality::Positional),
            other => Err(ArenaError::Configuration(format!(
                "unknown personality '{}'",
                other
            ))),
        }
    }
}

/// Order book moves by personality preference, best first. Ties keep
/// their incoming order.
pub fn rank_book_moves(moves: &[BookMove], personality: Personality) -> Vec<BookMove> {
    let mut scored: Vec<(f64, BookMove)> = moves
        .iter()
        .map(|m| (personality.book_score(m), m.clone()))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, m)| m).collect()
}
