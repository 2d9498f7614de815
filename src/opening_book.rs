use crate::errors::{ArenaError, Result};
use crate::rules::{parse_uci, Position};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Aggregated game statistics for one book move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMove {
    pub uci: String,
    pub san: String,
    pub white_wins: u64,
    pub draws: u64,
    pub black_wins: u64,
}

impl BookMove {
    pub fn total_games(&self) -> u64 {
        self.white_wins + self.draws + self.black_wins
    }

    pub fn draw_rate(&self) -> f64 {
        let total = self.total_games();
        if total == 0 {
            return 0.0;
        }
        self.draws as f64 / total as f64
    }
}

/// Everything the book knows about one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookPage {
    pub name: String,
    pub eco: Option<String>,
    pub moves: Vec<BookMove>,
}

/// Provider of opening theory. Returned moves are unordered; callers
/// apply their own personality-driven ranking.
#[async_trait]
pub trait BookSource: Send + Sync {
    async fn lookup(&self, position: &Position) -> Result<Vec<BookMove>>;
}

#[derive(Serialize, Deserialize)]
struct BookFileEntry {
    fen: String,
    name: String,
    #[serde(default)]
    eco: Option<String>,
    moves: Vec<BookMove>,
}

#[derive(Serialize, Deserialize)]
struct BookFile {
    positions: Vec<BookFileEntry>,
}

/// In-memory opening book keyed by position.
///
/// Keys ignore the FEN move counters, so a transposed line with a
/// different halfmove clock still finds its page.
#[derive(Clone, Default)]
pub struct OpeningBook {
    entries: HashMap<String, BookPage>,
}

impl OpeningBook {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A book seeded with common openings and plausible master-game
    /// counts, enough to drive games through known theory.
    pub fn with_standard_openings() -> Self {
        let mut book = Self::new();
        book.add_standard_openings();
        book
    }

    /// Load pages from a JSON file and merge them over the current book.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let file: BookFile = serde_json::from_str(&raw)?;
        let count = file.positions.len();
        for entry in file.positions {
            self.add_position(&entry.fen, &entry.name, entry.eco, entry.moves)?;
        }
        Ok(count)
    }

    /// Register a position. Every move must be legal there.
    pub fn add_position(
        &mut self,
        fen: &str,
        name: &str,
        eco: Option<String>,
        moves: Vec<BookMove>,
    ) -> Result<()> {
        let position = Position::from_fen(fen)?;
        for m in &moves {
            let mv = parse_uci(&m.uci)?;
            if !position.is_legal(mv) {
                return Err(ArenaError::IllegalMove {
                    attempted: m.uci.clone(),
                    position: position.to_fen(),
                });
            }
        }

        self.entries.insert(
            book_key(&position.to_fen()),
            BookPage {
                name: name.to_string(),
                eco,
                moves,
            },
        );
        Ok(())
    }

    pub fn page(&self, position: &Position) -> Option<&BookPage> {
        self.entries.get(&book_key(&position.to_fen()))
    }

    pub fn contains(&self, position: &Position) -> bool {
        self.page(position).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn seed(
        &mut self,
        fen: &str,
        name: &str,
        eco: Option<&str>,
        moves: &[(&str, &str, u64, u64, u64)],
    ) {
        let book_moves = moves
            .iter()
            .map(|(uci, san, w, d, b)| BookMove {
                uci: uci.to_string(),
                san: san.to_string(),
                white_wins: *w,
                draws: *d,
                black_wins: *b,
            })
            .collect();
        let _ = self.add_position(fen, name, eco.map(String::from), book_moves);
    }

    fn add_standard_openings(&mut self) {
        self.seed(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "Starting Position",
            None,
            &[
                ("e2e4", "e4", 125168, 143502, 96925),
                ("d2d4", "d4", 120113, 159707, 84285),
                ("g1f3", "Nf3", 43938, 60880, 31374),
                ("c2c4", "c4", 39502, 53013, 27809),
            ],
        );

        self.seed(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
            "King's Pawn Game",
            Some("B00"),
            &[
                ("c7c5", "c5", 44218, 48707, 40176),
                ("e7e5", "e5", 52329, 72832, 38166),
                ("e7e6", "e6", 18671, 23560, 14476),
                ("c7c6", "c6", 12626, 16325, 10167),
            ],
        );

        self.seed(
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2",
            "Open Game",
            Some("C20"),
            &[
                ("g1f3", "Nf3", 47289, 66914, 33624),
                ("f2f4", "f4", 2777, 2011, 2659),
                ("b1c3", "Nc3", 2003, 2653, 1532),
            ],
        );

        self.seed(
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
            "King's Knight Opening",
            Some("C40"),
            &[
                ("b8c6", "Nc6", 40109, 58129, 27310),
                ("g8f6", "Nf6", 6368, 8629, 5026),
            ],
        );

        self.seed(
            "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
            "Italian Game",
            Some("C50"),
            &[
                ("g8f6", "Nf6", 9534, 12435, 7861),
                ("f8c5", "Bc5", 8233, 10357, 6540),
            ],
        );

        self.seed(
            "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
            "Ruy Lopez",
            Some("C60"),
            &[
                ("a7a6", "a6", 19931, 28164, 13731),
                ("g8f6", "Nf6", 7489, 12459, 4444),
            ],
        );

        self.seed(
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
            "Sicilian Defense",
            Some("B27"),
            &[
                ("d7d6", "d6", 18964, 19323, 17984),
                ("b8c6", "Nc6", 12976, 13963, 11266),
                ("e7e6", "e6", 9500, 10808, 8424),
            ],
        );

        self.seed(
            "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1",
            "Queen's Pawn Game",
            Some("A40"),
            &[
                ("g8f6", "Nf6", 67392, 90300, 47089),
                ("d7d5", "d5", 40824, 55646, 27968),
                ("e7e6", "e6", 8945, 11275, 6147),
            ],
        );

        self.seed(
            "rnbqkbnr/ppp1pppp/8/3p4/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 0 2",
            "Closed Game",
            Some("D00"),
            &[
                ("c2c4", "c4", 31401, 44378, 19612),
                ("g1f3", "Nf3", 7972, 10983, 5470),
            ],
        );

        self.seed(
            "rnbqkb1r/pppppppp/5n2/8/3P4/8/PPP1PPPP/RNBQKB1R w KQkq - 1 2",
            "Indian Defense",
            Some("A45"),
            &[
                ("c2c4", "c4", 53575, 71930, 36633),
                ("g1f3", "Nf3", 12579, 16712, 8864),
            ],
        );
    }
}

#[async_trait]
impl BookSource for OpeningBook {
    async fn lookup(&self, position: &Position) -> Result<Vec<BookMove>> {
        Ok(self
            .page(position)
            .map(|p| p.moves.clone())
            .unwrap_or_default())
    }
}

/// Placement, side, castling and en-passant fields only.
fn book_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<&str>>().join(" ")
}
