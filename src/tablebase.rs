use crate::errors::{ArenaError, Result};
use crate::rules::{parse_uci, Position};
use async_trait::async_trait;
use chess::ChessMove;
use serde::{Deserialize, Serialize};
use shakmaty::{fen::Fen, CastlingMode, Chess, Position as _};
use shakmaty_syzygy::{SyzygyError, Tablebase, Wdl};
use std::path::Path;
use std::sync::Arc;

/// Win/draw/loss for the side to move, with the 50-move rule folded in:
/// cursed wins and blessed losses are draws under optimal counterplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WdlOutcome {
    Win,
    CursedWin,
    Draw,
    BlessedLoss,
    Loss,
}

impl WdlOutcome {
    fn from_wdl(wdl: Wdl) -> Self {
        match wdl {
            Wdl::Win => WdlOutcome::Win,
            Wdl::CursedWin => WdlOutcome::CursedWin,
            Wdl::Draw => WdlOutcome::Draw,
            Wdl::BlessedLoss => WdlOutcome::BlessedLoss,
            Wdl::Loss => WdlOutcome::Loss,
        }
    }

    /// Conventional signed scale: 2, 1, 0, -1, -2.
    pub fn signed(&self) -> i8 {
        match self {
            WdlOutcome::Win => 2,
            WdlOutcome::CursedWin => 1,
            WdlOutcome::Draw => 0,
            WdlOutcome::BlessedLoss => -1,
            WdlOutcome::Loss => -2,
        }
    }

    pub fn is_winning(&self) -> bool {
        matches!(self, WdlOutcome::Win | WdlOutcome::CursedWin)
    }

    pub fn is_drawing(&self) -> bool {
        *self == WdlOutcome::Draw
    }

    pub fn is_losing(&self) -> bool {
        matches!(self, WdlOutcome::Loss | WdlOutcome::BlessedLoss)
    }
}

/// Outcome of a tablebase probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Exact result with distance-to-zeroing when the DTZ table is present.
    Exact { wdl: WdlOutcome, dtz: Option<i32> },
    /// Too many pieces, no table on disk, or no tablebase configured.
    NotFound,
}

/// A move validated against the tablebase: the outcome is what the mover
/// achieves by playing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TablebaseMove {
    pub mv: ChessMove,
    pub wdl: WdlOutcome,
    pub dtz: Option<i32>,
}

/// Exact endgame knowledge. `candidate_moves` returns only moves that
/// preserve the best achievable outcome, fastest conversion first.
#[async_trait]
pub trait TablebaseSource: Send + Sync {
    async fn probe(&self, position: &Position) -> Result<ProbeResult>;
    async fn candidate_moves(&self, position: &Position) -> Result<Vec<TablebaseMove>>;
}

/// Syzygy-backed probe for positions with few enough pieces.
#[derive(Clone)]
pub struct SyzygyTablebase {
    tablebase: Option<Arc<Tablebase<Chess>>>,
    max_pieces: u32,
}

impl SyzygyTablebase {
    /// A prober with no tables; every probe reports `NotFound`.
    pub fn new() -> Self {
        Self {
            tablebase: None,
            max_pieces: 7,
        }
    }

    /// Load Syzygy files from a directory.
    pub fn with_directory<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut tb = Tablebase::<Chess>::new();
        tb.add_directory(path.as_ref())
            .map_err(|e| ArenaError::SourceUnavailable {
                source: "tablebase".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            tablebase: Some(Arc::new(tb)),
            max_pieces: 7,
        })
    }

    pub fn is_available(&self) -> bool {
        self.tablebase.is_some()
    }

    pub fn max_pieces(&self) -> u32 {
        self.max_pieces
    }

    pub fn can_probe(&self, position: &Position) -> bool {
        self.tablebase.is_some() && position.piece_count() <= self.max_pieces
    }

    fn convert(position: &Position) -> Result<Chess> {
        let fen: Fen = position
            .to_fen()
            .parse()
            .map_err(|e| ArenaError::InvalidPosition(format!("{}", e)))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| ArenaError::InvalidPosition(format!("{}", e)))
    }
}

impl Default for SyzygyTablebase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TablebaseSource for SyzygyTablebase {
    async fn probe(&self, position: &Position) -> Result<ProbeResult> {
        let tb = match &self.tablebase {
            Some(tb) => tb,
            None => return Ok(ProbeResult::NotFound),
        };
        if position.piece_count() > self.max_pieces {
            return Ok(ProbeResult::NotFound);
        }

        let pos = Self::convert(position)?;
        match tb.probe_wdl_after_zeroing(&pos) {
            Ok(wdl) => {
                let dtz = tb
                    .probe_dtz(&pos)
                    .ok()
                    .map(|d| d.ignore_rounding().0);
                Ok(ProbeResult::Exact {
                    wdl: WdlOutcome::from_wdl(wdl),
                    dtz,
                })
            }
            Err(SyzygyError::MissingTable { .. }) => Ok(ProbeResult::NotFound),
            Err(e) => Err(ArenaError::SourceUnavailable {
                source: "tablebase".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn candidate_moves(&self, position: &Position) -> Result<Vec<TablebaseMove>> {
        if !self.can_probe(position) {
            return Ok(Vec::new());
        }
        let tb = match &self.tablebase {
            Some(tb) => tb,
            None => return Ok(Vec::new()),
        };

        let pos = Self::convert(position)?;
        let mut scored = Vec::new();

        for m in pos.legal_moves() {
            let mut child = pos.clone();
            child.play_unchecked(&m);

            // Child WDL is from the opponent's view; negate for the mover
            let wdl = match tb.probe_wdl_after_zeroing(&child) {
                Ok(w) => WdlOutcome::from_wdl(-w),
                Err(SyzygyError::MissingTable { .. }) => continue,
                Err(e) => {
                    return Err(ArenaError::SourceUnavailable {
                        source: "tablebase".to_string(),
                        reason: e.to_string(),
                    })
                }
            };
            let dtz = tb
                .probe_dtz(&child)
                .ok()
                .map(|d| d.ignore_rounding().0);

            let uci = m.to_uci(CastlingMode::Standard).to_string();
            scored.push(TablebaseMove {
                mv: parse_uci(&uci)?,
                wdl,
                dtz,
            });
        }

        let best = match scored.iter().map(|t| t.wdl.signed()).max() {
            Some(best) => best,
            None => return Ok(scored),
        };
        let mut candidates: Vec<TablebaseMove> = scored
            .into_iter()
            .filter(|t| t.wdl.signed() == best)
            .collect();
        candidates.sort_by_key(|t| t.dtz.map(|d| d.abs()).unwrap_or(i32::MAX));
        Ok(candidates)
    }
}
