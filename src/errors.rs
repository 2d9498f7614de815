use std::fmt;

/// Error types for game orchestration and move selection.
///
/// Recoverable variants (`IllegalMove`, `InvalidMoveText`, `SourceUnavailable`,
/// `Timeout`) are absorbed by the selection pipeline and converted into retries
/// or fallbacks. `StateCorruption` halts the affected game only; `Configuration`
/// fails fast before any game starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ArenaError {
    /// FEN string could not be parsed into a valid position
    InvalidPosition(String),
    /// A proposed move is not legal in the position it was played against
    IllegalMove { attempted: String, position: String },
    /// Move text (UCI token) could not be parsed at all
    InvalidMoveText(String),
    /// An external move source (tablebase, book, oracle, policy) errored
    SourceUnavailable { source: String, reason: String },
    /// An external call overran its time budget
    Timeout { operation: String, duration_ms: u64 },
    /// Replaying a game's history no longer reproduces its current position
    StateCorruption { game_id: String, detail: String },
    /// A move was submitted to a game that already reached a terminal status
    GameFinished(String),
    /// Malformed agent profile or orchestrator settings
    Configuration(String),
    /// File I/O failed (book files, tablebase directories)
    Io(String),
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::InvalidPosition(msg) => write!(f, "Invalid position: {}", msg),
            ArenaError::IllegalMove { attempted, position } => {
                write!(f, "Illegal move '{}' in position {}", attempted, position)
            }
            ArenaError::InvalidMoveText(msg) => write!(f, "Unparseable move text: {}", msg),
            ArenaError::SourceUnavailable { source, reason } => {
                write!(f, "Move source '{}' unavailable: {}", source, reason)
            }
            ArenaError::Timeout { operation, duration_ms } => {
                write!(f, "Operation '{}' timed out after {}ms", operation, duration_ms)
            }
            ArenaError::StateCorruption { game_id, detail } => {
                write!(f, "State corruption in game '{}': {}", game_id, detail)
            }
            ArenaError::GameFinished(msg) => write!(f, "Game already finished: {}", msg),
            ArenaError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ArenaError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ArenaError {}

// Convenience type alias
pub type Result<T> = std::result::Result<T, ArenaError>;

impl ArenaError {
    /// Whether the selection pipeline may absorb this error and keep the
    /// game moving (retry, next tier, or random fallback).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArenaError::IllegalMove { .. }
                | ArenaError::InvalidMoveText(_)
                | ArenaError::SourceUnavailable { .. }
                | ArenaError::Timeout { .. }
        )
    }
}

// Convert from common error types
impl From<std::io::Error> for ArenaError {
    fn from(error: std::io::Error) -> Self {
        ArenaError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for ArenaError {
    fn from(error: serde_json::Error) -> Self {
        ArenaError::Io(format!("JSON serialization error: {}", error))
    }
}
