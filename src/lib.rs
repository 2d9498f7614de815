//! # Chess Arena Engine
//!
//! A game orchestration engine for **agent-vs-agent chess matches** with
//! hybrid move selection: tablebase, opening book, and search oracle tiers
//! narrow each position to a candidate menu before the deciding agent is
//! consulted, and every ply is validated, retried, assessed, and narrated.
//!
//! ## Features
//!
//! - **Tiered candidate resolution**: Syzygy tablebases, a weighted opening
//!   book, and an alpha-beta search oracle, each behind its own timeout
//! - **Fault-tolerant decisions**: free-form agent output is parsed for UCI
//!   moves, illegal replies are retried with feedback, and timeouts resolve
//!   to a random legal move instead of stalling the match
//! - **Move assessment**: centipawn loss and quality tiers per ply, with
//!   cross-game agent statistics
//! - **Commentary triggers**: blunders, brilliancies, tactical motifs, and
//!   endgame moments detected from evaluation swings
//! - **Strategic themes**: pawn structure, king safety, space, and piece
//!   activity read directly off the board
//! - **Session management**: LRU-bounded concurrent games with full event
//!   logs and replay verification
//!
//! ## Quick Start
//!
//! ```rust
//! use chess_arena_engine::{AgentProfile, ArenaConfig, Orchestrator, Personality};
//!
//! let orchestrator = Orchestrator::new(ArenaConfig::default()).unwrap();
//! let white = AgentProfile::new("alpha").with_personality(Personality::Aggressive);
//! let black = AgentProfile::new("beta");
//! let _session = orchestrator.create_game("demo", white, black).unwrap();
//! ```
//!
//! Games run on a tokio runtime; see [`Orchestrator::run_game`] for the
//! full loop and [`MovePolicy`] for plugging in your own agent.

// Core modules
pub mod errors;
pub mod rules;
pub mod utils;

pub mod commentary;
pub mod coordinator;
pub mod events;
pub mod game;
pub mod opening_book;
pub mod oracle;
pub mod orchestrator;
pub mod personality;
pub mod policy;
pub mod resolver;
pub mod search;
pub mod session;
pub mod stats;
pub mod tablebase;
pub mod themes;

// Re-export commonly used types
pub use commentary::{
    Commentary, CommentaryContext, CommentaryScene, CommentaryTrigger, TriggerDetector,
};
pub use coordinator::{AgentProfile, DecisionPhase, MoveCoordinator, SelectionOutcome};
pub use errors::{ArenaError, Result};
pub use events::{EventLog, EventSink, GameEvent};
pub use game::{
    EndReason, Game, GameResult, GameSummary, MoveMeta, MoveRecord, PlayerSide,
};
pub use opening_book::{BookMove, BookPage, BookSource, OpeningBook};
pub use oracle::{
    MoveAssessment, MoveOracle, QualityTier, RankedMove, Score, SearchOracle,
};
pub use orchestrator::{ArenaConfig, Orchestrator};
pub use personality::Personality;
pub use policy::{
    extract_move, DecisionRequest, FirstCandidatePolicy, GreedyOraclePolicy, MovePolicy,
    RandomPolicy, ScriptedPolicy,
};
pub use resolver::{
    CandidateInfo, CandidateMove, CandidateResolver, CandidateSet, MoveOrigin,
    ResolutionCache, ResolverConfig,
};
pub use rules::{GamePhase, Position, TerminalStatus, STARTING_FEN};
pub use search::{SearchConfig, SearchEngine};
pub use session::{GameSession, SessionStore, SharedSession, MAX_ACTIVE_SESSIONS};
pub use stats::{AgentStats, GameOutcome, StatsRegistry};
pub use tablebase::{
    ProbeResult, SyzygyTablebase, TablebaseMove, TablebaseSource, WdlOutcome,
};
pub use themes::{analyze_position, KingSafety, ThemeReport};
