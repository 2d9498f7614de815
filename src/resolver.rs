use crate::opening_book::BookSource;
use crate::oracle::{MoveOracle, Score};
use crate::personality::{rank_book_moves, Personality};
use crate::rules::{parse_uci, Position};
use crate::tablebase::{ProbeResult, TablebaseSource, WdlOutcome};
use crate::utils::cache::FenKeyedCache;
use chess::ChessMove;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Book lines offered per position.
const BOOK_CANDIDATES: usize = 3;

/// Where a move (or the menu it was chosen from) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOrigin {
    Tablebase,
    Book,
    Oracle,
    /// No tier produced candidates; the policy chose freely.
    Agent,
    /// The policy failed and a uniform random legal move was substituted.
    FallbackRandom,
}

impl MoveOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveOrigin::Tablebase => "tablebase",
            MoveOrigin::Book => "book",
            MoveOrigin::Oracle => "oracle",
            MoveOrigin::Agent => "agent",
            MoveOrigin::FallbackRandom => "fallback_random",
        }
    }
}

impl fmt::Display for MoveOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier-specific evidence attached to a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CandidateInfo {
    Tablebase {
        wdl: WdlOutcome,
        dtz: Option<i32>,
    },
    Book {
        total_games: u64,
        draw_rate: f64,
    },
    Oracle {
        score: Score,
        pv: Vec<String>,
    },
}

/// One playable suggestion with display form and forcing flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMove {
    pub uci: String,
    pub san: String,
    pub is_capture: bool,
    pub gives_check: bool,
    pub info: CandidateInfo,
}

impl CandidateMove {
    pub fn parsed(&self) -> crate::errors::Result<ChessMove> {
        parse_uci(&self.uci)
    }

    pub fn is_forcing(&self) -> bool {
        self.is_capture || self.gives_check
    }
}

/// The menu handed to a decision policy for one ply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub origin: MoveOrigin,
    pub moves: Vec<CandidateMove>,
}

impl CandidateSet {
    pub fn contains(&self, uci: &str) -> bool {
        self.moves.iter().any(|m| m.uci == uci)
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn uci_moves(&self) -> Vec<String> {
        self.moves.iter().map(|m| m.uci.clone()).collect()
    }
}

/// Per-game memo of resolution outcomes, FEN-keyed. `None` records that
/// every tier already declined the position.
pub type ResolutionCache = FenKeyedCache<Option<CandidateSet>>;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Positions with more pieces never reach the tablebase.
    pub tablebase_max_pieces: u32,
    /// Book is consulted only through this many plies.
    pub book_max_plies: u32,
    /// Size of the oracle's candidate menu.
    pub oracle_top_k: usize,
    /// Budget for each tier attempt; a slow tier is skipped, not awaited.
    pub tier_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            tablebase_max_pieces: 7,
            book_max_plies: 15,
            oracle_top_k: 10,
            tier_timeout: Duration::from_secs(1),
        }
    }
}

/// Tiered candidate resolution: tablebase, then book, then oracle.
///
/// A tier that errors or exceeds its budget falls through to the next
/// one; resolution itself never fails. When every tier declines, the
/// caller runs unconstrained. The resolver is stateless; callers pass
/// their per-game cache in.
pub struct CandidateResolver {
    tablebase: Option<Arc<dyn TablebaseSource>>,
    book: Option<Arc<dyn BookSource>>,
    oracle: Option<Arc<dyn MoveOracle>>,
    config: ResolverConfig,
}

impl CandidateResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            tablebase: None,
            book: None,
            oracle: None,
            config,
        }
    }

    pub fn with_tablebase(mut self, source: Arc<dyn TablebaseSource>) -> Self {
        self.tablebase = Some(source);
        self
    }

    pub fn with_book(mut self, source: Arc<dyn BookSource>) -> Self {
        self.book = Some(source);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn MoveOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a candidate menu for the position, consulting the cache
    /// first. Both positive and negative outcomes are memoized.
    pub async fn resolve(
        &self,
        position: &Position,
        plies_played: u32,
        personality: Personality,
        cache: &ResolutionCache,
    ) -> Option<CandidateSet> {
        let fen = position.to_fen();
        if let Some(cached) = cache.get(&fen) {
            debug!(fen = %fen, "resolution cache hit");
            return cached;
        }

        let mut outcome = None;

        if let Some(tb) = &self.tablebase {
            if position.piece_count() <= self.config.tablebase_max_pieces {
                outcome = self.try_tablebase(tb, position).await;
            }
        }

        if outcome.is_none() && plies_played <= self.config.book_max_plies {
            if let Some(book) = &self.book {
                outcome = self.try_book(book, position, personality).await;
            }
        }

        if outcome.is_none() {
            if let Some(oracle) = &self.oracle {
                outcome = self.try_oracle(oracle, position, personality).await;
            }
        }

        match &outcome {
            Some(set) => debug!(
                origin = %set.origin,
                candidates = set.len(),
                phase = %position.phase(plies_played),
                "candidates resolved"
            ),
            None => debug!(fen = %fen, "no tier produced candidates"),
        }

        cache.store(&fen, outcome.clone());
        outcome
    }

    async fn try_tablebase(
        &self,
        tb: &Arc<dyn TablebaseSource>,
        position: &Position,
    ) -> Option<CandidateSet> {
        let wdl = match tokio::time::timeout(self.config.tier_timeout, tb.probe(position)).await {
            Ok(Ok(ProbeResult::Exact { wdl, .. })) => wdl,
            Ok(Ok(ProbeResult::NotFound)) => return None,
            Ok(Err(e)) => {
                warn!(error = %e, "tablebase probe failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.config.tier_timeout.as_millis() as u64, "tablebase probe timed out");
                return None;
            }
        };

        // A lost position gets no tablebase menu: later tiers offer
        // better practical resistance than "all moves lose"
        if wdl.is_losing() {
            debug!(wdl = ?wdl, "tablebase position lost, falling through");
            return None;
        }

        let moves =
            match tokio::time::timeout(self.config.tier_timeout, tb.candidate_moves(position)).await
            {
                Ok(Ok(moves)) if !moves.is_empty() => moves,
                Ok(Ok(_)) => return None,
                Ok(Err(e)) => {
                    warn!(error = %e, "tablebase move listing failed");
                    return None;
                }
                Err(_) => {
                    warn!("tablebase move listing timed out");
                    return None;
                }
            };

        let candidates: Vec<CandidateMove> = moves
            .iter()
            .filter_map(|t| {
                self.candidate(
                    position,
                    t.mv,
                    CandidateInfo::Tablebase {
                        wdl: t.wdl,
                        dtz: t.dtz,
                    },
                )
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(CandidateSet {
            origin: MoveOrigin::Tablebase,
            moves: candidates,
        })
    }

    async fn try_book(
        &self,
        book: &Arc<dyn BookSource>,
        position: &Position,
        personality: Personality,
    ) -> Option<CandidateSet> {
        let moves = match tokio::time::timeout(self.config.tier_timeout, book.lookup(position)).await
        {
            Ok(Ok(moves)) => moves,
            Ok(Err(e)) => {
                warn!(error = %e, "book lookup failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.config.tier_timeout.as_millis() as u64, "book lookup timed out");
                return None;
            }
        };
        if moves.is_empty() {
            return None;
        }

        let mut ranked = rank_book_moves(&moves, personality);
        ranked.truncate(BOOK_CANDIDATES);

        let mut candidates = Vec::new();
        for m in &ranked {
            let mv = match parse_uci(&m.uci) {
                Ok(mv) => mv,
                Err(e) => {
                    warn!(uci = %m.uci, error = %e, "unparseable book move");
                    continue;
                }
            };
            if !position.is_legal(mv) {
                warn!(uci = %m.uci, "book move illegal in this position");
                continue;
            }
            if let Some(c) = self.candidate(
                position,
                mv,
                CandidateInfo::Book {
                    total_games: m.total_games(),
                    draw_rate: m.draw_rate(),
                },
            ) {
                candidates.push(c);
            }
        }
        if candidates.is_empty() {
            return None;
        }
        Some(CandidateSet {
            origin: MoveOrigin::Book,
            moves: order_candidates(personality, candidates),
        })
    }

    async fn try_oracle(
        &self,
        oracle: &Arc<dyn MoveOracle>,
        position: &Position,
        personality: Personality,
    ) -> Option<CandidateSet> {
        let ranked = match tokio::time::timeout(
            self.config.tier_timeout,
            oracle.top_moves(position, self.config.oracle_top_k),
        )
        .await
        {
            Ok(Ok(ranked)) => ranked,
            Ok(Err(e)) => {
                warn!(error = %e, "oracle ranking failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.config.tier_timeout.as_millis() as u64, "oracle ranking timed out");
                return None;
            }
        };
        if ranked.is_empty() {
            return None;
        }

        let candidates: Vec<CandidateMove> = ranked
            .iter()
            .filter_map(|r| {
                self.candidate(
                    position,
                    r.mv,
                    CandidateInfo::Oracle {
                        score: r.score,
                        pv: r.pv.iter().map(|m| m.to_string()).collect(),
                    },
                )
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(CandidateSet {
            origin: MoveOrigin::Oracle,
            moves: order_candidates(personality, candidates),
        })
    }

    fn candidate(
        &self,
        position: &Position,
        mv: ChessMove,
        info: CandidateInfo,
    ) -> Option<CandidateMove> {
        let san = match position.san(mv) {
            Ok(san) => san,
            Err(e) => {
                warn!(uci = %mv, error = %e, "skipping unencodable candidate");
                return None;
            }
        };
        Some(CandidateMove {
            uci: mv.to_string(),
            san,
            is_capture: position.is_capture(mv),
            gives_check: position.gives_check(mv),
            info,
        })
    }
}

/// Forcing styles see captures and checks first; others keep tier order.
fn order_candidates(personality: Personality, mut moves: Vec<CandidateMove>) -> Vec<CandidateMove> {
    if personality.prefers_forcing() {
        moves.sort_by_key(|c| if c.is_forcing() { 0 } else { 1 });
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::opening_book::BookMove;
    use crate::oracle::SearchOracle;
    use crate::search::SearchConfig;
    use crate::tablebase::TablebaseMove;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_cache() -> ResolutionCache {
        FenKeyedCache::new(64, Duration::from_secs(60))
    }

    struct StubTablebase {
        probe: ProbeResult,
        moves: Vec<TablebaseMove>,
    }

    #[async_trait]
    impl TablebaseSource for StubTablebase {
        async fn probe(&self, _position: &Position) -> Result<ProbeResult> {
            Ok(self.probe)
        }
        async fn candidate_moves(&self, _position: &Position) -> Result<Vec<TablebaseMove>> {
            Ok(self.moves.clone())
        }
    }

    struct StubBook {
        moves: Vec<BookMove>,
        lookups: AtomicUsize,
    }

    impl StubBook {
        fn new(moves: Vec<BookMove>) -> Self {
            Self {
                moves,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BookSource for StubBook {
        async fn lookup(&self, _position: &Position) -> Result<Vec<BookMove>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.moves.clone())
        }
    }

    struct SlowBook;

    #[async_trait]
    impl BookSource for SlowBook {
        async fn lookup(&self, _position: &Position) -> Result<Vec<BookMove>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(vec![book_move("e2e4", "e4", 100, 100, 100)])
        }
    }

    struct FailingBook;

    #[async_trait]
    impl BookSource for FailingBook {
        async fn lookup(&self, _position: &Position) -> Result<Vec<BookMove>> {
            Err(crate::errors::ArenaError::SourceUnavailable {
                source: "book".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn book_move(uci: &str, san: &str, white: u64, draws: u64, black: u64) -> BookMove {
        BookMove {
            uci: uci.to_string(),
            san: san.to_string(),
            white_wins: white,
            draws,
            black_wins: black,
        }
    }

    fn start_book() -> Vec<BookMove> {
        vec![
            book_move("e2e4", "e4", 500, 600, 400),
            book_move("d2d4", "d4", 450, 580, 350),
            book_move("g1f3", "Nf3", 200, 260, 150),
            book_move("c2c4", "c4", 150, 200, 120),
        ]
    }

    #[tokio::test]
    async fn test_tablebase_outranks_book() {
        let endgame = Position::from_fen("8/8/8/4k3/8/4K3/8/4R3 w - - 0 1").unwrap();
        let tb_move = TablebaseMove {
            mv: parse_uci("e1e2").unwrap(),
            wdl: WdlOutcome::Win,
            dtz: Some(12),
        };
        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_tablebase(Arc::new(StubTablebase {
                probe: ProbeResult::Exact {
                    wdl: WdlOutcome::Win,
                    dtz: Some(12),
                },
                moves: vec![tb_move],
            }))
            .with_book(Arc::new(StubBook::new(vec![book_move(
                "e1d1", "Kd1", 10, 10, 10,
            )])));

        let set = resolver
            .resolve(&endgame, 4, Personality::Balanced, &test_cache())
            .await
            .unwrap();
        assert_eq!(set.origin, MoveOrigin::Tablebase);
        assert_eq!(set.moves[0].uci, "e1e2");
        assert!(matches!(
            set.moves[0].info,
            CandidateInfo::Tablebase {
                wdl: WdlOutcome::Win,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_lost_tablebase_position_falls_through() {
        let endgame = Position::from_fen("4k3/4r3/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_tablebase(Arc::new(StubTablebase {
                probe: ProbeResult::Exact {
                    wdl: WdlOutcome::Loss,
                    dtz: Some(-20),
                },
                moves: Vec::new(),
            }))
            .with_book(Arc::new(StubBook::new(vec![book_move(
                "e1d1", "Kd1", 10, 10, 10,
            )])));

        let set = resolver
            .resolve(&endgame, 4, Personality::Balanced, &test_cache())
            .await
            .unwrap();
        assert_eq!(set.origin, MoveOrigin::Book);
    }

    #[tokio::test]
    async fn test_book_cutoff_by_plies() {
        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_book(Arc::new(StubBook::new(start_book())));
        let position = Position::initial();

        let within = resolver
            .resolve(&position, 15, Personality::Balanced, &test_cache())
            .await;
        assert_eq!(within.unwrap().origin, MoveOrigin::Book);

        let beyond = resolver
            .resolve(&position, 16, Personality::Balanced, &test_cache())
            .await;
        assert!(beyond.is_none());
    }

    #[tokio::test]
    async fn test_book_truncates_to_three() {
        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_book(Arc::new(StubBook::new(start_book())));

        let set = resolver
            .resolve(&Position::initial(), 0, Personality::Balanced, &test_cache())
            .await
            .unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.moves[0].uci, "e2e4");
        assert!(!set.contains("c2c4"));
    }

    #[tokio::test]
    async fn test_slow_tier_times_out_and_falls_through() {
        let config = ResolverConfig {
            tier_timeout: Duration::from_millis(20),
            ..ResolverConfig::default()
        };
        let resolver = CandidateResolver::new(config).with_book(Arc::new(SlowBook));

        let started = std::time::Instant::now();
        let outcome = resolver
            .resolve(&Position::initial(), 0, Personality::Balanced, &test_cache())
            .await;
        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_failing_tier_falls_through_to_oracle() {
        let oracle = SearchOracle::new(SearchConfig {
            max_depth: 2,
            max_time_ms: 10_000,
            ..SearchConfig::default()
        });
        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_book(Arc::new(FailingBook))
            .with_oracle(Arc::new(oracle));

        let set = resolver
            .resolve(&Position::initial(), 0, Personality::Balanced, &test_cache())
            .await
            .unwrap();
        assert_eq!(set.origin, MoveOrigin::Oracle);
        assert!(set.len() <= 10);
        assert!(!set.is_empty());
        match &set.moves[0].info {
            CandidateInfo::Oracle { pv, .. } => assert!(!pv.is_empty()),
            other => panic!("expected oracle info, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolution_is_cached_per_position() {
        let book = Arc::new(StubBook::new(start_book()));
        let resolver =
            CandidateResolver::new(ResolverConfig::default()).with_book(book.clone());
        let cache = test_cache();
        let position = Position::initial();

        resolver
            .resolve(&position, 0, Personality::Balanced, &cache)
            .await;
        resolver
            .resolve(&position, 0, Personality::Balanced, &cache)
            .await;

        assert_eq!(book.lookups.load(Ordering::SeqCst), 1);
        assert!(cache.stats().hits >= 1);
    }

    #[tokio::test]
    async fn test_empty_resolution_is_cached() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let cache = test_cache();
        let position = Position::initial();

        assert!(resolver
            .resolve(&position, 0, Personality::Balanced, &cache)
            .await
            .is_none());
        assert!(resolver
            .resolve(&position, 0, Personality::Balanced, &cache)
            .await
            .is_none());
        assert!(cache.stats().hits >= 1);
    }

    #[tokio::test]
    async fn test_forcing_personalities_see_captures_first() {
        // After 1. e4 d5 the book offers the capture exd5 among quiet moves
        let position = Position::from_fen(
            "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2",
        )
        .unwrap();
        let moves = vec![
            book_move("e4e5", "e5", 300, 400, 250),
            book_move("e4d5", "exd5", 120, 150, 100),
            book_move("b1c3", "Nc3", 90, 110, 80),
        ];

        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_book(Arc::new(StubBook::new(moves.clone())));
        let balanced = resolver
            .resolve(&position, 2, Personality::Balanced, &test_cache())
            .await
            .unwrap();
        assert_eq!(balanced.moves[0].uci, "e4e5");

        let resolver = CandidateResolver::new(ResolverConfig::default())
            .with_book(Arc::new(StubBook::new(moves)));
        let aggressive = resolver
            .resolve(&position, 2, Personality::Aggressive, &test_cache())
            .await
            .unwrap();
        assert_eq!(aggressive.moves[0].uci, "e4d5");
        assert!(aggressive.moves[0].is_capture);
    }
}
