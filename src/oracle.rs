use crate::errors::Result;
use crate::rules::Position;
use crate::search::{SearchConfig, SearchEngine, MATE_SCORE};
use crate::utils::cache::{CacheStats, FenKeyedCache};
use async_trait::async_trait;
use chess::ChessMove;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How close a played move came to the oracle's best line.
///
/// Classification uses centipawn loss alone; thresholds are deliberately
/// coarse so tiers stay stable across evaluator revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl QualityTier {
    pub fn classify(cp_loss: i32) -> QualityTier {
        if cp_loss > 300 {
            QualityTier::Blunder
        } else if cp_loss > 100 {
            QualityTier::Mistake
        } else if cp_loss > 50 {
            QualityTier::Inaccuracy
        } else if cp_loss < 10 {
            QualityTier::Excellent
        } else {
            QualityTier::Good
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Inaccuracy => "inaccuracy",
            QualityTier::Mistake => "mistake",
            QualityTier::Blunder => "blunder",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QualityTier::Mistake | QualityTier::Blunder)
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation from the mover's point of view: centipawns, or a forced
/// mate in N moves (negative N when the mover is getting mated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

impl Score {
    /// Decode the search engine's internal scale, where mate in N plies
    /// scores `MATE_SCORE - N`.
    pub fn from_internal(value: i32) -> Score {
        if value >= MATE_SCORE - 1000 {
            let plies = MATE_SCORE - value;
            Score::Mate((plies + 1) / 2)
        } else if value <= -(MATE_SCORE - 1000) {
            let plies = MATE_SCORE + value;
            Score::Mate(-((plies + 1) / 2))
        } else {
            Score::Cp(value)
        }
    }

    /// Back to the internal centipawn scale for comparisons.
    pub fn as_internal(&self) -> i32 {
        match self {
            Score::Cp(v) => *v,
            Score::Mate(n) if *n > 0 => MATE_SCORE - (2 * n - 1),
            Score::Mate(n) => -(MATE_SCORE - 2 * n.abs()),
        }
    }

    pub fn is_mate(&self) -> bool {
        matches!(self, Score::Mate(_))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(v) => write!(f, "{:+}cp", v),
            Score::Mate(n) => write!(f, "#{}", n),
        }
    }
}

/// One oracle suggestion: the move, its score, and a short continuation.
#[derive(Debug, Clone)]
pub struct RankedMove {
    pub mv: ChessMove,
    pub score: Score,
    pub pv: Vec<ChessMove>,
}

/// Post-hoc verdict on a played move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveAssessment {
    /// Best available score before the move, mover's view.
    pub best_score: i32,
    /// Score actually achieved by the played move, mover's view.
    pub played_score: i32,
    /// Non-negative centipawn loss versus the best line.
    pub cp_loss: i32,
    pub quality: QualityTier,
    pub is_best: bool,
}

/// Source of evaluations and ranked candidate moves.
///
/// Everything is mover-POV: a positive score always favors the side to
/// move in the position handed in.
#[async_trait]
pub trait MoveOracle: Send + Sync {
    /// Evaluate the position in internal centipawns, mover's view.
    async fn evaluate(&self, position: &Position) -> Result<i32>;

    /// The best `limit` moves, strongest first.
    async fn top_moves(&self, position: &Position, limit: usize) -> Result<Vec<RankedMove>>;

    async fn best_move(&self, position: &Position) -> Result<Option<ChessMove>> {
        Ok(self.top_moves(position, 1).await?.first().map(|r| r.mv))
    }

    /// Judge a move by comparing what it achieved against the best line.
    /// The played score is the negated reply-side evaluation, so both
    /// numbers share the mover's point of view.
    async fn assess(&self, position: &Position, mv: ChessMove) -> Result<MoveAssessment> {
        let best_score = self.evaluate(position).await?;
        let after = position.apply(mv)?;
        let reply_score = self.evaluate(&after).await?;
        let played_score = -reply_score;
        let best_move = self.best_move(position).await?;

        let cp_loss = (best_score - played_score).max(0);
        Ok(MoveAssessment {
            best_score,
            played_score,
            cp_loss,
            quality: QualityTier::classify(cp_loss),
            is_best: best_move == Some(mv),
        })
    }
}

/// Oracle backed by the built-in alpha-beta searcher, with a FEN-keyed
/// evaluation cache in front of it.
pub struct SearchOracle {
    engine: tokio::sync::Mutex<SearchEngine>,
    eval_cache: FenKeyedCache<i32>,
    pv_plies: usize,
}

impl SearchOracle {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            engine: tokio::sync::Mutex::new(SearchEngine::new(config)),
            eval_cache: FenKeyedCache::new(4096, Duration::from_secs(600)),
            pv_plies: 5,
        }
    }

    /// Limit the continuation length attached to each ranked move.
    pub fn with_pv_plies(mut self, plies: usize) -> Self {
        self.pv_plies = plies;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.eval_cache.stats()
    }
}

impl Default for SearchOracle {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

#[async_trait]
impl MoveOracle for SearchOracle {
    async fn evaluate(&self, position: &Position) -> Result<i32> {
        let fen = position.to_fen();
        if let Some(score) = self.eval_cache.get(&fen) {
            return Ok(score);
        }

        let mut engine = self.engine.lock().await;
        let outcome = engine.search(position);
        drop(engine);

        self.eval_cache.store(&fen, outcome.score);
        Ok(outcome.score)
    }

    async fn top_moves(&self, position: &Position, limit: usize) -> Result<Vec<RankedMove>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut engine = self.engine.lock().await;
        let lines = engine.ranked_moves(position, limit);
        drop(engine);

        Ok(lines
            .into_iter()
            .map(|line| {
                let mut pv = line.pv;
                pv.truncate(self.pv_plies);
                RankedMove {
                    mv: line.mv,
                    score: Score::from_internal(line.score),
                    pv,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parse_uci;

    fn fast_oracle() -> SearchOracle {
        SearchOracle::new(SearchConfig {
            max_depth: 3,
            max_time_ms: 10_000,
            ..SearchConfig::default()
        })
    }

    #[test]
    fn test_quality_tier_boundaries() {
        assert_eq!(QualityTier::classify(301), QualityTier::Blunder);
        assert_eq!(QualityTier::classify(300), QualityTier::Mistake);
        assert_eq!(QualityTier::classify(101), QualityTier::Mistake);
        assert_eq!(QualityTier::classify(100), QualityTier::Inaccuracy);
        assert_eq!(QualityTier::classify(51), QualityTier::Inaccuracy);
        assert_eq!(QualityTier::classify(50), QualityTier::Good);
        assert_eq!(QualityTier::classify(10), QualityTier::Good);
        assert_eq!(QualityTier::classify(9), QualityTier::Excellent);
        assert_eq!(QualityTier::classify(0), QualityTier::Excellent);
    }

    #[test]
    fn test_score_conversion() {
        assert_eq!(Score::from_internal(35), Score::Cp(35));
        assert_eq!(Score::from_internal(-250), Score::Cp(-250));
        assert_eq!(Score::from_internal(MATE_SCORE - 1), Score::Mate(1));
        assert_eq!(Score::from_internal(MATE_SCORE - 3), Score::Mate(2));
        assert_eq!(Score::from_internal(-(MATE_SCORE - 2)), Score::Mate(-1));

        assert_eq!(Score::Mate(1).as_internal(), MATE_SCORE - 1);
        assert_eq!(Score::Cp(35).as_internal(), 35);
        assert!(Score::Mate(1).as_internal() > Score::Mate(3).as_internal());
    }

    #[tokio::test]
    async fn test_top_moves_sorted_and_limited() {
        let oracle = fast_oracle();
        let position = Position::initial();

        let moves = oracle.top_moves(&position, 4).await.unwrap();
        assert_eq!(moves.len(), 4);
        for pair in moves.windows(2) {
            assert!(pair[0].score.as_internal() >= pair[1].score.as_internal());
        }
        for ranked in &moves {
            assert!(ranked.pv.len() <= 5);
            assert_eq!(ranked.pv.first(), Some(&ranked.mv));
        }
    }

    #[tokio::test]
    async fn test_assess_best_and_blunder() {
        let oracle = fast_oracle();
        let position = Position::from_fen("k7/8/3q4/8/8/8/3R4/K7 w - - 0 1").unwrap();

        // Taking the hanging queen is the engine's own best move
        let take = oracle
            .assess(&position, parse_uci("d2d6").unwrap())
            .await
            .unwrap();
        assert!(take.is_best);
        assert!(take.cp_loss < 100);

        // Leaving the rook to be captured is a blunder
        let shuffle = oracle
            .assess(&position, parse_uci("a1b1").unwrap())
            .await
            .unwrap();
        assert_eq!(shuffle.quality, QualityTier::Blunder);
        assert!(shuffle.cp_loss > 300);
    }

    #[tokio::test]
    async fn test_assess_rejects_illegal_move() {
        let oracle = fast_oracle();
        let position = Position::initial();
        let result = oracle.assess(&position, parse_uci("e2e5").unwrap()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_evaluation_cache_hits() {
        let oracle = fast_oracle();
        let position = Position::initial();

        oracle.evaluate(&position).await.unwrap();
        oracle.evaluate(&position).await.unwrap();

        let stats = oracle.cache_stats();
        assert!(stats.hits >= 1);
    }

    #[tokio::test]
    async fn test_mate_score_reported() {
        let oracle = fast_oracle();
        let position = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();

        let moves = oracle.top_moves(&position, 1).await.unwrap();
        assert_eq!(moves[0].mv, parse_uci("a1a8").unwrap());
        assert_eq!(moves[0].score, Score::Mate(1));
    }
}
