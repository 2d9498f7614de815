use crate::commentary::{CommentaryContext, TriggerDetector};
use crate::coordinator::{AgentProfile, MoveCoordinator, SelectionOutcome};
use crate::errors::{ArenaError, Result};
use crate::events::{EventSink, GameEvent};
use crate::game::{Game, GameSummary, MoveRecord, PlayerSide};
use crate::opening_book::BookSource;
use crate::oracle::{MoveAssessment, MoveOracle, RankedMove};
use crate::policy::MovePolicy;
use crate::resolver::{CandidateInfo, CandidateResolver, CandidateSet, ResolverConfig};
use crate::rules::parse_uci;
use crate::session::{GameSession, SessionStore, SharedSession};
use crate::stats::{AgentStats, GameOutcome, StatsRegistry};
use crate::tablebase::TablebaseSource;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Arena-wide knobs. Per-agent behavior lives on `AgentProfile`.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Hard ply ceiling; reaching it adjudicates a draw.
    pub max_plies: u32,
    /// Forfeit a side once it has played this many fallback moves in a
    /// row. Off by default.
    pub forfeit_after_fallbacks: Option<u32>,
    /// Centipawn-loss threshold feeding the commentary detector.
    pub commentary_threshold: i32,
    pub resolver: ResolverConfig,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            max_plies: 512,
            forfeit_after_fallbacks: None,
            commentary_threshold: 50,
            resolver: ResolverConfig::default(),
        }
    }
}

impl ArenaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_plies == 0 {
            return Err(ArenaError::Configuration(
                "max_plies must be at least 1".to_string(),
            ));
        }
        if self.forfeit_after_fallbacks == Some(0) {
            return Err(ArenaError::Configuration(
                "forfeit_after_fallbacks must be at least 1 when set".to_string(),
            ));
        }
        if self.resolver.oracle_top_k == 0 {
            return Err(ArenaError::Configuration(
                "oracle_top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Drives games from creation to a final result: candidate resolution,
/// the per-ply decision loop, move assessment, commentary, events, and
/// cross-game agent statistics.
pub struct Orchestrator {
    config: ArenaConfig,
    resolver: CandidateResolver,
    oracle: Option<Arc<dyn MoveOracle>>,
    detector: TriggerDetector,
    store: SessionStore,
    stats: Mutex<StatsRegistry>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Orchestrator {
    pub fn new(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        let resolver = CandidateResolver::new(config.resolver.clone());
        let detector = TriggerDetector::new(config.commentary_threshold);
        Ok(Self {
            config,
            resolver,
            oracle: None,
            detector,
            store: SessionStore::new(),
            stats: Mutex::new(StatsRegistry::new()),
            sinks: Vec::new(),
        })
    }

    pub fn with_tablebase(mut self, source: Arc<dyn TablebaseSource>) -> Self {
        self.resolver = self.resolver.with_tablebase(source);
        self
    }

    pub fn with_book(mut self, source: Arc<dyn BookSource>) -> Self {
        self.resolver = self.resolver.with_book(source);
        self
    }

    /// Installs the oracle both as a resolution tier and as the move
    /// assessor behind quality tags and commentary.
    pub fn with_oracle(mut self, oracle: Arc<dyn MoveOracle>) -> Self {
        self.oracle = Some(Arc::clone(&oracle));
        self.resolver = self.resolver.with_oracle(oracle);
        self
    }

    /// Adds a sink that receives every event as it is emitted, on top of
    /// the per-game log.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn create_game(
        &self,
        game_id: &str,
        white: AgentProfile,
        black: AgentProfile,
    ) -> Result<SharedSession> {
        white.validate()?;
        black.validate()?;
        info!(game_id, white = %white.name, black = %black.name, "creating game");
        let session = self.store.create(game_id, white, black)?;
        self.deliver_started(&session);
        Ok(session)
    }

    pub fn create_game_from_fen(
        &self,
        game_id: &str,
        white: AgentProfile,
        black: AgentProfile,
        fen: &str,
    ) -> Result<SharedSession> {
        white.validate()?;
        black.validate()?;
        info!(game_id, white = %white.name, black = %black.name, fen, "creating game");
        let session = self.store.create_from_fen(game_id, white, black, fen)?;
        self.deliver_started(&session);
        Ok(session)
    }

    // The session was just created and has no other holders, so the lock
    // is uncontended.
    fn deliver_started(&self, session: &SharedSession) {
        if self.sinks.is_empty() {
            return;
        }
        if let Ok(guard) = session.try_lock() {
            if let Some(event) = guard.events().events().first() {
                for sink in &self.sinks {
                    sink.deliver(event);
                }
            }
        }
    }

    fn emit(&self, session: &mut GameSession, event: GameEvent) {
        for sink in &self.sinks {
            sink.deliver(&event);
        }
        session.events_mut().record(event);
    }

    /// Plays one ply. Returns `None` without touching the game when it
    /// is already over or the ply limit adjudicates it first.
    pub async fn advance(
        &self,
        session: &SharedSession,
        white_policy: &dyn MovePolicy,
        black_policy: &dyn MovePolicy,
    ) -> Result<Option<MoveRecord>> {
        let mut guard = session.lock().await;
        if guard.game().is_finished() {
            return Ok(None);
        }
        if guard.game().plies_played() >= self.config.max_plies {
            warn!(
                game_id = %guard.game().game_id(),
                max_plies = self.config.max_plies,
                "ply limit reached, adjudicating draw"
            );
            guard.game_mut().adjudicate_move_limit()?;
            self.complete(&mut guard);
            return Ok(None);
        }

        if guard.game().plies_played() == 0 && guard.events().commentary().next().is_none() {
            let remark = self
                .detector
                .opening_remark(guard.game().white(), guard.game().black());
            let game_id = guard.game().game_id().to_string();
            self.emit(
                &mut guard,
                GameEvent::Commentary {
                    game_id,
                    ply: 0,
                    commentary: remark,
                },
            );
        }

        let position = *guard.game().position();
        let side = PlayerSide::from(position.side_to_move());
        let plies = guard.game().plies_played();
        let movetext = guard.game().pgn_movetext();
        let profile = guard.profile_for(side).clone();
        let policy = match side {
            PlayerSide::White => white_policy,
            PlayerSide::Black => black_policy,
        };

        let candidates = self
            .resolver
            .resolve(&position, plies, profile.personality, guard.resolution_cache())
            .await;
        let best_alternative = candidates.as_ref().and_then(top_oracle_line);

        let coordinator = MoveCoordinator::new(profile.clone());
        let outcome = coordinator
            .select_move(policy, &position, plies, movetext, candidates)
            .await?;

        let assessment = match &self.oracle {
            Some(oracle) => match oracle.assess(&position, outcome.mv).await {
                Ok(assessment) => Some(assessment),
                Err(err) => {
                    warn!(game_id = %guard.game().game_id(), error = %err, "move assessment failed");
                    None
                }
            },
            None => None,
        };

        let mut meta = outcome.to_meta();
        if let Some(assessment) = &assessment {
            meta.quality = Some(assessment.quality);
            meta.cp_loss = Some(assessment.cp_loss);
        }
        let was_in_check = position.in_check();
        let move_number = position.fullmove_number();

        let record = guard.game_mut().play(outcome.mv, meta)?.clone();

        if let Err(err) = guard.game().verify_replay() {
            error!(game_id = %guard.game().game_id(), error = %err, "halting corrupted game");
            guard.game_mut().halt_corrupted()?;
            self.complete(&mut guard);
            return Err(err);
        }

        let game_id = guard.game().game_id().to_string();
        self.emit(
            &mut guard,
            GameEvent::MoveExecuted {
                game_id: game_id.clone(),
                record: record.clone(),
            },
        );

        let context = CommentaryContext {
            side,
            san: record.san.clone(),
            move_number,
            quality: record.quality,
            cp_loss: record.cp_loss,
            eval_before: assessment.as_ref().map(|a| a.best_score),
            eval_after: assessment.as_ref().map(|a| -a.played_score),
            is_best: assessment.as_ref().map_or(false, |a| a.is_best),
            is_checkmate: record.is_checkmate,
            was_in_check,
        };
        let after = *guard.game().position();
        let scene = self
            .detector
            .build_scene(&context, &after, record.ply, best_alternative);
        if let Some(commentary) = scene.commentary {
            debug!(
                game_id = %game_id,
                trigger = %commentary.trigger,
                priority = commentary.priority,
                phase = %scene.phase,
                themes = %scene.themes.describe(side),
                "commentary triggered"
            );
            self.emit(
                &mut guard,
                GameEvent::Commentary {
                    game_id: game_id.clone(),
                    ply: record.ply,
                    commentary,
                },
            );
        }

        self.record_ply_stats(&profile.name, &outcome, &assessment);

        if !guard.game().is_finished() {
            if let Some(limit) = self.config.forfeit_after_fallbacks {
                let streak = consecutive_fallbacks(guard.game(), side);
                if streak >= limit {
                    warn!(
                        game_id = %game_id,
                        agent = %profile.name,
                        streak,
                        "fallback streak reached, forfeiting"
                    );
                    guard.game_mut().forfeit(side)?;
                }
            }
        }

        if guard.game().is_finished() {
            self.complete(&mut guard);
        }

        Ok(Some(record))
    }

    /// Runs a game to its end and returns the summary.
    pub async fn run_game(
        &self,
        session: &SharedSession,
        white_policy: &dyn MovePolicy,
        black_policy: &dyn MovePolicy,
    ) -> Result<GameSummary> {
        while self
            .advance(session, white_policy, black_policy)
            .await?
            .is_some()
        {}
        let guard = session.lock().await;
        Ok(guard.game().summary())
    }

    pub fn agent_stats(&self, name: &str) -> Option<AgentStats> {
        self.stats
            .lock()
            .ok()
            .and_then(|registry| registry.get(name).cloned())
    }

    pub fn stats_snapshot(&self) -> StatsRegistry {
        self.stats
            .lock()
            .map(|registry| registry.clone())
            .unwrap_or_default()
    }

    fn record_ply_stats(
        &self,
        agent: &str,
        outcome: &SelectionOutcome,
        assessment: &Option<MoveAssessment>,
    ) {
        if let Ok(mut registry) = self.stats.lock() {
            let stats = registry.entry(agent);
            if let Some(assessment) = assessment {
                stats.record_move_evaluation(assessment.cp_loss, assessment.is_best);
            }
            let rejections = if outcome.timed_out {
                outcome.retries.saturating_sub(1)
            } else {
                outcome.retries
            };
            for _ in 0..rejections {
                stats.record_illegal_move();
            }
            if outcome.timed_out {
                stats.record_timeout();
            }
            if outcome.used_fallback {
                stats.record_fallback();
            }
        }
    }

    /// Post-game housekeeping: drop the resolution cache, fold the game
    /// into both agents' records, and emit the final event.
    fn complete(&self, session: &mut GameSession) {
        session.clear_resolution_cache();
        let summary = session.game().summary();
        if let Some(result) = session.game().result() {
            if let Ok(mut registry) = self.stats.lock() {
                for side in [PlayerSide::White, PlayerSide::Black] {
                    let name = session.profile_for(side).name.clone();
                    let moves = session
                        .game()
                        .history()
                        .iter()
                        .filter(|r| r.side == side)
                        .count() as u32;
                    let thinking: u64 = session
                        .game()
                        .history()
                        .iter()
                        .filter(|r| r.side == side)
                        .map(|r| r.thinking_time_ms)
                        .sum();
                    registry.entry(&name).update_after_game(
                        GameOutcome::for_side(side, result),
                        moves,
                        thinking,
                    );
                }
            }
        }
        info!(
            game_id = %summary.game_id,
            result = %summary.result,
            plies = summary.total_plies,
            "game complete"
        );
        self.emit(
            session,
            GameEvent::GameCompleted {
                game_id: summary.game_id.clone(),
                summary,
            },
        );
    }
}

fn consecutive_fallbacks(game: &Game, side: PlayerSide) -> u32 {
    game.history()
        .iter()
        .rev()
        .filter(|record| record.side == side)
        .take_while(|record| record.used_fallback)
        .count() as u32
}

/// Recovers the oracle's top line from a resolved menu, when the menu
/// came from the oracle tier.
fn top_oracle_line(candidates: &CandidateSet) -> Option<RankedMove> {
    let first = candidates.moves.first()?;
    match &first.info {
        CandidateInfo::Oracle { score, pv } => {
            let mv = first.parsed().ok()?;
            let pv = pv.iter().filter_map(|uci| parse_uci(uci).ok()).collect();
            Some(RankedMove {
                mv,
                score: *score,
                pv,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commentary::CommentaryTrigger;
    use crate::game::EndReason;
    use crate::oracle::SearchOracle;
    use crate::policy::{DecisionRequest, ScriptedPolicy};
    use crate::search::SearchConfig;
    use async_trait::async_trait;

    struct StaticPolicy(&'static str);

    #[async_trait]
    impl MovePolicy for StaticPolicy {
        async fn decide(&self, _request: &DecisionRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct CollectingSink(std::sync::Mutex<Vec<String>>);

    impl EventSink for CollectingSink {
        fn deliver(&self, event: &GameEvent) {
            if let Ok(mut kinds) = self.0.lock() {
                kinds.push(event.kind().to_string());
            }
        }
    }

    fn arena() -> Orchestrator {
        Orchestrator::new(ArenaConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_game_to_checkmate() {
        let orchestrator = arena();
        let session = orchestrator
            .create_game("g1", AgentProfile::new("alpha"), AgentProfile::new("beta"))
            .unwrap();
        let white = ScriptedPolicy::new(["f2f3", "g2g4"]);
        let black = ScriptedPolicy::new(["e7e5", "d8h4"]);

        let summary = orchestrator.run_game(&session, &white, &black).await.unwrap();
        assert_eq!(summary.result, "0-1");
        assert_eq!(summary.end_reason, Some(EndReason::Checkmate));
        assert_eq!(summary.total_plies, 4);

        let guard = session.lock().await;
        let kinds: Vec<&str> = guard.events().events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.first(), Some(&"game_started"));
        assert_eq!(kinds.last(), Some(&"game_completed"));
        assert_eq!(kinds.iter().filter(|k| **k == "move_executed").count(), 4);
        assert!(guard
            .events()
            .commentary()
            .any(|c| c.trigger == CommentaryTrigger::Checkmate));

        let winner = orchestrator.agent_stats("beta").unwrap();
        assert_eq!(winner.games_won, 1);
        assert_eq!(winner.total_moves, 2);
        assert!((winner.win_rate - 100.0).abs() < 1e-9);
        let loser = orchestrator.agent_stats("alpha").unwrap();
        assert_eq!(loser.games_lost, 1);
    }

    #[tokio::test]
    async fn test_ply_limit_adjudicates_draw() {
        let config = ArenaConfig {
            max_plies: 4,
            ..ArenaConfig::default()
        };
        let orchestrator = Orchestrator::new(config).unwrap();
        let session = orchestrator
            .create_game("g1", AgentProfile::new("alpha"), AgentProfile::new("beta"))
            .unwrap();
        let white = ScriptedPolicy::new(["e2e4", "g1f3"]);
        let black = ScriptedPolicy::new(["e7e5", "b8c6"]);

        let summary = orchestrator.run_game(&session, &white, &black).await.unwrap();
        assert_eq!(summary.result, "1/2-1/2");
        assert_eq!(summary.end_reason, Some(EndReason::MoveLimit));
        assert_eq!(summary.total_plies, 4);
        assert_eq!(orchestrator.agent_stats("alpha").unwrap().games_drawn, 1);
    }

    #[tokio::test]
    async fn test_event_sink_sees_the_whole_game() {
        let sink = Arc::new(CollectingSink::default());
        let orchestrator = arena().with_event_sink(sink.clone() as Arc<dyn EventSink>);
        let session = orchestrator
            .create_game("g1", AgentProfile::new("alpha"), AgentProfile::new("beta"))
            .unwrap();
        let white = ScriptedPolicy::new(["f2f3", "g2g4"]);
        let black = ScriptedPolicy::new(["e7e5", "d8h4"]);
        orchestrator.run_game(&session, &white, &black).await.unwrap();

        let kinds = sink.0.lock().unwrap().clone();
        assert_eq!(kinds.first().map(String::as_str), Some("game_started"));
        assert_eq!(kinds.last().map(String::as_str), Some("game_completed"));
        assert_eq!(kinds.iter().filter(|k| *k == "move_executed").count(), 4);

        let logged = session.lock().await.events().len();
        assert_eq!(kinds.len(), logged);
    }

    #[tokio::test]
    async fn test_advance_after_finish_is_noop() {
        let orchestrator = arena();
        let session = orchestrator
            .create_game("g1", AgentProfile::new("alpha"), AgentProfile::new("beta"))
            .unwrap();
        let white = ScriptedPolicy::new(["f2f3", "g2g4"]);
        let black = ScriptedPolicy::new(["e7e5", "d8h4"]);
        orchestrator.run_game(&session, &white, &black).await.unwrap();

        let events_before = session.lock().await.events().len();
        let advanced = orchestrator.advance(&session, &white, &black).await.unwrap();
        assert!(advanced.is_none());
        assert_eq!(session.lock().await.events().len(), events_before);
    }

    #[tokio::test]
    async fn test_fallback_streak_forfeits() {
        let config = ArenaConfig {
            forfeit_after_fallbacks: Some(2),
            ..ArenaConfig::default()
        };
        let orchestrator = Orchestrator::new(config).unwrap();
        let white_profile = AgentProfile::new("alpha").with_max_retries(1);
        let session = orchestrator
            .create_game("g1", white_profile, AgentProfile::new("beta"))
            .unwrap();
        let white = StaticPolicy("pass");
        let black = ScriptedPolicy::new(["e7e5", "d7d5", "c7c5"]);

        let summary = orchestrator.run_game(&session, &white, &black).await.unwrap();
        assert_eq!(summary.result, "0-1");
        assert_eq!(summary.end_reason, Some(EndReason::IllegalMoveForfeit));

        let stats = orchestrator.agent_stats("alpha").unwrap();
        assert_eq!(stats.games_lost, 1);
        assert_eq!(stats.illegal_moves, 2);
        assert_eq!(stats.fallback_moves, 2);
    }

    #[tokio::test]
    async fn test_oracle_assessment_tags_moves() {
        let orchestrator =
            arena().with_oracle(Arc::new(SearchOracle::new(SearchConfig::fast())));
        let session = orchestrator
            .create_game("g1", AgentProfile::new("alpha"), AgentProfile::new("beta"))
            .unwrap();
        let white = ScriptedPolicy::new(["e2e4"]);
        let black = ScriptedPolicy::new([] as [&str; 0]);

        let record = orchestrator
            .advance(&session, &white, &black)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.uci, "e2e4");
        assert!(record.quality.is_some());
        assert!(record.cp_loss.is_some());
        assert_eq!(orchestrator.agent_stats("alpha").unwrap().evaluated_moves(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(Orchestrator::new(ArenaConfig {
            max_plies: 0,
            ..ArenaConfig::default()
        })
        .is_err());
        assert!(Orchestrator::new(ArenaConfig {
            forfeit_after_fallbacks: Some(0),
            ..ArenaConfig::default()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_invalid_profile_rejected_at_creation() {
        let orchestrator = arena();
        let err = orchestrator
            .create_game("g1", AgentProfile::new(""), AgentProfile::new("beta"))
            .unwrap_err();
        assert!(matches!(err, ArenaError::Configuration(_)));
        assert!(orchestrator.store().is_empty());
    }
}
