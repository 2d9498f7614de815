use crate::errors::{ArenaError, Result};
use crate::game::MoveMeta;
use crate::personality::Personality;
use crate::policy::{extract_move, DecisionRequest, MovePolicy};
use crate::resolver::{CandidateSet, MoveOrigin};
use crate::rules::{parse_uci, Position};
use chess::ChessMove;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How one side of a game behaves at the decision boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    /// Shown to humans; `name` stays the stable id.
    #[serde(default)]
    pub display_name: Option<String>,
    pub personality: Personality,
    /// Wall-clock budget for a single policy call.
    pub decision_timeout: Duration,
    /// Total policy calls allowed per ply, the first included.
    pub max_retries: u32,
    /// When set, a legal move outside the candidate menu is rejected.
    pub strict_candidates: bool,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            personality: Personality::default(),
            decision_timeout: Duration::from_secs(30),
            max_retries: 3,
            strict_candidates: false,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }

    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_strict_candidates(mut self, strict: bool) -> Self {
        self.strict_candidates = strict;
        self
    }

    /// Name to show humans; falls back to the agent id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Rejects profiles that cannot drive a game.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ArenaError::Configuration(
                "agent name must not be empty".to_string(),
            ));
        }
        if self.decision_timeout.is_zero() {
            return Err(ArenaError::Configuration(format!(
                "{}: decision timeout must be positive",
                self.name
            )));
        }
        if self.max_retries == 0 {
            return Err(ArenaError::Configuration(format!(
                "{}: max retries must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::new("agent")
    }
}

/// Where the selection loop currently is, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPhase {
    AwaitingCandidates,
    AwaitingDecision,
    Validating,
    Applying,
    Retrying,
    FallingBack,
}

impl DecisionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionPhase::AwaitingCandidates => "awaiting_candidates",
            DecisionPhase::AwaitingDecision => "awaiting_decision",
            DecisionPhase::Validating => "validating",
            DecisionPhase::Applying => "applying",
            DecisionPhase::Retrying => "retrying",
            DecisionPhase::FallingBack => "falling_back",
        }
    }
}

impl fmt::Display for DecisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The settled move for one ply, with how it was obtained.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub mv: ChessMove,
    pub uci: String,
    pub origin: MoveOrigin,
    /// Policy calls that did not produce the applied move.
    pub retries: u32,
    pub used_fallback: bool,
    /// The last policy call overran its budget and was abandoned.
    pub timed_out: bool,
    pub thinking_time_ms: u64,
    pub raw_response: Option<String>,
}

impl SelectionOutcome {
    pub fn to_meta(&self) -> MoveMeta {
        MoveMeta {
            origin: self.origin,
            retries: self.retries,
            used_fallback: self.used_fallback,
            thinking_time_ms: self.thinking_time_ms,
            quality: None,
            cp_loss: None,
        }
    }
}

/// Runs the per-ply decision loop for one agent: ask the policy,
/// extract and validate, retry with feedback, and substitute a random
/// legal move when the policy times out or runs out of attempts.
pub struct MoveCoordinator {
    profile: AgentProfile,
}

impl MoveCoordinator {
    pub fn new(profile: AgentProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Settle one move. Fails only when the position has no legal
    /// moves; every policy misbehavior resolves to a fallback instead.
    pub async fn select_move(
        &self,
        policy: &dyn MovePolicy,
        position: &Position,
        plies_played: u32,
        movetext: String,
        candidates: Option<CandidateSet>,
    ) -> Result<SelectionOutcome> {
        let started = Instant::now();
        let legal: Vec<String> = position.legal_moves().iter().map(|m| m.to_string()).collect();
        if legal.is_empty() {
            return Err(ArenaError::InvalidPosition(format!(
                "no legal moves in {}",
                position.to_fen()
            )));
        }

        let base = DecisionRequest::for_position(position, plies_played, movetext)
            .with_candidates(candidates);
        let mut feedback: Option<String> = None;

        for attempt in 0..self.profile.max_retries {
            let phase = if attempt == 0 {
                DecisionPhase::AwaitingDecision
            } else {
                DecisionPhase::Retrying
            };
            debug!(
                agent = %self.profile.name,
                attempt = attempt + 1,
                phase = %phase,
                "requesting decision"
            );

            let request = match &feedback {
                Some(text) => base.clone().with_feedback(text.clone()),
                None => base.clone(),
            };
            let reply = match tokio::time::timeout(
                self.profile.decision_timeout,
                policy.decide(&request),
            )
            .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    warn!(agent = %self.profile.name, attempt = attempt + 1, error = %e, "policy call failed");
                    feedback = Some(
                        "your previous attempt failed; reply with one UCI move from the legal list"
                            .to_string(),
                    );
                    continue;
                }
                Err(_) => {
                    // A timed-out policy gets no further attempts this ply
                    warn!(
                        agent = %self.profile.name,
                        timeout_ms = self.profile.decision_timeout.as_millis() as u64,
                        "policy timed out"
                    );
                    return Ok(self.fallback(position, attempt + 1, true, started));
                }
            };

            debug!(agent = %self.profile.name, phase = %DecisionPhase::Validating, "validating reply");
            let uci = match extract_move(&reply, &legal) {
                Some(uci) => uci,
                None => {
                    warn!(
                        agent = %self.profile.name,
                        attempt = attempt + 1,
                        reply = %snippet(&reply),
                        "no legal move found in reply"
                    );
                    feedback = Some(format!(
                        "could not find a legal move in \"{}\"; reply with one UCI move such as {}",
                        snippet(&reply),
                        legal[0]
                    ));
                    continue;
                }
            };
            let mv = parse_uci(&uci)?;
            if !position.is_legal(mv) {
                feedback = Some(format!("{} is not legal in this position", uci));
                continue;
            }
            if self.profile.strict_candidates {
                if let Some(set) = &base.candidates {
                    if !set.contains(&uci) {
                        warn!(agent = %self.profile.name, uci = %uci, "legal move outside strict candidate menu");
                        feedback = Some(format!(
                            "{} is legal but not among the offered candidates ({})",
                            uci,
                            set.uci_moves().join(", ")
                        ));
                        continue;
                    }
                }
            }

            let origin = match &base.candidates {
                Some(set) if set.contains(&uci) => set.origin,
                _ => MoveOrigin::Agent,
            };
            debug!(
                agent = %self.profile.name,
                uci = %uci,
                origin = %origin,
                retries = attempt,
                phase = %DecisionPhase::Applying,
                "move settled"
            );
            return Ok(SelectionOutcome {
                mv,
                uci,
                origin,
                retries: attempt,
                used_fallback: false,
                timed_out: false,
                thinking_time_ms: started.elapsed().as_millis() as u64,
                raw_response: Some(reply),
            });
        }

        warn!(
            agent = %self.profile.name,
            max_retries = self.profile.max_retries,
            "all attempts exhausted"
        );
        Ok(self.fallback(position, self.profile.max_retries, false, started))
    }

    fn fallback(
        &self,
        position: &Position,
        failed_calls: u32,
        timed_out: bool,
        started: Instant,
    ) -> SelectionOutcome {
        let legal = position.legal_moves();
        let index = rand::thread_rng().gen_range(0..legal.len());
        let mv = legal[index];
        debug!(
            agent = %self.profile.name,
            uci = %mv,
            phase = %DecisionPhase::FallingBack,
            "substituting random legal move"
        );
        SelectionOutcome {
            mv,
            uci: mv.to_string(),
            origin: MoveOrigin::FallbackRandom,
            retries: failed_calls,
            used_fallback: true,
            timed_out,
            thinking_time_ms: started.elapsed().as_millis() as u64,
            raw_response: None,
        }
    }
}

fn snippet(reply: &str) -> String {
    let trimmed = reply.trim();
    if trimmed.chars().count() <= 80 {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(80).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ScriptedPolicy;
    use crate::resolver::{CandidateInfo, CandidateMove};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingPolicy {
        inner: ScriptedPolicy,
        requests: Mutex<Vec<DecisionRequest>>,
    }

    impl RecordingPolicy {
        fn new(responses: &[&str]) -> Self {
            Self {
                inner: ScriptedPolicy::new(responses.iter().copied()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request(&self, index: usize) -> DecisionRequest {
            self.requests.lock().unwrap()[index].clone()
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MovePolicy for RecordingPolicy {
        async fn decide(&self, request: &DecisionRequest) -> crate::errors::Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.inner.decide(request).await
        }
    }

    struct SlowPolicy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MovePolicy for SlowPolicy {
        async fn decide(&self, _request: &DecisionRequest) -> crate::errors::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("e2e4".to_string())
        }
    }

    struct FailingPolicy;

    #[async_trait]
    impl MovePolicy for FailingPolicy {
        async fn decide(&self, _request: &DecisionRequest) -> crate::errors::Result<String> {
            Err(ArenaError::SourceUnavailable {
                source: "backend".to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }

    fn book_menu(uci: &str, san: &str) -> CandidateSet {
        CandidateSet {
            origin: MoveOrigin::Book,
            moves: vec![CandidateMove {
                uci: uci.to_string(),
                san: san.to_string(),
                is_capture: false,
                gives_check: false,
                info: CandidateInfo::Book {
                    total_games: 50,
                    draw_rate: 0.4,
                },
            }],
        }
    }

    #[tokio::test]
    async fn test_clean_reply_is_accepted_first_try() {
        let coordinator = MoveCoordinator::new(AgentProfile::new("white"));
        let policy = ScriptedPolicy::new(["I'll take the center: e2e4"]);
        let outcome = coordinator
            .select_move(&policy, &Position::initial(), 0, String::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome.uci, "e2e4");
        assert_eq!(outcome.retries, 0);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.origin, MoveOrigin::Agent);
    }

    #[tokio::test]
    async fn test_garbage_reply_retries_with_feedback() {
        let coordinator = MoveCoordinator::new(AgentProfile::new("white"));
        let policy = RecordingPolicy::new(&["the weather is lovely", "d2d4"]);
        let outcome = coordinator
            .select_move(&policy, &Position::initial(), 0, String::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome.uci, "d2d4");
        assert_eq!(outcome.retries, 1);
        assert_eq!(policy.calls(), 2);
        assert!(policy.request(0).feedback.is_none());
        assert!(policy.request(1).feedback.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_random() {
        let coordinator = MoveCoordinator::new(AgentProfile::new("white"));
        let policy = RecordingPolicy::new(&["nope", "still nope", "pass"]);
        let position = Position::initial();
        let outcome = coordinator
            .select_move(&policy, &position, 0, String::new(), None)
            .await
            .unwrap();
        assert!(outcome.used_fallback);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.origin, MoveOrigin::FallbackRandom);
        assert_eq!(outcome.retries, 3);
        assert_eq!(policy.calls(), 3);
        assert!(position.is_legal(outcome.mv));
    }

    #[tokio::test]
    async fn test_timeout_skips_remaining_attempts() {
        let profile = AgentProfile::new("white").with_decision_timeout(Duration::from_millis(20));
        let coordinator = MoveCoordinator::new(profile);
        let policy = SlowPolicy {
            calls: AtomicUsize::new(0),
        };
        let started = Instant::now();
        let outcome = coordinator
            .select_move(&policy, &Position::initial(), 0, String::new(), None)
            .await
            .unwrap();
        assert!(outcome.used_fallback);
        assert!(outcome.timed_out);
        assert_eq!(outcome.retries, 1);
        assert_eq!(policy.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_policy_errors_count_against_the_budget() {
        let profile = AgentProfile::new("white").with_max_retries(2);
        let coordinator = MoveCoordinator::new(profile);
        let outcome = coordinator
            .select_move(&FailingPolicy, &Position::initial(), 0, String::new(), None)
            .await
            .unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.retries, 2);
    }

    #[tokio::test]
    async fn test_strict_menu_rejects_off_menu_legal_move() {
        let profile = AgentProfile::new("white").with_strict_candidates(true);
        let coordinator = MoveCoordinator::new(profile);
        let policy = RecordingPolicy::new(&["e2e4", "fine, g1f3"]);
        let outcome = coordinator
            .select_move(
                &policy,
                &Position::initial(),
                0,
                String::new(),
                Some(book_menu("g1f3", "Nf3")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.uci, "g1f3");
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.origin, MoveOrigin::Book);
        let feedback = policy.request(1).feedback.unwrap();
        assert!(feedback.contains("g1f3"));
    }

    #[tokio::test]
    async fn test_off_menu_move_is_agent_origin_when_not_strict() {
        let coordinator = MoveCoordinator::new(AgentProfile::new("white"));
        let policy = ScriptedPolicy::new(["e2e4"]);
        let outcome = coordinator
            .select_move(
                &policy,
                &Position::initial(),
                0,
                String::new(),
                Some(book_menu("g1f3", "Nf3")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.origin, MoveOrigin::Agent);
    }

    #[tokio::test]
    async fn test_menu_choice_inherits_tier_origin() {
        let coordinator = MoveCoordinator::new(AgentProfile::new("white"));
        let policy = ScriptedPolicy::new(["g1f3"]);
        let outcome = coordinator
            .select_move(
                &policy,
                &Position::initial(),
                0,
                String::new(),
                Some(book_menu("g1f3", "Nf3")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.origin, MoveOrigin::Book);
        assert_eq!(outcome.to_meta().origin, MoveOrigin::Book);
    }

    #[test]
    fn test_profile_validation() {
        assert!(AgentProfile::new("white").validate().is_ok());
        assert!(AgentProfile::new("  ").validate().is_err());
        assert!(AgentProfile::new("white")
            .with_decision_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let profile = AgentProfile::new("agent-7");
        assert_eq!(profile.label(), "agent-7");

        let profile = profile.with_display_name("Seventh Seal");
        assert_eq!(profile.label(), "Seventh Seal");
        assert_eq!(profile.name, "agent-7");
    }
}
