use crate::errors::{ArenaError, Result};
use crate::game::PlayerSide;
use crate::oracle::MoveOracle;
use crate::resolver::CandidateSet;
use crate::rules::Position;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Everything a policy sees when asked for a move. The policy answers
/// with free-form text; the coordinator extracts and validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub fen: String,
    pub side: PlayerSide,
    pub plies_played: u32,
    /// Moves so far in PGN movetext form.
    pub movetext: String,
    pub legal_moves: Vec<String>,
    pub candidates: Option<CandidateSet>,
    /// Populated on retries with what went wrong last attempt.
    pub feedback: Option<String>,
}

impl DecisionRequest {
    pub fn for_position(position: &Position, plies_played: u32, movetext: String) -> Self {
        Self {
            fen: position.to_fen(),
            side: PlayerSide::from(position.side_to_move()),
            plies_played,
            movetext,
            legal_moves: position.legal_moves().iter().map(|m| m.to_string()).collect(),
            candidates: None,
            feedback: None,
        }
    }

    pub fn with_candidates(mut self, candidates: Option<CandidateSet>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

/// A move decision maker. Implementations range from scripted test
/// doubles to model-backed agents; all of them return raw text.
#[async_trait]
pub trait MovePolicy: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<String>;
}

/// Pull a move out of a free-form response.
///
/// The text is lowercased, `<code>` tags and fence markers stripped,
/// and "thoughts:" lines dropped. Allowed moves are then matched as
/// standalone words in list order; failing that, any UCI-shaped token
/// in the text is checked against the allowed list.
pub fn extract_move(raw: &str, allowed: &[String]) -> Option<String> {
    let text = sanitize(raw);
    for mv in allowed {
        if contains_word(&text, &mv.to_lowercase()) {
            return Some(mv.clone());
        }
    }
    find_uci_token(&text, allowed)
}

fn sanitize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let detagged = lowered.replace("<code>", " ").replace("</code>", " ");
    let defenced = strip_fences(&detagged);
    defenced
        .split('\n')
        .map(|line| match line.find("thoughts:") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove ``` fence markers together with their language hint.
fn strip_fences(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' && i + 2 < bytes.len() && bytes[i + 1] == b'`' && bytes[i + 2] == b'`' {
            i += 3;
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn contains_word(text: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    for (pos, hit) in text.match_indices(needle) {
        let before_ok = pos == 0 || !is_word_byte(bytes[pos - 1]);
        let end = pos + hit.len();
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

fn is_file_byte(b: u8) -> bool {
    (b'a'..=b'h').contains(&b)
}

fn is_rank_byte(b: u8) -> bool {
    (b'1'..=b'8').contains(&b)
}

fn is_promo_byte(b: u8) -> bool {
    matches!(b, b'q' | b'r' | b'b' | b'n')
}

fn find_uci_token(text: &str, allowed: &[String]) -> Option<String> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    while i + 4 <= len {
        let shaped = is_file_byte(bytes[i])
            && is_rank_byte(bytes[i + 1])
            && is_file_byte(bytes[i + 2])
            && is_rank_byte(bytes[i + 3]);
        if !shaped || (i > 0 && is_word_byte(bytes[i - 1])) {
            i += 1;
            continue;
        }
        // Five characters with a promotion suffix, then the plain form
        if i + 5 <= len && is_promo_byte(bytes[i + 4]) && (i + 5 == len || !is_word_byte(bytes[i + 5]))
        {
            let token = &text[i..i + 5];
            if let Some(hit) = allowed.iter().find(|m| m.eq_ignore_ascii_case(token)) {
                return Some(hit.clone());
            }
        }
        if i + 4 == len || !is_word_byte(bytes[i + 4]) {
            let token = &text[i..i + 4];
            if let Some(hit) = allowed.iter().find(|m| m.eq_ignore_ascii_case(token)) {
                return Some(hit.clone());
            }
        }
        i += 1;
    }
    None
}

/// Replays canned responses in order. Used by tests and demos to stand
/// in for a model-backed agent.
pub struct ScriptedPolicy {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedPolicy {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response.into());
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MovePolicy for ScriptedPolicy {
    async fn decide(&self, _request: &DecisionRequest) -> Result<String> {
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        next.ok_or_else(|| ArenaError::SourceUnavailable {
            source: "scripted_policy".to_string(),
            reason: "script exhausted".to_string(),
        })
    }
}

/// Uniform random choice among the legal moves. Seedable for
/// reproducible games.
pub struct RandomPolicy {
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MovePolicy for RandomPolicy {
    async fn decide(&self, request: &DecisionRequest) -> Result<String> {
        if request.legal_moves.is_empty() {
            return Err(ArenaError::InvalidPosition(format!(
                "no legal moves in {}",
                request.fen
            )));
        }
        let index = self
            .rng
            .lock()
            .map(|mut rng| rng.gen_range(0..request.legal_moves.len()))
            .map_err(|_| ArenaError::SourceUnavailable {
                source: "random_policy".to_string(),
                reason: "rng lock poisoned".to_string(),
            })?;
        Ok(request.legal_moves[index].clone())
    }
}

/// Always answers with the oracle's best move.
pub struct GreedyOraclePolicy {
    oracle: Arc<dyn MoveOracle>,
}

impl GreedyOraclePolicy {
    pub fn new(oracle: Arc<dyn MoveOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl MovePolicy for GreedyOraclePolicy {
    async fn decide(&self, request: &DecisionRequest) -> Result<String> {
        let position = Position::from_fen(&request.fen)?;
        let best = self.oracle.best_move(&position).await?;
        match best {
            Some(mv) => Ok(mv.to_string()),
            None => Err(ArenaError::InvalidPosition(format!(
                "no legal moves in {}",
                request.fen
            ))),
        }
    }
}

/// Plays the head of the candidate menu, or the first legal move when
/// no tier produced one. Deterministic, handy for wiring tests.
pub struct FirstCandidatePolicy;

#[async_trait]
impl MovePolicy for FirstCandidatePolicy {
    async fn decide(&self, request: &DecisionRequest) -> Result<String> {
        if let Some(head) = request
            .candidates
            .as_ref()
            .and_then(|set| set.moves.first())
        {
            return Ok(head.uci.clone());
        }
        request
            .legal_moves
            .first()
            .cloned()
            .ok_or_else(|| ArenaError::InvalidPosition(format!("no legal moves in {}", request.fen)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{CandidateInfo, CandidateMove, MoveOrigin};

    fn allowed(moves: &[&str]) -> Vec<String> {
        moves.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_extracts_standalone_move() {
        let moves = allowed(&["e2e4", "d2d4"]);
        assert_eq!(
            extract_move("I will play e2e4 to control the center.", &moves),
            Some("e2e4".to_string())
        );
    }

    #[test]
    fn test_extracts_from_code_fence() {
        let moves = allowed(&["e2e4", "e7e8q"]);
        assert_eq!(
            extract_move("```uci\ne7e8q\n```", &moves),
            Some("e7e8q".to_string())
        );
        assert_eq!(extract_move("<code>e2e4</code>", &moves), Some("e2e4".to_string()));
    }

    #[test]
    fn test_thoughts_lines_are_ignored() {
        let moves = allowed(&["g1f3", "e2e4"]);
        let raw = "thoughts: g1f3 develops, but the center matters more\nfinal answer: e2e4";
        assert_eq!(extract_move(raw, &moves), Some("e2e4".to_string()));
    }

    #[test]
    fn test_word_boundaries_are_enforced() {
        let moves = allowed(&["e2e4"]);
        assert_eq!(extract_move("the token pe2e4x is not a move", &moves), None);
        assert_eq!(extract_move("play 1.e2e4!", &moves), Some("e2e4".to_string()));
    }

    #[test]
    fn test_promotion_suffix_handling() {
        let moves = allowed(&["e7e8q"]);
        assert_eq!(
            extract_move("promote with e7e8q now", &moves),
            Some("e7e8q".to_string())
        );
        assert_eq!(extract_move("garbage e7e8qq here", &moves), None);
    }

    #[test]
    fn test_uppercase_response_is_matched() {
        let moves = allowed(&["g1f3"]);
        assert_eq!(extract_move("Move: G1F3", &moves), Some("g1f3".to_string()));
    }

    #[test]
    fn test_disallowed_shaped_token_is_rejected() {
        let moves = allowed(&["d2d4"]);
        assert_eq!(extract_move("how about a1a1", &moves), None);
    }

    fn start_request() -> DecisionRequest {
        DecisionRequest::for_position(&Position::initial(), 0, String::new())
    }

    #[tokio::test]
    async fn test_scripted_policy_pops_in_order() {
        let policy = ScriptedPolicy::new(["e2e4", "d2d4"]);
        let request = start_request();
        assert_eq!(policy.decide(&request).await.unwrap(), "e2e4");
        assert_eq!(policy.decide(&request).await.unwrap(), "d2d4");
        assert!(policy.decide(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_random_policy_is_reproducible_with_seed() {
        let request = start_request();
        let first = RandomPolicy::seeded(42).decide(&request).await.unwrap();
        let second = RandomPolicy::seeded(42).decide(&request).await.unwrap();
        assert_eq!(first, second);
        assert!(request.legal_moves.contains(&first));
    }

    #[tokio::test]
    async fn test_first_candidate_policy_prefers_menu() {
        let candidate = CandidateMove {
            uci: "g1f3".to_string(),
            san: "Nf3".to_string(),
            is_capture: false,
            gives_check: false,
            info: CandidateInfo::Book {
                total_games: 100,
                draw_rate: 0.5,
            },
        };
        let request = start_request().with_candidates(Some(CandidateSet {
            origin: MoveOrigin::Book,
            moves: vec![candidate],
        }));
        assert_eq!(
            FirstCandidatePolicy.decide(&request).await.unwrap(),
            "g1f3"
        );

        let bare = start_request();
        let chosen = FirstCandidatePolicy.decide(&bare).await.unwrap();
        assert_eq!(chosen, bare.legal_moves[0]);
    }
}
