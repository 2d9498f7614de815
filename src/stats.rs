use crate::game::{GameResult, PlayerSide};
use crate::oracle::QualityTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One game's result from a single agent's side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Won,
    Lost,
    Drawn,
}

impl GameOutcome {
    pub fn for_side(side: PlayerSide, result: GameResult) -> GameOutcome {
        match result.winner() {
            Some(winner) if winner == side => GameOutcome::Won,
            Some(_) => GameOutcome::Lost,
            None => GameOutcome::Drawn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEntry {
    pub cp_loss: i32,
    pub is_best: bool,
}

/// Cumulative performance record for one agent. Derived rates are kept
/// current on every update so the struct serializes ready to display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub games_played: u32,
    pub games_won: u32,
    pub games_lost: u32,
    pub games_drawn: u32,
    pub total_moves: u32,
    pub illegal_moves: u32,
    pub timeouts: u32,
    pub fallback_moves: u32,
    pub total_thinking_time_ms: u64,
    /// Average per move, not per game.
    pub average_thinking_time_ms: f64,
    /// Percentage, 0 to 100.
    pub win_rate: f64,
    pub longest_game: u32,
    pub shortest_game: Option<u32>,
    pub total_centipawn_loss: i64,
    pub average_centipawn_loss: f64,
    pub blunders: u32,
    pub mistakes: u32,
    pub inaccuracies: u32,
    pub excellent_moves: u32,
    pub best_moves_played: u32,
    pub blunder_rate: f64,
    /// Percentage of evaluated moves that were not mistakes or blunders.
    pub tactical_accuracy: f64,
    pub best_move_rate: f64,
    pub evaluation_history: Vec<EvaluationEntry>,
}

impl AgentStats {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            games_played: 0,
            games_won: 0,
            games_lost: 0,
            games_drawn: 0,
            total_moves: 0,
            illegal_moves: 0,
            timeouts: 0,
            fallback_moves: 0,
            total_thinking_time_ms: 0,
            average_thinking_time_ms: 0.0,
            win_rate: 0.0,
            longest_game: 0,
            shortest_game: None,
            total_centipawn_loss: 0,
            average_centipawn_loss: 0.0,
            blunders: 0,
            mistakes: 0,
            inaccuracies: 0,
            excellent_moves: 0,
            best_moves_played: 0,
            blunder_rate: 0.0,
            tactical_accuracy: 0.0,
            best_move_rate: 0.0,
            evaluation_history: Vec::new(),
        }
    }

    pub fn update_after_game(&mut self, outcome: GameOutcome, moves: u32, thinking_time_ms: u64) {
        self.games_played += 1;
        match outcome {
            GameOutcome::Won => self.games_won += 1,
            GameOutcome::Lost => self.games_lost += 1,
            GameOutcome::Drawn => self.games_drawn += 1,
        }

        self.total_moves += moves;
        self.total_thinking_time_ms += thinking_time_ms;
        self.average_thinking_time_ms = if self.total_moves > 0 {
            self.total_thinking_time_ms as f64 / f64::from(self.total_moves)
        } else {
            0.0
        };
        self.win_rate = f64::from(self.games_won) / f64::from(self.games_played) * 100.0;

        if moves > self.longest_game {
            self.longest_game = moves;
        }
        if self.shortest_game.map_or(true, |shortest| moves < shortest) {
            self.shortest_game = Some(moves);
        }
    }

    pub fn record_move_evaluation(&mut self, cp_loss: i32, is_best: bool) {
        self.total_centipawn_loss += i64::from(cp_loss);
        match QualityTier::classify(cp_loss) {
            QualityTier::Blunder => self.blunders += 1,
            QualityTier::Mistake => self.mistakes += 1,
            QualityTier::Inaccuracy => self.inaccuracies += 1,
            QualityTier::Excellent => self.excellent_moves += 1,
            QualityTier::Good => {}
        }
        if is_best {
            self.best_moves_played += 1;
        }
        self.evaluation_history.push(EvaluationEntry { cp_loss, is_best });

        let evaluated = self.evaluation_history.len() as f64;
        self.average_centipawn_loss = self.total_centipawn_loss as f64 / evaluated;
        self.blunder_rate = f64::from(self.blunders) / evaluated * 100.0;
        self.best_move_rate = f64::from(self.best_moves_played) / evaluated * 100.0;
        let accurate = evaluated - f64::from(self.mistakes + self.blunders);
        self.tactical_accuracy = accurate / evaluated * 100.0;
    }

    pub fn record_illegal_move(&mut self) {
        self.illegal_moves += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_fallback(&mut self) {
        self.fallback_moves += 1;
    }

    pub fn evaluated_moves(&self) -> usize {
        self.evaluation_history.len()
    }
}

/// Stats for every agent seen by the arena, keyed by agent name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRegistry {
    agents: HashMap<String, AgentStats>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, name: &str) -> &mut AgentStats {
        self.agents
            .entry(name.to_string())
            .or_insert_with(|| AgentStats::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&AgentStats> {
        self.agents.get(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &AgentStats> {
        self.agents.values()
    }
}
