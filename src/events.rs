use crate::commentary::Commentary;
use crate::errors::Result;
use crate::game::{GameSummary, MoveRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire-format event emitted as a game progresses. Tagged so consumers
/// can dispatch on the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    GameStarted {
        game_id: String,
        white: String,
        black: String,
        initial_fen: String,
        timestamp: DateTime<Utc>,
    },
    MoveExecuted {
        game_id: String,
        record: MoveRecord,
    },
    Commentary {
        game_id: String,
        ply: u32,
        commentary: Commentary,
    },
    GameCompleted {
        game_id: String,
        summary: GameSummary,
    },
}

impl GameEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::GameStarted { .. } => "game_started",
            GameEvent::MoveExecuted { .. } => "move_executed",
            GameEvent::Commentary { .. } => "commentary",
            GameEvent::GameCompleted { .. } => "game_completed",
        }
    }

    pub fn game_id(&self) -> &str {
        match self {
            GameEvent::GameStarted { game_id, .. }
            | GameEvent::MoveExecuted { game_id, .. }
            | GameEvent::Commentary { game_id, .. }
            | GameEvent::GameCompleted { game_id, .. } => game_id,
        }
    }

    pub fn started(game_id: &str, white: &str, black: &str, initial_fen: &str) -> Self {
        GameEvent::GameStarted {
            game_id: game_id.to_string(),
            white: white.to_string(),
            black: black.to_string(),
            initial_fen: initial_fen.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives events as the orchestrator emits them. Implementations own
/// their delivery and must not block; the per-game `EventLog` is kept
/// regardless of any sinks.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &GameEvent);
}

/// In-memory event history for one game, in emission order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<GameEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn moves(&self) -> impl Iterator<Item = &MoveRecord> {
        self.events.iter().filter_map(|event| match event {
            GameEvent::MoveExecuted { record, .. } => Some(record),
            _ => None,
        })
    }

    pub fn commentary(&self) -> impl Iterator<Item = &Commentary> {
        self.events.iter().filter_map(|event| match event {
            GameEvent::Commentary { commentary, .. } => Some(commentary),
            _ => None,
        })
    }

    /// One JSON object per line, ready for a file or a socket.
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Game, MoveMeta};
    use crate::rules::parse_uci;

    fn sample_record() -> MoveRecord {
        let mut game = Game::new("g1", "alpha", "beta");
        game.play(parse_uci("e2e4").unwrap(), MoveMeta::default())
            .unwrap()
            .clone()
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let started = GameEvent::started("g1", "alpha", "beta", crate::rules::STARTING_FEN);
        let value = serde_json::to_value(&started).unwrap();
        assert_eq!(value["type"], "game_started");
        assert_eq!(value["white"], "alpha");

        let executed = GameEvent::MoveExecuted {
            game_id: "g1".to_string(),
            record: sample_record(),
        };
        let value = serde_json::to_value(&executed).unwrap();
        assert_eq!(value["type"], "move_executed");
        assert_eq!(value["record"]["uci"], "e2e4");
        assert_eq!(value["record"]["origin"], "agent");
    }

    #[test]
    fn test_event_round_trip() {
        let executed = GameEvent::MoveExecuted {
            game_id: "g1".to_string(),
            record: sample_record(),
        };
        let json = serde_json::to_string(&executed).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "move_executed");
        assert_eq!(back.game_id(), "g1");
    }

    #[test]
    fn test_log_accumulates_and_filters() {
        let mut log = EventLog::new();
        log.record(GameEvent::started("g1", "alpha", "beta", crate::rules::STARTING_FEN));
        log.record(GameEvent::MoveExecuted {
            game_id: "g1".to_string(),
            record: sample_record(),
        });
        assert_eq!(log.len(), 2);
        assert_eq!(log.moves().count(), 1);
        assert_eq!(log.commentary().count(), 0);

        let lines = log.to_json_lines().unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert!(lines.lines().next().unwrap().contains("game_started"));
    }
}
