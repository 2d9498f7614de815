use crate::errors::{ArenaError, Result};
use crate::oracle::QualityTier;
use crate::resolver::MoveOrigin;
use crate::rules::{parse_uci, piece_letter, Position, TerminalStatus};
use chess::{ChessMove, Color, Piece};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which player a move or result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSide {
    White,
    Black,
}

impl PlayerSide {
    pub fn opponent(&self) -> PlayerSide {
        match self {
            PlayerSide::White => PlayerSide::Black,
            PlayerSide::Black => PlayerSide::White,
        }
    }

    pub fn color(&self) -> Color {
        match self {
            PlayerSide::White => Color::White,
            PlayerSide::Black => Color::Black,
        }
    }
}

impl From<Color> for PlayerSide {
    fn from(color: Color) -> Self {
        match color {
            Color::White => PlayerSide::White,
            Color::Black => PlayerSide::Black,
        }
    }
}

impl fmt::Display for PlayerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerSide::White => f.write_str("white"),
            PlayerSide::Black => f.write_str("black"),
        }
    }
}

/// Final score of a game, PGN-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    #[serde(rename = "1-0")]
    WhiteWins,
    #[serde(rename = "0-1")]
    BlackWins,
    #[serde(rename = "1/2-1/2")]
    Draw,
}

impl GameResult {
    pub fn as_pgn(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }

    pub fn winner(&self) -> Option<PlayerSide> {
        match self {
            GameResult::WhiteWins => Some(PlayerSide::White),
            GameResult::BlackWins => Some(PlayerSide::Black),
            GameResult::Draw => None,
        }
    }
}

/// Why the game ended. Natural ends mirror `TerminalStatus`; the last
/// three are orchestration rulings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
    IllegalMoveForfeit,
    MoveLimit,
    StateCorruption,
}

impl EndReason {
    fn from_status(status: TerminalStatus) -> Option<EndReason> {
        match status {
            TerminalStatus::Ongoing => None,
            TerminalStatus::Checkmate => Some(EndReason::Checkmate),
            TerminalStatus::Stalemate => Some(EndReason::Stalemate),
            TerminalStatus::DrawInsufficientMaterial => Some(EndReason::InsufficientMaterial),
            TerminalStatus::DrawFiftyMove => Some(EndReason::FiftyMoveRule),
            TerminalStatus::DrawRepetition => Some(EndReason::ThreefoldRepetition),
        }
    }
}

/// One executed ply with everything the arena learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub ply: u32,
    pub side: PlayerSide,
    pub uci: String,
    pub san: String,
    pub piece: char,
    pub captured: Option<char>,
    pub is_check: bool,
    pub is_checkmate: bool,
    pub is_castling: bool,
    pub is_en_passant: bool,
    pub promotion: Option<char>,
    pub origin: MoveOrigin,
    pub quality: Option<QualityTier>,
    pub cp_loss: Option<i32>,
    pub retries: u32,
    pub used_fallback: bool,
    pub thinking_time_ms: u64,
    pub fen_after: String,
}

/// Caller-supplied context for a ply: where the move came from and what it
/// cost to produce.
#[derive(Debug, Clone)]
pub struct MoveMeta {
    pub origin: MoveOrigin,
    pub retries: u32,
    pub used_fallback: bool,
    pub thinking_time_ms: u64,
    pub quality: Option<QualityTier>,
    pub cp_loss: Option<i32>,
}

impl Default for MoveMeta {
    fn default() -> Self {
        Self {
            origin: MoveOrigin::Agent,
            retries: 0,
            used_fallback: false,
            thinking_time_ms: 0,
            quality: None,
            cp_loss: None,
        }
    }
}

/// Flat, serializable digest of a finished (or running) game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: String,
    pub white: String,
    pub black: String,
    pub result: String,
    pub end_reason: Option<EndReason>,
    pub winner: Option<PlayerSide>,
    pub total_plies: u32,
    pub movetext: String,
    pub final_fen: String,
    pub duration_ms: u64,
    pub avg_think_ms: u64,
    pub fallback_moves: u32,
    pub retried_plies: u32,
}

/// A single game between two named agents.
///
/// Owns the live position, the full move history, and the repetition table.
/// Threefold repetition is detected here rather than in `Position` because
/// it needs the whole line, not one snapshot.
#[derive(Debug, Clone)]
pub struct Game {
    game_id: String,
    white: String,
    black: String,
    initial_fen: String,
    position: Position,
    history: Vec<MoveRecord>,
    positions_seen: HashMap<u64, u32>,
    result: Option<GameResult>,
    end_reason: Option<EndReason>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Game {
    pub fn new(game_id: &str, white: &str, black: &str) -> Self {
        let position = Position::initial();
        let mut positions_seen = HashMap::new();
        positions_seen.insert(position.hash(), 1);
        Self {
            game_id: game_id.to_string(),
            white: white.to_string(),
            black: black.to_string(),
            initial_fen: position.to_fen(),
            position,
            history: Vec::new(),
            positions_seen,
            result: None,
            end_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Start from an arbitrary position, e.g. a study or a resumed game.
    pub fn from_fen(game_id: &str, white: &str, black: &str, fen: &str) -> Result<Self> {
        let position = Position::from_fen(fen)?;
        let mut game = Self::new(game_id, white, black);
        game.initial_fen = position.to_fen();
        game.position = position;
        game.positions_seen.clear();
        game.positions_seen.insert(position.hash(), 1);
        Ok(game)
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn white(&self) -> &str {
        &self.white
    }

    pub fn black(&self) -> &str {
        &self.black
    }

    pub fn agent_name(&self, side: PlayerSide) -> &str {
        match side {
            PlayerSide::White => &self.white,
            PlayerSide::Black => &self.black,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn plies_played(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn side_to_move(&self) -> PlayerSide {
        PlayerSide::from(self.position.side_to_move())
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn winner(&self) -> Option<PlayerSide> {
        self.result.and_then(|r| r.winner())
    }

    /// How often the current position has occurred in this game.
    pub fn repetition_count(&self) -> u32 {
        *self
            .positions_seen
            .get(&self.position.hash())
            .unwrap_or(&0)
    }

    /// Execute one ply. Legality is re-checked here; callers that already
    /// validated simply pay the check twice.
    pub fn play(&mut self, mv: ChessMove, meta: MoveMeta) -> Result<&MoveRecord> {
        if self.result.is_some() {
            return Err(ArenaError::GameFinished(self.game_id.clone()));
        }

        let before = self.position;
        let san = before.san(mv)?;
        let side = PlayerSide::from(before.side_to_move());
        let board = before.board();

        let piece = match board.piece_on(mv.get_source()) {
            Some(p) => p,
            None => {
                return Err(ArenaError::IllegalMove {
                    attempted: mv.to_string(),
                    position: before.to_fen(),
                })
            }
        };
        let is_en_passant = piece == Piece::Pawn
            && board.piece_on(mv.get_dest()).is_none()
            && mv.get_source().get_file() != mv.get_dest().get_file();
        let captured = if is_en_passant {
            Some(piece_letter(Piece::Pawn))
        } else {
            board.piece_on(mv.get_dest()).map(piece_letter)
        };
        let file_delta = (mv.get_source().get_file().to_index() as i32
            - mv.get_dest().get_file().to_index() as i32)
            .abs();
        let is_castling = piece == Piece::King && file_delta == 2;

        let after = before.apply(mv)?;
        let mut status = after.terminal_status();
        let seen = self.positions_seen.entry(after.hash()).or_insert(0);
        *seen += 1;
        if status == TerminalStatus::Ongoing && *seen >= 3 {
            status = TerminalStatus::DrawRepetition;
        }

        let record = MoveRecord {
            ply: self.history.len() as u32 + 1,
            side,
            uci: mv.to_string(),
            san,
            piece: piece_letter(piece),
            captured,
            is_check: after.in_check(),
            is_checkmate: status == TerminalStatus::Checkmate,
            is_castling,
            is_en_passant,
            promotion: mv.get_promotion().map(piece_letter),
            origin: meta.origin,
            quality: meta.quality,
            cp_loss: meta.cp_loss,
            retries: meta.retries,
            used_fallback: meta.used_fallback,
            thinking_time_ms: meta.thinking_time_ms,
            fen_after: after.to_fen(),
        };

        self.position = after;
        self.history.push(record);

        if status.is_terminal() {
            let result = match status {
                TerminalStatus::Checkmate => match side {
                    PlayerSide::White => GameResult::WhiteWins,
                    PlayerSide::Black => GameResult::BlackWins,
                },
                _ => GameResult::Draw,
            };
            self.finish(result, EndReason::from_status(status));
        }

        Ok(self.history.last().unwrap())
    }

    /// Rule a side the loser, e.g. after repeated illegal moves.
    pub fn forfeit(&mut self, side: PlayerSide) -> Result<()> {
        if self.result.is_some() {
            return Err(ArenaError::GameFinished(self.game_id.clone()));
        }
        let result = match side.opponent() {
            PlayerSide::White => GameResult::WhiteWins,
            PlayerSide::Black => GameResult::BlackWins,
        };
        self.finish(result, Some(EndReason::IllegalMoveForfeit));
        Ok(())
    }

    /// End an unfinished game as a draw when the ply limit is reached.
    pub fn adjudicate_move_limit(&mut self) -> Result<()> {
        if self.result.is_some() {
            return Err(ArenaError::GameFinished(self.game_id.clone()));
        }
        self.finish(GameResult::Draw, Some(EndReason::MoveLimit));
        Ok(())
    }

    /// Halt a game whose recorded history no longer replays to the live
    /// position. Neither side gets the win off a corrupted record.
    pub fn halt_corrupted(&mut self) -> Result<()> {
        if self.result.is_some() {
            return Err(ArenaError::GameFinished(self.game_id.clone()));
        }
        self.finish(GameResult::Draw, Some(EndReason::StateCorruption));
        Ok(())
    }

    fn finish(&mut self, result: GameResult, reason: Option<EndReason>) {
        self.result = Some(result);
        self.end_reason = reason;
        self.finished_at = Some(Utc::now());
    }

    /// Numbered SAN movetext, e.g. `1. e4 e5 2. Nf3 Nc6`.
    pub fn pgn_movetext(&self) -> String {
        let mut out = String::new();
        for (i, record) in self.history.iter().enumerate() {
            if i % 2 == 0 {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&(i / 2 + 1).to_string());
                out.push_str(". ");
            } else {
                out.push(' ');
            }
            out.push_str(&record.san);
        }
        out
    }

    /// Re-derive the final position from the recorded moves and confirm it
    /// matches the live state. Catches history corruption before a summary
    /// is published.
    pub fn verify_replay(&self) -> Result<()> {
        let mut pos = Position::from_fen(&self.initial_fen)?;
        for record in &self.history {
            let mv = parse_uci(&record.uci)?;
            pos = pos.apply(mv)?;
            if pos.to_fen() != record.fen_after {
                return Err(ArenaError::StateCorruption {
                    game_id: self.game_id.clone(),
                    detail: format!("replay diverged at ply {}", record.ply),
                });
            }
        }
        if pos.to_fen() != self.position.to_fen() {
            return Err(ArenaError::StateCorruption {
                game_id: self.game_id.clone(),
                detail: "replayed line does not reach the live position".to_string(),
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> GameSummary {
        let total_plies = self.history.len() as u32;
        let total_think: u64 = self.history.iter().map(|r| r.thinking_time_ms).sum();
        let avg_think_ms = if total_plies > 0 {
            total_think / total_plies as u64
        } else {
            0
        };
        let finished = self.finished_at.unwrap_or_else(Utc::now);
        let duration_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;

        GameSummary {
            game_id: self.game_id.clone(),
            white: self.white.clone(),
            black: self.black.clone(),
            result: self
                .result
                .map(|r| r.as_pgn().to_string())
                .unwrap_or_else(|| "*".to_string()),
            end_reason: self.end_reason,
            winner: self.winner(),
            total_plies,
            movetext: self.pgn_movetext(),
            final_fen: self.position.to_fen(),
            duration_ms,
            avg_think_ms,
            fallback_moves: self.history.iter().filter(|r| r.used_fallback).count() as u32,
            retried_plies: self.history.iter().filter(|r| r.retries > 0).count() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::STARTING_FEN;

    fn play_line(game: &mut Game, line: &[&str]) {
        for uci in line {
            let mv = parse_uci(uci).unwrap();
            game.play(mv, MoveMeta::default()).unwrap();
        }
    }

    #[test]
    fn test_new_game() {
        let game = Game::new("g1", "alpha", "beta");
        assert_eq!(game.game_id(), "g1");
        assert!(!game.is_finished());
        assert_eq!(game.side_to_move(), PlayerSide::White);
        assert_eq!(game.plies_played(), 0);
        assert_eq!(game.position().to_fen(), STARTING_FEN);
    }

    #[test]
    fn test_play_records_moves() {
        let mut game = Game::new("g1", "alpha", "beta");
        play_line(&mut game, &["e2e4", "e7e5", "g1f3"]);

        assert_eq!(game.plies_played(), 3);
        assert_eq!(game.pgn_movetext(), "1. e4 e5 2. Nf3");
        let last = &game.history()[2];
        assert_eq!(last.san, "Nf3");
        assert_eq!(last.side, PlayerSide::White);
        assert_eq!(last.piece, 'N');
        assert_eq!(last.ply, 3);
        assert!(!last.is_check);
    }

    #[test]
    fn test_checkmate_finishes_game() {
        let mut game = Game::new("g1", "alpha", "beta");
        play_line(&mut game, &["f2f3", "e7e5", "g2g4", "d8h4"]);

        assert!(game.is_finished());
        assert_eq!(game.result(), Some(GameResult::BlackWins));
        assert_eq!(game.end_reason(), Some(EndReason::Checkmate));
        assert_eq!(game.winner(), Some(PlayerSide::Black));
        assert!(game.history().last().unwrap().is_checkmate);

        let err = game
            .play(parse_uci("e2e4").unwrap(), MoveMeta::default())
            .unwrap_err();
        assert!(matches!(err, ArenaError::GameFinished(_)));
    }

    #[test]
    fn test_capture_and_en_passant_flags() {
        let mut game = Game::new("g1", "alpha", "beta");
        play_line(&mut game, &["e2e4", "a7a6", "e4e5", "d7d5", "e5d6"]);

        let ep = game.history().last().unwrap();
        assert!(ep.is_en_passant);
        assert_eq!(ep.captured, Some('P'));
        assert_eq!(ep.san, "exd6");
    }

    #[test]
    fn test_threefold_repetition() {
        let mut game = Game::new("g1", "alpha", "beta");
        // Knights shuffle back and forth; the starting position counts as the
        // first occurrence, so the second full return ends the game at ply 8
        play_line(
            &mut game,
            &[
                "g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8",
            ],
        );

        assert!(game.is_finished());
        assert_eq!(game.result(), Some(GameResult::Draw));
        assert_eq!(game.end_reason(), Some(EndReason::ThreefoldRepetition));
    }

    #[test]
    fn test_forfeit() {
        let mut game = Game::new("g1", "alpha", "beta");
        play_line(&mut game, &["e2e4"]);
        game.forfeit(PlayerSide::Black).unwrap();

        assert_eq!(game.result(), Some(GameResult::WhiteWins));
        assert_eq!(game.end_reason(), Some(EndReason::IllegalMoveForfeit));
        assert!(game.forfeit(PlayerSide::White).is_err());
    }

    #[test]
    fn test_move_limit_adjudication() {
        let mut game = Game::new("g1", "alpha", "beta");
        play_line(&mut game, &["e2e4", "e7e5"]);
        game.adjudicate_move_limit().unwrap();

        assert_eq!(game.result(), Some(GameResult::Draw));
        assert_eq!(game.end_reason(), Some(EndReason::MoveLimit));
        assert_eq!(game.summary().result, "1/2-1/2");
    }

    #[test]
    fn test_replay_verification() {
        let mut game = Game::new("g1", "alpha", "beta");
        play_line(&mut game, &["e2e4", "c7c5", "g1f3", "d7d6", "d2d4", "c5d4"]);
        game.verify_replay().unwrap();
    }

    #[test]
    fn test_summary_fields() {
        let mut game = Game::new("match-7", "alpha", "beta");
        play_line(&mut game, &["f2f3", "e7e5", "g2g4", "d8h4"]);

        let summary = game.summary();
        assert_eq!(summary.game_id, "match-7");
        assert_eq!(summary.result, "0-1");
        assert_eq!(summary.winner, Some(PlayerSide::Black));
        assert_eq!(summary.total_plies, 4);
        assert_eq!(summary.movetext, "1. f3 e5 2. g4 Qh4#");
        assert_eq!(summary.end_reason, Some(EndReason::Checkmate));
    }

    #[test]
    fn test_from_fen_start() {
        let game = Game::from_fen(
            "g2",
            "alpha",
            "beta",
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(game.side_to_move(), PlayerSide::Black);
        assert_eq!(game.plies_played(), 0);
    }
}
