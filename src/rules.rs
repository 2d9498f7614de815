use crate::errors::{ArenaError, Result};
use chess::{Board, BoardStatus, ChessMove, Color, File, MoveGen, Piece, Rank, Square};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Standard chess starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Terminal classification of a single position.
///
/// `DrawRepetition` can only be reported with game history in hand, so
/// `Position::terminal_status` never returns it; the game layer does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Ongoing,
    Checkmate,
    Stalemate,
    DrawInsufficientMaterial,
    DrawFiftyMove,
    DrawRepetition,
}

impl TerminalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TerminalStatus::Ongoing)
    }

    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            TerminalStatus::Stalemate
                | TerminalStatus::DrawInsufficientMaterial
                | TerminalStatus::DrawFiftyMove
                | TerminalStatus::DrawRepetition
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Ongoing => "ongoing",
            TerminalStatus::Checkmate => "checkmate",
            TerminalStatus::Stalemate => "stalemate",
            TerminalStatus::DrawInsufficientMaterial => "insufficient_material",
            TerminalStatus::DrawFiftyMove => "fifty_move_rule",
            TerminalStatus::DrawRepetition => "threefold_repetition",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse game phase, used for tier routing and decision context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Opening,
    Middlegame,
    Endgame,
}

impl GamePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Opening => "opening",
            GamePhase::Middlegame => "middlegame",
            GamePhase::Endgame => "endgame",
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable chess position with move counters.
///
/// Wraps the board representation and tracks the halfmove clock and fullmove
/// number, which are needed for fifty-move detection and faithful FEN
/// round-trips. All operations are pure: `apply` returns a new `Position`
/// and never mutates the receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    board: Board,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Position {
    /// The standard starting position.
    pub fn initial() -> Self {
        Self {
            board: Board::default(),
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    /// Parse a FEN string. Accepts 4-field FENs (missing counters default
    /// to `0 1`) since several upstream sources emit those.
    pub fn from_fen(fen: &str) -> Result<Self> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(ArenaError::InvalidPosition(format!(
                "expected at least 4 FEN fields, got {} in '{}'",
                fields.len(),
                fen
            )));
        }

        let halfmove_clock = if fields.len() > 4 {
            fields[4].parse::<u32>().map_err(|_| {
                ArenaError::InvalidPosition(format!("bad halfmove clock '{}'", fields[4]))
            })?
        } else {
            0
        };
        let fullmove_number = if fields.len() > 5 {
            let parsed = fields[5].parse::<u32>().map_err(|_| {
                ArenaError::InvalidPosition(format!("bad fullmove number '{}'", fields[5]))
            })?;
            parsed.max(1)
        } else {
            1
        };

        // The board parser ignores the counters, so normalize them away.
        let board_fen = format!(
            "{} {} {} {} 0 1",
            fields[0], fields[1], fields[2], fields[3]
        );
        let board = Board::from_str(&board_fen)
            .map_err(|e| ArenaError::InvalidPosition(format!("{}: '{}'", e, fen)))?;

        Ok(Self {
            board,
            halfmove_clock,
            fullmove_number,
        })
    }

    /// Canonical FEN encoding, counters included.
    pub fn to_fen(&self) -> String {
        let base = self.board.to_string();
        let fields: Vec<&str> = base.split_whitespace().collect();
        format!(
            "{} {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], self.halfmove_clock, self.fullmove_number
        )
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Total pieces on the board, kings included.
    pub fn piece_count(&self) -> u32 {
        self.board.combined().popcnt()
    }

    /// Material on the board in centipawns, positive when White is ahead.
    pub fn material_balance(&self) -> i32 {
        let mut balance = 0;
        for (piece, value) in [
            (Piece::Pawn, 100),
            (Piece::Knight, 320),
            (Piece::Bishop, 330),
            (Piece::Rook, 500),
            (Piece::Queen, 900),
        ] {
            let kind = self.board.pieces(piece);
            let white = (kind & self.board.color_combined(Color::White)).popcnt() as i32;
            let black = (kind & self.board.color_combined(Color::Black)).popcnt() as i32;
            balance += (white - black) * value;
        }
        balance
    }

    pub fn in_check(&self) -> bool {
        self.board.checkers().popcnt() > 0
    }

    /// Zobrist hash of the board (counters excluded), used for repetition
    /// detection and cache keys.
    pub fn hash(&self) -> u64 {
        self.board.get_hash()
    }

    /// All legal moves in this position. Empty only when the position is
    /// checkmate or stalemate.
    pub fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.board).collect()
    }

    pub fn legal_move_count(&self) -> usize {
        MoveGen::new_legal(&self.board).len()
    }

    pub fn is_legal(&self, mv: ChessMove) -> bool {
        self.board.legal(mv)
    }

    /// Whether the move captures (including en passant).
    pub fn is_capture(&self, mv: ChessMove) -> bool {
        if self.board.piece_on(mv.get_dest()).is_some() {
            return true;
        }
        // Pawn moving diagonally onto an empty square is an en passant capture
        self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            && mv.get_source().get_file() != mv.get_dest().get_file()
    }

    /// Whether the move gives check in the resulting position.
    pub fn gives_check(&self, mv: ChessMove) -> bool {
        self.board.make_move_new(mv).checkers().popcnt() > 0
    }

    /// Apply a move, producing the successor position.
    ///
    /// Fails with `IllegalMove` if the move is not legal here. The halfmove
    /// clock resets on pawn moves and captures, and the fullmove number
    /// advances after Black's move.
    pub fn apply(&self, mv: ChessMove) -> Result<Position> {
        if !self.board.legal(mv) {
            return Err(ArenaError::IllegalMove {
                attempted: mv.to_string(),
                position: self.to_fen(),
            });
        }

        let pawn_move = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn);
        let capture = self.is_capture(mv);
        let halfmove_clock = if pawn_move || capture {
            0
        } else {
            self.halfmove_clock + 1
        };
        let fullmove_number = if self.board.side_to_move() == Color::Black {
            self.fullmove_number + 1
        } else {
            self.fullmove_number
        };

        Ok(Position {
            board: self.board.make_move_new(mv),
            halfmove_clock,
            fullmove_number,
        })
    }

    /// Position-local terminal classification. Repetition needs history and
    /// is layered on at the game level.
    pub fn terminal_status(&self) -> TerminalStatus {
        match self.board.status() {
            BoardStatus::Checkmate => TerminalStatus::Checkmate,
            BoardStatus::Stalemate => TerminalStatus::Stalemate,
            BoardStatus::Ongoing => {
                if self.is_insufficient_material() {
                    TerminalStatus::DrawInsufficientMaterial
                } else if self.halfmove_clock >= 100 {
                    TerminalStatus::DrawFiftyMove
                } else {
                    TerminalStatus::Ongoing
                }
            }
        }
    }

    /// Neither side can possibly force checkmate: bare kings, a lone minor
    /// piece, or same-colored bishops only.
    pub fn is_insufficient_material(&self) -> bool {
        let b = &self.board;
        let heavy =
            b.pieces(Piece::Pawn) | b.pieces(Piece::Rook) | b.pieces(Piece::Queen);
        if heavy.popcnt() > 0 {
            return false;
        }

        let knights = b.pieces(Piece::Knight).popcnt();
        let bishops = b.pieces(Piece::Bishop).popcnt();
        if knights + bishops <= 1 {
            return true;
        }
        if knights > 0 {
            return false;
        }

        // Bishops only: drawn when they all live on one square color
        let mut parity: Option<usize> = None;
        for sq in *b.pieces(Piece::Bishop) {
            let p = (sq.get_file().to_index() + sq.get_rank().to_index()) % 2;
            match parity {
                None => parity = Some(p),
                Some(q) if q != p => return false,
                _ => {}
            }
        }
        true
    }

    /// Phase heuristic: early plies are the opening, then material decides
    /// between middlegame and endgame.
    pub fn phase(&self, plies_played: u32) -> GamePhase {
        if plies_played < 20 {
            return GamePhase::Opening;
        }

        let b = &self.board;
        let queens = b.pieces(Piece::Queen).popcnt();
        let rooks_and_minors = (b.pieces(Piece::Rook)
            | b.pieces(Piece::Knight)
            | b.pieces(Piece::Bishop))
        .popcnt();

        if queens == 0 && rooks_and_minors <= 4 {
            return GamePhase::Endgame;
        }
        if queens <= 1 && rooks_and_minors <= 6 {
            return GamePhase::Endgame;
        }
        GamePhase::Middlegame
    }

    /// Standard Algebraic Notation for a legal move, with `+`/`#` suffixes.
    pub fn san(&self, mv: ChessMove) -> Result<String> {
        if !self.board.legal(mv) {
            return Err(ArenaError::IllegalMove {
                attempted: mv.to_string(),
                position: self.to_fen(),
            });
        }
        let piece = match self.board.piece_on(mv.get_source()) {
            Some(p) => p,
            None => {
                return Err(ArenaError::IllegalMove {
                    attempted: mv.to_string(),
                    position: self.to_fen(),
                })
            }
        };

        // Castling is encoded as the king moving two files
        if piece == Piece::King {
            let from_file = mv.get_source().get_file().to_index() as i32;
            let to_file = mv.get_dest().get_file().to_index() as i32;
            if (from_file - to_file).abs() == 2 {
                let base = if to_file > from_file { "O-O" } else { "O-O-O" };
                return Ok(format!("{}{}", base, self.check_suffix(mv)));
            }
        }

        let capture = self.is_capture(mv);
        let dest = mv.get_dest().to_string();
        let mut san = String::new();

        if piece == Piece::Pawn {
            if capture {
                san.push(file_char(mv.get_source()));
                san.push('x');
            }
            san.push_str(&dest);
            if let Some(promo) = mv.get_promotion() {
                san.push('=');
                san.push(piece_letter(promo));
            }
        } else {
            san.push(piece_letter(piece));
            san.push_str(&self.disambiguation(mv, piece));
            if capture {
                san.push('x');
            }
            san.push_str(&dest);
        }

        san.push_str(self.check_suffix(mv));
        Ok(san)
    }

    fn check_suffix(&self, mv: ChessMove) -> &'static str {
        let after = self.board.make_move_new(mv);
        match after.status() {
            BoardStatus::Checkmate => "#",
            _ if after.checkers().popcnt() > 0 => "+",
            _ => "",
        }
    }

    fn disambiguation(&self, mv: ChessMove, piece: Piece) -> String {
        let mut ambiguous = false;
        let mut file_clashes = false;
        let mut rank_clashes = false;

        for other in MoveGen::new_legal(&self.board) {
            if other.get_dest() == mv.get_dest()
                && other.get_source() != mv.get_source()
                && self.board.piece_on(other.get_source()) == Some(piece)
            {
                ambiguous = true;
                if other.get_source().get_file() == mv.get_source().get_file() {
                    file_clashes = true;
                }
                if other.get_source().get_rank() == mv.get_source().get_rank() {
                    rank_clashes = true;
                }
            }
        }

        if !ambiguous {
            String::new()
        } else if !file_clashes {
            file_char(mv.get_source()).to_string()
        } else if !rank_clashes {
            rank_char(mv.get_source()).to_string()
        } else {
            mv.get_source().to_string()
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fen())
    }
}

/// Parse a UCI-style move token ("e2e4", "e7e8q"). Legality is the
/// caller's concern; this only checks the coordinates parse.
pub fn parse_uci(text: &str) -> Result<ChessMove> {
    let t = text.trim();
    if t.len() != 4 && t.len() != 5 {
        return Err(ArenaError::InvalidMoveText(t.to_string()));
    }

    let bytes = t.as_bytes();
    let src = square_from_bytes(bytes[0], bytes[1])
        .ok_or_else(|| ArenaError::InvalidMoveText(t.to_string()))?;
    let dst = square_from_bytes(bytes[2], bytes[3])
        .ok_or_else(|| ArenaError::InvalidMoveText(t.to_string()))?;
    let promotion = match bytes.get(4) {
        None => None,
        Some(b'q') => Some(Piece::Queen),
        Some(b'r') => Some(Piece::Rook),
        Some(b'b') => Some(Piece::Bishop),
        Some(b'n') => Some(Piece::Knight),
        Some(_) => return Err(ArenaError::InvalidMoveText(t.to_string())),
    };

    Ok(ChessMove::new(src, dst, promotion))
}

fn square_from_bytes(file: u8, rank: u8) -> Option<Square> {
    if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
        return None;
    }
    Some(Square::make_square(
        Rank::from_index((rank - b'1') as usize),
        File::from_index((file - b'a') as usize),
    ))
}

fn file_char(sq: Square) -> char {
    (b'a' + sq.get_file().to_index() as u8) as char
}

fn rank_char(sq: Square) -> char {
    (b'1' + sq.get_rank().to_index() as u8) as char
}

/// Uppercase SAN letter for a piece.
pub fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}
