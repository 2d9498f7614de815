use crate::game::PlayerSide;
use crate::rules::Position;
use chess::{BitBoard, Board, Color, File, Piece, Rank, Square};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The twelve extended-center squares used for space counting.
const EXTENDED_CENTER: [Square; 12] = [
    Square::D4,
    Square::E4,
    Square::D5,
    Square::E5,
    Square::C3,
    Square::F3,
    Square::C4,
    Square::F4,
    Square::C5,
    Square::F5,
    Square::C6,
    Square::F6,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KingSafety {
    Safe,
    Moderate,
    Exposed,
}

/// Strategic observations about a position, phrased for commentary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeReport {
    pub white_themes: Vec<String>,
    pub black_themes: Vec<String>,
    pub general_themes: Vec<String>,
}

impl ThemeReport {
    pub fn is_empty(&self) -> bool {
        self.white_themes.is_empty() && self.black_themes.is_empty() && self.general_themes.is_empty()
    }

    /// Natural-language summary for one side, general notes included.
    pub fn describe(&self, side: PlayerSide) -> String {
        let (label, themes) = match side {
            PlayerSide::White => ("White", &self.white_themes),
            PlayerSide::Black => ("Black", &self.black_themes),
        };
        if themes.is_empty() && self.general_themes.is_empty() {
            return "The position is balanced".to_string();
        }
        let mut parts = Vec::new();
        if !themes.is_empty() {
            parts.push(format!("{} has {}", label, themes.join(", ")));
        }
        if !self.general_themes.is_empty() {
            parts.push(self.general_themes.join(", "));
        }
        format!("{}.", parts.join(". "))
    }
}

/// Scan a position for pawn-structure, piece-placement, and king-safety
/// themes for both sides.
pub fn analyze_position(position: &Position) -> ThemeReport {
    let board = position.board();
    let mut report = ThemeReport::default();

    if let Some(square) = isolated_pawns(board, Color::White).first() {
        report
            .white_themes
            .push(format!("isolated pawn on {}", square));
    }
    if let Some(square) = isolated_pawns(board, Color::Black).first() {
        report
            .black_themes
            .push(format!("isolated pawn on {}", square));
    }

    if let Some(square) = bad_bishop(board, Color::White) {
        report.white_themes.push(format!("bad bishop on {}", square));
    }
    if let Some(square) = bad_bishop(board, Color::Black) {
        report.black_themes.push(format!("bad bishop on {}", square));
    }

    let white_sevenths = rooks_on_seventh(board, Color::White);
    if !white_sevenths.is_empty() {
        report
            .white_themes
            .push(format!("rook on 7th rank ({})", square_list(&white_sevenths)));
    }
    let black_sevenths = rooks_on_seventh(board, Color::Black);
    if !black_sevenths.is_empty() {
        report
            .black_themes
            .push(format!("rook on 2nd rank ({})", square_list(&black_sevenths)));
    }

    let space_white = space_control(board, Color::White);
    let space_black = space_control(board, Color::Black);
    if space_white > space_black + 3 {
        report
            .white_themes
            .push("significant space advantage".to_string());
    } else if space_black > space_white + 3 {
        report
            .black_themes
            .push("significant space advantage".to_string());
    }

    if king_safety(board, Color::White) == KingSafety::Exposed {
        report.white_themes.push("exposed king position".to_string());
    }
    if king_safety(board, Color::Black) == KingSafety::Exposed {
        report.black_themes.push("exposed king position".to_string());
    }

    let active_white = active_piece_count(board, Color::White);
    let active_black = active_piece_count(board, Color::Black);
    if active_white > active_black + 2 {
        report
            .white_themes
            .push("superior piece activity".to_string());
    } else if active_black > active_white + 2 {
        report
            .black_themes
            .push("superior piece activity".to_string());
    }

    let white_passed = passed_pawns(board, Color::White);
    if !white_passed.is_empty() {
        report
            .white_themes
            .push(format!("passed pawn on {}", square_list(&white_passed)));
    }
    let black_passed = passed_pawns(board, Color::Black);
    if !black_passed.is_empty() {
        report
            .black_themes
            .push(format!("passed pawn on {}", square_list(&black_passed)));
    }

    if let Some(file) = doubled_pawn_files(board, Color::White).first() {
        report
            .white_themes
            .push(format!("doubled pawns on {}-file", file_letter(*file)));
    }
    if let Some(file) = doubled_pawn_files(board, Color::Black).first() {
        report
            .black_themes
            .push(format!("doubled pawns on {}-file", file_letter(*file)));
    }

    if position.legal_move_count() < 10 {
        report.general_themes.push("cramped position".to_string());
    }
    if position.in_check() {
        report.general_themes.push("king under check".to_string());
    }

    debug!(
        white = report.white_themes.len(),
        black = report.black_themes.len(),
        general = report.general_themes.len(),
        "strategic analysis"
    );
    report
}

/// Shield pawns ahead of the king versus enemy pieces crowding it.
pub fn king_safety(board: &Board, color: Color) -> KingSafety {
    let king_square = board.king_square(color);
    let king_file = king_square.get_file().to_index() as i32;
    let king_rank = king_square.get_rank().to_index() as i32;
    let shield_rank = if color == Color::White {
        king_rank + 1
    } else {
        king_rank - 1
    };

    let mut shield = 0;
    if (0..8).contains(&shield_rank) {
        for offset in [-1i32, 0, 1] {
            let file = king_file + offset;
            if !(0..8).contains(&file) {
                continue;
            }
            let square = Square::make_square(
                Rank::from_index(shield_rank as usize),
                File::from_index(file as usize),
            );
            if board.piece_on(square) == Some(Piece::Pawn) && board.color_on(square) == Some(color)
            {
                shield += 1;
            }
        }
    }

    // Nearby enemy pieces only count while the king square is attacked
    let mut attackers = 0;
    if attacker_count(board, king_square, !color) > 0 {
        for square in *board.color_combined(!color) {
            if chebyshev(square, king_square) <= 2 {
                attackers += 1;
            }
        }
    }

    if shield >= 2 && attackers == 0 {
        KingSafety::Safe
    } else if shield >= 1 || attackers <= 1 {
        KingSafety::Moderate
    } else {
        KingSafety::Exposed
    }
}

/// Number of `color` pieces attacking `square`, pins ignored.
fn attacker_count(board: &Board, square: Square, color: Color) -> usize {
    let mut count = 0;

    let pawns = board.pieces(Piece::Pawn) & board.color_combined(color);
    count += chess::get_pawn_attacks(square, !color, pawns).popcnt() as usize;

    let knights = board.pieces(Piece::Knight) & board.color_combined(color);
    count += (chess::get_knight_moves(square) & knights).popcnt() as usize;

    let kings = board.pieces(Piece::King) & board.color_combined(color);
    count += (chess::get_king_moves(square) & kings).popcnt() as usize;

    let all_pieces = *board.combined();
    let bishops_queens = (board.pieces(Piece::Bishop) | board.pieces(Piece::Queen))
        & board.color_combined(color);
    count += (chess::get_bishop_moves(square, all_pieces) & bishops_queens).popcnt() as usize;

    let rooks_queens =
        (board.pieces(Piece::Rook) | board.pieces(Piece::Queen)) & board.color_combined(color);
    count += (chess::get_rook_moves(square, all_pieces) & rooks_queens).popcnt() as usize;

    count
}

fn pawns_of(board: &Board, color: Color) -> BitBoard {
    board.pieces(Piece::Pawn) & board.color_combined(color)
}

fn isolated_pawns(board: &Board, color: Color) -> Vec<Square> {
    let pawns = pawns_of(board, color);
    let mut isolated = Vec::new();
    for square in pawns {
        let file = square.get_file().to_index() as i32;
        let mut has_neighbor = false;
        for adjacent in [file - 1, file + 1] {
            if (0..8).contains(&adjacent)
                && (pawns & file_mask(adjacent as usize)).popcnt() > 0
            {
                has_neighbor = true;
            }
        }
        if !has_neighbor {
            isolated.push(square);
        }
    }
    isolated
}

/// A bishop hemmed in by four or more own pawns on its square color.
fn bad_bishop(board: &Board, color: Color) -> Option<Square> {
    let bishops = board.pieces(Piece::Bishop) & board.color_combined(color);
    let pawns = pawns_of(board, color);
    for bishop_square in bishops {
        let parity = square_parity(bishop_square);
        let blocking = pawns
            .into_iter()
            .filter(|p| square_parity(*p) == parity)
            .count();
        if blocking >= 4 {
            return Some(bishop_square);
        }
    }
    None
}

fn rooks_on_seventh(board: &Board, color: Color) -> Vec<Square> {
    let target_rank = if color == Color::White { 6 } else { 1 };
    let rooks = board.pieces(Piece::Rook) & board.color_combined(color);
    rooks
        .into_iter()
        .filter(|square| square.get_rank().to_index() == target_rank)
        .collect()
}

/// Extended-center squares this side attacks at least once.
fn space_control(board: &Board, color: Color) -> u32 {
    EXTENDED_CENTER
        .iter()
        .filter(|square| attacker_count(board, **square, color) > 0)
        .count() as u32
}

fn active_piece_count(board: &Board, color: Color) -> u32 {
    let back_rank = if color == Color::White { 0 } else { 7 };
    let mut active = 0;
    for piece in [Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen] {
        let pieces = board.pieces(piece) & board.color_combined(color);
        for square in pieces {
            if square.get_rank().to_index() != back_rank {
                active += 1;
            }
        }
    }
    active
}

/// Pawns with no enemy pawn ahead on the same or an adjacent file.
fn passed_pawns(board: &Board, color: Color) -> Vec<Square> {
    let pawns = pawns_of(board, color);
    let enemy_pawns = pawns_of(board, !color);
    let mut passed = Vec::new();
    for square in pawns {
        let file = square.get_file().to_index() as i32;
        let rank = square.get_rank().to_index() as i32;
        let mut blocked = false;
        for enemy in enemy_pawns {
            let enemy_file = enemy.get_file().to_index() as i32;
            let enemy_rank = enemy.get_rank().to_index() as i32;
            if (enemy_file - file).abs() <= 1 {
                let ahead = if color == Color::White {
                    enemy_rank > rank
                } else {
                    enemy_rank < rank
                };
                if ahead {
                    blocked = true;
                    break;
                }
            }
        }
        if !blocked {
            passed.push(square);
        }
    }
    passed
}

fn doubled_pawn_files(board: &Board, color: Color) -> Vec<usize> {
    let pawns = pawns_of(board, color);
    (0..8)
        .filter(|file| (pawns & file_mask(*file)).popcnt() >= 2)
        .collect()
}

fn square_parity(square: Square) -> usize {
    (square.get_file().to_index() + square.get_rank().to_index()) % 2
}

fn chebyshev(a: Square, b: Square) -> i32 {
    let file_diff = (a.get_file().to_index() as i32 - b.get_file().to_index() as i32).abs();
    let rank_diff = (a.get_rank().to_index() as i32 - b.get_rank().to_index() as i32).abs();
    file_diff.max(rank_diff)
}

fn file_mask(file: usize) -> BitBoard {
    let mut mask = BitBoard::new(0);
    for rank in 0..8 {
        mask |= BitBoard::from_square(Square::make_square(
            Rank::from_index(rank),
            File::from_index(file),
        ));
    }
    mask
}

fn file_letter(file: usize) -> char {
    (b'a' + file as u8) as char
}

fn square_list(squares: &[Square]) -> String {
    squares
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(fen: &str) -> Position {
        Position::from_fen(fen).unwrap()
    }

    #[test]
    fn test_starting_position_is_balanced() {
        let report = analyze_position(&Position::initial());
        assert!(report.is_empty());
        assert_eq!(report.describe(PlayerSide::White), "The position is balanced");
    }

    #[test]
    fn test_isolated_and_passed_pawn_detection() {
        let report = analyze_position(&position("4k3/8/8/P7/8/8/3PP3/4K3 w - - 0 1"));
        assert!(report
            .white_themes
            .iter()
            .any(|t| t == "isolated pawn on a5"));
        assert!(report
            .white_themes
            .iter()
            .any(|t| t.starts_with("passed pawn on") && t.contains("a5")));
    }

    #[test]
    fn test_doubled_pawns_detection() {
        let report = analyze_position(&position("4k3/8/8/8/8/2P5/2P5/4K3 w - - 0 1"));
        assert!(report
            .white_themes
            .iter()
            .any(|t| t == "doubled pawns on c-file"));
    }

    #[test]
    fn test_rooks_on_seventh_and_second() {
        let white = analyze_position(&position("4k3/R7/8/8/8/8/8/4K3 w - - 0 1"));
        assert!(white
            .white_themes
            .iter()
            .any(|t| t == "rook on 7th rank (a7)"));

        let black = analyze_position(&position("4k3/8/8/8/8/8/r7/4K3 b - - 0 1"));
        assert!(black
            .black_themes
            .iter()
            .any(|t| t == "rook on 2nd rank (a2)"));
    }

    #[test]
    fn test_bad_bishop_counts_same_color_pawns() {
        // Bishop on c1 with pawns b2, d2, f2, h2 all on dark squares
        let report = analyze_position(&position("4k3/8/8/8/8/8/1P1P1P1P/2B1K3 w - - 0 1"));
        assert!(report.white_themes.iter().any(|t| t == "bad bishop on c1"));
    }

    #[test]
    fn test_space_and_activity_advantages() {
        let report = analyze_position(&position("4k3/8/8/8/2PPPP2/2NBBN2/8/R3K2R w - - 0 1"));
        assert!(report
            .white_themes
            .iter()
            .any(|t| t == "significant space advantage"));
        assert!(report
            .white_themes
            .iter()
            .any(|t| t == "superior piece activity"));
    }

    #[test]
    fn test_king_safety_grades() {
        let castled = position("4k3/8/8/8/8/8/5PPP/6K1 w - - 0 1");
        assert_eq!(king_safety(castled.board(), Color::White), KingSafety::Safe);

        let crowded = position("4k3/8/4q3/8/4K3/8/3r4/8 w - - 0 1");
        assert_eq!(king_safety(crowded.board(), Color::White), KingSafety::Exposed);
    }

    #[test]
    fn test_cramped_and_check_are_general_themes() {
        let mated = position("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 0 3");
        let report = analyze_position(&mated);
        assert!(report.general_themes.iter().any(|t| t == "cramped position"));
        assert!(report.general_themes.iter().any(|t| t == "king under check"));
    }

    #[test]
    fn test_describe_formats_sides_separately() {
        let report = ThemeReport {
            white_themes: vec!["isolated pawn on a5".to_string()],
            black_themes: Vec::new(),
            general_themes: vec!["cramped position".to_string()],
        };
        assert_eq!(
            report.describe(PlayerSide::White),
            "White has isolated pawn on a5. cramped position."
        );
        assert_eq!(report.describe(PlayerSide::Black), "cramped position.");
    }
}
