use crate::rules::Position;
use chess::{BitBoard, Board, ChessMove, Color, File, MoveGen, Piece, Rank, Square};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Checkmate score magnitude. Mate in N plies scores `MATE_SCORE - N`,
/// so faster mates always outrank slower ones.
pub const MATE_SCORE: i32 = 10_000;

const INFINITY: i32 = 30_000;
const MAX_PLY: usize = 64;

/// Search limits. Depth and time are both honored; whichever trips first
/// ends the iteration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub max_depth: u32,
    pub max_time_ms: u64,
    pub quiescence_depth: u32,
    pub table_capacity: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_time_ms: 2_000,
            quiescence_depth: 6,
            table_capacity: 1 << 18,
        }
    }
}

impl SearchConfig {
    /// Shallow settings for latency-sensitive callers.
    pub fn fast() -> Self {
        Self {
            max_depth: 3,
            max_time_ms: 500,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Exact,
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    depth: u32,
    score: i32,
    bound: Bound,
    best_move: Option<ChessMove>,
}

/// Result of a full search from one position.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Centipawns from the side to move's point of view.
    pub score: i32,
    pub best_move: Option<ChessMove>,
    pub depth: u32,
    pub nodes: u64,
    pub pv: Vec<ChessMove>,
}

/// One root move with its score and continuation, for top-k ranking.
#[derive(Debug, Clone)]
pub struct RankedLine {
    pub mv: ChessMove,
    pub score: i32,
    pub pv: Vec<ChessMove>,
}

/// Alpha-beta searcher with a transposition table, killer moves, MVV-LVA
/// ordering and quiescence. Scores are centipawns from the mover's view.
pub struct SearchEngine {
    config: SearchConfig,
    table: HashMap<u64, TableEntry>,
    killers: Vec<[Option<ChessMove>; 2]>,
    nodes: u64,
    started: Instant,
    aborted: bool,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            table: HashMap::new(),
            killers: vec![[None; 2]; MAX_PLY],
            nodes: 0,
            started: Instant::now(),
            aborted: false,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Iterative-deepening search. An iteration cut short by the clock is
    /// discarded; the result always comes from a fully completed depth.
    pub fn search(&mut self, position: &Position) -> SearchOutcome {
        self.nodes = 0;
        self.aborted = false;
        self.started = Instant::now();
        self.killers = vec![[None; 2]; MAX_PLY];

        let board = *position.board();
        let mut best_score = 0;
        let mut best_move = None;
        let mut completed_depth = 0;

        for depth in 1..=self.config.max_depth {
            let elapsed = self.started.elapsed().as_millis() as u64;
            let remaining = self.config.max_time_ms.saturating_sub(elapsed);
            if depth > 1 && remaining < self.config.max_time_ms / 10 {
                break;
            }

            match self.search_root(&board, depth) {
                Some((score, mv)) => {
                    best_score = score;
                    best_move = mv;
                    completed_depth = depth;
                    if score.abs() >= MATE_SCORE - MAX_PLY as i32 {
                        break;
                    }
                }
                None => break,
            }
        }

        let pv = self.principal_variation(&board, completed_depth.max(1) as usize);
        SearchOutcome {
            score: best_score,
            best_move,
            depth: completed_depth,
            nodes: self.nodes,
            pv,
        }
    }

    /// Score every legal root move and return the best `limit` of them,
    /// strongest first. Runs a full search first so the table is warm.
    pub fn ranked_moves(&mut self, position: &Position, limit: usize) -> Vec<RankedLine> {
        let outcome = self.search(position);
        let board = *position.board();
        let depth = outcome.depth.max(1);

        // Fresh clock for the per-move pass
        self.started = Instant::now();
        self.aborted = false;

        let mut lines = Vec::new();
        for mv in MoveGen::new_legal(&board) {
            let child = board.make_move_new(mv);
            let score = if self.aborted {
                -evaluate(&child)
            } else {
                let searched = -self.negamax(&child, depth - 1, 1, -INFINITY, INFINITY);
                if self.aborted {
                    -evaluate(&child)
                } else {
                    searched
                }
            };

            let mut pv = vec![mv];
            pv.extend(self.principal_variation(&child, depth as usize));
            lines.push(RankedLine { mv, score, pv });
        }

        lines.sort_by(|a, b| b.score.cmp(&a.score));
        lines.truncate(limit);
        lines
    }

    pub fn clear_table(&mut self) {
        self.table.clear();
    }

    fn search_root(&mut self, board: &Board, depth: u32) -> Option<(i32, Option<ChessMove>)> {
        let moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
        if moves.is_empty() {
            let score = if board.checkers().popcnt() > 0 {
                -MATE_SCORE
            } else {
                0
            };
            return Some((score, None));
        }

        let mut alpha = -INFINITY;
        let beta = INFINITY;
        let mut best_move = None;

        for mv in self.order_moves(board, moves, 0) {
            let child = board.make_move_new(mv);
            let score = -self.negamax(&child, depth - 1, 1, -beta, -alpha);
            if self.aborted {
                return None;
            }
            if best_move.is_none() || score > alpha {
                alpha = score;
                best_move = Some(mv);
            }
        }

        self.store(board.get_hash(), depth, alpha, Bound::Exact, best_move);
        Some((alpha, best_move))
    }

    fn negamax(&mut self, board: &Board, depth: u32, ply: i32, mut alpha: i32, beta: i32) -> i32 {
        self.nodes += 1;
        if self.nodes % 1024 == 0 && self.over_budget() {
            self.aborted = true;
        }
        if self.aborted {
            return 0;
        }

        let moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
        if moves.is_empty() {
            return if board.checkers().popcnt() > 0 {
                -(MATE_SCORE - ply)
            } else {
                0
            };
        }
        if depth == 0 || ply as usize >= MAX_PLY - 1 {
            return self.quiescence(board, alpha, beta, self.config.quiescence_depth, ply);
        }

        let hash = board.get_hash();
        if let Some(entry) = self.table.get(&hash) {
            if entry.depth >= depth {
                match entry.bound {
                    Bound::Exact => return entry.score,
                    Bound::Lower if entry.score >= beta => return entry.score,
                    Bound::Upper if entry.score <= alpha => return entry.score,
                    _ => {}
                }
            }
        }

        let alpha_start = alpha;
        let mut best_score = -INFINITY;
        let mut best_move = None;

        for mv in self.order_moves(board, moves, ply as usize) {
            let child = board.make_move_new(mv);
            let score = -self.negamax(&child, depth - 1, ply + 1, -beta, -alpha);
            if self.aborted {
                return 0;
            }

            if score > best_score {
                best_score = score;
                best_move = Some(mv);
            }
            alpha = alpha.max(score);
            if alpha >= beta {
                if board.piece_on(mv.get_dest()).is_none() && mv.get_promotion().is_none() {
                    self.remember_killer(mv, ply as usize);
                }
                break;
            }
        }

        let bound = if best_score <= alpha_start {
            Bound::Upper
        } else if best_score >= beta {
            Bound::Lower
        } else {
            Bound::Exact
        };
        self.store(hash, depth, best_score, bound, best_move);
        best_score
    }

    fn quiescence(&mut self, board: &Board, mut alpha: i32, beta: i32, depth: u32, ply: i32) -> i32 {
        self.nodes += 1;
        if self.nodes % 1024 == 0 && self.over_budget() {
            self.aborted = true;
        }
        if self.aborted {
            return 0;
        }

        let moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
        if moves.is_empty() {
            return if board.checkers().popcnt() > 0 {
                -(MATE_SCORE - ply)
            } else {
                0
            };
        }

        let stand_pat = evaluate(board);
        if stand_pat >= beta {
            return stand_pat;
        }
        alpha = alpha.max(stand_pat);
        if depth == 0 || ply as usize >= MAX_PLY - 1 {
            return alpha;
        }

        let mut captures: Vec<ChessMove> = moves
            .into_iter()
            .filter(|mv| is_forcing(board, *mv))
            .collect();
        captures.sort_by_cached_key(|mv| capture_order_key(board, *mv));

        for mv in captures {
            // Delta pruning: skip captures that cannot lift the score
            if let Some(victim) = board.piece_on(mv.get_dest()) {
                if stand_pat + piece_value(victim) + 200 <= alpha {
                    continue;
                }
            }

            let child = board.make_move_new(mv);
            let score = -self.quiescence(&child, -beta, -alpha, depth - 1, ply + 1);
            if score > alpha {
                alpha = score;
                if alpha >= beta {
                    break;
                }
            }
        }

        alpha
    }

    fn order_moves(&self, board: &Board, mut moves: Vec<ChessMove>, ply: usize) -> Vec<ChessMove> {
        let table_move = self.table.get(&board.get_hash()).and_then(|e| e.best_move);
        let killer_set = self.killers.get(ply).copied().unwrap_or([None; 2]);

        moves.sort_by_cached_key(|mv| {
            let mut key = 0i32;
            if Some(*mv) == table_move {
                key -= 100_000;
            }
            if let Some(victim) = board.piece_on(mv.get_dest()) {
                let attacker = board.piece_on(mv.get_source()).map(piece_value).unwrap_or(0);
                key -= 10 * piece_value(victim) - attacker;
            }
            if mv.get_promotion().is_some() {
                key -= 800;
            }
            if killer_set.contains(&Some(*mv)) {
                key -= 500;
            }
            key
        });
        moves
    }

    fn remember_killer(&mut self, mv: ChessMove, ply: usize) {
        if let Some(slot) = self.killers.get_mut(ply) {
            if slot[0] != Some(mv) {
                slot[1] = slot[0];
                slot[0] = Some(mv);
            }
        }
    }

    fn store(&mut self, hash: u64, depth: u32, score: i32, bound: Bound, best_move: Option<ChessMove>) {
        // Mate scores are ply-relative and would poison other nodes
        if score.abs() >= MATE_SCORE - MAX_PLY as i32 {
            return;
        }
        if self.table.len() >= self.config.table_capacity {
            self.table.clear();
        }
        let replace = self
            .table
            .get(&hash)
            .map(|e| depth >= e.depth)
            .unwrap_or(true);
        if replace {
            self.table.insert(
                hash,
                TableEntry {
                    depth,
                    score,
                    bound,
                    best_move,
                },
            );
        }
    }

    fn principal_variation(&self, board: &Board, max_len: usize) -> Vec<ChessMove> {
        let mut pv = Vec::new();
        let mut current = *board;
        let mut seen = HashSet::new();

        while pv.len() < max_len {
            let hash = current.get_hash();
            if !seen.insert(hash) {
                break;
            }
            let mv = match self.table.get(&hash).and_then(|e| e.best_move) {
                Some(m) => m,
                None => break,
            };
            if !current.legal(mv) {
                break;
            }
            pv.push(mv);
            current = current.make_move_new(mv);
        }
        pv
    }

    fn over_budget(&self) -> bool {
        self.started.elapsed().as_millis() as u64 >= self.config.max_time_ms
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

/// Static evaluation in centipawns from the side to move's view.
pub fn static_evaluation(position: &Position) -> i32 {
    evaluate(position.board())
}

pub(crate) fn piece_value(piece: Piece) -> i32 {
    match piece {
        Piece::Pawn => 100,
        Piece::Knight => 320,
        Piece::Bishop => 330,
        Piece::Rook => 500,
        Piece::Queen => 900,
        Piece::King => 0,
    }
}

fn evaluate(board: &Board) -> i32 {
    let mut score = 0i32;

    for (piece, value) in [
        (Piece::Pawn, 100),
        (Piece::Knight, 320),
        (Piece::Bishop, 330),
        (Piece::Rook, 500),
        (Piece::Queen, 900),
    ] {
        let bb = board.pieces(piece);
        score += (bb & board.color_combined(Color::White)).popcnt() as i32 * value;
        score -= (bb & board.color_combined(Color::Black)).popcnt() as i32 * value;
    }

    score += positional_terms(board);

    if board.side_to_move() == Color::White {
        score
    } else {
        -score
    }
}

fn positional_terms(board: &Board) -> i32 {
    let mut score = 0i32;

    for sq in [Square::D4, Square::E4, Square::D5, Square::E5] {
        if board.piece_on(sq) == Some(Piece::Pawn) {
            match board.color_on(sq) {
                Some(Color::White) => score += 15,
                Some(Color::Black) => score -= 15,
                None => {}
            }
        }
    }

    for (color, sign) in [(Color::White, 1), (Color::Black, -1)] {
        let back_rank = if color == Color::White { 0 } else { 7 };

        let knights = board.pieces(Piece::Knight) & board.color_combined(color);
        for sq in knights {
            let f = sq.get_file().to_index();
            let r = sq.get_rank().to_index();
            if f == 0 || f == 7 || r == 0 || r == 7 {
                score -= 10 * sign;
            }
            if r != back_rank {
                score += 10 * sign;
            }
        }

        let bishops = board.pieces(Piece::Bishop) & board.color_combined(color);
        for sq in bishops {
            if sq.get_rank().to_index() != back_rank {
                score += 10 * sign;
            }
        }

        let rooks = board.pieces(Piece::Rook) & board.color_combined(color);
        for sq in rooks {
            if (board.pieces(Piece::Pawn) & file_mask(sq.get_file())).popcnt() == 0 {
                score += 20 * sign;
            }
        }

        let king = board.king_square(color);
        if king.get_rank().to_index() == back_rank {
            let f = king.get_file().to_index();
            if f >= 6 || f <= 2 {
                score += 20 * sign;
            }
        }
    }

    score
}

fn is_forcing(board: &Board, mv: ChessMove) -> bool {
    if board.piece_on(mv.get_dest()).is_some() || mv.get_promotion().is_some() {
        return true;
    }
    // En passant: pawn slides diagonally onto an empty square
    board.piece_on(mv.get_source()) == Some(Piece::Pawn)
        && mv.get_source().get_file() != mv.get_dest().get_file()
}

fn capture_order_key(board: &Board, mv: ChessMove) -> i32 {
    let victim = board.piece_on(mv.get_dest()).map(piece_value).unwrap_or(100);
    let attacker = board.piece_on(mv.get_source()).map(piece_value).unwrap_or(0);
    -(10 * victim - attacker)
}

fn file_mask(file: File) -> BitBoard {
    let mut mask = BitBoard::new(0);
    for rank in 0..8 {
        mask |= BitBoard::from_square(Square::make_square(Rank::from_index(rank), file));
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parse_uci;

    #[test]
    fn test_finds_mate_in_one() {
        let position =
            Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let mut engine = SearchEngine::new(SearchConfig {
            max_depth: 3,
            max_time_ms: 10_000,
            ..SearchConfig::default()
        });

        let outcome = engine.search(&position);
        assert_eq!(outcome.best_move, Some(parse_uci("a1a8").unwrap()));
        assert_eq!(outcome.score, MATE_SCORE - 1);
    }

    #[test]
    fn test_takes_hanging_queen() {
        let position = Position::from_fen("k7/8/3q4/8/8/8/3R4/K7 w - - 0 1").unwrap();
        let mut engine = SearchEngine::new(SearchConfig {
            max_depth: 3,
            max_time_ms: 10_000,
            ..SearchConfig::default()
        });

        let outcome = engine.search(&position);
        assert_eq!(outcome.best_move, Some(parse_uci("d2d6").unwrap()));
        assert!(outcome.score > 300);
    }

    #[test]
    fn test_terminal_positions_score() {
        let stalemate = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let mut engine = SearchEngine::default();
        let outcome = engine.search(&stalemate);
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.best_move, None);

        let mut fools = Position::initial();
        for uci in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            fools = fools.apply(parse_uci(uci).unwrap()).unwrap();
        }
        let outcome = engine.search(&fools);
        assert_eq!(outcome.score, -MATE_SCORE);
        assert_eq!(outcome.best_move, None);
    }

    #[test]
    fn test_ranked_moves_sorted_and_bounded() {
        let position = Position::initial();
        let mut engine = SearchEngine::new(SearchConfig {
            max_depth: 2,
            max_time_ms: 10_000,
            ..SearchConfig::default()
        });

        let lines = engine.ranked_moves(&position, 5);
        assert_eq!(lines.len(), 5);
        for pair in lines.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for line in &lines {
            assert_eq!(line.pv.first(), Some(&line.mv));
        }
    }

    #[test]
    fn test_static_evaluation_sign_flips_with_mover() {
        let white_up = Position::from_fen("k7/8/8/8/8/8/8/KR6 w - - 0 1").unwrap();
        let black_view = Position::from_fen("k7/8/8/8/8/8/8/KR6 b - - 0 1").unwrap();
        let w = static_evaluation(&white_up);
        let b = static_evaluation(&black_view);
        assert!(w > 0);
        assert_eq!(w, -b);
    }

    #[test]
    fn test_mate_in_one_line_in_ranked_moves() {
        let position =
            Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let mut engine = SearchEngine::new(SearchConfig {
            max_depth: 3,
            max_time_ms: 10_000,
            ..SearchConfig::default()
        });

        let lines = engine.ranked_moves(&position, 3);
        assert_eq!(lines[0].mv, parse_uci("a1a8").unwrap());
        assert_eq!(lines[0].score, MATE_SCORE - 1);
    }
}
