use crate::game::PlayerSide;
use crate::oracle::{QualityTier, RankedMove};
use crate::rules::{GamePhase, Position};
use crate::themes::{analyze_position, ThemeReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Moments in a game that deserve a spoken line, most dramatic first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentaryTrigger {
    GameStart,
    Checkmate,
    Blunder,
    Brilliant,
    CriticalMistake,
    MissedWin,
    Tactical,
    DefensiveBrilliance,
    Sacrifice,
    PositionalMasterclass,
}

impl CommentaryTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentaryTrigger::GameStart => "game_start",
            CommentaryTrigger::Checkmate => "checkmate",
            CommentaryTrigger::Blunder => "blunder",
            CommentaryTrigger::Brilliant => "brilliant",
            CommentaryTrigger::CriticalMistake => "critical_mistake",
            CommentaryTrigger::MissedWin => "missed_win",
            CommentaryTrigger::Tactical => "tactical",
            CommentaryTrigger::DefensiveBrilliance => "defensive_brilliance",
            CommentaryTrigger::Sacrifice => "sacrifice",
            CommentaryTrigger::PositionalMasterclass => "positional_masterclass",
        }
    }
}

impl fmt::Display for CommentaryTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the detector sees for one played move. Evaluations are in
/// centipawns: `eval_before` from the mover's view, `eval_after` from
/// the reply side's view.
#[derive(Debug, Clone)]
pub struct CommentaryContext {
    pub side: PlayerSide,
    pub san: String,
    /// Full-move number at the time of the move.
    pub move_number: u32,
    pub quality: Option<QualityTier>,
    pub cp_loss: Option<i32>,
    pub eval_before: Option<i32>,
    pub eval_after: Option<i32>,
    pub is_best: bool,
    pub is_checkmate: bool,
    /// The mover was in check before playing.
    pub was_in_check: bool,
}

impl CommentaryContext {
    /// Absolute evaluation change with both numbers brought into the
    /// same perspective.
    pub fn eval_swing(&self) -> Option<i32> {
        match (self.eval_before, self.eval_after) {
            (Some(before), Some(after)) => Some((after - (-before)).abs()),
            _ => None,
        }
    }
}

/// A line of commentary ready for the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commentary {
    pub trigger: CommentaryTrigger,
    pub priority: u8,
    pub text: String,
    pub motif: Option<String>,
}

/// Narrative payload for one ply: the triggered line plus the position
/// context a commentator draws on.
#[derive(Debug, Clone)]
pub struct CommentaryScene {
    pub commentary: Option<Commentary>,
    pub phase: GamePhase,
    /// Material in centipawns, positive for White.
    pub material_balance: i32,
    pub themes: ThemeReport,
    /// The engine's pick, present when the played move was not it.
    pub best_alternative: Option<RankedMove>,
}

/// Decides which moves deserve commentary. `threshold` is the minimum
/// centipawn change considered interesting.
pub struct TriggerDetector {
    threshold: i32,
}

impl TriggerDetector {
    pub fn new(threshold: i32) -> Self {
        debug!(threshold, "trigger detector ready");
        Self { threshold }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn opening_remark(&self, white: &str, black: &str) -> Commentary {
        Commentary {
            trigger: CommentaryTrigger::GameStart,
            priority: 5,
            text: format!("A new game begins between {} and {}.", white, black),
            motif: None,
        }
    }

    /// The trigger checks run in drama order, so the loudest applicable
    /// one wins.
    pub fn detect(&self, context: &CommentaryContext) -> Option<Commentary> {
        // Without evaluation data only the mate itself is worth a line
        if context.quality.is_none() && context.cp_loss.is_none() {
            if context.is_checkmate {
                return Some(self.build(context, CommentaryTrigger::Checkmate, 10, None));
            }
            return None;
        }

        let cp_loss = context.cp_loss.unwrap_or(0);
        let eval_swing = context.eval_swing();

        if context.quality == Some(QualityTier::Blunder) || cp_loss > 300 {
            return Some(self.build(context, CommentaryTrigger::Blunder, 9, None));
        }
        if context.is_checkmate {
            return Some(self.build(context, CommentaryTrigger::Checkmate, 10, None));
        }
        if context.is_best && eval_swing.map_or(false, |s| s > 200) {
            return Some(self.build(context, CommentaryTrigger::Brilliant, 8, None));
        }
        if let (Some(after), Some(before)) = (context.eval_after, context.eval_before) {
            // Clearly winning before the move, not winning after it
            let kept = -after;
            if before > 500 && kept < 500 && before - kept > self.threshold {
                return Some(self.build(context, CommentaryTrigger::MissedWin, 7, None));
            }
            // Balanced position turned decisive in one move
            if after.abs() > 500 && before.abs() < 200 {
                return Some(self.build(context, CommentaryTrigger::CriticalMistake, 8, None));
            }
        }
        if (context.quality == Some(QualityTier::Mistake) || (cp_loss > 100 && cp_loss <= 300))
            && cp_loss > self.threshold
        {
            return Some(self.build(context, CommentaryTrigger::CriticalMistake, 6, None));
        }
        if let Some(motif) = tactical_motif(context, eval_swing) {
            return Some(self.build(context, CommentaryTrigger::Tactical, 7, Some(motif)));
        }
        if context.quality == Some(QualityTier::Excellent) && context.was_in_check {
            return Some(self.build(context, CommentaryTrigger::DefensiveBrilliance, 7, None));
        }
        if context.san.contains('x') && eval_swing.map_or(false, |s| s > 150) {
            return Some(self.build(context, CommentaryTrigger::Sacrifice, 7, None));
        }
        if eval_swing.map_or(false, |s| s > self.threshold * 2) {
            return Some(self.build(
                context,
                CommentaryTrigger::PositionalMasterclass,
                4,
                None,
            ));
        }
        None
    }

    /// Assembles the full narrative payload for a played move from the
    /// resulting position.
    pub fn build_scene(
        &self,
        context: &CommentaryContext,
        after: &Position,
        plies_played: u32,
        best_alternative: Option<RankedMove>,
    ) -> CommentaryScene {
        CommentaryScene {
            commentary: self.detect(context),
            phase: after.phase(plies_played),
            material_balance: after.material_balance(),
            themes: analyze_position(after),
            best_alternative: best_alternative.filter(|_| !context.is_best),
        }
    }

    fn build(
        &self,
        context: &CommentaryContext,
        trigger: CommentaryTrigger,
        priority: u8,
        motif: Option<String>,
    ) -> Commentary {
        let text = render(context, trigger, motif.as_deref());
        Commentary {
            trigger,
            priority,
            text,
            motif,
        }
    }
}

impl Default for TriggerDetector {
    fn default() -> Self {
        Self::new(50)
    }
}

fn tactical_motif(context: &CommentaryContext, eval_swing: Option<i32>) -> Option<String> {
    let san = context.san.as_str();
    let is_capture = san.contains('x');

    if is_capture
        && matches!(
            context.quality,
            Some(QualityTier::Excellent) | Some(QualityTier::Good)
        )
    {
        let motif = match san.chars().next() {
            Some('N') => "knight_fork",
            Some('B') => "bishop_attack",
            Some('Q') => "queen_domination",
            _ => "tactical_capture",
        };
        return Some(motif.to_string());
    }
    if !is_capture && eval_swing.map_or(false, |s| s > 150) {
        return Some("discovered_attack".to_string());
    }
    if san.contains('+') {
        return Some("check_attack".to_string());
    }
    if san.contains('#') {
        return Some("checkmate_sequence".to_string());
    }
    if (san == "O-O" || san == "O-O-O") && context.move_number > 15 {
        return Some("delayed_castling".to_string());
    }
    None
}

fn render(context: &CommentaryContext, trigger: CommentaryTrigger, motif: Option<&str>) -> String {
    let side = match context.side {
        PlayerSide::White => "White",
        PlayerSide::Black => "Black",
    };
    let san = &context.san;
    match trigger {
        CommentaryTrigger::GameStart => "A new game begins.".to_string(),
        CommentaryTrigger::Checkmate => {
            format!("{} delivers checkmate with {}. The game is over.", side, san)
        }
        CommentaryTrigger::Blunder => format!(
            "{} plays {}, and this is a serious error, giving up {} centipawns.",
            side,
            san,
            context.cp_loss.unwrap_or(0)
        ),
        CommentaryTrigger::Brilliant => format!(
            "{} unleashes {}! The best move on the board, and the advantage swings by {} centipawns.",
            side,
            san,
            context.eval_swing().unwrap_or(0)
        ),
        CommentaryTrigger::CriticalMistake => format!(
            "A critical moment: after {}'s {}, the balance tips sharply.",
            side, san
        ),
        CommentaryTrigger::MissedWin => format!(
            "{} had the win in hand, but {} lets it slip away.",
            side, san
        ),
        CommentaryTrigger::Tactical => match motif {
            Some(motif) => format!(
                "{} plays {} with a {} in the air.",
                side,
                san,
                motif.replace('_', " ")
            ),
            None => format!("{} plays {}, and the tactics begin.", side, san),
        },
        CommentaryTrigger::DefensiveBrilliance => format!(
            "Under pressure, {} finds {}. Precise defense.",
            side, san
        ),
        CommentaryTrigger::Sacrifice => format!(
            "{} offers material with {}. The initiative is worth more than the piece.",
            side, san
        ),
        CommentaryTrigger::PositionalMasterclass => format!(
            "{} improves the position with {}, a move of quiet strength.",
            side, san
        ),
    }
}
