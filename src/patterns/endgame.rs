//! Rook-endgame detectors: Lucena and Philidor positions.
//!
//! Both inspect only the final board of the game. The checks are
//! structural material shapes, not exact square-by-square matches: Lucena
//! is "rook and pawn against rook" from the stronger side, Philidor is the
//! defender's rook holding against rook and pawn, with the pawn already on
//! the sixth (White) or third (Black) rank. The rank-only Philidor check
//! is a deliberately weak approximation.

use super::{DetectionResult, PatternDetector, PatternType, SuccessOutcome, outcome_for};
use crate::fen;
use crate::pgn::MoveFeature;
use crate::types::{Board, Color, GameResult, PieceKind};
use serde_json::json;

/// Piece counts for one side, used for endgame-shape matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Material {
    pawns: usize,
    rooks: usize,
    minors: usize,
    queens: usize,
}

impl Material {
    fn of(board: &Board, color: Color) -> Self {
        Self {
            pawns: board.count(color, PieceKind::Pawn),
            rooks: board.count(color, PieceKind::Rook),
            minors: board.count(color, PieceKind::Bishop) + board.count(color, PieceKind::Knight),
            queens: board.count(color, PieceKind::Queen),
        }
    }

    /// Exactly one rook and one pawn, nothing else beyond the king.
    fn is_rook_and_pawn(self) -> bool {
        self.pawns == 1 && self.rooks == 1 && self.minors == 0 && self.queens == 0
    }

    /// Exactly one rook, no pawns, nothing else beyond the king.
    fn is_bare_rook(self) -> bool {
        self.pawns == 0 && self.rooks == 1 && self.minors == 0 && self.queens == 0
    }
}

/// Parses the final position of a game, if it has any moves.
fn final_position(moves: &[MoveFeature]) -> Option<(Board, u32)> {
    let last = moves.last()?;
    let (board, _) = fen::parse(&last.fen_after).ok()?;
    Some((board, last.ply_number))
}

// ---------------------------------------------------------------------------
// Lucena
// ---------------------------------------------------------------------------

pub struct LucenaDetector;

impl PatternDetector for LucenaDetector {
    fn pattern_id(&self) -> &'static str {
        "lucena_position"
    }

    fn pattern_name(&self) -> &'static str {
        "Lucena position"
    }

    fn pattern_type(&self) -> PatternType {
        PatternType::Endgame
    }

    fn detect(&self, moves: &[MoveFeature], _result: GameResult) -> DetectionResult {
        let Some((board, last_ply)) = final_position(moves) else {
            return DetectionResult::negative();
        };

        for color in [Color::White, Color::Black] {
            let own = Material::of(&board, color);
            let theirs = Material::of(&board, color.opponent());
            if own.is_rook_and_pawn()
                && theirs.pawns == 0
                && theirs.minors == 0
                && theirs.queens == 0
            {
                return DetectionResult {
                    detected: true,
                    confidence: 0.6,
                    initiating_color: Some(color),
                    start_ply: None,
                    end_ply: Some(last_ply),
                    metadata: json!({
                        "material": board.material_signature(),
                        "defender_rooks": theirs.rooks,
                    }),
                };
            }
        }
        DetectionResult::negative()
    }

    fn classify_success(
        &self,
        detection: &DetectionResult,
        result: GameResult,
    ) -> (bool, SuccessOutcome) {
        let Some(color) = detection.initiating_color else {
            return (false, SuccessOutcome::DrawNeutral);
        };
        // The stronger side succeeds by not losing the ending.
        let outcome = outcome_for(color, result, true);
        let success = matches!(
            outcome,
            SuccessOutcome::Victory | SuccessOutcome::DrawAdvantage
        );
        (success, outcome)
    }
}

// ---------------------------------------------------------------------------
// Philidor
// ---------------------------------------------------------------------------

pub struct PhilidorDetector;

impl PhilidorDetector {
    /// The attacking pawn's required rank: sixth for White, third for
    /// Black (0-based 5 and 2).
    fn pawn_on_critical_rank(board: &Board, attacker: Color) -> bool {
        let required = match attacker {
            Color::White => 5,
            Color::Black => 2,
        };
        board
            .occupied()
            .any(|(sq, p)| p.kind == PieceKind::Pawn && p.color == attacker && sq.rank == required)
    }
}

impl PatternDetector for PhilidorDetector {
    fn pattern_id(&self) -> &'static str {
        "philidor_position"
    }

    fn pattern_name(&self) -> &'static str {
        "Philidor position"
    }

    fn pattern_type(&self) -> PatternType {
        PatternType::Endgame
    }

    fn detect(&self, moves: &[MoveFeature], _result: GameResult) -> DetectionResult {
        let Some((board, last_ply)) = final_position(moves) else {
            return DetectionResult::negative();
        };

        for attacker in [Color::White, Color::Black] {
            let defender = attacker.opponent();
            let attacking = Material::of(&board, attacker);
            let defending = Material::of(&board, defender);

            if attacking.is_rook_and_pawn()
                && defending.is_bare_rook()
                && Self::pawn_on_critical_rank(&board, attacker)
            {
                return DetectionResult {
                    detected: true,
                    confidence: 0.5,
                    // The pattern belongs to the defending side.
                    initiating_color: Some(defender),
                    start_ply: None,
                    end_ply: Some(last_ply),
                    metadata: json!({
                        "material": board.material_signature(),
                        "attacker": attacker,
                    }),
                };
            }
        }
        DetectionResult::negative()
    }

    fn classify_success(
        &self,
        detection: &DetectionResult,
        result: GameResult,
    ) -> (bool, SuccessOutcome) {
        let Some(defender) = detection.initiating_color else {
            return (false, SuccessOutcome::DrawNeutral);
        };
        // The defence succeeds only by holding the draw.
        let outcome = outcome_for(defender, result, true);
        (result == GameResult::Draw, outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
