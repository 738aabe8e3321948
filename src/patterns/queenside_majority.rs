//! Queenside-majority attack detector.
//!
//! Detects the classic plan of converting a queenside pawn majority:
//! holding the majority over several plies, pushing the zone pawns, and
//! cashing in a passed pawn or structural damage. The reduction parses the
//! before/after FEN of every move and accumulates per-color evidence; the
//! side with the stronger claim (White first) is emitted.

use super::zone_stats::ZoneStats;
use super::{DetectionResult, PatternDetector, PatternType, SuccessOutcome, outcome_for};
use crate::fen;
use crate::pawns::{self, Zone};
use crate::pgn::MoveFeature;
use crate::types::{Color, GameResult};
use serde_json::json;

/// Minimum plies the majority must hold.
const MIN_MAJORITY_SPAN: u32 = 3;
/// Minimum zone pawn pushes.
const MIN_PUSHES: usize = 2;

pub struct QueensideMajorityDetector;

impl QueensideMajorityDetector {
    /// Reduces the move list into per-color campaign stats.
    fn gather(moves: &[MoveFeature]) -> [(Color, ZoneStats); 2] {
        let mut white = ZoneStats::default();
        let mut black = ZoneStats::default();

        for feature in moves {
            let (Ok((before, _)), Ok((after, _))) = (
                fen::parse(&feature.fen_before),
                fen::parse(&feature.fen_after),
            ) else {
                continue;
            };

            for (color, stats) in [(Color::White, &mut white), (Color::Black, &mut black)] {
                let majority = pawns::has_zone_majority(&after, Zone::Queenside, color);
                stats.update(
                    feature.ply_number,
                    &before,
                    &after,
                    color,
                    Zone::Queenside,
                    majority,
                );
            }
        }

        [(Color::White, white), (Color::Black, black)]
    }

    fn qualifies(stats: &ZoneStats) -> bool {
        stats.span >= MIN_MAJORITY_SPAN
            && stats.pushes.len() >= MIN_PUSHES
            && (stats.passed_created
                || stats.opponent_pawn_removed
                || stats.pushes.len() >= MIN_PUSHES)
    }

    fn confidence(stats: &ZoneStats, color: Color) -> f64 {
        let mut confidence = 0.55;
        confidence += (0.05 * stats.span as f64).min(0.25);
        confidence += (0.08 * stats.pushes.len() as f64).min(0.20);
        if stats.opponent_pawn_removed {
            confidence += 0.10;
        }
        if stats.passed_created {
            confidence += 0.15;
        }
        confidence += (0.05 * stats.opponent_island_delta as f64).min(0.10);
        if stats.crossed_midline(color) {
            confidence += 0.10;
        }
        confidence.min(1.0)
    }

    fn emit(color: Color, stats: &ZoneStats) -> DetectionResult {
        DetectionResult {
            detected: true,
            confidence: Self::confidence(stats, color),
            initiating_color: Some(color),
            start_ply: stats.first_span_ply,
            end_ply: stats.last_span_ply,
            metadata: json!({
                "push_count": stats.pushes.len(),
                "passed_pawn_created": stats.passed_created,
                "opponent_pawn_removed": stats.opponent_pawn_removed,
                "opponent_island_delta": stats.opponent_island_delta,
                "majority_span": stats.span,
                "pushes": stats.pushes_json(),
            }),
        }
    }
}

impl PatternDetector for QueensideMajorityDetector {
    fn pattern_id(&self) -> &'static str {
        "queenside_majority_attack"
    }

    fn pattern_name(&self) -> &'static str {
        "Queenside majority attack"
    }

    fn pattern_type(&self) -> PatternType {
        PatternType::Strategic
    }

    fn detect(&self, moves: &[MoveFeature], _result: GameResult) -> DetectionResult {
        for (color, stats) in Self::gather(moves) {
            if Self::qualifies(&stats) {
                return Self::emit(color, &stats);
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
        let outcome = outcome_for(color, result, false);
        let success = matches!(
            outcome,
            SuccessOutcome::Victory | SuccessOutcome::DrawAdvantage
        );
        (success, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::features_from;

    /// White runs a 3-vs-2 queenside majority: b5, then bxa6 creating a
    /// passed pawn and removing a defender.
    fn majority_game() -> Vec<MoveFeature> {
        features_from(
            "6k1/8/pp6/8/PPP5/8/8/6K1 w - - 0 1",
            &["b5", "Kh8", "bxa6", "Kg7"],
        )
    }

    #[test]
    fn test_detects_white_majority_conversion() {
        let detector = QueensideMajorityDetector;
        let moves = majority_game();
        let detection = detector.detect(&moves, GameResult::WhiteWins);

        assert!(detection.detected);
        assert_eq!(detection.initiating_color, Some(Color::White));
        assert!(detection.confidence >= 0.55);
        assert!(detection.confidence <= 1.0);
        assert_eq!(detection.metadata["push_count"], 2);
        assert_eq!(detection.metadata["passed_pawn_created"], true);
        assert_eq!(detection.metadata["opponent_pawn_removed"], true);

        let (success, outcome) = detector.classify_success(&detection, GameResult::WhiteWins);
        assert!(success);
        assert_eq!(outcome, SuccessOutcome::Victory);
    }

    #[test]
    fn test_draw_is_not_success() {
        let detector = QueensideMajorityDetector;
        let moves = majority_game();
        let detection = detector.detect(&moves, GameResult::Draw);
        let (success, outcome) = detector.classify_success(&detection, GameResult::Draw);
        assert!(!success);
        assert_eq!(outcome, SuccessOutcome::DrawNeutral);
    }

    #[test]
    fn test_loss_is_defeat() {
        let detector = QueensideMajorityDetector;
        let moves = majority_game();
        let detection = detector.detect(&moves, GameResult::BlackWins);
        let (success, outcome) = detector.classify_success(&detection, GameResult::BlackWins);
        assert!(!success);
        assert_eq!(outcome, SuccessOutcome::Defeat);
    }

    #[test]
    fn test_quiet_opening_not_detected() {
        let detector = QueensideMajorityDetector;
        let moves = features_from(
            crate::fen::INITIAL_FEN,
            &["e4", "e5", "Nf3", "Nc6", "Bb5", "a6"],
        );
        let detection = detector.detect(&moves, GameResult::Draw);
        assert!(!detection.detected);
    }

    #[test]
    fn test_majority_without_pushes_not_detected() {
        // White holds a 2-vs-1 majority but only shuffles the king.
        let detector = QueensideMajorityDetector;
        let moves = features_from(
            "6k1/p7/8/8/PP6/8/8/6K1 w - - 0 1",
            &["Kf1", "Kf8", "Ke1", "Ke8"],
        );
        let detection = detector.detect(&moves, GameResult::WhiteWins);
        assert!(!detection.detected);
    }
}
