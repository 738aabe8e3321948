//! Minority attack detector.
//!
//! The mirror plan of the majority conversion: the side with *fewer*
//! queenside pawns advances them anyway to provoke weaknesses — a capture,
//! a split in the opposing pawn mass, or a passed pawn. Carlsbad-structure
//! games are the textbook case. Because the payoff is structural rather
//! than material, a draw still counts as a successful campaign.

use super::zone_stats::ZoneStats;
use super::{DetectionResult, PatternDetector, PatternType, SuccessOutcome, outcome_for};
use crate::fen;
use crate::pawns::{self, Zone};
use crate::pgn::MoveFeature;
use crate::types::{Color, GameResult};
use serde_json::json;

/// Minimum zone pawn pushes.
const MIN_PUSHES: usize = 2;

pub struct MinorityAttackDetector;

impl MinorityAttackDetector {
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
                // Strict minority with at least one own pawn in the zone;
                // an empty flank is no attack at all.
                let own = pawns::count_zone(&after, color, Zone::Queenside);
                let theirs = pawns::count_zone(&after, color.opponent(), Zone::Queenside);
                let minority = own > 0 && own < theirs;
                stats.update(
                    feature.ply_number,
                    &before,
                    &after,
                    color,
                    Zone::Queenside,
                    minority,
                );
            }
        }

        [(Color::White, white), (Color::Black, black)]
    }

    fn qualifies(stats: &ZoneStats) -> bool {
        stats.span >= 1
            && stats.pushes.len() >= MIN_PUSHES
            && (stats.any_push_capture
                || stats.opponent_island_delta > 0
                || stats.passed_created)
    }

    fn confidence(stats: &ZoneStats, color: Color) -> f64 {
        let mut confidence = 0.45;
        confidence += (0.05 * stats.span as f64).min(0.25);
        confidence += (0.08 * stats.pushes.len() as f64).min(0.20);
        if stats.any_push_capture {
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
                "capture": stats.any_push_capture,
                "passed_pawn_created": stats.passed_created,
                "opponent_island_delta": stats.opponent_island_delta,
                "minority_span": stats.span,
                "pushes": stats.pushes_json(),
            }),
        }
    }
}

impl PatternDetector for MinorityAttackDetector {
    fn pattern_id(&self) -> &'static str {
        "minority_attack"
    }

    fn pattern_name(&self) -> &'static str {
        "Minority attack"
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
        // Structural gains survive into drawn endings.
        let outcome = outcome_for(color, result, true);
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

    /// White's b-pawn marches against a 2-vs-3 queenside and trades
    /// itself for the c6 pawn, splitting Black's mass into two islands.
    fn minority_game() -> Vec<MoveFeature> {
        features_from(
            "6k1/pp6/2p5/8/8/8/PP6/6K1 w - - 0 1",
            &["b4", "Kh8", "b5", "Kg8", "bxc6", "bxc6"],
        )
    }

    #[test]
    fn test_detects_white_minority_attack() {
        let detector = MinorityAttackDetector;
        let moves = minority_game();
        let detection = detector.detect(&moves, GameResult::Draw);

        assert!(detection.detected);
        assert_eq!(detection.initiating_color, Some(Color::White));
        assert!(detection.confidence >= 0.45);
        assert!(detection.confidence <= 1.0);
        assert_eq!(detection.metadata["capture"], true);
        assert!(detection.metadata["push_count"].as_u64().unwrap() >= 2);
    }

    #[test]
    fn test_draw_counts_as_success() {
        let detector = MinorityAttackDetector;
        let moves = minority_game();
        let detection = detector.detect(&moves, GameResult::Draw);
        let (success, outcome) = detector.classify_success(&detection, GameResult::Draw);
        assert!(success);
        assert_eq!(outcome, SuccessOutcome::DrawAdvantage);
    }

    #[test]
    fn test_defeat_is_not_success() {
        let detector = MinorityAttackDetector;
        let moves = minority_game();
        let detection = detector.detect(&moves, GameResult::BlackWins);
        let (success, outcome) = detector.classify_success(&detection, GameResult::BlackWins);
        assert!(!success);
        assert_eq!(outcome, SuccessOutcome::Defeat);
    }

    #[test]
    fn test_majority_side_does_not_qualify() {
        // The same pawn skeleton but only the majority side (Black) moves;
        // Black is never in a minority, so nothing is emitted.
        let detector = MinorityAttackDetector;
        let moves = features_from(
            "6k1/pp6/2p5/8/8/8/PP6/6K1 b - - 0 1",
            &["c5", "Kf1", "c4", "Kg1"],
        );
        let detection = detector.detect(&moves, GameResult::Draw);
        assert!(!detection.detected);
    }

    #[test]
    fn test_pushes_without_contact_not_detected() {
        // Two quiet pushes, no capture, no island damage, no passer.
        let detector = MinorityAttackDetector;
        let moves = features_from(
            "6k1/pp6/2p5/8/8/8/PP6/6K1 w - - 0 1",
            &["b3", "Kh8", "b4", "Kg8"],
        );
        let detection = detector.detect(&moves, GameResult::Draw);
        assert!(!detection.detected);
    }
}
