//! Greek gift sacrifice detector.
//!
//! The bishop sacrifice on h7 (or h2 for Black) against the castled king.
//! Detection is purely notational: the first move whose SAN contains
//! `Bxh7` by White or `Bxh2` by Black marks the sacrifice. A mating SAN
//! (`…#`) is taken at full confidence.

use super::{DetectionResult, PatternDetector, PatternType, SuccessOutcome, outcome_for};
use crate::pgn::MoveFeature;
use crate::types::{Color, GameResult};
use serde_json::json;

pub struct GreekGiftDetector;

impl PatternDetector for GreekGiftDetector {
    fn pattern_id(&self) -> &'static str {
        "greek_gift"
    }

    fn pattern_name(&self) -> &'static str {
        "Greek gift sacrifice"
    }

    fn pattern_type(&self) -> PatternType {
        PatternType::Tactical
    }

    fn detect(&self, moves: &[MoveFeature], _result: GameResult) -> DetectionResult {
        for feature in moves {
            let target = match feature.side_to_move {
                Color::White => "Bxh7",
                Color::Black => "Bxh2",
            };
            if !feature.san.contains(target) {
                continue;
            }

            let confidence = if feature.san.ends_with('#') { 1.0 } else { 0.8 };
            return DetectionResult {
                detected: true,
                confidence,
                initiating_color: Some(feature.side_to_move),
                start_ply: Some(feature.ply_number),
                end_ply: Some(feature.ply_number),
                metadata: json!({
                    "san": feature.san,
                    "ply": feature.ply_number,
                    "mate": feature.san.ends_with('#'),
                }),
            };
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
        // A sacrifice has to convert; anything short of a win failed.
        (outcome == SuccessOutcome::Victory, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::features_from;

    #[test]
    fn test_detects_mating_sacrifice() {
        // Constructed position: Bd3 takes h7 with mate support.
        let detector = GreekGiftDetector;
        let moves = features_from(
            "6k1/5ppp/8/8/8/3B4/8/6KQ w - - 0 1",
            &["Bxh7#"],
        );
        let detection = detector.detect(&moves, GameResult::WhiteWins);

        assert!(detection.detected);
        assert_eq!(detection.confidence, 1.0);
        assert_eq!(detection.initiating_color, Some(Color::White));
        assert_eq!(detection.start_ply, Some(1));

        let (success, outcome) = detector.classify_success(&detection, GameResult::WhiteWins);
        assert!(success);
        assert_eq!(outcome, SuccessOutcome::Victory);
    }

    #[test]
    fn test_nonmating_sacrifice_has_lower_confidence() {
        let detector = GreekGiftDetector;
        let moves = features_from(
            "rnbqk3/pppp1ppp/8/8/8/3B4/PPPP1PPP/RNBQK3 w - - 0 1",
            &["Bxh7"],
        );
        let detection = detector.detect(&moves, GameResult::WhiteWins);
        assert!(detection.detected);
        assert_eq!(detection.confidence, 0.8);
    }

    #[test]
    fn test_black_mirror_on_h2() {
        let detector = GreekGiftDetector;
        let moves = features_from(
            "rnbqk3/pppp1ppp/3b4/8/8/8/PPPP1PPP/RNBQK3 b - - 0 1",
            &["Bxh2"],
        );
        let detection = detector.detect(&moves, GameResult::BlackWins);
        assert!(detection.detected);
        assert_eq!(detection.initiating_color, Some(Color::Black));

        let (success, _) = detector.classify_success(&detection, GameResult::BlackWins);
        assert!(success);
    }

    #[test]
    fn test_draw_after_sacrifice_is_failure() {
        let detector = GreekGiftDetector;
        let moves = features_from(
            "rnbqk3/pppp1ppp/8/8/8/3B4/PPPP1PPP/RNBQK3 w - - 0 1",
            &["Bxh7"],
        );
        let detection = detector.detect(&moves, GameResult::Draw);
        let (success, outcome) = detector.classify_success(&detection, GameResult::Draw);
        assert!(!success);
        assert_eq!(outcome, SuccessOutcome::DrawNeutral);
    }

    #[test]
    fn test_no_sacrifice_no_detection() {
        let detector = GreekGiftDetector;
        let moves = features_from(crate::fen::INITIAL_FEN, &["e4", "e5"]);
        assert!(!detector.detect(&moves, GameResult::Draw).detected);
    }
}
