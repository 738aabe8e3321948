//! Pattern-detection framework.
//!
//! A detector inspects a game's move list (each move carrying its
//! before/after FEN) and reports whether its motif occurred, with a
//! confidence score and success classification against the game result.
//! Detectors are registered once at startup in a [`DetectorRegistry`] and
//! never mutated afterwards; they hold no per-game state, so one instance
//! serves concurrently ingested games.

pub mod endgame;
pub mod greek_gift;
pub mod minority_attack;
pub mod queenside_majority;
mod zone_stats;

pub use endgame::{LucenaDetector, PhilidorDetector};
pub use greek_gift::GreekGiftDetector;
pub use minority_attack::MinorityAttackDetector;
pub use queenside_majority::QueensideMajorityDetector;

use crate::pgn::MoveFeature;
use crate::types::{Color, GameResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Detection types
// ---------------------------------------------------------------------------

/// Broad classification of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Strategic,
    Tactical,
    Endgame,
    OpeningTrap,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Strategic => "strategic",
            PatternType::Tactical => "tactical",
            PatternType::Endgame => "endgame",
            PatternType::OpeningTrap => "opening_trap",
        }
    }
}

/// How the game ended from the perspective of the initiating color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessOutcome {
    Victory,
    DrawAdvantage,
    DrawNeutral,
    Defeat,
}

impl SuccessOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SuccessOutcome::Victory => "victory",
            SuccessOutcome::DrawAdvantage => "draw_advantage",
            SuccessOutcome::DrawNeutral => "draw_neutral",
            SuccessOutcome::Defeat => "defeat",
        }
    }
}

/// The result of running one detector over one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    /// Confidence in [0, 1]; meaningless when `detected` is false.
    pub confidence: f64,
    pub initiating_color: Option<Color>,
    pub start_ply: Option<u32>,
    pub end_ply: Option<u32>,
    /// Detector-specific evidence, persisted alongside the detection.
    pub metadata: serde_json::Value,
}

impl DetectionResult {
    /// The "nothing found" result.
    pub fn negative() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            initiating_color: None,
            start_ply: None,
            end_ply: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Maps a game result to the outcome seen by `color`. `draw_is_advantage`
/// is set by detectors whose motif typically yields a structural edge even
/// when the game is drawn.
pub fn outcome_for(color: Color, result: GameResult, draw_is_advantage: bool) -> SuccessOutcome {
    match result.winner() {
        Some(winner) if winner == color => SuccessOutcome::Victory,
        Some(_) => SuccessOutcome::Defeat,
        None if result == GameResult::Draw && draw_is_advantage => SuccessOutcome::DrawAdvantage,
        None => SuccessOutcome::DrawNeutral,
    }
}

// ---------------------------------------------------------------------------
// Detector trait & registry
// ---------------------------------------------------------------------------

/// A pattern detector. Implementations are pure: `detect` reads the move
/// list and never touches shared state.
pub trait PatternDetector: Send + Sync {
    /// Stable identifier used as the upsert key in the store.
    fn pattern_id(&self) -> &'static str;

    /// Human-readable label.
    fn pattern_name(&self) -> &'static str;

    fn pattern_type(&self) -> PatternType;

    /// Runs the detector over a full game.
    fn detect(&self, moves: &[MoveFeature], result: GameResult) -> DetectionResult;

    /// Classifies a positive detection against the final result.
    fn classify_success(
        &self,
        detection: &DetectionResult,
        result: GameResult,
    ) -> (bool, SuccessOutcome);
}

/// Registry of detectors keyed by pattern id. Built once at startup;
/// lookups and iteration only after that.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<&'static str, Arc<dyn PatternDetector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a detector. A second registration under the same id is a
    /// no-op; the first registration wins.
    pub fn register(&mut self, detector: Arc<dyn PatternDetector>) {
        self.detectors.entry(detector.pattern_id()).or_insert(detector);
    }

    pub fn get(&self, pattern_id: &str) -> Option<&Arc<dyn PatternDetector>> {
        self.detectors.get(pattern_id)
    }

    /// All detectors, ordered by pattern id.
    pub fn list(&self) -> impl Iterator<Item = &Arc<dyn PatternDetector>> {
        self.detectors.values()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

/// The registry with every built-in detector, as used by ingestion.
pub fn default_registry() -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register(Arc::new(QueensideMajorityDetector));
    registry.register(Arc::new(MinorityAttackDetector));
    registry.register(Arc::new(GreekGiftDetector));
    registry.register(Arc::new(LucenaDetector));
    registry.register(Arc::new(PhilidorDetector));
    registry
}

// ---------------------------------------------------------------------------
// Shared test helpers
// ---------------------------------------------------------------------------

/// Builds a move-feature list by replaying SAN moves from an arbitrary
/// starting FEN. Panics on bad input; for tests only.
#[cfg(test)]
pub(crate) fn features_from(start_fen: &str, sans: &[&str]) -> Vec<MoveFeature> {
    use crate::{fen, san};
    use std::collections::BTreeSet;

    let mut state = fen::parse_state(start_fen).expect("valid start FEN");
    let mut moves = Vec::new();
    for (i, token) in sans.iter().enumerate() {
        let fen_before = fen::generate_state(&state);
        let side = state.meta.side_to_move;
        let (next, applied) = san::apply(&state, token)
            .unwrap_or_else(|e| panic!("cannot apply {token}: {e}"));
        moves.push(MoveFeature {
            ply_number: i as u32 + 1,
            san: (*token).to_string(),
            uci: Some(applied.uci),
            fen_before,
            fen_after: fen::generate_state(&next),
            side_to_move: side,
            eval_cp: None,
            is_capture: applied.is_capture,
            is_check: applied.is_check,
            is_mate: applied.is_mate,
            motifs: BTreeSet::new(),
            comments_before: Vec::new(),
            comments_after: Vec::new(),
            variations: Vec::new(),
            nags: Vec::new(),
        });
        state = next;
    }
    moves
}
