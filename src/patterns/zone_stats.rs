//! Per-color accumulator shared by the strategic zone detectors.
//!
//! Both the queenside-majority and minority-attack detectors reduce over a
//! game's board sequence collecting the same evidence: pawn pushes inside
//! the zone, captures, passed pawns, opposing structure damage, and how
//! far the campaign advanced. Only the span predicate (majority vs
//! minority) differs, so the caller supplies it per ply.

use crate::pawns::{self, PawnTransition, Zone};
use crate::types::{Board, Color};
use serde_json::json;

/// Evidence gathered for one color over one game.
#[derive(Debug, Default, Clone)]
pub(crate) struct ZoneStats {
    /// Plies on which the caller's span predicate held.
    pub span: u32,
    pub first_span_ply: Option<u32>,
    pub last_span_ply: Option<u32>,
    /// Zone pawn transitions by this color, with the ply they happened on.
    pub pushes: Vec<(u32, PawnTransition)>,
    pub any_push_capture: bool,
    pub passed_created: bool,
    /// An opposing pawn left the zone at some point.
    pub opponent_pawn_removed: bool,
    /// Sum of per-ply increases in the opponent's island count.
    pub opponent_island_delta: u32,
    /// Most advanced zone pawn rank reached (maximum for White,
    /// minimum for Black).
    pub max_rank: Option<u8>,
}

impl ZoneStats {
    /// Folds one ply into the stats. `span_held` is the detector's span
    /// predicate evaluated on the after-board.
    pub fn update(
        &mut self,
        ply: u32,
        before: &Board,
        after: &Board,
        color: Color,
        zone: Zone,
        span_held: bool,
    ) {
        if span_held {
            self.span += 1;
            self.first_span_ply.get_or_insert(ply);
            self.last_span_ply = Some(ply);
        }

        if let Some(transition) = pawns::detect_transition(before, after, color, zone) {
            self.any_push_capture |= transition.is_capture;
            self.pushes.push((ply, transition));
        }

        self.passed_created |= pawns::passed_pawn_created(before, after, color, zone);

        let opponent = color.opponent();
        self.opponent_pawn_removed |=
            pawns::count_zone(after, opponent, zone) < pawns::count_zone(before, opponent, zone);

        let islands_before = pawns::island_count(before, opponent);
        let islands_after = pawns::island_count(after, opponent);
        self.opponent_island_delta += islands_after.saturating_sub(islands_before) as u32;

        if let Some(rank) = pawns::max_rank_in_zone(after, color, zone) {
            self.max_rank = Some(match (self.max_rank, color) {
                (None, _) => rank,
                (Some(prev), Color::White) => prev.max(rank),
                (Some(prev), Color::Black) => prev.min(rank),
            });
        }
    }

    /// Whether the campaign's most advanced pawn crossed the midline:
    /// rank 5+ for White, rank 4- for Black (0-based 4 and 3).
    pub fn crossed_midline(&self, color: Color) -> bool {
        match (self.max_rank, color) {
            (Some(rank), Color::White) => rank >= 4,
            (Some(rank), Color::Black) => rank <= 3,
            (None, _) => false,
        }
    }

    /// The push list as JSON for detection metadata.
    pub fn pushes_json(&self) -> serde_json::Value {
        json!(
            self.pushes
                .iter()
                .map(|(ply, t)| {
                    json!({
                        "ply": ply,
                        "from": t.from.to_algebraic(),
                        "to": t.to.to_algebraic(),
                        "capture": t.is_capture,
                        "double_step": t.double_step,
                    })
                })
                .collect::<Vec<_>>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen;

    #[test]
    fn test_stats_accumulate_push_and_span() {
        let before = fen::parse("6k1/8/8/8/1P6/8/8/6K1 w - - 0 1").unwrap().0;
        let after = fen::parse("6k1/8/8/1P6/8/8/8/6K1 b - - 0 1").unwrap().0;

        let mut stats = ZoneStats::default();
        stats.update(1, &before, &after, Color::White, Zone::Queenside, true);

        assert_eq!(stats.span, 1);
        assert_eq!(stats.first_span_ply, Some(1));
        assert_eq!(stats.pushes.len(), 1);
        assert!(!stats.any_push_capture);
        assert_eq!(stats.max_rank, Some(4));
        assert!(stats.crossed_midline(Color::White));
    }

    #[test]
    fn test_opponent_island_delta_only_counts_increases() {
        // Black pawns a7,b7,c6 (one island) become a7,c6 (two islands).
        let before = fen::parse("6k1/pp6/2p5/8/8/8/8/6K1 w - - 0 1").unwrap().0;
        let after = fen::parse("6k1/p7/2p5/8/8/8/8/6K1 b - - 0 1").unwrap().0;

        let mut stats = ZoneStats::default();
        stats.update(1, &before, &after, Color::White, Zone::Queenside, false);
        assert_eq!(stats.opponent_island_delta, 1);
        assert!(stats.opponent_pawn_removed);

        // The reverse direction contributes nothing.
        let mut stats = ZoneStats::default();
        stats.update(1, &after, &before, Color::White, Zone::Queenside, false);
        assert_eq!(stats.opponent_island_delta, 0);
    }
}
