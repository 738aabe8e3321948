//! Pawn-structure analysis.
//!
//! Pure functions over a board and a color: zone pawn counts and
//! majorities, push/capture transitions between two boards, pawn islands,
//! and a passed-pawn heuristic. The strategic detectors reduce over these
//! while replaying a game.

use crate::types::{Board, Color, PieceKind, Square};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// A vertical third of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Files a-c.
    Queenside,
    /// Files d-e.
    Centre,
    /// Files f-h.
    Kingside,
}

impl Zone {
    /// The inclusive file range covered by the zone.
    pub fn files(self) -> std::ops::RangeInclusive<u8> {
        match self {
            Zone::Queenside => 0..=2,
            Zone::Centre => 3..=4,
            Zone::Kingside => 5..=7,
        }
    }

    /// Whether the zone contains the given file.
    pub fn contains(self, file: u8) -> bool {
        self.files().contains(&file)
    }
}

// ---------------------------------------------------------------------------
// Counting
// ---------------------------------------------------------------------------

/// All squares holding a pawn of the given color.
pub fn pawn_positions(board: &Board, color: Color) -> Vec<Square> {
    board
        .occupied()
        .filter(|(_, p)| p.kind == PieceKind::Pawn && p.color == color)
        .map(|(sq, _)| sq)
        .collect()
}

/// Number of pawns of `color` inside `zone`.
pub fn count_zone(board: &Board, color: Color, zone: Zone) -> usize {
    pawn_positions(board, color)
        .into_iter()
        .filter(|sq| zone.contains(sq.file))
        .count()
}

/// Strict pawn majority for `color` in `zone`.
pub fn has_zone_majority(board: &Board, zone: Zone, color: Color) -> bool {
    count_zone(board, color, zone) > count_zone(board, color.opponent(), zone)
}

/// Greatest advanced rank of any pawn of `color` in `zone`: the maximum
/// rank for White, the minimum for Black. `None` when the zone is empty.
pub fn max_rank_in_zone(board: &Board, color: Color, zone: Zone) -> Option<u8> {
    let ranks = pawn_positions(board, color)
        .into_iter()
        .filter(|sq| zone.contains(sq.file))
        .map(|sq| sq.rank);
    match color {
        Color::White => ranks.max(),
        Color::Black => ranks.min(),
    }
}

/// Number of pawn islands: maximal runs of adjacent files each holding at
/// least one pawn of `color`.
pub fn island_count(board: &Board, color: Color) -> usize {
    let mut files = [false; 8];
    for sq in pawn_positions(board, color) {
        files[sq.file as usize] = true;
    }

    let mut islands = 0;
    let mut in_island = false;
    for occupied in files {
        if occupied && !in_island {
            islands += 1;
        }
        in_island = occupied;
    }
    islands
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A pawn move inside a zone, reconstructed from two consecutive boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PawnTransition {
    pub from: Square,
    pub to: Square,
    pub is_capture: bool,
    pub double_step: bool,
}

/// Identifies the pawn of `color` that newly appeared in `zone` between
/// `before` and `after`, along with a plausible source square: same file
/// one rank back (push), adjacent file one rank back (capture), or the
/// start rank two back (double push).
pub fn detect_transition(
    before: &Board,
    after: &Board,
    color: Color,
    zone: Zone,
) -> Option<PawnTransition> {
    let pawn = |board: &Board, sq: Square| {
        board.piece_at(sq).is_some_and(|p| p.kind == PieceKind::Pawn && p.color == color)
    };

    // The destination: a zone square holding our pawn now but not before.
    let to = pawn_positions(after, color)
        .into_iter()
        .find(|sq| zone.contains(sq.file) && !pawn(before, *sq))?;

    let dir = color.pawn_direction();
    let vacated = |sq: Square| pawn(before, sq) && !pawn(after, sq);

    // Straight push one rank back.
    if let Some(from) = to.offset(0, -dir)
        && vacated(from)
    {
        let dest_was_enemy = before
            .piece_at(to)
            .is_some_and(|p| p.color == color.opponent());
        return Some(PawnTransition {
            from,
            to,
            is_capture: dest_was_enemy,
            double_step: false,
        });
    }

    // Diagonal capture from an adjacent file.
    for df in [-1i8, 1] {
        if let Some(from) = to.offset(df, -dir)
            && vacated(from)
        {
            return Some(PawnTransition {
                from,
                to,
                is_capture: true,
                double_step: false,
            });
        }
    }

    // Double push from the start rank.
    if let Some(from) = to.offset(0, -2 * dir)
        && from.rank == color.pawn_start_rank()
        && vacated(from)
    {
        return Some(PawnTransition {
            from,
            to,
            is_capture: false,
            double_step: true,
        });
    }

    None
}

/// Whether the transition between `before` and `after` produced a passed
/// pawn: after the move, no opposing pawn remains on the destination file
/// or either adjacent file, ahead of the pushed pawn.
pub fn passed_pawn_created(before: &Board, after: &Board, color: Color, zone: Zone) -> bool {
    let Some(transition) = detect_transition(before, after, color, zone) else {
        return false;
    };

    let to = transition.to;
    let opponent = color.opponent();
    let ahead = |rank: u8| match color {
        Color::White => rank > to.rank,
        Color::Black => rank < to.rank,
    };

    !pawn_positions(after, opponent).into_iter().any(|sq| {
        (sq.file as i8 - to.file as i8).abs() <= 1 && ahead(sq.rank)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
