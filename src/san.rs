//! SAN (Standard Algebraic Notation) parsing and move application.
//!
//! Turns a SAN token (`Nf3`, `exd5`, `O-O`, `e8=Q+`, `Rad1`) into a board
//! transition:
//!
//! 1. Parse the token into piece, destination, capture flag, promotion and
//!    partial source disambiguation.
//! 2. Resolve the source square by enumerating the side's pieces that can
//!    reach the destination under piece-movement rules (sliding pieces
//!    honour blockers).
//! 3. Apply the move, producing a new [`GameState`] with castling rights,
//!    en-passant target, halfmove clock and fullmove number updated.
//!
//! Errors are returned as values; the caller decides whether a bad move
//! aborts or is logged and skipped.

use crate::types::{
    Board, CastlingRights, ChessError, Color, GameState, Piece, PieceKind, PositionMetadata,
    SideCastling, Square,
};

// ---------------------------------------------------------------------------
// Parsed SAN representation
// ---------------------------------------------------------------------------

/// The move shape extracted from a SAN token, before source resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanMove {
    CastleKingside,
    CastleQueenside,
    Normal {
        piece: PieceKind,
        dest: Square,
        capture: bool,
        promotion: Option<PieceKind>,
        /// Disambiguation file from the token (e.g. the `b` in `Nbd2`).
        from_file: Option<u8>,
        /// Disambiguation rank from the token (e.g. the `1` in `R1e2`).
        from_rank: Option<u8>,
    },
}

/// A fully parsed SAN token: the move plus its check/mate suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSan {
    pub mv: SanMove,
    pub is_check: bool,
    pub is_mate: bool,
}

/// What a successfully applied move did, for feature extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// Source and destination in UCI form (e.g. `e2e4`, `e7e8q`).
    pub uci: String,
    pub is_capture: bool,
    /// The piece removed from the board, if any (the pawn for en passant).
    pub captured: Option<PieceKind>,
    /// Check indicated by the SAN suffix (`+` or `#`).
    pub is_check: bool,
    /// Mate indicated by the SAN suffix (`#`).
    pub is_mate: bool,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a SAN token. Accepts `0-0`/`0-0-0` as castling synonyms and
/// tolerates a trailing `+`/`#`.
pub fn parse(token: &str) -> Result<ParsedSan, ChessError> {
    let raw = token.trim();
    if raw.is_empty() {
        return Err(ChessError::InvalidSan(token.to_string()));
    }

    // Check/mate suffix.
    let is_mate = raw.ends_with('#');
    let is_check = is_mate || raw.ends_with('+');
    let body = raw.trim_end_matches(['+', '#']);

    // Castling, with the zero-notation normalised.
    let normalised = body.replace('0', "O");
    if normalised == "O-O" {
        return Ok(ParsedSan {
            mv: SanMove::CastleKingside,
            is_check,
            is_mate,
        });
    }
    if normalised == "O-O-O" {
        return Ok(ParsedSan {
            mv: SanMove::CastleQueenside,
            is_check,
            is_mate,
        });
    }

    // Promotion suffix comes off first so `exd8=Q` parses capture and
    // promotion independently.
    let (body, promotion) = match body.split_once('=') {
        Some((rest, promo)) => {
            let kind = single_char(promo)
                .and_then(PieceKind::from_san_letter)
                .filter(|k| {
                    matches!(
                        k,
                        PieceKind::Queen | PieceKind::Rook | PieceKind::Bishop | PieceKind::Knight
                    )
                })
                .ok_or_else(|| ChessError::InvalidSan(token.to_string()))?;
            (rest, Some(kind))
        }
        None => (body, None),
    };

    // Piece prefix, or a pawn move.
    let mut chars = chars_of(body);
    let piece = match chars.first().copied().and_then(PieceKind::from_san_letter) {
        Some(kind) => {
            chars.remove(0);
            kind
        }
        None => PieceKind::Pawn,
    };

    if piece != PieceKind::Pawn && promotion.is_some() {
        return Err(ChessError::InvalidSan(token.to_string()));
    }

    // The last two characters must be the destination square.
    if chars.len() < 2 {
        return Err(ChessError::InvalidSan(token.to_string()));
    }
    let dest_str: String = chars.split_off(chars.len() - 2).into_iter().collect();
    let dest = Square::from_algebraic(&dest_str)
        .ok_or_else(|| ChessError::InvalidSan(token.to_string()))?;

    // Capture marker directly before the destination.
    let capture = chars.last() == Some(&'x');
    if capture {
        chars.pop();
    }

    // Whatever remains is disambiguation: file, rank, or both.
    let (from_file, from_rank) = parse_disambiguation(&chars, token)?;

    // A pawn capture must carry its source file ("exd5", never "xd5").
    if piece == PieceKind::Pawn && capture && from_file.is_none() {
        return Err(ChessError::InvalidSan(token.to_string()));
    }

    Ok(ParsedSan {
        mv: SanMove::Normal {
            piece,
            dest,
            capture,
            promotion,
            from_file,
            from_rank,
        },
        is_check,
        is_mate,
    })
}

fn chars_of(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn single_char(s: &str) -> Option<char> {
    let mut it = s.chars();
    match (it.next(), it.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn parse_disambiguation(
    chars: &[char],
    token: &str,
) -> Result<(Option<u8>, Option<u8>), ChessError> {
    let file_of = |c: char| ('a'..='h').contains(&c).then(|| c as u8 - b'a');
    let rank_of = |c: char| ('1'..='8').contains(&c).then(|| c as u8 - b'1');

    match chars {
        [] => Ok((None, None)),
        [c] => {
            if let Some(f) = file_of(*c) {
                Ok((Some(f), None))
            } else if let Some(r) = rank_of(*c) {
                Ok((None, Some(r)))
            } else {
                Err(ChessError::InvalidSan(token.to_string()))
            }
        }
        [cf, cr] => match (file_of(*cf), rank_of(*cr)) {
            (Some(f), Some(r)) => Ok((Some(f), Some(r))),
            _ => Err(ChessError::InvalidSan(token.to_string())),
        },
        _ => Err(ChessError::InvalidSan(token.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Source-square resolution
// ---------------------------------------------------------------------------

/// Finds the unique source square for a parsed normal move.
///
/// Candidates are the side's pieces of the right kind that satisfy the
/// partial disambiguation and can reach the destination under their
/// movement pattern. Sliding pieces require a clear path.
pub fn resolve_source(
    state: &GameState,
    piece: PieceKind,
    dest: Square,
    capture: bool,
    from_file: Option<u8>,
    from_rank: Option<u8>,
    san: &str,
) -> Result<Square, ChessError> {
    let color = state.meta.side_to_move;
    let candidates: Vec<Square> = state
        .board
        .occupied()
        .filter(|(sq, p)| {
            p.color == color
                && p.kind == piece
                && from_file.is_none_or(|f| sq.file == f)
                && from_rank.is_none_or(|r| sq.rank == r)
                && can_reach(state, *sq, dest, piece, color, capture)
        })
        .map(|(sq, _)| sq)
        .collect();

    match candidates.len() {
        1 => Ok(candidates[0]),
        0 => Err(ChessError::NoCandidate {
            san: san.to_string(),
            side: color,
        }),
        n => Err(ChessError::AmbiguousSan {
            san: san.to_string(),
            count: n,
        }),
    }
}

/// Piece-specific reachability from `from` to `dest`.
fn can_reach(
    state: &GameState,
    from: Square,
    dest: Square,
    piece: PieceKind,
    color: Color,
    capture: bool,
) -> bool {
    let df = dest.file as i8 - from.file as i8;
    let dr = dest.rank as i8 - from.rank as i8;

    match piece {
        PieceKind::Pawn => {
            let dir = color.pawn_direction();
            if capture {
                // One step diagonally forward, onto an enemy piece or the
                // en-passant target.
                df.abs() == 1
                    && dr == dir
                    && (state.meta.en_passant == Some(dest)
                        || state
                            .board
                            .piece_at(dest)
                            .is_some_and(|p| p.color != color))
            } else {
                if df != 0 || state.board.piece_at(dest).is_some() {
                    return false;
                }
                if dr == dir {
                    return true;
                }
                // Double push from the start rank through an empty square.
                dr == 2 * dir
                    && from.rank == color.pawn_start_rank()
                    && from
                        .offset(0, dir)
                        .is_some_and(|mid| state.board.piece_at(mid).is_none())
            }
        }
        PieceKind::Knight => {
            matches!((df.abs(), dr.abs()), (1, 2) | (2, 1)) && dest_free(state, dest, color)
        }
        PieceKind::King => {
            df.abs().max(dr.abs()) == 1 && dest_free(state, dest, color)
        }
        PieceKind::Rook => {
            (df == 0) != (dr == 0)
                && path_clear(state, from, dest)
                && dest_free(state, dest, color)
        }
        PieceKind::Bishop => {
            df != 0
                && df.abs() == dr.abs()
                && path_clear(state, from, dest)
                && dest_free(state, dest, color)
        }
        PieceKind::Queen => {
            ((df == 0) != (dr == 0) || (df != 0 && df.abs() == dr.abs()))
                && path_clear(state, from, dest)
                && dest_free(state, dest, color)
        }
    }
}

/// The destination must not hold one of our own pieces.
fn dest_free(state: &GameState, dest: Square, color: Color) -> bool {
    state
        .board
        .piece_at(dest)
        .is_none_or(|p| p.color != color)
}

/// Checks every square strictly between `from` and `dest` is empty.
/// Only called for rook/bishop/queen lines.
fn path_clear(state: &GameState, from: Square, dest: Square) -> bool {
    let step_f = (dest.file as i8 - from.file as i8).signum();
    let step_r = (dest.rank as i8 - from.rank as i8).signum();
    let mut cur = from;
    loop {
        cur = match cur.offset(step_f, step_r) {
            Some(sq) => sq,
            None => return false,
        };
        if cur == dest {
            return true;
        }
        if state.board.piece_at(cur).is_some() {
            return false;
        }
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Parses and applies a SAN token, returning the successor state and what
/// the move did. The input state is unchanged on error.
pub fn apply(state: &GameState, token: &str) -> Result<(GameState, AppliedMove), ChessError> {
    let parsed = parse(token)?;
    let color = state.meta.side_to_move;

    let (next_board, from, dest, moved_piece, captured, promotion) = match parsed.mv {
        SanMove::CastleKingside => apply_castle(state, color, true, token)?,
        SanMove::CastleQueenside => apply_castle(state, color, false, token)?,
        SanMove::Normal {
            piece,
            dest,
            capture,
            promotion,
            from_file,
            from_rank,
        } => {
            let from = resolve_source(state, piece, dest, capture, from_file, from_rank, token)?;
            let is_en_passant =
                piece == PieceKind::Pawn && capture && state.meta.en_passant == Some(dest);

            // Captured piece, read before the destination is overwritten.
            let captured = if is_en_passant {
                Some(PieceKind::Pawn)
            } else {
                state.board.piece_at(dest).map(|p| p.kind)
            };

            let placed = Piece::new(promotion.unwrap_or(piece), color);
            let mut board = state
                .board
                .with_piece(from, None)
                .with_piece(dest, Some(placed));
            if is_en_passant {
                // The captured pawn stands behind the destination square.
                let behind = Square::new(dest.file, (dest.rank as i8 - color.pawn_direction()) as u8);
                board = board.with_piece(behind, None);
            }
            (board, from, dest, piece, captured, promotion)
        }
    };

    let is_capture = captured.is_some();
    let is_pawn_move = moved_piece == PieceKind::Pawn;

    let mut castling = state.meta.castling;
    update_castling_rights(&mut castling, color, moved_piece, from, dest);

    // En-passant target is set only by a double pawn push.
    let en_passant = if is_pawn_move && (dest.rank as i8 - from.rank as i8).abs() == 2 {
        Some(Square::new(from.file, (from.rank as i8 + color.pawn_direction()) as u8))
    } else {
        None
    };

    let halfmove_clock = if is_pawn_move || is_capture {
        0
    } else {
        state.meta.halfmove_clock + 1
    };
    let fullmove_number = match color {
        Color::White => state.meta.fullmove_number,
        Color::Black => state.meta.fullmove_number + 1,
    };

    let next = GameState {
        board: next_board,
        meta: PositionMetadata {
            side_to_move: color.opponent(),
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        },
    };

    let mut uci = format!("{}{}", from.to_algebraic(), dest.to_algebraic());
    if let Some(promo) = promotion
        && let Some(letter) = promo.san_letter()
    {
        uci.push(letter.to_ascii_lowercase());
    }

    Ok((
        next,
        AppliedMove {
            uci,
            is_capture,
            captured,
            is_check: parsed.is_check,
            is_mate: parsed.is_mate,
        },
    ))
}

/// Moves king and rook for a castle. Fails when either piece is absent
/// from its canonical square.
type MoveParts = (
    Board,
    Square,
    Square,
    PieceKind,
    Option<PieceKind>,
    Option<PieceKind>,
);

fn apply_castle(
    state: &GameState,
    color: Color,
    kingside: bool,
    token: &str,
) -> Result<MoveParts, ChessError> {
    let rank = color.home_rank();
    let king_from = Square::new(4, rank);
    let (rook_from, king_to, rook_to) = if kingside {
        (Square::new(7, rank), Square::new(6, rank), Square::new(5, rank))
    } else {
        (Square::new(0, rank), Square::new(2, rank), Square::new(3, rank))
    };

    let king_present =
        state.board.piece_at(king_from) == Some(Piece::new(PieceKind::King, color));
    let rook_present =
        state.board.piece_at(rook_from) == Some(Piece::new(PieceKind::Rook, color));
    if !king_present || !rook_present {
        return Err(ChessError::NoCandidate {
            san: token.to_string(),
            side: color,
        });
    }

    let board = state
        .board
        .with_piece(king_from, None)
        .with_piece(rook_from, None)
        .with_piece(king_to, Some(Piece::new(PieceKind::King, color)))
        .with_piece(rook_to, Some(Piece::new(PieceKind::Rook, color)));

    Ok((board, king_from, king_to, PieceKind::King, None, None))
}

/// Clears castling flags affected by a move. Flags only ever go down.
fn update_castling_rights(
    castling: &mut CastlingRights,
    color: Color,
    moved_piece: PieceKind,
    from: Square,
    dest: Square,
) {
    // Any king move (castling included) forfeits both rights.
    if moved_piece == PieceKind::King {
        *castling.for_color_mut(color) = SideCastling::none();
    }

    // Rook leaving a home corner, or anything landing on one (a rook
    // being captured there), clears the matching flag.
    for sq in [from, dest] {
        match (sq.file, sq.rank) {
            (0, 0) => castling.white.queenside = false,
            (7, 0) => castling.white.kingside = false,
            (0, 7) => castling.black.queenside = false,
            (7, 7) => castling.black.kingside = false,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen;
    use pretty_assertions::assert_eq;

    fn apply_line(state: GameState, moves: &[&str]) -> GameState {
        moves.iter().fold(state, |s, m| apply(&s, m).unwrap().0)
    }

    #[test]
    fn test_opening_moves_fens() {
        let s0 = GameState::initial();

        let (s1, m1) = apply(&s0, "e4").unwrap();
        assert_eq!(
            fen::generate_state(&s1),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"
        );
        assert_eq!(m1.uci, "e2e4");
        assert!(!m1.is_capture);

        let (s2, _) = apply(&s1, "c5").unwrap();
        assert_eq!(
            fen::generate_state(&s2),
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR w KQkq c6 0 2"
        );

        let (s3, m3) = apply(&s2, "Nf3").unwrap();
        assert_eq!(
            fen::generate_state(&s3),
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2"
        );
        assert_eq!(m3.uci, "g1f3");
    }

    #[test]
    fn test_kingside_castle() {
        let state = fen::parse_state("4k3/8/8/8/8/8/8/4K2R w K - 0 1").unwrap();
        let (next, mv) = apply(&state, "O-O").unwrap();

        assert_eq!(
            next.board.piece_at(Square::new(6, 0)),
            Some(Piece::new(PieceKind::King, Color::White))
        );
        assert_eq!(
            next.board.piece_at(Square::new(5, 0)),
            Some(Piece::new(PieceKind::Rook, Color::White))
        );
        assert_eq!(next.board.piece_at(Square::new(4, 0)), None);
        assert_eq!(next.board.piece_at(Square::new(7, 0)), None);
        assert!(!next.meta.castling.white.kingside);
        assert!(!next.meta.castling.white.queenside);
        assert_eq!(mv.uci, "e1g1");
    }

    #[test]
    fn test_castle_zero_notation() {
        let state = fen::parse_state("r3k3/8/8/8/8/8/8/4K3 b q - 0 1").unwrap();
        let (next, _) = apply(&state, "0-0-0").unwrap();
        assert_eq!(
            next.board.piece_at(Square::new(2, 7)),
            Some(Piece::new(PieceKind::King, Color::Black))
        );
        assert_eq!(
            next.board.piece_at(Square::new(3, 7)),
            Some(Piece::new(PieceKind::Rook, Color::Black))
        );
    }

    #[test]
    fn test_castle_without_rook_fails() {
        let state = fen::parse_state("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(matches!(
            apply(&state, "O-O"),
            Err(ChessError::NoCandidate { .. })
        ));
    }

    #[test]
    fn test_en_passant_capture() {
        // After 1. e4 … e5 2. … d5 shape: White pawn e5, Black just played d7d5.
        let state =
            fen::parse_state("rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3")
                .unwrap();
        let (next, mv) = apply(&state, "exd6").unwrap();

        assert_eq!(
            next.board.piece_at(Square::new(3, 5)),
            Some(Piece::new(PieceKind::Pawn, Color::White))
        );
        // The captured pawn on d5 is gone.
        assert_eq!(next.board.piece_at(Square::new(3, 4)), None);
        assert_eq!(mv.captured, Some(PieceKind::Pawn));
        assert!(mv.is_capture);
        assert_eq!(next.meta.halfmove_clock, 0);
        assert_eq!(next.meta.en_passant, None);
    }

    #[test]
    fn test_promotion() {
        let state = fen::parse_state("8/4P3/8/8/8/8/8/k1K5 w - - 0 1").unwrap();
        let (next, mv) = apply(&state, "e8=Q").unwrap();
        assert_eq!(next.board.piece_at(Square::new(4, 6)), None);
        assert_eq!(
            next.board.piece_at(Square::new(4, 7)),
            Some(Piece::new(PieceKind::Queen, Color::White))
        );
        assert_eq!(mv.uci, "e7e8q");
    }

    #[test]
    fn test_promotion_capture() {
        let state = fen::parse_state("3r4/4P3/8/8/8/8/8/k1K5 w - - 0 1").unwrap();
        let (next, mv) = apply(&state, "exd8=N").unwrap();
        assert_eq!(
            next.board.piece_at(Square::new(3, 7)),
            Some(Piece::new(PieceKind::Knight, Color::White))
        );
        assert_eq!(mv.captured, Some(PieceKind::Rook));
        assert_eq!(mv.uci, "e7d8n");
    }

    #[test]
    fn test_file_disambiguation() {
        // Knights on b1 and f3 can both reach d2.
        let state = fen::parse_state("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1").unwrap();
        assert!(matches!(
            apply(&state, "Nd2"),
            Err(ChessError::AmbiguousSan { count: 2, .. })
        ));
        let (_, mv) = apply(&state, "Nbd2").unwrap();
        assert_eq!(mv.uci, "b1d2");
        let (_, mv) = apply(&state, "Nfd2").unwrap();
        assert_eq!(mv.uci, "f3d2");
    }

    #[test]
    fn test_rank_disambiguation() {
        // Rooks on a1 and a5 can both reach a3.
        let state = fen::parse_state("4k3/8/8/R7/8/8/8/R3K3 w - - 0 1").unwrap();
        let (_, mv) = apply(&state, "R1a3").unwrap();
        assert_eq!(mv.uci, "a1a3");
        let (_, mv) = apply(&state, "R5a3").unwrap();
        assert_eq!(mv.uci, "a5a3");
    }

    #[test]
    fn test_blocker_rules_out_candidate() {
        // Rooks on a1 and h1; a pawn on e1 blocks the h-rook from d1.
        let state = fen::parse_state("4k3/8/8/8/8/8/8/R3P2R w - - 0 1").unwrap();
        let (_, mv) = apply(&state, "Rd1").unwrap();
        assert_eq!(mv.uci, "a1d1");
    }

    #[test]
    fn test_no_candidate_is_error() {
        let state = GameState::initial();
        assert!(matches!(
            apply(&state, "Qe5"),
            Err(ChessError::NoCandidate { .. })
        ));
    }

    #[test]
    fn test_unparseable_san() {
        for bad in ["", "xx", "e9", "Ze4", "e8=K", "Nf3=Q", "xd5"] {
            assert!(parse(bad).is_err(), "expected parse failure for {bad:?}");
        }
    }

    #[test]
    fn test_halfmove_clock_transitions() {
        let s0 = GameState::initial();
        let s = apply_line(s0, &["Nf3", "Nf6", "Ng1"]);
        assert_eq!(s.meta.halfmove_clock, 3);
        // A pawn move resets.
        let s = apply_line(s, &["e5"]);
        assert_eq!(s.meta.halfmove_clock, 0);
    }

    #[test]
    fn test_castling_rights_monotone_on_rook_moves() {
        let state = fen::parse_state("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let (s1, _) = apply(&state, "Ra2").unwrap();
        assert!(!s1.meta.castling.white.queenside);
        assert!(s1.meta.castling.white.kingside);

        // Capturing the rook on h8 strips Black's kingside right.
        let state = fen::parse_state("r3k2r/8/8/8/8/8/8/Q3K3 w q - 0 1").unwrap();
        let (s2, mv) = apply(&state, "Qxh8").unwrap();
        assert_eq!(mv.captured, Some(PieceKind::Rook));
        assert!(!s2.meta.castling.black.kingside);
    }

    #[test]
    fn test_check_and_mate_suffixes() {
        let state = fen::parse_state("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
        let (_, mv) = apply(&state, "Ra8+").unwrap();
        assert!(mv.is_check);
        assert!(!mv.is_mate);

        let (_, mv) = apply(&state, "Ra8#").unwrap();
        assert!(mv.is_check);
        assert!(mv.is_mate);
    }
}
