//! FEN (Forsyth–Edwards Notation) codec.
//!
//! Serializes and parses the full six-field FEN format:
//!
//! ```text
//! <board> <side> <castling> <ep-target> <halfmove> <fullmove>
//! ```
//!
//! Parsing is strict: every FEN accepted by [`parse`] regenerates
//! byte-identically through [`generate`]. Rejections cover malformed rank
//! runs, unknown piece letters, castling flags with no matching king/rook
//! on the canonical squares, en-passant targets on impossible ranks, and
//! out-of-range clocks.

use crate::types::{
    Board, CastlingRights, ChessError, Color, GameState, Piece, PieceKind, PositionMetadata,
    SideCastling, Square,
};

/// FEN of the standard starting position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Emits the six-field FEN string for a board and its metadata.
pub fn generate(board: &Board, meta: &PositionMetadata) -> String {
    let mut fen = String::with_capacity(90);

    // Field 1: piece placement, rank 8 down to rank 1.
    for rank in (0..8u8).rev() {
        let mut empty_run = 0;
        for file in 0..8u8 {
            match board.piece_at(Square::new(file, rank)) {
                Some(piece) => {
                    if empty_run > 0 {
                        fen.push((b'0' + empty_run) as char);
                        empty_run = 0;
                    }
                    fen.push(piece.to_fen_char());
                }
                None => empty_run += 1,
            }
        }
        if empty_run > 0 {
            fen.push((b'0' + empty_run) as char);
        }
        if rank > 0 {
            fen.push('/');
        }
    }

    // Fields 2-6: side, castling, en passant, clocks.
    fen.push(' ');
    fen.push(meta.side_to_move.fen_char());
    fen.push(' ');
    fen.push_str(&meta.castling.to_fen());
    fen.push(' ');
    match meta.en_passant {
        Some(sq) => fen.push_str(&sq.to_algebraic()),
        None => fen.push('-'),
    }
    fen.push(' ');
    fen.push_str(&meta.halfmove_clock.to_string());
    fen.push(' ');
    fen.push_str(&meta.fullmove_number.to_string());

    fen
}

/// Emits the FEN for a full game state.
pub fn generate_state(state: &GameState) -> String {
    generate(&state.board, &state.meta)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a six-field FEN string into a board and metadata.
pub fn parse(fen: &str) -> Result<(Board, PositionMetadata), ChessError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(ChessError::InvalidFen(format!(
            "expected 6 fields, found {}",
            fields.len()
        )));
    }

    let board = parse_board(fields[0])?;
    let side_to_move = parse_side(fields[1])?;
    let castling = parse_castling(fields[2], &board)?;
    let en_passant = parse_en_passant(fields[3], side_to_move)?;
    let halfmove_clock = parse_halfmove(fields[4])?;
    let fullmove_number = parse_fullmove(fields[5])?;

    Ok((
        board,
        PositionMetadata {
            side_to_move,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        },
    ))
}

/// Parses a FEN into a full [`GameState`].
pub fn parse_state(fen: &str) -> Result<GameState, ChessError> {
    let (board, meta) = parse(fen)?;
    Ok(GameState { board, meta })
}

fn parse_board(field: &str) -> Result<Board, ChessError> {
    let ranks: Vec<&str> = field.split('/').collect();
    if ranks.len() != 8 {
        return Err(ChessError::InvalidFen(format!(
            "expected 8 ranks, found {}",
            ranks.len()
        )));
    }

    let mut board = Board::empty();
    for (i, rank_str) in ranks.iter().enumerate() {
        let rank = 7 - i as u8;
        let mut file = 0u8;
        let mut prev_was_digit = false;
        for c in rank_str.chars() {
            if let Some(digit) = c.to_digit(10) {
                if !(1..=8).contains(&digit) {
                    return Err(ChessError::InvalidFen(format!(
                        "invalid empty-run digit '{}' in rank {}",
                        c,
                        rank + 1
                    )));
                }
                // "44" would regenerate as "8"; only single-digit runs
                // round-trip.
                if prev_was_digit {
                    return Err(ChessError::InvalidFen(format!(
                        "adjacent empty-run digits in rank {}",
                        rank + 1
                    )));
                }
                prev_was_digit = true;
                file += digit as u8;
            } else {
                prev_was_digit = false;
                let piece = Piece::from_fen_char(c).ok_or_else(|| {
                    ChessError::InvalidFen(format!("unknown piece character '{}'", c))
                })?;
                if file >= 8 {
                    return Err(ChessError::InvalidFen(format!(
                        "rank {} overflows 8 files",
                        rank + 1
                    )));
                }
                board = board.with_piece(Square::new(file, rank), Some(piece));
                file += 1;
            }
        }
        if file != 8 {
            return Err(ChessError::InvalidFen(format!(
                "rank {} sums to {} files, expected 8",
                rank + 1,
                file
            )));
        }
    }

    Ok(board)
}

fn parse_side(field: &str) -> Result<Color, ChessError> {
    let mut chars = field.chars();
    match (chars.next().and_then(Color::from_fen_char), chars.next()) {
        (Some(color), None) => Ok(color),
        _ => Err(ChessError::InvalidFen(format!(
            "side field must be 'w' or 'b', found '{}'",
            field
        ))),
    }
}

/// Parses the castling field, requiring canonical `KQkq` ordering and the
/// matching king/rook to actually stand on their home squares.
fn parse_castling(field: &str, board: &Board) -> Result<CastlingRights, ChessError> {
    if field == "-" {
        return Ok(CastlingRights::none());
    }

    let mut rights = CastlingRights::none();
    // Canonical order; parsing walks this list forward so "qK" is rejected
    // (it would not round-trip).
    let order = ['K', 'Q', 'k', 'q'];
    let mut next_allowed = 0;

    for c in field.chars() {
        let pos = order.iter().position(|&o| o == c).ok_or_else(|| {
            ChessError::InvalidFen(format!("invalid castling character '{}'", c))
        })?;
        if pos < next_allowed {
            return Err(ChessError::InvalidFen(format!(
                "castling field '{}' not in KQkq order",
                field
            )));
        }
        next_allowed = pos + 1;

        let (color, kingside) = match c {
            'K' => (Color::White, true),
            'Q' => (Color::White, false),
            'k' => (Color::Black, true),
            _ => (Color::Black, false),
        };
        verify_castling_pieces(board, color, kingside, field)?;

        let side = rights.for_color_mut(color);
        if kingside {
            side.kingside = true;
        } else {
            side.queenside = true;
        }
    }

    Ok(rights)
}

/// A castling flag is only valid when the king and the relevant rook are
/// on their canonical squares.
fn verify_castling_pieces(
    board: &Board,
    color: Color,
    kingside: bool,
    field: &str,
) -> Result<(), ChessError> {
    let rank = color.home_rank();
    let king_ok = board.piece_at(Square::new(4, rank))
        == Some(Piece::new(PieceKind::King, color));
    let rook_file = if kingside { 7 } else { 0 };
    let rook_ok = board.piece_at(Square::new(rook_file, rank))
        == Some(Piece::new(PieceKind::Rook, color));

    if king_ok && rook_ok {
        Ok(())
    } else {
        Err(ChessError::InvalidFen(format!(
            "castling field '{}' inconsistent with piece placement for {}",
            field, color
        )))
    }
}

/// The en-passant target must sit on rank 6 when White is to move (Black
/// just pushed) or rank 3 when Black is to move.
fn parse_en_passant(field: &str, side_to_move: Color) -> Result<Option<Square>, ChessError> {
    if field == "-" {
        return Ok(None);
    }

    let sq = Square::from_algebraic(field).ok_or_else(|| {
        ChessError::InvalidFen(format!("invalid en-passant target '{}'", field))
    })?;

    let expected_rank = match side_to_move {
        Color::White => 5, // "…6" squares
        Color::Black => 2, // "…3" squares
    };
    if sq.rank != expected_rank {
        return Err(ChessError::InvalidFen(format!(
            "en-passant target '{}' on impossible rank for {} to move",
            field, side_to_move
        )));
    }

    Ok(Some(sq))
}

/// Parses a clock field in canonical decimal: `u32::parse` alone would
/// accept `+7` and `007`, which do not round-trip.
fn parse_clock(field: &str, what: &str) -> Result<u32, ChessError> {
    let n = field
        .parse::<u32>()
        .ok()
        .filter(|n| n.to_string() == field)
        .ok_or_else(|| ChessError::InvalidFen(format!("invalid {} '{}'", what, field)))?;
    Ok(n)
}

fn parse_halfmove(field: &str) -> Result<u32, ChessError> {
    parse_clock(field, "halfmove clock")
}

fn parse_fullmove(field: &str) -> Result<u32, ChessError> {
    let n = parse_clock(field, "fullmove number")?;
    if n == 0 {
        return Err(ChessError::InvalidFen(
            "fullmove number must be positive".to_string(),
        ));
    }
    Ok(n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_initial_state_fen() {
        let state = GameState::initial();
        assert_eq!(generate_state(&state), INITIAL_FEN);
    }

    #[test]
    fn test_parse_initial_fen() {
        let (board, meta) = parse(INITIAL_FEN).unwrap();
        assert_eq!(board, Board::initial());
        assert_eq!(meta, PositionMetadata::initial());
    }

    #[test]
    fn test_roundtrip_accepted_fens() {
        let fens = [
            INITIAL_FEN,
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR w KQkq c6 0 2",
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
            "8/8/8/8/8/8/8/4K2k w - - 10 42",
            "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1",
            "4k3/8/8/8/8/8/4P3/4K3 b - - 3 17",
        ];
        for fen in fens {
            let (board, meta) = parse(fen).unwrap();
            assert_eq!(generate(&board, &meta), fen, "round-trip failed for {fen}");
        }
    }

    #[test]
    fn test_reject_wrong_field_count() {
        assert!(parse("8/8/8/8/8/8/8/8 w - -").is_err());
        assert!(parse(&format!("{} extra", INITIAL_FEN)).is_err());
    }

    #[test]
    fn test_reject_bad_rank_sums() {
        // Seven files on rank 8.
        assert!(parse("rnbqkbn/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").is_err());
        // Nine files via digit overflow.
        assert!(parse("rnbqkbnr/ppppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").is_err());
        // Zero is not a valid empty-run digit.
        assert!(parse("rnbqkbnr/pppppppp/80/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").is_err());
        // Nine ranks.
        assert!(parse("8/8/8/8/8/8/8/8/8 w - - 0 1").is_err());
    }

    #[test]
    fn test_reject_bad_side() {
        assert!(parse("8/8/8/8/8/8/8/4K2k x - - 0 1").is_err());
        assert!(parse("8/8/8/8/8/8/8/4K2k ww - - 0 1").is_err());
    }

    #[test]
    fn test_reject_castling_without_pieces() {
        // White king not on e1.
        assert!(parse("4k3/8/8/8/8/8/8/K6R w K - 0 1").is_err());
        // Rook missing from h1.
        assert!(parse("4k3/8/8/8/8/8/8/4K3 w K - 0 1").is_err());
        // Valid: both on canonical squares.
        assert!(parse("4k3/8/8/8/8/8/8/4K2R w K - 0 1").is_ok());
    }

    #[test]
    fn test_reject_noncanonical_castling_order() {
        assert!(parse("r3k2r/8/8/8/8/8/8/R3K2R w QK - 0 1").is_err());
        assert!(parse("r3k2r/8/8/8/8/8/8/R3K2R w kq - 0 1").is_ok());
    }

    #[test]
    fn test_reject_ep_rank_mismatch() {
        // White to move: EP must be on rank 6.
        assert!(
            parse("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e3 0 1").is_err()
        );
        // Black to move: EP must be on rank 3.
        assert!(
            parse("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e6 0 1").is_err()
        );
        assert!(
            parse("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1").is_ok()
        );
    }

    #[test]
    fn test_reject_bad_clocks() {
        assert!(parse("8/8/8/8/8/8/8/4K2k w - - -1 1").is_err());
        assert!(parse("8/8/8/8/8/8/8/4K2k w - - 0 0").is_err());
        assert!(parse("8/8/8/8/8/8/8/4K2k w - - x 1").is_err());
        // Non-canonical numerals would not round-trip.
        assert!(parse("8/8/8/8/8/8/8/4K2k w - - 007 1").is_err());
        assert!(parse("8/8/8/8/8/8/8/4K2k w - - +7 1").is_err());
    }

    #[test]
    fn test_reject_adjacent_digit_runs() {
        // "44" covers eight files but regenerates as "8".
        assert!(parse("44/8/8/8/8/8/8/4K2k w - - 0 1").is_err());
        assert!(parse("8/8/8/8/8/8/8/4K2k w - - 0 1").is_ok());
    }
}
