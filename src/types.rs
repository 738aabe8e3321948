//! Core types for the chessvault chess model.
//!
//! This module defines the fundamental data structures used throughout the
//! ingestion pipeline: piece representation, board state, castling rights,
//! position metadata, and game results. The board is a value type — every
//! transition produces a new board and leaves the old one untouched, so a
//! detector holding a snapshot never observes later moves.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by the chess core (board, FEN codec, SAN parser).
///
/// All of these are returned as values; the core never panics on bad input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChessError {
    /// File or rank outside 0..8.
    #[error("coordinates out of range: file {file}, rank {rank}")]
    OutOfRange { file: i8, rank: i8 },

    /// A FEN string that violates the six-field format.
    #[error("invalid FEN: {0}")]
    InvalidFen(String),

    /// A SAN token that does not match any recognised move shape.
    #[error("unparseable SAN: {0}")]
    InvalidSan(String),

    /// A SAN move with no piece able to perform it.
    #[error("no candidate piece for SAN {san} (to move: {side})")]
    NoCandidate { san: String, side: Color },

    /// A SAN move that more than one piece could perform after
    /// applying the given disambiguation.
    #[error("ambiguous SAN {san}: {count} candidate pieces")]
    AmbiguousSan { san: String, count: usize },
}

// ---------------------------------------------------------------------------
// Color & pieces
// ---------------------------------------------------------------------------

/// The side of a piece or player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn is_white(self) -> bool {
        self == Color::White
    }

    /// Returns the opposite color.
    pub fn opponent(self) -> Color {
        if self.is_white() { Color::Black } else { Color::White }
    }

    /// Direction this color's pawns advance: +1 for White, -1 for Black.
    /// Derived from the discriminant (White = 0, Black = 1).
    pub fn pawn_direction(self) -> i8 {
        1 - 2 * (self as i8)
    }

    /// Home rank of the back pieces (0-based): 0 for White, 7 for Black.
    pub fn home_rank(self) -> u8 {
        (self as u8) * 7
    }

    /// Starting rank of this color's pawns: one step in front of the
    /// back rank.
    pub fn pawn_start_rank(self) -> u8 {
        (self.home_rank() as i8 + self.pawn_direction()) as u8
    }

    /// The FEN side-to-move field character.
    pub fn fen_char(self) -> char {
        if self.is_white() { 'w' } else { 'b' }
    }

    /// Parses the FEN side-to-move field.
    pub fn from_fen_char(c: char) -> Option<Color> {
        match c {
            'w' => Some(Color::White),
            'b' => Some(Color::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_white() { "white" } else { "black" })
    }
}

/// A piece type without color information. The declaration order is the
/// index into [`PIECE_LETTERS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

/// Uppercase piece letters, indexed by `PieceKind` discriminant.
const PIECE_LETTERS: [char; 6] = ['K', 'Q', 'R', 'B', 'N', 'P'];

impl PieceKind {
    /// Every kind, in discriminant order.
    pub const ALL: [PieceKind; 6] = [
        PieceKind::King,
        PieceKind::Queen,
        PieceKind::Rook,
        PieceKind::Bishop,
        PieceKind::Knight,
        PieceKind::Pawn,
    ];

    /// The uppercase letter used for this kind in FEN and SAN.
    pub fn letter(self) -> char {
        PIECE_LETTERS[self as usize]
    }

    /// The SAN prefix letter; pawns move without one.
    pub fn san_letter(self) -> Option<char> {
        (self != PieceKind::Pawn).then(|| self.letter())
    }

    /// Parses a SAN piece prefix (`K`, `Q`, `R`, `B`, `N`).
    pub fn from_san_letter(c: char) -> Option<PieceKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| *kind != PieceKind::Pawn)
            .find(|kind| kind.letter() == c)
    }
}

/// A piece with both kind and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    /// FEN character: uppercase for White, lowercase for Black.
    pub fn to_fen_char(self) -> char {
        let letter = self.kind.letter();
        if self.color.is_white() {
            letter
        } else {
            letter.to_ascii_lowercase()
        }
    }

    /// Parses a FEN piece character, `None` for anything else.
    pub fn from_fen_char(c: char) -> Option<Self> {
        let kind = PieceKind::ALL
            .into_iter()
            .find(|kind| kind.letter() == c.to_ascii_uppercase())?;
        let color = if c.is_ascii_lowercase() {
            Color::Black
        } else {
            Color::White
        };
        Some(Piece { kind, color })
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A board coordinate with 0-based file and rank.
///
/// - `file`: 0 (a) to 7 (h)
/// - `rank`: 0 (rank 1) to 7 (rank 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

/// File letters in board order, indexed by file number.
const FILE_LETTERS: [char; 8] = ['a', 'b', 'c', 'd', 'e', 'f', 'g', 'h'];

impl Square {
    /// Creates a square from known-valid coordinates.
    pub fn new(file: u8, rank: u8) -> Self {
        debug_assert!(file < 8, "file {file} off the board");
        debug_assert!(rank < 8, "rank {rank} off the board");
        Self { file, rank }
    }

    /// Creates a square with bounds checking.
    pub fn try_new(file: i8, rank: i8) -> Result<Self, ChessError> {
        if (0..8).contains(&file) && (0..8).contains(&rank) {
            Ok(Self::new(file as u8, rank as u8))
        } else {
            Err(ChessError::OutOfRange { file, rank })
        }
    }

    /// Parses algebraic notation (e.g. "e4").
    pub fn from_algebraic(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let (file_char, rank_char) = (chars.next()?, chars.next()?);
        if chars.next().is_some() {
            return None;
        }
        let file = FILE_LETTERS.iter().position(|&c| c == file_char)?;
        let rank = rank_char.to_digit(10).filter(|d| (1..=8).contains(d))? - 1;
        Some(Square {
            file: file as u8,
            rank: rank as u8,
        })
    }

    /// Renders algebraic notation (e.g. "e4").
    pub fn to_algebraic(self) -> String {
        let mut out = String::with_capacity(2);
        out.push(FILE_LETTERS[self.file as usize]);
        out.push((b'1' + self.rank) as char);
        out
    }

    /// Returns the square offset by `(df, dr)`, or `None` when off the board.
    pub fn offset(self, df: i8, dr: i8) -> Option<Square> {
        let file = self.file.checked_add_signed(df).filter(|f| *f < 8)?;
        let rank = self.rank.checked_add_signed(dr).filter(|r| *r < 8)?;
        Some(Square { file, rank })
    }

    /// Flat index 0..63, rank-major.
    pub fn index(self) -> usize {
        usize::from(self.rank) << 3 | usize::from(self.file)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Castling rights
// ---------------------------------------------------------------------------

/// Castling availability for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SideCastling {
    pub kingside: bool,
    pub queenside: bool,
}

impl Default for SideCastling {
    fn default() -> Self {
        Self {
            kingside: true,
            queenside: true,
        }
    }
}

impl SideCastling {
    pub fn none() -> Self {
        Self {
            kingside: false,
            queenside: false,
        }
    }
}

/// Castling availability for both sides. Flags only ever go from
/// `true` to `false` within a game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastlingRights {
    pub white: SideCastling,
    pub black: SideCastling,
}

impl CastlingRights {
    /// Rights with all four flags cleared.
    pub fn none() -> Self {
        Self {
            white: SideCastling::none(),
            black: SideCastling::none(),
        }
    }

    pub fn for_color(&self, color: Color) -> SideCastling {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    pub fn for_color_mut(&mut self, color: Color) -> &mut SideCastling {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// The four flags paired with their FEN letters, in `KQkq` order.
    fn flags(&self) -> [(bool, char); 4] {
        [
            (self.white.kingside, 'K'),
            (self.white.queenside, 'Q'),
            (self.black.kingside, 'k'),
            (self.black.queenside, 'q'),
        ]
    }

    /// The FEN castling field (`KQkq` subset, or `-` when all cleared).
    pub fn to_fen(&self) -> String {
        let field: String = self
            .flags()
            .into_iter()
            .filter_map(|(enabled, letter)| enabled.then_some(letter))
            .collect();
        if field.is_empty() { "-".to_string() } else { field }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// The chess board as a flat 64-element array of optional pieces.
///
/// Index mapping: `rank * 8 + file` (both 0-based). `Board` is `Copy`;
/// `set` returns a new value and the original is never modified.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; 64],
}

impl Default for Board {
    /// Returns an empty board.
    fn default() -> Self {
        Self {
            squares: [None; 64],
        }
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Rank 8 first so the output reads like a diagram.
        for rank in (0..8u8).rev() {
            for file in 0..8u8 {
                let c = self
                    .piece_at(Square::new(file, rank))
                    .map_or('.', Piece::to_fen_char);
                write!(f, "{}", c)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Board {
    /// An empty board.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard starting position.
    pub fn initial() -> Self {
        let mut squares = [None; 64];
        let back = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        for (file, kind) in back.into_iter().enumerate() {
            squares[file] = Some(Piece::new(kind, Color::White));
            squares[8 + file] = Some(Piece::new(PieceKind::Pawn, Color::White));
            squares[48 + file] = Some(Piece::new(PieceKind::Pawn, Color::Black));
            squares[56 + file] = Some(Piece::new(kind, Color::Black));
        }
        Self { squares }
    }

    /// Returns the piece at bounds-checked coordinates.
    pub fn get(&self, file: i8, rank: i8) -> Result<Option<Piece>, ChessError> {
        let sq = Square::try_new(file, rank)?;
        Ok(self.piece_at(sq))
    }

    /// Returns a new board with the given square set, leaving `self` unchanged.
    pub fn set(&self, file: i8, rank: i8, piece: Option<Piece>) -> Result<Board, ChessError> {
        let sq = Square::try_new(file, rank)?;
        Ok(self.with_piece(sq, piece))
    }

    /// Unchecked accessor for a known-valid square.
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    /// Returns a new board with `sq` holding `piece`.
    pub fn with_piece(&self, sq: Square, piece: Option<Piece>) -> Board {
        let mut next = *self;
        next.squares[sq.index()] = piece;
        next
    }

    /// Iterates over all occupied squares.
    pub fn occupied(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        (0..64usize).filter_map(|i| {
            self.squares[i].map(|p| (Square::new((i % 8) as u8, (i / 8) as u8), p))
        })
    }

    /// Finds the king square for the given color, if present.
    pub fn find_king(&self, color: Color) -> Option<Square> {
        self.occupied()
            .find(|(_, p)| p.kind == PieceKind::King && p.color == color)
            .map(|(sq, _)| sq)
    }

    /// Counts pieces of the given kind and color.
    pub fn count(&self, color: Color, kind: PieceKind) -> usize {
        self.occupied()
            .filter(|(_, p)| p.color == color && p.kind == kind)
            .count()
    }

    /// Compact material signature, e.g. `KQRRBBNNPPPPPPPP:kqrrbbnnpppppppp`
    /// for the starting position. White pieces first, then Black, each in
    /// K/Q/R/B/N/P order.
    pub fn material_signature(&self) -> String {
        let mut sig = String::with_capacity(33);
        for color in [Color::White, Color::Black] {
            if color == Color::Black {
                sig.push(':');
            }
            for kind in PieceKind::ALL {
                let c = Piece::new(kind, color).to_fen_char();
                for _ in 0..self.count(color, kind) {
                    sig.push(c);
                }
            }
        }
        sig
    }
}

// ---------------------------------------------------------------------------
// Position metadata & game state
// ---------------------------------------------------------------------------

/// Everything in a FEN string besides piece placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMetadata {
    /// Side to move.
    pub side_to_move: Color,
    /// Castling availability.
    pub castling: CastlingRights,
    /// En passant target square, set only after a double pawn push.
    pub en_passant: Option<Square>,
    /// Plies since the last pawn move or capture.
    pub halfmove_clock: u32,
    /// Full-move counter, starts at 1, incremented after Black moves.
    pub fullmove_number: u32,
}

impl PositionMetadata {
    /// Metadata of the standard starting position.
    pub fn initial() -> Self {
        Self {
            side_to_move: Color::White,
            castling: CastlingRights::default(),
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }
}

/// A full position: board plus metadata. This is the value the PGN reader
/// threads through a game while replaying moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameState {
    pub board: Board,
    pub meta: PositionMetadata,
}

impl GameState {
    /// The standard starting position.
    pub fn initial() -> Self {
        Self {
            board: Board::initial(),
            meta: PositionMetadata::initial(),
        }
    }
}

// ---------------------------------------------------------------------------
// Game result
// ---------------------------------------------------------------------------

/// The PGN result of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
    /// Unterminated or unknown (`*`).
    Ongoing,
}

impl GameResult {
    /// The PGN result token.
    pub fn as_str(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
            GameResult::Ongoing => "*",
        }
    }

    /// Parses a PGN result token.
    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "1-0" => Some(GameResult::WhiteWins),
            "0-1" => Some(GameResult::BlackWins),
            "1/2-1/2" => Some(GameResult::Draw),
            "*" => Some(GameResult::Ongoing),
            _ => None,
        }
    }

    /// The winning color, if the game was decisive.
    pub fn winner(self) -> Option<Color> {
        match self {
            GameResult::WhiteWins => Some(Color::White),
            GameResult::BlackWins => Some(Color::Black),
            _ => None,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_square_algebraic_roundtrip() {
        for file in 0..8u8 {
            for rank in 0..8u8 {
                let sq = Square::new(file, rank);
                assert_eq!(Square::from_algebraic(&sq.to_algebraic()), Some(sq));
            }
        }
        assert_eq!(Square::from_algebraic("i1"), None);
        assert_eq!(Square::from_algebraic("a9"), None);
        assert_eq!(Square::from_algebraic("e"), None);
    }

    #[test]
    fn test_board_set_is_value_semantic() {
        let before = Board::initial();
        let after = before
            .set(4, 3, Some(Piece::new(PieceKind::Pawn, Color::White)))
            .unwrap();
        // The original board still has e4 empty.
        assert_eq!(before.get(4, 3).unwrap(), None);
        assert_eq!(
            after.get(4, 3).unwrap(),
            Some(Piece::new(PieceKind::Pawn, Color::White))
        );
    }

    #[test]
    fn test_board_bounds_checked() {
        let board = Board::initial();
        assert!(matches!(
            board.get(8, 0),
            Err(ChessError::OutOfRange { file: 8, rank: 0 })
        ));
        assert!(board.set(0, -1, None).is_err());
    }

    #[test]
    fn test_initial_board_setup() {
        let board = Board::initial();
        assert_eq!(
            board.piece_at(Square::new(4, 0)),
            Some(Piece::new(PieceKind::King, Color::White))
        );
        assert_eq!(
            board.piece_at(Square::new(3, 7)),
            Some(Piece::new(PieceKind::Queen, Color::Black))
        );
        assert_eq!(board.count(Color::White, PieceKind::Pawn), 8);
        assert_eq!(board.count(Color::Black, PieceKind::Pawn), 8);
        assert_eq!(board.occupied().count(), 32);
    }

    #[test]
    fn test_castling_fen_field() {
        let mut rights = CastlingRights::default();
        assert_eq!(rights.to_fen(), "KQkq");
        rights.white.kingside = false;
        assert_eq!(rights.to_fen(), "Qkq");
        assert_eq!(CastlingRights::none().to_fen(), "-");
    }

    #[test]
    fn test_material_signature_initial() {
        let sig = Board::initial().material_signature();
        assert_eq!(sig, "KQRRBBNNPPPPPPPP:kqrrbbnnpppppppp");
    }

    #[test]
    fn test_result_tokens() {
        assert_eq!(GameResult::from_token("1-0"), Some(GameResult::WhiteWins));
        assert_eq!(GameResult::from_token("1/2-1/2"), Some(GameResult::Draw));
        assert_eq!(GameResult::from_token("*"), Some(GameResult::Ongoing));
        assert_eq!(GameResult::from_token("2-0"), None);
        assert_eq!(GameResult::WhiteWins.winner(), Some(Color::White));
        assert_eq!(GameResult::Draw.winner(), None);
    }
}
