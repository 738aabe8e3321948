//! Streaming PGN parser.
//!
//! Reads a PGN byte stream and yields one [`Game`] at a time; the corpus is
//! never held in memory. For every half-move the parser replays its own
//! [`GameState`], so each [`MoveFeature`] carries the exact FEN before and
//! after the move. Handled movetext elements:
//!
//! - header tag pairs `[Key "Value"]` (seven-tag roster plus extras)
//! - SAN moves with move numbers, `{…}` comments, `(…)` variations
//!   (nested), `$n` NAGs, `;` rest-of-line comments
//! - result tokens `1-0`, `0-1`, `1/2-1/2`, `*`
//!
//! Input bytes are sanitised: malformed UTF-8 sequences are dropped while
//! valid multibyte codepoints (common inside comments) survive. A move the
//! SAN parser rejects is logged and its FENs are carried over from the
//! previous state; the game keeps going.

use crate::fen;
use crate::san;
use crate::types::{Color, GameResult, GameState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::BufRead;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the PGN reader. Per-move SAN failures are not errors at
/// this level; they are folded into the move stream (see module docs).
#[derive(Debug, Error)]
pub enum PgnError {
    #[error("PGN read failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Game model
// ---------------------------------------------------------------------------

/// Header tags of a game: the seven-tag roster, common rating/opening
/// extensions, and any remaining tags verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameHeader {
    pub event: Option<String>,
    pub site: Option<String>,
    pub date: Option<String>,
    pub round: Option<String>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub result: Option<GameResult>,
    pub eco: Option<String>,
    pub opening: Option<String>,
    pub white_elo: Option<u32>,
    pub black_elo: Option<u32>,
    pub white_fide_id: Option<u64>,
    pub black_fide_id: Option<u64>,
    pub termination: Option<String>,
    /// Tags outside the recognised set, in input order.
    pub extras: Vec<(String, String)>,
}

impl GameHeader {
    fn set_tag(&mut self, key: &str, value: String) {
        match key {
            "Event" => self.event = Some(value),
            "Site" => self.site = Some(value),
            "Date" => self.date = Some(value),
            "Round" => self.round = Some(value),
            "White" => self.white = Some(value),
            "Black" => self.black = Some(value),
            "Result" => self.result = GameResult::from_token(&value),
            "ECO" => self.eco = Some(value),
            "Opening" => self.opening = Some(value),
            "WhiteElo" => self.white_elo = value.parse().ok(),
            "BlackElo" => self.black_elo = value.parse().ok(),
            "WhiteFideId" => self.white_fide_id = value.parse().ok(),
            "BlackFideId" => self.black_fide_id = value.parse().ok(),
            "Termination" => self.termination = Some(value),
            _ => self.extras.push((key.to_string(), value)),
        }
    }
}

/// One half-move with its derived board context and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveFeature {
    /// 1-based half-move number.
    pub ply_number: u32,
    /// The SAN token as it appeared (annotation glyphs stripped).
    pub san: String,
    /// Source-destination form, absent when the SAN could not be applied.
    pub uci: Option<String>,
    pub fen_before: String,
    pub fen_after: String,
    /// The side that made (or attempted) the move.
    pub side_to_move: Color,
    /// Engine evaluation in centipawns, parsed from `[%eval …]` comments.
    pub eval_cp: Option<i32>,
    pub is_capture: bool,
    pub is_check: bool,
    pub is_mate: bool,
    /// Motif labels attached downstream; empty at parse time.
    pub motifs: BTreeSet<String>,
    pub comments_before: Vec<String>,
    pub comments_after: Vec<String>,
    /// Raw text of variations attached to this move, outer parens stripped.
    pub variations: Vec<String>,
    pub nags: Vec<u16>,
}

/// A fully parsed game: header, replayed move list, and the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub header: GameHeader,
    pub moves: Vec<MoveFeature>,
    pub source_pgn: String,
}

impl Game {
    /// The game result, defaulting to `*` when the header lacks one.
    pub fn result(&self) -> GameResult {
        self.header.result.unwrap_or(GameResult::Ongoing)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Streaming reader that yields games one at a time.
pub struct PgnReader<R: BufRead> {
    reader: R,
    /// A header line read past the end of the previous game.
    lookahead: Option<String>,
    /// Games seen so far, for log context.
    games_read: usize,
}

impl<R: BufRead> PgnReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            lookahead: None,
            games_read: 0,
        }
    }

    /// Reads the next raw line, sanitising to UTF-8. `None` at EOF.
    fn read_line(&mut self) -> Result<Option<String>, PgnError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        // Lossy conversion marks malformed sequences; dropping the marker
        // keeps valid multibyte text intact.
        let line = String::from_utf8_lossy(&buf)
            .replace('\u{FFFD}', "")
            .trim_end_matches(['\r', '\n'])
            .to_string();
        Ok(Some(line))
    }

    /// Accumulates the raw lines of the next game: header tags first, then
    /// movetext until the next header block or EOF.
    fn next_game_text(&mut self) -> Result<Option<(Vec<(String, String)>, String, String)>, PgnError>
    {
        let mut tags = Vec::new();
        let mut movetext = String::new();
        let mut source = String::new();
        let mut seen_any = false;
        let mut in_movetext = false;
        let mut blank_after_tags = false;

        loop {
            let line = match self.lookahead.take() {
                Some(line) => line,
                None => match self.read_line()? {
                    Some(line) => line,
                    None => break,
                },
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                if in_movetext {
                    movetext.push('\n');
                } else if !tags.is_empty() {
                    blank_after_tags = true;
                }
                continue;
            }

            if trimmed.starts_with('[') && (in_movetext || blank_after_tags) {
                // Next game's header; keep it for the following call.
                self.lookahead = Some(line);
                break;
            }

            if trimmed.starts_with('[') && !in_movetext {
                seen_any = true;
                source.push_str(&line);
                source.push('\n');
                if let Some((key, value)) = parse_tag_pair(trimmed) {
                    tags.push((key, value));
                } else {
                    log::warn!("skipping malformed PGN header line: {}", trimmed);
                }
                continue;
            }

            // PGN escape lines start with '%' in column one.
            if line.starts_with('%') {
                continue;
            }

            seen_any = true;
            in_movetext = true;
            source.push_str(&line);
            source.push('\n');
            movetext.push_str(&line);
            movetext.push('\n');
        }

        if seen_any {
            Ok(Some((tags, movetext, source)))
        } else {
            Ok(None)
        }
    }
}

impl<R: BufRead> Iterator for PgnReader<R> {
    type Item = Result<Game, PgnError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_game_text() {
            Err(e) => Some(Err(e)),
            Ok(None) => None,
            Ok(Some((tags, movetext, source))) => {
                self.games_read += 1;

                let mut header = GameHeader::default();
                for (key, value) in tags {
                    header.set_tag(&key, value);
                }

                let label = header
                    .white
                    .as_deref()
                    .zip(header.black.as_deref())
                    .map(|(w, b)| format!("{} - {}", w, b))
                    .unwrap_or_else(|| format!("game #{}", self.games_read));

                let (moves, trailing_result) = replay_movetext(&movetext, &label);

                // A result token in the movetext wins over a missing header tag.
                if header.result.is_none() {
                    header.result = trailing_result;
                }

                Some(Ok(Game {
                    header,
                    moves,
                    source_pgn: source,
                }))
            }
        }
    }
}

/// Parses a `[Key "Value"]` line.
fn parse_tag_pair(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (key, rest) = inner.split_once(char::is_whitespace)?;
    let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((key.to_string(), value.replace("\\\"", "\"")))
}

// ---------------------------------------------------------------------------
// Movetext replay
// ---------------------------------------------------------------------------

/// Tokenises movetext and replays it over a fresh [`GameState`].
///
/// Returns the move features and the trailing result token, if present.
fn replay_movetext(movetext: &str, game_label: &str) -> (Vec<MoveFeature>, Option<GameResult>) {
    let mut state = GameState::initial();
    let mut moves: Vec<MoveFeature> = Vec::new();
    let mut result = None;
    // Comments seen since the last move number, attached to the next move.
    let mut pending_comments: Vec<String> = Vec::new();
    let mut after_move_number = false;

    let chars: Vec<char> = movetext.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '{' {
            let (comment, next) = read_until_balanced(&chars, i + 1, None, '}');
            i = next;
            let text = comment.trim().to_string();
            if text.is_empty() {
                continue;
            }
            if after_move_number || moves.is_empty() {
                pending_comments.push(text);
            } else if let Some(last) = moves.last_mut() {
                if last.eval_cp.is_none() {
                    last.eval_cp = parse_eval_comment(&text);
                }
                last.comments_after.push(text);
            }
            continue;
        }

        if c == ';' {
            // Rest-of-line comment; line breaks survive into the movetext.
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '(' {
            let (variation, next) = read_until_balanced(&chars, i + 1, Some('('), ')');
            i = next;
            if let Some(last) = moves.last_mut() {
                last.variations.push(variation.trim().to_string());
            }
            continue;
        }

        if c == '$' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end].is_ascii_digit() {
                end += 1;
            }
            if end > start
                && let Ok(nag) = chars[start..end].iter().collect::<String>().parse::<u16>()
                && let Some(last) = moves.last_mut()
            {
                last.nags.push(nag);
            }
            i = end.max(start + 1);
            continue;
        }

        // Plain token: result, move number, or SAN.
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && !matches!(chars[i], '{' | '(' | ';' | '$')
        {
            i += 1;
        }
        let token: String = chars[start..i].iter().collect();

        if let Some(r) = GameResult::from_token(&token) {
            result = Some(r);
            continue;
        }

        if is_move_number(&token) {
            after_move_number = true;
            continue;
        }

        // Annotation glyphs ride on the token; the SAN parser does not
        // want them.
        let san_token = token.trim_end_matches(['!', '?']);
        if san_token.is_empty() {
            continue;
        }

        let ply = moves.len() as u32 + 1;
        let fen_before = fen::generate_state(&state);
        let side = state.meta.side_to_move;

        let feature = match san::apply(&state, san_token) {
            Ok((next_state, applied)) => {
                let fen_after = fen::generate_state(&next_state);
                state = next_state;
                MoveFeature {
                    ply_number: ply,
                    san: san_token.to_string(),
                    uci: Some(applied.uci),
                    fen_before,
                    fen_after,
                    side_to_move: side,
                    eval_cp: None,
                    is_capture: applied.is_capture,
                    is_check: applied.is_check,
                    is_mate: applied.is_mate,
                    motifs: BTreeSet::new(),
                    comments_before: std::mem::take(&mut pending_comments),
                    comments_after: Vec::new(),
                    variations: Vec::new(),
                    nags: Vec::new(),
                }
            }
            Err(e) => {
                log::warn!(
                    "{}: ply {}: cannot apply SAN '{}': {}; carrying position forward",
                    game_label,
                    ply,
                    san_token,
                    e
                );
                MoveFeature {
                    ply_number: ply,
                    san: san_token.to_string(),
                    uci: None,
                    fen_before: fen_before.clone(),
                    fen_after: fen_before,
                    side_to_move: side,
                    eval_cp: None,
                    is_capture: false,
                    is_check: false,
                    is_mate: false,
                    motifs: BTreeSet::new(),
                    comments_before: std::mem::take(&mut pending_comments),
                    comments_after: Vec::new(),
                    variations: Vec::new(),
                    nags: Vec::new(),
                }
            }
        };

        moves.push(feature);
        after_move_number = false;
    }

    (moves, result)
}

/// Reads until the matching close delimiter, honouring nesting when an
/// open delimiter is given. Returns the enclosed text and the index just
/// past the close. An unterminated block consumes to the end of input.
fn read_until_balanced(
    chars: &[char],
    mut i: usize,
    open: Option<char>,
    close: char,
) -> (String, usize) {
    let mut depth = 1;
    let mut out = String::new();
    while i < chars.len() {
        let c = chars[i];
        if Some(c) == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return (out, i + 1);
            }
        }
        out.push(c);
        i += 1;
    }
    (out, i)
}

/// A move-number token: digits followed by one or more dots (`1.`, `3...`).
fn is_move_number(token: &str) -> bool {
    let digits: String = token.chars().take_while(char::is_ascii_digit).collect();
    !digits.is_empty() && token[digits.len()..].chars().all(|c| c == '.')
}

/// Parses `[%eval 0.32]` / `[%eval #-3]` comment payloads to centipawns.
fn parse_eval_comment(comment: &str) -> Option<i32> {
    let idx = comment.find("%eval")?;
    let rest = comment[idx + 5..].trim_start();
    let value: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ']')
        .collect();

    if let Some(mate) = value.strip_prefix('#') {
        // Mate scores map to a large fixed magnitude.
        let n: i32 = mate.parse().ok()?;
        return Some(if n >= 0 { 10_000 } else { -10_000 });
    }
    let pawns: f64 = value.parse().ok()?;
    Some((pawns * 100.0).round() as i32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::INITIAL_FEN;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn read_games(pgn: &str) -> Vec<Game> {
        PgnReader::new(Cursor::new(pgn.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    const SIMPLE: &str = "[Event \"Test Match\"]\n\
        [Site \"?\"]\n\
        [Date \"2024.01.05\"]\n\
        [Round \"1\"]\n\
        [White \"Alice\"]\n\
        [Black \"Bob\"]\n\
        [Result \"1-0\"]\n\
        \n\
        1. e4 c5 2. Nf3 1-0\n";

    #[test]
    fn test_simple_game() {
        let games = read_games(SIMPLE);
        assert_eq!(games.len(), 1);
        let game = &games[0];

        assert_eq!(game.header.white.as_deref(), Some("Alice"));
        assert_eq!(game.header.black.as_deref(), Some("Bob"));
        assert_eq!(game.result(), GameResult::WhiteWins);
        assert_eq!(game.moves.len(), 3);

        assert_eq!(game.moves[0].san, "e4");
        assert_eq!(game.moves[0].ply_number, 1);
        assert_eq!(game.moves[0].fen_before, INITIAL_FEN);
        assert_eq!(game.moves[0].side_to_move, Color::White);
        assert_eq!(
            game.moves[2].fen_after,
            "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKB1R b KQkq - 1 2"
        );
    }

    #[test]
    fn test_ply_continuity() {
        let games = read_games(SIMPLE);
        for window in games[0].moves.windows(2) {
            assert_eq!(window[1].fen_before, window[0].fen_after);
        }
    }

    #[test]
    fn test_multiple_games() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n[Result \"1-0\"]\n\n1. e4 1-0\n\n\
                   [White \"C\"]\n[Black \"D\"]\n[Result \"0-1\"]\n\n1. d4 d5 0-1\n";
        let games = read_games(pgn);
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].moves.len(), 1);
        assert_eq!(games[1].moves.len(), 2);
        assert_eq!(games[1].result(), GameResult::BlackWins);
        // Each game restarts from the initial position.
        assert_eq!(games[1].moves[0].fen_before, INITIAL_FEN);
    }

    #[test]
    fn test_comments_nags_variations() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n\n\
                   1. e4 {king pawn} c5!? $2 (1... e5 2. Nf3) 2. Nf3 *\n";
        let games = read_games(pgn);
        let moves = &games[0].moves;
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].comments_after, vec!["king pawn".to_string()]);
        assert_eq!(moves[1].san, "c5");
        assert_eq!(moves[1].nags, vec![2]);
        assert_eq!(moves[1].variations, vec!["1... e5 2. Nf3".to_string()]);
        assert_eq!(games[0].result(), GameResult::Ongoing);
    }

    #[test]
    fn test_nested_variations() {
        let pgn = "[White \"A\"]\n\n1. e4 (1. d4 (1. c4 e5) d5) e5 *\n";
        let games = read_games(pgn);
        let moves = &games[0].moves;
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].variations, vec!["1. d4 (1. c4 e5) d5".to_string()]);
        // The variation moves never advance the mainline state.
        assert_eq!(moves[1].san, "e5");
        assert_eq!(
            moves[1].fen_after,
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2"
        );
    }

    #[test]
    fn test_eval_comment_parsing() {
        let pgn = "[White \"A\"]\n\n1. e4 {[%eval 0.33]} e5 {[%eval #-4]} *\n";
        let games = read_games(pgn);
        let moves = &games[0].moves;
        assert_eq!(moves[0].eval_cp, Some(33));
        assert_eq!(moves[1].eval_cp, Some(-10_000));
    }

    #[test]
    fn test_bad_move_carries_state() {
        let pgn = "[White \"A\"]\n[Result \"*\"]\n\n1. e4 Qxh9 2. d4 *\n";
        let games = read_games(pgn);
        let moves = &games[0].moves;
        assert_eq!(moves.len(), 3);

        // The bad move keeps the position and has no uci.
        assert_eq!(moves[1].uci, None);
        assert_eq!(moves[1].fen_before, moves[1].fen_after);
        assert_eq!(moves[1].fen_before, moves[0].fen_after);

        // Replay continues from the carried state; "2. d4" is now played
        // by Black's side slot in the carried position (still Black to move).
        assert_eq!(moves[2].fen_before, moves[1].fen_after);
    }

    #[test]
    fn test_header_extras_and_ratings() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n[WhiteElo \"2810\"]\n[BlackElo \"2700\"]\n\
                   [WhiteFideId \"1503014\"]\n[ECO \"B90\"]\n[Opening \"Sicilian\"]\n\
                   [Annotator \"rybka\"]\n\n1. e4 *\n";
        let games = read_games(pgn);
        let header = &games[0].header;
        assert_eq!(header.white_elo, Some(2810));
        assert_eq!(header.black_elo, Some(2700));
        assert_eq!(header.white_fide_id, Some(1503014));
        assert_eq!(header.eco.as_deref(), Some("B90"));
        assert_eq!(header.opening.as_deref(), Some("Sicilian"));
        assert_eq!(
            header.extras,
            vec![("Annotator".to_string(), "rybka".to_string())]
        );
    }

    #[test]
    fn test_malformed_utf8_dropped() {
        let mut bytes = b"[White \"Mot".to_vec();
        bytes.push(0xFF); // invalid UTF-8 byte inside the name
        bytes.extend_from_slice(b"or\"]\n\n1. e4 *\n");
        let games: Vec<Game> = PgnReader::new(Cursor::new(bytes))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(games[0].header.white.as_deref(), Some("Motor"));
    }

    #[test]
    fn test_castling_and_checks_in_movetext() {
        let pgn = "[White \"A\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 4. Ba4 Nf6 5. O-O *\n";
        let games = read_games(pgn);
        let moves = &games[0].moves;
        assert_eq!(moves.len(), 9);
        let castle = &moves[8];
        assert_eq!(castle.san, "O-O");
        assert_eq!(castle.uci.as_deref(), Some("e1g1"));
        assert!(castle.fen_after.contains(" b kq "));
    }

    #[test]
    fn test_source_pgn_preserved() {
        let games = read_games(SIMPLE);
        assert!(games[0].source_pgn.contains("[Event \"Test Match\"]"));
        assert!(games[0].source_pgn.contains("1. e4 c5 2. Nf3 1-0"));
    }

    #[test]
    fn test_empty_input() {
        assert!(read_games("").is_empty());
        assert!(read_games("\n\n\n").is_empty());
    }
}
