//! # chessvault — PGN corpus ingestion with pattern detection
//!
//! chessvault ingests archives of chess games (PGN, optionally
//! zstd-compressed), replays every game move by move with its own chess
//! core, and persists the corpus into Postgres:
//!
//! - **Chess core** ([`types`], [`fen`], [`san`]): a value-semantic board
//!   model, a strict round-trip FEN codec, and SAN parsing with
//!   disambiguation and full castling/en-passant/halfmove bookkeeping.
//! - **Streaming PGN parser** ([`pgn`]): yields one game at a time,
//!   deriving the exact before/after FEN of every half-move.
//! - **Pattern detection** ([`patterns`], [`pawns`]): strategic
//!   (queenside majority, minority attack), tactical (greek gift) and
//!   endgame (Lucena, Philidor) detectors with confidence scoring and
//!   success classification.
//! - **Ingestion pipeline** ([`ingest`], [`store`], [`db`],
//!   [`embedder`]): deduplicates players, games and positions behind
//!   idempotent upserts, attaches a fixed-dimension embedding to every
//!   unique FEN, and supports retrieval by player, pattern, or vector
//!   similarity.

pub mod db;
pub mod embedder;
pub mod fen;
pub mod ingest;
pub mod patterns;
pub mod pawns;
pub mod pgn;
pub mod san;
pub mod store;
pub mod types;
