//! Store contract for the ingestion pipeline.
//!
//! The orchestrator owns this interface; any backend must satisfy it. The
//! operations are idempotent upserts keyed by the natural uniqueness of
//! each entity (player identity, batch checksum, game tuple, FEN text,
//! position ply, detection triple), so re-ingesting a file converges to
//! the same rows. A Postgres implementation lives in [`crate::db`]; the
//! [`MemoryStore`] here backs tests and dry runs.

use crate::patterns::SuccessOutcome;
use crate::pgn::MoveFeature;
use crate::types::{Color, GameResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Ids & outcomes
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Row id of a player.
    PlayerId
);
id_type!(
    /// Row id of an ingestion batch.
    BatchId
);
id_type!(
    /// Row id of a game.
    GameId
);
id_type!(
    /// Row id of a unique FEN.
    FenId
);

/// Whether an upsert created the row or found it already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Existing,
}

impl UpsertOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, UpsertOutcome::Inserted)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Store transport and lookup failures. Uniqueness conflicts never
/// surface here; upsert semantics absorb them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Everything needed to persist one game row.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub batch: BatchId,
    pub white: PlayerId,
    pub black: PlayerId,
    pub event: Option<String>,
    pub site: Option<String>,
    pub date: Option<String>,
    pub round: Option<String>,
    pub eco: Option<String>,
    pub opening: Option<String>,
    pub white_elo: Option<u32>,
    pub black_elo: Option<u32>,
    pub result: GameResult,
    pub termination: Option<String>,
    /// Content hash of the game's own PGN text.
    pub pgn_hash: String,
    pub source_pgn: String,
}

/// One pattern detection to persist, keyed by `(game, pattern, color)`.
#[derive(Debug, Clone)]
pub struct DetectionRecord {
    pub game: GameId,
    pub pattern_id: String,
    pub detected_by: Color,
    pub success: bool,
    pub confidence: f64,
    pub start_ply: Option<u32>,
    pub end_ply: Option<u32>,
    pub outcome: SuccessOutcome,
    pub metadata: serde_json::Value,
}

/// A game row as returned by the retrieval queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSummary {
    pub id: GameId,
    pub white: String,
    pub black: String,
    pub date: Option<String>,
    pub eco: Option<String>,
    pub result: String,
}

/// A game matched through a pattern detection.
#[derive(Debug, Clone)]
pub struct PatternGameSummary {
    pub game: GameSummary,
    pub detected_by: Color,
    pub confidence: f64,
    pub success: bool,
}

/// A stored position ranked by vector similarity.
#[derive(Debug, Clone)]
pub struct SimilarPosition {
    pub fen: FenId,
    pub fen_text: String,
    /// Cosine similarity against the query vector.
    pub score: f64,
}

// ---------------------------------------------------------------------------
// The contract
// ---------------------------------------------------------------------------

/// Operations the ingestion orchestrator requires of a backend.
///
/// Every method is a potential suspension point; implementations must be
/// safe to call from concurrently running game tasks.
#[async_trait]
pub trait ChessStore: Send + Sync {
    /// Upserts a player: unique by FIDE id when present, otherwise by
    /// trimmed, lowercased name.
    async fn upsert_player(
        &self,
        full_name: &str,
        fide_id: Option<u64>,
    ) -> Result<PlayerId, StoreError>;

    /// Creates (or finds) an ingestion batch, unique by checksum.
    async fn create_batch(
        &self,
        source_path: &str,
        label: &str,
        checksum: &str,
    ) -> Result<(BatchId, UpsertOutcome), StoreError>;

    /// Records a game, unique by `(white, black, date, round, pgn_hash)`.
    /// An existing id is returned for duplicates.
    async fn record_game(&self, game: &GameRecord) -> Result<(GameId, UpsertOutcome), StoreError>;

    /// Upserts a unique FEN row.
    async fn upsert_fen(
        &self,
        fen_text: &str,
        side_to_move: Color,
        castling: &str,
        en_passant: Option<&str>,
        material_signature: &str,
    ) -> Result<(FenId, UpsertOutcome), StoreError>;

    /// Upserts the position of `game` at `ply`.
    async fn record_position(
        &self,
        game: GameId,
        ply: u32,
        fen: FenId,
        feature: &MoveFeature,
    ) -> Result<(), StoreError>;

    /// Whether the FEN already carries an embedding.
    async fn has_embedding(&self, fen: FenId) -> Result<bool, StoreError>;

    /// Upserts the embedding for a FEN.
    async fn record_embedding(
        &self,
        fen: FenId,
        vector: &[f32],
        version: &str,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Upserts a pattern detection.
    async fn record_pattern_detection(&self, record: &DetectionRecord) -> Result<(), StoreError>;

    // -- retrieval ---------------------------------------------------------

    /// Games where either player's name contains `name` (case-insensitive).
    async fn games_by_player(&self, name: &str) -> Result<Vec<GameSummary>, StoreError>;

    /// Games with a positive detection of `pattern_id`.
    async fn games_by_pattern(
        &self,
        pattern_id: &str,
        successful_only: bool,
    ) -> Result<Vec<PatternGameSummary>, StoreError>;

    /// Stored positions ranked by cosine similarity to `vector`.
    async fn similar_positions(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarPosition>, StoreError>;
}

/// Player-name normalisation used for identity when no FIDE id exists.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemPlayer {
    full_name: String,
    normalized: String,
    fide_id: Option<u64>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    players: Vec<MemPlayer>,
    batches: Vec<(String, String, String)>,
    games: Vec<GameRecord>,
    /// Uniqueness key of each game row, parallel to `games`.
    game_keys: Vec<(PlayerId, PlayerId, String, String, String)>,
    fens: Vec<String>,
    fen_index: HashMap<String, FenId>,
    positions: HashMap<(GameId, u32), (FenId, MoveFeature)>,
    embeddings: HashMap<FenId, (Vec<f32>, String)>,
    detections: HashMap<(GameId, String, Color), DetectionRecord>,
}

/// HashMap-backed store for tests and `--dry-run` ingestion. Enforces the
/// same uniqueness keys as the Postgres backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of game rows (test observability).
    pub fn game_count(&self) -> usize {
        self.inner.lock().unwrap().games.len()
    }

    /// Number of unique FEN rows.
    pub fn fen_count(&self) -> usize {
        self.inner.lock().unwrap().fens.len()
    }

    /// Number of position rows.
    pub fn position_count(&self) -> usize {
        self.inner.lock().unwrap().positions.len()
    }

    /// Number of embedding rows.
    pub fn embedding_count(&self) -> usize {
        self.inner.lock().unwrap().embeddings.len()
    }

    /// Number of detection rows.
    pub fn detection_count(&self) -> usize {
        self.inner.lock().unwrap().detections.len()
    }
}

#[async_trait]
impl ChessStore for MemoryStore {
    async fn upsert_player(
        &self,
        full_name: &str,
        fide_id: Option<u64>,
    ) -> Result<PlayerId, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let normalized = normalize_name(full_name);

        let existing = inner.players.iter().position(|p| match fide_id {
            Some(id) => p.fide_id == Some(id),
            None => p.fide_id.is_none() && p.normalized == normalized,
        });
        if let Some(index) = existing {
            return Ok(PlayerId(index as i64 + 1));
        }

        inner.players.push(MemPlayer {
            full_name: full_name.trim().to_string(),
            normalized,
            fide_id,
        });
        Ok(PlayerId(inner.players.len() as i64))
    }

    async fn create_batch(
        &self,
        source_path: &str,
        label: &str,
        checksum: &str,
    ) -> Result<(BatchId, UpsertOutcome), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(index) = inner.batches.iter().position(|(_, _, c)| c == checksum) {
            return Ok((BatchId(index as i64 + 1), UpsertOutcome::Existing));
        }
        inner
            .batches
            .push((source_path.to_string(), label.to_string(), checksum.to_string()));
        Ok((BatchId(inner.batches.len() as i64), UpsertOutcome::Inserted))
    }

    async fn record_game(&self, game: &GameRecord) -> Result<(GameId, UpsertOutcome), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (
            game.white,
            game.black,
            game.date.clone().unwrap_or_default(),
            game.round.clone().unwrap_or_default(),
            game.pgn_hash.clone(),
        );
        if let Some(index) = inner.game_keys.iter().position(|k| *k == key) {
            return Ok((GameId(index as i64 + 1), UpsertOutcome::Existing));
        }
        inner.games.push(game.clone());
        inner.game_keys.push(key);
        Ok((GameId(inner.games.len() as i64), UpsertOutcome::Inserted))
    }

    async fn upsert_fen(
        &self,
        fen_text: &str,
        _side_to_move: Color,
        _castling: &str,
        _en_passant: Option<&str>,
        _material_signature: &str,
    ) -> Result<(FenId, UpsertOutcome), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.fen_index.get(fen_text) {
            return Ok((id, UpsertOutcome::Existing));
        }
        inner.fens.push(fen_text.to_string());
        let id = FenId(inner.fens.len() as i64);
        inner.fen_index.insert(fen_text.to_string(), id);
        Ok((id, UpsertOutcome::Inserted))
    }

    async fn record_position(
        &self,
        game: GameId,
        ply: u32,
        fen: FenId,
        feature: &MoveFeature,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.positions.insert((game, ply), (fen, feature.clone()));
        Ok(())
    }

    async fn has_embedding(&self, fen: FenId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().embeddings.contains_key(&fen))
    }

    async fn record_embedding(
        &self,
        fen: FenId,
        vector: &[f32],
        version: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let outcome = if inner.embeddings.contains_key(&fen) {
            UpsertOutcome::Existing
        } else {
            UpsertOutcome::Inserted
        };
        inner
            .embeddings
            .insert(fen, (vector.to_vec(), version.to_string()));
        Ok(outcome)
    }

    async fn record_pattern_detection(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (record.game, record.pattern_id.clone(), record.detected_by);
        inner.detections.insert(key, record.clone());
        Ok(())
    }

    async fn games_by_player(&self, name: &str) -> Result<Vec<GameSummary>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let needle = normalize_name(name);
        let player_name = |id: PlayerId| {
            inner
                .players
                .get(id.0 as usize - 1)
                .map(|p| p.full_name.clone())
                .unwrap_or_default()
        };

        Ok(inner
            .games
            .iter()
            .enumerate()
            .filter(|(_, g)| {
                [g.white, g.black].iter().any(|id| {
                    inner
                        .players
                        .get(id.0 as usize - 1)
                        .is_some_and(|p| p.normalized.contains(&needle))
                })
            })
            .map(|(index, g)| GameSummary {
                id: GameId(index as i64 + 1),
                white: player_name(g.white),
                black: player_name(g.black),
                date: g.date.clone(),
                eco: g.eco.clone(),
                result: g.result.as_str().to_string(),
            })
            .collect())
    }

    async fn games_by_pattern(
        &self,
        pattern_id: &str,
        successful_only: bool,
    ) -> Result<Vec<PatternGameSummary>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<PatternGameSummary> = inner
            .detections
            .values()
            .filter(|d| d.pattern_id == pattern_id && (!successful_only || d.success))
            .filter_map(|d| {
                let game = inner.games.get(d.game.0 as usize - 1)?;
                let name = |id: PlayerId| {
                    inner
                        .players
                        .get(id.0 as usize - 1)
                        .map(|p| p.full_name.clone())
                        .unwrap_or_default()
                };
                Some(PatternGameSummary {
                    game: GameSummary {
                        id: d.game,
                        white: name(game.white),
                        black: name(game.black),
                        date: game.date.clone(),
                        eco: game.eco.clone(),
                        result: game.result.as_str().to_string(),
                    },
                    detected_by: d.detected_by,
                    confidence: d.confidence,
                    success: d.success,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(rows)
    }

    async fn similar_positions(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarPosition>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut scored: Vec<SimilarPosition> = inner
            .embeddings
            .iter()
            .map(|(&fen, (stored, _))| {
                let score: f64 = stored
                    .iter()
                    .zip(vector)
                    .map(|(a, b)| (*a as f64) * (*b as f64))
                    .sum();
                SimilarPosition {
                    fen,
                    fen_text: inner.fens[fen.0 as usize - 1].clone(),
                    score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Debug dump of a detection record (used by `--dry-run` logging).
pub fn detection_json(record: &DetectionRecord) -> serde_json::Value {
    json!({
        "game": record.game.0,
        "pattern": record.pattern_id,
        "color": record.detected_by,
        "success": record.success,
        "confidence": record.confidence,
        "outcome": record.outcome.as_str(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameResult;

    fn sample_game(white: PlayerId, black: PlayerId, hash: &str) -> GameRecord {
        GameRecord {
            batch: BatchId(1),
            white,
            black,
            event: Some("Test".into()),
            site: None,
            date: Some("2024.01.05".into()),
            round: Some("1".into()),
            eco: Some("B90".into()),
            opening: None,
            white_elo: Some(2800),
            black_elo: Some(2750),
            result: GameResult::WhiteWins,
            termination: None,
            pgn_hash: hash.to_string(),
            source_pgn: String::new(),
        }
    }

    #[tokio::test]
    async fn test_player_identity_by_fide_then_name() {
        let store = MemoryStore::new();
        let a = store.upsert_player("Magnus Carlsen", Some(1503014)).await.unwrap();
        let b = store.upsert_player("Carlsen, Magnus", Some(1503014)).await.unwrap();
        assert_eq!(a, b);

        // Without a FIDE id, identity falls back to the normalised name.
        let c = store.upsert_player("  Judit POLGAR ", None).await.unwrap();
        let d = store.upsert_player("judit polgar", None).await.unwrap();
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_batch_unique_by_checksum() {
        let store = MemoryStore::new();
        let (b1, o1) = store.create_batch("a.pgn", "first", "abc").await.unwrap();
        let (b2, o2) = store.create_batch("b.pgn", "second", "abc").await.unwrap();
        assert_eq!(b1, b2);
        assert!(o1.is_inserted());
        assert!(!o2.is_inserted());
    }

    #[tokio::test]
    async fn test_game_dedupe() {
        let store = MemoryStore::new();
        let w = store.upsert_player("A", None).await.unwrap();
        let b = store.upsert_player("B", None).await.unwrap();

        let (g1, o1) = store.record_game(&sample_game(w, b, "h1")).await.unwrap();
        let (g2, o2) = store.record_game(&sample_game(w, b, "h1")).await.unwrap();
        assert_eq!(g1, g2);
        assert!(o1.is_inserted());
        assert!(!o2.is_inserted());

        let (g3, _) = store.record_game(&sample_game(w, b, "h2")).await.unwrap();
        assert_ne!(g1, g3);
    }

    #[tokio::test]
    async fn test_fen_dedupe_and_embeddings() {
        let store = MemoryStore::new();
        let (f1, o1) = store
            .upsert_fen("fen-a", Color::White, "KQkq", None, "sig")
            .await
            .unwrap();
        let (f2, o2) = store
            .upsert_fen("fen-a", Color::White, "KQkq", None, "sig")
            .await
            .unwrap();
        assert_eq!(f1, f2);
        assert!(o1.is_inserted() && !o2.is_inserted());

        assert!(!store.has_embedding(f1).await.unwrap());
        let o = store.record_embedding(f1, &[1.0, 0.0], "v1").await.unwrap();
        assert!(o.is_inserted());
        assert!(store.has_embedding(f1).await.unwrap());
        let o = store.record_embedding(f1, &[0.0, 1.0], "v1").await.unwrap();
        assert!(!o.is_inserted());
        assert_eq!(store.embedding_count(), 1);
    }

    #[tokio::test]
    async fn test_similarity_ranking() {
        let store = MemoryStore::new();
        let (f1, _) = store.upsert_fen("fen-a", Color::White, "-", None, "s").await.unwrap();
        let (f2, _) = store.upsert_fen("fen-b", Color::White, "-", None, "s").await.unwrap();
        store.record_embedding(f1, &[1.0, 0.0], "v1").await.unwrap();
        store.record_embedding(f2, &[0.0, 1.0], "v1").await.unwrap();

        let hits = store.similar_positions(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fen, f1);
        assert_eq!(hits[0].fen_text, "fen-a");
    }

    #[tokio::test]
    async fn test_games_by_player_substring() {
        let store = MemoryStore::new();
        let w = store.upsert_player("Garry Kasparov", None).await.unwrap();
        let b = store.upsert_player("Anatoly Karpov", None).await.unwrap();
        store.record_game(&sample_game(w, b, "h1")).await.unwrap();

        let rows = store.games_by_player("kasparov").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].white, "Garry Kasparov");
        assert!(store.games_by_player("fischer").await.unwrap().is_empty());
    }
}
