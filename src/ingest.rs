//! Ingestion orchestrator.
//!
//! Drives the full pipeline for one PGN source: checksum and batch
//! creation, streaming game parse, player/game/position persistence, FEN
//! deduplication, embedding generation, and pattern detection. Games may
//! be processed concurrently up to a configured fan-out; the moves of one
//! game are always handled in order, and a game's detections are recorded
//! only after all of its positions.
//!
//! Failure policy: a store error while persisting a game abandons that
//! game (logged, counted as skipped) and ingestion continues; a failed
//! embedding never blocks the position row — a later re-run fills the gap
//! because every write is an idempotent upsert.

use crate::embedder::Embedder;
use crate::patterns::DetectorRegistry;
use crate::pgn::{Game, PgnReader};
use crate::store::{BatchId, ChessStore, DetectionRecord, GameRecord, StoreError};
use crate::{fen, store};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Errors & summary
// ---------------------------------------------------------------------------

/// Fatal ingestion failures. Everything else is folded into logs and the
/// skip counters.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read source {path}: {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decompress source {path}: {source}")]
    Decompress {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Batch-level store failure; nothing from this file was ingested.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one ingestion run did. Rendered by the CLI and logged at `info`.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub batch: BatchId,
    pub label: String,
    pub source_path: String,
    pub checksum: String,
    pub games_seen: usize,
    pub games_ingested: usize,
    /// Games already present (same game key); their moves were skipped.
    pub games_duplicate: usize,
    /// Games abandoned on a store error.
    pub games_skipped: usize,
    pub moves_replayed: usize,
    pub positions_recorded: usize,
    /// FEN rows newly created by this run.
    pub unique_fens: usize,
    pub embeddings_generated: usize,
    /// Positive detections per pattern id.
    pub detections: BTreeMap<String, usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestSummary {
    pub fn log(&self) {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        log::info!(
            "batch {} ('{}') done in {}ms: {} games seen, {} ingested, {} duplicate, {} skipped",
            self.batch,
            self.label,
            elapsed,
            self.games_seen,
            self.games_ingested,
            self.games_duplicate,
            self.games_skipped
        );
        log::info!(
            "  {} moves, {} positions, {} new FENs, {} embeddings",
            self.moves_replayed,
            self.positions_recorded,
            self.unique_fens,
            self.embeddings_generated
        );
        for (pattern, count) in &self.detections {
            log::info!("  pattern {}: {} detections", pattern, count);
        }
    }
}

/// Per-game counters merged into the summary.
#[derive(Debug, Default)]
struct GameStats {
    duplicate: bool,
    moves: usize,
    positions: usize,
    fens_inserted: usize,
    embeddings: usize,
    detections: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The ingestion pipeline: a store, an embedder, and the detector
/// registry, shared across concurrently processed games.
pub struct Ingestor {
    store: Arc<dyn ChessStore>,
    embedder: Arc<dyn Embedder>,
    registry: Arc<DetectorRegistry>,
    fan_out: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ChessStore>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<DetectorRegistry>,
        fan_out: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            registry,
            fan_out: fan_out.max(1),
        }
    }

    /// Ingests one file. `.zst` sources are decompressed transparently.
    pub async fn ingest_file(&self, path: &Path, label: &str) -> Result<IngestSummary, IngestError> {
        let raw = std::fs::read(path).map_err(|e| IngestError::Source {
            path: path.display().to_string(),
            source: e,
        })?;

        let bytes = if path.extension().is_some_and(|ext| ext == "zst") {
            zstd::decode_all(raw.as_slice()).map_err(|e| IngestError::Decompress {
                path: path.display().to_string(),
                source: e,
            })?
        } else {
            raw
        };

        self.ingest_bytes(bytes, &path.display().to_string(), label).await
    }

    /// Ingests an in-memory PGN corpus; the unit behind [`Self::ingest_file`].
    pub async fn ingest_bytes(
        &self,
        bytes: Vec<u8>,
        source_path: &str,
        label: &str,
    ) -> Result<IngestSummary, IngestError> {
        let started_at = Utc::now();
        let checksum = hex_digest(&bytes);

        let (batch, outcome) = self.store.create_batch(source_path, label, &checksum).await?;
        if !outcome.is_inserted() {
            log::info!(
                "batch checksum {} already ingested as batch {}; re-running idempotently",
                &checksum[..12],
                batch
            );
        }
        log::info!("ingesting {} as batch {} ('{}')", source_path, batch, label);

        let mut summary = IngestSummary {
            batch,
            label: label.to_string(),
            source_path: source_path.to_string(),
            checksum,
            games_seen: 0,
            games_ingested: 0,
            games_duplicate: 0,
            games_skipped: 0,
            moves_replayed: 0,
            positions_recorded: 0,
            unique_fens: 0,
            embeddings_generated: 0,
            detections: BTreeMap::new(),
            started_at,
            finished_at: started_at,
        };

        let mut tasks: JoinSet<Result<GameStats, StoreError>> = JoinSet::new();

        for parsed in PgnReader::new(Cursor::new(bytes)) {
            let game = match parsed {
                Ok(game) => game,
                Err(e) => {
                    log::error!("PGN stream error: {}; aborting file", e);
                    break;
                }
            };
            summary.games_seen += 1;

            if summary.games_seen % 500 == 0 {
                log::info!("…{} games read", summary.games_seen);
            }

            // Bounded fan-out: wait for a slot before spawning the next game.
            while tasks.len() >= self.fan_out {
                if let Some(joined) = tasks.join_next().await {
                    merge(&mut summary, joined);
                }
            }

            let store = Arc::clone(&self.store);
            let embedder = Arc::clone(&self.embedder);
            let registry = Arc::clone(&self.registry);
            tasks.spawn(async move {
                process_game(store.as_ref(), embedder.as_ref(), &registry, batch, game).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            merge(&mut summary, joined);
        }

        summary.finished_at = Utc::now();
        summary.log();
        Ok(summary)
    }
}

/// Folds a finished game task into the summary.
fn merge(
    summary: &mut IngestSummary,
    joined: Result<Result<GameStats, StoreError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(stats)) => {
            if stats.duplicate {
                summary.games_duplicate += 1;
            } else {
                summary.games_ingested += 1;
            }
            summary.moves_replayed += stats.moves;
            summary.positions_recorded += stats.positions;
            summary.unique_fens += stats.fens_inserted;
            summary.embeddings_generated += stats.embeddings;
            for pattern in stats.detections {
                *summary.detections.entry(pattern).or_insert(0) += 1;
            }
        }
        Ok(Err(e)) => {
            log::error!("game abandoned on store error: {}", e);
            summary.games_skipped += 1;
        }
        Err(e) => {
            log::error!("game task failed: {}", e);
            summary.games_skipped += 1;
        }
    }
}

/// Persists one game end to end: players, game row, positions with FEN
/// dedupe and embeddings, then pattern detections.
async fn process_game(
    store: &dyn ChessStore,
    embedder: &dyn Embedder,
    registry: &DetectorRegistry,
    batch: BatchId,
    game: Game,
) -> Result<GameStats, StoreError> {
    let mut stats = GameStats {
        moves: game.moves.len(),
        ..GameStats::default()
    };

    let header = &game.header;
    let white_name = header.white.as_deref().unwrap_or("Unknown");
    let black_name = header.black.as_deref().unwrap_or("Unknown");
    let white = store.upsert_player(white_name, header.white_fide_id).await?;
    let black = store.upsert_player(black_name, header.black_fide_id).await?;

    let record = GameRecord {
        batch,
        white,
        black,
        event: header.event.clone(),
        site: header.site.clone(),
        date: header.date.clone(),
        round: header.round.clone(),
        eco: header.eco.clone(),
        opening: header.opening.clone(),
        white_elo: header.white_elo,
        black_elo: header.black_elo,
        result: game.result(),
        termination: header.termination.clone(),
        pgn_hash: hex_digest(game.source_pgn.as_bytes()),
        source_pgn: game.source_pgn.clone(),
    };
    let (game_id, outcome) = store.record_game(&record).await?;

    if !outcome.is_inserted() {
        log::debug!(
            "duplicate game {} vs {} ({}); moves skipped",
            white_name,
            black_name,
            game_id
        );
        stats.duplicate = true;
        return Ok(stats);
    }

    // Positions, in ply order. Each unique FEN gets one embedding.
    for feature in &game.moves {
        let (side, castling, en_passant, material) = match fen::parse(&feature.fen_after) {
            Ok((board, meta)) => (
                meta.side_to_move,
                meta.castling.to_fen(),
                meta.en_passant.map(|sq| sq.to_algebraic()),
                board.material_signature(),
            ),
            Err(e) => {
                // Cannot happen for FENs the replayer generated; guard anyway.
                log::warn!("game {}: ply {}: bad FEN: {}", game_id, feature.ply_number, e);
                continue;
            }
        };

        let (fen_id, fen_outcome) = store
            .upsert_fen(
                &feature.fen_after,
                side,
                &castling,
                en_passant.as_deref(),
                &material,
            )
            .await?;
        if fen_outcome.is_inserted() {
            stats.fens_inserted += 1;
        }

        store
            .record_position(game_id, feature.ply_number, fen_id, feature)
            .await?;
        stats.positions += 1;

        // Embed newly seen FENs, and fill holes left by earlier failures.
        let needs_embedding =
            fen_outcome.is_inserted() || !store.has_embedding(fen_id).await?;
        if needs_embedding {
            match embedder.embed(&feature.fen_after).await {
                Ok(vector) => {
                    let _ = store
                        .record_embedding(fen_id, &vector, embedder.version())
                        .await?;
                    stats.embeddings += 1;
                }
                Err(e) => {
                    log::warn!(
                        "game {}: embedding failed for ply {}: {}; position kept",
                        game_id,
                        feature.ply_number,
                        e
                    );
                }
            }
        }
    }

    // Detections only after every position row is in.
    let result = game.result();
    for detector in registry.list() {
        let detection = detector.detect(&game.moves, result);
        if !detection.detected {
            continue;
        }
        let (success, outcome) = detector.classify_success(&detection, result);
        let record = DetectionRecord {
            game: game_id,
            pattern_id: detector.pattern_id().to_string(),
            detected_by: detection
                .initiating_color
                .unwrap_or(crate::types::Color::White),
            success,
            confidence: detection.confidence,
            start_ply: detection.start_ply,
            end_ply: detection.end_ply,
            outcome,
            metadata: detection.metadata.clone(),
        };
        log::debug!("detection: {}", store::detection_json(&record));
        store.record_pattern_detection(&record).await?;
        stats.detections.push(detector.pattern_id().to_string());
    }

    Ok(stats)
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::FeatureHashEmbedder;
    use crate::patterns::default_registry;
    use crate::store::MemoryStore;

    const CORPUS: &str = "\
[Event \"Club\"]\n[Site \"?\"]\n[Date \"2024.02.01\"]\n[Round \"1\"]\n\
[White \"Alice\"]\n[Black \"Bob\"]\n[Result \"1-0\"]\n\
\n\
1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0\n\
\n\
[Event \"Club\"]\n[Site \"?\"]\n[Date \"2024.02.01\"]\n[Round \"2\"]\n\
[White \"Bob\"]\n[Black \"Alice\"]\n[Result \"1/2-1/2\"]\n\
\n\
1. d4 d5 1/2-1/2\n";

    fn pipeline(store: Arc<MemoryStore>) -> Ingestor {
        Ingestor::new(
            store,
            Arc::new(FeatureHashEmbedder::new(32)),
            Arc::new(default_registry()),
            2,
        )
    }

    #[tokio::test]
    async fn test_ingest_small_corpus() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(Arc::clone(&store));

        let summary = ingestor
            .ingest_bytes(CORPUS.as_bytes().to_vec(), "corpus.pgn", "club-feb")
            .await
            .unwrap();

        assert_eq!(summary.games_seen, 2);
        assert_eq!(summary.games_ingested, 2);
        assert_eq!(summary.games_skipped, 0);
        assert_eq!(summary.moves_replayed, 8);
        assert_eq!(summary.positions_recorded, 8);
        // All eight positions are distinct.
        assert_eq!(summary.unique_fens, 8);
        assert_eq!(summary.embeddings_generated, 8);

        assert_eq!(store.game_count(), 2);
        assert_eq!(store.position_count(), 8);
        assert_eq!(store.fen_count(), 8);
        assert_eq!(store.embedding_count(), 8);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(Arc::clone(&store));

        let first = ingestor
            .ingest_bytes(CORPUS.as_bytes().to_vec(), "corpus.pgn", "run-1")
            .await
            .unwrap();
        let second = ingestor
            .ingest_bytes(CORPUS.as_bytes().to_vec(), "corpus.pgn", "run-2")
            .await
            .unwrap();

        assert_eq!(first.batch, second.batch);
        assert_eq!(second.games_duplicate, 2);
        assert_eq!(second.games_ingested, 0);
        assert_eq!(second.unique_fens, 0);
        assert_eq!(store.game_count(), 2);
        assert_eq!(store.position_count(), 8);
    }

    #[tokio::test]
    async fn test_players_deduplicated_across_games() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(Arc::clone(&store));
        ingestor
            .ingest_bytes(CORPUS.as_bytes().to_vec(), "corpus.pgn", "run")
            .await
            .unwrap();

        // Alice and Bob appear in both games under the same ids.
        let alice = store.games_by_player("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_file_with_zst(){
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(Arc::clone(&store));

        let dir = std::env::temp_dir().join(format!("chessvault_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corpus.pgn.zst");
        let compressed = zstd::encode_all(CORPUS.as_bytes(), 3).unwrap();
        std::fs::write(&path, compressed).unwrap();

        let summary = ingestor.ingest_file(&path, "compressed").await.unwrap();
        assert_eq!(summary.games_seen, 2);
        assert_eq!(summary.games_ingested, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unreadable_source_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(store);
        let err = ingestor
            .ingest_file(Path::new("/nonexistent/missing.pgn"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Source { .. }));
    }

    #[tokio::test]
    async fn test_detections_recorded() {
        // A miniature ending in a queenside-majority conversion shape is
        // hard to script briefly; the greek gift is notational and easy.
        let pgn = "[White \"A\"]\n[Black \"B\"]\n[Result \"1-0\"]\n\n\
                   1. e4 e5 2. Bc4 Nc6 3. d3 Nd4 4. Bxf7 1-0\n";
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(Arc::clone(&store));
        let summary = ingestor
            .ingest_bytes(pgn.as_bytes().to_vec(), "mini.pgn", "mini")
            .await
            .unwrap();

        // No pattern fires here; the summary stays empty rather than
        // inventing detections.
        assert!(summary.detections.is_empty());
        assert_eq!(store.detection_count(), 0);
    }

    #[tokio::test]
    async fn test_greek_gift_detection_flows_to_store() {
        let pgn = "[White \"A\"]\n[Black \"B\"]\n[Result \"1-0\"]\n\n\
                   1. e4 d5 2. e5 d4 3. Bd3 Nc6 4. Bxh7 1-0\n";
        let store = Arc::new(MemoryStore::new());
        let ingestor = pipeline(Arc::clone(&store));
        let summary = ingestor
            .ingest_bytes(pgn.as_bytes().to_vec(), "gift.pgn", "gift")
            .await
            .unwrap();

        assert_eq!(summary.detections.get("greek_gift"), Some(&1));
        assert_eq!(store.detection_count(), 1);

        let rows = store.games_by_pattern("greek_gift", true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
    }
}
