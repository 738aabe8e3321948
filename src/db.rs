//! Postgres store backend.
//!
//! Implements [`ChessStore`] on a `sqlx` connection pool. The schema is
//! created idempotently at startup; every write is a single upsert
//! statement with `ON CONFLICT`, so concurrent game tasks and re-runs
//! converge without explicit locking. Embeddings are stored as `FLOAT8[]`
//! and similarity is a dot product computed in SQL — vectors are
//! L2-normalised by the embedder, so the dot product is cosine similarity.

use crate::store::{
    BatchId, ChessStore, DetectionRecord, FenId, GameId, GameRecord, GameSummary,
    PatternGameSummary, PlayerId, SimilarPosition, StoreError, UpsertOutcome, normalize_name,
};
use crate::pgn::MoveFeature;
use crate::types::Color;
use async_trait::async_trait;
use serde_json::json;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Statements that build the schema. Executed in order, each idempotent.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS players (
        id BIGSERIAL PRIMARY KEY,
        full_name TEXT NOT NULL,
        normalized_name TEXT NOT NULL,
        fide_id BIGINT UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS players_name_key
        ON players (normalized_name) WHERE fide_id IS NULL",
    "CREATE TABLE IF NOT EXISTS batches (
        id BIGSERIAL PRIMARY KEY,
        source_path TEXT NOT NULL,
        label TEXT NOT NULL,
        checksum TEXT NOT NULL UNIQUE,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS games (
        id BIGSERIAL PRIMARY KEY,
        batch_id BIGINT NOT NULL REFERENCES batches(id),
        white_id BIGINT NOT NULL REFERENCES players(id),
        black_id BIGINT NOT NULL REFERENCES players(id),
        event TEXT,
        site TEXT,
        game_date TEXT NOT NULL DEFAULT '',
        round TEXT NOT NULL DEFAULT '',
        eco TEXT,
        opening TEXT,
        white_elo INT,
        black_elo INT,
        result TEXT NOT NULL,
        termination TEXT,
        pgn_hash TEXT NOT NULL,
        source_pgn TEXT NOT NULL,
        UNIQUE (white_id, black_id, game_date, round, pgn_hash)
    )",
    "CREATE TABLE IF NOT EXISTS fens (
        id BIGSERIAL PRIMARY KEY,
        fen_text TEXT NOT NULL UNIQUE,
        side_to_move TEXT NOT NULL,
        castling TEXT NOT NULL,
        en_passant TEXT,
        material_signature TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS positions (
        game_id BIGINT NOT NULL REFERENCES games(id),
        ply_number INT NOT NULL,
        fen_id BIGINT NOT NULL REFERENCES fens(id),
        san TEXT NOT NULL,
        uci TEXT,
        side_to_move TEXT NOT NULL,
        eval_cp INT,
        is_capture BOOL NOT NULL,
        is_check BOOL NOT NULL,
        is_mate BOOL NOT NULL,
        annotations JSONB NOT NULL DEFAULT '{}'::jsonb,
        PRIMARY KEY (game_id, ply_number)
    )",
    "CREATE TABLE IF NOT EXISTS embeddings (
        fen_id BIGINT PRIMARY KEY REFERENCES fens(id),
        vector FLOAT8[] NOT NULL,
        model_version TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS pattern_detections (
        game_id BIGINT NOT NULL REFERENCES games(id),
        pattern_id TEXT NOT NULL,
        detected_by TEXT NOT NULL,
        success BOOL NOT NULL,
        confidence FLOAT8 NOT NULL,
        start_ply INT,
        end_ply INT,
        outcome TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        PRIMARY KEY (game_id, pattern_id, detected_by)
    )",
];

/// [`ChessStore`] backed by a Postgres pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and initialises the schema. `acquire_timeout` bounds every
    /// later operation's wait for a connection.
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        log::info!("Postgres store ready ({} pooled connections)", pool_size);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Reads the `(id, inserted)` pair produced by
/// `RETURNING id, (xmax = 0) AS inserted`.
fn id_and_outcome(row: &sqlx::postgres::PgRow) -> (i64, UpsertOutcome) {
    let id: i64 = row.get("id");
    let inserted: bool = row.get("inserted");
    let outcome = if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Existing
    };
    (id, outcome)
}

fn summary_from_row(row: &sqlx::postgres::PgRow) -> GameSummary {
    let date: String = row.get("game_date");
    GameSummary {
        id: GameId(row.get("id")),
        white: row.get("white_name"),
        black: row.get("black_name"),
        date: (!date.is_empty()).then_some(date),
        eco: row.get("eco"),
        result: row.get("result"),
    }
}

#[async_trait]
impl ChessStore for PgStore {
    async fn upsert_player(
        &self,
        full_name: &str,
        fide_id: Option<u64>,
    ) -> Result<PlayerId, StoreError> {
        let normalized = normalize_name(full_name);
        let row = match fide_id {
            Some(fide) => {
                sqlx::query(
                    "INSERT INTO players (full_name, normalized_name, fide_id)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (fide_id)
                     DO UPDATE SET full_name = EXCLUDED.full_name,
                                   normalized_name = EXCLUDED.normalized_name
                     RETURNING id",
                )
                .bind(full_name.trim())
                .bind(&normalized)
                .bind(fide as i64)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "INSERT INTO players (full_name, normalized_name)
                     VALUES ($1, $2)
                     ON CONFLICT (normalized_name) WHERE fide_id IS NULL
                     DO UPDATE SET full_name = players.full_name
                     RETURNING id",
                )
                .bind(full_name.trim())
                .bind(&normalized)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(PlayerId(row.get("id")))
    }

    async fn create_batch(
        &self,
        source_path: &str,
        label: &str,
        checksum: &str,
    ) -> Result<(BatchId, UpsertOutcome), StoreError> {
        let row = sqlx::query(
            "INSERT INTO batches (source_path, label, checksum)
             VALUES ($1, $2, $3)
             ON CONFLICT (checksum) DO UPDATE SET label = batches.label
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(source_path)
        .bind(label)
        .bind(checksum)
        .fetch_one(&self.pool)
        .await?;
        let (id, outcome) = id_and_outcome(&row);
        Ok((BatchId(id), outcome))
    }

    async fn record_game(&self, game: &GameRecord) -> Result<(GameId, UpsertOutcome), StoreError> {
        let row = sqlx::query(
            "INSERT INTO games (batch_id, white_id, black_id, event, site, game_date,
                                round, eco, opening, white_elo, black_elo, result,
                                termination, pgn_hash, source_pgn)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (white_id, black_id, game_date, round, pgn_hash)
             DO UPDATE SET result = games.result
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(game.batch.0)
        .bind(game.white.0)
        .bind(game.black.0)
        .bind(&game.event)
        .bind(&game.site)
        .bind(game.date.as_deref().unwrap_or(""))
        .bind(game.round.as_deref().unwrap_or(""))
        .bind(&game.eco)
        .bind(&game.opening)
        .bind(game.white_elo.map(|e| e as i32))
        .bind(game.black_elo.map(|e| e as i32))
        .bind(game.result.as_str())
        .bind(&game.termination)
        .bind(&game.pgn_hash)
        .bind(&game.source_pgn)
        .fetch_one(&self.pool)
        .await?;
        let (id, outcome) = id_and_outcome(&row);
        Ok((GameId(id), outcome))
    }

    async fn upsert_fen(
        &self,
        fen_text: &str,
        side_to_move: Color,
        castling: &str,
        en_passant: Option<&str>,
        material_signature: &str,
    ) -> Result<(FenId, UpsertOutcome), StoreError> {
        let row = sqlx::query(
            "INSERT INTO fens (fen_text, side_to_move, castling, en_passant, material_signature)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (fen_text) DO UPDATE SET fen_text = fens.fen_text
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(fen_text)
        .bind(side_to_move.fen_char().to_string())
        .bind(castling)
        .bind(en_passant)
        .bind(material_signature)
        .fetch_one(&self.pool)
        .await?;
        let (id, outcome) = id_and_outcome(&row);
        Ok((FenId(id), outcome))
    }

    async fn record_position(
        &self,
        game: GameId,
        ply: u32,
        fen: FenId,
        feature: &MoveFeature,
    ) -> Result<(), StoreError> {
        let annotations = json!({
            "motifs": feature.motifs,
            "comments_before": feature.comments_before,
            "comments_after": feature.comments_after,
            "variations": feature.variations,
            "nags": feature.nags,
        });
        let _ = sqlx::query(
            "INSERT INTO positions (game_id, ply_number, fen_id, san, uci, side_to_move,
                                    eval_cp, is_capture, is_check, is_mate, annotations)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (game_id, ply_number)
             DO UPDATE SET fen_id = EXCLUDED.fen_id,
                           san = EXCLUDED.san,
                           uci = EXCLUDED.uci,
                           eval_cp = EXCLUDED.eval_cp,
                           annotations = EXCLUDED.annotations",
        )
        .bind(game.0)
        .bind(ply as i32)
        .bind(fen.0)
        .bind(&feature.san)
        .bind(&feature.uci)
        .bind(feature.side_to_move.fen_char().to_string())
        .bind(feature.eval_cp)
        .bind(feature.is_capture)
        .bind(feature.is_check)
        .bind(feature.is_mate)
        .bind(annotations)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_embedding(&self, fen: FenId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM embeddings WHERE fen_id = $1) AS present")
            .bind(fen.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("present"))
    }

    async fn record_embedding(
        &self,
        fen: FenId,
        vector: &[f32],
        version: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        let as_f64: Vec<f64> = vector.iter().map(|v| *v as f64).collect();
        let row = sqlx::query(
            "INSERT INTO embeddings (fen_id, vector, model_version)
             VALUES ($1, $2, $3)
             ON CONFLICT (fen_id)
             DO UPDATE SET vector = EXCLUDED.vector,
                           model_version = EXCLUDED.model_version
             RETURNING fen_id AS id, (xmax = 0) AS inserted",
        )
        .bind(fen.0)
        .bind(&as_f64)
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        let (_, outcome) = id_and_outcome(&row);
        Ok(outcome)
    }

    async fn record_pattern_detection(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        let _ = sqlx::query(
            "INSERT INTO pattern_detections (game_id, pattern_id, detected_by, success,
                                             confidence, start_ply, end_ply, outcome, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (game_id, pattern_id, detected_by)
             DO UPDATE SET success = EXCLUDED.success,
                           confidence = EXCLUDED.confidence,
                           start_ply = EXCLUDED.start_ply,
                           end_ply = EXCLUDED.end_ply,
                           outcome = EXCLUDED.outcome,
                           metadata = EXCLUDED.metadata",
        )
        .bind(record.game.0)
        .bind(&record.pattern_id)
        .bind(record.detected_by.to_string())
        .bind(record.success)
        .bind(record.confidence)
        .bind(record.start_ply.map(|p| p as i32))
        .bind(record.end_ply.map(|p| p as i32))
        .bind(record.outcome.as_str())
        .bind(&record.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn games_by_player(&self, name: &str) -> Result<Vec<GameSummary>, StoreError> {
        let pattern = format!("%{}%", normalize_name(name));
        let rows = sqlx::query(
            "SELECT g.id, g.game_date, g.eco, g.result,
                    w.full_name AS white_name, b.full_name AS black_name
             FROM games g
             JOIN players w ON w.id = g.white_id
             JOIN players b ON b.id = g.black_id
             WHERE w.normalized_name LIKE $1 OR b.normalized_name LIKE $1
             ORDER BY g.id",
        )
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn games_by_pattern(
        &self,
        pattern_id: &str,
        successful_only: bool,
    ) -> Result<Vec<PatternGameSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT g.id, g.game_date, g.eco, g.result,
                    w.full_name AS white_name, b.full_name AS black_name,
                    d.detected_by, d.confidence, d.success
             FROM pattern_detections d
             JOIN games g ON g.id = d.game_id
             JOIN players w ON w.id = g.white_id
             JOIN players b ON b.id = g.black_id
             WHERE d.pattern_id = $1 AND ($2 = FALSE OR d.success)
             ORDER BY d.confidence DESC, g.id",
        )
        .bind(pattern_id)
        .bind(successful_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let color: String = row.get("detected_by");
                PatternGameSummary {
                    game: summary_from_row(row),
                    detected_by: if color == "black" {
                        Color::Black
                    } else {
                        Color::White
                    },
                    confidence: row.get("confidence"),
                    success: row.get("success"),
                }
            })
            .collect())
    }

    async fn similar_positions(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarPosition>, StoreError> {
        let as_f64: Vec<f64> = vector.iter().map(|v| *v as f64).collect();
        // Stored vectors are unit length, so the dot product ranks by
        // cosine similarity without a division.
        let rows = sqlx::query(
            "SELECT f.id, f.fen_text,
                    (SELECT COALESCE(SUM(a * b), 0)
                     FROM unnest(e.vector, $1::float8[]) AS t(a, b)) AS score
             FROM embeddings e
             JOIN fens f ON f.id = e.fen_id
             ORDER BY score DESC
             LIMIT $2",
        )
        .bind(&as_f64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SimilarPosition {
                fen: FenId(row.get("id")),
                fen_text: row.get("fen_text"),
                score: row.get("score"),
            })
            .collect())
    }
}
