//! chessvault command-line interface.
//!
//! ## Usage
//!
//! ```bash
//! # Ingest a PGN file (DATABASE_URL from the environment or .env)
//! chessvault ingest games.pgn --label "club-2024"
//!
//! # Compressed archives work directly
//! chessvault ingest lichess_2024-01.pgn.zst
//!
//! # Parse and detect without a database
//! chessvault ingest games.pgn --dry-run
//!
//! # Retrieval
//! chessvault retrieve games --player carlsen
//! chessvault retrieve pattern minority_attack --successful-only
//! chessvault retrieve similar "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
//!
//! # List registered detectors
//! chessvault patterns
//! ```

use anyhow::Context;
use chessvault::db::PgStore;
use chessvault::embedder::{self, Embedder, FeatureHashEmbedder};
use chessvault::fen;
use chessvault::ingest::{IngestSummary, Ingestor};
use chessvault::patterns::default_registry;
use chessvault::store::{ChessStore, MemoryStore};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// chessvault — chess game archive ingestion and retrieval.
#[derive(Parser, Debug)]
#[command(name = "chessvault")]
#[command(about = "Ingest PGN archives into a relational + vector store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a PGN file (plain or .zst) into the store.
    Ingest {
        /// Path to the PGN source (`.pgn` or `.pgn.zst`).
        source: PathBuf,

        /// Batch label; defaults to the file name plus a fresh id.
        #[arg(short, long)]
        label: Option<String>,

        /// Games processed concurrently.
        #[arg(long, default_value_t = 4)]
        fan_out: usize,

        /// Store connection pool size.
        #[arg(long, default_value_t = 5)]
        pool: u32,

        /// Embedding vector dimension.
        #[arg(long, default_value_t = embedder::DEFAULT_DIMENSION)]
        dimension: usize,

        /// Parse, replay and detect without touching Postgres.
        #[arg(long)]
        dry_run: bool,
    },

    /// Query the store.
    Retrieve {
        #[command(subcommand)]
        what: RetrieveCommand,

        /// Store connection pool size.
        #[arg(long, default_value_t = 5)]
        pool: u32,
    },

    /// List the registered pattern detectors.
    Patterns,
}

#[derive(Subcommand, Debug)]
enum RetrieveCommand {
    /// Games where either player's name matches.
    Games {
        /// Case-insensitive substring of a player name.
        #[arg(short, long)]
        player: String,
    },

    /// Games with a positive detection of the given pattern.
    Pattern {
        /// Pattern id, e.g. `queenside_majority_attack`.
        pattern_id: String,

        /// Only detections classified as successful.
        #[arg(short, long)]
        successful_only: bool,
    },

    /// Positions most similar to a FEN, by embedding cosine similarity.
    Similar {
        /// The query position as a FEN string.
        fen: String,

        /// Maximum number of results.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Embedding dimension; must match the ingested vectors.
        #[arg(long, default_value_t = embedder::DEFAULT_DIMENSION)]
        dimension: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            source,
            label,
            fan_out,
            pool,
            dimension,
            dry_run,
        } => {
            let label = label.unwrap_or_else(|| {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "batch".to_string());
                format!("{}-{}", stem, Uuid::new_v4())
            });

            let store: Arc<dyn ChessStore> = if dry_run {
                log::info!("dry run: using the in-memory store");
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(connect_store(pool).await?)
            };

            let ingestor = Ingestor::new(
                store,
                Arc::new(FeatureHashEmbedder::new(dimension)),
                Arc::new(default_registry()),
                fan_out,
            );

            let summary = ingestor
                .ingest_file(&source, &label)
                .await
                .with_context(|| format!("ingesting {}", source.display()))?;
            print_summary(&summary);
            Ok(())
        }

        Commands::Retrieve { what, pool } => {
            let store = connect_store(pool).await?;
            run_retrieve(&store, what).await
        }

        Commands::Patterns => {
            let registry = default_registry();
            println!("{}", "Registered pattern detectors".bold());
            for detector in registry.list() {
                println!(
                    "  {:<28} {:<10} {}",
                    detector.pattern_id().cyan(),
                    detector.pattern_type().as_str(),
                    detector.pattern_name()
                );
            }
            Ok(())
        }
    }
}

/// Opens the Postgres store from `DATABASE_URL`.
async fn connect_store(pool: u32) -> anyhow::Result<PgStore> {
    let url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL is not set (put it in the environment or a .env file)")?;
    PgStore::connect(&url, pool)
        .await
        .context("connecting to the store")
}

/// Renders the batch summary to stdout.
fn print_summary(summary: &IngestSummary) {
    let elapsed = (summary.finished_at - summary.started_at).num_milliseconds();

    println!();
    println!("{}", "Ingestion summary".bold());
    println!("  Batch:       {} ({})", summary.batch, summary.label);
    println!("  Source:      {}", summary.source_path);
    println!("  Checksum:    {}", &summary.checksum[..16.min(summary.checksum.len())]);
    println!("  Elapsed:     {} ms", elapsed);
    println!(
        "  Games:       {} seen, {} ingested, {} duplicate, {}",
        summary.games_seen,
        summary.games_ingested.to_string().green(),
        summary.games_duplicate,
        format_skipped(summary.games_skipped)
    );
    println!(
        "  Positions:   {} recorded over {} moves",
        summary.positions_recorded, summary.moves_replayed
    );
    println!(
        "  Embeddings:  {} generated for {} new FENs",
        summary.embeddings_generated, summary.unique_fens
    );

    if summary.detections.is_empty() {
        println!("  Detections:  none");
    } else {
        println!("  Detections:");
        for (pattern, count) in &summary.detections {
            println!("    {:<28} {}", pattern.cyan(), count);
        }
    }
}

fn format_skipped(skipped: usize) -> String {
    if skipped == 0 {
        "0 skipped".to_string()
    } else {
        format!("{} skipped", skipped).yellow().to_string()
    }
}

/// Executes a retrieval subcommand and renders the rows.
async fn run_retrieve(store: &PgStore, what: RetrieveCommand) -> anyhow::Result<()> {
    match what {
        RetrieveCommand::Games { player } => {
            let rows = store.games_by_player(&player).await?;
            if rows.is_empty() {
                println!("No games found for '{}'.", player);
                return Ok(());
            }
            println!("{:>6}  {:<24} {:<24} {:<10} {:<5} {}", "id", "white", "black", "date", "eco", "result");
            for row in rows {
                println!(
                    "{:>6}  {:<24} {:<24} {:<10} {:<5} {}",
                    row.id,
                    row.white,
                    row.black,
                    row.date.as_deref().unwrap_or("-"),
                    row.eco.as_deref().unwrap_or("-"),
                    row.result.bold()
                );
            }
            Ok(())
        }

        RetrieveCommand::Pattern {
            pattern_id,
            successful_only,
        } => {
            let rows = store.games_by_pattern(&pattern_id, successful_only).await?;
            if rows.is_empty() {
                println!("No detections recorded for '{}'.", pattern_id);
                return Ok(());
            }
            println!(
                "{:>6}  {:<24} {:<24} {:<6} {:>5}  {}",
                "id", "white", "black", "by", "conf", "success"
            );
            for row in rows {
                let success = if row.success {
                    "yes".green().to_string()
                } else {
                    "no".to_string()
                };
                println!(
                    "{:>6}  {:<24} {:<24} {:<6} {:>5.2}  {}",
                    row.game.id, row.game.white, row.game.black, row.detected_by, row.confidence, success
                );
            }
            Ok(())
        }

        RetrieveCommand::Similar { fen, limit, dimension } => {
            // Validate and embed the query position locally.
            fen::parse(&fen).map_err(|e| anyhow::anyhow!("invalid query FEN: {e}"))?;
            let embedder = FeatureHashEmbedder::new(dimension);
            let vector = embedder
                .embed(&fen)
                .await
                .map_err(|e| anyhow::anyhow!("embedding query FEN: {e}"))?;

            let rows = store.similar_positions(&vector, limit).await?;
            if rows.is_empty() {
                println!("The store holds no embedded positions yet.");
                return Ok(());
            }
            for row in rows {
                println!("{:>6.3}  {}", row.score, row.fen_text);
            }
            Ok(())
        }
    }
}
