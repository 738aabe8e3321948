//! Position embedding contract and the default local encoder.
//!
//! An embedder turns a FEN string into a fixed-dimension vector; the
//! ingestion pipeline attaches one vector to every unique position. The
//! trait is the seam where a remote model provider would plug in. The
//! bundled [`FeatureHashEmbedder`] hashes board features into buckets and
//! L2-normalises, which keeps ingestion self-contained and byte-stable
//! across runs — similarity over these vectors reflects shared piece
//! placement, nothing deeper.

use crate::fen;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default vector dimension for position embeddings.
pub const DEFAULT_DIMENSION: usize = 768;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedder rejected FEN: {0}")]
    InvalidFen(String),

    /// Transport or provider failure from a remote embedder.
    #[error("embedding provider failed: {0}")]
    Provider(String),
}

/// A thread-safe embedding provider. Implementations must tolerate
/// concurrent `embed` calls; the pipeline fans out across games.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Version string persisted with each embedding row.
    fn version(&self) -> &str;

    async fn embed(&self, fen_text: &str) -> Result<Vec<f32>, EmbedError>;
}

// ---------------------------------------------------------------------------
// Feature-hash embedder
// ---------------------------------------------------------------------------

/// Deterministic local embedder: every (piece, square) pair, the side to
/// move, each castling flag and the en-passant file hash to a bucket with
/// a sign; the accumulated vector is L2-normalised.
pub struct FeatureHashEmbedder {
    dimension: usize,
}

impl Default for FeatureHashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl FeatureHashEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be positive");
        Self { dimension }
    }

    /// Bucket index and sign for one feature token.
    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let raw = u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        let index = (raw % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

#[async_trait]
impl Embedder for FeatureHashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn version(&self) -> &str {
        "feature-hash-v1"
    }

    async fn embed(&self, fen_text: &str) -> Result<Vec<f32>, EmbedError> {
        let (board, meta) = fen::parse(fen_text)
            .map_err(|e| EmbedError::InvalidFen(e.to_string()))?;

        let mut vector = vec![0.0f32; self.dimension];
        let mut add = |token: String| {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
        };

        for (sq, piece) in board.occupied() {
            add(format!("pc:{}:{}", piece.to_fen_char(), sq.to_algebraic()));
        }
        add(format!("stm:{}", meta.side_to_move.fen_char()));
        add(format!("castle:{}", meta.castling.to_fen()));
        if let Some(ep) = meta.en_passant {
            add(format!("ep:{}", (b'a' + ep.file) as char));
        }

        // L2 normalise so the stored dot product is cosine similarity.
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::INITIAL_FEN;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let embedder = FeatureHashEmbedder::new(64);
        let a = embedder.embed(INITIAL_FEN).await.unwrap();
        let b = embedder.embed(INITIAL_FEN).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_embedding_is_normalised() {
        let embedder = FeatureHashEmbedder::default();
        let v = embedder.embed(INITIAL_FEN).await.unwrap();
        assert_eq!(v.len(), DEFAULT_DIMENSION);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_similar_positions_score_higher() {
        let embedder = FeatureHashEmbedder::default();
        let initial = embedder.embed(INITIAL_FEN).await.unwrap();
        // One pawn moved: nearly the same position.
        let close = embedder
            .embed("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1")
            .await
            .unwrap();
        // Bare kings: nothing in common.
        let far = embedder.embed("8/8/8/8/8/8/8/K6k w - - 0 1").await.unwrap();

        assert!(cosine(&initial, &close) > cosine(&initial, &far));
        assert!(cosine(&initial, &close) > 0.8);
    }

    #[tokio::test]
    async fn test_invalid_fen_rejected() {
        let embedder = FeatureHashEmbedder::default();
        assert!(matches!(
            embedder.embed("not a fen").await,
            Err(EmbedError::InvalidFen(_))
        ));
    }
}
