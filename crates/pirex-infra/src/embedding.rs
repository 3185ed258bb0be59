//! The embedding backend: an external collaborator contract (§6) for
//! turning text/images into fixed-dimension unit-normalized vectors.
//!
//! §9's Redesign Flags call out that a real implementation must either
//! integrate a genuine inference backend or mark its embeddings as
//! synthetic rather than silently stubbing them. `DeterministicHashEmbedder`
//! takes the latter path explicitly: it derives a vector from a SHA-256
//! stream of the input, which is deterministic for a given (model, version,
//! input) as the contract requires, but carries no semantic content.
//! `is_synthetic` lets callers refuse to serve real traffic on it.

use async_trait::async_trait;
use pirex_types::{Embedding, PirexError, Result};
use sha2::{Digest, Sha256};

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Embedding>;
    async fn embed_image(&self, image_url: &str) -> Result<Embedding>;
    fn text_dimension(&self) -> usize;
    fn image_dimension(&self) -> usize;
    /// `true` if this backend's vectors carry no real semantic signal and
    /// must not be treated as a production model's output.
    fn is_synthetic(&self) -> bool;
}

/// Hashes the input through SHA-256 repeatedly to fill `dimension` floats,
/// then unit-normalizes. Deterministic for a given (dimension, input) pair;
/// carries no semantic meaning whatsoever.
pub struct DeterministicHashEmbedder {
    text_dimension: usize,
    image_dimension: usize,
}

impl DeterministicHashEmbedder {
    pub fn new(text_dimension: usize, image_dimension: usize) -> Self {
        Self { text_dimension, image_dimension }
    }

    fn hash_vector(input: &str, dimension: usize) -> Result<Embedding> {
        let mut values = Vec::with_capacity(dimension);
        let mut counter: u32 = 0;
        while values.len() < dimension {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if values.len() == dimension {
                    break;
                }
                let bytes: [u8; 4] = chunk.try_into().unwrap();
                let raw = u32::from_le_bytes(bytes) as f32 / u32::MAX as f32;
                values.push(raw * 2.0 - 1.0);
            }
            counter += 1;
        }
        Embedding::normalized(values).ok_or_else(|| PirexError::fatal("degenerate synthetic embedding (zero vector)"))
    }
}

#[async_trait]
impl EmbeddingBackend for DeterministicHashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        Self::hash_vector(text, self.text_dimension)
    }

    async fn embed_image(&self, image_url: &str) -> Result<Embedding> {
        Self::hash_vector(image_url, self.image_dimension)
    }

    fn text_dimension(&self) -> usize {
        self.text_dimension
    }

    fn image_dimension(&self) -> usize {
        self.image_dimension
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_yields_same_embedding() {
        let embedder = DeterministicHashEmbedder::new(384, 512);
        let a = embedder.embed_text("hello world").await.unwrap();
        let b = embedder.embed_text("hello world").await.unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[tokio::test]
    async fn different_text_yields_different_embedding() {
        let embedder = DeterministicHashEmbedder::new(384, 512);
        let a = embedder.embed_text("hello").await.unwrap();
        let b = embedder.embed_text("goodbye").await.unwrap();
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[tokio::test]
    async fn embeddings_have_the_configured_dimension() {
        let embedder = DeterministicHashEmbedder::new(384, 512);
        assert_eq!(embedder.embed_text("x").await.unwrap().as_slice().len(), 384);
        assert_eq!(embedder.embed_image("http://x").await.unwrap().as_slice().len(), 512);
    }

    #[tokio::test]
    async fn is_marked_synthetic() {
        let embedder = DeterministicHashEmbedder::new(384, 512);
        assert!(embedder.is_synthetic());
    }
}
