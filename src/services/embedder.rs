//! Text embedding for semantic retrieval.
//!
//! The production encoder is the remote embeddings API configured alongside
//! the chat model; its identity has to match the encoder the crawler used
//! for the stored vectors. Inputs are whitespace-normalized so byte-stable
//! text always yields the same vector, and outputs are re-normalized to unit
//! length before use.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::text::collapse_whitespace;

/// Dimension of all stored vectors.
pub const EMBEDDING_DIM: usize = 384;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embeddings API error: {0}")]
    ApiError(String),

    #[error("embeddings API returned {got} dimensions, expected {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("empty input text")]
    EmptyInput,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode text into a unit vector of [`EMBEDDING_DIM`] dimensions.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

// ============================================================================
// Vector math
// ============================================================================

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity; assumes equal lengths, returns 0.0 for zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom <= f32::EPSILON { 0.0 } else { dot / denom }
}

// ============================================================================
// HTTP embedder
// ============================================================================

pub struct HttpEmbedder {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let normalized = collapse_whitespace(text);
        if normalized.is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let url = format!("{}/embeddings", self.api_base);
        let request = EmbeddingsRequest { model: self.model.clone(), input: vec![normalized] };

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::ApiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::ApiError(format!("API error {}: {}", status, body)));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::ApiError(format!("malformed embeddings body: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::ApiError("empty embeddings response".to_string()))?;

        if vector.len() != EMBEDDING_DIM {
            return Err(EmbedError::Dimension { expected: EMBEDDING_DIM, got: vector.len() });
        }

        Ok(l2_normalize(vector))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_yields_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_survives_normalization() {
        let v = l2_normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let a = vec![0.2, 0.5, -0.1];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }
}
