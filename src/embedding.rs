//! Query embedding
//!
//! The planner turns residual semantic text into a dense vector through the
//! [`EmbeddingProvider`] seam. The production implementation calls an HTTP
//! embedding endpoint; [`HashEmbedder`] is a deterministic local provider for
//! environments without one.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{EngineResult, QueryError};

/// Produces a query vector from free text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Vector length this provider emits
    fn dimension(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    vector: Vec<f32>,
    #[serde(default)]
    #[allow(dead_code)]
    text: Option<String>,
}

/// HTTP client for a remote embedding endpoint
///
/// Posts `{"input": <text>, "type": "query"}` and expects a JSON body with a
/// `vector` array of the configured dimension.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    dimension: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> EngineResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| QueryError::backend_unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let started = Instant::now();
        let request = EmbedRequest {
            input: text,
            kind: "query",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueryError::UpstreamTimeout {
                        operation: "embedding".to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    QueryError::UpstreamUnavailable {
                        message: format!("embedding endpoint: {}", e),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, endpoint = %self.endpoint, "embedding endpoint returned an error");
            return Err(QueryError::UpstreamUnavailable {
                message: format!("embedding endpoint returned {}", status),
            });
        }

        let body: EmbedResponse = response.json().await.map_err(|e| {
            QueryError::UpstreamUnavailable {
                message: format!("malformed embedding response: {}", e),
            }
        })?;

        if body.vector.len() != self.dimension {
            return Err(QueryError::UpstreamUnavailable {
                message: format!(
                    "embedding endpoint returned a {}-dimensional vector, expected {}",
                    body.vector.len(),
                    self.dimension
                ),
            });
        }

        debug!(
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedded query text"
        );
        Ok(body.vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic token-hash embedder
///
/// Each lowercased whitespace token is FNV-1a hashed into a bucket and the
/// result is L2-normalized. Equal texts always embed equally, which is all
/// the tests and local smoke runs need from it.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in text.split_whitespace() {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // Second hash round picks the sign so buckets do not only accumulate
            let sign = if hash >> 32 & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
