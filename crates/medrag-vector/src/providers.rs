use async_trait::async_trait;
use lru::LruCache;
use medrag_core::{EmbeddingConfig, EmbeddingProvider, MedRagError, Result};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Deterministic local embedder. Each whitespace token seeds a linear
/// congruential stream that is folded into a fixed-dimension vector, so equal
/// texts always embed identically and no model download is needed. Useful for
/// tests and offline development, not for semantic quality.
pub struct HashEmbedder {
    dimension: usize,
    version: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self::with_version(dimension, "hash-v1")
    }

    pub fn with_version(dimension: usize, version: &str) -> Self {
        Self {
            dimension,
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.trim().is_empty() {
                return Err(MedRagError::Embedding(
                    "cannot embed empty text".to_string(),
                ));
            }
        }

        let dimension = self.dimension;
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| hash_embedding(text, dimension))
                .collect()
        })
        .await
        .map_err(|e| MedRagError::Embedding(format!("embedding task failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_version(&self) -> String {
        self.version.clone()
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Calls an OpenAI-compatible `/embeddings` endpoint. Rate limits and server
/// errors are retried with exponential backoff; any other rejection fails the
/// batch immediately since a retry would be rejected the same way.
pub struct RestEmbedder {
    config: EmbeddingConfig,
    client: Client,
}

impl RestEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(MedRagError::Embedding(
                "rest embedding provider requires an endpoint".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("MedRAG/0.1")
            .build()
            .map_err(|e| MedRagError::Embedding(format!("failed to build http client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input: texts.to_vec(),
            model: self.config.model.clone(),
        };
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!(
                    "retrying embedding request in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    self.config.max_retries + 1
                );
                tokio::time::sleep(delay).await;
            }

            let mut builder = self.client.post(&self.config.endpoint).json(&request);
            if !self.config.api_key.is_empty() {
                builder = builder.bearer_auth(&self.config.api_key);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<EmbeddingResponse>().await {
                            Ok(parsed) => {
                                debug!("embedding endpoint returned {} vectors", parsed.data.len());
                                return embeddings_from_response(
                                    parsed,
                                    texts.len(),
                                    self.config.dimension,
                                );
                            }
                            Err(e) => {
                                last_error = Some(MedRagError::Embedding(format!(
                                    "malformed embedding response: {}",
                                    e
                                )));
                            }
                        }
                    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_error = Some(MedRagError::Embedding(format!(
                            "embedding endpoint returned HTTP {}",
                            status
                        )));
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(MedRagError::Embedding(format!(
                            "embedding endpoint rejected request: HTTP {} {}",
                            status, body
                        )));
                    }
                }
                Err(e) => {
                    last_error =
                        Some(MedRagError::Embedding(format!("embedding request failed: {}", e)));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MedRagError::Embedding("embedding retries exhausted".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for RestEmbedder {
    #[instrument(skip(self, texts), fields(batch = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.trim().is_empty() {
                return Err(MedRagError::Embedding(
                    "cannot embed empty text".to_string(),
                ));
            }
        }
        self.embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_version(&self) -> String {
        self.config.model.clone()
    }

    fn provider_name(&self) -> &str {
        "rest"
    }
}

struct CachedVector {
    vector: Vec<f32>,
    cached_at: Instant,
}

impl CachedVector {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Read-through LRU in front of any provider, keyed by exact text. Entries
/// expire after a TTL so a long-lived process eventually drops embeddings for
/// text it no longer sees.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, CachedVector>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    name: String,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let name = format!("cached-{}", inner.provider_name());
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            name,
        }
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();

        // The lock is released before awaiting the inner provider.
        {
            let mut cache = self.cache.lock();
            for (position, text) in texts.iter().enumerate() {
                let fresh = match cache.get(text) {
                    Some(entry) if !entry.is_expired(self.ttl) => Some(entry.vector.clone()),
                    Some(_) => {
                        cache.pop(text);
                        None
                    }
                    None => None,
                };
                match fresh {
                    Some(vector) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        results[position] = Some(vector);
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        pending.push((position, text.clone()));
                    }
                }
            }
        }

        if !pending.is_empty() {
            let inputs: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.inner.embed(&inputs).await?;
            if vectors.len() != inputs.len() {
                return Err(MedRagError::Embedding(format!(
                    "provider returned {} embeddings for {} inputs",
                    vectors.len(),
                    inputs.len()
                )));
            }
            let mut cache = self.cache.lock();
            for ((position, text), vector) in pending.into_iter().zip(vectors) {
                cache.put(
                    text,
                    CachedVector {
                        vector: vector.clone(),
                        cached_at: Instant::now(),
                    },
                );
                results[position] = Some(vector);
            }
        }

        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    MedRagError::Embedding("embedding cache missed a position".to_string())
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_version(&self) -> String {
        self.inner.model_version()
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

/// Reorders a parsed response by input index and checks the shape against what
/// was sent. Endpoints may return items out of order.
fn embeddings_from_response(
    response: EmbeddingResponse,
    expected_count: usize,
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected_count {
        return Err(MedRagError::Embedding(format!(
            "endpoint returned {} embeddings for {} inputs",
            response.data.len(),
            expected_count
        )));
    }
    let mut data = response.data;
    data.sort_by_key(|item| item.index);

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        if item.embedding.len() != expected_dimension {
            return Err(MedRagError::Embedding(format!(
                "endpoint returned a {}-dimensional embedding, expected {}",
                item.embedding.len(),
                expected_dimension
            )));
        }
        vectors.push(item.embedding);
    }
    Ok(vectors)
}

/// Token-seeded linear congruential stream folded into `dimension` buckets,
/// L2-normalized so dot products behave like cosine similarity.
fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    for token in text.to_lowercase().split_whitespace() {
        let mut state = simple_hash(token);
        for slot in vector.iter_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            *slot += ((state >> 16) & 0x7fff) as f32 / 32768.0 - 0.5;
        }
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

fn simple_hash(token: &str) -> u64 {
    let mut hash = 5381u64;
    for byte in token.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}
