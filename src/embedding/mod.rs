//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **`LocalProvider`**: runs an ONNX model in-process via fastembed; the model
//!   is loaded once when the provider is constructed.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingProvider`]**: feature-hashed bag-of-words vectors; no model, no network.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` byte encoding used
//!   by the persisted index
//!
//! # Provider Selection
//!
//! ```rust
//! use knowledge_assistant::config::EmbeddingConfig;
//! use knowledge_assistant::embedding::create_provider;
//!
//! let config = EmbeddingConfig {
//!     provider: "hashing".to_string(),
//!     ..EmbeddingConfig::default()
//! };
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "hashing");
//! assert_eq!(provider.dims(), 384);
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every failure surfaces as [`Error::ModelUnavailable`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Trait for embedding providers.
///
/// Implementations must be deterministic: identical input and model give
/// identical vectors. Construction is the expensive step; calls reuse the
/// loaded model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_many(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::model_unavailable("empty embedding response"))
    }
}

/// Embed `texts` in batches of `batch_size`, preserving order.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let embedded = provider.embed_many(batch).await?;
        if embedded.len() != batch.len() {
            return Err(Error::model_unavailable(format!(
                "provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        tracing::debug!(batch = i, size = batch.len(), "embedded batch");
        vectors.extend(embedded);
    }
    Ok(vectors)
}

fn check_dims(vectors: &[Vec<f32>], dims: usize, model: &str) -> Result<()> {
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::model_unavailable(format!(
            "model '{}' returned {}-dimensional vector, expected {}",
            model,
            v.len(),
            dims
        )));
    }
    Ok(())
}

// ============ Remote request helper ============

/// POST `body` to `url` with exponential backoff, returning the parsed JSON.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        Error::model_unavailable(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err =
                    Error::model_unavailable(format!("{} error {}: {}", label, status, body_text));

                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(attempt, %status, "{} request failed, retrying", label);
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "{} connection failed, retrying", label);
                last_err = Some(Error::model_unavailable(format!(
                    "{} connection error: {}",
                    label, e
                )));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::model_unavailable(format!("{} failed after retries", label))))
}

fn float_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| Error::model_unavailable(format!("invalid response: {} is not an array", what)))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::model_unavailable(format!("invalid response: non-numeric {}", what)))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("embedding.model required for OpenAI provider"))?;
        let dims = match (config.dims, model.as_str()) {
            (Some(d), _) => d,
            (None, "text-embedding-3-small") | (None, "text-embedding-ada-002") => 1536,
            (None, "text-embedding-3-large") => 3072,
            (None, other) => {
                return Err(Error::config(format!(
                    "embedding.dims required for OpenAI model '{}'",
                    other
                )))
            }
        };

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::config("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::model_unavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            "https://api.openai.com/v1/embeddings",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI embeddings",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_dims(&vectors, self.dims, &self.model)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::model_unavailable("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| Error::model_unavailable("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, float_array(embedding, "embedding")?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("embedding.model required for Ollama provider"))?;
        let dims = match (config.dims, model.as_str()) {
            (Some(d), _) => d,
            (None, "nomic-embed-text") => 768,
            (None, "mxbai-embed-large") => 1024,
            (None, "all-minilm") => 384,
            (None, other) => {
                return Err(Error::config(format!(
                    "embedding.dims required for Ollama model '{}'",
                    other
                )))
            }
        };
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::model_unavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama embeddings",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_dims(&vectors, self.dims, &self.model)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::model_unavailable("invalid Ollama response: missing embeddings array")
        })?
        .iter()
        .map(|e| float_array(e, "embedding"))
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// Model weights are downloaded from Hugging Face on first construction and
/// cached. Construction blocks; call it from a blocking context.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<parking_lot::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (fastembed_model, known_dims) = config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(known_dims);

        tracing::info!(model = %model_name, "loading local embedding model");
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| {
            Error::model_unavailable(format!(
                "failed to initialize local embedding model '{}': {}",
                model_name, e
            ))
        })?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(parking_lot::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock();
            guard
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::model_unavailable(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::model_unavailable(format!("embedding task panicked: {}", e)))??;

        check_dims(&vectors, self.dims, &self.model_name)?;
        Ok(vectors)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        other => Err(Error::config(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

// ============ Hashing Provider ============

/// Deterministic feature-hashed bag-of-words embedding.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of `dims`
/// buckets with a hash-derived sign; the result is L2-normalized. Captures
/// lexical overlap only, but needs no weights and no network, so ingestion
/// and search work fully offline.
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub const DEFAULT_DIMS: usize = 384;

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(&token.to_lowercase());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"hashing"` | [`HashingProvider`] |
///
/// The local provider loads model weights here, so this may block for
/// seconds; async callers should run it on the blocking pool.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "hashing" => Ok(Arc::new(HashingProvider::new(
            config.dims.unwrap_or(HashingProvider::DEFAULT_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::model_unavailable(
            "local embedding provider requires --features local-embeddings-fastembed",
        )),
        other => Err(Error::config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use knowledge_assistant::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`vec_to_blob`]. Trailing bytes that do not
/// form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, f32::MIN_POSITIVE];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashing_provider_deterministic_and_normalized() {
        let p = HashingProvider::new(64);
        let texts = vec!["The quick brown fox".to_string(), "the QUICK brown fox!".to_string()];
        let a = p.embed_many(&texts).await.unwrap();
        let b = p.embed_many(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        // Case and punctuation do not change the token bag.
        assert_eq!(a[0], a[1]);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_provider_lexical_similarity() {
        let p = HashingProvider::new(256);
        let q = p.embed_one("metformin dosage for adults").await.unwrap();
        let near = p.embed_one("adults take metformin at a dosage of").await.unwrap();
        let far = p.embed_one("kubernetes cluster networking").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_hashing_empty_text_is_zero_vector() {
        let p = HashingProvider::new(16);
        let v = p.embed_one("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order() {
        let p = HashingProvider::new(32);
        let texts: Vec<String> = (0..10).map(|i| format!("text number {}", i)).collect();
        let batched = embed_in_batches(&p, &texts, 3).await.unwrap();
        let whole = p.embed_many(&texts).await.unwrap();
        assert_eq!(batched, whole);
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_ollama_response_missing_field() {
        let err = parse_ollama_response(&serde_json::json!({"oops": []})).unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable(_)));
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_provider(&config), Err(Error::Config(_))));
    }
}
