//! Embedding providers and vector helpers.
//!
//! [`EmbeddingProvider`] is the seam between the index and whatever turns
//! text into vectors:
//! - [`DisabledProvider`]: every call fails; the index is then never built.
//! - [`OpenAIProvider`]: `POST /v1/embeddings`.
//! - [`OllamaProvider`]: `POST {url}/api/embed` on a local Ollama server.
//!
//! The remote providers share [`send_with_retry`]: rate limits (429), server
//! errors and network failures are retried with exponential backoff
//! (1s doubling, capped at 32s); any other non-success status fails at once.
//! The chat client in [`crate::agent::llm`] uses the same policy.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;

/// Turns text into fixed-size vectors.
///
/// `embed_texts` returns exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed_texts(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Provider returned no vector for the query"))
}

/// Embed `texts` in batches of `batch_size`, preserving order.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let batch_vectors = provider.embed_texts(batch).await?;
        if batch_vectors.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} texts",
                batch_vectors.len(),
                batch.len()
            );
        }
        vectors.extend(batch_vectors);
    }
    Ok(vectors)
}

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Settings common to the HTTP providers.
struct Remote {
    model: String,
    dims: usize,
    client: reqwest::Client,
    max_retries: u32,
}

impl Remote {
    fn from_config(config: &EmbeddingConfig, provider: &str) -> Result<Self> {
        let (Some(model), Some(dims)) = (config.model.clone(), config.dims) else {
            bail!(
                "embedding.model and embedding.dims are required for the {} provider",
                provider
            );
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            client,
            max_retries: config.max_retries,
        })
    }
}

/// OpenAI embeddings. Reads `OPENAI_API_KEY` at construction.
pub struct OpenAIProvider {
    remote: Remote,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let remote = Remote::from_config(config, "openai")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self { remote, api_key })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.remote.model
    }
    fn dims(&self) -> usize {
        self.remote.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({ "model": self.remote.model, "input": texts });
        let request = || {
            self.remote
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&payload)
        };
        let json = send_with_retry("OpenAI", request, self.remote.max_retries).await?;
        parse_openai_response(&json)
    }
}

/// `data[].embedding`, reordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let Some(data) = json.get("data").and_then(serde_json::Value::as_array) else {
        bail!("OpenAI embeddings response has no data array");
    };

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let Some(values) = item.get("embedding").and_then(serde_json::Value::as_array) else {
            bail!("OpenAI embeddings response item {} has no embedding", position);
        };
        let index = item
            .get("index")
            .and_then(serde_json::Value::as_u64)
            .map_or(position, |i| i as usize);
        indexed.push((index, to_f32_vec(values)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Local Ollama server; `embedding.url` defaults to `http://localhost:11434`.
pub struct OllamaProvider {
    remote: Remote,
    endpoint: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let remote = Remote::from_config(config, "ollama")?;
        let base = config.url.as_deref().unwrap_or("http://localhost:11434");
        Ok(Self {
            remote,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.remote.model
    }
    fn dims(&self) -> usize {
        self.remote.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({ "model": self.remote.model, "input": texts });
        let request = || self.remote.client.post(&self.endpoint).json(&payload);
        let json = send_with_retry("Ollama", request, self.remote.max_retries).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let Some(embeddings) = json.get("embeddings").and_then(serde_json::Value::as_array) else {
        bail!("Ollama response has no embeddings array");
    };

    embeddings
        .iter()
        .map(|embedding| match embedding.as_array() {
            Some(values) => Ok(to_f32_vec(values)),
            None => bail!("Ollama embedding is not an array"),
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(serde_json::Value::as_f64)
        .map(|v| v as f32)
        .collect()
}

/// POST built by `build_request`, retried per the module policy.
pub(crate) async fn send_with_retry<F>(
    service: &str,
    build_request: F,
    max_retries: u32,
) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error = anyhow::anyhow!("{} request was never attempted", service);

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = Duration::from_secs(1u64 << (attempt - 1).min(5));
            tokio::time::sleep(backoff).await;
        }

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(service, attempt, error = %e, "Request failed");
                last_error = e.into();
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let detail = response.text().await.unwrap_or_default();
        let error = anyhow::anyhow!("{} returned {}: {}", service, status, detail);
        if status.as_u16() != 429 && !status.is_server_error() {
            return Err(error);
        }
        warn!(service, attempt, %status, "Transient API error");
        last_error = error;
    }

    Err(last_error)
}

/// Build the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let provider: Box<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => Box::new(DisabledProvider),
        "openai" => Box::new(OpenAIProvider::new(config)?),
        "ollama" => Box::new(OllamaProvider::new(config)?),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(provider)
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use policy_audit::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude input.
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
