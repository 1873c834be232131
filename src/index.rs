//! Flat vector index over policy chunks.
//!
//! Every chunk is embedded once and stored alongside its text and source.
//! Search is a brute-force cosine scan, which is fine for the few thousand
//! windows a policy library produces.
//!
//! # On-disk layout
//!
//! ```text
//! vector_index/
//! ├── manifest.json   model, dims, count, fingerprint
//! ├── entries.json    [{ text, metadata: { source } }, ...]
//! └── vectors.bin     count × dims little-endian f32
//! ```
//!
//! A rebuild overwrites those three files. When the fingerprint of the
//! current chunks matches the persisted manifest, the persisted index is
//! loaded instead of re-embedding.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::IndexConfig;
use crate::embedding::{
    blob_to_vec, cosine_similarity, embed_batched, embed_query, vec_to_blob, EmbeddingProvider,
};
use crate::models::{Chunk, ScoredChunk};

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";
const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source: String,
}

/// One indexed chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    fn to_chunk(&self) -> Chunk {
        Chunk::new(self.text.clone(), self.metadata.source.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    text: String,
    metadata: EntryMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub model: String,
    pub dims: usize,
    pub count: usize,
    pub fingerprint: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    fingerprint: String,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Assemble an index from already-embedded entries.
    ///
    /// All vectors must share one dimensionality.
    pub fn from_entries(model: &str, fingerprint: String, entries: Vec<IndexEntry>) -> Result<Self> {
        let dims = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dims) {
            bail!(
                "Inconsistent embedding dimensions: expected {}, got {}",
                dims,
                bad.embedding.len()
            );
        }
        Ok(Self {
            model: model.to_string(),
            dims,
            fingerprint,
            entries,
        })
    }

    /// Embed `chunks` in batches and build the index.
    pub async fn build(
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(provider, &texts, batch_size).await?;

        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry {
                embedding,
                text: chunk.text.clone(),
                metadata: EntryMetadata {
                    source: chunk.source.clone(),
                },
            })
            .collect();

        Self::from_entries(
            provider.model_name(),
            fingerprint(provider.model_name(), chunks),
            entries,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Top `k` entries by cosine similarity, best first.
    ///
    /// Returns at most `min(k, len)` results; ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].to_chunk(),
                score,
            })
            .collect()
    }

    /// Persist to `dir`, overwriting the three index files. Anything else in
    /// the directory is left alone.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let manifest = Manifest {
            model: self.model.clone(),
            dims: self.dims,
            count: self.entries.len(),
            fingerprint: self.fingerprint.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let stored: Vec<StoredEntry> = self
            .entries
            .iter()
            .map(|e| StoredEntry {
                text: e.text.clone(),
                metadata: e.metadata.clone(),
            })
            .collect();

        let mut blob = Vec::with_capacity(self.entries.len() * self.dims * 4);
        for entry in &self.entries {
            blob.extend(vec_to_blob(&entry.embedding));
        }

        std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
        std::fs::write(dir.join(ENTRIES_FILE), serde_json::to_vec(&stored)?)?;
        std::fs::write(dir.join(VECTORS_FILE), blob)?;

        debug!(dir = %dir.display(), count = self.entries.len(), "Index saved");
        Ok(())
    }

    /// Load an index previously written by [`save`](Self::save).
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = read_manifest(dir)?;

        let entries_raw = std::fs::read(dir.join(ENTRIES_FILE))
            .with_context(|| format!("Failed to read {}", ENTRIES_FILE))?;
        let stored: Vec<StoredEntry> = serde_json::from_slice(&entries_raw)
            .with_context(|| format!("Failed to parse {}", ENTRIES_FILE))?;
        let blob = std::fs::read(dir.join(VECTORS_FILE))
            .with_context(|| format!("Failed to read {}", VECTORS_FILE))?;

        if stored.len() != manifest.count {
            bail!(
                "Index manifest lists {} entries but {} were found",
                manifest.count,
                stored.len()
            );
        }
        if blob.len() != manifest.count * manifest.dims * 4 {
            bail!(
                "Index vectors file has {} bytes, expected {}",
                blob.len(),
                manifest.count * manifest.dims * 4
            );
        }

        let vectors = blob_to_vec(&blob);
        let entries = if manifest.dims == 0 {
            Vec::new()
        } else {
            stored
                .into_iter()
                .zip(vectors.chunks(manifest.dims))
                .map(|(s, v)| IndexEntry {
                    embedding: v.to_vec(),
                    text: s.text,
                    metadata: s.metadata,
                })
                .collect()
        };

        Ok(Self {
            model: manifest.model,
            dims: manifest.dims,
            fingerprint: manifest.fingerprint,
            entries,
        })
    }
}

pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let raw = std::fs::read(dir.join(MANIFEST_FILE))
        .with_context(|| format!("No index found at {}", dir.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Failed to parse {}", MANIFEST_FILE))
}

/// SHA-256 over the model name and every chunk's source and text.
pub fn fingerprint(model: &str, chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    for chunk in chunks {
        hasher.update([0u8]);
        hasher.update(chunk.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.text.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Build the index for this run.
///
/// Returns `None` when there is nothing to index or embedding fails; the
/// mission then runs with retrieval unavailable. A failed save is logged
/// and the in-memory index is still returned.
pub async fn build_index(
    chunks: &[Chunk],
    provider: &dyn EmbeddingProvider,
    config: &IndexConfig,
    batch_size: usize,
) -> Option<VectorIndex> {
    if chunks.is_empty() {
        warn!("No documents to index");
        return None;
    }

    let current = fingerprint(provider.model_name(), chunks);
    if let Ok(manifest) = read_manifest(&config.path) {
        if manifest.fingerprint == current {
            match VectorIndex::load(&config.path) {
                Ok(index) => {
                    info!(path = %config.path.display(), count = index.len(), "Reusing persisted index");
                    return Some(index);
                }
                Err(e) => warn!(error = %e, "Persisted index unreadable; rebuilding"),
            }
        }
    }

    info!(chunks = chunks.len(), model = provider.model_name(), "Embedding chunks");
    let index = match VectorIndex::build(chunks, provider, batch_size).await {
        Ok(index) => index,
        Err(e) => {
            error!(error = %e, "Failed to build vector index");
            return None;
        }
    };

    match index.save(&config.path) {
        Ok(()) => info!(path = %config.path.display(), count = index.len(), "Vector index saved"),
        Err(e) => error!(path = %config.path.display(), error = %e, "Failed to save vector index"),
    }
    Some(index)
}

/// Result of a retrieval request.
#[derive(Debug, Clone)]
pub enum Retrieval {
    /// No index was built.
    Unavailable,
    /// The index exists but the query could not be embedded.
    QueryFailed(String),
    Hits(Vec<ScoredChunk>),
}

/// Query-side handle: the optional index plus the provider that embeds queries.
pub struct Retriever {
    index: Option<VectorIndex>,
    provider: Box<dyn EmbeddingProvider>,
    k: usize,
}

impl Retriever {
    pub fn new(index: Option<VectorIndex>, provider: Box<dyn EmbeddingProvider>, k: usize) -> Self {
        Self { index, provider, k }
    }

    pub fn is_available(&self) -> bool {
        self.index.is_some()
    }

    pub async fn retrieve(&self, query: &str) -> Retrieval {
        let Some(index) = &self.index else {
            return Retrieval::Unavailable;
        };

        match embed_query(self.provider.as_ref(), query).await {
            Ok(vector) => Retrieval::Hits(index.search(&vector, self.k)),
            Err(e) => {
                warn!(error = %e, "Failed to embed retrieval query");
                Retrieval::QueryFailed(format!("{:#}", e))
            }
        }
    }
}
