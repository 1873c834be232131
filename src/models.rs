//! Core data types shared by the chunker, the index and the agent tools.

use serde::{Deserialize, Serialize};

/// A bounded text window cut from one policy document.
///
/// Overlapping windows repeat text on purpose, so duplicates are expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// File name of the document the window was cut from.
    pub source: String,
}

impl Chunk {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// A retrieval hit: the chunk plus its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
