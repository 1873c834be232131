//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use policy_audit::agent::tools::ToolSpec;
use policy_audit::agent::{ChatMessage, ChatModel, ModelTurn, RawToolCall};
use policy_audit::embedding::EmbeddingProvider;

/// Minimal single-page PDF showing `text` in Helvetica.
/// Byte offsets in the xref table are computed so pdf-extract can parse it.
pub fn minimal_pdf_with_text(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Deterministic embedding: counts of a few billing keywords.
pub struct KeywordProvider;

const KEYWORDS: [&str; 4] = ["units", "modifier", "wastage", "endoscopy"];

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }
}

/// Chat model that replays a fixed list of turns and records every request.
/// Once the script runs out it keeps answering in prose.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelTurn>) -> (Self, Arc<Mutex<Vec<Vec<ChatMessage>>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = Self {
            turns: Mutex::new(turns.into()),
            requests: Arc::clone(&requests),
        };
        (model, requests)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn> {
        assert_eq!(tools.len(), 3);
        self.requests.lock().unwrap().push(messages.to_vec());
        let next = self.turns.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| prose("Still reviewing the policies.")))
    }
}

/// Chat model whose transport always fails.
pub struct FailingModel;

#[async_trait]
impl ChatModel for FailingModel {
    async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelTurn> {
        anyhow::bail!("connection reset by peer")
    }
}

pub fn prose(text: &str) -> ModelTurn {
    ModelTurn {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

pub fn calls(calls: Vec<RawToolCall>) -> ModelTurn {
    ModelTurn {
        content: None,
        tool_calls: calls,
    }
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> RawToolCall {
    RawToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

pub fn rule_json(name: &str, sql: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "classification": "Overutilization",
        "description": "Units billed above the daily maximum",
        "sql": sql,
        "confidence": "High",
        "quote": "Maximum 4 units per day."
    })
}

/// Tool results sent back to the model in one request, in order.
pub fn tool_results(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}
