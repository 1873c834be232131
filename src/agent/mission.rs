//! Per-run mission state.
//!
//! Everything the executor and the terminal guard need to know about the
//! run so far lives in [`MissionState`]: the message transcript sent to the
//! model, the scratchpad of tool invocations, the policy text retrieved so
//! far and the counters the guard checks.

use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use super::llm::{ChatMessage, RawToolCall};
use super::tools::ToolName;
use crate::models::ScoredChunk;
use crate::report::RuleRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPhase {
    MissionStart,
    Reasoning,
    ToolCallPending,
    ToolResultReceived,
    TerminalReached,
    Exhausted,
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissionPhase::MissionStart => "MISSION_START",
            MissionPhase::Reasoning => "REASONING",
            MissionPhase::ToolCallPending => "TOOL_CALL_PENDING",
            MissionPhase::ToolResultReceived => "TOOL_RESULT_RECEIVED",
            MissionPhase::TerminalReached => "TERMINAL_REACHED",
            MissionPhase::Exhausted => "EXHAUSTED",
        };
        f.write_str(name)
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchpadEntry {
    pub tool: ToolName,
    pub input: String,
    pub output: String,
}

#[derive(Debug)]
pub struct MissionState {
    phase: MissionPhase,
    transcript: Vec<ChatMessage>,
    scratchpad: Vec<ScratchpadEntry>,
    evidence: Vec<String>,
    seen_chunks: HashSet<String>,
    retrievals_with_hits: usize,
    retrieval_exhausted: bool,
    validations: usize,
    terminal_fired: bool,
    final_output: Option<String>,
    final_rules: Vec<RuleRecord>,
    last_message: Option<String>,
    pub iterations: usize,
    pub parse_failures: usize,
}

impl MissionState {
    /// Transcript starts as: system prompt, prior chat history, mission prompt.
    pub fn new(system_prompt: &str, chat_history: &[ChatMessage], mission_prompt: &str) -> Self {
        let mut transcript = Vec::with_capacity(chat_history.len() + 2);
        transcript.push(ChatMessage::system(system_prompt));
        transcript.extend(chat_history.iter().cloned());
        transcript.push(ChatMessage::user(mission_prompt));

        Self {
            phase: MissionPhase::MissionStart,
            transcript,
            scratchpad: Vec::new(),
            evidence: Vec::new(),
            seen_chunks: HashSet::new(),
            retrievals_with_hits: 0,
            retrieval_exhausted: false,
            validations: 0,
            terminal_fired: false,
            final_output: None,
            final_rules: Vec::new(),
            last_message: None,
            iterations: 0,
            parse_failures: 0,
        }
    }

    pub fn phase(&self) -> MissionPhase {
        self.phase
    }

    pub fn advance(&mut self, next: MissionPhase) {
        debug!(from = %self.phase, to = %next, iteration = self.iterations, "Mission phase");
        self.phase = next;
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn scratchpad(&self) -> &[ScratchpadEntry] {
        &self.scratchpad
    }

    pub fn take_scratchpad(&mut self) -> Vec<ScratchpadEntry> {
        std::mem::take(&mut self.scratchpad)
    }

    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    pub fn has_retrieved_hits(&self) -> bool {
        self.retrievals_with_hits > 0
    }

    pub fn retrieval_exhausted(&self) -> bool {
        self.retrieval_exhausted
    }

    pub fn validations(&self) -> usize {
        self.validations
    }

    pub fn terminal_fired(&self) -> bool {
        self.terminal_fired
    }

    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn take_final_rules(&mut self) -> Vec<RuleRecord> {
        std::mem::take(&mut self.final_rules)
    }

    pub fn push_assistant(&mut self, content: Option<String>, tool_calls: Vec<RawToolCall>) {
        if let Some(text) = content.as_ref().filter(|t| !t.trim().is_empty()) {
            self.last_message = Some(text.clone());
        }
        self.transcript.push(ChatMessage::Assistant {
            content,
            tool_calls,
        });
    }

    pub fn push_user(&mut self, content: &str) {
        self.transcript.push(ChatMessage::user(content));
    }

    pub fn push_tool_result(&mut self, call_id: &str, content: &str) {
        self.last_message = Some(content.to_string());
        self.transcript.push(ChatMessage::Tool {
            tool_call_id: call_id.to_string(),
            content: content.to_string(),
        });
    }

    pub fn record_step(&mut self, tool: ToolName, input: String, output: String) {
        self.scratchpad.push(ScratchpadEntry {
            tool,
            input,
            output,
        });
    }

    /// Track retrieved chunks. A non-empty retrieval that surfaces nothing
    /// new marks the documents as exhausted.
    pub fn record_retrieval(&mut self, hits: &[ScoredChunk]) {
        if hits.is_empty() {
            return;
        }
        self.retrievals_with_hits += 1;

        let mut new_chunks = 0;
        for hit in hits {
            let key = format!("{}\u{0}{}", hit.chunk.source, hit.chunk.text);
            if self.seen_chunks.insert(key) {
                new_chunks += 1;
                self.evidence.push(hit.chunk.text.clone());
            }
        }
        if new_chunks == 0 {
            self.retrieval_exhausted = true;
        }
    }

    pub fn record_validation(&mut self) {
        self.validations += 1;
    }

    pub fn fire_terminal(&mut self, output: String, rules: Vec<RuleRecord>) {
        self.terminal_fired = true;
        self.final_output = Some(output);
        self.final_rules = rules;
    }
}
