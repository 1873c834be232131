//! The mission loop.
//!
//! ```text
//! MISSION_START → REASONING ─┬─ prose ──────────────► reminder → REASONING
//!                            └─ tool calls ─► TOOL_CALL_PENDING
//!                                             → TOOL_RESULT_RECEIVED
//!                                             ─┬─ terminal fired ─► TERMINAL_REACHED
//!                                              └─────────────────► REASONING
//! budget spent or too many bad calls ───────────────────────────► EXHAUSTED
//! ```
//!
//! The model call is the only awaited external step per iteration; tool
//! calls in one turn run sequentially in the order the model gave them.

use anyhow::Result;
use tracing::{error, info, warn};

use super::guard::{check_terminal, SqlGuard};
use super::llm::{ChatMessage, ChatModel};
use super::mission::{MissionPhase, MissionState, ScratchpadEntry};
use super::prompt::{system_prompt, FINISH_REMINDER};
use super::tools::{format_retrieval, tool_specs, ToolCall, ToolSpec, Toolbox};
use crate::config::AgentConfig;
use crate::index::Retrieval;
use crate::report::{RuleRecord, RulesInput};

pub const DUPLICATE_TERMINAL: &str =
    "Report already generated; ignoring duplicate FinalReportGenerator call.";

#[derive(Debug, Clone, PartialEq)]
pub enum MissionOutcome {
    /// The report was written. `output` is the renderer's summary verbatim;
    /// `steps` lists every executed tool call, including any after the report.
    Completed {
        output: String,
        rules: Vec<RuleRecord>,
        iterations: usize,
        steps: Vec<ScratchpadEntry>,
    },
    Exhausted {
        iterations: usize,
        last_message: Option<String>,
    },
}

pub struct MissionExecutor {
    model: Box<dyn ChatModel>,
    toolbox: Toolbox,
    config: AgentConfig,
    sql_guard: SqlGuard,
    specs: Vec<ToolSpec>,
}

impl MissionExecutor {
    pub fn new(model: Box<dyn ChatModel>, toolbox: Toolbox, config: AgentConfig) -> Self {
        let sql_guard = SqlGuard::new(&config.banned_sql_terms);
        Self {
            model,
            toolbox,
            config,
            sql_guard,
            specs: tool_specs(),
        }
    }

    /// Run the mission to completion or exhaustion.
    ///
    /// # Errors
    ///
    /// Only model transport failures are returned; everything else is fed
    /// back to the model or ends in [`MissionOutcome::Exhausted`].
    pub async fn run(
        &self,
        mission_prompt: &str,
        chat_history: &[ChatMessage],
    ) -> Result<MissionOutcome> {
        let mut state = MissionState::new(
            &system_prompt(&self.config),
            chat_history,
            mission_prompt,
        );
        info!(max_iterations = self.config.max_iterations, "Mission started");

        while state.iterations < self.config.max_iterations {
            state.iterations += 1;
            state.advance(MissionPhase::Reasoning);

            let turn = self.model.complete(state.transcript(), &self.specs).await?;

            if turn.tool_calls.is_empty() {
                info!(iteration = state.iterations, "Model answered without a tool call");
                state.push_assistant(turn.content, Vec::new());
                state.push_user(FINISH_REMINDER);
                continue;
            }

            state.push_assistant(turn.content, turn.tool_calls.clone());
            for raw in &turn.tool_calls {
                let result = match ToolCall::parse(&raw.name, &raw.arguments) {
                    Ok(call) => {
                        state.parse_failures = 0;
                        state.advance(MissionPhase::ToolCallPending);
                        let output = self.execute(&mut state, call).await;
                        state.advance(MissionPhase::ToolResultReceived);
                        output
                    }
                    Err(e) => {
                        state.parse_failures += 1;
                        warn!(tool = %raw.name, error = %e, failures = state.parse_failures, "Invalid tool call");
                        e.to_string()
                    }
                };
                state.push_tool_result(&raw.id, &result);
            }

            if state.terminal_fired() {
                state.advance(MissionPhase::TerminalReached);
                let output = state.final_output().unwrap_or_default().to_string();
                info!(iterations = state.iterations, "Mission completed");
                return Ok(MissionOutcome::Completed {
                    output,
                    rules: state.take_final_rules(),
                    iterations: state.iterations,
                    steps: state.take_scratchpad(),
                });
            }

            if state.parse_failures > self.config.max_parse_retries {
                error!(
                    failures = state.parse_failures,
                    "Too many consecutive invalid tool calls; stopping"
                );
                return Ok(exhausted(&mut state));
            }
        }

        warn!(iterations = state.iterations, "Iteration budget spent without a report");
        Ok(exhausted(&mut state))
    }

    async fn execute(&self, state: &mut MissionState, call: ToolCall) -> String {
        let tool = call.tool();
        let input = call.input_summary();
        info!(tool = %tool, input = %input, "Invoking tool");

        let output = match call {
            ToolCall::Retrieval { query } => {
                let retrieval = self.toolbox.retrieve(&query).await;
                if let Retrieval::Hits(hits) = &retrieval {
                    state.record_retrieval(hits);
                }
                format_retrieval(&retrieval)
            }
            ToolCall::Validation { query } => {
                state.record_validation();
                self.toolbox.validate(&query).await
            }
            ToolCall::FinalReport { rules } => self.finish(state, rules),
        };

        state.record_step(tool, input, output.clone());
        output
    }

    fn finish(&self, state: &mut MissionState, input: RulesInput) -> String {
        if state.terminal_fired() {
            warn!("Duplicate terminal call ignored");
            return DUPLICATE_TERMINAL.to_string();
        }

        let rules = match check_terminal(state, &self.config, &self.sql_guard, &input) {
            Ok(rules) => rules,
            Err(rejection) => {
                warn!(reason = %rejection, "Terminal call rejected");
                return rejection.to_string();
            }
        };

        match self
            .toolbox
            .renderer()
            .write_report(RulesInput::Records(rules.clone()))
        {
            Ok(summary) => {
                let output = summary.to_string();
                state.fire_terminal(output.clone(), rules);
                output
            }
            Err(e) => {
                error!(error = %e, "Report generation failed");
                e.to_string()
            }
        }
    }
}

fn exhausted(state: &mut MissionState) -> MissionOutcome {
    state.advance(MissionPhase::Exhausted);
    MissionOutcome::Exhausted {
        iterations: state.iterations,
        last_message: state.last_message().map(str::to_string),
    }
}
