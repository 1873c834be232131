//! The agent's three tools.
//!
//! The set is closed: [`ToolName`] enumerates every tool, [`ToolCall`] is the
//! typed form of a model's request and [`Toolbox`] owns the components that
//! execute them.
//!
//! | Tool | Input | Effect |
//! |------|-------|--------|
//! | `PolicyRetrieval` | `query` | top-k policy chunks |
//! | `IndustryValidation` | `query` | web search evidence |
//! | `FinalReportGenerator` | `rules` | writes the HTML report (terminal) |

use serde_json::{json, Value};
use std::fmt;

use crate::index::{Retrieval, Retriever};
use crate::report::{ReportRenderer, RulesInput};
use crate::validator::IndustryValidator;

pub const RETRIEVAL_UNAVAILABLE: &str =
    "Policy retrieval unavailable: the document index was not built.";
pub const NO_POLICY_MATCHES: &str = "No matching policy text found.";
pub const QUERY_NOT_EMBEDDED: &str =
    "Policy retrieval failed: the query could not be embedded. Try again or rephrase it.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    PolicyRetrieval,
    IndustryValidation,
    FinalReportGenerator,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::PolicyRetrieval,
        ToolName::IndustryValidation,
        ToolName::FinalReportGenerator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::PolicyRetrieval => "PolicyRetrieval",
            ToolName::IndustryValidation => "IndustryValidation",
            ToolName::FinalReportGenerator => "FinalReportGenerator",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::PolicyRetrieval => {
                "Search internal medical policy documents for rules and specific text quotes."
            }
            ToolName::IndustryValidation => {
                "Check if a billing rule is standard in the US healthcare market to determine Logic Confidence."
            }
            ToolName::FinalReportGenerator => {
                "Generates the final HTML report. Call this ONLY once after analyzing ALL rules."
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolName::FinalReportGenerator)
    }

    fn parameters_schema(&self) -> Value {
        match self {
            ToolName::PolicyRetrieval => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to look for in the policy documents" }
                },
                "required": ["query"]
            }),
            ToolName::IndustryValidation => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The billing rule to check against industry standards" }
                },
                "required": ["query"]
            }),
            ToolName::FinalReportGenerator => json!({
                "type": "object",
                "properties": {
                    "rules": {
                        "description": "JSON list of rules: name, classification, description, sql, confidence, quote",
                        "type": ["array", "string"],
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "classification": {
                                    "type": "string",
                                    "enum": ["Mutual Exclusion", "Overutilization", "Service Not Covered"]
                                },
                                "description": { "type": "string" },
                                "sql": { "type": "string" },
                                "confidence": { "type": "string", "enum": ["High", "Medium", "Low"] },
                                "quote": { "type": "string" }
                            },
                            "required": ["name", "classification", "description", "sql", "confidence", "quote"]
                        }
                    }
                },
                "required": ["rules"]
            }),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function definition advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn for_tool(tool: ToolName) -> Self {
        Self {
            name: tool.as_str().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }

    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    ToolName::ALL.into_iter().map(ToolSpec::for_tool).collect()
}

/// A validated tool request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Retrieval { query: String },
    Validation { query: String },
    FinalReport { rules: RulesInput },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    UnknownTool(String),
    InvalidArguments { tool: ToolName, cause: String },
    MissingField { tool: ToolName, field: &'static str },
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallError::UnknownTool(name) => write!(
                f,
                "Error: '{}' is not a valid tool. Use one of: PolicyRetrieval, IndustryValidation, FinalReportGenerator.",
                name
            ),
            ToolCallError::InvalidArguments { tool, cause } => {
                write!(f, "Error: invalid arguments for {}: {}", tool, cause)
            }
            ToolCallError::MissingField { tool, field } => {
                write!(f, "Error: {} requires a non-empty '{}' argument.", tool, field)
            }
        }
    }
}

impl std::error::Error for ToolCallError {}

impl ToolCall {
    /// Parse the model's `(name, arguments)` pair.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolCallError> {
        let tool =
            ToolName::parse(name).ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;

        let args: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolCallError::InvalidArguments {
                tool,
                cause: e.to_string(),
            })?
        };

        match tool {
            ToolName::PolicyRetrieval => Ok(ToolCall::Retrieval {
                query: query_arg(tool, &args)?,
            }),
            ToolName::IndustryValidation => Ok(ToolCall::Validation {
                query: query_arg(tool, &args)?,
            }),
            ToolName::FinalReportGenerator => {
                let rules = match args {
                    Value::Object(mut map) => map.remove("rules"),
                    array @ Value::Array(_) => Some(array),
                    _ => None,
                }
                .filter(|v| !v.is_null())
                .ok_or(ToolCallError::MissingField {
                    tool,
                    field: "rules",
                })?;
                Ok(ToolCall::FinalReport {
                    rules: RulesInput::from_value(rules),
                })
            }
        }
    }

    pub fn tool(&self) -> ToolName {
        match self {
            ToolCall::Retrieval { .. } => ToolName::PolicyRetrieval,
            ToolCall::Validation { .. } => ToolName::IndustryValidation,
            ToolCall::FinalReport { .. } => ToolName::FinalReportGenerator,
        }
    }

    /// Short human-readable form of the input, for the scratchpad and logs.
    pub fn input_summary(&self) -> String {
        match self {
            ToolCall::Retrieval { query } | ToolCall::Validation { query } => query.clone(),
            ToolCall::FinalReport { rules } => match rules {
                RulesInput::Records(records) => format!("{} rules", records.len()),
                RulesInput::Text(text) => format!("{} chars of rule text", text.len()),
            },
        }
    }
}

fn query_arg(tool: ToolName, args: &Value) -> Result<String, ToolCallError> {
    let query = match args {
        Value::String(s) => Some(s.as_str()),
        _ => args.get("query").and_then(Value::as_str),
    };
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => Ok(q.to_string()),
        _ => Err(ToolCallError::MissingField {
            tool,
            field: "query",
        }),
    }
}

/// Components the tools run against.
pub struct Toolbox {
    retriever: Retriever,
    validator: IndustryValidator,
    renderer: ReportRenderer,
}

impl Toolbox {
    pub fn new(retriever: Retriever, validator: IndustryValidator, renderer: ReportRenderer) -> Self {
        Self {
            retriever,
            validator,
            renderer,
        }
    }

    pub async fn retrieve(&self, query: &str) -> Retrieval {
        self.retriever.retrieve(query).await
    }

    pub async fn validate(&self, query: &str) -> String {
        self.validator.validate(query).await
    }

    pub fn renderer(&self) -> &ReportRenderer {
        &self.renderer
    }
}

/// Text handed back to the model for a retrieval.
pub fn format_retrieval(retrieval: &Retrieval) -> String {
    match retrieval {
        Retrieval::Unavailable => RETRIEVAL_UNAVAILABLE.to_string(),
        Retrieval::QueryFailed(_) => QUERY_NOT_EMBEDDED.to_string(),
        Retrieval::Hits(hits) if hits.is_empty() => NO_POLICY_MATCHES.to_string(),
        Retrieval::Hits(hits) => hits
            .iter()
            .map(|hit| format!("[source: {}]\n{}", hit.chunk.source, hit.chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ScoredChunk};

    #[test]
    fn tool_names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::parse("Calculator"), None);
        assert!(ToolName::FinalReportGenerator.is_terminal());
    }

    #[test]
    fn specs_cover_all_tools() {
        let specs = tool_specs();
        assert_eq!(specs.len(), 3);
        let wire = specs[2].to_openai();
        assert_eq!(wire["function"]["name"], "FinalReportGenerator");
        assert_eq!(wire["function"]["parameters"]["required"][0], "rules");
    }

    #[test]
    fn parse_query_tools() {
        let call = ToolCall::parse("PolicyRetrieval", r#"{"query":"drug wastage"}"#).unwrap();
        assert_eq!(
            call,
            ToolCall::Retrieval {
                query: "drug wastage".into()
            }
        );
        let call = ToolCall::parse("IndustryValidation", r#""modifier JW""#).unwrap();
        assert_eq!(call.tool(), ToolName::IndustryValidation);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            ToolCall::parse("Shell", "{}"),
            Err(ToolCallError::UnknownTool(_))
        ));
        assert!(matches!(
            ToolCall::parse("PolicyRetrieval", "{not json"),
            Err(ToolCallError::InvalidArguments { .. })
        ));
        assert!(matches!(
            ToolCall::parse("PolicyRetrieval", r#"{"query":"  "}"#),
            Err(ToolCallError::MissingField { field: "query", .. })
        ));
        assert!(matches!(
            ToolCall::parse("FinalReportGenerator", "{}"),
            Err(ToolCallError::MissingField { field: "rules", .. })
        ));
    }

    #[test]
    fn final_report_accepts_text() {
        let call = ToolCall::parse("FinalReportGenerator", r#"{"rules":"```json\n[]\n```"}"#)
            .unwrap();
        assert_eq!(
            call,
            ToolCall::FinalReport {
                rules: RulesInput::Text("```json\n[]\n```".into())
            }
        );
    }

    #[test]
    fn retrieval_formatting() {
        assert_eq!(format_retrieval(&Retrieval::Unavailable), RETRIEVAL_UNAVAILABLE);
        assert_eq!(format_retrieval(&Retrieval::Hits(vec![])), NO_POLICY_MATCHES);
        assert_eq!(
            format_retrieval(&Retrieval::QueryFailed("timeout".into())),
            QUERY_NOT_EMBEDDED
        );

        let hits = vec![
            ScoredChunk {
                chunk: Chunk::new("J1100 per 1 mg", "drugs.pdf"),
                score: 0.9,
            },
            ScoredChunk {
                chunk: Chunk::new("Modifier JW", "wastage.pdf"),
                score: 0.8,
            },
        ];
        assert_eq!(
            format_retrieval(&Retrieval::Hits(hits)),
            "[source: drugs.pdf]\nJ1100 per 1 mg\n\n[source: wastage.pdf]\nModifier JW"
        );
    }
}
