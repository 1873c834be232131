//! HTML audit report.
//!
//! Rules arrive either as typed records or as the raw text a model produced
//! (often wrapped in Markdown code fences). They are parsed, rendered through
//! an embedded Tera template and written to `<output_dir>/<file_name>`,
//! replacing any previous report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tera::{Context, Tera};
use tracing::{debug, error, info};

use crate::config::ReportConfig;

const TEMPLATE_NAME: &str = "report.html";
const REPORT_TITLE: &str = "Medical Policy Analysis - SQL Rules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "Mutual Exclusion")]
    MutualExclusion,
    Overutilization,
    #[serde(rename = "Service Not Covered")]
    ServiceNotCovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// One extracted billing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub name: String,
    pub classification: Classification,
    pub description: String,
    pub sql: String,
    pub confidence: Confidence,
    /// Verbatim policy text the rule was derived from.
    pub quote: String,
}

/// Rules as handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulesInput {
    Records(Vec<RuleRecord>),
    Text(String),
}

impl RulesInput {
    /// Interpret a tool argument: strings stay text, anything else is tried
    /// as records and otherwise re-serialized so parsing reports the cause.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => RulesInput::Text(text),
            other => match serde_json::from_value::<Vec<RuleRecord>>(other.clone()) {
                Ok(records) => RulesInput::Records(records),
                Err(_) => RulesInput::Text(other.to_string()),
            },
        }
    }
}

#[derive(Debug)]
pub enum ReportError {
    Parse(String),
    Render(String),
    Io(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Parse(e) => write!(f, "Error parsing JSON: {}", e),
            ReportError::Render(e) | ReportError::Io(e) => {
                write!(f, "Error during report rendering: {}", e)
            }
        }
    }
}

impl std::error::Error for ReportError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub rule_count: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Success! Report generated with {} rules.", self.rule_count)
    }
}

/// Remove every "```json" and "```" marker and trim.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

pub fn parse_rules(input: RulesInput) -> Result<Vec<RuleRecord>, ReportError> {
    match input {
        RulesInput::Records(records) => Ok(records),
        RulesInput::Text(text) => {
            let cleaned = strip_code_fences(&text);
            serde_json::from_str(&cleaned).map_err(|e| ReportError::Parse(e.to_string()))
        }
    }
}

pub struct ReportRenderer {
    tera: Tera,
    output_path: PathBuf,
}

impl ReportRenderer {
    pub fn new(config: &ReportConfig) -> Result<Self, ReportError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, include_str!("../templates/report.html.tera"))
            .map_err(|e| ReportError::Render(e.to_string()))?;
        tera.set_escape_fn(escape_markup);
        Ok(Self {
            tera,
            output_path: config.output_path(),
        })
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    pub fn render_html(&self, rules: &[RuleRecord]) -> Result<String, ReportError> {
        let mut context = Context::new();
        context.insert("title", REPORT_TITLE);
        context.insert("rules", rules);
        context.insert(
            "generated_at",
            &chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| ReportError::Render(render_error_chain(&e)))
    }

    /// Parse, render and write the report.
    pub fn write_report(&self, input: RulesInput) -> Result<ReportSummary, ReportError> {
        info!("Starting HTML report generation");
        let rules = parse_rules(input)?;
        debug!(count = rules.len(), "Parsed rules");

        let html = self.render_html(&rules)?;

        if let Some(dir) = self.output_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| ReportError::Io(e.to_string()))?;
            }
        }
        std::fs::write(&self.output_path, html).map_err(|e| ReportError::Io(e.to_string()))?;

        info!(path = %self.output_path.display(), rules = rules.len(), "Report saved");
        Ok(ReportSummary {
            path: self.output_path.clone(),
            rule_count: rules.len(),
        })
    }

    /// [`write_report`](Self::write_report) flattened to the string the
    /// agent sees.
    pub fn write_report_summary(&self, input: RulesInput) -> String {
        match self.write_report(input) {
            Ok(summary) => summary.to_string(),
            Err(e) => {
                error!(error = %e, "Report generation failed");
                e.to_string()
            }
        }
    }
}

/// Escapes only what can open markup, so SQL quotes render as written.
/// Rule text is never placed inside attribute values.
fn escape_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Tera wraps the useful message in its source chain.
fn render_error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
