//! Preconditions for the terminal `FinalReportGenerator` call.
//!
//! A rejected call never writes a report; the rejection text goes back to
//! the model as the tool result and the mission continues.

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use super::mission::MissionState;
use crate::config::AgentConfig;
use crate::report::{parse_rules, RuleRecord, RulesInput};

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(from|join)\s+([`"\[]?[A-Za-z_][A-Za-z0-9_.]*[`"\]]?)"#).unwrap()
});
static CTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s+AS\s*\(").unwrap());
static CODE_EQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:cpt_code|diagnosis_code)\s*(?:=|<>|!=)\s*('[^']*'|\d[\d.]*)").unwrap()
});
static CODE_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:cpt_code|diagnosis_code)\s+(?:NOT\s+)?IN\s*\(([^)]*)\)").unwrap()
});
static LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").unwrap());

const ALLOWED_TABLE: &str = "claims";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlViolation {
    BannedTerm(String),
    ForeignTable(String),
    UngroundedCode(String),
}

impl fmt::Display for SqlViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlViolation::BannedTerm(term) => write!(
                f,
                "the SQL contains the word '{}'; list the literal procedure codes from the policy instead",
                term
            ),
            SqlViolation::ForeignTable(table) => write!(
                f,
                "the SQL reads from '{}'; only the 'claims' table may be used",
                table
            ),
            SqlViolation::UngroundedCode(code) => write!(
                f,
                "code {} does not appear in any retrieved policy text; use only codes found with PolicyRetrieval",
                code
            ),
        }
    }
}

/// Why a terminal call was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardRejection {
    NoRetrievalYet,
    RetrievalNotExhausted,
    MissingValidations { validations: usize, rules: usize },
    EmptyRuleSet,
    Unparseable(String),
    Sql { rule: String, violation: SqlViolation },
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardRejection::NoRetrievalYet => write!(
                f,
                "Report rejected: no policy text has been retrieved yet. Use PolicyRetrieval first."
            ),
            GuardRejection::RetrievalNotExhausted => write!(
                f,
                "Report rejected: keep using PolicyRetrieval until searches stop returning new policy text."
            ),
            GuardRejection::MissingValidations { validations, rules } => write!(
                f,
                "Report rejected: {} rules submitted but only {} IndustryValidation calls made. Validate each rule first.",
                rules, validations
            ),
            GuardRejection::EmptyRuleSet => {
                write!(f, "Report rejected: the rule list is empty.")
            }
            GuardRejection::Unparseable(message) => write!(f, "Report rejected: {}", message),
            GuardRejection::Sql { rule, violation } => {
                write!(f, "Report rejected: rule '{}': {}.", rule, violation)
            }
        }
    }
}

impl std::error::Error for GuardRejection {}

/// Static checks on generated SQL.
#[derive(Debug, Clone)]
pub struct SqlGuard {
    banned_terms: Vec<String>,
}

impl SqlGuard {
    pub fn new(banned_terms: &[String]) -> Self {
        Self {
            banned_terms: banned_terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// `evidence` is every policy text retrieved during the mission.
    pub fn check(&self, sql: &str, evidence: &[String]) -> Result<(), SqlViolation> {
        let lower = sql.to_lowercase();
        if let Some(term) = self.banned_terms.iter().find(|t| lower.contains(t.as_str())) {
            return Err(SqlViolation::BannedTerm(term.clone()));
        }

        let unquoted = LITERAL_RE.replace_all(sql, "''");
        if let Some(table) = foreign_tables(&unquoted).into_iter().next() {
            return Err(SqlViolation::ForeignTable(table));
        }

        for code in code_literals(sql) {
            let grounded = evidence.iter().any(|text| text.to_uppercase().contains(&code));
            if !grounded {
                return Err(SqlViolation::UngroundedCode(code));
            }
        }

        Ok(())
    }
}

/// Upper-cased literals compared against `cpt_code` or `diagnosis_code`
/// with `=`, `<>`, `!=` or an `IN (...)` list. Column references and
/// subquery lists are skipped.
fn code_literals(sql: &str) -> Vec<String> {
    let mut codes: Vec<String> = CODE_EQ_RE
        .captures_iter(sql)
        .map(|c| c[1].to_string())
        .collect();

    for caps in CODE_IN_RE.captures_iter(sql) {
        let list = caps[1].trim();
        if list.to_lowercase().starts_with("select") {
            continue;
        }
        codes.extend(
            list.split(',')
                .map(str::trim)
                .filter(|item| item.starts_with('\'') || item.starts_with(|c: char| c.is_ascii_digit()))
                .map(str::to_string),
        );
    }

    codes
        .into_iter()
        .map(|c| c.trim_matches('\'').trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Tables referenced after `FROM`/`JOIN` other than `claims` or a CTE name.
/// String literals must already be blanked out.
///
/// `FROM` inside a function call such as `EXTRACT(YEAR FROM dos)` is skipped;
/// `FROM` inside a parenthesized subquery is checked.
fn foreign_tables(sql: &str) -> Vec<String> {
    let ctes: HashSet<String> = CTE_RE
        .captures_iter(sql)
        .map(|c| c[1].to_lowercase())
        .collect();

    let mut tables = Vec::new();
    for caps in TABLE_RE.captures_iter(sql) {
        let keyword = caps[1].to_lowercase();
        let Some(whole) = caps.get(0) else { continue };
        if keyword == "from" && inside_function_call(&sql[..whole.start()]) {
            continue;
        }

        let raw = caps[2].trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'));
        let name = raw.rsplit('.').next().unwrap_or(raw).to_lowercase();
        if name != ALLOWED_TABLE && !ctes.contains(&name) {
            tables.push(raw.to_string());
        }
    }
    tables
}

/// Whether the innermost open parenthesis before this point opens something
/// other than a subquery.
fn inside_function_call(prefix: &str) -> bool {
    let mut open: Vec<usize> = Vec::new();
    for (i, c) in prefix.char_indices() {
        match c {
            '(' => open.push(i),
            ')' => {
                open.pop();
            }
            _ => {}
        }
    }
    match open.last() {
        None => false,
        Some(&pos) => {
            let after = prefix[pos + 1..].trim_start().to_lowercase();
            !(after.starts_with("select") || after.starts_with("with"))
        }
    }
}

/// Decide whether a terminal call may proceed. On success the parsed rules
/// are returned for rendering.
pub fn check_terminal(
    state: &MissionState,
    config: &AgentConfig,
    sql_guard: &SqlGuard,
    input: &RulesInput,
) -> Result<Vec<RuleRecord>, GuardRejection> {
    if !state.has_retrieved_hits() {
        return Err(GuardRejection::NoRetrievalYet);
    }
    if config.require_retrieval_exhaustion && !state.retrieval_exhausted() {
        return Err(GuardRejection::RetrievalNotExhausted);
    }

    let rules =
        parse_rules(input.clone()).map_err(|e| GuardRejection::Unparseable(e.to_string()))?;
    if rules.is_empty() {
        return Err(GuardRejection::EmptyRuleSet);
    }

    if config.require_validation_per_rule && state.validations() < rules.len() {
        return Err(GuardRejection::MissingValidations {
            validations: state.validations(),
            rules: rules.len(),
        });
    }

    for rule in &rules {
        sql_guard
            .check(&rule.sql, state.evidence())
            .map_err(|violation| GuardRejection::Sql {
                rule: rule.name.clone(),
                violation,
            })?;
    }

    Ok(rules)
}
