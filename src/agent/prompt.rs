//! Prompt text for the audit mission.

use crate::config::AgentConfig;

/// Columns of the `claims` table the generated SQL may reference.
pub const APPENDIX_FIELDS: &str = "patient_id, dob, gender, tin, npi, claim_number, dos, pos, diagnosis_code, cpt_code, units, billed_amount, modifiers";

pub const MISSION_PROMPT: &str = "\
1. Scan all PDF files for billing rules.
2. For each rule, search industry standards and write a SQL violation query using Appendix fields.
3. Make sure that when you extract the data from the PDFs you get all the rules, not just some.
4. Very important: rules must contain the real codes from the file. Do not use example codes and do not ignore the numbers or generalize. Use the real codes in the query.
5. Categorize rules into Mutual Exclusion, Overutilization, or Service Not Covered.
6. Call 'FinalReportGenerator' with ALL rules found, and only after all rules are found.
7. Identify a billing rule (e.g., Drug Wastage or Endoscopy).
8. Once a rule is identified, use 'PolicyRetrieval' AGAIN specifically to find the numeric CPT codes associated with it.
IMPORTANT: Your final answer MUST be the output of the 'FinalReportGenerator' tool.";

/// Sent when the model answers in prose instead of calling a tool.
pub const FINISH_REMINDER: &str = "You have not called 'FinalReportGenerator' yet. Continue the analysis with the tools, and finish by calling 'FinalReportGenerator' with the JSON list of ALL rules.";

const JSON_EXAMPLE: &str = r#"[
  {
    "name": "Rule Name",
    "classification": "Mutual Exclusion",
    "description": "...",
    "sql": "...",
    "confidence": "High",
    "quote": "..."
  }
]"#;

pub fn system_prompt(config: &AgentConfig) -> String {
    let mut prompt = format!(
        "You are a Senior Payment Integrity AI Engineer.
STRICT SQL FIELDS: {fields}

WORKFLOW:
1. Search documents for rules using 'PolicyRetrieval'.
2. Validate each rule using 'IndustryValidation'.
3. Write SQL based ONLY on the Appendix fields.
4. Categorize as: 'Mutual Exclusion', 'Overutilization', or 'Service Not Covered'.
5. OUTPUT: Use 'FinalReportGenerator' with a JSON list.

JSON STRUCTURE EXAMPLE (YOU MUST USE THIS FORMAT):
{example}

STRICT RULES:
- Extract strings and numbers literally. Do not summarize code lists.
- Use ONLY the 'claims' table.
- SQL JOINs must be on patient_id and dos.
- Never finish without calling 'FinalReportGenerator'.
- Use only the specific CPT codes found in the text. Do not use example codes.
- Make sure you get ALL the rules, then generate the report once.
",
        fields = APPENDIX_FIELDS,
        example = JSON_EXAMPLE,
    );

    for term in &config.banned_sql_terms {
        prompt.push_str(&format!(
            "- Important: do not use the word '{}' inside the SQL. Instead, find the 5-digit numeric CPT codes in the PDF and list them inside the IN() clause of your query.\n",
            term
        ));
    }
    if config.require_validation_per_rule {
        prompt.push_str("- Call 'IndustryValidation' at least once for every rule before the report.\n");
    }
    prompt
}
