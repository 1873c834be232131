//! Mission loop tests with a scripted model and an in-memory index.

mod common;

use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

use common::{call, calls, prose, rule_json, tool_results, FailingModel, KeywordProvider, ScriptedModel};
use policy_audit::agent::executor::DUPLICATE_TERMINAL;
use policy_audit::agent::tools::RETRIEVAL_UNAVAILABLE;
use policy_audit::agent::{
    ChatModel, MissionExecutor, MissionOutcome, ScratchpadEntry, ToolName, Toolbox,
};
use policy_audit::config::{AgentConfig, ReportConfig, ValidationConfig};
use policy_audit::index::{Retriever, VectorIndex};
use policy_audit::models::Chunk;
use policy_audit::report::ReportRenderer;
use policy_audit::validator::IndustryValidator;

const SUCCESS_ONE_RULE: &str = "Success! Report generated with 1 rules.";

/// Terminal steps that actually wrote the report.
fn reports_written(steps: &[ScratchpadEntry]) -> usize {
    steps
        .iter()
        .filter(|s| s.tool == ToolName::FinalReportGenerator && s.output.starts_with("Success!"))
        .count()
}

fn policy_chunks() -> Vec<Chunk> {
    vec![
        Chunk::new(
            "Physical therapy: CPT 97110 is limited to 4 units per day per patient.",
            "therapy.pdf",
        ),
        Chunk::new(
            "Drug wastage must be billed on a separate line with modifier JW, e.g. J9035.",
            "wastage.pdf",
        ),
    ]
}

fn report_config(dir: &Path) -> ReportConfig {
    ReportConfig {
        output_dir: dir.join("output"),
        file_name: "final_report.html".to_string(),
    }
}

async fn toolbox(dir: &Path, with_index: bool) -> Toolbox {
    let index = if with_index {
        Some(
            VectorIndex::build(&policy_chunks(), &KeywordProvider, 8)
                .await
                .unwrap(),
        )
    } else {
        None
    };
    Toolbox::new(
        Retriever::new(index, Box::new(KeywordProvider), 2),
        IndustryValidator::new(&ValidationConfig::default(), None),
        ReportRenderer::new(&report_config(dir)).unwrap(),
    )
}

async fn executor(dir: &Path, model: impl ChatModel + 'static, config: AgentConfig) -> MissionExecutor {
    MissionExecutor::new(Box::new(model), toolbox(dir, true).await, config)
}

const GROUNDED_SQL: &str = "SELECT patient_id, dos, SUM(units) FROM claims WHERE cpt_code = '97110' GROUP BY patient_id, dos HAVING SUM(units) > 4";

#[tokio::test]
async fn premature_terminal_is_rejected_then_mission_completes() {
    let tmp = TempDir::new().unwrap();
    let rules = json!({ "rules": [rule_json("Therapy units cap", GROUNDED_SQL)] });
    let (model, requests) = ScriptedModel::new(vec![
        calls(vec![call("c1", "FinalReportGenerator", rules.clone())]),
        calls(vec![call("c2", "PolicyRetrieval", json!({ "query": "therapy units per day" }))]),
        calls(vec![call("c3", "IndustryValidation", json!({ "query": "97110 units per day" }))]),
        calls(vec![
            call("c4", "FinalReportGenerator", rules.clone()),
            call("c5", "FinalReportGenerator", rules),
        ]),
    ]);

    let outcome = executor(tmp.path(), model, AgentConfig::default())
        .await
        .run("Find all rules.", &[])
        .await
        .unwrap();

    match outcome {
        MissionOutcome::Completed {
            output,
            rules,
            iterations,
            steps,
        } => {
            assert_eq!(output, SUCCESS_ONE_RULE);
            assert_eq!(rules.len(), 1);
            assert_eq!(iterations, 4);
            assert_eq!(steps.len(), 5);
            assert_eq!(reports_written(&steps), 1);
            assert_eq!(steps[4].tool, ToolName::FinalReportGenerator);
            assert_eq!(steps[4].output, DUPLICATE_TERMINAL);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let html = std::fs::read_to_string(tmp.path().join("output/final_report.html")).unwrap();
    assert!(html.contains("Therapy units cap"));

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 4);
    let second = tool_results(&requests[1]);
    assert!(second[0].starts_with("Report rejected: no policy text"));
    let fourth = tool_results(&requests[3]);
    assert!(fourth[1].contains("[source: therapy.pdf]"));
    assert_eq!(fourth[2], "Search failed: Missing API Key.");
}

#[tokio::test]
async fn duplicate_terminal_in_one_turn_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let rules = json!({ "rules": [rule_json("Therapy units cap", GROUNDED_SQL)] });
    let (model, _requests) = ScriptedModel::new(vec![
        calls(vec![
            call("r", "PolicyRetrieval", json!({ "query": "units" })),
            call("v", "IndustryValidation", json!({ "query": "units" })),
            call("f1", "FinalReportGenerator", rules.clone()),
            call("f2", "FinalReportGenerator", rules),
        ]),
    ]);

    let exec = executor(tmp.path(), model, AgentConfig::default()).await;
    let outcome = exec.run("Find all rules.", &[]).await.unwrap();
    let steps = match outcome {
        MissionOutcome::Completed {
            iterations, steps, ..
        } => {
            assert_eq!(iterations, 1);
            steps
        }
        other => panic!("expected completion, got {:?}", other),
    };

    let tools: Vec<ToolName> = steps.iter().map(|s| s.tool).collect();
    assert_eq!(
        tools,
        vec![
            ToolName::PolicyRetrieval,
            ToolName::IndustryValidation,
            ToolName::FinalReportGenerator,
            ToolName::FinalReportGenerator,
        ]
    );
    assert_eq!(steps[2].output, SUCCESS_ONE_RULE);
    assert_eq!(
        steps[3].output,
        "Report already generated; ignoring duplicate FinalReportGenerator call."
    );
    assert_eq!(reports_written(&steps), 1);
}

#[tokio::test]
async fn codes_missing_from_policy_text_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let invented = "SELECT * FROM claims WHERE cpt_code IN ('97110', '99213')";
    let (model, requests) = ScriptedModel::new(vec![
        calls(vec![call("r", "PolicyRetrieval", json!({ "query": "therapy units" }))]),
        calls(vec![call("v", "IndustryValidation", json!({ "query": "97110" }))]),
        calls(vec![call(
            "f1",
            "FinalReportGenerator",
            json!({ "rules": [rule_json("Therapy", invented)] }),
        )]),
        calls(vec![call(
            "f2",
            "FinalReportGenerator",
            json!({ "rules": [rule_json("Therapy", GROUNDED_SQL)] }),
        )]),
    ]);

    let outcome = executor(tmp.path(), model, AgentConfig::default())
        .await
        .run("Find all rules.", &[])
        .await
        .unwrap();
    assert!(matches!(outcome, MissionOutcome::Completed { .. }));

    let requests = requests.lock().unwrap();
    let rejection = tool_results(&requests[3]).pop().unwrap();
    assert!(rejection.contains("99213"), "unexpected: {}", rejection);
}

#[tokio::test]
async fn banned_vocabulary_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let sql = "SELECT * FROM claims WHERE diagnosis_code LIKE '%ENDOSCOPY%'";
    let (model, requests) = ScriptedModel::new(vec![
        calls(vec![
            call("r", "PolicyRetrieval", json!({ "query": "units" })),
            call("v", "IndustryValidation", json!({ "query": "units" })),
            call("f", "FinalReportGenerator", json!({ "rules": [rule_json("Scope", sql)] })),
        ]),
    ]);
    let config = AgentConfig {
        max_iterations: 2,
        ..AgentConfig::default()
    };

    let outcome = executor(tmp.path(), model, config)
        .await
        .run("Find all rules.", &[])
        .await
        .unwrap();
    assert!(matches!(outcome, MissionOutcome::Exhausted { iterations: 2, .. }));
    assert!(!tmp.path().join("output/final_report.html").exists());

    let requests = requests.lock().unwrap();
    let results = tool_results(&requests[1]);
    assert!(results[2].contains("'endoscopy'"));
}

#[tokio::test]
async fn prose_answers_get_a_reminder_until_budget_runs_out() {
    let tmp = TempDir::new().unwrap();
    let (model, requests) = ScriptedModel::new(vec![prose("Here are the rules I found.")]);
    let config = AgentConfig {
        max_iterations: 3,
        ..AgentConfig::default()
    };

    let outcome = executor(tmp.path(), model, config)
        .await
        .run("Find all rules.", &[])
        .await
        .unwrap();

    match outcome {
        MissionOutcome::Exhausted {
            iterations,
            last_message,
        } => {
            assert_eq!(iterations, 3);
            assert_eq!(last_message.as_deref(), Some("Still reviewing the policies."));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    let last = requests[1].last().unwrap();
    assert!(matches!(
        last,
        policy_audit::agent::ChatMessage::User(text) if text.contains("FinalReportGenerator")
    ));
}

#[tokio::test]
async fn repeated_invalid_calls_exhaust_the_mission() {
    let tmp = TempDir::new().unwrap();
    let bad = || calls(vec![call("x", "SqlRunner", json!({ "query": "SELECT 1" }))]);
    let (model, requests) = ScriptedModel::new(vec![bad(), bad(), bad(), bad(), bad()]);
    let config = AgentConfig {
        max_parse_retries: 2,
        ..AgentConfig::default()
    };

    let outcome = executor(tmp.path(), model, config)
        .await
        .run("Find all rules.", &[])
        .await
        .unwrap();
    assert!(matches!(outcome, MissionOutcome::Exhausted { iterations: 3, .. }));

    let requests = requests.lock().unwrap();
    assert!(tool_results(&requests[1])[0].contains("'SqlRunner' is not a valid tool"));
}

#[tokio::test]
async fn retrieval_without_index_reports_unavailable() {
    let tmp = TempDir::new().unwrap();
    let (model, requests) = ScriptedModel::new(vec![calls(vec![call(
        "r",
        "PolicyRetrieval",
        json!({ "query": "units" }),
    )])]);
    let config = AgentConfig {
        max_iterations: 2,
        ..AgentConfig::default()
    };

    let exec = MissionExecutor::new(Box::new(model), toolbox(tmp.path(), false).await, config);
    let outcome = exec.run("Find all rules.", &[]).await.unwrap();
    assert!(matches!(outcome, MissionOutcome::Exhausted { .. }));

    let requests = requests.lock().unwrap();
    assert_eq!(tool_results(&requests[1]), vec![RETRIEVAL_UNAVAILABLE.to_string()]);
}

#[tokio::test]
async fn model_transport_error_propagates() {
    let tmp = TempDir::new().unwrap();
    let exec = executor(tmp.path(), FailingModel, AgentConfig::default()).await;
    let err = exec.run("Find all rules.", &[]).await.unwrap_err();
    assert!(err.to_string().contains("connection reset"));
}
