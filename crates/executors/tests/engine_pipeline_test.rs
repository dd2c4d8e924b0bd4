//! Engine integration tests.
//!
//! Exercise the full pipeline: LabEngine → dispatcher → executor →
//! SessionManager → engines (mocks). These tests do NOT require Docker;
//! they use MockSandbox/MockDatabase for deterministic behavior.

use std::sync::Arc;

use skillforge_core::config::AppConfig;
use skillforge_core::{
    Error, ExecutionRequest, ExecutionType, LabDefinition, LabRegistry,
};
use skillforge_executors::LabEngine;
use skillforge_sandbox::{ExecOutput, MockDatabase, MockSandbox, SessionKey, SessionManager};

// =============================================================================
// Helpers
// =============================================================================

fn lab(yaml: &str) -> LabDefinition {
    serde_yaml::from_str(yaml).unwrap()
}

struct Harness {
    engine: LabEngine,
    sandbox: Arc<MockSandbox>,
    database: Arc<MockDatabase>,
    sessions: Arc<SessionManager>,
}

fn harness(labs: Vec<LabDefinition>, responses: Vec<ExecOutput>) -> Harness {
    let sandbox = Arc::new(MockSandbox::new(responses));
    let database = Arc::new(MockDatabase::default());
    let sessions = Arc::new(SessionManager::new(sandbox.clone(), database.clone()));

    let mut registry = LabRegistry::new();
    for lab in labs {
        registry.insert(lab);
    }

    let engine = LabEngine::new(Arc::new(registry), sessions.clone(), &AppConfig::default());
    Harness {
        engine,
        sandbox,
        database,
        sessions,
    }
}

fn request(lab_id: &str, user: &str, input: &str, step_index: usize) -> ExecutionRequest {
    ExecutionRequest {
        lab_id: lab_id.into(),
        session_id: user.into(),
        input: input.into(),
        step_index,
        execution_type: None,
        timeout_seconds: None,
    }
}

fn terminal_lab() -> LabDefinition {
    lab("id: docker-101\ntitle: t\nformat: docker\nsteps:\n  - title: s\n    expected_command: docker run -d nginx\n    hint: Remember the detach flag.")
}

fn ok_output(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
        timed_out: false,
    }
}

// =============================================================================
// 1. Terminal pipeline
// =============================================================================

#[tokio::test]
async fn terminal_execution_succeeds_end_to_end() {
    let h = harness(vec![terminal_lab()], vec![ok_output("container started\n")]);

    let result = h
        .engine
        .execute(request("docker-101", "alice", "docker run -d --name web nginx", 0))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.output.contains("container started"));
    assert_eq!(h.sandbox.created_count(), 1);
}

#[tokio::test]
async fn command_rejection_carries_hint_and_skips_sandbox() {
    let h = harness(vec![terminal_lab()], vec![]);

    let result = h
        .engine
        .execute(request("docker-101", "alice", "docker run nginx", 0))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.contains("Missing required flags"));
    assert_eq!(
        result.validation.hint.as_deref(),
        Some("Remember the detach flag.")
    );
    assert_eq!(h.sandbox.created_count(), 0);
}

#[tokio::test]
async fn invalid_step_becomes_a_structured_failure() {
    let h = harness(vec![terminal_lab()], vec![]);

    let result = h
        .engine
        .execute(request("docker-101", "alice", "docker ps", 42))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.contains("Invalid step index"));
}

#[tokio::test]
async fn unknown_lab_id_is_an_error_for_the_http_boundary() {
    let h = harness(vec![], vec![]);
    let result = h.engine.execute(request("nope", "alice", "ls", 0)).await;
    assert!(matches!(result, Err(Error::LabNotFound(_))));
}

#[tokio::test]
async fn unknown_format_falls_back_to_terminal_and_still_executes() {
    let h = harness(
        vec![lab(
            "id: mystery\ntitle: t\nformat: quantum\nsteps:\n  - title: s",
        )],
        vec![ok_output("ok\n")],
    );

    let result = h
        .engine
        .execute(request("mystery", "alice", "echo ok", 0))
        .await
        .unwrap();

    assert!(result.success);
}

// =============================================================================
// 2. Timeouts destroy the session
// =============================================================================

#[tokio::test]
async fn timeout_fails_the_attempt_and_destroys_the_session() {
    let h = harness(
        vec![lab("id: docker-101\ntitle: t\nformat: docker\nsteps:\n  - title: s")],
        vec![ExecOutput {
            exit_code: -1,
            stdout: "partial output that must not leak as success".into(),
            stderr: String::new(),
            timed_out: true,
        }],
    );

    let result = h
        .engine
        .execute(request("docker-101", "alice", "sleep 999", 0))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.contains("timed out"));
    // The session and its container are gone; the next request
    // provisions fresh
    assert_eq!(h.sessions.live_sessions(), 0);
    assert_eq!(h.sandbox.destroyed_count(), 1);
}

// =============================================================================
// 3. Session serialization & isolation
// =============================================================================

#[tokio::test]
async fn busy_session_is_rejected_not_queued() {
    let h = harness(vec![terminal_lab()], vec![]);

    // Simulate an in-flight execution holding the session
    let _held = h
        .sessions
        .checkout(SessionKey::new("docker-101", "alice"))
        .unwrap();

    let result = h
        .engine
        .execute(request("docker-101", "alice", "docker run -d nginx", 0))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.contains("Session busy"));
}

#[tokio::test]
async fn concurrent_users_get_isolated_sandboxes() {
    let h = harness(
        vec![lab("id: docker-101\ntitle: t\nformat: docker\nsteps:\n  - title: s")],
        vec![ok_output("a\n"), ok_output("b\n")],
    );

    let first = h
        .engine
        .execute(request("docker-101", "alice", "hostname", 0))
        .await
        .unwrap();
    let second = h
        .engine
        .execute(request("docker-101", "bob", "hostname", 0))
        .await
        .unwrap();

    assert!(first.success && second.success);
    // One container per session, never shared
    assert_eq!(h.sandbox.created_count(), 2);
    assert_eq!(h.sessions.live_sessions(), 2);
}

// =============================================================================
// 4. Code pipeline
// =============================================================================

#[tokio::test]
async fn code_lab_runs_tests_and_scores() {
    let h = harness(
        vec![lab(
            "id: py-101\ntitle: t\nformat: python\nprogramming_language: python\ntest_cases:\n  - input: \"3\\n4\"\n    expected_output: \"7\"\n",
        )],
        vec![ok_output(""), ok_output("7\n")],
    );

    let result = h
        .engine
        .execute(request(
            "py-101",
            "alice",
            "print(int(input()) + int(input()))",
            0,
        ))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.validation.score, Some(100.0));
    // Syntax check + one test, each in its own torn-down sandbox
    assert_eq!(h.sandbox.created_count(), 2);
    assert_eq!(h.sandbox.destroyed_count(), 2);
}

// =============================================================================
// 5. Query pipeline & teardown
// =============================================================================

#[tokio::test]
async fn query_lab_provisions_validates_and_tears_down() {
    let users_table = " id | name\n----+------\n  1 | a\n  2 | b\n(2 rows)\n";
    let h = harness(vec![lab(
        "id: sql-101\ntitle: t\nformat: postgresql\nschema_setup: CREATE TABLE users (id int, name text);\nsample_data: INSERT INTO users VALUES (1, 'a'), (2, 'b');\nsteps:\n  - title: s\n    expected_result: { type: row_count, count: 2 }",
    )], vec![]);
    h.database
        .responses
        .lock()
        .await
        .extend([Ok(String::new()), Ok(String::new()), Ok(users_table.to_string())]);

    let result = h
        .engine
        .execute(request("sql-101", "alice", "SELECT * FROM users", 0))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.rows_affected, Some(2));
    assert_eq!(h.database.provisioned_count(), 1);

    h.engine.end_attempt("sql-101", "alice").await;
    assert_eq!(h.database.dropped_count(), 1);
    assert_eq!(h.sessions.live_sessions(), 0);
}

#[tokio::test]
async fn destructive_sql_is_a_structured_security_failure() {
    let h = harness(
        vec![lab("id: sql-101\ntitle: t\nformat: sql")],
        vec![],
    );

    let result = h
        .engine
        .execute(request("sql-101", "alice", "DROP TABLE users", 0))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.contains("Security violation"));
    assert!(result.error.contains("DROP"));
}

// =============================================================================
// 6. Hybrid pipeline & progress
// =============================================================================

#[tokio::test]
async fn hybrid_lab_tags_results_and_tracks_progress_by_type() {
    let h = harness(
        vec![lab(
            "id: hybrid-101\ntitle: t\nformat: hybrid\nsteps:\n  - title: a\n    expected_command: docker ps\n  - title: b\n    expected_result: 1",
        )],
        vec![ok_output("CONTAINER ID\n")],
    );

    let result = h
        .engine
        .execute(request("hybrid-101", "alice", "docker ps", 0))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.execution_type, Some(ExecutionType::Terminal));

    let progress = h.engine.progress("hybrid-101", "alice").unwrap();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.terminal.completed, 1);
    assert_eq!(progress.query.total, 1);
    assert_eq!(progress.query.completed, 0);
}
