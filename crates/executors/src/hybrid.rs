//! Hybrid lab executor.
//!
//! Hybrid labs mix modalities step by step: a Postgres lab alternates
//! psql commands and SQL queries, a DevOps lab mixes docker commands and
//! scripts. This executor resolves each step's modality (explicit
//! override first, then the step's own declaration, then inference from
//! the step's shape, then the lab's format string) and delegates to the
//! matching executor, tagging the result with what it resolved.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use skillforge_core::{
    Error, ExecutionRequest, ExecutionResult, ExecutionStep, ExecutionType, LabDefinition, Result,
    ValidationStrategy,
};
use skillforge_validation::{normalize_sql, validate};

use crate::code::CodeExecutor;
use crate::dispatch::{ExecutionContext, Executor};
use crate::query::QueryExecutor;
use crate::terminal::TerminalExecutor;

// =============================================================================
// Step-type inference
// =============================================================================

/// Infer a step's modality from its shape.
fn infer_from_step(step: &ExecutionStep) -> Option<ExecutionType> {
    if step.expected_command.is_some() {
        return Some(ExecutionType::Terminal);
    }
    if step.programming_language.is_some() || !step.test_cases.is_empty() {
        return Some(ExecutionType::Code);
    }
    if step.expected_query.is_some() || step.expected_result.is_some() {
        return Some(ExecutionType::Query);
    }
    None
}

/// Fall back to the lab's overall format string.
fn infer_from_format(format: &str) -> Option<ExecutionType> {
    let format = format.to_lowercase();
    if format.contains("sql") {
        Some(ExecutionType::Query)
    } else if format.contains("code") {
        Some(ExecutionType::Code)
    } else {
        None
    }
}

/// Resolution priority: caller override → step declaration → step shape →
/// lab format → terminal.
fn resolve_execution_type(
    request: &ExecutionRequest,
    step: &ExecutionStep,
    lab_format: &str,
) -> ExecutionType {
    request
        .execution_type
        .or(step.execution_type)
        .or_else(|| infer_from_step(step))
        .or_else(|| infer_from_format(lab_format))
        .unwrap_or(ExecutionType::Terminal)
}

// =============================================================================
// Progress
// =============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TypeProgress {
    pub total: usize,
    pub completed: usize,
}

/// Progress for a hybrid lab is the union of progress across its
/// per-modality step counts, not a single flat count.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HybridProgress {
    pub total: usize,
    pub completed: usize,
    pub terminal: TypeProgress,
    pub code: TypeProgress,
    pub query: TypeProgress,
}

// =============================================================================
// Hybrid Executor
// =============================================================================

pub struct HybridExecutor {
    terminal: Arc<TerminalExecutor>,
    code: Arc<CodeExecutor>,
    query: Arc<QueryExecutor>,
}

impl HybridExecutor {
    pub fn new(
        terminal: Arc<TerminalExecutor>,
        code: Arc<CodeExecutor>,
        query: Arc<QueryExecutor>,
    ) -> Self {
        Self {
            terminal,
            code,
            query,
        }
    }

    /// Per-modality progress from an attempt's completed-step set.
    pub fn progress(
        &self,
        lab: &LabDefinition,
        completed_steps: &std::collections::HashSet<usize>,
    ) -> HybridProgress {
        let mut progress = HybridProgress {
            total: lab.steps.len(),
            completed: 0,
            ..Default::default()
        };

        for (index, step) in lab.steps.iter().enumerate() {
            let slot = match step
                .execution_type
                .or_else(|| infer_from_step(step))
                .or_else(|| infer_from_format(&lab.format))
                .unwrap_or(ExecutionType::Terminal)
            {
                ExecutionType::Terminal => &mut progress.terminal,
                ExecutionType::Code => &mut progress.code,
                ExecutionType::Query => &mut progress.query,
            };
            slot.total += 1;
            if completed_steps.contains(&index) {
                slot.completed += 1;
                progress.completed += 1;
            }
        }

        progress
    }

    /// Query steps validate the learner's SQL text against the expected
    /// query after normalizing both sides; a failure returns before the
    /// query executes.
    fn validate_query_text(
        step: &ExecutionStep,
        request: &ExecutionRequest,
    ) -> Option<ExecutionResult> {
        let expected = step.expected_query.as_ref()?;

        let strategy = match step.validation_type {
            Some(ValidationStrategy::Contains) => ValidationStrategy::Contains,
            // Semantic is for commands; queries compare textually
            _ => ValidationStrategy::Exact,
        };

        let outcome = validate(
            &normalize_sql(&request.input),
            &normalize_sql(expected),
            strategy,
        );
        if outcome.valid {
            None
        } else {
            Some(ExecutionResult::rejected("", outcome))
        }
    }
}

#[async_trait]
impl Executor for HybridExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let step = ctx
            .lab
            .step(request.step_index)
            .ok_or(Error::InvalidStep(request.step_index))?;

        let execution_type = resolve_execution_type(request, step, &ctx.lab.format);
        tracing::debug!(step = request.step_index, ?execution_type, "Resolved hybrid step modality");

        let result = match execution_type {
            ExecutionType::Terminal => self.terminal.execute(ctx, request).await?,
            ExecutionType::Code => self.code.execute(ctx, request).await?,
            ExecutionType::Query => {
                if let Some(rejection) = Self::validate_query_text(step, request) {
                    rejection
                } else {
                    self.query.execute(ctx, request).await?
                }
            }
        };

        Ok(result.with_execution_type(execution_type))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use skillforge_core::config::SandboxSettings;
    use skillforge_core::LabDefinition;
    use skillforge_sandbox::{
        ExecOutput, MockDatabase, MockSandbox, SessionKey, SessionManager,
    };

    fn hybrid_lab(steps_yaml: &str) -> Arc<LabDefinition> {
        let yaml = format!(
            "id: hybrid-101\ntitle: t\nformat: hybrid\nsteps:\n{}",
            steps_yaml
        );
        Arc::new(serde_yaml::from_str(&yaml).unwrap())
    }

    fn executor_for(
        engine: Arc<MockSandbox>,
        database: Arc<MockDatabase>,
    ) -> (Arc<SessionManager>, HybridExecutor) {
        let sessions = Arc::new(SessionManager::new(engine.clone(), database));
        let terminal = Arc::new(TerminalExecutor::new(
            sessions.clone(),
            SandboxSettings::default(),
        ));
        let code = Arc::new(CodeExecutor::new(engine));
        let query = Arc::new(QueryExecutor::new(sessions.clone()));
        (sessions.clone(), HybridExecutor::new(terminal, code, query))
    }

    fn context(lab: Arc<LabDefinition>, sessions: &Arc<SessionManager>) -> ExecutionContext {
        let guard = sessions.checkout(SessionKey::new(&lab.id, "alice")).unwrap();
        let session = guard.session.clone();
        ExecutionContext { lab, session }
    }

    fn request(input: &str, step_index: usize) -> ExecutionRequest {
        ExecutionRequest {
            lab_id: "hybrid-101".into(),
            session_id: "alice".into(),
            input: input.into(),
            step_index,
            execution_type: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn step_with_expected_command_resolves_to_terminal() {
        let lab = hybrid_lab("  - title: s\n    expected_command: docker ps");
        let step = &lab.steps[0];
        assert_eq!(
            resolve_execution_type(&request("docker ps", 0), step, &lab.format),
            ExecutionType::Terminal
        );
    }

    #[test]
    fn step_with_test_cases_resolves_to_code() {
        let lab = hybrid_lab(
            "  - title: s\n    programming_language: python\n    test_cases:\n      - input: \"1\"\n        expected_output: \"1\"",
        );
        assert_eq!(
            resolve_execution_type(&request("print(1)", 0), &lab.steps[0], &lab.format),
            ExecutionType::Code
        );
    }

    #[test]
    fn step_with_expected_result_resolves_to_query() {
        let lab = hybrid_lab("  - title: s\n    expected_result: { type: row_count, count: 2 }");
        assert_eq!(
            resolve_execution_type(&request("SELECT 1", 0), &lab.steps[0], &lab.format),
            ExecutionType::Query
        );
    }

    #[test]
    fn explicit_override_wins_over_inference() {
        let lab = hybrid_lab("  - title: s\n    expected_command: docker ps");
        let mut req = request("SELECT 1", 0);
        req.execution_type = Some(ExecutionType::Query);
        assert_eq!(
            resolve_execution_type(&req, &lab.steps[0], &lab.format),
            ExecutionType::Query
        );
    }

    #[test]
    fn shapeless_step_falls_back_to_lab_format_then_terminal() {
        let bare = hybrid_lab("  - title: s");
        assert_eq!(
            resolve_execution_type(&request("x", 0), &bare.steps[0], "hybrid-sql"),
            ExecutionType::Query
        );
        assert_eq!(
            resolve_execution_type(&request("x", 0), &bare.steps[0], "hybrid"),
            ExecutionType::Terminal
        );
    }

    #[tokio::test]
    async fn delegated_result_is_tagged_with_resolved_type() {
        let engine = Arc::new(MockSandbox::new(vec![ExecOutput {
            exit_code: 0,
            stdout: "ok\n".into(),
            stderr: String::new(),
            timed_out: false,
        }]));
        let (sessions, hybrid) = executor_for(engine, Arc::new(MockDatabase::default()));
        let lab = hybrid_lab("  - title: s\n    expected_command: docker ps");
        let ctx = context(lab, &sessions);

        let result = hybrid
            .execute(&ctx, &request("docker ps", 0))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.execution_type, Some(ExecutionType::Terminal));
    }

    #[tokio::test]
    async fn query_step_normalizes_sql_before_comparing() {
        let (sessions, hybrid) = executor_for(
            Arc::new(MockSandbox::default()),
            Arc::new(MockDatabase::default()),
        );
        let lab = hybrid_lab(
            "  - title: s\n    expected_query: SELECT * FROM users\n    expected_result: 0",
        );
        let ctx = context(lab, &sessions);

        // Different casing, spacing, and a trailing semicolon still match
        let result = hybrid
            .execute(&ctx, &request("select   *\nfrom users;", 0))
            .await
            .unwrap();
        assert!(result.success);

        // A genuinely different query is rejected before execution
        let result = hybrid
            .execute(&ctx, &request("SELECT id FROM users", 0))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.execution_type, Some(ExecutionType::Query));
    }

    #[tokio::test]
    async fn progress_is_broken_down_by_modality() {
        let (sessions, hybrid) = executor_for(
            Arc::new(MockSandbox::default()),
            Arc::new(MockDatabase::default()),
        );
        let lab = hybrid_lab(
            "  - title: a\n    expected_command: docker ps\n  - title: b\n    expected_result: 1\n  - title: c\n    programming_language: python",
        );
        let ctx = context(lab.clone(), &sessions);

        ctx.session.record_completion(0);
        let progress = hybrid.progress(&lab, &ctx.session.completed_steps());

        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.terminal.total, 1);
        assert_eq!(progress.terminal.completed, 1);
        assert_eq!(progress.query.total, 1);
        assert_eq!(progress.query.completed, 0);
        assert_eq!(progress.code.total, 1);
    }
}
