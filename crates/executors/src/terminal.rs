//! Terminal lab executor.
//!
//! Runs a single shell-style command inside the session's sandbox
//! container and validates both the command shape (before execution) and
//! the captured output (after). Command-shape failures return without
//! touching the sandbox: no point paying for a container run the step
//! already rejects, and unvalidated commands never execute.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use skillforge_core::config::SandboxSettings;
use skillforge_core::{
    Error, ExecutionRequest, ExecutionResult, ExecutionStep, Result, ValidationOutcome,
    ValidationStrategy,
};
use skillforge_sandbox::{ContainerSpec, SessionManager};
use skillforge_validation::{validate, validate_output};

use crate::dispatch::{ExecutionContext, Executor};

// =============================================================================
// Dangerous-command screen
// =============================================================================

/// Patterns that never reach the sandbox, whatever the step says.
fn dangerous_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"rm\s+-rf\s+/", "recursive delete of the filesystem root"),
            (r"\bsudo\b", "privilege escalation"),
            (r"\bpasswd\b", "password changes"),
            (r"\bshutdown\b", "system shutdown"),
            (r"\breboot\b", "system reboot"),
            (r"kill\s+-9\s+1\b", "killing the init process"),
            (r">\s*/etc/", "writing to system configuration"),
            (r"curl[^|]*\|\s*(sh|bash)", "piping a download into a shell"),
            (r"wget[^|]*\|\s*(sh|bash)", "piping a download into a shell"),
        ]
        .into_iter()
        .map(|(pattern, reason)| {
            (
                Regex::new(pattern).expect("dangerous pattern must compile"),
                reason,
            )
        })
        .collect()
    })
}

fn screen_command(input: &str) -> Result<()> {
    for (pattern, reason) in dangerous_patterns() {
        if pattern.is_match(input) {
            return Err(Error::security_violation(format!(
                "Command rejected: {}",
                reason
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Progressive hints
// =============================================================================

/// Hint escalation keyed on the session's attempt count for the step:
/// general nudge first, flag guidance second, the expected command last.
fn progressive_hint(step: &ExecutionStep, attempt: u32) -> String {
    match attempt {
        0 | 1 => step
            .hints
            .first()
            .or(step.hint.as_ref())
            .cloned()
            .unwrap_or_else(|| "Review the step instructions".to_string()),
        2 => step
            .hints
            .get(1)
            .cloned()
            .unwrap_or_else(|| "Check your command flags and arguments".to_string()),
        _ => step.hints.get(2).cloned().unwrap_or_else(|| {
            step.expected_command
                .as_ref()
                .map(|cmd| format!("Try: {}", cmd))
                .unwrap_or_else(|| "Try reviewing the documentation".to_string())
        }),
    }
}

// =============================================================================
// Terminal Executor
// =============================================================================

pub struct TerminalExecutor {
    sessions: Arc<SessionManager>,
    settings: SandboxSettings,
}

impl TerminalExecutor {
    pub fn new(sessions: Arc<SessionManager>, settings: SandboxSettings) -> Self {
        Self { sessions, settings }
    }

    fn container_spec(&self, ctx: &ExecutionContext) -> ContainerSpec {
        let image = ctx
            .lab
            .environment_image
            .clone()
            .unwrap_or_else(|| self.settings.default_image.clone());
        ContainerSpec::new(image)
            .with_limits(ctx.lab.limits.memory_limit_mb, ctx.lab.limits.cpu_share)
            .with_network(ctx.lab.allow_network)
    }
}

#[async_trait]
impl Executor for TerminalExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let step = ctx
            .lab
            .step(request.step_index)
            .ok_or(Error::InvalidStep(request.step_index))?;

        let attempt = ctx.session.record_attempt(request.step_index);
        tracing::info!(step = request.step_index, attempt, "Executing terminal command");

        screen_command(&request.input)?;

        // Validate command structure before spending a sandbox run
        if let Some(expected) = &step.expected_command {
            let strategy = step.validation_type.unwrap_or(ValidationStrategy::Semantic);
            let outcome = validate(&request.input, expected, strategy);
            if !outcome.valid {
                let hint = progressive_hint(step, attempt);
                return Ok(ExecutionResult::rejected("", outcome.with_hint(hint)));
            }
        }

        // Execute inside the session's sandbox. The input is one argv
        // element; the shell interpreting it lives inside the container.
        let container = self
            .sessions
            .get_or_create_container(&ctx.session, &self.container_spec(ctx))
            .await?;

        let timeout_secs = request
            .timeout_seconds
            .unwrap_or(ctx.lab.limits.time_limit_seconds);
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            request.input.clone(),
        ];

        let output = self
            .sessions
            .engine()
            .exec(
                &container,
                &argv,
                None,
                Duration::from_secs(timeout_secs),
            )
            .await?;

        if output.timed_out {
            return Err(Error::ExecutionTimeout(timeout_secs));
        }

        let captured = output.combined();

        if !output.success() {
            let message = if output.stderr.trim().is_empty() {
                format!("Command failed with exit code {}", output.exit_code)
            } else {
                format!("Command failed: {}", output.stderr.trim())
            };
            return Ok(ExecutionResult::rejected(
                captured,
                ValidationOutcome::fail(message).with_hint(progressive_hint(step, attempt)),
            ));
        }

        // Validate output if the step expects any; a clean exit is
        // otherwise success in itself
        if let Some(expectation) = &step.expected_output {
            let outcome = validate_output(&captured, expectation);
            if outcome.valid {
                return Ok(ExecutionResult::ok(captured, outcome));
            }
            let hint = progressive_hint(step, attempt);
            return Ok(ExecutionResult::rejected(captured, outcome.with_hint(hint)));
        }

        Ok(ExecutionResult::ok(
            captured,
            ValidationOutcome::pass("Command executed successfully"),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
