//! Code lab executor.
//!
//! Compiles/runs a source submission against the lab's test cases. The
//! syntax pre-check and every test case run in their own throwaway
//! sandbox: a poisoned interpreter state never leaks between test cases,
//! and the container is torn down on every path.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use skillforge_core::{
    Error, ExecutionRequest, ExecutionResult, Result, TestCase, TestCaseResult, ValidationOutcome,
};
use skillforge_sandbox::{ContainerSpec, SandboxEngine, SandboxFile};

use crate::dispatch::{ExecutionContext, Executor};

// =============================================================================
// Language Table
// =============================================================================

/// How one language is checked and run inside its sandbox image.
struct LanguageSpec {
    image: &'static str,
    source_path: &'static str,
    check_argv: &'static [&'static str],
    run_argv: &'static [&'static str],
}

/// Supported languages, keyed by the aliases content authors use.
fn language_for(name: &str) -> Option<&'static LanguageSpec> {
    match name.trim().to_lowercase().as_str() {
        "python" | "python3" => Some(&LanguageSpec {
            image: "python:3.11-slim",
            source_path: "/workspace/main.py",
            check_argv: &["python3", "-m", "py_compile", "/workspace/main.py"],
            run_argv: &["python3", "/workspace/main.py"],
        }),
        "javascript" | "js" | "node" => Some(&LanguageSpec {
            image: "node:18-slim",
            source_path: "/workspace/main.js",
            check_argv: &["node", "--check", "/workspace/main.js"],
            run_argv: &["node", "/workspace/main.js"],
        }),
        "ruby" => Some(&LanguageSpec {
            image: "ruby:3.2-slim",
            source_path: "/workspace/main.rb",
            check_argv: &["ruby", "-c", "/workspace/main.rb"],
            run_argv: &["ruby", "/workspace/main.rb"],
        }),
        "golang" | "go" => Some(&LanguageSpec {
            image: "golang:1.21-alpine",
            source_path: "/workspace/main.go",
            check_argv: &["gofmt", "-e", "/workspace/main.go"],
            run_argv: &["go", "run", "/workspace/main.go"],
        }),
        "java" => Some(&LanguageSpec {
            image: "eclipse-temurin:17-jdk",
            source_path: "/workspace/Main.java",
            check_argv: &["javac", "-d", "/workspace", "/workspace/Main.java"],
            // Fixed strings only; learner input is staged as a file
            run_argv: &["sh", "-c", "cd /workspace && javac Main.java && java Main"],
        }),
        _ => None,
    }
}

// =============================================================================
// Code Executor
// =============================================================================

pub struct CodeExecutor {
    engine: Arc<dyn SandboxEngine>,
}

impl CodeExecutor {
    pub fn new(engine: Arc<dyn SandboxEngine>) -> Self {
        Self { engine }
    }

    /// Language resolution: step override, then the lab's declared
    /// language, then the raw format string itself (labs authored as
    /// `format: python`).
    fn language_name(ctx: &ExecutionContext, request: &ExecutionRequest) -> String {
        ctx.lab
            .step(request.step_index)
            .and_then(|s| s.programming_language.clone())
            .or_else(|| ctx.lab.programming_language.clone())
            .unwrap_or_else(|| ctx.lab.format.clone())
    }

    /// Test cases: step-scoped for hybrid labs, lab-scoped otherwise.
    fn test_cases<'a>(ctx: &'a ExecutionContext, request: &ExecutionRequest) -> &'a [TestCase] {
        match ctx.lab.step(request.step_index) {
            Some(step) if !step.test_cases.is_empty() => &step.test_cases,
            _ => &ctx.lab.test_cases,
        }
    }

    async fn run_test(
        &self,
        spec: &ContainerSpec,
        files: &[SandboxFile],
        lang: &LanguageSpec,
        test_case: &TestCase,
        index: usize,
        timeout: Duration,
    ) -> Result<TestCaseResult> {
        let argv: Vec<String> = lang.run_argv.iter().map(|s| s.to_string()).collect();
        let expected = test_case.expected_output.trim().to_string();

        let outcome = self
            .engine
            .run_once(spec, files, &argv, Some(&test_case.input), timeout)
            .await;

        let result = match outcome {
            Ok(out) if out.timed_out => {
                return Err(Error::ExecutionTimeout(timeout.as_secs()));
            }
            Ok(out) => {
                let actual = if out.stdout.trim().is_empty() && !out.success() {
                    out.stderr.trim().to_string()
                } else {
                    out.stdout.trim().to_string()
                };
                TestCaseResult {
                    name: test_case.display_name(index),
                    passed: out.success() && actual == expected,
                    expected,
                    actual,
                    points: test_case.points,
                    hidden: test_case.hidden,
                }
            }
            // A sandbox-level error for one test is that test's failure,
            // not the whole run's
            Err(e) => TestCaseResult {
                name: test_case.display_name(index),
                passed: false,
                expected,
                actual: format!("[sandbox error: {}]", e),
                points: test_case.points,
                hidden: test_case.hidden,
            },
        };

        Ok(result)
    }
}

#[async_trait]
impl Executor for CodeExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let name = Self::language_name(ctx, request);
        let lang = language_for(&name)
            .ok_or_else(|| Error::runtime(format!("Unsupported language: {}", name)))?;

        tracing::info!(language = %name, "Executing code submission");

        let spec = ContainerSpec::new(lang.image)
            .with_limits(ctx.lab.limits.memory_limit_mb, ctx.lab.limits.cpu_share);
        let files = [SandboxFile::new(lang.source_path, request.input.as_bytes())];

        // Syntax pre-check; the raw diagnostic goes back to the learner
        // and no test case runs
        let check_argv: Vec<String> = lang.check_argv.iter().map(|s| s.to_string()).collect();
        let check = self
            .engine
            .run_once(&spec, &files, &check_argv, None, Duration::from_secs(20))
            .await?;

        if check.timed_out {
            return Err(Error::ExecutionTimeout(20));
        }
        if !check.success() {
            let diagnostic = check.combined();
            return Ok(ExecutionResult::rejected(
                "",
                ValidationOutcome::fail(format!("Syntax Error: {}", diagnostic.trim())),
            ));
        }

        let test_cases = Self::test_cases(ctx, request);
        if test_cases.is_empty() {
            return Ok(ExecutionResult::ok(
                "",
                ValidationOutcome::pass("No test cases defined"),
            ));
        }

        let timeout = Duration::from_secs(
            request
                .timeout_seconds
                .unwrap_or(ctx.lab.limits.time_limit_seconds),
        );

        let mut results = Vec::with_capacity(test_cases.len());
        for (index, test_case) in test_cases.iter().enumerate() {
            tracing::debug!(test = index + 1, "Running test case");
            let result = self
                .run_test(&spec, &files, lang, test_case, index, timeout)
                .await?;
            results.push(result);
        }

        let passed_count = results.iter().filter(|r| r.passed).count();
        let total_count = results.len();
        let all_passed = passed_count == total_count;

        let total_points: u32 = results.iter().map(|r| r.points).sum();
        let earned_points: u32 = results.iter().filter(|r| r.passed).map(|r| r.points).sum();
        let score = if total_points > 0 {
            (earned_points as f64 / total_points as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };

        let output = format_test_output(&results);
        // Hidden tests score but never echo; redact their payloads from
        // the structured breakdown too
        let reported: Vec<TestCaseResult> = results
            .into_iter()
            .map(|mut r| {
                if r.hidden {
                    r.expected = String::new();
                    r.actual = String::new();
                }
                r
            })
            .collect();

        let validation = ValidationOutcome {
            valid: all_passed,
            message: format!("{}/{} tests passed", passed_count, total_count),
            score: Some(score),
            test_results: Some(reported),
            hint: None,
        };

        Ok(if all_passed {
            ExecutionResult::ok(output, validation)
        } else {
            let mut result = ExecutionResult::rejected(output, validation);
            result.error = format!("{} test(s) failed", total_count - passed_count);
            result
        })
    }
}

/// Learner-facing summary: every non-hidden test's verdict, expected/got
/// on failure, and a totals footer.
fn format_test_output(results: &[TestCaseResult]) -> String {
    let mut output = vec!["Test Results:".to_string(), "=".repeat(50)];

    for (index, result) in results.iter().enumerate() {
        if result.hidden {
            continue;
        }
        let status = if result.passed { "✓ PASS" } else { "✗ FAIL" };
        output.push(format!("\n{}. {}: {}", index + 1, result.name, status));
        if !result.passed {
            output.push(format!("   Expected: {}", result.expected));
            output.push(format!("   Got: {}", result.actual));
        }
    }

    let passed = results.iter().filter(|r| r.passed).count();
    output.push(format!("\n{}", "=".repeat(50)));
    output.push(format!("Total: {}/{} tests passed", passed, results.len()));

    output.join("\n")
}

// =============================================================================
// Tests
// =============================================================================
