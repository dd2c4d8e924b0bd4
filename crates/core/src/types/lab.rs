use serde::{Deserialize, Serialize};

use super::rules::{OutputExpectation, ResultExpectation, ValidationStrategy};

// =============================================================================
// Lab Format
// =============================================================================

/// Closed set of lab formats, each mapping to one executor implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabFormat {
    /// Shell-style command labs (docker, kubernetes, linux, ...).
    Terminal,
    /// Source-code submission labs run against test cases.
    Code,
    /// SQL labs run against an isolated database instance.
    Query,
    /// Labs whose steps mix terminal, code and query modalities.
    Hybrid,
}

impl LabFormat {
    /// Resolve a raw format string (including the aliases content authors
    /// actually use) into a format variant.
    ///
    /// Unknown strings fall back to `Terminal`. The fallback is deliberate
    /// and must stay observable: the second element is `true` when it was
    /// taken, so the caller can log the raw string instead of silently
    /// accepting a misconfigured lab.
    pub fn resolve(raw: &str) -> (Self, bool) {
        match raw.trim().to_lowercase().as_str() {
            "terminal" | "docker" | "kubernetes" | "linux" | "docker-compose" => {
                (Self::Terminal, false)
            }
            "code" | "code_editor" | "python" | "golang" | "javascript" | "ruby" | "java" => {
                (Self::Code, false)
            }
            "sql" | "sql_editor" | "postgresql" | "mysql" => (Self::Query, false),
            "hybrid" => (Self::Hybrid, false),
            _ => (Self::Terminal, true),
        }
    }
}

impl std::fmt::Display for LabFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Terminal => "terminal",
            Self::Code => "code",
            Self::Query => "query",
            Self::Hybrid => "hybrid",
        };
        write!(f, "{}", name)
    }
}

/// The modality a single execution resolved to (hybrid labs echo this
/// back on the result).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Terminal,
    Code,
    #[serde(alias = "sql")]
    Query,
}

// =============================================================================
// Resource Limits
// =============================================================================

/// Per-lab resource limits applied to every sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard wall-clock timeout for a single execution.
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,
    /// Memory cap for the sandbox.
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
    /// Fraction of a CPU core the sandbox may use.
    #[serde(default = "default_cpu_share")]
    pub cpu_share: f64,
}

fn default_time_limit() -> u64 {
    30
}

fn default_memory_limit() -> u64 {
    256
}

fn default_cpu_share() -> f64 {
    0.5
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit_seconds: default_time_limit(),
            memory_limit_mb: default_memory_limit(),
            cpu_share: default_cpu_share(),
        }
    }
}

// =============================================================================
// Lab Definition
// =============================================================================

/// A lab as authored by the content collaborator. Immutable once loaded;
/// the engine treats it as read-only configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabDefinition {
    pub id: String,
    pub title: String,

    /// Raw format string as authored. Kept verbatim so the documented
    /// unknown-format fallback can observe what was actually written;
    /// resolve with [`LabDefinition::format`].
    #[serde(default)]
    pub format: String,

    /// Ordered steps (terminal and hybrid labs).
    #[serde(default)]
    pub steps: Vec<ExecutionStep>,

    /// Test cases (code labs).
    #[serde(default)]
    pub test_cases: Vec<TestCase>,

    /// Sandbox image override for terminal labs.
    #[serde(default)]
    pub environment_image: Option<String>,

    #[serde(default)]
    pub limits: ResourceLimits,

    /// Network access is opt-in per lab.
    #[serde(default)]
    pub allow_network: bool,

    /// Destructive SQL (DROP, TRUNCATE, ...) is opt-in per lab.
    #[serde(default)]
    pub allow_destructive_operations: bool,

    /// DDL run against a freshly provisioned database before the first
    /// query of an attempt (query labs).
    #[serde(default)]
    pub schema_setup: Option<String>,

    /// Seed data loaded after `schema_setup` (query labs).
    #[serde(default)]
    pub sample_data: Option<String>,

    /// Language of a code lab (python, javascript, ruby, golang, java).
    #[serde(default)]
    pub programming_language: Option<String>,
}

impl LabDefinition {
    /// Resolve the authored format string; see [`LabFormat::resolve`].
    pub fn format(&self) -> (LabFormat, bool) {
        LabFormat::resolve(&self.format)
    }

    /// Look up a step by index.
    pub fn step(&self, index: usize) -> Option<&ExecutionStep> {
        self.steps.get(index)
    }
}

// =============================================================================
// Execution Step
// =============================================================================

/// One ordered unit of a terminal or hybrid lab. Steps are referenced by
/// stable integer index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub title: String,

    #[serde(default)]
    pub instruction: String,

    /// Command the learner is expected to type (terminal steps).
    #[serde(default, alias = "command")]
    pub expected_command: Option<String>,

    /// Expected stdout/stderr: a plain string (contains match) or a
    /// structured rule.
    #[serde(default)]
    pub expected_output: Option<OutputExpectation>,

    /// Strategy for validating the command shape; defaults to semantic
    /// for terminal steps.
    #[serde(default)]
    pub validation_type: Option<ValidationStrategy>,

    #[serde(default)]
    pub hint: Option<String>,

    /// Progressive hints revealed as attempts accumulate (level 1..3).
    #[serde(default)]
    pub hints: Vec<String>,

    /// Explicit modality for hybrid steps; inferred from shape otherwise.
    #[serde(default, alias = "type")]
    pub execution_type: Option<ExecutionType>,

    /// Expected query text (query steps of hybrid labs).
    #[serde(default)]
    pub expected_query: Option<String>,

    /// Expected result set for query steps.
    #[serde(default)]
    pub expected_result: Option<ResultExpectation>,

    /// Per-step DDL opt-in for query steps.
    #[serde(default)]
    pub allow_destructive: bool,

    /// Language override for code steps of hybrid labs.
    #[serde(default)]
    pub programming_language: Option<String>,

    /// Step-scoped test cases for code steps of hybrid labs.
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

// =============================================================================
// Test Case
// =============================================================================

/// One ordered unit of a code lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub name: Option<String>,

    /// Fed to the submission as stdin.
    #[serde(default)]
    pub input: String,

    #[serde(default, alias = "output")]
    pub expected_output: String,

    #[serde(default = "default_points")]
    pub points: u32,

    /// Hidden tests contribute to scoring but are never echoed to the
    /// learner.
    #[serde(default)]
    pub hidden: bool,
}

fn default_points() -> u32 {
    10
}

impl TestCase {
    /// Display name, falling back to a positional label.
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Test {}", index + 1))
    }
}

// =============================================================================
// Tests
// =============================================================================
