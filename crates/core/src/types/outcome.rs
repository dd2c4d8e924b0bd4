use serde::{Deserialize, Serialize};

use super::lab::ExecutionType;

// =============================================================================
// Validation Outcome
// =============================================================================

/// Result of one test case, echoed to the learner unless hidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    pub points: u32,
    pub hidden: bool,
}

/// Structured outcome of validating learner input or captured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub message: String,

    /// 0–100, rounded to two decimals (code labs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Per-test breakdown (code labs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Vec<TestCaseResult>>,

    /// Progressive hint attached on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationOutcome {
    /// Create a passing outcome.
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
            score: None,
            test_results: None,
            hint: None,
        }
    }

    /// Create a failing outcome.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            score: None,
            test_results: None,
            hint: None,
        }
    }

    /// Attach a hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// =============================================================================
// Execution Result
// =============================================================================

/// Response returned to the caller for every execution request. The
/// learner always receives one of these, never a raw system error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Raw captured output, returned for terminal display regardless of
    /// the validation outcome.
    pub output: String,

    pub error: String,

    pub validation: ValidationOutcome,

    /// Row count reported by the database engine (query labs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    /// Resolved modality (hybrid labs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<ExecutionType>,
}

impl ExecutionResult {
    /// A successful execution with validated output.
    pub fn ok(output: impl Into<String>, validation: ValidationOutcome) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
            validation,
            rows_affected: None,
            execution_type: None,
        }
    }

    /// A failed execution carrying its captured output and a structured
    /// validation outcome.
    pub fn rejected(output: impl Into<String>, validation: ValidationOutcome) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: validation.message.clone(),
            validation,
            rows_affected: None,
            execution_type: None,
        }
    }

    /// A failed execution with no output, from a bare message.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            output: String::new(),
            error: message.clone(),
            validation: ValidationOutcome::fail(message),
            rows_affected: None,
            execution_type: None,
        }
    }

    /// Tag the result with the modality it resolved to.
    pub fn with_execution_type(mut self, execution_type: ExecutionType) -> Self {
        self.execution_type = Some(execution_type);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_mirrors_message_into_validation() {
        let result = ExecutionResult::failed("Invalid step index");
        assert!(!result.success);
        assert_eq!(result.error, "Invalid step index");
        assert!(!result.validation.valid);
        assert_eq!(result.validation.message, "Invalid step index");
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let json = serde_json::to_string(&ExecutionResult::ok(
            "done",
            ValidationOutcome::pass("Command executed successfully"),
        ))
        .unwrap();
        assert!(!json.contains("rows_affected"));
        assert!(!json.contains("execution_type"));
        assert!(!json.contains("score"));
    }
}
