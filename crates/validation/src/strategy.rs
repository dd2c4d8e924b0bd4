//! Comparison strategies for learner input.

use skillforge_core::{ValidationOutcome, ValidationStrategy};

// =============================================================================
// Command Parsing
// =============================================================================

/// A shell-style command split into its structural parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// First token (`docker`, `kubectl`, ...).
    pub base: String,
    /// Tokens beginning with `-` or `--`.
    pub flags: Vec<String>,
    /// Remaining tokens after the base.
    pub args: Vec<String>,
}

/// Split a command line into base command, flags, and arguments.
pub fn parse_command(line: &str) -> ParsedCommand {
    let mut parts = line.split_whitespace();
    let base = parts.next().unwrap_or_default().to_string();

    let rest: Vec<&str> = parts.collect();
    let flags = rest
        .iter()
        .filter(|t| t.starts_with('-'))
        .map(|t| t.to_string())
        .collect();
    let args = rest
        .iter()
        .filter(|t| !t.starts_with('-'))
        .map(|t| t.to_string())
        .collect();

    ParsedCommand { base, flags, args }
}

/// Normalize a SQL query for textual comparison: collapse whitespace,
/// strip the trailing semicolon, lowercase.
pub fn normalize_sql(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim().to_lowercase()
}

// =============================================================================
// Validation
// =============================================================================

/// Validate `input` against `expected` using the given strategy.
pub fn validate(input: &str, expected: &str, strategy: ValidationStrategy) -> ValidationOutcome {
    match strategy {
        ValidationStrategy::Exact => validate_exact(input, expected),
        ValidationStrategy::Contains => validate_contains(input, expected),
        ValidationStrategy::Regex => validate_regex(input, expected),
        ValidationStrategy::Semantic => validate_semantic(input, expected),
    }
}

fn validate_exact(input: &str, expected: &str) -> ValidationOutcome {
    if input.trim().eq_ignore_ascii_case(expected.trim()) {
        ValidationOutcome::pass("Exact match!")
    } else {
        ValidationOutcome::fail(format!(
            "Expected '{}', got '{}'",
            expected.trim(),
            input.trim()
        ))
    }
}

fn validate_contains(input: &str, expected: &str) -> ValidationOutcome {
    if input
        .to_lowercase()
        .contains(&expected.trim().to_lowercase())
    {
        ValidationOutcome::pass("Output contains the expected value")
    } else {
        ValidationOutcome::fail(format!(
            "Expected output to contain '{}'",
            expected.trim()
        ))
    }
}

fn validate_regex(input: &str, pattern: &str) -> ValidationOutcome {
    match regex::Regex::new(pattern) {
        Ok(re) => {
            if re.is_match(input) {
                ValidationOutcome::pass("Output matches the expected pattern")
            } else {
                ValidationOutcome::fail(format!("Output does not match pattern '{}'", pattern))
            }
        }
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid validation pattern in lab content");
            ValidationOutcome::fail(format!("Invalid validation pattern: {}", e))
        }
    }
}

/// Structural comparison for terminal commands: the base command must
/// match and every expected flag must be present. Flag order is ignored
/// and extra flags in the input are tolerated.
fn validate_semantic(input: &str, expected: &str) -> ValidationOutcome {
    let input_parts = parse_command(input);
    let expected_parts = parse_command(expected);

    if input_parts.base != expected_parts.base {
        return ValidationOutcome::fail(format!(
            "Expected command: {}, got: {}",
            expected_parts.base, input_parts.base
        ));
    }

    let missing: Vec<&str> = expected_parts
        .flags
        .iter()
        .filter(|f| !input_parts.flags.contains(f))
        .map(|f| f.as_str())
        .collect();

    if !missing.is_empty() {
        return ValidationOutcome::fail(format!(
            "Missing required flags: {}",
            missing.join(", ")
        ));
    }

    ValidationOutcome::pass("Command structure is correct!")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_splits_base_flags_args() {
        let parsed = parse_command("docker run -d --name web nginx");
        assert_eq!(parsed.base, "docker");
        assert_eq!(parsed.flags, vec!["-d", "--name"]);
        assert_eq!(parsed.args, vec!["run", "web", "nginx"]);
    }

    #[test]
    fn semantic_tolerates_extra_flags_and_order() {
        let outcome = validate(
            "docker run -d --name x nginx",
            "docker run -d",
            ValidationStrategy::Semantic,
        );
        assert!(outcome.valid);
    }

    #[test]
    fn semantic_reports_missing_flag() {
        let outcome = validate(
            "docker run nginx",
            "docker run -d",
            ValidationStrategy::Semantic,
        );
        assert!(!outcome.valid);
        assert!(outcome.message.contains("Missing required flags: -d"));
    }

    #[test]
    fn semantic_reports_wrong_base_command() {
        let outcome = validate("podman run -d", "docker run -d", ValidationStrategy::Semantic);
        assert!(!outcome.valid);
        assert!(outcome.message.contains("Expected command: docker"));
    }

    #[test]
    fn exact_is_trim_and_case_insensitive() {
        let outcome = validate(" Hello ", "hello", ValidationStrategy::Exact);
        assert!(outcome.valid);
    }

    #[test]
    fn contains_is_case_insensitive() {
        let outcome = validate(
            "CONTAINER ID   IMAGE\nabc123  nginx",
            "container id",
            ValidationStrategy::Contains,
        );
        assert!(outcome.valid);
    }

    #[test]
    fn regex_matches_anywhere() {
        let outcome = validate(
            "3 packets transmitted, 3 received",
            r"\d+ received",
            ValidationStrategy::Regex,
        );
        assert!(outcome.valid);
    }

    #[test]
    fn invalid_regex_fails_instead_of_panicking() {
        let outcome = validate("anything", "(unclosed", ValidationStrategy::Regex);
        assert!(!outcome.valid);
        assert!(outcome.message.contains("Invalid validation pattern"));
    }

    #[test]
    fn validate_is_deterministic() {
        let a = validate(" Hello ", "hello", ValidationStrategy::Exact);
        let b = validate(" Hello ", "hello", ValidationStrategy::Exact);
        assert_eq!(a.valid, b.valid);
        assert_eq!(a.message, b.message);
    }

    #[test]
    fn normalize_sql_collapses_and_strips() {
        assert_eq!(
            normalize_sql("SELECT  *\n  FROM users ;"),
            "select * from users"
        );
    }
}
