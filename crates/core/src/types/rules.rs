use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Validation Strategies
// =============================================================================

/// Comparison strategy applied by the validation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStrategy {
    /// Case-insensitive, whitespace-trimmed equality.
    Exact,
    /// Case-insensitive substring containment.
    Contains,
    /// The expectation is a pattern; matches anywhere in the input.
    Regex,
    /// Command-structure comparison: base command + required flags.
    Semantic,
}

// =============================================================================
// Output Expectations (terminal steps)
// =============================================================================

/// Expected output of a terminal step: either a plain string, validated
/// with the contains strategy, or a structured rule for precise matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputExpectation {
    Rule(OutputRule),
    Text(String),
}

/// Structured rule applied to captured stdout/stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputRule {
    Contains { value: String },
    Regex { pattern: String },
    Exact { value: String },
}

// =============================================================================
// Result Expectations (query steps)
// =============================================================================

/// A single result row: column name to rendered value.
pub type ResultRow = BTreeMap<String, String>;

/// Expected result of a query step. A bare integer is shorthand for a
/// row-count rule; an array of rows requests an exact (order-independent)
/// row-set comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultExpectation {
    Count(u64),
    Rule(ResultRule),
    Rows(Vec<ResultRow>),
}

/// Structured rule applied to a parsed query result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultRule {
    RowCount { count: u64 },
    ContainsColumn { column: String },
    /// First column of the first row equals the given value (aggregate
    /// queries).
    AggregateValue { value: String },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_expectation_accepts_plain_string() {
        let e: OutputExpectation = serde_yaml::from_str("\"CONTAINER ID\"").unwrap();
        assert!(matches!(e, OutputExpectation::Text(ref s) if s == "CONTAINER ID"));
    }

    #[test]
    fn output_expectation_accepts_rule() {
        let e: OutputExpectation =
            serde_yaml::from_str("{ type: regex, pattern: \"nginx\\\\s+running\" }").unwrap();
        assert!(matches!(e, OutputExpectation::Rule(OutputRule::Regex { .. })));
    }

    #[test]
    fn result_expectation_accepts_count_shorthand() {
        let e: ResultExpectation = serde_yaml::from_str("2").unwrap();
        assert!(matches!(e, ResultExpectation::Count(2)));
    }

    #[test]
    fn result_expectation_accepts_tagged_rule() {
        let e: ResultExpectation =
            serde_yaml::from_str("{ type: row_count, count: 2 }").unwrap();
        assert!(matches!(
            e,
            ResultExpectation::Rule(ResultRule::RowCount { count: 2 })
        ));
    }

    #[test]
    fn result_expectation_accepts_rows() {
        let e: ResultExpectation =
            serde_yaml::from_str("[{ id: \"1\", name: \"alice\" }]").unwrap();
        match e {
            ResultExpectation::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["name"], "alice");
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }
}
