//! Structured rule validation for captured output and query result sets.

use skillforge_core::{
    OutputExpectation, OutputRule, ResultExpectation, ResultRow, ResultRule, ValidationOutcome,
    ValidationStrategy,
};

use crate::strategy::validate;

// =============================================================================
// Output Rules (terminal steps)
// =============================================================================

/// Validate captured stdout/stderr against a step's expectation. A plain
/// string expectation uses the contains strategy; structured rules pick
/// their own.
pub fn validate_output(output: &str, expectation: &OutputExpectation) -> ValidationOutcome {
    match expectation {
        OutputExpectation::Text(value) => validate(output, value, ValidationStrategy::Contains),
        OutputExpectation::Rule(rule) => match rule {
            OutputRule::Contains { value } => {
                validate(output, value, ValidationStrategy::Contains)
            }
            OutputRule::Regex { pattern } => validate(output, pattern, ValidationStrategy::Regex),
            OutputRule::Exact { value } => validate(output, value, ValidationStrategy::Exact),
        },
    }
}

// =============================================================================
// Result Rules (query steps)
// =============================================================================

/// Validate a parsed result set against a step's expectation.
pub fn validate_result(rows: &[ResultRow], expectation: &ResultExpectation) -> ValidationOutcome {
    match expectation {
        ResultExpectation::Count(count) => validate_row_count(rows, *count),
        ResultExpectation::Rule(rule) => match rule {
            ResultRule::RowCount { count } => validate_row_count(rows, *count),
            ResultRule::ContainsColumn { column } => {
                let first = rows.first();
                if first.is_some_and(|row| row.contains_key(column)) {
                    ValidationOutcome::pass(format!("Column '{}' found!", column))
                } else {
                    ValidationOutcome::fail(format!("Missing column: {}", column))
                }
            }
            ResultRule::AggregateValue { value } => {
                let actual = rows
                    .first()
                    .and_then(|row| row.values().next())
                    .map(String::as_str)
                    .unwrap_or_default();
                if actual == value {
                    ValidationOutcome::pass("Correct aggregate value!")
                } else {
                    ValidationOutcome::fail(format!("Expected {}, got {}", value, actual))
                }
            }
        },
        ResultExpectation::Rows(expected) => {
            if normalize_result_set(rows) == normalize_result_set(expected) {
                ValidationOutcome::pass("Query result matches expected output!")
            } else {
                ValidationOutcome::fail("Query result does not match. Review your query.")
            }
        }
    }
}

fn validate_row_count(rows: &[ResultRow], expected: u64) -> ValidationOutcome {
    let actual = rows.len() as u64;
    if actual == expected {
        ValidationOutcome::pass(format!("Correct! {} rows returned.", actual))
    } else {
        ValidationOutcome::fail(format!("Expected {} rows, got {}", expected, actual))
    }
}

/// Normalize a result set for order-independent comparison: every value
/// trimmed and lowercased, rows sorted by their rendered form.
fn normalize_result_set(rows: &[ResultRow]) -> Vec<ResultRow> {
    let mut normalized: Vec<ResultRow> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(k, v)| (k.clone(), v.trim().to_lowercase()))
                .collect()
        })
        .collect();
    normalized.sort_by_key(|row| format!("{:?}", row));
    normalized
}

// =============================================================================
// Tests
// =============================================================================
