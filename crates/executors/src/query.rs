//! Query lab executor.
//!
//! Runs learner SQL against the session's isolated database instance.
//! The first execution of an attempt provisions the instance and seeds
//! it with the lab's schema and sample data; every query is screened
//! against a keyword allow-list and a destructive-phrase list before it
//! reaches the engine.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use skillforge_core::{
    Error, ExecutionRequest, ExecutionResult, ResultRow, Result, ValidationOutcome,
};
use skillforge_sandbox::SessionManager;
use skillforge_validation::validate_result;

use crate::dispatch::{ExecutionContext, Executor};

// =============================================================================
// SQL Screening
// =============================================================================

const VALID_KEYWORDS: [&str; 8] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "WITH",
];

const DESTRUCTIVE_PHRASES: [&str; 6] = [
    "DROP",
    "TRUNCATE",
    "DELETE FROM",
    "ALTER",
    "CREATE USER",
    "GRANT",
];

/// Reject queries that are not plain SQL or that use destructive phrases
/// the lab has not opted into.
fn screen_query(query: &str, allow_destructive: bool) -> Result<()> {
    let upper = query.trim().to_uppercase();

    if !allow_destructive {
        for phrase in DESTRUCTIVE_PHRASES {
            if upper.contains(phrase) {
                return Err(Error::security_violation(format!(
                    "Dangerous SQL command not allowed: {}",
                    phrase
                )));
            }
        }
    }

    let first = upper.split_whitespace().next().unwrap_or_default();
    if !VALID_KEYWORDS.contains(&first) {
        return Err(Error::syntax(
            "Invalid SQL query. Must start with a valid SQL keyword.",
        ));
    }

    Ok(())
}

// =============================================================================
// psql Output Parsing
// =============================================================================

/// A parsed tabular response: ordered columns, row-maps, and the count
/// from the `(N rows)` footer.
#[derive(Debug, Default, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub rows_affected: u64,
}

/// Parse psql's aligned text output. The separator line of dashes marks
/// the table: the header sits above it, data rows below until the
/// row-count footer.
fn parse_psql_output(raw: &str) -> QueryResult {
    let lines: Vec<&str> = raw.lines().map(str::trim_end).collect();

    let separator_index = lines.iter().position(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && trimmed.contains('-')
            && trimmed.chars().all(|c| c == '-' || c == '+' || c == ' ')
    });

    let mut result = QueryResult::default();

    if let Some(sep) = separator_index {
        let columns: Vec<String> = match sep.checked_sub(1).and_then(|i| lines.get(i)) {
            Some(header) => header.split('|').map(|c| c.trim().to_string()).collect(),
            None => Vec::new(),
        };

        for line in lines.iter().skip(sep + 1) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('(') {
                break;
            }
            let values: Vec<&str> = trimmed.split('|').map(str::trim).collect();
            let row: ResultRow = columns
                .iter()
                .cloned()
                .zip(values.iter().map(|v| v.to_string()))
                .collect();
            if !row.is_empty() {
                result.rows.push(row);
            }
        }

        result.columns = columns;
    }

    // Footer: "(2 rows)", also present for empty result sets
    for line in &lines {
        let trimmed = line.trim();
        if let Some(count) = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(" rows)").or_else(|| rest.strip_suffix(" row)")))
            .and_then(|n| n.parse::<u64>().ok())
        {
            result.rows_affected = count;
        }
    }

    result
}

/// Render a result set as a fixed-width text table with a row-count
/// footer, for terminal-style display.
fn render_table(result: &QueryResult) -> String {
    if result.rows.is_empty() {
        return "No results".to_string();
    }

    let widths: Vec<usize> = result
        .columns
        .iter()
        .map(|col| {
            result
                .rows
                .iter()
                .map(|row| row.get(col).map(String::len).unwrap_or(0))
                .chain(std::iter::once(col.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let separator = {
        let mut s = String::from("+");
        for width in &widths {
            s.push_str(&"-".repeat(width + 2));
            s.push('+');
        }
        s
    };

    let render_row = |cells: Vec<String>| {
        let mut line = String::from("|");
        for (cell, width) in cells.iter().zip(&widths) {
            line.push_str(&format!(" {:<width$} |", cell, width = width));
        }
        line
    };

    let mut output = vec![
        separator.clone(),
        render_row(result.columns.clone()),
        separator.clone(),
    ];
    for row in &result.rows {
        let cells = result
            .columns
            .iter()
            .map(|col| row.get(col).cloned().unwrap_or_default())
            .collect();
        output.push(render_row(cells));
    }
    output.push(separator);
    output.push(format!("\n({} rows)", result.rows.len()));

    output.join("\n")
}

// =============================================================================
// Query Executor
// =============================================================================

pub struct QueryExecutor {
    sessions: Arc<SessionManager>,
}

impl QueryExecutor {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Executor for QueryExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let step = ctx.lab.step(request.step_index);

        // Provision the isolated database on the attempt's first
        // execution; seeding failures are attempt-fatal
        let (handle, fresh) = self
            .sessions
            .get_or_create_database(&ctx.session)
            .await?;

        if fresh {
            tracing::info!(database = %handle.database, "Seeding isolated database");
            for setup in [&ctx.lab.schema_setup, &ctx.lab.sample_data]
                .into_iter()
                .flatten()
            {
                self.sessions
                    .database()
                    .execute_sql(&handle, setup, Duration::from_secs(30))
                    .await
                    .map_err(|e| {
                        Error::provisioning(format!("Database setup failed: {}", e))
                    })?;
            }
        }

        let allow_destructive =
            ctx.lab.allow_destructive_operations || step.is_some_and(|s| s.allow_destructive);
        screen_query(&request.input, allow_destructive)?;

        let timeout = Duration::from_secs(
            request
                .timeout_seconds
                .unwrap_or(ctx.lab.limits.time_limit_seconds),
        );

        let raw = match self
            .sessions
            .database()
            .execute_sql(&handle, &request.input, timeout)
            .await
        {
            Ok(raw) => raw,
            Err(Error::ExecutionTimeout(secs)) => return Err(Error::ExecutionTimeout(secs)),
            // The engine's own diagnostic (e.g. a Postgres error) is the
            // learner's feedback, not an internal failure
            Err(e) => {
                return Ok(ExecutionResult::failed(e.to_string()));
            }
        };

        let result = parse_psql_output(&raw);
        let output = render_table(&result);

        if let Some(expectation) = step.and_then(|s| s.expected_result.as_ref()) {
            let outcome = validate_result(&result.rows, expectation);
            let mut response = if outcome.valid {
                ExecutionResult::ok(output, outcome)
            } else {
                ExecutionResult::rejected(output, outcome)
            };
            response.rows_affected = Some(result.rows_affected);
            return Ok(response);
        }

        let mut response = ExecutionResult::ok(
            output,
            ValidationOutcome::pass("Query executed successfully"),
        );
        response.rows_affected = Some(result.rows_affected);
        Ok(response)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use skillforge_core::LabDefinition;
    use skillforge_sandbox::{MockDatabase, MockSandbox, SessionKey};

    const USERS_TABLE: &str = "\
 id |  name
----+--------
  1 | Alice
  2 | Bob
(2 rows)
";

    fn sql_lab(yaml_tail: &str) -> Arc<LabDefinition> {
        let yaml = format!(
            "id: sql-101\ntitle: t\nformat: sql\nschema_setup: CREATE TABLE users (id int, name text);\nsample_data: INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob');\n{}",
            yaml_tail
        );
        Arc::new(serde_yaml::from_str(&yaml).unwrap())
    }

    fn context(
        lab: Arc<LabDefinition>,
        database: Arc<MockDatabase>,
    ) -> (Arc<SessionManager>, ExecutionContext) {
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MockSandbox::default()),
            database,
        ));
        let guard = sessions.checkout(SessionKey::new(&lab.id, "alice")).unwrap();
        let session = guard.session.clone();
        drop(guard);
        (sessions, ExecutionContext { lab, session })
    }

    fn request(input: &str) -> ExecutionRequest {
        ExecutionRequest {
            lab_id: "sql-101".into(),
            session_id: "alice".into(),
            input: input.into(),
            step_index: 0,
            execution_type: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn parse_extracts_columns_rows_and_footer() {
        let result = parse_psql_output(USERS_TABLE);
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["name"], "Alice");
        assert_eq!(result.rows_affected, 2);
    }

    #[test]
    fn parse_handles_single_column_output() {
        let raw = " count\n-------\n     2\n(1 row)\n";
        let result = parse_psql_output(raw);
        assert_eq!(result.columns, vec!["count"]);
        assert_eq!(result.rows[0]["count"], "2");
        assert_eq!(result.rows_affected, 1);
    }

    #[test]
    fn parse_handles_command_tags_without_tables() {
        let result = parse_psql_output("INSERT 0 2\n");
        assert!(result.rows.is_empty());
        assert_eq!(result.rows_affected, 0);
    }

    #[test]
    fn rendered_table_is_fixed_width() {
        let result = parse_psql_output(USERS_TABLE);
        let table = render_table(&result);
        assert!(table.contains("| id | name  |"));
        assert!(table.contains("| 1  | Alice |"));
        assert!(table.ends_with("(2 rows)"));
    }

    #[test]
    fn screen_rejects_non_sql_input() {
        assert!(matches!(
            screen_query("EXPLAIN ANALYZE SELECT 1", false),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn screen_rejects_destructive_phrases_unless_allowed() {
        assert!(matches!(
            screen_query("DROP TABLE users", false),
            Err(Error::SecurityViolation(_))
        ));
        assert!(screen_query("DROP TABLE users", true).is_ok());
        assert!(screen_query("SELECT * FROM users", false).is_ok());
    }

    #[tokio::test]
    async fn first_execution_provisions_and_seeds_the_database() {
        let database = Arc::new(MockDatabase::new(vec![
            Ok(String::new()),           // schema_setup
            Ok(String::new()),           // sample_data
            Ok(USERS_TABLE.to_string()), // the learner's query
        ]));
        let lab = sql_lab("steps:\n  - title: s\n    expected_result: { type: row_count, count: 2 }");
        let (sessions, ctx) = context(lab, database.clone());
        let executor = QueryExecutor::new(sessions);

        let result = executor
            .execute(&ctx, &request("SELECT * FROM users"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.validation.valid);
        assert_eq!(result.rows_affected, Some(2));
        assert_eq!(database.provisioned_count(), 1);

        let executed = database.executed.lock().await;
        assert_eq!(executed.len(), 3);
        assert!(executed[0].starts_with("CREATE TABLE"));
        assert!(executed[1].starts_with("INSERT INTO"));
        assert_eq!(executed[2], "SELECT * FROM users");
    }

    #[tokio::test]
    async fn second_execution_reuses_the_provisioned_database() {
        let database = Arc::new(MockDatabase::default());
        let lab = sql_lab("");
        let (sessions, ctx) = context(lab, database.clone());
        let executor = QueryExecutor::new(sessions);

        executor
            .execute(&ctx, &request("SELECT * FROM users"))
            .await
            .unwrap();
        executor
            .execute(&ctx, &request("SELECT * FROM users"))
            .await
            .unwrap();

        assert_eq!(database.provisioned_count(), 1);
        // schema + data seeded exactly once, then the two queries
        assert_eq!(database.executed.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn row_count_mismatch_is_a_validation_failure() {
        let database = Arc::new(MockDatabase::new(vec![
            Ok(String::new()),
            Ok(String::new()),
            Ok(USERS_TABLE.to_string()),
        ]));
        let lab = sql_lab("steps:\n  - title: s\n    expected_result: { type: row_count, count: 5 }");
        let (sessions, ctx) = context(lab, database);
        let executor = QueryExecutor::new(sessions);

        let result = executor
            .execute(&ctx, &request("SELECT * FROM users"))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.contains("Expected 5 rows, got 2"));
        // The learner still sees their result table
        assert!(result.output.contains("Alice"));
    }

    #[tokio::test]
    async fn destructive_query_is_rejected_before_execution() {
        let database = Arc::new(MockDatabase::default());
        let lab = sql_lab("");
        let (sessions, ctx) = context(lab, database.clone());
        let executor = QueryExecutor::new(sessions);

        let result = executor.execute(&ctx, &request("DROP TABLE users")).await;

        assert!(matches!(result, Err(Error::SecurityViolation(_))));
        // Seeding ran, but the query itself never reached the engine
        assert_eq!(database.executed.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn destructive_query_is_allowed_when_lab_opts_in() {
        let database = Arc::new(MockDatabase::new(vec![
            Ok(String::new()),
            Ok(String::new()),
            Ok("DROP TABLE\n".to_string()),
        ]));
        let lab = sql_lab("allow_destructive_operations: true");
        let (sessions, ctx) = context(lab, database);
        let executor = QueryExecutor::new(sessions);

        let result = executor
            .execute(&ctx, &request("DROP TABLE users"))
            .await
            .unwrap();

        assert!(result.success);
    }

    #[tokio::test]
    async fn engine_diagnostic_becomes_learner_feedback() {
        let database = Arc::new(MockDatabase::new(vec![
            Ok(String::new()),
            Ok(String::new()),
            Err(Error::runtime("ERROR:  relation \"userz\" does not exist")),
        ]));
        let lab = sql_lab("");
        let (sessions, ctx) = context(lab, database);
        let executor = QueryExecutor::new(sessions);

        let result = executor
            .execute(&ctx, &request("SELECT * FROM userz"))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.contains("does not exist"));
    }
}
