//! Isolated database instances for query labs.
//!
//! Each query-lab session gets its own Postgres container and a uniquely
//! named database inside it. SQL is executed through `psql` inside the
//! container, with the statement passed as a single argv element. It
//! never travels through a shell.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use skillforge_core::config::DatabaseSettings;
use skillforge_core::{Error, Result};

use crate::engine::{ContainerSpec, SandboxEngine, SandboxId};

// =============================================================================
// Database Types
// =============================================================================

/// Handle to one session's isolated database.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    /// The engine-managed Postgres container.
    pub container: SandboxId,
    /// Name of the session's database inside it.
    pub database: String,
}

/// Trait for isolated database backends.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Provision a fresh database instance scoped to one attempt.
    async fn provision(&self, lab_id: &str, user_id: &str) -> Result<DatabaseHandle>;

    /// Execute SQL against the session's database, returning the raw
    /// tabular response (rows plus a row-count footer).
    async fn execute_sql(
        &self,
        handle: &DatabaseHandle,
        sql: &str,
        timeout: Duration,
    ) -> Result<String>;

    /// Drop the isolated database and release its resources.
    async fn teardown(&self, handle: &DatabaseHandle) -> Result<()>;
}

/// Restrict an identifier fragment to `[a-z0-9_]` so session-derived
/// database names are always valid and inert.
fn sanitize_identifier(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// =============================================================================
// Postgres Implementation
// =============================================================================

/// Postgres instance running inside an engine-managed container.
pub struct PostgresSandbox {
    engine: Arc<dyn SandboxEngine>,
    settings: DatabaseSettings,
}

impl PostgresSandbox {
    pub fn new(engine: Arc<dyn SandboxEngine>, settings: DatabaseSettings) -> Self {
        Self { engine, settings }
    }

    /// Run `psql -c` inside the container against the given database.
    async fn psql(
        &self,
        container: &SandboxId,
        database: &str,
        sql: &str,
        timeout: Duration,
    ) -> Result<String> {
        let argv = vec![
            "psql".to_string(),
            "-U".to_string(),
            self.settings.superuser.clone(),
            "-d".to_string(),
            database.to_string(),
            "-c".to_string(),
            sql.to_string(),
        ];

        let output = self.engine.exec(container, &argv, None, timeout).await?;
        if output.timed_out {
            return Err(Error::ExecutionTimeout(timeout.as_secs()));
        }
        if !output.success() {
            return Err(Error::runtime(output.stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }

    /// Poll `pg_isready` until the server accepts connections.
    async fn wait_ready(&self, container: &SandboxId) -> Result<()> {
        let deadline = Duration::from_secs(self.settings.ready_timeout_seconds);
        let poll = Duration::from_millis(500);
        let argv = vec![
            "pg_isready".to_string(),
            "-U".to_string(),
            self.settings.superuser.clone(),
        ];

        let mut waited = Duration::ZERO;
        loop {
            let probe = self
                .engine
                .exec(container, &argv, None, Duration::from_secs(5))
                .await;
            if matches!(probe, Ok(ref out) if out.success()) {
                return Ok(());
            }
            waited += poll;
            if waited >= deadline {
                return Err(Error::provisioning(format!(
                    "Database did not become ready within {}s",
                    deadline.as_secs()
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl DatabaseEngine for PostgresSandbox {
    async fn provision(&self, lab_id: &str, user_id: &str) -> Result<DatabaseHandle> {
        let spec = ContainerSpec::service(&self.settings.image)
            .with_limits(self.settings.memory_limit_mb, 0.5)
            .with_env(vec![
                format!("POSTGRES_USER={}", self.settings.superuser),
                format!(
                    "POSTGRES_PASSWORD={}",
                    self.settings.password.expose_secret()
                ),
            ]);

        let container = self.engine.create(&spec).await?;
        if let Err(e) = self.wait_ready(&container).await {
            // Half-provisioned containers must not leak
            let _ = self.engine.destroy(&container).await;
            return Err(e);
        }

        let database = format!(
            "lab_{}_user_{}_{}",
            sanitize_identifier(lab_id),
            sanitize_identifier(user_id),
            chrono::Utc::now().timestamp()
        );

        let create = format!("CREATE DATABASE {};", database);
        if let Err(e) = self
            .psql(&container, "postgres", &create, Duration::from_secs(15))
            .await
        {
            let _ = self.engine.destroy(&container).await;
            return Err(Error::provisioning(format!(
                "Failed to create isolated database: {}",
                e
            )));
        }

        tracing::info!(%database, container = %container, "Isolated database provisioned");

        Ok(DatabaseHandle {
            container,
            database,
        })
    }

    async fn execute_sql(
        &self,
        handle: &DatabaseHandle,
        sql: &str,
        timeout: Duration,
    ) -> Result<String> {
        self.psql(&handle.container, &handle.database, sql, timeout)
            .await
    }

    async fn teardown(&self, handle: &DatabaseHandle) -> Result<()> {
        // The database dies with its container
        self.engine.destroy(&handle.container).await?;
        tracing::info!(database = %handle.database, "Isolated database destroyed");
        Ok(())
    }
}

// =============================================================================
// Mock Database (for testing without Docker)
// =============================================================================

/// In-memory mock database returning scripted psql-style responses.
#[derive(Default)]
pub struct MockDatabase {
    pub responses: std::sync::Arc<tokio::sync::Mutex<Vec<Result<String>>>>,
    pub executed: std::sync::Arc<tokio::sync::Mutex<Vec<String>>>,
    pub provisioned: std::sync::atomic::AtomicUsize,
    pub dropped: std::sync::atomic::AtomicUsize,
}

impl MockDatabase {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: std::sync::Arc::new(tokio::sync::Mutex::new(responses)),
            ..Default::default()
        }
    }

    pub fn provisioned_count(&self) -> usize {
        self.provisioned.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseEngine for MockDatabase {
    async fn provision(&self, lab_id: &str, user_id: &str) -> Result<DatabaseHandle> {
        self.provisioned
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(DatabaseHandle {
            container: SandboxId(format!("mock-db-{}", uuid::Uuid::new_v4())),
            database: format!(
                "lab_{}_user_{}_0",
                sanitize_identifier(lab_id),
                sanitize_identifier(user_id)
            ),
        })
    }

    async fn execute_sql(
        &self,
        _handle: &DatabaseHandle,
        sql: &str,
        _timeout: Duration,
    ) -> Result<String> {
        self.executed.lock().await.push(sql.to_string());
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Ok("(0 rows)\n".to_string())
        } else {
            responses.remove(0)
        }
    }

    async fn teardown(&self, _handle: &DatabaseHandle) -> Result<()> {
        self.dropped
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(sanitize_identifier("SQL-Basics 101"), "sql_basics_101");
        assert_eq!(
            sanitize_identifier("user@example.com"),
            "user_example_com"
        );
    }

    #[tokio::test]
    async fn mock_database_records_statements() {
        let db = MockDatabase::default();
        let handle = db.provision("sql-101", "alice").await.unwrap();
        assert!(handle.database.starts_with("lab_sql_101_user_alice"));

        db.execute_sql(&handle, "SELECT 1", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(db.executed.lock().await.as_slice(), ["SELECT 1"]);

        db.teardown(&handle).await.unwrap();
        assert_eq!(db.dropped_count(), 1);
    }
}
