//! Session lifecycle: lazy provisioning, single-writer serialization,
//! teardown, and reaping.
//!
//! A `SandboxSession` is the runtime state bound to one (lab, user) pair
//! for the duration of an attempt. It is created lazily on first
//! execution, owns its container and/or database exclusively, and is
//! destroyed explicitly when the attempt ends, or by the background
//! reaper when the owning attempt crashed and never called cleanup.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skillforge_core::{Error, Result};

use crate::database::{DatabaseEngine, DatabaseHandle};
use crate::engine::{ContainerSpec, SandboxEngine, SandboxId};

// =============================================================================
// Session Types
// =============================================================================

/// Key identifying one learner's attempt at one lab. Exactly one live
/// session exists per key at a time.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SessionKey {
    pub lab_id: String,
    pub user_id: String,
}

impl SessionKey {
    pub fn new(lab_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            lab_id: lab_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.lab_id, self.user_id)
    }
}

/// Runtime state of one attempt. The container and database slots are
/// filled lazily by the executors that need them; hybrid labs may hold
/// both.
pub struct SandboxSession {
    pub id: String,
    pub key: SessionKey,
    created_at: DateTime<Utc>,

    container: tokio::sync::RwLock<Option<SandboxId>>,
    database: tokio::sync::RwLock<Option<DatabaseHandle>>,

    /// Serializes executions: a session is single-writer.
    gate: Arc<tokio::sync::Mutex<()>>,

    /// Per-step attempt counts, used for progressive hints.
    attempts: Mutex<HashMap<usize, u32>>,
    /// Steps validated successfully so far.
    completed: Mutex<HashSet<usize>>,
}

impl SandboxSession {
    fn new(key: SessionKey) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            created_at: Utc::now(),
            container: tokio::sync::RwLock::new(None),
            database: tokio::sync::RwLock::new(None),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            attempts: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Record one more attempt at a step and return the running count.
    pub fn record_attempt(&self, step_index: usize) -> u32 {
        let mut attempts = self.attempts.lock().expect("attempts lock poisoned");
        let count = attempts.entry(step_index).or_insert(0);
        *count += 1;
        *count
    }

    /// Mark a step as validated.
    pub fn record_completion(&self, step_index: usize) {
        self.completed
            .lock()
            .expect("completed lock poisoned")
            .insert(step_index);
    }

    /// Snapshot of the steps completed so far.
    pub fn completed_steps(&self) -> HashSet<usize> {
        self.completed
            .lock()
            .expect("completed lock poisoned")
            .clone()
    }

    /// The session's container, if one has been provisioned.
    pub async fn container(&self) -> Option<SandboxId> {
        self.container.read().await.clone()
    }

    /// The session's database handle, if one has been provisioned.
    pub async fn database(&self) -> Option<DatabaseHandle> {
        self.database.read().await.clone()
    }
}

/// Checkout token proving exclusive access to a session for the duration
/// of one execution. Dropping it releases the session.
pub struct SessionGuard {
    pub session: Arc<SandboxSession>,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

// =============================================================================
// Session Manager
// =============================================================================

/// Provisions, reuses, and tears down sessions keyed on (lab, user).
///
/// Different sessions are fully independent and execute in parallel;
/// concurrent requests against the same session are rejected with a
/// session-busy error rather than queued or raced.
pub struct SessionManager {
    engine: Arc<dyn SandboxEngine>,
    database: Arc<dyn DatabaseEngine>,
    sessions: DashMap<SessionKey, Arc<SandboxSession>>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn SandboxEngine>, database: Arc<dyn DatabaseEngine>) -> Self {
        Self {
            engine,
            database,
            sessions: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn SandboxEngine> {
        &self.engine
    }

    pub fn database(&self) -> &Arc<dyn DatabaseEngine> {
        &self.database
    }

    /// Get or lazily create the session for a key and take its write
    /// permit. Fails with `SessionBusy` if another request holds it.
    pub fn checkout(&self, key: SessionKey) -> Result<SessionGuard> {
        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SandboxSession::new(key)))
            .clone();

        let permit = session.gate.clone().try_lock_owned().map_err(|_| {
            Error::session_busy(format!(
                "An execution is already running for session {}",
                session.key
            ))
        })?;

        Ok(SessionGuard {
            session,
            _permit: permit,
        })
    }

    /// Look up a live session without taking its write permit.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<SandboxSession>> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    /// The session's container, provisioning it on first use.
    pub async fn get_or_create_container(
        &self,
        session: &SandboxSession,
        spec: &ContainerSpec,
    ) -> Result<SandboxId> {
        // Fast path
        {
            let guard = session.container.read().await;
            if let Some(ref id) = *guard {
                return Ok(id.clone());
            }
        }

        let mut guard = session.container.write().await;
        // Double-check after acquiring the write lock
        if let Some(ref id) = *guard {
            return Ok(id.clone());
        }

        let id = self.engine.create(spec).await?;
        *guard = Some(id.clone());
        Ok(id)
    }

    /// The session's database, provisioning and returning `fresh = true`
    /// on first use.
    pub async fn get_or_create_database(
        &self,
        session: &SandboxSession,
    ) -> Result<(DatabaseHandle, bool)> {
        {
            let guard = session.database.read().await;
            if let Some(ref handle) = *guard {
                return Ok((handle.clone(), false));
            }
        }

        let mut guard = session.database.write().await;
        if let Some(ref handle) = *guard {
            return Ok((handle.clone(), false));
        }

        let handle = self
            .database
            .provision(&session.key.lab_id, &session.key.user_id)
            .await?;
        *guard = Some(handle.clone());
        Ok((handle, true))
    }

    /// Destroy a session and everything it owns. Runs on normal
    /// completion, on attempt-fatal errors, and from the reaper; resource
    /// release failures are logged, not propagated, so cleanup always
    /// finishes.
    pub async fn destroy(&self, key: &SessionKey) {
        let Some((_, session)) = self.sessions.remove(key) else {
            return;
        };

        if let Some(container) = session.container.write().await.take() {
            if let Err(e) = self.engine.destroy(&container).await {
                tracing::warn!(session = %session.key, error = %e, "Failed to destroy session container");
            }
        }

        if let Some(handle) = session.database.write().await.take() {
            if let Err(e) = self.database.teardown(&handle).await {
                tracing::warn!(session = %session.key, error = %e, "Failed to tear down session database");
            }
        }

        tracing::info!(session = %session.key, session_id = %session.id, "Session destroyed");
    }

    /// Reclaim sessions whose owning attempt never called cleanup.
    /// Returns the number of sessions destroyed.
    pub async fn reap(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

        let expired: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().age() > max_age)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            tracing::warn!(session = %key, "Reaping abandoned session");
            self.destroy(key).await;
        }

        expired.len()
    }

    /// Spawn the background reaper task.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reaped = manager.reap(max_age).await;
                if reaped > 0 {
                    tracing::info!(count = reaped, "Reaper reclaimed abandoned sessions");
                }
            }
        })
    }

    /// Number of live sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
