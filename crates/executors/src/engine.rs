//! The lab-execution engine facade.
//!
//! Entry point for the request/response contract: resolves the lab,
//! checks out the session, dispatches to the right executor, and
//! converts every failure mode into a structured result. The learner
//! always receives a response, never a raw system error.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use skillforge_core::config::AppConfig;
use skillforge_core::{Error, ExecutionRequest, ExecutionResult, LabRegistry, Result};
use skillforge_sandbox::{SessionKey, SessionManager};

use crate::dispatch::{ExecutionContext, ExecutorDispatcher};
use crate::hybrid::HybridProgress;

pub struct LabEngine {
    registry: Arc<LabRegistry>,
    sessions: Arc<SessionManager>,
    dispatcher: ExecutorDispatcher,
}

impl LabEngine {
    pub fn new(registry: Arc<LabRegistry>, sessions: Arc<SessionManager>, config: &AppConfig) -> Self {
        let dispatcher = ExecutorDispatcher::new(sessions.clone(), config.sandbox.clone());
        Self {
            registry,
            sessions,
            dispatcher,
        }
    }

    /// Handle one execution request end to end.
    ///
    /// Only an unknown lab id escapes as an error (the HTTP boundary maps
    /// it to a 404); everything else, including a busy session, comes
    /// back as a failed `ExecutionResult` the learner can act on.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let lab = self.registry.get(&request.lab_id)?;

        let (format, fell_back) = lab.format();
        if fell_back {
            // Deliberate permissive default; loud so misconfigured labs
            // surface in logs instead of silently running as terminal
            tracing::warn!(
                lab_id = %lab.id,
                raw_format = %lab.format,
                "Unknown lab format, falling back to terminal executor"
            );
        }

        let key = SessionKey::new(&lab.id, &request.session_id);
        let guard = match self.sessions.checkout(key.clone()) {
            Ok(guard) => guard,
            Err(e @ Error::SessionBusy(_)) => {
                return Ok(ExecutionResult::failed(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let span = tracing::info_span!(
            "lab_execution",
            lab_id = %lab.id,
            session_id = %guard.session.id,
            step = request.step_index,
            format = %format,
        );

        let executor = self.dispatcher.resolve(format);
        let ctx = ExecutionContext {
            lab,
            session: guard.session.clone(),
        };

        let outcome = executor.execute(&ctx, &request).instrument(span).await;
        drop(guard);

        match outcome {
            Ok(result) => {
                if result.success {
                    ctx.session.record_completion(request.step_index);
                }
                Ok(result)
            }
            Err(e) if e.is_attempt_fatal() => {
                // The session cannot be trusted anymore; release its
                // resources so the next request provisions fresh
                tracing::warn!(session = %key, error = %e, "Attempt-fatal error, destroying session");
                self.sessions.destroy(&key).await;
                Ok(ExecutionResult::failed(e.to_string()))
            }
            Err(
                e @ (Error::InvalidStep(_)
                | Error::Syntax(_)
                | Error::SecurityViolation(_)
                | Error::ValidationMismatch(_)
                | Error::RuntimeFailure(_)),
            ) => Ok(ExecutionResult::failed(e.to_string())),
            Err(e) => {
                // Anything unexpected is contained at this boundary
                tracing::error!(session = %key, error = %e, "Unexpected execution error");
                Ok(ExecutionResult::failed(
                    "Execution failed unexpectedly. Please try again.",
                ))
            }
        }
    }

    /// End an attempt and release everything the session owns. Safe to
    /// call for sessions that were never started.
    pub async fn end_attempt(&self, lab_id: &str, user_id: &str) {
        self.sessions
            .destroy(&SessionKey::new(lab_id, user_id))
            .await;
    }

    /// Per-modality progress for a lab attempt. A lab with no live
    /// session reports zero completions.
    pub fn progress(&self, lab_id: &str, user_id: &str) -> Result<HybridProgress> {
        let lab = self.registry.get(lab_id)?;
        let completed = self
            .sessions
            .get(&SessionKey::new(lab_id, user_id))
            .map(|session| session.completed_steps())
            .unwrap_or_default();
        Ok(self.dispatcher.hybrid().progress(&lab, &completed))
    }

    /// Whether the sandbox backend is reachable.
    pub async fn is_available(&self) -> bool {
        self.sessions.engine().is_available().await
    }

    /// Spawn the background session reaper.
    pub fn spawn_reaper(&self, config: &AppConfig) -> tokio::task::JoinHandle<()> {
        self.sessions.spawn_reaper(
            Duration::from_secs(config.session.reap_interval_seconds),
            Duration::from_secs(config.session.max_age_seconds),
        )
    }
}
