//! Error types for SkillForge.

use thiserror::Error;

/// Result type alias using SkillForge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the lab-execution engine.
///
/// Each failure mode of an execution attempt is a distinct variant so
/// callers can branch on kind. Recoverable variants are converted into
/// structured failed results at the engine boundary; attempt-fatal
/// variants tear the session down so the next request provisions fresh.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Pre-flight Errors (recoverable; learner can retry)
    // =========================================================================
    #[error("Invalid step index: {0}")]
    InvalidStep(usize),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("Sandbox provisioning failed: {0}")]
    SandboxProvisioning(String),

    #[error("Execution timed out after {0} seconds")]
    ExecutionTimeout(u64),

    #[error("Execution failed: {0}")]
    RuntimeFailure(String),

    // =========================================================================
    // Validation & Session Errors
    // =========================================================================
    #[error("Validation mismatch: {0}")]
    ValidationMismatch(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Lab not found: {0}")]
    LabNotFound(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a syntax error.
    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    /// Create a security violation error.
    pub fn security_violation(msg: impl Into<String>) -> Self {
        Self::SecurityViolation(msg.into())
    }

    /// Create a sandbox provisioning error.
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::SandboxProvisioning(msg.into())
    }

    /// Create a runtime failure.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::RuntimeFailure(msg.into())
    }

    /// Create a session busy error.
    pub fn session_busy(msg: impl Into<String>) -> Self {
        Self::SessionBusy(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error ends the attempt: the owning session must be
    /// destroyed and a fresh one provisioned on the next request.
    pub fn is_attempt_fatal(&self) -> bool {
        matches!(
            self,
            Self::SandboxProvisioning(_) | Self::ExecutionTimeout(_)
        )
    }
}
