use serde::{Deserialize, Serialize};

use super::lab::ExecutionType;

/// An execution request as submitted by the terminal-rendering collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Lab being attempted.
    pub lab_id: String,

    /// Identity of the attempt owner; sessions are keyed on
    /// (lab, session_id).
    pub session_id: String,

    /// Raw learner input: a shell command, a source file, or a SQL query.
    pub input: String,

    #[serde(default)]
    pub step_index: usize,

    /// Explicit modality override; only meaningful for hybrid labs.
    #[serde(default)]
    pub execution_type: Option<ExecutionType>,

    /// Per-request timeout override.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}
