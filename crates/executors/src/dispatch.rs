//! Executor contract and format dispatch.

use async_trait::async_trait;
use std::sync::Arc;

use skillforge_core::config::SandboxSettings;
use skillforge_core::{ExecutionRequest, ExecutionResult, LabDefinition, LabFormat, Result};
use skillforge_sandbox::{SandboxSession, SessionManager};

use crate::code::CodeExecutor;
use crate::hybrid::HybridExecutor;
use crate::query::QueryExecutor;
use crate::terminal::TerminalExecutor;

// =============================================================================
// Executor Contract
// =============================================================================

/// Everything an executor needs for one execution: the lab definition and
/// the checked-out session. Session state is threaded through explicitly
/// rather than cached on the executor, so executors are stateless and
/// shared across all learners.
pub struct ExecutionContext {
    pub lab: Arc<LabDefinition>,
    pub session: Arc<SandboxSession>,
}

/// One lab modality's execution strategy.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run learner input against a step of the lab. Recoverable
    /// pre-flight failures come back as `Err` variants for the engine
    /// boundary to convert; a returned `ExecutionResult` may itself be
    /// a validation failure.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult>;
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Maps a resolved lab format to its executor instance.
pub struct ExecutorDispatcher {
    terminal: Arc<TerminalExecutor>,
    code: Arc<CodeExecutor>,
    query: Arc<QueryExecutor>,
    hybrid: Arc<HybridExecutor>,
}

impl ExecutorDispatcher {
    pub fn new(sessions: Arc<SessionManager>, settings: SandboxSettings) -> Self {
        let terminal = Arc::new(TerminalExecutor::new(sessions.clone(), settings.clone()));
        let code = Arc::new(CodeExecutor::new(sessions.engine().clone()));
        let query = Arc::new(QueryExecutor::new(sessions.clone()));
        let hybrid = Arc::new(HybridExecutor::new(
            terminal.clone(),
            code.clone(),
            query.clone(),
        ));
        Self {
            terminal,
            code,
            query,
            hybrid,
        }
    }

    /// Factory from format variant to executor.
    pub fn resolve(&self, format: LabFormat) -> Arc<dyn Executor> {
        match format {
            LabFormat::Terminal => self.terminal.clone(),
            LabFormat::Code => self.code.clone(),
            LabFormat::Query => self.query.clone(),
            LabFormat::Hybrid => self.hybrid.clone(),
        }
    }

    /// The hybrid executor, for per-type progress reporting.
    pub fn hybrid(&self) -> &Arc<HybridExecutor> {
        &self.hybrid
    }
}
