#![deny(unused)]
//! Lab executors for SkillForge.
//!
//! One executor per lab modality (terminal commands, code submissions,
//! SQL queries) plus a hybrid executor that infers the modality of each
//! step and delegates. The `LabEngine` facade ties them together: it
//! resolves the lab, checks the session out, dispatches, and converts
//! every failure into a structured result so the learner always receives
//! a response.

pub mod code;
pub mod dispatch;
pub mod engine;
pub mod hybrid;
pub mod query;
pub mod terminal;

pub use code::CodeExecutor;
pub use dispatch::{ExecutionContext, Executor, ExecutorDispatcher};
pub use engine::LabEngine;
pub use hybrid::{HybridExecutor, HybridProgress, TypeProgress};
pub use query::QueryExecutor;
pub use terminal::TerminalExecutor;
