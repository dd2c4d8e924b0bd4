#![deny(unused)]
//! Sandbox layer for SkillForge.
//!
//! This crate provides the isolated execution environments that learner
//! input runs in: Docker containers with strict resource limits, no host
//! network access, and a read-only root filesystem, plus isolated
//! per-session database instances for query labs. Session lifecycle
//! (lazy provisioning, single-writer serialization, teardown, reaping)
//! lives here too.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  Executors (terminal / code / query)       │
//! │    ↓ checkout(lab, user)                   │
//! ├────────────────────────────────────────────┤
//! │  SessionManager (one session per lab+user) │
//! │    ↓ lazy provisioning                     │
//! ├────────────────────────────────────────────┤
//! │  SandboxEngine (DockerSandbox)             │
//! │  DatabaseEngine (PostgresSandbox)          │
//! │    ↓ Docker API via bollard                │
//! ├────────────────────────────────────────────┤
//! │  Container (isolated)                      │
//! │    /workspace  (tmpfs, writable)           │
//! │    No host network, no caps, pids capped   │
//! └────────────────────────────────────────────┘
//! ```

pub mod database;
pub mod engine;
pub mod session;

pub use database::{DatabaseEngine, DatabaseHandle, MockDatabase, PostgresSandbox};
pub use engine::{
    ContainerSpec, DockerSandbox, ExecOutput, MockSandbox, SandboxEngine, SandboxFile, SandboxId,
};
pub use session::{SandboxSession, SessionGuard, SessionKey, SessionManager};
