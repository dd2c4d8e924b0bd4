#![deny(unused)]
//! Core types, configuration, and error definitions for SkillForge.
//!
//! This crate provides the foundational building blocks shared across the
//! lab-execution engine: the lab data model, the typed error taxonomy, the
//! layered configuration loader, and the read-only lab registry.

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use error::{Error, Result};
pub use registry::LabRegistry;
pub use types::*;
