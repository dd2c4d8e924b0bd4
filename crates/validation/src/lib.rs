#![deny(unused)]
//! Validation engine for SkillForge.
//!
//! A small library of comparison strategies applied to learner input and
//! captured output. Everything here is pure and deterministic: validating
//! the same arguments twice always yields the same outcome, and nothing
//! mutates hidden state.

pub mod rules;
pub mod strategy;

pub use rules::{validate_output, validate_result};
pub use strategy::{normalize_sql, parse_command, validate, ParsedCommand};
