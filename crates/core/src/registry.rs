//! Read-only registry of lab definitions.
//!
//! Lab content is authored outside the engine and handed over as YAML
//! files; the registry loads them once at startup and serves shared,
//! immutable references from then on.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::LabDefinition;

/// In-memory map of lab id to definition.
#[derive(Default)]
pub struct LabRegistry {
    labs: HashMap<String, Arc<LabDefinition>>,
}

impl LabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.yaml`/`.yml` file in a directory. Files that fail to
    /// parse are skipped with a warning rather than aborting startup.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut registry = Self::new();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::internal(format!("Failed to read lab directory {}: {}", dir.display(), e))
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }

            let raw = std::fs::read_to_string(&path).map_err(|e| {
                Error::internal(format!("Failed to read {}: {}", path.display(), e))
            })?;

            match serde_yaml::from_str::<LabDefinition>(&raw) {
                Ok(lab) => {
                    tracing::debug!(lab_id = %lab.id, file = %path.display(), "Loaded lab definition");
                    registry.insert(lab);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unparseable lab definition");
                }
            }
        }

        tracing::info!(count = registry.len(), dir = %dir.display(), "Lab registry loaded");
        Ok(registry)
    }

    pub fn insert(&mut self, lab: LabDefinition) {
        self.labs.insert(lab.id.clone(), Arc::new(lab));
    }

    pub fn get(&self, lab_id: &str) -> Result<Arc<LabDefinition>> {
        self.labs
            .get(lab_id)
            .cloned()
            .ok_or_else(|| Error::LabNotFound(lab_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.labs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_lab(id: &str) -> LabDefinition {
        serde_yaml::from_str(&format!("id: {}\ntitle: t\nformat: terminal", id)).unwrap()
    }

    #[test]
    fn get_returns_inserted_lab() {
        let mut registry = LabRegistry::new();
        registry.insert(minimal_lab("docker-101"));

        let lab = registry.get("docker-101").unwrap();
        assert_eq!(lab.id, "docker-101");
    }

    #[test]
    fn get_unknown_lab_is_an_error() {
        let registry = LabRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(Error::LabNotFound(_))
        ));
    }
}
