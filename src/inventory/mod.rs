//! Build server inventory
//!
//! The `[[build_server]]` entries of the orchestrator configuration. Each
//! entry describes one executor the orchestrator may dispatch builds to.
//! The inventory is read-only after configuration load.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single build server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorDescriptor {
    /// Unique identifier for this executor
    pub name: String,

    /// `host:port` of the executor listener
    pub address: String,

    /// Shared token presented in `auth`
    pub token: String,

    /// Architecture/platform labels (e.g. ["x86_64", "linux"])
    #[serde(default)]
    pub tags: Vec<String>,

    /// Disabled entries are never selected
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ExecutorDescriptor {
    /// Whether this executor can build for `arch`.
    pub fn serves(&self, arch: &str) -> bool {
        self.enabled && self.tags.iter().any(|tag| tag == arch)
    }
}

/// Errors found while validating the inventory
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Duplicate build server name: '{0}'")]
    DuplicateName(String),

    #[error("Build server '{name}': '{field}' must not be empty")]
    EmptyField { name: String, field: &'static str },
}

/// The configured build servers, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ExecutorInventory {
    executors: Vec<ExecutorDescriptor>,
}

impl ExecutorInventory {
    pub fn new(executors: Vec<ExecutorDescriptor>) -> Result<Self, InventoryError> {
        let inventory = Self { executors };
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<(), InventoryError> {
        let mut seen = HashSet::new();
        for executor in &self.executors {
            if !seen.insert(executor.name.as_str()) {
                return Err(InventoryError::DuplicateName(executor.name.clone()));
            }
            for (field, value) in [("address", &executor.address), ("token", &executor.token)] {
                if value.trim().is_empty() {
                    return Err(InventoryError::EmptyField {
                        name: executor.name.clone(),
                        field,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn all(&self) -> &[ExecutorDescriptor] {
        &self.executors
    }

    pub fn get(&self, name: &str) -> Option<&ExecutorDescriptor> {
        self.executors.iter().find(|e| e.name == name)
    }

    /// Enabled executors tagged with `arch`, in configuration order.
    pub fn candidates_for<'a>(&'a self, arch: &'a str) -> impl Iterator<Item = &'a ExecutorDescriptor> + 'a {
        self.executors.iter().filter(move |e| e.serves(arch))
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
