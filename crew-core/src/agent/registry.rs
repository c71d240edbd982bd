//! Agent registry
//!
//! The AgentRegistry is a read-only name → definition table:
//! - Built once from resolved definitions
//! - Enumerated in insertion order for coordinators
//! - Replaced wholesale on reload, never mutated in place

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::definition::AgentDefinition;
use crate::error::RegistryError;

/// Read-only lookup table of agent definitions
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    order: Vec<String>,
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// Build a registry, rejecting duplicate names
    pub fn from_definitions<I>(definitions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = AgentDefinition>,
    {
        let mut registry = Self::default();
        for definition in definitions {
            if registry.agents.contains_key(&definition.name) {
                return Err(RegistryError::DuplicateAgent(definition.name));
            }
            registry.order.push(definition.name.clone());
            registry
                .agents
                .insert(definition.name.clone(), Arc::new(definition));
        }
        Ok(registry)
    }

    /// Look up a definition by role name
    pub fn get(&self, name: &str) -> Result<Arc<AgentDefinition>, RegistryError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// All definitions in the order they were supplied
    pub fn all(&self) -> Vec<(String, Arc<AgentDefinition>)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.agents
                    .get(name)
                    .map(|def| (name.clone(), Arc::clone(def)))
            })
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Registry handle that supports atomic wholesale reload
///
/// Readers take a snapshot with [`SharedRegistry::current`]; a task keeps the
/// snapshot it started with even if the table is reloaded mid-flight.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<AgentRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Current snapshot of the table
    pub fn current(&self) -> Arc<AgentRegistry> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the whole table
    pub fn reload(&self, registry: AgentRegistry) {
        let next = Arc::new(registry);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!(agents = self.current().len(), "Agent registry reloaded");
    }
}
