//! Capability registry: explicit mapping from task to provider.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::capabilities::Capability;
use crate::classifier::TaskType;

/// Providers known to the dispatcher.
///
/// Agent capabilities are keyed by their own name; `document_qa` and
/// `image_generation` each have a single family provider.
pub struct CapabilityRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Capability>>>,
    families: RwLock<HashMap<TaskType, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent capability under its own name, replacing any
    /// previous provider with that name.
    pub async fn register_agent(&self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if self
            .agents
            .write()
            .await
            .insert(name.clone(), capability)
            .is_some()
        {
            tracing::warn!(capability = %name, "Replaced existing agent capability");
        }
        tracing::debug!("Registered agent capability: {}", name);
    }

    /// Register the provider for a task family.
    ///
    /// Only `document_qa` and `image_generation` have family providers;
    /// anything else is rejected.
    pub async fn register_family(&self, task_type: TaskType, capability: Arc<dyn Capability>) -> bool {
        if !matches!(task_type, TaskType::DocumentQa | TaskType::ImageGeneration) {
            tracing::warn!(
                task_type = %task_type,
                capability = capability.name(),
                "Rejected family registration: task type has no family provider"
            );
            return false;
        }
        self.families.write().await.insert(task_type, capability);
        tracing::debug!("Registered {} provider", task_type);
        true
    }

    /// Get an agent capability by name.
    pub async fn agent(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.agents.read().await.get(name).cloned()
    }

    /// Get the provider of a task family.
    pub async fn family(&self, task_type: TaskType) -> Option<Arc<dyn Capability>> {
        self.families.read().await.get(&task_type).cloned()
    }

    /// Registered agent names, sorted.
    pub async fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
