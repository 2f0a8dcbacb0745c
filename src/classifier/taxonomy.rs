//! Task taxonomy and classification results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::Metadata;

/// Prefix of agent task labels, e.g. `agent_task:weather`.
pub const AGENT_TASK_PREFIX: &str = "agent_task:";

// ── Task type ───────────────────────────────────────────────────────

/// Top-level routable intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DocumentQa,
    ImageGeneration,
    AgentTask,
    Conversation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentQa => "document_qa",
            Self::ImageGeneration => "image_generation",
            Self::AgentTask => "agent_task",
            Self::Conversation => "conversation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_qa" => Ok(Self::DocumentQa),
            "image_generation" => Ok(Self::ImageGeneration),
            "agent_task" => Ok(Self::AgentTask),
            "conversation" => Ok(Self::Conversation),
            other => Err(format!("unknown task type '{other}'")),
        }
    }
}

// ── Classification result ───────────────────────────────────────────

/// The classifier's routing decision for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub task_type: TaskType,
    /// Capability name for `agent_task`, empty otherwise.
    pub capability: String,
    pub parameters: Metadata,
}

impl ClassificationResult {
    /// The safety-net decision: plain conversation, no parameters.
    pub fn fallback() -> Self {
        Self {
            task_type: TaskType::Conversation,
            capability: String::new(),
            parameters: Metadata::new(),
        }
    }

    /// Split a taxonomy label into task type and capability.
    ///
    /// Returns `None` for labels that name no known task type.
    pub fn from_label(label: &str, parameters: Metadata) -> Option<Self> {
        let (task_type, capability) = match label.strip_prefix(AGENT_TASK_PREFIX) {
            Some(capability) if !capability.is_empty() => {
                (TaskType::AgentTask, capability.to_string())
            }
            Some(_) => return None,
            None => match label.parse::<TaskType>().ok()? {
                TaskType::AgentTask => return None,
                task_type => (task_type, String::new()),
            },
        };
        Some(Self {
            task_type,
            capability,
            parameters,
        })
    }
}

// ── Taxonomy ────────────────────────────────────────────────────────

/// One routable label with the description shown to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub label: String,
    pub description: String,
}

/// The closed set of labels the classifier may emit.
///
/// Agent capabilities can be added from configuration; the four task
/// families are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTaxonomy {
    entries: Vec<TaskEntry>,
}

impl Default for TaskTaxonomy {
    fn default() -> Self {
        let defaults = [
            (
                "document_qa",
                "Answering questions about documents, searching for information in documents, summarizing documents",
            ),
            (
                "image_generation",
                "Generating images, creating pictures, visualizing concepts",
            ),
            (
                "agent_task:weather",
                "Weather forecasts, current weather conditions, temperature checks for locations",
            ),
            (
                "agent_task:sql",
                "Database queries, retrieving or manipulating data in databases",
            ),
            (
                "agent_task:recommender",
                "Recommendation of events, based on weather information for provided location, user preference and event availability in the database",
            ),
            (
                "conversation",
                "General conversation, chitchat, questions that don't fit into other categories",
            ),
        ];

        Self {
            entries: defaults
                .into_iter()
                .map(|(label, description)| TaskEntry {
                    label: label.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        }
    }
}

impl TaskTaxonomy {
    /// Add (or re-describe) an `agent_task:<name>` entry.
    ///
    /// New agents are inserted before `conversation` so the catch-all
    /// stays last in the prompt.
    pub fn with_agent(mut self, name: &str, description: &str) -> Self {
        let name = name.trim();
        if name.is_empty() {
            return self;
        }
        let label = format!("{AGENT_TASK_PREFIX}{name}");

        if let Some(entry) = self.entries.iter_mut().find(|e| e.label == label) {
            entry.description = description.to_string();
            return self;
        }

        let at = self
            .entries
            .iter()
            .position(|e| e.label == TaskType::Conversation.as_str())
            .unwrap_or(self.entries.len());
        self.entries.insert(
            at,
            TaskEntry {
                label,
                description: description.to_string(),
            },
        );
        self
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    pub fn entries(&self) -> &[TaskEntry] {
        &self.entries
    }

    /// Agent capability names in the taxonomy.
    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter_map(|e| e.label.strip_prefix(AGENT_TASK_PREFIX))
    }

    /// `- label: description` lines for the system prompt.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- {}: {}", e.label, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
