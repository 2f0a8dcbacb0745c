//! Per-request routing context.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Interaction, Metadata};

/// Caller context key signalling recent document activity.
pub const DOCUMENT_CONTEXT_KEY: &str = "document_context";

/// Caller context key signalling recent image activity.
pub const IMAGE_CONTEXT_KEY: &str = "image_context";

/// A retrieved document passage used to ground a `document_qa` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

/// Activity flags the classifier may see. Never the history text itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextFlags {
    pub document_activity: bool,
    pub image_activity: bool,
}

/// Everything one in-flight request knows about its conversation.
///
/// Owned by a single request; never shared between requests.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub user_id: String,
    pub conversation_id: String,
    /// Prior interactions, most recent last.
    pub history: Vec<Interaction>,
    /// Passages fetched by document enrichment during this request.
    pub document_context: Vec<Passage>,
    pub flags: ContextFlags,
    /// Caller-supplied context, passed through to providers untouched.
    pub extra: Metadata,
}

impl RoutingContext {
    /// Build a context, deriving activity flags from the caller context
    /// and from the task types recorded in `history`.
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        history: Vec<Interaction>,
        extra: Metadata,
    ) -> Self {
        let task_seen =
            |task: &str| history.iter().any(|i| i.task_type() == Some(task));

        let flags = ContextFlags {
            document_activity: is_set(&extra, DOCUMENT_CONTEXT_KEY) || task_seen("document_qa"),
            image_activity: is_set(&extra, IMAGE_CONTEXT_KEY) || task_seen("image_generation"),
        };

        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            history,
            document_context: Vec::new(),
            flags,
            extra,
        }
    }

    /// Attach enrichment passages. An empty set leaves the context unchanged.
    pub fn attach_documents(&mut self, passages: Vec<Passage>) {
        if passages.is_empty() {
            return;
        }
        self.document_context = passages;
        self.flags.document_activity = true;
    }

    /// Render the history as `User:`/`Assistant:` lines.
    pub fn render_history(&self) -> String {
        let mut out = String::new();
        for interaction in &self.history {
            out.push_str("User: ");
            out.push_str(&interaction.user_query);
            out.push('\n');
            out.push_str("Assistant: ");
            out.push_str(&interaction.assistant_response);
            out.push('\n');
        }
        out
    }
}

/// A caller-context entry counts only when it carries something: `null`,
/// `false`, `0` and empty strings, arrays or objects do not.
fn is_set(extra: &Metadata, key: &str) -> bool {
    match extra.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}
