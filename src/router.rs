//! Request router: the per-request orchestrator.
//!
//! START → HISTORY_LOADED → CLASSIFIED → DISPATCHED → RECORDED → DONE.
//! Nothing survives between requests except what Conversation Memory
//! persists.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capabilities::{ConversationResponder, Dispatcher};
use crate::classifier::{IntentClassifier, TaskType};
use crate::context::RoutingContext;
use crate::error::RouterError;
use crate::memory::ConversationMemory;
use crate::store::Metadata;

/// Default number of prior interactions loaded per request.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Interactions loaded into the routing context.
    pub history_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Core dependencies for the router.
///
/// Bundles the shared components to reduce argument count.
pub struct RouterDeps {
    pub memory: Arc<ConversationMemory>,
    pub classifier: Arc<IntentClassifier>,
    pub dispatcher: Arc<Dispatcher>,
    pub responder: Arc<ConversationResponder>,
}

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Start,
    HistoryLoaded,
    Classified,
    Dispatched,
    Recorded,
    Done,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::HistoryLoaded => "history_loaded",
            Self::Classified => "classified",
            Self::Dispatched => "dispatched",
            Self::Recorded => "recorded",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// What callers of `process_request` receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterResponse {
    pub content: String,
    pub conversation_id: String,
    pub components_used: Vec<String>,
    pub task_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Routes requests through memory, classifier and capabilities.
pub struct RequestRouter {
    config: RouterConfig,
    deps: RouterDeps,
}

impl RequestRouter {
    pub fn new(config: RouterConfig, deps: RouterDeps) -> Self {
        Self { config, deps }
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.deps.memory
    }

    /// Handle one request.
    ///
    /// Every failure except a classification failure is reported inside the
    /// response (`success = false`). A classification failure aborts the
    /// request; the router never guesses a route.
    pub async fn process_request(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        context: Option<Metadata>,
    ) -> Result<RouterResponse, RouterError> {
        let mut state = RequestState::Start;
        debug!(%state, user_id, "Request received");

        let conversation_id = match conversation_id {
            Some(id) => id.to_string(),
            None => match self.deps.memory.create_conversation(user_id).await {
                Ok(id) => id,
                Err(e) => {
                    error!(user_id, error = %e, "Failed to create conversation");
                    return Ok(RouterResponse {
                        content: "I'm sorry, I couldn't start a new conversation. Please try again."
                            .to_string(),
                        conversation_id: String::new(),
                        components_used: Vec::new(),
                        task_type: String::new(),
                        success: false,
                        error: Some(e.to_string()),
                        data: None,
                    });
                }
            },
        };

        let history = match self
            .deps
            .memory
            .get_history(&conversation_id, Some(self.config.history_window))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to load history; continuing without it"
                );
                Vec::new()
            }
        };
        let mut ctx = RoutingContext::new(
            user_id,
            &conversation_id,
            history,
            context.unwrap_or_default(),
        );
        state = self.advance(state, RequestState::HistoryLoaded, &conversation_id);

        let classification = self
            .deps
            .classifier
            .classify(query, &ctx)
            .await
            .inspect_err(|e| {
                error!(conversation_id = %conversation_id, error = %e, "Classification failed");
            })?;
        state = self.advance(state, RequestState::Classified, &conversation_id);
        info!(
            conversation_id = %conversation_id,
            task_type = %classification.task_type,
            capability = %classification.capability,
            "Routing request"
        );

        let (content, output, components_used) = match classification.task_type {
            TaskType::Conversation => {
                let output = self.deps.responder.respond(query, &ctx).await;
                (
                    output.response.clone(),
                    output,
                    vec![TaskType::Conversation.as_str().to_string()],
                )
            }
            _ => {
                let outcome = self
                    .deps
                    .dispatcher
                    .dispatch(&classification, query, &mut ctx)
                    .await;
                (outcome.content, outcome.output, outcome.components_used)
            }
        };
        state = self.advance(state, RequestState::Dispatched, &conversation_id);

        let task_type = classification.task_type.as_str().to_string();
        let mut metadata = Metadata::new();
        metadata.insert("task_type".into(), task_type.clone().into());
        metadata.insert(
            "components_used".into(),
            serde_json::Value::from(components_used.clone()),
        );

        if !self
            .deps
            .memory
            .add_interaction(&conversation_id, query, &content, metadata)
            .await
        {
            warn!(
                conversation_id = %conversation_id,
                "Interaction was not recorded; returning response anyway"
            );
        }
        state = self.advance(state, RequestState::Recorded, &conversation_id);

        let response = RouterResponse {
            content,
            conversation_id,
            components_used,
            task_type,
            success: output.success,
            error: output.error,
            data: output.data,
        };
        self.advance(state, RequestState::Done, &response.conversation_id);
        Ok(response)
    }

    fn advance(&self, from: RequestState, to: RequestState, conversation_id: &str) -> RequestState {
        debug!(conversation_id, %from, %to, "Request state transition");
        to
    }
}
