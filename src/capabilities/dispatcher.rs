//! Dispatcher: uniform, failure-contained invocation of capabilities.
//!
//! Nothing a provider does (error, failure report, panic, hang) escapes
//! `dispatch`; it always produces a `DispatchOutcome`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::capabilities::{Capability, CapabilityOutput, CapabilityRegistry, ContextRetriever};
use crate::classifier::{ClassificationResult, TaskType};
use crate::context::RoutingContext;

/// Default number of passages fetched for document enrichment.
pub const DEFAULT_DOCUMENT_TOP_K: usize = 5;

/// Error text for a provider call that exceeded its time budget.
pub const TIMEOUT_ERROR: &str = "request timed out";

/// Component id recorded when document enrichment contributed passages.
pub const DOCUMENT_CONTEXT_COMPONENT: &str = "document_context";

/// Component id recorded for image generation.
pub const IMAGE_COMPONENT: &str = "image_gen";

/// What a dispatch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// User-facing text.
    pub content: String,
    /// The normalized provider output.
    pub output: CapabilityOutput,
    /// Components that participated, task type first.
    pub components_used: Vec<String>,
}

/// Invokes capabilities on behalf of the router.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    document_top_k: usize,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            retriever: None,
            document_top_k: DEFAULT_DOCUMENT_TOP_K,
            timeout: None,
        }
    }

    /// Passage retriever used to enrich `document_qa` requests.
    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Number of passages requested from the retriever.
    pub fn with_document_top_k(mut self, top_k: usize) -> Self {
        self.document_top_k = top_k;
        self
    }

    /// Upper bound on each provider call and on enrichment.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Dispatch a classified request.
    ///
    /// `document_qa` enrichment writes retrieved passages into `ctx`.
    pub async fn dispatch(
        &self,
        classification: &ClassificationResult,
        query: &str,
        ctx: &mut RoutingContext,
    ) -> DispatchOutcome {
        let task_type = classification.task_type;
        let mut components_used = vec![task_type.as_str().to_string()];

        let (content, output) = match task_type {
            TaskType::DocumentQa => {
                if self.enrich_documents(query, ctx).await {
                    components_used.push(DOCUMENT_CONTEXT_COMPONENT.to_string());
                }
                let output = match self.registry.family(task_type).await {
                    Some(provider) => {
                        self.invoke(&provider, query, classification, ctx).await
                    }
                    None => missing_family(task_type, "answer questions about documents"),
                };
                (output.response.clone(), output)
            }

            TaskType::ImageGeneration => {
                components_used.push(IMAGE_COMPONENT.to_string());
                let output = match self.registry.family(task_type).await {
                    Some(provider) => {
                        self.invoke(&provider, query, classification, ctx).await
                    }
                    None => missing_family(task_type, "generate images"),
                };
                (image_summary(&output), output)
            }

            TaskType::AgentTask => {
                let name = classification.capability.as_str();
                components_used.push(format!("agent:{name}"));
                let output = match self.registry.agent(name).await {
                    Some(provider) => {
                        info!(capability = name, "Routing task to agent capability");
                        let output = self.invoke(&provider, query, classification, ctx).await;
                        tag_agent(output, name)
                    }
                    None => {
                        warn!(capability = name, "Agent type not found");
                        CapabilityOutput::failure(
                            format!("I'm sorry, but I don't have a {name} capability."),
                            format!("Agent type not found: {name}"),
                        )
                    }
                };
                (output.response.clone(), output)
            }

            TaskType::Conversation => {
                error!("Conversation tasks are answered by the responder, not dispatched");
                let output = CapabilityOutput::failure(
                    "I'm sorry, I couldn't handle that request.",
                    "conversation tasks are not dispatchable",
                );
                (output.response.clone(), output)
            }
        };

        debug!(
            task_type = %task_type,
            success = output.success,
            components = ?components_used,
            "Dispatch complete"
        );

        DispatchOutcome {
            content,
            output,
            components_used,
        }
    }

    /// Best-effort passage retrieval. Returns whether passages were attached.
    async fn enrich_documents(&self, query: &str, ctx: &mut RoutingContext) -> bool {
        let Some(retriever) = &self.retriever else {
            return false;
        };

        let call = retriever.retrieve(query, self.document_top_k);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?limit, "Document enrichment timed out; continuing without it");
                    return false;
                }
            },
            None => call.await,
        };

        match result {
            Ok(passages) if !passages.is_empty() => {
                debug!(passages = passages.len(), "Attached document context");
                ctx.attach_documents(passages);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Error retrieving document context; continuing without it");
                false
            }
        }
    }

    /// Call a provider with panic and timeout containment.
    async fn invoke(
        &self,
        provider: &Arc<dyn Capability>,
        query: &str,
        classification: &ClassificationResult,
        ctx: &RoutingContext,
    ) -> CapabilityOutput {
        let name = provider.name().to_string();
        let call = AssertUnwindSafe(provider.process(query, &classification.parameters, ctx))
            .catch_unwind();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(capability = %name, ?limit, "Capability timed out");
                    return CapabilityOutput::failure(
                        format!("I'm sorry, your {name} request timed out."),
                        TIMEOUT_ERROR,
                    );
                }
            },
            None => call.await,
        };

        match result {
            Ok(Ok(output)) => normalize(output, &name),
            Ok(Err(e)) => {
                error!(capability = %name, error = %e, "Capability failed");
                CapabilityOutput::failure(
                    format!("I encountered an error while processing your {name} request."),
                    e.to_string(),
                )
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(capability = %name, panic = %message, "Capability panicked");
                CapabilityOutput::failure(
                    format!("I encountered an error while processing your {name} request."),
                    format!("capability panicked: {message}"),
                )
            }
        }
    }
}

/// A reported failure always carries a non-empty error.
fn normalize(mut output: CapabilityOutput, name: &str) -> CapabilityOutput {
    if !output.success && output.error.as_deref().is_none_or(str::is_empty) {
        output.error = Some(format!("{name} reported a failure"));
    }
    output
}

/// Mark a successful agent result with the agent that produced it.
fn tag_agent(mut output: CapabilityOutput, name: &str) -> CapabilityOutput {
    if !output.success {
        return output;
    }
    match &mut output.data {
        Some(serde_json::Value::Object(map)) => {
            map.insert("agent_type".into(), name.into());
        }
        None => {
            output.data = Some(serde_json::json!({ "agent_type": name }));
        }
        Some(_) => {}
    }
    output
}

fn image_summary(output: &CapabilityOutput) -> String {
    if output.success {
        format!("Image generated successfully. {}", output.response)
    } else {
        format!(
            "Failed to generate image: {}",
            output.error.as_deref().unwrap_or("Unknown error")
        )
    }
}

fn missing_family(task_type: TaskType, ability: &str) -> CapabilityOutput {
    warn!(task_type = %task_type, "No provider registered for task family");
    CapabilityOutput::failure(
        format!("I'm sorry, but I can't {ability} right now."),
        format!("No provider registered for {task_type}"),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
