//! Free-form conversational responder.
//!
//! Unlike the classifier, the responder sees the full rendered history.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::capabilities::CapabilityOutput;
use crate::capabilities::dispatcher::TIMEOUT_ERROR;
use crate::context::RoutingContext;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant that responds to user queries in a conversational manner.";

/// Answers `conversation` tasks directly with the oracle.
pub struct ConversationResponder {
    llm: Arc<dyn LlmProvider>,
    temperature: f32,
    timeout: Option<Duration>,
}

impl ConversationResponder {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            temperature: 0.0,
            timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generate a reply. Oracle failures become a failed output with an
    /// apology, never an error.
    pub async fn respond(&self, query: &str, ctx: &RoutingContext) -> CapabilityOutput {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt(ctx)),
            ChatMessage::user(query),
        ])
        .with_temperature(self.temperature);

        let call = self.llm.complete(request);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    error!(?limit, "Conversation oracle timed out");
                    return CapabilityOutput::failure(
                        "I'm sorry, I took too long to respond. Please try again.",
                        TIMEOUT_ERROR,
                    );
                }
            },
            None => call.await,
        };

        match result {
            Ok(response) => {
                let text = response.into_text();
                debug!(chars = text.len(), "Conversation reply generated");
                CapabilityOutput::success(text)
            }
            Err(e) => {
                error!(error = %e, "Error handling conversation");
                CapabilityOutput::failure(
                    "I'm sorry, I encountered an error while processing your message. Please try again.",
                    e.to_string(),
                )
            }
        }
    }
}

fn build_system_prompt(ctx: &RoutingContext) -> String {
    if ctx.history.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }
    format!(
        "{SYSTEM_PROMPT}\n\nConversation history:\n{}",
        ctx.render_history()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use crate::store::{Interaction, Metadata};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoLlm {
        fail: bool,
        last_system: Mutex<String>,
    }

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            *self.last_system.lock().unwrap() = request.messages[0].content.clone();
            if self.fail {
                return Err(LlmError::AuthFailed {
                    provider: "echo".into(),
                });
            }
            Ok(CompletionResponse {
                content: format!("  you said: {}  ", request.messages[1].content),
                ..Default::default()
            })
        }
    }

    fn echo(fail: bool) -> Arc<EchoLlm> {
        Arc::new(EchoLlm {
            fail,
            last_system: Mutex::new(String::new()),
        })
    }

    #[tokio::test]
    async fn replies_without_history() {
        let llm = echo(false);
        let responder = ConversationResponder::new(llm.clone());
        let output = responder.respond("hello", &RoutingContext::default()).await;

        assert!(output.success);
        assert_eq!(output.response, "you said: hello");
        assert_eq!(*llm.last_system.lock().unwrap(), SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn history_is_rendered_into_system_prompt() {
        let llm = echo(false);
        let responder = ConversationResponder::new(llm.clone());
        let ctx = RoutingContext::new(
            "u1",
            "c1",
            vec![Interaction::new("Hello, my name is X", "Nice to meet you, X!", Metadata::new())],
            Metadata::new(),
        );

        responder.respond("What's my name?", &ctx).await;
        let system = llm.last_system.lock().unwrap().clone();
        assert!(system.starts_with(SYSTEM_PROMPT));
        assert!(system.contains("Conversation history:\nUser: Hello, my name is X\nAssistant: Nice to meet you, X!"));
    }

    #[tokio::test]
    async fn oracle_failure_becomes_apology() {
        let responder = ConversationResponder::new(echo(true));
        let output = responder.respond("hello", &RoutingContext::default()).await;

        assert!(!output.success);
        assert!(output.response.starts_with("I'm sorry"));
        assert!(!output.response.contains("Authentication"));
        assert!(output.error.unwrap().contains("Authentication failed"));
    }
}
