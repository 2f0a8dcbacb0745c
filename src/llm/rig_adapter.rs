//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{Chat, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// `LlmProvider` backed by any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let split = split_messages(request.messages)?;

        let mut builder = AgentBuilder::new(self.model.clone());
        if !split.preamble.is_empty() {
            builder = builder.preamble(&split.preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        let agent = builder.build();

        let history = split
            .history
            .into_iter()
            .map(|m| match m.role {
                Role::Assistant => Message::assistant(m.content),
                _ => Message::user(m.content),
            })
            .collect::<Vec<_>>();

        let content = agent
            .chat(split.prompt, history)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

/// Messages rearranged into rig's agent shape.
#[derive(Debug, PartialEq, Eq)]
struct SplitMessages {
    preamble: String,
    history: Vec<ChatMessage>,
    prompt: String,
}

/// System messages become the preamble, the trailing user message becomes
/// the prompt, everything in between is chat history.
fn split_messages(messages: Vec<ChatMessage>) -> Result<SplitMessages, LlmError> {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        if message.role == Role::System {
            system.push(message.content);
        } else {
            rest.push(message);
        }
    }

    match rest.pop() {
        Some(last) if last.role == Role::User => Ok(SplitMessages {
            preamble: system.join("\n\n"),
            history: rest,
            prompt: last.content,
        }),
        _ => Err(LlmError::EmptyPrompt),
    }
}
