//! Oracle integration.
//!
//! Every call the router makes to a language model goes through the
//! `LlmProvider` trait. `create_provider` builds one from a rig-core client
//! for the configured backend and wraps it in a `RigAdapter`.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::fmt;
use std::sync::Arc;

use rig::client::CompletionClient;
use rig::providers::{anthropic, openai};
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Oracle backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown LLM backend '{other}'")),
        }
    }
}

/// Which model to talk to, and with what credential.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

/// Build the oracle for `config`. No request is made here; a bad key only
/// shows up on the first completion.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let key = config.api_key.expose_secret();
    let model = config.model.as_str();

    let provider: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::OpenAi => {
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            Arc::new(RigAdapter::new(client.completion_model(model), model))
        }
        LlmBackend::Anthropic => {
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            Arc::new(RigAdapter::new(client.completion_model(model), model))
        }
    };

    tracing::info!(backend = %config.backend, model, "Oracle provider ready");
    Ok(provider)
}

fn client_error(backend: LlmBackend, e: impl fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: backend.to_string(),
        reason: format!("could not build {backend} client: {e}"),
    }
}
