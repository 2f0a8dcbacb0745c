//! Error types for the assistant router.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Classification error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conversation store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidId(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conversation memory errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Failed to persist conversation {id}: {source}")]
    Persist {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to read conversations: {0}")]
    Read(#[from] StoreError),
}

/// LLM (oracle) provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Request must contain at least one user message")]
    EmptyPrompt,
}

/// Errors raised by a capability provider.
///
/// These never escape the dispatcher; they are folded into a failed
/// `CapabilityOutput`.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Failed(String),
}

/// Classification failures that must reach the router.
///
/// Malformed oracle output is not an error; it degrades to `conversation`.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classification oracle failed: {0}")]
    Oracle(#[from] LlmError),

    #[error("Classification oracle timed out after {0:?}")]
    Timeout(Duration),
}

/// Hard failures of a routed request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Failed to classify query: {0}")]
    Classification(#[from] ClassifierError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
