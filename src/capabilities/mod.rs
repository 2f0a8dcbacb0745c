//! Capability providers and their uniform invocation.
//!
//! A capability answers one class of request (weather, SQL, document QA,
//! image generation, ...). Every provider is called through the same
//! `process` contract; the `Dispatcher` normalizes whatever happens into a
//! `CapabilityOutput`.

pub mod conversation;
pub mod dispatcher;
pub mod registry;
pub mod weather;

pub use conversation::ConversationResponder;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::CapabilityRegistry;
pub use weather::WeatherCapability;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{Passage, RoutingContext};
use crate::error::CapabilityError;
use crate::store::Metadata;

/// Normalized result of a capability call.
///
/// `data` is opaque and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapabilityOutput {
    pub fn success(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            data: None,
            success: true,
            error: None,
        }
    }

    pub fn failure(response: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            data: None,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A provider answering one class of request.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry key, e.g. `weather`.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// Answer `query` using the classifier's extracted `params`.
    ///
    /// A provider may report failure either as `Ok` with `success = false`
    /// or as an `Err`; the dispatcher treats both the same way.
    async fn process(
        &self,
        query: &str,
        params: &Metadata,
        ctx: &RoutingContext,
    ) -> Result<CapabilityOutput, CapabilityError>;
}

/// Retrieves passages relevant to a query for document QA enrichment.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, CapabilityError>;
}
