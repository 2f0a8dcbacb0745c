//! Assist Router: intent routing and conversation memory for a
//! multi-capability assistant.

pub mod api;
pub mod capabilities;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod memory;
pub mod router;
pub mod store;
