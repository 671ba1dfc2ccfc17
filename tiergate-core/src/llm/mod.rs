//! Tiered generation across a local and a remote backend.
//!
//! Requests are routed to one of three tiers, served by the local backend when
//! it is healthy and preferred, and fall back to the remote backend otherwise.
//! Weak or failed responses climb one tier at a time, bounded per request.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tiergate_core::llm::{
//!     BackendConfig, ChatMessage, GenerateOptions, LocalBackend, Manager, ManagerConfig,
//!     RemoteBackend,
//! };
//!
//! let local = LocalBackend::new(BackendConfig::new(LocalBackend::DEFAULT_BASE_URL))?;
//! let remote = RemoteBackend::new(
//!     BackendConfig::new(RemoteBackend::DEFAULT_BASE_URL).with_api_key("sk-..."),
//! )?;
//!
//! let manager = Manager::builder(ManagerConfig::default())
//!     .local(Arc::new(local))
//!     .remote(Arc::new(remote))
//!     .build()?;
//!
//! let response = manager
//!     .generate(&[ChatMessage::user("Derive the escape velocity")], GenerateOptions::new())
//!     .await;
//! if response.is_error() {
//!     eprintln!("generation failed: {:?}", response.error);
//! }
//! ```

mod backend;
mod config;
mod health;
mod manager;
mod router;
mod types;

pub use backend::{Backend, BackendConfig, BackendKind, LocalBackend, RemoteBackend};
pub use config::{ManagerConfig, TierConfig, TierTable, DEFAULT_LOW_CONFIDENCE_PHRASES};
pub use health::{HealthCache, HealthStatus, PROBE_TIMEOUT};
pub use manager::{GenerateOptions, Manager, ManagerBuilder, ManagerStats};
pub use router::{
    ComplexityBuckets, EscalationReason, RouteDecision, RouteSource, Router, RouterConfig,
    RouterStats, TaskType,
};
pub use types::{
    estimate_tokens, ChatMessage, ChatRole, FinishReason, GenerationParams, Response, Tier,
    TokenUsage, ToolDefinition, NO_PROVIDER,
};
