//! # tiergate-core
//!
//! Multi-tier LLM request routing with local→remote fallback, bounded tier
//! escalation, and rubric-based quality gating.
//!
//! ## Core Components
//!
//! - **Router**: Classifies a request and picks tier A, B, or C
//! - **Manager**: Serves the tier from the local backend, falls back to the
//!   remote one, and escalates weak answers one tier at a time
//! - **Evaluator**: Scores a response against a rubric of discrete questions
//! - **QualityGate**: Turns a score report into pass / improve / escalate / reject
//! - **GatedPipeline**: Runs generation and gating together until an answer
//!   passes or attempts run out
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tiergate_core::{
//!     BackendConfig, ChatMessage, GatedPipeline, GenerateOptions, LocalBackend, Manager,
//!     ManagerConfig, QualityGate,
//! };
//!
//! let local = LocalBackend::new(BackendConfig::new(LocalBackend::DEFAULT_BASE_URL))?;
//! let manager = Manager::builder(ManagerConfig::default())
//!     .local(Arc::new(local))
//!     .build()?;
//!
//! let pipeline = GatedPipeline::new(Arc::new(manager), Arc::new(QualityGate::physics()?));
//! let outcome = pipeline
//!     .run(&[ChatMessage::user("Derive the escape velocity of Earth")], GenerateOptions::new())
//!     .await;
//!
//! if outcome.passed() {
//!     println!("{}", outcome.response.content);
//! }
//! ```

pub mod error;
pub mod llm;
pub mod pipeline;
pub mod quality;
pub mod shared;

// Re-exports for convenience
pub use error::{Error, Result};
pub use llm::{
    Backend, BackendConfig, BackendKind, ChatMessage, ChatRole, EscalationReason, FinishReason,
    GenerateOptions, GenerationParams, HealthStatus, LocalBackend, Manager, ManagerConfig,
    ManagerStats, RemoteBackend, Response, RouteDecision, RouteSource, Router, RouterConfig,
    RouterStats, TaskType, Tier, TierConfig, TierTable, TokenUsage, ToolDefinition,
};
pub use pipeline::{GatedPipeline, PipelineAttempt, PipelineOutcome};
pub use quality::{
    Artefact, Dimension, DimensionSummary, EvaluationInput, EvaluationMethod, Evaluator,
    GateConfig, GateDecision, GateStats, Grade, QualityGate, Rubric, RubricQuestion,
    RubricReport, RubricScore, ScoreLevel, Verdict,
};
