//! Rubric-based quality evaluation and gating.
//!
//! The [`Evaluator`] scores a response against a [`Rubric`] of discrete
//! questions grouped into dimensions. The [`QualityGate`] turns the resulting
//! [`RubricReport`] into a [`Verdict`]: pass it on, ask for an improved
//! answer, escalate to a stronger tier, or reject it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiergate_core::quality::{EvaluationInput, QualityGate, Verdict};
//!
//! let gate = QualityGate::physics()?;
//! let decision = gate.evaluate(
//!     &EvaluationInput::new(&answer).with_query("What is the escape velocity of Earth?"),
//!     1,
//! );
//! match decision.verdict {
//!     Verdict::Pass => println!("ok ({:.2})", decision.report.overall_score),
//!     Verdict::Improve => println!("retry with {:?}", decision.improvement_hints),
//!     Verdict::Escalate => println!("retry on {:?}", decision.recommended_tier),
//!     Verdict::Reject => println!("unusable"),
//! }
//! ```

mod checks;
mod code;
mod evaluator;
mod gate;
mod proptest;
mod rubric;

pub use code::{extract_fenced_code, scan as scan_code, CodeLanguage, CodeSample, CodeScan};
pub use evaluator::{
    Artefact, DimensionSummary, EvaluationInput, Evaluator, Grade, RubricReport, RubricScore,
    ScoringMethod, MAX_SUGGESTIONS, STRENGTH_THRESHOLD, WEAKNESS_THRESHOLD,
};
pub use gate::{
    GateConfig, GateDecision, GateRule, GateStats, QualityGate, Verdict, MAX_HINTS,
    SCORE_HISTORY_CAPACITY,
};
pub use rubric::{
    default_ladder, Dimension, EvaluationMethod, HeuristicRule, PatternRule, ProgrammaticCheck,
    Rubric, RubricBuilder, RubricQuestion, RuleTarget, ScoreLevel,
};
