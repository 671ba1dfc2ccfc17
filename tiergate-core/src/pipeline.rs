//! Generate → evaluate → gate loop.
//!
//! [`GatedPipeline`] ties a [`Manager`] to a [`QualityGate`]. `Improve`
//! verdicts re-run the request with the gate's hints appended. `Escalate`
//! verdicts re-run it on the recommended tier, never lower than one above
//! the tier that just answered. `Pass` and `Reject` end the loop, as does
//! reaching the gate's `max_attempts`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::llm::{
    ChatMessage, ChatRole, EscalationReason, GenerateOptions, Manager, Response, Tier,
};
use crate::quality::{GateDecision, QualityGate, Verdict};

/// One generate-and-gate round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineAttempt {
    pub attempt: u32,
    pub tier: Option<Tier>,
    pub provider: String,
    pub verdict: Verdict,
    pub score: f64,
}

/// Final response, the decision that ended the loop, and every round.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub response: Response,
    pub decision: GateDecision,
    pub attempts: Vec<PipelineAttempt>,
}

impl PipelineOutcome {
    pub fn passed(&self) -> bool {
        self.decision.passed()
    }
}

/// A manager whose responses are checked by a quality gate.
#[derive(Clone)]
pub struct GatedPipeline {
    manager: Arc<Manager>,
    gate: Arc<QualityGate>,
}

impl GatedPipeline {
    pub fn new(manager: Arc<Manager>, gate: Arc<QualityGate>) -> Self {
        Self { manager, gate }
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Run the loop for one request.
    #[instrument(skip(self, messages, options), fields(messages = messages.len()))]
    pub async fn run(&self, messages: &[ChatMessage], options: GenerateOptions) -> PipelineOutcome {
        let query = last_user_message(messages);
        let max_attempts = self.gate.config().max_attempts;
        let mut options = options;
        let mut hints: Vec<String> = Vec::new();
        let mut attempts = Vec::new();
        let mut attempt = 1;

        loop {
            let response = self
                .manager
                .generate_with_feedback(messages, &hints, options.clone())
                .await;
            let decision = self.gate.evaluate_response(&response, query, attempt);

            attempts.push(PipelineAttempt {
                attempt,
                tier: response.tier,
                provider: response.provider.clone(),
                verdict: decision.verdict,
                score: decision.report.overall_score,
            });

            let next_tier = match decision.verdict {
                Verdict::Pass | Verdict::Reject => None,
                Verdict::Improve => response.tier,
                Verdict::Escalate => escalation_target(response.tier, decision.recommended_tier),
            };

            let Some(next_tier) = next_tier.filter(|_| attempt < max_attempts) else {
                debug!(
                    attempts = attempt,
                    verdict = %decision.verdict,
                    score = decision.report.overall_score,
                    "pipeline finished"
                );
                return PipelineOutcome {
                    response,
                    decision,
                    attempts,
                };
            };

            if decision.verdict == Verdict::Escalate {
                info!(
                    to = %next_tier,
                    reason = %EscalationReason::QualityGate,
                    detail = decision.escalation_reason.as_deref().unwrap_or(""),
                    "escalating"
                );
                hints.clear();
            } else {
                hints = decision.improvement_hints.clone();
            }
            options = options.with_forced_tier(next_tier);
            attempt += 1;
        }
    }
}

/// The recommended tier, raised to at least one above `current`. `None` when
/// `current` is already the top tier.
fn escalation_target(current: Option<Tier>, recommended: Option<Tier>) -> Option<Tier> {
    let floor = match current {
        Some(tier) => tier.next()?,
        None => Tier::A,
    };
    Some(recommended.map_or(floor, |r| r.max(floor)))
}

fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.as_str())
}
