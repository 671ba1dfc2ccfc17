//! Quality gate: turns a rubric report into a verdict.
//!
//! Decision policy, first match wins:
//!
//! 1. Empty response or failed generation: `Reject`
//! 2. A critical dimension below the critical minimum: `Improve` while
//!    attempts remain, then `Escalate`, whatever the overall score
//! 3. Overall at or above the pass threshold with every gate passed: `Pass`
//! 4. Overall at or above the pass threshold with at most one failed gate: `Pass`
//! 5. Overall below the escalate threshold: `Escalate`
//! 6. Otherwise `Improve` while attempts remain, then `Escalate`

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use super::evaluator::{EvaluationInput, Evaluator, RubricReport, WEAKNESS_THRESHOLD};
use super::rubric::Dimension;
use crate::error::{Error, Result};
use crate::llm::{Response, Tier};

/// Maximum improvement hints per decision.
pub const MAX_HINTS: usize = 5;
/// Scores kept for the rolling average.
pub const SCORE_HISTORY_CAPACITY: usize = 100;

/// Gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub pass_threshold: f64,
    pub escalate_threshold: f64,
    /// Floor for critical dimensions regardless of the overall score
    pub critical_minimum: f64,
    pub max_attempts: u32,
    pub critical_dimensions: Vec<Dimension>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.65,
            escalate_threshold: 0.35,
            critical_minimum: 0.4,
            max_attempts: 2,
            critical_dimensions: vec![Dimension::Accuracy],
        }
    }
}

impl GateConfig {
    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    pub fn with_escalate_threshold(mut self, threshold: f64) -> Self {
        self.escalate_threshold = threshold;
        self
    }

    pub fn with_critical_minimum(mut self, minimum: f64) -> Self {
        self.critical_minimum = minimum;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_critical_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.critical_dimensions = dimensions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.pass_threshold)
            || !in_range(self.escalate_threshold)
            || !in_range(self.critical_minimum)
        {
            return Err(Error::config("gate thresholds must lie in [0, 1]"));
        }
        if self.escalate_threshold > self.pass_threshold {
            return Err(Error::config(format!(
                "escalate threshold {} exceeds pass threshold {}",
                self.escalate_threshold, self.pass_threshold
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Improve,
    Escalate,
    Reject,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Improve => "improve",
            Self::Escalate => "escalate",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which policy rule produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    Unusable,
    CriticalDimension,
    HighQuality,
    Borderline,
    VeryLowQuality,
    AttemptsRemaining,
    AttemptsExhausted,
}

/// Verdict plus everything needed to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub verdict: Verdict,
    pub rule: GateRule,
    pub report: RubricReport,
    pub improvement_hints: Vec<String>,
    pub escalation_reason: Option<String>,
    pub recommended_tier: Option<Tier>,
    pub attempt_number: u32,
    pub max_attempts: u32,
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_number)
    }
}

/// Running gate counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    pub total: u64,
    pub passed: u64,
    pub improved: u64,
    pub escalated: u64,
    pub rejected: u64,
    /// Mean overall score across all decisions
    pub average_score: f64,
    pub recent_scores: VecDeque<f64>,
}

impl GateStats {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    /// Mean of the last [`SCORE_HISTORY_CAPACITY`] scores.
    pub fn rolling_average(&self) -> f64 {
        if self.recent_scores.is_empty() {
            0.0
        } else {
            self.recent_scores.iter().sum::<f64>() / self.recent_scores.len() as f64
        }
    }

    fn record(&mut self, verdict: Verdict, score: f64) {
        self.total += 1;
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Improve => self.improved += 1,
            Verdict::Escalate => self.escalated += 1,
            Verdict::Reject => self.rejected += 1,
        }
        self.average_score += (score - self.average_score) / self.total as f64;
        if self.recent_scores.len() == SCORE_HISTORY_CAPACITY {
            self.recent_scores.pop_front();
        }
        self.recent_scores.push_back(score);
    }
}

/// Applies the decision policy to evaluated responses.
pub struct QualityGate {
    config: GateConfig,
    evaluator: Evaluator,
    stats: Mutex<GateStats>,
}

impl QualityGate {
    pub fn new(config: GateConfig, evaluator: Evaluator) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            evaluator,
            stats: Mutex::new(GateStats::default()),
        })
    }

    /// Gate with default thresholds over the physics rubric.
    pub fn physics() -> Result<Self> {
        Self::new(GateConfig::default(), Evaluator::physics()?)
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Evaluate content and decide.
    pub fn evaluate(&self, input: &EvaluationInput<'_>, attempt_number: u32) -> GateDecision {
        let report = self.evaluator.evaluate(input);
        self.decide(report, attempt_number)
    }

    /// Gate a generated response. Failed generations are rejected whatever
    /// their content.
    pub fn evaluate_response(
        &self,
        response: &Response,
        query: Option<&str>,
        attempt_number: u32,
    ) -> GateDecision {
        let mut input = EvaluationInput::new(&response.content);
        input.query = query;
        let report = self.evaluator.evaluate(&input);

        if response.is_error() {
            let reason = format!(
                "generation failed: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
            return self.finish(
                Verdict::Reject,
                GateRule::Unusable,
                report,
                Vec::new(),
                Some(reason),
                None,
                attempt_number.clamp(1, self.config.max_attempts),
            );
        }
        self.decide(report, attempt_number)
    }

    /// Apply the decision policy to an existing report.
    pub fn decide(&self, report: RubricReport, attempt_number: u32) -> GateDecision {
        let attempt = attempt_number.clamp(1, self.config.max_attempts);
        let cfg = &self.config;

        if report.blank_input {
            return self.finish(
                Verdict::Reject,
                GateRule::Unusable,
                report,
                Vec::new(),
                Some("response is empty".to_string()),
                None,
                attempt,
            );
        }

        let critical = cfg.critical_dimensions.iter().find_map(|d| {
            report
                .dimension(*d)
                .filter(|s| s.score < cfg.critical_minimum)
                .map(|s| (s.dimension, s.score))
        });
        if let Some((dimension, score)) = critical {
            if attempt < cfg.max_attempts {
                let hints = self.improvement_hints(&report);
                return self.finish(
                    Verdict::Improve,
                    GateRule::CriticalDimension,
                    report,
                    hints,
                    None,
                    None,
                    attempt,
                );
            }
            let reason = format!(
                "critical dimension {} scored {:.2}, below the minimum {:.2}",
                dimension, score, cfg.critical_minimum
            );
            return self.escalate(GateRule::CriticalDimension, report, reason, attempt);
        }

        let overall = report.overall_score;
        if overall >= cfg.pass_threshold && report.failed_gates.is_empty() {
            return self.finish(
                Verdict::Pass,
                GateRule::HighQuality,
                report,
                Vec::new(),
                None,
                None,
                attempt,
            );
        }
        if overall >= cfg.pass_threshold && report.failed_gates.len() <= 1 {
            return self.finish(
                Verdict::Pass,
                GateRule::Borderline,
                report,
                Vec::new(),
                None,
                None,
                attempt,
            );
        }

        if overall < cfg.escalate_threshold {
            let reason = format!(
                "overall score {:.2} is below the escalate threshold {:.2}",
                overall, cfg.escalate_threshold
            );
            return self.escalate(GateRule::VeryLowQuality, report, reason, attempt);
        }

        if attempt < cfg.max_attempts {
            let hints = self.improvement_hints(&report);
            return self.finish(
                Verdict::Improve,
                GateRule::AttemptsRemaining,
                report,
                hints,
                None,
                None,
                attempt,
            );
        }

        let failed: Vec<&str> = report.failed_gates.iter().map(|d| d.as_str()).collect();
        let reason = format!(
            "still scoring {:.2} after {} attempts; failed gates: {}",
            overall,
            attempt,
            if failed.is_empty() {
                "none".to_string()
            } else {
                failed.join(", ")
            }
        );
        self.escalate(GateRule::AttemptsExhausted, report, reason, attempt)
    }

    fn escalate(&self, rule: GateRule, report: RubricReport, reason: String, attempt: u32) -> GateDecision {
        let tier = recommended_tier(&report);
        let hints = self.improvement_hints(&report);
        self.finish(
            Verdict::Escalate,
            rule,
            report,
            hints,
            Some(reason),
            Some(tier),
            attempt,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        verdict: Verdict,
        rule: GateRule,
        report: RubricReport,
        improvement_hints: Vec<String>,
        escalation_reason: Option<String>,
        recommended_tier: Option<Tier>,
        attempt_number: u32,
    ) -> GateDecision {
        self.stats.lock().record(verdict, report.overall_score);

        if verdict == Verdict::Pass {
            debug!(score = report.overall_score, ?rule, attempt_number, "quality gate passed");
        } else {
            info!(
                verdict = %verdict,
                ?rule,
                score = report.overall_score,
                attempt_number,
                reason = escalation_reason.as_deref().unwrap_or(""),
                "quality gate did not pass"
            );
        }

        GateDecision {
            verdict,
            rule,
            report,
            improvement_hints,
            escalation_reason,
            recommended_tier,
            attempt_number,
            max_attempts: self.config.max_attempts,
        }
    }

    /// One remediation per failed dimension (critical dimensions first),
    /// then pointers at the weakest questions, capped at [`MAX_HINTS`].
    fn improvement_hints(&self, report: &RubricReport) -> Vec<String> {
        let mut dimensions: Vec<Dimension> = self
            .config
            .critical_dimensions
            .iter()
            .copied()
            .filter(|d| report.failed_gates.contains(d))
            .collect();
        for d in &report.failed_gates {
            if !dimensions.contains(d) {
                dimensions.push(*d);
            }
        }

        let mut hints: Vec<String> = dimensions
            .iter()
            .map(|d| d.remediation().to_string())
            .collect();

        let rubric = self.evaluator.rubric();
        for score in report.weakest_scores(WEAKNESS_THRESHOLD, 2) {
            if let Some(question) = rubric.question(&score.question_id) {
                hints.push(format!(
                    "Improve: {} (scored {}/{})",
                    question.question, score.raw, score.max
                ));
            }
        }

        hints.dedup();
        hints.truncate(MAX_HINTS);
        hints
    }

    pub fn stats(&self) -> GateStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = GateStats::default();
    }
}

/// Highest tier when accuracy or rigor failed, the middle tier otherwise.
fn recommended_tier(report: &RubricReport) -> Tier {
    let needs_top = report
        .failed_gates
        .iter()
        .any(|d| matches!(d, Dimension::Accuracy | Dimension::Rigor));
    if needs_top {
        Tier::C
    } else {
        Tier::B
    }
}
