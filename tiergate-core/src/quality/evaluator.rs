//! Rubric evaluation of a single response.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::checks::{self, ScoringContext};
use super::code::CodeLanguage;
use super::rubric::{Dimension, EvaluationMethod, Rubric, RubricQuestion};
use crate::error::Result;

/// Score at or above which a dimension is listed as a strength.
pub const STRENGTH_THRESHOLD: f64 = 0.75;
/// Score below which a dimension or question is listed as a weakness.
pub const WEAKNESS_THRESHOLD: f64 = 0.5;
/// Maximum number of suggestions in a report.
pub const MAX_SUGGESTIONS: usize = 3;

/// Externally verified value that numeric claims can be checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artefact {
    pub id: String,
    pub value: f64,
    pub source: Option<String>,
    /// Relative tolerance for a match
    pub tolerance: f64,
}

impl Artefact {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
            source: None,
            tolerance: 1e-3,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn matches_value(&self, value: f64) -> bool {
        let scale = self.value.abs().max(f64::MIN_POSITIVE);
        (value - self.value).abs() <= self.tolerance * scale
    }
}

/// Inputs for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationInput<'a> {
    pub content: &'a str,
    pub query: Option<&'a str>,
    /// Code to check; fenced blocks in `content` are used when absent
    pub code: Option<&'a str>,
    /// Comment syntax for `code`; fenced blocks use their own tag
    pub code_language: CodeLanguage,
    pub artefacts: &'a [Artefact],
}

impl<'a> EvaluationInput<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_code(mut self, code: &'a str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_code_language(mut self, language: CodeLanguage) -> Self {
        self.code_language = language;
        self
    }

        pub fn with_artefacts(mut self, artefacts: &'a [Artefact]) -> Self {
        self.artefacts = artefacts;
        self
    }
}

/// How a question score was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Programmatic,
    Heuristic,
    /// The check errored; the question scores zero
    Failed,
}

/// Letter grade for a normalized score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => Self::A,
            s if s >= 0.8 => Self::B,
            s if s >= 0.7 => Self::C,
            s if s >= 0.6 => Self::D,
            _ => Self::F,
        }
    }
}

/// Score for one rubric question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricScore {
    pub question_id: String,
    pub dimension: Dimension,
    pub raw: u8,
    pub max: u8,
    /// `raw / max`, in `[0, 1]`
    pub score: f64,
    pub method: ScoringMethod,
    pub confidence: f64,
    pub level: String,
    pub note: Option<String>,
}

/// Aggregated score for one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    pub dimension: Dimension,
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
    pub weight: f64,
    pub grade: Grade,
    pub questions_scored: usize,
}

/// Full evaluation of a response. Contains no timestamps, so equal inputs
/// produce equal reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricReport {
    pub rubric: String,
    pub overall_score: f64,
    pub grade: Grade,
    pub dimensions: Vec<DimensionSummary>,
    pub scores: Vec<RubricScore>,
    /// Dimensions below their pass threshold
    pub failed_gates: Vec<Dimension>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    /// Hex SHA-256 of the evaluated inputs, for spotting repeat evaluations
    pub content_digest: String,
    /// The content was empty or whitespace
    pub blank_input: bool,
}

impl RubricReport {
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionSummary> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }

    pub fn score_for(&self, question_id: &str) -> Option<&RubricScore> {
        self.scores.iter().find(|s| s.question_id == question_id)
    }

    pub fn passed_all_gates(&self) -> bool {
        self.failed_gates.is_empty()
    }

    /// Up to `limit` scores below `below`, lowest first.
    pub fn weakest_scores(&self, below: f64, limit: usize) -> Vec<&RubricScore> {
        let mut weak: Vec<&RubricScore> = self.scores.iter().filter(|s| s.score < below).collect();
        weak.sort_by(|a, b| a.score.total_cmp(&b.score));
        weak.truncate(limit);
        weak
    }
}

/// Hex SHA-256 over every input that affects the report. Content-only
/// input hashes to the digest of the content bytes alone.
fn digest(input: &EvaluationInput<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.content.as_bytes());
    if let Some(query) = input.query {
        hasher.update(b"\0query\0");
        hasher.update(query.as_bytes());
    }
    if let Some(code) = input.code {
        hasher.update(b"\0code\0");
        hasher.update(format!("{:?}", input.code_language).as_bytes());
        hasher.update(b"\0");
        hasher.update(code.as_bytes());
    }
    for artefact in input.artefacts {
        hasher.update(b"\0artefact\0");
        hasher.update(artefact.id.as_bytes());
        hasher.update(b"\0");
        hasher.update(artefact.value.to_bits().to_le_bytes());
        hasher.update(artefact.tolerance.to_bits().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Stateless scorer for a fixed rubric.
#[derive(Debug, Clone)]
pub struct Evaluator {
    rubric: Arc<Rubric>,
}

impl Evaluator {
    pub fn new(rubric: Arc<Rubric>) -> Self {
        Self { rubric }
    }

    pub fn physics() -> Result<Self> {
        Ok(Self::new(Arc::new(Rubric::physics()?)))
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Evaluate a response against the rubric.
    pub fn evaluate(&self, input: &EvaluationInput<'_>) -> RubricReport {
        if input.content.trim().is_empty() {
            return self.blank_report(input);
        }

        let ctx = ScoringContext::new(
            input.content,
            input.query,
            input.code.map(|code| (code, input.code_language)),
            input.artefacts,
        );
        let scores: Vec<RubricScore> = self
            .rubric
            .questions()
            .iter()
            .filter_map(|q| self.score_question(q, &ctx))
            .collect();

        let dimensions: Vec<DimensionSummary> = self
            .rubric
            .dimensions()
            .into_iter()
            .filter_map(|d| self.summarize(d, &scores))
            .collect();

        let total_weight: f64 = dimensions.iter().map(|d| d.weight).sum();
        let overall_score = if total_weight > 0.0 {
            let weighted: f64 = dimensions.iter().map(|d| d.score * d.weight).sum();
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let failed_gates: Vec<Dimension> = dimensions
            .iter()
            .filter(|d| !d.passed)
            .map(|d| d.dimension)
            .collect();

        let strengths = dimensions
            .iter()
            .filter(|d| d.score >= STRENGTH_THRESHOLD)
            .map(|d| format!("{} is strong ({:.2})", d.dimension, d.score))
            .collect();

        let mut weaknesses: Vec<String> = dimensions
            .iter()
            .filter(|d| d.score < WEAKNESS_THRESHOLD)
            .map(|d| format!("{} is weak ({:.2})", d.dimension, d.score))
            .collect();
        weaknesses.extend(
            scores
                .iter()
                .filter(|s| s.method == ScoringMethod::Failed)
                .map(|s| {
                    format!(
                        "could not evaluate {}: {}",
                        s.question_id,
                        s.note.as_deref().unwrap_or("unknown error")
                    )
                }),
        );

        let suggestions = self.suggestions(&scores);

        debug!(
            rubric = self.rubric.name(),
            overall = overall_score,
            scored = scores.len(),
            failed = ?failed_gates,
            "evaluated response"
        );

        RubricReport {
            rubric: self.rubric.name().to_string(),
            overall_score,
            grade: Grade::from_score(overall_score),
            dimensions,
            scores,
            failed_gates,
            strengths,
            weaknesses,
            suggestions,
            content_digest: digest(input),
            blank_input: false,
        }
    }

    fn blank_report(&self, input: &EvaluationInput<'_>) -> RubricReport {
        RubricReport {
            rubric: self.rubric.name().to_string(),
            overall_score: 0.0,
            grade: Grade::F,
            dimensions: Vec::new(),
            scores: Vec::new(),
            failed_gates: Vec::new(),
            strengths: Vec::new(),
            weaknesses: vec!["response is empty".to_string()],
            suggestions: Vec::new(),
            content_digest: digest(input),
            blank_input: true,
        }
    }

    fn score_question(&self, question: &RubricQuestion, ctx: &ScoringContext<'_>) -> Option<RubricScore> {
        if question.requires_code && ctx.code.is_none() {
            return None;
        }

        let (raw, method, confidence, note) = match (question.method, question.programmatic) {
            (EvaluationMethod::Programmatic, Some(check)) => match checks::run(check, ctx) {
                Ok(Some(outcome)) => (
                    outcome.raw,
                    ScoringMethod::Programmatic,
                    outcome.confidence,
                    Some(outcome.note),
                ),
                Ok(None) => (
                    checks::heuristic(&question.heuristic, ctx)?,
                    ScoringMethod::Heuristic,
                    0.6,
                    None,
                ),
                Err(e) => {
                    warn!(question = %question.id, error = %e, "evaluation check failed");
                    (0, ScoringMethod::Failed, 0.0, Some(e.to_string()))
                }
            },
            _ => (
                checks::heuristic(&question.heuristic, ctx)?,
                ScoringMethod::Heuristic,
                0.6,
                None,
            ),
        };

        let max = question.max_score();
        let raw = raw.min(max);
        let score = if max == 0 {
            0.0
        } else {
            (raw as f64 / max as f64).clamp(0.0, 1.0)
        };

        Some(RubricScore {
            question_id: question.id.clone(),
            dimension: question.dimension,
            raw,
            max,
            score,
            method,
            confidence,
            level: question.level_label(raw).to_string(),
            note,
        })
    }

    fn summarize(&self, dimension: Dimension, scores: &[RubricScore]) -> Option<DimensionSummary> {
        let members: Vec<(&RubricScore, f64)> = scores
            .iter()
            .filter(|s| s.dimension == dimension)
            .map(|s| {
                let weight = self
                    .rubric
                    .question(&s.question_id)
                    .map(|q| q.weight)
                    .unwrap_or(1.0);
                (s, weight)
            })
            .collect();
        if members.is_empty() {
            return None;
        }

        let total_weight: f64 = members.iter().map(|(_, w)| w).sum();
        let score = if total_weight > 0.0 {
            members.iter().map(|(s, w)| s.score * w).sum::<f64>() / total_weight
        } else {
            members.iter().map(|(s, _)| s.score).sum::<f64>() / members.len() as f64
        }
        .clamp(0.0, 1.0);

        let threshold = self.rubric.dimension_threshold(dimension);
        Some(DimensionSummary {
            dimension,
            score,
            threshold,
            passed: score >= threshold,
            weight: self.rubric.dimension_weight(dimension),
            grade: Grade::from_score(score),
            questions_scored: members.len(),
        })
    }

    fn suggestions(&self, scores: &[RubricScore]) -> Vec<String> {
        let mut weak: Vec<&RubricScore> = scores
            .iter()
            .filter(|s| s.score < WEAKNESS_THRESHOLD)
            .collect();
        weak.sort_by(|a, b| a.score.total_cmp(&b.score));

        let mut suggestions: Vec<String> = Vec::new();
        for score in weak {
            let Some(question) = self.rubric.question(&score.question_id) else {
                continue;
            };
            if question.suggestion.is_empty() || suggestions.contains(&question.suggestion) {
                continue;
            }
            suggestions.push(question.suggestion.clone());
            if suggestions.len() == MAX_SUGGESTIONS {
                break;
            }
        }
        suggestions
    }
}
