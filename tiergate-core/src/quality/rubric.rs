//! Rubric definitions: dimensions, questions, and discrete score ladders.
//!
//! A [`Rubric`] is built once through [`RubricBuilder`] and never mutated.
//! Construction compiles every heuristic pattern and validates ladders, so a
//! bad rubric fails at startup rather than per request.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// Scoring dimension a question contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Accuracy,
    Rigor,
    Clarity,
    Completeness,
    Citations,
    CodeQuality,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Rigor => "rigor",
            Self::Clarity => "clarity",
            Self::Completeness => "completeness",
            Self::Citations => "citations",
            Self::CodeQuality => "code_quality",
        }
    }

    /// One-sentence remediation used for improvement hints.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::Accuracy => {
                "Check every numeric value and give each quantity its correct SI unit."
            }
            Self::Rigor => "Show the derivation step by step and state all assumptions explicitly.",
            Self::Clarity => "Organize the answer into short sections and define the terms you use.",
            Self::Completeness => "Address every part of the question directly.",
            Self::Citations => "Cite a source for each physical constant or empirical value.",
            Self::CodeQuality => {
                "Remove unsafe calls from the code and document what each function does."
            }
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a question is preferably scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMethod {
    /// Deterministic structural check, falling back to the heuristic rule
    Programmatic,
    /// Keyword/pattern threshold rule only
    Heuristic,
}

/// Deterministic checks available to programmatic questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgrammaticCheck {
    /// Share of significant numbers that carry a unit
    UnitConsistency,
    /// Citation markers (and artefact matches) per significant number
    CitationCoverage,
    /// Dangerous calls found by scanning the code's token structure
    CodeSafety,
    /// Paragraphs, lists/headings, equations, and length
    Structure,
}

/// Text a heuristic rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    Content,
    Code,
}

/// One rung of a question's score ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLevel {
    pub score: u8,
    pub label: String,
    pub description: String,
}

impl ScoreLevel {
    pub fn new(score: u8, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            score,
            label: label.into(),
            description: description.into(),
        }
    }
}

/// Pattern → contribution table mapped onto the ladder by count thresholds.
///
/// The rule total is `sum(weight * min(matches, cap))`; the first threshold
/// whose minimum is met gives the raw score.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub target: RuleTarget,
    patterns: Vec<(Regex, i32)>,
    /// Per-pattern match cap
    pub cap: usize,
    /// `(min_total, raw_score)`, highest minimum first
    thresholds: Vec<(i32, u8)>,
}

impl PatternRule {
    /// Compile a rule. Fails on invalid patterns or an empty threshold table.
    pub fn new(
        target: RuleTarget,
        patterns: &[(&str, i32)],
        cap: usize,
        thresholds: &[(i32, u8)],
    ) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|(pattern, weight)| {
                Regex::new(pattern)
                    .map(|re| (re, *weight))
                    .map_err(|e| Error::config(format!("invalid rule pattern '{}': {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        if thresholds.is_empty() {
            return Err(Error::config("pattern rule needs at least one threshold"));
        }
        let mut thresholds = thresholds.to_vec();
        thresholds.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(Self {
            target,
            patterns,
            cap: cap.max(1),
            thresholds,
        })
    }

    /// Weighted, capped match total for `text`.
    pub fn total(&self, text: &str) -> i32 {
        self.patterns
            .iter()
            .map(|(re, weight)| {
                let matches = re.find_iter(text).take(self.cap).count() as i32;
                weight * matches
            })
            .sum()
    }

    /// Map a rule total onto the ladder.
    pub fn raw_for(&self, total: i32) -> u8 {
        self.thresholds
            .iter()
            .find(|(min, _)| total >= *min)
            .map(|(_, raw)| *raw)
            .unwrap_or(0)
    }

    fn max_raw(&self) -> u8 {
        self.thresholds.iter().map(|(_, raw)| *raw).max().unwrap_or(0)
    }
}

/// Heuristic fallback rule.
#[derive(Debug, Clone)]
pub enum HeuristicRule {
    Patterns(PatternRule),
    /// Share of the query's content words echoed in the response,
    /// as `(min_ratio, raw_score)` highest first. Unscored without a query.
    QueryOverlap { thresholds: Vec<(f64, u8)> },
}

/// A single scoring question.
#[derive(Debug, Clone)]
pub struct RubricQuestion {
    pub id: String,
    pub dimension: Dimension,
    pub question: String,
    pub levels: Vec<ScoreLevel>,
    pub weight: f64,
    pub method: EvaluationMethod,
    pub programmatic: Option<ProgrammaticCheck>,
    pub heuristic: HeuristicRule,
    /// Skipped when the response has no code
    pub requires_code: bool,
    /// Suggestion offered when this question scores low
    pub suggestion: String,
}

impl RubricQuestion {
    pub fn new(
        id: impl Into<String>,
        dimension: Dimension,
        question: impl Into<String>,
        heuristic: HeuristicRule,
    ) -> Self {
        Self {
            id: id.into(),
            dimension,
            question: question.into(),
            levels: default_ladder(),
            weight: 1.0,
            method: EvaluationMethod::Heuristic,
            programmatic: None,
            heuristic,
            requires_code: false,
            suggestion: String::new(),
        }
    }

    pub fn with_programmatic(mut self, check: ProgrammaticCheck) -> Self {
        self.method = EvaluationMethod::Programmatic;
        self.programmatic = Some(check);
        self
    }

    pub fn with_levels(mut self, levels: Vec<ScoreLevel>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn requiring_code(mut self) -> Self {
        self.requires_code = true;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    /// Highest score on the ladder.
    pub fn max_score(&self) -> u8 {
        self.levels.iter().map(|l| l.score).max().unwrap_or(0)
    }

    /// Label of the highest ladder rung at or below `raw`.
    pub fn level_label(&self, raw: u8) -> &str {
        self.levels
            .iter()
            .filter(|l| l.score <= raw)
            .max_by_key(|l| l.score)
            .map(|l| l.label.as_str())
            .unwrap_or("")
    }

    fn validate(&self) -> Result<()> {
        let max = self.max_score();
        if max == 0 {
            return Err(Error::config(format!(
                "question '{}' has no positive score level",
                self.id
            )));
        }
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(Error::config(format!(
                "question '{}' has invalid weight {}",
                self.id, self.weight
            )));
        }
        if self.method == EvaluationMethod::Programmatic && self.programmatic.is_none() {
            return Err(Error::config(format!(
                "question '{}' is programmatic but names no check",
                self.id
            )));
        }
        let heuristic_max = match &self.heuristic {
            HeuristicRule::Patterns(rule) => rule.max_raw(),
            HeuristicRule::QueryOverlap { thresholds } => {
                thresholds.iter().map(|(_, raw)| *raw).max().unwrap_or(0)
            }
        };
        if heuristic_max > max {
            return Err(Error::config(format!(
                "question '{}' heuristic can score {} above ladder max {}",
                self.id, heuristic_max, max
            )));
        }
        Ok(())
    }
}

/// The standard 0..4 ladder.
pub fn default_ladder() -> Vec<ScoreLevel> {
    vec![
        ScoreLevel::new(0, "missing", "Not addressed at all"),
        ScoreLevel::new(1, "poor", "Addressed superficially or mostly wrong"),
        ScoreLevel::new(2, "fair", "Partially addressed with notable gaps"),
        ScoreLevel::new(3, "good", "Addressed well with minor gaps"),
        ScoreLevel::new(4, "excellent", "Fully and correctly addressed"),
    ]
}

/// Immutable set of scoring questions.
#[derive(Debug, Clone)]
pub struct Rubric {
    name: String,
    questions: Vec<RubricQuestion>,
    dimension_weights: HashMap<Dimension, f64>,
    dimension_thresholds: HashMap<Dimension, f64>,
    pass_threshold: f64,
}

impl Rubric {
    pub fn builder(name: impl Into<String>) -> RubricBuilder {
        RubricBuilder {
            name: name.into(),
            questions: Vec::new(),
            dimension_weights: HashMap::new(),
            dimension_thresholds: HashMap::new(),
            pass_threshold: 0.6,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn questions(&self) -> &[RubricQuestion] {
        &self.questions
    }

    pub fn question(&self, id: &str) -> Option<&RubricQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Dimensions in order of first appearance.
    pub fn dimensions(&self) -> Vec<Dimension> {
        let mut seen = HashSet::new();
        self.questions
            .iter()
            .map(|q| q.dimension)
            .filter(|d| seen.insert(*d))
            .collect()
    }

    pub fn dimension_weight(&self, dimension: Dimension) -> f64 {
        self.dimension_weights.get(&dimension).copied().unwrap_or(1.0)
    }

    /// Dimension pass threshold, falling back to the rubric threshold.
    pub fn dimension_threshold(&self, dimension: Dimension) -> f64 {
        self.dimension_thresholds
            .get(&dimension)
            .copied()
            .unwrap_or(self.pass_threshold)
    }

    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }
}

/// Builder for [`Rubric`].
pub struct RubricBuilder {
    name: String,
    questions: Vec<RubricQuestion>,
    dimension_weights: HashMap<Dimension, f64>,
    dimension_thresholds: HashMap<Dimension, f64>,
    pass_threshold: f64,
}

impl RubricBuilder {
    pub fn question(mut self, question: RubricQuestion) -> Self {
        self.questions.push(question);
        self
    }

    pub fn dimension_weight(mut self, dimension: Dimension, weight: f64) -> Self {
        self.dimension_weights.insert(dimension, weight);
        self
    }

    pub fn dimension_threshold(mut self, dimension: Dimension, threshold: f64) -> Self {
        self.dimension_thresholds.insert(dimension, threshold);
        self
    }

    pub fn pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<Rubric> {
        if self.questions.is_empty() {
            return Err(Error::config(format!("rubric '{}' has no questions", self.name)));
        }

        let mut ids = HashSet::new();
        for question in &self.questions {
            if !ids.insert(question.id.as_str()) {
                return Err(Error::config(format!("duplicate question id '{}'", question.id)));
            }
            question.validate()?;
        }

        let in_unit_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit_range(self.pass_threshold)
            || !self.dimension_thresholds.values().all(|t| in_unit_range(*t))
        {
            return Err(Error::config("rubric thresholds must lie in [0, 1]"));
        }
        if !self
            .dimension_weights
            .values()
            .all(|w| w.is_finite() && *w >= 0.0)
        {
            return Err(Error::config("dimension weights must be non-negative"));
        }

        Ok(Rubric {
            name: self.name,
            questions: self.questions,
            dimension_weights: self.dimension_weights,
            dimension_thresholds: self.dimension_thresholds,
            pass_threshold: self.pass_threshold,
        })
    }
}

// =============================================================================
// Stock physics rubric
// =============================================================================

const UNIT_WORDS: &str = r"(?i)\b(meters?|seconds?|kilograms?|joules?|newtons?|watts?|pascals?|kelvin|volts?|amperes?|coulombs?|hertz|tesla|electronvolts?|SI units?)\b";

impl Rubric {
    /// Stock rubric for physics answers.
    pub fn physics() -> Result<Rubric> {
        let content = RuleTarget::Content;

        Rubric::builder("physics")
            .question(
                RubricQuestion::new(
                    "units_consistency",
                    Dimension::Accuracy,
                    "Do numeric quantities carry consistent units?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[(UNIT_WORDS, 1), (r"(?i)\bdimensionless\b", 1)],
                        4,
                        &[(4, 4), (3, 3), (2, 2), (1, 1)],
                    )?),
                )
                .with_programmatic(ProgrammaticCheck::UnitConsistency)
                .with_weight(1.5)
                .with_suggestion("Attach a unit to every numeric quantity."),
            )
            .question(
                RubricQuestion::new(
                    "numeric_plausibility",
                    Dimension::Accuracy,
                    "Are magnitudes stated with sensible precision and scale?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[
                            (r"\d(?:\.\d+)?\s*(?:[×x]|\\times)\s*10\^?\{?[-−+]?\d+", 1),
                            (r"\d(?:\.\d+)?[eE][-+]?\d+", 1),
                            (r"(?i)\b(?:approximately|about|roughly|order of magnitude)\b|≈|~\s*\d", 1),
                            (r"(?i)\b(?:infinite (?:energy|speed)|faster than light|negative mass)\b", -2),
                        ],
                        3,
                        &[(4, 4), (3, 3), (2, 2), (1, 1)],
                    )?),
                )
                .with_suggestion("Quote magnitudes in scientific notation with sensible precision."),
            )
            .question(
                RubricQuestion::new(
                    "derivation_steps",
                    Dimension::Rigor,
                    "Is the reasoning shown step by step?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[
                            (r"(?i)\b(?:therefore|thus|hence|it follows|we obtain|substituting|rearranging)\b", 1),
                            (r"(?im)^\s*(?:step\s+\d+|\d+[.)])\s", 1),
                            (r"[A-Za-z]\w*\s*=\s*[^=\n]+", 1),
                        ],
                        3,
                        &[(6, 4), (4, 3), (2, 2), (1, 1)],
                    )?),
                )
                .with_suggestion("Show each algebraic step between the starting equation and the result."),
            )
            .question(
                RubricQuestion::new(
                    "assumptions_stated",
                    Dimension::Rigor,
                    "Are simplifying assumptions stated?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[
                            (r"(?i)\b(?:assum(?:e|es|ed|ing|ption|ptions)|neglect(?:ing)?|ignor(?:e|ing)|ideal(?:ized)?)\b", 1),
                            (r"(?i)\b(?:valid (?:only )?(?:for|when)|in the limit)\b", 1),
                        ],
                        3,
                        &[(3, 4), (2, 3), (1, 2)],
                    )?),
                )
                .with_suggestion("List the simplifying assumptions and where they break down."),
            )
            .question(
                RubricQuestion::new(
                    "structure",
                    Dimension::Clarity,
                    "Is the answer organized and readable?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[(r"\n\s*\n", 1), (r"(?m)^\s*(?:#{1,6}\s|[-*]\s)", 1)],
                        2,
                        &[(4, 4), (3, 3), (2, 2), (1, 1)],
                    )?),
                )
                .with_programmatic(ProgrammaticCheck::Structure)
                .with_suggestion("Break the answer into paragraphs with headings or lists."),
            )
            .question(
                RubricQuestion::new(
                    "terminology",
                    Dimension::Clarity,
                    "Is physical terminology used precisely?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[(
                            r"(?i)\b(?:energy|momentum|force|field|velocity|acceleration|mass|charge|potential|entropy|frequency|wavelength|torque|pressure)\b",
                            1,
                        )],
                        6,
                        &[(5, 4), (3, 3), (2, 2), (1, 1)],
                    )?),
                )
                .with_suggestion("Use the precise physical term for each quantity."),
            )
            .question(
                RubricQuestion::new(
                    "answers_query",
                    Dimension::Completeness,
                    "Does the response address what was asked?",
                    HeuristicRule::QueryOverlap {
                        thresholds: vec![(0.75, 4), (0.5, 3), (0.3, 2), (0.1, 1)],
                    },
                )
                .with_suggestion("Answer the question as asked before adding context."),
            )
            .question(
                RubricQuestion::new(
                    "citation_coverage",
                    Dimension::Citations,
                    "Are numeric values backed by citations?",
                    HeuristicRule::Patterns(PatternRule::new(
                        content,
                        &[
                            (r"\[\d+\]", 1),
                            (r"(?i)\b(?:according to|source:|reference|doi:|CODATA|NIST)\b", 1),
                        ],
                        4,
                        &[(4, 4), (3, 3), (2, 2), (1, 1)],
                    )?),
                )
                .with_programmatic(ProgrammaticCheck::CitationCoverage)
                .with_suggestion("Add a citation marker next to each constant or measured value."),
            )
            .question(
                RubricQuestion::new(
                    "code_safety",
                    Dimension::CodeQuality,
                    "Is the code free of dangerous operations?",
                    HeuristicRule::Patterns(PatternRule::new(
                        RuleTarget::Code,
                        &[(r"\b(?:eval|exec|os\.system|subprocess|__import__|pickle\.loads?)\b", -1)],
                        4,
                        &[(0, 4), (-1, 2), (-2, 1)],
                    )?),
                )
                .with_programmatic(ProgrammaticCheck::CodeSafety)
                .requiring_code()
                .with_suggestion("Replace eval/exec and shell calls with explicit, safe operations."),
            )
            .question(
                RubricQuestion::new(
                    "code_documentation",
                    Dimension::CodeQuality,
                    "Is the code commented or documented?",
                    HeuristicRule::Patterns(PatternRule::new(
                        RuleTarget::Code,
                        &[(r"(?m)#\s*\S", 1), (r#"""""#, 1), (r"(?m)//\s*\S", 1)],
                        3,
                        &[(4, 4), (3, 3), (2, 2), (1, 1)],
                    )?),
                )
                .requiring_code()
                .with_suggestion("Add a docstring and comments explaining the physics in the code."),
            )
            .dimension_weight(Dimension::Accuracy, 2.0)
            .dimension_weight(Dimension::Rigor, 1.5)
            .dimension_threshold(Dimension::Accuracy, 0.6)
            .dimension_threshold(Dimension::Rigor, 0.5)
            .pass_threshold(0.6)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_rule() -> HeuristicRule {
        HeuristicRule::Patterns(
            PatternRule::new(RuleTarget::Content, &[(r"\bok\b", 1)], 4, &[(2, 4), (1, 2)]).unwrap(),
        )
    }

    #[test]
    fn test_physics_rubric_builds() {
        let rubric = Rubric::physics().unwrap();
        assert_eq!(rubric.questions().len(), 10);
        assert_eq!(
            rubric.dimensions(),
            vec![
                Dimension::Accuracy,
                Dimension::Rigor,
                Dimension::Clarity,
                Dimension::Completeness,
                Dimension::Citations,
                Dimension::CodeQuality,
            ]
        );
        assert_eq!(rubric.dimension_weight(Dimension::Accuracy), 2.0);
        assert_eq!(rubric.dimension_weight(Dimension::Clarity), 1.0);
        assert_eq!(rubric.dimension_threshold(Dimension::Rigor), 0.5);
        assert_eq!(rubric.dimension_threshold(Dimension::Clarity), 0.6);
        assert!(rubric.question("code_safety").unwrap().requires_code);
    }

    #[test]
    fn test_empty_rubric_fails_fast() {
        let err = Rubric::builder("empty").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = Rubric::builder("dupes")
            .question(RubricQuestion::new("q", Dimension::Clarity, "?", simple_rule()))
            .question(RubricQuestion::new("q", Dimension::Rigor, "?", simple_rule()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_heuristic_above_ladder_rejected() {
        let question = RubricQuestion::new("q", Dimension::Clarity, "?", simple_rule())
            .with_levels(vec![ScoreLevel::new(0, "no", ""), ScoreLevel::new(2, "yes", "")]);
        assert!(Rubric::builder("r").question(question).build().is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = PatternRule::new(RuleTarget::Content, &[("(unclosed", 1)], 1, &[(1, 1)]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let result = Rubric::builder("r")
            .question(RubricQuestion::new("q", Dimension::Clarity, "?", simple_rule()))
            .pass_threshold(1.5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_pattern_rule_total_and_ladder() {
        let rule = PatternRule::new(
            RuleTarget::Content,
            &[(r"\bgood\b", 1), (r"\bbad\b", -2)],
            2,
            &[(1, 2), (3, 4)],
        )
        .unwrap();

        assert_eq!(rule.total("good good good"), 2); // capped at 2
        assert_eq!(rule.raw_for(3), 4);
        assert_eq!(rule.raw_for(2), 2);
        assert_eq!(rule.raw_for(rule.total("good bad")), 0);
    }

    #[test]
    fn test_level_label() {
        let question = RubricQuestion::new("q", Dimension::Clarity, "?", simple_rule());
        assert_eq!(question.max_score(), 4);
        assert_eq!(question.level_label(3), "good");
        assert_eq!(question.level_label(0), "missing");
    }
}
