//! Deterministic checks and heuristic rule evaluation.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::code::{self, CodeLanguage, CodeSample};
use super::evaluator::Artefact;
use super::rubric::{HeuristicRule, ProgrammaticCheck, RuleTarget};
use crate::error::Result;

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+(?:\s*[,–-]\s*\d+)*\]").unwrap());
static AUTHOR_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([A-Z][A-Za-z-]+(?: et al\.)?(?: (?:and|&) [A-Z][A-Za-z-]+)?,?\s+\d{4}[a-z]?\)")
        .unwrap()
});
static DOI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bdoi:\s*\S+").unwrap());
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*(?:step\s+)?\d+[.):]\s").unwrap());
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[^\w.^])(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)(\s*(?:×|x|\*|\\times)\s*10\^?\{?([-−+]?\d+)\}?)?",
    )
    .unwrap()
});
static UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[kMGTmµunpf]?(?:m|s|g|J|N|W|Pa|K|V|A|C|Hz|T|eV|Ω|mol|L)|°C|°F|rad|sr|%|atm|bar|cal|kWh|mph|ly|AU|pc|min|h|yr|(?i:years?|hours?|days?|meters?|metres?|seconds?|kilograms?|grams?|joules?|newtons?|watts?|kelvin|volts?|amperes?|amps?|coulombs?|hertz|teslas?|ohms?|degrees?|electronvolts?|light-years?))(?:[^A-Za-z]|$)",
    )
    .unwrap()
});
static LIST_OR_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:#{1,6}\s|[-*•]\s|\d+[.)]\s)").unwrap());
static EQUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\$[^$]+\$|\\\(|\\\[|^\s*[A-Za-z][\w()^/ ]*\s*=\s*\S").unwrap()
});
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9-]*").unwrap());

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "could", "describe", "does", "doing",
    "explain", "from", "have", "help", "into", "just", "like", "more", "much", "only", "please",
    "should", "show", "some", "tell", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "what", "when", "where", "which", "while", "will", "with", "would", "your",
];

/// A numeric literal found in prose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NumberToken {
    pub value: f64,
    pub has_unit: bool,
}

/// Everything a question may look at, computed once per evaluation.
pub(crate) struct ScoringContext<'a> {
    pub content: &'a str,
    pub query: Option<&'a str>,
    pub code: Option<CodeSample>,
    pub artefacts: &'a [Artefact],
    pub citation_markers: usize,
    pub numbers: Vec<NumberToken>,
}

impl<'a> ScoringContext<'a> {
    pub fn new(
        content: &'a str,
        query: Option<&'a str>,
        code: Option<(&'a str, CodeLanguage)>,
        artefacts: &'a [Artefact],
    ) -> Self {
        let code = code
            .filter(|(source, _)| !source.trim().is_empty())
            .map(|(source, language)| CodeSample::new(source, language))
            .or_else(|| code::extract_fenced_code(content));

        let citation_markers = CITATION_MARKER.find_iter(content).count()
            + AUTHOR_YEAR.find_iter(content).count()
            + DOI.find_iter(content).count();

        Self {
            content,
            query: query.filter(|q| !q.trim().is_empty()),
            code,
            artefacts,
            citation_markers,
            numbers: significant_numbers(content),
        }
    }

    fn artefact_matches(&self) -> usize {
        self.numbers
            .iter()
            .filter(|n| self.artefacts.iter().any(|a| a.matches_value(n.value)))
            .count()
    }
}

/// Numeric literals worth checking: decimals, scientific notation, and
/// integers of magnitude ten or more that are not bare years.
pub(crate) fn significant_numbers(content: &str) -> Vec<NumberToken> {
    let prose = CITATION_MARKER.replace_all(content, " ");
    let prose = AUTHOR_YEAR.replace_all(&prose, " ");
    let prose = LIST_MARKER.replace_all(&prose, " ");

    NUMBER
        .captures_iter(&prose)
        .filter_map(|caps| {
            let literal = caps.get(1)?;
            let mut value: f64 = literal.as_str().parse().ok()?;
            let scientific = caps.get(2).is_some();
            if let Some(exp) = caps.get(3) {
                let exp: i32 = exp.as_str().replace('−', "-").parse().ok()?;
                value *= 10f64.powi(exp);
            }

            let text = literal.as_str();
            let decimal = text.contains(['.', 'e', 'E']) || scientific;
            let has_unit = UNIT.is_match(&prose[caps.get(0)?.end()..]);
            let year_like = !decimal && (1900.0..=2100.0).contains(&value) && !has_unit;
            let significant = decimal || (value.abs() >= 10.0 && !year_like);

            significant.then_some(NumberToken { value, has_unit })
        })
        .collect()
}

/// Outcome of a programmatic check.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CheckOutcome {
    pub raw: u8,
    pub confidence: f64,
    pub note: String,
}

fn ladder(ratio: f64, steps: &[(f64, u8)]) -> u8 {
    steps
        .iter()
        .find(|(min, _)| ratio >= *min)
        .map(|(_, raw)| *raw)
        .unwrap_or(0)
}

/// Run a programmatic check. `Ok(None)` means the check does not apply and
/// the heuristic rule should be used instead.
pub(crate) fn run(check: ProgrammaticCheck, ctx: &ScoringContext<'_>) -> Result<Option<CheckOutcome>> {
    match check {
        ProgrammaticCheck::UnitConsistency => Ok(unit_consistency(ctx)),
        ProgrammaticCheck::CitationCoverage => Ok(citation_coverage(ctx)),
        ProgrammaticCheck::CodeSafety => code_safety(ctx),
        ProgrammaticCheck::Structure => Ok(Some(structure(ctx.content))),
    }
}

fn unit_consistency(ctx: &ScoringContext<'_>) -> Option<CheckOutcome> {
    if ctx.numbers.is_empty() {
        return None;
    }
    let with_unit = ctx.numbers.iter().filter(|n| n.has_unit).count();
    let ratio = with_unit as f64 / ctx.numbers.len() as f64;
    Some(CheckOutcome {
        raw: ladder(ratio, &[(0.9, 4), (0.7, 3), (0.4, 2), (f64::MIN_POSITIVE, 1)]),
        confidence: 0.85,
        note: format!("{}/{} values carry units", with_unit, ctx.numbers.len()),
    })
}

fn citation_coverage(ctx: &ScoringContext<'_>) -> Option<CheckOutcome> {
    let confidence = if ctx.artefacts.is_empty() { 0.9 } else { 0.95 };
    if ctx.numbers.is_empty() {
        return (ctx.citation_markers > 0).then(|| CheckOutcome {
            raw: 4,
            confidence: 0.8,
            note: format!("{} citations, no numeric claims", ctx.citation_markers),
        });
    }

    let supported = ctx.citation_markers + ctx.artefact_matches();
    let ratio = (supported as f64 / ctx.numbers.len() as f64).min(1.0);
    Some(CheckOutcome {
        raw: ladder(ratio, &[(0.8, 4), (0.5, 3), (0.25, 2), (f64::MIN_POSITIVE, 1)]),
        confidence,
        note: format!("{} supports for {} numeric values", supported, ctx.numbers.len()),
    })
}

fn code_safety(ctx: &ScoringContext<'_>) -> Result<Option<CheckOutcome>> {
    let Some(sample) = &ctx.code else {
        return Ok(None);
    };
    let scan = code::scan(&sample.source, sample.language)?;
    let raw = match scan.findings.len() {
        0 => 4,
        1 => 2,
        2 => 1,
        _ => 0,
    };
    let note = if scan.is_clean() {
        "no dangerous calls".to_string()
    } else {
        format!("dangerous calls: {}", scan.findings.join(", "))
    };
    Ok(Some(CheckOutcome {
        raw,
        confidence: 0.95,
        note,
    }))
}

fn structure(content: &str) -> CheckOutcome {
    let paragraphs = content
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();
    let words = WORD.find_iter(content).count();

    let checks = [
        paragraphs >= 2,
        LIST_OR_HEADING.is_match(content),
        EQUATION.is_match(content),
        (40..=1500).contains(&words),
    ];
    let raw = checks.iter().filter(|passed| **passed).count() as u8;

    CheckOutcome {
        raw,
        confidence: 0.8,
        note: format!("{} paragraphs, {} words", paragraphs, words),
    }
}

fn content_words(text: &str) -> HashSet<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 4 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Raw score from a heuristic rule, or `None` when the rule has nothing to read.
pub(crate) fn heuristic(rule: &HeuristicRule, ctx: &ScoringContext<'_>) -> Option<u8> {
    match rule {
        HeuristicRule::Patterns(rule) => {
            let text = match rule.target {
                RuleTarget::Content => ctx.content,
                RuleTarget::Code => ctx.code.as_ref()?.source.as_str(),
            };
            Some(rule.raw_for(rule.total(text)))
        }
        HeuristicRule::QueryOverlap { thresholds } => {
            let wanted = content_words(ctx.query?);
            if wanted.is_empty() {
                return None;
            }
            let present = content_words(ctx.content);
            let covered = wanted.iter().filter(|w| present.contains(*w)).count();
            let ratio = covered as f64 / wanted.len() as f64;
            Some(ladder(ratio, thresholds))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::Rubric;

    fn ctx<'a>(content: &'a str, artefacts: &'a [Artefact]) -> ScoringContext<'a> {
        ScoringContext::new(content, None, None, artefacts)
    }

    #[test]
    fn test_significant_numbers_skip_markers_and_years() {
        let text = "1. Einstein (1905) showed E = mc^2 [1].\n2. Take c = 299792458 m/s and 3 apples.";
        let numbers = significant_numbers(text);
        assert_eq!(numbers.len(), 1);
        assert_eq!(numbers[0].value, 299792458.0);
        assert!(numbers[0].has_unit);
    }

    #[test]
    fn test_scientific_notation_parsed() {
        let numbers = significant_numbers("G = 6.674 × 10^-11 N m^2/kg^2 and h = 6.626e-34 J s");
        assert_eq!(numbers.len(), 2);
        assert!((numbers[0].value - 6.674e-11).abs() < 1e-20);
        assert!(numbers.iter().all(|n| n.has_unit));
    }

    #[test]
    fn test_unit_consistency_ladder() {
        let all = ctx("g = 9.81 m/s^2 and v = 12.5 m/s", &[]);
        assert_eq!(unit_consistency(&all).unwrap().raw, 4);

        let none = ctx("the values are 9.81 and 12.5 and 3.3", &[]);
        assert_eq!(unit_consistency(&none).unwrap().raw, 0);

        assert!(unit_consistency(&ctx("no numbers at all", &[])).is_none());
    }

    #[test]
    fn test_citation_coverage_without_citations_is_low() {
        let text = "c = 299792458 m/s, G = 6.674e-11, h = 6.626e-34, k = 1.380649e-23, e = 1.602e-19";
        let c = ctx(text, &[]);
        assert_eq!(c.numbers.len(), 5);
        let outcome = citation_coverage(&c).unwrap();
        assert_eq!(outcome.raw, 0);
        assert!(outcome.confidence >= 0.8);
    }

    #[test]
    fn test_citation_coverage_counts_markers_and_artefacts() {
        let cited = ctx("c = 299792458 m/s [1] and G = 6.674e-11 [2]", &[]);
        assert_eq!(citation_coverage(&cited).unwrap().raw, 4);

        let artefacts = [Artefact::new("codata-c", 299_792_458.0)];
        let verified = ctx("c = 299792458 m/s and g = 9.81 m/s^2", &artefacts);
        let outcome = citation_coverage(&verified).unwrap();
        assert_eq!(outcome.raw, 3);
        assert_eq!(outcome.confidence, 0.95);
    }

    #[test]
    fn test_code_safety_uses_fenced_code() {
        let c = ctx("Run this:\n```python\nimport os\nos.system('rm -rf /')\n```\n", &[]);
        let outcome = code_safety(&c).unwrap().unwrap();
        assert_eq!(outcome.raw, 2);
        assert!(outcome.note.contains("os"));
    }

    #[test]
    fn test_code_safety_syntax_error_propagates() {
        let c = ScoringContext::new("text", None, Some(("print((1)", CodeLanguage::Script)), &[]);
        assert!(code_safety(&c).is_err());
    }

    #[test]
    fn test_code_safety_reads_floor_division() {
        let c = ctx("```python
def half(n):
    return (n // 2)
```
", &[]);
        assert_eq!(code_safety(&c).unwrap().unwrap().raw, 4);

        let c = ctx("```python
q = a // b; eval(user_input)
```
", &[]);
        assert_eq!(code_safety(&c).unwrap().unwrap().raw, 2);
    }

    #[test]
    fn test_structure_scores() {
        assert_eq!(structure("").raw, 0);

        let rich = "## Setup\n\nWe start from Newton's second law and consider a block of mass m \
                    sliding down a frictionless incline of angle theta under uniform gravity.\n\n\
                    - Forces: gravity and the normal force\n\nF = m a gives a = g sin(theta), \
                    which is independent of the mass of the block.";
        assert_eq!(structure(rich).raw, 4);
    }

    #[test]
    fn test_query_overlap() {
        let rubric = Rubric::physics().unwrap();
        let rule = &rubric.question("answers_query").unwrap().heuristic;

        let on_topic = ScoringContext::new(
            "The escape velocity from Earth is about 11.2 km/s.",
            Some("What is the escape velocity of Earth?"),
            None,
            &[],
        );
        assert_eq!(heuristic(rule, &on_topic), Some(4));

        let off_topic = ScoringContext::new(
            "Bananas are yellow.",
            Some("What is the escape velocity of Earth?"),
            None,
            &[],
        );
        assert_eq!(heuristic(rule, &off_topic), Some(0));

        assert_eq!(heuristic(rule, &ctx("anything", &[])), None);
    }

    #[test]
    fn test_code_rule_without_code_is_unscored() {
        let rubric = Rubric::physics().unwrap();
        let rule = &rubric.question("code_documentation").unwrap().heuristic;
        assert_eq!(heuristic(rule, &ctx("prose only", &[])), None);
    }
}
