//! Property-based tests for rubric evaluation and the quality gate.
//!
//! These tests check that:
//!
//! - Every score in a report stays in [0, 1]
//! - Evaluating the same input twice gives the same report
//! - The gate's priority order holds for arbitrary reports
//! - Attempt numbers never exceed the configured maximum

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::llm::Tier;
    use crate::quality::{
        Dimension, DimensionSummary, EvaluationInput, Evaluator, GateConfig, Grade, QualityGate,
        RubricReport, Verdict,
    };

    const DIMENSIONS: [Dimension; 6] = [
        Dimension::Accuracy,
        Dimension::Rigor,
        Dimension::Clarity,
        Dimension::Completeness,
        Dimension::Citations,
        Dimension::CodeQuality,
    ];

    // Text assembled from fragments the rubric reacts to, plus noise
    fn response_text() -> impl Strategy<Value = String> {
        let fragment = prop_oneof![
            Just("Assuming no friction, ".to_string()),
            Just("therefore v = 12.5 m/s [1]. ".to_string()),
            Just("G = 6.674e-11 N m^2/kg^2 ".to_string()),
            Just("\n\n## Derivation\n\n".to_string()),
            Just("- energy and momentum\n".to_string()),
            Just("```python\nimport os\nos.system('ls')\n```\n".to_string()),
            Just("```python\ndef f(x:\n```\n".to_string()),
            "[a-z0-9 .,=]{0,40}",
        ];
        prop::collection::vec(fragment, 0..12).prop_map(|parts| parts.concat())
    }

    fn report(overall: f64, scores: Vec<f64>) -> RubricReport {
        let dimensions: Vec<DimensionSummary> = DIMENSIONS
            .iter()
            .zip(scores)
            .map(|(d, score)| DimensionSummary {
                dimension: *d,
                score,
                threshold: 0.6,
                passed: score >= 0.6,
                weight: 1.0,
                grade: Grade::from_score(score),
                questions_scored: 1,
            })
            .collect();
        let failed_gates = dimensions
            .iter()
            .filter(|d| !d.passed)
            .map(|d| d.dimension)
            .collect();
        RubricReport {
            rubric: "prop".to_string(),
            overall_score: overall,
            grade: Grade::from_score(overall),
            dimensions,
            scores: Vec::new(),
            failed_gates,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
            content_digest: String::new(),
            blank_input: false,
        }
    }

    // =========================================================================
    // Evaluator Properties
    // =========================================================================

    proptest! {
        /// Question, dimension, and overall scores are all in [0, 1].
        #[test]
        fn scores_are_bounded(text in response_text(), query in "[a-z ]{0,30}") {
            let evaluator = Evaluator::physics().unwrap();
            let report = evaluator.evaluate(&EvaluationInput::new(&text).with_query(&query));

            prop_assert!((0.0..=1.0).contains(&report.overall_score));
            for s in &report.scores {
                prop_assert!((0.0..=1.0).contains(&s.score), "{} = {}", s.question_id, s.score);
                prop_assert!(s.raw <= s.max);
                prop_assert!((0.0..=1.0).contains(&s.confidence));
            }
            for d in &report.dimensions {
                prop_assert!((0.0..=1.0).contains(&d.score));
            }
            prop_assert!(report.suggestions.len() <= 3);
        }

        /// The report is a pure function of its inputs.
        #[test]
        fn evaluation_is_idempotent(text in response_text()) {
            let evaluator = Evaluator::physics().unwrap();
            let input = EvaluationInput::new(&text);
            prop_assert_eq!(evaluator.evaluate(&input), evaluator.evaluate(&input));
        }
    }

    // =========================================================================
    // Gate Properties
    // =========================================================================

    proptest! {
        /// A critical dimension under the minimum never passes, whatever
        /// the overall score.
        #[test]
        fn critical_dimension_never_passes(
            overall in 0.0f64..=1.0,
            accuracy in 0.0f64..0.4,
            others in prop::collection::vec(0.0f64..=1.0, 5),
            attempt in 1u32..5,
        ) {
            let gate = QualityGate::physics().unwrap();
            let mut scores = vec![accuracy];
            scores.extend(others);
            let decision = gate.decide(report(overall, scores), attempt);

            prop_assert_ne!(decision.verdict, Verdict::Pass);
            if attempt >= gate.config().max_attempts {
                prop_assert_eq!(decision.verdict, Verdict::Escalate);
                prop_assert_eq!(decision.recommended_tier, Some(Tier::C));
            } else {
                prop_assert_eq!(decision.verdict, Verdict::Improve);
            }
        }

        /// Verdicts follow the priority order for arbitrary reports.
        #[test]
        fn verdict_follows_priority(
            overall in 0.0f64..=1.0,
            scores in prop::collection::vec(0.0f64..=1.0, 6),
            attempt in 1u32..4,
        ) {
            let gate = QualityGate::physics().unwrap();
            let cfg = gate.config().clone();
            let r = report(overall, scores.clone());
            let failed = r.failed_gates.len();
            let decision = gate.decide(r, attempt);

            let attempts_left = attempt.min(cfg.max_attempts) < cfg.max_attempts;
            let expected = if scores[0] < cfg.critical_minimum {
                if attempts_left { Verdict::Improve } else { Verdict::Escalate }
            } else if overall >= cfg.pass_threshold && failed <= 1 {
                Verdict::Pass
            } else if overall < cfg.escalate_threshold {
                Verdict::Escalate
            } else if attempts_left {
                Verdict::Improve
            } else {
                Verdict::Escalate
            };
            prop_assert_eq!(decision.verdict, expected);
            prop_assert!(decision.improvement_hints.len() <= 5);
            prop_assert_eq!(
                decision.recommended_tier.is_some(),
                decision.verdict == Verdict::Escalate
            );
        }

        /// Improve is never returned once attempts are used up.
        #[test]
        fn no_improve_at_attempt_limit(
            overall in 0.0f64..=1.0,
            scores in prop::collection::vec(0.0f64..=1.0, 6),
            extra in 0u32..3,
        ) {
            let gate = QualityGate::physics().unwrap();
            let attempt = gate.config().max_attempts + extra;
            let decision = gate.decide(report(overall, scores), attempt);
            prop_assert_ne!(decision.verdict, Verdict::Improve);
        }

        /// Attempt numbers are clamped to [1, max_attempts].
        #[test]
        fn attempt_number_is_bounded(max_attempts in 1u32..6, attempt in 0u32..20) {
            let gate = QualityGate::new(
                GateConfig::default().with_max_attempts(max_attempts),
                Evaluator::physics().unwrap(),
            )
            .unwrap();
            let decision = gate.decide(report(0.5, vec![0.5; 6]), attempt);

            prop_assert!(decision.attempt_number >= 1);
            prop_assert!(decision.attempt_number <= max_attempts);
            prop_assert_eq!(decision.max_attempts, max_attempts);
        }
    }
}
