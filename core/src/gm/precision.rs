//! Precision weighting: how much a GM trusts each upstream source.
//!
//! Confidence flows from prediction-error sizes: among errors competing over
//! one subject, the source whose error is smallest earns the largest share.
//! Weights blend slowly (old and new averaged), giving the engine its
//! confirmation bias.

use std::collections::HashMap;

use crate::perception::Perception;

/// Relative confidences among competing prediction errors over one subject,
/// given their sizes. A singleton gets full confidence; otherwise `1 - size`
/// shares normalized to sum 1.0. When every error is maximal the sources
/// share equally, keeping the distribution total.
pub fn relative_confidences(sizes: &[f64]) -> Vec<f64> {
    match sizes.len() {
        0 => Vec::new(),
        1 => vec![1.0],
        n => {
            let raws: Vec<f64> = sizes.iter().map(|s| (1.0 - s).max(0.0)).collect();
            let total: f64 = raws.iter().sum();
            if total <= f64::EPSILON {
                vec![1.0 / n as f64; n]
            } else {
                raws.into_iter().map(|r| r / total).collect()
            }
        }
    }
}

/// Blend per-source confidence averages into the weight table:
/// `weight <- (old + avg) / 2`, defaulting unseen sources to 1.0. Sources
/// absent from `confidences` are untouched.
pub fn update_weights(
    weights: &mut HashMap<String, f64>,
    confidences: &HashMap<String, Vec<f64>>,
) {
    for (source, values) in confidences {
        if values.is_empty() {
            continue;
        }
        let avg: f64 = values.iter().sum::<f64>() / values.len() as f64;
        let old = *weights.get(source).unwrap_or(&1.0);
        weights.insert(source.clone(), ((old + avg) / 2.0).clamp(0.0, 1.0));
    }
}

/// Keep the highest-gain perception per subject, first occurrence winning
/// ties. Order of the kept perceptions is preserved.
pub fn resolve_competing(
    perceptions: Vec<Perception>,
    weights: &HashMap<String, f64>,
) -> Vec<Perception> {
    let mut kept: Vec<Perception> = Vec::new();
    for perception in perceptions {
        let subject = perception.subject();
        match kept.iter().position(|k| k.subject() == subject) {
            None => kept.push(perception),
            Some(i) => {
                if perception.gain(weights) > kept[i].gain(weights) {
                    kept[i] = perception;
                }
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::{Belief, Prediction, PredictionError};
    use crate::value::{values, Expectation, Value};

    #[test]
    fn singleton_takes_full_confidence() {
        assert_eq!(relative_confidences(&[0.8]), vec![1.0]);
    }

    #[test]
    fn competing_errors_split_by_inverse_size() {
        // Sizes 0.2 and 0.8 -> raw (0.8, 0.2) -> normalized (0.8, 0.2).
        let confidences = relative_confidences(&[0.2, 0.8]);
        assert!((confidences[0] - 0.8).abs() < 1e-9);
        assert!((confidences[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn confidences_always_sum_to_one() {
        for sizes in [vec![0.1, 0.5, 0.9], vec![0.33, 0.33], vec![1.0, 1.0, 1.0]] {
            let sum: f64 = relative_confidences(&sizes).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "sizes {:?} sum {}", sizes, sum);
        }
    }

    #[test]
    fn weights_blend_with_history() {
        let mut weights = HashMap::new();
        let confidences: HashMap<String, Vec<f64>> = [
            ("gm_a".to_string(), vec![0.8]),
            ("gm_b".to_string(), vec![0.2]),
        ]
        .into_iter()
        .collect();

        update_weights(&mut weights, &confidences);
        assert!((weights["gm_a"] - 0.9).abs() < 1e-9);
        assert!((weights["gm_b"] - 0.6).abs() < 1e-9);

        // A second identical round keeps drifting toward the averages.
        update_weights(&mut weights, &confidences);
        assert!((weights["gm_a"] - 0.85).abs() < 1e-9);
        assert!((weights["gm_b"] - 0.4).abs() < 1e-9);
    }

    fn error_from(source: &str, size: f64) -> Perception {
        let prediction = Prediction::new("obstacle", "ahead")
            .with_source("parent")
            .with_expectation("dist", Expectation::InRange { min: 0.0, max: 5.0 });
        Perception::Error(PredictionError {
            prediction,
            belief: Belief {
                source: source.into(),
                conjecture_name: "obstacle".into(),
                about: "ahead".into(),
                goal: None,
                values: Some(values([("dist", Value::Number(20.0))])),
            },
            size,
            carry_overs: 0,
        })
    }

    #[test]
    fn higher_gain_supersedes_lower() {
        let mut weights = HashMap::new();
        weights.insert("gm_a".to_string(), 0.9);
        weights.insert("gm_b".to_string(), 0.6);

        let kept = resolve_competing(
            vec![error_from("gm_b", 0.8), error_from("gm_a", 0.2)],
            &weights,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source(), "gm_a");
    }

    #[test]
    fn ties_keep_first_occurrence() {
        let weights = HashMap::new();
        let kept = resolve_competing(
            vec![error_from("gm_a", 0.2), error_from("gm_b", 0.8)],
            &weights,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source(), "gm_a");
    }
}
