//! Per-alternative value scoring against weighted axes.
//!
//! Every alternative receives a score in \[0.0, 1.0\] on each of the five
//! axes; the telos-weighted sum becomes the alternative's total. Weights
//! missing from the request default to 1.0 and the vector is normalized
//! to sum 1; an all-zero weight vector falls back to the uniform
//! distribution.

pub mod drift;

pub use drift::{DriftSnapshot, DriftTracker};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::schema::request::AltItem;

/// The five value axes, in canonical order.
pub const AXES: [ValueAxis; 5] = [
    ValueAxis::Utility,
    ValueAxis::Safety,
    ValueAxis::Feasibility,
    ValueAxis::Alignment,
    ValueAxis::Novelty,
];

/// A value axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueAxis {
    /// Expected benefit of the action.
    Utility,
    /// Absence of foreseeable harm.
    Safety,
    /// Likelihood the action can actually be carried out.
    Feasibility,
    /// Fit with the user's stated goals and constraints.
    Alignment,
    /// Novelty relative to the other alternatives.
    Novelty,
}

impl ValueAxis {
    /// Wire label for the axis.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utility => "utility",
            Self::Safety => "safety",
            Self::Feasibility => "feasibility",
            Self::Alignment => "alignment",
            Self::Novelty => "novelty",
        }
    }
}

/// Per-axis scores for one alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisScores {
    /// Axis label -> score in \[0.0, 1.0\].
    pub scores: FxHashMap<String, f32>,
    /// Weighted total in \[0.0, 1.0\].
    pub total: f32,
}

/// Aggregated value output for the response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValuesOut {
    /// Per-axis scores of the chosen alternative.
    pub scores: FxHashMap<String, f32>,
    /// Weighted total of the chosen alternative.
    pub total: f32,
    /// Axes sorted by weighted contribution, strongest first.
    pub top_factors: Vec<String>,
    /// One-line explanation of the total.
    pub rationale: String,
}

/// Normalize request weights over the five axes.
///
/// Missing axes default to 1.0. The result sums to 1.0; an all-zero
/// input yields the uniform distribution.
#[must_use]
pub fn normalize_weights(telos_weights: &FxHashMap<String, f64>) -> [f32; 5] {
    let mut weights = [0.0f32; 5];
    for (i, axis) in AXES.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let w = telos_weights
            .get(axis.as_str())
            .copied()
            .unwrap_or(1.0)
            .max(0.0) as f32;
        weights[i] = w;
    }
    let sum: f32 = weights.iter().sum();
    if sum <= f32::EPSILON {
        return [0.2; 5];
    }
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Deterministic heuristic scoring of one alternative.
///
/// Utility leans on the caller-provided score; alignment measures token
/// overlap with the stated goals; novelty measures distance from the
/// other alternatives' vocabulary. The heuristics are intentionally
/// simple – the point is a stable, auditable ordering, not a learned
/// model.
#[must_use]
pub fn score_alternative(
    alt: &AltItem,
    goals: &[String],
    siblings: &[AltItem],
    weights: &[f32; 5],
) -> AxisScores {
    let text = format!("{} {}", alt.title, alt.description);
    let tokens = token_set(&text);

    let utility = alt.score.clamp(0.0, 1.0) as f32;

    // Longer, hedged descriptions read as less safe-by-construction; a
    // cheap proxy bounded away from the extremes.
    let caution_hits = ["risk", "danger", "harm", "irreversible"]
        .iter()
        .filter(|w| text.to_lowercase().contains(*w))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let safety = (1.0 - 0.2 * caution_hits as f32).clamp(0.0, 1.0);

    #[allow(clippy::cast_precision_loss)]
    let feasibility = (1.0 / (1.0 + tokens.len() as f32 / 60.0)).clamp(0.2, 1.0);

    let goal_tokens: std::collections::BTreeSet<String> = goals
        .iter()
        .flat_map(|g| token_set(g))
        .collect();
    let alignment = if goal_tokens.is_empty() {
        0.5
    } else {
        #[allow(clippy::cast_precision_loss)]
        let overlap = tokens.intersection(&goal_tokens).count() as f32;
        #[allow(clippy::cast_precision_loss)]
        let denom = goal_tokens.len() as f32;
        (overlap / denom).clamp(0.0, 1.0)
    };

    let novelty = if siblings.len() <= 1 {
        0.5
    } else {
        let mut shared = 0usize;
        let mut considered = 0usize;
        for other in siblings {
            if other.id == alt.id {
                continue;
            }
            let other_tokens = token_set(&format!("{} {}", other.title, other.description));
            shared += tokens.intersection(&other_tokens).count();
            considered += tokens.len().max(1);
        }
        #[allow(clippy::cast_precision_loss)]
        let similarity = shared as f32 / considered.max(1) as f32;
        (1.0 - similarity).clamp(0.0, 1.0)
    };

    let axis_values = [utility, safety, feasibility, alignment, novelty];
    let mut scores = FxHashMap::default();
    let mut total = 0.0f32;
    for (i, axis) in AXES.iter().enumerate() {
        scores.insert(axis.as_str().to_string(), axis_values[i]);
        total += axis_values[i] * weights[i];
    }

    AxisScores {
        scores,
        total: total.clamp(0.0, 1.0),
    }
}

/// Build the response-level [`ValuesOut`] from the chosen alternative's
/// axis scores.
#[must_use]
pub fn values_out(chosen: &AxisScores, weights: &[f32; 5]) -> ValuesOut {
    let mut contributions: Vec<(String, f32)> = AXES
        .iter()
        .enumerate()
        .map(|(i, axis)| {
            let score = chosen.scores.get(axis.as_str()).copied().unwrap_or(0.0);
            (axis.as_str().to_string(), score * weights[i])
        })
        .collect();
    contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let top_factors: Vec<String> = contributions.iter().take(3).map(|(a, _)| a.clone()).collect();
    let rationale = format!(
        "total {:.3} driven by {}",
        chosen.total,
        top_factors.join(", ")
    );

    ValuesOut {
        scores: chosen.scores.clone(),
        total: chosen.total,
        top_factors,
        rationale,
    }
}

fn token_set(text: &str) -> std::collections::BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alt(id: &str, title: &str, score: f64) -> AltItem {
        AltItem {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            score,
            extra: FxHashMap::default(),
        }
    }

    #[test]
    fn missing_weights_default_and_normalize() {
        let weights = normalize_weights(&FxHashMap::default());
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((weights[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let mut map = FxHashMap::default();
        for axis in AXES {
            map.insert(axis.as_str().to_string(), 0.0);
        }
        assert_eq!(normalize_weights(&map), [0.2; 5]);
    }

    #[test]
    fn explicit_weight_dominates() {
        let mut map = FxHashMap::default();
        map.insert("safety".to_string(), 10.0);
        let weights = normalize_weights(&map);
        // safety index is 1
        assert!(weights[1] > weights[0]);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn higher_caller_score_raises_total_under_utility_weighting() {
        let mut map = FxHashMap::default();
        map.insert("utility".to_string(), 100.0);
        let weights = normalize_weights(&map);

        let strong = alt("a", "walk", 0.9);
        let weak = alt("b", "drive", 0.1);
        let siblings = vec![strong.clone(), weak.clone()];

        let sa = score_alternative(&strong, &[], &siblings, &weights);
        let sb = score_alternative(&weak, &[], &siblings, &weights);
        assert!(sa.total > sb.total);
    }

    #[test]
    fn values_out_names_top_factors() {
        let weights = normalize_weights(&FxHashMap::default());
        let a = alt("a", "take the train to work", 0.8);
        let scores = score_alternative(&a, &[], &[a.clone()], &weights);
        let out = values_out(&scores, &weights);
        assert_eq!(out.top_factors.len(), 3);
        assert!(out.rationale.contains("driven by"));
        assert!((out.total - scores.total).abs() < f32::EPSILON);
    }
}
