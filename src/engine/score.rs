use crate::core::{FeatureValue, FeatureVector};
use crate::ruleset::{MissingPolicy, ScoringConfig};

/// One dimension's share of the risk score.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub dimension: String,
    /// Weight after renormalization over the usable dimensions.
    pub weight: f64,
    /// Normalized feature value, or the policy's stand-in when missing.
    pub value: f64,
    pub contribution: f64,
    pub imputed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub score: f64,
    /// In dimension name order.
    pub contributions: Vec<Contribution>,
}

impl ScoreBreakdown {
    /// Largest contributors by absolute contribution, ties by name.
    pub fn top(&self, n: usize) -> Vec<&Contribution> {
        let mut ranked: Vec<&Contribution> = self.contributions.iter().collect();
        ranked.sort_by(|a, b| {
            b.contribution
                .abs()
                .total_cmp(&a.contribution.abs())
                .then_with(|| a.dimension.cmp(&b.dimension))
        });
        ranked.truncate(n);
        ranked
    }
}

/// Combine the feature vector into a risk score in [0, 1].
///
/// Weighted sum over the configured dimensions, summed in name order so the
/// result is bit-reproducible. Missing dimensions follow the configured
/// [`MissingPolicy`].
pub fn score(features: &FeatureVector, scoring: &ScoringConfig) -> ScoreBreakdown {
    let mut terms = Vec::with_capacity(scoring.weights.len());
    for (dimension, &weight) in &scoring.weights {
        let (value, imputed) = match features.get(dimension) {
            Some(FeatureValue::Present { normalized, .. }) => (*normalized, false),
            _ => match scoring.missing {
                MissingPolicy::Renormalize => continue,
                MissingPolicy::Pessimistic => (1.0, true),
                MissingPolicy::Optimistic => (0.0, true),
            },
        };
        terms.push((dimension, weight, value, imputed));
    }

    let total_weight: f64 = terms.iter().map(|t| t.1).sum();
    if total_weight <= 0.0 {
        return ScoreBreakdown {
            score: 0.0,
            contributions: Vec::new(),
        };
    }

    let contributions: Vec<Contribution> = terms
        .into_iter()
        .map(|(dimension, weight, value, imputed)| {
            let weight = weight / total_weight;
            Contribution {
                dimension: dimension.clone(),
                weight,
                value,
                contribution: weight * value,
                imputed,
            }
        })
        .collect();

    let mut total = 0.0;
    for c in &contributions {
        total += c.contribution;
    }

    ScoreBreakdown {
        score: total.clamp(0.0, 1.0),
        contributions,
    }
}
