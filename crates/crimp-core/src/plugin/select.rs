use crate::plugin::registry::PluginRegistry;
use crate::plugin::RegisteredAlgorithm;
use crate::{CrimpError, Result};

/// Relative importance of speed versus density during selection.
///
/// Only the proportion matters; weights are normalized to sum to one before
/// scoring. Negative, non-finite, or all-zero pairs are rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub throughput: f64,
    pub ratio: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            throughput: 0.7,
            ratio: 0.3,
        }
    }
}

impl ScoringWeights {
    pub fn new(throughput: f64, ratio: f64) -> Result<Self> {
        let weights = Self { throughput, ratio };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = !self.throughput.is_finite()
            || !self.ratio.is_finite()
            || self.throughput < 0.0
            || self.ratio < 0.0
            || (self.throughput == 0.0 && self.ratio == 0.0);
        if invalid {
            return Err(CrimpError::InvalidWeights {
                throughput: self.throughput,
                ratio: self.ratio,
            });
        }
        Ok(())
    }

    fn normalized(&self) -> (f64, f64) {
        let sum = self.throughput + self.ratio;
        (self.throughput / sum, self.ratio / sum)
    }
}

/// Picks the algorithm to run.
///
/// An explicit `override_name` bypasses scoring entirely. Otherwise every
/// registered algorithm is scored from its declared metadata:
/// `log10(throughput)` and `1 - ratio` are min-max normalized across the
/// candidate set and combined with the normalized weights. When a metric has
/// zero span it contributes the full norm of 1 for every candidate. Ties go
/// to the lexically smallest name, so selection is deterministic for a fixed
/// registry and weights.
///
/// # Errors
///
/// [`CrimpError::EmptyRegistry`] when nothing is registered,
/// [`CrimpError::AlgorithmNotFound`] for an unknown override, and
/// [`CrimpError::InvalidWeights`] for an unusable weight pair.
pub fn select(
    registry: &PluginRegistry,
    override_name: Option<&str>,
    weights: ScoringWeights,
) -> Result<RegisteredAlgorithm> {
    if registry.is_empty() {
        return Err(CrimpError::EmptyRegistry);
    }
    if let Some(name) = override_name {
        return registry
            .find_by_name(name)
            .ok_or_else(|| CrimpError::AlgorithmNotFound {
                name: name.to_string(),
            });
    }
    weights.validate()?;

    // Sorted by name, so keeping the first strictly-best score resolves ties
    // toward the lexically smallest name.
    let mut candidates = registry.snapshot();
    let (weight_throughput, weight_ratio) = weights.normalized();

    let log_throughput: Vec<f64> = candidates
        .iter()
        .map(|candidate| candidate.metadata.throughput_mbps.log10())
        .collect();
    let density: Vec<f64> = candidates
        .iter()
        .map(|candidate| 1.0 - candidate.metadata.ratio)
        .collect();
    let throughput_norms = min_max_normalize(&log_throughput);
    let density_norms = min_max_normalize(&density);

    let mut best_index = 0;
    let mut best_score = f64::NEG_INFINITY;
    for index in 0..candidates.len() {
        let score = weight_throughput * throughput_norms[index] + weight_ratio * density_norms[index];
        if score > best_score {
            best_score = score;
            best_index = index;
        }
    }

    let selected = candidates.swap_remove(best_index);
    tracing::debug!(
        algorithm = %selected.metadata.name,
        score = best_score,
        "selected compression algorithm"
    );
    Ok(selected)
}

fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if span <= f64::EPSILON {
        // Zero span carries no signal; every candidate gets full marks.
        return vec![1.0; values.len()];
    }
    values.iter().map(|value| (value - min) / span).collect()
}
