//! Sample statistics and the sigma-clipping rejection rule.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CLIP_SIGMA: f64 = 3.0;
pub const DEFAULT_CLIP_ITERATIONS: usize = 5;

/// Residuals this close to the median are never rejected, so rounding noise
/// in an exact fit does not count as scatter.
const MIN_CUTOFF: f64 = 1e-9;

/// Iterative rejection about the median: a residual survives while
/// `|r - median(r)| <= sigma * std(r)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub sigma: f64,
    /// Upper bound on reject-and-refit passes. Zero disables clipping.
    pub max_iterations: usize,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_CLIP_SIGMA,
            max_iterations: DEFAULT_CLIP_ITERATIONS,
        }
    }
}

impl ClipConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(Error::Config(format!(
                "clip sigma must be positive, got {}",
                self.sigma
            )));
        }
        Ok(())
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    libm::sqrt(var)
}

/// Survivor flags for one clipping pass over `residuals`.
pub(crate) fn survivors(residuals: &[f64], sigma: f64) -> Vec<bool> {
    let center = median(residuals);
    let cutoff = (sigma * std_dev(residuals)).max(MIN_CUTOFF);
    residuals
        .iter()
        .map(|r| libm::fabs(r - center) <= cutoff)
        .collect()
}
