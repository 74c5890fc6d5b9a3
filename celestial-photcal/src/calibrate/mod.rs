//! Photometric calibration: fit the transformation from instrumental to
//! catalog magnitudes over matched pairs, rejecting outliers by iterative
//! sigma clipping.
//!
//! Two models are supported:
//!
//! - **constant**: `m_cat = m_inst + zp`
//! - **color term**: `m_cat = m_inst + zp + C · color`, with `C` either
//!   fitted or fixed
//!
//! Each pass fits the surviving pairs, computes residuals, and drops pairs
//! whose residual lies more than `sigma` standard deviations from the median.
//! Rejections are never undone. The loop stops when a pass rejects nothing or
//! after [`ClipConfig::max_iterations`] passes.

pub mod clip;
mod fit;

pub use clip::ClipConfig;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use fit::{fit_constant, fit_line, inverse_variance_weights};

const MIN_CONSTANT_PAIRS: usize = 2;
const MIN_COLOR_PAIRS: usize = 3;

/// One instrumental/catalog pair. Errors and color are optional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub instrumental: f64,
    pub instrumental_error: Option<f64>,
    pub catalog: f64,
    pub catalog_error: Option<f64>,
    pub color: Option<f64>,
}

impl CalibrationSample {
    pub fn new(instrumental: f64, catalog: f64) -> Self {
        Self {
            instrumental,
            instrumental_error: None,
            catalog,
            catalog_error: None,
            color: None,
        }
    }

    pub fn with_color(mut self, color: f64) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_errors(mut self, instrumental_error: f64, catalog_error: f64) -> Self {
        self.instrumental_error = Some(instrumental_error);
        self.catalog_error = Some(catalog_error);
        self
    }

    fn finite_color(&self) -> Option<f64> {
        self.color.filter(|c| c.is_finite())
    }

    /// `catalog - instrumental`.
    fn offset(&self) -> f64 {
        self.catalog - self.instrumental
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorFitOptions {
    /// Keep only pairs with color in `[lo, hi]`.
    pub color_limits: Option<(f64, f64)>,
    /// Hold the color term at this value and fit only the zero point.
    pub fixed_color_term: Option<f64>,
    /// Weight pairs by `1 / (σ_inst² + σ_cat²)`.
    pub weighted: bool,
}

/// A pair that survived clipping, with its calibrated magnitude.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibratedStar {
    /// Position in the input pair list.
    pub index: usize,
    pub instrumental: f64,
    pub catalog: f64,
    pub color: Option<f64>,
    pub calibrated: f64,
    /// `catalog - calibrated`.
    pub residual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    /// Mean offset (constant fit) or fitted intercept (color fit).
    pub zero_point: f64,
    pub zero_point_median: f64,
    pub color_term: Option<f64>,
    /// Standard error of the zero point.
    pub uncertainty: f64,
    /// Dispersion of the surviving residuals.
    pub stdev: f64,
    pub color_term_uncertainty: Option<f64>,
    /// Clipping passes run.
    pub iterations: usize,
    /// `true` for pairs used in the final fit, aligned with the input.
    pub used_mask: Vec<bool>,
    pub stars: Vec<CalibratedStar>,
}

impl CalibrationResult {
    pub fn used_count(&self) -> usize {
        self.used_mask.iter().filter(|&&u| u).count()
    }

    /// Calibrated magnitude for a new instrumental measurement.
    pub fn apply(&self, instrumental: f64, color: Option<f64>) -> f64 {
        let color_part = match (self.color_term, color) {
            (Some(c), Some(color)) => c * color,
            _ => 0.0,
        };
        instrumental + self.zero_point + color_part
    }
}

/// Fitted model for one pass.
#[derive(Debug, Clone, Copy)]
struct Model {
    zero_point: f64,
    zero_point_median: f64,
    color_term: Option<f64>,
    uncertainty: f64,
    color_term_uncertainty: Option<f64>,
}

impl Model {
    fn predict_offset(&self, sample: &CalibrationSample) -> f64 {
        match (self.color_term, sample.finite_color()) {
            (Some(c), Some(color)) => self.zero_point + c * color,
            _ => self.zero_point,
        }
    }
}

/// Settings shared by both fits.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibrator {
    pub clip: ClipConfig,
    /// Keep only pairs whose catalog magnitude is in `[lo, hi]`.
    pub magnitude_limits: Option<(f64, f64)>,
}

impl Calibrator {
    pub fn new(clip: ClipConfig) -> Self {
        Self {
            clip,
            magnitude_limits: None,
        }
    }

    pub fn with_magnitude_limits(mut self, limits: Option<(f64, f64)>) -> Self {
        self.magnitude_limits = limits;
        self
    }

    /// Fit `m_cat = m_inst + zp`.
    ///
    /// With `color_limits`, pairs lacking a color inside the limits are
    /// excluded first.
    ///
    /// # Errors
    /// [`Error::InsufficientCalibrationData`] if fewer than two pairs remain
    /// after filtering or clipping.
    pub fn constant(
        &self,
        samples: &[CalibrationSample],
        color_limits: Option<(f64, f64)>,
    ) -> Result<CalibrationResult> {
        let active = self.prefilter(samples, color_limits, false);
        self.clip_loop(samples, active, MIN_CONSTANT_PAIRS, |active| {
            let dm: Vec<f64> = active.iter().map(|&i| samples[i].offset()).collect();
            let fit = fit_constant(&dm);
            Ok(Model {
                zero_point: fit.mean,
                zero_point_median: fit.median,
                color_term: None,
                uncertainty: fit.uncertainty,
                color_term_uncertainty: None,
            })
        })
    }

    /// Fit `m_cat = m_inst + zp + C · color`. Pairs without a finite color
    /// are dropped.
    ///
    /// # Errors
    /// [`Error::InsufficientCalibrationData`] if fewer than three pairs (two
    /// when the color term is fixed) remain; [`Error::Fit`] if the colors
    /// have no spread.
    pub fn color(
        &self,
        samples: &[CalibrationSample],
        options: &ColorFitOptions,
    ) -> Result<CalibrationResult> {
        let active = self.prefilter(samples, options.color_limits, true);

        if let Some(c) = options.fixed_color_term {
            return self.clip_loop(samples, active, MIN_CONSTANT_PAIRS, |active| {
                let dm: Vec<f64> = active
                    .iter()
                    .map(|&i| samples[i].offset() - c * samples[i].finite_color().unwrap_or(0.0))
                    .collect();
                let fit = fit_constant(&dm);
                Ok(Model {
                    zero_point: fit.mean,
                    zero_point_median: fit.median,
                    color_term: Some(c),
                    uncertainty: fit.uncertainty,
                    color_term_uncertainty: None,
                })
            });
        }

        let weighted = options.weighted;
        self.clip_loop(samples, active, MIN_COLOR_PAIRS, |active| {
            let color: Vec<f64> = active
                .iter()
                .map(|&i| samples[i].finite_color().unwrap_or(0.0))
                .collect();
            let dm: Vec<f64> = active.iter().map(|&i| samples[i].offset()).collect();

            let weights = if weighted {
                let inst: Vec<_> = active.iter().map(|&i| samples[i].instrumental_error).collect();
                let cat: Vec<_> = active.iter().map(|&i| samples[i].catalog_error).collect();
                let weights = inverse_variance_weights(&inst, &cat);
                if weights.is_none() {
                    log::warn!("no magnitude errors available, fitting unweighted");
                }
                weights
            } else {
                None
            };

            let fit = fit_line(&color, &dm, weights.as_deref())?;
            let intercepts: Vec<f64> = dm
                .iter()
                .zip(&color)
                .map(|(d, c)| d - fit.color_term * c)
                .collect();

            Ok(Model {
                zero_point: fit.zero_point,
                zero_point_median: clip::median(&intercepts),
                color_term: Some(fit.color_term),
                uncertainty: fit.zero_point_sigma,
                color_term_uncertainty: Some(fit.color_term_sigma),
            })
        })
    }

    /// Indices of pairs that pass the finiteness, magnitude and color filters.
    fn prefilter(
        &self,
        samples: &[CalibrationSample],
        color_limits: Option<(f64, f64)>,
        require_color: bool,
    ) -> Vec<usize> {
        samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.instrumental.is_finite() && s.catalog.is_finite())
            .filter(|(_, s)| match self.magnitude_limits {
                Some((lo, hi)) => s.catalog >= lo && s.catalog <= hi,
                None => true,
            })
            .filter(|(_, s)| match (color_limits, s.finite_color()) {
                (Some((lo, hi)), Some(c)) => c >= lo && c <= hi,
                (Some(_), None) => false,
                (None, color) => !require_color || color.is_some(),
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn clip_loop<F>(
        &self,
        samples: &[CalibrationSample],
        mut active: Vec<usize>,
        required: usize,
        fit: F,
    ) -> Result<CalibrationResult>
    where
        F: Fn(&[usize]) -> Result<Model>,
    {
        if active.len() < required {
            return Err(Error::insufficient(required, active.len()));
        }

        let mut model = fit(&active)?;
        let mut iterations = 0;

        while iterations < self.clip.max_iterations {
            let residuals: Vec<f64> = active
                .iter()
                .map(|&i| samples[i].offset() - model.predict_offset(&samples[i]))
                .collect();
            let keep = clip::survivors(&residuals, self.clip.sigma);
            iterations += 1;

            let rejected = keep.iter().filter(|&&k| !k).count();
            log::debug!(
                "clip pass {}: {} of {} pairs rejected",
                iterations,
                rejected,
                active.len()
            );
            if rejected == 0 {
                break;
            }

            active = active
                .into_iter()
                .zip(keep)
                .filter_map(|(i, k)| k.then_some(i))
                .collect();
            if active.len() < required {
                return Err(Error::insufficient(required, active.len()));
            }
            model = fit(&active)?;
        }

        Ok(self.finish(samples, &active, model, iterations))
    }

    fn finish(
        &self,
        samples: &[CalibrationSample],
        active: &[usize],
        model: Model,
        iterations: usize,
    ) -> CalibrationResult {
        let mut used_mask = vec![false; samples.len()];
        let stars: Vec<CalibratedStar> = active
            .iter()
            .map(|&i| {
                used_mask[i] = true;
                let sample = &samples[i];
                let calibrated = sample.instrumental + model.predict_offset(sample);
                CalibratedStar {
                    index: i,
                    instrumental: sample.instrumental,
                    catalog: sample.catalog,
                    color: sample.finite_color(),
                    calibrated,
                    residual: sample.catalog - calibrated,
                }
            })
            .collect();

        let residuals: Vec<f64> = stars.iter().map(|s| s.residual).collect();
        CalibrationResult {
            zero_point: model.zero_point,
            zero_point_median: model.zero_point_median,
            color_term: model.color_term,
            uncertainty: model.uncertainty,
            stdev: clip::std_dev(&residuals),
            color_term_uncertainty: model.color_term_uncertainty,
            iterations,
            used_mask,
            stars,
        }
    }
}
