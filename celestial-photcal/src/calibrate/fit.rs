use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

use super::clip::{mean, median, std_dev};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ConstantFit {
    pub mean: f64,
    pub median: f64,
    pub uncertainty: f64,
}

pub(crate) fn fit_constant(dm: &[f64]) -> ConstantFit {
    ConstantFit {
        mean: mean(dm),
        median: median(dm),
        uncertainty: std_dev(dm) / libm::sqrt(dm.len() as f64),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LineFit {
    pub zero_point: f64,
    pub color_term: f64,
    pub zero_point_sigma: f64,
    pub color_term_sigma: f64,
}

/// Least-squares `dm = zp + C * color`, optionally weighted.
pub(crate) fn fit_line(color: &[f64], dm: &[f64], weights: Option<&[f64]>) -> Result<LineFit> {
    let n = dm.len();
    if color.len() != n || weights.is_some_and(|w| w.len() != n) {
        return Err(Error::Fit("design matrix and residual lengths differ".into()));
    }
    if std_dev(color) < 1e-12 {
        return Err(Error::Fit(
            "color index has no spread; fix the color term or use a constant fit".into(),
        ));
    }

    let a = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { color[i] });
    let b = DVector::from_column_slice(dm);
    let w = match weights {
        Some(w) => DVector::from_column_slice(w),
        None => DVector::from_element(n, 1.0),
    };

    let coeffs = solve_weighted(&a, &b, &w)?;
    let residuals = &b - &a * &coeffs;
    let sigma = compute_sigma(&a, &residuals, &w);

    Ok(LineFit {
        zero_point: coeffs[0],
        color_term: coeffs[1],
        zero_point_sigma: sigma[0],
        color_term_sigma: sigma[1],
    })
}

fn solve_weighted(a: &DMatrix<f64>, b: &DVector<f64>, w: &DVector<f64>) -> Result<DVector<f64>> {
    let sqrt_w = w.map(libm::sqrt);
    let rows = a.nrows();
    let cols = a.ncols();
    let a_w = DMatrix::from_fn(rows, cols, |i, j| a[(i, j)] * sqrt_w[i]);
    let b_w = DVector::from_fn(rows, |i, _| b[i] * sqrt_w[i]);
    let svd = a_w.svd(true, true);
    svd.solve(&b_w, 1e-10)
        .map_err(|e| Error::Fit(format!("SVD solve failed: {}", e)))
}

/// Parameter sigmas from `s² · (AᵀWA)⁻¹`, `s²` the weighted residual
/// variance per degree of freedom.
fn compute_sigma(a: &DMatrix<f64>, residuals: &DVector<f64>, w: &DVector<f64>) -> Vec<f64> {
    let n = a.nrows();
    let m = a.ncols();
    let dof = n.saturating_sub(m).max(1);
    let sqrt_w = w.map(libm::sqrt);
    let a_w = DMatrix::from_fn(n, m, |i, j| a[(i, j)] * sqrt_w[i]);
    let r_w = DVector::from_fn(n, |i, _| residuals[i] * sqrt_w[i]);
    let s2 = r_w.dot(&r_w) / dof as f64;
    let ata = a_w.transpose() * &a_w;
    match ata.try_inverse() {
        Some(inv) => (0..m).map(|j| libm::sqrt((s2 * inv[(j, j)]).abs())).collect(),
        None => vec![f64::NAN; m],
    }
}

/// Inverse-variance weights `1 / (σ_inst² + σ_cat²)`.
///
/// A pair with neither error known takes the median variance of the others.
/// Returns `None` when no pair has a usable error.
pub(crate) fn inverse_variance_weights(
    instrumental_error: &[Option<f64>],
    catalog_error: &[Option<f64>],
) -> Option<Vec<f64>> {
    let variances: Vec<Option<f64>> = instrumental_error
        .iter()
        .zip(catalog_error)
        .map(|(si, sc)| {
            let si = si.filter(|e| e.is_finite());
            let sc = sc.filter(|e| e.is_finite());
            if si.is_none() && sc.is_none() {
                return None;
            }
            let var = si.map_or(0.0, |e| e * e) + sc.map_or(0.0, |e| e * e);
            Some(var.max(1e-12))
        })
        .collect();

    let known: Vec<f64> = variances.iter().flatten().copied().collect();
    if known.is_empty() {
        return None;
    }
    let fallback = median(&known);
    Some(
        variances
            .into_iter()
            .map(|v| 1.0 / v.unwrap_or(fallback))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constant_fit() {
        let fit = fit_constant(&[25.0, 25.2, 24.8, 25.0]);
        assert_abs_diff_eq!(fit.mean, 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.median, 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.uncertainty, libm::sqrt(0.02) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_line_recovers_exact_coefficients() {
        let color: Vec<f64> = (0..10).map(|i| 0.1 * i as f64).collect();
        let dm: Vec<f64> = color.iter().map(|c| 24.5 - 0.08 * c).collect();
        let fit = fit_line(&color, &dm, None).unwrap();
        assert_abs_diff_eq!(fit.zero_point, 24.5, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.color_term, -0.08, epsilon = 1e-9);
        assert!(fit.zero_point_sigma < 1e-9);
    }

    #[test]
    fn test_line_sigmas_are_positive_with_noise() {
        let color: Vec<f64> = (0..20).map(|i| 0.05 * i as f64).collect();
        let dm: Vec<f64> = color
            .iter()
            .enumerate()
            .map(|(i, c)| 25.0 + 0.1 * c + 0.02 * libm::sin(i as f64 * 2.3))
            .collect();
        let fit = fit_line(&color, &dm, None).unwrap();
        assert!(fit.zero_point_sigma > 0.0 && fit.zero_point_sigma < 0.02);
        assert!(fit.color_term_sigma > 0.0 && fit.color_term_sigma < 0.05);
    }

    #[test]
    fn test_weights_pull_toward_precise_points() {
        let color = vec![0.0, 0.5, 1.0, 0.0, 0.5, 1.0];
        let dm = vec![25.0, 25.05, 25.1, 25.5, 25.55, 25.6];
        let weights = vec![1e4, 1e4, 1e4, 1.0, 1.0, 1.0];
        let fit = fit_line(&color, &dm, Some(&weights)).unwrap();
        assert!((fit.zero_point - 25.0).abs() < 0.01);
        assert_abs_diff_eq!(fit.color_term, 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_flat_color_is_rejected() {
        let err = fit_line(&[0.5, 0.5, 0.5], &[25.0, 25.1, 24.9], None).unwrap_err();
        assert!(matches!(err, Error::Fit(_)));
    }

    #[test]
    fn test_inverse_variance_weights() {
        let inst = vec![Some(0.1), None, Some(f64::NAN), Some(0.2)];
        let cat = vec![None, None, None, Some(0.0)];
        let w = inverse_variance_weights(&inst, &cat).unwrap();
        assert_abs_diff_eq!(w[0], 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(w[3], 25.0, epsilon = 1e-9);
        // no errors: median of 0.01 and 0.04
        assert_abs_diff_eq!(w[1], 1.0 / 0.025, epsilon = 1e-9);
        assert_abs_diff_eq!(w[2], 1.0 / 0.025, epsilon = 1e-9);

        assert!(inverse_variance_weights(&[None, None], &[None, None]).is_none());
    }
}
