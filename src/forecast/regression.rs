use nalgebra::{DMatrix, DVector};

use crate::config::MAX_AR_COEFFICIENT;

/// Smallest singular value, relative to the largest, below which the
/// scaled design counts as rank deficient.
const SINGULAR_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OlsFit {
    pub coefficients: Vec<f64>,
    pub residuals: Vec<f64>,
    pub r_squared: Option<f64>,
}

/// Ordinary least squares of `y` on the rows of `design`.
///
/// Column 0 is the intercept. The other columns are centered and scaled
/// before an SVD solve so the level of a regressor does not affect the rank
/// decision; coefficients are mapped back to the original units. Returns
/// None when the design is rank deficient.
pub(crate) fn ols(design: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let n = design.len();
    let p = design.first()?.len();
    if p == 0 || n != y.len() || n < p || design.iter().any(|row| row.len() != p) {
        return None;
    }

    let mut centers = vec![0.0; p];
    let mut scales = vec![1.0; p];
    for k in 1..p {
        let mu = design.iter().map(|row| row[k]).sum::<f64>() / n as f64;
        let var = design.iter().map(|row| (row[k] - mu) * (row[k] - mu)).sum::<f64>() / n as f64;
        let sd = var.sqrt();
        if sd <= f64::EPSILON * mu.abs().max(1.0) {
            return None;
        }
        centers[k] = mu;
        scales[k] = sd;
    }

    let x = DMatrix::from_fn(n, p, |i, k| {
        if k == 0 {
            1.0
        } else {
            (design[i][k] - centers[k]) / scales[k]
        }
    });
    let target = DVector::from_column_slice(y);

    let svd = x.clone().svd(true, true);
    let largest = svd.singular_values.max();
    if svd.singular_values.min() <= SINGULAR_TOLERANCE * largest {
        return None;
    }
    let scaled = svd.solve(&target, 0.0).ok()?;

    let residuals: Vec<f64> = (&target - &x * &scaled).iter().copied().collect();

    let mut coefficients = vec![0.0; p];
    coefficients[0] = scaled[0];
    for k in 1..p {
        coefficients[k] = scaled[k] / scales[k];
        coefficients[0] -= coefficients[k] * centers[k];
    }

    let mean_y = y.iter().sum::<f64>() / n as f64;
    let sst: f64 = y.iter().map(|v| (v - mean_y) * (v - mean_y)).sum();
    let ssr: f64 = residuals.iter().map(|e| e * e).sum();
    let r_squared = (sst > 0.0).then(|| 1.0 - ssr / sst);

    Some(OlsFit {
        coefficients,
        residuals,
        r_squared,
    })
}

/// Lag-1 regression of residuals on themselves through the origin, clamped
/// to keep the error process stationary. Zero when undefined.
pub(crate) fn ar1_coefficient(residuals: &[f64]) -> f64 {
    let (num, den) = residuals
        .windows(2)
        .fold((0.0, 0.0), |(num, den), w| (num + w[1] * w[0], den + w[0] * w[0]));
    if den <= f64::EPSILON {
        return 0.0;
    }
    (num / den).clamp(-MAX_AR_COEFFICIENT, MAX_AR_COEFFICIENT)
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_linear_relation() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let design: Vec<Vec<f64>> = xs.iter().map(|&x| vec![1.0, x]).collect();
        let y: Vec<f64> = xs.iter().map(|x| 3.0 + 2.0 * x).collect();
        let fit = ols(&design, &y).expect("full rank");
        assert!((fit.coefficients[0] - 3.0).abs() < 1e-9);
        assert!((fit.coefficients[1] - 2.0).abs() < 1e-9);
        assert!(fit.residuals.iter().all(|e| e.abs() < 1e-9));
        assert!((fit.r_squared.expect("non-constant y") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn collinear_design_is_singular() {
        let design: Vec<Vec<f64>> = (0..6).map(|_| vec![1.0, 7.0]).collect();
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(ols(&design, &y).is_none());
    }

    #[test]
    fn high_level_regressor_is_not_singular() {
        let control: Vec<f64> = (0..12)
            .map(|i| 2_000_000.0 + 20.0 * (0.7 * i as f64).sin())
            .collect();
        let design: Vec<Vec<f64>> = control.iter().map(|&c| vec![1.0, c]).collect();
        let y: Vec<f64> = control.iter().map(|c| 1000.0 + 0.5 * c).collect();
        let fit = ols(&design, &y).expect("well posed");
        assert!((fit.coefficients[1] - 0.5).abs() < 1e-6, "beta={}", fit.coefficients[1]);
        assert!((fit.coefficients[0] - 1000.0).abs() < 1e-3, "alpha={}", fit.coefficients[0]);
        assert!(fit.residuals.iter().all(|e| e.abs() < 1e-5));
    }

    #[test]
    fn trend_collinear_with_control_is_singular() {
        let design: Vec<Vec<f64>> = (0..8).map(|t| vec![1.0, 5.0 + 2.0 * t as f64, t as f64]).collect();
        let y: Vec<f64> = (0..8).map(|t| t as f64 * 1.5).collect();
        assert!(ols(&design, &y).is_none());
    }

    #[test]
    fn constant_target_has_no_r_squared() {
        let design: Vec<Vec<f64>> = (0..4).map(|i| vec![1.0, i as f64]).collect();
        let fit = ols(&design, &[2.0; 4]).expect("full rank");
        assert_eq!(fit.r_squared, None);
    }

    #[test]
    fn ar1_of_alternating_residuals_is_negative_and_clamped() {
        let phi = ar1_coefficient(&[1.0, -1.0, 1.0, -1.0, 1.0]);
        assert_eq!(phi, -MAX_AR_COEFFICIENT);
    }

    #[test]
    fn ar1_of_geometric_residuals() {
        let phi = ar1_coefficient(&[8.0, 4.0, 2.0, 1.0]);
        assert!((phi - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ar1_of_zero_residuals_is_zero() {
        assert_eq!(ar1_coefficient(&[0.0, 0.0, 0.0]), 0.0);
    }
}
