use serde::{Deserialize, Serialize};
use tracing::debug;

use super::regression::{ar1_coefficient, dot, ols};
use crate::config::{DEFAULT_MIN_HISTORY, HORIZON_DIVISOR};
use crate::error::{EngineError, Result};
use crate::types::{CounterfactualPoint, CounterfactualResult, ModelFit, TimeSeries};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Trailing periods held out as the forecast horizon. Defaults to the last quarter.
    pub horizon: Option<usize>,
    /// Minimum pre-horizon periods needed to fit.
    pub min_history: usize,
    /// Adds a linear time trend to the regression.
    pub include_trend: bool,
    /// Models residuals as AR(1) and carries the last residual into the horizon.
    pub ar_errors: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: None,
            min_history: DEFAULT_MIN_HISTORY,
            include_trend: false,
            ar_errors: true,
        }
    }
}

/// Horizon length for a series of `n` periods.
pub fn resolve_horizon(n: usize, horizon: Option<usize>) -> Result<usize> {
    match horizon {
        None => Ok((n / HORIZON_DIVISOR).max(1)),
        Some(h) if h == 0 || h >= n => Err(EngineError::InvalidParameter(format!(
            "horizon must lie in [1, {}), got {h}",
            n.max(1)
        ))),
        Some(h) => Ok(h),
    }
}

/// Predicts what `test` would have been from `control`, with the trailing
/// horizon treated as post-launch.
///
/// The test series is regressed on the control (and optionally a trend) over
/// the pre-horizon periods. Training periods get one-step-ahead predictions;
/// horizon periods get the regression value plus the last training residual
/// decayed by the AR(1) coefficient.
pub fn forecast_counterfactual(
    test: &TimeSeries,
    control: &TimeSeries,
    config: &ForecastConfig,
) -> Result<CounterfactualResult> {
    let n = test.len();
    if n == 0 {
        return Err(EngineError::InsufficientHistory(format!(
            "test market {} has an empty series",
            test.market_id()
        )));
    }
    let horizon = resolve_horizon(n, config.horizon)?;
    let xs = align_control(test, control)?;

    let training = n - horizon;
    let params = if config.include_trend { 3 } else { 2 };
    if training < config.min_history.max(params + 1) {
        return Err(EngineError::InsufficientHistory(format!(
            "pair ({}, {}): {training} pre-horizon periods, need at least {}",
            test.market_id(),
            control.market_id(),
            config.min_history.max(params + 1)
        )));
    }

    let design: Vec<Vec<f64>> = xs
        .iter()
        .enumerate()
        .map(|(t, &x)| {
            let mut row = vec![1.0, x];
            if config.include_trend {
                row.push(t as f64);
            }
            row
        })
        .collect();
    let actual: Vec<f64> = test.values().collect();

    let fit = ols(&design[..training], &actual[..training]).ok_or_else(|| {
        EngineError::InsufficientData(format!(
            "pair ({}, {}): regression design is singular over the training periods",
            test.market_id(),
            control.market_id()
        ))
    })?;
    let phi = if config.ar_errors {
        ar1_coefficient(&fit.residuals)
    } else {
        0.0
    };
    let last_residual = fit.residuals.last().copied().unwrap_or(0.0);

    let points = test
        .points()
        .iter()
        .enumerate()
        .map(|(t, point)| {
            let base = dot(&design[t], &fit.coefficients);
            let (predicted, is_forecast) = if t < training {
                let carry = if t == 0 { 0.0 } else { phi * fit.residuals[t - 1] };
                (base + carry, false)
            } else {
                let steps = (t - training + 1) as i32;
                (base + phi.powi(steps) * last_residual, true)
            };
            CounterfactualPoint {
                period: point.period,
                actual: point.value,
                predicted,
                is_forecast,
            }
        })
        .collect();

    debug!(
        test_market = test.market_id(),
        control_market = control.market_id(),
        training,
        horizon,
        phi,
        "fitted counterfactual"
    );

    Ok(CounterfactualResult {
        test_market: test.market_id().to_string(),
        control_market: control.market_id().to_string(),
        horizon,
        points,
        model: ModelFit {
            intercept: fit.coefficients[0],
            control_coef: fit.coefficients[1],
            trend_coef: config.include_trend.then(|| fit.coefficients[2]),
            ar_coef: config.ar_errors.then_some(phi),
            r_squared: fit.r_squared,
            training_periods: training,
        },
    })
}

/// Control values on each of the test series' periods.
fn align_control(test: &TimeSeries, control: &TimeSeries) -> Result<Vec<f64>> {
    test.periods()
        .map(|period| {
            control.value_at(period).ok_or_else(|| {
                EngineError::InsufficientData(format!(
                    "control market {} has no value for period {period} of test market {}",
                    control.market_id(),
                    test.market_id()
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(id: &str, values: &[f64]) -> TimeSeries {
        TimeSeries::from_pairs(
            id,
            values.iter().enumerate().map(|(i, v)| (100 + i as i64, *v)),
        )
        .expect("valid series")
    }

    fn control_values(n: usize) -> Vec<f64> {
        (0..n).map(|i| 50.0 + 10.0 * ((i as f64) * 0.7).sin() + i as f64).collect()
    }

    #[test]
    fn output_is_aligned_to_the_test_series() {
        let xs = control_values(12);
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 + 2.0 * x).collect();
        let result = forecast_counterfactual(
            &series("T", &ys),
            &series("C", &xs),
            &ForecastConfig::default(),
        )
        .expect("fit");

        assert_eq!(result.points.len(), 12);
        assert_eq!(result.horizon, 3);
        let periods: Vec<i64> = result.points.iter().map(|p| p.period).collect();
        assert_eq!(periods, (100..112).collect::<Vec<_>>());
        assert_eq!(result.forecast_points().count(), 3);
        assert!(result.points[..9].iter().all(|p| !p.is_forecast));
        assert_eq!(result.model.training_periods, 9);
    }

    #[test]
    fn exact_relation_is_forecast_exactly() {
        let xs = control_values(16);
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 + 2.0 * x).collect();
        let result =
            forecast_counterfactual(&series("T", &ys), &series("C", &xs), &ForecastConfig::default())
                .expect("fit");
        for p in &result.points {
            assert!((p.predicted - p.actual).abs() < 1e-6, "{p:?}");
        }
        assert!((result.model.control_coef - 2.0).abs() < 1e-9);
    }

    #[test]
    fn lift_in_horizon_shows_as_gap() {
        let xs = control_values(16);
        let mut ys: Vec<f64> = xs.iter().map(|x| 5.0 + 2.0 * x).collect();
        for y in ys.iter_mut().skip(12) {
            *y += 20.0;
        }
        let result =
            forecast_counterfactual(&series("T", &ys), &series("C", &xs), &ForecastConfig::default())
                .expect("fit");
        for p in result.forecast_points() {
            assert!((p.actual - p.predicted - 20.0).abs() < 1e-6);
        }
    }

    #[test]
    fn trend_term_is_reported() {
        let xs = control_values(16);
        let ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(t, x)| 1.0 + x + 0.5 * t as f64)
            .collect();
        let config = ForecastConfig {
            include_trend: true,
            ..ForecastConfig::default()
        };
        let result =
            forecast_counterfactual(&series("T", &ys), &series("C", &xs), &config).expect("fit");
        let trend = result.model.trend_coef.expect("trend fitted");
        assert!((trend - 0.5).abs() < 1e-6);
    }

    #[test]
    fn short_history_is_rejected() {
        let xs = control_values(10);
        let ys = xs.clone();
        // default horizon 2 leaves 8, explicit horizon 3 leaves 7
        let config = ForecastConfig {
            horizon: Some(3),
            ..ForecastConfig::default()
        };
        let err = forecast_counterfactual(&series("T", &ys), &series("C", &xs), &config)
            .expect_err("7 < 8");
        assert!(matches!(err, EngineError::InsufficientHistory(_)));
    }

    #[test]
    fn horizon_bounds_are_validated() {
        let xs = control_values(12);
        for h in [0, 12, 20] {
            let config = ForecastConfig {
                horizon: Some(h),
                ..ForecastConfig::default()
            };
            let err = forecast_counterfactual(&series("T", &xs), &series("C", &xs), &config)
                .expect_err("out of range horizon");
            assert!(matches!(err, EngineError::InvalidParameter(_)), "h={h}");
        }
    }

    #[test]
    fn control_missing_a_period_is_insufficient_data() {
        let xs = control_values(12);
        let test = series("T", &xs);
        let control = series("C", &xs[..11]);
        let err = forecast_counterfactual(&test, &control, &ForecastConfig::default())
            .expect_err("misaligned");
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn high_level_kpis_fit_without_singularity() {
        let xs: Vec<f64> = (0..16)
            .map(|i| 2_000_000.0 + 20.0 * (0.7 * i as f64).sin())
            .collect();
        let ys: Vec<f64> = xs.iter().map(|x| 1000.0 + 0.5 * x).collect();
        let result =
            forecast_counterfactual(&series("T", &ys), &series("C", &xs), &ForecastConfig::default())
                .expect("well-posed fit");
        assert!((result.model.control_coef - 0.5).abs() < 1e-6);
        for p in &result.points {
            assert!((p.predicted - p.actual).abs() < 1e-3, "{p:?}");
        }
    }

    #[test]
    fn constant_control_is_singular() {
        let ys = control_values(12);
        let xs = vec![3.0; 12];
        let err = forecast_counterfactual(&series("T", &ys), &series("C", &xs), &ForecastConfig::default())
            .expect_err("singular");
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn default_horizon_is_a_quarter_with_floor_of_one() {
        assert_eq!(resolve_horizon(12, None).expect("ok"), 3);
        assert_eq!(resolve_horizon(3, None).expect("ok"), 1);
        assert_eq!(resolve_horizon(12, Some(5)).expect("ok"), 5);
    }
}
