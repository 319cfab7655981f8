use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{
    DEFAULT_BOOTSTRAP_RESAMPLES, DEFAULT_BOOTSTRAP_SEED, DEFAULT_CONFIDENCE_LEVEL,
    MIN_BOOTSTRAP_RESAMPLES, MIN_INTERVAL_PERIODS,
};
use crate::error::{EngineError, Result};
use crate::types::{
    CounterfactualPoint, CounterfactualResult, IncrementalityReport, LiftInterval,
    ValidationMetrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalityOptions {
    /// Restrict the lift to horizon periods. With false every period counts.
    pub forecast_only: bool,
    pub resamples: usize,
    pub confidence_level: f64,
    pub seed: u64,
}

impl Default for IncrementalityOptions {
    fn default() -> Self {
        Self {
            forecast_only: true,
            resamples: DEFAULT_BOOTSTRAP_RESAMPLES,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            seed: DEFAULT_BOOTSTRAP_SEED,
        }
    }
}

/// Lift of actual over counterfactual, with a bootstrap interval and
/// training-period fit diagnostics where there is enough data for them.
pub fn estimate_incrementality(
    result: &CounterfactualResult,
    options: &IncrementalityOptions,
) -> Result<IncrementalityReport> {
    if options.resamples < MIN_BOOTSTRAP_RESAMPLES {
        return Err(EngineError::InvalidParameter(format!(
            "resamples must be >= {MIN_BOOTSTRAP_RESAMPLES}, got {}",
            options.resamples
        )));
    }
    if !(options.confidence_level > 0.0 && options.confidence_level < 1.0) {
        return Err(EngineError::InvalidParameter(format!(
            "confidence level must lie in (0, 1), got {}",
            options.confidence_level
        )));
    }

    let analyzed: Vec<&CounterfactualPoint> = result
        .points
        .iter()
        .filter(|p| !options.forecast_only || p.is_forecast)
        .collect();
    if analyzed.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "no periods to analyze for test market {}",
            result.test_market
        )));
    }

    let n = analyzed.len();
    let total_actual: f64 = analyzed.iter().map(|p| p.actual).sum();
    let total_counterfactual: f64 = analyzed.iter().map(|p| p.predicted).sum();
    let absolute_lift = total_actual - total_counterfactual;
    // no lift over a zero base is still 0%
    let percent_lift = percent_of(absolute_lift, total_counterfactual)
        .or_else(|| (absolute_lift == 0.0).then_some(0.0));

    let interval = if n >= MIN_INTERVAL_PERIODS {
        let diffs: Vec<f64> = analyzed.iter().map(|p| p.actual - p.predicted).collect();
        let (lower, upper) = bootstrap_sum_interval(&diffs, options);
        Some(LiftInterval {
            confidence_level: options.confidence_level,
            resamples: options.resamples,
            lower,
            upper,
            percent_lower: percent_of(lower, total_counterfactual),
            percent_upper: percent_of(upper, total_counterfactual),
        })
    } else {
        None
    };

    let validation = validation_metrics(result.training_points());

    debug!(
        test_market = %result.test_market,
        periods = n,
        absolute_lift,
        "estimated incrementality"
    );

    Ok(IncrementalityReport {
        periods_analyzed: n,
        total_actual,
        total_counterfactual,
        average_actual: total_actual / n as f64,
        average_counterfactual: total_counterfactual / n as f64,
        absolute_lift,
        percent_lift,
        interval,
        validation,
    })
}

fn percent_of(value: f64, base: f64) -> Option<f64> {
    (base != 0.0).then(|| value * 100.0 / base)
}

/// MAE and RMSE of predictions over training periods, None without any.
pub fn validation_metrics<'a>(
    training: impl Iterator<Item = &'a CounterfactualPoint>,
) -> Option<ValidationMetrics> {
    let (count, abs_sum, sq_sum) = training.fold((0usize, 0.0, 0.0), |(c, a, s), p| {
        let e = p.actual - p.predicted;
        (c + 1, a + e.abs(), s + e * e)
    });
    (count > 0).then(|| ValidationMetrics {
        mae: abs_sum / count as f64,
        rmse: (sq_sum / count as f64).sqrt(),
        periods: count,
    })
}

/// Percentile bounds of the resampled lift total.
fn bootstrap_sum_interval(diffs: &[f64], options: &IncrementalityOptions) -> (f64, f64) {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let n = diffs.len();
    let mut sums: Vec<f64> = (0..options.resamples)
        .map(|_| (0..n).map(|_| diffs[rng.gen_range(0..n)]).sum::<f64>())
        .collect();
    sums.sort_by(f64::total_cmp);

    let tail = (1.0 - options.confidence_level) / 2.0;
    (percentile(&sums, tail), percentile(&sums, 1.0 - tail))
}

/// Linear interpolation between closest ranks. `sorted` must be non-empty.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
