use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::DEFAULT_TARGET_POWER;
use crate::error::{EngineError, Result};
use crate::types::{PowerMode, PowerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    #[default]
    TwoSided,
    OneSided,
}

/// Mode-specific inputs, tagged by `mode` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PowerRequest {
    SampleSize {
        effect_size: f64,
        #[serde(default = "default_power")]
        power: f64,
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_ratio")]
        ratio: f64,
        #[serde(default)]
        alternative: Alternative,
    },
    DetectableEffect {
        n_treatment: u64,
        n_control: u64,
        #[serde(default = "default_power")]
        power: f64,
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default)]
        alternative: Alternative,
    },
    MatchedPairs {
        n_pairs: u64,
        variance: f64,
        correlation: f64,
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default)]
        effect_size: Option<f64>,
    },
}

fn default_power() -> f64 {
    DEFAULT_TARGET_POWER
}

fn default_alpha() -> f64 {
    0.05
}

fn default_ratio() -> f64 {
    1.0
}

impl PowerRequest {
    pub fn evaluate(&self) -> Result<PowerResult> {
        match *self {
            PowerRequest::SampleSize {
                effect_size,
                power,
                alpha,
                ratio,
                alternative,
            } => required_sample_size(effect_size, power, alpha, ratio, alternative),
            PowerRequest::DetectableEffect {
                n_treatment,
                n_control,
                power,
                alpha,
                alternative,
            } => minimum_detectable_effect(n_treatment, n_control, power, alpha, alternative),
            PowerRequest::MatchedPairs {
                n_pairs,
                variance,
                correlation,
                alpha,
                effect_size,
            } => matched_pairs_power(n_pairs, variance, correlation, alpha, effect_size),
        }
    }
}

/// Per-group sample size for a two-sample comparison of means (normal
/// approximation). `ratio` is control size over treatment size.
pub fn required_sample_size(
    effect_size: f64,
    power: f64,
    alpha: f64,
    ratio: f64,
    alternative: Alternative,
) -> Result<PowerResult> {
    check_alpha(alpha)?;
    check_power(power)?;
    check_positive("effect size", effect_size)?;
    check_positive("allocation ratio", ratio)?;

    let normal = standard_normal()?;
    let z_sum = critical_z(&normal, alpha, alternative) + normal.inverse_cdf(power);
    let n1 = z_sum * z_sum * (1.0 + 1.0 / ratio) / (effect_size * effect_size);
    let n_treatment = n1.ceil() as u64;
    let n_control = (n1 * ratio).ceil() as u64;

    Ok(PowerResult {
        mode: PowerMode::SampleSize,
        alpha,
        power: Some(power),
        minimum_detectable_effect: Some(effect_size),
        n_treatment,
        n_control,
        correlation: None,
        standard_error: None,
    })
}

/// Smallest standardized effect detectable with the given group sizes.
pub fn minimum_detectable_effect(
    n_treatment: u64,
    n_control: u64,
    power: f64,
    alpha: f64,
    alternative: Alternative,
) -> Result<PowerResult> {
    check_alpha(alpha)?;
    check_power(power)?;
    check_count("n_treatment", n_treatment)?;
    check_count("n_control", n_control)?;

    let normal = standard_normal()?;
    let z_sum = critical_z(&normal, alpha, alternative) + normal.inverse_cdf(power);
    let ratio = n_control as f64 / n_treatment as f64;
    let mde = (z_sum * z_sum * (1.0 + 1.0 / ratio) / n_treatment as f64).sqrt();

    Ok(PowerResult {
        mode: PowerMode::DetectableEffect,
        alpha,
        power: Some(power),
        minimum_detectable_effect: Some(mde),
        n_treatment,
        n_control,
        correlation: None,
        standard_error: None,
    })
}

/// Matched-pairs design: standard error of the mean pair difference, then
/// either achieved power for `effect_size` or the MDE at the default power.
pub fn matched_pairs_power(
    n_pairs: u64,
    variance: f64,
    correlation: f64,
    alpha: f64,
    effect_size: Option<f64>,
) -> Result<PowerResult> {
    check_alpha(alpha)?;
    check_count("pair count", n_pairs)?;
    check_positive("variance", variance)?;
    if !(-1.0..1.0).contains(&correlation) {
        return Err(EngineError::InvalidParameter(format!(
            "pair correlation must lie in [-1, 1), got {correlation}"
        )));
    }
    if let Some(effect) = effect_size {
        check_positive("effect size", effect)?;
    }

    let normal = standard_normal()?;
    let se = (2.0 * variance * (1.0 - correlation) / n_pairs as f64).sqrt();
    let z_alpha = critical_z(&normal, alpha, Alternative::TwoSided);

    let (power, mde) = match effect_size {
        Some(effect) => (Some(normal.cdf(effect / se - z_alpha)), None),
        None => {
            let z_power = normal.inverse_cdf(DEFAULT_TARGET_POWER);
            (None, Some((z_alpha + z_power) * se))
        }
    };

    Ok(PowerResult {
        mode: PowerMode::MatchedPairs,
        alpha,
        power,
        minimum_detectable_effect: mde,
        n_treatment: n_pairs,
        n_control: n_pairs,
        correlation: Some(correlation),
        standard_error: Some(se),
    })
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| EngineError::InvalidParameter(e.to_string()))
}

fn critical_z(normal: &Normal, alpha: f64, alternative: Alternative) -> f64 {
    match alternative {
        Alternative::TwoSided => normal.inverse_cdf(1.0 - alpha / 2.0),
        Alternative::OneSided => normal.inverse_cdf(1.0 - alpha),
    }
}

fn check_alpha(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter(format!(
            "alpha must lie in (0, 1), got {alpha}"
        )))
    }
}

fn check_power(power: f64) -> Result<()> {
    if power > 0.0 && power < 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter(format!(
            "power must lie in (0, 1), got {power}"
        )))
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter(format!(
            "{name} must be > 0, got {value}"
        )))
    }
}

fn check_count(name: &str, n: u64) -> Result<()> {
    if n == 0 {
        return Err(EngineError::InvalidParameter(format!("{name} must be >= 1")));
    }
    Ok(())
}
