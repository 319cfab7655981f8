use crate::error::{EngineError, Result};

/// Default number of tiers (quartiles).
pub const DEFAULT_TIER_COUNT: usize = 4;

/// Default weight of time-series shape similarity when blended with static similarity.
pub const DEFAULT_SIMILARITY_BLEND: f64 = 0.5;

/// Minimum pre-horizon periods required to fit a counterfactual model.
pub const DEFAULT_MIN_HISTORY: usize = 8;

/// Default horizon is the trailing `1 / HORIZON_DIVISOR` of the periods.
pub const HORIZON_DIVISOR: usize = 4;

/// Bootstrap resamples for the lift interval.
pub const DEFAULT_BOOTSTRAP_RESAMPLES: usize = 1000;

/// Fewer resamples than this produce unstable percentile bounds.
pub const MIN_BOOTSTRAP_RESAMPLES: usize = 100;

/// Below this many analyzed periods the lift interval is reported as unavailable.
pub const MIN_INTERVAL_PERIODS: usize = 5;

pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

pub const DEFAULT_BOOTSTRAP_SEED: u64 = 42;

/// Power assumed by the matched-pairs MDE when no effect size is supplied.
pub const DEFAULT_TARGET_POWER: f64 = 0.8;

/// Upper bound on concurrently running per-pair model fits.
pub const DEFAULT_MAX_PARALLEL_FITS: usize = 8;

/// Minimum overlapping periods for a Pearson correlation to be defined.
pub const MIN_CORRELATION_OVERLAP: usize = 3;

/// Residual AR(1) coefficient is clamped to this magnitude to keep forecasts stationary.
pub const MAX_AR_COEFFICIENT: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub log_level: String,
    /// Path of the JSON analysis request (MATCHLIFT_INPUT)
    pub input_path: Option<String>,
    /// Where to write the JSON report; stdout when unset (MATCHLIFT_OUTPUT)
    pub output_path: Option<String>,
    pub tier_count: usize,
    pub similarity_blend: f64,
    pub min_history: usize,
    pub bootstrap_resamples: usize,
    pub confidence_level: f64,
    pub bootstrap_seed: u64,
    pub max_parallel_fits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            input_path: None,
            output_path: None,
            tier_count: DEFAULT_TIER_COUNT,
            similarity_blend: DEFAULT_SIMILARITY_BLEND,
            min_history: DEFAULT_MIN_HISTORY,
            bootstrap_resamples: DEFAULT_BOOTSTRAP_RESAMPLES,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            bootstrap_seed: DEFAULT_BOOTSTRAP_SEED,
            max_parallel_fits: DEFAULT_MAX_PARALLEL_FITS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            input_path: lookup("MATCHLIFT_INPUT").filter(|s| !s.trim().is_empty()),
            output_path: lookup("MATCHLIFT_OUTPUT").filter(|s| !s.trim().is_empty()),
            tier_count: parse_var(&lookup, "TIER_COUNT", defaults.tier_count)?,
            similarity_blend: parse_var(&lookup, "SIMILARITY_BLEND", defaults.similarity_blend)?,
            min_history: parse_var(&lookup, "MIN_HISTORY_PERIODS", defaults.min_history)?,
            bootstrap_resamples: parse_var(
                &lookup,
                "BOOTSTRAP_RESAMPLES",
                defaults.bootstrap_resamples,
            )?,
            confidence_level: parse_var(&lookup, "CONFIDENCE_LEVEL", defaults.confidence_level)?,
            bootstrap_seed: parse_var(&lookup, "BOOTSTRAP_SEED", defaults.bootstrap_seed)?,
            max_parallel_fits: parse_var(&lookup, "MAX_PARALLEL_FITS", defaults.max_parallel_fits)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.tier_count == 0 {
            return Err(EngineError::Config("TIER_COUNT must be >= 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.similarity_blend) {
            return Err(EngineError::Config(
                "SIMILARITY_BLEND must lie in [0, 1)".to_string(),
            ));
        }
        if self.bootstrap_resamples < MIN_BOOTSTRAP_RESAMPLES {
            return Err(EngineError::Config(format!(
                "BOOTSTRAP_RESAMPLES must be >= {MIN_BOOTSTRAP_RESAMPLES}"
            )));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(EngineError::Config(
                "CONFIDENCE_LEVEL must lie in (0, 1)".to_string(),
            ));
        }
        if self.max_parallel_fits == 0 {
            return Err(EngineError::Config(
                "MAX_PARALLEL_FITS must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| EngineError::Config(format!("{key} could not be parsed: {raw:?}"))),
    }
}
