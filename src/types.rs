use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One row of ingested market data. Never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    pub market_id: String,
    /// Period ordinal or timestamp; rows with a period are treated as time-ordered.
    #[serde(default)]
    pub period: Option<i64>,
    /// feature name → value. `None` and non-finite values count as missing.
    pub features: BTreeMap<String, Option<f64>>,
    /// Tier label assigned upstream, if any.
    #[serde(default)]
    pub tier: Option<String>,
}

impl MarketObservation {
    /// Finite value for `feature`, or None when missing.
    pub fn value(&self, feature: &str) -> Option<f64> {
        self.features
            .get(feature)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Normalized features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub market_id: String,
    /// Standardized values in the owning batch's feature order.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub feature: String,
    /// Mean of the per-market values before standardization.
    pub mean: f64,
    /// Population standard deviation before standardization.
    pub std_dev: f64,
    /// Markets whose value came from column-mean imputation.
    pub imputed_markets: usize,
}

/// Standardized feature vectors sharing one feature ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBatch {
    pub features: Vec<String>,
    pub vectors: Vec<FeatureVector>,
    pub stats: Vec<FeatureStats>,
}

impl FeatureBatch {
    pub fn market_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn dimensions(&self) -> usize {
        self.features.len()
    }

    pub fn feature_index(&self, feature: &str) -> Option<usize> {
        self.features.iter().position(|f| f == feature)
    }

    pub fn market_ids(&self) -> Vec<String> {
        self.vectors.iter().map(|v| v.market_id.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: i64,
    pub value: f64,
}

/// Per-market KPI series. Periods are strictly ascending and values finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSeries")]
pub struct TimeSeries {
    market_id: String,
    points: Vec<SeriesPoint>,
}

#[derive(Deserialize)]
struct RawTimeSeries {
    market_id: String,
    points: Vec<SeriesPoint>,
}

impl TryFrom<RawTimeSeries> for TimeSeries {
    type Error = EngineError;

    fn try_from(raw: RawTimeSeries) -> Result<Self> {
        TimeSeries::new(raw.market_id, raw.points)
    }
}

impl TimeSeries {
    /// Sorts `points` by period and rejects duplicate periods or non-finite values.
    pub fn new(market_id: impl Into<String>, mut points: Vec<SeriesPoint>) -> Result<Self> {
        let market_id = market_id.into();
        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(EngineError::MalformedSeries(format!(
                "market {market_id}: non-finite value at period {}",
                bad.period
            )));
        }
        points.sort_by_key(|p| p.period);
        if let Some(w) = points.windows(2).find(|w| w[0].period == w[1].period) {
            return Err(EngineError::MalformedSeries(format!(
                "market {market_id}: duplicate period {}",
                w[0].period
            )));
        }
        Ok(Self { market_id, points })
    }

    /// Builds a series from `(period, value)` tuples.
    pub fn from_pairs(
        market_id: impl Into<String>,
        pairs: impl IntoIterator<Item = (i64, f64)>,
    ) -> Result<Self> {
        let points = pairs
            .into_iter()
            .map(|(period, value)| SeriesPoint { period, value })
            .collect();
        Self::new(market_id, points)
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn periods(&self) -> impl Iterator<Item = i64> + '_ {
        self.points.iter().map(|p| p.period)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    /// Value at `period`, by binary search.
    pub fn value_at(&self, period: i64) -> Option<f64> {
        self.points
            .binary_search_by_key(&period, |p| p.period)
            .ok()
            .map(|i| self.points[i].value)
    }

    /// `(self, other)` value pairs on the periods both series share, in period order.
    pub fn overlap(&self, other: &TimeSeries) -> Vec<(f64, f64)> {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::with_capacity(self.len().min(other.len()));
        while i < self.points.len() && j < other.points.len() {
            let (a, b) = (self.points[i], other.points[j]);
            match a.period.cmp(&b.period) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push((a.value, b.value));
                    i += 1;
                    j += 1;
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMarket {
    pub market_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMember {
    pub market_id: String,
    pub score: f64,
    /// 1-based rank inside the tier.
    pub rank: u32,
}

/// Ordinal tier (1 = best) and its members in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub tier: u32,
    pub members: Vec<TierMember>,
}

// ---------------------------------------------------------------------------
// Pairs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPair {
    pub test_market: String,
    pub control_market: String,
    pub similarity: f64,
    /// Pearson correlation of the two KPI series, when both are available.
    #[serde(default)]
    pub correlation: Option<f64>,
}

// ---------------------------------------------------------------------------
// Counterfactuals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualPoint {
    pub period: i64,
    pub actual: f64,
    pub predicted: f64,
    /// True for horizon periods, false for training periods.
    pub is_forecast: bool,
}

/// Fitted coefficients of the control-driven regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFit {
    pub intercept: f64,
    pub control_coef: f64,
    pub trend_coef: Option<f64>,
    /// Residual AR(1) coefficient, when residual correction is enabled.
    pub ar_coef: Option<f64>,
    /// In-sample R² on the training segment (None for a constant test series).
    pub r_squared: Option<f64>,
    pub training_periods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualResult {
    pub test_market: String,
    pub control_market: String,
    pub horizon: usize,
    pub points: Vec<CounterfactualPoint>,
    pub model: ModelFit,
}

impl CounterfactualResult {
    pub fn forecast_points(&self) -> impl Iterator<Item = &CounterfactualPoint> {
        self.points.iter().filter(|p| p.is_forecast)
    }

    pub fn training_points(&self) -> impl Iterator<Item = &CounterfactualPoint> {
        self.points.iter().filter(|p| !p.is_forecast)
    }
}

// ---------------------------------------------------------------------------
// Incrementality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftInterval {
    pub confidence_level: f64,
    pub resamples: usize,
    pub lower: f64,
    pub upper: f64,
    pub percent_lower: Option<f64>,
    pub percent_upper: Option<f64>,
}

/// Fit diagnostics over training periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub periods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalityReport {
    pub periods_analyzed: usize,
    pub total_actual: f64,
    pub total_counterfactual: f64,
    pub average_actual: f64,
    pub average_counterfactual: f64,
    pub absolute_lift: f64,
    /// None when the counterfactual total is zero.
    pub percent_lift: Option<f64>,
    pub interval: Option<LiftInterval>,
    pub validation: Option<ValidationMetrics>,
}

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    SampleSize,
    DetectableEffect,
    MatchedPairs,
}

impl std::fmt::Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PowerMode::SampleSize => "sample_size",
            PowerMode::DetectableEffect => "detectable_effect",
            PowerMode::MatchedPairs => "matched_pairs",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerResult {
    pub mode: PowerMode,
    pub alpha: f64,
    /// Target power (sizing modes) or achieved power (matched pairs with an effect size).
    pub power: Option<f64>,
    pub minimum_detectable_effect: Option<f64>,
    pub n_treatment: u64,
    pub n_control: u64,
    pub correlation: Option<f64>,
    pub standard_error: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_constructor_sorts_points() {
        let s = TimeSeries::from_pairs("A", [(3, 3.0), (1, 1.0), (2, 2.0)]).expect("valid");
        assert_eq!(s.periods().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(s.value_at(2), Some(2.0));
        assert_eq!(s.value_at(9), None);
    }

    #[test]
    fn series_rejects_duplicate_periods() {
        let err = TimeSeries::from_pairs("A", [(1, 1.0), (1, 2.0)]).expect_err("duplicate");
        assert!(matches!(err, EngineError::MalformedSeries(_)));
    }

    #[test]
    fn series_rejects_non_finite_values() {
        let err = TimeSeries::from_pairs("A", [(1, f64::NAN)]).expect_err("nan");
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn overlap_keeps_shared_periods_only() {
        let a = TimeSeries::from_pairs("A", [(1, 1.0), (2, 2.0), (4, 4.0)]).expect("valid");
        let b = TimeSeries::from_pairs("B", [(2, 20.0), (3, 30.0), (4, 40.0)]).expect("valid");
        assert_eq!(a.overlap(&b), vec![(2.0, 20.0), (4.0, 40.0)]);
    }

    #[test]
    fn series_deserialization_validates() {
        let ok: TimeSeries = serde_json::from_str(
            r#"{"market_id":"A","points":[{"period":2,"value":1.0},{"period":1,"value":0.5}]}"#,
        )
        .expect("valid series");
        assert_eq!(ok.periods().collect::<Vec<_>>(), vec![1, 2]);

        let dup = serde_json::from_str::<TimeSeries>(
            r#"{"market_id":"A","points":[{"period":1,"value":1.0},{"period":1,"value":0.5}]}"#,
        );
        assert!(dup.is_err());
    }

    #[test]
    fn observation_value_treats_non_finite_as_missing() {
        let mut features = BTreeMap::new();
        features.insert("pop".to_string(), Some(f64::INFINITY));
        features.insert("income".to_string(), Some(3.0));
        features.insert("sales".to_string(), None);
        let obs = MarketObservation {
            market_id: "A".into(),
            period: None,
            features,
            tier: None,
        };
        assert_eq!(obs.value("pop"), None);
        assert_eq!(obs.value("income"), Some(3.0));
        assert_eq!(obs.value("sales"), None);
        assert_eq!(obs.value("absent"), None);
    }
}
