use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::forecast::{
    BatchForecaster, CancelToken, FitTimingSummary, FitTimings, ForecastConfig, PairFailure,
    PairOutcome,
};
use crate::incrementality::{estimate_incrementality, IncrementalityOptions};
use crate::normalize::{feature_shares, normalize};
use crate::pairing::{pair, PairingRequest};
use crate::power::PowerRequest;
use crate::scorer::{composite_scores, feature_scores};
use crate::similarity::{pearson, similarity, DynamicSimilarity, SimilarityMatrix};
use crate::state::MarketStore;
use crate::tiering::{assign_tiers, assigned_tiers, markets_in_tiers, tiers_from_labels, top_per_tier};
use crate::types::{
    FeatureStats, IncrementalityReport, MarketObservation, MarketPair, PowerResult, Tier,
    TimeSeries,
};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One end-to-end analysis. Optional fields fall back to the engine config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub observations: Vec<MarketObservation>,
    /// Features used for normalization, similarity and scoring, in this order.
    pub features: Vec<String>,
    #[serde(default)]
    pub series: Vec<TimeSeries>,
    #[serde(default)]
    pub similarity_weights: Option<BTreeMap<String, f64>>,
    /// Blend series shape into similarity (every market then needs a series).
    #[serde(default)]
    pub dynamic_similarity: bool,
    #[serde(default)]
    pub similarity_blend: Option<f64>,
    /// Rank tiers by this feature instead of the composite score.
    #[serde(default)]
    pub score_feature: Option<String>,
    #[serde(default)]
    pub score_weights: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub tier_count: Option<usize>,
    /// Take tiers from the observations' upstream labels instead of the score cut.
    #[serde(default)]
    pub use_assigned_tiers: bool,
    /// Report the top N markets of each tier (restricted to `pair_tiers` when set).
    #[serde(default)]
    pub top_markets_per_tier: Option<usize>,
    /// Restrict pairing to markets in these tiers. Empty means all tiers.
    #[serde(default)]
    pub pair_tiers: Vec<u32>,
    #[serde(default)]
    pub pairing: PairingRequest,
    #[serde(default)]
    pub forecast: ForecastOverrides,
    #[serde(default)]
    pub incrementality: IncrementalityOverrides,
    #[serde(default)]
    pub power: Option<PowerRequest>,
}

/// Forecast settings set by the request. Unset fields keep the engine config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastOverrides {
    pub horizon: Option<usize>,
    pub min_history: Option<usize>,
    pub include_trend: Option<bool>,
    pub ar_errors: Option<bool>,
}

impl ForecastOverrides {
    pub fn apply(&self, cfg: &EngineConfig) -> ForecastConfig {
        let base = ForecastConfig {
            min_history: cfg.min_history,
            ..ForecastConfig::default()
        };
        ForecastConfig {
            horizon: self.horizon.or(base.horizon),
            min_history: self.min_history.unwrap_or(base.min_history),
            include_trend: self.include_trend.unwrap_or(base.include_trend),
            ar_errors: self.ar_errors.unwrap_or(base.ar_errors),
        }
    }
}

/// Lift settings set by the request. Unset fields keep the engine config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalityOverrides {
    pub forecast_only: Option<bool>,
    pub resamples: Option<usize>,
    pub confidence_level: Option<f64>,
    pub seed: Option<u64>,
}

impl IncrementalityOverrides {
    pub fn apply(&self, cfg: &EngineConfig) -> IncrementalityOptions {
        let base = IncrementalityOptions::default();
        IncrementalityOptions {
            forecast_only: self.forecast_only.unwrap_or(base.forecast_only),
            resamples: self.resamples.unwrap_or(cfg.bootstrap_resamples),
            confidence_level: self.confidence_level.unwrap_or(cfg.confidence_level),
            seed: self.seed.unwrap_or(cfg.bootstrap_seed),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureShare {
    pub feature: String,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAnalysis {
    pub pair: MarketPair,
    /// None when the request carried no series to forecast from.
    pub forecast: Option<PairOutcome>,
    pub incrementality: Option<IncrementalityReport>,
    pub incrementality_failure: Option<PairFailure>,
}

/// Lift summed over every pair with an incrementality report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateLift {
    pub pairs: usize,
    pub total_actual: f64,
    pub total_counterfactual: f64,
    pub absolute_lift: f64,
    pub percent_lift: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub feature_stats: Vec<FeatureStats>,
    pub feature_shares: Vec<FeatureShare>,
    pub similarity: SimilarityMatrix,
    pub tiers: Vec<Tier>,
    /// Present when the request asked for `top_markets_per_tier`.
    pub top_per_tier: Option<Vec<Tier>>,
    pub pairs: Vec<PairAnalysis>,
    pub aggregate: Option<AggregateLift>,
    pub fit_timings: FitTimingSummary,
    pub power: Option<PowerResult>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Normalize → similarity → tiers → pairs → per-pair forecast → lift.
///
/// Request validation and power analysis run before any market work. Forecast
/// and lift failures are reported per pair.
pub async fn run_analysis(
    request: AnalysisRequest,
    cfg: &EngineConfig,
    cancel: &CancelToken,
) -> Result<AnalysisReport> {
    let power = request.power.as_ref().map(PowerRequest::evaluate).transpose()?;
    let tier_count = request.tier_count.unwrap_or(cfg.tier_count);
    let incrementality_options = request.incrementality.apply(cfg);
    let forecast_config = request.forecast.apply(cfg);
    if request.top_markets_per_tier == Some(0) {
        return Err(EngineError::InvalidParameter(
            "top_markets_per_tier must be >= 1".to_string(),
        ));
    }

    let store = MarketStore::new();
    store.add_observations(request.observations);
    store.add_series_batch(request.series);
    info!(
        markets = store.market_count(),
        series = store.series_count(),
        features = request.features.len(),
        "ingested analysis batch"
    );

    let observations = store.observations();
    let batch = normalize(&observations, &request.features)?;
    let shares: Vec<FeatureShare> = feature_shares(&observations, &request.features)?
        .into_iter()
        .map(|(feature, share)| FeatureShare { feature, share })
        .collect();

    let series_map = store.series_map();
    let dynamic = request.dynamic_similarity.then_some(DynamicSimilarity {
        series: &series_map,
        blend: request.similarity_blend.unwrap_or(cfg.similarity_blend),
    });
    let matrix = similarity(&batch, request.similarity_weights.as_ref(), dynamic.as_ref())?;

    let scores = match &request.score_feature {
        Some(feature) => feature_scores(&batch, feature)?,
        None => composite_scores(&batch, request.score_weights.as_ref())?,
    };
    let tiers = if request.use_assigned_tiers {
        tiers_from_labels(&scores, &assigned_tiers(&observations)?)?
    } else {
        assign_tiers(&scores, tier_count)?
    };
    info!(
        tiers = tiers.len(),
        markets = scores.len(),
        upstream = request.use_assigned_tiers,
        "assigned tiers"
    );
    let top = request
        .top_markets_per_tier
        .map(|count| top_per_tier(&tiers, count, &request.pair_tiers));

    let mut pairing = request.pairing;
    if !request.pair_tiers.is_empty() {
        let allowed: HashSet<String> = markets_in_tiers(&tiers, &request.pair_tiers)
            .into_iter()
            .collect();
        pairing.exclude.extend(
            matrix
                .markets()
                .iter()
                .filter(|m| !allowed.contains(*m))
                .cloned(),
        );
    }
    let mut pairs = pair(&matrix, &pairing)?;
    for p in pairs.iter_mut() {
        if let (Some(test), Some(control)) =
            (series_map.get(&p.test_market), series_map.get(&p.control_market))
        {
            p.correlation = pearson(test, control);
        }
    }
    info!(pairs = pairs.len(), "paired markets");

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let timings = Arc::new(FitTimings::new()?);
    let analyses: Vec<PairAnalysis> = if store.series_count() == 0 {
        info!("no series supplied; skipping counterfactual forecasts");
        pairs
            .into_iter()
            .map(|pair| PairAnalysis {
                pair,
                forecast: None,
                incrementality: None,
                incrementality_failure: None,
            })
            .collect()
    } else {
        let forecaster = BatchForecaster::new(
            Arc::clone(&store),
            forecast_config,
            cfg.max_parallel_fits,
            Arc::clone(&timings),
        );
        forecaster
            .run(pairs, cancel)
            .await?
            .into_iter()
            .map(|f| {
                let (incrementality, incrementality_failure) = match f.result() {
                    Some(result) => match estimate_incrementality(result, &incrementality_options) {
                        Ok(report) => (Some(report), None),
                        Err(e) => (None, Some(PairFailure::from(&e))),
                    },
                    None => (None, None),
                };
                PairAnalysis {
                    pair: f.pair,
                    forecast: Some(f.outcome),
                    incrementality,
                    incrementality_failure,
                }
            })
            .collect()
    };

    let aggregate = aggregate_lift(&analyses);
    if let Some(agg) = &aggregate {
        info!(
            pairs = agg.pairs,
            absolute_lift = agg.absolute_lift,
            percent_lift = ?agg.percent_lift,
            "analysis complete"
        );
    }

    Ok(AnalysisReport {
        feature_stats: batch.stats,
        feature_shares: shares,
        similarity: matrix,
        tiers,
        top_per_tier: top,
        pairs: analyses,
        aggregate,
        fit_timings: timings.summary(),
        power,
    })
}

fn aggregate_lift(analyses: &[PairAnalysis]) -> Option<AggregateLift> {
    let reports: Vec<&IncrementalityReport> = analyses
        .iter()
        .filter_map(|a| a.incrementality.as_ref())
        .collect();
    if reports.is_empty() {
        return None;
    }
    let total_actual: f64 = reports.iter().map(|r| r.total_actual).sum();
    let total_counterfactual: f64 = reports.iter().map(|r| r.total_counterfactual).sum();
    let absolute_lift = total_actual - total_counterfactual;
    Some(AggregateLift {
        pairs: reports.len(),
        total_actual,
        total_counterfactual,
        absolute_lift,
        percent_lift: if total_counterfactual != 0.0 {
            Some(absolute_lift * 100.0 / total_counterfactual)
        } else {
            (absolute_lift == 0.0).then_some(0.0)
        },
    })
}
