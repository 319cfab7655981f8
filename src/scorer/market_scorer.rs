use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::types::{FeatureBatch, ScoredMarket};

/// Composite market score (higher = stronger market) from standardized features.
///
/// Each feature contributes `weight * z`, so a negative weight works as a
/// penalty. Without weights every feature counts equally and the score is
/// the mean z-score.
pub fn composite_scores(
    batch: &FeatureBatch,
    weights: Option<&BTreeMap<String, f64>>,
) -> Result<Vec<ScoredMarket>> {
    let d = batch.dimensions();
    let mut w = vec![1.0 / d.max(1) as f64; d];
    if let Some(weights) = weights {
        w.iter_mut().for_each(|wk| *wk = 0.0);
        for (feature, &weight) in weights {
            let k = batch.feature_index(feature).ok_or_else(|| {
                EngineError::DimensionMismatch(format!(
                    "score weight given for unknown feature {feature:?}"
                ))
            })?;
            if !weight.is_finite() {
                return Err(EngineError::InvalidParameter(format!(
                    "score weight for {feature:?} is not finite"
                )));
            }
            w[k] = weight;
        }
    }

    let scored: Vec<ScoredMarket> = batch
        .vectors
        .iter()
        .map(|v| ScoredMarket {
            market_id: v.market_id.clone(),
            score: v.values.iter().zip(&w).map(|(z, wk)| z * wk).sum(),
        })
        .collect();
    debug!(markets = scored.len(), "scored markets");
    Ok(scored)
}

/// Uses one feature as the score, in its raw units (the market aggregate
/// after imputation). Ranking matches the standardized column.
pub fn feature_scores(batch: &FeatureBatch, feature: &str) -> Result<Vec<ScoredMarket>> {
    let k = batch.feature_index(feature).ok_or_else(|| {
        EngineError::DimensionMismatch(format!("score feature {feature:?} is not in the batch"))
    })?;
    let stats = batch
        .stats
        .iter()
        .find(|s| s.feature == feature)
        .ok_or_else(|| {
            EngineError::DimensionMismatch(format!("no column stats for score feature {feature:?}"))
        })?;
    Ok(batch
        .vectors
        .iter()
        .map(|v| ScoredMarket {
            market_id: v.market_id.clone(),
            score: v.values[k] * stats.std_dev + stats.mean,
        })
        .collect())
}
