use std::collections::HashMap;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::types::{FeatureBatch, FeatureStats, FeatureVector, MarketObservation};

/// Converts raw observations into standardized feature vectors, one per market.
///
/// Markets keep their first-appearance order. Rows carrying a period are
/// time-ordered and gaps are forward- then backward-filled within the market;
/// a market's value is the mean of its rows. Whatever is still missing gets the
/// column mean across markets. Each column is then scaled to zero mean and
/// unit population variance.
pub fn normalize(observations: &[MarketObservation], features: &[String]) -> Result<FeatureBatch> {
    if features.is_empty() {
        return Err(EngineError::InsufficientData(
            "at least one feature is required".to_string(),
        ));
    }
    let groups = group_by_market(observations);
    if groups.len() < 2 {
        return Err(EngineError::InsufficientData(format!(
            "similarity needs at least 2 markets, got {}",
            groups.len()
        )));
    }
    check_features_known(observations, features)?;

    // raw[m][k]: per-market aggregate before column imputation
    let raw: Vec<Vec<Option<f64>>> = groups
        .iter()
        .map(|(_, rows)| {
            features
                .iter()
                .map(|feature| aggregate_market_feature(rows, feature))
                .collect()
        })
        .collect();

    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(features.len());
    let mut stats = Vec::with_capacity(features.len());

    for (k, feature) in features.iter().enumerate() {
        let present: Vec<f64> = raw.iter().filter_map(|row| row[k]).collect();
        if present.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "feature {feature:?} is missing for every market"
            )));
        }
        let column_mean = mean(&present);
        let imputed_markets = raw.len() - present.len();
        let column: Vec<f64> = raw.iter().map(|row| row[k].unwrap_or(column_mean)).collect();

        let mu = mean(&column);
        let std_dev = population_std(&column, mu);
        if std_dev <= f64::EPSILON * mu.abs().max(1.0) {
            return Err(EngineError::InsufficientData(format!(
                "feature {feature:?} has zero variance across {} markets",
                column.len()
            )));
        }

        columns.push(column.iter().map(|x| (x - mu) / std_dev).collect());
        stats.push(FeatureStats {
            feature: feature.clone(),
            mean: mu,
            std_dev,
            imputed_markets,
        });
    }

    let vectors = groups
        .iter()
        .enumerate()
        .map(|(m, (market_id, _))| FeatureVector {
            market_id: market_id.to_string(),
            values: columns.iter().map(|column| column[m]).collect(),
        })
        .collect::<Vec<_>>();

    debug!(
        markets = vectors.len(),
        features = features.len(),
        "normalized feature batch"
    );

    Ok(FeatureBatch {
        features: features.to_vec(),
        vectors,
        stats,
    })
}

/// Share of each feature in the grand total of raw values across all rows.
///
/// Shares sum to 1, or are all zero when the grand total is zero.
pub fn feature_shares(
    observations: &[MarketObservation],
    features: &[String],
) -> Result<Vec<(String, f64)>> {
    check_features_known(observations, features)?;

    let sums: Vec<f64> = features
        .iter()
        .map(|feature| observations.iter().filter_map(|o| o.value(feature)).sum())
        .collect();
    let total: f64 = sums.iter().sum();

    Ok(features
        .iter()
        .zip(sums)
        .map(|(feature, sum)| {
            let share = if total != 0.0 { sum / total } else { 0.0 };
            (feature.clone(), share)
        })
        .collect())
}

fn check_features_known(observations: &[MarketObservation], features: &[String]) -> Result<()> {
    for feature in features {
        if !observations.iter().any(|o| o.features.contains_key(feature)) {
            return Err(EngineError::DimensionMismatch(format!(
                "feature {feature:?} is not present in any observation"
            )));
        }
    }
    Ok(())
}

/// Rows grouped by market id, in order of first appearance.
fn group_by_market(observations: &[MarketObservation]) -> Vec<(&str, Vec<&MarketObservation>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&MarketObservation>)> = Vec::new();
    for obs in observations {
        let slot = *index.entry(obs.market_id.as_str()).or_insert_with(|| {
            groups.push((obs.market_id.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(obs);
    }
    groups
}

/// Mean of a market's rows for one feature after within-market fill.
/// Returns None when no row of the market carries the feature.
fn aggregate_market_feature(rows: &[&MarketObservation], feature: &str) -> Option<f64> {
    let timed = rows.iter().all(|r| r.period.is_some());
    let values: Vec<Option<f64>> = if timed {
        let mut ordered: Vec<&&MarketObservation> = rows.iter().collect();
        ordered.sort_by_key(|r| r.period);
        fill_forward_backward(ordered.iter().map(|r| r.value(feature)).collect())
    } else {
        rows.iter().map(|r| r.value(feature)).collect()
    };

    let present: Vec<f64> = values.into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(mean(&present))
    }
}

fn fill_forward_backward(mut values: Vec<Option<f64>>) -> Vec<Option<f64>> {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
    values
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64], mu: f64) -> f64 {
    let var = values.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}
