use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::correlation::pearson_pairs;
use super::matrix::SimilarityMatrix;
use crate::error::{EngineError, Result};
use crate::types::{FeatureBatch, TimeSeries};

/// Time-series shape component of the similarity score.
#[derive(Debug, Clone, Copy)]
pub struct DynamicSimilarity<'a> {
    /// KPI series by market id. Every market of the batch needs one.
    pub series: &'a HashMap<String, TimeSeries>,
    /// Weight of the shape term, in [0, 1).
    pub blend: f64,
}

/// Pairwise similarity `1 / (1 + d)` over weighted Euclidean distance `d`.
///
/// Unweighted features count with weight 1. With `dynamic`, the static score
/// is blended with the overlap correlation of the two series mapped onto [0, 1].
pub fn similarity(
    batch: &FeatureBatch,
    weights: Option<&BTreeMap<String, f64>>,
    dynamic: Option<&DynamicSimilarity<'_>>,
) -> Result<SimilarityMatrix> {
    let w = resolve_weights(batch, weights)?;
    if let Some(dynamic) = dynamic {
        validate_dynamic(batch, dynamic)?;
    }

    let n = batch.market_count();
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..n)
                .map(|j| pair_similarity(batch, &w, dynamic, i, j))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut values = vec![0.0; n * n];
    for (i, row) in upper.into_iter().enumerate() {
        values[i * n + i] = 1.0;
        for (offset, s) in row.into_iter().enumerate() {
            let j = i + 1 + offset;
            values[i * n + j] = s;
            values[j * n + i] = s;
        }
    }

    debug!(
        markets = n,
        dynamic = dynamic.is_some(),
        "computed similarity matrix"
    );
    Ok(SimilarityMatrix::from_raw(batch.market_ids(), values))
}

fn resolve_weights(batch: &FeatureBatch, weights: Option<&BTreeMap<String, f64>>) -> Result<Vec<f64>> {
    let mut w = vec![1.0; batch.dimensions()];
    let Some(weights) = weights else {
        return Ok(w);
    };
    for (feature, &weight) in weights {
        let k = batch.feature_index(feature).ok_or_else(|| {
            EngineError::DimensionMismatch(format!(
                "weight given for unknown feature {feature:?}"
            ))
        })?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "weight for {feature:?} must be finite and >= 0, got {weight}"
            )));
        }
        w[k] = weight;
    }
    Ok(w)
}

fn validate_dynamic(batch: &FeatureBatch, dynamic: &DynamicSimilarity<'_>) -> Result<()> {
    if !(0.0..1.0).contains(&dynamic.blend) {
        return Err(EngineError::InvalidParameter(format!(
            "similarity blend must lie in [0, 1), got {}",
            dynamic.blend
        )));
    }
    if let Some(missing) = batch
        .vectors
        .iter()
        .find(|v| !dynamic.series.contains_key(&v.market_id))
    {
        return Err(EngineError::InsufficientData(format!(
            "no time series for market {:?}",
            missing.market_id
        )));
    }
    Ok(())
}

fn pair_similarity(
    batch: &FeatureBatch,
    w: &[f64],
    dynamic: Option<&DynamicSimilarity<'_>>,
    i: usize,
    j: usize,
) -> Result<f64> {
    let a = &batch.vectors[i];
    let b = &batch.vectors[j];
    let d2: f64 = a
        .values
        .iter()
        .zip(&b.values)
        .zip(w)
        .map(|((x, y), wk)| wk * (x - y) * (x - y))
        .sum();
    let s_static = 1.0 / (1.0 + d2.sqrt());

    let Some(dynamic) = dynamic else {
        return Ok(s_static);
    };
    // presence checked in validate_dynamic
    let (Some(sa), Some(sb)) = (
        dynamic.series.get(&a.market_id),
        dynamic.series.get(&b.market_id),
    ) else {
        return Err(EngineError::InsufficientData(format!(
            "no time series for pair ({:?}, {:?})",
            a.market_id, b.market_id
        )));
    };
    let overlap = sa.overlap(sb);
    let r = pearson_pairs(&overlap).ok_or_else(|| {
        EngineError::InsufficientData(format!(
            "series correlation undefined for ({:?}, {:?}): {} overlapping periods",
            a.market_id,
            b.market_id,
            overlap.len()
        ))
    })?;
    let s_shape = (1.0 + r) / 2.0;
    Ok((1.0 - dynamic.blend) * s_static + dynamic.blend * s_shape)
}
