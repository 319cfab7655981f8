use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::hungarian;
use crate::error::{EngineError, Result};
use crate::similarity::SimilarityMatrix;
use crate::types::MarketPair;

/// How to split the pool into test and control when no test subset is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Greedy: repeatedly pair the two most similar unpaired markets, then
    /// improve with partner swaps. A heuristic, not optimal over all bipartitions.
    #[default]
    GreedyMostSimilar,
    /// First `ceil(n / 2)` markets in input order are test, then optimal assignment.
    InputOrderHalves,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingRequest {
    #[serde(default)]
    pub test_markets: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub max_pairs: Option<usize>,
    #[serde(default)]
    pub split: SplitPolicy,
}

/// Matches test markets to control markets maximizing total similarity.
///
/// Output is sorted by similarity (descending, ties by test market position)
/// and capped at `max_pairs`. Every market appears in at most one pair.
pub fn pair(matrix: &SimilarityMatrix, request: &PairingRequest) -> Result<Vec<MarketPair>> {
    if request.max_pairs == Some(0) {
        return Err(EngineError::InvalidParameter(
            "max_pairs must be >= 1".to_string(),
        ));
    }

    let pool = matrix.without(&request.exclude);
    if pool.len() < 2 {
        return Err(EngineError::InsufficientMarkets(format!(
            "{} market(s) remain after {} exclusion(s), need at least 2",
            pool.len(),
            request.exclude.len()
        )));
    }

    let mut pairs = match &request.test_markets {
        Some(test_ids) => {
            let tests = resolve_tests(&pool, test_ids)?;
            let chosen: HashSet<usize> = tests.iter().copied().collect();
            let controls: Vec<usize> = (0..pool.len()).filter(|i| !chosen.contains(i)).collect();
            if controls.is_empty() {
                return Err(EngineError::InsufficientMarkets(
                    "no control markets remain outside the test subset".to_string(),
                ));
            }
            assign(&pool, &tests, &controls)
        }
        None => match request.split {
            SplitPolicy::InputOrderHalves => {
                let half = pool.len().div_ceil(2);
                let tests: Vec<usize> = (0..half).collect();
                let controls: Vec<usize> = (half..pool.len()).collect();
                assign(&pool, &tests, &controls)
            }
            SplitPolicy::GreedyMostSimilar => {
                let mut pairs = greedy_pairs(&pool);
                refine_by_swaps(&pool, &mut pairs);
                pairs
            }
        },
    };

    pairs.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
    if let Some(max) = request.max_pairs {
        pairs.truncate(max);
    }

    debug!(
        pool = pool.len(),
        pairs = pairs.len(),
        policy = ?request.split,
        explicit = request.test_markets.is_some(),
        "paired markets"
    );

    Ok(pairs
        .into_iter()
        .map(|(t, c, s)| MarketPair {
            test_market: pool.markets()[t].clone(),
            control_market: pool.markets()[c].clone(),
            similarity: s,
            correlation: None,
        })
        .collect())
}

fn resolve_tests(pool: &SimilarityMatrix, test_ids: &[String]) -> Result<Vec<usize>> {
    let mut seen = HashSet::with_capacity(test_ids.len());
    let mut tests = Vec::with_capacity(test_ids.len());
    for id in test_ids {
        let idx = pool.index_of(id).ok_or_else(|| {
            EngineError::InvalidParameter(format!(
                "test market {id:?} is unknown or excluded"
            ))
        })?;
        if !seen.insert(idx) {
            return Err(EngineError::InvalidParameter(format!(
                "test market {id:?} listed twice"
            )));
        }
        tests.push(idx);
    }
    if tests.is_empty() {
        return Err(EngineError::InvalidParameter(
            "explicit test subset is empty".to_string(),
        ));
    }
    Ok(tests)
}

/// Optimal one-to-one assignment of `tests` to `controls` as `(test, control, similarity)`.
fn assign(pool: &SimilarityMatrix, tests: &[usize], controls: &[usize]) -> Vec<(usize, usize, f64)> {
    let cost: Vec<Vec<f64>> = tests
        .iter()
        .map(|&t| controls.iter().map(|&c| -pool.at(t, c)).collect())
        .collect();
    hungarian::solve(&cost)
        .into_iter()
        .zip(tests)
        .filter_map(|(col, &t)| col.map(|k| (t, controls[k], pool.at(t, controls[k]))))
        .collect()
}

/// Earlier index of each pair is the test market.
fn greedy_pairs(pool: &SimilarityMatrix) -> Vec<(usize, usize, f64)> {
    let n = pool.len();
    let mut candidates: Vec<(usize, usize, f64)> = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            candidates.push((i, j, pool.at(i, j)));
        }
    }
    // stable: equal similarities stay in (i, j) order
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut taken = vec![false; n];
    let mut pairs = Vec::with_capacity(n / 2);
    for (i, j, s) in candidates {
        if taken[i] || taken[j] {
            continue;
        }
        taken[i] = true;
        taken[j] = true;
        pairs.push((i, j, s));
    }
    pairs
}

fn oriented(pool: &SimilarityMatrix, a: usize, b: usize) -> (usize, usize, f64) {
    (a.min(b), a.max(b), pool.at(a, b))
}

/// Exchanges partners between two pairs while that raises total similarity.
fn refine_by_swaps(pool: &SimilarityMatrix, pairs: &mut [(usize, usize, f64)]) {
    const MIN_GAIN: f64 = 1e-12;
    let mut improved = true;
    while improved {
        improved = false;
        for p in 0..pairs.len() {
            for q in (p + 1)..pairs.len() {
                let (a, b, s_ab) = pairs[p];
                let (c, d, s_cd) = pairs[q];
                let current = s_ab + s_cd;

                let swap_ends = (oriented(pool, a, d), oriented(pool, c, b));
                let swap_tests = (oriented(pool, a, c), oriented(pool, b, d));
                let gain = |(x, y): &((usize, usize, f64), (usize, usize, f64))| x.2 + y.2;
                let (x, y) = if gain(&swap_ends) >= gain(&swap_tests) {
                    swap_ends
                } else {
                    swap_tests
                };
                if x.2 + y.2 > current + MIN_GAIN {
                    pairs[p] = x;
                    pairs[q] = y;
                    improved = true;
                }
            }
        }
    }
}
