use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EngineError, Result};

/// Dense symmetric market-by-market similarity, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSimilarityMatrix")]
pub struct SimilarityMatrix {
    markets: Vec<String>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawSimilarityMatrix {
    markets: Vec<String>,
    values: Vec<f64>,
}

impl TryFrom<RawSimilarityMatrix> for SimilarityMatrix {
    type Error = EngineError;

    fn try_from(raw: RawSimilarityMatrix) -> Result<Self> {
        let n = raw.markets.len();
        if raw.values.len() != n * n {
            return Err(EngineError::DimensionMismatch(format!(
                "similarity matrix for {n} markets needs {} values, got {}",
                n * n,
                raw.values.len()
            )));
        }
        let rows = if n == 0 {
            Vec::new()
        } else {
            raw.values.chunks(n).map(<[f64]>::to_vec).collect()
        };
        SimilarityMatrix::from_rows(raw.markets, rows)
    }
}

impl SimilarityMatrix {
    /// Validates a hand-built matrix: square, symmetric, entries in (0, 1], unit diagonal.
    pub fn from_rows(markets: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = markets.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(EngineError::DimensionMismatch(format!(
                "similarity matrix must be {n}x{n}"
            )));
        }
        let mut seen = HashSet::with_capacity(n);
        if let Some(dup) = markets.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(EngineError::InvalidParameter(format!(
                "duplicate market id {dup:?} in similarity matrix"
            )));
        }
        for i in 0..n {
            if rows[i][i] != 1.0 {
                return Err(EngineError::InvalidParameter(format!(
                    "diagonal entry for {:?} must be 1, got {}",
                    markets[i], rows[i][i]
                )));
            }
            for j in (i + 1)..n {
                let v = rows[i][j];
                if !(v > 0.0 && v <= 1.0) {
                    return Err(EngineError::InvalidParameter(format!(
                        "similarity({:?}, {:?}) = {v} is outside (0, 1]",
                        markets[i], markets[j]
                    )));
                }
                if (v - rows[j][i]).abs() > 1e-12 {
                    return Err(EngineError::InvalidParameter(format!(
                        "similarity matrix is not symmetric at ({:?}, {:?})",
                        markets[i], markets[j]
                    )));
                }
            }
        }
        Ok(Self {
            markets,
            values: rows.into_iter().flatten().collect(),
        })
    }

    /// Builds from an already-symmetric buffer. Callers guarantee the invariants.
    pub(crate) fn from_raw(markets: Vec<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), markets.len() * markets.len());
        Self { markets, values }
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn markets(&self) -> &[String] {
        &self.markets
    }

    pub fn index_of(&self, market_id: &str) -> Option<usize> {
        self.markets.iter().position(|m| m == market_id)
    }

    /// Entry by index. Panics on out-of-range indices like slice indexing.
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.markets.len() + j]
    }

    /// Entry by market id.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.at(i, j))
    }

    /// Copy with `excluded` markets removed from both axes. Unknown ids are ignored.
    pub fn without(&self, excluded: &[String]) -> SimilarityMatrix {
        let drop: HashSet<&str> = excluded.iter().map(String::as_str).collect();
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| !drop.contains(self.markets[i].as_str()))
            .collect();

        let markets = keep.iter().map(|&i| self.markets[i].clone()).collect();
        let mut values = Vec::with_capacity(keep.len() * keep.len());
        for &i in &keep {
            for &j in &keep {
                values.push(self.at(i, j));
            }
        }
        SimilarityMatrix { markets, values }
    }
}
