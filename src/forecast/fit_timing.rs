//! Wall-clock histogram of per-pair model fits.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Percentile summary of recorded fits, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FitTimingSummary {
    pub fits: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

/// Shared fit timings. Batch workers record, the pipeline reads.
pub struct FitTimings {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl FitTimings {
    /// Tracks 1us to 100s with 3 significant figures.
    pub fn new() -> Result<Self> {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .map_err(|e| EngineError::Config(format!("fit timing histogram: {e}")))?;
        Ok(Self {
            inner: Mutex::new(histogram),
        })
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 100_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> FitTimingSummary {
        let Ok(h) = self.inner.lock() else {
            return FitTimingSummary::default();
        };
        if h.len() == 0 {
            return FitTimingSummary::default();
        }
        FitTimingSummary {
            fits: h.len(),
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
        }
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
