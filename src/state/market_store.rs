use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{MarketObservation, TimeSeries};

// ---------------------------------------------------------------------------
// MarketRows: observations of one market, tagged with first-seen order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MarketRows {
    /// Ingestion sequence of the market's first row; keeps first-appearance order.
    first_seen: usize,
    rows: Vec<MarketObservation>,
}

// ---------------------------------------------------------------------------
// MarketStore
// ---------------------------------------------------------------------------

/// In-memory registry of one ingested batch.
///
/// Filled once before an analysis run and then only read, concurrently, by the
/// per-pair forecast workers.
pub struct MarketStore {
    /// market_id → raw observation rows
    observations: DashMap<String, MarketRows>,
    /// market_id → KPI series
    series: DashMap<String, TimeSeries>,
    next_seq: AtomicUsize,
}

impl MarketStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_observation(&self, obs: MarketObservation) {
        let mut entry = self
            .observations
            .entry(obs.market_id.clone())
            .or_insert_with(|| MarketRows {
                first_seen: self.next_seq.fetch_add(1, Ordering::Relaxed),
                rows: Vec::new(),
            });
        entry.rows.push(obs);
    }

    pub fn add_observations(&self, observations: Vec<MarketObservation>) {
        for obs in observations {
            self.add_observation(obs);
        }
    }

    /// Replaces any series previously stored for the same market.
    pub fn add_series(&self, series: TimeSeries) {
        self.series.insert(series.market_id().to_string(), series);
    }

    pub fn add_series_batch(&self, batch: Vec<TimeSeries>) {
        for s in batch {
            self.add_series(s);
        }
    }

    pub fn series(&self, market_id: &str) -> Option<TimeSeries> {
        self.series.get(market_id).map(|s| s.clone())
    }

    /// Snapshot of every stored series keyed by market id.
    pub fn series_map(&self) -> HashMap<String, TimeSeries> {
        self.series
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// All observation rows, grouped by market in first-appearance order.
    pub fn observations(&self) -> Vec<MarketObservation> {
        let mut groups: Vec<MarketRows> = self.observations.iter().map(|e| e.value().clone()).collect();
        groups.sort_unstable_by_key(|g| g.first_seen);
        groups.into_iter().flat_map(|g| g.rows).collect()
    }

    pub fn market_count(&self) -> usize {
        self.observations.len()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}

impl Default for MarketStore {
    fn default() -> Self {
        Self {
            observations: DashMap::new(),
            series: DashMap::new(),
            next_seq: AtomicUsize::new(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
