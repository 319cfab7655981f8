use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::cancel::CancelToken;
use super::counterfactual::{forecast_counterfactual, ForecastConfig};
use super::fit_timing::FitTimings;
use crate::error::{EngineError, ErrorKind, Result};
use crate::state::MarketStore;
use crate::types::{CounterfactualResult, MarketPair};

// ---------------------------------------------------------------------------
// Per-pair outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for PairFailure {
    fn from(e: &EngineError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairOutcome {
    Completed { result: CounterfactualResult },
    Failed { failure: PairFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairForecast {
    pub pair: MarketPair,
    pub outcome: PairOutcome,
}

impl PairForecast {
    fn failed(pair: MarketPair, err: &EngineError) -> Self {
        Self {
            pair,
            outcome: PairOutcome::Failed {
                failure: PairFailure::from(err),
            },
        }
    }

    pub fn result(&self) -> Option<&CounterfactualResult> {
        match &self.outcome {
            PairOutcome::Completed { result } => Some(result),
            PairOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&PairFailure> {
        match &self.outcome {
            PairOutcome::Failed { failure } => Some(failure),
            PairOutcome::Completed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BatchForecaster
// ---------------------------------------------------------------------------

/// Fits one counterfactual per pair on the blocking pool, at most
/// `max_parallel` at a time. A failing pair is reported in place and never
/// aborts its siblings.
pub struct BatchForecaster {
    store: Arc<MarketStore>,
    config: ForecastConfig,
    max_parallel: usize,
    timings: Arc<FitTimings>,
}

impl BatchForecaster {
    pub fn new(
        store: Arc<MarketStore>,
        config: ForecastConfig,
        max_parallel: usize,
        timings: Arc<FitTimings>,
    ) -> Self {
        Self {
            store,
            config,
            max_parallel: max_parallel.max(1),
            timings,
        }
    }

    /// Results come back in the order of `pairs`. Pairs not yet started when
    /// `cancel` fires are reported as cancelled.
    pub async fn run(&self, pairs: Vec<MarketPair>, cancel: &CancelToken) -> Result<Vec<PairForecast>> {
        let total = pairs.len();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let handles: Vec<_> = pairs
            .into_iter()
            .map(|pair| {
                let semaphore = Arc::clone(&semaphore);
                let store = Arc::clone(&self.store);
                let timings = Arc::clone(&self.timings);
                let cancel = cancel.clone();
                let config = self.config;
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return PairForecast::failed(pair, &EngineError::Cancelled);
                    };
                    if cancel.is_cancelled() {
                        return PairForecast::failed(pair, &EngineError::Cancelled);
                    }
                    let fallback = pair.clone();
                    let job = tokio::task::spawn_blocking(move || {
                        let started = Instant::now();
                        let outcome = fit_pair(&store, &pair, &config);
                        timings.record(started.elapsed());
                        match outcome {
                            Ok(result) => PairForecast {
                                pair,
                                outcome: PairOutcome::Completed { result },
                            },
                            Err(e) => PairForecast::failed(pair, &e),
                        }
                    });
                    match job.await {
                        Ok(forecast) => forecast,
                        Err(join) => PairForecast::failed(fallback, &EngineError::Worker(join)),
                    }
                })
            })
            .collect();

        let mut forecasts = Vec::with_capacity(total);
        for handle in handles {
            forecasts.push(handle.await?);
        }

        let mut failed = 0usize;
        for f in &forecasts {
            if let Some(failure) = f.failure() {
                failed += 1;
                warn!(
                    test_market = %f.pair.test_market,
                    control_market = %f.pair.control_market,
                    kind = %failure.kind,
                    "pair forecast failed: {}",
                    failure.message
                );
            }
        }
        info!(pairs = total, failed, "batch forecast complete");
        Ok(forecasts)
    }
}

fn fit_pair(store: &MarketStore, pair: &MarketPair, config: &ForecastConfig) -> Result<CounterfactualResult> {
    let test = store.series(&pair.test_market).ok_or_else(|| {
        EngineError::InsufficientData(format!("no series for test market {}", pair.test_market))
    })?;
    let control = store.series(&pair.control_market).ok_or_else(|| {
        EngineError::InsufficientData(format!(
            "no series for control market {}",
            pair.control_market
        ))
    })?;
    forecast_counterfactual(&test, &control, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeSeries;

    fn pair(test: &str, control: &str) -> MarketPair {
        MarketPair {
            test_market: test.to_string(),
            control_market: control.to_string(),
            similarity: 0.9,
            correlation: None,
        }
    }

    fn linear(id: &str, n: usize, offset: f64) -> TimeSeries {
        TimeSeries::from_pairs(
            id,
            (0..n).map(|i| (i as i64, offset + (i as f64 * 0.9).cos() * 5.0 + i as f64)),
        )
        .expect("valid series")
    }

    fn store_with(series: Vec<TimeSeries>) -> Arc<MarketStore> {
        let store = MarketStore::new();
        store.add_series_batch(series);
        store
    }

    fn forecaster(store: Arc<MarketStore>) -> (BatchForecaster, Arc<FitTimings>) {
        let timings = Arc::new(FitTimings::new().expect("valid bounds"));
        let f = BatchForecaster::new(store, ForecastConfig::default(), 2, Arc::clone(&timings));
        (f, timings)
    }

    #[tokio::test]
    async fn failures_are_isolated_per_pair() {
        let store = store_with(vec![
            linear("T1", 16, 10.0),
            linear("C1", 16, 3.0),
            linear("T2", 6, 10.0),
            linear("C2", 6, 3.0),
        ]);
        let (batch, timings) = forecaster(store);
        let out = batch
            .run(
                vec![pair("T1", "C1"), pair("T2", "C2"), pair("T3", "C1")],
                &CancelToken::new(),
            )
            .await
            .expect("batch runs");

        assert_eq!(out.len(), 3);
        assert!(out[0].result().is_some());
        assert_eq!(
            out[1].failure().map(|f| f.kind),
            Some(ErrorKind::InsufficientHistory)
        );
        assert_eq!(
            out[2].failure().map(|f| f.kind),
            Some(ErrorKind::InsufficientData)
        );
        assert_eq!(timings.len(), 3);
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let store = store_with(vec![
            linear("A", 12, 1.0),
            linear("B", 12, 2.0),
            linear("C", 12, 3.0),
            linear("D", 12, 4.0),
        ]);
        let (batch, _) = forecaster(store);
        let pairs = vec![pair("A", "B"), pair("C", "D"), pair("B", "C")];
        let out = batch.run(pairs.clone(), &CancelToken::new()).await.expect("batch runs");
        let got: Vec<MarketPair> = out.into_iter().map(|f| f.pair).collect();
        assert_eq!(got, pairs);
    }

    #[tokio::test]
    async fn cancelled_batch_fits_nothing() {
        let store = store_with(vec![linear("A", 12, 1.0), linear("B", 12, 2.0)]);
        let (batch, timings) = forecaster(store);
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = batch
            .run(vec![pair("A", "B"), pair("B", "A")], &cancel)
            .await
            .expect("batch runs");
        assert!(out
            .iter()
            .all(|f| f.failure().map(|x| x.kind) == Some(ErrorKind::Cancelled)));
        assert!(timings.is_empty());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let f = PairForecast::failed(pair("A", "B"), &EngineError::Cancelled);
        let json = serde_json::to_value(&f).expect("serializable");
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["failure"]["kind"], "cancelled");
    }
}
