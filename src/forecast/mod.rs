pub mod batch;
pub mod cancel;
pub mod counterfactual;
pub mod fit_timing;
mod regression;

pub use batch::{BatchForecaster, PairFailure, PairForecast, PairOutcome};
pub use cancel::CancelToken;
pub use counterfactual::{forecast_counterfactual, resolve_horizon, ForecastConfig};
pub use fit_timing::{FitTimingSummary, FitTimings};
