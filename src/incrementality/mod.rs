pub mod estimator;

pub use estimator::{estimate_incrementality, validation_metrics, IncrementalityOptions};
