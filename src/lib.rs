//! Matched-market testing engine: market similarity, tiering, test/control
//! pairing, counterfactual forecasting, incrementality and power analysis.

pub mod config;
pub mod error;
pub mod forecast;
pub mod incrementality;
pub mod normalize;
pub mod pairing;
pub mod pipeline;
pub mod power;
pub mod scorer;
pub mod similarity;
pub mod state;
pub mod tiering;
pub mod types;

pub use error::{EngineError, ErrorKind, Result};
