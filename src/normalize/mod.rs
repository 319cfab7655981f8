pub mod features;

pub use features::{feature_shares, normalize};
