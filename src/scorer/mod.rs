pub mod market_scorer;

pub use market_scorer::{composite_scores, feature_scores};
