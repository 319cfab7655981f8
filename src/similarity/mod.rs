pub mod correlation;
pub mod engine;
pub mod matrix;

pub use correlation::pearson;
pub use engine::{similarity, DynamicSimilarity};
pub use matrix::SimilarityMatrix;
