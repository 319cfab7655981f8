pub mod analysis;

pub use analysis::{
    matched_pairs_power, minimum_detectable_effect, required_sample_size, Alternative,
    PowerRequest,
};
