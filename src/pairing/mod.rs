pub mod hungarian;
pub mod solver;

pub use solver::{pair, PairingRequest, SplitPolicy};
