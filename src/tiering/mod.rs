pub mod tiers;

pub use tiers::{assign_tiers, assigned_tiers, markets_in_tiers, tiers_from_labels, top_per_tier};
