//! Run status derivation and answer aggregation.
//!
//! Both are read-side views over the run store.

pub mod aggregator;
pub mod status;

pub use aggregator::{aggregate, best_placements, summarize};
pub use status::StatusReader;
