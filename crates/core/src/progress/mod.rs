//! Weighted progress accounting.
//!
//! Stages cost very different amounts per byte, so progress is measured in
//! abstract work units rather than bytes. Each item contributes
//! compression work (size times a per-kind multiplier), upload work (size
//! times the upload multiplier) and a fixed amount of link-rewrite work.
//! The `ProgressAccountant` credits each (item, stage) pair at most once and
//! turns the running total into a non-decreasing 0-100 percentage.

mod accountant;
mod weights;

pub use accountant::{ProgressAccountant, ProgressState, ProgressUpdate};
pub use weights::ProgressWeights;
