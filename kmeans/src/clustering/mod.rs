//! The per-iteration stages: local assignment, the two reductions and the center update.

mod accumulator;
mod assign;
mod reduce;
mod update;

pub use accumulator::Accumulator;
pub use assign::{assign_and_accumulate, euclidean_distance, nearest_center};
pub use reduce::{all_reduce, fold_threads};
pub use update::{UpdateReport, update_centers};

/// The label of a point no iteration has assigned yet.
pub const UNASSIGNED: u32 = u32::MAX;

/// The largest amount of centers whose indices all fit a label below `UNASSIGNED`.
pub const MAX_CENTERS: usize = UNASSIGNED as usize;
