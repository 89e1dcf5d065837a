//! Reduce accumulator: collapses sorted flat rows into logical records.
//!
//! Architecture role:
//! - consumes the external sort's key-ordered cell stream
//! - enforces scalar consistency within each reduce-key group
//! - merges repeating-group entries (identity coalescing, secondary
//!   sort, null-payload pruning)
//!
//! Key modules:
//! - [`accumulator`]
//! - [`record`]

pub mod accumulator;
pub mod record;

pub use accumulator::{merge_family, sort_entries, ReduceAccumulator};
pub use record::LogicalRecord;
