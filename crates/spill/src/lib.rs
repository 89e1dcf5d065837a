//! Disk-backed spill files and the external merge-sort over them.
//!
//! Architecture role:
//! - gives each partition worker a private append-only CSV spill file
//!   with a JSON meta sidecar
//! - concatenates the worker files and sorts the combined stream under
//!   a memory budget, spilling key-sorted chunks and N-way merging
//!   them into one ordered output
//! - cleans up every intermediate file as soon as it is consumed
//!
//! Key modules:
//! - [`layout`]
//! - [`writer`]
//! - [`sort`]

pub mod layout;
pub mod sort;
pub mod writer;

pub use layout::{read_spill_metas, SpillFileMeta};
pub use sort::{CellIter, ExternalSorter, SortedRun};
pub use writer::SpillWriter;
