//! Public facade: one `Engine` per configured shipping run.
//!
//! Architecture role:
//! - validates the config/schema pairing up front
//! - schedules one spill worker thread per source partition with a
//!   hard join barrier before the merge phase
//! - coordinates sort -> reduce -> write single-threaded, or streams
//!   rows straight to the writer when no reduce key is configured
//! - owns the lazily dialed remote connection and the per-run scratch
//!   directory lifecycle
//!
//! Key modules:
//! - [`engine`]
//! - [`client`]

pub mod client;
pub mod engine;

pub use client::{LazyRemote, RemoteClientBuilder};
pub use engine::{Engine, ReduceOutcome};
