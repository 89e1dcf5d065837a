//! Batched reconciling writer: ships logical records to the remote
//! record store.
//!
//! Architecture role:
//! - maps logical records onto remote payloads and identities
//! - batches create/update calls, resolving upsert existence through
//!   cursor-paginated queries
//! - wraps every remote call in the bounded-retry executor
//!
//! Key modules:
//! - [`mapper`]
//! - [`remote`]
//! - [`report`]
//! - [`retry`]
//! - [`writer`]
//! - [`testing`] (in-memory store double)

pub mod mapper;
pub mod remote;
pub mod report;
pub mod retry;
pub mod testing;
pub mod writer;

pub use mapper::PayloadMapper;
pub use remote::{
    CursorFilter, CursorId, CursorPage, IdentifiedPayload, RecordPayload, RemoteIdentity,
    RemoteResult, RemoteTableService,
};
pub use report::{SkipReason, TaskReport, WriteDiagnostics};
pub use retry::RetryExecutor;
pub use writer::BatchedWriter;

#[cfg(test)]
mod writer_tests;
