//! Schema, typed column values, and the flat-row codec.
//!
//! Architecture role:
//! - describes the source table and its destination mapping
//! - encodes typed rows into CSV-safe flat cells, folding repeating
//!   group columns into per-family tagged-entry arrays
//! - decodes spill lines back, failing with a codec error on anything
//!   malformed
//!
//! Key modules:
//! - [`schema`]
//! - [`value`]
//! - [`tagged`]
//! - [`row`]

pub mod row;
pub mod schema;
pub mod tagged;
pub mod value;

pub use row::{FlatLayout, FlatRow, KeySelector, RowCodec};
pub use schema::{ColumnDescriptor, IdentitySemantics, RemoteFieldKind, Schema, SortSpec};
pub use tagged::{decode_entries, encode_entries, TaggedEntry, TaggedField};
pub use value::{parse_timestamp_in, ColumnKind, ColumnValue, KindTable};
