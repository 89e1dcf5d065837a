use rowship_common::RemoteError;
use serde::{Deserialize, Serialize};

/// Result alias for raw remote calls, before retry classification.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// How one destination record is addressed remotely.
///
/// Exactly one of the two forms; presence rules are owned by the
/// payload mapper (id non-null, or key value non-empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteIdentity {
    /// Surrogate numeric id, serialized.
    Id(String),
    /// Natural update-key value.
    Key(String),
}

impl RemoteIdentity {
    pub fn value(&self) -> &str {
        match self {
            RemoteIdentity::Id(v) | RemoteIdentity::Key(v) => v,
        }
    }

    pub fn is_id(&self) -> bool {
        matches!(self, RemoteIdentity::Id(_))
    }
}

/// Wire payload of one record: remote field id to JSON value, with
/// repeating groups as arrays of flat objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A payload addressed at an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiedPayload {
    pub identity: RemoteIdentity,
    pub payload: RecordPayload,
}

/// Server-side cursor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorId(pub u64);

/// "field in (values)" existence filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorFilter {
    pub field: String,
    pub values: Vec<String>,
}

/// One page of a cursor read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPage {
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub has_more: bool,
}

/// Contract of the destination record store.
///
/// Calls are synchronous and blocking; errors carry a machine-readable
/// code whose transience drives the retry executor. The wire protocol
/// behind this trait is out of scope.
pub trait RemoteTableService {
    /// Create a batch, returning one surrogate id per record.
    fn create(&mut self, batch: &[RecordPayload]) -> RemoteResult<Vec<u64>>;

    /// Update a batch of existing records by identity.
    fn update(&mut self, batch: &[IdentifiedPayload]) -> RemoteResult<()>;

    /// Open a server-side cursor over `fields` for rows matching the
    /// filter.
    fn open_cursor(&mut self, fields: &[String], filter: &CursorFilter) -> RemoteResult<CursorId>;

    /// Fetch the cursor's next page.
    fn fetch_page(&mut self, cursor: CursorId) -> RemoteResult<CursorPage>;
}
