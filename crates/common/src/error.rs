use std::fmt;

use thiserror::Error;

/// Canonical rowship error taxonomy used across crates.
///
/// Classification guidance:
/// - [`EngineError::Codec`]: malformed serialized values discovered while decoding spill rows
/// - [`EngineError::Reduce`]: scalar columns disagree within one reduce-key group
/// - [`EngineError::InvalidConfig`]: mode/key/field contract violations caught before any write
/// - [`EngineError::Remote`]: remote store failures, transient or fatal per [`RemoteErrorCode`]
/// - [`EngineError::Io`]: raw filesystem IO failures from std APIs
#[derive(Debug, Error)]
pub enum EngineError {
    /// A serialized column value could not be decoded.
    ///
    /// Examples:
    /// - non-numeric text in an integer column
    /// - an aggregate column whose JSON payload is not an array
    /// - a timestamp outside ISO-8601
    #[error("codec error: {0}")]
    Codec(String),

    /// Rows sharing a reduce-key value disagree on a non-repeating column.
    ///
    /// Carries the offending column, the full column list, and the
    /// expected-vs-actual value rows for diagnosis. Always fatal: only
    /// fully merged output is valid.
    #[error("{0}")]
    Reduce(ReduceMismatch),

    /// Invalid or inconsistent engine/schema configuration.
    ///
    /// Examples:
    /// - update mode without an update key column
    /// - a reduce key naming a column absent from the schema
    /// - an update key column of a non-key remote field kind
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A remote table service call failed.
    ///
    /// Transience is decided by the error code allow-list; transient
    /// failures are retried by the retry executor, everything else
    /// propagates immediately.
    #[error("remote error [{}]: {}", .0.code, .0.message)]
    Remote(RemoteError),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True when this error may be retried per the transient allow-list.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Remote(e) => e.code.is_transient(),
            _ => false,
        }
    }
}

/// Structured payload for a reduce consistency violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceMismatch {
    /// The first column whose value disagreed.
    pub column: String,
    /// Every non-repeating column of the group, in schema order.
    pub columns: Vec<String>,
    /// The values the first row of the group established.
    pub expected: Vec<String>,
    /// The values of the row that broke the invariant.
    pub actual: Vec<String>,
}

impl fmt::Display for ReduceMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reduce error: column '{}' differs within one reduce group; columns=[{}] expected=[{}] actual=[{}]",
            self.column,
            self.columns.join(", "),
            self.expected.join(", "),
            self.actual.join(", "),
        )
    }
}

/// Machine-readable remote failure classification.
///
/// The remote store reports string codes; everything outside the known
/// set is carried verbatim in [`RemoteErrorCode::Other`] and treated as
/// fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteErrorCode {
    /// A destination record is locked by a concurrent writer.
    RecordLocked,
    /// Server-side contention/overload signal.
    Contention,
    /// A paginated cursor expired or was exhausted server-side.
    CursorExpired,
    /// The request shape was rejected (bad field, bad payload).
    InvalidRequest,
    /// Any other code, carried verbatim.
    Other(String),
}

impl RemoteErrorCode {
    /// The transient allow-list: only lock/contention and cursor
    /// exhaustion are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteErrorCode::RecordLocked
                | RemoteErrorCode::Contention
                | RemoteErrorCode::CursorExpired
        )
    }

    /// Parse a wire code into the known set, falling back to `Other`.
    pub fn from_wire(code: &str) -> Self {
        match code {
            "RECORD_LOCKED" => RemoteErrorCode::RecordLocked,
            "CONTENTION" => RemoteErrorCode::Contention,
            "CURSOR_EXPIRED" => RemoteErrorCode::CursorExpired,
            "INVALID_REQUEST" => RemoteErrorCode::InvalidRequest,
            other => RemoteErrorCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorCode::RecordLocked => write!(f, "RECORD_LOCKED"),
            RemoteErrorCode::Contention => write!(f, "CONTENTION"),
            RemoteErrorCode::CursorExpired => write!(f, "CURSOR_EXPIRED"),
            RemoteErrorCode::InvalidRequest => write!(f, "INVALID_REQUEST"),
            RemoteErrorCode::Other(code) => write!(f, "{code}"),
        }
    }
}

/// A remote table service failure with its machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<RemoteError> for EngineError {
    fn from(e: RemoteError) -> Self {
        EngineError::Remote(e)
    }
}

/// Standard rowship result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
