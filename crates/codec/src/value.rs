use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone};
use rowship_common::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Semantic type of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Boolean,
    Integer,
    Float,
    Text,
    Timestamp,
    Structured,
}

/// One typed source value.
///
/// The empty string is the wire form of `Null` for every kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Structured(serde_json::Value),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// Pure per-kind behavior, one table per [`ColumnKind`] variant.
///
/// Kind-specific parse/serialize/default stays localized here instead
/// of being spread over trait objects.
pub struct KindTable {
    pub parse: fn(&str) -> Result<ColumnValue>,
    pub serialize: fn(&ColumnValue) -> Result<String>,
    pub default: fn() -> ColumnValue,
}

impl ColumnKind {
    pub fn table(self) -> &'static KindTable {
        match self {
            ColumnKind::Boolean => &BOOLEAN_TABLE,
            ColumnKind::Integer => &INTEGER_TABLE,
            ColumnKind::Float => &FLOAT_TABLE,
            ColumnKind::Text => &TEXT_TABLE,
            ColumnKind::Timestamp => &TIMESTAMP_TABLE,
            ColumnKind::Structured => &STRUCTURED_TABLE,
        }
    }

    /// Encode one typed value to its canonical string form.
    pub fn encode(self, value: &ColumnValue) -> Result<String> {
        if value.is_null() {
            return Ok(String::new());
        }
        (self.table().serialize)(value)
    }

    /// Decode the canonical string form back to a typed value.
    /// Exact inverse of [`ColumnKind::encode`].
    pub fn decode(self, raw: &str) -> Result<ColumnValue> {
        if raw.is_empty() {
            return Ok(ColumnValue::Null);
        }
        (self.table().parse)(raw)
    }
}

static BOOLEAN_TABLE: KindTable = KindTable {
    parse: |raw| match raw {
        "true" => Ok(ColumnValue::Bool(true)),
        "false" => Ok(ColumnValue::Bool(false)),
        other => Err(EngineError::Codec(format!(
            "'{other}' is not a boolean (expected true/false)"
        ))),
    },
    serialize: |v| match v {
        ColumnValue::Bool(b) => Ok(b.to_string()),
        other => Err(kind_mismatch("boolean", other)),
    },
    default: || ColumnValue::Bool(false),
};

static INTEGER_TABLE: KindTable = KindTable {
    parse: |raw| {
        raw.parse::<i64>()
            .map(ColumnValue::Int)
            .map_err(|e| EngineError::Codec(format!("'{raw}' is not an integer: {e}")))
    },
    serialize: |v| match v {
        ColumnValue::Int(i) => Ok(i.to_string()),
        other => Err(kind_mismatch("integer", other)),
    },
    default: || ColumnValue::Int(0),
};

static FLOAT_TABLE: KindTable = KindTable {
    parse: |raw| {
        raw.parse::<f64>()
            .map(ColumnValue::Float)
            .map_err(|e| EngineError::Codec(format!("'{raw}' is not a float: {e}")))
    },
    serialize: |v| match v {
        ColumnValue::Float(x) => Ok(format!("{x}")),
        other => Err(kind_mismatch("float", other)),
    },
    default: || ColumnValue::Float(0.0),
};

static TEXT_TABLE: KindTable = KindTable {
    parse: |raw| Ok(ColumnValue::Text(raw.to_string())),
    serialize: |v| match v {
        ColumnValue::Text(s) => Ok(s.clone()),
        other => Err(kind_mismatch("text", other)),
    },
    default: || ColumnValue::Text(String::new()),
};

static TIMESTAMP_TABLE: KindTable = KindTable {
    parse: |raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(ColumnValue::Timestamp)
            .map_err(|e| EngineError::Codec(format!("'{raw}' is not an ISO-8601 instant: {e}")))
    },
    serialize: |v| match v {
        ColumnValue::Timestamp(ts) => Ok(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        other => Err(kind_mismatch("timestamp", other)),
    },
    default: || ColumnValue::Null,
};

static STRUCTURED_TABLE: KindTable = KindTable {
    parse: |raw| {
        serde_json::from_str(raw)
            .map(ColumnValue::Structured)
            .map_err(|e| EngineError::Codec(format!("structured value is not valid JSON: {e}")))
    },
    serialize: |v| match v {
        ColumnValue::Structured(j) => serde_json::to_string(j)
            .map_err(|e| EngineError::Codec(format!("structured value encode failed: {e}"))),
        other => Err(kind_mismatch("structured", other)),
    },
    default: || ColumnValue::Structured(serde_json::Value::Null),
};

fn kind_mismatch(expected: &str, got: &ColumnValue) -> EngineError {
    EngineError::Codec(format!("expected a {expected} value, got {got:?}"))
}

/// Coerce a naive local timestamp into the column's configured offset.
///
/// Canonical decode only accepts RFC 3339; source systems hand over
/// naive "date time" text, which is interpreted in `tz`.
pub fn parse_timestamp_in(raw: &str, tz: FixedOffset) -> Result<ColumnValue> {
    if raw.is_empty() {
        return Ok(ColumnValue::Null);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ColumnValue::Timestamp(ts));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| EngineError::Codec(format!("'{raw}' is not an ISO-8601 instant: {e}")))?;
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(ts) | chrono::LocalResult::Ambiguous(ts, _) => {
            Ok(ColumnValue::Timestamp(ts))
        }
        chrono::LocalResult::None => Err(EngineError::Codec(format!(
            "'{raw}' does not exist in the configured timezone"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(kind: ColumnKind, value: ColumnValue) {
        let encoded = kind.encode(&value).expect("encode");
        let decoded = kind.decode(&encoded).expect("decode");
        assert_eq!(decoded, value, "kind {kind:?} value {encoded:?}");
    }

    #[test]
    fn every_kind_round_trips() {
        round_trip(ColumnKind::Boolean, ColumnValue::Bool(true));
        round_trip(ColumnKind::Boolean, ColumnValue::Bool(false));
        round_trip(ColumnKind::Integer, ColumnValue::Int(-42));
        round_trip(ColumnKind::Integer, ColumnValue::Int(i64::MAX));
        round_trip(ColumnKind::Float, ColumnValue::Float(3.5));
        round_trip(ColumnKind::Float, ColumnValue::Float(-0.0625));
        round_trip(ColumnKind::Text, ColumnValue::Text("plain".to_string()));
        round_trip(
            ColumnKind::Text,
            ColumnValue::Text("with,separator;and\"quotes\"".to_string()),
        );
        round_trip(
            ColumnKind::Timestamp,
            ColumnValue::Timestamp(
                DateTime::parse_from_rfc3339("2024-05-01T12:30:00+02:00").expect("ts"),
            ),
        );
        round_trip(
            ColumnKind::Structured,
            ColumnValue::Structured(serde_json::json!({"a": [1, 2], "b": null})),
        );
    }

    #[test]
    fn empty_string_is_null_for_every_kind() {
        for kind in [
            ColumnKind::Boolean,
            ColumnKind::Integer,
            ColumnKind::Float,
            ColumnKind::Text,
            ColumnKind::Timestamp,
            ColumnKind::Structured,
        ] {
            assert_eq!(kind.decode("").expect("decode"), ColumnValue::Null);
            assert_eq!(kind.encode(&ColumnValue::Null).expect("encode"), "");
        }
    }

    #[test]
    fn malformed_input_is_a_codec_error() {
        assert!(ColumnKind::Boolean.decode("yes").is_err());
        assert!(ColumnKind::Integer.decode("12.5").is_err());
        assert!(ColumnKind::Timestamp.decode("2024-13-90").is_err());
        assert!(ColumnKind::Structured.decode("{not json").is_err());
    }

    #[test]
    fn naive_timestamps_pick_up_the_configured_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).expect("offset");
        let parsed = parse_timestamp_in("2024-05-01 12:30:00", tz).expect("parse");
        match parsed {
            ColumnValue::Timestamp(ts) => {
                assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+02:00");
            }
            other => panic!("expected timestamp, got {other:?}"),
        }
    }
}
