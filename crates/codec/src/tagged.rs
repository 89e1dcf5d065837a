use rowship_common::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// One leaf value inside a tagged entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedField {
    /// Leaf name within the repeating group.
    pub name: String,
    /// Remote field kind tag, carried so the writer does not need the
    /// schema to rebuild the wire payload.
    pub kind: String,
    /// Serialized value; `None` is an explicit null.
    pub value: Option<String>,
}

/// One element of a repeating group's aggregate array.
///
/// Field order is the key order of the contributing row and is
/// preserved through serialization; `sort_projection` snapshots the
/// values the family's secondary sort keys had at build time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaggedEntry {
    /// Surrogate id; the authoritative dedup key when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub fields: Vec<TaggedField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_projection: Vec<(String, String)>,
}

impl TaggedEntry {
    pub fn field(&self, name: &str) -> Option<&TaggedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Insert or overwrite one field, keeping the original key order
    /// for fields already present.
    pub fn set_field(&mut self, field: TaggedField) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Fold `other` into `self`, the incoming entry winning on every
    /// field it carries (last-wins coalescing).
    pub fn merge_from(&mut self, other: TaggedEntry) {
        for field in other.fields {
            self.set_field(field);
        }
        for (key, value) in other.sort_projection {
            match self
                .sort_projection
                .iter_mut()
                .find(|(k, _)| *k == key)
            {
                Some(slot) => slot.1 = value,
                None => self.sort_projection.push((key, value)),
            }
        }
    }

    /// An entry whose every field is null carries no information and
    /// is dropped from merged aggregates.
    pub fn is_all_null(&self) -> bool {
        self.fields.iter().all(|f| f.value.is_none())
    }

    /// Serialized value a secondary sort spec orders by, preferring the
    /// build-time projection over the live field.
    pub fn sort_value(&self, field: &str) -> Option<&str> {
        self.sort_projection
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.field(field).and_then(|f| f.value.as_deref()))
    }
}

/// Encode one aggregate array to its spill-file JSON form.
pub fn encode_entries(entries: &[TaggedEntry]) -> Result<String> {
    serde_json::to_string(entries)
        .map_err(|e| EngineError::Codec(format!("aggregate encode failed: {e}")))
}

/// Decode an aggregate column; the empty string is an empty array.
pub fn decode_entries(raw: &str) -> Result<Vec<TaggedEntry>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| EngineError::Codec(format!("aggregate column is not a tagged array: {e}")))
}
