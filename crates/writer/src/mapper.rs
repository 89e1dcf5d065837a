use rowship_codec::{ColumnDescriptor, FlatLayout, IdentitySemantics, Schema};
use rowship_common::{EngineError, Result};
use rowship_reduce::LogicalRecord;

use crate::remote::{RecordPayload, RemoteIdentity};

/// Maps logical records onto remote payloads and identities.
///
/// Owns the schema-derived lookups so the writer itself only sees
/// payloads: where the surrogate id lives, which column is the natural
/// key, and each scalar's remote field id.
#[derive(Debug, Clone)]
pub struct PayloadMapper {
    layout: FlatLayout,
    /// (scalar index, descriptor) for every scalar except the id
    /// column, which travels as identity, not payload.
    scalar_fields: Vec<(usize, ColumnDescriptor)>,
    families: Vec<String>,
    id_column: Option<String>,
    key_column: Option<String>,
    /// Remote field id existence queries filter on.
    identity_field: Option<String>,
    semantics: Option<IdentitySemantics>,
}

impl PayloadMapper {
    pub fn new(schema: &Schema) -> Result<Self> {
        let layout = FlatLayout::of(schema);
        let semantics = schema.identity_semantics();

        let id_index = match schema.id_column.as_deref() {
            Some(name) => Some(layout.scalar_index(name).ok_or_else(|| {
                EngineError::InvalidConfig(format!("id column '{name}' is not a scalar column"))
            })?),
            None => None,
        };
        if let Some(name) = schema.update_key.as_deref() {
            layout.scalar_index(name).ok_or_else(|| {
                EngineError::InvalidConfig(format!("update key '{name}' is not a scalar column"))
            })?;
        }

        let identity_field = match (schema.id_column.as_deref(), schema.update_key.as_deref()) {
            (Some(id), _) => schema.column(id).map(|c| c.remote_field().to_string()),
            (None, Some(key)) => schema.column(key).map(|c| c.remote_field().to_string()),
            (None, None) => None,
        };

        let mut scalar_fields = Vec::new();
        for col in schema.scalar_columns() {
            let idx = layout
                .scalar_index(&col.name)
                .expect("scalar column is in layout");
            if Some(idx) == id_index {
                continue;
            }
            scalar_fields.push((idx, col.clone()));
        }

        Ok(Self {
            families: layout.families.clone(),
            layout,
            scalar_fields,
            id_column: schema.id_column.clone(),
            key_column: schema.update_key.clone(),
            identity_field,
            semantics,
        })
    }

    pub fn layout(&self) -> &FlatLayout {
        &self.layout
    }

    pub fn semantics(&self) -> Option<IdentitySemantics> {
        self.semantics
    }

    /// Remote field id the existence cursor filters on.
    pub fn identity_field(&self) -> Option<&str> {
        self.identity_field.as_deref()
    }

    /// Present iff the surrogate id is non-null or the key value is
    /// non-empty.
    pub fn identity_of(&self, record: &LogicalRecord) -> Option<RemoteIdentity> {
        if let Some(name) = self.id_column.as_deref() {
            let v = record.scalar(&self.layout, name).unwrap_or("");
            if !v.is_empty() {
                return Some(RemoteIdentity::Id(v.to_string()));
            }
        }
        if let Some(name) = self.key_column.as_deref() {
            let v = record.scalar(&self.layout, name).unwrap_or("");
            if !v.is_empty() {
                return Some(RemoteIdentity::Key(v.to_string()));
            }
        }
        None
    }

    /// Build the wire payload: scalars by remote field id, families as
    /// arrays of flat objects (an empty family is an empty array). A
    /// scalar with a configured separator becomes an array of parts.
    pub fn payload_of(&self, record: &LogicalRecord) -> RecordPayload {
        let mut fields = serde_json::Map::new();
        for (idx, col) in &self.scalar_fields {
            let raw = record.scalars.get(*idx).map(String::as_str).unwrap_or("");
            let value = if raw.is_empty() {
                serde_json::Value::Null
            } else if col.separator.is_some() {
                serde_json::Value::Array(
                    col.split_list(raw)
                        .into_iter()
                        .map(|p| serde_json::Value::String(p.trim().to_string()))
                        .collect(),
                )
            } else {
                serde_json::Value::String(raw.to_string())
            };
            fields.insert(col.remote_field().to_string(), value);
        }
        for (fi, family) in self.families.iter().enumerate() {
            let entries = record
                .aggregates
                .get(fi)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let array: Vec<serde_json::Value> = entries
                .iter()
                .map(|e| {
                    let mut obj = serde_json::Map::new();
                    for f in &e.fields {
                        let v = match &f.value {
                            Some(s) => serde_json::Value::String(s.clone()),
                            None => serde_json::Value::Null,
                        };
                        obj.insert(f.name.clone(), v);
                    }
                    serde_json::Value::Object(obj)
                })
                .collect();
            fields.insert(family.clone(), serde_json::Value::Array(array));
        }
        RecordPayload { fields }
    }
}
