use chrono::FixedOffset;
use rowship_common::{EngineError, Result, WriteMode};
use serde::{Deserialize, Serialize};

use crate::value::ColumnKind;

/// Destination field kind as the remote store models it.
///
/// The catalog is closed; configuration naming anything else is
/// rejected before the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteFieldKind {
    Text,
    Number,
    Flag,
    Instant,
    Reference,
    List,
    Key,
}

impl RemoteFieldKind {
    pub fn from_config(name: &str) -> Result<Self> {
        match name {
            "text" => Ok(RemoteFieldKind::Text),
            "number" => Ok(RemoteFieldKind::Number),
            "flag" => Ok(RemoteFieldKind::Flag),
            "instant" => Ok(RemoteFieldKind::Instant),
            "reference" => Ok(RemoteFieldKind::Reference),
            "list" => Ok(RemoteFieldKind::List),
            "key" => Ok(RemoteFieldKind::Key),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown remote field kind '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteFieldKind::Text => "text",
            RemoteFieldKind::Number => "number",
            RemoteFieldKind::Flag => "flag",
            RemoteFieldKind::Instant => "instant",
            RemoteFieldKind::Reference => "reference",
            RemoteFieldKind::List => "list",
            RemoteFieldKind::Key => "key",
        }
    }
}

/// One secondary ordering rule inside a repeating group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Sibling leaf name within the same group.
    pub field: String,
    pub ascending: bool,
}

/// One source column and its destination mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Source name; a '.' marks membership in the repeating group named
    /// by the prefix before the first '.'.
    pub name: String,
    pub kind: ColumnKind,
    /// Target field id in the remote store; defaults to `name`.
    #[serde(default)]
    pub remote_field: Option<String>,
    #[serde(default)]
    pub remote_kind: Option<RemoteFieldKind>,
    /// Offset applied when coercing naive date/time text, e.g. "+02:00".
    #[serde(default)]
    pub timezone: Option<String>,
    /// Separator for list-valued text columns.
    #[serde(default)]
    pub separator: Option<String>,
    /// Secondary ordering for the owning repeating group. Only
    /// meaningful on dotted columns.
    #[serde(default)]
    pub sort_specs: Vec<SortSpec>,
    /// Marks a dotted column as the group's surrogate identity.
    #[serde(default)]
    pub group_identity: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            remote_field: None,
            remote_kind: None,
            timezone: None,
            separator: None,
            sort_specs: Vec::new(),
            group_identity: false,
        }
    }

    /// Group prefix for dotted columns, `None` for scalars.
    pub fn group(&self) -> Option<&str> {
        self.name.split_once('.').map(|(g, _)| g)
    }

    /// Leaf name within the group, or the full name for scalars.
    pub fn leaf(&self) -> &str {
        self.name
            .split_once('.')
            .map(|(_, l)| l)
            .unwrap_or(&self.name)
    }

    pub fn remote_field(&self) -> &str {
        self.remote_field.as_deref().unwrap_or(&self.name)
    }

    pub fn timezone_offset(&self) -> Result<Option<FixedOffset>> {
        match self.timezone.as_deref() {
            None => Ok(None),
            Some(raw) => raw.parse::<FixedOffset>().map(Some).map_err(|e| {
                EngineError::InvalidConfig(format!(
                    "column '{}' has invalid timezone '{raw}': {e}",
                    self.name
                ))
            }),
        }
    }

    /// Split a list-valued text by the configured separator.
    pub fn split_list<'a>(&self, raw: &'a str) -> Vec<&'a str> {
        match self.separator.as_deref() {
            Some(sep) if !sep.is_empty() => raw.split(sep).collect(),
            _ => vec![raw],
        }
    }
}

/// Which column family identifies a destination record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySemantics {
    /// A surrogate numeric id column.
    SurrogateId,
    /// A designated natural update-key column.
    NaturalKey,
}

/// Full description of the source table and its destination mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDescriptor>,
    /// Scalar column holding the destination's surrogate numeric id.
    #[serde(default)]
    pub id_column: Option<String>,
    /// Natural update-key column for update/upsert without surrogate
    /// ids. Mutually exclusive with `id_column`.
    #[serde(default)]
    pub update_key: Option<String>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            id_column: None,
            update_key: None,
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    pub fn with_update_key(mut self, column: impl Into<String>) -> Self {
        self.update_key = Some(column.into());
        self
    }

    /// How records are identified remotely, when either source is
    /// configured.
    pub fn identity_semantics(&self) -> Option<IdentitySemantics> {
        if self.id_column.is_some() {
            Some(IdentitySemantics::SurrogateId)
        } else if self.update_key.is_some() {
            Some(IdentitySemantics::NaturalKey)
        } else {
            None
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Non-repeating columns in schema order.
    pub fn scalar_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.group().is_none())
    }

    /// Repeating-group prefixes in order of first appearance.
    pub fn families(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in &self.columns {
            if let Some(g) = c.group() {
                if !out.contains(&g) {
                    out.push(g);
                }
            }
        }
        out
    }

    /// Dotted members of one family, in schema order.
    pub fn family_columns<'a>(
        &'a self,
        family: &'a str,
    ) -> impl Iterator<Item = &'a ColumnDescriptor> {
        self.columns.iter().filter(move |c| c.group() == Some(family))
    }

    /// The family's secondary sort rules: the first member carrying a
    /// non-empty spec list speaks for the whole group.
    pub fn family_sort_specs<'a>(&'a self, family: &'a str) -> &'a [SortSpec] {
        self.family_columns(family)
            .map(|c| c.sort_specs.as_slice())
            .find(|s| !s.is_empty())
            .unwrap_or(&[])
    }

    /// Validate mode/key/field combinations before any write begins.
    pub fn validate(&self, mode: WriteMode, reduce_key: Option<&str>) -> Result<()> {
        if self.columns.is_empty() {
            return Err(EngineError::InvalidConfig(
                "schema has no columns".to_string(),
            ));
        }
        if let Some(key) = reduce_key {
            if self.column(key).is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "reduce key '{key}' is not a schema column"
                )));
            }
        }
        if self.id_column.is_some() && self.update_key.is_some() {
            return Err(EngineError::InvalidConfig(
                "id_column and update_key are mutually exclusive".to_string(),
            ));
        }
        if matches!(mode, WriteMode::Update | WriteMode::Upsert)
            && self.identity_semantics().is_none()
        {
            return Err(EngineError::InvalidConfig(format!(
                "{mode:?} mode needs an id column or an update key"
            )));
        }
        if let Some(id) = self.id_column.as_deref() {
            let col = self.column(id).ok_or_else(|| {
                EngineError::InvalidConfig(format!("id column '{id}' is not a schema column"))
            })?;
            if col.group().is_some() {
                return Err(EngineError::InvalidConfig(format!(
                    "id column '{id}' must be a non-repeating column"
                )));
            }
        }
        if let Some(key) = self.update_key.as_deref() {
            let col = self.column(key).ok_or_else(|| {
                EngineError::InvalidConfig(format!("update key '{key}' is not a schema column"))
            })?;
            if col.group().is_some() {
                return Err(EngineError::InvalidConfig(format!(
                    "update key '{key}' must be a non-repeating column"
                )));
            }
            if let Some(kind) = col.remote_kind {
                if kind != RemoteFieldKind::Key && kind != RemoteFieldKind::Text {
                    return Err(EngineError::InvalidConfig(format!(
                        "update key '{key}' maps to remote kind '{}', expected a key field",
                        kind.as_str()
                    )));
                }
            }
        }
        for c in &self.columns {
            c.timezone_offset()?;
            for spec in &c.sort_specs {
                let Some(family) = c.group() else {
                    return Err(EngineError::InvalidConfig(format!(
                        "column '{}' has sort specs but is not part of a repeating group",
                        c.name
                    )));
                };
                let sibling = format!("{family}.{}", spec.field);
                if self.column(&sibling).is_none() {
                    return Err(EngineError::InvalidConfig(format!(
                        "sort spec on '{}' names unknown sibling '{}'",
                        c.name, sibling
                    )));
                }
            }
        }
        Ok(())
    }
}
