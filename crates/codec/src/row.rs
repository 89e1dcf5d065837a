use rowship_common::{EngineError, Result};

use crate::schema::{RemoteFieldKind, Schema};
use crate::tagged::{decode_entries, encode_entries, TaggedEntry, TaggedField};
use crate::value::{parse_timestamp_in, ColumnKind, ColumnValue};

/// Column layout of one spill-file line: scalars in schema order, then
/// one synthesized aggregate column per repeating-group family.
#[derive(Debug, Clone)]
pub struct FlatLayout {
    pub scalars: Vec<String>,
    pub families: Vec<String>,
}

impl FlatLayout {
    pub fn of(schema: &Schema) -> Self {
        Self {
            scalars: schema
                .scalar_columns()
                .map(|c| c.name.clone())
                .collect(),
            families: schema.families().iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.scalars.len() + self.families.len()
    }

    pub fn scalar_index(&self, name: &str) -> Option<usize> {
        self.scalars.iter().position(|s| s == name)
    }

    pub fn family_index(&self, family: &str) -> Option<usize> {
        self.families.iter().position(|f| f == family)
    }
}

/// One source row in flattened, string-encoded form.
///
/// Immutable after construction; consumed into the sort stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    /// Encoded scalar values, aligned with [`FlatLayout::scalars`].
    pub scalars: Vec<String>,
    /// Tagged entries per family, aligned with [`FlatLayout::families`].
    pub aggregates: Vec<Vec<TaggedEntry>>,
}

/// Selects the reduce-key value out of a flat row.
#[derive(Debug, Clone)]
pub enum KeySelector {
    Scalar(usize),
    /// Dotted key: the named leaf of the family's entry.
    GroupLeaf { family: usize, leaf: String },
}

impl KeySelector {
    pub fn extract(&self, row: &FlatRow) -> String {
        match self {
            KeySelector::Scalar(i) => row.scalars.get(*i).cloned().unwrap_or_default(),
            KeySelector::GroupLeaf { family, leaf } => row
                .aggregates
                .get(*family)
                .and_then(|entries| entries.first())
                .and_then(|e| e.field(leaf))
                .and_then(|f| f.value.clone())
                .unwrap_or_default(),
        }
    }

    /// Same extraction over raw spill-line cells, decoding only the
    /// aggregate cell when the key is dotted.
    pub fn extract_cells(&self, layout: &FlatLayout, cells: &[String]) -> Result<String> {
        match self {
            KeySelector::Scalar(i) => Ok(cells.get(*i).cloned().unwrap_or_default()),
            KeySelector::GroupLeaf { family, leaf } => {
                let cell = cells
                    .get(layout.scalars.len() + family)
                    .map(String::as_str)
                    .unwrap_or_default();
                let entries = decode_entries(cell)?;
                Ok(entries
                    .first()
                    .and_then(|e| e.field(leaf))
                    .and_then(|f| f.value.clone())
                    .unwrap_or_default())
            }
        }
    }
}

/// Converts typed source rows to/from flat spill-line cells.
#[derive(Debug, Clone)]
pub struct RowCodec {
    schema: Schema,
    layout: FlatLayout,
}

impl RowCodec {
    pub fn new(schema: Schema) -> Self {
        let layout = FlatLayout::of(&schema);
        Self { schema, layout }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn layout(&self) -> &FlatLayout {
        &self.layout
    }

    /// Resolve the configured reduce key into a selector.
    pub fn key_selector(&self, reduce_key: &str) -> Result<KeySelector> {
        if let Some(i) = self.layout.scalar_index(reduce_key) {
            return Ok(KeySelector::Scalar(i));
        }
        if let Some((family, leaf)) = reduce_key.split_once('.') {
            if let Some(fi) = self.layout.family_index(family) {
                return Ok(KeySelector::GroupLeaf {
                    family: fi,
                    leaf: leaf.to_string(),
                });
            }
        }
        Err(EngineError::InvalidConfig(format!(
            "reduce key '{reduce_key}' does not resolve to a flat column"
        )))
    }

    /// Parse one raw text row into typed values, aligned with the
    /// schema columns.
    ///
    /// Timestamp columns carrying a timezone accept naive local text
    /// and coerce it into that offset. Missing trailing cells take the
    /// column kind's default; extra cells are an error.
    pub fn parse_row(&self, raw: &[&str]) -> Result<Vec<ColumnValue>> {
        if raw.len() > self.schema.columns.len() {
            return Err(EngineError::Codec(format!(
                "row has {} cells, schema has {} columns",
                raw.len(),
                self.schema.columns.len()
            )));
        }
        let mut values = Vec::with_capacity(self.schema.columns.len());
        for (i, col) in self.schema.columns.iter().enumerate() {
            let value = match raw.get(i) {
                None => (col.kind.table().default)(),
                Some(cell) => match (col.kind, col.timezone_offset()?) {
                    (ColumnKind::Timestamp, Some(tz)) => parse_timestamp_in(cell, tz)?,
                    _ => col.kind.decode(cell)?,
                },
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Encode one typed source row, aligned with the schema columns.
    ///
    /// Dotted columns contribute into the owning family's tagged entry
    /// instead of being emitted positionally.
    pub fn encode_row(&self, values: &[ColumnValue]) -> Result<FlatRow> {
        if values.len() != self.schema.columns.len() {
            return Err(EngineError::Codec(format!(
                "row has {} values, schema has {} columns",
                values.len(),
                self.schema.columns.len()
            )));
        }

        let mut scalars = vec![String::new(); self.layout.scalars.len()];
        let mut entries: Vec<TaggedEntry> =
            vec![TaggedEntry::default(); self.layout.families.len()];

        for (col, value) in self.schema.columns.iter().zip(values) {
            let encoded = col.kind.encode(value)?;
            match col.group() {
                None => {
                    let i = self
                        .layout
                        .scalar_index(&col.name)
                        .expect("scalar column is in layout");
                    scalars[i] = encoded;
                }
                Some(family) => {
                    let fi = self
                        .layout
                        .family_index(family)
                        .expect("family column is in layout");
                    let entry = &mut entries[fi];
                    if col.group_identity && !encoded.is_empty() {
                        entry.identity = Some(encoded.clone());
                    }
                    entry.set_field(TaggedField {
                        name: col.leaf().to_string(),
                        kind: remote_kind_of(col.remote_kind, col.kind).as_str().to_string(),
                        value: if encoded.is_empty() {
                            None
                        } else {
                            Some(encoded)
                        },
                    });
                }
            }
        }

        let mut aggregates = Vec::with_capacity(entries.len());
        for (fi, mut entry) in entries.into_iter().enumerate() {
            let family = &self.layout.families[fi];
            for spec in self.schema.family_sort_specs(family) {
                if let Some(v) = entry.field(&spec.field).and_then(|f| f.value.clone()) {
                    entry.sort_projection.push((spec.field.clone(), v));
                }
            }
            // An all-null entry with no identity is an empty family; it
            // must not surface as a single null-payload element.
            if entry.identity.is_none() && entry.is_all_null() {
                aggregates.push(Vec::new());
            } else {
                aggregates.push(vec![entry]);
            }
        }

        Ok(FlatRow { scalars, aggregates })
    }

    /// Render a flat row as CSV cells: scalars, then one JSON cell per
    /// family (empty string for an empty family).
    pub fn to_cells(&self, row: &FlatRow) -> Result<Vec<String>> {
        let mut cells = row.scalars.clone();
        for entries in &row.aggregates {
            if entries.is_empty() {
                cells.push(String::new());
            } else {
                cells.push(encode_entries(entries)?);
            }
        }
        Ok(cells)
    }

    /// Exact inverse of [`RowCodec::to_cells`].
    pub fn from_cells(&self, cells: &[String]) -> Result<FlatRow> {
        if cells.len() != self.layout.width() {
            return Err(EngineError::Codec(format!(
                "spill line has {} cells, layout expects {}",
                cells.len(),
                self.layout.width()
            )));
        }
        let scalar_count = self.layout.scalars.len();
        let scalars = cells[..scalar_count].to_vec();
        let mut aggregates = Vec::with_capacity(self.layout.families.len());
        for cell in &cells[scalar_count..] {
            aggregates.push(decode_entries(cell)?);
        }
        Ok(FlatRow { scalars, aggregates })
    }
}

fn remote_kind_of(configured: Option<RemoteFieldKind>, kind: ColumnKind) -> RemoteFieldKind {
    configured.unwrap_or(match kind {
        ColumnKind::Boolean => RemoteFieldKind::Flag,
        ColumnKind::Integer | ColumnKind::Float => RemoteFieldKind::Number,
        ColumnKind::Timestamp => RemoteFieldKind::Instant,
        ColumnKind::Text | ColumnKind::Structured => RemoteFieldKind::Text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, SortSpec};

    fn codec() -> RowCodec {
        let mut qty = ColumnDescriptor::new("lines.qty", ColumnKind::Integer);
        qty.sort_specs.push(SortSpec {
            field: "qty".to_string(),
            ascending: false,
        });
        let mut id = ColumnDescriptor::new("lines.id", ColumnKind::Text);
        id.group_identity = true;
        RowCodec::new(Schema::new(vec![
            ColumnDescriptor::new("key", ColumnKind::Text),
            ColumnDescriptor::new("total", ColumnKind::Float),
            id,
            qty,
        ]))
    }

    fn text(s: &str) -> ColumnValue {
        ColumnValue::Text(s.to_string())
    }

    #[test]
    fn rows_round_trip_through_cells() {
        let codec = codec();
        let row = codec
            .encode_row(&[
                text("a"),
                ColumnValue::Float(9.5),
                text("42"),
                ColumnValue::Int(3),
            ])
            .expect("encode");
        let cells = codec.to_cells(&row).expect("cells");
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0], "a");
        assert_eq!(cells[1], "9.5");
        let back = codec.from_cells(&cells).expect("decode");
        assert_eq!(back, row);

        let entry = &row.aggregates[0][0];
        assert_eq!(entry.identity.as_deref(), Some("42"));
        assert_eq!(entry.sort_value("qty"), Some("3"));
    }

    #[test]
    fn all_null_group_row_yields_empty_family() {
        let codec = codec();
        let row = codec
            .encode_row(&[
                text("a"),
                ColumnValue::Null,
                ColumnValue::Null,
                ColumnValue::Null,
            ])
            .expect("encode");
        assert!(row.aggregates[0].is_empty());
        let cells = codec.to_cells(&row).expect("cells");
        assert_eq!(cells[2], "");
    }

    #[test]
    fn key_selector_handles_scalar_and_dotted_keys() {
        let codec = codec();
        let row = codec
            .encode_row(&[
                text("a"),
                ColumnValue::Null,
                text("42"),
                ColumnValue::Int(3),
            ])
            .expect("encode");

        let scalar = codec.key_selector("key").expect("selector");
        assert_eq!(scalar.extract(&row), "a");

        let dotted = codec.key_selector("lines.id").expect("selector");
        assert_eq!(dotted.extract(&row), "42");

        let cells = codec.to_cells(&row).expect("cells");
        assert_eq!(
            dotted
                .extract_cells(codec.layout(), &cells)
                .expect("extract"),
            "42"
        );
        assert!(codec.key_selector("nope").is_err());
    }

    #[test]
    fn parse_row_types_cells_and_pads_short_rows_with_defaults() {
        let codec = codec();
        let values = codec
            .parse_row(&["a", "9.5", "42", "3"])
            .expect("parse");
        assert_eq!(
            values,
            vec![
                text("a"),
                ColumnValue::Float(9.5),
                text("42"),
                ColumnValue::Int(3),
            ]
        );

        // Trailing cells left off by the source take typed defaults.
        let padded = codec.parse_row(&["a", "1.0"]).expect("parse");
        assert_eq!(padded[2], ColumnValue::Text(String::new()));
        assert_eq!(padded[3], ColumnValue::Int(0));

        assert!(codec.parse_row(&["a", "x", "42", "3"]).is_err());
        assert!(codec.parse_row(&["a", "1.0", "42", "3", "extra"]).is_err());
    }

    #[test]
    fn parse_row_coerces_naive_timestamps_into_the_column_timezone() {
        let mut ts = ColumnDescriptor::new("seen_at", ColumnKind::Timestamp);
        ts.timezone = Some("+02:00".to_string());
        let codec = RowCodec::new(Schema::new(vec![
            ColumnDescriptor::new("key", ColumnKind::Text),
            ts,
        ]));
        let values = codec
            .parse_row(&["a", "2024-05-01 12:30:00"])
            .expect("parse");
        match &values[1] {
            ColumnValue::Timestamp(ts) => {
                assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+02:00");
            }
            other => panic!("expected timestamp, got {other:?}"),
        }
        // Offset-carrying text passes through untouched.
        let rfc = codec
            .parse_row(&["a", "2024-05-01T07:00:00-05:00"])
            .expect("parse");
        match &rfc[1] {
            ColumnValue::Timestamp(ts) => {
                assert_eq!(ts.to_rfc3339(), "2024-05-01T07:00:00-05:00");
            }
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn wrong_width_is_a_codec_error() {
        let codec = codec();
        assert!(codec.encode_row(&[text("a")]).is_err());
        assert!(codec.from_cells(&["a".to_string()]).is_err());
    }
}
