use rowship_codec::{FlatLayout, FlatRow, TaggedEntry};

/// One fully merged destination record, ready for the writer.
///
/// Created once by the accumulator (or straight from a flat row when
/// no reduction is configured), consumed once, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRecord {
    /// Encoded scalar values, aligned with [`FlatLayout::scalars`].
    pub scalars: Vec<String>,
    /// Merged, order-stable tagged entries per family, aligned with
    /// [`FlatLayout::families`].
    pub aggregates: Vec<Vec<TaggedEntry>>,
}

impl LogicalRecord {
    pub fn scalar<'a>(&'a self, layout: &FlatLayout, name: &str) -> Option<&'a str> {
        layout
            .scalar_index(name)
            .and_then(|i| self.scalars.get(i))
            .map(String::as_str)
    }
}

impl From<FlatRow> for LogicalRecord {
    fn from(row: FlatRow) -> Self {
        Self {
            scalars: row.scalars,
            aggregates: row.aggregates,
        }
    }
}
