use std::cmp::Ordering;

use rowship_codec::{FlatRow, KeySelector, RowCodec, SortSpec, TaggedEntry};
use rowship_common::metrics::global_metrics;
use rowship_common::{EngineError, ReduceMismatch, Result, RunId};

/// Collapses maximal runs of equal-keyed sorted rows into one logical
/// record per run.
///
/// Holds exactly one current-group buffer; relies on the external sort
/// delivering rows key-ordered and, for equal keys, in original input
/// order (the first row of a group sets the scalar baseline, later
/// rows must match it).
pub struct ReduceAccumulator<'c> {
    codec: &'c RowCodec,
    selector: KeySelector,
    run_id: RunId,
    /// Progress log cadence, in emitted records.
    log_every: usize,
}

struct GroupBuffer {
    key: String,
    scalars: Vec<String>,
    /// Raw entry accumulation per family, coalesced at finalize time.
    pending: Vec<Vec<TaggedEntry>>,
}

impl<'c> ReduceAccumulator<'c> {
    pub fn new(
        codec: &'c RowCodec,
        selector: KeySelector,
        run_id: RunId,
        log_every: usize,
    ) -> Self {
        Self {
            codec,
            selector,
            run_id,
            log_every: log_every.max(1),
        }
    }

    /// Progress log cadence, in emitted records.
    pub fn log_every(&self) -> usize {
        self.log_every
    }

    /// Consume the sorted cell stream, emitting one merged record per
    /// reduce-key run. Returns the emitted record count.
    pub fn reduce<I, F>(&self, rows: I, mut emit: F) -> Result<u64>
    where
        I: Iterator<Item = Result<Vec<String>>>,
        F: FnMut(super::LogicalRecord) -> Result<()>,
    {
        let mut group: Option<GroupBuffer> = None;
        let mut emitted = 0u64;

        for cells in rows {
            let row = self.codec.from_cells(&cells?)?;
            let key = self.selector.extract(&row);

            match group.as_mut() {
                Some(buffer) if buffer.key == key => self.fold(buffer, row)?,
                _ => {
                    if let Some(buffer) = group.take() {
                        emit(self.finalize(buffer))?;
                        emitted += 1;
                        self.log_progress(emitted);
                    }
                    group = Some(self.open_group(key, row));
                }
            }
        }

        if let Some(buffer) = group.take() {
            emit(self.finalize(buffer))?;
            emitted += 1;
            self.log_progress(emitted);
        }

        global_metrics().inc_reduce_records(&self.run_id.to_string(), emitted);
        tracing::info!(run_id = %self.run_id, records = emitted, "reduce complete");
        Ok(emitted)
    }

    fn open_group(&self, key: String, row: FlatRow) -> GroupBuffer {
        GroupBuffer {
            key,
            scalars: row.scalars,
            pending: row.aggregates,
        }
    }

    /// Fold one more row into the current group: scalars must match the
    /// baseline exactly, entries accumulate per family.
    fn fold(&self, buffer: &mut GroupBuffer, row: FlatRow) -> Result<()> {
        let layout = self.codec.layout();
        for (i, (expected, actual)) in buffer.scalars.iter().zip(&row.scalars).enumerate() {
            if expected != actual {
                return Err(EngineError::Reduce(ReduceMismatch {
                    column: layout.scalars[i].clone(),
                    columns: layout.scalars.clone(),
                    expected: buffer.scalars.clone(),
                    actual: row.scalars.clone(),
                }));
            }
        }
        for (pending, incoming) in buffer.pending.iter_mut().zip(row.aggregates) {
            pending.extend(incoming);
        }
        Ok(())
    }

    fn finalize(&self, buffer: GroupBuffer) -> super::LogicalRecord {
        let layout = self.codec.layout();
        let mut aggregates = Vec::with_capacity(buffer.pending.len());
        for (fi, entries) in buffer.pending.into_iter().enumerate() {
            let specs = self.codec.schema().family_sort_specs(&layout.families[fi]);
            aggregates.push(merge_family(entries, specs));
        }
        super::LogicalRecord {
            scalars: buffer.scalars,
            aggregates,
        }
    }

    fn log_progress(&self, emitted: u64) {
        if emitted % self.log_every as u64 == 0 {
            tracing::info!(run_id = %self.run_id, records = emitted, "reduced records");
        }
    }
}

/// Merge one family's accumulated entries: coalesce equal identities
/// (last-wins per field, first occurrence keeps its slot), apply the
/// secondary sort, drop entries whose payload is entirely null.
pub fn merge_family(entries: Vec<TaggedEntry>, specs: &[SortSpec]) -> Vec<TaggedEntry> {
    let mut merged: Vec<TaggedEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let slot = entry.identity.as_deref().and_then(|id| {
            merged
                .iter_mut()
                .find(|e| e.identity.as_deref() == Some(id))
        });
        match slot {
            Some(existing) => existing.merge_from(entry),
            None => merged.push(entry),
        }
    }
    merged.retain(|e| !e.is_all_null());
    sort_entries(&mut merged, specs);
    merged
}

/// Stable secondary sort; entries missing a sort value order after
/// those that have one, ties keep input order.
pub fn sort_entries(entries: &mut [TaggedEntry], specs: &[SortSpec]) {
    if specs.is_empty() {
        return;
    }
    entries.sort_by(|a, b| {
        for spec in specs {
            let ord = cmp_sort_values(a.sort_value(&spec.field), b.sort_value(&spec.field), spec);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn cmp_sort_values(a: Option<&str>, b: Option<&str>, spec: &SortSpec) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            if spec.ascending {
                x.cmp(y)
            } else {
                y.cmp(x)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogicalRecord;
    use rowship_codec::{ColumnDescriptor, ColumnKind, ColumnValue, Schema, TaggedField};

    fn codec(specs: Vec<SortSpec>) -> RowCodec {
        let mut id = ColumnDescriptor::new("sub.id", ColumnKind::Text);
        id.group_identity = true;
        let mut v = ColumnDescriptor::new("sub.v", ColumnKind::Text);
        v.sort_specs = specs;
        RowCodec::new(Schema::new(vec![
            ColumnDescriptor::new("key", ColumnKind::Text),
            ColumnDescriptor::new("name", ColumnKind::Text),
            id,
            v,
        ]))
    }

    fn text(s: &str) -> ColumnValue {
        if s.is_empty() {
            ColumnValue::Null
        } else {
            ColumnValue::Text(s.to_string())
        }
    }

    fn sorted_cells(codec: &RowCodec, rows: &[[&str; 4]]) -> Vec<Result<Vec<String>>> {
        rows.iter()
            .map(|r| {
                let row = codec
                    .encode_row(&[text(r[0]), text(r[1]), text(r[2]), text(r[3])])
                    .expect("encode");
                codec.to_cells(&row)
            })
            .collect()
    }

    fn run(
        codec: &RowCodec,
        rows: &[[&str; 4]],
    ) -> std::result::Result<Vec<LogicalRecord>, EngineError> {
        let selector = codec.key_selector("key").expect("selector");
        let acc = ReduceAccumulator::new(codec, selector, RunId(1), 100);
        let mut out = Vec::new();
        acc.reduce(sorted_cells(codec, rows).into_iter(), |r| {
            out.push(r);
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn input_order_is_preserved_without_sort_specs() {
        // Two rows, same key, no identity, no secondary sort.
        let codec = codec(Vec::new());
        let records = run(&codec, &[["a", "n", "", "1"], ["a", "n", "", "2"]]).expect("reduce");
        assert_eq!(records.len(), 1);
        let values: Vec<Option<&str>> = records[0].aggregates[0]
            .iter()
            .map(|e| e.field("v").and_then(|f| f.value.as_deref()))
            .collect();
        assert_eq!(values, vec![Some("1"), Some("2")]);
    }

    #[test]
    fn scalar_disagreement_is_fatal_and_names_the_column() {
        let codec = codec(Vec::new());
        let err = run(&codec, &[["a", "left", "", "1"], ["a", "right", "", "2"]])
            .expect_err("must fail");
        match err {
            EngineError::Reduce(m) => {
                assert_eq!(m.column, "name");
                assert_eq!(m.columns, vec!["key".to_string(), "name".to_string()]);
                assert!(m.expected.contains(&"left".to_string()));
                assert!(m.actual.contains(&"right".to_string()));
            }
            other => panic!("expected reduce error, got {other}"),
        }
    }

    #[test]
    fn equal_identities_coalesce_to_one_entry() {
        let codec = codec(Vec::new());
        let records =
            run(&codec, &[["a", "n", "42", "1"], ["a", "n", "42", "2"]]).expect("reduce");
        let entries = &records[0].aggregates[0];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity.as_deref(), Some("42"));
        // Last-wins on the overlapping field.
        assert_eq!(
            entries[0].field("v").and_then(|f| f.value.as_deref()),
            Some("2")
        );
    }

    #[test]
    fn later_entry_wins_on_overlapping_field() {
        let a = TaggedEntry {
            identity: Some("42".to_string()),
            fields: vec![TaggedField {
                name: "x".to_string(),
                kind: "text".to_string(),
                value: Some("old".to_string()),
            }],
            sort_projection: Vec::new(),
        };
        let b = TaggedEntry {
            identity: Some("42".to_string()),
            fields: vec![TaggedField {
                name: "x".to_string(),
                kind: "text".to_string(),
                value: Some("new".to_string()),
            }],
            sort_projection: Vec::new(),
        };
        let merged = merge_family(vec![a, b], &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].field("x").and_then(|f| f.value.as_deref()),
            Some("new")
        );
    }

    #[test]
    fn descending_sort_spec_orders_entries() {
        let codec = codec(vec![SortSpec {
            field: "v".to_string(),
            ascending: false,
        }]);
        let records = run(
            &codec,
            &[["a", "n", "", "1"], ["a", "n", "", "3"], ["a", "n", "", "2"]],
        )
        .expect("reduce");
        let values: Vec<Option<&str>> = records[0].aggregates[0]
            .iter()
            .map(|e| e.sort_value("v"))
            .collect();
        assert_eq!(values, vec![Some("3"), Some("2"), Some("1")]);
    }

    #[test]
    fn reducing_single_row_groups_is_idempotent() {
        let codec = codec(Vec::new());
        let rows = [["a", "n1", "1", "x"], ["b", "n2", "2", "y"]];
        let once = run(&codec, &rows).expect("reduce");
        assert_eq!(once.len(), 2);
        // A single-row group comes out unchanged.
        let direct: Vec<LogicalRecord> = sorted_cells(&codec, &rows)
            .into_iter()
            .map(|cells| {
                LogicalRecord::from(codec.from_cells(&cells.expect("cells")).expect("row"))
            })
            .collect();
        assert_eq!(once, direct);
    }

    #[test]
    fn all_null_entries_are_dropped_from_the_family() {
        let codec = codec(Vec::new());
        let records =
            run(&codec, &[["a", "n", "", ""], ["a", "n", "", "1"]]).expect("reduce");
        let entries = &records[0].aggregates[0];
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].field("v").and_then(|f| f.value.as_deref()),
            Some("1")
        );
    }
}
