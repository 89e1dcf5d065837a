use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use rowship_common::metrics::global_metrics;
use rowship_common::{EngineError, Result, RunId};

use crate::layout::{chunk_path, concat_path, merged_path, worker_meta_path, SpillFileMeta};

// Rough per-row bookkeeping overhead added to the cell byte total when
// charging the sort memory budget.
const ROW_OVERHEAD_BYTES: usize = 48;

/// Disk-backed merge-sort over all worker spill files.
///
/// Phases: concatenate the worker files into one stream (reporting
/// bytes copied), cut the stream into key-sorted chunks bounded by the
/// memory budget, then N-way merge the chunks into one sorted output.
/// Equal keys keep their original input order end to end: the in-chunk
/// sort is stable and the merge heap breaks ties on chunk index, which
/// follows input order because chunks are cut sequentially.
pub struct ExternalSorter {
    root_dir: PathBuf,
    run_id: RunId,
    mem_budget_bytes: usize,
}

/// The fully sorted merge output, consumed exactly once.
#[derive(Debug)]
pub struct SortedRun {
    path: PathBuf,
    pub rows: u64,
    pub bytes_copied: u64,
}

impl SortedRun {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Stream the sorted rows; the backing file is removed once the
    /// iterator is dropped.
    pub fn cells(&self) -> Result<CellIter> {
        let file = File::open(&self.path)?;
        Ok(CellIter {
            rdr: csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(file),
            path: self.path.clone(),
        })
    }
}

/// Iterator over sorted spill lines, deleting its file on drop.
pub struct CellIter {
    rdr: csv::Reader<File>,
    path: PathBuf,
}

impl Iterator for CellIter {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = csv::StringRecord::new();
        match self.rdr.read_record(&mut record) {
            Ok(true) => Some(Ok(record.iter().map(str::to_string).collect())),
            Ok(false) => None,
            Err(e) => Some(Err(csv_decode_err(e))),
        }
    }
}

impl Drop for CellIter {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

struct HeapEntry {
    key: String,
    chunk: usize,
    cells: Vec<String>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.chunk == other.chunk
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    // Reversed so the BinaryHeap pops the smallest (key, chunk) first;
    // the chunk tie-break is what keeps equal keys in input order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.chunk.cmp(&self.chunk))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ExternalSorter {
    pub fn new(root_dir: impl Into<PathBuf>, run_id: RunId, mem_budget_bytes: usize) -> Self {
        Self {
            root_dir: root_dir.into(),
            run_id,
            mem_budget_bytes: mem_budget_bytes.max(1),
        }
    }

    /// Sort all worker files by the extracted key (natural text order).
    ///
    /// `key_of` sees the raw cells of one line; worker files and every
    /// intermediate artifact are deleted as soon as they are consumed.
    pub fn sort<F>(&self, inputs: &[SpillFileMeta], key_of: F) -> Result<SortedRun>
    where
        F: Fn(&[String]) -> Result<String>,
    {
        let bytes_copied = self.concatenate(inputs)?;
        let (chunks, rows) = self.spill_sorted_chunks(&key_of)?;
        let merged = self.merge_chunks(&chunks)?;
        tracing::info!(
            run_id = %self.run_id,
            inputs = inputs.len(),
            bytes_copied,
            chunks = chunks.len(),
            rows,
            "external merge-sort complete"
        );
        Ok(SortedRun {
            path: merged,
            rows,
            bytes_copied,
        })
    }

    /// Phase 1: append every worker file to one stream, counting bytes.
    fn concatenate(&self, inputs: &[SpillFileMeta]) -> Result<u64> {
        let concat_abs = self.root_dir.join(concat_path(self.run_id.0));
        if let Some(parent) = concat_abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&concat_abs)?;
        let mut bytes_copied = 0u64;
        for meta in inputs {
            let abs = self.root_dir.join(&meta.file);
            let mut input = File::open(&abs)?;
            bytes_copied += io::copy(&mut input, &mut out)?;
            drop(input);
            fs::remove_file(&abs)?;
            let _ = fs::remove_file(
                self.root_dir
                    .join(worker_meta_path(meta.run_id, meta.worker_id)),
            );
        }
        global_metrics().record_merge_copy(&self.run_id.to_string(), bytes_copied);
        tracing::debug!(run_id = %self.run_id, bytes_copied, "worker spill files concatenated");
        Ok(bytes_copied)
    }

    /// Phase 2: cut the concatenated stream into key-sorted chunks that
    /// fit the memory budget, spilling each to disk.
    fn spill_sorted_chunks(
        &self,
        key_of: &dyn Fn(&[String]) -> Result<String>,
    ) -> Result<(Vec<PathBuf>, u64)> {
        let concat_abs = self.root_dir.join(concat_path(self.run_id.0));
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&concat_abs)
            .map_err(csv_decode_err)?;

        let mut chunks = Vec::new();
        let mut buffer: Vec<(String, Vec<String>)> = Vec::new();
        let mut buffered_bytes = 0usize;
        let mut rows = 0u64;

        let mut record = csv::StringRecord::new();
        loop {
            let more = rdr.read_record(&mut record).map_err(csv_decode_err)?;
            if !more {
                break;
            }
            let cells: Vec<String> = record.iter().map(str::to_string).collect();
            let key = key_of(&cells)?;
            buffered_bytes += key.len()
                + cells.iter().map(String::len).sum::<usize>()
                + ROW_OVERHEAD_BYTES;
            buffer.push((key, cells));
            rows += 1;

            if buffered_bytes >= self.mem_budget_bytes {
                chunks.push(self.spill_chunk(chunks.len(), &mut buffer)?);
                buffered_bytes = 0;
            }
        }
        if !buffer.is_empty() {
            chunks.push(self.spill_chunk(chunks.len(), &mut buffer)?);
        }

        drop(rdr);
        fs::remove_file(&concat_abs)?;
        Ok((chunks, rows))
    }

    fn spill_chunk(
        &self,
        index: usize,
        buffer: &mut Vec<(String, Vec<String>)>,
    ) -> Result<PathBuf> {
        // Stable: equal keys keep the order they were read in.
        buffer.sort_by(|a, b| a.0.cmp(&b.0));

        let abs = self.root_dir.join(chunk_path(self.run_id.0, index));
        let mut w = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&abs)
            .map_err(csv_decode_err)?;
        for (key, cells) in buffer.drain(..) {
            // The key is prepended so the merge never re-derives it.
            let mut line = Vec::with_capacity(cells.len() + 1);
            line.push(key);
            line.extend(cells);
            w.write_record(&line).map_err(csv_decode_err)?;
        }
        w.flush()?;
        global_metrics().inc_merge_chunk_spill(&self.run_id.to_string());
        tracing::debug!(run_id = %self.run_id, chunk = index, "sorted chunk spilled");
        Ok(abs)
    }

    /// Phase 3: N-way merge of the sorted chunks.
    fn merge_chunks(&self, chunks: &[PathBuf]) -> Result<PathBuf> {
        let merged_abs = self.root_dir.join(merged_path(self.run_id.0));
        if let Some(parent) = merged_abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&merged_abs)
            .map_err(csv_decode_err)?;

        let mut readers: Vec<csv::Reader<File>> = Vec::with_capacity(chunks.len());
        for path in chunks {
            readers.push(
                csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_path(path)
                    .map_err(csv_decode_err)?,
            );
        }

        let mut heap = BinaryHeap::new();
        for (chunk, rdr) in readers.iter_mut().enumerate() {
            if let Some(entry) = next_chunk_entry(rdr, chunk)? {
                heap.push(entry);
            }
        }

        while let Some(entry) = heap.pop() {
            out.write_record(&entry.cells).map_err(csv_decode_err)?;
            if let Some(next) = next_chunk_entry(&mut readers[entry.chunk], entry.chunk)? {
                heap.push(next);
            }
        }
        out.flush()?;
        drop(readers);
        for path in chunks {
            fs::remove_file(path)?;
        }
        Ok(merged_abs)
    }
}

fn next_chunk_entry(rdr: &mut csv::Reader<File>, chunk: usize) -> Result<Option<HeapEntry>> {
    let mut record = csv::StringRecord::new();
    if !rdr.read_record(&mut record).map_err(csv_decode_err)? {
        return Ok(None);
    }
    let mut iter = record.iter();
    let key = iter.next().unwrap_or_default().to_string();
    let cells = iter.map(str::to_string).collect();
    Ok(Some(HeapEntry { key, chunk, cells }))
}

fn csv_decode_err(e: csv::Error) -> EngineError {
    EngineError::Codec(format!("spill line decode failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::SpillWriter;
    use rowship_common::WorkerId;

    fn key_of(cells: &[String]) -> Result<String> {
        Ok(cells.first().cloned().unwrap_or_default())
    }

    fn write_worker(root: &std::path::Path, worker: u64, rows: &[(&str, &str)]) -> SpillFileMeta {
        let mut w = SpillWriter::create(root, RunId(1), WorkerId(worker)).expect("writer");
        for (k, v) in rows {
            w.append(&[k.to_string(), v.to_string()]).expect("append");
        }
        w.finish().expect("finish")
    }

    fn collect(run: &SortedRun) -> Vec<Vec<String>> {
        run.cells()
            .expect("iter")
            .collect::<Result<Vec<_>>>()
            .expect("rows")
    }

    #[test]
    fn merges_workers_into_one_sorted_stream() {
        let root = tempfile::tempdir().expect("tempdir");
        let m1 = write_worker(root.path(), 0, &[("b", "w0r0"), ("a", "w0r1")]);
        let m2 = write_worker(root.path(), 1, &[("c", "w1r0"), ("a", "w1r1")]);

        let sorter = ExternalSorter::new(root.path(), RunId(1), 1 << 20);
        let run = sorter.sort(&[m1, m2], key_of).expect("sort");
        assert_eq!(run.rows, 4);
        assert!(run.bytes_copied > 0);

        let rows = collect(&run);
        let keys: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(keys, vec!["a", "a", "b", "c"]);
        // Worker 0 spilled before worker 1, so its "a" row comes first.
        assert_eq!(rows[0][1], "w0r1");
        assert_eq!(rows[1][1], "w1r1");
    }

    #[test]
    fn equal_keys_preserve_input_order_across_chunks() {
        let root = tempfile::tempdir().expect("tempdir");
        let rows: Vec<(String, String)> = (0..200)
            .map(|i| (format!("k{:02}", i % 5), format!("seq{i:03}")))
            .collect();
        let borrowed: Vec<(&str, &str)> =
            rows.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let meta = write_worker(root.path(), 0, &borrowed);

        // A tiny budget forces many chunk spills.
        let sorter = ExternalSorter::new(root.path(), RunId(1), 256);
        let run = sorter.sort(&[meta], key_of).expect("sort");
        let sorted = collect(&run);
        assert_eq!(sorted.len(), 200);

        let mut last_key = String::new();
        let mut last_seq_per_key: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        for row in &sorted {
            assert!(row[0] >= last_key, "keys must be non-decreasing");
            last_key = row[0].clone();
            if let Some(prev) = last_seq_per_key.get(&row[0]) {
                assert!(row[1] > *prev, "equal keys must keep input order");
            }
            last_seq_per_key.insert(row[0].clone(), row[1].clone());
        }
    }

    #[test]
    fn cleans_up_every_intermediate_file() {
        let root = tempfile::tempdir().expect("tempdir");
        let meta = write_worker(root.path(), 0, &[("b", "1"), ("a", "2")]);
        let sorter = ExternalSorter::new(root.path(), RunId(1), 64);
        let run = sorter.sort(&[meta], key_of).expect("sort");
        let _ = collect(&run);

        let mut remaining = Vec::new();
        for entry in walk(root.path()) {
            remaining.push(entry);
        }
        assert!(remaining.is_empty(), "leftover files: {remaining:?}");
    }

    fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    out.extend(walk(&path));
                } else {
                    out.push(path);
                }
            }
        }
        out
    }

    #[test]
    fn empty_input_produces_an_empty_run() {
        let root = tempfile::tempdir().expect("tempdir");
        let meta = write_worker(root.path(), 0, &[]);
        let sorter = ExternalSorter::new(root.path(), RunId(1), 1 << 20);
        let run = sorter.sort(&[meta], key_of).expect("sort");
        assert_eq!(run.rows, 0);
        assert!(collect(&run).is_empty());
    }
}
