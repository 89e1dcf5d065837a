use std::fs::{self, File};
use std::path::PathBuf;

use rowship_common::metrics::global_metrics;
use rowship_common::{Result, RunId, WorkerId};

use crate::layout::{worker_meta_path, worker_spill_path, SpillFileMeta};

/// Per-worker append-only spill file.
///
/// Each worker owns exactly one file; no locking, no cross-worker
/// sharing. One RFC 4180 CSV line per flat row, the empty string
/// standing in for null.
pub struct SpillWriter {
    root_dir: PathBuf,
    run_id: RunId,
    worker_id: WorkerId,
    rel: String,
    inner: csv::Writer<File>,
    rows: u64,
}

impl SpillWriter {
    /// Create the worker's private spill file, truncating any stale
    /// leftover from a previous attempt.
    pub fn create(root_dir: impl Into<PathBuf>, run_id: RunId, worker_id: WorkerId) -> Result<Self> {
        let root_dir = root_dir.into();
        let rel = worker_spill_path(run_id.0, worker_id.0);
        let abs = root_dir.join(&rel);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&abs)?;
        let inner = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Self {
            root_dir,
            run_id,
            worker_id,
            rel,
            inner,
            rows: 0,
        })
    }

    /// Append one encoded row.
    pub fn append(&mut self, cells: &[String]) -> Result<()> {
        self.inner
            .write_record(cells)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush, report the file to the coordinator, and leave a metadata
    /// sidecar so a run directory is self-describing.
    pub fn finish(mut self) -> Result<SpillFileMeta> {
        self.inner.flush()?;
        drop(self.inner);

        let abs = self.root_dir.join(&self.rel);
        let bytes = fs::metadata(&abs)?.len();
        let meta = SpillFileMeta {
            run_id: self.run_id.0,
            worker_id: self.worker_id.0,
            file: self.rel,
            bytes,
            rows: self.rows,
        };

        let meta_abs = self
            .root_dir
            .join(worker_meta_path(self.run_id.0, self.worker_id.0));
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        fs::write(meta_abs, json)?;

        global_metrics().record_spill(&self.run_id.to_string(), self.worker_id.0, meta.rows, bytes);
        tracing::debug!(
            run_id = %self.run_id,
            worker_id = %self.worker_id,
            rows = meta.rows,
            bytes,
            "worker spill file closed"
        );
        Ok(meta)
    }
}
