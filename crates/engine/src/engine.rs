//! Run coordinator: spill workers, merge-sort, reduce, write.
//!
//! Responsibilities:
//! - validate configuration and schema before any remote call;
//! - run one spill worker thread per source partition, with a hard
//!   join barrier before the merge phase;
//! - drive sort -> reduce -> write single-threaded from the
//!   coordinator once the barrier clears;
//! - clean the per-run scratch directory on success and on failure.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use rowship_codec::{ColumnValue, KeySelector, RowCodec, Schema};
use rowship_common::{EngineConfig, EngineError, Result, RunId, WorkerId};
use rowship_reduce::{LogicalRecord, ReduceAccumulator};
use rowship_spill::{layout, read_spill_metas, ExternalSorter, SortedRun, SpillFileMeta, SpillWriter};
use rowship_writer::{
    BatchedWriter, PayloadMapper, RemoteTableService, RetryExecutor, TaskReport,
};
use tracing::info;

use crate::client::{LazyRemote, RemoteClientBuilder};

/// The merged sort artifact handed from the reduce phase to the write
/// phase. Consuming it streams and then deletes the backing file.
#[derive(Debug)]
pub struct ReduceOutcome {
    sorted: SortedRun,
}

impl ReduceOutcome {
    pub fn merged_file(&self) -> &Path {
        self.sorted.path()
    }

    pub fn rows(&self) -> u64 {
        self.sorted.rows
    }

    pub fn bytes_copied(&self) -> u64 {
        self.sorted.bytes_copied
    }
}

/// One configured shipping run.
///
/// Construction validates the config/schema pairing; every later
/// phase can assume a coherent setup.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    codec: RowCodec,
    run_id: RunId,
}

impl Engine {
    pub fn new(config: EngineConfig, schema: Schema) -> Result<Self> {
        schema.validate(config.mode, config.reduce_key.as_deref())?;
        validate_config(&config)?;
        Ok(Self {
            config,
            codec: RowCodec::new(schema),
            run_id: RunId(epoch_millis()),
        })
    }

    /// Pin the run id instead of deriving it from the clock.
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn schema(&self) -> &Schema {
        self.codec.schema()
    }

    /// Parse one raw text row into typed values, applying per-column
    /// timezone coercion and kind defaults for missing trailing cells.
    pub fn parse_row(&self, raw: &[&str]) -> Result<Vec<ColumnValue>> {
        self.codec.parse_row(raw)
    }

    /// Spill every partition to disk, one worker thread per partition.
    ///
    /// All workers are joined before any result is inspected, so the
    /// merge phase never starts while a spill file is still open.
    pub fn spill_partitions<I>(&self, partitions: Vec<I>) -> Result<Vec<SpillFileMeta>>
    where
        I: IntoIterator<Item = Vec<ColumnValue>> + Send,
    {
        let root = Path::new(&self.config.spill_dir);
        info!(run_id = %self.run_id, workers = partitions.len(), "spill phase starting");

        thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .into_iter()
                .enumerate()
                .map(|(i, rows)| {
                    let codec = &self.codec;
                    let run_id = self.run_id;
                    scope.spawn(move || -> Result<SpillFileMeta> {
                        let mut writer = SpillWriter::create(root, run_id, WorkerId(i as u64))?;
                        for values in rows {
                            let row = codec.encode_row(&values)?;
                            writer.append(&codec.to_cells(&row)?)?;
                        }
                        writer.finish()
                    })
                })
                .collect();

            let joined: Vec<_> = handles.into_iter().map(|h| h.join()).collect();

            let mut metas = Vec::with_capacity(joined.len());
            for result in joined {
                metas.push(result.map_err(|_| panic_error("spill worker panicked"))??);
            }
            Ok(metas)
        })
    }

    /// Rebuild the worker-output list from the spill directory's
    /// metadata sidecars, e.g. after the coordinator lost the
    /// in-memory list between the spill barrier and the merge.
    pub fn recover_task_outputs(&self) -> Result<Vec<SpillFileMeta>> {
        read_spill_metas(Path::new(&self.config.spill_dir), self.run_id.0)
    }

    /// Merge-sort all worker spill files by the reduce key.
    pub fn reduce(&self, task_outputs: &[SpillFileMeta]) -> Result<ReduceOutcome> {
        let key = self.reduce_key()?;
        let selector = self.codec.key_selector(key)?;
        let layout = self.codec.layout();
        let sorter = ExternalSorter::new(
            &self.config.spill_dir,
            self.run_id,
            self.config.sort_mem_budget_bytes,
        );
        let sorted = sorter.sort(task_outputs, |cells| selector.extract_cells(layout, cells))?;
        info!(
            run_id = %self.run_id,
            rows = sorted.rows,
            bytes_copied = sorted.bytes_copied,
            "merge sort complete"
        );
        Ok(ReduceOutcome { sorted })
    }

    /// Collapse the sorted stream into logical records and ship them.
    ///
    /// The reducer runs on its own thread feeding a bounded channel;
    /// the writer drains it on the calling thread so the remote
    /// service never crosses threads.
    pub fn write_reduced<S: RemoteTableService>(
        &self,
        service: &mut S,
        outcome: ReduceOutcome,
    ) -> Result<TaskReport> {
        let key = self.reduce_key()?;
        let selector = self.codec.key_selector(key)?;
        let accumulator = self.accumulator(selector);
        let cells = outcome.sorted.cells()?;
        let (tx, rx) = mpsc::sync_channel::<LogicalRecord>(self.config.chunk_size.max(1));

        thread::scope(|scope| {
            let reducer = scope.spawn(move || {
                accumulator.reduce(cells, |record| {
                    tx.send(record).map_err(|_| {
                        EngineError::Io(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "record channel closed",
                        ))
                    })
                })
            });

            let report = self.write(service, rx.into_iter().map(Ok));
            let reduced = reducer.join().map_err(|_| panic_error("reducer panicked"));

            // A writer failure closes the channel and surfaces here as
            // a send error on the reducer side; report the writer's
            // error in that case, the reducer's otherwise.
            match report {
                Err(e) => Err(e),
                Ok(report) => {
                    reduced??;
                    Ok(report)
                }
            }
        })
    }

    /// Ship a record stream in the configured mode.
    pub fn write<S, I>(&self, service: &mut S, records: I) -> Result<TaskReport>
    where
        S: RemoteTableService,
        I: Iterator<Item = Result<LogicalRecord>>,
    {
        let mapper = PayloadMapper::new(self.codec.schema())?;
        let retry = RetryExecutor::new(self.config.retry.clone(), self.run_id);
        let mut writer = BatchedWriter::new(
            service,
            &mapper,
            retry,
            self.config.chunk_size,
            self.config.upsert_chunk_size,
            self.config.skip_policy,
            self.run_id,
        );
        writer.write(self.config.mode, records)
    }

    /// No-reduce path: typed rows flow straight through the codec into
    /// the writer, never touching disk.
    pub fn write_direct<S, I>(&self, service: &mut S, rows: I) -> Result<TaskReport>
    where
        S: RemoteTableService,
        I: IntoIterator<Item = Vec<ColumnValue>>,
    {
        let codec = &self.codec;
        let records = rows
            .into_iter()
            .map(|values| codec.encode_row(&values).map(LogicalRecord::from));
        self.write(service, records)
    }

    /// Drive one complete run: spill, reduce and write when a reduce
    /// key is configured, straight-through writes otherwise. Scratch
    /// files are removed whether the run succeeds or fails.
    pub fn run<B, I>(&self, partitions: Vec<I>, builder: &B) -> Result<TaskReport>
    where
        B: RemoteClientBuilder,
        I: IntoIterator<Item = Vec<ColumnValue>> + Send,
    {
        let _scratch = ScratchGuard {
            dir: Path::new(&self.config.spill_dir).join(layout::run_dir(self.run_id.0)),
        };
        let mut remote = LazyRemote::new(builder);

        let report = if self.config.reduce_key.is_some() {
            let metas = self.spill_partitions(partitions)?;
            let outcome = self.reduce(&metas)?;
            self.write_reduced(remote.client()?, outcome)?
        } else {
            let mut report = TaskReport::default();
            for rows in partitions {
                report.merge(self.write_direct(remote.client()?, rows)?);
            }
            report
        };

        remote.close();
        info!(
            run_id = %self.run_id,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "run complete"
        );
        Ok(report)
    }

    /// Reduce progress is logged every `chunk_size` emitted records.
    fn accumulator(&self, selector: KeySelector) -> ReduceAccumulator<'_> {
        ReduceAccumulator::new(&self.codec, selector, self.run_id, self.config.chunk_size)
    }

    fn reduce_key(&self) -> Result<&str> {
        self.config.reduce_key.as_deref().ok_or_else(|| {
            EngineError::InvalidConfig("reduce phase requires a reduce key".to_string())
        })
    }
}

/// Removes the per-run scratch tree when the run ends, normally or
/// not. Intermediate files are usually gone already; this sweeps
/// whatever a failure left behind.
struct ScratchGuard {
    dir: PathBuf,
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                tracing::warn!(dir = %self.dir.display(), error = %e, "scratch cleanup failed");
            }
        }
    }
}

fn validate_config(config: &EngineConfig) -> Result<()> {
    if config.chunk_size == 0 {
        return Err(EngineError::InvalidConfig(
            "chunk_size must be at least 1".to_string(),
        ));
    }
    if config.upsert_chunk_size == 0 {
        return Err(EngineError::InvalidConfig(
            "upsert_chunk_size must be at least 1".to_string(),
        ));
    }
    if config.sort_mem_budget_bytes == 0 {
        return Err(EngineError::InvalidConfig(
            "sort_mem_budget_bytes must be at least 1".to_string(),
        ));
    }
    if config.spill_dir.is_empty() {
        return Err(EngineError::InvalidConfig(
            "spill_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn panic_error(what: &str) -> EngineError {
    EngineError::Io(io::Error::new(io::ErrorKind::Other, what.to_string()))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
