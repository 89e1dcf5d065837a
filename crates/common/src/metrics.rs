use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    spill_rows_written: CounterVec,
    spill_bytes_written: CounterVec,
    merge_bytes_copied: CounterVec,
    merge_chunks_spilled: CounterVec,
    reduce_records: CounterVec,
    write_batches: CounterVec,
    write_records: CounterVec,
    write_skipped: CounterVec,
    write_retries: CounterVec,
    write_call_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_spill(&self, run_id: &str, worker_id: u64, rows: u64, bytes: u64) {
        let labels = [run_id, &worker_id.to_string()];
        self.inner
            .spill_rows_written
            .with_label_values(&labels)
            .inc_by(rows as f64);
        self.inner
            .spill_bytes_written
            .with_label_values(&labels)
            .inc_by(bytes as f64);
    }

    pub fn record_merge_copy(&self, run_id: &str, bytes: u64) {
        self.inner
            .merge_bytes_copied
            .with_label_values(&[run_id])
            .inc_by(bytes as f64);
    }

    pub fn inc_merge_chunk_spill(&self, run_id: &str) {
        self.inner
            .merge_chunks_spilled
            .with_label_values(&[run_id])
            .inc();
    }

    pub fn inc_reduce_records(&self, run_id: &str, count: u64) {
        self.inner
            .reduce_records
            .with_label_values(&[run_id])
            .inc_by(count as f64);
    }

    pub fn record_write_batch(&self, run_id: &str, op: &str, records: u64, secs: f64) {
        let labels = [run_id, op];
        self.inner.write_batches.with_label_values(&labels).inc();
        self.inner
            .write_records
            .with_label_values(&labels)
            .inc_by(records as f64);
        self.inner
            .write_call_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn inc_write_skipped(&self, run_id: &str, reason: &str) {
        self.inner
            .write_skipped
            .with_label_values(&[run_id, reason])
            .inc();
    }

    pub fn inc_write_retries(&self, run_id: &str, op: &str) {
        self.inner
            .write_retries
            .with_label_values(&[run_id, op])
            .inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let spill_rows_written = counter_vec(
            &registry,
            "rowship_spill_rows_written_total",
            "Rows appended to worker spill files",
            &["run_id", "worker_id"],
        );
        let spill_bytes_written = counter_vec(
            &registry,
            "rowship_spill_bytes_written_total",
            "Bytes appended to worker spill files",
            &["run_id", "worker_id"],
        );
        let merge_bytes_copied = counter_vec(
            &registry,
            "rowship_merge_bytes_copied_total",
            "Bytes copied while concatenating worker spill files",
            &["run_id"],
        );
        let merge_chunks_spilled = counter_vec(
            &registry,
            "rowship_merge_chunks_spilled_total",
            "Sorted chunks spilled by the external sort",
            &["run_id"],
        );
        let reduce_records = counter_vec(
            &registry,
            "rowship_reduce_records_total",
            "Logical records emitted by the reduce accumulator",
            &["run_id"],
        );
        let write_batches = counter_vec(
            &registry,
            "rowship_write_batches_total",
            "Remote batches issued per operation",
            &["run_id", "op"],
        );
        let write_records = counter_vec(
            &registry,
            "rowship_write_records_total",
            "Records shipped per operation",
            &["run_id", "op"],
        );
        let write_skipped = counter_vec(
            &registry,
            "rowship_write_skipped_total",
            "Records skipped by the reconciling writer",
            &["run_id", "reason"],
        );
        let write_retries = counter_vec(
            &registry,
            "rowship_write_retries_total",
            "Retry attempts against the remote store",
            &["run_id", "op"],
        );
        let write_call_seconds = histogram_vec(
            &registry,
            "rowship_write_call_seconds",
            "Remote call latency per operation",
            &["run_id", "op"],
        );

        Self {
            registry,
            spill_rows_written,
            spill_bytes_written,
            merge_bytes_copied,
            merge_chunks_spilled,
            reduce_records,
            write_batches,
            write_records,
            write_skipped,
            write_retries,
            write_call_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
