use std::collections::HashSet;
use std::time::Instant;

use rowship_codec::IdentitySemantics;
use rowship_common::metrics::global_metrics;
use rowship_common::{EngineError, Result, RunId, SkipPolicy, WriteMode};
use rowship_reduce::LogicalRecord;

use crate::mapper::PayloadMapper;
use crate::remote::{
    CursorFilter, IdentifiedPayload, RecordPayload, RemoteIdentity, RemoteTableService,
};
use crate::report::{SkipReason, TaskReport, WriteDiagnostics};
use crate::retry::RetryExecutor;

/// Ships logical records into the remote store in bounded batches,
/// reconciling upserts against existing records first.
pub struct BatchedWriter<'a, S: RemoteTableService> {
    service: &'a mut S,
    mapper: &'a PayloadMapper,
    retry: RetryExecutor,
    chunk_size: usize,
    upsert_chunk_size: usize,
    skip_policy: SkipPolicy,
    run_id: RunId,
}

/// What the upsert classifier decided for one record.
enum Disposition {
    Insert,
    Update(RemoteIdentity),
    Skip(SkipReason),
}

impl<'a, S: RemoteTableService> BatchedWriter<'a, S> {
    pub fn new(
        service: &'a mut S,
        mapper: &'a PayloadMapper,
        retry: RetryExecutor,
        chunk_size: usize,
        upsert_chunk_size: usize,
        skip_policy: SkipPolicy,
        run_id: RunId,
    ) -> Self {
        Self {
            service,
            mapper,
            retry,
            chunk_size: chunk_size.max(1),
            upsert_chunk_size: upsert_chunk_size.max(1),
            skip_policy,
            run_id,
        }
    }

    /// Drive one record stream through the configured mode.
    pub fn write<I>(&mut self, mode: WriteMode, records: I) -> Result<TaskReport>
    where
        I: Iterator<Item = Result<LogicalRecord>>,
    {
        match mode {
            WriteMode::Insert => self.insert_stream(records),
            WriteMode::Update => self.update_stream(records),
            WriteMode::Upsert => self.upsert_stream(records),
        }
    }

    fn insert_stream<I>(&mut self, records: I) -> Result<TaskReport>
    where
        I: Iterator<Item = Result<LogicalRecord>>,
    {
        let mut report = TaskReport::default();
        let mut batch: Vec<RecordPayload> = Vec::with_capacity(self.chunk_size);
        for record in records {
            batch.push(self.mapper.payload_of(&record?));
            if batch.len() >= self.chunk_size {
                flush_create(
                    self.service,
                    &self.retry,
                    self.run_id,
                    &mut batch,
                    &mut report,
                )?;
            }
        }
        flush_create(
            self.service,
            &self.retry,
            self.run_id,
            &mut batch,
            &mut report,
        )?;
        Ok(report)
    }

    fn update_stream<I>(&mut self, records: I) -> Result<TaskReport>
    where
        I: Iterator<Item = Result<LogicalRecord>>,
    {
        let mut report = TaskReport::default();
        let mut diags = WriteDiagnostics::default();
        let mut batch: Vec<IdentifiedPayload> = Vec::with_capacity(self.chunk_size);
        for record in records {
            let record = record?;
            match self.mapper.identity_of(&record) {
                Some(identity) => {
                    batch.push(IdentifiedPayload {
                        identity,
                        payload: self.mapper.payload_of(&record),
                    });
                    if batch.len() >= self.chunk_size {
                        flush_update(
                            self.service,
                            &self.retry,
                            self.run_id,
                            &mut batch,
                            &mut report,
                        )?;
                    }
                }
                None if self.skip_policy == SkipPolicy::Never => {
                    return Err(EngineError::InvalidConfig(
                        "update mode: record has no remote identity and skip policy is 'never'"
                            .to_string(),
                    ));
                }
                None => {
                    self.skip(&mut diags, SkipReason::MissingIdentity, "skipping record without identity");
                }
            }
        }
        flush_update(
            self.service,
            &self.retry,
            self.run_id,
            &mut batch,
            &mut report,
        )?;
        finish_report(report, diags)
    }

    fn upsert_stream<I>(&mut self, records: I) -> Result<TaskReport>
    where
        I: Iterator<Item = Result<LogicalRecord>>,
    {
        let mut report = TaskReport::default();
        let mut diags = WriteDiagnostics::default();
        let mut buffer: Vec<LogicalRecord> = Vec::with_capacity(self.upsert_chunk_size);
        for record in records {
            buffer.push(record?);
            if buffer.len() >= self.upsert_chunk_size {
                self.upsert_batch(&mut buffer, &mut report, &mut diags)?;
            }
        }
        if !buffer.is_empty() {
            self.upsert_batch(&mut buffer, &mut report, &mut diags)?;
        }
        finish_report(report, diags)
    }

    /// One upsert round: resolve existence for the whole batch, then
    /// classify each record and feed the independent insert/update
    /// sub-batches. Each sub-batch flushes at its own threshold;
    /// remainders flush at batch end.
    fn upsert_batch(
        &mut self,
        buffer: &mut Vec<LogicalRecord>,
        report: &mut TaskReport,
        diags: &mut WriteDiagnostics,
    ) -> Result<()> {
        let identities: Vec<String> = buffer
            .iter()
            .filter_map(|r| self.mapper.identity_of(r))
            .map(|i| i.value().to_string())
            .collect();
        let existing = self.resolve_existing(&identities)?;

        let mut inserts: Vec<RecordPayload> = Vec::with_capacity(self.chunk_size);
        let mut updates: Vec<IdentifiedPayload> = Vec::with_capacity(self.chunk_size);

        for record in buffer.drain(..) {
            match self.classify(&record, &existing, diags) {
                Disposition::Update(identity) => {
                    updates.push(IdentifiedPayload {
                        identity,
                        payload: self.mapper.payload_of(&record),
                    });
                    if updates.len() >= self.chunk_size {
                        flush_update(
                            self.service,
                            &self.retry,
                            self.run_id,
                            &mut updates,
                            report,
                        )?;
                    }
                }
                Disposition::Insert => {
                    inserts.push(self.mapper.payload_of(&record));
                    if inserts.len() >= self.chunk_size {
                        flush_create(
                            self.service,
                            &self.retry,
                            self.run_id,
                            &mut inserts,
                            report,
                        )?;
                    }
                }
                Disposition::Skip(_) => {}
            }
        }

        flush_create(self.service, &self.retry, self.run_id, &mut inserts, report)?;
        flush_update(self.service, &self.retry, self.run_id, &mut updates, report)?;
        Ok(())
    }

    /// Apply the skip-policy decision table to one record.
    fn classify(
        &self,
        record: &LogicalRecord,
        existing: &HashSet<String>,
        diags: &mut WriteDiagnostics,
    ) -> Disposition {
        let identity = self.mapper.identity_of(record);
        if let Some(identity) = identity {
            if existing.contains(identity.value()) {
                return Disposition::Update(identity);
            }
            let noun = if identity.is_id() { "id" } else { "key" };
            let value = identity.value();
            return match self.skip_policy {
                SkipPolicy::Always => {
                    self.skip(
                        diags,
                        SkipReason::UnresolvedIdentity,
                        format!("skipping record: non existing {noun} '{value}'"),
                    );
                    Disposition::Skip(SkipReason::UnresolvedIdentity)
                }
                SkipPolicy::Auto if identity.is_id() => {
                    // Surrogate-id semantics: a concrete id that the
                    // store does not know is a stale reference.
                    self.skip(
                        diags,
                        SkipReason::UnresolvedIdentity,
                        format!("skipping record: non existing {noun} '{value}'"),
                    );
                    Disposition::Skip(SkipReason::UnresolvedIdentity)
                }
                SkipPolicy::Auto | SkipPolicy::Never => {
                    diags.warn(format!(
                        "inserting record despite non existing {noun} '{value}'"
                    ));
                    Disposition::Insert
                }
            };
        }

        // No identity at all.
        match (self.skip_policy, self.mapper.semantics()) {
            (SkipPolicy::Always, _) => {
                self.skip(
                    diags,
                    SkipReason::MissingIdentity,
                    "skipping record without identity",
                );
                Disposition::Skip(SkipReason::MissingIdentity)
            }
            (SkipPolicy::Auto, Some(IdentitySemantics::NaturalKey)) => {
                self.skip(
                    diags,
                    SkipReason::MissingIdentity,
                    "skipping record without key value",
                );
                Disposition::Skip(SkipReason::MissingIdentity)
            }
            (SkipPolicy::Auto, _) => Disposition::Insert,
            (SkipPolicy::Never, _) => {
                diags.warn("inserting record without identity");
                Disposition::Insert
            }
        }
    }

    fn skip(&self, diags: &mut WriteDiagnostics, reason: SkipReason, message: impl Into<String>) {
        diags.warn_skip(message);
        global_metrics().inc_write_skipped(&self.run_id.to_string(), reason.as_str());
    }

    /// Resolve which identity values already exist remotely, through a
    /// cursor-paginated "identity in (…)" query.
    fn resolve_existing(&mut self, identities: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        if identities.is_empty() {
            return Ok(existing);
        }
        let field = self
            .mapper
            .identity_field()
            .ok_or_else(|| {
                EngineError::InvalidConfig(
                    "upsert mode needs an id column or an update key".to_string(),
                )
            })?
            .to_string();

        let filter = CursorFilter {
            field: field.clone(),
            values: identities.to_vec(),
        };
        let fields = vec![field.clone()];
        let cursor = self
            .retry
            .execute("open_cursor", || self.service.open_cursor(&fields, &filter))?;

        loop {
            let page = self
                .retry
                .execute("fetch_page", || self.service.fetch_page(cursor))?;
            for row in &page.rows {
                match row.get(&field) {
                    Some(serde_json::Value::String(s)) => {
                        existing.insert(s.clone());
                    }
                    Some(serde_json::Value::Number(n)) => {
                        existing.insert(n.to_string());
                    }
                    _ => {}
                }
            }
            if !page.has_more {
                break;
            }
        }
        tracing::debug!(
            run_id = %self.run_id,
            queried = identities.len(),
            existing = existing.len(),
            "existence query resolved"
        );
        Ok(existing)
    }
}

fn flush_create<S: RemoteTableService>(
    service: &mut S,
    retry: &RetryExecutor,
    run_id: RunId,
    batch: &mut Vec<RecordPayload>,
    report: &mut TaskReport,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let started = Instant::now();
    let ids = retry.execute("create", || service.create(batch))?;
    report.created += ids.len() as u64;
    report.batches += 1;
    global_metrics().record_write_batch(
        &run_id.to_string(),
        "create",
        batch.len() as u64,
        started.elapsed().as_secs_f64(),
    );
    batch.clear();
    Ok(())
}

fn flush_update<S: RemoteTableService>(
    service: &mut S,
    retry: &RetryExecutor,
    run_id: RunId,
    batch: &mut Vec<IdentifiedPayload>,
    report: &mut TaskReport,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let started = Instant::now();
    retry.execute("update", || service.update(batch))?;
    report.updated += batch.len() as u64;
    report.batches += 1;
    global_metrics().record_write_batch(
        &run_id.to_string(),
        "update",
        batch.len() as u64,
        started.elapsed().as_secs_f64(),
    );
    batch.clear();
    Ok(())
}

fn finish_report(mut report: TaskReport, diags: WriteDiagnostics) -> Result<TaskReport> {
    report.skipped = diags.skipped;
    report.warnings = diags.warnings;
    Ok(report)
}
