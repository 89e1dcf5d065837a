//! In-memory remote store for tests and local dry runs.

use std::collections::{HashMap, HashSet, VecDeque};

use rowship_common::{RemoteError, RemoteErrorCode};

use crate::remote::{
    CursorFilter, CursorId, CursorPage, IdentifiedPayload, RecordPayload, RemoteResult,
    RemoteTableService,
};

/// Scriptable [`RemoteTableService`] double.
///
/// Seed `existing` with identity values the store should resolve;
/// queue codes in `fail_next` to make the following calls fail in
/// order. Every accepted batch is kept for assertions.
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    pub existing: HashSet<String>,
    pub created: Vec<Vec<RecordPayload>>,
    pub updated: Vec<Vec<IdentifiedPayload>>,
    pub fail_next: VecDeque<RemoteErrorCode>,
    /// Rows per cursor page; small values exercise pagination.
    pub page_size: usize,
    cursors: HashMap<u64, OpenCursor>,
    next_cursor: u64,
    next_id: u64,
}

#[derive(Debug)]
struct OpenCursor {
    field: String,
    matches: Vec<String>,
    offset: usize,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            ..Self::default()
        }
    }

    pub fn with_existing<I: IntoIterator<Item = S>, S: Into<String>>(mut self, ids: I) -> Self {
        self.existing = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_records(&self) -> usize {
        self.created.iter().map(Vec::len).sum()
    }

    pub fn updated_records(&self) -> usize {
        self.updated.iter().map(Vec::len).sum()
    }

    fn scripted_failure(&mut self) -> Option<RemoteError> {
        self.fail_next
            .pop_front()
            .map(|code| RemoteError::new(code, "scripted failure"))
    }
}

impl RemoteTableService for MockRemoteStore {
    fn create(&mut self, batch: &[RecordPayload]) -> RemoteResult<Vec<u64>> {
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }
        let ids = (0..batch.len() as u64)
            .map(|i| self.next_id + i)
            .collect();
        self.next_id += batch.len() as u64;
        self.created.push(batch.to_vec());
        Ok(ids)
    }

    fn update(&mut self, batch: &[IdentifiedPayload]) -> RemoteResult<()> {
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }
        self.updated.push(batch.to_vec());
        Ok(())
    }

    fn open_cursor(&mut self, _fields: &[String], filter: &CursorFilter) -> RemoteResult<CursorId> {
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }
        let matches = filter
            .values
            .iter()
            .filter(|v| self.existing.contains(*v))
            .cloned()
            .collect();
        let id = self.next_cursor;
        self.next_cursor += 1;
        self.cursors.insert(
            id,
            OpenCursor {
                field: filter.field.clone(),
                matches,
                offset: 0,
            },
        );
        Ok(CursorId(id))
    }

    fn fetch_page(&mut self, cursor: CursorId) -> RemoteResult<CursorPage> {
        if let Some(err) = self.scripted_failure() {
            return Err(err);
        }
        let page_size = self.page_size.max(1);
        let open = self.cursors.get_mut(&cursor.0).ok_or_else(|| {
            RemoteError::new(RemoteErrorCode::CursorExpired, "unknown cursor")
        })?;
        let end = (open.offset + page_size).min(open.matches.len());
        let rows = open.matches[open.offset..end]
            .iter()
            .map(|v| {
                let mut row = serde_json::Map::new();
                row.insert(
                    open.field.clone(),
                    serde_json::Value::String(v.clone()),
                );
                row
            })
            .collect();
        open.offset = end;
        let has_more = end < open.matches.len();
        if !has_more {
            self.cursors.remove(&cursor.0);
        }
        Ok(CursorPage { rows, has_more })
    }
}
