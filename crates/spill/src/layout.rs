use std::fs;
use std::path::Path;

use rowship_common::{EngineError, Result};
use serde::{Deserialize, Serialize};

pub fn run_dir(run_id: u64) -> String {
    format!("runs/{run_id}")
}

pub fn spill_dir(run_id: u64) -> String {
    format!("runs/{run_id}/spill")
}

pub fn worker_spill_path(run_id: u64, worker_id: u64) -> String {
    format!("runs/{run_id}/spill/worker-{worker_id}.csv")
}

pub fn worker_meta_path(run_id: u64, worker_id: u64) -> String {
    format!("runs/{run_id}/spill/worker-{worker_id}.meta.json")
}

pub fn concat_path(run_id: u64) -> String {
    format!("runs/{run_id}/merge/concat.csv")
}

pub fn chunk_path(run_id: u64, chunk: usize) -> String {
    format!("runs/{run_id}/merge/chunk-{chunk}.csv")
}

pub fn merged_path(run_id: u64) -> String {
    format!("runs/{run_id}/merge/sorted.csv")
}

/// What one finished worker reports to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillFileMeta {
    pub run_id: u64,
    pub worker_id: u64,
    /// Path relative to the spill root.
    pub file: String,
    pub bytes: u64,
    pub rows: u64,
}

/// Rebuild the coordinator's worker-output list from the metadata
/// sidecars of a run's spill directory, ordered by worker id.
///
/// The sidecars are gone once the merge phase has consumed the spill
/// files, so this only works between the spill barrier and the merge.
pub fn read_spill_metas(root_dir: &Path, run_id: u64) -> Result<Vec<SpillFileMeta>> {
    let dir = root_dir.join(spill_dir(run_id));
    let mut metas = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let meta: SpillFileMeta = serde_json::from_slice(&fs::read(&path)?).map_err(|e| {
            EngineError::Codec(format!(
                "spill sidecar '{}' is not valid: {e}",
                path.display()
            ))
        })?;
        metas.push(meta);
    }
    metas.sort_by_key(|m| m.worker_id);
    Ok(metas)
}
