use serde::{Deserialize, Serialize};

/// Destination write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Insert,
    Update,
    Upsert,
}

/// Governs records whose remote identity cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Skip by semantics: drop present-but-missing surrogate ids and
    /// entirely absent natural keys, insert the rest.
    Auto,
    /// Never skip; unresolved records become inserts (with a warning).
    Never,
    /// Always skip unresolved records.
    Always,
}

/// Bounded-retry controls for remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry count after the initial attempt.
    pub limit: u32,
    /// First backoff wait in milliseconds.
    pub initial_wait_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_wait_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            initial_wait_ms: 500,
            max_wait_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: WriteMode,
    /// Column whose value decides which rows collapse into one record.
    /// `None` disables the reduce phase entirely.
    pub reduce_key: Option<String>,
    /// Batch size for create/update calls.
    pub chunk_size: usize,
    /// Batch size for upsert classification rounds (existence queries
    /// amortize better over larger batches).
    pub upsert_chunk_size: usize,
    /// In-memory ceiling for one sorted chunk during the external sort.
    pub sort_mem_budget_bytes: usize,
    pub spill_dir: String,
    pub retry: RetryPolicy,
    pub skip_policy: SkipPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: WriteMode::Insert,
            reduce_key: None,
            chunk_size: 200,
            upsert_chunk_size: 1000,
            sort_mem_budget_bytes: 256 * 1024 * 1024,
            spill_dir: ".rowship_spill".to_string(),
            retry: RetryPolicy::default(),
            skip_policy: SkipPolicy::Auto,
        }
    }
}
