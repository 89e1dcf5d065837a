use serde::{Deserialize, Serialize};

/// Why one record was skipped instead of written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No surrogate id and no key value at all.
    MissingIdentity,
    /// An identity was present but the existence query did not find it.
    UnresolvedIdentity,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MissingIdentity => "missing_identity",
            SkipReason::UnresolvedIdentity => "unresolved_identity",
        }
    }
}

/// Mutable warning/skip accumulation for one writer pass.
///
/// Explicitly threaded through the writer and merged by the
/// coordinator at run end; never ambient global state.
#[derive(Debug, Clone, Default)]
pub struct WriteDiagnostics {
    pub warnings: Vec<String>,
    pub skipped: u64,
}

impl WriteDiagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn warn_skip(&mut self, message: impl Into<String>) {
        self.skipped += 1;
        self.warn(message);
    }

    pub fn merge(&mut self, other: WriteDiagnostics) {
        self.skipped += other.skipped;
        self.warnings.extend(other.warnings);
    }
}

/// What one write pass reports back to the host pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub batches: u64,
    pub warnings: Vec<String>,
}

impl TaskReport {
    /// Fold another task's report into this one.
    pub fn merge(&mut self, other: TaskReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.batches += other.batches;
        self.warnings.extend(other.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_counts_and_warnings() {
        let mut a = WriteDiagnostics::default();
        a.warn_skip("non existing id '1'");
        let mut b = WriteDiagnostics::default();
        b.warn("inserting despite unresolved id '2'");
        b.warn_skip("record has no identity");
        a.merge(b);
        assert_eq!(a.skipped, 2);
        assert_eq!(a.warnings.len(), 3);
    }
}
