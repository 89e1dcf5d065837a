use std::thread;
use std::time::Duration;

use rowship_common::metrics::global_metrics;
use rowship_common::{EngineError, RemoteError, Result, RetryPolicy, RunId};

/// Wraps one remote call with bounded retries.
///
/// Only the transient allow-list is retried; the wait doubles from the
/// initial value up to the cap. Give-up surfaces the last error, which
/// the writer treats as fatal for the whole run.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    run_id: RunId,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, run_id: RunId) -> Self {
        Self { policy, run_id }
    }

    pub fn execute<T, F>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, RemoteError>,
    {
        let total_attempts = self.policy.limit;
        let mut wait = Duration::from_millis(self.policy.initial_wait_ms);
        let max_wait = Duration::from_millis(self.policy.max_wait_ms);
        let mut attempt = 0u32;

        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.code.is_transient() && attempt < total_attempts => {
                    attempt += 1;
                    global_metrics().inc_write_retries(&self.run_id.to_string(), op);
                    // Full failure detail only every third attempt, to
                    // keep a long contention stretch out of the log.
                    if attempt % 3 == 0 {
                        tracing::warn!(
                            run_id = %self.run_id,
                            op,
                            attempt,
                            total_attempts,
                            wait_ms = wait.as_millis() as u64,
                            code = %e.code,
                            message = %e.message,
                            "retrying remote call"
                        );
                    } else {
                        tracing::warn!(
                            run_id = %self.run_id,
                            op,
                            attempt,
                            total_attempts,
                            wait_ms = wait.as_millis() as u64,
                            "retrying remote call"
                        );
                    }
                    thread::sleep(wait);
                    wait = (wait * 2).min(max_wait);
                }
                Err(e) => {
                    if e.code.is_transient() {
                        tracing::error!(
                            run_id = %self.run_id,
                            op,
                            attempt,
                            total_attempts,
                            code = %e.code,
                            "retries exhausted, giving up"
                        );
                    }
                    return Err(EngineError::Remote(e));
                }
            }
        }
    }
}
