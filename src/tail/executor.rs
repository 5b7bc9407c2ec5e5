// SPDX-License-Identifier: Apache-2.0

//! Worker pool owned by a scanner: runs each worker on the blocking thread
//! pool, tracks how many are still alive (for `scanner.limit`) and drains
//! them on stop. A panicking worker is logged and reaped without taking the
//! process down.

use tokio::task::JoinSet;
use tracing::error;

#[derive(Default)]
pub struct Executor {
    tasks: JoinSet<()>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a worker body on the blocking pool.
    pub fn spawn(&mut self, work: impl FnOnce() + Send + 'static) {
        self.tasks.spawn_blocking(work);
    }

    /// Number of workers still running. Finished tasks are reaped first so
    /// the scanner limit counts live workers only.
    pub fn len(&mut self) -> usize {
        self.reap();
        self.tasks.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Wait for every worker to finish. Cancellation is signalled to the
    /// workers separately (via their done channels); this only joins.
    pub async fn wait(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "worker task failed");
            }
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "worker task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut executor = Executor::new();

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            executor.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        executor.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(executor.is_empty());
    }

    #[tokio::test]
    async fn test_len_reaps_finished_workers() {
        let mut executor = Executor::new();
        executor.spawn(|| {});

        // Give the blocking task a moment to finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.len(), 0);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_contained() {
        let mut executor = Executor::new();
        executor.spawn(|| panic!("boom"));
        executor.spawn(|| {});

        executor.wait().await;
        assert!(executor.is_empty());
    }
}
