//! Tracked fire-and-forget background jobs.
//!
//! Endpoints queue follow-up work here (e.g. re-embedding files after a
//! checkpoint restore) so the HTTP response returns before the job runs.
//! Every job is tracked so shutdown can drain them with a deadline.

use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};

/// Process-wide background task manager.
#[derive(Clone)]
pub struct BackgroundTasks {
    tasks: Arc<TokioMutex<JoinSet<()>>>,
    spawned: Arc<AtomicUsize>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(TokioMutex::new(JoinSet::new())),
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a job. The body starts only after the current task next yields,
    /// so a handler that spawns work still returns its response first.
    pub async fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            tokio::task::yield_now().await;
            debug!("background task '{}' starting", name);
            future.await;
            debug!("background task '{}' finished", name);
        });
    }

    /// Number of jobs spawned over the lifetime of this manager.
    pub fn spawned_count(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Number of jobs still running or queued.
    pub async fn pending_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait up to `deadline` for all tracked jobs, then abort the remainder
    /// and give cancellation a moment to propagate.
    pub async fn shutdown(&self, deadline: Duration) {
        let mut tasks = self.tasks.lock().await;
        let drained = timeout(deadline, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result
                    && !err.is_cancelled()
                {
                    warn!("background task failed during shutdown: {}", err);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "background task shutdown deadline hit, aborting {} task(s)",
                tasks.len()
            );
            tasks.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn spawned_job_runs_after_yield() {
        let manager = BackgroundTasks::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        manager
            .spawn("test", async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        // The job must not have run synchronously inside spawn().
        assert!(!ran.load(Ordering::SeqCst));

        manager.shutdown(Duration::from_secs(1)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_aborts_stuck_jobs() {
        let manager = BackgroundTasks::new();
        manager
            .spawn("stuck", async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
            .await;

        manager.shutdown(Duration::from_millis(50)).await;
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn counts_track_spawned_jobs() {
        let manager = BackgroundTasks::new();
        manager.spawn("a", async {}).await;
        manager.spawn("b", async {}).await;
        assert_eq!(manager.spawned_count(), 2);
        manager.shutdown(Duration::from_secs(1)).await;
    }
}
