//! Deferred task execution for debounced saves.

use std::sync::Mutex;
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task once after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration, task: Task);
}

/// Schedules onto a tokio runtime. The task itself runs on the blocking
/// pool since saving takes the store lock and does file I/O.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        TokioScheduler { handle }
    }

    /// Use the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::error!("Scheduled task panicked: {}", e);
            }
        });
    }
}

/// One short-lived thread per scheduled task.
#[derive(Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) {
        let spawned = std::thread::Builder::new()
            .name("calstore-save".into())
            .spawn(move || {
                std::thread::sleep(delay);
                task();
            });
        if let Err(e) = spawned {
            tracing::error!("Could not spawn scheduler thread: {}", e);
        }
    }
}

/// Collects tasks until the caller runs them.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run every queued task, including any queued while running. Returns
    /// how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch: Vec<(Duration, Task)> =
                std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
            if batch.is_empty() {
                return ran;
            }
            for (_, task) in batch {
                task();
                ran += 1;
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((delay, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_scheduler_runs_on_demand() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        scheduler.schedule_once(Duration::from_millis(500), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(scheduler.pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn tokio_scheduler_runs_after_delay() {
        let scheduler = TokioScheduler::current().expect("Should be inside a runtime");
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule_once(Duration::from_millis(10), Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }
}
