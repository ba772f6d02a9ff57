use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Fire-and-forget tasks of one process.
///
/// Failures are logged and never reach the spawner. The in-flight counter
/// lets periodic jobs back off while bulk work is running.
#[derive(Default, Clone)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, name: &'static str, f: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            // NOTE: decrements even if the task panics
            scopeguard::defer! {
                if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                    inner.idle.notify_waiters();
                }
            }

            if let Err(e) = f.await {
                tracing::error!(task = name, "task failed: {e:?}");
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Waits until no tasks are running, including tasks spawned meanwhile.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn nested_tasks_are_awaited() {
        let tasks = TaskTracker::new();
        let finished = Arc::new(AtomicUsize::new(0));

        tasks.spawn("outer", {
            let tasks = tasks.clone();
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                tasks.spawn("inner", {
                    let finished = finished.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        finished.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                });
                finished.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });
        tasks.spawn("failing", async { anyhow::bail!("boom") });
        assert!(tasks.in_flight() >= 1);

        tasks.wait_idle().await;
        assert_eq!(tasks.in_flight(), 0);
        assert_eq!(finished.load(Ordering::Relaxed), 2);
    }
}
