//! Trailing-edge debouncer.
//!
//! Every [`Debouncer::trigger`] restarts the window; the action runs once
//! the window passes with no further triggers. Bursts of change
//! notifications therefore collapse into a single action.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl Debouncer {
    pub fn new<F, Fut>(window: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            // Wait for the first trigger of a burst.
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        more = rx.recv() => {
                            if more.is_none() {
                                return;
                            }
                        }
                        () = tokio::time::sleep(window) => break,
                    }
                }
                action().await;
            }
        });
        Self { tx, task }
    }

    /// Arm (or re-arm) the timer.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(window: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let debouncer = Debouncer::new(window, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (debouncer, runs)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_run() {
        let (debouncer, runs) = counting(Duration::from_secs(5));
        for _ in 0..10 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_run_separately() {
        let (debouncer, runs) = counting(Duration::from_millis(100));
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_trigger_no_run() {
        let (_debouncer, runs) = counting(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
