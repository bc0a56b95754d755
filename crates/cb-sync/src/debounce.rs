//! Trailing-edge debouncer
//!
//! Notifications within the quiet period collapse into one handler call
//! with the last value. Each pass recomputes from the full configuration,
//! so skipped intermediate values lose nothing.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

struct Shared<T> {
    pending: Mutex<Option<T>>,
    notify: Notify,
}

pub struct Debouncer<T> {
    shared: Arc<Shared<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn spawn<F, Fut>(period: Duration, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(None),
            notify: Notify::new(),
        });

        let task = tokio::spawn({
            let shared = shared.clone();
            async move {
                loop {
                    shared.notify.notified().await;
                    // Restart the window on every notification
                    while tokio::time::timeout(period, shared.notify.notified())
                        .await
                        .is_ok()
                    {}

                    let value = shared
                        .pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if let Some(value) = value {
                        handler(value).await;
                    }
                }
            }
        });

        Self { shared, task }
    }

    /// Replace the pending value and restart the quiet period.
    pub fn notify(&self, value: T) {
        *self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
        self.shared.notify.notify_one();
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> std::future::Ready<()> + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |value: u32| {
            sink.lock().expect("lock").push(value);
            std::future::ready(())
        };
        (seen, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn collapses_rapid_notifications() {
        let (seen, handler) = recorder();
        let debouncer = Debouncer::spawn(Duration::from_millis(500), handler);

        for value in 1..=3 {
            debouncer.notify(value);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(seen.lock().expect("lock").is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*seen.lock().expect("lock"), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_run_separately() {
        let (seen, handler) = recorder();
        let debouncer = Debouncer::spawn(Duration::from_millis(500), handler);

        debouncer.notify(1);
        tokio::time::sleep(Duration::from_millis(700)).await;
        debouncer.notify(2);
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
    }
}
