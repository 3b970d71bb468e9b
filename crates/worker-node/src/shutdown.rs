use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A flag plus a notify so waiters can either poll or block until the
/// shutdown signal arrives. `SIGINT`/`SIGTERM` set this once; every loop in
/// the session observes it at its own poll boundary.
#[derive(Default)]
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_once_signalled() {
        let shutdown = Shutdown::new();
        shutdown.signal();
        assert!(shutdown.is_set());
        tokio::time::timeout(Duration::from_millis(50), shutdown.wait())
            .await
            .expect("wait() should return immediately when already signalled");
    }

    #[tokio::test]
    async fn wait_unblocks_when_signalled_from_another_task() {
        let shutdown = Shutdown::new();
        let waiter = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;

        assert!(!shutdown.is_set());
        shutdown.signal();

        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("waiter task should complete after signal")
            .unwrap();
    }
}
