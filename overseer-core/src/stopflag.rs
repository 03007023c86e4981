use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Notify, watch};

/// A broadcast stop edge with a user refcount.
///
/// Every listener blocked in [`StopFlag::stopped`] wakes on the first
/// [`StopFlag::stop`], and any listener arriving afterwards observes the
/// stopped state immediately. The refcount tracks in-flight users
/// ([`StopFlag::add`] / [`StopFlag::done`]) so a stopper can wait for them
/// to drain.
#[derive(Clone)]
pub struct StopFlag {
    inner: Arc<Inner>,
}

struct Inner {
    stopped: watch::Sender<bool>,
    users: AtomicI64,
    drained: Notify,
}

impl StopFlag {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                stopped,
                users: AtomicI64::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Trip the flag. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Wait for the stop edge. Returns immediately if already tripped.
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        // The sender lives in self, so wait_for can only fail after the
        // flag was dropped entirely.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn add(&self, n: i64) {
        self.inner.users.fetch_add(n, Ordering::AcqRel);
    }

    pub fn done(&self) {
        if self.inner.users.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }

    /// Wait until every registered user called [`StopFlag::done`].
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.users.load(Ordering::Acquire) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_stop_releases_all_listeners() {
        let flag = StopFlag::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let f = flag.clone();
            handles.push(tokio::spawn(async move { f.stopped().await }));
        }
        flag.stop();
        for h in handles {
            timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_edge() {
        let flag = StopFlag::new();
        flag.stop();
        flag.stop();
        assert!(flag.is_stopped());
        // A late listener still observes the edge.
        timeout(Duration::from_millis(100), flag.stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_drained() {
        let flag = StopFlag::new();
        flag.add(2);
        let f = flag.clone();
        let waiter = tokio::spawn(async move { f.wait_drained().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        flag.done();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        flag.done();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_drained_without_users() {
        let flag = StopFlag::new();
        timeout(Duration::from_millis(100), flag.wait_drained())
            .await
            .unwrap();
    }
}
