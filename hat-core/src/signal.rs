use std::sync::Arc;

use tokio::sync::watch;

/// One-shot broadcast signal: any number of observers wake exactly once.
///
/// Clones share the same underlying channel, so firing any clone wakes
/// every waiter, and late subscribers observe the fired state immediately.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Firing twice is harmless.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Whether two handles refer to the same underlying signal.
    pub fn same(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn all_waiters_wake_once() {
        let signal = Signal::new();

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let signal = signal.clone();
            waiters.push(tokio::spawn(async move { signal.fired().await }));
        }

        signal.fire();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake after fire")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn late_subscriber_sees_fired_state() {
        let signal = Signal::new();
        signal.fire();
        signal.fire(); // double fire is a no-op

        assert!(signal.is_fired());
        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .expect("fired() should return immediately");
    }

    #[test]
    fn clones_share_identity() {
        let a = Signal::new();
        let b = a.clone();
        assert!(a.same(&b));
        assert!(!a.same(&Signal::new()));
    }
}
