//! "First interactions finished" barrier.

use async_trait::async_trait;
use tokio::sync::watch;

/// Host signal that the UI has settled and background work may proceed.
#[async_trait]
pub trait InteractionGate: Send + Sync {
    /// Resolve once the host reports it is idle.
    async fn wait(&self);
}

/// Gate backed by a watch channel. Waiters resolve while the gate is open.
#[derive(Debug)]
pub struct ReadyGate {
    tx: watch::Sender<bool>,
}

impl ReadyGate {
    pub fn new(open: bool) -> Self {
        let (tx, _) = watch::channel(open);
        Self { tx }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl InteractionGate for ReadyGate {
    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only fails on shutdown.
        let _ = rx.wait_for(|open| *open).await;
    }
}
