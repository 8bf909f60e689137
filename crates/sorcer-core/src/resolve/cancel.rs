use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, SorcerError};

/// Cooperative cancellation shared by every clone.
///
/// Honored wherever an evaluation waits on the resolution worker, a
/// provider, the provisioner or a script host.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the token, so `changed`
        // only errors once nobody can cancel any more.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(SorcerError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SorcerError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
