// Shutdown signalling
//
// Two-phase: a "shutdown" channel stops dispatchers from accepting new
// batches while in-flight handler calls finish; a second "terminate"
// channel of the same shape hard-stops whatever is left.

use std::sync::OnceLock;

use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the shutdown signal
    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }

    /// A token that never fires, for queues run without external lifecycle
    /// management (tests, fire-and-forget tooling).
    pub fn never() -> Self {
        // One process-wide sender keeps every token's changed() pending
        // without allocating a channel per call.
        static NEVER: OnceLock<watch::Sender<bool>> = OnceLock::new();
        let tx = NEVER.get_or_init(|| watch::channel(false).0);
        Self { rx: tx.subscribe() }
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to all listeners
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal_observed() {
        let (tx, mut rx) = shutdown_channel();
        assert!(!rx.is_shutdown());

        tx.shutdown();
        rx.wait().await;
        assert!(rx.is_shutdown());
    }

    #[tokio::test]
    async fn test_never_token_is_quiet() {
        use std::time::Duration;

        // Repeated tokens share one channel and none of them ever fire.
        let first = ShutdownToken::never();
        let mut second = ShutdownToken::never();
        assert!(!first.is_shutdown());
        assert!(!second.is_shutdown());

        let fired = tokio::time::timeout(Duration::from_millis(50), second.wait()).await;
        assert!(fired.is_err());
    }
}
