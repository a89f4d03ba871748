// ByteFifo Port (Interface)
//
// The backend-agnostic byte-queue primitive every queue is built on.
// Pop is non-blocking (Ok(None) on empty); the dispatcher owns the wait.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;

/// Side-effect run exactly when a unique push adds a new entry (never on a
/// duplicate), e.g. a database status update.
pub type PushCallback = BoxFuture<'static, Result<()>>;

/// Derives the dedup key from a serialized payload.
///
/// Defaults to the whole payload. Callers whose items carry incidental
/// fields (timestamps, requestor) must supply a narrower key, or two
/// semantically identical items will not collapse.
pub type DedupKeyFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// The default key derivation: the serialized payload itself.
pub fn whole_payload_key() -> DedupKeyFn {
    Arc::new(|raw| raw.to_vec())
}

/// Backend-agnostic byte FIFO.
#[async_trait]
pub trait ByteFifo: Send + Sync {
    /// Append data to the end of the FIFO.
    ///
    /// Errors are surfaced to the producer synchronously.
    async fn push(&self, data: Vec<u8>) -> Result<()>;

    /// Remove and return the item at the head, or None when empty.
    async fn pop(&self) -> Result<Option<Vec<u8>>>;

    /// Number of items currently queued.
    async fn len(&self) -> Result<i64>;

    /// Close the FIFO. Pending pushes fail with `QueueError::Shutdown`.
    async fn close(&self) -> Result<()>;
}

/// ByteFifo with a companion membership set for deduplication.
///
/// The dedup window is "enqueued": a key is present from a successful push
/// until its pop leaves the FIFO, not until the handler finishes. Callers
/// needing "not currently being processed" semantics layer that on the
/// handler side.
#[async_trait]
pub trait UniqueByteFifo: ByteFifo {
    /// Whether the membership set holds this payload's key.
    async fn has(&self, data: &[u8]) -> Result<bool>;

    /// Atomically: check membership, return `QueueError::AlreadyInQueue` if
    /// present, otherwise add the key, run the callback, then push.
    ///
    /// A callback or push failure rolls the key back out of the set.
    async fn push_if_absent(&self, data: Vec<u8>, callback: Option<PushCallback>) -> Result<()>;
}

/// Test doubles for the FIFO ports.
pub mod mocks {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::QueueError;

    /// Unbounded in-memory FIFO with fault injection, for scheduler tests.
    #[derive(Default)]
    pub struct MockFifo {
        items: Mutex<VecDeque<Vec<u8>>>,
        closed: AtomicBool,
        /// Number of upcoming pop calls that fail with a backend error.
        fail_pops: AtomicUsize,
    }

    impl MockFifo {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next_pops(&self, n: usize) {
            self.fail_pops.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ByteFifo for MockFifo {
        async fn push(&self, data: Vec<u8>) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Shutdown);
            }
            self.items.lock().unwrap().push_back(data);
            Ok(())
        }

        async fn pop(&self) -> Result<Option<Vec<u8>>> {
            if self
                .fail_pops
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(QueueError::Backend("injected pop failure".into()));
            }
            Ok(self.items.lock().unwrap().pop_front())
        }

        async fn len(&self) -> Result<i64> {
            Ok(self.items.lock().unwrap().len() as i64)
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockFifo;
    use super::*;

    #[tokio::test]
    async fn test_mock_fifo_order() {
        let fifo = MockFifo::new();
        fifo.push(b"a".to_vec()).await.unwrap();
        fifo.push(b"b".to_vec()).await.unwrap();

        assert_eq!(fifo.len().await.unwrap(), 2);
        assert_eq!(fifo.pop().await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(fifo.pop().await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(fifo.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mock_fifo_fault_injection() {
        let fifo = MockFifo::new();
        fifo.push(b"a".to_vec()).await.unwrap();
        fifo.fail_next_pops(1);

        assert!(fifo.pop().await.is_err());
        assert_eq!(fifo.pop().await.unwrap(), Some(b"a".to_vec()));
    }
}
