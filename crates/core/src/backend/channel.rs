// In-process channel backend
//
// Bounded buffered queue with channel semantics: push blocks while full,
// fails once closed. Zero durability; pairs with a durable store through
// the persistable wrapper when loss across restarts matters.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::{QueueError, Result};
use crate::port::byte_fifo::{ByteFifo, DedupKeyFn, PushCallback, UniqueByteFifo};

/// Bounded in-memory ByteFifo.
pub struct ChannelByteFifo {
    items: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    closed: AtomicBool,
    /// Signalled on every pop and on close, to wake blocked pushers.
    space: Notify,
}

impl ChannelByteFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            space: Notify::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Non-blocking push. Returns the data back when the channel is full or
    /// closed, so the caller (the persistable wrapper) can route it to the
    /// durable store instead.
    pub async fn try_push(&self, data: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        if self.is_closed() {
            return Err(data);
        }
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return Err(data);
        }
        items.push_back(data);
        Ok(())
    }
}

#[async_trait]
impl ByteFifo for ChannelByteFifo {
    async fn push(&self, data: Vec<u8>) -> Result<()> {
        loop {
            // Register interest before the capacity check so a pop between
            // the check and the await cannot be missed.
            let notified = self.space.notified();
            if self.is_closed() {
                return Err(QueueError::Shutdown);
            }
            {
                let mut items = self.items.lock().await;
                if items.len() < self.capacity {
                    items.push_back(data);
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let popped = self.items.lock().await.pop_front();
        if popped.is_some() {
            self.space.notify_one();
        }
        Ok(popped)
    }

    async fn len(&self) -> Result<i64> {
        Ok(self.items.lock().await.len() as i64)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.space.notify_waiters();
        Ok(())
    }
}

/// Channel FIFO with an in-memory membership set.
pub struct ChannelUniqueByteFifo {
    inner: ChannelByteFifo,
    keys: Mutex<HashSet<Vec<u8>>>,
    key_fn: DedupKeyFn,
}

impl ChannelUniqueByteFifo {
    pub fn new(capacity: usize, key_fn: DedupKeyFn) -> Self {
        Self {
            inner: ChannelByteFifo::new(capacity),
            keys: Mutex::new(HashSet::new()),
            key_fn,
        }
    }
}

#[async_trait]
impl ByteFifo for ChannelUniqueByteFifo {
    async fn push(&self, data: Vec<u8>) -> Result<()> {
        self.push_if_absent(data, None).await
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let popped = self.inner.pop().await?;
        if let Some(data) = &popped {
            // The dedup window closes when the bytes leave the FIFO.
            let key = (self.key_fn)(data);
            self.keys.lock().await.remove(&key);
        }
        Ok(popped)
    }

    async fn len(&self) -> Result<i64> {
        self.inner.len().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[async_trait]
impl UniqueByteFifo for ChannelUniqueByteFifo {
    async fn has(&self, data: &[u8]) -> Result<bool> {
        let key = (self.key_fn)(data);
        Ok(self.keys.lock().await.contains(&key))
    }

    async fn push_if_absent(&self, data: Vec<u8>, callback: Option<PushCallback>) -> Result<()> {
        let key = (self.key_fn)(&data);
        {
            let mut keys = self.keys.lock().await;
            if keys.contains(&key) {
                return Err(QueueError::AlreadyInQueue);
            }
            keys.insert(key.clone());
        }

        // The key is rolled back if the side effect or the push fails, so a
        // failed producer can retry without hitting the sentinel.
        if let Some(callback) = callback {
            if let Err(err) = callback.await {
                self.keys.lock().await.remove(&key);
                return Err(err);
            }
        }
        if let Err(err) = self.inner.push(data).await {
            self.keys.lock().await.remove(&key);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::port::byte_fifo::whole_payload_key;

    #[tokio::test]
    async fn test_push_pop_order() {
        let fifo = ChannelByteFifo::new(10);
        fifo.push(b"a".to_vec()).await.unwrap();
        fifo.push(b"b".to_vec()).await.unwrap();

        assert_eq!(fifo.len().await.unwrap(), 2);
        assert_eq!(fifo.pop().await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(fifo.pop().await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(fifo.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_blocks_until_pop() {
        let fifo = Arc::new(ChannelByteFifo::new(1));
        fifo.push(b"a".to_vec()).await.unwrap();

        let pusher = {
            let fifo = fifo.clone();
            tokio::spawn(async move { fifo.push(b"b".to_vec()).await })
        };

        // Full channel: the push must still be pending.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());

        assert_eq!(fifo.pop().await.unwrap(), Some(b"a".to_vec()));
        pusher.await.unwrap().unwrap();
        assert_eq!(fifo.pop().await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_close_fails_blocked_push() {
        let fifo = Arc::new(ChannelByteFifo::new(1));
        fifo.push(b"a".to_vec()).await.unwrap();

        let pusher = {
            let fifo = fifo.clone();
            tokio::spawn(async move { fifo.push(b"b".to_vec()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        fifo.close().await.unwrap();

        let res = pusher.await.unwrap();
        assert!(matches!(res, Err(QueueError::Shutdown)));

        // Close still allows draining what was buffered.
        assert_eq!(fifo.pop().await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_try_push_full() {
        let fifo = ChannelByteFifo::new(1);
        fifo.try_push(b"a".to_vec()).await.unwrap();
        assert_eq!(fifo.try_push(b"b".to_vec()).await, Err(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_unique_rejects_pending_duplicate() {
        let fifo = ChannelUniqueByteFifo::new(10, whole_payload_key());
        fifo.push(br#"{"key":"A"}"#.to_vec()).await.unwrap();

        let res = fifo.push(br#"{"key":"A"}"#.to_vec()).await;
        assert!(matches!(res, Err(QueueError::AlreadyInQueue)));
        assert_eq!(fifo.len().await.unwrap(), 1);

        // Once popped, the key leaves the membership set.
        fifo.pop().await.unwrap();
        fifo.push(br#"{"key":"A"}"#.to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unique_callback_runs_once() {
        let fifo = ChannelUniqueByteFifo::new(10, whole_payload_key());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let res = fifo
                .push_if_absent(
                    b"item".to_vec(),
                    Some(Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
                )
                .await;
            // First push succeeds, second hits the sentinel.
            let _ = res;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unique_callback_failure_rolls_back_key() {
        let fifo = ChannelUniqueByteFifo::new(10, whole_payload_key());

        let res = fifo
            .push_if_absent(
                b"item".to_vec(),
                Some(Box::pin(async {
                    Err(QueueError::Backend("status update failed".into()))
                })),
            )
            .await;
        assert!(res.is_err());
        assert!(!fifo.has(b"item").await.unwrap());

        // The key was rolled back, so the retry succeeds.
        fifo.push(b"item".to_vec()).await.unwrap();
    }
}
