// Unique disk FIFO - record log plus a key op-log
//
// The membership set lives in memory and is journalled to
// `<dir>/<name>.keys` as add/remove records so it survives restarts. The
// op-log is compacted on open and again whenever enough churn accumulates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use forgeq_core::port::{ByteFifo, DedupKeyFn, PushCallback, UniqueByteFifo};
use forgeq_core::{QueueError, Result};

use crate::log::DiskByteFifo;

const OP_ADD: u8 = b'A';
const OP_REMOVE: u8 = b'R';

/// Add/remove ops tolerated before the key log is rewritten from the set.
const KEY_LOG_COMPACT_THRESHOLD: u64 = 4096;

struct KeyState {
    set: HashSet<Vec<u8>>,
    file: File,
    dirty_ops: u64,
}

pub struct DiskUniqueByteFifo {
    inner: DiskByteFifo,
    key_fn: DedupKeyFn,
    keys_path: PathBuf,
    keys: Mutex<KeyState>,
}

impl DiskUniqueByteFifo {
    pub async fn open(
        dir: impl AsRef<Path>,
        queue_name: &str,
        key_fn: DedupKeyFn,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let inner = DiskByteFifo::open(dir, queue_name).await?;
        let keys_path = dir.join(format!("{queue_name}.keys"));

        let raw = match fs::read(&keys_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let set = parse_key_log(&raw);

        rewrite_key_log(&keys_path, &set).await?;
        let file = OpenOptions::new().append(true).open(&keys_path).await?;

        Ok(Self {
            inner,
            key_fn,
            keys_path,
            keys: Mutex::new(KeyState {
                set,
                file,
                dirty_ops: 0,
            }),
        })
    }

    async fn journal_op(&self, keys: &mut KeyState, op: u8, key: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(5 + key.len());
        buf.push(op);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        keys.file.write_all(&buf).await?;
        keys.file.sync_data().await?;

        keys.dirty_ops += 1;
        if keys.dirty_ops >= KEY_LOG_COMPACT_THRESHOLD {
            rewrite_key_log(&self.keys_path, &keys.set).await?;
            keys.file = OpenOptions::new().append(true).open(&self.keys_path).await?;
            keys.dirty_ops = 0;
        }
        Ok(())
    }
}

#[async_trait]
impl ByteFifo for DiskUniqueByteFifo {
    async fn push(&self, data: Vec<u8>) -> Result<()> {
        self.push_if_absent(data, None).await
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let Some(data) = self.inner.pop().await? else {
            return Ok(None);
        };
        let key = (self.key_fn)(&data);
        let mut keys = self.keys.lock().await;
        if keys.set.remove(&key) {
            // The record is already off the log; a failed journal append
            // must not lose it. The next open rebuilds a stale key entry
            // at worst, which the mismatch warning below tolerates.
            if let Err(err) = self.journal_op(&mut keys, OP_REMOVE, &key).await {
                warn!(error = %err, "failed to journal dedup key removal");
            }
        } else {
            // Set and log disagree, most likely a crash between the record
            // append and the key append. The item still flows.
            warn!("popped item had no dedup key entry");
        }
        Ok(Some(data))
    }

    async fn len(&self) -> Result<i64> {
        self.inner.len().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        let keys = self.keys.lock().await;
        keys.file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl UniqueByteFifo for DiskUniqueByteFifo {
    async fn has(&self, data: &[u8]) -> Result<bool> {
        let key = (self.key_fn)(data);
        Ok(self.keys.lock().await.set.contains(&key))
    }

    async fn push_if_absent(&self, data: Vec<u8>, callback: Option<PushCallback>) -> Result<()> {
        let key = (self.key_fn)(&data);
        let mut keys = self.keys.lock().await;
        if keys.set.contains(&key) {
            return Err(QueueError::AlreadyInQueue);
        }

        keys.set.insert(key.clone());
        if let Err(err) = self.journal_op(&mut keys, OP_ADD, &key).await {
            keys.set.remove(&key);
            return Err(err);
        }

        if let Some(callback) = callback {
            if let Err(err) = callback.await {
                keys.set.remove(&key);
                let _ = self.journal_op(&mut keys, OP_REMOVE, &key).await;
                return Err(err);
            }
        }

        if let Err(err) = self.inner.push(data).await {
            keys.set.remove(&key);
            let _ = self.journal_op(&mut keys, OP_REMOVE, &key).await;
            return Err(err);
        }
        Ok(())
    }
}

fn parse_key_log(bytes: &[u8]) -> HashSet<Vec<u8>> {
    let mut set = HashSet::new();
    let mut pos = 0usize;
    while pos + 5 <= bytes.len() {
        let op = bytes[pos];
        let mut lenbuf = [0u8; 4];
        lenbuf.copy_from_slice(&bytes[pos + 1..pos + 5]);
        let len = u32::from_le_bytes(lenbuf) as usize;
        if pos + 5 + len > bytes.len() {
            break;
        }
        let key = bytes[pos + 5..pos + 5 + len].to_vec();
        match op {
            OP_ADD => {
                set.insert(key);
            }
            OP_REMOVE => {
                set.remove(&key);
            }
            // Unknown op means corruption; drop the rest of the log.
            _ => break,
        }
        pos += 5 + len;
    }
    set
}

/// Rewrite the op-log as pure adds for the surviving keys, via tmp+rename.
async fn rewrite_key_log(path: &Path, set: &HashSet<Vec<u8>>) -> Result<()> {
    let mut buf = Vec::new();
    for key in set {
        buf.push(OP_ADD);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
    }
    let tmp = path.with_extension("keys.tmp");
    fs::write(&tmp, &buf).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use forgeq_core::port::whole_payload_key;

    use super::*;

    async fn open(dir: &Path) -> DiskUniqueByteFifo {
        DiskUniqueByteFifo::open(dir, "pr-check", whole_payload_key())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_push_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = open(dir.path()).await;

        fifo.push_if_absent(b"sha1".to_vec(), None).await.unwrap();
        let err = fifo.push_if_absent(b"sha1".to_vec(), None).await.unwrap_err();
        assert!(err.is_already_queued());
        assert_eq!(fifo.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_frees_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = open(dir.path()).await;

        fifo.push_if_absent(b"sha1".to_vec(), None).await.unwrap();
        assert!(fifo.has(b"sha1").await.unwrap());
        fifo.pop().await.unwrap();
        assert!(!fifo.has(b"sha1").await.unwrap());

        fifo.push_if_absent(b"sha1".to_vec(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_dedup_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let fifo = open(dir.path()).await;
            fifo.push_if_absent(b"sha1".to_vec(), None).await.unwrap();
            fifo.push_if_absent(b"sha2".to_vec(), None).await.unwrap();
            fifo.pop().await.unwrap();
        }

        let fifo = open(dir.path()).await;
        assert!(!fifo.has(b"sha1").await.unwrap());
        assert!(fifo.has(b"sha2").await.unwrap());
        let err = fifo.push_if_absent(b"sha2".to_vec(), None).await.unwrap_err();
        assert!(err.is_already_queued());
    }

    #[tokio::test]
    async fn test_key_journal_failure_does_not_drop_the_item() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = open(dir.path()).await;
        fifo.push_if_absent(b"sha1".to_vec(), None).await.unwrap();

        // Force the next journal append into a compaction and occupy the
        // compaction tmp path so it fails.
        fifo.keys.lock().await.dirty_ops = KEY_LOG_COMPACT_THRESHOLD - 1;
        let tmp = dir.path().join("pr-check.keys.tmp");
        std::fs::create_dir(&tmp).unwrap();

        assert_eq!(fifo.pop().await.unwrap(), Some(b"sha1".to_vec()));
        assert!(!fifo.has(b"sha1").await.unwrap());
        std::fs::remove_dir(&tmp).unwrap();
    }

    #[tokio::test]
    async fn test_callback_runs_only_for_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = open(dir.path()).await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let _ = fifo
                .push_if_absent(
                    b"sha1".to_vec(),
                    Some(Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
                )
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_failure_rolls_the_key_back() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = open(dir.path()).await;

        let result = fifo
            .push_if_absent(
                b"sha1".to_vec(),
                Some(Box::pin(async {
                    Err(QueueError::Backend("status update failed".into()))
                })),
            )
            .await;
        assert!(result.is_err());
        assert!(!fifo.has(b"sha1").await.unwrap());
        assert_eq!(fifo.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_custom_key_fn_collapses_variants() {
        let dir = tempfile::tempdir().unwrap();
        // Key on the first 4 bytes only.
        let key_fn: DedupKeyFn = Arc::new(|raw| raw[..4.min(raw.len())].to_vec());
        let fifo = DiskUniqueByteFifo::open(dir.path(), "pr-check", key_fn)
            .await
            .unwrap();

        fifo.push_if_absent(b"sha1 at 10:00".to_vec(), None).await.unwrap();
        let err = fifo
            .push_if_absent(b"sha1 at 10:05".to_vec(), None)
            .await
            .unwrap_err();
        assert!(err.is_already_queued());
    }
}
