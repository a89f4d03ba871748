// Append-only record log with a persisted read cursor
//
// Layout: `<dir>/<name>.log` holds u32-LE length-prefixed records,
// `<dir>/<name>.cursor` holds the byte offset of the next unread record.
// Pushes append and fsync; pops advance the cursor and persist it with a
// tmp-file rename. The cursor lags the truth by at most one in-flight pop,
// which a restart replays.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use forgeq_core::port::ByteFifo;
use forgeq_core::{QueueError, Result};

/// Bytes of the u32 length prefix in front of every record.
const RECORD_HEADER_LEN: u64 = 4;

/// Consumed bytes tolerated at the head of the log before the unread
/// suffix is rewritten to the front of a fresh file.
const LOG_COMPACT_THRESHOLD: u64 = 1 << 20;

struct LogState {
    file: File,
    read_pos: u64,
    write_pos: u64,
    count: i64,
}

pub struct DiskByteFifo {
    log_path: PathBuf,
    cursor_path: PathBuf,
    state: Mutex<LogState>,
    closed: AtomicBool,
}

impl DiskByteFifo {
    /// Open (or create) the log for `queue_name` under `dir`, truncating a
    /// torn tail left by a crash mid-append.
    pub async fn open(dir: impl AsRef<Path>, queue_name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let log_path = dir.join(format!("{queue_name}.log"));
        let cursor_path = dir.join(format!("{queue_name}.cursor"));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)
            .await?;

        let file_len = file.metadata().await?.len();
        let (offsets, valid_end) = scan_records(&mut file, file_len).await?;
        if valid_end < file_len {
            warn!(
                queue = %queue_name,
                dropped_bytes = file_len - valid_end,
                "truncating torn tail of queue log"
            );
            file.set_len(valid_end).await?;
        }

        let mut read_pos = read_cursor(&cursor_path).await;
        if read_pos != valid_end && !offsets.contains(&read_pos) {
            // A cursor off any record boundary means the cursor write was
            // lost or torn. Replaying from the start duplicates work but
            // never drops it.
            warn!(queue = %queue_name, cursor = read_pos, "stale cursor, replaying log from the start");
            read_pos = 0;
        }

        let count = offsets.iter().filter(|&&off| off >= read_pos).count() as i64;
        if count > 0 {
            info!(queue = %queue_name, pending = count, "opened queue log with pending items");
        }

        Ok(Self {
            log_path,
            cursor_path,
            state: Mutex::new(LogState {
                file,
                read_pos,
                write_pos: valid_end,
                count,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Drop the consumed prefix by rewriting the unread suffix into a
    /// fresh file. The cursor is zeroed before the rename so a crash in
    /// between replays from the start instead of landing mid-record.
    async fn compact(&self, state: &mut LogState) -> Result<()> {
        let unread = (state.write_pos - state.read_pos) as usize;
        let read_pos = state.read_pos;
        state.file.seek(SeekFrom::Start(read_pos)).await?;
        let mut buf = vec![0u8; unread];
        state.file.read_exact(&mut buf).await?;

        let tmp = self.log_path.with_extension("log.tmp");
        fs::write(&tmp, &buf).await?;
        write_cursor(&self.cursor_path, 0).await?;
        fs::rename(&tmp, &self.log_path).await?;

        state.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.log_path)
            .await?;
        state.read_pos = 0;
        state.write_pos = unread as u64;
        Ok(())
    }
}

#[async_trait]
impl ByteFifo for DiskByteFifo {
    async fn push(&self, data: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Shutdown);
        }
        let mut state = self.state.lock().await;
        let write_pos = state.write_pos;
        state.file.seek(SeekFrom::Start(write_pos)).await?;
        state
            .file
            .write_all(&(data.len() as u32).to_le_bytes())
            .await?;
        state.file.write_all(&data).await?;
        state.file.sync_data().await?;
        state.write_pos += RECORD_HEADER_LEN + data.len() as u64;
        state.count += 1;
        Ok(())
    }

    // Pops keep working after close so shutdown can drain what is left.
    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;
        if state.read_pos >= state.write_pos {
            return Ok(None);
        }

        let read_pos = state.read_pos;
        state.file.seek(SeekFrom::Start(read_pos)).await?;
        let mut header = [0u8; 4];
        state.file.read_exact(&mut header).await?;
        let len = u32::from_le_bytes(header) as usize;
        let mut data = vec![0u8; len];
        state.file.read_exact(&mut data).await?;

        state.read_pos += RECORD_HEADER_LEN + len as u64;
        state.count -= 1;

        // The record has left the queue; bookkeeping failures below must
        // not lose it. A lagging cursor or an oversized file only means a
        // restart replays the tail, which at-least-once delivery allows.
        if state.read_pos == state.write_pos {
            // Fully drained. Reclaim the file instead of growing forever.
            match state.file.set_len(0).await {
                Ok(()) => {
                    state.read_pos = 0;
                    state.write_pos = 0;
                }
                Err(err) => warn!(error = %err, "failed to reclaim drained queue log"),
            }
        } else if state.read_pos >= LOG_COMPACT_THRESHOLD {
            if let Err(err) = self.compact(&mut state).await {
                warn!(error = %err, "queue log compaction failed");
            }
        }
        if let Err(err) = write_cursor(&self.cursor_path, state.read_pos).await {
            warn!(error = %err, "cursor write failed, a restart will replay recent pops");
        }
        Ok(Some(data))
    }

    async fn len(&self) -> Result<i64> {
        Ok(self.state.lock().await.count)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let state = self.state.lock().await;
        state.file.sync_all().await?;
        Ok(())
    }
}

/// Walk the log from the start, returning every record's byte offset and
/// the offset just past the last complete record.
async fn scan_records(file: &mut File, file_len: u64) -> Result<(Vec<u64>, u64)> {
    file.seek(SeekFrom::Start(0)).await?;
    let mut offsets = Vec::new();
    let mut pos = 0u64;
    loop {
        if pos + RECORD_HEADER_LEN > file_len {
            break;
        }
        let mut header = [0u8; 4];
        file.read_exact(&mut header).await?;
        let len = u32::from_le_bytes(header) as u64;
        if pos + RECORD_HEADER_LEN + len > file_len {
            break;
        }
        file.seek(SeekFrom::Current(len as i64)).await?;
        offsets.push(pos);
        pos += RECORD_HEADER_LEN + len;
    }
    Ok((offsets, pos))
}

async fn read_cursor(path: &Path) -> u64 {
    match fs::read(path).await {
        Ok(bytes) if bytes.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes);
            u64::from_le_bytes(buf)
        }
        _ => 0,
    }
}

async fn write_cursor(path: &Path, pos: u64) -> Result<()> {
    let tmp = path.with_extension("cursor.tmp");
    fs::write(&tmp, pos.to_le_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
