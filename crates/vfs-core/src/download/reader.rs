//! Reader handle over a shared [`DownloadEntry`]'s temp file.

use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};
use super::entry::{DownloadEntry, SeekFrom};

/// A read/seek handle onto a download in progress (or already complete).
/// Reads and seeks past the currently-written tail block until the writer
/// advances or the download finishes (spec §8: sequential and random-access
/// readers both observe the same underlying bytes).
pub struct DownloadReader {
    entry: Arc<DownloadEntry>,
    file: File,
    pos: u64,
    on_last_release: Arc<dyn Fn() + Send + Sync>,
}

impl DownloadReader {
    pub(crate) async fn open(
        entry: Arc<DownloadEntry>,
        on_last_release: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Self> {
        let file = File::open(&entry.tmp_path).await?;
        Ok(Self { entry, file, pos: 0, on_last_release })
    }

    /// Blocks until either `want_end` bytes have been written or the
    /// download has finished (successfully short of that point, or failed).
    async fn wait_until_available(&self, want_end: u64) -> Result<()> {
        loop {
            if self.entry.written() >= want_end {
                return Ok(());
            }
            if self.entry.is_done() {
                if let Some(err) = self.entry.error() {
                    return Err(Error::Other(format!("download failed: {err}")));
                }
                return Ok(()); // short read / EOF, caller sees fewer bytes
            }
            self.entry.notify.notified().await;
        }
    }

    /// Reads up to `buf.len()` bytes. Returns `0` at true end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait_until_available(self.pos + 1).await?;
        let available = self.entry.written().saturating_sub(self.pos);
        if available == 0 {
            return Ok(0);
        }
        let to_read = (buf.len() as u64).min(available) as usize;
        self.file.seek(std::io::SeekFrom::Start(self.pos)).await?;
        let n = self.file.read(&mut buf[..to_read]).await?;
        self.pos += n as u64;
        Ok(n)
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::Other("unexpected end of download stream".into()));
            }
            filled += n;
        }
        Ok(())
    }

    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut total = 0;
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    /// Seeks within the shared file, waiting for the writer to produce
    /// enough bytes if the target lands beyond what's currently available.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => offset_u64(self.pos, delta)?,
            SeekFrom::End(delta) => {
                let total = self
                    .entry
                    .total_size
                    .ok_or_else(|| Error::Other("seek from end requires a known total size".into()))?;
                offset_u64(total, delta)?
            }
        };
        self.wait_until_available(target).await?;
        self.pos = target;
        Ok(self.pos)
    }
}

fn offset_u64(base: u64, delta: i64) -> Result<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub((-delta) as u64)
    }
    .ok_or_else(|| Error::Other("seek out of range".into()))
}

impl Drop for DownloadReader {
    fn drop(&mut self) {
        if self.entry.release() == 0 {
            (self.on_last_release)();
        }
    }
}
