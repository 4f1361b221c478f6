//! Per-media-key shared download state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use tokio::sync::Notify;

/// Mirrors `std::io::SeekFrom`, kept separate so `DownloadReader` doesn't
/// need to implement the synchronous `Seek` trait.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// Shared state for one in-flight or recently-finished download. A single
/// background writer advances `written`; any number of readers observe it.
pub struct DownloadEntry {
    pub media_key: String,
    pub tmp_path: PathBuf,
    pub start_time: Instant,
    pub total_size: Option<u64>,
    ref_count: AtomicUsize,
    written: AtomicU64,
    done: AtomicBool,
    error: StdMutex<Option<String>>,
    pub(super) notify: Notify,
}

impl DownloadEntry {
    pub fn new(media_key: String, tmp_path: PathBuf, total_size: Option<u64>) -> Self {
        Self {
            media_key,
            tmp_path,
            start_time: Instant::now(),
            total_size,
            ref_count: AtomicUsize::new(1),
            written: AtomicU64::new(0),
            done: AtomicBool::new(false),
            error: StdMutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the reader count and returns the count after decrementing.
    pub fn release(&self) -> usize {
        self.ref_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().expect("error mutex poisoned").clone()
    }

    pub fn advance(&self, n: u64) {
        self.written.fetch_add(n, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn finish(&self, err: Option<String>) {
        *self.error.lock().expect("error mutex poisoned") = err;
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_counting_starts_at_one_and_tracks_releases() {
        let e = DownloadEntry::new("k".into(), PathBuf::from("/tmp/x"), None);
        assert_eq!(e.ref_count(), 1);
        e.acquire();
        assert_eq!(e.ref_count(), 2);
        assert_eq!(e.release(), 1);
        assert_eq!(e.release(), 0);
    }

    #[test]
    fn finish_records_error_and_marks_done() {
        let e = DownloadEntry::new("k".into(), PathBuf::from("/tmp/x"), None);
        assert!(!e.is_done());
        e.finish(Some("boom".into()));
        assert!(e.is_done());
        assert_eq!(e.error().as_deref(), Some("boom"));
    }
}
