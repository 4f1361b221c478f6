//! Chunked upload engine (spec §4.6): prepare, resume, parallel part
//! writers, commit, abort.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash::hash_hex;
use crate::pacer::retry_delay;

/// Computes the deterministic fingerprint an adapter uses to look up
/// already-uploaded parts for a resumed upload (spec §4.6, §3 `UploadSession`
/// invariant: deterministic in parentID/leaf/size/userID).
pub fn fingerprint(parent_id: &str, leaf: &str, total_size: u64, user_id: &str) -> String {
    let joined = format!("{parent_id}\0{leaf}\0{total_size}\0{user_id}");
    hash_hex(joined.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub part_number: u32,
    pub provider_part_id: String,
    pub size: u64,
    pub salt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub fingerprint: String,
    pub parent_id: String,
    pub leaf: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub channel_id: String,
    pub encrypt: bool,
}

/// Whether part object names are a deterministic function of the leaf name
/// and part number, or randomized to dodge cross-request collisions (spec
/// §4.6: provider-configurable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartNaming {
    Deterministic,
    Randomized,
}

/// What an adapter's `prepare` call reports back to the engine.
pub struct PreparedSession {
    pub chunk_size: u64,
    pub channel_id: String,
    pub encrypt: bool,
    pub naming: PartNaming,
    /// Parts the server already has for this fingerprint, keyed by the
    /// 1-based provider part number (spec §4.6: resumed uploads skip these).
    pub existing_chunks: HashMap<u32, PartRecord>,
}

/// Reads chunk bytes for one part, rewindable so a retry can re-read from
/// the start (spec §4.6: "on retryable failure, seek the reader to 0").
#[async_trait]
pub trait ChunkSource: Send {
    async fn read_up_to(&mut self, limit: u64) -> Result<Bytes>;
    async fn seek_to_start(&mut self) -> Result<()>;
}

/// A `Vec<u8>`-backed [`ChunkSource`], useful for adapters and tests that
/// already hold the chunk in memory.
pub struct InMemoryChunkSource {
    data: Bytes,
    pos: usize,
}

impl InMemoryChunkSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), pos: 0 }
    }
}

#[async_trait]
impl ChunkSource for InMemoryChunkSource {
    async fn read_up_to(&mut self, limit: u64) -> Result<Bytes> {
        let end = (self.pos + limit as usize).min(self.data.len());
        let slice = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(slice)
    }

    async fn seek_to_start(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

/// Adapter hook: the engine drives preparation, part placement, commit, and
/// session cleanup entirely through this trait.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn prepare(
        &self,
        parent_id: &str,
        leaf: &str,
        total_size: u64,
        fingerprint: &str,
    ) -> Result<PreparedSession>;

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        part_name: &str,
        data: Bytes,
    ) -> Result<PartRecord>;

    async fn commit_file(
        &self,
        session: &UploadSession,
        parts: &[PartRecord],
        mod_time: DateTime<Utc>,
        mime_type: Option<&str>,
    ) -> Result<()>;

    /// Deletes the upload session on the server. Called on both `Close`
    /// (after a successful commit) and `Abort`; never touches the final
    /// object (spec §4.6).
    async fn delete_session(&self, session: &UploadSession) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: std::time::Duration,
    pub max_sleep: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: std::time::Duration::from_millis(200),
            max_sleep: std::time::Duration::from_secs(30),
        }
    }
}

/// Returned by [`open_chunk_writer`]: the caller's recommended fan-out for
/// concurrent `write_chunk` calls (spec §4.6: "up to the returned
/// concurrency").
pub struct OpenedUpload<B: UploadBackend> {
    pub writer: ChunkWriter<B>,
    pub concurrency: usize,
}

pub async fn open_chunk_writer<B: UploadBackend>(
    backend: std::sync::Arc<B>,
    retry_policy: RetryPolicy,
    concurrency: usize,
    parent_id: &str,
    leaf: &str,
    total_size: u64,
    user_id: &str,
) -> Result<OpenedUpload<B>> {
    let fp = fingerprint(parent_id, leaf, total_size, user_id);
    let prepared = backend.prepare(parent_id, leaf, total_size, &fp).await?;
    let total_chunks = if total_size == 0 {
        1
    } else {
        total_size.div_ceil(prepared.chunk_size) as u32
    };
    let session = UploadSession {
        fingerprint: fp,
        parent_id: parent_id.to_string(),
        leaf: leaf.to_string(),
        total_size,
        chunk_size: prepared.chunk_size,
        total_chunks,
        channel_id: prepared.channel_id,
        encrypt: prepared.encrypt,
    };
    let writer = ChunkWriter {
        backend,
        session,
        naming: prepared.naming,
        existing_chunks: prepared.existing_chunks,
        committed: Mutex::new(Vec::new()),
        retry_policy,
    };
    Ok(OpenedUpload { writer, concurrency: concurrency.max(1) })
}

/// One upload in progress. `write_chunk` may be called concurrently for
/// distinct part numbers (spec §4.6, §5: "WriteChunk(n) calls for different
/// n commute").
pub struct ChunkWriter<B: UploadBackend> {
    backend: std::sync::Arc<B>,
    session: UploadSession,
    naming: PartNaming,
    existing_chunks: HashMap<u32, PartRecord>,
    committed: Mutex<Vec<PartRecord>>,
    retry_policy: RetryPolicy,
}

impl<B: UploadBackend> ChunkWriter<B> {
    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    fn part_name(&self, provider_part_number: u32) -> String {
        match self.naming {
            PartNaming::Randomized => {
                format!("{}.part.{}", self.session.leaf, uuid::Uuid::new_v4())
            }
            PartNaming::Deterministic if self.session.total_chunks <= 1 => self.session.leaf.clone(),
            PartNaming::Deterministic => {
                format!("{}.part.{:03}", self.session.leaf, provider_part_number)
            }
        }
    }

    /// Writes one part. `part_number` is the caller's 0-based index; the
    /// engine stores and negotiates with the server using the 1-based
    /// provider part number (spec §4.6: "existingChunks contains
    /// partNumber+1").
    pub async fn write_chunk<S: ChunkSource>(&self, part_number: i64, source: &mut S) -> Result<u64> {
        if part_number < 0 {
            return Err(Error::InvalidChunkNumber(part_number));
        }
        let provider_part_number = part_number as u32 + 1;

        if let Some(existing) = self.existing_chunks.get(&provider_part_number).cloned() {
            source.read_up_to(existing.size).await?;
            self.committed.lock().await.push(existing.clone());
            debug!(provider_part_number, "chunk writer: reusing already-uploaded part");
            return Ok(existing.size);
        }

        let part_name = self.part_name(provider_part_number);
        let (record, size) = self.upload_with_retry(provider_part_number, &part_name, source).await?;
        self.committed.lock().await.push(record);
        Ok(size)
    }

    async fn upload_with_retry<S: ChunkSource>(
        &self,
        provider_part_number: u32,
        part_name: &str,
        source: &mut S,
    ) -> Result<(PartRecord, u64)> {
        let mut attempt = 0u32;
        loop {
            source.seek_to_start().await?;
            let bytes = source.read_up_to(self.session.chunk_size).await?;
            let size = bytes.len() as u64;
            match self
                .backend
                .upload_part(&self.session, provider_part_number, part_name, bytes)
                .await
            {
                Ok(record) => return Ok((record, size)),
                Err(e) if e.is_retryable() && attempt < self.retry_policy.max_retries => {
                    let delay = retry_delay(attempt, self.retry_policy.backoff_base).min(self.retry_policy.max_sleep);
                    warn!(provider_part_number, attempt, ?delay, "chunk writer: retrying part upload");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Finalizes the upload: requires every part committed, assembles them
    /// in order, and deletes the session. Any failure here is fatal — no
    /// partial object is left visible (spec §4.6).
    pub async fn close(&self, mod_time: DateTime<Utc>, mime_type: Option<&str>) -> Result<()> {
        let mut committed = self.committed.lock().await.clone();
        if committed.len() as u32 != self.session.total_chunks {
            return Err(Error::Other(format!(
                "chunk writer: {} of {} parts committed, refusing to finalize",
                committed.len(),
                self.session.total_chunks
            )));
        }
        committed.sort_by_key(|p| p.part_number);
        for (i, p) in committed.iter().enumerate() {
            if p.part_number != i as u32 + 1 {
                return Err(Error::Other(format!(
                    "chunk writer: gap in committed parts before number {}",
                    i + 1
                )));
            }
        }
        self.backend
            .commit_file(&self.session, &committed, mod_time, mime_type)
            .await?;
        self.backend.delete_session(&self.session).await
    }

    /// Discards the session without touching any already-created final
    /// object (spec §4.6).
    pub async fn abort(&self) -> Result<()> {
        self.backend.delete_session(&self.session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyBackend {
        fail_first_n_attempts: AtomicU32,
        committed: std::sync::Mutex<Vec<(Vec<PartRecord>, String)>>,
        sessions_deleted: AtomicU32,
        with_existing_part: bool,
        upload_part_calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(fail_first_n_attempts: u32) -> Self {
            Self {
                fail_first_n_attempts: AtomicU32::new(fail_first_n_attempts),
                committed: std::sync::Mutex::new(Vec::new()),
                sessions_deleted: AtomicU32::new(0),
                with_existing_part: false,
                upload_part_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl UploadBackend for FlakyBackend {
        async fn prepare(&self, _parent_id: &str, _leaf: &str, _total_size: u64, _fp: &str) -> Result<PreparedSession> {
            Ok(PreparedSession {
                chunk_size: 8,
                channel_id: "chan".into(),
                encrypt: false,
                naming: PartNaming::Deterministic,
                existing_chunks: {
                    let mut m = HashMap::new();
                    if self.with_existing_part {
                        m.insert(1, PartRecord { part_number: 1, provider_part_id: "already-there".into(), size: 8, salt: None });
                    }
                    m
                },
            })
        }

        async fn upload_part(&self, _s: &UploadSession, part_number: u32, part_name: &str, data: Bytes) -> Result<PartRecord> {
            self.upload_part_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_n_attempts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                return Err(Error::Transient("simulated".into()));
            }
            Ok(PartRecord { part_number, provider_part_id: part_name.to_string(), size: data.len() as u64, salt: None })
        }

        async fn commit_file(&self, _s: &UploadSession, parts: &[PartRecord], _mod_time: DateTime<Utc>, mime: Option<&str>) -> Result<()> {
            self.committed.lock().unwrap().push((parts.to_vec(), mime.unwrap_or("").to_string()));
            Ok(())
        }

        async fn delete_session(&self, _s: &UploadSession) -> Result<()> {
            self.sessions_deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn negative_part_number_is_rejected() {
        let backend = Arc::new(FlakyBackend::new(0));
        let opened = open_chunk_writer(backend, RetryPolicy::default(), 4, "p", "leaf", 16, "u")
            .await
            .unwrap();
        let mut src = InMemoryChunkSource::new(&b"12345678"[..]);
        let err = opened.writer.write_chunk(-1, &mut src).await.unwrap_err();
        assert!(matches!(err, Error::InvalidChunkNumber(-1)));
    }

    #[tokio::test]
    async fn retries_then_succeeds_and_commits_in_order() {
        let backend = Arc::new(FlakyBackend::new(2));
        let opened = open_chunk_writer(backend.clone(), RetryPolicy { backoff_base: std::time::Duration::from_millis(1), max_sleep: std::time::Duration::from_millis(5), ..Default::default() }, 2, "p", "leaf", 16, "u")
            .await
            .unwrap();
        let writer = opened.writer;

        let mut src1 = InMemoryChunkSource::new(&b"12345678"[..]);
        writer.write_chunk(1, &mut src1).await.unwrap();
        let mut src0 = InMemoryChunkSource::new(&b"abcdefgh"[..]);
        writer.write_chunk(0, &mut src0).await.unwrap();

        writer.close(Utc::now(), Some("text/plain")).await.unwrap();
        let committed = backend.committed.lock().unwrap();
        let (parts, mime) = &committed[0];
        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(mime, "text/plain");
        assert_eq!(backend.sessions_deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resumed_upload_skips_existing_part() {
        let mut backend = FlakyBackend::new(0);
        backend.with_existing_part = true;
        let backend = Arc::new(backend);
        let opened = open_chunk_writer(backend.clone(), RetryPolicy::default(), 1, "p", "leaf", 8, "u")
            .await
            .unwrap();

        // Wrong content on purpose: a reused part must never be re-uploaded,
        // only consumed to advance accounting.
        let mut src = InMemoryChunkSource::new(&b"wrongwrong"[..]);
        let written = opened.writer.write_chunk(0, &mut src).await.unwrap();

        assert_eq!(written, 8);
        assert_eq!(backend.upload_part_calls.load(Ordering::SeqCst), 0);
        opened.writer.close(Utc::now(), None).await.unwrap();
        let committed = backend.committed.lock().unwrap();
        assert_eq!(committed[0].0[0].provider_part_id, "already-there");
    }

    #[tokio::test]
    async fn close_before_all_parts_committed_is_rejected() {
        let backend = Arc::new(FlakyBackend::new(0));
        let opened = open_chunk_writer(backend, RetryPolicy::default(), 1, "p", "leaf", 16, "u")
            .await
            .unwrap();
        assert!(opened.writer.close(Utc::now(), None).await.is_err());
    }

    #[tokio::test]
    async fn abort_deletes_session_without_committing() {
        let backend = Arc::new(FlakyBackend::new(0));
        let opened = open_chunk_writer(backend.clone(), RetryPolicy::default(), 1, "p", "leaf", 16, "u")
            .await
            .unwrap();
        opened.writer.abort().await.unwrap();
        assert_eq!(backend.sessions_deleted.load(Ordering::SeqCst), 1);
        assert!(backend.committed.lock().unwrap().is_empty());
    }
}
