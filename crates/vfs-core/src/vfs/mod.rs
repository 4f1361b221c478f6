//! VFS contract (spec §6): the abstract filesystem interface every adapter
//! binds to, orchestrating the components in §4.1–§4.8.
//!
//! `vfs-core` supplies the contract (`Fs`/`Object`) and the reusable
//! components (`DirCache`, `Batcher`, `DownloadCache`, `AlbumIndex`,
//! `PathRouter`, chunked upload engine); a concrete adapter composes its own
//! `FsHandle` type from these, since the components are generic over
//! adapter-specific backend traits and a single crate-wide concrete struct
//! would have to erase those type parameters for no benefit (see
//! DESIGN.md).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tracing::warn;

use crate::download::{DownloadReader, SeekFrom};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct DirectoryEntry {
    pub name: String,
    pub mod_time: Option<DateTime<Utc>>,
    pub id: Option<String>,
    pub item_count: Option<u64>,
    pub size: Option<u64>,
}

/// Listing metadata for one remote file (spec §3 `ObjectHandle`, trimmed to
/// the fields a directory listing actually needs — the full `Object`
/// contract below carries the live back-reference).
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub remote: String,
    pub id: String,
    /// -1 for unknown-and-not-yet-fetched.
    pub size: i64,
    pub mod_time: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub hash: Option<String>,
    pub parent_id: Option<String>,
    pub has_metadata: bool,
    /// True for providers that never report size even with full metadata
    /// fetched — relaxes the `has_metadata ⇒ size ≥ 0` invariant below.
    pub provider_omits_size: bool,
}

impl ObjectMeta {
    /// Spec §3 invariant: `hasMetadata` set ⇒ `size ≥ 0` OR the provider is
    /// known to never supply one.
    pub fn check_invariant(&self) -> Result<()> {
        if self.has_metadata && self.size < 0 && !self.provider_omits_size {
            return Err(Error::Other(format!(
                "object {}: has_metadata set but size is unknown",
                self.remote
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum DirEntry {
    Directory(DirectoryEntry),
    Object(ObjectMeta),
}

/// Capability flags, filled once at `FsHandle` construction (spec §9: a
/// plain struct, not runtime trait-object downcasting).
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub read_mime_type: bool,
    pub can_have_empty_directories: bool,
    pub bucket_based: bool,
    pub slow_hash: bool,
    pub write_mime_type: bool,
    pub partial_uploads: bool,
    pub public_link: bool,
    pub purge: bool,
    pub about: bool,
    pub copy: bool,
    pub server_move: bool,
    pub dir_move: bool,
    pub dir_cache_flush: bool,
    pub shutdowner: bool,
    pub list_r: bool,
    pub change_notify: bool,
    pub ider: bool,
    pub user_infoer: bool,
    pub disconnecter: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// Metadata the caller supplies alongside a stream for `Put`/`Update` (spec
/// §6: "srcInfo").
#[derive(Debug, Clone, Default)]
pub struct PutSource {
    /// `None` for a streaming upload of unknown size (spec: "size may be
    /// -1").
    pub size: Option<u64>,
    pub mod_time: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AboutInfo {
    pub total: Option<u64>,
    pub used: Option<u64>,
    pub free: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryChangeKind {
    Object,
    Directory,
}

pub type ChangeNotifyCallback = Box<dyn Fn(&str, EntryChangeKind) + Send + Sync>;

/// A read/seek handle over an object's body. Implemented directly by
/// [`DownloadReader`] for adapters that route reads through the download
/// cache; adapters with direct Range support may implement it themselves.
#[async_trait]
pub trait ObjectReader: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
}

#[async_trait]
impl ObjectReader for DownloadReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        DownloadReader::read(self, buf).await
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        DownloadReader::seek(self, pos).await
    }
}

/// One remote file (spec §6 Object contract).
#[async_trait]
pub trait Object: Send + Sync {
    fn remote(&self) -> &str;
    fn id(&self) -> &str;
    fn size(&self) -> i64;
    fn mod_time(&self) -> Option<DateTime<Utc>>;
    fn mime_type(&self) -> Option<&str>;
    fn hash(&self, kind: &str) -> Option<String>;
    fn parent_id(&self) -> Option<&str>;
    fn storable(&self) -> bool {
        true
    }

    /// Adapters that cannot change modification time in place report
    /// `CantSetModTime` rather than silently ignoring the request.
    async fn set_mod_time(&self, _t: DateTime<Utc>) -> Result<()> {
        Err(Error::CantSetModTime)
    }

    async fn open(&self, opts: OpenOptions) -> Result<Box<dyn ObjectReader>>;

    async fn update(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        src: PutSource,
    ) -> Result<()>;

    async fn remove(&self) -> Result<()>;
}

/// The abstract filesystem contract (spec §6). Every capability beyond the
/// required core accessors is independently optional: the default body
/// returns the matching `Cant*`/`Unsupported` error, and `features()`
/// reports ahead of time which overrides actually apply.
#[async_trait]
pub trait Fs: Send + Sync {
    fn name(&self) -> &str;
    fn root(&self) -> &str;
    fn precision(&self) -> Duration;
    fn hashes(&self) -> &[&'static str];
    fn features(&self) -> &Features;

    fn string(&self) -> String {
        format!("{} at {}", self.name(), self.root())
    }

    async fn new_object(&self, remote: &str) -> Result<Box<dyn Object>>;
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>>;

    async fn list_r(
        &self,
        _dir: &str,
        _callback: &mut (dyn FnMut(DirEntry) + Send),
    ) -> Result<()> {
        Err(Error::Unsupported("ListR"))
    }

    async fn put(
        &self,
        _reader: Box<dyn AsyncRead + Send + Unpin>,
        _src: PutSource,
        remote: &str,
    ) -> Result<Box<dyn Object>> {
        Err(Error::CantUpload(remote.to_string()))
    }

    async fn put_stream(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        src: PutSource,
        remote: &str,
    ) -> Result<Box<dyn Object>> {
        if src.size.is_some() {
            self.put(reader, src, remote).await
        } else {
            Err(Error::CantStream)
        }
    }

    async fn put_unchecked(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        src: PutSource,
        remote: &str,
    ) -> Result<Box<dyn Object>> {
        self.put(reader, src, remote).await
    }

    async fn mkdir(&self, dir: &str) -> Result<()>;
    async fn rmdir(&self, dir: &str) -> Result<()>;

    async fn purge(&self, dir: &str) -> Result<()> {
        let _ = dir;
        Err(Error::Unsupported("Purge"))
    }

    async fn copy(&self, _src: &dyn Object, _remote: &str) -> Result<Box<dyn Object>> {
        Err(Error::CantCopy)
    }

    async fn r#move(&self, _src: &dyn Object, _remote: &str) -> Result<Box<dyn Object>> {
        Err(Error::CantMove)
    }

    async fn dir_move(&self, _src_remote: &str, _dst_remote: &str) -> Result<()> {
        Err(Error::CantDirMove)
    }

    async fn about(&self) -> Result<AboutInfo> {
        Err(Error::Unsupported("About"))
    }

    async fn public_link(&self, remote: &str, _expiry: Option<Duration>) -> Result<String> {
        Err(Error::ObjectNotFound(remote.to_string()))
    }

    async fn user_info(&self) -> Result<UserInfo> {
        Err(Error::Unsupported("UserInfo"))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Closes every owned resource, returning the first error encountered
    /// while still attempting to close the rest (spec §3 `[ADDED]`).
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn change_notify(&self, _callback: ChangeNotifyCallback, _poll_interval: Duration) {}
}

type ShutdownFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Runs every resource's shutdown future, attempting all of them even after
/// a failure, and returns the first error encountered (spec §3 `[ADDED]`
/// `FsHandle::shutdown` semantics).
pub async fn shutdown_all<'a>(resources: Vec<ShutdownFuture<'a>>) -> Result<()> {
    let mut first_err = None;
    for fut in resources {
        if let Err(e) = fut.await {
            warn!(error = %e, "vfs: error while closing a resource during shutdown");
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_invariant_rejects_unknown_size_with_metadata() {
        let meta = ObjectMeta {
            remote: "a.txt".into(),
            id: "1".into(),
            size: -1,
            mod_time: None,
            mime_type: None,
            hash: None,
            parent_id: None,
            has_metadata: true,
            provider_omits_size: false,
        };
        assert!(meta.check_invariant().is_err());
    }

    #[test]
    fn object_meta_invariant_allows_providers_that_omit_size() {
        let meta = ObjectMeta {
            provider_omits_size: true,
            ..ObjectMeta {
                remote: "a.txt".into(),
                id: "1".into(),
                size: -1,
                mod_time: None,
                mime_type: None,
                hash: None,
                parent_id: None,
                has_metadata: true,
                provider_omits_size: false,
            }
        };
        assert!(meta.check_invariant().is_ok());
    }

    #[tokio::test]
    async fn shutdown_all_runs_every_future_and_reports_first_error() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c1 = calls.clone();
        let c2 = calls.clone();
        let futs: Vec<ShutdownFuture> = vec![
            Box::pin(async move {
                c1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(Error::Other("first".into()))
            }),
            Box::pin(async move {
                c2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(Error::Other("second".into()))
            }),
        ];
        let result = shutdown_all(futs).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        match result {
            Err(Error::Other(msg)) => assert_eq!(msg, "first"),
            _ => panic!("expected the first error to surface"),
        }
    }
}
