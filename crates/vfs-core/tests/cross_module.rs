//! Cross-module scenarios from spec §8 that don't belong beside a single
//! component's unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;

use vfs_core::album::{Album, AlbumIndex};
use vfs_core::download::{DownloadCache, DownloadCacheConfig, MediaSource};
use vfs_core::error::Result;
use vfs_core::router::{albums_to_entries, EntryLister};
use vfs_core::vfs::{DirEntry, ObjectMeta, ObjectReader};

struct StaticSource(Vec<u8>);

#[async_trait]
impl MediaSource for StaticSource {
    async fn open(&self, _media_key: &str) -> Result<vfs_core::download::BoxByteStream> {
        let chunk = Bytes::from(self.0.clone());
        Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
    }
}

/// A download-cache-backed read, routed through the `vfs::ObjectReader`
/// trait object the way an adapter's `Object::open` would return it.
#[tokio::test]
async fn download_cache_reader_satisfies_object_reader_contract() {
    let dir = std::env::temp_dir().join(format!("vfs-core-xmod-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let cache = DownloadCache::new(
        StaticSource(b"hello cross-module world".to_vec()),
        DownloadCacheConfig { temp_dir: dir.clone(), ..Default::default() },
    );

    let reader = cache.open_for_read("media-1", Some(25)).await.unwrap();
    let mut boxed: Box<dyn ObjectReader> = Box::new(reader);

    let mut buf = vec![0u8; 5];
    let n = boxed.read(&mut buf).await.unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"hello");

    cache.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

/// One album with a nested sub-album, listed through the path router's
/// `albums_to_entries`, then checked against the object-listing invariant
/// from spec §3 (`hasMetadata` ⇒ known size).
struct OneFileLister;

#[async_trait]
impl EntryLister for OneFileLister {
    async fn list(&self, captures: &[Option<String>], _prefix: &str) -> Result<Vec<DirEntry>> {
        let album_id = captures.first().cloned().flatten().unwrap_or_default();
        Ok(vec![DirEntry::Object(ObjectMeta {
            remote: format!("{album_id}/photo.jpg"),
            id: "obj-1".into(),
            size: 2048,
            mod_time: None,
            mime_type: Some("image/jpeg".into()),
            hash: None,
            parent_id: Some(album_id),
            has_metadata: true,
            provider_omits_size: false,
        })])
    }
}

#[tokio::test]
async fn album_tree_and_router_compose_into_one_listing() {
    // Hierarchy is derived from `raw_title` alone (spec §4.8): "Trips/Japan"
    // reads as leaf "Japan" under parent "Trips", with "" as the root.
    let mut index = AlbumIndex::new();
    index.add(Album { id: "a1".into(), raw_title: "Trips".into() });
    index.add(Album { id: "a2".into(), raw_title: "Trips/Japan".into() });

    let top = albums_to_entries(&index, "", &OneFileLister).await.unwrap();
    // only the subdirectory "Trips" — no album is titled "" itself
    assert_eq!(top.len(), 1);

    let nested = albums_to_entries(&index, "Trips", &OneFileLister).await.unwrap();
    let mut saw_subdir = false;
    let mut saw_object = false;
    for entry in &nested {
        match entry {
            DirEntry::Directory(d) => {
                assert_eq!(d.name, "Japan");
                saw_subdir = true;
            }
            DirEntry::Object(o) => {
                o.check_invariant().unwrap();
                saw_object = true;
            }
        }
    }
    assert!(saw_subdir && saw_object);
}

/// Adapters may carry extra provider-specific config keys alongside the
/// recognized set; the core should never reject them (spec §6).
#[test]
fn config_map_passes_through_unrecognized_keys() {
    use vfs_core::config::ConfigMap;

    let mut raw = HashMap::new();
    raw.insert("chunk_size".to_string(), "1048576".to_string());
    raw.insert("teldrive_channel_hint".to_string(), "42".to_string());
    let cfg = ConfigMap::new(raw);

    assert_eq!(cfg.get_u64("chunk_size").unwrap(), Some(1048576));
    assert_eq!(cfg.get_str("teldrive_channel_hint"), Some("42"));
    assert!(!ConfigMap::is_recognized("teldrive_channel_hint"));
}
