//! Configuration map contract (spec §6).
//!
//! The core only enforces *shape* (a recognized option parses as its
//! declared type); it never validates values — that's each adapter's job.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// The option names the core recognizes. Adapters may carry additional,
/// provider-specific keys; those pass through `ConfigMap` untouched.
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    "access_token",
    "api_host",
    "upload_host",
    "chunk_size",
    "page_size",
    "upload_concurrency",
    "random_chunk_name",
    "channel_id",
    "encrypt_files",
    "root_folder_id",
    "encoding",
    "start_year",
    "include_archived",
    "read_only",
    "read_size",
    "batch_mode",
    "batch_size",
    "batch_timeout",
];

#[derive(Debug, Clone, Default)]
pub struct ConfigMap(HashMap<String, String>);

impl ConfigMap {
    pub fn new(raw: HashMap<String, String>) -> Self {
        Self(raw)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.0
            .get(key)
            .map(|v| {
                v.parse::<bool>()
                    .map_err(|_| Error::Other(format!("option {key} is not a bool: {v}")))
            })
            .transpose()
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.0
            .get(key)
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| Error::Other(format!("option {key} is not a u64: {v}")))
            })
            .transpose()
    }

    pub fn get_duration_secs(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.get_u64(key)?.map(Duration::from_secs))
    }

    pub fn is_recognized(key: &str) -> bool {
        RECOGNIZED_OPTIONS.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_values() {
        let mut raw = HashMap::new();
        raw.insert("chunk_size".to_string(), "4194304".to_string());
        raw.insert("read_only".to_string(), "true".to_string());
        let cfg = ConfigMap::new(raw);
        assert_eq!(cfg.get_u64("chunk_size").unwrap(), Some(4194304));
        assert_eq!(cfg.get_bool("read_only").unwrap(), Some(true));
        assert_eq!(cfg.get_str("missing"), None);
    }

    #[test]
    fn rejects_wrong_shape() {
        let mut raw = HashMap::new();
        raw.insert("chunk_size".to_string(), "not-a-number".to_string());
        let cfg = ConfigMap::new(raw);
        assert!(cfg.get_u64("chunk_size").is_err());
    }

    #[test]
    fn recognized_options_cover_spec() {
        assert!(ConfigMap::is_recognized("batch_timeout"));
        assert!(!ConfigMap::is_recognized("totally_unknown_option"));
    }
}
