use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use keyindex_ingest::PipelineConfig;

pub const DEFAULT_CACHE_DIR: &str = ".keyindex/cache";
pub const DEFAULT_STORE_FILE: &str = "keyindex.db";

/// What happens to the files an index already covered when its definition
/// comes back with a different version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBumpPolicy {
    /// Clear now, repopulate as files are touched again.
    #[default]
    Lazy,
    /// Clear now and re-run the definition over every known file.
    Backfill,
}

impl VersionBumpPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lazy" => Some(VersionBumpPolicy::Lazy),
            "backfill" | "eager" => Some(VersionBumpPolicy::Backfill),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub store_file_name: String,
    pub shared_index_paths: Vec<PathBuf>,
    pub extraction_parallelism: usize,
    pub traversal_batch_size: usize,
    pub skip_unchanged_files: bool,
    pub writer_queue_capacity: usize,
    pub writer_poll_interval_ms: u64,
    pub drain_timeout_ms: u64,
    pub flush_retry_budget: usize,
    pub version_bump_policy: VersionBumpPolicy,
    pub precompute_extensions: Vec<String>,
    pub progress_batch_interval: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            store_file_name: DEFAULT_STORE_FILE.to_string(),
            shared_index_paths: Vec::new(),
            extraction_parallelism: cpus.saturating_sub(1).max(1),
            traversal_batch_size: 10_000,
            skip_unchanged_files: true,
            writer_queue_capacity: 10,
            writer_poll_interval_ms: 100,
            drain_timeout_ms: 30_000,
            flush_retry_budget: 10_000,
            version_bump_policy: VersionBumpPolicy::Lazy,
            precompute_extensions: vec!["class".to_string()],
            progress_batch_interval: 128,
        }
    }
}

impl IndexingConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overrides fields from `KEYINDEX_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("KEYINDEX_STORE_FILE") {
            self.store_file_name = v.trim().to_string();
        }
        if let Some(v) = lookup("KEYINDEX_SHARED_INDEX_PATHS") {
            self.shared_index_paths = v
                .split([';', ','])
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(v) = lookup("KEYINDEX_EXTRACTION_PARALLELISM") {
            self.extraction_parallelism = parse_number("KEYINDEX_EXTRACTION_PARALLELISM", &v)?;
        }
        if let Some(v) = lookup("KEYINDEX_TRAVERSAL_BATCH_SIZE") {
            self.traversal_batch_size = parse_number("KEYINDEX_TRAVERSAL_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("KEYINDEX_SKIP_UNCHANGED") {
            self.skip_unchanged_files = parse_bool("KEYINDEX_SKIP_UNCHANGED", &v)?;
        }
        if let Some(v) = lookup("KEYINDEX_WRITER_QUEUE_CAPACITY") {
            self.writer_queue_capacity = parse_number("KEYINDEX_WRITER_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("KEYINDEX_DRAIN_TIMEOUT_MS") {
            self.drain_timeout_ms = parse_number("KEYINDEX_DRAIN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KEYINDEX_VERSION_BUMP_POLICY") {
            self.version_bump_policy = VersionBumpPolicy::parse(&v).ok_or_else(|| {
                IndexError::Config(format!("KEYINDEX_VERSION_BUMP_POLICY: unknown policy '{v}'"))
            })?;
        }
        Ok(())
    }

    pub(crate) fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.writer_queue_capacity.max(1),
            poll_interval_ms: self.writer_poll_interval_ms.max(1),
            drain_timeout_ms: self.drain_timeout_ms,
            thread_name: "keyindex-writer".to_string(),
        }
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.traversal_batch_size.max(1)
    }

    pub(crate) fn precomputes(&self, extension: Option<&str>) -> bool {
        extension.is_some_and(|ext| {
            self.precompute_extensions
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
    }
}

/// Cache directory used when the embedder does not pick one. Honors
/// `KEYINDEX_CACHE_DIR`.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(env_dir) = std::env::var("KEYINDEX_CACHE_DIR") {
        return PathBuf::from(env_dir);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(DEFAULT_CACHE_DIR)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| IndexError::Config(format!("{key}: '{raw}' is not a number")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(IndexError::Config(format!("{key}: '{raw}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KEYINDEX_SHARED_INDEX_PATHS", "/a.db; /b.db,,"),
            ("KEYINDEX_SKIP_UNCHANGED", "off"),
            ("KEYINDEX_TRAVERSAL_BATCH_SIZE", "64"),
            ("KEYINDEX_VERSION_BUMP_POLICY", "Backfill"),
        ]);
        let mut config = IndexingConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.shared_index_paths,
            vec![PathBuf::from("/a.db"), PathBuf::from("/b.db")]
        );
        assert!(!config.skip_unchanged_files);
        assert_eq!(config.traversal_batch_size, 64);
        assert_eq!(config.version_bump_policy, VersionBumpPolicy::Backfill);
    }

    #[test]
    fn test_invalid_env_is_reported() {
        let mut config = IndexingConfig::default();
        let err = config
            .apply_env_from(|key| (key == "KEYINDEX_WRITER_QUEUE_CAPACITY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn test_json_uses_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexing.json");
        std::fs::write(&path, r#"{ "version_bump_policy": "backfill", "writer_queue_capacity": 3 }"#)
            .unwrap();

        let config = IndexingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.version_bump_policy, VersionBumpPolicy::Backfill);
        assert_eq!(config.writer_queue_capacity, 3);
        assert_eq!(config.store_file_name, DEFAULT_STORE_FILE);
        assert!(config.precomputes(Some("CLASS")));
        assert!(!config.precomputes(None));
    }
}
