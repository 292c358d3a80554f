//! Durable read-through cache for generative text answers.
//!
//! One `<key>.json` file per entry, mirrored in memory. Entries are never
//! evicted; a restart reloads the whole directory.

use dashmap::DashMap;
use kgraph_core::{KgError, KgResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const RELATED_PREFIX: &str = "concept_";
const RELATIONSHIP_PREFIX: &str = "rel_";
const PAIR_SEPARATOR: char = '|';

/// Replace every character outside `[A-Za-z0-9_-.]` with `_`.
///
/// Distinct inputs may collide; the cache accepts that.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct CacheKey;

impl CacheKey {
    pub fn related(concept: &str) -> String {
        format!("{}{}", RELATED_PREFIX, sanitize_key(concept))
    }

    /// Ordered: (a, b) and (b, a) are different entries.
    pub fn relationship(source: &str, target: &str) -> String {
        let raw = format!("{}{}{}", source, PAIR_SEPARATOR, target);
        format!("{}{}", RELATIONSHIP_PREFIX, sanitize_key(&raw))
    }
}

pub struct ResponseCache {
    dir: Option<PathBuf>,
    entries: DashMap<String, Value>,
    /// Distinguishes temp files of concurrent writers to the same key.
    writes: AtomicU64,
}

impl ResponseCache {
    /// Open (creating if needed) a cache directory and load every entry in it.
    pub async fn open(dir: impl AsRef<Path>) -> KgResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            KgError::config(format!("cannot create cache dir {}", dir.display())).with_source(e)
        })?;

        let entries = DashMap::new();
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| KgError::config("cannot read cache dir").with_source(e))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| KgError::config("cannot list cache dir").with_source(e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => {
                        entries.insert(key.to_string(), value);
                    }
                    Err(e) => warn!(path = %path.display(), "skipping unreadable cache entry: {}", e),
                },
                Err(e) => warn!(path = %path.display(), "failed to read cache entry: {}", e),
            }
        }

        info!(dir = %dir.display(), entries = entries.len(), "response cache loaded");
        Ok(Self {
            dir: Some(dir),
            entries,
            writes: AtomicU64::new(0),
        })
    }

    /// Memory-only cache, lost on drop.
    pub fn ephemeral() -> Self {
        Self {
            dir: None,
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let hit = self.entries.get(key).map(|entry| entry.value().clone());
        debug!(key, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Write the file (if durable), then publish to the in-memory mirror.
    pub async fn put(&self, key: &str, payload: Value) -> KgResult<()> {
        if let Some(dir) = &self.dir {
            let bytes = serde_json::to_vec_pretty(&payload).map_err(|e| {
                KgError::database("cannot encode cache entry")
                    .with_retryable(false)
                    .with_source(e)
            })?;
            let path = dir.join(format!("{}.json", key));
            let writer = self.writes.fetch_add(1, Ordering::Relaxed);
            let tmp = dir.join(format!(
                ".{}.json.{}-{}.tmp",
                key,
                std::process::id(),
                writer
            ));

            tokio::fs::write(&tmp, &bytes)
                .await
                .map_err(|e| KgError::database("cannot write cache entry").with_source(e))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| KgError::database("cannot publish cache entry").with_source(e))?;
        }

        self.entries.insert(key.to_string(), payload);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("Machine Learning"), "Machine_Learning");
        assert_eq!(sanitize_key("C++/CLI v2.0"), "C___CLI_v2.0");
        assert_eq!(sanitize_key("naïve-bayes"), "na_ve-bayes");
        assert_eq!(
            CacheKey::relationship("Set Theory", "Logic"),
            "rel_Set_Theory_Logic"
        );
        assert_ne!(
            CacheKey::relationship("A", "B"),
            CacheKey::relationship("B", "A")
        );
        assert_eq!(CacheKey::related("Graph"), "concept_Graph");
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let key = CacheKey::related("Graph Theory");

        {
            let cache = ResponseCache::open(dir.path()).await.unwrap();
            assert!(cache.is_empty());
            cache
                .put(&key, json!([{"name": "Vertex", "relation": "HAS_PART"}]))
                .await
                .unwrap();
        }

        assert!(dir.path().join(format!("{}.json", key)).exists());
        let cache = ResponseCache::open(dir.path()).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap()[0]["name"], "Vertex");
    }

    #[tokio::test]
    async fn test_corrupt_files_are_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("concept_Broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(dir.path().join("concept_Fine.json"), b"[]").unwrap();

        let cache = ResponseCache::open(dir.path()).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("concept_Broken").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_to_one_key_all_succeed() {
        let dir = tempdir().unwrap();
        let cache = std::sync::Arc::new(ResponseCache::open(dir.path()).await.unwrap());
        let key = CacheKey::relationship("Magma", "Lava");

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.put(&key, json!({ "writer": i })).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let reopened = ResponseCache::open(dir.path()).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get(&key).unwrap()["writer"].is_u64());
    }

    #[tokio::test]
    async fn test_ephemeral_cache_writes_nothing() {
        let cache = ResponseCache::ephemeral();
        cache.put("rel_a_b", Value::Null).await.unwrap();
        assert_eq!(cache.get("rel_a_b"), Some(Value::Null));
        assert!(cache.dir().is_none());
    }
}
