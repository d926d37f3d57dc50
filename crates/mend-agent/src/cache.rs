//! Response cache keyed by the exact (prompt, temperature) pair
//!
//! The cache lives behind a mutex so the background reflection task and the
//! decision path can share one client. Entries can be saved to a JSON file
//! and reloaded on the next run.

use mend_core::{MendError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Exact-match cache key
///
/// Temperature is stored by bit pattern so `0.7` and `0.70000001` never
/// collide and the key stays `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub prompt: String,
    temperature_bits: u32,
}

impl CacheKey {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature_bits: temperature.to_bits(),
        }
    }

    pub fn temperature(&self) -> f32 {
        f32::from_bits(self.temperature_bits)
    }
}

/// On-disk entry format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    prompt: String,
    temperature: f32,
    response: String,
}

/// Thread-safe generation response cache
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, String>>,
    path: Option<PathBuf>,
}

impl ResponseCache {
    /// In-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache backed by `path`, pre-populated from it when the file exists
    ///
    /// An unreadable or corrupt file yields an empty cache; the next
    /// successful save overwrites it.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = HashMap::new();

        match read_entries(&path).await {
            Ok(loaded) => {
                for entry in loaded {
                    entries.insert(CacheKey::new(entry.prompt, entry.temperature), entry.response);
                }
                info!("Loaded {} cached responses from {:?}", entries.len(), path);
            }
            Err(e) => debug!("Starting with empty generation cache ({})", e),
        }

        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, prompt: &str, temperature: f32) -> Option<String> {
        self.lock().get(&CacheKey::new(prompt, temperature)).cloned()
    }

    pub fn insert(&self, prompt: &str, temperature: f32, response: impl Into<String>) {
        self.lock()
            .insert(CacheKey::new(prompt, temperature), response.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write all entries to the backing file (no-op for in-memory caches)
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        // Snapshot under the lock, write without it
        let snapshot: Vec<CacheEntry> = self
            .lock()
            .iter()
            .map(|(key, response)| CacheEntry {
                prompt: key.prompt.clone(),
                temperature: key.temperature(),
                response: response.clone(),
            })
            .collect();

        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .map_err(|e| MendError::Persistence(format!("Cache writer stopped: {}", e)))??;

        debug!("Persisted {} cached responses to {:?}", snapshot.len(), path);
        Ok(())
    }
}

/// Write through a uniquely named temp file in the same directory, then rename
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| MendError::Io(e.error))?;
    Ok(())
}

async fn read_entries(path: &Path) -> Result<Vec<CacheEntry>> {
    let content = tokio::fs::read(path).await?;
    serde_json::from_slice(&content).map_err(MendError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exact_match_only() {
        let cache = ResponseCache::new();
        cache.insert("prompt", 0.7, "answer");

        assert_eq!(cache.get("prompt", 0.7).as_deref(), Some("answer"));
        assert!(cache.get("prompt", 0.0).is_none());
        assert!(cache.get("prompt ", 0.7).is_none());
    }

    #[test]
    fn test_cache_key_temperature_round_trip() {
        let key = CacheKey::new("p", 0.25);
        assert_eq!(key.temperature(), 0.25);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/generation_cache.json");

        let cache = ResponseCache::load(&path).await;
        assert!(cache.is_empty());
        cache.insert("Is this incremental?", 0.0, "INCREMENTAL");
        cache.insert("Suggest a patch", 0.7, "Use insertion sort");
        cache.persist().await.unwrap();

        let reloaded = ResponseCache::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("Is this incremental?", 0.0).as_deref(),
            Some("INCREMENTAL")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_leave_valid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("generation_cache.json");
        let cache = std::sync::Arc::new(ResponseCache::load(&path).await);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let cache = std::sync::Arc::clone(&cache);
            tasks.spawn(async move {
                cache.insert(&format!("prompt {}", i), 0.7, "answer");
                cache.persist().await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
        cache.persist().await.unwrap();

        assert_eq!(ResponseCache::load(&path).await.len(), 8);
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("generation_cache.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let cache = ResponseCache::load(&path).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_persist_is_noop() {
        let cache = ResponseCache::new();
        cache.insert("a", 1.0, "b");
        cache.persist().await.unwrap();
        assert!(cache.path().is_none());
    }
}
