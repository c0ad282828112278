//! Content-addressed artifact cache for incremental rebuilds.
//!
//! Keys are hashes of everything that determines a stage's output: the
//! collection's configuration, the page, the stage and the content of every
//! input it reads. The cache is advisory: a miss is never an error, and a
//! build with the cache disabled produces the same results.
//!
//! On disk:
//!
//! ```text
//! <root>/ENGINE             hex fingerprint of the engine that wrote the store
//! <root>/objects/ab/cd...   one file per entry, named by key
//! ```
//!
//! A store written by a different engine is wiped before anything is read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use super::model::PageId;
use super::stage::Stage;

/// Bumped whenever the entry layout or key composition changes.
pub const CACHE_FORMAT: u32 = 1;

const FINGERPRINT_FILE: &str = "ENGINE";
const OBJECTS_DIR: &str = "objects";

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("failed to prepare cache directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read cache entry {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write cache entry {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Fingerprint of this engine build. Entries written under any other value
/// are never trusted.
pub fn engine_fingerprint() -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, env!("CARGO_PKG_NAME").as_bytes());
    update_field(&mut hasher, env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update(CACHE_FORMAT.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Length-prefix each field so adjacent fields can't run into each other.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

// =============================================================================
// Keys
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive a key from the collection's config fingerprint, the page, the
    /// stage and the content of every dependency.
    ///
    /// Dependency order doesn't matter: their hashes are sorted first.
    pub fn new<I, D>(config_fingerprint: &str, page: &PageId, stage: Stage, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut dependency_hashes: Vec<[u8; 32]> = dependencies
            .into_iter()
            .map(|content| Sha256::digest(content.as_ref()).into())
            .collect();
        dependency_hashes.sort_unstable();

        let mut hasher = Sha256::new();
        update_field(&mut hasher, config_fingerprint.as_bytes());
        update_field(&mut hasher, page.as_str().as_bytes());
        update_field(&mut hasher, stage.as_str().as_bytes());
        hasher.update((dependency_hashes.len() as u64).to_le_bytes());
        for hash in &dependency_hashes {
            hasher.update(hash);
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Counters for the build summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

#[derive(Debug, Default)]
pub struct Cache {
    /// `None` when caching is disabled
    root: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl Cache {
    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open (or create) the store at `root` for the running engine.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with_fingerprint(root, &engine_fingerprint()).await
    }

    /// Open the store at `root`, wiping it first unless it was written by an
    /// engine with the same `fingerprint`.
    pub async fn open_with_fingerprint(
        root: impl Into<PathBuf>,
        fingerprint: &str,
    ) -> Result<Self, CacheError> {
        let root = root.into();
        let fingerprint_path = root.join(FINGERPRINT_FILE);
        let objects = root.join(OBJECTS_DIR);

        let stored = match tokio::fs::read_to_string(&fingerprint_path).await {
            Ok(stored) => Some(stored.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(source) => {
                return Err(CacheError::Prepare {
                    path: fingerprint_path,
                    source,
                });
            }
        };

        if stored.as_deref() != Some(fingerprint) {
            if let Some(stored) = &stored {
                tracing::info!(
                    cache = %root.display(),
                    stored = %stored,
                    "discarding cache written by a different engine"
                );
            }
            match tokio::fs::remove_dir_all(&objects).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CacheError::Prepare {
                        path: objects,
                        source,
                    });
                }
            }
            tokio::fs::create_dir_all(&objects)
                .await
                .map_err(|source| CacheError::Prepare {
                    path: objects.clone(),
                    source,
                })?;
            tokio::fs::write(&fingerprint_path, fingerprint)
                .await
                .map_err(|source| CacheError::Prepare {
                    path: fingerprint_path.clone(),
                    source,
                })?;
        }

        Ok(Self {
            root: Some(root),
            ..Self::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Look up an entry. `Ok(None)` is a miss.
    pub async fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(path) = self.entry_path(key) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(source) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Read { path, source })
            }
        }
    }

    /// Store an entry, replacing any previous value atomically.
    pub async fn store(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        let Some(path) = self.entry_path(key) else {
            return Ok(());
        };
        let write_error = |source| CacheError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let temp = path.with_extension(format!("tmp{}", std::process::id()));
        tokio::fs::write(&temp, bytes).await.map_err(write_error)?;
        tokio::fs::rename(&temp, &path).await.map_err(write_error)?;

        self.stores.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }

    fn entry_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let hex = key.to_hex();
        let (shard, rest) = hex.split_at(2);
        Some(root.join(OBJECTS_DIR).join(shard).join(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page: &str, deps: &[&str]) -> CacheKey {
        CacheKey::new("config-v1", &PageId::new(page), Stage::Parse, deps)
    }

    #[test]
    fn test_key_ignores_dependency_order() {
        assert_eq!(key("a.md", &["x", "y"]), key("a.md", &["y", "x"]));
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let base = key("a.md", &["x"]);
        assert_ne!(base, key("b.md", &["x"]));
        assert_ne!(base, key("a.md", &["z"]));
        assert_ne!(base, key("a.md", &["x", "x"]));
        assert_ne!(
            base,
            CacheKey::new("config-v2", &PageId::new("a.md"), Stage::Parse, ["x"])
        );
        assert_ne!(
            base,
            CacheKey::new("config-v1", &PageId::new("a.md"), Stage::Resolve, ["x"])
        );
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).await.unwrap();
        let k = key("a.md", &["body"]);

        assert_eq!(cache.load(&k).await.unwrap(), None);
        cache.store(&k, b"artifact").await.unwrap();
        assert_eq!(cache.load(&k).await.unwrap(), Some(b"artifact".to_vec()));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                stores: 1
            }
        );
    }

    #[tokio::test]
    async fn test_entries_survive_reopen_with_same_engine() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("a.md", &["body"]);

        let cache = Cache::open_with_fingerprint(dir.path(), "engine-1").await.unwrap();
        cache.store(&k, b"artifact").await.unwrap();
        drop(cache);

        let cache = Cache::open_with_fingerprint(dir.path(), "engine-1").await.unwrap();
        assert_eq!(cache.load(&k).await.unwrap(), Some(b"artifact".to_vec()));
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_discards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let keys: Vec<_> = ["a.md", "b.md", "c.md"].iter().map(|p| key(p, &["body"])).collect();

        let cache = Cache::open_with_fingerprint(dir.path(), "engine-1").await.unwrap();
        for k in &keys {
            cache.store(k, b"artifact").await.unwrap();
        }
        drop(cache);

        let cache = Cache::open_with_fingerprint(dir.path(), "engine-2").await.unwrap();
        for k in &keys {
            assert_eq!(cache.load(k).await.unwrap(), None);
        }
        let recorded = std::fs::read_to_string(dir.path().join(FINGERPRINT_FILE)).unwrap();
        assert_eq!(recorded, "engine-2");
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = Cache::disabled();
        let k = key("a.md", &["body"]);

        cache.store(&k, b"artifact").await.unwrap();
        assert_eq!(cache.load(&k).await.unwrap(), None);
        assert!(!cache.is_enabled());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_engine_fingerprint_is_stable() {
        assert_eq!(engine_fingerprint(), engine_fingerprint());
        assert_eq!(engine_fingerprint().len(), 64);
    }
}
