//! LRU cache of recent file reads.
//!
//! Keyed by canonical path and invalidated by mtime: a `get` re-stats the
//! file and drops the entry if the on-disk file is newer or gone, so a
//! cached file whose mtime advances is never served stale. Bounded by both
//! an entry count and a total byte budget; oversized files (> 10 % of the
//! byte budget) are never cached at all.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use lru::LruCache;

/// Defaults: 100 entries, 100 MiB.
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024 * 1024;

// ─── Entry ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileCacheEntry {
    pub path: PathBuf,
    pub content: Arc<str>,
    pub mtime: SystemTime,
    pub size: u64,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    pub last_access: chrono::DateTime<chrono::Utc>,
    pub line_count: usize,
}

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub hit_rate: f64,
}

// ─── FileCache ────────────────────────────────────────────────────────────────

struct Inner {
    entries: LruCache<PathBuf, FileCacheEntry>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU of file contents. Shared process-wide via `Arc`;
/// eviction happens on demand inside `put`, so there is no background
/// maintenance task.
pub struct FileCache {
    max_entries: usize,
    max_bytes: u64,
    inner: Mutex<Inner>,
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_BYTES)
    }
}

impl FileCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            max_entries,
            max_bytes,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look up `path`. The entry is revalidated against the file's current
    /// mtime; a stale or unstatable entry is removed and counts as a miss.
    pub fn get(&self, path: &Path) -> Option<(Arc<str>, usize)> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };

        if inner.entries.peek(path).is_none() {
            inner.misses += 1;
            return None;
        }

        let fresh = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(disk_mtime) => inner
                .entries
                .peek(path)
                .is_some_and(|e| disk_mtime <= e.mtime),
            Err(_) => false,
        };
        if !fresh {
            if let Some(old) = inner.entries.pop(path) {
                inner.total_bytes -= old.size;
            }
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        // `get_mut` promotes the entry to most-recently-used.
        let entry = inner.entries.get_mut(path)?;
        entry.last_access = chrono::Utc::now();
        Some((entry.content.clone(), entry.line_count))
    }

    /// Insert or replace `path`. Evicts least-recently-used entries until
    /// both the byte and the entry budget hold.
    pub fn put(&self, path: &Path, content: &str, mtime: SystemTime, line_count: usize) {
        let size = content.len() as u64;
        if size > self.max_bytes / 10 {
            tracing::debug!(path = %path.display(), size, "file too large to cache");
            return;
        }

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if let Some(old) = inner.entries.pop(path) {
            inner.total_bytes -= old.size;
        }

        while inner.entries.len() >= self.max_entries
            || inner.total_bytes + size > self.max_bytes
        {
            match inner.entries.pop_lru() {
                Some((evicted, entry)) => {
                    inner.total_bytes -= entry.size;
                    tracing::debug!(path = %evicted.display(), "evicted from file cache");
                }
                None => break,
            }
        }

        let now = chrono::Utc::now();
        inner.entries.push(
            path.to_path_buf(),
            FileCacheEntry {
                path: path.to_path_buf(),
                content: Arc::from(content),
                mtime,
                size,
                cached_at: now,
                last_access: now,
                line_count,
            },
        );
        inner.total_bytes += size;
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut inner) = self.inner.lock()
            && let Some(old) = inner.entries.pop(path)
        {
            inner.total_bytes -= old.size;
        }
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.total_bytes = 0;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.lock() else {
            return CacheStats {
                hits: 0,
                misses: 0,
                entries: 0,
                total_bytes: 0,
                max_bytes: self.max_bytes,
                hit_rate: 0.0,
            };
        };
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_and_mtime(path: &Path, content: &str) -> SystemTime {
        fs::write(path, content).unwrap();
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[test]
    fn miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let mtime = write_and_mtime(&file, "hello");

        let cache = FileCache::default();
        assert!(cache.get(&file).is_none());

        cache.put(&file, "hello", mtime, 1);
        let (content, lines) = cache.get(&file).unwrap();
        assert_eq!(&*content, "hello");
        assert_eq!(lines, 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn mtime_advance_invalidates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let mtime = write_and_mtime(&file, "v1");

        let cache = FileCache::default();
        cache.put(&file, "v1", mtime, 1);

        // Rewrite with a strictly newer mtime.
        fs::write(&file, "v2").unwrap();
        let newer = mtime + std::time::Duration::from_secs(2);
        filetime_set(&file, newer);

        assert!(cache.get(&file).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    // Touch the file's mtime forward without an extra dependency.
    fn filetime_set(path: &Path, to: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(to).unwrap();
    }

    #[test]
    fn deleted_file_invalidates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let mtime = write_and_mtime(&file, "x");

        let cache = FileCache::default();
        cache.put(&file, "x", mtime, 1);
        fs::remove_file(&file).unwrap();
        assert!(cache.get(&file).is_none());
    }

    #[test]
    fn entry_budget_evicts_lru() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(2, DEFAULT_MAX_BYTES);

        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("f{i}"))).collect();
        for p in &paths {
            let mtime = write_and_mtime(p, "data");
            cache.put(p, "data", mtime, 1);
        }

        // f0 was least recently used and must be gone.
        assert!(cache.get(&paths[0]).is_none());
        assert!(cache.get(&paths[1]).is_some());
        assert!(cache.get(&paths[2]).is_some());
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn byte_budget_evicts() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(100, 100);

        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let big = "x".repeat(60);
        let ma = write_and_mtime(&a, &big);
        let mb = write_and_mtime(&b, &big);

        cache.put(&a, &big, ma, 1);
        cache.put(&b, &big, mb, 1);

        // 120 bytes exceed the 100-byte budget; `a` is evicted.
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.stats().total_bytes <= 100);
    }

    #[test]
    fn oversized_file_never_cached() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big");
        let content = "x".repeat(20);
        let mtime = write_and_mtime(&file, &content);

        // 10% of 100 bytes = 10; a 20-byte file must be skipped.
        let cache = FileCache::new(100, 100);
        cache.put(&file, &content, mtime, 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn replace_updates_total_bytes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a");
        let m1 = write_and_mtime(&file, "aaaa");

        let cache = FileCache::default();
        cache.put(&file, "aaaa", m1, 1);
        cache.put(&file, "bb", m1, 1);
        assert_eq!(cache.stats().total_bytes, 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn clear_empties_everything() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a");
        let mtime = write_and_mtime(&file, "x");

        let cache = FileCache::default();
        cache.put(&file, "x", mtime, 1);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().total_bytes, 0);
    }
}
