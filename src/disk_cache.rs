//! C3: the disk-resident symbol table cache. One file per key at
//! `{diskCachePath}/{breakpadId}@{libName}`, written atomically via
//! temp-file-then-rename so a reader never observes a partial write and a
//! crash mid-write never corrupts an existing entry (§4.3).
//!
//! Grounded on `original_source/symCache.py`'s `DiskCache` for the
//! `GetCacheEntries`/`Evict`/`Insert` shape; the atomic-write discipline
//! follows the temp-file-then-rename idiom in
//! `wholesym/src/file_creation.rs`'s `create_file_cleanly`, simplified here
//! to a single-process writer (no cross-process lock file, since this cache
//! is only ever written by the `CacheManager` that owns it).

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{CacheError, ConfigError};
use crate::module_key::ModuleKey;
use crate::symbol_table::SymbolTable;

pub struct DiskCache {
    cache_dir: PathBuf,
    max_size: usize,
}

impl DiskCache {
    pub fn new(cache_dir: PathBuf, max_size: usize) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(&cache_dir).map_err(|source| ConfigError::DiskCacheDir {
            path: cache_dir.clone(),
            source,
        })?;
        Ok(DiskCache {
            cache_dir,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Reads and deserializes the entry at `key`'s path. Any I/O or decode
    /// error is logged and treated as a miss.
    pub async fn get(&self, key: &ModuleKey) -> Option<SymbolTable> {
        let path = key.disk_path(&self.cache_dir);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(table) => Some(table),
                Err(source) => {
                    log::warn!(
                        "{}",
                        CacheError::Decode {
                            path: path.clone(),
                            source
                        }
                    );
                    None
                }
            },
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                log::warn!("{}", CacheError::Io { path, source });
                None
            }
        }
    }

    /// Writes every key in `keys` from `tables`. Writes are atomic: serialize
    /// to a temp file in the same directory, then rename into place.
    pub async fn insert(&self, keys: &HashSet<ModuleKey>, tables: &std::collections::HashMap<ModuleKey, SymbolTable>) {
        for key in keys {
            let Some(table) = tables.get(key) else {
                log::warn!("disk cache insert: no table supplied for {key:?}");
                continue;
            };
            if let Err(e) = self.write_one(key, table).await {
                log::warn!("disk cache write failed for {key:?}: {e}");
            }
        }
    }

    async fn write_one(&self, key: &ModuleKey, table: &SymbolTable) -> Result<(), CacheError> {
        let path = key.disk_path(&self.cache_dir);
        let bytes = serde_json::to_vec(table).map_err(|source| CacheError::Decode {
            path: path.clone(),
            source,
        })?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.cache_dir).map_err(|source| {
            CacheError::Io {
                path: self.cache_dir.clone(),
                source,
            }
        })?;
        use std::io::Write;
        temp.write_all(&bytes).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        temp.persist(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Best-effort deletes each file; missing files are not errors.
    pub async fn evict(&self, keys: &HashSet<ModuleKey>) {
        for key in keys {
            let path = key.disk_path(&self.cache_dir);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    log::warn!("{}", CacheError::Io { path, source });
                }
            }
        }
    }

    /// Enumerates files under the cache directory, splitting each filename
    /// on the first `@`. Files whose names can't be split are skipped.
    pub fn get_cache_entries(&self) -> Vec<ModuleKey> {
        let mut entries = Vec::new();
        let read_dir = match std::fs::read_dir(&self.cache_dir) {
            Ok(rd) => rd,
            Err(source) => {
                log::warn!(
                    "{}",
                    CacheError::Io {
                        path: self.cache_dir.clone(),
                        source
                    }
                );
                return entries;
            }
        };
        for entry in read_dir.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };
            match ModuleKey::from_disk_file_name(&file_name) {
                Some(key) => entries.push(key),
                None => log::warn!("disk cache: skipping unparseable file name {file_name:?}"),
            }
        }
        entries
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 10).unwrap();
        let key = ModuleKey::new("l.so", "ID1");
        let table = SymbolTable::from_entries([(0x10, "foo".to_string())]);

        let mut tables = std::collections::HashMap::new();
        tables.insert(key.clone(), table.clone());
        let mut keys = HashSet::new();
        keys.insert(key.clone());

        cache.insert(&keys, &tables).await;
        let loaded = cache.get(&key).await.unwrap();
        assert_eq!(loaded, table);
    }

    #[tokio::test]
    async fn get_missing_entry_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 10).unwrap();
        assert!(cache.get(&ModuleKey::new("nope", "ID")).await.is_none());
    }

    #[tokio::test]
    async fn evict_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 10).unwrap();
        let mut keys = HashSet::new();
        keys.insert(ModuleKey::new("nope", "ID"));
        cache.evict(&keys).await;
    }

    #[tokio::test]
    async fn get_cache_entries_splits_on_first_at() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 10).unwrap();
        tokio::fs::write(dir.path().join("ID1@lib.so"), b"{}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("no-delimiter"), b"junk")
            .await
            .unwrap();

        let mut entries = cache.get_cache_entries();
        entries.sort();
        assert_eq!(entries, vec![ModuleKey::new("lib.so", "ID1")]);
    }
}
