//! C4: the hot in-process symbol table cache. Same `Update` discipline as
//! the disk cache (§4.4), backed by a plain map instead of files.
//!
//! Grounded on `original_source/symCache.py`'s `MemoryCache`.

use std::collections::{HashMap, HashSet};

use crate::module_key::ModuleKey;
use crate::symbol_table::SymbolTable;

pub struct MemoryCache {
    entries: HashMap<ModuleKey, SymbolTable>,
    max_size: usize,
}

impl MemoryCache {
    /// `max_size` must be `<= disk_cache.max_size()`; this is asserted at
    /// `CacheManager` construction time, not here (§4.4).
    pub fn new(max_size: usize) -> Self {
        MemoryCache {
            entries: HashMap::new(),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn get(&self, key: &ModuleKey) -> Option<SymbolTable> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, keys: &HashSet<ModuleKey>, tables: &HashMap<ModuleKey, SymbolTable>) {
        for key in keys {
            match tables.get(key) {
                Some(table) => {
                    self.entries.insert(key.clone(), table.clone());
                }
                None => log::warn!("memory cache insert: no table supplied for {key:?}"),
            }
        }
    }

    pub fn evict(&mut self, keys: &HashSet<ModuleKey>) {
        for key in keys {
            self.entries.remove(key);
        }
    }

    /// Warm-loads the first `max_size` MRU entries from the disk cache.
    pub async fn load_cache_entries(&mut self, mru: &[ModuleKey], disk_cache: &crate::disk_cache::DiskCache) {
        for key in mru.iter().take(self.max_size) {
            if let Some(table) = disk_cache.get(key).await {
                self.entries.insert(key.clone(), table);
            }
        }
    }
}

/// Computes `inserted`/`evicted` for the batched `Update` operation shared by
/// both tiers (§4.4): `inserted = prefix(new, max) \ prefix(old, max)`,
/// `evicted = prefix(old, max) \ prefix(new, max)`.
pub fn diff_mru(old_mru: &[ModuleKey], new_mru: &[ModuleKey], max_size: usize) -> (HashSet<ModuleKey>, HashSet<ModuleKey>) {
    let old_set: HashSet<ModuleKey> = old_mru.iter().take(max_size).cloned().collect();
    let new_set: HashSet<ModuleKey> = new_mru.iter().take(max_size).cloned().collect();
    let inserted = new_set.difference(&old_set).cloned().collect();
    let evicted = old_set.difference(&new_set).cloned().collect();
    (inserted, evicted)
}
