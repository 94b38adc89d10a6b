//! C5: the cache manager. Owns the fetch pipeline, both cache tiers, and the
//! authoritative MRU list; resolves a lookup by consulting memory, then
//! disk, then the fetchers, and reconciles both tiers against a freshly
//! computed MRU at the end of each request (§4.5).
//!
//! Grounded on `original_source/symFileManager.py`'s `GetLibSymbolMap` for
//! the startup sequence and tiered-lookup shape; the batched
//! reconciliation in `get_lib_symbol_maps` supersedes that file's
//! `MaybeEvict`/per-lookup `UpdateMruList` in favor of the request-as-one-
//! transaction design `original_source/symCache.py`'s `Cache.Update`
//! implies once read together with `symbolicationRequest.py`'s call site.
//!
//! Concurrency shape matches `wholesym/src/symbol_manager.rs`: a single
//! shared manager behind an async mutex, with per-key fetch coalescing so
//! concurrent misses on a cold key share one fetch rather than each issuing
//! their own (§5). The mutex is held only across the brief membership
//! lookups and the in-memory half of the batched reconciliation; it is
//! never held across a disk read, a fetch, or a peer POST.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::disk_cache::DiskCache;
use crate::error::ConfigError;
use crate::fetcher::{CoalescingFetcher, FetchPipeline, PathFetcher, UrlFetcher};
use crate::memory_cache::{diff_mru, MemoryCache};
use crate::module_key::ModuleKey;
use crate::mru_state;
use crate::symbol_table::SymbolTable;

struct State {
    mru: Vec<ModuleKey>,
    memory_cache: MemoryCache,
}

pub struct CacheManager {
    fetcher: CoalescingFetcher,
    disk_cache: DiskCache,
    state: Mutex<State>,
    mru_state_file: Option<PathBuf>,
    max_mru_symbols_persist: usize,
}

impl CacheManager {
    /// Startup (§4.5):
    /// 1. `MRU <- diskCache.GetCacheEntries()`.
    /// 2. If `|MRU| > diskCache.MAX_SIZE`, evict the overflow and truncate.
    /// 3. `memoryCache.LoadCacheEntries(MRU, diskCache)`.
    /// 4. If an MRU state file is configured, prefetch its keys (§4.9).
    pub async fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let disk_cache = DiskCache::new(config.disk_cache_path.clone(), config.max_disk_cache_files)?;

        let mut mru = disk_cache.get_cache_entries();
        if mru.len() > disk_cache.max_size() {
            let overflow: HashSet<ModuleKey> = mru.split_off(disk_cache.max_size()).into_iter().collect();
            disk_cache.evict(&overflow).await;
        }

        let mut memory_cache = MemoryCache::new(config.max_mem_cache_files);
        memory_cache.load_cache_entries(&mru, &disk_cache).await;

        log::info!(
            "cache manager startup: {} disk-resident MRU entries, memory tier capacity {}",
            mru.len(),
            memory_cache.max_size()
        );

        let path_fetcher = PathFetcher::new(config.symbol_paths.clone());
        let url_fetcher = UrlFetcher::new(config.symbol_urls.clone(), reqwest::Client::new());
        let fetcher = CoalescingFetcher::new(FetchPipeline::new(path_fetcher, url_fetcher));

        let manager = CacheManager {
            fetcher,
            disk_cache,
            state: Mutex::new(State { mru, memory_cache }),
            mru_state_file: config.mru_symbol_state_file.clone(),
            max_mru_symbols_persist: config.max_mru_symbols_persist,
        };

        manager.run_startup_prefetch().await;

        Ok(manager)
    }

    async fn run_startup_prefetch(&self) {
        let Some(path) = &self.mru_state_file else {
            return;
        };
        let prefetch_keys = mru_state::read(path, self.max_mru_symbols_persist).await;
        log::info!("prefetching {} recent symbol files", prefetch_keys.len());
        for key in &prefetch_keys {
            if self.get_lib_symbol_map(key).await.is_none() {
                log::debug!("failed to prefetch symbols for {key:?}");
            }
        }
        log::info!("finished prefetching recent symbol files");
    }

    /// Per-module lookup (§4.5): memory, then disk, then the fetch pipeline
    /// (behind the coalescing layer). A read-miss despite MRU membership
    /// (the underlying file was deleted out-of-band) falls through to fetch
    /// rather than being treated as a hard miss.
    pub async fn get_lib_symbol_map(&self, key: &ModuleKey) -> Option<SymbolTable> {
        if !key.is_attributable() {
            return None;
        }

        let membership = {
            let state = self.state.lock().await;
            state.mru.iter().position(|k| k == key).map(|index| {
                let in_memory_tier = index < state.memory_cache.max_size();
                let from_memory = if in_memory_tier {
                    state.memory_cache.get(key)
                } else {
                    None
                };
                (in_memory_tier, from_memory)
            })
        };

        if let Some((in_memory_tier, from_memory)) = membership {
            if let Some(table) = from_memory {
                return Some(table);
            }
            if !in_memory_tier {
                if let Some(table) = self.disk_cache.get(key).await {
                    return Some(table);
                }
            }
            log::debug!("{key:?} is MRU-resident but its tier read missed; fetching instead");
        }

        self.fetcher.fetch(key).await
    }

    /// Per-request batch lookup (§4.5). Resolves every attributable module,
    /// then reconciles the MRU and both tiers in one transaction: the
    /// request's hit keys (in `modules` order, capped at the disk tier
    /// size) lead the new MRU, followed by the remainder of the prior MRU.
    pub async fn get_lib_symbol_maps(&self, modules: &[ModuleKey]) -> HashMap<ModuleKey, SymbolTable> {
        let mut hits = HashMap::new();
        for module in modules {
            if !module.is_attributable() || hits.contains_key(module) {
                continue;
            }
            if let Some(table) = self.get_lib_symbol_map(module).await {
                hits.insert(module.clone(), table);
            }
        }

        let disk_max = self.disk_cache.max_size();
        let (new_mru, disk_inserted, disk_evicted) = {
            let mut state = self.state.lock().await;
            let mem_max = state.memory_cache.max_size();

            let mut new_mru = Vec::with_capacity(disk_max.min(modules.len() + state.mru.len()));
            let mut seen = HashSet::new();
            for module in modules {
                if new_mru.len() >= disk_max {
                    break;
                }
                if hits.contains_key(module) && seen.insert(module.clone()) {
                    new_mru.push(module.clone());
                }
            }
            for key in state.mru.iter() {
                if new_mru.len() >= disk_max {
                    break;
                }
                if seen.insert(key.clone()) {
                    new_mru.push(key.clone());
                }
            }

            let old_mru = std::mem::replace(&mut state.mru, new_mru.clone());
            let (mem_inserted, mem_evicted) = diff_mru(&old_mru, &new_mru, mem_max);
            let (disk_inserted, disk_evicted) = diff_mru(&old_mru, &new_mru, disk_max);

            state.memory_cache.evict(&mem_evicted);
            state.memory_cache.insert(&mem_inserted, &hits);

            (new_mru, disk_inserted, disk_evicted)
        };

        self.disk_cache.evict(&disk_evicted).await;
        self.disk_cache.insert(&disk_inserted, &hits).await;

        if let Some(path) = &self.mru_state_file {
            mru_state::write(path, &new_mru, self.max_mru_symbols_persist).await;
        }

        hits
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn write_sym_file(root: &std::path::Path, key: &ModuleKey, contents: &str) {
        let dir = root.join(&key.lib_name).join(&key.breakpad_id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(key.sym_file_name()), contents).await.unwrap();
    }

    fn config(symbol_root: &std::path::Path, disk_cache: &std::path::Path, mem_max: usize, disk_max: usize) -> Config {
        Config::new(disk_cache.to_path_buf())
            .with_symbol_paths(vec![symbol_root.to_path_buf()])
            .with_cache_limits(mem_max, disk_max)
    }

    #[tokio::test]
    async fn resolves_via_fetch_on_cold_cache_then_via_memory_on_repeat() {
        let symbol_root = tempfile::tempdir().unwrap();
        let disk_cache = tempfile::tempdir().unwrap();
        let key = ModuleKey::new("l.so", "ID1");
        write_sym_file(symbol_root.path(), &key, "PUBLIC 10 0 entry\nPUBLIC 20 0 inner\n").await;

        let manager = CacheManager::new(&config(symbol_root.path(), disk_cache.path(), 10, 10))
            .await
            .unwrap();

        let hits = manager.get_lib_symbol_maps(&[key.clone()]).await;
        assert_eq!(hits.get(&key).unwrap().lookup(0x20), Some("inner"));

        // Remove the source file; a repeat lookup must be served from the warm tier.
        tokio::fs::remove_dir_all(symbol_root.path().join("l.so")).await.unwrap();
        let hits_again = manager.get_lib_symbol_maps(&[key.clone()]).await;
        assert_eq!(hits_again.get(&key).unwrap().lookup(0x20), Some("inner"));
    }

    #[tokio::test]
    async fn empty_lib_name_is_skipped_not_fetched() {
        let symbol_root = tempfile::tempdir().unwrap();
        let disk_cache = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(&config(symbol_root.path(), disk_cache.path(), 10, 10))
            .await
            .unwrap();

        let hits = manager
            .get_lib_symbol_maps(&[ModuleKey::new("", "whatever")])
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn scenario_6_mru_invariant_after_batch() {
        let symbol_root = tempfile::tempdir().unwrap();
        let disk_cache_dir = tempfile::tempdir().unwrap();

        let a = ModuleKey::new("a.so", "1");
        let b = ModuleKey::new("b.so", "1");
        let c = ModuleKey::new("c.so", "1");
        let d = ModuleKey::new("d.so", "1");
        for key in [&a, &b, &c, &d] {
            write_sym_file(symbol_root.path(), key, "PUBLIC 0 0 x\n").await;
        }

        let manager = CacheManager::new(&config(symbol_root.path(), disk_cache_dir.path(), 2, 3))
            .await
            .unwrap();

        // Establish pre-state MRU [A, B, C] (A most recent).
        manager.get_lib_symbol_maps(&[c.clone()]).await;
        manager.get_lib_symbol_maps(&[b.clone()]).await;
        manager.get_lib_symbol_maps(&[a.clone()]).await;

        {
            let state = manager.state.lock().await;
            assert_eq!(state.mru, vec![a.clone(), b.clone(), c.clone()]);
        }

        // A request that hits D and B, in that order.
        manager.get_lib_symbol_maps(&[d.clone(), b.clone()]).await;

        let state = manager.state.lock().await;
        assert_eq!(state.mru, vec![d.clone(), b.clone(), a.clone()]);
        assert_eq!(state.memory_cache.get(&d).is_some(), true);
        assert_eq!(state.memory_cache.get(&b).is_some(), true);
        assert_eq!(state.memory_cache.get(&a).is_some(), false);
        drop(state);

        assert!(manager.disk_cache.get(&c).await.is_none());
        assert!(manager.disk_cache.get(&a).await.is_some());
    }

    #[tokio::test]
    async fn repeated_identical_lookup_does_not_refetch() {
        let symbol_root = tempfile::tempdir().unwrap();
        let disk_cache = tempfile::tempdir().unwrap();
        let key = ModuleKey::new("l.so", "ID1");
        write_sym_file(symbol_root.path(), &key, "PUBLIC 10 0 entry\n").await;

        let manager = CacheManager::new(&config(symbol_root.path(), disk_cache.path(), 10, 10))
            .await
            .unwrap();
        let first = manager.get_lib_symbol_maps(&[key.clone()]).await;
        tokio::fs::remove_dir_all(symbol_root.path().join("l.so")).await.unwrap();
        let second = manager.get_lib_symbol_maps(&[key.clone()]).await;
        assert_eq!(first.get(&key), second.get(&key));
    }
}
