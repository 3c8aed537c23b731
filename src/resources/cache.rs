// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Memory-budgeted LRU resource cache.
//!
//! Entries live in an [`lru::LruCache`] (hash map + recency list), so lookups and
//! recency updates are O(1). The cache owns one `Arc` per entry; any additional
//! strong reference held by a caller pins the entry against eviction. Entries
//! admitted with [`UnloadStrategy::Manual`] are never chosen as eviction victims;
//! only an explicit remove drops them.

use crate::assets::{AssetId, UnloadStrategy};
use crate::error::{PipelineError, Result};
use crate::resources::{downcast_resource, Handle, Resource};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Memory limits and eviction policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBudget {
    pub max_total_memory: usize,
    pub max_single_resource: usize,
    /// Percentage of `max_total_memory` at which admission starts evicting
    pub eviction_threshold_percent: u32,
    pub enable_eviction: bool,
    pub log_evictions: bool,
}

impl MemoryBudget {
    pub fn new(max_total_memory: usize, eviction_threshold_percent: u32) -> Self {
        Self {
            max_total_memory,
            max_single_resource: max_total_memory,
            eviction_threshold_percent,
            ..Self::default()
        }
    }

    pub fn with_max_single_resource(mut self, bytes: usize) -> Self {
        self.max_single_resource = bytes;
        self
    }

    /// `max_total_memory × threshold / 100`
    pub fn eviction_trigger_size(&self) -> usize {
        let trigger =
            self.max_total_memory as u128 * self.eviction_threshold_percent as u128 / 100;
        trigger.min(usize::MAX as u128) as usize
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            max_total_memory: 512 * 1024 * 1024,
            max_single_resource: 128 * 1024 * 1024,
            eviction_threshold_percent: 90,
            enable_eviction: true,
            log_evictions: true,
        }
    }
}

/// Entry in the resource cache
struct CacheEntry {
    resource_id: AssetId,
    resource: Arc<dyn Resource>,
    memory_size_bytes: usize,
    last_access_time: Instant,
    load_time: Instant,
    strategy: UnloadStrategy,
}

impl CacheEntry {
    /// Pinned when someone besides the cache holds the resource
    fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.resource) > 1
    }

    fn is_evictable(&self) -> bool {
        self.strategy == UnloadStrategy::Automatic && !self.is_pinned()
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub total_evictions: u64,
    pub memory_reclaimed: u64,
    pub last_eviction_at: Option<Instant>,
    pub peak_memory_usage: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

/// Public view of a cache entry
#[derive(Clone, Debug)]
pub struct CacheEntryInfo {
    pub id: AssetId,
    pub type_name: &'static str,
    pub memory_size_bytes: usize,
    pub pinned: bool,
    pub strategy: UnloadStrategy,
    pub age: std::time::Duration,
    pub idle: std::time::Duration,
}

/// Outcome of a successful [`ResourceCache::put`]
#[derive(Clone, Debug, Default)]
pub struct Admission {
    /// Entries dropped to make room, LRU first
    pub evicted: Vec<AssetId>,
    pub bytes_reclaimed: usize,
    /// Admitted even though pinned entries kept usage above the trigger
    pub over_budget: bool,
}

struct CacheInner {
    entries: LruCache<AssetId, CacheEntry, ahash::RandomState>,
    current_usage: usize,
    budget: MemoryBudget,
    stats: CacheStats,
}

impl CacheInner {
    /// Free LRU entries so that `incoming` more bytes fit under the trigger.
    /// Pinned and manual entries are moved to the MRU end and skipped.
    fn evict_for(&mut self, incoming: usize, admission: &mut Admission) {
        let trigger = self.budget.eviction_trigger_size();
        if !self.budget.enable_eviction || self.current_usage + incoming <= trigger {
            return;
        }

        #[cfg(feature = "profiling")]
        let _span = info_span!("cache_evict", incoming, usage = self.current_usage).entered();

        let need = self.current_usage + incoming - trigger;
        let mut freed = 0usize;
        let mut remaining = self.entries.len();

        while freed < need && remaining > 0 {
            remaining -= 1;
            let (key, evictable) = match self.entries.peek_lru() {
                Some((key, entry)) => (key.clone(), entry.is_evictable()),
                None => break,
            };

            if !evictable {
                self.entries.promote(&key);
                continue;
            }

            if let Some((_, entry)) = self.entries.pop_lru() {
                self.current_usage -= entry.memory_size_bytes;
                freed += entry.memory_size_bytes;
                self.stats.total_evictions += 1;
                self.stats.memory_reclaimed += entry.memory_size_bytes as u64;
                self.stats.last_eviction_at = Some(Instant::now());
                if self.budget.log_evictions {
                    tracing::debug!(
                        asset = %entry.resource_id,
                        bytes = entry.memory_size_bytes,
                        idle_ms = entry.last_access_time.elapsed().as_millis() as u64,
                        "evicted resource"
                    );
                }
                admission.evicted.push(entry.resource_id);
            }
        }

        admission.bytes_reclaimed += freed;
        if freed < need {
            admission.over_budget = true;
            tracing::warn!(
                usage = self.current_usage,
                incoming,
                trigger,
                shortfall = need - freed,
                "cache budget overrun: remaining entries are pinned or manual"
            );
        }
    }
}

/// Thread-safe LRU cache keyed by asset ID
pub struct ResourceCache {
    inner: Mutex<CacheInner>,
}

impl ResourceCache {
    /// Create new cache with memory budget
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded_with_hasher(ahash::RandomState::new()),
                current_usage: 0,
                budget,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a resource, moving it to the MRU position. Never loads.
    pub fn get(&self, id: &AssetId) -> Option<Arc<dyn Resource>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.entries.get_mut(id) {
            Some(entry) => {
                entry.last_access_time = Instant::now();
                let resource = Arc::clone(&entry.resource);
                inner.stats.hits += 1;
                Some(resource)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Typed lookup; `None` on a miss or when the cached resource is another type
    pub fn get_typed<T: Resource>(&self, id: &AssetId) -> Option<Handle<T>> {
        let resource = self.get(id)?;
        downcast_resource::<T>(resource).map(|typed| Handle::new(id.clone(), typed))
    }

    /// Admit or replace an evictable resource; see [`put_with_strategy`](Self::put_with_strategy)
    pub fn put(
        &self,
        id: AssetId,
        resource: Arc<dyn Resource>,
        size_bytes: usize,
    ) -> Result<Admission> {
        self.put_with_strategy(id, resource, size_bytes, UnloadStrategy::Automatic)
    }

    /// Admit or replace a resource.
    ///
    /// Fails if `size_bytes` exceeds the single-resource limit. A new key may evict
    /// unpinned automatic LRU entries first; if not enough can be freed the resource
    /// is still admitted and the overrun is logged. A replacement takes the new
    /// strategy.
    pub fn put_with_strategy(
        &self,
        id: AssetId,
        resource: Arc<dyn Resource>,
        size_bytes: usize,
        strategy: UnloadStrategy,
    ) -> Result<Admission> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if size_bytes > inner.budget.max_single_resource {
            return Err(PipelineError::Budget {
                asset: id,
                size: size_bytes,
                limit: inner.budget.max_single_resource,
            });
        }

        let mut admission = Admission::default();
        let now = Instant::now();

        if let Some(existing) = inner.entries.get_mut(&id) {
            let old_size = existing.memory_size_bytes;
            existing.resource = resource;
            existing.memory_size_bytes = size_bytes;
            existing.last_access_time = now;
            existing.load_time = now;
            existing.strategy = strategy;
            inner.current_usage = inner.current_usage - old_size + size_bytes;
        } else {
            inner.evict_for(size_bytes, &mut admission);
            inner.entries.put(
                id.clone(),
                CacheEntry {
                    resource_id: id,
                    resource,
                    memory_size_bytes: size_bytes,
                    last_access_time: now,
                    load_time: now,
                    strategy,
                },
            );
            inner.current_usage += size_bytes;
        }

        inner.stats.insertions += 1;
        inner.stats.peak_memory_usage = inner.stats.peak_memory_usage.max(inner.current_usage);
        Ok(admission)
    }

    /// Remove an entry and return its memory to the budget
    pub fn remove(&self, id: &AssetId) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.pop(id) {
            Some(entry) => {
                inner.current_usage -= entry.memory_size_bytes;
                true
            }
            None => false,
        }
    }

    /// Remove an entry only if no caller holds a handle to it
    pub fn remove_if_unreferenced(&self, id: &AssetId) -> bool {
        let mut inner = self.inner.lock();
        let pinned = match inner.entries.peek(id) {
            Some(entry) => entry.is_pinned(),
            None => return false,
        };
        if pinned {
            return false;
        }
        match inner.entries.pop(id) {
            Some(entry) => {
                inner.current_usage -= entry.memory_size_bytes;
                true
            }
            None => false,
        }
    }

    /// Drop every entry; tracked memory returns to zero
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_usage = 0;
    }

    /// Install a new budget, evicting immediately if usage exceeds the new trigger
    pub fn set_memory_budget(&self, budget: MemoryBudget) -> Admission {
        let mut inner = self.inner.lock();
        inner.budget = budget;
        let mut admission = Admission::default();
        inner.evict_for(0, &mut admission);
        admission
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        self.inner.lock().budget.clone()
    }

    /// `true` iff current usage is below the eviction trigger
    pub fn is_memory_healthy(&self) -> bool {
        let inner = self.inner.lock();
        inner.current_usage < inner.budget.eviction_trigger_size()
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.inner.lock().entries.contains(id)
    }

    /// Get current memory usage
    pub fn memory_usage(&self) -> usize {
        self.inner.lock().current_usage
    }

    /// Get memory utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f32 {
        let inner = self.inner.lock();
        if inner.budget.max_total_memory == 0 {
            0.0
        } else {
            inner.current_usage as f32 / inner.budget.max_total_memory as f32
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Get number of cached resources
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Cached IDs, most recently used first
    pub fn keys(&self) -> Vec<AssetId> {
        self.inner.lock().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Snapshot of every entry, most recently used first
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|(id, entry)| CacheEntryInfo {
                id: id.clone(),
                type_name: entry.resource.type_name(),
                memory_size_bytes: entry.memory_size_bytes,
                pinned: entry.is_pinned(),
                strategy: entry.strategy,
                age: entry.load_time.elapsed(),
                idle: entry.last_access_time.elapsed(),
            })
            .collect()
    }

    /// Sum of entry sizes; always equal to [`memory_usage`](Self::memory_usage)
    pub fn entries_memory_sum(&self) -> usize {
        let inner = self.inner.lock();
        inner.entries.iter().map(|(_, e)| e.memory_size_bytes).sum()
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(MemoryBudget::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::asset_types::RawResource;

    const MB: usize = 1024 * 1024;

    fn raw(id: &str, size: usize) -> Arc<dyn Resource> {
        Arc::new(RawResource::zeroed(id, size))
    }

    fn small_cache(max: usize) -> ResourceCache {
        ResourceCache::new(MemoryBudget::new(max, 100))
    }

    #[test]
    fn test_put_get_remove() -> Result<()> {
        let cache = small_cache(1000);
        cache.put(AssetId::new("a"), raw("a", 100), 100)?;
        assert!(cache.get(&AssetId::new("a")).is_some());
        assert_eq!(cache.memory_usage(), 100);

        assert!(cache.remove(&AssetId::new("a")));
        assert!(!cache.remove(&AssetId::new("a")));
        assert_eq!(cache.memory_usage(), 0);
        assert!(cache.get(&AssetId::new("a")).is_none());
        assert_eq!(cache.stats().misses, 1);
        Ok(())
    }

    #[test]
    fn test_rejects_oversized_resource() {
        let cache = ResourceCache::new(MemoryBudget::new(1000, 100).with_max_single_resource(10));
        let err = cache.put(AssetId::new("big"), raw("big", 11), 11).unwrap_err();
        assert!(matches!(err, PipelineError::Budget { size: 11, limit: 10, .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_adjusts_by_delta() -> Result<()> {
        let cache = small_cache(1000);
        let id = AssetId::new("a");
        cache.put(id.clone(), raw("a", 100), 100)?;
        cache.put(id.clone(), raw("a", 300), 300)?;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory_usage(), 300);
        assert_eq!(cache.entries_memory_sum(), 300);
        Ok(())
    }

    #[test]
    fn test_get_refreshes_recency() -> Result<()> {
        let cache = small_cache(300);
        cache.put(AssetId::new("a"), raw("a", 100), 100)?;
        cache.put(AssetId::new("b"), raw("b", 100), 100)?;
        cache.put(AssetId::new("c"), raw("c", 100), 100)?;

        // touch "a" so "b" becomes least recently used
        drop(cache.get(&AssetId::new("a")));
        let admission = cache.put(AssetId::new("d"), raw("d", 100), 100)?;

        assert_eq!(admission.evicted, vec![AssetId::new("b")]);
        assert!(cache.contains(&AssetId::new("a")));
        assert_eq!(cache.memory_usage(), 300);
        Ok(())
    }

    #[test]
    fn test_pinned_entries_survive_eviction() -> Result<()> {
        let budget = MemoryBudget::new(100 * MB, 90);
        let cache = ResourceCache::new(budget);

        let r1 = raw("r1", 40 * MB);
        let _pin = Arc::clone(&r1);
        cache.put(AssetId::new("r1"), r1, 40 * MB)?;
        cache.put(AssetId::new("r2"), raw("r2", 40 * MB), 40 * MB)?;
        assert_eq!(cache.memory_usage(), 80 * MB);

        cache.put(AssetId::new("r3"), raw("r3", 40 * MB), 40 * MB)?;

        assert!(cache.contains(&AssetId::new("r1")));
        assert!(!cache.contains(&AssetId::new("r2")));
        assert!(cache.contains(&AssetId::new("r3")));
        assert_eq!(cache.memory_usage(), 80 * MB);
        assert_eq!(cache.stats().total_evictions, 1);
        assert_eq!(cache.stats().memory_reclaimed, 40 * MB as u64);
        assert!(cache.stats().last_eviction_at.is_some());
        Ok(())
    }

    #[test]
    fn test_admits_over_budget_when_everything_pinned() -> Result<()> {
        let cache = small_cache(100);
        let a = raw("a", 80);
        let _pin = Arc::clone(&a);
        cache.put(AssetId::new("a"), a, 80)?;

        let admission = cache.put(AssetId::new("b"), raw("b", 80), 80)?;
        assert!(admission.over_budget);
        assert!(admission.evicted.is_empty());
        assert_eq!(cache.memory_usage(), 160);
        assert!(!cache.is_memory_healthy());
        Ok(())
    }

    #[test]
    fn test_shrinking_budget_evicts_immediately() -> Result<()> {
        let cache = small_cache(1000);
        for i in 0..5 {
            let id = format!("r{i}");
            cache.put(AssetId::new(&id), raw(&id, 100), 100)?;
        }
        let admission = cache.set_memory_budget(MemoryBudget::new(200, 100));
        assert_eq!(admission.evicted.len(), 3);
        assert_eq!(cache.memory_usage(), 200);
        assert!(cache.contains(&AssetId::new("r4")));
        Ok(())
    }

    #[test]
    fn test_remove_if_unreferenced() -> Result<()> {
        let cache = small_cache(1000);
        cache.put(AssetId::new("a"), raw("a", 10), 10)?;
        let held = cache.get(&AssetId::new("a"));
        assert!(!cache.remove_if_unreferenced(&AssetId::new("a")));
        drop(held);
        assert!(cache.remove_if_unreferenced(&AssetId::new("a")));
        Ok(())
    }

    #[test]
    fn test_clear_resets_usage() -> Result<()> {
        let cache = small_cache(1000);
        cache.put(AssetId::new("a"), raw("a", 10), 10)?;
        cache.put(AssetId::new("b"), raw("b", 20), 20)?;
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
        Ok(())
    }

    #[test]
    fn test_typed_lookup() -> Result<()> {
        let cache = small_cache(1000);
        cache.put(AssetId::new("a"), raw("a", 10), 10)?;
        let handle = cache.get_typed::<RawResource>(&AssetId::new("a")).unwrap();
        assert_eq!(handle.data().len(), 10);
        assert!(cache
            .get_typed::<crate::resources::ScriptResource>(&AssetId::new("a"))
            .is_none());
        Ok(())
    }

    #[test]
    fn test_manual_entries_skip_eviction() -> Result<()> {
        let cache = small_cache(100);
        cache.put_with_strategy(AssetId::new("m"), raw("m", 32), 32, UnloadStrategy::Manual)?;
        cache.put(AssetId::new("a"), raw("a", 32), 32)?;
        cache.put(AssetId::new("b"), raw("b", 32), 32)?;

        // "m" is least recently used but manual, so "a" goes instead
        let admission = cache.put(AssetId::new("c"), raw("c", 32), 32)?;
        assert_eq!(admission.evicted, vec![AssetId::new("a")]);
        assert!(cache.contains(&AssetId::new("m")));

        // a budget below the manual entry alone cannot evict it
        let admission = cache.set_memory_budget(MemoryBudget::new(10, 100));
        assert!(admission.over_budget);
        assert_eq!(cache.keys(), vec![AssetId::new("m")]);
        let info = &cache.entries()[0];
        assert_eq!(info.strategy, UnloadStrategy::Manual);
        assert!(!info.pinned);

        // explicit removal still works
        assert!(cache.remove(&AssetId::new("m")));
        assert_eq!(cache.memory_usage(), 0);
        Ok(())
    }

    #[test]
    fn test_disabled_eviction_never_evicts() -> Result<()> {
        let mut budget = MemoryBudget::new(100, 50);
        budget.enable_eviction = false;
        let cache = ResourceCache::new(budget);
        cache.put(AssetId::new("a"), raw("a", 60), 60)?;
        cache.put(AssetId::new("b"), raw("b", 60), 60)?;
        assert_eq!(cache.len(), 2);
        Ok(())
    }
}
