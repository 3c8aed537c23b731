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

use crate::assets::{AssetId, UnloadStrategy};
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::event_types::CacheEvictionEvent;
use crate::resources::{Admission, CacheStats, Handle, MemoryBudget, Resource, ResourceCache};
use parking_lot::RwLock;
use std::sync::Arc;

/// Told which entries budget pressure pushed out, after the cache lock is released
pub type EvictionListener = Arc<dyn Fn(&[AssetId]) + Send + Sync>;

/// Application-facing front of the resource cache.
///
/// Lookups never trigger loads; a miss means the asset is not loaded yet or was
/// evicted, and callers must tolerate that every frame.
pub struct CachedResourceManager {
    cache: Arc<ResourceCache>,
    events: Option<Arc<EventBus>>,
    eviction_listener: RwLock<Option<EvictionListener>>,
}

impl CachedResourceManager {
    /// Create new resource manager with a memory budget
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            cache: Arc::new(ResourceCache::new(budget)),
            events: None,
            eviction_listener: RwLock::new(None),
        }
    }

    /// Publish [`CacheEvictionEvent`]s on `bus`
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Typed shared handle; holding it pins the entry
    pub fn get_resource<T: Resource>(&self, id: impl Into<AssetId>) -> Option<Handle<T>> {
        self.cache.get_typed::<T>(&id.into())
    }

    /// Type-erased lookup
    pub fn get_untyped(&self, id: impl Into<AssetId>) -> Option<Arc<dyn Resource>> {
        self.cache.get(&id.into())
    }

    /// Install the single in-process eviction listener, replacing any previous one
    pub fn set_eviction_listener(&self, listener: Option<EvictionListener>) {
        *self.eviction_listener.write() = listener;
    }

    /// Admit an evictable resource, charging its own reported size
    pub fn put_resource(&self, resource: Arc<dyn Resource>) -> Result<Admission> {
        self.put_resource_with_strategy(resource, UnloadStrategy::Automatic)
    }

    /// Admit a resource; `Manual` entries leave only through an explicit unload
    pub fn put_resource_with_strategy(
        &self,
        resource: Arc<dyn Resource>,
        strategy: UnloadStrategy,
    ) -> Result<Admission> {
        let id = resource.id().clone();
        let size = resource.size_in_bytes();
        let admission = self.cache.put_with_strategy(id, resource, size, strategy)?;
        self.publish_evictions(&admission);
        Ok(admission)
    }

    /// Drop the cache's reference. Outstanding handles keep the resource alive.
    pub fn unload_resource(&self, id: impl Into<AssetId>) -> bool {
        let id = id.into();
        let removed = self.cache.remove(&id);
        if removed {
            tracing::debug!(asset = %id, "unloaded resource");
        }
        removed
    }

    /// Remove only if no caller holds a handle
    pub fn remove_if_unreferenced(&self, id: impl Into<AssetId>) -> bool {
        self.cache.remove_if_unreferenced(&id.into())
    }

    pub fn unload_all_resources(&self) {
        let count = self.cache.len();
        self.cache.clear();
        tracing::info!(count, "unloaded all resources");
    }

    /// Install a new budget, evicting immediately when usage is over the new trigger
    pub fn set_cache_config(&self, budget: MemoryBudget) {
        tracing::info!(
            max_total = budget.max_total_memory,
            max_single = budget.max_single_resource,
            threshold = budget.eviction_threshold_percent,
            "cache budget changed"
        );
        let admission = self.cache.set_memory_budget(budget);
        self.publish_evictions(&admission);
    }

    pub fn log_cache_status(&self) {
        let budget = self.cache.memory_budget();
        let stats = self.cache.stats();
        tracing::info!(
            entries = self.cache.len(),
            usage = self.cache.memory_usage(),
            max_total = budget.max_total_memory,
            trigger = budget.eviction_trigger_size(),
            utilization = format!("{:.1}%", self.cache.utilization() * 100.0),
            hits = stats.hits,
            misses = stats.misses,
            hit_ratio = format!("{:.2}", stats.hit_ratio()),
            evictions = stats.total_evictions,
            reclaimed = stats.memory_reclaimed,
            healthy = self.cache.is_memory_healthy(),
            "cache status"
        );
    }

    pub fn is_cache_healthy(&self) -> bool {
        self.cache.is_memory_healthy()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_resource_loaded(&self, id: impl Into<AssetId>) -> bool {
        self.cache.contains(&id.into())
    }

    /// Underlying cache
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn shutdown(&self) {
        self.cache.clear();
        tracing::debug!("resource manager shut down");
    }

    fn publish_evictions(&self, admission: &Admission) {
        if admission.evicted.is_empty() && !admission.over_budget {
            return;
        }
        if !admission.evicted.is_empty() {
            let listener = self.eviction_listener.read().clone();
            if let Some(listener) = listener {
                listener(&admission.evicted);
            }
        }
        if let Some(bus) = &self.events {
            bus.broadcast(CacheEvictionEvent {
                evicted: admission.evicted.clone(),
                bytes_reclaimed: admission.bytes_reclaimed,
                over_budget: admission.over_budget,
            });
        }
    }
}

impl Default for CachedResourceManager {
    fn default() -> Self {
        Self::new(MemoryBudget::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{RawResource, ScriptResource};
    use parking_lot::Mutex;

    const KB: usize = 1024;

    #[test]
    fn test_put_and_get_typed() -> Result<()> {
        let manager = CachedResourceManager::default();
        manager.put_resource(Arc::new(ScriptResource::new(
            AssetId::new("main.lua"),
            "print('hi')".to_string(),
        )))?;

        let script = manager.get_resource::<ScriptResource>("main.lua");
        assert_eq!(script.map(|s| s.source().len()), Some(11));
        assert!(manager.get_resource::<RawResource>("main.lua").is_none());
        assert!(manager.is_resource_loaded("main.lua"));
        Ok(())
    }

    #[test]
    fn test_unload_keeps_outstanding_handles_valid() -> Result<()> {
        let manager = CachedResourceManager::default();
        manager.put_resource(Arc::new(RawResource::zeroed("blob", 16)))?;
        let handle = manager
            .get_resource::<RawResource>("blob")
            .ok_or_else(|| crate::error::PipelineError::Scene("missing".into()))?;

        assert!(manager.unload_resource("blob"));
        assert!(!manager.is_resource_loaded("blob"));
        assert_eq!(handle.data().len(), 16);
        assert!(!manager.unload_resource("blob"));
        Ok(())
    }

    #[test]
    fn test_eviction_events_published() -> Result<()> {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe::<CacheEvictionEvent, _>(move |e| {
            s.lock().extend(e.evicted.iter().cloned());
        });

        let manager =
            CachedResourceManager::new(MemoryBudget::new(10 * KB, 100)).with_event_bus(bus);
        manager.put_resource(Arc::new(RawResource::zeroed("a", 6 * KB)))?;
        manager.put_resource(Arc::new(RawResource::zeroed("b", 6 * KB)))?;

        assert_eq!(seen.lock().as_slice(), &[AssetId::new("a")]);
        assert_eq!(manager.cache_stats().total_evictions, 1);
        Ok(())
    }

    #[test]
    fn test_eviction_listener_sees_victims_but_not_manual_entries() -> Result<()> {
        let manager = CachedResourceManager::new(MemoryBudget::new(10 * KB, 100));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        manager.set_eviction_listener(Some(Arc::new(move |ids: &[AssetId]| {
            s.lock().extend(ids.iter().cloned());
        })));

        manager.put_resource_with_strategy(
            Arc::new(RawResource::zeroed("keep", 4 * KB)),
            UnloadStrategy::Manual,
        )?;
        manager.put_resource(Arc::new(RawResource::zeroed("a", 4 * KB)))?;
        manager.put_resource(Arc::new(RawResource::zeroed("b", 4 * KB)))?;

        assert_eq!(seen.lock().as_slice(), &[AssetId::new("a")]);
        assert!(manager.is_resource_loaded("keep"));

        manager.set_eviction_listener(None);
        manager.put_resource(Arc::new(RawResource::zeroed("c", 4 * KB)))?;
        assert_eq!(seen.lock().len(), 1);
        assert!(manager.is_resource_loaded("keep"));
        Ok(())
    }

    #[test]
    fn test_set_cache_config_shrinks() -> Result<()> {
        let manager = CachedResourceManager::new(MemoryBudget::new(100 * KB, 90));
        for i in 0..5 {
            manager.put_resource(Arc::new(RawResource::zeroed(format!("r{i}"), 10 * KB)))?;
        }
        assert!(manager.is_cache_healthy());

        manager.set_cache_config(MemoryBudget::new(30 * KB, 100));
        assert!(manager.cache().memory_usage() <= 30 * KB);
        manager.log_cache_status();

        manager.unload_all_resources();
        assert_eq!(manager.cache().memory_usage(), 0);
        Ok(())
    }
}
