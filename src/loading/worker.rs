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

//! Loader worker threads.
//!
//! Each worker pulls from the shared [`LoadQueue`], runs the registered loader
//! for the asset type, admits the result to the cache and completes the request.
//! Loaders block their own thread; there is no per-request timeout.

use crate::assets::{LoadContext, LoaderRegistry};
use crate::error::{PipelineError, Result};
use crate::event_bus::{panic_message, EventBus};
use crate::event_types::{AssetLoadFailedEvent, AssetLoadedEvent};
use crate::loading::{LoadQueue, LoadRequest};
use crate::resources::{CachedResourceManager, Resource};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(feature = "profiling")]
use tracing::info_span;

const PAUSE_POLL: Duration = Duration::from_millis(10);
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// `max(1, available_parallelism - 1)`
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// Worker counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub threads: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

struct WorkerShared {
    queue: Arc<LoadQueue>,
    loaders: Arc<LoaderRegistry>,
    resources: Arc<CachedResourceManager>,
    events: Option<Arc<EventBus>>,
    context: LoadContext,
    stopping: AtomicBool,
    paused: AtomicBool,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerShared {
    fn run(&self) {
        while !self.stopping.load(Ordering::Acquire) {
            if self.paused.load(Ordering::Acquire) {
                std::thread::sleep(PAUSE_POLL);
                continue;
            }
            match self.queue.dequeue_next() {
                Some(request) => {
                    self.active.fetch_add(1, Ordering::AcqRel);
                    self.process(request);
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    self.queue.wait_for_work(IDLE_WAIT);
                }
            }
        }
    }

    fn process(&self, request: LoadRequest) {
        let id = request.asset.id.clone();

        #[cfg(feature = "profiling")]
        let _span = info_span!("load_asset", asset = %id, kind = %request.asset.asset_type).entered();

        match self.load_and_admit(&request) {
            Ok(resource) => {
                let size_bytes = resource.size_in_bytes();
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(asset = %id, bundle = %request.bundle_name, bytes = size_bytes, "asset loaded");
                if let Some(bus) = &self.events {
                    bus.broadcast(AssetLoadedEvent {
                        asset: id.clone(),
                        asset_type: request.asset.asset_type,
                        bundle: request.bundle_name.clone(),
                        size_bytes,
                    });
                }
                self.queue.mark_completed(&id, Some(resource), None);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let reason = err.to_string();
                tracing::warn!(asset = %id, bundle = %request.bundle_name, error = %reason, "asset load failed");
                if let Some(bus) = &self.events {
                    bus.broadcast(AssetLoadFailedEvent {
                        asset: id.clone(),
                        asset_type: request.asset.asset_type,
                        bundle: request.bundle_name.clone(),
                        reason: reason.clone(),
                    });
                }
                self.queue.mark_completed(&id, None, Some(reason));
            }
        }
    }

    fn load_and_admit(&self, request: &LoadRequest) -> Result<Arc<dyn Resource>> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.loaders.load(&request.asset, &self.context)
        }));
        let resource = match outcome {
            Ok(result) => result?,
            Err(payload) => {
                return Err(PipelineError::LoaderPanicked {
                    asset: request.asset.id.clone(),
                    reason: panic_message(&payload),
                })
            }
        };
        self.resources
            .put_resource_with_strategy(Arc::clone(&resource), request.asset.unload_strategy)?;
        Ok(resource)
    }
}

/// Fixed-size pool of loader threads
pub struct WorkerPool {
    shared: Arc<WorkerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl WorkerPool {
    pub fn new(
        thread_count: usize,
        queue: Arc<LoadQueue>,
        loaders: Arc<LoaderRegistry>,
        resources: Arc<CachedResourceManager>,
        context: LoadContext,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                queue,
                loaders,
                resources,
                events: None,
                context,
                stopping: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            threads: Mutex::new(Vec::new()),
            thread_count: thread_count.max(1),
        }
    }

    /// Publish load events on `bus`. Only effective before the pool is shared.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.events = Some(bus);
        }
        self
    }

    /// Spawn the worker threads. Starting a running pool is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            tracing::debug!("worker pool already running");
            return Ok(());
        }
        self.shared.stopping.store(false, Ordering::Release);

        for index in 0..self.thread_count {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("asset-worker-{index}"))
                .spawn(move || shared.run())
                .map_err(|e| PipelineError::Io(format!("failed to spawn worker: {e}")))?;
            threads.push(handle);
        }
        tracing::info!(threads = self.thread_count, "worker pool started");
        Ok(())
    }

    /// Signal every worker and join them. In-flight loads finish; pending
    /// requests stay in the queue.
    pub fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        if handles.is_empty() {
            return;
        }
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.queue.notify_all();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a loader");
            }
        }
        tracing::info!("worker pool stopped");
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        tracing::debug!("worker pool paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.queue.notify_all();
        tracing::debug!("worker pool resumed");
    }

    pub fn is_running(&self) -> bool {
        !self.threads.lock().is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Workers currently inside a loader
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            threads: self.threads.lock().len(),
            active: self.active_workers(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetDefinition, AssetType};
    use crate::loading::LoadStatus;
    use crate::resources::{MemoryBudget, RawResource};
    use std::time::Instant;

    fn wait_idle(queue: &LoadQueue) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !queue.is_idle() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn pool(threads: usize, loaders: LoaderRegistry) -> (WorkerPool, Arc<LoadQueue>, Arc<CachedResourceManager>) {
        let queue = Arc::new(LoadQueue::new());
        let resources = Arc::new(CachedResourceManager::new(MemoryBudget::new(1 << 20, 90)));
        let pool = WorkerPool::new(
            threads,
            queue.clone(),
            Arc::new(loaders),
            resources.clone(),
            LoadContext::headless("."),
        );
        (pool, queue, resources)
    }

    fn raw_loaders() -> LoaderRegistry {
        let loaders = LoaderRegistry::empty();
        loaders.register(AssetType::Script, |def, _| {
            if def.path == "panic" {
                panic!("loader exploded");
            }
            Ok(Arc::new(RawResource::zeroed(def.id.clone(), 64)) as Arc<dyn Resource>)
        });
        loaders
    }

    #[test]
    fn test_default_thread_count_at_least_one() {
        assert!(default_thread_count() >= 1);
    }

    #[test]
    fn test_workers_load_into_cache() {
        let (pool, queue, resources) = pool(2, raw_loaders());
        for i in 0..8 {
            queue.enqueue(
                AssetDefinition::new(AssetType::Script, format!("s{i}"), "ok"),
                "scripts",
                None,
            );
        }
        pool.start().unwrap();
        wait_idle(&queue);
        pool.stop();

        for i in 0..8 {
            let id = format!("s{i}");
            assert!(resources.is_resource_loaded(id.as_str()));
            assert_eq!(queue.status(&id.as_str().into()), LoadStatus::Completed);
        }
        assert_eq!(pool.stats().completed, 8);
        assert!(!pool.is_running());
    }

    #[test]
    fn test_missing_loader_and_panic_fail_request() {
        let (pool, queue, resources) = pool(1, raw_loaders());
        queue.enqueue(AssetDefinition::new(AssetType::Mesh, "m", "m.json"), "b", None);
        queue.enqueue(AssetDefinition::new(AssetType::Script, "p", "panic"), "b", None);
        queue.enqueue(AssetDefinition::new(AssetType::Script, "ok", "fine"), "b", None);

        pool.start().unwrap();
        wait_idle(&queue);
        pool.stop();

        assert_eq!(queue.status(&"m".into()), LoadStatus::Failed);
        assert_eq!(queue.status(&"p".into()), LoadStatus::Failed);
        assert!(queue
            .error_message(&"p".into())
            .unwrap_or_default()
            .contains("loader exploded"));
        assert_eq!(queue.status(&"ok".into()), LoadStatus::Completed);
        assert!(resources.is_resource_loaded("ok"));
        assert_eq!(pool.stats().failed, 2);
    }

    #[test]
    fn test_paused_pool_leaves_queue_untouched() {
        let (pool, queue, _resources) = pool(1, raw_loaders());
        pool.pause();
        pool.start().unwrap();
        queue.enqueue(AssetDefinition::new(AssetType::Script, "a", "ok"), "b", None);
        std::thread::sleep(Duration::from_millis(50));
        assert!(queue.is_queued(&"a".into()));
        assert!(pool.is_paused());

        pool.resume();
        wait_idle(&queue);
        assert_eq!(queue.status(&"a".into()), LoadStatus::Completed);
        pool.stop();
    }

    #[test]
    fn test_stop_leaves_pending_requests() {
        let (pool, queue, _resources) = pool(1, raw_loaders());
        pool.start().unwrap();
        pool.stop();
        queue.enqueue(AssetDefinition::new(AssetType::Script, "late", "ok"), "b", None);
        std::thread::sleep(Duration::from_millis(20));
        assert!(queue.is_queued(&"late".into()));
    }
}
