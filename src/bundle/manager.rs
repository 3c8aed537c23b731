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

//! Bundle manager: turns bundle names into completed cache state.
//!
//! All bundle bookkeeping sits behind one manager mutex, taken once per public
//! operation (the dependency walk runs on the already-locked state). Progress
//! notifications are computed under that lock, pushed to an outbox, and delivered
//! after it is released, in the order they were produced.
//!
//! Bundle progress counts assets resident in the cache. The manager listens for
//! cache evictions: an evicted asset's queue record is dropped, a `Loaded` bundle
//! that loses an asset falls back to `NotLoaded`, and the next `load_bundle`
//! fetches it again.

use crate::assets::{
    list_manifests, load_manifest, AssetBundleConfig, AssetId, LoadContext, LoaderRegistry,
    UnloadStrategy,
};
use crate::bundle::resolver::{depends_on, resolve_load_order};
use crate::bundle::{BundleLoadProgress, BundleLoadState, ProgressCallback};
use crate::error::{PipelineError, Result};
use crate::event_bus::EventBus;
use crate::event_types::BundleProgressEvent;
use crate::loading::{LoadCallback, LoadQueue, LoadRequest, LoadStatus, WorkerPool, WorkerStats};
use crate::resources::{CachedResourceManager, EvictionListener};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

struct BundleRecord {
    config: AssetBundleConfig,
    progress: BundleLoadProgress,
    callback: Option<ProgressCallback>,
}

#[derive(Default)]
struct ManagerState {
    bundles: AHashMap<String, BundleRecord>,
    asset_to_bundle: AHashMap<AssetId, String>,
    global_callback: Option<ProgressCallback>,
}

struct Notification {
    progress: BundleLoadProgress,
    callback: Option<ProgressCallback>,
    global: Option<ProgressCallback>,
}

struct ManagerShared {
    state: Mutex<ManagerState>,
    outbox: Mutex<VecDeque<Notification>>,
    dispatching: AtomicBool,
    queue: Arc<LoadQueue>,
    resources: Arc<CachedResourceManager>,
    events: Option<Arc<EventBus>>,
}

impl ManagerShared {
    fn dependencies<'s>(state: &'s ManagerState, name: &str) -> Option<&'s [String]> {
        state
            .bundles
            .get(name)
            .map(|record| record.config.dependencies.as_slice())
    }

    /// Resident in the cache. A completed request whose resource was evicted
    /// does not count.
    fn asset_ready(&self, id: &AssetId) -> bool {
        self.resources.is_resource_loaded(id)
    }

    /// Recount a loading bundle and apply the state transition.
    /// Returns the bundle name if it just became `Failed`.
    fn refresh(&self, state: &mut ManagerState, name: &str, out: &mut Vec<Notification>) -> Option<String> {
        let global = state.global_callback.clone();
        let record = state.bundles.get_mut(name)?;
        if record.progress.state != BundleLoadState::Loading {
            return None;
        }

        let mut loaded = 0;
        let mut outstanding = 0;
        let mut evicted = 0;
        let mut failures: Vec<String> = Vec::new();
        for asset in &record.config.assets {
            // queue first: workers admit to the cache before completing a request
            if self.queue.is_outstanding(&asset.id) {
                outstanding += 1;
            } else if self.queue.status(&asset.id) == LoadStatus::Failed {
                let reason = self
                    .queue
                    .error_message(&asset.id)
                    .unwrap_or_else(|| "unknown error".to_string());
                failures.push(format!("{}: {reason}", asset.id));
            } else if self.asset_ready(&asset.id) {
                loaded += 1;
            } else {
                // loaded, then pushed out of the cache before the bundle finished
                evicted += 1;
            }
        }

        let total = record.progress.total_assets;
        record.progress.set_loaded_count(loaded);
        let mut newly_failed = None;

        if loaded == total {
            record.progress.state = BundleLoadState::Loaded;
            record.progress.error_message = None;
            tracing::info!(bundle = name, assets = total, "bundle loaded");
        } else if failures.len() == total {
            record.progress.state = BundleLoadState::Failed;
            record.progress.error_message =
                Some(format!("all {total} assets failed; first: {}", failures[0]));
            tracing::warn!(bundle = name, "bundle failed: every asset failed to load");
            newly_failed = Some(name.to_string());
        } else if outstanding == 0 && evicted > 0 {
            record.progress.state = BundleLoadState::NotLoaded;
            record.progress.error_message = Some(format!(
                "{evicted} of {total} assets evicted before the bundle finished loading"
            ));
            tracing::warn!(bundle = name, evicted, total, "bundle does not fit the cache budget");
        } else if !failures.is_empty() {
            record.progress.error_message = Some(format!(
                "{} of {total} assets failed; first: {}",
                failures.len(),
                failures[0]
            ));
        }

        out.push(Notification {
            progress: record.progress.clone(),
            callback: record.callback.clone(),
            global,
        });
        newly_failed
    }

    /// Fail every loading bundle that depends on `failed`, transitively
    fn propagate_failure(&self, state: &mut ManagerState, failed: String, out: &mut Vec<Notification>) {
        let mut pending = vec![failed];
        while let Some(failed) = pending.pop() {
            let dependents: Vec<String> = state
                .bundles
                .iter()
                .filter(|(_, record)| record.progress.state == BundleLoadState::Loading)
                .map(|(name, _)| name.clone())
                .filter(|name| depends_on(name, &failed, |n| Self::dependencies(state, n)))
                .collect();

            let global = state.global_callback.clone();
            for name in dependents {
                if let Some(record) = state.bundles.get_mut(&name) {
                    record.progress.state = BundleLoadState::Failed;
                    record.progress.error_message =
                        Some(format!("dependency bundle '{failed}' failed"));
                    tracing::warn!(bundle = %name, dependency = %failed, "bundle failed through dependency");
                    out.push(Notification {
                        progress: record.progress.clone(),
                        callback: record.callback.clone(),
                        global: global.clone(),
                    });
                }
                pending.push(name);
            }
        }
    }

    /// Recount a bundle after some of its assets left the cache. `Loaded` falls
    /// back to `NotLoaded`, a loading bundle is refreshed, and `NotLoaded` and
    /// `Failed` keep their state and error message.
    fn on_assets_removed(&self, state: &mut ManagerState, name: &str, out: &mut Vec<Notification>) {
        let current = match state.bundles.get(name) {
            Some(record) => record.progress.state,
            None => return,
        };
        if current == BundleLoadState::Loading {
            if let Some(failed) = self.refresh(state, name, out) {
                self.propagate_failure(state, failed, out);
            }
            return;
        }

        let global = state.global_callback.clone();
        let Some(record) = state.bundles.get_mut(name) else {
            return;
        };
        let loaded = record
            .config
            .assets
            .iter()
            .filter(|asset| self.asset_ready(&asset.id))
            .count();
        record.progress.set_loaded_count(loaded);
        if current == BundleLoadState::Loaded {
            record.progress.state = BundleLoadState::NotLoaded;
            tracing::info!(bundle = name, loaded, total = record.progress.total_assets, "bundle no longer resident");
            out.push(Notification {
                progress: record.progress.clone(),
                callback: record.callback.clone(),
                global,
            });
        }
    }

    fn on_assets_evicted(&self, evicted: &[AssetId]) {
        let mut produced = Vec::new();
        {
            let mut state = self.state.lock();
            let mut touched: Vec<String> = Vec::new();
            for id in evicted {
                self.queue.forget(id);
                if let Some(name) = state.asset_to_bundle.get(id) {
                    if !touched.contains(name) {
                        touched.push(name.clone());
                    }
                }
            }
            for name in &touched {
                self.on_assets_removed(&mut state, name, &mut produced);
            }
            self.outbox.lock().extend(produced);
        }
        self.dispatch();
    }

    fn on_asset_completed(&self, request: &LoadRequest) {
        let mut produced = Vec::new();
        {
            let mut state = self.state.lock();
            let name = state
                .asset_to_bundle
                .get(request.id())
                .cloned()
                .unwrap_or_else(|| request.bundle_name.clone());

            let unloaded = state
                .bundles
                .get(&name)
                .is_some_and(|record| record.progress.state == BundleLoadState::NotLoaded);
            if unloaded {
                // the bundle was unloaded while this request was in flight
                if request.status == LoadStatus::Completed {
                    self.resources.unload_resource(request.id());
                }
                self.queue.forget(request.id());
                tracing::debug!(asset = %request.id(), bundle = %name, "discarded completion for unloaded bundle");
                return;
            }

            if let Some(failed) = self.refresh(&mut state, &name, &mut produced) {
                self.propagate_failure(&mut state, failed, &mut produced);
            }
            self.outbox.lock().extend(produced);
        }
        self.dispatch();
    }

    /// Deliver queued notifications. Only one thread delivers at a time;
    /// notifications produced meanwhile (callbacks included) are picked up by it.
    fn dispatch(&self) {
        loop {
            if self
                .dispatching
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                let next = self.outbox.lock().pop_front();
                let Some(notification) = next else {
                    break;
                };
                self.deliver(notification);
            }
            self.dispatching.store(false, Ordering::Release);
            if self.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, notification: Notification) {
        let Notification {
            progress,
            callback,
            global,
        } = notification;
        if let Some(callback) = callback {
            callback(&progress);
        }
        if let Some(global) = global {
            global(&progress);
        }
        if let Some(bus) = &self.events {
            bus.broadcast(BundleProgressEvent { progress });
        }
    }

    fn is_quiet(&self) -> bool {
        self.queue.is_idle()
            && self.outbox.lock().is_empty()
            && !self.dispatching.load(Ordering::Acquire)
    }
}

/// User-facing entry point of the loading pipeline
pub struct BundleManager {
    shared: Arc<ManagerShared>,
    workers: WorkerPool,
}

impl BundleManager {
    pub fn new(
        resources: Arc<CachedResourceManager>,
        loaders: Arc<LoaderRegistry>,
        context: LoadContext,
        worker_threads: usize,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        let queue = Arc::new(LoadQueue::new());
        let mut workers = WorkerPool::new(
            worker_threads,
            Arc::clone(&queue),
            loaders,
            Arc::clone(&resources),
            context,
        );
        if let Some(bus) = &events {
            workers = workers.with_event_bus(Arc::clone(bus));
        }
        let shared = Arc::new(ManagerShared {
            state: Mutex::new(ManagerState::default()),
            outbox: Mutex::new(VecDeque::new()),
            dispatching: AtomicBool::new(false),
            queue,
            resources,
            events,
        });

        let weak: Weak<ManagerShared> = Arc::downgrade(&shared);
        let listener: EvictionListener = Arc::new(move |evicted: &[AssetId]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_assets_evicted(evicted);
            }
        });
        shared.resources.set_eviction_listener(Some(listener));

        Self { shared, workers }
    }

    /// Read, validate and register every manifest in `directory`.
    /// Invalid manifests are logged and skipped. Returns the number registered.
    pub fn initialize(&self, directory: impl AsRef<Path>) -> Result<usize> {
        let directory = directory.as_ref();
        let files = list_manifests(directory).map_err(|e| PipelineError::Manifest {
            path: directory.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut registered = 0;
        for file in files {
            let outcome = load_manifest(&file).and_then(|config| self.register_bundle(config));
            match outcome {
                Ok(()) => registered += 1,
                Err(err) => tracing::warn!(file = %file.display(), error = %err, "skipping manifest"),
            }
        }

        if registered == 0 {
            tracing::error!(directory = %directory.display(), "no valid bundle manifests");
            return Err(PipelineError::NoBundlesFound(directory.to_path_buf()));
        }
        tracing::info!(bundles = registered, directory = %directory.display(), "bundle manager initialized");
        Ok(registered)
    }

    /// Register one bundle. Rejects invalid manifests, duplicate names and asset
    /// IDs already owned by another bundle.
    pub fn register_bundle(&self, config: AssetBundleConfig) -> Result<()> {
        let manifest_error = |reason: String| PipelineError::Manifest {
            path: config.bundle_file_path.clone(),
            reason,
        };
        config.validate()?;

        let mut state = self.shared.state.lock();
        if state.bundles.contains_key(&config.name) {
            return Err(manifest_error(format!("bundle '{}' already registered", config.name)));
        }
        if let Some((id, owner)) = config
            .asset_ids()
            .find_map(|id| state.asset_to_bundle.get(id).map(|owner| (id, owner)))
        {
            return Err(manifest_error(format!("asset '{id}' already belongs to bundle '{owner}'")));
        }

        for id in config.asset_ids() {
            state.asset_to_bundle.insert(id.clone(), config.name.clone());
        }
        tracing::debug!(bundle = %config.name, assets = config.total_assets(), "registered bundle");
        let progress = BundleLoadProgress::new(config.name.clone(), config.total_assets());
        state.bundles.insert(
            config.name.clone(),
            BundleRecord {
                config,
                progress,
                callback: None,
            },
        );
        Ok(())
    }

    /// Dependency order `name` would load in
    pub fn load_order(&self, name: &str) -> Result<Vec<String>> {
        let state = self.shared.state.lock();
        resolve_load_order(name, |n| ManagerShared::dependencies(&state, n))
    }

    /// Resolve dependencies and enqueue every asset not already loaded.
    /// Bundles already `Loaded` are skipped. Nothing is enqueued on a
    /// dependency error.
    pub fn load_bundle(&self, name: &str, on_progress: Option<ProgressCallback>) -> Result<()> {
        let shared = &self.shared;
        let mut produced = Vec::new();
        {
            let mut state = shared.state.lock();
            let order = resolve_load_order(name, |n| ManagerShared::dependencies(&state, n))
                .map_err(|err| {
                    tracing::error!(bundle = name, error = %err, "cannot load bundle");
                    err
                })?;

            let weak: Weak<ManagerShared> = Arc::downgrade(shared);
            let on_complete: LoadCallback = Arc::new(move |request: &LoadRequest| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_asset_completed(request);
                }
            });

            for bundle in &order {
                let Some(record) = state.bundles.get_mut(bundle) else {
                    continue;
                };
                if bundle == name {
                    if let Some(callback) = &on_progress {
                        record.callback = Some(Arc::clone(callback));
                    }
                }
                if record.progress.state == BundleLoadState::Loaded {
                    tracing::debug!(bundle = %bundle, "already loaded, skipping");
                    continue;
                }

                record.progress.state = BundleLoadState::Loading;
                record.progress.error_message = None;

                let manual_bundle = record.config.unload_strategy == UnloadStrategy::Manual;
                let mut assets: Vec<_> = record.config.assets.iter().collect();
                assets.sort_by_key(|asset| asset.priority);
                let mut enqueued = 0;
                for asset in assets {
                    if shared.asset_ready(&asset.id) {
                        continue;
                    }
                    let mut asset = asset.clone();
                    if manual_bundle {
                        asset.unload_strategy = UnloadStrategy::Manual;
                    }
                    if shared.queue.enqueue(asset, bundle, Some(Arc::clone(&on_complete))) {
                        enqueued += 1;
                    }
                }
                tracing::info!(bundle = %bundle, enqueued, total = record.progress.total_assets, "loading bundle");

                if let Some(failed) = shared.refresh(&mut state, bundle, &mut produced) {
                    shared.propagate_failure(&mut state, failed, &mut produced);
                }
            }
            shared.outbox.lock().extend(produced);
        }
        shared.dispatch();
        Ok(())
    }

    /// Remove a `Manual` bundle's assets from the cache and reset it to `NotLoaded`.
    /// Queued requests are cancelled; completions still in flight are discarded.
    pub fn unload_bundle(&self, name: &str) -> Result<()> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            let global = state.global_callback.clone();
            let record = state
                .bundles
                .get_mut(name)
                .ok_or_else(|| PipelineError::UnknownBundle(name.to_string()))?;
            if record.config.unload_strategy != UnloadStrategy::Manual {
                tracing::warn!(bundle = name, "unload refused: bundle is not manual");
                return Err(PipelineError::UnloadNotPermitted(name.to_string()));
            }

            let mut removed = 0;
            for asset in &record.config.assets {
                shared.queue.cancel(&asset.id);
                if shared.resources.unload_resource(&asset.id) {
                    removed += 1;
                }
                shared.queue.forget(&asset.id);
            }
            record.progress = BundleLoadProgress::new(name, record.config.total_assets());
            record.callback = None;
            tracing::info!(bundle = name, removed, "bundle unloaded");

            shared.outbox.lock().push_back(Notification {
                progress: record.progress.clone(),
                callback: None,
                global,
            });
        }
        shared.dispatch();
        Ok(())
    }

    /// `load_bundle` every auto-load bundle, by bundle priority then name.
    /// Returns how many were started.
    pub fn load_all_auto_load_bundles(&self) -> usize {
        let mut names: Vec<(u32, String)> = {
            let state = self.shared.state.lock();
            state
                .bundles
                .values()
                .filter(|record| record.config.auto_load)
                .map(|record| (record.config.priority.value(), record.config.name.clone()))
                .collect()
        };
        names.sort();

        names
            .into_iter()
            .filter(|(_, name)| match self.load_bundle(name, None) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(bundle = %name, error = %err, "auto-load failed");
                    false
                }
            })
            .count()
    }

    pub fn start_async_loading(&self) -> Result<()> {
        self.workers.start()
    }

    pub fn stop_async_loading(&self) {
        self.workers.stop();
    }

    pub fn pause(&self) {
        self.workers.pause();
    }

    pub fn resume(&self) {
        self.workers.resume();
    }

    pub fn is_bundle_loaded(&self, name: &str) -> bool {
        self.get_bundle_state(name) == Some(BundleLoadState::Loaded)
    }

    pub fn get_bundle_state(&self, name: &str) -> Option<BundleLoadState> {
        self.shared
            .state
            .lock()
            .bundles
            .get(name)
            .map(|record| record.progress.state)
    }

    pub fn get_bundle_progress(&self, name: &str) -> Option<BundleLoadProgress> {
        self.shared
            .state
            .lock()
            .bundles
            .get(name)
            .map(|record| record.progress.clone())
    }

    /// Names of `Loaded` bundles, sorted
    pub fn get_loaded_bundles(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut names: Vec<String> = state
            .bundles
            .values()
            .filter(|record| record.progress.state == BundleLoadState::Loaded)
            .map(|record| record.config.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every registered bundle name, sorted
    pub fn get_available_bundles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.state.lock().bundles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bundle_config(&self, name: &str) -> Option<AssetBundleConfig> {
        self.shared
            .state
            .lock()
            .bundles
            .get(name)
            .map(|record| record.config.clone())
    }

    pub fn bundle_for_asset(&self, id: impl Into<AssetId>) -> Option<String> {
        self.shared.state.lock().asset_to_bundle.get(&id.into()).cloned()
    }

    /// Resident in the cache right now
    pub fn is_asset_loaded(&self, id: impl Into<AssetId>) -> bool {
        self.shared.resources.is_resource_loaded(id)
    }

    pub fn asset_status(&self, id: impl Into<AssetId>) -> LoadStatus {
        self.shared.queue.status(&id.into())
    }

    /// Drop unreferenced assets of every `Automatic` bundle from the cache.
    /// `Loaded` bundles that lose an asset go back to `NotLoaded` and notify;
    /// `Failed` bundles keep their state. Returns the number removed.
    pub fn unload_unused_assets(&self) -> usize {
        let shared = &self.shared;
        let mut removed = 0;
        {
            let mut state = shared.state.lock();
            let mut touched: Vec<String> = Vec::new();
            for record in state.bundles.values() {
                if record.config.unload_strategy != UnloadStrategy::Automatic {
                    continue;
                }
                let mut hit = false;
                for asset in &record.config.assets {
                    if asset.unload_strategy != UnloadStrategy::Automatic {
                        continue;
                    }
                    if shared.resources.remove_if_unreferenced(&asset.id) {
                        shared.queue.forget(&asset.id);
                        removed += 1;
                        hit = true;
                    }
                }
                if hit {
                    touched.push(record.config.name.clone());
                }
            }

            let mut produced = Vec::new();
            for name in &touched {
                shared.on_assets_removed(&mut state, name, &mut produced);
            }
            shared.outbox.lock().extend(produced);
        }
        shared.dispatch();
        tracing::info!(removed, "unloaded unused assets");
        removed
    }

    /// Observer for every bundle's progress, alongside per-bundle callbacks
    pub fn set_global_progress_callback(&self, callback: Option<ProgressCallback>) {
        self.shared.state.lock().global_callback = callback;
    }

    /// Block until nothing is queued, in flight, or waiting for delivery.
    /// Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.is_quiet() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.workers.stats()
    }

    pub fn is_loading_active(&self) -> bool {
        self.workers.is_running() && !self.workers.is_paused()
    }

    pub fn queue(&self) -> &Arc<LoadQueue> {
        &self.shared.queue
    }

    pub fn resources(&self) -> &Arc<CachedResourceManager> {
        &self.shared.resources
    }

    /// Stop the workers, then clear the queue
    pub fn shutdown(&self) {
        self.workers.stop();
        self.shared.queue.clear();
        tracing::debug!("bundle manager shut down");
    }
}

impl Drop for BundleManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetDefinition, AssetType};
    use crate::resources::{MemoryBudget, RawResource, Resource};
    use std::sync::Barrier;

    fn manager() -> BundleManager {
        manager_with_budget(MemoryBudget::new(1 << 20, 90))
    }

    fn manager_with_budget(budget: MemoryBudget) -> BundleManager {
        let loaders = LoaderRegistry::empty();
        loaders.register(AssetType::Script, |def, _| {
            if def.path.starts_with("fail") {
                return Err(PipelineError::Loader {
                    asset: def.id.clone(),
                    reason: "forced failure".into(),
                });
            }
            Ok(Arc::new(RawResource::zeroed(def.id.clone(), 32)) as Arc<dyn Resource>)
        });
        BundleManager::new(
            Arc::new(CachedResourceManager::new(budget)),
            Arc::new(loaders),
            LoadContext::headless("."),
            1,
            None,
        )
    }

    fn bundle(name: &str, assets: &[&str]) -> AssetBundleConfig {
        assets.iter().fold(AssetBundleConfig::new(name), |b, id| {
            b.with_asset(AssetDefinition::new(AssetType::Script, *id, *id))
        })
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let m = manager();
        m.register_bundle(bundle("core", &["a"])).unwrap();
        assert!(m.register_bundle(bundle("core", &["b"])).is_err());
        assert!(m.register_bundle(bundle("other", &["a"])).is_err());
        assert_eq!(m.get_available_bundles(), vec!["core"]);
        assert_eq!(m.bundle_for_asset("a").as_deref(), Some("core"));
    }

    #[test]
    fn test_load_bundle_reaches_loaded() {
        let m = manager();
        m.register_bundle(bundle("core", &["a", "b"])).unwrap();
        m.start_async_loading().unwrap();
        m.load_bundle("core", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));

        assert!(m.is_bundle_loaded("core"));
        let progress = m.get_bundle_progress("core").unwrap();
        assert_eq!(progress.assets_loaded, 2);
        assert_eq!(progress.progress, 1.0);
        assert_eq!(m.get_loaded_bundles(), vec!["core"]);
    }

    fn recorder() -> (Arc<Mutex<Vec<BundleLoadProgress>>>, ProgressCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |progress: &BundleLoadProgress| {
            sink.lock().push(progress.clone());
        });
        (seen, callback)
    }

    fn states_of(seen: &[BundleLoadProgress], bundle: &str) -> Vec<BundleLoadState> {
        seen.iter()
            .filter(|p| p.bundle_name == bundle)
            .map(|p| p.state)
            .collect()
    }

    #[test]
    fn test_partial_failure_keeps_loading_with_message() {
        let m = manager();
        m.register_bundle(bundle("mixed", &["ok", "fail_one"])).unwrap();
        m.start_async_loading().unwrap();
        let (seen, callback) = recorder();
        m.load_bundle("mixed", Some(callback)).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));

        let progress = m.get_bundle_progress("mixed").unwrap();
        assert_eq!(progress.state, BundleLoadState::Loading);
        assert_eq!(progress.assets_loaded, 1);
        assert!(progress.error_message.clone().unwrap().contains("fail_one"));

        // observers never see a terminal state; the last report carries the error
        let seen = seen.lock();
        assert!(states_of(&seen, "mixed")
            .iter()
            .all(|state| *state == BundleLoadState::Loading));
        let last = seen.last().unwrap();
        assert_eq!(last.assets_loaded, 1);
        assert_eq!(last.error_message, progress.error_message);
    }

    #[test]
    fn test_dependency_failure_propagates() {
        let m = manager();
        m.register_bundle(bundle("base", &["fail_base"])).unwrap();
        m.register_bundle(bundle("level", &["fail_level", "level_ok"]).with_dependency("base"))
            .unwrap();
        m.pause();
        m.start_async_loading().unwrap();
        m.load_bundle("level", None).unwrap();
        m.resume();
        assert!(m.wait_until_idle(Duration::from_secs(5)));

        assert_eq!(m.get_bundle_state("base"), Some(BundleLoadState::Failed));
        assert_eq!(m.get_bundle_state("level"), Some(BundleLoadState::Failed));
    }

    #[test]
    fn test_unload_requires_manual() {
        let m = manager();
        m.register_bundle(bundle("auto", &["a"])).unwrap();
        m.register_bundle(bundle("manual", &["m"]).with_unload_strategy(UnloadStrategy::Manual))
            .unwrap();
        assert!(matches!(
            m.unload_bundle("auto"),
            Err(PipelineError::UnloadNotPermitted(_))
        ));
        assert!(matches!(
            m.unload_bundle("ghost"),
            Err(PipelineError::UnknownBundle(_))
        ));

        m.start_async_loading().unwrap();
        m.load_bundle("manual", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));
        assert!(m.is_asset_loaded("m"));

        m.unload_bundle("manual").unwrap();
        assert!(!m.is_asset_loaded("m"));
        assert_eq!(m.get_bundle_state("manual"), Some(BundleLoadState::NotLoaded));
        assert_eq!(m.asset_status("m"), LoadStatus::Pending);
    }

    #[test]
    fn test_unload_unused_assets_resets_automatic_bundles() {
        let m = manager();
        m.register_bundle(bundle("auto", &["a", "b"])).unwrap();
        m.register_bundle(bundle("base", &["fail_base"])).unwrap();
        m.register_bundle(bundle("level", &["fail_level", "level_ok"]).with_dependency("base"))
            .unwrap();
        let (seen, callback) = recorder();
        m.set_global_progress_callback(Some(callback));

        m.pause();
        m.start_async_loading().unwrap();
        m.load_bundle("level", None).unwrap();
        m.load_bundle("auto", None).unwrap();
        m.resume();
        assert!(m.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(m.get_bundle_state("level"), Some(BundleLoadState::Failed));
        assert!(m.is_asset_loaded("level_ok"));

        let held = m.resources().get_resource::<RawResource>("a").unwrap();
        seen.lock().clear();
        assert_eq!(m.unload_unused_assets(), 2);
        assert!(m.is_asset_loaded("a"));
        assert!(!m.is_asset_loaded("b"));
        assert!(!m.is_asset_loaded("level_ok"));

        assert_eq!(m.get_bundle_state("auto"), Some(BundleLoadState::NotLoaded));
        let level = m.get_bundle_progress("level").unwrap();
        assert_eq!(level.state, BundleLoadState::Failed);
        assert!(level.error_message.unwrap().contains("base"));
        assert_eq!(level.assets_loaded, 0);

        let seen = seen.lock();
        assert_eq!(states_of(&seen, "auto"), vec![BundleLoadState::NotLoaded]);
        assert_eq!(seen.last().map(|p| p.assets_loaded), Some(1));
        assert!(states_of(&seen, "level").is_empty());
        drop(held);
    }

    #[test]
    fn test_manual_assets_survive_automatic_pressure() {
        let m = manager_with_budget(MemoryBudget::new(100, 100));
        m.register_bundle(bundle("manual", &["m"]).with_unload_strategy(UnloadStrategy::Manual))
            .unwrap();
        m.register_bundle(bundle("auto", &["a", "b", "c"])).unwrap();
        m.start_async_loading().unwrap();

        m.load_bundle("manual", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));
        m.load_bundle("auto", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));

        assert!(m.is_asset_loaded("m"));
        assert!(m.is_bundle_loaded("manual"));
        assert!(!m.is_asset_loaded("a"));
        assert!(m.is_asset_loaded("b") && m.is_asset_loaded("c"));

        // 128 bytes of assets against a 100 byte budget: "auto" cannot stay resident
        let auto = m.get_bundle_progress("auto").unwrap();
        assert_eq!(auto.state, BundleLoadState::NotLoaded);
        assert_eq!(auto.assets_loaded, 2);
        assert!(auto.error_message.unwrap().contains("evicted"));
    }

    #[test]
    fn test_evicted_asset_is_reloaded() {
        let m = manager_with_budget(MemoryBudget::new(64, 100));
        m.register_bundle(bundle("auto", &["a", "b"])).unwrap();
        m.register_bundle(bundle("other", &["c"])).unwrap();
        let (seen, callback) = recorder();
        m.set_global_progress_callback(Some(callback));
        m.start_async_loading().unwrap();

        m.load_bundle("auto", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));
        assert!(m.is_bundle_loaded("auto"));
        let pinned = m.resources().get_resource::<RawResource>("b").unwrap();

        // "c" pushes out "a", the only unpinned entry
        m.load_bundle("other", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));
        assert!(!m.is_asset_loaded("a"));
        assert_eq!(m.asset_status("a"), LoadStatus::Pending);
        assert_eq!(m.get_bundle_state("auto"), Some(BundleLoadState::NotLoaded));
        assert_eq!(m.get_bundle_progress("auto").unwrap().assets_loaded, 1);
        assert!(m.is_bundle_loaded("other"));
        assert_eq!(
            states_of(&seen.lock(), "auto").last(),
            Some(&BundleLoadState::NotLoaded)
        );

        // loading again fetches "a", which in turn pushes out "c"
        m.load_bundle("auto", None).unwrap();
        assert!(m.wait_until_idle(Duration::from_secs(5)));
        assert!(m.is_asset_loaded("a"));
        assert_eq!(m.asset_status("a"), LoadStatus::Completed);
        assert!(m.is_bundle_loaded("auto"));
        assert_eq!(m.get_bundle_state("other"), Some(BundleLoadState::NotLoaded));
        assert_eq!(m.asset_status("c"), LoadStatus::Pending);
        drop(pinned);
    }

    #[test]
    fn test_unload_discards_in_flight_completion() {
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let loaders = LoaderRegistry::empty();
        let (e, r) = (Arc::clone(&entered), Arc::clone(&release));
        loaders.register(AssetType::Script, move |def, _| {
            if def.path == "slow" {
                e.wait();
                r.wait();
            }
            Ok(Arc::new(RawResource::zeroed(def.id.clone(), 32)) as Arc<dyn Resource>)
        });
        let m = BundleManager::new(
            Arc::new(CachedResourceManager::new(MemoryBudget::new(1 << 20, 90))),
            Arc::new(loaders),
            LoadContext::headless("."),
            1,
            None,
        );
        m.register_bundle(
            AssetBundleConfig::new("cutscene")
                .with_unload_strategy(UnloadStrategy::Manual)
                .with_asset(AssetDefinition::new(AssetType::Script, "intro", "slow"))
                .with_asset(AssetDefinition::new(AssetType::Script, "outro", "fast")),
        )
        .unwrap();

        m.start_async_loading().unwrap();
        m.load_bundle("cutscene", None).unwrap();
        entered.wait();
        m.unload_bundle("cutscene").unwrap();
        assert!(!m.queue().is_queued(&"outro".into()));
        release.wait();
        assert!(m.wait_until_idle(Duration::from_secs(5)));

        assert!(!m.is_asset_loaded("intro"));
        assert!(!m.is_asset_loaded("outro"));
        assert_eq!(m.get_bundle_state("cutscene"), Some(BundleLoadState::NotLoaded));
        assert_eq!(m.asset_status("intro"), LoadStatus::Pending);
        assert_eq!(m.worker_stats().completed, 1);
    }
}
