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

//! Priority load queue.
//!
//! Two locks: `pending` (heap + queued set) and `status` (in-flight and completed
//! maps). When both are needed they are always taken in that order.

use crate::assets::{AssetBundleConfig, AssetDefinition, AssetId};
use crate::resources::Resource;
use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a single load request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    Pending,
    Loading,
    Completed,
    Failed,
}

impl LoadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, LoadStatus::Completed | LoadStatus::Failed)
    }
}

/// Invoked once when a request finishes, outside every queue lock
pub type LoadCallback = Arc<dyn Fn(&LoadRequest) + Send + Sync>;

/// A queued descriptor of a single asset to fetch
#[derive(Clone)]
pub struct LoadRequest {
    pub asset: AssetDefinition,
    pub bundle_name: String,
    pub status: LoadStatus,
    /// Set only on the copy handed to the completion callback
    pub loaded_resource: Option<Arc<dyn Resource>>,
    pub error_message: Option<String>,
    pub on_complete: Option<LoadCallback>,
}

impl LoadRequest {
    pub fn new(asset: AssetDefinition, bundle_name: impl Into<String>) -> Self {
        Self {
            asset,
            bundle_name: bundle_name.into(),
            status: LoadStatus::Pending,
            loaded_resource: None,
            error_message: None,
            on_complete: None,
        }
    }

    pub fn id(&self) -> &AssetId {
        &self.asset.id
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("asset", &self.asset.id)
            .field("bundle", &self.bundle_name)
            .field("priority", &self.asset.priority.value())
            .field("status", &self.status)
            .field("error", &self.error_message)
            .finish()
    }
}

struct Queued {
    sequence: u64,
    request: LoadRequest,
}

impl Queued {
    fn key(&self) -> (u32, u64) {
        (self.request.asset.priority.value(), self.sequence)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap is a max-heap: the smallest (priority, sequence) must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Default)]
struct Pending {
    heap: BinaryHeap<Queued>,
    queued: AHashSet<AssetId>,
    next_sequence: u64,
}

#[derive(Default)]
struct StatusMaps {
    in_flight: AHashMap<AssetId, LoadRequest>,
    completed: AHashMap<AssetId, LoadRequest>,
}

/// Queue counters at one instant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct LoadQueue {
    pending: Mutex<Pending>,
    work_available: Condvar,
    status: Mutex<StatusMaps>,
    /// Requests removed from `in_flight` whose callback has not returned yet
    finishing: AtomicUsize,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            work_available: Condvar::new(),
            status: Mutex::new(StatusMaps::default()),
            finishing: AtomicUsize::new(0),
        }
    }

    /// Queue one asset. Ignored if it is already queued or loading.
    /// Returns whether a request was added.
    pub fn enqueue(
        &self,
        asset: AssetDefinition,
        bundle_name: &str,
        on_complete: Option<LoadCallback>,
    ) -> bool {
        let mut pending = self.pending.lock();
        if pending.queued.contains(&asset.id) {
            tracing::debug!(asset = %asset.id, "already queued, ignoring");
            return false;
        }
        {
            let mut status = self.status.lock();
            if status.in_flight.contains_key(&asset.id) {
                tracing::debug!(asset = %asset.id, "already loading, ignoring");
                return false;
            }
            status.completed.remove(&asset.id);
        }

        let sequence = pending.next_sequence;
        pending.next_sequence += 1;
        pending.queued.insert(asset.id.clone());

        let mut request = LoadRequest::new(asset, bundle_name);
        request.on_complete = on_complete;
        tracing::trace!(
            asset = %request.asset.id,
            bundle = bundle_name,
            priority = request.asset.priority.value(),
            "enqueued"
        );
        pending.heap.push(Queued { sequence, request });
        drop(pending);

        self.work_available.notify_one();
        true
    }

    /// Queue every asset of `bundle`, highest priority first.
    /// Returns the number of requests added.
    pub fn enqueue_bundle(&self, bundle: &AssetBundleConfig, on_complete: Option<LoadCallback>) -> usize {
        let mut assets: Vec<&AssetDefinition> = bundle.assets.iter().collect();
        assets.sort_by_key(|a| a.priority);
        assets
            .into_iter()
            .filter(|asset| self.enqueue((*asset).clone(), &bundle.name, on_complete.clone()))
            .count()
    }

    /// Pop the highest-priority request and mark it `Loading`
    pub fn dequeue_next(&self) -> Option<LoadRequest> {
        let mut pending = self.pending.lock();
        let Queued { mut request, .. } = pending.heap.pop()?;
        pending.queued.remove(&request.asset.id);

        request.status = LoadStatus::Loading;
        self.status
            .lock()
            .in_flight
            .insert(request.asset.id.clone(), request.clone());
        Some(request)
    }

    /// Move an in-flight request to the completed set and run its callback.
    /// Unknown IDs are logged and ignored.
    pub fn mark_completed(
        &self,
        id: &AssetId,
        resource: Option<Arc<dyn Resource>>,
        error: Option<String>,
    ) -> bool {
        let mut request = {
            let mut status = self.status.lock();
            let Some(mut request) = status.in_flight.remove(id) else {
                drop(status);
                tracing::warn!(asset = %id, "completion for a request that is not in flight");
                return false;
            };
            request.status = if resource.is_some() {
                LoadStatus::Completed
            } else {
                LoadStatus::Failed
            };
            request.error_message = match (&resource, error) {
                (None, None) => Some("loader returned no resource".to_string()),
                (_, error) => error,
            };
            // The stored record must not pin the cache entry.
            status.completed.insert(id.clone(), request.clone());
            self.finishing.fetch_add(1, AtomicOrdering::AcqRel);
            request
        };

        request.loaded_resource = resource;
        if let Some(callback) = request.on_complete.clone() {
            callback(&request);
        }
        drop(request);
        self.finishing.fetch_sub(1, AtomicOrdering::AcqRel);
        true
    }

    /// In-flight, then completed; anything else reports `Pending`
    pub fn status(&self, id: &AssetId) -> LoadStatus {
        let status = self.status.lock();
        if let Some(request) = status.in_flight.get(id) {
            return request.status;
        }
        status
            .completed
            .get(id)
            .map(|r| r.status)
            .unwrap_or(LoadStatus::Pending)
    }

    /// Error recorded for a failed request
    pub fn error_message(&self, id: &AssetId) -> Option<String> {
        self.status
            .lock()
            .completed
            .get(id)
            .and_then(|r| r.error_message.clone())
    }

    pub fn is_queued(&self, id: &AssetId) -> bool {
        self.pending.lock().queued.contains(id)
    }

    /// Queued or loading, read under both locks so a request moving between
    /// the two is never missed
    pub fn is_outstanding(&self, id: &AssetId) -> bool {
        let pending = self.pending.lock();
        if pending.queued.contains(id) {
            return true;
        }
        self.status.lock().in_flight.contains_key(id)
    }

    /// Drop a request no worker has picked up yet. Its callback never runs.
    pub fn cancel(&self, id: &AssetId) -> bool {
        let mut pending = self.pending.lock();
        if !pending.queued.remove(id) {
            return false;
        }
        pending.heap.retain(|queued| queued.request.asset.id != *id);
        tracing::trace!(asset = %id, "cancelled");
        true
    }

    /// Drop the completed record for `id`, so its status reads `Pending` again
    pub fn forget(&self, id: &AssetId) -> bool {
        self.status.lock().completed.remove(id).is_some()
    }

    /// Drop all pending, in-flight, and completed state
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        let mut status = self.status.lock();
        pending.heap.clear();
        pending.queued.clear();
        status.in_flight.clear();
        status.completed.clear();
    }

    /// Nothing pending, nothing in flight, and no completion callback running
    pub fn is_idle(&self) -> bool {
        let pending = self.pending.lock();
        let status = self.status.lock();
        pending.heap.is_empty()
            && status.in_flight.is_empty()
            && self.finishing.load(AtomicOrdering::Acquire) == 0
    }

    pub fn counts(&self) -> QueueCounts {
        let pending = self.pending.lock();
        let status = self.status.lock();
        let failed = status
            .completed
            .values()
            .filter(|r| r.status == LoadStatus::Failed)
            .count();
        QueueCounts {
            pending: pending.heap.len(),
            in_flight: status.in_flight.len(),
            completed: status.completed.len() - failed,
            failed,
        }
    }

    /// Block up to `timeout` while the queue is empty. Returns whether work is available.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.heap.is_empty() {
            let _ = self.work_available.wait_for(&mut pending, timeout);
        }
        !pending.heap.is_empty()
    }

    /// Wake every waiting worker
    pub fn notify_all(&self) {
        self.work_available.notify_all();
    }
}

impl Default for LoadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadQueue").field("counts", &self.counts()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetType;
    use crate::resources::RawResource;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn asset(id: &str, priority: u32) -> AssetDefinition {
        AssetDefinition::new(AssetType::Texture, id, format!("{id}.png")).with_priority(priority)
    }

    #[test]
    fn test_priority_order() {
        let queue = LoadQueue::new();
        queue.enqueue(asset("a", 50), "b", None);
        queue.enqueue(asset("b", 0), "b", None);
        queue.enqueue(asset("c", 25), "b", None);

        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue_next())
            .map(|r| r.asset.id.to_string())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_pop_in_enqueue_order() {
        let queue = LoadQueue::new();
        for id in ["x", "y", "z"] {
            queue.enqueue(asset(id, 10), "b", None);
        }
        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue_next())
            .map(|r| r.asset.id.to_string())
            .collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_deduplicates_queued_and_loading() {
        let queue = LoadQueue::new();
        assert!(queue.enqueue(asset("a", 1), "b", None));
        assert!(!queue.enqueue(asset("a", 1), "b", None));

        let request = queue.dequeue_next().unwrap();
        assert_eq!(queue.status(request.id()), LoadStatus::Loading);
        assert!(!queue.enqueue(asset("a", 1), "b", None));
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_cancel_removes_only_queued_requests() {
        let queue = LoadQueue::new();
        queue.enqueue(asset("a", 1), "b", None);
        queue.enqueue(asset("b", 2), "b", None);
        queue.enqueue(asset("c", 3), "b", None);

        let first = queue.dequeue_next().unwrap();
        assert!(queue.is_outstanding(first.id()));
        assert!(queue.is_outstanding(&"b".into()));
        assert!(!queue.cancel(first.id()));
        assert!(queue.cancel(&"b".into()));
        assert!(!queue.cancel(&"b".into()));
        assert!(!queue.is_queued(&"b".into()));

        let rest: Vec<String> = std::iter::from_fn(|| queue.dequeue_next())
            .map(|r| r.asset.id.to_string())
            .collect();
        assert_eq!(rest, vec!["c"]);
        assert_eq!(queue.status(first.id()), LoadStatus::Loading);
        assert!(!queue.is_outstanding(&"b".into()));
    }

    #[test]
    fn test_mark_completed_transitions_and_callback() {
        let queue = LoadQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let callback: LoadCallback = Arc::new(move |req: &LoadRequest| {
            assert!(req.loaded_resource.is_some());
            assert_eq!(req.status, LoadStatus::Completed);
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });

        queue.enqueue(asset("a", 1), "b", Some(callback));
        queue.enqueue(asset("f", 2), "b", None);
        let a = queue.dequeue_next().unwrap();
        let f = queue.dequeue_next().unwrap();

        let resource: Arc<dyn Resource> = Arc::new(RawResource::zeroed("a", 4));
        assert!(queue.mark_completed(a.id(), Some(Arc::clone(&resource)), None));
        assert!(queue.mark_completed(f.id(), None, Some("decode error".into())));

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(queue.status(a.id()), LoadStatus::Completed);
        assert_eq!(queue.status(f.id()), LoadStatus::Failed);
        assert_eq!(queue.error_message(f.id()).as_deref(), Some("decode error"));
        // the completed record holds no reference to the resource
        assert_eq!(Arc::strong_count(&resource), 1);
        assert!(queue.is_idle());

        let counts = queue.counts();
        assert_eq!((counts.completed, counts.failed), (1, 1));
    }

    #[test]
    fn test_unknown_completion_ignored() {
        let queue = LoadQueue::new();
        assert!(!queue.mark_completed(&AssetId::new("ghost"), None, None));
        assert_eq!(queue.status(&AssetId::new("ghost")), LoadStatus::Pending);
    }

    #[test]
    fn test_requeue_after_completion_resets_status() {
        let queue = LoadQueue::new();
        queue.enqueue(asset("a", 1), "b", None);
        let a = queue.dequeue_next().unwrap();
        queue.mark_completed(a.id(), None, Some("boom".into()));

        assert!(queue.enqueue(asset("a", 1), "b", None));
        assert_eq!(queue.status(a.id()), LoadStatus::Pending);
        assert!(queue.is_queued(a.id()));

        queue.clear();
        assert!(queue.is_idle());
        assert!(!queue.is_queued(a.id()));
    }

    #[test]
    fn test_enqueue_bundle_sorts_by_priority() {
        let bundle = AssetBundleConfig::new("level")
            .with_asset(asset("low", 100))
            .with_asset(asset("crit", 0))
            .with_asset(asset("mid", 50));
        let queue = LoadQueue::new();
        assert_eq!(queue.enqueue_bundle(&bundle, None), 3);

        let first = queue.dequeue_next().unwrap();
        assert_eq!(first.asset.id.as_str(), "crit");
        assert_eq!(first.bundle_name, "level");
    }

    #[test]
    fn test_wait_for_work_times_out_when_empty() {
        let queue = LoadQueue::new();
        assert!(!queue.wait_for_work(Duration::from_millis(5)));
        queue.enqueue(asset("a", 1), "b", None);
        assert!(queue.wait_for_work(Duration::from_millis(5)));
    }
}
