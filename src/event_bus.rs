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

//! Type-indexed publish/subscribe.
//!
//! Handlers run synchronously on the broadcasting thread. The channel lock is held
//! only while the handler list is snapshotted, so handlers may subscribe or
//! unsubscribe (themselves included) while a broadcast is in flight. Handlers added
//! during a broadcast are first invoked by the next one.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Trait for any event type carried by the bus. The routing key is the
/// event's `TypeId`.
pub trait Event: Any + Send + Sync {
    /// Event name for debugging
    fn event_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Token returned by [`EventBus::subscribe`]. Never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type ErasedHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    handler: ErasedHandler,
}

// Process-wide so that tokens from different bus instances never collide.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);
static GLOBAL_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Central event bus for pub/sub communication
pub struct EventBus {
    channels: RwLock<FxHashMap<TypeId, Vec<Subscription>>>,
    broadcast_count: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    /// Create new event bus
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(FxHashMap::default()),
            broadcast_count: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// The process-wide bus
    pub fn global() -> Arc<EventBus> {
        Arc::clone(GLOBAL_BUS.get_or_init(|| Arc::new(EventBus::new())))
    }

    /// Register `handler` for events of type `E`
    pub fn subscribe<E, F>(&self, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        let handler: ErasedHandler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });
        self.channels
            .write()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Remove a handler. Unknown tokens are logged and ignored.
    /// Returns whether a handler was removed.
    pub fn unsubscribe<E: Event>(&self, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write();
        let removed = match channels.get_mut(&TypeId::of::<E>()) {
            Some(subs) => match subs.iter().position(|s| s.id == id) {
                Some(index) => {
                    subs.remove(index);
                    true
                }
                None => false,
            },
            None => false,
        };
        drop(channels);

        if !removed {
            tracing::warn!(
                subscription = %id,
                event = std::any::type_name::<E>(),
                "unsubscribe with unknown token"
            );
        }
        removed
    }

    /// Invoke every handler registered for `E`. A panicking handler is logged and
    /// the remaining handlers still run. Returns the number of handlers invoked.
    pub fn broadcast<E: Event>(&self, event: E) -> usize {
        let snapshot: Vec<(SubscriptionId, ErasedHandler)> = {
            let channels = self.channels.read();
            match channels.get(&TypeId::of::<E>()) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler)))
                    .collect(),
                None => Vec::new(),
            }
        };
        self.broadcast_count.fetch_add(1, Ordering::Relaxed);

        for (id, handler) in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event as &dyn Any)));
            if let Err(payload) = outcome {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    subscription = %id,
                    event = event.event_name(),
                    reason = panic_message(&payload),
                    "event handler panicked"
                );
            }
        }
        snapshot.len()
    }

    /// Get subscriber count for event type
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.channels
            .read()
            .get(&TypeId::of::<E>())
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Get total subscriber count
    pub fn total_subscribers(&self) -> usize {
        self.channels.read().values().map(|subs| subs.len()).sum()
    }

    /// Get total broadcasts issued
    pub fn broadcast_count(&self) -> u64 {
        self.broadcast_count.load(Ordering::Relaxed)
    }

    /// Handlers that panicked so far
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Remove all subscribers
    pub fn clear_subscribers(&self) {
        self.channels.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.total_subscribers())
            .field("broadcasts", &self.broadcast_count())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
