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

use crate::assets::AssetId;
use crate::resources::Resource;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Type-safe shared handle to a cached resource.
///
/// While any handle is alive the cache entry is pinned: eviction skips it.
/// A handle can outlive its cache entry (after `remove` or `clear`); the resource
/// itself stays valid until the last handle drops.
pub struct Handle<T: Resource> {
    id: AssetId,
    resource: Arc<T>,
}

impl<T: Resource> Handle<T> {
    pub(crate) fn new(id: AssetId, resource: Arc<T>) -> Self {
        Self { id, resource }
    }

    /// Asset ID this handle refers to
    pub fn id(&self) -> &AssetId {
        &self.id
    }

    /// Shared pointer to the resource
    pub fn arc(&self) -> &Arc<T> {
        &self.resource
    }

    /// Both handles point at the same cached instance
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }

    /// Owners of the resource, the cache's own reference included
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.resource)
    }
}

impl<T: Resource> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<T: Resource> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T: Resource> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("type", &self.resource.type_name())
            .field("strong_count", &Arc::strong_count(&self.resource))
            .finish()
    }
}
