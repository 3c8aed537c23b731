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
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Core trait for any cached resource.
///
/// A resource is immutable once admitted to the cache and shared through `Arc`.
/// GPU-side objects it owns are released when the last `Arc` drops.
pub trait Resource: Any + Send + Sync {
    /// Asset this resource was loaded for
    fn id(&self) -> &AssetId;

    /// Approximate size in bytes, charged against the cache budget
    fn size_in_bytes(&self) -> usize;

    /// Resource type name
    fn type_name(&self) -> &'static str;

    /// Whether the resource finished loading
    fn is_loaded(&self) -> bool {
        true
    }

    /// Downcast helper
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared handle into a type-erased one for `Arc::downcast`
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Type ID of the concrete resource
    fn resource_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }
}

/// Implements the `Any` plumbing of [`Resource`] for a concrete type.
#[macro_export]
macro_rules! resource_any_impls {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn into_any_arc(
            self: ::std::sync::Arc<Self>,
        ) -> ::std::sync::Arc<dyn ::std::any::Any + Send + Sync> {
            self
        }
    };
}

/// Downcast a shared resource to its concrete type.
///
/// The returned `Arc` shares the allocation (and the reference count) with `resource`.
pub fn downcast_resource<T: Resource>(resource: Arc<dyn Resource>) -> Option<Arc<T>> {
    resource.into_any_arc().downcast::<T>().ok()
}
