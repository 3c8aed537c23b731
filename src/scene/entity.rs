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

//! Scene entity identifiers and records.

use std::any::TypeId;

use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::scene::component::{Component, ComponentSlot};
use crate::scene::transform::Transform;

new_key_type! {
    /// Unique entity identifier backed by slotmap's generational keys.
    pub struct EntityId;
}

/// Components stored inline before spilling to the heap
pub const INLINE_COMPONENTS: usize = 4;

/// One node of the scene graph
pub struct Entity {
    pub(crate) name: String,
    pub(crate) tag: Option<String>,
    pub(crate) layer: u32,
    pub(crate) active_self: bool,
    /// Spawn order, used for deterministic iteration
    pub(crate) sequence: u64,
    pub(crate) transform: Transform,
    pub(crate) parent: Option<EntityId>,
    pub(crate) children: Vec<EntityId>,
    pub(crate) components: SmallVec<[ComponentSlot; INLINE_COMPONENTS]>,
    /// World bounds must be re-indexed before the next cull
    pub(crate) spatial_dirty: bool,
}

impl Entity {
    pub(crate) fn new(name: String, sequence: u64) -> Self {
        Self {
            name,
            tag: None,
            layer: 0,
            active_self: true,
            sequence,
            transform: Transform::identity(),
            parent: None,
            children: Vec::new(),
            components: SmallVec::new(),
            spatial_dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    /// Own flag only; see `Scene::is_active` for the hierarchy-aware answer
    pub fn is_active_self(&self) -> bool {
        self.active_self
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn has_component<T: Component>(&self) -> bool {
        self.slot_index(TypeId::of::<T>()).is_some()
    }

    pub fn get_component<T: Component>(&self) -> Option<&T> {
        let index = self.slot_index(TypeId::of::<T>())?;
        self.components[index].downcast_ref::<T>()
    }

    pub fn get_component_mut<T: Component>(&mut self) -> Option<&mut T> {
        let index = self.slot_index(TypeId::of::<T>())?;
        self.components[index].downcast_mut::<T>()
    }

    pub fn is_component_enabled<T: Component>(&self) -> Option<bool> {
        let index = self.slot_index(TypeId::of::<T>())?;
        Some(self.components[index].enabled)
    }

    /// Type names of the attached components, in attach order
    pub fn component_names(&self) -> Vec<&'static str> {
        self.components
            .iter()
            .map(|slot| slot.component.type_name())
            .collect()
    }

    pub(crate) fn slot_index(&self, type_id: TypeId) -> Option<usize> {
        self.components
            .iter()
            .position(|slot| slot.type_id == type_id)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("layer", &self.layer)
            .field("active_self", &self.active_self)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("components", &self.component_names())
            .finish()
    }
}
