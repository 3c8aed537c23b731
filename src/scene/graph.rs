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

//! Scene graph: entity hierarchy, component lifecycle and per-frame passes.
//!
//! Frame order: [`Scene::update`] → [`Scene::late_update`] →
//! [`Scene::prepare_render`] → [`Scene::execute_rendering`].
//! [`Scene::advance_fixed`] drives `on_fixed_update` from its own clock.
//!
//! Structural changes requested from inside hooks are queued and applied once
//! the pass that issued them finishes.

use std::any::TypeId;
use std::time::Duration;

use slotmap::SlotMap;

use crate::config::OctreeConfig;
use crate::error::{PipelineError, Result};
use crate::math::{Aabb, Frustum, Mat4, Quat, Ray, Sphere, Vec3};
use crate::resources::CachedResourceManager;
use crate::scene::component::{
    Component, ComponentContext, ComponentSlot, SceneCommand, SceneCommands, SceneMessage,
};
use crate::scene::entity::{Entity, EntityId};
use crate::scene::octree::{Octree, OctreeStats};
use crate::scene::render::{self, RenderItem, RenderQueues, RenderStats, Renderer};
use crate::scene::transform::Transform;
use crate::time::FixedTime;

/// Half-extent of the default octree root
pub const DEFAULT_WORLD_HALF_EXTENT: f32 = 1024.0;

/// Command rounds applied per settle before the rest waits for the next pass
const MAX_SETTLE_ROUNDS: usize = 16;

enum Hook<'m> {
    Awake,
    Start,
    Enable,
    Disable,
    Update(f32),
    LateUpdate(f32),
    FixedUpdate(f32),
    TransformChanged,
    Destroy,
    Message(&'m SceneMessage),
}

fn invoke(
    id: EntityId,
    entity: &mut Entity,
    index: usize,
    hook: &Hook<'_>,
    commands: &mut SceneCommands,
) {
    let Entity {
        components,
        transform,
        ..
    } = entity;
    let Some(slot) = components.get_mut(index) else {
        return;
    };
    let mut ctx = ComponentContext::new(id, transform, commands);
    let component = slot.component.as_mut();
    match hook {
        Hook::Awake => component.on_awake(&mut ctx),
        Hook::Start => component.on_start(&mut ctx),
        Hook::Enable => component.on_enable(&mut ctx),
        Hook::Disable => component.on_disable(&mut ctx),
        Hook::Update(dt) => component.on_update(&mut ctx, *dt),
        Hook::LateUpdate(dt) => component.on_late_update(&mut ctx, *dt),
        Hook::FixedUpdate(dt) => component.on_fixed_update(&mut ctx, *dt),
        Hook::TransformChanged => component.on_transform_changed(&mut ctx),
        Hook::Destroy => component.on_destroy(&mut ctx),
        Hook::Message(message) => component.on_message(&mut ctx, message),
    }
}

/// Counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub entities: usize,
    pub indexed_renderables: usize,
    pub visible_last_frame: usize,
    pub octree: OctreeStats,
}

/// Hierarchical entity container with spatial culling
pub struct Scene {
    name: String,
    entities: SlotMap<EntityId, Entity>,
    /// Spawn order
    order: Vec<EntityId>,
    next_sequence: u64,
    octree: Octree,
    queues: RenderQueues,
    last_camera_position: Vec3,
    fixed_time: FixedTime,
    commands: SceneCommands,
    settling: bool,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        let world = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(DEFAULT_WORLD_HALF_EXTENT));
        Self::with_octree(name, world, OctreeConfig::default())
    }

    pub fn with_octree(name: impl Into<String>, world_bounds: Aabb, config: OctreeConfig) -> Self {
        Self {
            name: name.into(),
            entities: SlotMap::with_key(),
            order: Vec::new(),
            next_sequence: 0,
            octree: Octree::new(world_bounds, config),
            queues: RenderQueues::new(),
            last_camera_position: Vec3::ZERO,
            fixed_time: FixedTime::default(),
            commands: SceneCommands::new(),
            settling: false,
        }
    }

    /// Fixed-step rate for `on_fixed_update`
    pub fn with_fixed_rate(mut self, hz: u32) -> Self {
        self.fixed_time = FixedTime::new(hz);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // ---- entities -------------------------------------------------------

    pub fn spawn(&mut self, name: impl Into<String>) -> EntityId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = self.entities.insert(Entity::new(name.into(), sequence));
        self.order.push(id);
        id
    }

    pub fn spawn_child(&mut self, parent: EntityId, name: impl Into<String>) -> Result<EntityId> {
        if !self.entities.contains_key(parent) {
            return Err(unknown_entity(parent));
        }
        let id = self.spawn(name);
        self.set_parent(id, Some(parent))?;
        Ok(id)
    }

    /// Destroy an entity and all of its descendants.
    ///
    /// Live components get `on_disable` then `on_destroy`; disabled ones only
    /// `on_destroy`.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        let destroyed = self.destroy_internal(id);
        self.settle();
        destroyed
    }

    /// Destroy every entity
    pub fn clear(&mut self) {
        let roots: Vec<EntityId> = self.root_entities();
        for root in roots {
            self.destroy_internal(root);
        }
        self.settle();
        self.octree.clear();
        self.queues.clear();
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity IDs in spawn order
    pub fn entity_ids(&self) -> &[EntityId] {
        &self.order
    }

    pub fn root_entities(&self) -> Vec<EntityId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.entities.get(*id).is_some_and(|e| e.parent.is_none()))
            .collect()
    }

    pub fn set_entity_name(&mut self, id: EntityId, name: impl Into<String>) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_tag(&mut self, id: EntityId, tag: Option<&str>) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.tag = tag.map(str::to_string);
                true
            }
            None => false,
        }
    }

    pub fn set_layer(&mut self, id: EntityId, layer: u32) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.layer = layer;
                true
            }
            None => false,
        }
    }

    /// First entity (in spawn order) with this name
    pub fn find_by_name(&self, name: &str) -> Option<EntityId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.entities.get(*id).is_some_and(|e| e.name == name))
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<EntityId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.has_tag(*id, tag))
    }

    pub fn find_all_by_tag(&self, tag: &str) -> Vec<EntityId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.has_tag(*id, tag))
            .collect()
    }

    fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        self.entities
            .get(id)
            .is_some_and(|e| e.tag.as_deref() == Some(tag))
    }

    // ---- hierarchy ------------------------------------------------------

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.entities.get(id)?.parent
    }

    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.entities
            .get(id)
            .map_or(&[][..], |e| e.children.as_slice())
    }

    /// `ancestor` is `id` itself or one of its parents
    pub fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.entities.get(node).and_then(|e| e.parent);
        }
        false
    }

    /// Re-parent `child`, keeping its local transform
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<()> {
        let Some(entity) = self.entities.get(child) else {
            return Err(unknown_entity(child));
        };
        let old_parent = entity.parent;
        if old_parent == parent {
            return Ok(());
        }
        if let Some(new_parent) = parent {
            if !self.entities.contains_key(new_parent) {
                return Err(unknown_entity(new_parent));
            }
            if self.is_ancestor(child, new_parent) {
                return Err(PipelineError::Scene(format!(
                    "parenting '{}' under its own descendant would create a cycle",
                    entity.name
                )));
            }
        }

        let subtree = self.collect_subtree(child);
        let was_active: Vec<bool> = subtree.iter().map(|id| self.is_active(*id)).collect();

        if let Some(old_parent) = old_parent {
            if let Some(old) = self.entities.get_mut(old_parent) {
                old.children.retain(|c| *c != child);
            }
        }
        if let Some(new_parent) = parent {
            if let Some(new) = self.entities.get_mut(new_parent) {
                new.children.push(child);
            }
        }
        if let Some(entity) = self.entities.get_mut(child) {
            entity.parent = parent;
        }

        self.apply_activity_changes(&subtree, &was_active);
        self.propagate_transform_change(child);
        self.settle();
        Ok(())
    }

    /// `id` and every descendant, parents before children
    fn collect_subtree(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(entity) = self.entities.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(entity.children.iter().rev().copied());
        }
        out
    }

    // ---- activity -------------------------------------------------------

    /// Active itself and every ancestor active
    pub fn is_active(&self, id: EntityId) -> bool {
        let mut current = Some(id);
        let mut seen = false;
        while let Some(node) = current {
            let Some(entity) = self.entities.get(node) else {
                return false;
            };
            if !entity.active_self {
                return false;
            }
            seen = true;
            current = entity.parent;
        }
        seen
    }

    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        let changed = self.set_active_internal(id, active);
        self.settle();
        changed
    }

    fn set_active_internal(&mut self, id: EntityId, active: bool) -> bool {
        let Some(entity) = self.entities.get(id) else {
            return false;
        };
        if entity.active_self == active {
            return false;
        }
        let subtree = self.collect_subtree(id);
        let was_active: Vec<bool> = subtree.iter().map(|e| self.is_active(*e)).collect();
        if let Some(entity) = self.entities.get_mut(id) {
            entity.active_self = active;
        }
        self.apply_activity_changes(&subtree, &was_active);
        true
    }

    fn apply_activity_changes(&mut self, subtree: &[EntityId], was_active: &[bool]) {
        for (id, was) in subtree.iter().zip(was_active) {
            let now = self.is_active(*id);
            if now == *was {
                continue;
            }
            if let Some(entity) = self.entities.get_mut(*id) {
                entity.spatial_dirty = true;
            }
            let hook = if now { Hook::Enable } else { Hook::Disable };
            self.dispatch_entity(*id, &hook, true);
        }
    }

    // ---- components -----------------------------------------------------

    /// Attach a component; fires `on_awake`, then `on_enable` on an active entity
    pub fn add_component<T: Component>(&mut self, id: EntityId, component: T) -> Result<()> {
        let live = self.is_active(id);
        let Some(entity) = self.entities.get_mut(id) else {
            return Err(unknown_entity(id));
        };
        if entity.has_component::<T>() {
            return Err(PipelineError::Scene(format!(
                "entity '{}' already has a {}",
                entity.name,
                std::any::type_name::<T>()
            )));
        }

        entity.components.push(ComponentSlot::new(component));
        entity.spatial_dirty = true;
        let index = entity.components.len() - 1;
        invoke(id, entity, index, &Hook::Awake, &mut self.commands);
        if live {
            invoke(id, entity, index, &Hook::Enable, &mut self.commands);
        }
        self.settle();
        Ok(())
    }

    /// Detach and return a component; fires `on_disable` (if live) and `on_destroy`
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> Option<T> {
        let live = self.is_active(id);
        let entity = self.entities.get_mut(id)?;
        let index = entity.slot_index(TypeId::of::<T>())?;

        if live && entity.components[index].enabled {
            invoke(id, entity, index, &Hook::Disable, &mut self.commands);
        }
        invoke(id, entity, index, &Hook::Destroy, &mut self.commands);
        let slot = entity.components.remove(index);
        entity.spatial_dirty = true;
        self.settle();

        slot.component.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn get_component<T: Component>(&self, id: EntityId) -> Option<&T> {
        self.entities.get(id)?.get_component::<T>()
    }

    /// Mutable access; the entity is re-indexed before the next cull
    pub fn get_component_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let entity = self.entities.get_mut(id)?;
        entity.spatial_dirty = true;
        entity.get_component_mut::<T>()
    }

    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        self.entities
            .get(id)
            .is_some_and(|e| e.has_component::<T>())
    }

    /// Enable or disable one component. Returns `false` if absent or unchanged.
    pub fn set_component_enabled<T: Component>(&mut self, id: EntityId, enabled: bool) -> bool {
        let live = self.is_active(id);
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        let Some(index) = entity.slot_index(TypeId::of::<T>()) else {
            return false;
        };
        if entity.components[index].enabled == enabled {
            return false;
        }
        entity.components[index].enabled = enabled;
        entity.spatial_dirty = true;
        if live {
            let hook = if enabled { Hook::Enable } else { Hook::Disable };
            invoke(id, entity, index, &hook, &mut self.commands);
        }
        self.settle();
        true
    }

    // ---- transforms -----------------------------------------------------

    pub fn transform(&self, id: EntityId) -> Option<&Transform> {
        self.entities.get(id).map(|e| &e.transform)
    }

    /// Mutate a local transform; descendants are marked dirty right away
    pub fn update_transform(&mut self, id: EntityId, f: impl FnOnce(&mut Transform)) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        f(&mut entity.transform);
        if entity.transform.take_changed() {
            self.propagate_transform_change(id);
            self.settle();
        }
        true
    }

    pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> bool {
        self.update_transform(id, |t| {
            t.set_position(transform.position());
            t.set_rotation(transform.rotation());
            t.set_scale(transform.scale());
        })
    }

    pub fn set_position(&mut self, id: EntityId, position: Vec3) -> bool {
        self.update_transform(id, |t| t.set_position(position))
    }

    pub fn set_rotation(&mut self, id: EntityId, rotation: Quat) -> bool {
        self.update_transform(id, |t| t.set_rotation(rotation))
    }

    pub fn set_scale(&mut self, id: EntityId, scale: Vec3) -> bool {
        self.update_transform(id, |t| t.set_scale(scale))
    }

    /// Parent world × local, recomputed only when dirty
    pub fn world_matrix(&self, id: EntityId) -> Option<Mat4> {
        let entity = self.entities.get(id)?;
        if let Some(cached) = entity.transform.cached_world() {
            return Some(cached);
        }
        let local = entity.transform.local_matrix();
        let world = match entity.parent.and_then(|p| self.world_matrix(p)) {
            Some(parent) => parent * local,
            None => local,
        };
        entity.transform.store_world(world);
        Some(world)
    }

    pub fn world_position(&self, id: EntityId) -> Option<Vec3> {
        Some(self.world_matrix(id)?.transform_point3(Vec3::ZERO))
    }

    pub fn world_rotation(&self, id: EntityId) -> Option<Quat> {
        let (_, rotation, _) = self.world_matrix(id)?.to_scale_rotation_translation();
        Some(rotation)
    }

    pub fn local_to_world(&self, id: EntityId, point: Vec3) -> Option<Vec3> {
        Some(self.world_matrix(id)?.transform_point3(point))
    }

    /// Inverse world matrix, cached alongside the world matrix
    pub fn world_to_local_matrix(&self, id: EntityId) -> Option<Mat4> {
        self.world_matrix(id)?;
        self.entities.get(id)?.transform.cached_world_inverse()
    }

    pub fn world_to_local(&self, id: EntityId, point: Vec3) -> Option<Vec3> {
        Some(self.world_to_local_matrix(id)?.transform_point3(point))
    }

    /// Union of the entity's enabled renderables in world space
    pub fn world_bounds(&self, id: EntityId) -> Option<Aabb> {
        if !self.is_active(id) {
            return None;
        }
        let entity = self.entities.get(id)?;
        let world = self.world_matrix(id)?;
        entity
            .components
            .iter()
            .filter(|slot| slot.enabled)
            .filter_map(|slot| slot.component.renderable())
            .map(|r| r.local_bounds.transformed(&world))
            .reduce(|a, b| a.union(&b))
    }

    fn propagate_transform_change(&mut self, id: EntityId) {
        let subtree = self.collect_subtree(id);
        for node in &subtree {
            if let Some(entity) = self.entities.get_mut(*node) {
                entity.transform.mark_world_dirty();
                entity.spatial_dirty = true;
            }
        }
        for node in subtree {
            self.dispatch_entity(node, &Hook::TransformChanged, false);
        }
    }

    /// Pick up transforms mutated from inside hooks
    fn flush_transform_changes(&mut self) -> bool {
        let changed: Vec<EntityId> = self
            .entities
            .iter_mut()
            .filter_map(|(id, e)| e.transform.take_changed().then_some(id))
            .collect();
        for id in &changed {
            self.propagate_transform_change(*id);
        }
        !changed.is_empty()
    }

    // ---- messages -------------------------------------------------------

    /// Deliver to every enabled component of an active entity
    pub fn send_message(&mut self, id: EntityId, message: SceneMessage) -> bool {
        let delivered = self.deliver_message(id, &message);
        self.settle();
        delivered
    }

    fn deliver_message(&mut self, id: EntityId, message: &SceneMessage) -> bool {
        if !self.is_active(id) {
            return false;
        }
        self.dispatch_entity(id, &Hook::Message(message), false);
        true
    }

    // ---- frame passes ---------------------------------------------------

    pub fn update(&mut self, dt: f32) {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("scene_update", entities = self.entities.len()).entered();

        self.start_pending();
        self.dispatch_live(&Hook::Update(dt));
        self.settle();
    }

    pub fn late_update(&mut self, dt: f32) {
        self.dispatch_live(&Hook::LateUpdate(dt));
        self.settle();
    }

    pub fn fixed_update(&mut self, dt: f32) {
        self.start_pending();
        self.dispatch_live(&Hook::FixedUpdate(dt));
        self.settle();
    }

    /// Feed frame time into the fixed-step clock; returns steps run
    pub fn advance_fixed(&mut self, delta: Duration) -> usize {
        let steps = self.fixed_time.tick(delta);
        let dt = self.fixed_time.timestep_seconds();
        for _ in 0..steps {
            self.fixed_update(dt);
        }
        steps
    }

    pub fn fixed_time(&self) -> &FixedTime {
        &self.fixed_time
    }

    /// Cull against `frustum` and rebuild the render queues. Returns the
    /// number of queued items.
    pub fn prepare_render(&mut self, camera_position: Vec3, frustum: &Frustum) -> usize {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("scene_prepare_render", entities = self.entities.len()).entered();

        self.sync_spatial_index();
        self.last_camera_position = camera_position;
        self.queues.clear();

        for id in self.octree.query_frustum(frustum) {
            let (Some(entity), Some(world)) = (self.entities.get(id), self.world_matrix(id)) else {
                continue;
            };
            for (index, slot) in entity.components.iter().enumerate() {
                if !slot.enabled {
                    continue;
                }
                let Some(renderable) = slot.component.renderable() else {
                    continue;
                };
                let world_bounds = renderable.local_bounds.transformed(&world);
                self.queues.push(
                    renderable.queue,
                    RenderItem {
                        entity: id,
                        mesh: renderable.mesh,
                        material: renderable.material,
                        world_matrix: world,
                        world_bounds,
                        layer: entity.layer,
                        distance_squared: world_bounds.center().distance_squared(camera_position),
                        sequence: (entity.sequence << 8) | index as u64,
                    },
                );
            }
        }
        self.queues.sort();
        self.queues.len()
    }

    /// Draw the queues built by the last `prepare_render`
    pub fn execute_rendering(
        &self,
        renderer: &mut dyn Renderer,
        resources: &CachedResourceManager,
    ) -> RenderStats {
        render::execute(&self.queues, self.last_camera_position, renderer, resources)
    }

    pub fn render_queues(&self) -> &RenderQueues {
        &self.queues
    }

    // ---- spatial queries ------------------------------------------------

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn query_frustum(&mut self, frustum: &Frustum) -> Vec<EntityId> {
        self.sync_spatial_index();
        self.octree.query_frustum(frustum)
    }

    pub fn query_aabb(&mut self, area: &Aabb) -> Vec<EntityId> {
        self.sync_spatial_index();
        self.octree.query_aabb(area)
    }

    pub fn query_sphere(&mut self, sphere: &Sphere) -> Vec<EntityId> {
        self.sync_spatial_index();
        self.octree.query_sphere(sphere)
    }

    pub fn raycast(&mut self, ray: &Ray, max_distance: f32) -> Vec<(EntityId, f32)> {
        self.sync_spatial_index();
        self.octree.query_ray(ray, max_distance)
    }

    pub fn stats(&self) -> SceneStats {
        SceneStats {
            entities: self.entities.len(),
            indexed_renderables: self.octree.len(),
            visible_last_frame: self.queues.len(),
            octree: self.octree.stats(),
        }
    }

    /// Re-index entities whose bounds may have moved
    fn sync_spatial_index(&mut self) {
        let dirty: Vec<EntityId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.entities.get(*id).is_some_and(|e| e.spatial_dirty))
            .collect();
        if dirty.is_empty() {
            return;
        }

        self.octree.begin_batch_update();
        for id in dirty {
            match self.world_bounds(id) {
                Some(bounds) if self.octree.contains(id) => self.octree.update(id, bounds),
                Some(bounds) => self.octree.insert(id, bounds),
                None => {
                    self.octree.remove(id);
                }
            }
            if let Some(entity) = self.entities.get_mut(id) {
                entity.spatial_dirty = false;
            }
        }
        let moved = self.octree.end_batch_update();
        tracing::trace!(moved, indexed = self.octree.len(), "spatial index synced");
    }

    // ---- dispatch -------------------------------------------------------

    fn start_pending(&mut self) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            if !self.is_active(id) {
                continue;
            }
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            for index in 0..entity.components.len() {
                let slot = &mut entity.components[index];
                if slot.enabled && !slot.started {
                    slot.started = true;
                    invoke(id, entity, index, &Hook::Start, &mut self.commands);
                }
            }
        }
    }

    /// Run `hook` on every enabled component of every active entity
    fn dispatch_live(&mut self, hook: &Hook<'_>) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            if self.is_active(id) {
                self.dispatch_entity(id, hook, true);
            }
        }
    }

    /// Run `hook` on the enabled components of one entity. Unless
    /// `assume_live`, the entity must be active.
    fn dispatch_entity(&mut self, id: EntityId, hook: &Hook<'_>, assume_live: bool) {
        if !assume_live && !self.is_active(id) {
            return;
        }
        let Some(entity) = self.entities.get_mut(id) else {
            return;
        };
        for index in 0..entity.components.len() {
            if entity.components[index].enabled {
                invoke(id, entity, index, hook, &mut self.commands);
            }
        }
    }

    fn destroy_internal(&mut self, id: EntityId) -> bool {
        if !self.entities.contains_key(id) {
            return false;
        }
        let subtree = self.collect_subtree(id);

        for node in subtree.iter().rev() {
            let live = self.is_active(*node);
            let Some(entity) = self.entities.get_mut(*node) else {
                continue;
            };
            for index in 0..entity.components.len() {
                if live && entity.components[index].enabled {
                    invoke(*node, entity, index, &Hook::Disable, &mut self.commands);
                }
                invoke(*node, entity, index, &Hook::Destroy, &mut self.commands);
            }
        }

        if let Some(parent) = self.entities.get(id).and_then(|e| e.parent) {
            if let Some(parent) = self.entities.get_mut(parent) {
                parent.children.retain(|c| *c != id);
            }
        }
        for node in &subtree {
            self.octree.remove(*node);
            self.entities.remove(*node);
        }
        self.order.retain(|e| self.entities.contains_key(*e));
        tracing::trace!(entity = ?id, removed = subtree.len(), "entity destroyed");
        true
    }

    /// Apply queued commands and transform changes until quiet
    fn settle(&mut self) {
        if self.settling {
            return;
        }
        self.settling = true;
        for _ in 0..MAX_SETTLE_ROUNDS {
            let commands: Vec<SceneCommand> = self.commands.drain().collect();
            let had_commands = !commands.is_empty();
            for command in commands {
                match command {
                    SceneCommand::Destroy(id) => {
                        self.destroy_internal(id);
                    }
                    SceneCommand::SendMessage(id, message) => {
                        self.deliver_message(id, &message);
                    }
                    SceneCommand::SetActive(id, active) => {
                        self.set_active_internal(id, active);
                    }
                }
            }
            let had_changes = self.flush_transform_changes();
            if !had_commands && !had_changes {
                break;
            }
        }
        if !self.commands.is_empty() {
            tracing::warn!(
                pending = self.commands.len(),
                "scene commands still queued after settling; deferred to the next pass"
            );
        }
        self.settling = false;
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("entities", &self.entities.len())
            .field("octree", &self.octree)
            .finish()
    }
}

fn unknown_entity(id: EntityId) -> PipelineError {
    PipelineError::Scene(format!("unknown entity {id:?}"))
}
