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

//! Behaviour components and their lifecycle hooks
//!
//! An entity holds at most one component per concrete type. Hooks receive a
//! [`ComponentContext`] with the owning entity's transform and a command
//! queue for structural changes, which the scene applies after the pass.

use std::any::{Any, TypeId};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assets::AssetId;
use crate::math::Aabb;
use crate::scene::entity::EntityId;
use crate::scene::render::RenderQueueKind;
use crate::scene::transform::Transform;

/// Behaviour attached to an entity. Every hook is optional.
pub trait Component: Any {
    fn on_awake(&mut self, _ctx: &mut ComponentContext<'_>) {}

    /// Once, on the first frame the component is enabled on an active entity
    fn on_start(&mut self, _ctx: &mut ComponentContext<'_>) {}

    fn on_enable(&mut self, _ctx: &mut ComponentContext<'_>) {}

    fn on_disable(&mut self, _ctx: &mut ComponentContext<'_>) {}

    fn on_update(&mut self, _ctx: &mut ComponentContext<'_>, _dt: f32) {}

    fn on_late_update(&mut self, _ctx: &mut ComponentContext<'_>, _dt: f32) {}

    fn on_fixed_update(&mut self, _ctx: &mut ComponentContext<'_>, _dt: f32) {}

    /// The entity's world transform changed (its own or an ancestor's)
    fn on_transform_changed(&mut self, _ctx: &mut ComponentContext<'_>) {}

    fn on_destroy(&mut self, _ctx: &mut ComponentContext<'_>) {}

    fn on_message(&mut self, _ctx: &mut ComponentContext<'_>, _message: &SceneMessage) {}

    /// Drawable description; components returning `Some` are indexed in the octree
    fn renderable(&self) -> Option<Renderable> {
        None
    }

    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Implements the `Any` plumbing of [`Component`] for a concrete type.
#[macro_export]
macro_rules! component_any_impls {
    () => {
        fn type_name(&self) -> &'static str {
            ::std::any::type_name::<Self>()
        }

        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }

        fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any> {
            self
        }
    };
}

/// What a hook can see and do
pub struct ComponentContext<'a> {
    entity: EntityId,
    transform: &'a mut Transform,
    commands: &'a mut SceneCommands,
}

impl<'a> ComponentContext<'a> {
    pub(crate) fn new(
        entity: EntityId,
        transform: &'a mut Transform,
        commands: &'a mut SceneCommands,
    ) -> Self {
        Self {
            entity,
            transform,
            commands,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn transform(&self) -> &Transform {
        self.transform
    }

    /// Changes propagate to descendants once the current pass finishes
    pub fn transform_mut(&mut self) -> &mut Transform {
        self.transform
    }

    pub fn commands(&mut self) -> &mut SceneCommands {
        self.commands
    }
}

/// Message delivered through `on_message`
#[derive(Clone)]
pub struct SceneMessage {
    pub name: String,
    pub payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl SceneMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for SceneMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneMessage")
            .field("name", &self.name)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Deferred scene mutation issued from inside a hook
#[derive(Debug)]
pub enum SceneCommand {
    Destroy(EntityId),
    SendMessage(EntityId, SceneMessage),
    SetActive(EntityId, bool),
}

/// Command queue for hooks
#[derive(Debug, Default)]
pub struct SceneCommands {
    commands: Vec<SceneCommand>,
}

impl SceneCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destroy(&mut self, entity: EntityId) {
        self.commands.push(SceneCommand::Destroy(entity));
    }

    pub fn send_message(&mut self, entity: EntityId, message: SceneMessage) {
        self.commands.push(SceneCommand::SendMessage(entity, message));
    }

    pub fn set_active(&mut self, entity: EntityId, active: bool) {
        self.commands.push(SceneCommand::SetActive(entity, active));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, SceneCommand> {
        self.commands.drain(..)
    }
}

/// Drawable description handed to the culling pass
#[derive(Clone, Debug, PartialEq)]
pub struct Renderable {
    pub mesh: AssetId,
    pub material: Option<AssetId>,
    /// Bounds in the entity's local space
    pub local_bounds: Aabb,
    pub queue: RenderQueueKind,
}

/// Draws a cached mesh with an optional material
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshRenderer {
    pub mesh: AssetId,
    pub material: Option<AssetId>,
    pub local_bounds: Aabb,
    pub queue: RenderQueueKind,
    pub visible: bool,
}

impl MeshRenderer {
    pub fn new(mesh: impl Into<AssetId>, local_bounds: Aabb) -> Self {
        Self {
            mesh: mesh.into(),
            material: None,
            local_bounds,
            queue: RenderQueueKind::Opaque,
            visible: true,
        }
    }

    pub fn with_material(mut self, material: impl Into<AssetId>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_queue(mut self, queue: RenderQueueKind) -> Self {
        self.queue = queue;
        self
    }
}

impl Component for MeshRenderer {
    fn renderable(&self) -> Option<Renderable> {
        self.visible.then(|| Renderable {
            mesh: self.mesh.clone(),
            material: self.material.clone(),
            local_bounds: self.local_bounds,
            queue: self.queue,
        })
    }

    component_any_impls!();
}

/// Storage cell for one component on one entity
pub(crate) struct ComponentSlot {
    pub(crate) type_id: TypeId,
    pub(crate) component: Box<dyn Component>,
    pub(crate) enabled: bool,
    pub(crate) started: bool,
}

impl ComponentSlot {
    pub(crate) fn new<T: Component>(component: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            component: Box::new(component),
            enabled: true,
            started: false,
        }
    }

    pub(crate) fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.component.as_ref().as_any().downcast_ref::<T>()
    }

    pub(crate) fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.component.as_mut().as_any_mut().downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn test_slot_downcast() {
        let renderer = MeshRenderer::new("cube", Aabb::new(Vec3::splat(-1.0), Vec3::ONE));
        let mut slot = ComponentSlot::new(renderer);
        assert_eq!(slot.type_id, TypeId::of::<MeshRenderer>());
        assert!(slot.downcast_ref::<MeshRenderer>().is_some());

        slot.downcast_mut::<MeshRenderer>().unwrap().visible = false;
        assert!(slot.component.renderable().is_none());
        assert!(slot.component.type_name().ends_with("MeshRenderer"));
    }

    #[test]
    fn test_message_payload() {
        let message = SceneMessage::new("damage").with_payload(12u32);
        assert_eq!(message.payload::<u32>(), Some(&12));
        assert!(message.payload::<String>().is_none());
        assert!(SceneMessage::new("ping").payload::<u32>().is_none());
    }

    #[test]
    fn test_commands_queue() {
        let mut entities = slotmap::SlotMap::<EntityId, ()>::with_key();
        let id = entities.insert(());
        let mut commands = SceneCommands::new();
        commands.destroy(id);
        commands.set_active(id, false);
        assert_eq!(commands.len(), 2);
        let drained: Vec<_> = commands.drain().collect();
        assert!(matches!(drained[0], SceneCommand::Destroy(e) if e == id));
        assert!(commands.is_empty());
    }
}
