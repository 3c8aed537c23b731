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

//! Scene graph, spatial index and render queues.

pub mod component;
pub mod entity;
pub mod graph;
pub mod octree;
pub mod render;
pub mod serialization;
pub mod transform;

pub use component::{
    Component, ComponentContext, MeshRenderer, Renderable, SceneCommand, SceneCommands,
    SceneMessage,
};
pub use entity::{Entity, EntityId};
pub use graph::{Scene, SceneStats, DEFAULT_WORLD_HALF_EXTENT};
pub use octree::{Octree, OctreeStats};
pub use render::{
    Camera, DrawCall, HeadlessRenderer, RenderItem, RenderQueueKind, RenderQueues, RenderStats,
    Renderer,
};
pub use serialization::{EntitySnapshot, SceneSnapshot};
pub use transform::{Transform, TransformData};
