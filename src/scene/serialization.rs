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

//! Scene snapshots
//!
//! Saves the hierarchy, transforms and [`MeshRenderer`]s as JSON. Behaviour
//! components hold arbitrary state and are not captured.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::scene::component::MeshRenderer;
use crate::scene::entity::EntityId;
use crate::scene::graph::Scene;
use crate::scene::transform::{Transform, TransformData};

/// Serializable representation of one entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub layer: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub transform: TransformData,
    /// Index of the parent within [`SceneSnapshot::entities`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_renderer: Option<MeshRenderer>,
    #[serde(default = "default_active")]
    pub mesh_renderer_enabled: bool,
}

fn default_active() -> bool {
    true
}

/// Serializable representation of a scene
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub name: String,
    pub entities: Vec<EntitySnapshot>,
}

impl SceneSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::Serialization(e.to_string()))
    }
}

impl Scene {
    /// Capture the scene in spawn order
    pub fn snapshot(&self) -> SceneSnapshot {
        let ids = self.entity_ids();
        let index: HashMap<EntityId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let entities = ids
            .iter()
            .filter_map(|id| self.entity(*id))
            .map(|entity| EntitySnapshot {
                name: entity.name().to_string(),
                tag: entity.tag().map(str::to_string),
                layer: entity.layer(),
                active: entity.is_active_self(),
                transform: TransformData::from(entity.transform()),
                parent: entity.parent().and_then(|p| index.get(&p).copied()),
                mesh_renderer: entity.get_component::<MeshRenderer>().cloned(),
                mesh_renderer_enabled: entity
                    .is_component_enabled::<MeshRenderer>()
                    .unwrap_or(true),
            })
            .collect();

        SceneSnapshot {
            name: self.name().to_string(),
            entities,
        }
    }

    /// Rebuild a scene. Hooks fire as they would for hand-built entities.
    pub fn from_snapshot(snapshot: &SceneSnapshot) -> Result<Scene> {
        let mut scene = Scene::new(snapshot.name.clone());
        let ids: Vec<EntityId> = snapshot
            .entities
            .iter()
            .map(|e| scene.spawn(e.name.clone()))
            .collect();

        for (id, data) in ids.iter().zip(&snapshot.entities) {
            scene.set_tag(*id, data.tag.as_deref());
            scene.set_layer(*id, data.layer);
            scene.set_transform(*id, Transform::from(data.transform));
            if !data.active {
                scene.set_active(*id, false);
            }
        }

        for (id, data) in ids.iter().zip(&snapshot.entities) {
            let Some(parent) = data.parent else {
                continue;
            };
            let parent_id = ids.get(parent).copied().ok_or_else(|| {
                PipelineError::Serialization(format!(
                    "entity '{}' references parent index {parent} out of range",
                    data.name
                ))
            })?;
            scene.set_parent(*id, Some(parent_id))?;
        }

        for (id, data) in ids.iter().zip(&snapshot.entities) {
            if let Some(renderer) = &data.mesh_renderer {
                scene.add_component(*id, renderer.clone())?;
                if !data.mesh_renderer_enabled {
                    scene.set_component_enabled::<MeshRenderer>(*id, false);
                }
            }
        }

        tracing::debug!(
            scene = %snapshot.name,
            entities = ids.len(),
            "scene restored from snapshot"
        );
        Ok(scene)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.snapshot().to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Scene> {
        let json = std::fs::read_to_string(path)?;
        Scene::from_snapshot(&SceneSnapshot::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Aabb, Vec3};
    use crate::scene::render::RenderQueueKind;

    fn sample_scene() -> Scene {
        let mut scene = Scene::new("level-1");
        let root = scene.spawn("root");
        let lamp = scene.spawn_child(root, "lamp").unwrap();
        let ghost = scene.spawn("ghost");

        scene.set_position(root, Vec3::new(1.0, 2.0, 3.0));
        scene.set_tag(lamp, Some("light"));
        scene.set_layer(lamp, 2);
        scene
            .add_component(
                lamp,
                MeshRenderer::new("lamp_mesh", Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)))
                    .with_material("brass")
                    .with_queue(RenderQueueKind::Transparent),
            )
            .unwrap();
        scene.set_active(ghost, false);
        scene
    }

    #[test]
    fn test_snapshot_restores_hierarchy() {
        let scene = sample_scene();
        let snapshot = scene.snapshot();
        assert_eq!(snapshot.entities.len(), 3);
        assert_eq!(snapshot.entities[1].parent, Some(0));

        let json = snapshot.to_json().unwrap();
        let restored = Scene::from_snapshot(&SceneSnapshot::from_json(&json).unwrap()).unwrap();
        assert_eq!(restored.snapshot(), snapshot);

        let lamp = restored.find_by_tag("light").unwrap();
        assert_eq!(restored.world_position(lamp), Some(Vec3::new(1.0, 2.0, 3.0)));
        let ghost = restored.find_by_name("ghost").unwrap();
        assert!(!restored.is_active(ghost));
    }

    #[test]
    fn test_bad_parent_index() {
        let mut snapshot = sample_scene().snapshot();
        snapshot.entities[2].parent = Some(99);
        assert!(matches!(
            Scene::from_snapshot(&snapshot),
            Err(PipelineError::Serialization(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        sample_scene().save_json(&path).unwrap();

        let loaded = Scene::load_json(&path).unwrap();
        assert_eq!(loaded.name(), "level-1");
        assert_eq!(loaded.len(), 3);
        assert!(Scene::load_json(dir.path().join("missing.json")).is_err());
    }
}
