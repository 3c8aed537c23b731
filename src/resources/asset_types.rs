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
use crate::math::{Aabb, Vec3};
use crate::resource_any_impls;
use crate::resources::graphics::{GpuAllocation, GpuHandle, TextureDescriptor};
use crate::resources::Resource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Texture resource
#[derive(Debug)]
pub struct TextureResource {
    id: AssetId,
    descriptor: TextureDescriptor,
    data: Vec<u8>,
    gpu: Option<GpuAllocation>,
}

impl TextureResource {
    pub fn new(id: AssetId, descriptor: TextureDescriptor, data: Vec<u8>) -> Self {
        Self {
            id,
            descriptor,
            data,
            gpu: None,
        }
    }

    pub fn with_gpu(mut self, allocation: GpuAllocation) -> Self {
        self.gpu = Some(allocation);
        self
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }
    pub fn height(&self) -> u32 {
        self.descriptor.height
    }
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.gpu.as_ref().map(GpuAllocation::handle)
    }
}

impl Resource for TextureResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.data.len()
    }
    fn type_name(&self) -> &'static str {
        "Texture"
    }
    fn is_loaded(&self) -> bool {
        !self.data.is_empty()
    }
    resource_any_impls!();
}

/// Triangle mesh with CPU-side positions kept for bounds and picking
#[derive(Debug)]
pub struct MeshResource {
    id: AssetId,
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    bounds: Aabb,
    gpu: Option<GpuAllocation>,
}

impl MeshResource {
    pub fn new(id: AssetId, positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let bounds = Aabb::from_points(&positions).unwrap_or_default();
        Self {
            id,
            positions,
            indices,
            bounds,
            gpu: None,
        }
    }

    pub fn with_gpu(mut self, allocation: GpuAllocation) -> Self {
        self.gpu = Some(allocation);
        self
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
    /// Local-space bounds
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.gpu.as_ref().map(GpuAllocation::handle)
    }
}

impl Resource for MeshResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.positions.len() * std::mem::size_of::<Vec3>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
    fn type_name(&self) -> &'static str {
        "Mesh"
    }
    fn is_loaded(&self) -> bool {
        !self.positions.is_empty()
    }
    resource_any_impls!();
}

/// Material parameters as authored on disk
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialParams {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub transparent: bool,
    pub shader: Option<String>,
    /// Slot name → texture asset id
    pub textures: BTreeMap<String, AssetId>,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            transparent: false,
            shader: None,
            textures: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct MaterialResource {
    id: AssetId,
    params: MaterialParams,
}

impl MaterialResource {
    pub fn new(id: AssetId, params: MaterialParams) -> Self {
        Self { id, params }
    }

    pub fn params(&self) -> &MaterialParams {
        &self.params
    }
}

impl Resource for MaterialResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<MaterialParams>()
            + self
                .params
                .textures
                .iter()
                .map(|(slot, tex)| slot.len() + tex.as_str().len())
                .sum::<usize>()
    }
    fn type_name(&self) -> &'static str {
        "Material"
    }
    resource_any_impls!();
}

/// Encoded audio bytes
#[derive(Debug)]
pub struct SoundResource {
    id: AssetId,
    data: Vec<u8>,
}

impl SoundResource {
    pub fn new(id: AssetId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Resource for SoundResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.data.len()
    }
    fn type_name(&self) -> &'static str {
        "Sound"
    }
    fn is_loaded(&self) -> bool {
        !self.data.is_empty()
    }
    resource_any_impls!();
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: [f32; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimationChannel {
    /// Node or property path the channel drives
    pub target: String,
    pub keyframes: Vec<Keyframe>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    #[serde(default)]
    pub duration: f32,
    #[serde(default)]
    pub channels: Vec<AnimationChannel>,
}

#[derive(Debug)]
pub struct AnimationResource {
    id: AssetId,
    clip: AnimationClip,
}

impl AnimationResource {
    pub fn new(id: AssetId, mut clip: AnimationClip) -> Self {
        if clip.duration <= 0.0 {
            clip.duration = clip
                .channels
                .iter()
                .flat_map(|c| c.keyframes.iter().map(|k| k.time))
                .fold(0.0, f32::max);
        }
        Self { id, clip }
    }

    pub fn clip(&self) -> &AnimationClip {
        &self.clip
    }

    pub fn duration(&self) -> f32 {
        self.clip.duration
    }
}

impl Resource for AnimationResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.clip
            .channels
            .iter()
            .map(|c| c.target.len() + c.keyframes.len() * std::mem::size_of::<Keyframe>())
            .sum::<usize>()
            .max(std::mem::size_of::<AnimationClip>())
    }
    fn type_name(&self) -> &'static str {
        "Animation"
    }
    resource_any_impls!();
}

/// Encoded video stream bytes
#[derive(Debug)]
pub struct VideoResource {
    id: AssetId,
    data: Vec<u8>,
}

impl VideoResource {
    pub fn new(id: AssetId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Resource for VideoResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.data.len()
    }
    fn type_name(&self) -> &'static str {
        "Video"
    }
    fn is_loaded(&self) -> bool {
        !self.data.is_empty()
    }
    resource_any_impls!();
}

/// Script source text
#[derive(Debug)]
pub struct ScriptResource {
    id: AssetId,
    source: String,
}

impl ScriptResource {
    pub fn new(id: AssetId, source: String) -> Self {
        Self { id, source }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Resource for ScriptResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.source.len()
    }
    fn type_name(&self) -> &'static str {
        "Script"
    }
    resource_any_impls!();
}

/// Opaque bytes of a fixed size. Used by custom loaders and tests that only care
/// about the memory footprint.
#[derive(Debug)]
pub struct RawResource {
    id: AssetId,
    data: Vec<u8>,
}

impl RawResource {
    pub fn new(id: impl Into<AssetId>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Zero-filled resource of `size` bytes
    pub fn zeroed(id: impl Into<AssetId>, size: usize) -> Self {
        Self::new(id, vec![0u8; size])
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Resource for RawResource {
    fn id(&self) -> &AssetId {
        &self.id
    }
    fn size_in_bytes(&self) -> usize {
        self.data.len()
    }
    fn type_name(&self) -> &'static str {
        "Raw"
    }
    resource_any_impls!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::graphics::TextureFormat;

    #[test]
    fn test_texture_resource() {
        let descriptor = TextureDescriptor {
            width: 256,
            height: 256,
            format: TextureFormat::Rgba8,
        };
        let texture = TextureResource::new(
            AssetId::new("test.png"),
            descriptor,
            vec![0u8; 256 * 256 * 4],
        );
        assert_eq!(texture.type_name(), "Texture");
        assert_eq!(texture.width(), 256);
        assert_eq!(texture.size_in_bytes(), 256 * 256 * 4);
        assert!(texture.is_loaded());
        assert!(texture.gpu_handle().is_none());
    }

    #[test]
    fn test_mesh_bounds() {
        let mesh = MeshResource::new(
            AssetId::new("tri"),
            vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 3.0, -1.0)],
            vec![0, 1, 2],
        );
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.bounds().min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(mesh.bounds().max, Vec3::new(2.0, 3.0, 0.0));
        assert_eq!(mesh.size_in_bytes(), 3 * 12 + 3 * 4);
    }

    #[test]
    fn test_animation_duration_from_keyframes() {
        let clip = AnimationClip {
            duration: 0.0,
            channels: vec![AnimationChannel {
                target: "root".to_string(),
                keyframes: vec![
                    Keyframe {
                        time: 0.0,
                        value: [0.0; 4],
                    },
                    Keyframe {
                        time: 2.5,
                        value: [1.0; 4],
                    },
                ],
            }],
        };
        let anim = AnimationResource::new(AssetId::new("walk"), clip);
        assert_eq!(anim.duration(), 2.5);
    }
}
