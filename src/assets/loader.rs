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

//! Type-dispatched asset loaders.
//!
//! A loader is a plain function from an [`AssetDefinition`] to a shared resource.
//! New asset kinds are supported by registering another function; there is no
//! loader trait hierarchy.

use crate::assets::{AssetDefinition, AssetId, AssetType};
use crate::error::{PipelineError, Result};
use crate::math::Vec3;
use crate::resources::{
    AnimationClip, AnimationResource, GpuAllocation, GraphicsResourceFactory, HeadlessGraphics,
    MaterialParams, MaterialResource, MeshResource, Resource, ScriptResource, SoundResource,
    TextureDescriptor, TextureFormat, TextureResource, VideoResource,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loader entry point. Runs on a worker thread and may block on I/O.
pub type LoaderFn =
    Arc<dyn Fn(&AssetDefinition, &LoadContext) -> Result<Arc<dyn Resource>> + Send + Sync>;

/// Context provided to asset loaders
#[derive(Clone)]
pub struct LoadContext {
    pub assets_base_path: PathBuf,
    pub graphics: Arc<dyn GraphicsResourceFactory>,
}

impl LoadContext {
    pub fn new(
        assets_base_path: impl Into<PathBuf>,
        graphics: Arc<dyn GraphicsResourceFactory>,
    ) -> Self {
        Self {
            assets_base_path: assets_base_path.into(),
            graphics,
        }
    }

    /// Context with a [`HeadlessGraphics`] factory
    pub fn headless(assets_base_path: impl Into<PathBuf>) -> Self {
        Self::new(assets_base_path, Arc::new(HeadlessGraphics::new()))
    }

    /// Asset path resolved against the assets root
    pub fn resolve(&self, asset: &AssetDefinition) -> PathBuf {
        self.assets_base_path.join(&asset.path)
    }

    /// Read the whole asset file
    pub fn read_bytes(&self, asset: &AssetDefinition) -> Result<Vec<u8>> {
        let path = self.resolve(asset);
        std::fs::read(&path).map_err(|e| loader_error(&asset.id, format!("{}: {e}", path.display())))
    }

    pub fn read_string(&self, asset: &AssetDefinition) -> Result<String> {
        let bytes = self.read_bytes(asset)?;
        String::from_utf8(bytes).map_err(|e| loader_error(&asset.id, format!("not UTF-8: {e}")))
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("assets_base_path", &self.assets_base_path)
            .field("graphics", &self.graphics.backend_name())
            .finish()
    }
}

fn loader_error(asset: &AssetId, reason: impl Into<String>) -> PipelineError {
    PipelineError::Loader {
        asset: asset.clone(),
        reason: reason.into(),
    }
}

/// `AssetType → loader` table
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<AssetType, LoaderFn>>,
}

impl LoaderRegistry {
    /// Registry without any loader
    pub fn empty() -> Self {
        Self {
            loaders: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in loader for every loadable type
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(AssetType::Texture, load_texture);
        registry.register(AssetType::Mesh, load_mesh);
        registry.register(AssetType::Material, load_material);
        registry.register(AssetType::Sound, load_sound);
        registry.register(AssetType::Animation, load_animation);
        registry.register(AssetType::Video, load_video);
        registry.register(AssetType::Script, load_script);
        registry
    }

    /// Register or replace the loader for `asset_type`
    pub fn register<F>(&self, asset_type: AssetType, loader: F)
    where
        F: Fn(&AssetDefinition, &LoadContext) -> Result<Arc<dyn Resource>> + Send + Sync + 'static,
    {
        let previous = self.loaders.write().insert(asset_type, Arc::new(loader));
        if previous.is_some() {
            tracing::debug!(asset_type = %asset_type, "replaced loader");
        }
    }

    pub fn unregister(&self, asset_type: AssetType) -> bool {
        self.loaders.write().remove(&asset_type).is_some()
    }

    pub fn get(&self, asset_type: AssetType) -> Option<LoaderFn> {
        self.loaders.read().get(&asset_type).cloned()
    }

    pub fn has_loader(&self, asset_type: AssetType) -> bool {
        self.loaders.read().contains_key(&asset_type)
    }

    /// Loadable types without a registered loader
    pub fn missing_types(&self) -> Vec<AssetType> {
        let loaders = self.loaders.read();
        AssetType::LOADABLE
            .iter()
            .copied()
            .filter(|ty| !loaders.contains_key(ty))
            .collect()
    }

    /// Run the loader for `asset`. The loader lock is not held while it runs.
    pub fn load(&self, asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
        let loader = self
            .get(asset.asset_type)
            .ok_or(PipelineError::NoLoader(asset.asset_type))?;
        loader(asset, ctx)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&'static str> =
            self.loaders.read().keys().map(|ty| ty.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("LoaderRegistry").field("types", &types).finish()
    }
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Width and height from a PNG IHDR chunk
fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some((width, height))
}

fn load_texture(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let data = ctx.read_bytes(asset)?;
    if data.is_empty() {
        return Err(loader_error(&asset.id, "empty texture file"));
    }
    let (width, height) = png_dimensions(&data).unwrap_or((0, 0));
    let descriptor = TextureDescriptor {
        width,
        height,
        format: TextureFormat::Encoded,
    };
    let handle = ctx.graphics.create_texture(&descriptor, &data)?;
    let allocation = GpuAllocation::new(handle, Arc::clone(&ctx.graphics));
    Ok(Arc::new(
        TextureResource::new(asset.id.clone(), descriptor, data).with_gpu(allocation),
    ))
}

#[derive(Deserialize)]
struct MeshFile {
    positions: Vec<[f32; 3]>,
    #[serde(default)]
    indices: Vec<u32>,
}

fn load_mesh(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let bytes = ctx.read_bytes(asset)?;
    let file: MeshFile = serde_json::from_slice(&bytes)
        .map_err(|e| loader_error(&asset.id, format!("invalid mesh JSON: {e}")))?;
    if file.positions.is_empty() {
        return Err(loader_error(&asset.id, "mesh has no vertices"));
    }

    let positions: Vec<Vec3> = file.positions.iter().map(|p| Vec3::from_array(*p)).collect();
    let indices = if file.indices.is_empty() {
        (0..positions.len() as u32).collect()
    } else {
        file.indices
    };
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
        return Err(loader_error(
            &asset.id,
            format!("index {bad} out of range for {} vertices", positions.len()),
        ));
    }

    let handle = ctx.graphics.create_mesh(&positions, &indices)?;
    let allocation = GpuAllocation::new(handle, Arc::clone(&ctx.graphics));
    Ok(Arc::new(
        MeshResource::new(asset.id.clone(), positions, indices).with_gpu(allocation),
    ))
}

fn load_material(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let bytes = ctx.read_bytes(asset)?;
    let params: MaterialParams = serde_json::from_slice(&bytes)
        .map_err(|e| loader_error(&asset.id, format!("invalid material JSON: {e}")))?;
    Ok(Arc::new(MaterialResource::new(asset.id.clone(), params)))
}

fn load_sound(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let data = ctx.read_bytes(asset)?;
    Ok(Arc::new(SoundResource::new(asset.id.clone(), data)))
}

fn load_animation(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let bytes = ctx.read_bytes(asset)?;
    let clip: AnimationClip = serde_json::from_slice(&bytes)
        .map_err(|e| loader_error(&asset.id, format!("invalid animation JSON: {e}")))?;
    Ok(Arc::new(AnimationResource::new(asset.id.clone(), clip)))
}

fn load_video(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let data = ctx.read_bytes(asset)?;
    Ok(Arc::new(VideoResource::new(asset.id.clone(), data)))
}

fn load_script(asset: &AssetDefinition, ctx: &LoadContext) -> Result<Arc<dyn Resource>> {
    let source = ctx.read_string(asset)?;
    Ok(Arc::new(ScriptResource::new(asset.id.clone(), source)))
}

/// Whether `path` has one of the given extensions (case-insensitive)
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}
