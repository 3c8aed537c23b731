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

pub mod asset_types;
pub mod cache;
pub mod graphics;
pub mod handle;
pub mod manager;
pub mod resource;

pub use asset_types::{
    AnimationChannel, AnimationClip, AnimationResource, Keyframe, MaterialParams,
    MaterialResource, MeshResource, RawResource, ScriptResource, SoundResource, TextureResource,
    VideoResource,
};
pub use cache::{Admission, CacheEntryInfo, CacheStats, MemoryBudget, ResourceCache};
pub use graphics::{
    GpuAllocation, GpuHandle, GraphicsResourceFactory, HeadlessGraphics, TextureDescriptor,
    TextureFormat,
};
pub use handle::Handle;
pub use manager::{CachedResourceManager, EvictionListener};
pub use resource::{downcast_resource, Resource};
