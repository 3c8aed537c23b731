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

//! Narrow boundary to the GPU.
//!
//! Loaders upload decoded data through a [`GraphicsResourceFactory`] and keep the
//! returned [`GpuAllocation`] inside the resource. Dropping the allocation releases
//! the GPU object, so a resource gives up its GPU memory exactly when the last
//! shared handle to it goes away.

use crate::error::Result;
use glam::Vec3;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Opaque GPU object handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle(pub u64);

/// Pixel layout of a texture upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    /// Still-encoded container bytes (PNG, KTX, ...); decoded on the device side
    Encoded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// GPU resource creation, implemented by the renderer backend
pub trait GraphicsResourceFactory: Send + Sync {
    fn create_texture(&self, descriptor: &TextureDescriptor, data: &[u8]) -> Result<GpuHandle>;

    fn create_mesh(&self, positions: &[Vec3], indices: &[u32]) -> Result<GpuHandle>;

    /// Release a handle created by this factory
    fn release(&self, handle: GpuHandle);

    fn backend_name(&self) -> &str {
        "unnamed"
    }
}

/// A live GPU object, released on drop
pub struct GpuAllocation {
    handle: GpuHandle,
    factory: Arc<dyn GraphicsResourceFactory>,
}

impl GpuAllocation {
    pub fn new(handle: GpuHandle, factory: Arc<dyn GraphicsResourceFactory>) -> Self {
        Self { handle, factory }
    }

    pub fn handle(&self) -> GpuHandle {
        self.handle
    }
}

impl Drop for GpuAllocation {
    fn drop(&mut self) {
        self.factory.release(self.handle);
    }
}

impl fmt::Debug for GpuAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuAllocation")
            .field("handle", &self.handle)
            .field("backend", &self.factory.backend_name())
            .finish()
    }
}

/// Factory without a device. Hands out sequential handles and counts live ones.
#[derive(Debug, Default)]
pub struct HeadlessGraphics {
    next_handle: AtomicU64,
    live: AtomicUsize,
    uploaded_bytes: AtomicU64,
}

impl HeadlessGraphics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles created and not yet released
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::Relaxed)
    }

    fn allocate(&self, bytes: usize) -> GpuHandle {
        self.live.fetch_add(1, Ordering::AcqRel);
        self.uploaded_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        GpuHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl GraphicsResourceFactory for HeadlessGraphics {
    fn create_texture(&self, _descriptor: &TextureDescriptor, data: &[u8]) -> Result<GpuHandle> {
        Ok(self.allocate(data.len()))
    }

    fn create_mesh(&self, positions: &[Vec3], indices: &[u32]) -> Result<GpuHandle> {
        Ok(self.allocate(positions.len() * 12 + indices.len() * 4))
    }

    fn release(&self, _handle: GpuHandle) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    fn backend_name(&self) -> &str {
        "headless"
    }
}
