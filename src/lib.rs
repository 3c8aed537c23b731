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

//! Archetype Pipeline - bundle-driven asset streaming
//!
//! YAML bundle manifests feed a prioritized load queue drained by a worker
//! pool. Loaded resources land in a memory-budgeted LRU cache that never
//! evicts entries still held by callers. A scene graph culls renderables
//! through an octree and draws them from the cache each frame.

pub mod assets;
pub mod bundle;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod event_types;
pub mod input;
pub mod loading;
pub mod logging;
pub mod math;
pub mod prelude;
pub mod resources;
pub mod scene;
pub mod time;

pub use assets::{AssetDefinition, AssetId, AssetPriority, AssetType, UnloadStrategy};
pub use bundle::{BundleLoadProgress, BundleLoadState, BundleManager};
pub use config::*;
pub use engine::EngineCore;
pub use error::*;
pub use event_bus::*;
pub use event_types::*;
pub use input::*;
pub use loading::{LoadQueue, LoadRequest, LoadStatus, WorkerPool};
pub use logging::init_logging;
pub use resources::{CachedResourceManager, Handle, MemoryBudget, Resource, ResourceCache};
pub use scene::{EntityId, Scene};
pub use time::*;
