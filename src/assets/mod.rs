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

// Asset Data Model
//
// Declarative descriptions of what can be loaded:
// - Asset identifiers and types
// - Priorities and unload policies
// - Bundle manifests
// - Type-dispatched loaders

pub mod loader;
pub mod manifest;

pub use loader::{LoadContext, LoaderFn, LoaderRegistry};
pub use manifest::{list_manifests, load_manifest, parse_manifest, AssetBundleConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Process-wide unique, human-readable asset name (e.g. `"character/player_mesh"`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Arc<str>);

impl AssetId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({:?})", &*self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AssetId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&AssetId> for AssetId {
    fn from(value: &AssetId) -> Self {
        value.clone()
    }
}

impl std::borrow::Borrow<str> for AssetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Kind of asset, selects the loader the worker pool dispatches to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Texture,
    Mesh,
    Material,
    Sound,
    Animation,
    Video,
    Script,
    Unknown,
}

impl AssetType {
    /// Every loadable type, `Unknown` excluded
    pub const LOADABLE: [AssetType; 7] = [
        AssetType::Texture,
        AssetType::Mesh,
        AssetType::Material,
        AssetType::Sound,
        AssetType::Animation,
        AssetType::Video,
        AssetType::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Texture => "texture",
            AssetType::Mesh => "mesh",
            AssetType::Material => "material",
            AssetType::Sound => "sound",
            AssetType::Animation => "animation",
            AssetType::Video => "video",
            AssetType::Script => "script",
            AssetType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    /// Manifest spelling; `"unknown"` is not accepted from a manifest.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "texture" => Ok(AssetType::Texture),
            "mesh" => Ok(AssetType::Mesh),
            "material" => Ok(AssetType::Material),
            "sound" => Ok(AssetType::Sound),
            "animation" => Ok(AssetType::Animation),
            "video" => Ok(AssetType::Video),
            "script" => Ok(AssetType::Script),
            other => Err(format!("unknown asset type '{other}'")),
        }
    }
}

/// Load priority. Lower value = loaded earlier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetPriority(pub u32);

impl AssetPriority {
    pub const CRITICAL: AssetPriority = AssetPriority(0);
    pub const HIGH: AssetPriority = AssetPriority(25);
    pub const MEDIUM: AssetPriority = AssetPriority(50);
    pub const LOW: AssetPriority = AssetPriority(100);

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for AssetPriority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl From<u32> for AssetPriority {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// When a cached asset may leave memory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnloadStrategy {
    /// Evictable under memory pressure while nobody holds a handle
    #[default]
    Automatic,
    /// Only removed by an explicit bundle unload
    Manual,
}

impl FromStr for UnloadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" => Ok(UnloadStrategy::Automatic),
            "manual" => Ok(UnloadStrategy::Manual),
            other => Err(format!("unknown unload strategy '{other}'")),
        }
    }
}

/// One asset entry of a bundle manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub asset_type: AssetType,
    pub id: AssetId,
    pub path: String,
    pub priority: AssetPriority,
    pub unload_strategy: UnloadStrategy,
}

impl AssetDefinition {
    pub fn new(asset_type: AssetType, id: impl Into<AssetId>, path: impl Into<String>) -> Self {
        Self {
            asset_type,
            id: id.into(),
            path: path.into(),
            priority: AssetPriority::default(),
            unload_strategy: UnloadStrategy::default(),
        }
    }

    pub fn with_priority(mut self, priority: impl Into<AssetPriority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_unload_strategy(mut self, strategy: UnloadStrategy) -> Self {
        self.unload_strategy = strategy;
        self
    }
}
