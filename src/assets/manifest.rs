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

//! Bundle manifests
//!
//! One YAML file per bundle:
//!
//! ```yaml
//! bundle:
//!   name: ui
//!   priority: 25
//!   auto_load: true
//!   unload_strategy: manual
//!   dependencies: [core]
//! assets:
//!   - type: texture
//!     id: ui/atlas
//!     path: textures/ui_atlas.png
//! ```
//!
//! Unknown keys are reserved: they are ignored with a warning.

use crate::assets::loader::has_extension;
use crate::assets::{AssetDefinition, AssetId, AssetPriority, AssetType, UnloadStrategy};
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// A validated bundle manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetBundleConfig {
    pub name: String,
    pub priority: AssetPriority,
    pub auto_load: bool,
    pub unload_strategy: UnloadStrategy,
    pub dependencies: Vec<String>,
    pub assets: Vec<AssetDefinition>,
    pub bundle_file_path: PathBuf,
}

impl AssetBundleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: AssetPriority::MEDIUM,
            auto_load: true,
            unload_strategy: UnloadStrategy::Automatic,
            dependencies: Vec::new(),
            assets: Vec::new(),
            bundle_file_path: PathBuf::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_asset(mut self, asset: AssetDefinition) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn with_unload_strategy(mut self, strategy: UnloadStrategy) -> Self {
        self.unload_strategy = strategy;
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn total_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn asset_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.assets.iter().map(|a| &a.id)
    }

    /// Schema checks: non-empty name, non-empty asset list, non-empty and unique ids,
    /// no `Unknown` asset types.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| PipelineError::Manifest {
            path: self.bundle_file_path.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(fail("bundle name is empty".to_string()));
        }
        if self.assets.is_empty() {
            return Err(fail(format!("bundle '{}' has no assets", self.name)));
        }

        let mut seen = HashSet::with_capacity(self.assets.len());
        for asset in &self.assets {
            if asset.id.is_empty() {
                return Err(fail(format!("bundle '{}' has an asset with an empty id", self.name)));
            }
            if asset.asset_type == AssetType::Unknown {
                return Err(fail(format!("asset '{}' has unknown type", asset.id)));
            }
            if !seen.insert(asset.id.clone()) {
                return Err(fail(format!(
                    "duplicate asset id '{}' in bundle '{}'",
                    asset.id, self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    bundle: RawBundle,
    #[serde(default)]
    assets: Vec<RawAsset>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBundle {
    #[serde(default)]
    name: String,
    priority: Option<u32>,
    auto_load: Option<bool>,
    unload_strategy: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAsset {
    #[serde(rename = "type", default)]
    asset_type: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    path: String,
    priority: Option<u32>,
    unload_strategy: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

fn warn_reserved(path: &Path, scope: &str, extra: &BTreeMap<String, serde_yaml::Value>) {
    for key in extra.keys() {
        tracing::warn!(manifest = %path.display(), scope, key = %key, "ignoring reserved manifest key");
    }
}

/// Parse and validate a manifest from YAML text. `path` is used for diagnostics
/// and recorded as the bundle's file path.
pub fn parse_manifest(text: &str, path: &Path) -> Result<AssetBundleConfig> {
    let manifest_error = |reason: String| PipelineError::Manifest {
        path: path.to_path_buf(),
        reason,
    };

    let raw: RawManifest =
        serde_yaml::from_str(text).map_err(|e| manifest_error(format!("invalid YAML: {e}")))?;

    warn_reserved(path, "root", &raw.extra);
    warn_reserved(path, "bundle", &raw.bundle.extra);

    let bundle_priority = raw
        .bundle
        .priority
        .map(AssetPriority)
        .unwrap_or(AssetPriority::MEDIUM);
    let bundle_strategy = match raw.bundle.unload_strategy.as_deref() {
        Some(s) => s.parse::<UnloadStrategy>().map_err(manifest_error)?,
        None => UnloadStrategy::Automatic,
    };

    let mut assets = Vec::with_capacity(raw.assets.len());
    for raw_asset in raw.assets {
        warn_reserved(path, "asset", &raw_asset.extra);
        let asset_type = raw_asset
            .asset_type
            .parse::<AssetType>()
            .map_err(|e| manifest_error(format!("asset '{}': {e}", raw_asset.id)))?;
        let unload_strategy = match raw_asset.unload_strategy.as_deref() {
            Some(s) => s.parse::<UnloadStrategy>().map_err(manifest_error)?,
            None => bundle_strategy,
        };
        assets.push(AssetDefinition {
            asset_type,
            id: AssetId::from(raw_asset.id),
            path: raw_asset.path,
            priority: raw_asset.priority.map(AssetPriority).unwrap_or(bundle_priority),
            unload_strategy,
        });
    }

    let config = AssetBundleConfig {
        name: raw.bundle.name.trim().to_string(),
        priority: bundle_priority,
        auto_load: raw.bundle.auto_load.unwrap_or(true),
        unload_strategy: bundle_strategy,
        dependencies: raw.bundle.dependencies,
        assets,
        bundle_file_path: path.to_path_buf(),
    };
    config.validate()?;
    Ok(config)
}

/// Read and parse a manifest file
pub fn load_manifest(path: impl AsRef<Path>) -> Result<AssetBundleConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Manifest {
        path: path.to_path_buf(),
        reason: format!("cannot read file: {e}"),
    })?;
    parse_manifest(&text, path)
}

/// Manifest files (`.yaml`/`.yml`) directly inside `directory`, sorted by name
pub fn list_manifests(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if has_extension(&path, &["yaml", "yml"]) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
