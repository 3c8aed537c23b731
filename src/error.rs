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

//! Error types

use std::fmt;
use std::path::PathBuf;

use crate::assets::{AssetId, AssetType};

/// Pipeline error type
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Manifest file missing, malformed, or failing validation
    Manifest { path: PathBuf, reason: String },

    /// A bundle declares a dependency nobody registered
    UnknownDependency { bundle: String, dependency: String },

    /// Dependency walk revisited a bundle on the current path
    DependencyCycle { bundle: String },

    /// Bundle name not registered
    UnknownBundle(String),

    /// Bundle is not `Manual` and cannot be unloaded explicitly
    UnloadNotPermitted(String),

    /// Initialization found no valid manifest
    NoBundlesFound(PathBuf),

    /// No loader registered for this asset type
    NoLoader(AssetType),

    /// Loader failed to produce a resource
    Loader { asset: AssetId, reason: String },

    /// Loader panicked while running on a worker
    LoaderPanicked { asset: AssetId, reason: String },

    /// Resource is larger than the single-resource budget
    Budget {
        asset: AssetId,
        size: usize,
        limit: usize,
    },

    /// Configuration rejected
    Config(String),

    /// Scene graph operation error (unknown entity, cycle, ...)
    Scene(String),

    /// Serialization error
    Serialization(String),

    /// IO error (file operations, etc.)
    Io(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Manifest { path, reason } => {
                write!(f, "Manifest error in {}: {reason}", path.display())
            }
            PipelineError::UnknownDependency { bundle, dependency } => {
                write!(f, "Bundle '{bundle}' depends on unknown bundle '{dependency}'")
            }
            PipelineError::DependencyCycle { bundle } => {
                write!(f, "Dependency cycle detected at bundle '{bundle}'")
            }
            PipelineError::UnknownBundle(name) => write!(f, "Unknown bundle: {name}"),
            PipelineError::UnloadNotPermitted(name) => {
                write!(f, "Bundle '{name}' is not manually unloadable")
            }
            PipelineError::NoBundlesFound(dir) => {
                write!(f, "No valid bundle manifests found in {}", dir.display())
            }
            PipelineError::NoLoader(ty) => write!(f, "No loader registered for {ty} assets"),
            PipelineError::Loader { asset, reason } => {
                write!(f, "Failed to load '{asset}': {reason}")
            }
            PipelineError::LoaderPanicked { asset, reason } => {
                write!(f, "Loader panicked on '{asset}': {reason}")
            }
            PipelineError::Budget { asset, size, limit } => write!(
                f,
                "Resource '{asset}' is {size} bytes, above the single-resource limit of {limit}"
            ),
            PipelineError::Config(msg) => write!(f, "Configuration error: {msg}"),
            PipelineError::Scene(msg) => write!(f, "Scene error: {msg}"),
            PipelineError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            PipelineError::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_bundle() {
        let err = PipelineError::DependencyCycle {
            bundle: "hud".to_string(),
        };
        assert!(err.to_string().contains("hud"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
