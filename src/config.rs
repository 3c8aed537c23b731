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

//! Init-time configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config:
//!
//! ```
//! use archetype_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_yaml_str("cache:\n  max_total_memory: 1048576\n  max_single_resource: 65536\n").unwrap();
//! assert_eq!(config.cache.max_total_memory, 1 << 20);
//! assert_eq!(config.logging.level, "info");
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::loading::default_thread_count;
use crate::resources::MemoryBudget;

/// Top-level pipeline configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root every asset `path` is resolved against
    pub assets_base_path: PathBuf,
    /// Directory scanned for `*.yaml` bundle manifests
    pub bundles_directory: PathBuf,
    /// `None` picks `max(1, available_parallelism - 1)`
    pub worker_thread_count: Option<usize>,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assets_base_path: PathBuf::from("assets"),
            bundles_directory: PathBuf::from("assets/bundles"),
            worker_thread_count: None,
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Serialization(e.to_string()))
    }

    /// Reject mis-sized caches and nonsensical thread counts
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.worker_thread_count == Some(0) {
            return Err(PipelineError::Config(
                "worker_thread_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker threads to spawn
    pub fn worker_threads(&self) -> usize {
        self.worker_thread_count.unwrap_or_else(default_thread_count)
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        self.cache.clone().into()
    }
}

/// Cache budget as it appears in config files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_total_memory: usize,
    pub max_single_resource: usize,
    pub eviction_threshold_percent: u32,
    pub enable_eviction: bool,
    pub log_evictions: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let budget = MemoryBudget::default();
        Self {
            max_total_memory: budget.max_total_memory,
            max_single_resource: budget.max_single_resource,
            eviction_threshold_percent: budget.eviction_threshold_percent,
            enable_eviction: budget.enable_eviction,
            log_evictions: budget.log_evictions,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_total_memory == 0 {
            return Err(PipelineError::Config(
                "cache.max_total_memory must be non-zero".to_string(),
            ));
        }
        if self.max_single_resource > self.max_total_memory {
            return Err(PipelineError::Config(format!(
                "cache.max_single_resource ({}) exceeds cache.max_total_memory ({})",
                self.max_single_resource, self.max_total_memory
            )));
        }
        if !(1..=100).contains(&self.eviction_threshold_percent) {
            return Err(PipelineError::Config(format!(
                "cache.eviction_threshold_percent must be within 1..=100, got {}",
                self.eviction_threshold_percent
            )));
        }
        Ok(())
    }
}

impl From<CacheConfig> for MemoryBudget {
    fn from(config: CacheConfig) -> Self {
        MemoryBudget {
            max_total_memory: config.max_total_memory,
            max_single_resource: config.max_single_resource,
            eviction_threshold_percent: config.eviction_threshold_percent,
            enable_eviction: config.enable_eviction,
            log_evictions: config.log_evictions,
        }
    }
}

/// Subscriber settings consumed by [`crate::logging::init_logging`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Also write a daily-rolling file here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

/// Spatial index tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// A leaf splits once it holds more than this
    pub max_entities_per_node: usize,
    /// Nodes with a half-extent at or below this never split
    pub min_node_size: f32,
    /// An interior node collapses once its subtree holds this many or fewer
    pub min_entities_to_collapse: usize,
    pub max_depth: u32,
    /// Grow the root when an insert falls outside it
    pub dynamic_expansion: bool,
    pub expansion_factor: f32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_entities_per_node: 8,
            min_node_size: 1.0,
            min_entities_to_collapse: 4,
            max_depth: 8,
            dynamic_expansion: true,
            expansion_factor: 1.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.assets_base_path, PathBuf::from("assets"));
        assert_eq!(config.cache.max_total_memory, 512 * 1024 * 1024);
        assert_eq!(config.cache.eviction_threshold_percent, 90);
        assert!(config.validate().is_ok());
        assert!(config.worker_threads() >= 1);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "worker_thread_count: 3\nlogging:\n  json: true\n";
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.worker_threads(), 3);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.bundles_directory, PathBuf::from("assets/bundles"));
        assert_eq!(PipelineConfig::from_yaml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = PipelineConfig::default();
        config.cache.max_single_resource = config.cache.max_total_memory + 1;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.cache.eviction_threshold_percent = 0;
        assert!(config.validate().is_err());
        config.cache.eviction_threshold_percent = 101;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.cache.max_total_memory = 0;
        config.cache.max_single_resource = 0;
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            worker_thread_count: Some(0),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_budget_conversion() {
        let config = CacheConfig {
            max_total_memory: 1000,
            max_single_resource: 200,
            eviction_threshold_percent: 50,
            enable_eviction: false,
            log_evictions: false,
        };
        let budget: MemoryBudget = config.into();
        assert_eq!(budget.eviction_trigger_size(), 500);
        assert!(!budget.enable_eviction);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PipelineConfig {
            worker_thread_count: Some(2),
            ..PipelineConfig::default()
        };
        let text = config.to_yaml_string().unwrap();
        assert_eq!(PipelineConfig::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_unreadable_file() {
        let err = PipelineConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
