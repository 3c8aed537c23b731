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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Bundle lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleLoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

impl BundleLoadState {
    /// `Loaded` or `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, BundleLoadState::Loaded | BundleLoadState::Failed)
    }
}

impl fmt::Display for BundleLoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleLoadState::NotLoaded => "not loaded",
            BundleLoadState::Loading => "loading",
            BundleLoadState::Loaded => "loaded",
            BundleLoadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot delivered to progress callbacks and [`BundleProgressEvent`](crate::event_types::BundleProgressEvent)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleLoadProgress {
    pub bundle_name: String,
    pub state: BundleLoadState,
    /// `assets_loaded / total_assets`, in `[0, 1]`
    pub progress: f32,
    pub assets_loaded: usize,
    pub total_assets: usize,
    pub error_message: Option<String>,
}

impl BundleLoadProgress {
    pub fn new(bundle_name: impl Into<String>, total_assets: usize) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            state: BundleLoadState::NotLoaded,
            progress: 0.0,
            assets_loaded: 0,
            total_assets,
            error_message: None,
        }
    }

    pub(crate) fn set_loaded_count(&mut self, assets_loaded: usize) {
        self.assets_loaded = assets_loaded.min(self.total_assets);
        self.progress = if self.total_assets == 0 {
            1.0
        } else {
            self.assets_loaded as f32 / self.total_assets as f32
        };
    }

    pub fn is_complete(&self) -> bool {
        self.total_assets > 0 && self.assets_loaded == self.total_assets
    }
}

/// Per-bundle or global progress observer
pub type ProgressCallback = Arc<dyn Fn(&BundleLoadProgress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let mut progress = BundleLoadProgress::new("ui", 4);
        progress.set_loaded_count(1);
        assert_eq!(progress.progress, 0.25);
        progress.set_loaded_count(9);
        assert_eq!(progress.assets_loaded, 4);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_terminal_states() {
        assert!(BundleLoadState::Loaded.is_terminal());
        assert!(BundleLoadState::Failed.is_terminal());
        assert!(!BundleLoadState::Loading.is_terminal());
        assert_eq!(BundleLoadState::NotLoaded.to_string(), "not loaded");
    }
}
