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

//! Bundles: dependency resolution, progress tracking and the manager facade.

pub mod manager;
pub mod progress;
pub mod resolver;

pub use manager::BundleManager;
pub use progress::{BundleLoadProgress, BundleLoadState, ProgressCallback};
pub use resolver::resolve_load_order;
