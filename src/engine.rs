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

use std::sync::Arc;
use std::time::Duration;

use crate::assets::{LoadContext, LoaderRegistry};
use crate::bundle::BundleManager;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::event_types::EngineShutdownEvent;
use crate::input::InputPublisher;
use crate::resources::CachedResourceManager;
use crate::scene::{Camera, RenderStats, Renderer, Scene};
use crate::time::Time;

/// Main application entry point: owns the cache, the loading pipeline and
/// the active scene.
pub struct EngineCore {
    config: PipelineConfig,
    events: Arc<EventBus>,
    resources: Arc<CachedResourceManager>,
    loaders: Arc<LoaderRegistry>,
    bundles: BundleManager,
    scene: Scene,
    time: Time,
    input: InputPublisher,
    initialized: bool,
    shut_down: bool,
}

impl EngineCore {
    /// Build an engine around the process-wide event bus
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_event_bus(config, EventBus::global())
    }

    /// Build an engine around a private bus
    pub fn with_event_bus(config: PipelineConfig, events: Arc<EventBus>) -> Result<Self> {
        config.validate()?;

        let resources = Arc::new(
            CachedResourceManager::new(config.memory_budget()).with_event_bus(Arc::clone(&events)),
        );
        let loaders = Arc::new(LoaderRegistry::with_defaults());
        let workers = config.worker_threads();
        let bundles = BundleManager::new(
            Arc::clone(&resources),
            Arc::clone(&loaders),
            LoadContext::headless(&config.assets_base_path),
            workers,
            Some(Arc::clone(&events)),
        );

        tracing::info!(
            assets = %config.assets_base_path.display(),
            workers,
            budget_bytes = config.cache.max_total_memory,
            "engine core created"
        );

        Ok(Self {
            input: InputPublisher::new(Arc::clone(&events)),
            config,
            events,
            resources,
            loaders,
            bundles,
            scene: Scene::new("Main"),
            time: Time::new(),
            initialized: false,
            shut_down: false,
        })
    }

    /// Register the bundles in the configured directory, start the workers
    /// and queue every auto-load bundle. Returns the number of bundles found.
    pub fn initialize(&mut self) -> Result<usize> {
        let missing = self.loaders.missing_types();
        if !missing.is_empty() {
            tracing::warn!(?missing, "asset types without a loader");
        }

        let registered = self.bundles.initialize(&self.config.bundles_directory)?;
        self.bundles.start_async_loading()?;
        let queued = self.bundles.load_all_auto_load_bundles();
        self.initialized = true;

        tracing::info!(bundles = registered, auto_loaded = queued, "engine core initialized");
        Ok(registered)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run one frame of scene logic against the wall clock
    pub fn frame(&mut self) {
        self.time.update();
        self.step();
    }

    /// Run one frame of scene logic with an explicit delta
    pub fn advance(&mut self, delta: Duration) {
        self.time.advance(delta);
        self.step();
    }

    fn step(&mut self) {
        let dt = self.time.delta_seconds();
        self.scene.update(dt);
        self.scene.advance_fixed(self.time.delta());
        self.scene.late_update(dt);
        self.input.end_frame();
    }

    /// Cull, sort and draw the active scene
    pub fn render(&mut self, camera: &Camera, renderer: &mut dyn Renderer) -> RenderStats {
        self.scene.prepare_render(camera.position, &camera.frustum());
        self.scene.execute_rendering(renderer, &self.resources)
    }

    /// Swap the active scene, returning the previous one
    pub fn replace_scene(&mut self, scene: Scene) -> Scene {
        tracing::debug!(scene = scene.name(), "active scene replaced");
        std::mem::replace(&mut self.scene, scene)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn resources(&self) -> &Arc<CachedResourceManager> {
        &self.resources
    }

    /// Custom loaders registered here replace the defaults
    pub fn loaders(&self) -> &Arc<LoaderRegistry> {
        &self.loaders
    }

    pub fn bundles(&self) -> &BundleManager {
        &self.bundles
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    pub fn input(&self) -> &InputPublisher {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputPublisher {
        &mut self.input
    }

    /// Stop the workers, empty the cache and announce shutdown. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.bundles.shutdown();
        self.scene.clear();
        self.resources.shutdown();
        self.events.broadcast(EngineShutdownEvent);
        tracing::info!(frames = self.time.frame_count(), "engine core shut down");
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
