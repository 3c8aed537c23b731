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

//! Headless walkthrough of the pipeline.
//!
//! Usage: `pipeline_demo [config.yaml]`

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use archetype_pipeline::prelude::*;
use archetype_pipeline::scene::HeadlessRenderer;
use archetype_pipeline::{init_logging, AssetLoadFailedEvent};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const FRAME: Duration = Duration::from_millis(16);

fn main() -> ExitCode {
    let config = match std::env::args().nth(1) {
        Some(path) => match PipelineConfig::from_yaml_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to read {path}: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => PipelineConfig::default(),
    };

    let _guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "pipeline demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: PipelineConfig) -> Result<()> {
    let mut engine = EngineCore::new(config)?;

    engine
        .bundles()
        .set_global_progress_callback(Some(Arc::new(|progress: &BundleLoadProgress| {
            tracing::info!(
                bundle = %progress.bundle_name,
                state = %progress.state,
                loaded = progress.assets_loaded,
                total = progress.total_assets,
                "bundle progress"
            );
        })));
    engine.events().subscribe::<AssetLoadFailedEvent, _>(|event| {
        tracing::warn!(asset = %event.asset, error = %event.reason, "asset failed");
    });

    let bundles = engine.initialize()?;
    populate_scene(engine.scene_mut());

    let camera = Camera::perspective(Vec3::new(0.0, 5.0, 20.0), Vec3::ZERO, 1.0, 16.0 / 9.0, 0.1, 500.0);
    let mut renderer = HeadlessRenderer::new();
    let started = Instant::now();
    while !engine.bundles().wait_until_idle(Duration::ZERO) && started.elapsed() < LOAD_TIMEOUT {
        engine.advance(FRAME);
        engine.render(&camera, &mut renderer);
        std::thread::sleep(FRAME);
    }
    let stats = engine.render(&camera, &mut renderer);

    tracing::info!(
        bundles,
        loaded = ?engine.bundles().get_loaded_bundles(),
        frames = renderer.frames,
        drawn = stats.drawn,
        skipped = stats.skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loading finished"
    );
    engine.resources().log_cache_status();
    engine.shutdown();
    Ok(())
}

/// A ring of meshes named after the assets a typical `core` bundle ships
fn populate_scene(scene: &mut Scene) {
    let root = scene.spawn("ring");
    for i in 0..16 {
        let angle = i as f32 / 16.0 * std::f32::consts::TAU;
        let Ok(id) = scene.spawn_child(root, format!("pillar_{i}")) else {
            continue;
        };
        scene.set_position(id, Vec3::new(angle.cos() * 10.0, 0.0, angle.sin() * 10.0));
        let renderer = MeshRenderer::new("cube", Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)))
            .with_material("default_material");
        if let Err(err) = scene.add_component(id, renderer) {
            tracing::warn!(error = %err, "skipping pillar");
        }
    }
}
