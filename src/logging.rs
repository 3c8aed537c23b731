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

//! Tracing subscriber installation.
//!
//! The library itself only emits through the `tracing` macros. Binaries call
//! [`init_logging`] once at startup:
//!
//! ```ignore
//! let config = PipelineConfig::from_yaml_file("pipeline.yaml")?;
//! let _guard = archetype_pipeline::logging::init_logging(&config.logging)?;
//! ```
//!
//! `RUST_LOG` overrides `logging.level`, e.g. `RUST_LOG=archetype_pipeline=trace`.
//! With the `profiling` feature the worker, cache and scene hot paths open
//! `info_span!`s that show up in the same output.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};

/// File name prefix for the rolling log
pub const LOG_FILE_PREFIX: &str = "pipeline.log";

/// Install the global subscriber.
///
/// Returns the file writer's guard when `directory` is set; keep it alive for
/// the life of the process or buffered lines are lost. Calling this a second
/// time fails with [`PipelineError::Config`].
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| PipelineError::Config(format!("invalid log level '{}': {e}", config.level)))?;

    let text_layer = (!config.json).then(|| fmt::layer().with_target(true));
    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_current_span(true));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PipelineError::Config(format!("logging already initialized: {e}")))?;

    tracing::debug!(
        level = %config.level,
        json = config.json,
        file = config.directory.is_some(),
        "logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            json: true,
            directory: Some(dir.path().to_path_buf()),
        };

        let first = init_logging(&config);
        let second = init_logging(&config);
        assert!(matches!(second, Err(PipelineError::Config(_))));

        if let Ok(guard) = first {
            assert!(guard.is_some());
            tracing::info!(target: "archetype_pipeline", "written through the file layer");
        }
    }
}
