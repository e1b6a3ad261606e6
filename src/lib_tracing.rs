use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_flame::{FlameLayer, FlushGuard};
use tracing_subscriber::{filter, prelude::*};

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("could not open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not open flame graph output: {0}")]
    Flame(#[from] tracing_flame::Error),
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Global subscriber for hosts that want routing logs.
///
/// Events at `INFO` and above go to stdout; every level goes to the log file.
/// With a flame path, spans are also recorded as folded stacks.
#[derive(Clone, Debug)]
pub struct RoutingTracer {
    log_path: PathBuf,
    flame_path: Option<PathBuf>,
}

/// Keeps the flame graph writer alive; drop it to flush.
pub struct TracerGuard {
    _flame: Option<FlushGuard<BufWriter<File>>>,
}

impl Default for RoutingTracer {
    fn default() -> Self {
        RoutingTracer::new("debug.log")
    }
}

impl RoutingTracer {
    pub fn new(log_path: impl AsRef<Path>) -> Self {
        RoutingTracer {
            log_path: log_path.as_ref().to_path_buf(),
            flame_path: None,
        }
    }

    pub fn with_flame(mut self, path: impl AsRef<Path>) -> Self {
        self.flame_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn install(&self) -> Result<TracerGuard, TracerError> {
        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        let file = File::create(&self.log_path).map_err(|source| TracerError::LogFile {
            path: self.log_path.clone(),
            source,
        })?;
        let debug_log = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Arc::new(file));

        let (flame_layer, flame_guard) = match &self.flame_path {
            Some(path) => {
                let (layer, guard) = FlameLayer::with_file(path)?;
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(stdout_log.with_filter(filter::LevelFilter::INFO).and_then(debug_log))
            .with(flame_layer)
            .try_init()?;

        Ok(TracerGuard { _flame: flame_guard })
    }
}
