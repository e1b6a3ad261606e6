use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::geometry::{Point, Rect};

use super::config::RoutingMode;
use super::cost::PathCost;
use super::gate::GateMode;
use super::retry::DeferralState;
use super::types::{GridFailure, GridRoute, GridSize, GridStatus, ReasonCode, RouteResult};

/// Environment variable naming a file that receives the JSON routing trace.
pub const TRACE_ENV_VAR: &str = "WIREPATH_ROUTING_TRACE_JSON";

/// Obstacles beyond this many are only counted, not sampled.
const OBSTACLE_SAMPLES: usize = 3;

/// One grid search at one resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GridAttempt {
    pub resolution: GridSize,
    pub success: bool,
    pub reason: Option<ReasonCode>,
    pub expansions: usize,
}

impl GridAttempt {
    pub fn succeeded(route: &GridRoute) -> Self {
        GridAttempt {
            resolution: route.resolution,
            success: true,
            reason: None,
            expansions: route.expansions,
        }
    }

    pub fn failed(failure: &GridFailure) -> Self {
        GridAttempt {
            resolution: failure.resolution,
            success: false,
            reason: Some(failure.reason),
            expansions: failure.expansions,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SmartTelemetry {
    pub hit: bool,
    pub mode: GateMode,
    pub skip_reason: Option<ReasonCode>,
}

/// Per-connector diagnostics written alongside each result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectorTelemetry {
    pub connector_id: String,
    pub root: String,
    pub mode: RoutingMode,
    pub grid_status: GridStatus,
    pub reason: Option<ReasonCode>,
    pub attempts: Vec<GridAttempt>,
    pub smart: Option<SmartTelemetry>,
    pub obstacle_count: usize,
    pub obstacle_samples: Vec<Rect>,
    pub endpoint_overridden: bool,
    pub used_endpoint: Option<Point>,
    pub deferral: DeferralState,
    pub path_hash: Option<u64>,
    pub grid_signature: Option<u64>,
    pub cost: PathCost,
}

impl ConnectorTelemetry {
    pub fn new(root: &str, connector_id: &str, mode: RoutingMode) -> Self {
        ConnectorTelemetry {
            connector_id: connector_id.to_string(),
            root: root.to_string(),
            mode,
            grid_status: GridStatus::Invalid,
            reason: None,
            attempts: Vec::new(),
            smart: None,
            obstacle_count: 0,
            obstacle_samples: Vec::new(),
            endpoint_overridden: false,
            used_endpoint: None,
            deferral: DeferralState::Idle,
            path_hash: None,
            grid_signature: None,
            cost: PathCost::default(),
        }
    }

    pub fn record_obstacles(&mut self, obstacles: &[Rect]) {
        self.obstacle_count = obstacles.len();
        self.obstacle_samples = obstacles.iter().take(OBSTACLE_SAMPLES).copied().collect();
    }

    /// The last failing attempt's reason, if every attempt failed.
    pub fn last_failure(&self) -> Option<ReasonCode> {
        if self.attempts.iter().any(|attempt| attempt.success) {
            return None;
        }
        self.attempts.last().and_then(|attempt| attempt.reason)
    }
}

/// Introspection sink for routing results, keyed by root and connector id.
pub trait ResultRegistry {
    fn record(&mut self, result: &RouteResult, telemetry: &ConnectorTelemetry);
    fn invalidate(&mut self, root: &str, connector_id: &str);

    /// Called once after a layout pass.
    fn flush(&mut self) {}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegistryEntry {
    pub result: RouteResult,
    pub telemetry: ConnectorTelemetry,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to serialize routing trace: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write routing trace to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered in-memory registry. Clones share the same entries.
///
/// With a trace file configured, [`InMemoryRegistry::flush_trace`] rewrites
/// it with the whole registry as JSON.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistry {
    entries: Arc<Mutex<IndexMap<(String, String), RegistryEntry>>>,
    trace_path: Option<PathBuf>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        InMemoryRegistry::default()
    }

    pub fn with_trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    /// A registry that traces to the file named by [`TRACE_ENV_VAR`], when set.
    pub fn from_env() -> Self {
        match std::env::var(TRACE_ENV_VAR) {
            Ok(path) if !path.is_empty() => InMemoryRegistry::new().with_trace_file(path),
            _ => InMemoryRegistry::new(),
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut IndexMap<(String, String), RegistryEntry>) -> R) -> R {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn get(&self, root: &str, connector_id: &str) -> Option<RegistryEntry> {
        self.with_entries(|entries| entries.get(&(root.to_string(), connector_id.to_string())).cloned())
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.with_entries(|entries| {
            let connectors: Vec<serde_json::Value> = entries
                .values()
                .map(|entry| {
                    json!({
                        "root": entry.telemetry.root,
                        "id": entry.telemetry.connector_id,
                        "d": entry.result.d,
                        "mode": entry.result.mode,
                        "used_endpoint": entry.result.used_endpoint,
                        "metadata": entry.result.metadata,
                        "telemetry": entry.telemetry,
                    })
                })
                .collect();
            json!({ "connectors": connectors })
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<(), TraceError> {
        let serialized = serde_json::to_string_pretty(&self.to_json())?;
        fs::write(path, serialized).map_err(|source| TraceError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the trace file, if one is configured.
    pub fn flush_trace(&self) -> Result<(), TraceError> {
        match &self.trace_path {
            Some(path) => self.write_json(path),
            None => Ok(()),
        }
    }
}

impl ResultRegistry for InMemoryRegistry {
    fn record(&mut self, result: &RouteResult, telemetry: &ConnectorTelemetry) {
        let key = (telemetry.root.clone(), telemetry.connector_id.clone());
        let entry = RegistryEntry {
            result: result.clone(),
            telemetry: telemetry.clone(),
        };
        self.with_entries(|entries| {
            entries.insert(key, entry);
        });
    }

    fn invalidate(&mut self, root: &str, connector_id: &str) {
        self.with_entries(|entries| {
            entries.shift_remove(&(root.to_string(), connector_id.to_string()));
        });
    }

    fn flush(&mut self) {
        if let Err(error) = self.flush_trace() {
            warn!(%error, "routing trace not written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::RouteMetadata;

    fn sample(root: &str, id: &str) -> (RouteResult, ConnectorTelemetry) {
        let result = RouteResult {
            d: "M 0,0 L 10,0".to_string(),
            mode: RoutingMode::Manhattan,
            used_endpoint: Some(Point::new(10.0, 0.0)),
            metadata: RouteMetadata {
                smart_attempted: false,
                status: GridStatus::Manhattan,
                reason: None,
                cost: PathCost::default(),
            },
        };
        let mut telemetry = ConnectorTelemetry::new(root, id, RoutingMode::Manhattan);
        telemetry.grid_status = GridStatus::Manhattan;
        (result, telemetry)
    }

    #[test]
    fn samples_at_most_three_obstacles() {
        let mut telemetry = ConnectorTelemetry::new("r", "c", RoutingMode::Grid);
        let obstacles: Vec<Rect> = (0..5).map(|i| Rect::new(i as f64 * 10.0, 0.0, 5.0, 5.0)).collect();
        telemetry.record_obstacles(&obstacles);
        assert_eq!(telemetry.obstacle_count, 5);
        assert_eq!(telemetry.obstacle_samples, obstacles[..3].to_vec());
    }

    #[test]
    fn registry_records_and_invalidates_per_root() {
        let mut registry = InMemoryRegistry::new();
        let view = registry.clone();
        let (result, telemetry) = sample("a", "c1");
        registry.record(&result, &telemetry);
        let (result, telemetry) = sample("b", "c1");
        registry.record(&result, &telemetry);
        assert_eq!(view.len(), 2);

        registry.invalidate("a", "c1");
        assert!(view.get("a", "c1").is_none());
        assert_eq!(view.get("b", "c1").map(|entry| entry.result.d), Some("M 0,0 L 10,0".to_string()));
    }

    #[test]
    fn trace_file_is_written_on_flush_only() {
        let path = std::env::temp_dir().join(format!("wirepath-flush-{}.json", std::process::id()));
        let mut registry = InMemoryRegistry::new().with_trace_file(&path);
        let (result, telemetry) = sample("root", "c1");
        registry.record(&result, &telemetry);
        assert!(!path.exists());

        registry.flush();
        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["connectors"][0]["id"], "c1");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn json_lists_connectors_in_insertion_order() {
        let mut registry = InMemoryRegistry::new();
        for id in ["z", "a"] {
            let (result, telemetry) = sample("root", id);
            registry.record(&result, &telemetry);
        }
        let value = registry.to_json();
        let ids: Vec<&str> = value["connectors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["z", "a"]);
        assert_eq!(value["connectors"][0]["telemetry"]["grid_status"], "manhattan");
        assert_eq!(value["connectors"][0]["telemetry"]["deferral"]["state"], "idle");
    }
}
