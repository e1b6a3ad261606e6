use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::geometry::Rect;

/// Strategy used to compute a connector path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    #[default]
    Manhattan,
    Grid,
    Smart,
}

impl RoutingMode {
    pub fn parse(value: &str) -> Option<RoutingMode> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manhattan" => Some(RoutingMode::Manhattan),
            "grid" => Some(RoutingMode::Grid),
            "smart" => Some(RoutingMode::Smart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Manhattan => "manhattan",
            RoutingMode::Grid => "grid",
            RoutingMode::Smart => "smart",
        }
    }
}

/// Resolve an explicitly requested mode against the global default.
///
/// Recognized explicit values win outright. Anything else, `"auto"` included,
/// falls through to `global_default`, which itself falls back to Manhattan.
pub fn select_mode(explicit: Option<&str>, global_default: Option<&str>) -> RoutingMode {
    explicit
        .and_then(RoutingMode::parse)
        .or_else(|| global_default.and_then(RoutingMode::parse))
        .unwrap_or_default()
}

/// Grid resolution: a column count (rows follow the view box aspect ratio)
/// or an explicit `[cols, rows]` pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resolution {
    Columns(f64),
    Explicit([usize; 2]),
}

impl Resolution {
    pub fn scaled(&self, factor: f64, max_resolution: f64) -> Resolution {
        let cap = |value: f64| value.min(max_resolution).max(1.0);
        match *self {
            Resolution::Columns(cols) => Resolution::Columns(cap(cols * factor).floor()),
            Resolution::Explicit([cols, rows]) => Resolution::Explicit([
                cap(cols as f64 * factor).floor() as usize,
                cap(rows as f64 * factor).floor() as usize,
            ]),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Columns(64.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub resolution: Resolution,
    pub retry_multipliers: Vec<f64>,
    pub max_resolution: f64,
    pub max_expansions: usize,
    /// Accepted distance between a route's last point and the requested end, in cell diagonals.
    pub endpoint_tolerance: f64,
    /// Padding around start, end and obstacles when no view box is supplied.
    pub view_box_margin: f64,
    pub cached_grids_per_root: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        GridSettings {
            resolution: Resolution::default(),
            retry_multipliers: vec![1.0, 1.5, 2.0],
            max_resolution: 256.0,
            max_expansions: 6000,
            endpoint_tolerance: 1.5,
            view_box_margin: 24.0,
            cached_grids_per_root: 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub distance: f64,
    pub bend: f64,
    pub proximity: f64,
    pub channel: f64,
    pub spacing: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            distance: 1.0,
            bend: 8.0,
            proximity: 0.0,
            channel: 0.0,
            spacing: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartSettings {
    pub proximity: f64,
    pub epsilon: f64,
    pub aggressive: bool,
}

impl Default for SmartSettings {
    fn default() -> Self {
        SmartSettings {
            proximity: 6.0,
            epsilon: 0.5,
            aggressive: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferralSettings {
    pub max_retries: u32,
    pub frame_ticks: u32,
    pub delay_ms: u64,
}

impl Default for DeferralSettings {
    fn default() -> Self {
        DeferralSettings {
            max_retries: 6,
            frame_ticks: 1,
            delay_ms: 30,
        }
    }
}

/// A named preferred-routing region. Carried in the configuration for hosts
/// that bias scoring by corridor; the core itself does not consume it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub bounds: Rect,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerStyle {
    #[default]
    Sharp,
    Rounded,
}

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Aesthetics {
    pub corner_radius: f64,
    pub corner_style: CornerStyle,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_mode: RoutingMode,
    pub clearance: f64,
    pub grid: GridSettings,
    pub weights: CostWeights,
    pub smart: SmartSettings,
    pub deferral: DeferralSettings,
    pub channels: Vec<Channel>,
    pub aesthetics: Aesthetics,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            default_mode: RoutingMode::Manhattan,
            clearance: 8.0,
            grid: GridSettings::default(),
            weights: CostWeights::default(),
            smart: SmartSettings::default(),
            deferral: DeferralSettings::default(),
            channels: Vec::new(),
            aesthetics: Aesthetics::default(),
        }
    }
}

impl RoutingConfig {
    /// Deep-merge a JSON patch into this configuration.
    ///
    /// Objects merge recursively and every other value overwrites. A leaf that
    /// does not fit its field's type is dropped, leaving the old value in place.
    pub fn merge(&mut self, patch: &Value) {
        let Value::Object(_) = patch else {
            debug!("ignoring non-object config patch");
            return;
        };
        let Ok(mut current) = serde_json::to_value(&*self) else {
            return;
        };
        let mut path = Vec::new();
        merge_leaves(&mut current, &mut path, patch);
        if let Ok(merged) = serde_json::from_value::<RoutingConfig>(current) {
            *self = merged;
        }
    }
}

fn value_at_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut cursor = root;
    for key in path {
        cursor = cursor.as_object_mut()?.get_mut(key)?;
    }
    Some(cursor)
}

fn merge_leaves(root: &mut Value, path: &mut Vec<String>, patch: &Value) {
    let Value::Object(entries) = patch else {
        return;
    };
    for (key, value) in entries {
        path.push(key.clone());
        let descend = value.is_object()
            && value_at_mut(root, path).map(|existing| existing.is_object()).unwrap_or(false);
        if descend {
            merge_leaves(root, path, value);
        } else {
            let mut candidate = root.clone();
            let parent = &path[..path.len() - 1];
            if let Some(Value::Object(target)) = value_at_mut(&mut candidate, parent) {
                target.insert(key.clone(), value.clone());
                if serde_json::from_value::<RoutingConfig>(candidate.clone()).is_ok() {
                    *root = candidate;
                } else {
                    debug!(field = %path.join("."), "ignoring malformed config field");
                }
            }
        }
        path.pop();
    }
}

/// Shared handle to the routing configuration.
///
/// Readers take a snapshot per routing call; writes go through [`ConfigHandle::merge`].
#[derive(Clone, Debug, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<RoutingConfig>>,
}

impl ConfigHandle {
    pub fn new(config: RoutingConfig) -> Self {
        ConfigHandle {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> RoutingConfig {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Later merges take precedence field by field.
    pub fn merge(&self, patch: &Value) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.merge(patch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Some("grid"), Some("smart"), RoutingMode::Grid)]
    #[case(Some("manhattan"), Some("grid"), RoutingMode::Manhattan)]
    #[case(Some("smart"), None, RoutingMode::Smart)]
    #[case(Some("auto"), Some("grid"), RoutingMode::Grid)]
    #[case(Some("bogus"), None, RoutingMode::Manhattan)]
    #[case(None, Some("nonsense"), RoutingMode::Manhattan)]
    #[case(None, None, RoutingMode::Manhattan)]
    fn selects_mode(#[case] explicit: Option<&str>, #[case] default: Option<&str>, #[case] expected: RoutingMode) {
        assert_eq!(select_mode(explicit, default), expected);
    }

    #[test]
    fn merge_overwrites_scalars_and_keeps_siblings() {
        let mut config = RoutingConfig::default();
        config.merge(&json!({ "clearance": 12.0, "grid": { "max_expansions": 10 } }));
        assert_eq!(config.clearance, 12.0);
        assert_eq!(config.grid.max_expansions, 10);
        assert_eq!(config.grid.retry_multipliers, vec![1.0, 1.5, 2.0]);
        assert_eq!(config.weights, CostWeights::default());
    }

    #[test]
    fn malformed_fields_are_inert() {
        let mut config = RoutingConfig::default();
        config.merge(&json!({
            "clearance": "wide",
            "default_mode": "auto",
            "grid": { "max_expansions": -3, "max_resolution": 128.0 },
            "unknown": { "nested": true }
        }));
        assert_eq!(config.clearance, 8.0);
        assert_eq!(config.default_mode, RoutingMode::Manhattan);
        assert_eq!(config.grid.max_expansions, 6000);
        assert_eq!(config.grid.max_resolution, 128.0);
    }

    #[test]
    fn later_merges_take_precedence() {
        let handle = ConfigHandle::default();
        handle.merge(&json!({ "default_mode": "grid", "smart": { "proximity": 3.0 } }));
        handle.merge(&json!({ "default_mode": "smart" }));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.default_mode, RoutingMode::Smart);
        assert_eq!(snapshot.smart.proximity, 3.0);
    }

    #[test]
    fn resolution_accepts_columns_or_pairs() {
        let mut config = RoutingConfig::default();
        config.merge(&json!({ "grid": { "resolution": [40, 20] } }));
        assert_eq!(config.grid.resolution, Resolution::Explicit([40, 20]));
        assert_eq!(
            config.grid.resolution.scaled(2.0, 64.0),
            Resolution::Explicit([64, 40])
        );
        assert_eq!(Resolution::Columns(64.0).scaled(1.5, 256.0), Resolution::Columns(96.0));
    }

    #[test]
    fn non_object_patch_is_ignored() {
        let mut config = RoutingConfig::default();
        config.merge(&json!(42));
        assert_eq!(config, RoutingConfig::default());
    }
}
