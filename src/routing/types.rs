use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{AnchorRule, AxisOrder, Point, Rect};

use super::config::{CornerStyle, RoutingMode};
use super::cost::PathCost;

/// Why a routing stage did not produce (or did not attempt) an avoiding route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    StartBlocked,
    EndBlocked,
    NoPath,
    ExpansionCap,
    EndpointMismatch,
    TooShort,
    NoObstacles,
    ClearPath,
    GeomPending,
    Invalid,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::StartBlocked => "start_blocked",
            ReasonCode::EndBlocked => "end_blocked",
            ReasonCode::NoPath => "no_path",
            ReasonCode::ExpansionCap => "expansion_cap",
            ReasonCode::EndpointMismatch => "endpoint_mismatch",
            ReasonCode::TooShort => "too_short",
            ReasonCode::NoObstacles => "no_obstacles",
            ReasonCode::ClearPath => "clear_path",
            ReasonCode::GeomPending => "geom_pending",
            ReasonCode::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the grid stage for one routing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridStatus {
    Success,
    Fallback,
    Skipped,
    Manhattan,
    GeomPending,
    Invalid,
}

impl GridStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridStatus::Success => "success",
            GridStatus::Fallback => "fallback",
            GridStatus::Skipped => "skipped",
            GridStatus::Manhattan => "manhattan",
            GridStatus::GeomPending => "geom_pending",
            GridStatus::Invalid => "invalid",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub cols: usize,
    pub rows: usize,
}

/// An accepted grid route.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GridRoute {
    pub points: Vec<Point>,
    pub cost: PathCost,
    pub path_hash: u64,
    pub grid_signature: u64,
    /// Distance between the last point and the requested end.
    pub end_delta: f64,
    pub resolution: GridSize,
    pub expansions: usize,
}

/// A rejected grid search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, thiserror::Error)]
#[error("grid search failed at {}x{}: {reason}", .resolution.cols, .resolution.rows)]
pub struct GridFailure {
    pub reason: ReasonCode,
    pub resolution: GridSize,
    pub grid_signature: u64,
    pub expansions: usize,
}

pub type GridOutcome = Result<GridRoute, GridFailure>;

/// Style options handed to the direct-route generator.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteStyle {
    pub radius: Option<f64>,
    pub corner_style: Option<CornerStyle>,
    pub axis_order: Option<AxisOrder>,
}

/// Inputs of a single routing call.
///
/// The `forced_*` and `*_override` fields carry per-connector overrides read
/// from the host element; they take precedence over the caller's choices.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorRequest {
    pub id: String,
    pub start: Option<Point>,
    pub target_id: Option<String>,
    pub target_box: Option<Rect>,
    pub anchor: AnchorRule,
    pub endpoint: Option<Point>,
    pub endpoint_override: Option<Point>,
    pub mode: Option<String>,
    pub forced_mode: Option<String>,
    /// Obstacles that already include clearance.
    pub obstacles: Option<Vec<Rect>>,
    pub obstacle_ids: Vec<String>,
    pub view_box: Option<Rect>,
    pub style: RouteStyle,
    pub aggressive: Option<bool>,
}

impl ConnectorRequest {
    pub fn new(id: impl Into<String>, start: Point) -> Self {
        ConnectorRequest {
            id: id.into(),
            start: Some(start),
            ..ConnectorRequest::default()
        }
    }

    pub fn with_target_box(mut self, target: Rect) -> Self {
        self.target_box = Some(target);
        self
    }

    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_anchor(mut self, anchor: AnchorRule) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Point) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_endpoint_override(mut self, endpoint: Point) -> Self {
        self.endpoint_override = Some(endpoint);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_forced_mode(mut self, mode: impl Into<String>) -> Self {
        self.forced_mode = Some(mode.into());
        self
    }

    pub fn with_obstacles(mut self, obstacles: Vec<Rect>) -> Self {
        self.obstacles = Some(obstacles);
        self
    }

    pub fn with_obstacle_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.obstacle_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_view_box(mut self, view_box: Rect) -> Self {
        self.view_box = Some(view_box);
        self
    }

    pub fn with_style(mut self, style: RouteStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_aggressive(mut self, aggressive: bool) -> Self {
        self.aggressive = Some(aggressive);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouteMetadata {
    pub smart_attempted: bool,
    pub status: GridStatus,
    pub reason: Option<ReasonCode>,
    pub cost: PathCost,
}

/// What the caller gets back from a routing call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouteResult {
    /// Path data (`M x,y L x,y ...`).
    pub d: String,
    pub mode: RoutingMode,
    pub used_endpoint: Option<Point>,
    pub metadata: RouteMetadata,
}

impl RouteResult {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.metadata.status, GridStatus::GeomPending | GridStatus::Invalid)
    }
}
