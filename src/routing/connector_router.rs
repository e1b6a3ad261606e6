//! Top-level connector dispatch.
//!
//! A routing call resolves the endpoint and mode, gathers obstacles, defers
//! while the target is unmeasured, runs the gate and/or the multi-resolution
//! grid search, and falls back to the direct-route generator. Nothing here
//! returns an error to the caller: missing inputs become an `invalid` result.

use hashbrown::HashMap;
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn};

use crate::geometry::{AxisOrder, Point, Rect};

use super::astar::{a_star, SearchLimits};
use super::config::{select_mode, ConfigHandle, CostWeights, Resolution, RoutingConfig, RoutingMode, SmartSettings};
use super::cost::{compress_collinear, coord, score_path, to_path_data};
use super::error::RouteError;
use super::fallback::{zero_length_safe, DirectRoute, DirectRouteGenerator, DirectRouteRequest, ElbowRoute};
use super::gate;
use super::grid::{CacheStats, GridCache, GridSpec};
use super::obstacles::{collect_obstacles, sanitize_obstacles, BoundsSource, ObstacleSet};
use super::retry::{DeferDecision, DeferralState, DeferralTracker, RetryTicket, Scheduler};
use super::telemetry::{ConnectorTelemetry, GridAttempt, ResultRegistry, SmartTelemetry};
use super::types::{ConnectorRequest, GridOutcome, GridRoute, GridStatus, ReasonCode, RouteMetadata, RouteResult};

/// One grid search: where, at what resolution, and between which points.
#[derive(Clone, Copy, Debug)]
pub struct GridQuery<'a> {
    pub view_box: Rect,
    pub resolution: Resolution,
    /// Clearance-inflated obstacles.
    pub obstacles: &'a [Rect],
    pub clearance: f64,
    pub start: Point,
    pub end: Point,
    pub limits: SearchLimits,
    pub weights: CostWeights,
    pub cache_capacity: usize,
}

/// The grid pathfinder as seen by the router.
pub trait PathSearch {
    fn search(&mut self, root: &str, query: &GridQuery) -> GridOutcome;

    /// Release anything held for `root`.
    fn drop_root(&mut self, _root: &str) {}
}

/// Grid search over per-root cached grids.
#[derive(Debug, Default)]
pub struct CachedGridSearch {
    cache: GridCache,
}

impl CachedGridSearch {
    pub fn new() -> Self {
        CachedGridSearch::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cached(&self, root: &str) -> usize {
        self.cache.cached(root)
    }
}

impl PathSearch for CachedGridSearch {
    fn search(&mut self, root: &str, query: &GridQuery) -> GridOutcome {
        self.cache.set_capacity(query.cache_capacity);
        let spec = GridSpec::new(query.view_box, query.resolution, query.obstacles, query.clearance);
        let grid = self.cache.get_or_build(root, &spec);
        a_star(&grid, query.start, query.end, &query.limits, &query.weights)
    }

    fn drop_root(&mut self, root: &str) {
        self.cache.drop_root(root);
    }
}

/// The result handed to the caller plus the diagnostics it may persist.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteOutcome {
    pub result: RouteResult,
    pub telemetry: ConnectorTelemetry,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum TargetGeometry {
    Measured(Rect),
    /// Known but not measurable yet: zero-sized, or not rendered under the root.
    Unmeasured(Option<Rect>),
    Absent,
}

impl TargetGeometry {
    fn rect(&self) -> Option<Rect> {
        match *self {
            TargetGeometry::Measured(rect) => Some(rect),
            TargetGeometry::Unmeasured(rect) => rect,
            TargetGeometry::Absent => None,
        }
    }
}

fn classify(rect: Rect) -> TargetGeometry {
    if rect.is_measurable() {
        TargetGeometry::Measured(rect)
    } else {
        TargetGeometry::Unmeasured(Some(rect))
    }
}

/// Ascending, finite, positive, deduplicated.
fn retry_factors(multipliers: &[f64]) -> Vec<f64> {
    let mut factors: Vec<f64> = multipliers
        .iter()
        .copied()
        .filter(|factor| factor.is_finite() && *factor > 0.0)
        .collect();
    factors.sort_by(f64::total_cmp);
    factors.dedup();
    if factors.is_empty() {
        factors.push(1.0);
    }
    factors
}

fn default_view_box(start: Point, end: Point, obstacles: &[Rect], margin: f64) -> Rect {
    obstacles
        .iter()
        .fold(Rect::from_corners(start, end), |acc, rect| acc.union(rect))
        .inflate(margin.max(0.0))
}

/// Join a cell-center polyline to the exact start and end with orthogonal joints.
fn stitch(start: Point, path: &[Point], end: Point) -> Vec<Point> {
    let (Some(first), Some(last)) = (path.first().copied(), path.last().copied()) else {
        return compress_collinear(&[start, AxisOrder::XThenY.elbow(start, end), end]);
    };
    let mut points = Vec::with_capacity(path.len() + 4);
    points.push(start);
    if start.x != first.x && start.y != first.y {
        let leads_horizontally = path.get(1).map_or(true, |next| next.y == first.y);
        points.push(if leads_horizontally {
            Point::new(start.x, first.y)
        } else {
            Point::new(first.x, start.y)
        });
    }
    points.extend_from_slice(path);
    if end.x != last.x && end.y != last.y {
        let trails_horizontally = path.len() < 2 || path[path.len() - 2].y == last.y;
        points.push(if trails_horizontally {
            Point::new(end.x, last.y)
        } else {
            Point::new(last.x, end.y)
        });
    }
    points.push(end);
    compress_collinear(&points)
}

/// Routes connectors for any number of render roots.
pub struct ConnectorRouter {
    config: ConfigHandle,
    bounds: Box<dyn BoundsSource>,
    direct: Box<dyn DirectRouteGenerator>,
    search: Box<dyn PathSearch>,
    scheduler: Box<dyn Scheduler>,
    registry: Option<Box<dyn ResultRegistry>>,
    deferrals: DeferralTracker,
    pending: HashMap<(String, String), ConnectorRequest>,
}

impl ConnectorRouter {
    pub fn new(config: ConfigHandle, bounds: impl BoundsSource + 'static, scheduler: impl Scheduler + 'static) -> Self {
        ConnectorRouter {
            config,
            bounds: Box::new(bounds),
            direct: Box::new(ElbowRoute),
            search: Box::new(CachedGridSearch::new()),
            scheduler: Box::new(scheduler),
            registry: None,
            deferrals: DeferralTracker::new(),
            pending: HashMap::new(),
        }
    }

    pub fn with_direct_route(mut self, generator: impl DirectRouteGenerator + 'static) -> Self {
        self.direct = Box::new(generator);
        self
    }

    pub fn with_search(mut self, search: impl PathSearch + 'static) -> Self {
        self.search = Box::new(search);
        self
    }

    pub fn with_registry(mut self, registry: impl ResultRegistry + 'static) -> Self {
        self.registry = Some(Box::new(registry));
        self
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Deep-merge `patch` into the shared configuration.
    pub fn set_global_config(&self, patch: &Value) {
        self.config.merge(patch);
    }

    pub fn deferral_state(&self, root: &str, connector_id: &str) -> DeferralState {
        self.deferrals.state(root, connector_id)
    }

    /// Forget cached grids, pending retries and deferral state of `root`.
    pub fn drop_root(&mut self, root: &str) {
        self.search.drop_root(root);
        self.pending.retain(|(pending_root, _), _| pending_root != root);
        self.deferrals.forget_root(root);
    }

    /// Route one connector under `root`.
    pub fn route(&mut self, root: &str, request: &ConnectorRequest) -> RouteOutcome {
        let span = debug_span!("route_connector", root, connector = %request.id);
        let _entered = span.enter();

        let config = self.config.snapshot();
        let explicit = request.forced_mode.as_deref().or(request.mode.as_deref());
        let mode = select_mode(explicit, Some(config.default_mode.as_str()));

        match self.dispatch(root, request, &config, mode) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "connector cannot be routed");
                self.settle(root, &request.id);
                self.invalid(root, request, mode)
            }
        }
    }

    /// Route a whole layout pass under `root`, then flush the registry once.
    pub fn route_batch(&mut self, root: &str, requests: &[ConnectorRequest]) -> Vec<RouteOutcome> {
        let outcomes: Vec<RouteOutcome> = requests.iter().map(|request| self.route(root, request)).collect();
        self.flush_registry();
        outcomes
    }

    pub fn flush_registry(&mut self) {
        if let Some(registry) = self.registry.as_mut() {
            registry.flush();
        }
    }

    /// Re-dispatch a deferred connector. Stale tickets do nothing and return `None`.
    pub fn fire_retry(&mut self, ticket: &RetryTicket) -> Option<RouteOutcome> {
        if !self.deferrals.claim(ticket) {
            trace!(connector = %ticket.connector_id, attempt = ticket.attempt, "ignoring stale retry");
            return None;
        }
        let key = (ticket.root.clone(), ticket.connector_id.clone());
        let request = self.pending.remove(&key)?;
        debug!(connector = %ticket.connector_id, attempt = ticket.attempt, "retrying deferred connector");
        Some(self.route(&ticket.root, &request))
    }

    /// Routed without deferring: any stored retry of this connector is stale now.
    fn settle(&mut self, root: &str, connector_id: &str) {
        self.deferrals.cancel(root, connector_id);
        self.pending.remove(&(root.to_string(), connector_id.to_string()));
    }

    fn resolve_target(&self, root: &str, request: &ConnectorRequest) -> TargetGeometry {
        if let Some(rect) = request.target_box {
            return if rect.is_finite() { classify(rect) } else { TargetGeometry::Absent };
        }
        let Some(target_id) = request.target_id.as_deref() else {
            return TargetGeometry::Absent;
        };
        match self.bounds.bounds(root, target_id) {
            Ok(Some(raw)) => raw.normalize().map_or(TargetGeometry::Absent, classify),
            Ok(None) => TargetGeometry::Unmeasured(None),
            Err(error) => {
                warn!(%error, "target lookup failed");
                TargetGeometry::Absent
            }
        }
    }

    fn dispatch(
        &mut self,
        root: &str,
        request: &ConnectorRequest,
        config: &RoutingConfig,
        mode: RoutingMode,
    ) -> Result<RouteOutcome, RouteError> {
        let start = request
            .start
            .filter(|point| point.is_finite())
            .ok_or_else(|| RouteError::MissingStart(request.id.clone()))?;

        let key = (root.to_string(), request.id.clone());
        let target = self.resolve_target(root, request);
        if let TargetGeometry::Measured(_) = target {
            self.deferrals.resolve(root, &request.id);
            self.pending.remove(&key);
        }

        let override_point = request.endpoint_override.filter(|point| point.is_finite());
        let supplied = override_point.or(request.endpoint.filter(|point| point.is_finite()));
        let endpoint = match (supplied, target) {
            (Some(point), _) => point,
            (None, TargetGeometry::Measured(rect)) => request.anchor.resolve(start, &rect),
            (None, TargetGeometry::Unmeasured(rect)) => match self.deferrals.defer(root, &request.id, &config.deferral) {
                DeferDecision::Scheduled(ticket) => {
                    debug!(attempt = ticket.attempt, "target unmeasured, retry scheduled");
                    self.pending.insert(key, request.clone());
                    self.scheduler.schedule(ticket);
                    return Ok(self.pending_result(root, request, start, mode));
                }
                DeferDecision::AlreadyPending { .. } => {
                    self.pending.insert(key, request.clone());
                    return Ok(self.pending_result(root, request, start, mode));
                }
                DeferDecision::Exhausted => {
                    rect.map(|rect| request.anchor.resolve(start, &rect))
                        .ok_or_else(|| RouteError::MissingTarget(request.id.clone()))?
                }
            },
            (None, TargetGeometry::Absent) => return Err(RouteError::MissingTarget(request.id.clone())),
        };
        self.settle(root, &request.id);

        let mut telemetry = ConnectorTelemetry::new(root, &request.id, mode);
        telemetry.endpoint_overridden = override_point.is_some();

        let obstacles = match &request.obstacles {
            Some(rects) => ObstacleSet::from_rects(sanitize_obstacles(rects)),
            None => collect_obstacles(self.bounds.as_ref(), root, &request.obstacle_ids, config.clearance),
        };
        telemetry.record_obstacles(&obstacles.rects);

        let aggressive = request.aggressive.unwrap_or(config.smart.aggressive);
        let mut smart_attempted = false;
        let grid_route = match mode {
            RoutingMode::Manhattan => {
                telemetry.grid_status = GridStatus::Manhattan;
                None
            }
            RoutingMode::Grid => self.run_grid(root, start, endpoint, &obstacles, request, config, &mut telemetry),
            RoutingMode::Smart => {
                smart_attempted = true;
                let settings = SmartSettings {
                    aggressive,
                    ..config.smart
                };
                let report = gate::evaluate(start, endpoint, &obstacles.rects, request.style.axis_order, &settings);
                let skip_reason = report.reason();
                telemetry.smart = Some(SmartTelemetry {
                    hit: report.hit,
                    mode: report.mode,
                    skip_reason,
                });
                if report.hit || (aggressive && !obstacles.is_empty()) {
                    self.run_grid(root, start, endpoint, &obstacles, request, config, &mut telemetry)
                } else {
                    telemetry.grid_status = GridStatus::Skipped;
                    telemetry.reason = skip_reason;
                    None
                }
            }
        };

        let (d, cost) = match grid_route {
            Some(route) => (to_path_data(&stitch(start, &route.points, endpoint)), route.cost),
            None => {
                let direct = self.direct_route(start, target.rect(), endpoint, request, config);
                let cost = score_path(&direct.points, &config.weights);
                (direct.d, cost)
            }
        };

        telemetry.cost = cost;
        telemetry.used_endpoint = Some(endpoint);
        telemetry.deferral = self.deferrals.state(root, &request.id);
        let result = RouteResult {
            d,
            mode,
            used_endpoint: Some(endpoint),
            metadata: RouteMetadata {
                smart_attempted,
                status: telemetry.grid_status,
                reason: telemetry.reason,
                cost,
            },
        };
        debug!(
            mode = mode.as_str(),
            status = telemetry.grid_status.as_str(),
            reason = ?telemetry.reason,
            obstacles = telemetry.obstacle_count,
            "connector routed"
        );
        if let Some(registry) = self.registry.as_mut() {
            registry.record(&result, &telemetry);
        }
        Ok(RouteOutcome { result, telemetry })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_grid(
        &mut self,
        root: &str,
        start: Point,
        end: Point,
        obstacles: &ObstacleSet,
        request: &ConnectorRequest,
        config: &RoutingConfig,
        telemetry: &mut ConnectorTelemetry,
    ) -> Option<GridRoute> {
        let view_box = request
            .view_box
            .filter(|view_box| view_box.is_finite() && view_box.is_measurable())
            .unwrap_or_else(|| default_view_box(start, end, &obstacles.rects, config.grid.view_box_margin));
        let limits = SearchLimits {
            max_expansions: config.grid.max_expansions,
            endpoint_tolerance: config.grid.endpoint_tolerance,
        };

        let mut tried: Vec<Resolution> = Vec::new();
        for factor in retry_factors(&config.grid.retry_multipliers) {
            let resolution = config.grid.resolution.scaled(factor, config.grid.max_resolution);
            if tried.contains(&resolution) {
                continue;
            }
            tried.push(resolution);

            let query = GridQuery {
                view_box,
                resolution,
                obstacles: &obstacles.rects,
                clearance: config.clearance,
                start,
                end,
                limits,
                weights: config.weights,
                cache_capacity: config.grid.cached_grids_per_root,
            };
            match self.search.search(root, &query) {
                Ok(route) => {
                    telemetry.attempts.push(GridAttempt::succeeded(&route));
                    telemetry.grid_status = GridStatus::Success;
                    telemetry.reason = None;
                    telemetry.path_hash = Some(route.path_hash);
                    telemetry.grid_signature = Some(route.grid_signature);
                    return Some(route);
                }
                Err(failure) => {
                    debug!(%failure, expansions = failure.expansions, "grid attempt failed");
                    telemetry.attempts.push(GridAttempt::failed(&failure));
                }
            }
        }

        telemetry.grid_status = GridStatus::Fallback;
        telemetry.reason = telemetry.last_failure();
        None
    }

    fn direct_route(
        &self,
        start: Point,
        target: Option<Rect>,
        endpoint: Point,
        request: &ConnectorRequest,
        config: &RoutingConfig,
    ) -> DirectRoute {
        let direct_request = DirectRouteRequest {
            start,
            target,
            endpoint,
            radius: request.style.radius.unwrap_or(config.aesthetics.corner_radius),
            corner_style: request.style.corner_style.unwrap_or(config.aesthetics.corner_style),
            axis_order: request.style.axis_order,
        };
        let route = self.direct.route(&direct_request);
        if route.d.trim().is_empty() {
            warn!("direct route generator returned no path, using plain elbow");
            return ElbowRoute.route(&direct_request);
        }
        route
    }

    fn pending_result(&mut self, root: &str, request: &ConnectorRequest, start: Point, mode: RoutingMode) -> RouteOutcome {
        if let Some(registry) = self.registry.as_mut() {
            registry.invalidate(root, &request.id);
        }
        let mut telemetry = ConnectorTelemetry::new(root, &request.id, mode);
        telemetry.grid_status = GridStatus::GeomPending;
        telemetry.reason = Some(ReasonCode::GeomPending);
        telemetry.endpoint_overridden = request.endpoint_override.is_some();
        telemetry.deferral = self.deferrals.state(root, &request.id);
        let result = RouteResult {
            d: format!("M {},{}", coord(start.x), coord(start.y)),
            mode,
            used_endpoint: None,
            metadata: RouteMetadata {
                smart_attempted: false,
                status: GridStatus::GeomPending,
                reason: Some(ReasonCode::GeomPending),
                cost: Default::default(),
            },
        };
        RouteOutcome { result, telemetry }
    }

    fn invalid(&mut self, root: &str, request: &ConnectorRequest, mode: RoutingMode) -> RouteOutcome {
        let anchor = request.start.filter(|point| point.is_finite()).unwrap_or_default();
        let mut telemetry = ConnectorTelemetry::new(root, &request.id, mode);
        telemetry.grid_status = GridStatus::Invalid;
        telemetry.reason = Some(ReasonCode::Invalid);
        telemetry.deferral = self.deferrals.state(root, &request.id);
        let result = RouteResult {
            d: zero_length_safe(&[anchor]),
            mode,
            used_endpoint: None,
            metadata: RouteMetadata {
                smart_attempted: false,
                status: GridStatus::Invalid,
                reason: Some(ReasonCode::Invalid),
                cost: Default::default(),
            },
        };
        if let Some(registry) = self.registry.as_mut() {
            registry.record(&result, &telemetry);
        }
        RouteOutcome { result, telemetry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RawBox;
    use crate::routing::error::SourceError;
    use crate::routing::obstacles::StaticBounds;
    use crate::routing::retry::ManualScheduler;
    use crate::routing::telemetry::InMemoryRegistry;
    use serde_json::json;

    fn router() -> (ConnectorRouter, ManualScheduler) {
        let scheduler = ManualScheduler::new();
        let router = ConnectorRouter::new(ConfigHandle::default(), StaticBounds::new(), scheduler.clone());
        (router, scheduler)
    }

    struct FailingBounds;

    impl BoundsSource for FailingBounds {
        fn bounds(&self, _root: &str, id: &str) -> Result<Option<RawBox>, SourceError> {
            Err(SourceError::new(id, "detached"))
        }
    }

    #[test]
    fn manhattan_routes_a_single_elbow() {
        let (mut router, _) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 50.0))
            .with_mode("manhattan");
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.d, "M 0,0 L 100,0 L 100,50");
        assert_eq!(outcome.result.metadata.status, GridStatus::Manhattan);
        assert_eq!(outcome.result.metadata.cost.bends, 1);
        assert_eq!(outcome.result.metadata.cost.distance_cost, 150.0);
        assert!(!outcome.result.metadata.smart_attempted);
        assert!(outcome.telemetry.attempts.is_empty());
    }

    #[test]
    fn endpoint_comes_from_the_anchor_rule() {
        let (mut router, _) = router();
        let request =
            ConnectorRequest::new("a", Point::new(0.0, 0.0)).with_target_box(Rect::new(100.0, -10.0, 20.0, 20.0));
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.used_endpoint, Some(Point::new(100.0, 0.0)));
        assert_eq!(outcome.result.d, "M 0,0 L 100,0");
    }

    #[test]
    fn override_beats_explicit_endpoint() {
        let (mut router, _) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(10.0, 10.0))
            .with_endpoint_override(Point::new(40.0, 0.0))
            .with_target_box(Rect::new(100.0, 0.0, 10.0, 10.0));
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.used_endpoint, Some(Point::new(40.0, 0.0)));
        assert!(outcome.telemetry.endpoint_overridden);
    }

    #[test]
    fn forced_mode_beats_caller_mode() {
        let (mut router, _) = router();
        let base = ConnectorRequest::new("a", Point::new(0.0, 0.0)).with_endpoint(Point::new(50.0, 50.0));

        let forced = base.clone().with_mode("grid").with_forced_mode("manhattan");
        assert_eq!(router.route("root", &forced).result.mode, RoutingMode::Manhattan);

        router.set_global_config(&json!({ "default_mode": "smart" }));
        let unknown = base.with_mode("grid").with_forced_mode("sideways");
        assert_eq!(router.route("root", &unknown).result.mode, RoutingMode::Smart);
    }

    #[test]
    fn grid_mode_stitches_to_exact_endpoints() {
        let (mut router, _) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 50.0))
            .with_mode("grid");
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.metadata.status, GridStatus::Success);
        assert!(outcome.result.d.starts_with("M 0,0 L "));
        assert!(outcome.result.d.ends_with("L 100,50"));
        assert_eq!(outcome.telemetry.attempts.len(), 1);
        assert!(outcome.telemetry.path_hash.is_some());
    }

    #[test]
    fn tiny_expansion_cap_falls_back_after_every_resolution() {
        let (mut router, _) = router();
        router.set_global_config(&json!({ "grid": { "max_expansions": 1 } }));
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 50.0))
            .with_mode("grid");
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.metadata.status, GridStatus::Fallback);
        assert_eq!(outcome.result.metadata.reason, Some(ReasonCode::ExpansionCap));
        assert_eq!(outcome.result.d, "M 0,0 L 100,0 L 100,50");

        let columns: Vec<usize> = outcome.telemetry.attempts.iter().map(|a| a.resolution.cols).collect();
        assert_eq!(columns, vec![64, 96, 128]);
        assert!(outcome.telemetry.attempts.iter().all(|a| !a.success));
    }

    #[test]
    fn smart_mode_skips_without_obstacles_or_when_clear() {
        let (mut router, _) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 0.0))
            .with_mode("smart");
        let empty = router.route("root", &request);
        assert_eq!(empty.result.metadata.status, GridStatus::Skipped);
        assert_eq!(empty.result.metadata.reason, Some(ReasonCode::NoObstacles));
        assert!(empty.result.metadata.smart_attempted);

        let clear = router.route("root", &request.clone().with_obstacles(vec![Rect::new(40.0, 50.0, 20.0, 20.0)]));
        assert_eq!(clear.result.metadata.reason, Some(ReasonCode::ClearPath));
        assert_eq!(clear.result.d, "M 0,0 L 100,0");
    }

    #[test]
    fn aggressive_smart_mode_escalates_when_obstacles_exist() {
        let (mut router, _) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 0.0))
            .with_mode("smart")
            .with_obstacles(vec![Rect::new(40.0, 50.0, 20.0, 20.0)])
            .with_aggressive(true);
        let outcome = router.route("root", &request);
        let smart = outcome.telemetry.smart.unwrap();
        assert!(!smart.hit);
        assert_eq!(outcome.result.metadata.status, GridStatus::Success);
        assert_eq!(outcome.telemetry.attempts.len(), 1);
    }

    #[test]
    fn missing_inputs_are_invalid_results() {
        let (mut router, _) = router();
        let no_start = ConnectorRequest {
            id: "a".into(),
            endpoint: Some(Point::new(10.0, 10.0)),
            ..ConnectorRequest::default()
        };
        let outcome = router.route("root", &no_start);
        assert_eq!(outcome.result.d, "M 0,0 L 0,0");
        assert_eq!(outcome.result.metadata.status, GridStatus::Invalid);

        let no_target = ConnectorRequest::new("b", Point::new(5.0, 6.0));
        let outcome = router.route("root", &no_target);
        assert_eq!(outcome.result.d, "M 5,6 L 5,6");
        assert_eq!(outcome.result.metadata.reason, Some(ReasonCode::Invalid));
        assert!(outcome.result.is_placeholder());
    }

    #[test]
    fn failing_bounds_source_degrades_to_no_obstacles() {
        let mut router = ConnectorRouter::new(ConfigHandle::default(), FailingBounds, ManualScheduler::new());
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 0.0))
            .with_obstacle_ids(["n1", "n2"])
            .with_mode("smart");
        let outcome = router.route("root", &request);
        assert_eq!(outcome.telemetry.obstacle_count, 0);
        assert_eq!(outcome.result.metadata.reason, Some(ReasonCode::NoObstacles));

        let by_id = ConnectorRequest::new("b", Point::new(0.0, 0.0)).with_target_id("n1");
        assert_eq!(router.route("root", &by_id).result.metadata.status, GridStatus::Invalid);
    }

    #[test]
    fn obstacles_resolve_through_the_bounds_source() {
        let bounds = StaticBounds::new()
            .with("wall", Rect::new(40.0, -10.0, 20.0, 20.0))
            .with("speck", Rect::new(0.0, 0.0, 1.0, 1.0));
        let mut router = ConnectorRouter::new(ConfigHandle::default(), bounds, ManualScheduler::new());
        router.set_global_config(&json!({ "clearance": 2.0 }));
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(100.0, 0.0))
            .with_obstacle_ids(["wall", "speck", "ghost"])
            .with_mode("smart");
        let outcome = router.route("root", &request);
        assert_eq!(outcome.telemetry.obstacle_samples, vec![Rect::new(38.0, -12.0, 24.0, 24.0)]);
        assert!(outcome.telemetry.smart.unwrap().hit);
    }

    #[test]
    fn unmeasured_target_defers_once_per_connector() {
        let (mut router, scheduler) = router();
        let registry = InMemoryRegistry::new();
        router = router.with_registry(registry.clone());

        let measured = ConnectorRequest::new("a", Point::new(0.0, 0.0)).with_target_box(Rect::new(100.0, 0.0, 10.0, 10.0));
        router.route("root", &measured);
        assert!(registry.get("root", "a").is_some());

        let unmeasured = measured.clone().with_target_box(Rect::new(100.0, 0.0, 0.0, 0.0));
        let first = router.route("root", &unmeasured);
        assert_eq!(first.result.d, "M 0,0");
        assert_eq!(first.result.metadata.status, GridStatus::GeomPending);
        assert!(registry.get("root", "a").is_none());

        router.route("root", &unmeasured);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(router.deferral_state("root", "a"), DeferralState::Pending { attempt: 1 });
    }

    #[test]
    fn retries_give_up_after_the_budget() {
        let (mut router, scheduler) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0)).with_target_box(Rect::new(100.0, 40.0, 0.0, 0.0));
        router.route("root", &request);

        let mut fired = 0;
        let mut last = None;
        while let Some(ticket) = scheduler.drain().into_iter().next() {
            fired += 1;
            last = router.fire_retry(&ticket);
        }
        assert_eq!(fired, 6);
        let outcome = last.unwrap();
        assert_eq!(outcome.result.metadata.status, GridStatus::Manhattan);
        assert_eq!(outcome.result.used_endpoint, Some(Point::new(100.0, 40.0)));
        assert_eq!(router.deferral_state("root", "a"), DeferralState::Aborted);
    }

    #[test]
    fn stale_retry_is_a_no_op() {
        let (mut router, scheduler) = router();
        let unmeasured = ConnectorRequest::new("a", Point::new(0.0, 0.0)).with_target_box(Rect::new(100.0, 0.0, 0.0, 0.0));
        router.route("root", &unmeasured);
        let ticket = scheduler.drain().remove(0);

        let measured = unmeasured.with_target_box(Rect::new(100.0, 0.0, 10.0, 10.0));
        router.route("root", &measured);
        assert_eq!(router.deferral_state("root", "a"), DeferralState::Resolved);
        assert!(router.fire_retry(&ticket).is_none());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn explicit_endpoint_skips_the_readiness_gate() {
        let (mut router, scheduler) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_target_box(Rect::new(100.0, 0.0, 0.0, 0.0))
            .with_endpoint(Point::new(100.0, 0.0));
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.d, "M 0,0 L 100,0");
        assert!(scheduler.is_empty());
    }

    struct Straight;

    impl DirectRouteGenerator for Straight {
        fn route(&self, request: &DirectRouteRequest) -> DirectRoute {
            let points = vec![request.start, request.endpoint];
            DirectRoute {
                d: to_path_data(&points),
                points,
            }
        }
    }

    /// Fails every search with the same reason.
    struct Refusing(ReasonCode);

    impl PathSearch for Refusing {
        fn search(&mut self, _root: &str, query: &GridQuery) -> GridOutcome {
            Err(crate::routing::types::GridFailure {
                reason: self.0,
                resolution: GridSpec::new(query.view_box, query.resolution, &[], 0.0).size(),
                grid_signature: 0,
                expansions: 0,
            })
        }
    }

    #[test]
    fn injected_collaborators_replace_the_defaults() {
        let (router, _) = router();
        let mut router = router.with_direct_route(Straight).with_search(Refusing(ReasonCode::NoPath));
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_endpoint(Point::new(30.0, 40.0))
            .with_mode("grid");
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.d, "M 0,0 L 30,40");
        assert_eq!(outcome.result.metadata.reason, Some(ReasonCode::NoPath));
        assert_eq!(outcome.telemetry.attempts.len(), 3);
    }

    #[test]
    fn style_and_anchor_reach_the_fallback() {
        use crate::geometry::{Align, AnchorRule, Side};
        use crate::routing::config::CornerStyle;
        use crate::routing::types::RouteStyle;

        let (mut router, _) = router();
        let request = ConnectorRequest::new("a", Point::new(0.0, 0.0))
            .with_target_box(Rect::new(100.0, 0.0, 20.0, 10.0))
            .with_anchor(AnchorRule {
                side: Side::Top,
                align: Align::Start,
                gap: 0.0,
            })
            .with_style(RouteStyle {
                radius: Some(4.0),
                corner_style: Some(CornerStyle::Rounded),
                axis_order: Some(AxisOrder::YThenX),
            });
        let outcome = router.route("root", &request);
        assert_eq!(outcome.result.used_endpoint, Some(Point::new(100.0, 0.0)));
        assert_eq!(outcome.result.d, "M 0,0 L 100,0");

        let bent = request.with_endpoint(Point::new(100.0, 50.0));
        assert_eq!(router.route("root", &bent).result.d, "M 0,0 L 0,46 Q 0,50 4,50 L 100,50");
    }

    #[test]
    fn grid_cache_is_reused_and_dropped_per_root() {
        let mut search = CachedGridSearch::new();
        let obstacles = [Rect::new(40.0, -10.0, 20.0, 20.0)];
        let query = GridQuery {
            view_box: Rect::new(-24.0, -34.0, 148.0, 68.0),
            resolution: Resolution::Columns(64.0),
            obstacles: &obstacles,
            clearance: 8.0,
            start: Point::new(0.0, 0.0),
            end: Point::new(100.0, 0.0),
            limits: SearchLimits::default(),
            weights: CostWeights::default(),
            cache_capacity: 8,
        };
        let first = search.search("a", &query).unwrap();
        let second = search.search("a", &query).unwrap();
        assert_eq!(first.path_hash, second.path_hash);
        search.search("b", &query).unwrap();
        assert_eq!(search.stats(), CacheStats { hits: 1, misses: 2 });

        search.drop_root("a");
        assert_eq!(search.cached("a"), 0);
        assert_eq!(search.cached("b"), 1);
    }

    #[test]
    fn stitching_keeps_segments_orthogonal() {
        let path = [Point::new(0.25, 0.5), Point::new(99.75, 0.5), Point::new(99.75, 49.5)];
        let stitched = stitch(Point::new(0.0, 0.0), &path, Point::new(100.0, 50.0));
        assert_eq!(stitched.first(), Some(&Point::new(0.0, 0.0)));
        assert_eq!(stitched.last(), Some(&Point::new(100.0, 50.0)));
        for pair in stitched.windows(2) {
            assert!(pair[0].x == pair[1].x || pair[0].y == pair[1].y, "{pair:?}");
        }
    }

    #[test]
    fn retry_factors_are_sorted_and_sane() {
        assert_eq!(retry_factors(&[2.0, 1.0, f64::NAN, 1.0, -3.0, 1.5]), vec![1.0, 1.5, 2.0]);
        assert_eq!(retry_factors(&[]), vec![1.0]);
    }
}
