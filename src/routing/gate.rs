//! Cheap check deciding whether a direct one-elbow route would run into an obstacle.
//!
//! Used by `smart` mode to decide whether the grid search is worth running.
//! Each candidate elbow yields two corridor rectangles; an obstacle hits when
//! it overlaps a corridor (`bbox`) or sits within `proximity` of a segment
//! (`distance`). The first hit wins, so the report is deterministic for a
//! given obstacle order.

use serde::Serialize;
use tracing::trace;

use crate::geometry::{AxisOrder, Point, Rect};

use super::config::SmartSettings;
use super::obstacles::ObstacleIndex;
use super::types::ReasonCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Bbox,
    Distance,
    None,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Default, Serialize)]
pub struct GateDebug {
    pub elbows: Vec<Point>,
    pub corridors: Vec<Rect>,
    pub candidates: usize,
    pub hit_obstacle: Option<usize>,
    pub hit_elbow: Option<Point>,
    pub clearance: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GateReport {
    pub hit: bool,
    pub mode: GateMode,
    pub debug: GateDebug,
}

impl GateReport {
    fn skipped() -> Self {
        GateReport {
            hit: false,
            mode: GateMode::Skipped,
            debug: GateDebug::default(),
        }
    }

    /// `no_obstacles` when evaluation was skipped, `clear_path` when it ran clean.
    pub fn reason(&self) -> Option<ReasonCode> {
        match self.mode {
            GateMode::Skipped => Some(ReasonCode::NoObstacles),
            GateMode::None => Some(ReasonCode::ClearPath),
            GateMode::Bbox | GateMode::Distance => None,
        }
    }
}

/// Perpendicular clearance between an axis-aligned segment and `rect`.
///
/// Only defined where the rectangle overlaps the segment's extent along its
/// own axis; a zero-length segment measures straight-line distance instead.
fn segment_clearance(a: Point, b: Point, rect: &Rect) -> Option<f64> {
    let gap = |value: f64, lo: f64, hi: f64| {
        if value < lo {
            lo - value
        } else if value > hi {
            value - hi
        } else {
            0.0
        }
    };

    if a == b {
        let dx = gap(a.x, rect.left(), rect.right());
        let dy = gap(a.y, rect.top(), rect.bottom());
        return Some((dx * dx + dy * dy).sqrt());
    }
    if a.y == b.y {
        let (lo, hi) = (a.x.min(b.x), a.x.max(b.x));
        if rect.right() < lo || rect.left() > hi {
            return None;
        }
        return Some(gap(a.y, rect.top(), rect.bottom()));
    }
    if a.x == b.x {
        let (lo, hi) = (a.y.min(b.y), a.y.max(b.y));
        if rect.bottom() < lo || rect.top() > hi {
            return None;
        }
        return Some(gap(a.x, rect.left(), rect.right()));
    }
    None
}

fn candidate_elbows(start: Point, end: Point, forced: Option<AxisOrder>) -> Vec<Point> {
    match forced {
        Some(order) => vec![order.elbow(start, end)],
        None => {
            let first = AxisOrder::XThenY.elbow(start, end);
            let second = AxisOrder::YThenX.elbow(start, end);
            if first == second {
                vec![first]
            } else {
                vec![first, second]
            }
        }
    }
}

/// Decide whether the direct elbow route from `start` to `end` likely intersects an obstacle.
pub fn evaluate(
    start: Point,
    end: Point,
    obstacles: &[Rect],
    forced: Option<AxisOrder>,
    settings: &SmartSettings,
) -> GateReport {
    if obstacles.is_empty() && !settings.aggressive {
        return GateReport::skipped();
    }

    let proximity = settings.proximity.max(0.0);
    let pad = proximity + settings.epsilon.max(0.0);
    let elbows = candidate_elbows(start, end, forced);
    let index = ObstacleIndex::new(obstacles);

    let mut debug = GateDebug {
        elbows: elbows.clone(),
        ..GateDebug::default()
    };

    for elbow in elbows {
        let segments = [(start, elbow), (elbow, end)];
        let corridors = segments.map(|(a, b)| Rect::from_corners(a, b).inflate(pad));
        debug.corridors.extend(corridors.iter().copied());

        let search_area = corridors[0].union(&corridors[1]).inflate(proximity);
        let candidates = index.candidates(&search_area);
        debug.candidates += candidates.len();

        for obstacle_index in candidates {
            let obstacle = &obstacles[obstacle_index];

            if corridors.iter().any(|corridor| corridor.overlaps(obstacle)) {
                trace!(obstacle_index, ?elbow, "gate hit on corridor overlap");
                debug.hit_obstacle = Some(obstacle_index);
                debug.hit_elbow = Some(elbow);
                return GateReport {
                    hit: true,
                    mode: GateMode::Bbox,
                    debug,
                };
            }

            let closest = segments
                .iter()
                .filter_map(|(a, b)| segment_clearance(*a, *b, obstacle))
                .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.min(c))));
            if let Some(clearance) = closest {
                if clearance <= proximity {
                    trace!(obstacle_index, clearance, "gate hit on segment proximity");
                    debug.hit_obstacle = Some(obstacle_index);
                    debug.hit_elbow = Some(elbow);
                    debug.clearance = Some(clearance);
                    return GateReport {
                        hit: true,
                        mode: GateMode::Distance,
                        debug,
                    };
                }
            }
        }
    }

    GateReport {
        hit: false,
        mode: GateMode::None,
        debug,
    }
}
