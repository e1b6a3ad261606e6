use serde::{Deserialize, Serialize};

use crate::geometry::Point;

use super::config::CostWeights;

/// Points of grid routes are snapped to this step before compression.
pub const QUANTUM: f64 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct PathCost {
    pub distance_cost: f64,
    pub bend_cost: f64,
    pub bends: usize,
    pub total: f64,
}

fn step_direction(from: &Point, to: &Point) -> Option<(i8, i8)> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    let sign = |v: f64| {
        if v > 0.0 {
            1
        } else if v < 0.0 {
            -1
        } else {
            0
        }
    };
    Some((sign(dx), sign(dy)))
}

/// `scorePath`: L1 length and direction changes, weighted.
pub fn score_path(points: &[Point], weights: &CostWeights) -> PathCost {
    let mut length = 0.0;
    let mut bends = 0;
    let mut previous: Option<(i8, i8)> = None;

    for window in points.windows(2) {
        length += window[0].manhattan_distance(&window[1]);
        let Some(direction) = step_direction(&window[0], &window[1]) else {
            continue;
        };
        if let Some(prev) = previous {
            if prev != direction {
                bends += 1;
            }
        }
        previous = Some(direction);
    }

    let distance_cost = length * weights.distance;
    let bend_cost = bends as f64 * weights.bend;
    let total = distance_cost + bend_cost;
    if !total.is_finite() {
        return PathCost::default();
    }
    PathCost {
        distance_cost,
        bend_cost,
        bends,
        total,
    }
}

/// Drop repeated points and interior points that continue in the same direction.
pub fn compress_collinear(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for point in points {
        if out.last() == Some(point) {
            continue;
        }
        if out.len() >= 2 {
            let a = out[out.len() - 2];
            let b = out[out.len() - 1];
            let cross = (b.x - a.x) * (point.y - b.y) - (b.y - a.y) * (point.x - b.x);
            let dot = (b.x - a.x) * (point.x - b.x) + (b.y - a.y) * (point.y - b.y);
            if cross.abs() < 1e-9 && dot > 0.0 {
                out.pop();
            }
        }
        out.push(*point);
    }
    out
}

pub fn quantize_path(points: &[Point]) -> Vec<Point> {
    points.iter().map(|point| point.quantize(QUANTUM)).collect()
}

/// A coordinate rounded to three decimals, with `-0` printed as `0`.
pub(crate) fn coord(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{}", rounded)
}

/// Render points as `M x,y L x,y ...`.
pub fn to_path_data(points: &[Point]) -> String {
    let mut out = String::new();
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(if i == 0 { 'M' } else { 'L' });
        out.push(' ');
        out.push_str(&coord(point.x));
        out.push(',');
        out.push_str(&coord(point.y));
    }
    out
}
