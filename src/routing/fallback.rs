use crate::geometry::{AxisOrder, Point, Rect};

use super::config::CornerStyle;
use super::cost::{compress_collinear, coord, to_path_data};

/// Everything the direct-route generator needs for one connector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectRouteRequest {
    pub start: Point,
    pub target: Option<Rect>,
    pub endpoint: Point,
    pub radius: f64,
    pub corner_style: CornerStyle,
    pub axis_order: Option<AxisOrder>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectRoute {
    pub d: String,
    /// Corner points of the route, when the generator exposes them.
    pub points: Vec<Point>,
}

/// The universal fallback: must always produce a drawable path.
pub trait DirectRouteGenerator {
    fn route(&self, request: &DirectRouteRequest) -> DirectRoute;
}

/// Orthogonal one-elbow route with optional rounded corner.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElbowRoute;

impl ElbowRoute {
    fn axis_order(request: &DirectRouteRequest) -> AxisOrder {
        if let Some(order) = request.axis_order {
            return order;
        }
        let dx = (request.endpoint.x - request.start.x).abs();
        let dy = (request.endpoint.y - request.start.y).abs();
        if dx >= dy {
            AxisOrder::XThenY
        } else {
            AxisOrder::YThenX
        }
    }
}

impl DirectRouteGenerator for ElbowRoute {
    fn route(&self, request: &DirectRouteRequest) -> DirectRoute {
        let start = request.start;
        let end = request.endpoint;
        let elbow = Self::axis_order(request).elbow(start, end);
        let points = compress_collinear(&[start, elbow, end]);

        let d = match request.corner_style {
            CornerStyle::Rounded if request.radius > 0.0 => rounded_path_data(&points, request.radius),
            _ => zero_length_safe(&points),
        };
        DirectRoute { d, points }
    }
}

/// Path data that always contains at least one segment.
pub(crate) fn zero_length_safe(points: &[Point]) -> String {
    match points {
        [] => String::new(),
        [only] => to_path_data(&[*only, *only]),
        _ => to_path_data(points),
    }
}

fn unit_towards(from: Point, to: Point) -> Point {
    let length = from.distance(&to);
    if length == 0.0 {
        return Point::new(0.0, 0.0);
    }
    Point::new((to.x - from.x) / length, (to.y - from.y) / length)
}

/// Like [`to_path_data`], replacing each interior corner with a quadratic curve of `radius`.
pub fn rounded_path_data(points: &[Point], radius: f64) -> String {
    if points.len() < 3 {
        return zero_length_safe(points);
    }
    let pair = |p: Point| format!("{},{}", coord(p.x), coord(p.y));
    let mut parts = vec![format!("M {}", pair(points[0]))];
    for i in 1..points.len() - 1 {
        let (prev, corner, next) = (points[i - 1], points[i], points[i + 1]);
        let r = radius
            .min(prev.distance(&corner) / 2.0)
            .min(corner.distance(&next) / 2.0);
        let incoming = unit_towards(corner, prev);
        let outgoing = unit_towards(corner, next);
        let before = Point::new(corner.x + incoming.x * r, corner.y + incoming.y * r);
        let after = Point::new(corner.x + outgoing.x * r, corner.y + outgoing.y * r);
        parts.push(format!("L {}", pair(before)));
        parts.push(format!("Q {} {}", pair(corner), pair(after)));
    }
    parts.push(format!("L {}", pair(points[points.len() - 1])));
    parts.join(" ")
}
