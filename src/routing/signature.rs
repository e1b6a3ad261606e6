use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::geometry::{Point, Rect};

/// Order-sensitive content hash over geometry.
///
/// Floats are hashed by bit pattern, with `-0.0` folded into `0.0`, so equal
/// inputs always produce equal signatures within a process.
pub(crate) struct Signature {
    hasher: DefaultHasher,
}

impl Signature {
    pub fn new(tag: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        tag.hash(&mut hasher);
        Signature { hasher }
    }

    pub fn scalar(mut self, value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        value.to_bits().hash(&mut self.hasher);
        self
    }

    pub fn count(mut self, value: usize) -> Self {
        value.hash(&mut self.hasher);
        self
    }

    pub fn point(self, point: &Point) -> Self {
        self.scalar(point.x).scalar(point.y)
    }

    pub fn rect(self, rect: &Rect) -> Self {
        self.scalar(rect.x).scalar(rect.y).scalar(rect.w).scalar(rect.h)
    }

    pub fn rects(self, rects: &[Rect]) -> Self {
        rects.iter().fold(self.count(rects.len()), |acc, rect| acc.rect(rect))
    }

    pub fn points(self, points: &[Point]) -> Self {
        points.iter().fold(self.count(points.len()), |acc, point| acc.point(point))
    }

    pub fn finish(self) -> u64 {
        self.hasher.finish()
    }
}

/// Content hash of the rectangles in an obstacle set.
pub fn hash_rects(rects: &[Rect]) -> u64 {
    Signature::new("obstacles").rects(rects).finish()
}

/// Content hash of a routed path.
pub fn hash_path(points: &[Point]) -> u64 {
    Signature::new("path").points(points).finish()
}
