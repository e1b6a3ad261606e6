use hashbrown::HashMap;
use rstar::{RTree, RTreeObject, AABB};
use tracing::{trace, warn};

use crate::geometry::{RawBox, Rect};

use super::error::SourceError;
use super::signature::hash_rects;

/// Boxes smaller than this (in square units) are layout noise, not obstacles.
pub const MIN_OBSTACLE_AREA: f64 = 4.0;

/// Host-side lookup of element bounds in diagram coordinates.
pub trait BoundsSource {
    /// `Ok(None)` means the element does not exist (or is not rendered) under `root`.
    fn bounds(&self, root: &str, id: &str) -> Result<Option<RawBox>, SourceError>;
}

/// A map-backed [`BoundsSource`] shared by every root.
#[derive(Clone, Debug, Default)]
pub struct StaticBounds {
    boxes: HashMap<String, RawBox>,
}

impl StaticBounds {
    pub fn new() -> Self {
        StaticBounds::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, raw: impl Into<RawBox>) -> &mut Self {
        self.boxes.insert(id.into(), raw.into());
        self
    }

    pub fn with(mut self, id: impl Into<String>, raw: impl Into<RawBox>) -> Self {
        self.insert(id, raw);
        self
    }
}

impl BoundsSource for StaticBounds {
    fn bounds(&self, _root: &str, id: &str) -> Result<Option<RawBox>, SourceError> {
        Ok(self.boxes.get(id).copied())
    }
}

/// Clearance-inflated obstacle rectangles plus their content signature.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ObstacleSet {
    pub rects: Vec<Rect>,
    pub signature: u64,
}

impl ObstacleSet {
    pub fn from_rects(rects: Vec<Rect>) -> Self {
        let signature = hash_rects(&rects);
        ObstacleSet { rects, signature }
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}

fn accept(rect: Rect) -> Option<Rect> {
    if !rect.is_finite() || rect.area() < MIN_OBSTACLE_AREA || rect.w <= 0.0 || rect.h <= 0.0 {
        return None;
    }
    Some(rect)
}

/// Normalize heterogeneous boxes, dropping degenerate ones, and inflate by `clearance`.
pub fn normalize_obstacles<I>(boxes: I, clearance: f64) -> Vec<Rect>
where
    I: IntoIterator<Item = RawBox>,
{
    boxes
        .into_iter()
        .filter_map(|raw| raw.normalize())
        .filter_map(accept)
        .map(|rect| rect.inflate(clearance))
        .filter_map(accept)
        .collect()
}

/// Drop degenerate rectangles from a list that is already clearance-inflated.
pub fn sanitize_obstacles(rects: &[Rect]) -> Vec<Rect> {
    rects.iter().copied().filter_map(accept).collect()
}

/// Resolve each id through `source`, inflate by `clearance`.
///
/// Ids that do not resolve, or whose lookup fails, are skipped.
pub fn collect_obstacles<S>(source: &S, root: &str, ids: &[String], clearance: f64) -> ObstacleSet
where
    S: BoundsSource + ?Sized,
{
    let mut boxes = Vec::with_capacity(ids.len());
    for id in ids {
        match source.bounds(root, id) {
            Ok(Some(raw)) => boxes.push(raw),
            Ok(None) => trace!(%root, %id, "obstacle id did not resolve"),
            Err(error) => warn!(%root, %id, %error, "skipping obstacle after bounds lookup failure"),
        }
    }
    ObstacleSet::from_rects(normalize_obstacles(boxes, clearance))
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct IndexedRect {
    index: usize,
    rect: Rect,
}

impl RTreeObject for IndexedRect {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.rect.left(), self.rect.top()], [self.rect.right(), self.rect.bottom()])
    }
}

/// Spatial index over an obstacle list.
pub struct ObstacleIndex {
    tree: RTree<IndexedRect>,
}

impl ObstacleIndex {
    pub fn new(rects: &[Rect]) -> Self {
        let items = rects
            .iter()
            .enumerate()
            .map(|(index, rect)| IndexedRect { index, rect: *rect })
            .collect();
        ObstacleIndex {
            tree: RTree::bulk_load(items),
        }
    }

    /// Indices (in original list order) of obstacles whose envelope touches `area`.
    pub fn candidates(&self, area: &Rect) -> Vec<usize> {
        let envelope = AABB::from_corners([area.left(), area.top()], [area.right(), area.bottom()]);
        let mut indices: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| item.index)
            .collect();
        indices.sort_unstable();
        indices
    }
}
