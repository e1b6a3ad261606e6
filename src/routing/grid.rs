use std::ops::{Index, IndexMut};
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::geometry::{Point, Rect};

use super::config::Resolution;
use super::obstacles::sanitize_obstacles;
use super::signature::Signature;
use super::types::GridSize;

/// Upper bound on cells along either axis, whatever the aspect ratio.
const MAX_AXIS_CELLS: usize = 2048;
const MIN_AXIS_CELLS: usize = 4;

#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Debug)]
pub(crate) struct GridPoint(pub u32);

impl<T> Index<GridPoint> for Vec<T> {
    type Output = T;

    fn index(&self, index: GridPoint) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl<T> IndexMut<GridPoint> for Vec<T> {
    fn index_mut(&mut self, index: GridPoint) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

/// Fixed-size bitset of blocked cells, row-major.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        BitSet {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// Inputs that fully determine a [`Grid`].
#[derive(Clone, Copy, Debug)]
pub struct GridSpec<'a> {
    pub view_box: Rect,
    pub resolution: Resolution,
    pub obstacles: &'a [Rect],
    pub clearance: f64,
    /// `true` when `obstacles` are raw boxes that still need `clearance` applied.
    pub inflate: bool,
}

impl<'a> GridSpec<'a> {
    pub fn new(view_box: Rect, resolution: Resolution, obstacles: &'a [Rect], clearance: f64) -> Self {
        GridSpec {
            view_box,
            resolution,
            obstacles,
            clearance,
            inflate: false,
        }
    }

    pub fn raw_obstacles(mut self) -> Self {
        self.inflate = true;
        self
    }

    fn sanitized_view_box(&self) -> Rect {
        let vb = self.view_box;
        if !vb.is_finite() {
            return Rect::new(0.0, 0.0, 1.0, 1.0);
        }
        Rect::new(vb.x, vb.y, vb.w.max(1.0), vb.h.max(1.0))
    }

    pub fn size(&self) -> GridSize {
        let vb = self.sanitized_view_box();
        let clamp = |value: usize| value.clamp(1, MAX_AXIS_CELLS);
        match self.resolution {
            Resolution::Explicit([cols, rows]) => GridSize {
                cols: clamp(cols),
                rows: clamp(rows),
            },
            Resolution::Columns(columns) => {
                let columns = if columns.is_finite() { columns.floor().max(0.0) as usize } else { 0 };
                let cols = clamp(columns.max(MIN_AXIS_CELLS));
                let rows = (cols as f64 * vb.h / vb.w).round() as usize;
                GridSize {
                    cols,
                    rows: clamp(rows.max(MIN_AXIS_CELLS)),
                }
            }
        }
    }

    fn effective_obstacles(&self) -> Vec<Rect> {
        if self.inflate {
            let inflated: Vec<Rect> = self.obstacles.iter().map(|rect| rect.inflate(self.clearance)).collect();
            sanitize_obstacles(&inflated)
        } else {
            sanitize_obstacles(self.obstacles)
        }
    }

    pub fn signature(&self) -> u64 {
        let size = self.size();
        Signature::new("grid")
            .rect(&self.sanitized_view_box())
            .count(size.cols)
            .count(size.rows)
            .rects(self.obstacles)
            .scalar(self.clearance)
            .count(self.inflate as usize)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub cols: usize,
    pub rows: usize,
    pub cell_w: f64,
    pub cell_h: f64,
    pub blocked: BitSet,
    pub signature: u64,
    pub view_box: Rect,
}

impl Grid {
    /// `buildGrid`: rasterize the view box and mark every cell an obstacle overlaps.
    pub fn build(spec: &GridSpec) -> Grid {
        let view_box = spec.sanitized_view_box();
        let GridSize { cols, rows } = spec.size();
        let cell_w = view_box.w / cols as f64;
        let cell_h = view_box.h / rows as f64;
        let mut grid = Grid {
            cols,
            rows,
            cell_w,
            cell_h,
            blocked: BitSet::new(cols * rows),
            signature: spec.signature(),
            view_box,
        };

        for obstacle in spec.effective_obstacles() {
            if !obstacle.overlaps(&view_box) {
                continue;
            }
            let Some((min_col, max_col)) = grid.span(obstacle.left(), obstacle.right(), view_box.x, cell_w, cols)
            else {
                continue;
            };
            let Some((min_row, max_row)) = grid.span(obstacle.top(), obstacle.bottom(), view_box.y, cell_h, rows)
            else {
                continue;
            };
            for row in min_row..=max_row {
                for col in min_col..=max_col {
                    grid.blocked.set(row * cols + col);
                }
            }
        }

        trace!(
            cols,
            rows,
            blocked = grid.blocked.count_ones(),
            signature = grid.signature,
            "built routing grid"
        );
        grid
    }

    /// Inclusive range of cells whose half-open extent overlaps the open interval `(lo, hi)`.
    fn span(&self, lo: f64, hi: f64, origin: f64, cell: f64, count: usize) -> Option<(usize, usize)> {
        let first = ((lo - origin) / cell).floor();
        let last = ((hi - origin) / cell).ceil() - 1.0;
        if last < 0.0 || first > (count - 1) as f64 || last < first {
            return None;
        }
        Some((first.max(0.0) as usize, (last as usize).min(count - 1)))
    }

    pub fn size(&self) -> GridSize {
        GridSize {
            cols: self.cols,
            rows: self.rows,
        }
    }

    pub fn cell_diagonal(&self) -> f64 {
        (self.cell_w.powi(2) + self.cell_h.powi(2)).sqrt()
    }

    pub(crate) fn grid_coords_to_grid_point(&self, col: usize, row: usize) -> Option<GridPoint> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        Some(GridPoint((row * self.cols + col) as u32))
    }

    pub(crate) fn grid_point_to_grid_coords(&self, point: GridPoint) -> Option<(usize, usize)> {
        let index = point.0 as usize;
        if index >= self.cols * self.rows {
            return None;
        }
        Some((index % self.cols, index / self.cols))
    }

    pub fn is_blocked(&self, col: usize, row: usize) -> bool {
        col >= self.cols || row >= self.rows || self.blocked.get(row * self.cols + col)
    }

    pub fn cell_center(&self, col: usize, row: usize) -> Point {
        Point {
            x: self.view_box.x + (col as f64 + 0.5) * self.cell_w,
            y: self.view_box.y + (row as f64 + 0.5) * self.cell_h,
        }
    }

    /// Nearest in-bounds cell to `point`.
    pub fn snap(&self, point: &Point) -> (usize, usize) {
        let clamp = |value: f64, count: usize| {
            if !value.is_finite() || value < 0.0 {
                0
            } else {
                (value.floor() as usize).min(count - 1)
            }
        };
        (
            clamp((point.x - self.view_box.x) / self.cell_w, self.cols),
            clamp((point.y - self.view_box.y) / self.cell_h, self.rows),
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Grids cached per render root, keyed by signature.
///
/// Each root keeps at most `capacity` grids; the least recently used is dropped first.
#[derive(Debug)]
pub struct GridCache {
    roots: HashMap<String, IndexMap<u64, Arc<Grid>>>,
    capacity: usize,
    stats: CacheStats,
}

impl Default for GridCache {
    fn default() -> Self {
        GridCache::new(8)
    }
}

impl GridCache {
    pub fn new(capacity: usize) -> Self {
        GridCache {
            roots: HashMap::new(),
            capacity: capacity.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn get_or_build(&mut self, root: &str, spec: &GridSpec) -> Arc<Grid> {
        let signature = spec.signature();
        let capacity = self.capacity;
        let grids = self.roots.entry_ref(root).or_default();

        if let Some(grid) = grids.shift_remove(&signature) {
            self.stats.hits += 1;
            grids.insert(signature, Arc::clone(&grid));
            return grid;
        }

        self.stats.misses += 1;
        let grid = Arc::new(Grid::build(spec));
        grids.insert(signature, Arc::clone(&grid));
        while grids.len() > capacity {
            grids.shift_remove_index(0);
        }
        debug!(%root, signature, cached = grids.len(), "grid cache miss");
        grid
    }

    /// Release every grid owned by `root`.
    pub fn drop_root(&mut self, root: &str) {
        self.roots.remove(root);
    }

    pub fn cached(&self, root: &str) -> usize {
        self.roots.get(root).map_or(0, |grids| grids.len())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
