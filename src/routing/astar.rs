use std::cmp::Reverse;

use priority_queue::PriorityQueue;
use tracing::debug;

use crate::geometry::{Direction, Point};

use super::config::CostWeights;
use super::cost::{compress_collinear, quantize_path, score_path};
use super::grid::{Grid, GridPoint};
use super::signature::hash_path;
use super::types::{GridFailure, GridOutcome, GridRoute, ReasonCode};

/// Cost of one step between neighbouring cells.
const STEP_COST: u32 = 1000;
/// Tie-break for changing direction: 0.001 of a step.
const TURN_PENALTY: u32 = 1;
/// Direction slot of the start state, which has no incoming direction.
const NO_DIRECTION: usize = 4;
const SLOTS: usize = 5;
const UNSET: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchLimits {
    pub max_expansions: usize,
    /// Accepted end distance in cell diagonals.
    pub endpoint_tolerance: f64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            max_expansions: 6000,
            endpoint_tolerance: 1.5,
        }
    }
}

/// Search state: a cell entered from a direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct GridState {
    index: GridPoint,
    slot: usize,
}

impl GridState {
    fn key(&self) -> usize {
        self.index.0 as usize * SLOTS + self.slot
    }
}

fn manhattan_cells(a: (usize, usize), b: (usize, usize)) -> u32 {
    (a.0.abs_diff(b.0) + a.1.abs_diff(b.1)) as u32
}

/// `aStar`: 4-neighbour search from the cell holding `start` to the cell holding `end`.
///
/// Failures come back as [`GridFailure`] values tagged with a reason code.
pub fn a_star(grid: &Grid, start: Point, end: Point, limits: &SearchLimits, weights: &CostWeights) -> GridOutcome {
    let failure = |reason: ReasonCode, expansions: usize| {
        debug!(%reason, expansions, cols = grid.cols, rows = grid.rows, "grid search rejected");
        GridFailure {
            reason,
            resolution: grid.size(),
            grid_signature: grid.signature,
            expansions,
        }
    };

    let start_coords = grid.snap(&start);
    let end_coords = grid.snap(&end);
    if grid.is_blocked(start_coords.0, start_coords.1) {
        return Err(failure(ReasonCode::StartBlocked, 0));
    }
    if grid.is_blocked(end_coords.0, end_coords.1) {
        return Err(failure(ReasonCode::EndBlocked, 0));
    }
    let (Some(start_point), Some(goal_point)) = (
        grid.grid_coords_to_grid_point(start_coords.0, start_coords.1),
        grid.grid_coords_to_grid_point(end_coords.0, end_coords.1),
    ) else {
        return Err(failure(ReasonCode::NoPath, 0));
    };

    let state_count = grid.cols * grid.rows * SLOTS;
    let mut g_score: Vec<u32> = vec![UNSET; state_count];
    let mut came_from: Vec<u32> = vec![UNSET; state_count];
    let mut closed: Vec<bool> = vec![false; state_count];
    let mut open_set: PriorityQueue<GridState, Reverse<(u32, u32)>> = PriorityQueue::new();

    let start_state = GridState {
        index: start_point,
        slot: NO_DIRECTION,
    };
    let start_h = manhattan_cells(start_coords, end_coords) * STEP_COST;
    g_score[start_state.key()] = 0;
    open_set.push(start_state, Reverse((start_h, start_h)));

    let mut expansions = 0usize;
    let mut goal_state = None;

    while let Some((current, _)) = open_set.pop() {
        if current.index == goal_point {
            goal_state = Some(current);
            break;
        }
        if closed[current.key()] {
            continue;
        }
        closed[current.key()] = true;

        expansions += 1;
        if expansions > limits.max_expansions {
            return Err(failure(ReasonCode::ExpansionCap, expansions - 1));
        }

        let Some((col, row)) = grid.grid_point_to_grid_coords(current.index) else {
            continue;
        };
        let current_g = g_score[current.key()];

        for direction in Direction::ALL {
            let (dx, dy) = direction.delta();
            let next_col = col as i64 + dx;
            let next_row = row as i64 + dy;
            if next_col < 0 || next_row < 0 {
                continue;
            }
            let (next_col, next_row) = (next_col as usize, next_row as usize);
            if grid.is_blocked(next_col, next_row) {
                continue;
            }
            let Some(next_index) = grid.grid_coords_to_grid_point(next_col, next_row) else {
                continue;
            };
            let next = GridState {
                index: next_index,
                slot: direction as usize,
            };
            if closed[next.key()] {
                continue;
            }

            let turn = current.slot != NO_DIRECTION && current.slot != next.slot;
            let tentative_g = current_g + STEP_COST + if turn { TURN_PENALTY } else { 0 };
            if tentative_g >= g_score[next.key()] {
                continue;
            }
            g_score[next.key()] = tentative_g;
            came_from[next.key()] = current.key() as u32;
            let h = manhattan_cells((next_col, next_row), end_coords) * STEP_COST;
            open_set.push_increase(next, Reverse((tentative_g + h, h)));
        }
    }

    let Some(goal_state) = goal_state else {
        return Err(failure(ReasonCode::NoPath, expansions));
    };

    let mut cells = Vec::new();
    let mut cursor = goal_state.key();
    loop {
        let cell = GridPoint((cursor / SLOTS) as u32);
        if let Some((col, row)) = grid.grid_point_to_grid_coords(cell) {
            cells.push(grid.cell_center(col, row));
        }
        let previous = came_from[cursor];
        if previous == UNSET {
            break;
        }
        cursor = previous as usize;
    }
    cells.reverse();

    let points = compress_collinear(&quantize_path(&cells));

    let Some(last) = points.last() else {
        return Err(failure(ReasonCode::TooShort, expansions));
    };
    let end_delta = last.distance(&end);
    if end_delta > limits.endpoint_tolerance * grid.cell_diagonal() {
        return Err(failure(ReasonCode::EndpointMismatch, expansions));
    }
    if points.len() < 2 {
        return Err(failure(ReasonCode::TooShort, expansions));
    }

    let cost = score_path(&points, weights);
    debug!(
        expansions,
        bends = cost.bends,
        points = points.len(),
        cols = grid.cols,
        rows = grid.rows,
        "grid search found path"
    );
    Ok(GridRoute {
        path_hash: hash_path(&points),
        points,
        cost,
        grid_signature: grid.signature,
        end_delta,
        resolution: grid.size(),
        expansions,
    })
}
