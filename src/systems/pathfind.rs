//! Grid A* pathfinding on fixed-size cells.
//!
//! Deliberately plain: 8-connected A* over an unweighted grid sized from the
//! heightmap extent. Enough for deterministic movement; not a navigation
//! showcase. Ties in the open set break on insertion order so identical
//! inputs always produce identical paths.

use std::collections::{BinaryHeap, HashMap};

use crate::terrain::HeightGrid;

/// Pathfind cell size in world units.
pub const PATH_CELL_SIZE: f32 = 10.0;

/// Default grid extent (cells per axis) when no heightmap is loaded.
const DEFAULT_EXTENT: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    /// Negated f-score so the max-heap pops the cheapest node.
    neg_f: i64,
    /// Insertion sequence; later insertions lose ties.
    neg_seq: i64,
    cell: (i32, i32),
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.neg_f, self.neg_seq).cmp(&(other.neg_f, other.neg_seq))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub fn world_to_cell(x: f32, z: f32) -> (i32, i32) {
    (
        (x / PATH_CELL_SIZE).floor() as i32,
        (z / PATH_CELL_SIZE).floor() as i32,
    )
}

pub fn cell_center(cell: (i32, i32)) -> (f32, f32) {
    (
        (cell.0 as f32 + 0.5) * PATH_CELL_SIZE,
        (cell.1 as f32 + 0.5) * PATH_CELL_SIZE,
    )
}

fn grid_extent(grid: &HeightGrid) -> (i32, i32) {
    if grid.is_empty() {
        (DEFAULT_EXTENT, DEFAULT_EXTENT)
    } else {
        let (w, h) = grid.world_bounds();
        (
            (w / PATH_CELL_SIZE).ceil().max(1.0) as i32,
            (h / PATH_CELL_SIZE).ceil().max(1.0) as i32,
        )
    }
}

/// Octile-distance heuristic scaled by 10/14 to stay integral.
fn heuristic(a: (i32, i32), b: (i32, i32)) -> i64 {
    let dx = (a.0 - b.0).abs() as i64;
    let dz = (a.1 - b.1).abs() as i64;
    let diag = dx.min(dz);
    let straight = dx.max(dz) - diag;
    14 * diag + 10 * straight
}

/// A* from one world position to another. Returns waypoints (cell centers)
/// excluding the start cell, ending at the goal position itself. An empty
/// vector means start and goal share a cell; `None` means the goal is
/// unreachable within the grid bounds.
pub fn find_path(
    grid: &HeightGrid,
    from: (f32, f32),
    to: (f32, f32),
) -> Option<Vec<(f32, f32)>> {
    let (extent_x, extent_z) = grid_extent(grid);
    let clamp = |cell: (i32, i32)| -> (i32, i32) {
        (
            cell.0.clamp(0, extent_x - 1),
            cell.1.clamp(0, extent_z - 1),
        )
    };
    let start = clamp(world_to_cell(from.0, from.1));
    let goal = clamp(world_to_cell(to.0, to.1));

    if start == goal {
        return Some(vec![to]);
    }

    let mut open = BinaryHeap::new();
    let mut came_from: HashMap<(i32, i32), (i32, i32)> = HashMap::new();
    let mut g_score: HashMap<(i32, i32), i64> = HashMap::new();
    let mut seq: i64 = 0;

    g_score.insert(start, 0);
    open.push(OpenNode {
        neg_f: -heuristic(start, goal),
        neg_seq: 0,
        cell: start,
    });

    const NEIGHBORS: [((i32, i32), i64); 8] = [
        ((1, 0), 10),
        ((-1, 0), 10),
        ((0, 1), 10),
        ((0, -1), 10),
        ((1, 1), 14),
        ((1, -1), 14),
        ((-1, 1), 14),
        ((-1, -1), 14),
    ];

    while let Some(node) = open.pop() {
        let current = node.cell;
        if current == goal {
            let mut cells = vec![current];
            let mut cursor = current;
            while let Some(&previous) = came_from.get(&cursor) {
                cells.push(previous);
                cursor = previous;
            }
            cells.reverse();
            let mut waypoints: Vec<(f32, f32)> =
                cells[1..].iter().map(|c| cell_center(*c)).collect();
            // Land exactly on the requested goal point.
            if let Some(last) = waypoints.last_mut() {
                *last = to;
            }
            return Some(waypoints);
        }

        let current_g = g_score.get(&current).copied().unwrap_or(i64::MAX);
        for ((dx, dz), step_cost) in NEIGHBORS {
            let neighbor = (current.0 + dx, current.1 + dz);
            if neighbor.0 < 0 || neighbor.1 < 0 || neighbor.0 >= extent_x || neighbor.1 >= extent_z
            {
                continue;
            }
            let tentative = current_g + step_cost;
            if tentative < g_score.get(&neighbor).copied().unwrap_or(i64::MAX) {
                came_from.insert(neighbor, current);
                g_score.insert(neighbor, tentative);
                seq += 1;
                open.push(OpenNode {
                    neg_f: -(tentative + heuristic(neighbor, goal)),
                    neg_seq: -seq,
                    cell: neighbor,
                });
            }
        }
    }

    None
}
