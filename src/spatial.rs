//! Spatial partitioning for efficient neighbor queries.
//!
//! Provides O(1) cell lookup and O(k) neighbor queries where k is the number
//! of entities in nearby cells, rather than O(n) for brute force. Results are
//! ordered by distance with ObjectId as the tie-break, so query order never
//! depends on hash-map iteration.

use std::collections::HashMap;

use bevy_ecs::prelude::*;

use crate::components::ObjectId;

/// Grid-based spatial partitioning structure, rebuilt every frame.
#[derive(Resource, Debug)]
pub struct SpatialGrid {
    /// Cell size in world units.
    pub cell_size: f32,
    cells: HashMap<(i32, i32), Vec<SpatialEntry>>,
    count: usize,
}

/// Entry in a spatial cell.
#[derive(Debug, Clone, Copy)]
pub struct SpatialEntry {
    pub entity: Entity,
    pub id: ObjectId,
    pub x: f32,
    pub z: f32,
    /// Stable side index from the side table.
    pub side: u8,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(40.0)
    }
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            count: 0,
        }
    }

    #[inline]
    pub fn world_to_cell(&self, x: f32, z: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (z / self.cell_size).floor() as i32,
        )
    }

    /// Clear all entries (call at start of each frame before rebuilding).
    pub fn clear(&mut self) {
        self.cells.clear();
        self.count = 0;
    }

    pub fn insert(&mut self, entity: Entity, id: ObjectId, x: f32, z: f32, side: u8) {
        let cell = self.world_to_cell(x, z);
        self.cells
            .entry(cell)
            .or_default()
            .push(SpatialEntry { entity, id, x, z, side });
        self.count += 1;
    }

    /// All entities within `radius` of a point, nearest first
    /// (ObjectId breaks ties).
    pub fn query_radius(&self, x: f32, z: f32, radius: f32) -> Vec<SpatialEntry> {
        let radius_sq = radius * radius;
        let cells_to_check = (radius / self.cell_size).ceil() as i32 + 1;
        let center = self.world_to_cell(x, z);

        let mut results = Vec::new();
        for dx in -cells_to_check..=cells_to_check {
            for dz in -cells_to_check..=cells_to_check {
                let cell = (center.0 + dx, center.1 + dz);
                if let Some(entries) = self.cells.get(&cell) {
                    for entry in entries {
                        let dist_sq = (entry.x - x).powi(2) + (entry.z - z).powi(2);
                        if dist_sq <= radius_sq {
                            results.push(*entry);
                        }
                    }
                }
            }
        }

        results.sort_by(|a, b| {
            let dist_a = (a.x - x).powi(2) + (a.z - z).powi(2);
            let dist_b = (b.x - x).powi(2) + (b.z - z).powi(2);
            dist_a
                .partial_cmp(&dist_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        results
    }

    /// Entities of one side within radius.
    pub fn query_side(&self, x: f32, z: f32, radius: f32, side: u8) -> Vec<SpatialEntry> {
        let mut results = self.query_radius(x, z, radius);
        results.retain(|e| e.side == side);
        results
    }

    /// Entities not of the given side within radius.
    pub fn query_other_sides(&self, x: f32, z: f32, radius: f32, side: u8) -> Vec<SpatialEntry> {
        let mut results = self.query_radius(x, z, radius);
        results.retain(|e| e.side != side);
        results
    }

    pub fn total_count(&self) -> usize {
        self.count
    }
}

/// Rebuild the grid from live entities, in ascending id order.
pub fn rebuild_spatial_grid(world: &mut bevy_ecs::world::World) {
    use crate::components::{Allegiance, Body, EntityIndex, Position};
    use crate::sides::SideTable;

    let ids = world.resource::<EntityIndex>().ids();
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(entity) = world.resource::<EntityIndex>().entity(id) else {
            continue;
        };
        let Some(body) = world.get::<Body>(entity) else {
            continue;
        };
        if !body.alive {
            continue;
        }
        let Some(position) = world.get::<Position>(entity) else {
            continue;
        };
        let side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        let side_index = world.resource::<SideTable>().side_index(&side);
        entries.push((entity, id, position.x, position.z, side_index));
    }

    let mut grid = world.resource_mut::<SpatialGrid>();
    grid.clear();
    for (entity, id, x, z, side) in entries {
        grid.insert(entity, id, x, z, side);
    }
}
