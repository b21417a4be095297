//! Fog of war: per-side SHROUDED / FOGGED / CLEAR grids.
//!
//! Each frame, every alive, non-MASKED, side-owned entity with vision stamps
//! CLEAR in a disc around itself. Cells that were CLEAR and are no longer
//! covered decay to FOGGED; nothing ever returns to SHROUDED.

use std::collections::BTreeMap;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Cell size in world units; matches the pathfind grid.
pub const FOG_CELL_SIZE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellVisibility {
    Shrouded = 0,
    Fogged = 1,
    Clear = 2,
}

#[derive(Debug, Clone, Default)]
struct FowGrid {
    cells: Vec<u8>,
}

/// Per-side fog grids. With no map loaded every query reports CLEAR.
#[derive(Resource, Debug, Clone, Default)]
pub struct FogOfWar {
    width: usize,
    height: usize,
    grids: BTreeMap<String, FowGrid>,
}

impl FogOfWar {
    /// Size the grid to cover `world_w` x `world_h` world units.
    pub fn sized(world_w: f32, world_h: f32) -> Self {
        Self {
            width: (world_w / FOG_CELL_SIZE).ceil() as usize,
            height: (world_h / FOG_CELL_SIZE).ceil() as usize,
            grids: BTreeMap::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn ensure_side(&mut self, side: &str) {
        if !self.is_loaded() {
            return;
        }
        let cell_count = self.width * self.height;
        self.grids
            .entry(side.to_string())
            .or_insert_with(|| FowGrid {
                cells: vec![CellVisibility::Shrouded as u8; cell_count],
            });
    }

    fn cell_index(&self, x: f32, z: f32) -> Option<usize> {
        let gx = (x / FOG_CELL_SIZE).floor();
        let gz = (z / FOG_CELL_SIZE).floor();
        if gx < 0.0 || gz < 0.0 {
            return None;
        }
        let (gx, gz) = (gx as usize, gz as usize);
        if gx >= self.width || gz >= self.height {
            return None;
        }
        Some(gz * self.width + gx)
    }

    pub fn get_cell_visibility(&self, side: &str, x: f32, z: f32) -> CellVisibility {
        if !self.is_loaded() {
            return CellVisibility::Clear;
        }
        let Some(index) = self.cell_index(x, z) else {
            return CellVisibility::Shrouded;
        };
        match self.grids.get(side).and_then(|g| g.cells.get(index)) {
            Some(1) => CellVisibility::Fogged,
            Some(2) => CellVisibility::Clear,
            Some(_) => CellVisibility::Shrouded,
            None => CellVisibility::Shrouded,
        }
    }

    pub fn is_position_visible(&self, side: &str, x: f32, z: f32) -> bool {
        self.get_cell_visibility(side, x, z) == CellVisibility::Clear
    }

    /// Apply one frame of vision stamps for `side`.
    ///
    /// `stamps` are `(x, z, vision_range)` discs. CLEAR cells not covered
    /// this frame decay to FOGGED.
    pub fn update_side(&mut self, side: &str, stamps: &[(f32, f32, f32)]) {
        if !self.is_loaded() {
            return;
        }
        self.ensure_side(side);
        let (width, height) = (self.width, self.height);
        let Some(grid) = self.grids.get_mut(side) else {
            return;
        };

        let mut covered = vec![false; width * height];
        for &(x, z, range) in stamps {
            if range <= 0.0 {
                continue;
            }
            let min_gx = (((x - range) / FOG_CELL_SIZE).floor().max(0.0)) as usize;
            let min_gz = (((z - range) / FOG_CELL_SIZE).floor().max(0.0)) as usize;
            let max_gx = (((x + range) / FOG_CELL_SIZE).ceil() as usize).min(width - 1);
            let max_gz = (((z + range) / FOG_CELL_SIZE).ceil() as usize).min(height - 1);
            let range_sq = range * range;
            for gz in min_gz..=max_gz {
                for gx in min_gx..=max_gx {
                    let cx = (gx as f32 + 0.5) * FOG_CELL_SIZE;
                    let cz = (gz as f32 + 0.5) * FOG_CELL_SIZE;
                    let dx = cx - x;
                    let dz = cz - z;
                    if dx * dx + dz * dz <= range_sq {
                        covered[gz * width + gx] = true;
                    }
                }
            }
        }

        for (cell, is_covered) in grid.cells.iter_mut().zip(covered.iter()) {
            if *is_covered {
                *cell = CellVisibility::Clear as u8;
            } else if *cell == CellVisibility::Clear as u8 {
                *cell = CellVisibility::Fogged as u8;
            }
        }
    }
}

/// Frame phase 8: stamp every side's vision and decay lost coverage.
pub fn fog_phase(world: &mut bevy_ecs::world::World) {
    use crate::components::{Allegiance, Body, Contained, EntityIndex, Position, Status, Vision};

    let sides = world.resource::<crate::sides::SideTable>().names();
    let ids = world.resource::<EntityIndex>().ids();

    for side in sides {
        let mut stamps = Vec::new();
        for id in &ids {
            let Some(entity) = world.resource::<EntityIndex>().entity(*id) else {
                continue;
            };
            let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
            if !alive || world.get::<Contained>(entity).is_some() {
                continue;
            }
            let status = world.get::<Status>(entity).copied().unwrap_or_default();
            if status.contains(Status::MASKED) {
                continue;
            }
            let owned = world
                .get::<Allegiance>(entity)
                .map(|a| a.side == side)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            let range = world
                .get::<Vision>(entity)
                .map(|v| v.effective())
                .unwrap_or(0.0);
            if range <= 0.0 {
                continue;
            }
            let Some(position) = world.get::<Position>(entity) else {
                continue;
            };
            stamps.push((position.x, position.z, range));
        }
        world
            .resource_mut::<FogOfWar>()
            .update_side(&side, &stamps);
    }
}
