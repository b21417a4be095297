//! Map input and terrain elevation sampling.
//!
//! The map arrives pre-parsed: a raw heightmap (base64 bytes), initial
//! object placements, and an optional waypoint graph. Triggers are carried
//! through untouched; the core does not interpret them.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::data::DataError;

/// World units between adjacent heightmap samples.
pub const SAMPLE_SPACING: f32 = 10.0;
/// World height per raw heightmap byte.
pub const HEIGHT_SCALE: f32 = 0.625;

// ============================================================================
// MAP INPUT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapData {
    pub heightmap: Option<HeightmapData>,
    pub objects: Vec<MapObject>,
    pub waypoints: Option<WaypointInput>,
    /// Carried through for the host; never interpreted here.
    pub triggers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeightmapData {
    pub width: usize,
    pub height: usize,
    /// Base64-encoded raw height bytes, row-major.
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapObject {
    pub template_name: String,
    pub angle: f32,
    pub position: MapPosition,
    pub properties: MapObjectProperties,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapObjectProperties {
    pub original_owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaypointInput {
    pub nodes: Vec<WaypointNode>,
    /// Node-id pairs.
    pub links: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaypointNode {
    pub id: u32,
    pub name: String,
    pub x: f32,
    pub z: f32,
}

// ============================================================================
// HEIGHT GRID
// ============================================================================

/// Bilinear elevation sampler over the raw heightmap bytes.
#[derive(Resource, Debug, Clone, Default)]
pub struct HeightGrid {
    width: usize,
    height: usize,
    samples: Vec<u8>,
}

impl HeightGrid {
    /// Flat grid; every sample reads zero elevation.
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn from_map(map: &MapData) -> Result<Self, DataError> {
        match &map.heightmap {
            Some(hm) => {
                let samples = BASE64.decode(hm.data.as_bytes())?;
                Ok(Self {
                    width: hm.width,
                    height: hm.height,
                    samples,
                })
            }
            None => Ok(Self::flat()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.samples.is_empty()
    }

    /// Grid extent in world units.
    pub fn world_bounds(&self) -> (f32, f32) {
        (
            self.width.saturating_sub(1) as f32 * SAMPLE_SPACING,
            self.height.saturating_sub(1) as f32 * SAMPLE_SPACING,
        )
    }

    fn sample(&self, gx: usize, gz: usize) -> f32 {
        let gx = gx.min(self.width.saturating_sub(1));
        let gz = gz.min(self.height.saturating_sub(1));
        let index = gz * self.width + gx;
        self.samples.get(index).copied().unwrap_or(0) as f32 * HEIGHT_SCALE
    }

    /// Bilinear elevation at an arbitrary world position.
    pub fn get_height_at(&self, world_x: f32, world_z: f32) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let fx = (world_x / SAMPLE_SPACING).max(0.0);
        let fz = (world_z / SAMPLE_SPACING).max(0.0);
        let gx = fx.floor() as usize;
        let gz = fz.floor() as usize;
        let tx = fx - gx as f32;
        let tz = fz - gz as f32;

        let h00 = self.sample(gx, gz);
        let h10 = self.sample(gx + 1, gz);
        let h01 = self.sample(gx, gz + 1);
        let h11 = self.sample(gx + 1, gz + 1);

        let top = h00 + (h10 - h00) * tx;
        let bottom = h01 + (h11 - h01) * tx;
        top + (bottom - top) * tz
    }
}

// ============================================================================
// WAYPOINTS
// ============================================================================

/// Named waypoint graph for railed transports.
#[derive(Resource, Debug, Clone, Default)]
pub struct WaypointGraph {
    pub nodes: Vec<WaypointNode>,
    pub links: Vec<(u32, u32)>,
}

impl WaypointGraph {
    pub fn from_map(map: &MapData) -> Self {
        match &map.waypoints {
            Some(input) => Self {
                nodes: input.nodes.clone(),
                links: input.links.clone(),
            },
            None => Self::default(),
        }
    }

    pub fn node(&self, id: u32) -> Option<&WaypointNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes whose name starts with `prefix`, in declaration order.
    pub fn nodes_with_prefix(&self, prefix: &str) -> Vec<&WaypointNode> {
        self.nodes
            .iter()
            .filter(|n| n.name.to_ascii_uppercase().starts_with(prefix))
            .collect()
    }
}
