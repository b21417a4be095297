//! Deterministic frame-stepped RTS game-logic core.
//!
//! A pure, side-effect-isolated simulator in the mold of a classic
//! Generals-style engine: it ingests a declarative data bundle (objects,
//! weapons, armors, upgrades, sciences, command sets, special powers, OCLs),
//! a map with a heightmap and placements, and an ordered command stream, and
//! produces per-frame entity snapshots, production/economy/upgrade state,
//! fog-of-war grids, and visual events. Runs at a fixed 30 Hz logic rate on
//! `bevy_ecs`; identical inputs yield bit-identical outputs.

pub mod api;
pub mod commands;
pub mod components;
pub mod data;
pub mod events;
pub mod fog;
pub mod rng;
pub mod sides;
pub mod snapshot;
pub mod spatial;
pub mod store;
pub mod systems;
pub mod terrain;

pub use api::GameWorld;
pub use commands::{CommandBuffer, GameCommand};
pub use components::{CommandSource, ObjectId, SimConfig, Status, VeterancyLevel, WeaponBonus};
pub use data::{DataBundle, DataError, DataRegistry};
pub use events::{VisualEvent, VisualEventKind};
pub use fog::{CellVisibility, FogOfWar};
pub use rng::GameRng;
pub use sides::{PlayerType, Relationship, SideState, SideTable};
pub use snapshot::{EntitySnapshot, GameSnapshot, SideSnapshot};
pub use spatial::{SpatialEntry, SpatialGrid};
pub use store::SpawnProps;
pub use terrain::{HeightGrid, MapData, WaypointGraph};
