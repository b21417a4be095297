//! Public API for the simulation.
//!
//! This module provides the main interface for a host (renderer, lockstep
//! session, test harness) to interact with the game-logic core.
//!
//! ## Fixed Timestep
//!
//! The simulation uses a fixed timestep internally (30 Hz). When `step(dt)`
//! is called, the simulation accumulates time and runs whole logic frames as
//! needed. This ensures deterministic behavior regardless of host frame
//! rate: for identical bundle, map, and command sequence, every snapshot and
//! visual-event stream is bit-identical across runs.
//!
//! ## Phase Ordering
//!
//! Each logic frame runs the phases documented in [`crate::systems`], as a
//! chained schedule of exclusive systems. Commands submitted between steps
//! are applied at the start of the next frame, never mid-frame.

use bevy_ecs::prelude::*;

use crate::commands::{command_phase, CommandBuffer, GameCommand};
use crate::components::*;
use crate::data::{DataBundle, DataError, DataRegistry};
use crate::events::{VisualEvent, VisualEventBus};
use crate::fog::{fog_phase, CellVisibility, FogOfWar};
use crate::rng::GameRng;
use crate::sides::SideTable;
use crate::snapshot::{EntitySnapshot, GameSnapshot};
use crate::spatial::{rebuild_spatial_grid, SpatialGrid};
use crate::store::SpawnProps;
use crate::systems::*;
use crate::terrain::{HeightGrid, MapData, WaypointGraph};

/// The main simulation container.
///
/// Holds the ECS world and schedule, providing a clean API for:
/// - Building the world from a data bundle and map
/// - Stepping the simulation forward
/// - Submitting commands
/// - Extracting snapshots and visual events
pub struct GameWorld {
    world: World,
    schedule: Schedule,
    frame: u64,
    time: f32,
    time_accumulator: f32,
}

impl GameWorld {
    /// Build a world from a bundle and map with default configuration.
    pub fn new(bundle: &DataBundle, map: &MapData) -> Result<Self, DataError> {
        Self::with_config(bundle, map, SimConfig::default())
    }

    /// Build a world from JSON inputs.
    pub fn from_json(bundle_json: &str, map_json: &str) -> Result<Self, DataError> {
        let bundle: DataBundle = serde_json::from_str(bundle_json)?;
        let map: MapData = serde_json::from_str(map_json)?;
        Self::new(&bundle, &map)
    }

    /// Empty world (no data, flat map); mostly for tests and demos.
    pub fn empty() -> Self {
        Self::new(&DataBundle::default(), &MapData::default())
            .expect("empty inputs always load")
    }

    pub fn with_config(
        bundle: &DataBundle,
        map: &MapData,
        config: SimConfig,
    ) -> Result<Self, DataError> {
        let registry = DataRegistry::from_bundle(bundle)?;
        let height_grid = HeightGrid::from_map(map)?;
        let waypoints = WaypointGraph::from_map(map);
        let (world_w, world_h) = height_grid.world_bounds();

        let mut world = World::new();
        world.insert_resource(registry);
        world.insert_resource(EntityIndex::default());
        world.insert_resource(SimFrame::default());
        world.insert_resource(config);
        world.insert_resource(GameRng::new(config.seed));
        world.insert_resource(SideTable::default());
        world.insert_resource(height_grid);
        world.insert_resource(waypoints);
        world.insert_resource(FogOfWar::sized(world_w, world_h));
        world.insert_resource(SpatialGrid::new(config.spatial_cell_size));
        world.insert_resource(VisualEventBus::default());
        world.insert_resource(CommandBuffer::default());
        world.insert_resource(PendingShots::default());
        world.insert_resource(SharedPowerTimers::default());
        world.insert_resource(LocalPlayer::default());
        world.insert_resource(SpecialPowerHooks::default());

        // Known factions get their side state up front.
        {
            let factions: Vec<String> =
                world.resource::<DataRegistry>().factions().to_vec();
            let mut sides = world.resource_mut::<SideTable>();
            for faction in factions {
                sides.ensure(&faction);
            }
        }

        // Deterministic phase ordering; every system takes the whole world.
        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                command_phase,
                rebuild_spatial_grid,
                behavior_phase,
                battle_plan_phase,
                skirmish_phase,
                movement_phase,
                combat_phase,
                container_phase,
                production_phase,
                upgrade_phase,
                fog_phase,
                lifetime_phase,
                cleanup_phase,
            )
                .chain(),
        );

        let mut game = Self {
            world,
            schedule,
            frame: 0,
            time: 0.0,
            time_accumulator: 0.0,
        };

        // Initial placements from the map.
        for object in &map.objects {
            let side = game
                .world
                .resource::<DataRegistry>()
                .object_def(&object.template_name)
                .map(|d| d.side.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| object.properties.original_owner.clone())
                .unwrap_or_else(|| "neutral".to_string());
            crate::store::spawn_object(
                &mut game.world,
                &object.template_name,
                &side,
                object.position.x,
                object.position.z,
                SpawnProps {
                    angle: object.angle,
                    original_owner: object.properties.original_owner.clone(),
                    ..Default::default()
                },
            );
        }

        Ok(game)
    }

    /// Step the simulation forward by `dt` seconds.
    ///
    /// Uses fixed timestep internally - accumulates time and runs whole
    /// logic frames as needed.
    pub fn step(&mut self, dt: f32) {
        let fixed_dt = self
            .world
            .get_resource::<SimConfig>()
            .map(|c| c.fixed_timestep)
            .unwrap_or(1.0 / 30.0);

        self.time_accumulator += dt;
        while self.time_accumulator >= fixed_dt {
            self.fixed_update(fixed_dt);
            self.time_accumulator -= fixed_dt;
        }
    }

    /// Run exactly one logic frame regardless of accumulated time.
    pub fn step_frame(&mut self) {
        let fixed_dt = self
            .world
            .get_resource::<SimConfig>()
            .map(|c| c.fixed_timestep)
            .unwrap_or(1.0 / 30.0);
        self.fixed_update(fixed_dt);
    }

    fn fixed_update(&mut self, dt: f32) {
        self.frame += 1;
        self.world.resource_mut::<SimFrame>().0 = self.frame;
        self.schedule.run(&mut self.world);
        self.time += dt;
    }

    /// Step with profiling - returns the time spent in fixed updates.
    #[cfg(any(test, feature = "profile"))]
    pub fn step_profiled(&mut self, dt: f32) -> std::time::Duration {
        use std::time::Instant;

        let fixed_dt = self
            .world
            .get_resource::<SimConfig>()
            .map(|c| c.fixed_timestep)
            .unwrap_or(1.0 / 30.0);

        self.time_accumulator += dt;
        let mut total = std::time::Duration::ZERO;
        while self.time_accumulator >= fixed_dt {
            let start = Instant::now();
            self.fixed_update(fixed_dt);
            total += start.elapsed();
            self.time_accumulator -= fixed_dt;
        }
        total
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Submit a player command; applied at the start of the next frame.
    pub fn submit_command(&mut self, command: GameCommand) -> bool {
        self.world
            .resource_mut::<CommandBuffer>()
            .submit(command, CommandSource::Player)
    }

    /// Submit a command attributed to the AI (NO_ATTACK_FROM_AI applies).
    pub fn submit_ai_command(&mut self, command: GameCommand) -> bool {
        self.world
            .resource_mut::<CommandBuffer>()
            .submit(command, CommandSource::Ai)
    }

    // ------------------------------------------------------------------
    // Store access
    // ------------------------------------------------------------------

    /// Spawn an object directly (map loaders, tests, OCL-driven hosts).
    pub fn spawn(
        &mut self,
        template: &str,
        side: &str,
        x: f32,
        z: f32,
        props: SpawnProps,
    ) -> Option<ObjectId> {
        crate::store::spawn_object(&mut self.world, template, side, x, z, props)
    }

    pub fn get_entity_state(&self, id: ObjectId) -> Option<EntitySnapshot> {
        crate::snapshot::get_entity_state(&self.world, id)
    }

    pub fn get_renderable_entity_states(&self) -> Vec<EntitySnapshot> {
        crate::snapshot::get_renderable_entity_states(&self.world)
    }

    pub fn get_entity_ids_by_template(&mut self, template: &str) -> Vec<ObjectId> {
        crate::store::ids_by_template(&mut self.world, template)
    }

    pub fn get_entity_ids_by_template_and_side(
        &mut self,
        template: &str,
        side: &str,
    ) -> Vec<ObjectId> {
        crate::store::ids_by_template_and_side(&mut self.world, template, side)
    }

    // ------------------------------------------------------------------
    // Snapshots and events
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot::from_world(&self.world, self.frame, self.time)
    }

    pub fn snapshot_json(&self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    /// Move the buffered visual events out.
    pub fn drain_visual_events(&mut self) -> Vec<VisualEvent> {
        self.world.resource_mut::<VisualEventBus>().drain()
    }

    // ------------------------------------------------------------------
    // Sides, fog, hooks
    // ------------------------------------------------------------------

    pub fn enable_skirmish_ai(&mut self, side: &str, enabled: bool) {
        let side = crate::data::norm_side(side);
        self.world
            .resource_mut::<SideTable>()
            .ensure(&side)
            .skirmish_enabled = enabled;
    }

    pub fn side_credits(&self, side: &str) -> i64 {
        self.world
            .resource::<SideTable>()
            .get(&crate::data::norm_side(side))
            .map(|s| s.credits)
            .unwrap_or(0)
    }

    pub fn get_cell_visibility(&self, side: &str, x: f32, z: f32) -> CellVisibility {
        self.world
            .resource::<FogOfWar>()
            .get_cell_visibility(&crate::data::norm_side(side), x, z)
    }

    pub fn is_position_visible(&self, side: &str, x: f32, z: f32) -> bool {
        self.world
            .resource::<FogOfWar>()
            .is_position_visible(&crate::data::norm_side(side), x, z)
    }

    /// Host instrumentation hooks for special-power dispatch.
    pub fn special_power_hooks_mut(&mut self) -> Mut<'_, SpecialPowerHooks> {
        self.world.resource_mut::<SpecialPowerHooks>()
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    pub fn current_time(&self) -> f32 {
        self.time
    }

    /// Direct access to the ECS world (for advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the ECS world (for advanced usage).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}
