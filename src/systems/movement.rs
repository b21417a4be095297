//! Movement phase: locomotor speed along grid paths, plus crush collisions.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::LOGIC_FRAMES_PER_SECOND;
use crate::spatial::SpatialGrid;
use crate::systems::pathfind;
use crate::terrain::HeightGrid;

/// Lethal crush damage amount.
pub const HUGE_DAMAGE: f32 = 1_000_000.0;

/// Assign a move goal and compute the path. Any current path is replaced.
pub fn order_move(world: &mut World, id: ObjectId, x: f32, z: f32) {
    let Some(entity) = crate::store::lookup(world, id) else {
        return;
    };
    let Some(position) = world.get::<Position>(entity).copied() else {
        return;
    };
    let path = {
        let grid = world.resource::<HeightGrid>();
        pathfind::find_path(grid, (position.x, position.z), (x, z))
    };
    if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
        match path {
            Some(path) => {
                locomotion.goal = Some((x, z));
                locomotion.path = path;
                locomotion.next_waypoint = 0;
            }
            None => locomotion.clear_path(),
        }
    }
}

/// Explicit stop: abort the path and drop any attack intent.
pub fn order_stop(world: &mut World, id: ObjectId) {
    let Some(entity) = crate::store::lookup(world, id) else {
        return;
    };
    if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
        locomotion.clear_path();
    }
    if let Some(mut ai) = world.get_mut::<AiState>(entity) {
        ai.attack_target = None;
        ai.continue_anchor = None;
    }
    if let Some(mut status) = world.get_mut::<Status>(entity) {
        status.remove(Status::IS_ATTACKING | Status::IS_AIMING_WEAPON | Status::IS_FIRING_WEAPON);
    }
}

/// Ground speed for an entity, world units per second.
fn locomotor_speed(world: &World, entity: Entity) -> f32 {
    let Some(template) = world.get::<Template>(entity) else {
        return 0.0;
    };
    let Some(def) = &template.def else {
        return 0.0;
    };
    let active_set = world
        .get::<Locomotion>(entity)
        .map(|l| l.active_set.clone())
        .unwrap_or_else(|| "SET_NORMAL".to_string());
    let registry = world.resource::<crate::data::DataRegistry>();
    def.locomotor_sets
        .iter()
        .find(|set| set.condition == active_set)
        .or_else(|| def.locomotor_sets.first())
        .and_then(|set| registry.locomotor_def(&set.locomotor))
        .map(|l| l.speed)
        .unwrap_or(def.speed)
}

/// Advance every mobile entity one frame and resolve crush collisions.
pub fn movement_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();

    for id in ids {
        let Some(entity) = crate::store::lookup(world, id) else {
            continue;
        };

        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive || world.get::<Contained>(entity).is_some() {
            continue;
        }
        let status = world.get::<Status>(entity).copied().unwrap_or_default();
        if status.is_disabled() {
            if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
                locomotion.speed = 0.0;
            }
            continue;
        }
        // Deployed or transitioning units hold position.
        if let Some(deploy) = world.get::<DeployState>(entity) {
            if deploy.mode != DeployMode::ReadyToMove {
                continue;
            }
        }

        let Some(locomotion) = world.get::<Locomotion>(entity) else {
            continue;
        };
        if locomotion.goal.is_none() {
            if locomotion.speed != 0.0 {
                if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
                    locomotion.speed = 0.0;
                }
            }
            continue;
        }

        let speed = locomotor_speed(world, entity);
        if speed <= 0.0 {
            continue;
        }
        let mut step = speed / LOGIC_FRAMES_PER_SECOND as f32;

        let Some(position) = world.get::<Position>(entity).copied() else {
            continue;
        };
        let mut x = position.x;
        let mut z = position.z;
        let mut moved_dir = (0.0f32, 0.0f32);

        {
            let mut locomotion = world
                .get_mut::<Locomotion>(entity)
                .expect("checked above");
            while step > 0.0 {
                let Some(&(wx, wz)) = locomotion.path.get(locomotion.next_waypoint) else {
                    locomotion.clear_path();
                    break;
                };
                let dx = wx - x;
                let dz = wz - z;
                let dist = (dx * dx + dz * dz).sqrt();
                if dist <= step {
                    x = wx;
                    z = wz;
                    step -= dist;
                    locomotion.next_waypoint += 1;
                    if locomotion.next_waypoint >= locomotion.path.len() {
                        locomotion.clear_path();
                        break;
                    }
                } else {
                    x += dx / dist * step;
                    z += dz / dist * step;
                    moved_dir = (dx / dist, dz / dist);
                    step = 0.0;
                }
            }
            locomotion.speed = speed;
        }

        let ground = world.resource::<HeightGrid>().get_height_at(x, z);
        let base_height = world
            .get::<Template>(entity)
            .and_then(|t| t.def.as_ref().map(|d| d.base_height()))
            .unwrap_or(0.0);
        if let Some(mut position) = world.get_mut::<Position>(entity) {
            position.x = x;
            position.z = z;
            position.y = ground + base_height;
        }
        if moved_dir != (0.0, 0.0) {
            if let Some(mut facing) = world.get_mut::<Facing>(entity) {
                facing.angle = moved_dir.1.atan2(moved_dir.0);
            }
        }

        resolve_crush(world, id, entity, (x, z), moved_dir);
    }
}

/// Crush: a moving crusher rolling toward a lesser crushable hostile kills it.
fn resolve_crush(
    world: &mut World,
    crusher_id: ObjectId,
    crusher_entity: Entity,
    at: (f32, f32),
    direction: (f32, f32),
) {
    if direction == (0.0, 0.0) {
        return;
    }
    let Some((crusher_level, crusher_radius)) = world.get::<Template>(crusher_entity).and_then(|t| {
        t.def
            .as_ref()
            .map(|d| (d.crusher_level, d.geometry.major_radius))
    }) else {
        return;
    };
    if crusher_level == 0 {
        return;
    }
    let crusher_side = world
        .get::<Allegiance>(crusher_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    let nearby = world
        .resource::<SpatialGrid>()
        .query_radius(at.0, at.1, crusher_radius + 20.0);

    for entry in nearby {
        if entry.id == crusher_id {
            continue;
        }
        let Some(victim_entity) = crate::store::lookup(world, entry.id) else {
            continue;
        };
        if world.get::<ProjectileState>(victim_entity).is_some() {
            continue;
        }
        let Some((crushable_level, victim_radius)) =
            world.get::<Template>(victim_entity).and_then(|t| {
                t.def
                    .as_ref()
                    .map(|d| (d.crushable_level, d.geometry.major_radius))
            })
        else {
            continue;
        };
        if crushable_level >= crusher_level {
            continue;
        }
        let victim_side = world
            .get::<Allegiance>(victim_entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        // Allies are never crushed.
        let relationship = world
            .resource::<crate::sides::SideTable>()
            .relationship(&crusher_side, &victim_side);
        if relationship == crate::sides::Relationship::Allies {
            continue;
        }
        let Some(victim_position) = world.get::<Position>(victim_entity).copied() else {
            continue;
        };
        let dx = victim_position.x - at.0;
        let dz = victim_position.z - at.1;
        let dist = (dx * dx + dz * dz).sqrt();
        if dist > crusher_radius + victim_radius {
            continue;
        }
        // Only crush what we are actually rolling toward.
        if dx * direction.0 + dz * direction.1 <= 0.0 {
            continue;
        }
        crate::systems::combat::deal_damage(world, Some(crusher_id), entry.id, HUGE_DAMAGE, "CRUSH");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBundle, DataRegistry, LocomotorInput, LocomotorSetInput, ObjectInput};
    use crate::events::VisualEventBus;
    use crate::rng::GameRng;
    use crate::sides::SideTable;
    use crate::store::{spawn_object, SpawnProps};

    fn movement_world() -> World {
        let locomotor = LocomotorInput {
            name: "TankLocomotor".to_string(),
            speed: 60.0,
            surfaces: vec!["GROUND".to_string()],
        };
        let mut tank = ObjectInput {
            name: "Tank".to_string(),
            ..Default::default()
        };
        tank.locomotor_sets = vec![LocomotorSetInput {
            condition: "SET_NORMAL".to_string(),
            locomotor: "TankLocomotor".to_string(),
        }];
        tank.crusher_level = Some(2);
        tank.kind_of = vec!["VEHICLE".to_string()];

        let mut infantry = ObjectInput {
            name: "Rifleman".to_string(),
            ..Default::default()
        };
        infantry.crushable_level = Some(1);
        infantry.kind_of = vec!["INFANTRY".to_string()];

        let bundle = DataBundle {
            objects: vec![tank, infantry],
            locomotors: vec![locomotor],
            ..Default::default()
        };
        let mut world = World::new();
        world.insert_resource(DataRegistry::from_bundle(&bundle).unwrap());
        world.insert_resource(EntityIndex::default());
        world.insert_resource(SimFrame::default());
        world.insert_resource(GameRng::default());
        world.insert_resource(SideTable::default());
        world.insert_resource(HeightGrid::flat());
        world.insert_resource(SpatialGrid::new(40.0));
        world.insert_resource(VisualEventBus::default());
        world
    }

    fn position_of(world: &World, id: ObjectId) -> Position {
        let entity = crate::store::lookup(world, id).unwrap();
        *world.get::<Position>(entity).unwrap()
    }

    #[test]
    fn test_move_advances_at_locomotor_speed() {
        let mut world = movement_world();
        let id = spawn_object(&mut world, "Tank", "china", 5.0, 5.0, SpawnProps::default()).unwrap();
        order_move(&mut world, id, 65.0, 5.0);

        // 60 u/s at 30 Hz = 2 units per frame.
        crate::spatial::rebuild_spatial_grid(&mut world);
        movement_phase(&mut world);
        let after_one = position_of(&world, id);
        assert!((after_one.distance_xz(&Position::new(5.0, 0.0, 5.0)) - 2.0).abs() < 0.01);

        for _ in 0..60 {
            movement_phase(&mut world);
        }
        let arrived = position_of(&world, id);
        assert!(arrived.distance_xz(&Position::new(65.0, 0.0, 5.0)) < 0.5);
    }

    #[test]
    fn test_disabled_entity_is_immobile() {
        let mut world = movement_world();
        let id = spawn_object(&mut world, "Tank", "china", 5.0, 5.0, SpawnProps::default()).unwrap();
        order_move(&mut world, id, 65.0, 5.0);
        let entity = crate::store::lookup(&world, id).unwrap();
        world.get_mut::<Status>(entity).unwrap().insert(Status::DISABLED_EMP);

        crate::spatial::rebuild_spatial_grid(&mut world);
        movement_phase(&mut world);
        let after = position_of(&world, id);
        assert_eq!(after.x, 5.0);
        assert_eq!(after.z, 5.0);
    }

    #[test]
    fn test_stop_aborts_path() {
        let mut world = movement_world();
        let id = spawn_object(&mut world, "Tank", "china", 5.0, 5.0, SpawnProps::default()).unwrap();
        order_move(&mut world, id, 200.0, 5.0);
        crate::spatial::rebuild_spatial_grid(&mut world);
        movement_phase(&mut world);
        order_stop(&mut world, id);
        let before = position_of(&world, id);
        movement_phase(&mut world);
        let after = position_of(&world, id);
        assert_eq!(before.x, after.x);
    }

    #[test]
    fn test_crush_kills_hostile_not_ally() {
        let mut world = movement_world();
        let tank =
            spawn_object(&mut world, "Tank", "china", 5.0, 5.0, SpawnProps::default()).unwrap();
        let enemy =
            spawn_object(&mut world, "Rifleman", "gla", 12.0, 5.0, SpawnProps::default()).unwrap();
        let friend =
            spawn_object(&mut world, "Rifleman", "china", 12.0, 8.0, SpawnProps::default())
                .unwrap();

        order_move(&mut world, tank, 60.0, 5.0);
        for _ in 0..6 {
            crate::spatial::rebuild_spatial_grid(&mut world);
            movement_phase(&mut world);
        }

        let enemy_entity = crate::store::lookup(&world, enemy).unwrap();
        assert!(!world.get::<Body>(enemy_entity).unwrap().alive, "enemy crushed");
        let friend_entity = crate::store::lookup(&world, friend).unwrap();
        assert!(world.get::<Body>(friend_entity).unwrap().alive, "ally exempt");
    }
}
