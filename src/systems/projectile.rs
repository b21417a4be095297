//! Projectile entities: launch, flight, collision, detonation.
//!
//! A projectile resolves its impact point at launch (the target's position
//! at that instant) and never tracks afterwards. In flight it can collide
//! with entities matching the weapon's `ProjectileCollidesWith` mask, except
//! the launcher, the launcher's container, sneaky units with an active
//! attackers-miss window, and the home building of the intended victim.

use std::sync::Arc;

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::WeaponDef;
use crate::spatial::SpatialGrid;
use crate::store::{lookup, spawn_object, SpawnProps};

/// Per-frame speed used when the weapon is an instant-hit type but still
/// declares a projectile object.
const FALLBACK_SPEED: f32 = 1_000_000.0;

/// How close the intended victim must be to the impact point to still take
/// the direct hit from a non-radius projectile.
const DIRECT_HIT_SLACK: f32 = 15.0;

pub fn launch_projectile(
    world: &mut World,
    attacker: ObjectId,
    weapon: Arc<WeaponDef>,
    impact: Position,
    victim: Option<ObjectId>,
) {
    let Some(attacker_entity) = lookup(world, attacker) else {
        return;
    };
    let origin = world
        .get::<Position>(attacker_entity)
        .copied()
        .unwrap_or_default();
    let side = world
        .get::<Allegiance>(attacker_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let launcher_container = world
        .get::<Contained>(attacker_entity)
        .map(|c| c.container);

    let template = weapon.projectile.clone().unwrap_or_default();
    let Some(id) = spawn_object(world, &template, &side, origin.x, origin.z, SpawnProps::default())
    else {
        return;
    };
    let Some(entity) = lookup(world, id) else {
        return;
    };
    if let Some(mut position) = world.get_mut::<Position>(entity) {
        *position = origin;
    }
    world.entity_mut(entity).insert(ProjectileState {
        launcher: attacker,
        launcher_container,
        weapon: weapon.clone(),
        impact,
        speed_per_frame: weapon.speed_per_frame.unwrap_or(FALLBACK_SPEED),
        intended_victim: victim,
    });
    world
        .resource_mut::<crate::events::VisualEventBus>()
        .emit(crate::events::VisualEvent {
            kind: crate::events::VisualEventKind::ProjectileLaunched,
            source_entity_id: Some(attacker),
            victim_entity_id: victim,
            position: Some((origin.x, origin.y, origin.z)),
            weapon_name: Some(weapon.name.clone()),
            detail: None,
        });
}

/// Advance every projectile one frame; detonate on arrival or collision.
pub fn projectile_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let Some(projectile) = world.get::<ProjectileState>(entity).cloned() else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }
        let Some(position) = world.get::<Position>(entity).copied() else {
            continue;
        };

        let dx = projectile.impact.x - position.x;
        let dy = projectile.impact.y - position.y;
        let dz = projectile.impact.z - position.z;
        let remaining = (dx * dx + dy * dy + dz * dz).sqrt();
        let step = projectile.speed_per_frame;

        if remaining <= step {
            // Arrival. Off-map impact points fizzle without damage.
            if !projectile.impact.is_off_map() {
                detonate(world, id, &projectile, projectile.impact, arrival_victim(world, &projectile));
            }
            expire(world, id, entity);
            continue;
        }

        let nx = position.x + dx / remaining * step;
        let ny = position.y + dy / remaining * step;
        let nz = position.z + dz / remaining * step;
        if let Some(mut p) = world.get_mut::<Position>(entity) {
            p.x = nx;
            p.y = ny;
            p.z = nz;
        }

        if let Some(hit) = find_collision(world, id, &projectile, (nx, nz), step) {
            let hit_position = lookup(world, hit)
                .and_then(|e| world.get::<Position>(e).copied())
                .unwrap_or(projectile.impact);
            detonate(world, id, &projectile, hit_position, Some(hit));
            let Some(entity) = lookup(world, id) else {
                continue;
            };
            expire(world, id, entity);
        }
    }
}

/// The intended victim still takes the direct hit only if it stayed near
/// the resolved impact point.
fn arrival_victim(world: &World, projectile: &ProjectileState) -> Option<ObjectId> {
    let victim = projectile.intended_victim?;
    let entity = world.resource::<EntityIndex>().entity(victim)?;
    let body = world.get::<Body>(entity)?;
    if !body.alive {
        return None;
    }
    let position = world.get::<Position>(entity)?;
    let bsr = world
        .get::<Template>(entity)
        .and_then(|t| t.def.as_ref().map(|d| d.bounding_sphere_radius()))
        .unwrap_or(0.0);
    if position.distance_3d(&projectile.impact) <= bsr + DIRECT_HIT_SLACK {
        Some(victim)
    } else {
        None
    }
}

fn detonate(
    world: &mut World,
    _projectile_id: ObjectId,
    projectile: &ProjectileState,
    at: Position,
    victim: Option<ObjectId>,
) {
    crate::systems::combat::resolve_impact(world, projectile.launcher, &projectile.weapon, at, victim);
}

fn expire(world: &mut World, _id: ObjectId, entity: Entity) {
    if let Some(mut body) = world.get_mut::<Body>(entity) {
        body.health = 0.0;
        body.alive = false;
    }
    world.entity_mut(entity).insert(PendingDestroy);
}

/// First entity along the flight path satisfying the collision mask.
fn find_collision(
    world: &mut World,
    projectile_id: ObjectId,
    projectile: &ProjectileState,
    at: (f32, f32),
    step: f32,
) -> Option<ObjectId> {
    if projectile.weapon.projectile_collides.is_empty() {
        return None;
    }
    let launcher_side = lookup(world, projectile.launcher)
        .and_then(|e| world.get::<Allegiance>(e))
        .map(|a| a.side.clone())
        .unwrap_or_default();

    let candidates = world
        .resource::<SpatialGrid>()
        .query_radius(at.0, at.1, step.max(10.0) + 10.0);

    for entry in candidates {
        if entry.id == projectile_id || entry.id == projectile.launcher {
            continue;
        }
        if projectile.launcher_container == Some(entry.id) {
            continue;
        }
        let Some(entity) = world.resource::<EntityIndex>().entity(entry.id) else {
            continue;
        };
        if world.get::<ProjectileState>(entity).is_some() {
            continue;
        }
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }
        // Sneaky units dodge incidental collisions while the window runs.
        if let Some(sneaky) = world.get::<SneakyOffset>(entity) {
            if sneaky.window_active() {
                continue;
            }
        }
        // The home building of the intended victim never blocks the shot.
        if let Some(victim) = projectile.intended_victim {
            let reserved = lookup(world, victim)
                .and_then(|ve| world.get::<ParkingReservation>(ve))
                .map(|r| r.building);
            if reserved == Some(entry.id) {
                continue;
            }
        }
        let Some(template) = world.get::<Template>(entity) else {
            continue;
        };
        let side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        let relationship = world
            .resource::<crate::sides::SideTable>()
            .relationship(&launcher_side, &side);

        let matches = projectile.weapon.projectile_collides.iter().any(|mask| {
            match mask.as_str() {
                "ENEMIES" => relationship == crate::sides::Relationship::Enemies,
                "ALLIES" => relationship == crate::sides::Relationship::Allies,
                other => {
                    template.is_kind(other)
                        || other
                            .strip_suffix('S')
                            .map(|singular| template.is_kind(singular))
                            .unwrap_or(false)
                }
            }
        });
        if !matches {
            continue;
        }
        // Bounding-disc overlap against the swept step.
        let radius = template
            .def
            .as_ref()
            .map(|d| d.geometry.major_radius)
            .unwrap_or(0.0);
        let Some(position) = world.get::<Position>(entity) else {
            continue;
        };
        let dx = position.x - at.0;
        let dz = position.z - at.1;
        if (dx * dx + dz * dz).sqrt() <= radius + step.max(5.0) {
            return Some(entry.id);
        }
    }
    None
}
