//! Combat phase: targeting legality, weapon selection, the fire state
//! machine, direct-fire delivery, radius damage, and veterancy.
//!
//! Per-frame attacker logic, in ascending id order:
//! cooldowns tick down before the ready-check; the pre-attack aim timer
//! ticks after it, and the shot lands on the first frame the timer is
//! already zero. That ordering reproduces the canonical shot cadences
//! (shot frames 1,4,7,... for a 3-frame cooldown).

use std::sync::Arc;

use bevy_ecs::prelude::*;
use rand::Rng;

use crate::components::*;
use crate::data::{DataRegistry, PreAttackType, RadiusAffects, WeaponDef};
use crate::events::{VisualEvent, VisualEventBus};
use crate::rng::GameRng;
use crate::sides::{Relationship, SideTable};
use crate::spatial::SpatialGrid;
use crate::store::lookup;

/// A direct-fire shot in flight (travel delay, no projectile entity).
#[derive(Debug, Clone)]
pub struct PendingShot {
    pub land_frame: u64,
    pub attacker: ObjectId,
    pub weapon: Arc<WeaponDef>,
    pub impact: Position,
    pub victim: Option<ObjectId>,
}

#[derive(Resource, Debug, Default)]
pub struct PendingShots {
    pub shots: Vec<PendingShot>,
}

// ============================================================================
// TARGETING LEGALITY
// ============================================================================

/// Full legality check, applied at command time and at every retarget.
pub fn target_legal(
    world: &World,
    attacker_entity: Entity,
    target_id: ObjectId,
    source: CommandSource,
) -> bool {
    let Some(target_entity) = lookup_ref(world, target_id) else {
        return false;
    };
    let Some(target_body) = world.get::<Body>(target_entity) else {
        return false;
    };
    if !target_body.alive {
        return false;
    }
    let target_status = world.get::<Status>(target_entity).copied().unwrap_or_default();
    if target_status.contains(Status::MASKED) {
        return false;
    }
    if let Some(template) = world.get::<Template>(target_entity) {
        if template.is_kind("UNATTACKABLE") {
            return false;
        }
    }
    // Both on-map or both off-map.
    let attacker_off = world
        .get::<Position>(attacker_entity)
        .map(|p| p.is_off_map())
        .unwrap_or(false);
    let target_off = world
        .get::<Position>(target_entity)
        .map(|p| p.is_off_map())
        .unwrap_or(false);
    if attacker_off != target_off {
        return false;
    }
    // Stealth gate.
    if target_status.contains(Status::STEALTHED) && !target_status.contains(Status::DETECTED) {
        let attacker_status = world
            .get::<Status>(attacker_entity)
            .copied()
            .unwrap_or_default();
        if !attacker_status.contains(Status::IGNORING_STEALTH) {
            return false;
        }
    }
    if target_status.contains(Status::NO_ATTACK_FROM_AI) && source == CommandSource::Ai {
        return false;
    }
    true
}

fn lookup_ref(world: &World, id: ObjectId) -> Option<Entity> {
    world.resource::<EntityIndex>().entity(id)
}

/// Attack command entry point. Illegal commands are silently rejected.
pub fn try_set_attack_target(
    world: &mut World,
    attacker: ObjectId,
    target: ObjectId,
    source: CommandSource,
) -> bool {
    let Some(attacker_entity) = lookup(world, attacker) else {
        return false;
    };
    let attacker_alive = world
        .get::<Body>(attacker_entity)
        .map(|b| b.alive)
        .unwrap_or(false);
    let attacker_status = world
        .get::<Status>(attacker_entity)
        .copied()
        .unwrap_or_default();
    if !attacker_alive || attacker_status.contains(Status::NO_ATTACK) {
        return false;
    }
    if !target_legal(world, attacker_entity, target, source) {
        log::debug!("attack command rejected: {attacker:?} -> {target:?}");
        return false;
    }
    if let Some(mut ai) = world.get_mut::<AiState>(attacker_entity) {
        ai.attack_target = Some(target);
        ai.command_source = source;
    }
    if let Some(mut weapon_state) = world.get_mut::<WeaponState>(attacker_entity) {
        weapon_state.aim_done_for_attack = false;
        weapon_state.last_target = Some(target);
    }
    true
}

// ============================================================================
// COMBAT PHASE
// ============================================================================

pub fn combat_phase(world: &mut World) {
    resolve_landed_shots(world);

    let frame = world.resource::<SimFrame>().0;
    let ids = world.resource::<EntityIndex>().ids();

    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };

        tick_sneaky_window(world, entity);

        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }

        // Clip reload and shot cooldown always tick, even out of combat.
        tick_weapon_clocks(world, entity);

        let status = world.get::<Status>(entity).copied().unwrap_or_default();
        let gated = status.contains(Status::NO_ATTACK)
            || status.is_disabled()
            || status.contains(Status::UNDER_CONSTRUCTION)
            || status.contains(Status::PRONE)
            || !container_allows_fire(world, entity)
            || !deploy_allows_fire(world, entity)
            || !resolved(world, entity);

        let target = world
            .get::<AiState>(entity)
            .and_then(|ai| ai.attack_target);

        let Some(target_id) = target else {
            disengage(world, entity);
            continue;
        };
        if gated {
            set_attack_statuses(world, entity, true, false, false);
            continue;
        }

        // Keep the continue-attack anchor fresh while the target lives.
        refresh_anchor(world, entity, target_id);

        let source = world
            .get::<AiState>(entity)
            .map(|ai| ai.command_source)
            .unwrap_or_default();

        let target_alive = lookup_ref(world, target_id)
            .and_then(|e| world.get::<Body>(e))
            .map(|b| b.alive)
            .unwrap_or(false);
        if !target_alive || !target_legal(world, entity, target_id, source) {
            if !target_alive {
                continue_attack_retarget(world, entity, id, source);
            } else if let Some(mut ai) = world.get_mut::<AiState>(entity) {
                ai.attack_target = None;
            }
            if world
                .get::<AiState>(entity)
                .and_then(|ai| ai.attack_target)
                .is_none()
            {
                disengage(world, entity);
            }
            continue;
        }

        engage(world, entity, id, target_id, frame);
    }

    crate::systems::projectile::projectile_phase(world);
}

/// Sneaky window: refreshed while attacking, persists afterwards.
fn tick_sneaky_window(world: &mut World, entity: Entity) {
    let attacking = world
        .get::<Status>(entity)
        .map(|s| s.contains(Status::IS_ATTACKING))
        .unwrap_or(false);
    if let Some(mut sneaky) = world.get_mut::<SneakyOffset>(entity) {
        if attacking {
            sneaky.window_remaining = sneaky.persist_frames.max(1);
        } else if sneaky.window_remaining > 0 {
            sneaky.window_remaining -= 1;
        }
    }
}

fn tick_weapon_clocks(world: &mut World, entity: Entity) {
    let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) else {
        return;
    };
    if weapon_state.clip_reload_remaining > 0 {
        weapon_state.clip_reload_remaining -= 1;
        if weapon_state.clip_reload_remaining == 0 {
            if let Some(weapon) = weapon_state.weapon.clone() {
                weapon_state.clip_remaining = weapon.clip_size;
            }
            weapon_state.aim_done_for_clip = false;
            weapon_state.scatter_cycle.clear();
        }
    }
    if weapon_state.reload_remaining > 0 {
        weapon_state.reload_remaining -= 1;
    }

    // AutoReloadWhenIdle: silent clip refill after enough idle frames.
    let engaged = world
        .get::<AiState>(entity)
        .map(|ai| ai.attack_target.is_some())
        .unwrap_or(false);
    let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) else {
        return;
    };
    if engaged {
        weapon_state.idle_frames = 0;
    } else {
        weapon_state.idle_frames = weapon_state.idle_frames.saturating_add(1);
        if let Some(weapon) = weapon_state.weapon.clone() {
            if let Some(idle_frames) = weapon.auto_reload_idle_frames {
                if weapon.clip_size > 0
                    && weapon_state.clip_remaining < weapon.clip_size
                    && weapon_state.idle_frames >= idle_frames
                {
                    weapon_state.clip_remaining = weapon.clip_size;
                    weapon_state.clip_reload_remaining = 0;
                    weapon_state.aim_done_for_clip = false;
                    weapon_state.scatter_cycle.clear();
                }
            }
        }
    }
}

fn resolved(world: &World, entity: Entity) -> bool {
    world
        .get::<Template>(entity)
        .map(|t| t.resolved())
        .unwrap_or(false)
}

fn container_allows_fire(world: &World, entity: Entity) -> bool {
    crate::systems::container::can_fire_from_inside(world, entity)
}

fn deploy_allows_fire(world: &World, entity: Entity) -> bool {
    match world.get::<DeployState>(entity) {
        Some(deploy) => deploy.mode == DeployMode::ReadyToAttack,
        None => true,
    }
}

fn disengage(world: &mut World, entity: Entity) {
    set_attack_statuses(world, entity, false, false, false);
    if let Some(mut status) = world.get_mut::<Status>(entity) {
        status.remove(Status::IGNORING_STEALTH);
    }
    if let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) {
        weapon_state.aiming = false;
        weapon_state.aim_remaining = 0;
    }
}

fn set_attack_statuses(world: &mut World, entity: Entity, attacking: bool, aiming: bool, firing: bool) {
    if let Some(mut status) = world.get_mut::<Status>(entity) {
        status.set(Status::IS_ATTACKING, attacking);
        status.set(Status::IS_AIMING_WEAPON, aiming);
        status.set(Status::IS_FIRING_WEAPON, firing);
    }
}

fn refresh_anchor(world: &mut World, entity: Entity, target_id: ObjectId) {
    let anchor = lookup_ref(world, target_id).and_then(|target_entity| {
        let position = world.get::<Position>(target_entity)?;
        let owner = world.get::<Allegiance>(target_entity)?;
        Some(ContinueAnchor {
            x: position.x,
            z: position.z,
            owner: owner.original_owner.clone(),
        })
    });
    if let Some(anchor) = anchor {
        if let Some(mut ai) = world.get_mut::<AiState>(entity) {
            ai.continue_anchor = Some(anchor);
        }
    }
}

/// Run the fire state machine against a live, legal target.
fn engage(world: &mut World, entity: Entity, id: ObjectId, target_id: ObjectId, frame: u64) {
    let Some(weapon) = world
        .get::<WeaponState>(entity)
        .and_then(|w| w.weapon.clone())
    else {
        set_attack_statuses(world, entity, true, false, false);
        return;
    };

    let Some(target_entity) = lookup_ref(world, target_id) else {
        return;
    };
    let attacker_position = world.get::<Position>(entity).copied().unwrap_or_default();
    let target_position = world.get::<Position>(target_entity).copied().unwrap_or_default();
    let target_bsr = world
        .get::<Template>(target_entity)
        .and_then(|t| t.def.as_ref().map(|d| d.bounding_sphere_radius()))
        .unwrap_or(0.0);

    // FROM_BOUNDINGSPHERE_3D: XZ plus elevation, minus the target's sphere.
    let distance = (attacker_position.distance_3d(&target_position) - target_bsr).max(0.0);

    if distance > weapon.attack_range {
        // Moving-target interception: close in, hold the intent.
        crate::systems::movement::order_move(world, id, target_position.x, target_position.z);
        set_attack_statuses(world, entity, true, false, false);
        return;
    }

    // In range: stop walking.
    if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
        locomotion.clear_path();
    }

    let stationary = world
        .get::<Locomotion>(entity)
        .map(|l| l.goal.is_none())
        .unwrap_or(true);
    if stationary && weapon.min_range > 0.0 && distance < weapon.min_range {
        // Too close: fire suppressed until repositioned.
        set_attack_statuses(world, entity, true, false, false);
        return;
    }

    // Stealth gate at fire time.
    let target_status = world.get::<Status>(target_entity).copied().unwrap_or_default();
    let my_status = world.get::<Status>(entity).copied().unwrap_or_default();
    if target_status.contains(Status::STEALTHED)
        && !target_status.contains(Status::DETECTED)
        && !my_status.contains(Status::IGNORING_STEALTH)
    {
        set_attack_statuses(world, entity, true, false, false);
        return;
    }

    let mut fire = false;
    {
        let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) else {
            return;
        };
        if weapon_state.last_target != Some(target_id) {
            weapon_state.last_target = Some(target_id);
            weapon_state.aim_done_for_attack = false;
        }

        if weapon.clip_size > 0 && weapon_state.clip_remaining == 0 {
            if weapon_state.clip_reload_remaining == 0 {
                weapon_state.clip_reload_remaining = weapon.clip_reload_frames.max(1);
            }
            drop(weapon_state);
            set_attack_statuses(world, entity, true, false, false);
            return;
        }

        if weapon_state.reload_remaining == 0 {
            let needs_aim = weapon.pre_attack_frames > 0
                && match weapon.pre_attack_type {
                    PreAttackType::PerShot => true,
                    PreAttackType::PerAttack => !weapon_state.aim_done_for_attack,
                    PreAttackType::PerClip => !weapon_state.aim_done_for_clip,
                };
            if needs_aim && !weapon_state.aiming {
                weapon_state.aiming = true;
                weapon_state.aim_remaining = weapon.pre_attack_frames;
            }
            if weapon_state.aiming && weapon_state.aim_remaining > 0 {
                weapon_state.aim_remaining -= 1;
                drop(weapon_state);
                set_attack_statuses(world, entity, true, true, false);
                // Continue-attack weapons pierce stealth during the aim.
                if weapon.continue_range > 0.0 {
                    if let Some(mut status) = world.get_mut::<Status>(entity) {
                        status.insert(Status::IGNORING_STEALTH);
                    }
                }
                return;
            }
            weapon_state.aiming = false;
            weapon_state.aim_done_for_attack = true;
            weapon_state.aim_done_for_clip = true;
            weapon_state.reload_remaining = weapon.delay_frames;
            if weapon.clip_size > 0 {
                weapon_state.clip_remaining -= 1;
            }
            weapon_state.last_shot_frame = frame;
            fire = true;
        }
    }

    if fire {
        set_attack_statuses(world, entity, true, false, true);
        fire_shot(world, entity, id, target_id, &weapon, frame);
    } else {
        set_attack_statuses(world, entity, true, false, false);
    }
}

/// Deliver one shot: spawn a projectile or schedule/resolve direct fire.
fn fire_shot(
    world: &mut World,
    entity: Entity,
    attacker: ObjectId,
    target_id: ObjectId,
    weapon: &Arc<WeaponDef>,
    frame: u64,
) {
    let Some(target_entity) = lookup_ref(world, target_id) else {
        return;
    };
    let attacker_position = world.get::<Position>(entity).copied().unwrap_or_default();
    let target_position = world.get::<Position>(target_entity).copied().unwrap_or_default();
    let target_is_infantry = world
        .get::<Template>(target_entity)
        .map(|t| t.is_kind("INFANTRY"))
        .unwrap_or(false);

    let mut impact = target_position;
    let mut victim = Some(target_id);

    // Sneaky-offset: an active attackers-miss window converts the shot into
    // a position shot displaced by the offset.
    if let Some(sneaky) = world.get::<SneakyOffset>(target_entity) {
        if sneaky.window_active() {
            impact.x += sneaky.offset;
            victim = None;
        }
    }

    // Deterministic scatter.
    let scatter_radius = if target_is_infantry && weapon.scatter_radius_infantry > 0.0 {
        weapon.scatter_radius_infantry
    } else {
        weapon.scatter_radius
    };
    if scatter_radius > 0.0 {
        let rng = *world.resource::<GameRng>();
        let mut stream = rng.stream(frame, attacker.0, "scatter");
        let angle = stream.gen_range(0.0..std::f32::consts::TAU);
        let dist = stream.gen_range(0.0..scatter_radius);
        impact.x += dist * angle.cos();
        impact.z += dist * angle.sin();
        victim = None;
    }

    // ScatterTarget: fixed offsets, each used once per clip cycle.
    if !weapon.scatter_targets.is_empty() {
        let rng = *world.resource::<GameRng>();
        let pick = {
            let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) else {
                return;
            };
            if weapon_state.scatter_cycle.is_empty() {
                weapon_state.scatter_cycle = (0..weapon.scatter_targets.len() as u32).collect();
            }
            let index = rng
                .stream(frame, attacker.0, "scattertarget")
                .gen_range(0..weapon_state.scatter_cycle.len());
            weapon_state.scatter_cycle.remove(index)
        };
        let (ox, oz) = weapon.scatter_targets[pick as usize];
        impact.x += ox * weapon.scatter_scalar;
        impact.z += oz * weapon.scatter_scalar;
        victim = None;
    }

    if weapon.projectile.is_some() {
        crate::systems::projectile::launch_projectile(
            world,
            attacker,
            weapon.clone(),
            impact,
            victim,
        );
        return;
    }

    // Direct fire: instant or frame-delayed by weapon speed.
    let distance = attacker_position.distance_3d(&impact);
    let travel_frames = match weapon.speed_per_frame {
        None => 0,
        Some(speed) => {
            let mut effective = speed;
            if weapon.scale_speed && weapon.attack_range > 0.0 {
                effective =
                    (speed * distance / weapon.attack_range).max(weapon.min_speed_per_frame);
            }
            if effective <= 0.0 {
                0
            } else {
                (distance / effective).ceil() as u64
            }
        }
    };

    if travel_frames == 0 {
        resolve_impact(world, attacker, weapon, impact, victim);
    } else {
        world.resource_mut::<PendingShots>().shots.push(PendingShot {
            land_frame: frame + travel_frames,
            attacker,
            weapon: weapon.clone(),
            impact,
            victim,
        });
    }
}

fn resolve_landed_shots(world: &mut World) {
    let frame = world.resource::<SimFrame>().0;
    let due: Vec<PendingShot> = {
        let mut pending = world.resource_mut::<PendingShots>();
        let (landed, flying): (Vec<_>, Vec<_>) = pending
            .shots
            .drain(..)
            .partition(|shot| shot.land_frame <= frame);
        pending.shots = flying;
        landed
    };
    for shot in due {
        // Track the victim to its current position if it still lives.
        let impact = shot
            .victim
            .and_then(|v| lookup_ref(world, v))
            .and_then(|e| world.get::<Position>(e).copied())
            .unwrap_or(shot.impact);
        resolve_impact(world, shot.attacker, &shot.weapon, impact, shot.victim);
    }
}

// ============================================================================
// DAMAGE DELIVERY
// ============================================================================

/// Resolve a weapon impact at a point: direct victim damage and/or
/// radius damage, honoring DamageDealtAtSelfPosition.
pub fn resolve_impact(
    world: &mut World,
    attacker: ObjectId,
    weapon: &Arc<WeaponDef>,
    impact: Position,
    victim: Option<ObjectId>,
) {
    let origin = if weapon.self_position {
        lookup_ref(world, attacker)
            .and_then(|e| world.get::<Position>(e).copied())
            .unwrap_or(impact)
    } else {
        impact
    };

    world.resource_mut::<VisualEventBus>().emit(VisualEvent::weapon_impact(
        attacker,
        victim,
        (origin.x, origin.y, origin.z),
        &weapon.name,
    ));

    if weapon.primary_radius > 0.0 || weapon.secondary_radius > 0.0 {
        radius_damage(world, attacker, weapon, origin, true);
    } else if let Some(victim) = victim {
        deal_damage_inner(
            world,
            Some(attacker),
            victim,
            weapon.primary_damage,
            &weapon.damage_type,
            true,
        );
    }
}

/// Apply primary/secondary radius damage around `origin`, gated by the
/// RadiusDamageAffects mask and the optional attacker-facing cone.
/// `allow_reaction` is false for reaction/detonation shots so a victim's
/// FireWeaponWhenDamagedBehavior cannot chain further reactions.
fn radius_damage(
    world: &mut World,
    attacker: ObjectId,
    weapon: &Arc<WeaponDef>,
    origin: Position,
    allow_reaction: bool,
) {
    let affects = weapon.radius_affects;
    let outer = weapon.primary_radius.max(weapon.secondary_radius);
    let attacker_entity = lookup_ref(world, attacker);
    let attacker_side = attacker_entity
        .and_then(|e| world.get::<Allegiance>(e))
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let attacker_template = attacker_entity
        .and_then(|e| world.get::<Template>(e))
        .map(|t| t.name.clone())
        .unwrap_or_default();
    let attacker_facing = attacker_entity
        .and_then(|e| world.get::<Facing>(e))
        .map(|f| f.angle)
        .unwrap_or(0.0);

    // Generous query radius: BSR adjustment can pull distant spheres in.
    let candidates = world
        .resource::<SpatialGrid>()
        .query_radius(origin.x, origin.z, outer + 30.0);

    for entry in candidates {
        let Some(entity) = lookup_ref(world, entry.id) else {
            continue;
        };
        let is_self = entry.id == attacker;
        if is_self && !affects.intersects(RadiusAffects::SELF | RadiusAffects::SUICIDE) {
            continue;
        }
        let Some(template) = world.get::<Template>(entity) else {
            continue;
        };
        if template.is_kind("PROJECTILE") {
            continue;
        }
        if affects.contains(RadiusAffects::NOT_AIRBORNE) && template.is_kind("AIRCRAFT") {
            continue;
        }
        if affects.contains(RadiusAffects::NOT_SIMILAR)
            && !is_self
            && template.name == attacker_template
        {
            continue;
        }
        // Sneaky units dodge incidental splash while their window runs.
        if let Some(sneaky) = world.get::<SneakyOffset>(entity) {
            if sneaky.window_active() {
                continue;
            }
        }
        let bsr = template
            .def
            .as_ref()
            .map(|d| d.bounding_sphere_radius())
            .unwrap_or(0.0);
        let side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        if !is_self {
            let relationship = world
                .resource::<SideTable>()
                .relationship(&attacker_side, &side);
            let allowed = match relationship {
                Relationship::Enemies => affects.contains(RadiusAffects::ENEMIES),
                Relationship::Allies => affects.contains(RadiusAffects::ALLIES),
                Relationship::Neutral => affects.contains(RadiusAffects::NEUTRAL),
            };
            if !allowed {
                continue;
            }
        }
        let Some(position) = world.get::<Position>(entity).copied() else {
            continue;
        };
        let distance = (position.distance_3d(&origin) - bsr).max(0.0);
        let damage = if distance <= weapon.primary_radius {
            weapon.primary_damage
        } else if distance <= weapon.secondary_radius {
            weapon.secondary_damage
        } else {
            continue;
        };
        if let Some(cone) = weapon.radius_angle {
            if !is_self {
                let to_target = (position.z - origin.z).atan2(position.x - origin.x);
                let mut delta = (to_target - attacker_facing).abs();
                while delta > std::f32::consts::PI {
                    delta = (delta - std::f32::consts::TAU).abs();
                }
                if delta.to_degrees() > cone {
                    continue;
                }
            }
        }
        deal_damage_inner(
            world,
            Some(attacker),
            entry.id,
            damage,
            &weapon.damage_type,
            allow_reaction,
        );
    }
}

/// Apply damage to one victim through its armor. Returns true if this call
/// killed it.
pub fn deal_damage(
    world: &mut World,
    source: Option<ObjectId>,
    victim: ObjectId,
    amount: f32,
    damage_type: &str,
) -> bool {
    deal_damage_inner(world, source, victim, amount, damage_type, true)
}

fn deal_damage_inner(
    world: &mut World,
    source: Option<ObjectId>,
    victim: ObjectId,
    amount: f32,
    damage_type: &str,
    allow_reaction: bool,
) -> bool {
    let Some(entity) = lookup(world, victim) else {
        return false;
    };
    let Some(body) = world.get::<Body>(entity) else {
        return false;
    };
    if !body.alive || amount <= 0.0 {
        return false;
    }

    // Armor coefficient from the current armor set.
    let coefficient = {
        let registry = world.resource::<DataRegistry>().clone();
        let armor_upgraded = body.armor_upgraded;
        world
            .get::<Template>(entity)
            .and_then(|t| t.def.as_ref())
            .and_then(|def| {
                let set = def
                    .armor_sets
                    .iter()
                    .find(|s| {
                        if armor_upgraded {
                            s.conditions.iter().any(|c| c == "PLAYER_UPGRADE")
                        } else {
                            s.conditions.is_empty()
                        }
                    })
                    .or_else(|| def.armor_sets.first())?;
                let armor = registry.armor_def(set.armor.as_deref()?)?;
                Some(armor.coefficient(damage_type))
            })
            .unwrap_or(1.0)
    };

    let (killed, health_fraction) = {
        let Some(mut body) = world.get_mut::<Body>(entity) else {
            return false;
        };
        let scaled = amount * coefficient * body.damage_scalar * body.battle_plan_damage_scalar;
        body.health = (body.health - scaled).max(0.0);
        let killed = body.health <= 0.0;
        if killed {
            body.alive = false;
        }
        (killed, body.fraction())
    };

    // Prone accumulation.
    if !killed {
        if let Some(ratio) = prone_ratio(world, entity) {
            if let Some(mut prone) = world.get_mut::<ProneState>(entity) {
                prone.frames += (amount * ratio).ceil() as u32;
            }
            if let Some(mut status) = world.get_mut::<Status>(entity) {
                status.insert(Status::PRONE);
            }
        }
    }

    // FireWeaponWhenDamagedBehavior reaction shot; reactions never chain.
    if allow_reaction && !killed {
        if let Some((pristine, damaged, threshold)) = reaction_weapons(world, entity) {
            let name = if health_fraction > threshold {
                pristine
            } else {
                damaged
            };
            if let Some(name) = name {
                let registry = world.resource::<DataRegistry>().clone();
                if let Some(weapon) = registry.weapon_def(&name) {
                    let position = world.get::<Position>(entity).copied().unwrap_or_default();
                    radius_or_self_impact(world, victim, &weapon, position);
                }
            }
        }
    }

    // Sympathetic minefield losses scale with damage dealt.
    if let Some(mut minefield) = world.get_mut::<MinefieldState>(entity) {
        if !killed {
            let loss = amount / 100.0;
            minefield.virtual_mines = (minefield.virtual_mines - loss).max(0.0);
        }
    }

    if killed {
        crate::systems::death::on_death(world, victim, source);
    }
    killed
}

fn prone_ratio(world: &World, entity: Entity) -> Option<f32> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            crate::data::BehaviorInput::ProneUpdate {
                damage_to_frames_ratio,
            } => Some(*damage_to_frames_ratio),
            _ => None,
        })
}

type ReactionWeapons = (Option<String>, Option<String>, f32);

fn reaction_weapons(world: &World, entity: Entity) -> Option<ReactionWeapons> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            crate::data::BehaviorInput::FireWeaponWhenDamagedBehavior {
                reaction_weapon_pristine,
                reaction_weapon_damaged,
                damaged_threshold,
            } => Some((
                reaction_weapon_pristine.clone(),
                reaction_weapon_damaged.clone(),
                *damaged_threshold,
            )),
            _ => None,
        })
}

/// Fire a weapon at an entity's own position without reaction chaining:
/// damage delivered here never triggers FireWeaponWhenDamagedBehavior on
/// its victims, so reaction and detonation weapons cannot recurse even
/// when their radius covers their own source.
pub fn radius_or_self_impact(
    world: &mut World,
    source: ObjectId,
    weapon: &Arc<WeaponDef>,
    position: Position,
) {
    world.resource_mut::<VisualEventBus>().emit(VisualEvent::weapon_impact(
        source,
        None,
        (position.x, position.y, position.z),
        &weapon.name,
    ));
    if weapon.primary_radius > 0.0 || weapon.secondary_radius > 0.0 {
        radius_damage(world, source, weapon, position, false);
    }
}

// ============================================================================
// CONTINUE-ATTACK RETARGET
// ============================================================================

/// After a kill, sweep the anchor for the next target owned by the same
/// original player. Acquiring one grants IGNORING_STEALTH for the new aim.
fn continue_attack_retarget(
    world: &mut World,
    entity: Entity,
    _attacker: ObjectId,
    source: CommandSource,
) {
    let weapon = world
        .get::<WeaponState>(entity)
        .and_then(|w| w.weapon.clone());
    let Some(weapon) = weapon else {
        clear_target(world, entity);
        return;
    };
    if weapon.continue_range <= 0.0 {
        clear_target(world, entity);
        return;
    }
    let Some(anchor) = world
        .get::<AiState>(entity)
        .and_then(|ai| ai.continue_anchor.clone())
    else {
        clear_target(world, entity);
        return;
    };
    let attacker_off = world
        .get::<Position>(entity)
        .map(|p| p.is_off_map())
        .unwrap_or(false);

    let candidates = world
        .resource::<SpatialGrid>()
        .query_radius(anchor.x, anchor.z, weapon.continue_range);

    let mut next: Option<ObjectId> = None;
    for entry in candidates {
        let Some(candidate_entity) = lookup_ref(world, entry.id) else {
            continue;
        };
        if candidate_entity == entity {
            continue;
        }
        let owner_matches = world
            .get::<Allegiance>(candidate_entity)
            .map(|a| a.original_owner == anchor.owner)
            .unwrap_or(false);
        if !owner_matches {
            continue;
        }
        let off = world
            .get::<Position>(candidate_entity)
            .map(|p| p.is_off_map())
            .unwrap_or(false);
        if off != attacker_off {
            continue;
        }
        // Full legality minus the stealth gate, which the grant overrides.
        let body_ok = world
            .get::<Body>(candidate_entity)
            .map(|b| b.alive)
            .unwrap_or(false);
        let status = world
            .get::<Status>(candidate_entity)
            .copied()
            .unwrap_or_default();
        if !body_ok || status.contains(Status::MASKED) {
            continue;
        }
        if world
            .get::<Template>(candidate_entity)
            .map(|t| t.is_kind("UNATTACKABLE"))
            .unwrap_or(false)
        {
            continue;
        }
        if status.contains(Status::NO_ATTACK_FROM_AI) && source == CommandSource::Ai {
            continue;
        }
        next = Some(entry.id);
        break;
    }

    match next {
        Some(target) => {
            if let Some(mut status) = world.get_mut::<Status>(entity) {
                status.insert(Status::IGNORING_STEALTH);
            }
            if let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) {
                weapon_state.aim_done_for_attack = false;
                weapon_state.last_target = Some(target);
            }
            if let Some(mut ai) = world.get_mut::<AiState>(entity) {
                ai.attack_target = Some(target);
            }
        }
        None => clear_target(world, entity),
    }
}

fn clear_target(world: &mut World, entity: Entity) {
    if let Some(mut ai) = world.get_mut::<AiState>(entity) {
        ai.attack_target = None;
        ai.continue_anchor = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{ArmorCoefficientInput, ArmorInput, ArmorSetInput, BehaviorInput, DataBundle,
        ObjectInput, WeaponInput, WeaponSetInput};
    use crate::rng::GameRng;
    use crate::store::{spawn_object, SpawnProps};
    use crate::terrain::HeightGrid;

    pub(crate) fn combat_world(bundle: DataBundle) -> World {
        let mut world = World::new();
        world.insert_resource(SimConfig::default());
        world.insert_resource(DataRegistry::from_bundle(&bundle).unwrap());
        world.insert_resource(EntityIndex::default());
        world.insert_resource(SimFrame::default());
        world.insert_resource(GameRng::default());
        world.insert_resource(SideTable::default());
        world.insert_resource(HeightGrid::flat());
        world.insert_resource(SpatialGrid::new(40.0));
        world.insert_resource(VisualEventBus::default());
        world.insert_resource(PendingShots::default());
        world
    }

    fn armed_object(name: &str, weapon: &str, max_health: f32) -> ObjectInput {
        ObjectInput {
            name: name.to_string(),
            kind_of: vec!["VEHICLE".to_string()],
            body: Some(crate::data::BodyInput {
                max_health: Some(max_health),
                initial_health: None,
            }),
            weapon_sets: vec![WeaponSetInput {
                conditions: vec![],
                primary: Some(weapon.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn basic_weapon() -> WeaponInput {
        WeaponInput {
            name: "TankGun".to_string(),
            primary_damage: 30.0,
            attack_range: 120.0,
            delay_between_shots: 100.0,
            ..Default::default()
        }
    }

    fn step_combat(world: &mut World) {
        let frame = world.resource::<SimFrame>().0 + 1;
        world.resource_mut::<SimFrame>().0 = frame;
        crate::spatial::rebuild_spatial_grid(world);
        combat_phase(world);
    }

    fn health_of(world: &World, id: ObjectId) -> Option<f32> {
        let entity = world.resource::<EntityIndex>().entity(id)?;
        let body = world.get::<Body>(entity)?;
        if body.alive {
            Some(body.health)
        } else {
            None
        }
    }

    #[test]
    fn test_direct_fire_shot_cadence() {
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 100.0),
            ],
            weapons: vec![basic_weapon()],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        assert!(try_set_attack_target(&mut world, attacker, target, CommandSource::Player));

        let mut timeline = Vec::new();
        for _ in 0..12 {
            step_combat(&mut world);
            timeline.push(health_of(&world, target).map(|h| h as i32).unwrap_or(-1));
        }
        assert_eq!(timeline, vec![70, 70, 70, 40, 40, 40, 10, 10, 10, -1, -1, -1]);
    }

    #[test]
    fn test_per_shot_pre_attack_delay() {
        let mut weapon = basic_weapon();
        weapon.pre_attack_delay = 100.0;
        weapon.pre_attack_type = Some("PER_SHOT".to_string());
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 200.0),
            ],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        try_set_attack_target(&mut world, attacker, target, CommandSource::Player);

        let mut timeline = Vec::new();
        for _ in 0..12 {
            step_combat(&mut world);
            timeline.push(health_of(&world, target).map(|h| h as i32).unwrap_or(-1));
        }
        assert_eq!(
            timeline,
            vec![200, 200, 200, 170, 170, 170, 170, 170, 170, 140, 140, 140]
        );
    }

    #[test]
    fn test_armor_coefficient_applies() {
        let mut weapon = basic_weapon();
        weapon.primary_damage = 40.0;
        weapon.damage_type = Some("SMALL_ARMS".to_string());
        let mut target = armed_object("Target", "TankGun", 200.0);
        target.armor_sets = vec![
            ArmorSetInput {
                conditions: vec![],
                armor: Some("ThinArmor".to_string()),
            },
            ArmorSetInput {
                conditions: vec!["PLAYER_UPGRADE".to_string()],
                armor: Some("CompositeArmor".to_string()),
            },
        ];
        let bundle = DataBundle {
            objects: vec![armed_object("Attacker", "TankGun", 100.0), target],
            weapons: vec![weapon],
            armors: vec![
                ArmorInput {
                    name: "ThinArmor".to_string(),
                    coefficients: vec![ArmorCoefficientInput {
                        damage_type: "SMALL_ARMS".to_string(),
                        percent: 100.0,
                    }],
                },
                ArmorInput {
                    name: "CompositeArmor".to_string(),
                    coefficients: vec![ArmorCoefficientInput {
                        damage_type: "SMALL_ARMS".to_string(),
                        percent: 25.0,
                    }],
                },
            ],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        try_set_attack_target(&mut world, attacker, target, CommandSource::Player);

        // First shot against the default set, then upgrade the armor.
        step_combat(&mut world);
        assert_eq!(health_of(&world, target), Some(160.0));
        let target_entity = world.resource::<EntityIndex>().entity(target).unwrap();
        world.get_mut::<Body>(target_entity).unwrap().armor_upgraded = true;

        let mut timeline = vec![160];
        for _ in 0..9 {
            step_combat(&mut world);
            timeline.push(health_of(&world, target).map(|h| h as i32).unwrap_or(-1));
        }
        assert_eq!(timeline, vec![160, 160, 160, 150, 150, 150, 140, 140, 140, 130]);
    }

    #[test]
    fn test_stealth_gate_blocks_fire() {
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 100.0),
            ],
            weapons: vec![basic_weapon()],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        let target_entity = world.resource::<EntityIndex>().entity(target).unwrap();
        world
            .get_mut::<Status>(target_entity)
            .unwrap()
            .insert(Status::STEALTHED);

        assert!(
            !try_set_attack_target(&mut world, attacker, target, CommandSource::Player),
            "stealthed undetected target is not attackable"
        );

        // Detection makes it legal again.
        world
            .get_mut::<Status>(target_entity)
            .unwrap()
            .insert(Status::DETECTED);
        assert!(try_set_attack_target(&mut world, attacker, target, CommandSource::Player));
    }

    #[test]
    fn test_no_attack_from_ai_filter() {
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 100.0),
            ],
            weapons: vec![basic_weapon()],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        let target_entity = world.resource::<EntityIndex>().entity(target).unwrap();
        world
            .get_mut::<Status>(target_entity)
            .unwrap()
            .insert(Status::NO_ATTACK_FROM_AI);

        assert!(!try_set_attack_target(&mut world, attacker, target, CommandSource::Ai));
        assert!(try_set_attack_target(&mut world, attacker, target, CommandSource::Player));
    }

    #[test]
    fn test_minimum_range_suppresses_fire() {
        let mut weapon = basic_weapon();
        weapon.minimum_attack_range = 50.0;
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 100.0),
            ],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        try_set_attack_target(&mut world, attacker, target, CommandSource::Player);

        for _ in 0..6 {
            step_combat(&mut world);
        }
        assert_eq!(health_of(&world, target), Some(100.0), "inside minimum range");
    }

    #[test]
    fn test_continue_attack_same_owner_filter() {
        let mut weapon = basic_weapon();
        weapon.primary_damage = 100.0;
        weapon.continue_attack_range = 60.0;
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Victim", "TankGun", 100.0),
            ],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let victim =
            spawn_object(&mut world, "Victim", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        // Same side and owner as the victim, close to it.
        let same_owner =
            spawn_object(&mut world, "Victim", "china", 40.0, 10.0, SpawnProps::default()).unwrap();
        // Closer but owned by a different original player.
        let mut gla_props = SpawnProps::default();
        gla_props.original_owner = Some("glaplayer".to_string());
        let _other_owner =
            spawn_object(&mut world, "Victim", "gla", 32.0, 10.0, gla_props).unwrap();

        try_set_attack_target(&mut world, attacker, victim, CommandSource::Player);
        step_combat(&mut world); // one-shot kill, retarget happens next frame

        let mut targets = Vec::new();
        for _ in 0..3 {
            step_combat(&mut world);
            let entity = world.resource::<EntityIndex>().entity(attacker).unwrap();
            targets.push(world.get::<AiState>(entity).unwrap().attack_target);
        }
        assert_eq!(
            targets[0],
            Some(same_owner),
            "same-original-owner candidate wins over a closer foreign one"
        );
    }

    #[test]
    fn test_clip_and_reload() {
        let mut weapon = basic_weapon();
        weapon.delay_between_shots = 33.0; // 1 frame
        weapon.clip_size = 2;
        weapon.clip_reload_time = 167.0; // 6 frames
        weapon.primary_damage = 10.0;
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 1000.0),
            ],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let target =
            spawn_object(&mut world, "Target", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        try_set_attack_target(&mut world, attacker, target, CommandSource::Player);

        let mut total_damage_by_frame = Vec::new();
        for _ in 0..12 {
            step_combat(&mut world);
            total_damage_by_frame.push(1000 - health_of(&world, target).unwrap() as i32);
        }
        // Two quick shots, then a clip reload gap before the next pair.
        assert_eq!(total_damage_by_frame[0], 10);
        assert_eq!(total_damage_by_frame[1], 20);
        assert_eq!(total_damage_by_frame[6], 20, "reloading, no fire");
        assert!(total_damage_by_frame[11] >= 30, "clip refilled and firing again");
    }

    #[test]
    fn test_veterancy_awarded_on_kill() {
        let mut weapon = basic_weapon();
        weapon.primary_damage = 200.0;
        let mut attacker_def = armed_object("Attacker", "TankGun", 100.0);
        attacker_def.experience_required = Some(vec![0, 100, 300, 600]);
        let mut victim_def = armed_object("Victim", "TankGun", 100.0);
        victim_def.experience_value = Some(vec![120, 150, 200, 300]);
        let bundle = DataBundle {
            objects: vec![attacker_def, victim_def],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let victim =
            spawn_object(&mut world, "Victim", "china", 30.0, 10.0, SpawnProps::default()).unwrap();
        try_set_attack_target(&mut world, attacker, victim, CommandSource::Player);
        step_combat(&mut world);

        let entity = world.resource::<EntityIndex>().entity(attacker).unwrap();
        let veterancy = world.get::<Veterancy>(entity).unwrap();
        assert_eq!(veterancy.experience, 120);
        assert_eq!(veterancy.level, VeterancyLevel::Veteran);
    }

    #[test]
    fn test_no_xp_for_ally_kill() {
        let mut weapon = basic_weapon();
        weapon.primary_damage = 200.0;
        let mut victim_def = armed_object("Victim", "TankGun", 100.0);
        victim_def.experience_value = Some(vec![120, 150, 200, 300]);
        let bundle = DataBundle {
            objects: vec![armed_object("Attacker", "TankGun", 100.0), victim_def],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let victim =
            spawn_object(&mut world, "Victim", "america", 30.0, 10.0, SpawnProps::default())
                .unwrap();
        // Friendly fire through the direct pipeline still yields no XP.
        deal_damage(&mut world, Some(attacker), victim, 500.0, "EXPLOSION");

        let entity = world.resource::<EntityIndex>().entity(attacker).unwrap();
        assert_eq!(world.get::<Veterancy>(entity).unwrap().experience, 0);
    }

    #[test]
    fn test_self_radius_reaction_weapon_fires_once() {
        // The reaction blast covers its own source: without the no-chain
        // rule this would recurse damage -> reaction -> damage forever.
        let reactor = ObjectInput {
            name: "Reactor".to_string(),
            kind_of: vec!["VEHICLE".to_string()],
            body: Some(crate::data::BodyInput {
                max_health: Some(200.0),
                initial_health: None,
            }),
            behaviors: vec![BehaviorInput::FireWeaponWhenDamagedBehavior {
                reaction_weapon_pristine: Some("FlashBack".to_string()),
                reaction_weapon_damaged: None,
                damaged_threshold: 0.5,
            }],
            ..Default::default()
        };
        let flashback = WeaponInput {
            name: "FlashBack".to_string(),
            primary_damage: 30.0,
            primary_damage_radius: 20.0,
            radius_damage_affects: vec!["ENEMIES".to_string(), "SELF".to_string()],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![reactor],
            weapons: vec![flashback],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Reactor", "china", 10.0, 10.0, SpawnProps::default())
            .unwrap();
        crate::spatial::rebuild_spatial_grid(&mut world);

        deal_damage(&mut world, None, id, 10.0, "EXPLOSION");
        // 200 - 10 incoming - exactly one 30-damage reaction on itself.
        assert_eq!(health_of(&world, id), Some(160.0));
        let reaction_impacts = world
            .resource::<VisualEventBus>()
            .iter()
            .filter(|e| e.weapon_name.as_deref() == Some("FLASHBACK"))
            .count();
        assert_eq!(reaction_impacts, 1, "reaction fired once, no chain");

        // A later hit reacts again: the rule is per damage event, not
        // once-ever.
        deal_damage(&mut world, None, id, 10.0, "EXPLOSION");
        assert_eq!(health_of(&world, id), Some(120.0));
        let reaction_impacts = world
            .resource::<VisualEventBus>()
            .iter()
            .filter(|e| e.weapon_name.as_deref() == Some("FLASHBACK"))
            .count();
        assert_eq!(reaction_impacts, 2);
    }

    #[test]
    fn test_radius_damage_spares_allies_without_mask() {
        let mut weapon = basic_weapon();
        weapon.primary_damage = 50.0;
        weapon.primary_damage_radius = 40.0;
        weapon.radius_damage_affects = vec!["ENEMIES".to_string()];
        let bundle = DataBundle {
            objects: vec![
                armed_object("Attacker", "TankGun", 100.0),
                armed_object("Target", "TankGun", 200.0),
            ],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let attacker =
            spawn_object(&mut world, "Attacker", "america", 10.0, 10.0, SpawnProps::default())
                .unwrap();
        let enemy =
            spawn_object(&mut world, "Target", "china", 40.0, 10.0, SpawnProps::default()).unwrap();
        let friend =
            spawn_object(&mut world, "Target", "america", 45.0, 10.0, SpawnProps::default())
                .unwrap();
        try_set_attack_target(&mut world, attacker, enemy, CommandSource::Player);
        step_combat(&mut world);

        assert!(health_of(&world, enemy).unwrap() < 200.0);
        assert_eq!(health_of(&world, friend), Some(200.0));
    }
}
