//! Special behavior updates: mines, traps, deployment, point defense,
//! hordes, prone, stealth, economy drips, hack internet, railed transports.
//!
//! These run in the "internal clocks" phase, before movement and combat.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::{frames_from_ms, BehaviorInput, DataRegistry};
use crate::sides::{Relationship, SideTable};
use crate::spatial::SpatialGrid;
use crate::store::lookup;
use crate::terrain::WaypointGraph;

/// Power granted while a reactor overcharge is engaged.
const OVERCHARGE_POWER_BONUS: i32 = 5;
/// Health bled per frame while overcharged.
const OVERCHARGE_DRAIN: f32 = 0.25;
/// Docking tolerance for railed transports, world units.
const RAIL_DOCK_RANGE: f32 = 8.0;

/// Reactor overcharge toggle state.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Overcharge {
    pub active: bool,
}

pub fn behavior_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }

        tick_stealth(world, entity);
        tick_prone(world, entity);
        tick_deploy(world, entity);
        tick_point_defense(world, id, entity);
        tick_horde(world, id, entity);
        tick_auto_deposit(world, entity);
        tick_hack_internet(world, id, entity);
        tick_rail(world, entity);
        tick_minefield(world, id, entity);
        tick_demo_trap(world, id, entity);
        tick_rebuild_hole(world, id, entity);
        tick_auto_heal(world, entity);
        tick_overcharge(world, entity);
    }
}

// ============================================================================
// STEALTH / PRONE
// ============================================================================

/// Stealth-capable units fade while not engaging.
fn tick_stealth(world: &mut World, entity: Entity) {
    let Some(status) = world.get::<Status>(entity).copied() else {
        return;
    };
    if !status.contains(Status::CAN_STEALTH) {
        return;
    }
    let engaged = status.intersects(Status::IS_FIRING_WEAPON | Status::IS_ATTACKING);
    if let Some(mut status) = world.get_mut::<Status>(entity) {
        status.set(Status::STEALTHED, !engaged);
    }
}

fn tick_prone(world: &mut World, entity: Entity) {
    let Some(mut prone) = world.get_mut::<ProneState>(entity) else {
        return;
    };
    if prone.frames > 0 {
        prone.frames -= 1;
        let done = prone.frames == 0;
        drop(prone);
        if done {
            if let Some(mut status) = world.get_mut::<Status>(entity) {
                status.remove(Status::PRONE);
            }
        }
    }
}

// ============================================================================
// DEPLOY-STYLE AI
// ============================================================================

fn deploy_times(world: &World, entity: Entity) -> Option<(u32, u32)> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::DeployStyleAIUpdate {
                unpack_time,
                pack_time,
            } => Some((frames_from_ms(*unpack_time), frames_from_ms(*pack_time))),
            _ => None,
        })
}

/// Four-state deploy machine. A reversal mid-transition takes as many frames
/// as were left in the interrupted transition.
fn tick_deploy(world: &mut World, entity: Entity) {
    let Some((unpack_frames, pack_frames)) = deploy_times(world, entity) else {
        return;
    };
    let wants_attack = world
        .get::<AiState>(entity)
        .map(|ai| ai.attack_target.is_some())
        .unwrap_or(false);
    let wants_move = world
        .get::<Locomotion>(entity)
        .map(|l| l.goal.is_some())
        .unwrap_or(false);

    let Some(mut deploy) = world.get_mut::<DeployState>(entity) else {
        return;
    };
    match deploy.mode {
        DeployMode::ReadyToMove => {
            if wants_attack {
                deploy.mode = DeployMode::Unpacking;
                deploy.timer = unpack_frames.max(1);
            }
        }
        DeployMode::Unpacking => {
            if wants_move && !wants_attack {
                let remaining = deploy.timer;
                deploy.mode = DeployMode::Packing;
                deploy.timer = remaining.max(1);
            } else if deploy.timer > 1 {
                deploy.timer -= 1;
            } else {
                deploy.mode = DeployMode::ReadyToAttack;
                deploy.timer = 0;
            }
        }
        DeployMode::ReadyToAttack => {
            if wants_move && !wants_attack {
                deploy.mode = DeployMode::Packing;
                deploy.timer = pack_frames.max(1);
            }
        }
        DeployMode::Packing => {
            if wants_attack {
                let remaining = deploy.timer;
                deploy.mode = DeployMode::Unpacking;
                deploy.timer = remaining.max(1);
            } else if deploy.timer > 1 {
                deploy.timer -= 1;
            } else {
                deploy.mode = DeployMode::ReadyToMove;
                deploy.timer = 0;
            }
        }
    }
}

// ============================================================================
// POINT DEFENSE LASER
// ============================================================================

type PointDefenseParams = (String, Vec<String>, Vec<String>, u32, f32);

fn point_defense_params(world: &World, entity: Entity) -> Option<PointDefenseParams> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::PointDefenseLaserUpdate {
                weapon_template,
                primary_target_types,
                secondary_target_types,
                scan_rate,
                scan_range,
            } => Some((
                weapon_template.clone(),
                primary_target_types.clone(),
                secondary_target_types.clone(),
                frames_from_ms(*scan_rate).max(1),
                *scan_range,
            )),
            _ => None,
        })
}

fn tick_point_defense(world: &mut World, id: ObjectId, entity: Entity) {
    if world.get::<PointDefenseState>(entity).is_none() {
        return;
    }
    let Some((weapon_name, primary, secondary, scan_rate, scan_range)) =
        point_defense_params(world, entity)
    else {
        return;
    };
    {
        let Some(mut state) = world.get_mut::<PointDefenseState>(entity) else {
            return;
        };
        if state.scan_cooldown > 0 {
            state.scan_cooldown -= 1;
            return;
        }
        state.scan_cooldown = scan_rate;
    }

    let my_side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let registry = world.resource::<DataRegistry>().clone();
    let Some(weapon) = registry.weapon_def(&weapon_name) else {
        return;
    };

    let candidates = world
        .resource::<SpatialGrid>()
        .query_radius(position.x, position.z, scan_range);

    let mut intercept: Option<ObjectId> = None;
    for pass in [&primary, &secondary] {
        if intercept.is_some() {
            break;
        }
        for entry in &candidates {
            let Some(projectile_entity) = lookup(world, entry.id) else {
                continue;
            };
            let Some(projectile) = world.get::<ProjectileState>(projectile_entity) else {
                continue;
            };
            // Never intercept friendly fire.
            let launcher_side = lookup(world, projectile.launcher)
                .and_then(|e| world.get::<Allegiance>(e))
                .map(|a| a.side.clone())
                .unwrap_or_default();
            if world.resource::<SideTable>().relationship(&my_side, &launcher_side)
                == Relationship::Allies
            {
                continue;
            }
            let Some(template) = world.get::<Template>(projectile_entity) else {
                continue;
            };
            let matches = pass.iter().any(|kind| {
                template.is_kind(kind)
                    || kind
                        .strip_suffix('S')
                        .map(|singular| template.is_kind(singular))
                        .unwrap_or(false)
            });
            if !matches {
                continue;
            }
            let projectile_position = world
                .get::<Position>(projectile_entity)
                .copied()
                .unwrap_or_default();
            if position.distance_3d(&projectile_position) <= weapon.attack_range {
                intercept = Some(entry.id);
                break;
            }
        }
    }

    if let Some(target) = intercept {
        if let Some(target_entity) = lookup(world, target) {
            let at = world
                .get::<Position>(target_entity)
                .copied()
                .unwrap_or_default();
            world
                .resource_mut::<crate::events::VisualEventBus>()
                .emit(crate::events::VisualEvent::weapon_impact(
                    id,
                    Some(target),
                    (at.x, at.y, at.z),
                    &weapon.name,
                ));
            if let Some(mut body) = world.get_mut::<Body>(target_entity) {
                body.health = 0.0;
                body.alive = false;
            }
            world.entity_mut(target_entity).insert(PendingDestroy);
        }
    }
}

// ============================================================================
// HORDE
// ============================================================================

type HordeParams = (u32, Vec<String>, f32, u32, f32);

fn horde_params(world: &World, entity: Entity) -> Option<HordeParams> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::HordeUpdate {
                update_rate,
                kind_of,
                radius,
                count,
                rub_off_radius,
            } => Some((
                frames_from_ms(*update_rate).max(1),
                kind_of.clone(),
                *radius,
                *count,
                *rub_off_radius,
            )),
            _ => None,
        })
}

fn tick_horde(world: &mut World, id: ObjectId, entity: Entity) {
    if world.get::<HordeState>(entity).is_none() {
        return;
    }
    let Some((update_rate, kinds, radius, count, rub_off_radius)) = horde_params(world, entity)
    else {
        return;
    };
    {
        let Some(mut state) = world.get_mut::<HordeState>(entity) else {
            return;
        };
        if state.cooldown > 0 {
            state.cooldown -= 1;
            return;
        }
        state.cooldown = update_rate;
    }

    let my_side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let side_index = world.resource::<SideTable>().side_index(&my_side);
    let position = world.get::<Position>(entity).copied().unwrap_or_default();

    let count_matching = |world: &mut World, x: f32, z: f32, r: f32| -> u32 {
        let entries = world
            .resource::<SpatialGrid>()
            .query_side(x, z, r, side_index);
        entries
            .iter()
            .filter(|entry| {
                lookup(world, entry.id)
                    .and_then(|e| world.get::<Template>(e))
                    .map(|t| kinds.iter().any(|k| t.is_kind(k)))
                    .unwrap_or(false)
            })
            .count() as u32
    };

    let mut in_horde = count_matching(world, position.x, position.z, radius) >= count;

    // Rub-off: standing next to a true horde member is enough.
    if !in_horde && rub_off_radius > 0.0 {
        let neighbors = world
            .resource::<SpatialGrid>()
            .query_side(position.x, position.z, rub_off_radius, side_index);
        for neighbor in neighbors {
            if neighbor.id == id {
                continue;
            }
            let qualified = lookup(world, neighbor.id)
                .and_then(|e| world.get::<HordeState>(e))
                .map(|h| h.in_horde)
                .unwrap_or(false);
            if qualified {
                in_horde = true;
                break;
            }
        }
    }

    let (nationalism, fanaticism) = {
        let sides = world.resource::<SideTable>();
        let state = sides.get(&my_side);
        (
            state.map(|s| s.has_science("SCIENCE_NATIONALISM")).unwrap_or(false),
            state.map(|s| s.has_science("SCIENCE_FANATICISM")).unwrap_or(false),
        )
    };

    if let Some(mut state) = world.get_mut::<HordeState>(entity) {
        state.in_horde = in_horde;
    }
    let def = world.get::<Template>(entity).and_then(|t| t.def.clone());
    let registry = world.resource::<DataRegistry>().clone();
    if let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) {
        weapon_state.bonus_flags.set(WeaponBonus::HORDE, in_horde);
        weapon_state
            .bonus_flags
            .set(WeaponBonus::NATIONALISM, in_horde && nationalism);
        weapon_state
            .bonus_flags
            .set(WeaponBonus::FANATICISM, in_horde && fanaticism);
        if let Some(def) = def {
            weapon_state.select_weapon_set(&def, |name| registry.weapon_def(name));
        }
    }
}

// ============================================================================
// ECONOMY
// ============================================================================

fn auto_deposit_params(world: &World, entity: Entity) -> Option<(u32, i64, i64)> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::AutoDepositUpdate {
                deposit_timing,
                deposit_amount,
                initial_capture_bonus,
            } => Some((
                frames_from_ms(*deposit_timing).max(1),
                *deposit_amount,
                *initial_capture_bonus,
            )),
            _ => None,
        })
}

fn tick_auto_deposit(world: &mut World, entity: Entity) {
    if world.get::<AutoDepositState>(entity).is_none() {
        return;
    }
    let under_construction = world
        .get::<Status>(entity)
        .map(|s| s.contains(Status::UNDER_CONSTRUCTION))
        .unwrap_or(false);
    if under_construction {
        return;
    }
    let Some((timing, amount, bonus)) = auto_deposit_params(world, entity) else {
        return;
    };
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    let (pay, pay_bonus) = {
        let Some(mut state) = world.get_mut::<AutoDepositState>(entity) else {
            return;
        };
        let pay_bonus = state.initial_bonus_pending;
        state.initial_bonus_pending = false;
        if state.cooldown > 1 {
            state.cooldown -= 1;
            (false, pay_bonus)
        } else {
            state.cooldown = timing;
            (true, pay_bonus)
        }
    };

    let mut sides = world.resource_mut::<SideTable>();
    if let Some(state) = sides.get_mut(&side) {
        if pay_bonus && bonus > 0 {
            state.add_credits(bonus);
        }
        if pay && amount > 0 {
            state.add_credits(amount);
        }
    }
}

fn hack_params(world: &World, entity: Entity) -> Option<(u32, u32, u32, i64)> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::HackInternetAIUpdate {
                unpack_time,
                pack_time,
                cash_update_delay,
                regular_cash_amount,
            } => Some((
                frames_from_ms(*unpack_time).max(1),
                frames_from_ms(*pack_time).max(1),
                frames_from_ms(*cash_update_delay).max(1),
                *regular_cash_amount,
            )),
            _ => None,
        })
}

/// Start hacking: packed hackers unpack, then earn on a cadence.
pub fn hack_internet_command(world: &mut World, id: ObjectId) -> bool {
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let Some((unpack_frames, _, _, _)) = hack_params(world, entity) else {
        return false;
    };
    let Some(mut hack) = world.get_mut::<HackInternetState>(entity) else {
        return false;
    };
    if hack.mode != HackMode::Packed {
        return false;
    }
    hack.mode = HackMode::Unpacking;
    hack.timer = unpack_frames;
    drop(hack);
    if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
        locomotion.clear_path();
    }
    true
}

/// Move request against a hacker: unpacked hackers pack first and buffer the
/// move; packing hackers just buffer. Returns true when handled here.
pub fn hack_internet_buffer_move(world: &mut World, id: ObjectId, x: f32, z: f32) -> bool {
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let Some((_, pack_frames, _, _)) = hack_params(world, entity) else {
        return false;
    };
    let Some(mut hack) = world.get_mut::<HackInternetState>(entity) else {
        return false;
    };
    match hack.mode {
        HackMode::Packed => false,
        HackMode::Packing => {
            hack.deferred_moves.push((x, z));
            true
        }
        HackMode::Unpacked | HackMode::Unpacking => {
            hack.mode = HackMode::Packing;
            hack.timer = pack_frames;
            hack.deferred_moves.push((x, z));
            true
        }
    }
}

fn tick_hack_internet(world: &mut World, id: ObjectId, entity: Entity) {
    let Some((_, _, cash_delay, cash_amount)) = hack_params(world, entity) else {
        return;
    };
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    enum Outcome {
        Nothing,
        Earn,
        Flush(Vec<(f32, f32)>),
    }
    let outcome = {
        let Some(mut hack) = world.get_mut::<HackInternetState>(entity) else {
            return;
        };
        match hack.mode {
            HackMode::Packed => Outcome::Nothing,
            HackMode::Unpacking => {
                if hack.timer > 1 {
                    hack.timer -= 1;
                    Outcome::Nothing
                } else {
                    hack.mode = HackMode::Unpacked;
                    hack.cash_cooldown = cash_delay;
                    Outcome::Nothing
                }
            }
            HackMode::Unpacked => {
                if hack.cash_cooldown > 1 {
                    hack.cash_cooldown -= 1;
                    Outcome::Nothing
                } else {
                    hack.cash_cooldown = cash_delay;
                    Outcome::Earn
                }
            }
            HackMode::Packing => {
                if hack.timer > 1 {
                    hack.timer -= 1;
                    Outcome::Nothing
                } else {
                    hack.mode = HackMode::Packed;
                    Outcome::Flush(std::mem::take(&mut hack.deferred_moves))
                }
            }
        }
    };

    match outcome {
        Outcome::Nothing => {}
        Outcome::Earn => {
            let mut sides = world.resource_mut::<SideTable>();
            if let Some(state) = sides.get_mut(&side) {
                state.add_credits(cash_amount);
            }
        }
        Outcome::Flush(moves) => {
            if let Some(&(x, z)) = moves.last() {
                crate::systems::movement::order_move(world, id, x, z);
            }
        }
    }
}

// ============================================================================
// RAILED TRANSPORT
// ============================================================================

fn rail_prefix(world: &World, entity: Entity) -> Option<String> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::RailedTransportAIUpdate { path_prefix_name } => {
                Some(path_prefix_name.clone())
            }
            _ => None,
        })
}

/// Traverse to the next waypoint carrying the configured prefix.
pub fn execute_railed_transport(world: &mut World, id: ObjectId) -> bool {
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let Some(prefix) = rail_prefix(world, entity) else {
        return false;
    };
    let in_transit = world
        .get::<RailedTransportState>(entity)
        .map(|r| r.in_transit)
        .unwrap_or(false);
    if in_transit {
        return false;
    }
    let position = world.get::<Position>(entity).copied().unwrap_or_default();

    let target = {
        let graph = world.resource::<WaypointGraph>();
        let nodes = graph.nodes_with_prefix(&prefix);
        if nodes.len() < 2 {
            return false;
        }
        // Nearest node is where we are docked; head for the next one.
        let mut nearest = 0;
        let mut nearest_dist = f32::MAX;
        for (slot, node) in nodes.iter().enumerate() {
            let dx = node.x - position.x;
            let dz = node.z - position.z;
            let dist = (dx * dx + dz * dz).sqrt();
            if dist < nearest_dist {
                nearest_dist = dist;
                nearest = slot;
            }
        }
        let next = nodes[(nearest + 1) % nodes.len()];
        (next.x, next.z)
    };

    if let Some(mut rail) = world.get_mut::<RailedTransportState>(entity) {
        rail.in_transit = true;
        rail.docked_prefix = None;
    }
    crate::systems::movement::order_move(world, id, target.0, target.1);
    true
}

/// Whether normal move commands should be ignored for this entity.
pub fn rail_ignores_moves(world: &World, entity: Entity) -> bool {
    world
        .get::<RailedTransportState>(entity)
        .map(|r| r.in_transit || r.docked_prefix.is_some())
        .unwrap_or(false)
}

fn tick_rail(world: &mut World, entity: Entity) {
    let Some(prefix) = rail_prefix(world, entity) else {
        return;
    };
    let in_transit = world
        .get::<RailedTransportState>(entity)
        .map(|r| r.in_transit)
        .unwrap_or(false);
    if !in_transit {
        return;
    }
    let arrived = world
        .get::<Locomotion>(entity)
        .map(|l| l.goal.is_none())
        .unwrap_or(true);
    if !arrived {
        return;
    }
    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let docked = {
        let graph = world.resource::<WaypointGraph>();
        graph.nodes_with_prefix(&prefix).iter().any(|node| {
            let dx = node.x - position.x;
            let dz = node.z - position.z;
            (dx * dx + dz * dz).sqrt() <= RAIL_DOCK_RANGE
        })
    };
    if let Some(mut rail) = world.get_mut::<RailedTransportState>(entity) {
        rail.in_transit = false;
        rail.docked_prefix = docked.then(|| prefix.clone());
    }
}

// ============================================================================
// MINES AND TRAPS
// ============================================================================

type MinefieldParams = (String, Vec<String>, u32, bool, bool, u32);

fn minefield_params(world: &World, entity: Entity) -> Option<MinefieldParams> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::MinefieldBehavior {
                detonation_weapon,
                detonated_by,
                scan_rate,
                workers_detonate,
                regenerates,
                num_virtual_mines,
            } => Some((
                detonation_weapon.clone(),
                detonated_by.clone(),
                frames_from_ms(*scan_rate).max(1),
                *workers_detonate,
                *regenerates,
                *num_virtual_mines,
            )),
            _ => None,
        })
}

fn tick_minefield(world: &mut World, id: ObjectId, entity: Entity) {
    let Some((weapon_name, detonated_by, scan_rate, workers_detonate, regenerates, max_mines)) =
        minefield_params(world, entity)
    else {
        return;
    };
    {
        let Some(mut state) = world.get_mut::<MinefieldState>(entity) else {
            return;
        };
        if regenerates && state.virtual_mines < max_mines as f32 {
            // AutoHealBehavior restores virtual mines over roughly a minute.
            state.virtual_mines =
                (state.virtual_mines + max_mines as f32 / 1800.0).min(max_mines as f32);
        }
        if state.scan_cooldown > 0 {
            state.scan_cooldown -= 1;
            return;
        }
        state.scan_cooldown = scan_rate;
    }

    let my_side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let trigger_radius = world
        .get::<Template>(entity)
        .and_then(|t| t.def.as_ref().map(|d| d.geometry.major_radius))
        .unwrap_or(5.0)
        + 5.0;

    let intruders = world
        .resource::<SpatialGrid>()
        .query_radius(position.x, position.z, trigger_radius);

    for entry in intruders {
        if entry.id == id {
            continue;
        }
        let mines_left = world
            .get::<MinefieldState>(entity)
            .map(|m| m.virtual_mines)
            .unwrap_or(0.0);
        if mines_left < 1.0 {
            break;
        }
        let Some(intruder_entity) = lookup(world, entry.id) else {
            continue;
        };
        let their_side = world
            .get::<Allegiance>(intruder_entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        let relationship = world
            .resource::<SideTable>()
            .relationship(&my_side, &their_side);
        let mask_matches = detonated_by.iter().any(|mask| match mask.as_str() {
            "ENEMIES" => relationship == Relationship::Enemies,
            "ALLIES" => relationship == Relationship::Allies,
            "NEUTRAL" => relationship == Relationship::Neutral,
            _ => false,
        });
        if !mask_matches {
            continue;
        }
        if !workers_detonate {
            let worker = world
                .get::<Template>(intruder_entity)
                .map(|t| t.is_kind("DOZER") || t.is_kind("HARVESTER"))
                .unwrap_or(false);
            if worker {
                continue;
            }
        }
        // One virtual mine per intruder.
        if let Some(mut state) = world.get_mut::<MinefieldState>(entity) {
            state.virtual_mines -= 1.0;
        }
        let registry = world.resource::<DataRegistry>().clone();
        if let Some(weapon) = registry.weapon_def(&weapon_name) {
            crate::systems::combat::radius_or_self_impact(world, id, &weapon, position);
        }
    }

    let depleted = world
        .get::<MinefieldState>(entity)
        .map(|m| m.virtual_mines < 1.0 && !regenerates)
        .unwrap_or(false);
    if depleted {
        crate::store::kill_object(world, id);
    }
}

type DemoTrapParams = (String, u32, f32);

fn demo_trap_params(world: &World, entity: Entity) -> Option<DemoTrapParams> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::DemoTrapUpdate {
                detonation_weapon,
                scan_rate,
                trigger_detonation_range,
                ..
            } => Some((
                detonation_weapon.clone(),
                frames_from_ms(*scan_rate).max(1),
                *trigger_detonation_range,
            )),
            _ => None,
        })
}

pub fn toggle_demo_trap_mode(world: &mut World, id: ObjectId) -> bool {
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let Some(mut state) = world.get_mut::<DemoTrapState>(entity) else {
        return false;
    };
    state.proximity_mode = !state.proximity_mode;
    true
}

pub fn detonate_demo_trap(world: &mut World, id: ObjectId) -> bool {
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let Some((weapon_name, _, _)) = demo_trap_params(world, entity) else {
        return false;
    };
    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let registry = world.resource::<DataRegistry>().clone();
    if let Some(weapon) = registry.weapon_def(&weapon_name) {
        crate::systems::combat::radius_or_self_impact(world, id, &weapon, position);
    }
    crate::store::kill_object(world, id);
    true
}

fn tick_demo_trap(world: &mut World, id: ObjectId, entity: Entity) {
    let Some((_, scan_rate, trigger_range)) = demo_trap_params(world, entity) else {
        return;
    };
    let proximity = {
        let Some(mut state) = world.get_mut::<DemoTrapState>(entity) else {
            return;
        };
        if !state.proximity_mode {
            return;
        }
        if state.scan_cooldown > 0 {
            state.scan_cooldown -= 1;
            return;
        }
        state.scan_cooldown = scan_rate;
        true
    };
    if !proximity {
        return;
    }

    let my_side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let hostiles = world
        .resource::<SpatialGrid>()
        .query_radius(position.x, position.z, trigger_range.max(5.0));
    let tripped = hostiles.iter().any(|entry| {
        entry.id != id
            && lookup(world, entry.id)
                .and_then(|e| world.get::<Allegiance>(e))
                .map(|a| {
                    world.resource::<SideTable>().relationship(&my_side, &a.side)
                        == Relationship::Enemies
                })
                .unwrap_or(false)
    });
    if tripped {
        detonate_demo_trap(world, id);
    }
}

// ============================================================================
// REBUILD HOLE
// ============================================================================

fn rebuild_params(world: &World, entity: Entity) -> Option<(String, u32, f32)> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::RebuildHoleBehavior {
                worker_object_name,
                worker_respawn_delay,
                hole_health_regen_percent_per_second,
                ..
            } => Some((
                worker_object_name.clone(),
                frames_from_ms(*worker_respawn_delay).max(1),
                *hole_health_regen_percent_per_second,
            )),
            _ => None,
        })
}

/// Drive one rebuild hole: regenerate, respawn the worker on a timer, raise
/// the reconstruction, and retire hole and worker when it stands.
fn tick_rebuild_hole(world: &mut World, id: ObjectId, entity: Entity) {
    let Some((worker_template, respawn_frames, regen_percent)) = rebuild_params(world, entity)
    else {
        return;
    };
    let Some(state) = world.get::<RebuildHoleState>(entity).cloned() else {
        return;
    };

    // Linear hole regeneration.
    if regen_percent > 0.0 {
        if let Some(mut body) = world.get_mut::<Body>(entity) {
            let rate = body.max_health * regen_percent / 100.0
                / crate::data::LOGIC_FRAMES_PER_SECOND as f32;
            body.heal(rate);
        }
    }

    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    let worker_alive = state
        .worker
        .and_then(|w| lookup(world, w))
        .and_then(|e| world.get::<Body>(e))
        .map(|b| b.alive)
        .unwrap_or(false);

    // Reconstruction bookkeeping first.
    if let Some(reconstruction) = state.reconstruction {
        let recon_entity = lookup(world, reconstruction);
        let recon_alive = recon_entity
            .and_then(|e| world.get::<Body>(e))
            .map(|b| b.alive)
            .unwrap_or(false);
        if !recon_alive {
            // Reconstruction died: the cycle restarts.
            if let Some(mut hole_state) = world.get_mut::<RebuildHoleState>(entity) {
                hole_state.reconstruction = None;
                if !worker_alive {
                    hole_state.worker = None;
                    hole_state.worker_respawn_timer = respawn_frames;
                }
            }
            return;
        }
        let still_building = recon_entity
            .and_then(|e| world.get::<Status>(e))
            .map(|s| s.contains(Status::UNDER_CONSTRUCTION))
            .unwrap_or(false);
        if !still_building {
            // The structure stands again: hole and worker retire.
            let worker = state.worker;
            if let Some(mut hole_state) = world.get_mut::<RebuildHoleState>(entity) {
                hole_state.reconstruction = None;
                hole_state.worker = None;
            }
            if let Some(worker) = worker {
                crate::store::kill_object(world, worker);
            }
            crate::store::kill_object(world, id);
        }
        return;
    }

    if worker_alive {
        // Worker ready, nothing rising yet: start the reconstruction.
        let Some(reconstruction) = crate::store::spawn_object(
            world,
            &state.rebuild_template,
            &side,
            position.x,
            position.z,
            crate::store::SpawnProps {
                angle: state.rebuild_angle,
                under_construction: true,
                ..Default::default()
            },
        ) else {
            return;
        };
        let build_frames = world
            .resource::<DataRegistry>()
            .object_def(&state.rebuild_template)
            .map(|d| d.build_time_frames.max(1))
            .unwrap_or(1);
        if let Some(recon_entity) = lookup(world, reconstruction) {
            world.entity_mut(recon_entity).insert(ConstructionState {
                percent: 0.0,
                builder: state.worker,
                build_frames_total: build_frames,
            });
        }
        if let Some(worker) = state.worker {
            if let Some(worker_entity) = lookup(world, worker) {
                if world.get::<DozerState>(worker_entity).is_none() {
                    world.entity_mut(worker_entity).insert(DozerState::default());
                }
                if let Some(mut dozer) = world.get_mut::<DozerState>(worker_entity) {
                    dozer.construct_target = Some(reconstruction);
                }
            }
        }
        if let Some(mut hole_state) = world.get_mut::<RebuildHoleState>(entity) {
            hole_state.reconstruction = Some(reconstruction);
        }
        return;
    }

    // No worker: run the respawn timer.
    let respawn_now = {
        let Some(mut hole_state) = world.get_mut::<RebuildHoleState>(entity) else {
            return;
        };
        hole_state.worker = None;
        if hole_state.worker_respawn_timer > 1 {
            hole_state.worker_respawn_timer -= 1;
            false
        } else {
            hole_state.worker_respawn_timer = respawn_frames;
            true
        }
    };
    if respawn_now {
        let worker = crate::store::spawn_object(
            world,
            &worker_template,
            &side,
            position.x + 10.0,
            position.z,
            crate::store::SpawnProps::default(),
        );
        if let Some(worker) = worker {
            if let Some(worker_entity) = lookup(world, worker) {
                if world.get::<DozerState>(worker_entity).is_none() {
                    world.entity_mut(worker_entity).insert(DozerState::default());
                }
            }
            if let Some(mut hole_state) = world.get_mut::<RebuildHoleState>(entity) {
                hole_state.worker = Some(worker);
            }
        }
    }
}

// ============================================================================
// AUTO HEAL / OVERCHARGE
// ============================================================================

fn tick_auto_heal(world: &mut World, entity: Entity) {
    let heal = world
        .get::<Template>(entity)
        .and_then(|t| t.def.as_ref())
        .and_then(|def| {
            def.behaviors.iter().find_map(|b| match b {
                BehaviorInput::AutoHealBehavior {
                    heal_amount_per_second,
                    ..
                } => Some(*heal_amount_per_second),
                _ => None,
            })
        });
    if let Some(heal) = heal {
        if heal > 0.0 {
            if let Some(mut body) = world.get_mut::<Body>(entity) {
                body.heal(heal / crate::data::LOGIC_FRAMES_PER_SECOND as f32);
            }
        }
    }
}

pub fn toggle_overcharge(world: &mut World, id: ObjectId) -> bool {
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let is_power_plant = world
        .get::<Template>(entity)
        .map(|t| t.is_kind("FS_POWER") || t.is_kind("POWER"))
        .unwrap_or(false);
    if !is_power_plant {
        return false;
    }
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let now_active = match world.get::<Overcharge>(entity) {
        Some(state) => !state.active,
        None => true,
    };
    world
        .entity_mut(entity)
        .insert(Overcharge { active: now_active });
    let mut sides = world.resource_mut::<SideTable>();
    if let Some(state) = sides.get_mut(&side) {
        state.power_bonus += if now_active {
            OVERCHARGE_POWER_BONUS
        } else {
            -OVERCHARGE_POWER_BONUS
        };
    }
    true
}

fn tick_overcharge(world: &mut World, entity: Entity) {
    let active = world
        .get::<Overcharge>(entity)
        .map(|o| o.active)
        .unwrap_or(false);
    if active {
        if let Some(mut body) = world.get_mut::<Body>(entity) {
            body.health = (body.health - OVERCHARGE_DRAIN).max(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBundle, ObjectInput, WeaponInput};
    use crate::store::{spawn_object, SpawnProps};
    use crate::systems::combat::tests::combat_world;

    fn step(world: &mut World) {
        let frame = world.resource::<SimFrame>().0 + 1;
        world.resource_mut::<SimFrame>().0 = frame;
        crate::spatial::rebuild_spatial_grid(world);
        behavior_phase(world);
    }

    #[test]
    fn test_deploy_state_machine_with_reversal() {
        let deployer = ObjectInput {
            name: "Tomahawk".to_string(),
            behaviors: vec![BehaviorInput::DeployStyleAIUpdate {
                unpack_time: 200.0, // 6 frames
                pack_time: 200.0,
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![deployer],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tomahawk", "america", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();

        // Order an attack: unpacking starts.
        world.get_mut::<AiState>(entity).unwrap().attack_target = Some(ObjectId(999));
        step(&mut world);
        assert_eq!(world.get::<DeployState>(entity).unwrap().mode, DeployMode::Unpacking);

        // Two frames in, reverse to a move. Remaining frames carry over.
        step(&mut world);
        let remaining = world.get::<DeployState>(entity).unwrap().timer;
        world.get_mut::<AiState>(entity).unwrap().attack_target = None;
        world.get_mut::<Locomotion>(entity).unwrap().goal = Some((100.0, 100.0));
        step(&mut world);
        let deploy = world.get::<DeployState>(entity).unwrap();
        assert_eq!(deploy.mode, DeployMode::Packing);
        assert_eq!(deploy.timer, remaining);

        // Let the pack finish.
        for _ in 0..remaining {
            step(&mut world);
        }
        assert_eq!(
            world.get::<DeployState>(entity).unwrap().mode,
            DeployMode::ReadyToMove
        );
    }

    #[test]
    fn test_full_deploy_reaches_ready_to_attack() {
        let deployer = ObjectInput {
            name: "Tomahawk".to_string(),
            behaviors: vec![BehaviorInput::DeployStyleAIUpdate {
                unpack_time: 100.0, // 3 frames
                pack_time: 100.0,
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![deployer],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tomahawk", "america", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();
        world.get_mut::<AiState>(entity).unwrap().attack_target = Some(ObjectId(999));
        for _ in 0..4 {
            step(&mut world);
        }
        assert_eq!(
            world.get::<DeployState>(entity).unwrap().mode,
            DeployMode::ReadyToAttack
        );
    }

    #[test]
    fn test_minefield_detonates_on_enemy_not_worker() {
        let mine = ObjectInput {
            name: "Minefield".to_string(),
            behaviors: vec![BehaviorInput::MinefieldBehavior {
                detonation_weapon: "MineBlast".to_string(),
                detonated_by: vec!["ENEMIES".to_string()],
                scan_rate: 33.0,
                workers_detonate: false,
                regenerates: false,
                num_virtual_mines: 2,
            }],
            ..Default::default()
        };
        let weapon = WeaponInput {
            name: "MineBlast".to_string(),
            primary_damage: 50.0,
            primary_damage_radius: 15.0,
            ..Default::default()
        };
        let intruder = ObjectInput {
            name: "Tank".to_string(),
            kind_of: vec!["VEHICLE".to_string()],
            ..Default::default()
        };
        let dozer = ObjectInput {
            name: "Dozer".to_string(),
            kind_of: vec!["VEHICLE".to_string(), "DOZER".to_string()],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![mine, intruder, dozer],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let mine = spawn_object(&mut world, "Minefield", "gla", 0.0, 0.0, SpawnProps::default())
            .unwrap();

        // A worker rolls through unharmed.
        let dozer = spawn_object(&mut world, "Dozer", "america", 3.0, 0.0, SpawnProps::default())
            .unwrap();
        for _ in 0..3 {
            step(&mut world);
        }
        let dozer_entity = lookup(&world, dozer).unwrap();
        assert_eq!(world.get::<Body>(dozer_entity).unwrap().health, 100.0);

        // A tank trips a mine.
        let tank = spawn_object(&mut world, "Tank", "america", 3.0, 0.0, SpawnProps::default())
            .unwrap();
        for _ in 0..3 {
            step(&mut world);
        }
        let tank_entity = lookup(&world, tank).unwrap();
        assert!(world.get::<Body>(tank_entity).unwrap().health < 100.0);
        let mine_entity = lookup(&world, mine).unwrap();
        assert!(world.get::<MinefieldState>(mine_entity).unwrap().virtual_mines < 2.0);
    }

    #[test]
    fn test_demo_trap_manual_vs_proximity() {
        let trap = ObjectInput {
            name: "DemoTrap".to_string(),
            behaviors: vec![BehaviorInput::DemoTrapUpdate {
                detonation_weapon: "TrapBlast".to_string(),
                scan_rate: 33.0,
                trigger_detonation_range: 20.0,
                detonate_when_killed: false,
                default_proximity_mode: false,
            }],
            ..Default::default()
        };
        let weapon = WeaponInput {
            name: "TrapBlast".to_string(),
            primary_damage: 100.0,
            primary_damage_radius: 25.0,
            ..Default::default()
        };
        let tank = ObjectInput {
            name: "Tank".to_string(),
            kind_of: vec!["VEHICLE".to_string()],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![trap, tank],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let trap = spawn_object(&mut world, "DemoTrap", "gla", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let tank = spawn_object(&mut world, "Tank", "america", 10.0, 0.0, SpawnProps::default())
            .unwrap();

        // Manual mode: nothing happens on proximity.
        for _ in 0..5 {
            step(&mut world);
        }
        assert!(lookup(&world, trap).is_some());

        // Flip to proximity mode; the tank trips it.
        toggle_demo_trap_mode(&mut world, trap);
        for _ in 0..3 {
            step(&mut world);
        }
        crate::systems::death::cleanup_phase(&mut world);
        assert!(lookup(&world, trap).is_none(), "trap consumed");
        let tank_entity = lookup(&world, tank).unwrap();
        assert!(world.get::<Body>(tank_entity).unwrap().health < 100.0);
    }

    #[test]
    fn test_horde_bonus_within_radius() {
        let guard = ObjectInput {
            name: "Redguard".to_string(),
            kind_of: vec!["INFANTRY".to_string()],
            behaviors: vec![BehaviorInput::HordeUpdate {
                update_rate: 33.0,
                kind_of: vec!["INFANTRY".to_string()],
                radius: 50.0,
                count: 3,
                rub_off_radius: 0.0,
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![guard],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                spawn_object(
                    &mut world,
                    "Redguard",
                    "china",
                    10.0 + i as f32 * 5.0,
                    10.0,
                    SpawnProps::default(),
                )
                .unwrap(),
            );
        }
        for _ in 0..3 {
            step(&mut world);
        }
        let entity = lookup(&world, ids[0]).unwrap();
        assert!(world
            .get::<WeaponState>(entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::HORDE));
    }

    #[test]
    fn test_hack_internet_cash_cycle() {
        let hacker = ObjectInput {
            name: "Hacker".to_string(),
            kind_of: vec!["INFANTRY".to_string()],
            behaviors: vec![BehaviorInput::HackInternetAIUpdate {
                unpack_time: 66.0,       // 2 frames
                pack_time: 66.0,         // 2 frames
                cash_update_delay: 99.0, // 3 frames
                regular_cash_amount: 5,
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![hacker],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Hacker", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 0;

        assert!(hack_internet_command(&mut world, id));
        // 2 unpack frames, then cash every 3 frames.
        for _ in 0..2 {
            step(&mut world);
        }
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 0);
        for _ in 0..3 {
            step(&mut world);
        }
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 5);
        for _ in 0..6 {
            step(&mut world);
        }
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 15);
    }

    #[test]
    fn test_auto_deposit_and_initial_bonus() {
        let supply = ObjectInput {
            name: "OilDerrick".to_string(),
            kind_of: vec!["STRUCTURE".to_string()],
            behaviors: vec![BehaviorInput::AutoDepositUpdate {
                deposit_timing: 99.0, // 3 frames
                deposit_amount: 20,
                initial_capture_bonus: 1000,
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![supply],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let _derrick =
            spawn_object(&mut world, "OilDerrick", "gla", 0.0, 0.0, SpawnProps::default())
                .unwrap();
        world.resource_mut::<SideTable>().ensure("gla").credits = 0;

        step(&mut world);
        assert_eq!(
            world.resource::<SideTable>().get("gla").unwrap().credits,
            1020,
            "initial bonus exactly once plus the first deposit"
        );
        for _ in 0..3 {
            step(&mut world);
        }
        assert_eq!(world.resource::<SideTable>().get("gla").unwrap().credits, 1040);
    }

    #[test]
    fn test_rebuild_hole_full_cycle() {
        let barracks = ObjectInput {
            name: "GlaBarracks".to_string(),
            kind_of: vec!["STRUCTURE".to_string()],
            build_time: Some(0.2), // 6 frames
            body: Some(crate::data::BodyInput {
                max_health: Some(300.0),
                initial_health: None,
            }),
            behaviors: vec![BehaviorInput::RebuildHoleExposeDie {
                hole_name: "GlaHole".to_string(),
            }],
            ..Default::default()
        };
        let hole = ObjectInput {
            name: "GlaHole".to_string(),
            body: Some(crate::data::BodyInput {
                max_health: Some(500.0),
                initial_health: None,
            }),
            behaviors: vec![BehaviorInput::RebuildHoleBehavior {
                worker_object_name: "GlaWorker".to_string(),
                worker_respawn_delay: 66.0, // 2 frames
                hole_health_regen_percent_per_second: 0.0,
                transfer_attackers: true,
            }],
            ..Default::default()
        };
        let worker = ObjectInput {
            name: "GlaWorker".to_string(),
            kind_of: vec!["INFANTRY".to_string(), "DOZER".to_string()],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![barracks, hole, worker],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let building =
            spawn_object(&mut world, "GlaBarracks", "gla", 100.0, 100.0, SpawnProps::default())
                .unwrap();

        crate::systems::combat::deal_damage(&mut world, None, building, 1_000_000.0, "EXPLOSION");
        let holes = crate::store::ids_by_template(&mut world, "GlaHole");
        assert_eq!(holes.len(), 1, "hole spawned on building death");

        // Worker respawn (2 frames), reconstruction spawn, 6 build frames,
        // then retirement. Generous iteration count.
        for _ in 0..15 {
            step(&mut world);
            crate::systems::production::production_phase(&mut world);
            crate::systems::death::cleanup_phase(&mut world);
        }

        let rebuilt: Vec<_> = crate::store::ids_by_template(&mut world, "GlaBarracks")
            .into_iter()
            .filter(|id| {
                lookup(&world, *id)
                    .and_then(|e| world.get::<Body>(e))
                    .map(|b| b.alive)
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(rebuilt.len(), 1, "structure rebuilt");
        let rebuilt_entity = lookup(&world, rebuilt[0]).unwrap();
        assert!(!world
            .get::<Status>(rebuilt_entity)
            .unwrap()
            .contains(Status::UNDER_CONSTRUCTION));
        assert!(
            crate::store::ids_by_template(&mut world, "GlaHole").is_empty(),
            "hole retired"
        );
        assert!(
            crate::store::ids_by_template(&mut world, "GlaWorker").is_empty(),
            "worker retired"
        );
    }

    #[test]
    fn test_stealth_drops_while_attacking() {
        let sneak = ObjectInput {
            name: "Hijacker".to_string(),
            kind_of: vec!["INFANTRY".to_string()],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![sneak],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Hijacker", "gla", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();
        world.get_mut::<Status>(entity).unwrap().insert(Status::CAN_STEALTH);

        step(&mut world);
        assert!(world.get::<Status>(entity).unwrap().contains(Status::STEALTHED));

        world
            .get_mut::<Status>(entity)
            .unwrap()
            .insert(Status::IS_ATTACKING);
        step(&mut world);
        assert!(!world.get::<Status>(entity).unwrap().contains(Status::STEALTHED));
    }
}
