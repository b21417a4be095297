//! Skirmish AI: a per-side periodic evaluator.
//!
//! Deliberately shallow - it dispatches idle forces, replaces lost dozers,
//! fills power/production gaps, researches affordable upgrades and biases
//! rally points. Cadences are staggered per side index so two AI sides never
//! evaluate on the same frame.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::{BehaviorInput, ButtonCommand, DataRegistry};
use crate::fog::FogOfWar;
use crate::sides::{Relationship, SideTable};
use crate::store::lookup;

/// Combat evaluation cadence, frames.
const COMBAT_CADENCE: u64 = 90;
/// Economy/structure cadence, frames.
const ECONOMY_CADENCE: u64 = 60;
/// Upgrade research cadence, frames.
const UPGRADE_CADENCE: u64 = 120;
/// Idle combat units needed before an attack wave launches.
const FORCE_THRESHOLD: usize = 5;

pub fn skirmish_phase(world: &mut World) {
    let frame = world.resource::<SimFrame>().0;
    let sides: Vec<(String, u8)> = world
        .resource::<SideTable>()
        .iter()
        .filter(|(_, s)| s.skirmish_enabled)
        .map(|(name, s)| (name.clone(), s.index))
        .collect();

    for (side, index) in sides {
        let offset = u64::from(index);
        if (frame + offset) % COMBAT_CADENCE == 0 {
            evaluate_combat(world, &side);
        }
        if (frame + offset) % ECONOMY_CADENCE == 0 {
            evaluate_economy(world, &side);
        }
        if (frame + offset) % UPGRADE_CADENCE == 0 {
            evaluate_upgrades(world, &side);
            bias_rally_points(world, &side);
        }
    }
}

fn side_ids(world: &mut World, side: &str) -> Vec<ObjectId> {
    let ids = world.resource::<EntityIndex>().ids();
    ids.into_iter()
        .filter(|id| {
            lookup(world, *id)
                .map(|e| {
                    world
                        .get::<Body>(e)
                        .map(|b| b.alive)
                        .unwrap_or(false)
                        && world
                            .get::<Allegiance>(e)
                            .map(|a| a.side == side)
                            .unwrap_or(false)
                })
                .unwrap_or(false)
        })
        .collect()
}

/// Nearest enemy structure the side can currently see.
fn nearest_visible_enemy_structure(
    world: &mut World,
    side: &str,
    from: Position,
) -> Option<(ObjectId, Position)> {
    let ids = world.resource::<EntityIndex>().ids();
    let mut best: Option<(f32, ObjectId, Position)> = None;
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }
        let is_structure = world
            .get::<Template>(entity)
            .map(|t| t.is_kind("STRUCTURE"))
            .unwrap_or(false);
        if !is_structure {
            continue;
        }
        let their_side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        if world.resource::<SideTable>().relationship(side, &their_side) != Relationship::Enemies {
            continue;
        }
        let Some(position) = world.get::<Position>(entity).copied() else {
            continue;
        };
        if !world
            .resource::<FogOfWar>()
            .is_position_visible(side, position.x, position.z)
        {
            continue;
        }
        let dist = from.distance_xz(&position);
        if best.map(|(d, _, _)| dist < d).unwrap_or(true) {
            best = Some((dist, id, position));
        }
    }
    best.map(|(_, id, position)| (id, position))
}

fn evaluate_combat(world: &mut World, side: &str) {
    let ids = side_ids(world, side);
    let mut idle_fighters = Vec::new();
    let mut center = Position::default();
    for id in &ids {
        let Some(entity) = lookup(world, *id) else {
            continue;
        };
        let armed = world
            .get::<WeaponState>(entity)
            .map(|w| w.weapon.is_some())
            .unwrap_or(false);
        let idle = world
            .get::<AiState>(entity)
            .map(|ai| ai.attack_target.is_none())
            .unwrap_or(false)
            && world
                .get::<Locomotion>(entity)
                .map(|l| l.goal.is_none())
                .unwrap_or(false)
            && world.get::<Contained>(entity).is_none();
        let mobile = world
            .get::<Template>(entity)
            .map(|t| !t.is_kind("STRUCTURE"))
            .unwrap_or(false);
        if armed && idle && mobile {
            if let Some(position) = world.get::<Position>(entity) {
                center.x += position.x;
                center.z += position.z;
            }
            idle_fighters.push(*id);
        }
    }
    if idle_fighters.len() < FORCE_THRESHOLD {
        return;
    }
    center.x /= idle_fighters.len() as f32;
    center.z /= idle_fighters.len() as f32;

    let Some((target, _)) = nearest_visible_enemy_structure(world, side, center) else {
        return;
    };
    for fighter in idle_fighters {
        crate::systems::combat::try_set_attack_target(world, fighter, target, CommandSource::Ai);
    }
}

fn command_set_buttons(world: &World, entity: Entity) -> Vec<std::sync::Arc<crate::data::CommandButtonDef>> {
    let registry = world.resource::<DataRegistry>();
    let Some(set_name) = crate::systems::upgrades::active_command_set(world, entity) else {
        return Vec::new();
    };
    let Some(set) = registry.command_set(&set_name) else {
        return Vec::new();
    };
    set.buttons
        .values()
        .filter_map(|name| registry.command_button(name))
        .collect()
}

fn evaluate_economy(world: &mut World, side: &str) {
    let ids = side_ids(world, side);
    let registry = world.resource::<DataRegistry>().clone();

    let has_dozer = ids.iter().any(|id| {
        lookup(world, *id)
            .and_then(|e| world.get::<Template>(e))
            .map(|t| t.is_kind("DOZER"))
            .unwrap_or(false)
    });

    // Dozer replacement: any producer exposing a dozer build queues one.
    if !has_dozer {
        'producers: for id in &ids {
            let Some(entity) = lookup(world, *id) else {
                continue;
            };
            if world.get::<ProductionState>(entity).is_none() {
                continue;
            }
            for button in command_set_buttons(world, entity) {
                if button.command != ButtonCommand::UnitBuild {
                    continue;
                }
                let Some(object) = &button.object else {
                    continue;
                };
                let is_dozer = registry
                    .object_def(object)
                    .map(|d| d.is_kind("DOZER"))
                    .unwrap_or(false);
                if is_dozer && crate::systems::production::try_queue_unit(world, *id, object) {
                    break 'producers;
                }
            }
        }
    }

    // Structure gaps: missing power or any production structure.
    let has_power = world
        .resource::<SideTable>()
        .get(side)
        .map(|s| s.power_production > 0)
        .unwrap_or(false);
    let has_producer = ids.iter().any(|id| {
        lookup(world, *id)
            .map(|e| {
                world.get::<ProductionState>(e).is_some()
                    && world
                        .get::<Template>(e)
                        .map(|t| t.is_kind("STRUCTURE"))
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    if has_power && has_producer {
        return;
    }

    // Find an idle dozer and a construct button filling the gap.
    for id in &ids {
        let Some(entity) = lookup(world, *id) else {
            continue;
        };
        if world.get::<DozerState>(entity).map(|d| d.construct_target.is_some()) != Some(false) {
            continue;
        }
        let position = world.get::<Position>(entity).copied().unwrap_or_default();
        for button in command_set_buttons(world, entity) {
            if button.command != ButtonCommand::DozerConstruct {
                continue;
            }
            let Some(object) = &button.object else {
                continue;
            };
            let Some(def) = registry.object_def(object) else {
                continue;
            };
            let fills_power_gap = !has_power && def.energy_production > 0;
            let fills_producer_gap = !has_producer
                && def
                    .behaviors
                    .iter()
                    .any(|b| matches!(b, BehaviorInput::ProductionUpdate { .. }));
            if !(fills_power_gap || fills_producer_gap) {
                continue;
            }
            let affordable = world
                .resource::<SideTable>()
                .get(side)
                .map(|s| s.credits >= def.build_cost)
                .unwrap_or(false);
            if !affordable {
                continue;
            }
            if crate::systems::production::construct_building(
                world,
                *id,
                object,
                position.x + 40.0,
                position.z + 40.0,
                0.0,
            ) {
                return;
            }
        }
    }
}

fn evaluate_upgrades(world: &mut World, side: &str) {
    let ids = side_ids(world, side);
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let idle_producer = world
            .get::<ProductionState>(entity)
            .map(|p| p.queue.is_empty())
            .unwrap_or(false);
        if !idle_producer {
            continue;
        }
        let buttons = command_set_buttons(world, entity);
        for button in buttons {
            if !matches!(
                button.command,
                ButtonCommand::PlayerUpgrade | ButtonCommand::ObjectUpgrade
            ) {
                continue;
            }
            let Some(upgrade) = &button.upgrade else {
                continue;
            };
            if crate::systems::production::try_queue_upgrade(world, id, upgrade) {
                break;
            }
        }
    }
}

fn bias_rally_points(world: &mut World, side: &str) {
    let ids = side_ids(world, side);
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        if world.get::<ProductionState>(entity).is_none() {
            continue;
        }
        let position = world.get::<Position>(entity).copied().unwrap_or_default();
        let Some((_, enemy_position)) = nearest_visible_enemy_structure(world, side, position)
        else {
            continue;
        };
        // Rally a short way out toward the enemy.
        let dx = enemy_position.x - position.x;
        let dz = enemy_position.z - position.z;
        let dist = (dx * dx + dz * dz).sqrt().max(1.0);
        let rally = (
            position.x + dx / dist * 60.0,
            position.z + dz / dist * 60.0,
        );
        crate::systems::production::set_rally_point(world, id, rally.0, rally.1);
    }
}
