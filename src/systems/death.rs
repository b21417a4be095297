//! Death pipeline and lifecycle timers.
//!
//! Lethal damage funnels through [`on_death`]: veterancy is awarded, death
//! weapons fire, minefields scatter, rebuild holes spawn, and a SlowDeath
//! module (weighted choice, keyed RNG) may hold the corpse in a rendered
//! grace window until its destruction delay elapses. Cleanup is a separate
//! phase: mark first, despawn in phase order.

use bevy_ecs::prelude::*;
use rand::Rng;

use crate::components::*;
use crate::data::{frames_from_ms, BehaviorInput, DataRegistry};
use crate::events::{VisualEvent, VisualEventBus};
use crate::rng::GameRng;
use crate::sides::{Relationship, SideTable};
use crate::store::{lookup, spawn_object, spawn_ocl, SpawnProps};

/// World-units the corpse sinks per frame once its sink delay elapses.
const SINK_RATE: f32 = 0.5;

pub fn on_death(world: &mut World, victim: ObjectId, killer: Option<ObjectId>) {
    let Some(entity) = lookup(world, victim) else {
        return;
    };
    let position = world.get::<Position>(entity).copied().unwrap_or_default();
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let def = world.get::<Template>(entity).and_then(|t| t.def.clone());
    let status = world.get::<Status>(entity).copied().unwrap_or_default();
    let frame = world.resource::<SimFrame>().0;

    award_experience(world, victim, killer, &side);

    world
        .resource_mut::<VisualEventBus>()
        .emit(VisualEvent::death(victim, (position.x, position.y, position.z)));

    // Dying things stop fighting and moving immediately.
    if let Some(mut ai) = world.get_mut::<AiState>(entity) {
        ai.attack_target = None;
        ai.continue_anchor = None;
    }
    if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
        locomotion.clear_path();
    }
    if let Some(mut s) = world.get_mut::<Status>(entity) {
        s.remove(Status::IS_ATTACKING | Status::IS_AIMING_WEAPON | Status::IS_FIRING_WEAPON);
    }

    // Producer death refunds every queue entry exactly once.
    refund_queue(world, entity, &side);

    crate::systems::container::handle_container_death(world, victim);
    crate::systems::battle_plan::revert_on_death(world, victim);

    let Some(def) = def else {
        world.entity_mut(entity).insert(PendingDestroy);
        return;
    };

    // Death-triggered modules in declaration order.
    let registry = world.resource::<DataRegistry>().clone();
    let mut slow_deaths: Vec<(u32, f32, f32, Option<String>, Option<String>)> = Vec::new();
    for behavior in &def.behaviors {
        match behavior {
            BehaviorInput::FireWeaponWhenDeadBehavior { death_weapon } => {
                if let Some(weapon) = registry.weapon_def(death_weapon) {
                    crate::systems::combat::radius_or_self_impact(world, victim, &weapon, position);
                }
            }
            BehaviorInput::GenerateMinefieldBehavior {
                mine_name,
                distance_around_object,
                mine_count,
                border_only,
                on_death,
            } => {
                if *on_death && !mine_name.is_empty() {
                    scatter_mines(
                        world,
                        mine_name,
                        &side,
                        position,
                        *distance_around_object,
                        (*mine_count).max(1),
                        *border_only,
                    );
                }
            }
            BehaviorInput::DemoTrapUpdate {
                detonation_weapon,
                detonate_when_killed,
                ..
            } => {
                if *detonate_when_killed {
                    if let Some(weapon) = registry.weapon_def(detonation_weapon) {
                        crate::systems::combat::radius_or_self_impact(
                            world, victim, &weapon, position,
                        );
                    }
                }
            }
            BehaviorInput::RebuildHoleExposeDie { hole_name } => {
                if !status.contains(Status::UNDER_CONSTRUCTION) {
                    spawn_rebuild_hole(world, hole_name, &side, &def.name, position, victim);
                }
            }
            BehaviorInput::SlowDeathBehavior {
                probability_modifier,
                sink_delay,
                destruction_delay,
                ocl_initial,
                ocl_final,
            } => {
                slow_deaths.push((
                    (*probability_modifier).max(1),
                    *sink_delay,
                    *destruction_delay,
                    ocl_initial.clone(),
                    ocl_final.clone(),
                ));
            }
            _ => {}
        }
    }

    // A rebuild hole dying takes its worker with it; a reconstruction
    // already rising is left standing.
    if let Some(hole_state) = world.get::<RebuildHoleState>(entity).cloned() {
        if let Some(worker) = hole_state.worker {
            crate::store::kill_object(world, worker);
        }
    }

    let Some(entity) = lookup(world, victim) else {
        return;
    };
    if slow_deaths.is_empty() {
        world.entity_mut(entity).insert(PendingDestroy);
        return;
    }

    // Weighted module choice.
    let pick = if slow_deaths.len() == 1 {
        0
    } else {
        let total: u32 = slow_deaths.iter().map(|s| s.0).sum();
        let rng = *world.resource::<GameRng>();
        let mut roll = rng.stream(frame, victim.0, "slowdeath").gen_range(0..total);
        let mut chosen = 0;
        for (index, slot) in slow_deaths.iter().enumerate() {
            if roll < slot.0 {
                chosen = index;
                break;
            }
            roll -= slot.0;
        }
        chosen
    };
    let (_, sink_delay, destruction_delay, ocl_initial, ocl_final) = slow_deaths.swap_remove(pick);

    if let Some(ocl) = ocl_initial {
        spawn_ocl(world, &ocl, &side, position.x, position.z);
    }

    let Some(entity) = lookup(world, victim) else {
        return;
    };
    world.entity_mut(entity).insert(DyingState {
        destruction_remaining: frames_from_ms(destruction_delay).max(1),
        sink_remaining: frames_from_ms(sink_delay),
        sinking: false,
        ocl_final,
    });
}

fn award_experience(world: &mut World, victim: ObjectId, killer: Option<ObjectId>, victim_side: &str) {
    let Some(killer) = killer else {
        return;
    };
    if killer == victim {
        return;
    }
    let Some(killer_entity) = lookup(world, killer) else {
        return;
    };
    let killer_side = world
        .get::<Allegiance>(killer_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let relationship = world
        .resource::<SideTable>()
        .relationship(&killer_side, victim_side);
    if relationship == Relationship::Allies {
        return;
    }
    let Some(victim_entity) = lookup(world, victim) else {
        return;
    };
    let victim_level = world
        .get::<Veterancy>(victim_entity)
        .map(|v| v.level)
        .unwrap_or_default();
    let value = world
        .get::<Template>(victim_entity)
        .and_then(|t| t.def.as_ref())
        .map(|d| d.experience_value[victim_level.index()])
        .unwrap_or(0);
    if value <= 0 {
        return;
    }
    let thresholds = world
        .get::<Template>(killer_entity)
        .and_then(|t| t.def.as_ref())
        .map(|d| d.experience_required)
        .unwrap_or([0, i32::MAX, i32::MAX, i32::MAX]);
    if let Some(mut veterancy) = world.get_mut::<Veterancy>(killer_entity) {
        veterancy.absorb(value, &thresholds);
    }
}

fn refund_queue(world: &mut World, entity: Entity, side: &str) {
    let Some(mut production) = world.get_mut::<ProductionState>(entity) else {
        return;
    };
    let refund: i64 = production.queue.iter().map(|e| e.cost).sum();
    let upgrades: Vec<String> = production
        .queue
        .iter()
        .filter_map(|e| match &e.kind {
            ProductionKind::Upgrade { upgrade } => Some(upgrade.clone()),
            ProductionKind::Unit { .. } => None,
        })
        .collect();
    production.queue.clear();
    if let Some(parking) = &mut production.parking {
        parking.reserved = 0;
    }
    if refund > 0 || !upgrades.is_empty() {
        let mut sides = world.resource_mut::<SideTable>();
        if let Some(state) = sides.get_mut(side) {
            state.add_credits(refund);
            for upgrade in upgrades {
                state.upgrades_in_production.remove(&upgrade);
            }
        }
    }
}

fn scatter_mines(
    world: &mut World,
    mine_name: &str,
    side: &str,
    origin: Position,
    distance: f32,
    count: u32,
    border_only: bool,
) {
    for i in 0..count {
        let angle = i as f32 / count as f32 * std::f32::consts::TAU;
        let radius = if border_only {
            distance
        } else {
            // Filled pattern: alternate ring radii inward.
            distance * (1.0 - 0.5 * (i % 2) as f32)
        };
        spawn_object(
            world,
            mine_name,
            side,
            origin.x + radius * angle.cos(),
            origin.z + radius * angle.sin(),
            SpawnProps::default(),
        );
    }
}

fn spawn_rebuild_hole(
    world: &mut World,
    hole_name: &str,
    side: &str,
    rebuild_template: &str,
    position: Position,
    dead_building: ObjectId,
) {
    let Some(hole_id) = spawn_object(
        world,
        hole_name,
        side,
        position.x,
        position.z,
        SpawnProps::default(),
    ) else {
        return;
    };
    let Some(hole_entity) = lookup(world, hole_id) else {
        return;
    };
    let (respawn_delay, transfer_attackers) = world
        .get::<Template>(hole_entity)
        .and_then(|t| t.def.as_ref())
        .and_then(|def| {
            def.behaviors.iter().find_map(|b| match b {
                BehaviorInput::RebuildHoleBehavior {
                    worker_respawn_delay,
                    transfer_attackers,
                    ..
                } => Some((frames_from_ms(*worker_respawn_delay), *transfer_attackers)),
                _ => None,
            })
        })
        .unwrap_or((0, true));

    world.entity_mut(hole_entity).insert(RebuildHoleState {
        rebuild_template: rebuild_template.to_string(),
        rebuild_angle: 0.0,
        worker: None,
        reconstruction: None,
        worker_respawn_timer: respawn_delay,
    });

    if transfer_attackers {
        let ids = world.resource::<EntityIndex>().ids();
        for id in ids {
            let Some(attacker_entity) = lookup(world, id) else {
                continue;
            };
            if let Some(mut ai) = world.get_mut::<AiState>(attacker_entity) {
                if ai.attack_target == Some(dead_building) {
                    ai.attack_target = Some(hole_id);
                }
            }
        }
    }
}

// ============================================================================
// LIFETIME
// ============================================================================

/// Tick `LifetimeUpdate` countdowns; expiry is an ordinary death.
pub fn lifetime_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }
        let Some(mut lifetime) = world.get_mut::<LifetimeState>(entity) else {
            continue;
        };
        if lifetime.remaining > 0 {
            lifetime.remaining -= 1;
            continue;
        }
        if let Some(mut body) = world.get_mut::<Body>(entity) {
            body.health = 0.0;
            body.alive = false;
        }
        on_death(world, id, None);
    }
}

// ============================================================================
// CLEANUP (frame phase 9)
// ============================================================================

/// Advance slow-death windows and despawn everything marked for removal.
pub fn cleanup_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };

        if let Some(mut dying) = world.get_mut::<DyingState>(entity) {
            if dying.sink_remaining > 0 {
                dying.sink_remaining -= 1;
                if dying.sink_remaining == 0 {
                    dying.sinking = true;
                }
            }
            let sinking = dying.sinking;
            let finished = dying.destruction_remaining <= 1;
            dying.destruction_remaining = dying.destruction_remaining.saturating_sub(1);
            let ocl_final = if finished { dying.ocl_final.take() } else { None };
            drop(dying);

            if sinking {
                if let Some(mut position) = world.get_mut::<Position>(entity) {
                    position.y -= SINK_RATE;
                }
            }
            if finished {
                if let Some(ocl) = ocl_final {
                    let (side, position) = {
                        let side = world
                            .get::<Allegiance>(entity)
                            .map(|a| a.side.clone())
                            .unwrap_or_default();
                        let position = world.get::<Position>(entity).copied().unwrap_or_default();
                        (side, position)
                    };
                    spawn_ocl(world, &ocl, &side, position.x, position.z);
                }
                crate::store::destroy_object(world, id);
            }
            continue;
        }

        if world.get::<PendingDestroy>(entity).is_some() {
            crate::store::destroy_object(world, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBundle, ObjectInput, OclEntryInput, OclInput};
    use crate::systems::combat::tests::combat_world;
    use crate::store::SpawnProps;

    fn dying_object(name: &str, destruction_ms: f32, ocl_final: Option<&str>) -> ObjectInput {
        ObjectInput {
            name: name.to_string(),
            behaviors: vec![BehaviorInput::SlowDeathBehavior {
                probability_modifier: 100,
                sink_delay: 66.0,
                destruction_delay: destruction_ms,
                ocl_initial: None,
                ocl_final: ocl_final.map(|s| s.to_string()),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_slow_death_grace_window() {
        let bundle = DataBundle {
            objects: vec![dying_object("Tank", 167.0, None)],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tank", "china", 10.0, 10.0, SpawnProps::default())
            .unwrap();
        crate::systems::combat::deal_damage(&mut world, None, id, 500.0, "EXPLOSION");

        // Dead but still bound for the grace window (6 frames at 167 ms).
        assert!(lookup(&world, id).is_some());
        for _ in 0..5 {
            cleanup_phase(&mut world);
            assert!(lookup(&world, id).is_some(), "still in grace window");
        }
        cleanup_phase(&mut world);
        assert!(lookup(&world, id).is_none(), "grace elapsed, despawned");
    }

    #[test]
    fn test_final_ocl_spawns_on_destruction() {
        let ocl = OclInput {
            name: "OCL_Wreck".to_string(),
            entries: vec![OclEntryInput {
                template: "Wreck".to_string(),
                count: 1,
                offset: (0.0, 0.0),
                spread: 0.0,
            }],
        };
        let bundle = DataBundle {
            objects: vec![
                dying_object("Tank", 33.0, Some("OCL_Wreck")),
                ObjectInput {
                    name: "Wreck".to_string(),
                    ..Default::default()
                },
            ],
            object_creation_lists: vec![ocl],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tank", "china", 10.0, 10.0, SpawnProps::default())
            .unwrap();
        crate::systems::combat::deal_damage(&mut world, None, id, 500.0, "EXPLOSION");
        cleanup_phase(&mut world);
        assert!(lookup(&world, id).is_none());

        let wreck = crate::store::ids_by_template(&mut world, "Wreck");
        assert_eq!(wreck.len(), 1);
    }

    #[test]
    fn test_lifetime_expiry_destroys() {
        let object = ObjectInput {
            name: "Flare".to_string(),
            behaviors: vec![BehaviorInput::LifetimeUpdate {
                min_lifetime: 100.0,
                max_lifetime: 100.0,
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![object],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Flare", "america", 0.0, 0.0, SpawnProps::default())
            .unwrap();

        for _ in 0..3 {
            lifetime_phase(&mut world);
            cleanup_phase(&mut world);
            assert!(lookup(&world, id).is_some());
        }
        lifetime_phase(&mut world);
        cleanup_phase(&mut world);
        assert!(lookup(&world, id).is_none());
    }

    #[test]
    fn test_death_weapon_fires_at_self_position() {
        let mut bomb = ObjectInput {
            name: "Bomb".to_string(),
            ..Default::default()
        };
        bomb.behaviors = vec![BehaviorInput::FireWeaponWhenDeadBehavior {
            death_weapon: "BombBlast".to_string(),
        }];
        let weapon = crate::data::WeaponInput {
            name: "BombBlast".to_string(),
            primary_damage: 80.0,
            primary_damage_radius: 30.0,
            radius_damage_affects: vec!["ENEMIES".to_string(), "ALLIES".to_string()],
            ..Default::default()
        };
        let bystander = ObjectInput {
            name: "Bystander".to_string(),
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![bomb, bystander],
            weapons: vec![weapon],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let bomb = spawn_object(&mut world, "Bomb", "gla", 10.0, 10.0, SpawnProps::default())
            .unwrap();
        let near = spawn_object(&mut world, "Bystander", "america", 25.0, 10.0, SpawnProps::default())
            .unwrap();
        crate::spatial::rebuild_spatial_grid(&mut world);
        crate::systems::combat::deal_damage(&mut world, None, bomb, 500.0, "EXPLOSION");

        let near_entity = lookup(&world, near).unwrap();
        assert!(
            world.get::<Body>(near_entity).unwrap().health < 100.0,
            "death blast hit the bystander"
        );
    }

    #[test]
    fn test_producer_death_refunds_queue() {
        let producer = ObjectInput {
            name: "Barracks".to_string(),
            behaviors: vec![BehaviorInput::ProductionUpdate {
                max_queue_entries: 3,
                quantity_modifiers: vec![],
            }],
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![producer],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Barracks", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();
        world
            .get_mut::<ProductionState>(entity)
            .unwrap()
            .queue
            .push(ProductionEntry {
                production_id: 1,
                kind: ProductionKind::Unit {
                    template: "REDGUARD".to_string(),
                },
                build_frames: 30,
                elapsed_frames: 5,
                cost: 300,
                quantity_total: 1,
                quantity_produced: 0,
                exit_wait: 0,
                reserved_parking: false,
            });
        world.resource_mut::<SideTable>().ensure("china").credits = 0;

        crate::systems::combat::deal_damage(&mut world, None, id, 1_000_000.0, "EXPLOSION");
        assert_eq!(
            world.resource::<SideTable>().get("china").unwrap().credits,
            300,
            "in-flight entry refunded exactly once"
        );
    }
}
