//! Strategy-center battle plans: Bombardment, Hold the Line,
//! Search and Destroy.
//!
//! Plan membership is recomputed every frame from the set of ACTIVE centers,
//! so bonuses appear on newly built units and vanish the moment a center
//! packs, switches, or dies.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::{frames_from_ms, BehaviorInput, DataRegistry};
use crate::store::lookup;

/// Paralysis countdown applied to strategy-center passengers on plan change.
#[derive(Component, Debug, Clone, Copy)]
pub struct BattlePlanParalysis {
    pub frames: u32,
}

#[derive(Debug, Clone)]
struct PlanModule {
    bombardment: String,
    hold_the_line: String,
    search_and_destroy: String,
    transition_frames: u32,
    paralyze_frames: u32,
    valid_kinds: Vec<String>,
    invalid_kinds: Vec<String>,
    damage_scalar: f32,
    sight_scalar: f32,
}

fn plan_module(world: &World, entity: Entity) -> Option<PlanModule> {
    world
        .get::<Template>(entity)?
        .def
        .as_ref()?
        .behaviors
        .iter()
        .find_map(|b| match b {
            BehaviorInput::BattlePlanUpdate {
                bombardment_plan,
                hold_the_line_plan,
                search_and_destroy_plan,
                transition_time,
                battle_plan_change_paralyze_time,
                valid_member_kind_of,
                invalid_member_kind_of,
                hold_the_line_damage_scalar,
                search_and_destroy_sight_range_scalar,
            } => Some(PlanModule {
                bombardment: bombardment_plan.clone(),
                hold_the_line: hold_the_line_plan.clone(),
                search_and_destroy: search_and_destroy_plan.clone(),
                transition_frames: frames_from_ms(*transition_time).max(1),
                paralyze_frames: frames_from_ms(*battle_plan_change_paralyze_time),
                valid_kinds: valid_member_kind_of.clone(),
                invalid_kinds: invalid_member_kind_of.clone(),
                damage_scalar: *hold_the_line_damage_scalar,
                sight_scalar: *search_and_destroy_sight_range_scalar,
            }),
            _ => None,
        })
}

/// Resolve a special-power template to one of this center's three plans.
pub fn plan_for_power(world: &World, entity: Entity, power: &str) -> Option<BattlePlanKind> {
    let module = plan_module(world, entity)?;
    if power == module.bombardment {
        Some(BattlePlanKind::Bombardment)
    } else if power == module.hold_the_line {
        Some(BattlePlanKind::HoldTheLine)
    } else if power == module.search_and_destroy {
        Some(BattlePlanKind::SearchAndDestroy)
    } else {
        None
    }
}

/// Select a plan on a strategy center. Switching an active plan packs the
/// old one first and paralyzes the center's passengers; the center itself
/// is never paralyzed.
pub fn set_battle_plan(world: &mut World, center: ObjectId, plan: BattlePlanKind) -> bool {
    let Some(entity) = lookup(world, center) else {
        return false;
    };
    let Some(module) = plan_module(world, entity) else {
        return false;
    };
    let Some(state) = world.get::<BattlePlanState>(entity) else {
        return false;
    };
    match state.phase {
        BattlePlanPhase::Idle => {
            let Some(mut state) = world.get_mut::<BattlePlanState>(entity) else {
                return false;
            };
            state.phase = BattlePlanPhase::Unpacking;
            state.current = Some(plan);
            state.timer = module.transition_frames;
            true
        }
        BattlePlanPhase::Active => {
            if state.current == Some(plan) {
                return false;
            }
            {
                let Some(mut state) = world.get_mut::<BattlePlanState>(entity) else {
                    return false;
                };
                // Bonuses drop immediately at pack start; the recompute
                // sweep sees a non-active phase this same frame.
                state.phase = BattlePlanPhase::Packing;
                state.pending = Some(plan);
                state.timer = module.transition_frames;
            }
            paralyze_passengers(world, entity, module.paralyze_frames);
            recompute_effects(world);
            true
        }
        BattlePlanPhase::Unpacking | BattlePlanPhase::Packing => {
            let Some(mut state) = world.get_mut::<BattlePlanState>(entity) else {
                return false;
            };
            state.pending = Some(plan);
            true
        }
    }
}

fn paralyze_passengers(world: &mut World, center_entity: Entity, paralyze_frames: u32) {
    if paralyze_frames == 0 {
        return;
    }
    let passengers = world
        .get::<ContainerState>(center_entity)
        .map(|c| c.passengers.clone())
        .unwrap_or_default();
    for passenger in passengers {
        let Some(passenger_entity) = lookup(world, passenger) else {
            continue;
        };
        if let Some(mut status) = world.get_mut::<Status>(passenger_entity) {
            status.insert(Status::DISABLED_SUBDUED);
        }
        world.entity_mut(passenger_entity).insert(BattlePlanParalysis {
            frames: paralyze_frames,
        });
    }
}

/// Frame phase: advance transitions, expire paralysis, recompute membership.
pub fn battle_plan_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };

        // Paralysis countdown.
        if let Some(paralysis) = world.get::<BattlePlanParalysis>(entity).copied() {
            if paralysis.frames > 1 {
                world.entity_mut(entity).insert(BattlePlanParalysis {
                    frames: paralysis.frames - 1,
                });
            } else {
                world.entity_mut(entity).remove::<BattlePlanParalysis>();
                if let Some(mut status) = world.get_mut::<Status>(entity) {
                    status.remove(Status::DISABLED_SUBDUED);
                }
            }
        }

        let Some(module) = plan_module(world, entity) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }
        let Some(mut state) = world.get_mut::<BattlePlanState>(entity) else {
            continue;
        };
        match state.phase {
            BattlePlanPhase::Idle | BattlePlanPhase::Active => {}
            BattlePlanPhase::Unpacking => {
                if state.timer > 1 {
                    state.timer -= 1;
                } else {
                    state.phase = BattlePlanPhase::Active;
                    state.timer = 0;
                }
            }
            BattlePlanPhase::Packing => {
                if state.timer > 1 {
                    state.timer -= 1;
                } else if let Some(next) = state.pending.take() {
                    state.phase = BattlePlanPhase::Unpacking;
                    state.current = Some(next);
                    state.timer = module.transition_frames;
                } else {
                    state.phase = BattlePlanPhase::Idle;
                    state.current = None;
                    state.timer = 0;
                }
            }
        }
    }

    recompute_effects(world);
}

/// Called when a strategy center dies so members lose bonuses immediately.
pub fn revert_on_death(world: &mut World, center: ObjectId) {
    let had_plan = lookup(world, center)
        .and_then(|e| world.get::<BattlePlanState>(e))
        .map(|s| s.phase == BattlePlanPhase::Active)
        .unwrap_or(false);
    if had_plan {
        if let Some(entity) = lookup(world, center) {
            if let Some(mut state) = world.get_mut::<BattlePlanState>(entity) {
                state.phase = BattlePlanPhase::Idle;
                state.current = None;
                state.pending = None;
            }
        }
        recompute_effects(world);
    }
}

/// Apply the union of each side's ACTIVE plans to eligible members.
fn recompute_effects(world: &mut World) {
    // Gather active plans per side, with the owning center excluded.
    struct ActivePlan {
        center: ObjectId,
        side: String,
        plan: BattlePlanKind,
        valid_kinds: Vec<String>,
        invalid_kinds: Vec<String>,
        damage_scalar: f32,
        sight_scalar: f32,
    }
    let ids = world.resource::<EntityIndex>().ids();
    let mut active: Vec<ActivePlan> = Vec::new();
    for id in &ids {
        let Some(entity) = lookup(world, *id) else {
            continue;
        };
        let Some(state) = world.get::<BattlePlanState>(entity) else {
            continue;
        };
        if state.phase != BattlePlanPhase::Active {
            continue;
        }
        let Some(plan) = state.current else {
            continue;
        };
        let Some(module) = plan_module(world, entity) else {
            continue;
        };
        let side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        active.push(ActivePlan {
            center: *id,
            side,
            plan,
            valid_kinds: module.valid_kinds,
            invalid_kinds: module.invalid_kinds,
            damage_scalar: module.damage_scalar,
            sight_scalar: module.sight_scalar,
        });
    }

    let registry = world.resource::<DataRegistry>().clone();
    let plan_bits =
        WeaponBonus::BOMBARDMENT | WeaponBonus::HOLD_THE_LINE | WeaponBonus::SEARCH_AND_DESTROY;

    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();

        let mut bits = WeaponBonus::empty();
        let mut damage_scalar = 1.0f32;
        let mut sight_scalar = 1.0f32;
        for plan in &active {
            if plan.side != side || plan.center == id {
                continue;
            }
            let eligible = world
                .get::<Template>(entity)
                .map(|t| {
                    plan.valid_kinds.iter().any(|k| t.is_kind(k))
                        && !plan.invalid_kinds.iter().any(|k| t.is_kind(k))
                })
                .unwrap_or(false);
            if !eligible {
                continue;
            }
            bits |= plan.plan.bonus();
            match plan.plan {
                BattlePlanKind::HoldTheLine => damage_scalar *= plan.damage_scalar,
                BattlePlanKind::SearchAndDestroy => sight_scalar *= plan.sight_scalar,
                BattlePlanKind::Bombardment => {}
            }
        }

        let def = world.get::<Template>(entity).and_then(|t| t.def.clone());
        if let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) {
            let new_flags = (weapon_state.bonus_flags - plan_bits) | bits;
            if new_flags != weapon_state.bonus_flags {
                weapon_state.bonus_flags = new_flags;
                if let Some(def) = def {
                    weapon_state.select_weapon_set(&def, |name| registry.weapon_def(name));
                }
            }
        }
        if let Some(mut body) = world.get_mut::<Body>(entity) {
            body.battle_plan_damage_scalar = damage_scalar;
        }
        if let Some(mut vision) = world.get_mut::<Vision>(entity) {
            vision.scalar = sight_scalar;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBundle, ObjectInput};
    use crate::store::{spawn_object, SpawnProps};
    use crate::systems::combat::tests::combat_world;

    fn strategy_bundle() -> DataBundle {
        let center = ObjectInput {
            name: "StrategyCenter".to_string(),
            kind_of: vec!["STRUCTURE".to_string()],
            behaviors: vec![BehaviorInput::BattlePlanUpdate {
                bombardment_plan: "SpecialPowerBombardment".to_string(),
                hold_the_line_plan: "SpecialPowerHoldTheLine".to_string(),
                search_and_destroy_plan: "SpecialPowerSearchAndDestroy".to_string(),
                transition_time: 99.0, // 3 frames
                battle_plan_change_paralyze_time: 167.0,
                valid_member_kind_of: vec!["INFANTRY".to_string(), "VEHICLE".to_string()],
                invalid_member_kind_of: vec!["DOZER".to_string()],
                hold_the_line_damage_scalar: 0.9,
                search_and_destroy_sight_range_scalar: 1.2,
            }],
            ..Default::default()
        };
        let soldier = ObjectInput {
            name: "Ranger".to_string(),
            kind_of: vec!["INFANTRY".to_string()],
            vision_range: Some(100.0),
            ..Default::default()
        };
        let dozer = ObjectInput {
            name: "Dozer".to_string(),
            kind_of: vec!["VEHICLE".to_string(), "DOZER".to_string()],
            ..Default::default()
        };
        DataBundle {
            objects: vec![center, soldier, dozer],
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_activates_after_unpack() {
        let mut world = combat_world(strategy_bundle());
        let center = spawn_object(
            &mut world,
            "StrategyCenter",
            "america",
            0.0,
            0.0,
            SpawnProps::default(),
        )
        .unwrap();
        let soldier =
            spawn_object(&mut world, "Ranger", "america", 10.0, 0.0, SpawnProps::default())
                .unwrap();
        let dozer =
            spawn_object(&mut world, "Dozer", "america", 20.0, 0.0, SpawnProps::default())
                .unwrap();

        assert!(set_battle_plan(&mut world, center, BattlePlanKind::HoldTheLine));
        // Not active during the 3-frame unpack.
        battle_plan_phase(&mut world);
        battle_plan_phase(&mut world);
        let soldier_entity = lookup(&world, soldier).unwrap();
        assert!(!world
            .get::<WeaponState>(soldier_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::HOLD_THE_LINE));

        battle_plan_phase(&mut world);
        battle_plan_phase(&mut world);
        assert!(world
            .get::<WeaponState>(soldier_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::HOLD_THE_LINE));
        assert!(
            (world.get::<Body>(soldier_entity).unwrap().battle_plan_damage_scalar - 0.9).abs()
                < 1e-6
        );

        // Excluded kind gets nothing.
        let dozer_entity = lookup(&world, dozer).unwrap();
        assert!(!world
            .get::<WeaponState>(dozer_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::HOLD_THE_LINE));

        // The center never buffs itself.
        let center_entity = lookup(&world, center).unwrap();
        assert!(!world
            .get::<WeaponState>(center_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::HOLD_THE_LINE));
    }

    #[test]
    fn test_search_and_destroy_scales_vision() {
        let mut world = combat_world(strategy_bundle());
        let center = spawn_object(
            &mut world,
            "StrategyCenter",
            "america",
            0.0,
            0.0,
            SpawnProps::default(),
        )
        .unwrap();
        let soldier =
            spawn_object(&mut world, "Ranger", "america", 10.0, 0.0, SpawnProps::default())
                .unwrap();
        set_battle_plan(&mut world, center, BattlePlanKind::SearchAndDestroy);
        for _ in 0..4 {
            battle_plan_phase(&mut world);
        }
        let soldier_entity = lookup(&world, soldier).unwrap();
        let vision = world.get::<Vision>(soldier_entity).unwrap();
        assert!((vision.effective() - 120.0).abs() < 1e-4);
    }

    #[test]
    fn test_switching_packs_and_drops_bonuses() {
        let mut world = combat_world(strategy_bundle());
        let center = spawn_object(
            &mut world,
            "StrategyCenter",
            "america",
            0.0,
            0.0,
            SpawnProps::default(),
        )
        .unwrap();
        let soldier =
            spawn_object(&mut world, "Ranger", "america", 10.0, 0.0, SpawnProps::default())
                .unwrap();
        set_battle_plan(&mut world, center, BattlePlanKind::Bombardment);
        for _ in 0..4 {
            battle_plan_phase(&mut world);
        }
        let soldier_entity = lookup(&world, soldier).unwrap();
        assert!(world
            .get::<WeaponState>(soldier_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::BOMBARDMENT));

        // Switch: bonuses drop immediately, new plan lands after pack+unpack.
        set_battle_plan(&mut world, center, BattlePlanKind::HoldTheLine);
        assert!(!world
            .get::<WeaponState>(soldier_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::BOMBARDMENT));
        for _ in 0..7 {
            battle_plan_phase(&mut world);
        }
        assert!(world
            .get::<WeaponState>(soldier_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::HOLD_THE_LINE));
    }

    #[test]
    fn test_center_death_reverts() {
        let mut world = combat_world(strategy_bundle());
        let center = spawn_object(
            &mut world,
            "StrategyCenter",
            "america",
            0.0,
            0.0,
            SpawnProps::default(),
        )
        .unwrap();
        let soldier =
            spawn_object(&mut world, "Ranger", "america", 10.0, 0.0, SpawnProps::default())
                .unwrap();
        set_battle_plan(&mut world, center, BattlePlanKind::Bombardment);
        for _ in 0..4 {
            battle_plan_phase(&mut world);
        }
        crate::systems::combat::deal_damage(&mut world, None, center, 1_000_000.0, "EXPLOSION");
        let soldier_entity = lookup(&world, soldier).unwrap();
        assert!(!world
            .get::<WeaponState>(soldier_entity)
            .unwrap()
            .bonus_flags
            .contains(WeaponBonus::BOMBARDMENT));
    }
}
