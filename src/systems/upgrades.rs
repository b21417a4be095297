//! Upgrade kernel: ownership sets, module dispatch, capture transfer.
//!
//! Upgrade-flavored behavior modules dispatch in declaration order, exactly
//! once per activation. Trigger evaluation sees the union of the object's
//! own upgrade set and its side's completed player upgrades. RemovesUpgrades
//! executes before the module effect.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::{BehaviorInput, DataRegistry, HealthChangeType, UpgradeTrigger, UpgradeType};
use crate::events::{VisualEvent, VisualEventKind, VisualEventBus};
use crate::sides::{CostModifier, SideTable};
use crate::store::lookup;

/// Grant an OBJECT upgrade to one entity and dispatch its modules.
pub fn apply_object_upgrade(world: &mut World, id: ObjectId, upgrade: &str) -> bool {
    let upgrade = crate::data::norm_name(upgrade);
    let Some(entity) = lookup(world, id) else {
        return false;
    };
    let Some(mut ownership) = world.get_mut::<UpgradeOwnership>(entity) else {
        return false;
    };
    ownership.0.insert(upgrade);
    dispatch_modules(world, id);
    true
}

/// Complete a PLAYER upgrade for a side and re-dispatch every owned object
/// carrying a module keyed on it.
pub fn apply_player_upgrade(world: &mut World, side: &str, upgrade: &str) {
    let side = crate::data::norm_side(side);
    let upgrade = crate::data::norm_name(upgrade);
    {
        let mut sides = world.resource_mut::<SideTable>();
        let state = sides.ensure(&side);
        state.upgrades_in_production.remove(&upgrade);
        state.upgrades_completed.insert(upgrade.clone());
    }
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let belongs = lookup(world, id)
            .and_then(|e| world.get::<Allegiance>(e))
            .map(|a| a.side == side)
            .unwrap_or(false);
        if belongs {
            dispatch_modules(world, id);
        }
    }
}

/// Frame phase: idempotent re-dispatch sweep. Catches trigger unions that
/// changed outside the direct apply paths (captures, status flips).
pub fn upgrade_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let alive = lookup(world, id)
            .and_then(|e| world.get::<Body>(e))
            .map(|b| b.alive)
            .unwrap_or(false);
        if alive {
            dispatch_modules(world, id);
        }
    }
}

fn trigger_satisfied(
    trigger: &UpgradeTrigger,
    owned: &std::collections::BTreeSet<String>,
) -> bool {
    if trigger.triggered_by.is_empty() {
        return false;
    }
    if trigger.requires_all_triggers {
        trigger.triggered_by.iter().all(|u| owned.contains(u))
    } else {
        trigger.triggered_by.iter().any(|u| owned.contains(u))
    }
}

fn module_trigger(behavior: &BehaviorInput) -> Option<&UpgradeTrigger> {
    match behavior {
        BehaviorInput::WeaponSetUpgrade { trigger }
        | BehaviorInput::ArmorUpgrade { trigger }
        | BehaviorInput::PowerPlantUpgrade { trigger }
        | BehaviorInput::StealthUpgrade { trigger }
        | BehaviorInput::PassengersFireUpgrade { trigger }
        | BehaviorInput::WeaponBonusUpgrade { trigger, .. }
        | BehaviorInput::LocomotorSetUpgrade { trigger, .. }
        | BehaviorInput::MaxHealthUpgrade { trigger, .. }
        | BehaviorInput::StatusBitsUpgrade { trigger, .. }
        | BehaviorInput::CommandSetUpgrade { trigger, .. }
        | BehaviorInput::RadarUpgrade { trigger, .. }
        | BehaviorInput::GrantScienceUpgrade { trigger, .. }
        | BehaviorInput::CostModifierUpgrade { trigger, .. }
        | BehaviorInput::UnpauseSpecialPowerUpgrade { trigger, .. } => Some(trigger),
        _ => None,
    }
}

/// Evaluate and fire this object's upgrade modules against current ownership.
pub fn dispatch_modules(world: &mut World, id: ObjectId) {
    let Some(entity) = lookup(world, id) else {
        return;
    };
    let Some(def) = world.get::<Template>(entity).and_then(|t| t.def.clone()) else {
        return;
    };
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    for (index, behavior) in def.behaviors.iter().enumerate() {
        let Some(trigger) = module_trigger(behavior) else {
            continue;
        };

        // Union of object ownership and the side's completed upgrades.
        let owned: std::collections::BTreeSet<String> = {
            let mut owned = world
                .get::<UpgradeOwnership>(entity)
                .map(|u| u.0.clone())
                .unwrap_or_default();
            if let Some(state) = world.resource::<SideTable>().get(&side) {
                owned.extend(state.upgrades_completed.iter().cloned());
            }
            owned
        };

        if !trigger_satisfied(trigger, &owned) {
            continue;
        }
        let already = world
            .get::<UpgradeModuleState>(entity)
            .map(|m| m.activated.contains(&index))
            .unwrap_or(true);
        if already {
            continue;
        }

        // RemovesUpgrades clears ownership before the effect lands.
        if !trigger.removes_upgrades.is_empty() {
            let registry = world.resource::<DataRegistry>().clone();
            for removed in &trigger.removes_upgrades {
                if let Some(mut ownership) = world.get_mut::<UpgradeOwnership>(entity) {
                    ownership.0.remove(removed);
                }
                let is_player = registry
                    .upgrade_def(removed)
                    .map(|u| u.upgrade_type == UpgradeType::Player)
                    .unwrap_or(false);
                if is_player {
                    let mut sides = world.resource_mut::<SideTable>();
                    if let Some(state) = sides.get_mut(&side) {
                        state.upgrades_completed.remove(removed);
                    }
                }
            }
        }

        if let Some(mut modules) = world.get_mut::<UpgradeModuleState>(entity) {
            modules.activated.insert(index);
        }
        apply_module_effect(world, id, entity, &side, index, behavior);
    }

    // Command-set override is recomputed from live ownership so removing the
    // trigger upgrade reverts it.
    recompute_command_set(world, entity, &side, &def);
}

fn apply_module_effect(
    world: &mut World,
    id: ObjectId,
    entity: Entity,
    side: &str,
    index: usize,
    behavior: &BehaviorInput,
) {
    let disabled = world
        .get::<Status>(entity)
        .map(|s| s.is_disabled())
        .unwrap_or(false);

    match behavior {
        BehaviorInput::WeaponSetUpgrade { .. } => {
            add_bonus_flag(world, entity, WeaponBonus::PLAYER_UPGRADE);
        }
        BehaviorInput::WeaponBonusUpgrade { bonus_slot, .. } => {
            add_bonus_flag(world, entity, WeaponBonus::upgrade_slot(*bonus_slot));
        }
        BehaviorInput::ArmorUpgrade { .. } => {
            if let Some(mut body) = world.get_mut::<Body>(entity) {
                body.armor_upgraded = true;
            }
        }
        BehaviorInput::LocomotorSetUpgrade { upgraded_set, .. } => {
            if let Some(mut locomotion) = world.get_mut::<Locomotion>(entity) {
                locomotion.active_set = upgraded_set.clone();
            }
        }
        BehaviorInput::MaxHealthUpgrade {
            add_max_health,
            change_type,
            ..
        } => {
            if *add_max_health != 0.0 {
                if let Some(mut body) = world.get_mut::<Body>(entity) {
                    let ratio = body.fraction();
                    body.max_health += add_max_health;
                    match change_type {
                        HealthChangeType::SameCurrentHealth => {}
                        HealthChangeType::PreserveRatio => {
                            body.health = body.max_health * ratio;
                        }
                        HealthChangeType::Full => body.health = body.max_health,
                    }
                    body.health = body.health.clamp(0.0, body.max_health);
                }
            }
        }
        BehaviorInput::StatusBitsUpgrade {
            status_to_set,
            status_to_clear,
            ..
        } => {
            if let Some(mut status) = world.get_mut::<Status>(entity) {
                for name in status_to_set {
                    if let Some(flag) = Status::by_name(name) {
                        status.insert(flag);
                    }
                }
                for name in status_to_clear {
                    if let Some(flag) = Status::by_name(name) {
                        status.remove(flag);
                    }
                }
            }
        }
        BehaviorInput::CommandSetUpgrade { .. } => {
            // Handled by recompute_command_set after every dispatch pass.
        }
        BehaviorInput::PowerPlantUpgrade { .. } => {
            if !disabled {
                let bonus = world
                    .get::<Template>(entity)
                    .and_then(|t| t.def.as_ref().map(|d| d.energy_bonus))
                    .unwrap_or(0);
                if bonus != 0 {
                    let mut sides = world.resource_mut::<SideTable>();
                    if let Some(state) = sides.get_mut(side) {
                        state.power_bonus += bonus;
                    }
                    if let Some(mut modules) = world.get_mut::<UpgradeModuleState>(entity) {
                        modules.side_effects_applied.insert(index);
                    }
                }
            }
        }
        BehaviorInput::RadarUpgrade { disable_proof, .. } => {
            if !disabled {
                let mut sides = world.resource_mut::<SideTable>();
                if let Some(state) = sides.get_mut(side) {
                    state.radar_count += 1;
                    if *disable_proof {
                        state.radar_disable_proof_count += 1;
                    }
                }
                if let Some(mut modules) = world.get_mut::<UpgradeModuleState>(entity) {
                    modules.side_effects_applied.insert(index);
                }
            }
        }
        BehaviorInput::GrantScienceUpgrade { grant_science, .. } => {
            let mut sides = world.resource_mut::<SideTable>();
            if let Some(state) = sides.get_mut(side) {
                for science in grant_science {
                    state.sciences.insert(science.clone());
                }
            }
        }
        BehaviorInput::CostModifierUpgrade {
            effect_kind_of,
            percentage,
            ..
        } => {
            let mut sides = world.resource_mut::<SideTable>();
            if let Some(state) = sides.get_mut(side) {
                state.cost_modifiers.push(CostModifier {
                    kind_of: effect_kind_of.clone(),
                    percentage: *percentage,
                });
            }
            if let Some(mut modules) = world.get_mut::<UpgradeModuleState>(entity) {
                modules.side_effects_applied.insert(index);
            }
        }
        BehaviorInput::StealthUpgrade { .. } => {
            if let Some(mut status) = world.get_mut::<Status>(entity) {
                status.insert(Status::CAN_STEALTH);
            }
        }
        BehaviorInput::UnpauseSpecialPowerUpgrade {
            special_power_template,
            ..
        } => {
            if let Some(mut ready) = world.get_mut::<SpecialPowerReady>(entity) {
                ready.ready_frame.remove(special_power_template);
            }
        }
        BehaviorInput::PassengersFireUpgrade { .. } => {
            if let Some(mut container) = world.get_mut::<ContainerState>(entity) {
                container.fire_override = true;
            }
        }
        _ => {}
    }

    world
        .resource_mut::<VisualEventBus>()
        .emit(VisualEvent::simple(VisualEventKind::UpgradeComplete, id));
}

fn add_bonus_flag(world: &mut World, entity: Entity, flag: WeaponBonus) {
    let def = world.get::<Template>(entity).and_then(|t| t.def.clone());
    let registry = world.resource::<DataRegistry>().clone();
    if let Some(mut weapon_state) = world.get_mut::<WeaponState>(entity) {
        weapon_state.bonus_flags |= flag;
        if let Some(def) = def {
            weapon_state.select_weapon_set(&def, |name| registry.weapon_def(name));
        }
    }
}

fn recompute_command_set(
    world: &mut World,
    entity: Entity,
    side: &str,
    def: &crate::data::ObjectDef,
) {
    let owned: std::collections::BTreeSet<String> = {
        let mut owned = world
            .get::<UpgradeOwnership>(entity)
            .map(|u| u.0.clone())
            .unwrap_or_default();
        if let Some(state) = world.resource::<SideTable>().get(side) {
            owned.extend(state.upgrades_completed.iter().cloned());
        }
        owned
    };

    let mut override_set = None;
    for behavior in &def.behaviors {
        if let BehaviorInput::CommandSetUpgrade {
            trigger,
            command_set,
            command_set_alt,
            trigger_alt,
        } = behavior
        {
            if trigger_satisfied(trigger, &owned) {
                let use_alt = trigger_alt
                    .as_ref()
                    .map(|alt| owned.contains(alt))
                    .unwrap_or(false);
                override_set = Some(match (use_alt, command_set_alt) {
                    (true, Some(alt)) => alt.clone(),
                    _ => command_set.clone(),
                });
            }
        }
    }
    if let Some(mut command_override) = world.get_mut::<CommandSetOverride>(entity) {
        command_override.current = override_set;
    }
}

/// The command set currently active on an entity.
pub fn active_command_set(world: &World, entity: Entity) -> Option<String> {
    if let Some(override_set) = world.get::<CommandSetOverride>(entity) {
        if let Some(current) = &override_set.current {
            return Some(current.clone());
        }
    }
    world
        .get::<Template>(entity)
        .and_then(|t| t.def.as_ref())
        .and_then(|d| d.command_set.clone())
}

// ============================================================================
// CAPTURE
// ============================================================================

/// Move an entity to a new side, migrating its aggregate side effects.
/// Disabled entities keep their effects assigned to the original side until
/// re-enabled (the dispatch sweep migrates them then).
pub fn capture_transfer(world: &mut World, id: ObjectId, new_side: &str) {
    let new_side = crate::data::norm_side(new_side);
    let Some(entity) = lookup(world, id) else {
        return;
    };
    let old_side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    if old_side == new_side {
        return;
    }
    world.resource_mut::<SideTable>().ensure(&new_side);

    let disabled = world
        .get::<Status>(entity)
        .map(|s| s.is_disabled())
        .unwrap_or(false);
    let def = world.get::<Template>(entity).and_then(|t| t.def.clone());
    let under_construction = world
        .get::<Status>(entity)
        .map(|s| s.contains(Status::UNDER_CONSTRUCTION))
        .unwrap_or(false);

    // Base energy contribution always follows the owner.
    if let Some(def) = &def {
        if !under_construction && def.energy_production != 0 {
            let mut sides = world.resource_mut::<SideTable>();
            if let Some(state) = sides.get_mut(&old_side) {
                shift_energy(state, def.energy_production, -1);
            }
            if let Some(state) = sides.get_mut(&new_side) {
                shift_energy(state, def.energy_production, 1);
            }
        }
    }

    // Module side effects move only while the source is enabled.
    if !disabled {
        if let Some(def) = &def {
            let applied = world
                .get::<UpgradeModuleState>(entity)
                .map(|m| m.side_effects_applied.clone())
                .unwrap_or_default();
            for index in applied {
                let Some(behavior) = def.behaviors.get(index) else {
                    continue;
                };
                match behavior {
                    BehaviorInput::PowerPlantUpgrade { .. } => {
                        let bonus = def.energy_bonus;
                        let mut sides = world.resource_mut::<SideTable>();
                        if let Some(state) = sides.get_mut(&old_side) {
                            state.power_bonus -= bonus;
                        }
                        if let Some(state) = sides.get_mut(&new_side) {
                            state.power_bonus += bonus;
                        }
                    }
                    BehaviorInput::RadarUpgrade { disable_proof, .. } => {
                        let mut sides = world.resource_mut::<SideTable>();
                        if let Some(state) = sides.get_mut(&old_side) {
                            state.radar_count -= 1;
                            if *disable_proof {
                                state.radar_disable_proof_count -= 1;
                            }
                        }
                        if let Some(state) = sides.get_mut(&new_side) {
                            state.radar_count += 1;
                            if *disable_proof {
                                state.radar_disable_proof_count += 1;
                            }
                        }
                    }
                    BehaviorInput::CostModifierUpgrade {
                        effect_kind_of,
                        percentage,
                        ..
                    } => {
                        let mut sides = world.resource_mut::<SideTable>();
                        if let Some(state) = sides.get_mut(&old_side) {
                            if let Some(slot) = state.cost_modifiers.iter().position(|m| {
                                m.kind_of == *effect_kind_of && m.percentage == *percentage
                            }) {
                                state.cost_modifiers.remove(slot);
                            }
                        }
                        if let Some(state) = sides.get_mut(&new_side) {
                            state.cost_modifiers.push(CostModifier {
                                kind_of: effect_kind_of.clone(),
                                percentage: *percentage,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(mut allegiance) = world.get_mut::<Allegiance>(entity) {
        allegiance.side = new_side;
    }
}

fn shift_energy(state: &mut crate::sides::SideState, energy: i32, sign: i32) {
    if energy > 0 {
        state.power_production += energy * sign;
    } else {
        state.power_consumption += (-energy) * sign;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBundle, ObjectInput, UpgradeInput};
    use crate::store::{spawn_object, SpawnProps};
    use crate::systems::combat::tests::combat_world;

    fn upgrade(name: &str, utype: &str) -> UpgradeInput {
        UpgradeInput {
            name: name.to_string(),
            r#type: Some(utype.to_string()),
            build_cost: 1000,
            build_time: 1.0,
        }
    }

    fn trigger(names: &[&str]) -> UpgradeTrigger {
        UpgradeTrigger {
            triggered_by: names.iter().map(|n| n.to_string()).collect(),
            requires_all_triggers: false,
            removes_upgrades: vec![],
        }
    }

    #[test]
    fn test_max_health_change_types() {
        let mut object = ObjectInput {
            name: "Tank".to_string(),
            ..Default::default()
        };
        object.body = Some(crate::data::BodyInput {
            max_health: Some(100.0),
            initial_health: None,
        });
        object.behaviors = vec![BehaviorInput::MaxHealthUpgrade {
            trigger: trigger(&["UPGRADE_HP"]),
            add_max_health: 100.0,
            change_type: HealthChangeType::PreserveRatio,
        }];
        let bundle = DataBundle {
            objects: vec![object],
            upgrades: vec![upgrade("UPGRADE_HP", "OBJECT")],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tank", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();
        world.get_mut::<Body>(entity).unwrap().health = 50.0;

        apply_object_upgrade(&mut world, id, "UPGRADE_HP");
        let body = world.get::<Body>(entity).unwrap();
        assert_eq!(body.max_health, 200.0);
        assert_eq!(body.health, 100.0, "50% ratio preserved");

        // Re-application is idempotent.
        apply_object_upgrade(&mut world, id, "UPGRADE_HP");
        assert_eq!(world.get::<Body>(entity).unwrap().max_health, 200.0);
    }

    #[test]
    fn test_requires_all_triggers() {
        let mut object = ObjectInput {
            name: "Tank".to_string(),
            ..Default::default()
        };
        object.behaviors = vec![BehaviorInput::StatusBitsUpgrade {
            trigger: UpgradeTrigger {
                triggered_by: vec!["UPGRADE_A".to_string(), "UPGRADE_B".to_string()],
                requires_all_triggers: true,
                removes_upgrades: vec![],
            },
            status_to_set: vec!["CAN_STEALTH".to_string()],
            status_to_clear: vec![],
        }];
        let bundle = DataBundle {
            objects: vec![object],
            upgrades: vec![upgrade("UPGRADE_A", "OBJECT"), upgrade("UPGRADE_B", "OBJECT")],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tank", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();

        apply_object_upgrade(&mut world, id, "UPGRADE_A");
        assert!(!world.get::<Status>(entity).unwrap().contains(Status::CAN_STEALTH));
        apply_object_upgrade(&mut world, id, "UPGRADE_B");
        assert!(world.get::<Status>(entity).unwrap().contains(Status::CAN_STEALTH));
    }

    #[test]
    fn test_removes_upgrades_executes_first() {
        let mut object = ObjectInput {
            name: "Tank".to_string(),
            ..Default::default()
        };
        object.behaviors = vec![BehaviorInput::MaxHealthUpgrade {
            trigger: UpgradeTrigger {
                triggered_by: vec!["UPGRADE_NEW".to_string()],
                requires_all_triggers: false,
                removes_upgrades: vec!["UPGRADE_OLD".to_string()],
            },
            add_max_health: 0.0,
            change_type: HealthChangeType::SameCurrentHealth,
        }];
        let bundle = DataBundle {
            objects: vec![object],
            upgrades: vec![upgrade("UPGRADE_OLD", "OBJECT"), upgrade("UPGRADE_NEW", "OBJECT")],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tank", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();

        apply_object_upgrade(&mut world, id, "UPGRADE_OLD");
        apply_object_upgrade(&mut world, id, "UPGRADE_NEW");
        let ownership = world.get::<UpgradeOwnership>(entity).unwrap();
        assert!(!ownership.0.contains("UPGRADE_OLD"), "removed by the chain module");
        assert!(ownership.0.contains("UPGRADE_NEW"));
    }

    #[test]
    fn test_command_set_override_and_revert() {
        let mut object = ObjectInput {
            name: "Barracks".to_string(),
            command_set: Some("BasicSet".to_string()),
            ..Default::default()
        };
        object.behaviors = vec![BehaviorInput::CommandSetUpgrade {
            trigger: trigger(&["UPGRADE_TECH"]),
            command_set: "TechSet".to_string(),
            command_set_alt: Some("AltSet".to_string()),
            trigger_alt: Some("UPGRADE_ALT".to_string()),
        }];
        let bundle = DataBundle {
            objects: vec![object],
            upgrades: vec![upgrade("UPGRADE_TECH", "OBJECT"), upgrade("UPGRADE_ALT", "OBJECT")],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Barracks", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();
        assert_eq!(active_command_set(&world, entity).as_deref(), Some("BASICSET"));

        apply_object_upgrade(&mut world, id, "UPGRADE_TECH");
        assert_eq!(active_command_set(&world, entity).as_deref(), Some("TECHSET"));

        // Second trigger upgrade flips to the alt slot.
        apply_object_upgrade(&mut world, id, "UPGRADE_ALT");
        assert_eq!(active_command_set(&world, entity).as_deref(), Some("ALTSET"));

        // Removing the trigger upgrade reverts the override.
        world
            .get_mut::<UpgradeOwnership>(entity)
            .unwrap()
            .0
            .remove("UPGRADE_TECH");
        dispatch_modules(&mut world, id);
        assert_eq!(active_command_set(&world, entity).as_deref(), Some("BASICSET"));
    }

    #[test]
    fn test_power_plant_and_capture_transfer() {
        let mut object = ObjectInput {
            name: "Reactor".to_string(),
            energy_production: Some(5),
            energy_bonus: Some(3),
            ..Default::default()
        };
        object.behaviors = vec![BehaviorInput::PowerPlantUpgrade {
            trigger: trigger(&["UPGRADE_TURBINES"]),
        }];
        let bundle = DataBundle {
            objects: vec![object],
            upgrades: vec![upgrade("UPGRADE_TURBINES", "OBJECT")],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Reactor", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        apply_object_upgrade(&mut world, id, "UPGRADE_TURBINES");

        {
            let sides = world.resource::<SideTable>();
            let china = sides.get("china").unwrap();
            assert_eq!(china.power_production, 5);
            assert_eq!(china.power_bonus, 3);
        }

        capture_transfer(&mut world, id, "gla");
        let sides = world.resource::<SideTable>();
        let china = sides.get("china").unwrap();
        let gla = sides.get("gla").unwrap();
        assert_eq!(china.power_production, 0);
        assert_eq!(china.power_bonus, 0);
        assert_eq!(gla.power_production, 5);
        assert_eq!(gla.power_bonus, 3);
    }

    #[test]
    fn test_player_upgrade_dispatches_weapon_bonus() {
        let mut object = ObjectInput {
            name: "Tank".to_string(),
            ..Default::default()
        };
        object.weapon_sets = vec![
            crate::data::WeaponSetInput {
                conditions: vec![],
                primary: Some("BasicGun".to_string()),
                ..Default::default()
            },
            crate::data::WeaponSetInput {
                conditions: vec!["PLAYER_UPGRADE".to_string()],
                primary: Some("BetterGun".to_string()),
                ..Default::default()
            },
        ];
        object.behaviors = vec![BehaviorInput::WeaponSetUpgrade {
            trigger: trigger(&["UPGRADE_GUNS"]),
        }];
        let bundle = DataBundle {
            objects: vec![object],
            weapons: vec![
                crate::data::WeaponInput {
                    name: "BasicGun".to_string(),
                    primary_damage: 10.0,
                    attack_range: 100.0,
                    ..Default::default()
                },
                crate::data::WeaponInput {
                    name: "BetterGun".to_string(),
                    primary_damage: 25.0,
                    attack_range: 100.0,
                    ..Default::default()
                },
            ],
            upgrades: vec![upgrade("UPGRADE_GUNS", "PLAYER")],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let id = spawn_object(&mut world, "Tank", "china", 0.0, 0.0, SpawnProps::default())
            .unwrap();
        let entity = lookup(&world, id).unwrap();
        assert_eq!(
            world
                .get::<WeaponState>(entity)
                .unwrap()
                .weapon
                .as_ref()
                .unwrap()
                .name,
            "BASICGUN"
        );

        apply_player_upgrade(&mut world, "china", "UPGRADE_GUNS");
        assert_eq!(
            world
                .get::<WeaponState>(entity)
                .unwrap()
                .weapon
                .as_ref()
                .unwrap()
                .name,
            "BETTERGUN"
        );
    }
}
