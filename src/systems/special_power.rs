//! Special-power dispatch: source resolution, cooldowns, built-in powers,
//! and observation hooks for host instrumentation.

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::*;
use crate::data::{DataRegistry, PreAttackType, RadiusAffects, WeaponDef};
use crate::events::{VisualEvent, VisualEventKind, VisualEventBus};
use crate::store::{lookup, spawn_ocl};

/// Side-shared cooldowns for `SharedSyncedTimer = Yes` powers.
#[derive(Resource, Debug, Default)]
pub struct SharedPowerTimers {
    pub ready_frame: BTreeMap<(String, String), u64>,
}

/// The host player's view, used as the last stop of source resolution.
#[derive(Resource, Debug, Default)]
pub struct LocalPlayer {
    pub side: Option<String>,
    pub selected: Option<ObjectId>,
}

/// What actually got dispatched, surfaced in snapshots and hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialPowerDispatch {
    pub special_power_template_name: String,
    pub module_type: String,
    pub dispatch_type: String,
    pub command_option: Option<String>,
    pub command_button_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_entity_id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_z: Option<f32>,
}

/// Last dispatch performed from this entity.
#[derive(Component, Debug, Clone)]
pub struct LastDispatch(pub SpecialPowerDispatch);

type Hook = Box<dyn Fn(&SpecialPowerDispatch) + Send + Sync>;

/// Host-overridable observation hooks, one per dispatch shape.
#[derive(Resource, Default)]
pub struct SpecialPowerHooks {
    pub on_target_object: Option<Hook>,
    pub on_target_position: Option<Hook>,
    pub on_no_target: Option<Hook>,
}

/// The issueSpecialPower command payload after intake normalization.
#[derive(Debug, Clone, Default)]
pub struct SpecialPowerRequest {
    pub special_power: String,
    pub source_entity_id: Option<ObjectId>,
    pub issuing_entity_ids: Vec<ObjectId>,
    pub command_button: Option<String>,
    pub target_entity_id: Option<ObjectId>,
    pub target_x: Option<f32>,
    pub target_z: Option<f32>,
}

fn carries_power(world: &World, entity: Entity, power: &str) -> bool {
    let Some(def) = world.get::<Template>(entity).and_then(|t| t.def.as_ref()) else {
        return false;
    };
    let direct = def.behaviors.iter().any(|b| {
        matches!(b, crate::data::BehaviorInput::SpecialPowerModule { special_power_template }
            if special_power_template == power)
    });
    direct || crate::systems::battle_plan::plan_for_power(world, entity, power).is_some()
}

/// Source resolution chain: explicit source > first issuing entity >
/// shortcut (lowest-id carrier) > locally selected entity.
fn resolve_source(world: &mut World, request: &SpecialPowerRequest) -> Option<ObjectId> {
    if let Some(source) = request.source_entity_id {
        return Some(source);
    }
    if let Some(&first) = request.issuing_entity_ids.first() {
        return Some(first);
    }
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        if let Some(entity) = lookup(world, id) {
            let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
            if alive && carries_power(world, entity, &request.special_power) {
                return Some(id);
            }
        }
    }
    world.resource::<LocalPlayer>().selected
}

/// Entry point for the issueSpecialPower command. Silently dropped when any
/// gate fails.
pub fn issue(world: &mut World, request: &SpecialPowerRequest) -> bool {
    let power = crate::data::norm_name(&request.special_power);
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.special_power_def(&power) else {
        log::debug!("special power rejected: unknown template {power}");
        return false;
    };

    let Some(source) = resolve_source(world, request) else {
        return false;
    };
    let Some(source_entity) = lookup(world, source) else {
        return false;
    };
    if !carries_power(world, source_entity, &power) {
        log::debug!("special power rejected: {source:?} does not carry {power}");
        return false;
    }
    // Command-set gating: a source with an active set must expose a button
    // for this template. Sources without any set dispatch as shortcuts.
    if let Some(set_name) = crate::systems::upgrades::active_command_set(world, source_entity) {
        if let Some(set) = registry.command_set(&set_name) {
            let exposed = set.buttons.values().any(|name| {
                registry
                    .command_button(name)
                    .map(|b| b.special_power.as_deref() == Some(power.as_str()))
                    .unwrap_or(false)
            });
            if !exposed {
                log::debug!("special power rejected: command set hides {power}");
                return false;
            }
        }
    }
    let side = world
        .get::<Allegiance>(source_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let frame = world.resource::<SimFrame>().0;

    // Cooldown gate, per source or shared per side.
    if def.shared_synced_timer {
        let timers = world.resource::<SharedPowerTimers>();
        if let Some(&ready) = timers.ready_frame.get(&(side.clone(), power.clone())) {
            if frame < ready {
                return false;
            }
        }
    } else if let Some(ready) = world.get::<SpecialPowerReady>(source_entity) {
        if let Some(&ready_frame) = ready.ready_frame.get(&power) {
            if frame < ready_frame {
                return false;
            }
        }
    }

    // Dispatch shape from the command button's options.
    let button = request
        .command_button
        .as_deref()
        .and_then(|name| registry.command_button(name));
    let (dispatch_type, command_option) = match &button {
        Some(button) if button.has_option("NEED_TARGET_ENEMY_OBJECT") => (
            "TARGET_OBJECT",
            Some("NEED_TARGET_ENEMY_OBJECT".to_string()),
        ),
        Some(button) if button.has_option("NEED_TARGET_POS") => {
            ("TARGET_POSITION", Some("NEED_TARGET_POS".to_string()))
        }
        _ => {
            if request.target_entity_id.is_some() {
                ("TARGET_OBJECT", None)
            } else if request.target_x.is_some() {
                ("TARGET_POSITION", None)
            } else {
                ("NO_TARGET", None)
            }
        }
    };
    if dispatch_type == "TARGET_OBJECT" && request.target_entity_id.is_none() {
        return false;
    }
    if dispatch_type == "TARGET_POSITION" && request.target_x.is_none() {
        return false;
    }

    // Arm the cooldown.
    let ready_at = frame + u64::from(def.reload_frames);
    if def.shared_synced_timer {
        world
            .resource_mut::<SharedPowerTimers>()
            .ready_frame
            .insert((side.clone(), power.clone()), ready_at);
    } else if let Some(mut ready) = world.get_mut::<SpecialPowerReady>(source_entity) {
        ready.ready_frame.insert(power.clone(), ready_at);
    }

    let dispatch = SpecialPowerDispatch {
        special_power_template_name: power.clone(),
        module_type: def.template.clone(),
        dispatch_type: dispatch_type.to_string(),
        command_option,
        command_button_id: request.command_button.clone().map(|b| crate::data::norm_name(&b)),
        target_entity_id: request.target_entity_id,
        target_x: request.target_x,
        target_z: request.target_z,
    };

    execute_builtin(world, source, &side, &def, &dispatch);

    if let Some(source_entity) = lookup(world, source) {
        world
            .entity_mut(source_entity)
            .insert(LastDispatch(dispatch.clone()));
    }
    world
        .resource_mut::<VisualEventBus>()
        .emit(VisualEvent::simple(VisualEventKind::SpecialPower, source).with_detail(&power));

    // Observation hooks fire last, outside all mutation.
    world.resource_scope(|_, hooks: Mut<SpecialPowerHooks>| {
        let hook = match dispatch.dispatch_type.as_str() {
            "TARGET_OBJECT" => hooks.on_target_object.as_ref(),
            "TARGET_POSITION" => hooks.on_target_position.as_ref(),
            _ => hooks.on_no_target.as_ref(),
        };
        if let Some(hook) = hook {
            hook(&dispatch);
        }
    });
    true
}

fn target_position(world: &World, dispatch: &SpecialPowerDispatch) -> Option<(f32, f32)> {
    if let (Some(x), Some(z)) = (dispatch.target_x, dispatch.target_z) {
        return Some((x, z));
    }
    let target = dispatch.target_entity_id?;
    let entity = world.resource::<EntityIndex>().entity(target)?;
    let position = world.get::<Position>(entity)?;
    Some((position.x, position.z))
}

fn execute_builtin(
    world: &mut World,
    source: ObjectId,
    side: &str,
    def: &Arc<crate::data::SpecialPowerDef>,
    dispatch: &SpecialPowerDispatch,
) {
    match def.template.as_str() {
        "OCL" => {
            let at = target_position(world, dispatch).or_else(|| {
                lookup(world, source)
                    .and_then(|e| world.get::<Position>(e))
                    .map(|p| (p.x, p.z))
            });
            if let (Some(ocl), Some((x, z))) = (&def.ocl, at) {
                spawn_ocl(world, ocl, side, x, z);
            }
        }
        "CASH_HACK" => {
            let Some(target) = dispatch.target_entity_id else {
                return;
            };
            let victim_side = lookup(world, target)
                .and_then(|e| world.get::<Allegiance>(e))
                .map(|a| a.side.clone());
            if let Some(victim_side) = victim_side {
                let mut sides = world.resource_mut::<crate::sides::SideTable>();
                let stolen = sides
                    .get_mut(&victim_side)
                    .map(|s| {
                        let stolen = def.amount.min(s.credits).max(0);
                        s.credits -= stolen;
                        stolen
                    })
                    .unwrap_or(0);
                if let Some(state) = sides.get_mut(side) {
                    state.add_credits(stolen);
                }
            }
        }
        "DEFECTOR" => {
            if let Some(target) = dispatch.target_entity_id {
                crate::systems::upgrades::capture_transfer(world, target, side);
            }
        }
        "AREA_DAMAGE" => {
            if let Some((x, z)) = target_position(world, dispatch) {
                let weapon = Arc::new(area_damage_weapon(def));
                crate::systems::combat::resolve_impact(
                    world,
                    source,
                    &weapon,
                    Position::new(x, 0.0, z),
                    None,
                );
            }
        }
        "BATTLE_PLAN" => {
            let plan = lookup(world, source).and_then(|e| {
                crate::systems::battle_plan::plan_for_power(
                    world,
                    e,
                    &dispatch.special_power_template_name,
                )
            });
            if let Some(plan) = plan {
                crate::systems::battle_plan::set_battle_plan(world, source, plan);
            }
        }
        _ => {
            // Unknown mechanisms dispatch to hooks only.
        }
    }
}

/// Synthetic weapon for module-declared area damage.
fn area_damage_weapon(def: &crate::data::SpecialPowerDef) -> WeaponDef {
    WeaponDef {
        name: def.name.clone(),
        primary_damage: def.damage,
        primary_radius: def.radius,
        secondary_damage: 0.0,
        secondary_radius: 0.0,
        radius_affects: RadiusAffects::ENEMIES | RadiusAffects::NEUTRAL,
        radius_angle: None,
        self_position: false,
        attack_range: 0.0,
        min_range: 0.0,
        continue_range: 0.0,
        speed_per_frame: None,
        min_speed_per_frame: 0.0,
        scale_speed: false,
        delay_frames: 0,
        clip_size: 0,
        clip_reload_frames: 0,
        pre_attack_frames: 0,
        pre_attack_type: PreAttackType::PerShot,
        auto_reload_idle_frames: None,
        projectile: None,
        projectile_collides: Vec::new(),
        scatter_radius: 0.0,
        scatter_radius_infantry: 0.0,
        scatter_targets: Vec::new(),
        scatter_scalar: 1.0,
        damage_type: def.damage_type.clone(),
    }
}
