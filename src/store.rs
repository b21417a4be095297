//! Entity store operations: spawning, destruction, lookup.
//!
//! The ECS world owns every entity; other components refer to entities by
//! ObjectId only. Spawning validates the template against the registry and
//! keeps unresolved templates as placeholders (`resolved=false`): they render
//! but never fight or produce.

use bevy_ecs::prelude::*;
use rand::Rng;

use crate::components::*;
use crate::data::{frames_from_ms, BehaviorInput, DataRegistry};
use crate::events::{VisualEvent, VisualEventBus};
use crate::rng::GameRng;
use crate::sides::SideTable;
use crate::terrain::HeightGrid;

/// Extra spawn knobs. Everything defaults.
#[derive(Debug, Clone, Default)]
pub struct SpawnProps {
    pub angle: f32,
    pub original_owner: Option<String>,
    /// Spawn in UNDER_CONSTRUCTION state with 1 health.
    pub under_construction: bool,
    /// Producer building for parking-sourced aircraft.
    pub parked_at: Option<ObjectId>,
}

/// Spawn an object from a template. Returns the new id; `None` only for an
/// empty template name.
pub fn spawn_object(
    world: &mut World,
    template_name: &str,
    side: &str,
    x: f32,
    z: f32,
    props: SpawnProps,
) -> Option<ObjectId> {
    let template_name = crate::data::norm_name(template_name);
    if template_name.is_empty() {
        return None;
    }
    let side = crate::data::norm_side(side);

    let def = world
        .resource::<DataRegistry>()
        .object_def(&template_name);
    let frame = world.resource::<SimFrame>().0;
    let rng = *world.resource::<GameRng>();

    let id = world.resource_mut::<EntityIndex>().allocate();

    let ground = world.resource::<HeightGrid>().get_height_at(x, z);
    let base_height = def.as_ref().map(|d| d.base_height()).unwrap_or(0.0);
    let position = Position::new(x, ground + base_height, z);

    let original_owner = props.original_owner.unwrap_or_else(|| side.clone());
    let max_health = def.as_ref().map(|d| d.max_health).unwrap_or(100.0);
    let initial_health = def.as_ref().and_then(|d| d.initial_health);

    let mut body = match initial_health {
        Some(health) => Body::with_health(max_health, health),
        None => Body::new(max_health),
    };
    let mut status = Status::default();
    if props.under_construction {
        status |= Status::UNDER_CONSTRUCTION;
        body.health = 1.0;
    }

    let mut weapon_state = WeaponState::default();
    if let Some(def) = &def {
        let registry = world.resource::<DataRegistry>().clone();
        weapon_state.select_weapon_set(def, |name| registry.weapon_def(name));
    }

    let mut render = RenderMeta::default();
    if let Some(def) = &def {
        render.candidates = def.render.candidates.clone();
        render.clips = def.render.clips.clone();
        render.asset_path = def.render.candidates.first().cloned();
        render.asset_resolved = !def.render.candidates.is_empty();
    }

    let vision = Vision {
        range: def.as_ref().map(|d| d.vision_range).unwrap_or(0.0),
        scalar: 1.0,
    };

    let entity = world
        .spawn((
            id,
            Template {
                name: template_name.clone(),
                def: def.clone(),
            },
            Allegiance {
                side: side.clone(),
                original_owner,
            },
            position,
            Facing { angle: props.angle },
            body,
            status,
            vision,
        ))
        .insert((
            weapon_state,
            AiState::default(),
            Veterancy::default(),
            Locomotion::default(),
            UpgradeOwnership::default(),
            UpgradeModuleState::default(),
            CommandSetOverride::default(),
            render,
        ))
        .id();

    world.resource_mut::<EntityIndex>().bind(id, entity);

    if let Some(parked) = props.parked_at {
        world.entity_mut(entity).insert(ParkingReservation { building: parked });
    }

    // Side bookkeeping: power contribution counts only once built.
    {
        let mut sides = world.resource_mut::<SideTable>();
        let state = sides.ensure(&side);
        if !props.under_construction {
            if let Some(def) = &def {
                apply_energy(state, def.energy_production, 1);
            }
        }
    }

    // Behavior-module states.
    if let Some(def) = def {
        if def.is_kind("DOZER") {
            world.entity_mut(entity).insert(DozerState::default());
        }
        if def.sneaky_offset > 0.0 {
            world.entity_mut(entity).insert(SneakyOffset {
                offset: def.sneaky_offset,
                persist_frames: def.attackers_miss_persist_frames,
                window_remaining: 0,
            });
        }

        let mut production: Option<ProductionState> = None;
        for behavior in &def.behaviors {
            match behavior {
                BehaviorInput::ProductionUpdate {
                    max_queue_entries,
                    quantity_modifiers,
                } => {
                    let state = production.get_or_insert_with(ProductionState::default);
                    state.max_queue = *max_queue_entries;
                    for modifier in quantity_modifiers {
                        state
                            .quantity_modifiers
                            .insert(modifier.template.clone(), modifier.count.max(1));
                    }
                }
                BehaviorInput::QueueProductionExitUpdate {
                    unit_create_point,
                    exit_delay,
                }
                | BehaviorInput::SupplyCenterProductionExitUpdate {
                    unit_create_point,
                    exit_delay,
                }
                | BehaviorInput::SpawnPointProductionExitUpdate {
                    unit_create_point,
                    exit_delay,
                } => {
                    let state = production.get_or_insert_with(ProductionState::default);
                    state.exit = Some(ExitInfo {
                        create_point: *unit_create_point,
                        exit_delay_frames: frames_from_ms(*exit_delay),
                    });
                }
                BehaviorInput::ParkingPlaceBehavior { num_rows, num_cols } => {
                    let state = production.get_or_insert_with(ProductionState::default);
                    state.parking = Some(ParkingInfo {
                        rows: *num_rows,
                        cols: *num_cols,
                        reserved: 0,
                    });
                }
                BehaviorInput::OpenContain {
                    contain_max,
                    passengers_allowed_to_fire,
                } => {
                    let mut container = ContainerState::new(ContainKind::Open, *contain_max);
                    container.passengers_allowed_to_fire = *passengers_allowed_to_fire;
                    world.entity_mut(entity).insert(container);
                }
                BehaviorInput::TransportContain {
                    contain_max,
                    passengers_allowed_to_fire,
                } => {
                    let mut container = ContainerState::new(ContainKind::Transport, *contain_max);
                    container.passengers_allowed_to_fire = *passengers_allowed_to_fire;
                    world.entity_mut(entity).insert(container);
                }
                BehaviorInput::OverlordContain {
                    contain_max,
                    passengers_allowed_to_fire,
                } => {
                    let mut container = ContainerState::new(ContainKind::Overlord, *contain_max);
                    container.passengers_allowed_to_fire = *passengers_allowed_to_fire;
                    world.entity_mut(entity).insert(container);
                }
                BehaviorInput::HelixContain {
                    contain_max,
                    passengers_allowed_to_fire,
                    payload_template_name,
                } => {
                    let mut container = ContainerState::new(ContainKind::Helix, *contain_max);
                    container.passengers_allowed_to_fire = *passengers_allowed_to_fire;
                    container.payload_templates = payload_template_name.clone();
                    world.entity_mut(entity).insert(container);
                }
                BehaviorInput::GarrisonContain { contain_max } => {
                    world
                        .entity_mut(entity)
                        .insert(ContainerState::new(ContainKind::Garrison, *contain_max));
                }
                BehaviorInput::TunnelContain { time_for_full_heal } => {
                    let mut container = ContainerState::new(ContainKind::Tunnel, u32::MAX);
                    container.heal_frames_total = frames_from_ms(*time_for_full_heal);
                    world.entity_mut(entity).insert(container);
                }
                BehaviorInput::LifetimeUpdate {
                    min_lifetime,
                    max_lifetime,
                } => {
                    let min = frames_from_ms(*min_lifetime);
                    let max = frames_from_ms(*max_lifetime).max(min);
                    let remaining = if max > min {
                        rng.stream(frame, id.0, "lifetime").gen_range(min..=max)
                    } else {
                        min
                    };
                    world.entity_mut(entity).insert(LifetimeState { remaining });
                }
                BehaviorInput::MinefieldBehavior {
                    num_virtual_mines, ..
                } => {
                    world.entity_mut(entity).insert(MinefieldState {
                        virtual_mines: *num_virtual_mines as f32,
                        scan_cooldown: 0,
                    });
                }
                BehaviorInput::DemoTrapUpdate {
                    default_proximity_mode,
                    ..
                } => {
                    world.entity_mut(entity).insert(DemoTrapState {
                        proximity_mode: *default_proximity_mode,
                        scan_cooldown: 0,
                    });
                }
                BehaviorInput::DeployStyleAIUpdate { .. } => {
                    world.entity_mut(entity).insert(DeployState::default());
                }
                BehaviorInput::PointDefenseLaserUpdate { .. } => {
                    world.entity_mut(entity).insert(PointDefenseState::default());
                }
                BehaviorInput::HordeUpdate { .. } => {
                    world.entity_mut(entity).insert(HordeState::default());
                }
                BehaviorInput::ProneUpdate { .. } => {
                    world.entity_mut(entity).insert(ProneState::default());
                }
                BehaviorInput::AutoDepositUpdate {
                    initial_capture_bonus,
                    ..
                } => {
                    world.entity_mut(entity).insert(AutoDepositState {
                        cooldown: 0,
                        initial_bonus_pending: *initial_capture_bonus > 0,
                    });
                }
                BehaviorInput::HackInternetAIUpdate { .. } => {
                    world.entity_mut(entity).insert(HackInternetState::default());
                }
                BehaviorInput::RailedTransportAIUpdate { .. } => {
                    world
                        .entity_mut(entity)
                        .insert(RailedTransportState::default());
                }
                BehaviorInput::BattlePlanUpdate { .. } => {
                    world.entity_mut(entity).insert(BattlePlanState::default());
                }
                BehaviorInput::SpecialPowerModule { .. } => {
                    if world.get::<SpecialPowerReady>(entity).is_none() {
                        world.entity_mut(entity).insert(SpecialPowerReady::default());
                    }
                }
                _ => {}
            }
        }
        if let Some(production) = production {
            world.entity_mut(entity).insert(production);
        }
    }

    Some(id)
}

/// Look up the ECS entity behind an id.
pub fn lookup(world: &World, id: ObjectId) -> Option<Entity> {
    world.resource::<EntityIndex>().entity(id)
}

/// Final removal of an entity: unbind, revert side contributions, release
/// references held elsewhere. Passengers of a dying non-tunnel container are
/// force-exited at the container position (tunnel cave-in is handled by the
/// container kernel before cleanup runs).
pub fn destroy_object(world: &mut World, id: ObjectId) {
    let Some(entity) = lookup(world, id) else {
        return;
    };

    // Revert power contribution.
    let energy = world.get::<Template>(entity).and_then(|t| {
        t.def.as_ref().map(|d| d.energy_production)
    });
    let under_construction = world
        .get::<Status>(entity)
        .map(|s| s.contains(Status::UNDER_CONSTRUCTION))
        .unwrap_or(false);
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    if let Some(energy) = energy {
        if !under_construction && !side.is_empty() {
            let mut sides = world.resource_mut::<SideTable>();
            if let Some(state) = sides.get_mut(&side) {
                apply_energy(state, energy, -1);
            }
        }
    }

    // Force-exit live passengers.
    let passengers = world
        .get::<ContainerState>(entity)
        .map(|c| c.passengers.clone())
        .unwrap_or_default();
    let exit_at = world.get::<Position>(entity).copied();
    for passenger in passengers {
        if let Some(passenger_entity) = lookup(world, passenger) {
            world.entity_mut(passenger_entity).remove::<Contained>();
            if let Some(position) = exit_at {
                if let Some(mut p) = world.get_mut::<Position>(passenger_entity) {
                    *p = position;
                }
            }
            if let Some(mut status) = world.get_mut::<Status>(passenger_entity) {
                status.remove(Status::DISABLED_HELD | Status::MASKED | Status::UNSELECTABLE);
            }
        }
    }

    // Leave our own container, if any.
    if let Some(contained) = world.get::<Contained>(entity).copied() {
        if let Some(container_entity) = lookup(world, contained.container) {
            if let Some(mut container) = world.get_mut::<ContainerState>(container_entity) {
                container.passengers.retain(|p| *p != id);
                if container.active_rider == Some(id) {
                    container.active_rider = None;
                }
            }
        }
    }

    // Release a parking slot reserved on our home building.
    if let Some(reservation) = world.get::<ParkingReservation>(entity).copied() {
        if let Some(building_entity) = lookup(world, reservation.building) {
            if let Some(mut production) = world.get_mut::<ProductionState>(building_entity) {
                if let Some(parking) = &mut production.parking {
                    parking.reserved = parking.reserved.saturating_sub(1);
                }
            }
        }
    }

    world.despawn(entity);
    world.resource_mut::<EntityIndex>().unbind(id);
}

/// Kill outright: zero health, emit the death event, mark for cleanup.
/// Used for cave-ins and other non-combat deaths.
pub fn kill_object(world: &mut World, id: ObjectId) {
    let Some(entity) = lookup(world, id) else {
        return;
    };
    let position = world
        .get::<Position>(entity)
        .map(|p| (p.x, p.y, p.z))
        .unwrap_or_default();
    if let Some(mut body) = world.get_mut::<Body>(entity) {
        body.health = 0.0;
        body.alive = false;
    }
    world.entity_mut(entity).insert(PendingDestroy);
    world
        .resource_mut::<VisualEventBus>()
        .emit(VisualEvent::death(id, position));
}

/// Ids of entities with a template name, ascending.
pub fn ids_by_template(world: &mut World, template: &str) -> Vec<ObjectId> {
    let template = crate::data::norm_name(template);
    let registry = world.resource::<DataRegistry>().clone();
    let canon = registry.build_variation_class(&template);
    let ids = world.resource::<EntityIndex>().ids();
    let mut out = Vec::new();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        if let Some(t) = world.get::<Template>(entity) {
            if registry.build_variation_class(&t.name) == canon {
                out.push(id);
            }
        }
    }
    out
}

/// Ids of entities with a template name owned by a side, ascending.
pub fn ids_by_template_and_side(world: &mut World, template: &str, side: &str) -> Vec<ObjectId> {
    let side = crate::data::norm_side(side);
    ids_by_template(world, template)
        .into_iter()
        .filter(|id| {
            lookup(world, *id)
                .and_then(|e| world.get::<Allegiance>(e))
                .map(|a| a.side == side)
                .unwrap_or(false)
        })
        .collect()
}

/// Spawn an object creation list around an origin. Multi-count entries are
/// spread evenly on the declared ring, so the layout is deterministic with
/// no RNG draw.
pub fn spawn_ocl(world: &mut World, ocl_name: &str, side: &str, x: f32, z: f32) -> Vec<ObjectId> {
    let Some(ocl) = world
        .resource::<DataRegistry>()
        .object_creation_list(ocl_name)
    else {
        return Vec::new();
    };
    let mut spawned = Vec::new();
    for entry in ocl.entries.iter() {
        for i in 0..entry.count {
            let (mut ox, mut oz) = entry.offset;
            if entry.spread > 0.0 && entry.count > 1 {
                let angle = i as f32 / entry.count as f32 * std::f32::consts::TAU;
                ox += entry.spread * angle.cos();
                oz += entry.spread * angle.sin();
            }
            if let Some(id) = spawn_object(
                world,
                &entry.template,
                side,
                x + ox,
                z + oz,
                SpawnProps::default(),
            ) {
                spawned.push(id);
            }
        }
    }
    spawned
}

fn apply_energy(state: &mut crate::sides::SideState, energy: i32, sign: i32) {
    if energy > 0 {
        state.power_production += energy * sign;
    } else if energy < 0 {
        state.power_consumption += (-energy) * sign;
    }
}
