//! Container kernel: the six contain kinds, passenger firing rules,
//! evacuate/exit gating, tunnel networks, hijack conversion.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::events::{VisualEvent, VisualEventKind, VisualEventBus};
use crate::sides::{Relationship, SideTable};
use crate::store::{kill_object, lookup};

/// Shared passenger capacity of a side's whole tunnel network.
pub const TUNNEL_NETWORK_CAPACITY: u32 = 10;

// ============================================================================
// FIRING RULES
// ============================================================================

/// May this entity fire from wherever it currently sits?
///
/// Uncontained entities always may. The immediate container decides by kind
/// and passenger class; OpenContain rules intersect along the outer chain,
/// and a subdued garrison silences everyone inside.
pub fn can_fire_from_inside(world: &World, entity: Entity) -> bool {
    let Some(contained) = world.get::<Contained>(entity) else {
        return true;
    };
    let Some(container_entity) = world
        .resource::<EntityIndex>()
        .entity(contained.container)
    else {
        return false;
    };
    let Some(container) = world.get::<ContainerState>(container_entity) else {
        return false;
    };

    let my_id = world.get::<ObjectId>(entity).copied();
    let is_infantry = world
        .get::<Template>(entity)
        .map(|t| t.is_kind("INFANTRY"))
        .unwrap_or(false);
    let is_vehicle = world
        .get::<Template>(entity)
        .map(|t| t.is_kind("VEHICLE"))
        .unwrap_or(false);
    let template_name = world
        .get::<Template>(entity)
        .map(|t| t.name.clone())
        .unwrap_or_default();

    let immediate = match container.kind {
        ContainKind::Open => container.allows_fire(),
        ContainKind::Transport => {
            if is_vehicle {
                false
            } else {
                container.allows_fire()
            }
        }
        ContainKind::Overlord => {
            if is_vehicle {
                false
            } else {
                container.allows_fire()
            }
        }
        ContainKind::Helix => {
            if container.payload_templates.contains(&template_name) {
                // Whitelisted portable rider: only the active one fires.
                container.active_rider == my_id
            } else if is_vehicle {
                false
            } else {
                container.allows_fire()
            }
        }
        ContainKind::Garrison => {
            // Infantry fire regardless of the flag, unless subdued.
            let subdued = world
                .get::<Status>(container_entity)
                .map(|s| s.contains(Status::DISABLED_SUBDUED))
                .unwrap_or(false);
            is_infantry && !subdued
        }
        ContainKind::Tunnel => false,
    };
    if !immediate {
        return false;
    }

    // Outer chain: every OpenContain above must also allow.
    let mut cursor = container_entity;
    while let Some(outer_link) = world.get::<Contained>(cursor) {
        let Some(outer_entity) = world
            .resource::<EntityIndex>()
            .entity(outer_link.container)
        else {
            return false;
        };
        let Some(outer) = world.get::<ContainerState>(outer_entity) else {
            return false;
        };
        match outer.kind {
            ContainKind::Open => {
                if !outer.allows_fire() {
                    return false;
                }
            }
            ContainKind::Garrison => {
                let subdued = world
                    .get::<Status>(outer_entity)
                    .map(|s| s.contains(Status::DISABLED_SUBDUED))
                    .unwrap_or(false);
                if subdued {
                    return false;
                }
            }
            _ => return false,
        }
        cursor = outer_entity;
    }
    true
}

// ============================================================================
// ENTER / EXIT
// ============================================================================

fn tunnel_network_load(world: &mut World, side: &str) -> u32 {
    let ids = world.resource::<EntityIndex>().ids();
    let mut load = 0;
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let is_side_tunnel = world
            .get::<ContainerState>(entity)
            .map(|c| c.kind == ContainKind::Tunnel)
            .unwrap_or(false)
            && world
                .get::<Allegiance>(entity)
                .map(|a| a.side == side)
                .unwrap_or(false);
        if is_side_tunnel {
            load += world
                .get::<ContainerState>(entity)
                .map(|c| c.passengers.len() as u32)
                .unwrap_or(0);
        }
    }
    load
}

/// Put a rider inside a container. Silently rejected when illegal.
pub fn enter(world: &mut World, rider: ObjectId, container_id: ObjectId) -> bool {
    let Some(rider_entity) = lookup(world, rider) else {
        return false;
    };
    let Some(container_entity) = lookup(world, container_id) else {
        return false;
    };
    if rider == container_id || world.get::<Contained>(rider_entity).is_some() {
        return false;
    }
    let rider_alive = world
        .get::<Body>(rider_entity)
        .map(|b| b.alive)
        .unwrap_or(false);
    let container_alive = world
        .get::<Body>(container_entity)
        .map(|b| b.alive)
        .unwrap_or(false);
    if !rider_alive || !container_alive {
        return false;
    }

    let Some(container) = world.get::<ContainerState>(container_entity) else {
        return false;
    };
    let kind = container.kind;
    let rider_side = world
        .get::<Allegiance>(rider_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let container_side = world
        .get::<Allegiance>(container_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let relationship = world
        .resource::<SideTable>()
        .relationship(&rider_side, &container_side);

    match kind {
        ContainKind::Tunnel => {
            if relationship != Relationship::Allies {
                return false;
            }
            if tunnel_network_load(world, &rider_side) >= TUNNEL_NETWORK_CAPACITY {
                return false;
            }
        }
        ContainKind::Garrison => {
            // Hostile-held buildings cannot be walked into.
            if relationship == Relationship::Enemies {
                let occupied = world
                    .get::<ContainerState>(container_entity)
                    .map(|c| !c.passengers.is_empty())
                    .unwrap_or(false);
                if occupied {
                    return false;
                }
            }
            let Some(container) = world.get::<ContainerState>(container_entity) else {
                return false;
            };
            if !container.has_room() {
                return false;
            }
        }
        _ => {
            if relationship != Relationship::Allies {
                return false;
            }
            let Some(container) = world.get::<ContainerState>(container_entity) else {
                return false;
            };
            if !container.has_room() {
                return false;
            }
        }
    }

    let rider_template = world
        .get::<Template>(rider_entity)
        .map(|t| t.name.clone())
        .unwrap_or_default();
    {
        let Some(mut container) = world.get_mut::<ContainerState>(container_entity) else {
            return false;
        };
        container.passengers.push(rider);
        if container.kind == ContainKind::Helix
            && container.payload_templates.contains(&rider_template)
            && container.active_rider.is_none()
        {
            container.active_rider = Some(rider);
        }
    }

    world
        .entity_mut(rider_entity)
        .insert(Contained { container: container_id });
    if let Some(mut locomotion) = world.get_mut::<Locomotion>(rider_entity) {
        locomotion.clear_path();
    }
    if let Some(mut status) = world.get_mut::<Status>(rider_entity) {
        match kind {
            ContainKind::Tunnel => {
                status.insert(Status::DISABLED_HELD | Status::MASKED | Status::UNSELECTABLE);
            }
            ContainKind::Transport | ContainKind::Overlord | ContainKind::Helix => {
                status.insert(Status::MASKED);
            }
            ContainKind::Open | ContainKind::Garrison => {}
        }
    }
    true
}

fn release_passenger(world: &mut World, container_entity: Entity, passenger: ObjectId) {
    let Some(passenger_entity) = lookup(world, passenger) else {
        return;
    };
    let exit_position = world.get::<Position>(container_entity).copied();
    world.entity_mut(passenger_entity).remove::<Contained>();
    if let Some(position) = exit_position {
        if let Some(mut p) = world.get_mut::<Position>(passenger_entity) {
            *p = position;
        }
    }
    if let Some(mut status) = world.get_mut::<Status>(passenger_entity) {
        status.remove(Status::DISABLED_HELD | Status::MASKED | Status::UNSELECTABLE);
    }
}

/// Evacuate everyone. A subdued container refuses.
pub fn evacuate(world: &mut World, container_id: ObjectId) -> bool {
    let Some(container_entity) = lookup(world, container_id) else {
        return false;
    };
    let subdued = world
        .get::<Status>(container_entity)
        .map(|s| s.contains(Status::DISABLED_SUBDUED))
        .unwrap_or(false);
    if subdued {
        return false;
    }
    // Railed transports refuse to unload mid-traversal.
    if let Some(rail) = world.get::<RailedTransportState>(container_entity) {
        if rail.in_transit {
            return false;
        }
    }
    let passengers = {
        let Some(mut container) = world.get_mut::<ContainerState>(container_entity) else {
            return false;
        };
        container.active_rider = None;
        std::mem::take(&mut container.passengers)
    };
    for passenger in passengers {
        release_passenger(world, container_entity, passenger);
    }
    true
}

/// Let one passenger out. A subdued container refuses.
pub fn exit_one(world: &mut World, container_id: ObjectId, passenger: ObjectId) -> bool {
    let Some(container_entity) = lookup(world, container_id) else {
        return false;
    };
    let subdued = world
        .get::<Status>(container_entity)
        .map(|s| s.contains(Status::DISABLED_SUBDUED))
        .unwrap_or(false);
    if subdued {
        return false;
    }
    let removed = {
        let Some(mut container) = world.get_mut::<ContainerState>(container_entity) else {
            return false;
        };
        let before = container.passengers.len();
        container.passengers.retain(|p| *p != passenger);
        if container.active_rider == Some(passenger) {
            container.active_rider = None;
        }
        before != container.passengers.len()
    };
    if removed {
        release_passenger(world, container_entity, passenger);
    }
    removed
}

/// Drop a transport's passengers into a garrisonable building.
pub fn combat_drop(world: &mut World, transport_id: ObjectId, building_id: ObjectId) -> bool {
    let Some(transport_entity) = lookup(world, transport_id) else {
        return false;
    };
    let passengers = world
        .get::<ContainerState>(transport_entity)
        .map(|c| c.passengers.clone())
        .unwrap_or_default();
    if passengers.is_empty() {
        return false;
    }

    // Clear hostile occupants first; rappelling troops take the building.
    let transport_side = world
        .get::<Allegiance>(transport_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    if let Some(building_entity) = lookup(world, building_id) {
        let occupants = world
            .get::<ContainerState>(building_entity)
            .map(|c| c.passengers.clone())
            .unwrap_or_default();
        for occupant in occupants {
            let hostile = lookup(world, occupant)
                .and_then(|e| world.get::<Allegiance>(e))
                .map(|a| {
                    world
                        .resource::<SideTable>()
                        .relationship(&transport_side, &a.side)
                        == Relationship::Enemies
                })
                .unwrap_or(false);
            if hostile {
                exit_one_forced(world, building_id, occupant);
                kill_object(world, occupant);
            }
        }
    }

    let mut dropped = false;
    for passenger in passengers {
        if exit_one_forced(world, transport_id, passenger) && enter(world, passenger, building_id) {
            dropped = true;
        }
    }
    dropped
}

fn exit_one_forced(world: &mut World, container_id: ObjectId, passenger: ObjectId) -> bool {
    let Some(container_entity) = lookup(world, container_id) else {
        return false;
    };
    let removed = {
        let Some(mut container) = world.get_mut::<ContainerState>(container_entity) else {
            return false;
        };
        let before = container.passengers.len();
        container.passengers.retain(|p| *p != passenger);
        if container.active_rider == Some(passenger) {
            container.active_rider = None;
        }
        before != container.passengers.len()
    };
    if removed {
        release_passenger(world, container_entity, passenger);
    }
    removed
}

/// Hijack: the hijacker is consumed, the vehicle changes side.
pub fn hijack(world: &mut World, hijacker: ObjectId, target: ObjectId) -> bool {
    let Some(hijacker_entity) = lookup(world, hijacker) else {
        return false;
    };
    let Some(target_entity) = lookup(world, target) else {
        return false;
    };
    let is_vehicle = world
        .get::<Template>(target_entity)
        .map(|t| t.is_kind("VEHICLE"))
        .unwrap_or(false);
    let target_alive = world
        .get::<Body>(target_entity)
        .map(|b| b.alive)
        .unwrap_or(false);
    if !is_vehicle || !target_alive {
        return false;
    }
    let new_side = world
        .get::<Allegiance>(hijacker_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    crate::systems::upgrades::capture_transfer(world, target, &new_side);
    if let Some(mut status) = world.get_mut::<Status>(target_entity) {
        status.insert(Status::HIJACKED);
    }
    kill_object(world, hijacker);
    true
}

// ============================================================================
// DEATH / PER-FRAME
// ============================================================================

/// Container death. Tunnels reassign to a surviving sibling or cave in;
/// every other kind spills its passengers.
pub fn handle_container_death(world: &mut World, container_id: ObjectId) {
    let Some(container_entity) = lookup(world, container_id) else {
        return;
    };
    let Some(container) = world.get::<ContainerState>(container_entity) else {
        return;
    };
    let kind = container.kind;
    let passengers = container.passengers.clone();
    if passengers.is_empty() {
        return;
    }
    let side = world
        .get::<Allegiance>(container_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    if kind != ContainKind::Tunnel {
        let to_release = {
            let Some(mut container) = world.get_mut::<ContainerState>(container_entity) else {
                return;
            };
            container.active_rider = None;
            std::mem::take(&mut container.passengers)
        };
        for passenger in to_release {
            release_passenger(world, container_entity, passenger);
        }
        return;
    }

    // Find the surviving sibling tunnel with the lowest id.
    let ids = world.resource::<EntityIndex>().ids();
    let sibling = ids.into_iter().find(|id| {
        *id != container_id
            && lookup(world, *id)
                .map(|e| {
                    world
                        .get::<Body>(e)
                        .map(|b| b.alive)
                        .unwrap_or(false)
                        && world
                            .get::<ContainerState>(e)
                            .map(|c| c.kind == ContainKind::Tunnel)
                            .unwrap_or(false)
                        && world
                            .get::<Allegiance>(e)
                            .map(|a| a.side == side)
                            .unwrap_or(false)
                })
                .unwrap_or(false)
    });

    if let Some(mut container) = world.get_mut::<ContainerState>(container_entity) {
        container.passengers.clear();
    }

    match sibling {
        Some(sibling_id) => {
            let Some(sibling_entity) = lookup(world, sibling_id) else {
                return;
            };
            for passenger in passengers {
                if let Some(mut sibling_container) =
                    world.get_mut::<ContainerState>(sibling_entity)
                {
                    sibling_container.passengers.push(passenger);
                }
                if let Some(passenger_entity) = lookup(world, passenger) {
                    world
                        .entity_mut(passenger_entity)
                        .insert(Contained { container: sibling_id });
                }
            }
        }
        None => {
            // Last tunnel: cave-in kills everyone inside.
            for passenger in passengers {
                if let Some(passenger_entity) = lookup(world, passenger) {
                    world.entity_mut(passenger_entity).remove::<Contained>();
                }
                world
                    .resource_mut::<VisualEventBus>()
                    .emit(VisualEvent::simple(VisualEventKind::CaveIn, passenger));
                kill_object(world, passenger);
            }
        }
    }
}

/// Frame phase: tunnel healing and Helix active-rider upkeep.
pub fn container_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let Some(container) = world.get::<ContainerState>(entity) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }

        match container.kind {
            ContainKind::Tunnel => {
                let heal_frames = container.heal_frames_total;
                if heal_frames == 0 {
                    continue;
                }
                let passengers = container.passengers.clone();
                for passenger in passengers {
                    let Some(passenger_entity) = lookup(world, passenger) else {
                        continue;
                    };
                    if let Some(mut body) = world.get_mut::<Body>(passenger_entity) {
                        let rate = body.max_health / heal_frames as f32;
                        body.heal(rate);
                    }
                }
            }
            ContainKind::Helix => {
                let needs_new_rider = container.active_rider.is_none()
                    || container
                        .active_rider
                        .map(|r| lookup(world, r).is_none())
                        .unwrap_or(true);
                if needs_new_rider {
                    let passengers = container.passengers.clone();
                    let payloads = container.payload_templates.clone();
                    let replacement = passengers.into_iter().find(|p| {
                        lookup(world, *p)
                            .and_then(|e| world.get::<Template>(e))
                            .map(|t| payloads.contains(&t.name))
                            .unwrap_or(false)
                    });
                    if let Some(mut container) = world.get_mut::<ContainerState>(entity) {
                        container.active_rider = replacement;
                    }
                }
            }
            _ => {}
        }
    }
}
