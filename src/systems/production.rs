//! Production kernel: FIFO queues, validation gates, quantity expansion,
//! parking reservations, dozer construction, repair and sell.
//!
//! Credits are debited at enqueue time and refunded exactly once on cancel
//! or producer death. Only the front queue entry makes progress each frame.

use bevy_ecs::prelude::*;

use crate::components::*;
use crate::data::{ButtonCommand, DataRegistry, UpgradeType};
use crate::events::{VisualEvent, VisualEventKind, VisualEventBus};
use crate::sides::{PlayerType, Relationship, SideTable};
use crate::store::{lookup, spawn_object, SpawnProps};

/// How close a dozer must stand to drive construction or repair.
const DOZER_WORK_RANGE: f32 = 30.0;
/// Repair rate as a fraction of max health per frame.
const REPAIR_FRACTION_PER_FRAME: f32 = 0.01;

// ============================================================================
// QUEUE VALIDATION
// ============================================================================

fn producer_can_accept(world: &World, entity: Entity) -> bool {
    let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
    let status = world.get::<Status>(entity).copied().unwrap_or_default();
    alive
        && !status.contains(Status::SCRIPT_DISABLED)
        && !status.contains(Status::UNDER_CONSTRUCTION)
}

fn command_set_exposes(
    world: &World,
    entity: Entity,
    want: ButtonCommand,
    object: Option<&str>,
    upgrade: Option<&str>,
) -> bool {
    let registry = world.resource::<DataRegistry>();
    let Some(set_name) = crate::systems::upgrades::active_command_set(world, entity) else {
        return false;
    };
    let Some(set) = registry.command_set(&set_name) else {
        return false;
    };
    for button_name in set.buttons.values() {
        let Some(button) = registry.command_button(button_name) else {
            continue;
        };
        if button.command != want {
            continue;
        }
        match want {
            ButtonCommand::UnitBuild | ButtonCommand::DozerConstruct => {
                let Some(object) = object else {
                    return true;
                };
                if let Some(button_object) = &button.object {
                    if registry.build_variation_class(button_object)
                        == registry.build_variation_class(object)
                    {
                        return true;
                    }
                }
            }
            ButtonCommand::PlayerUpgrade | ButtonCommand::ObjectUpgrade => {
                let Some(upgrade) = upgrade else {
                    return true;
                };
                if button.upgrade.as_deref() == Some(upgrade) {
                    return true;
                }
            }
            _ => return true,
        }
    }
    false
}

/// Objects alive (or queued) counted against MaxSimultaneousOfType, across
/// the build-variation class and the optional link key.
fn simultaneous_count(world: &mut World, side: &str, template: &str) -> u32 {
    let registry = world.resource::<DataRegistry>().clone();
    let canon = registry.build_variation_class(template);
    let link_key = registry
        .object_def(template)
        .and_then(|d| d.max_simultaneous_link_key.clone());

    let matches = |name: &str| -> bool {
        if registry.build_variation_class(name) == canon {
            return true;
        }
        if let (Some(link_key), Some(def)) = (&link_key, registry.object_def(name)) {
            return def.max_simultaneous_link_key.as_deref() == Some(link_key);
        }
        false
    };

    let ids = world.resource::<EntityIndex>().ids();
    let mut count = 0;
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let on_side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side == side)
            .unwrap_or(false);
        if !on_side {
            continue;
        }
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if alive {
            if let Some(t) = world.get::<Template>(entity) {
                if matches(&t.name) {
                    count += 1;
                }
            }
        }
        if let Some(production) = world.get::<ProductionState>(entity) {
            for entry in &production.queue {
                if let ProductionKind::Unit { template } = &entry.kind {
                    if matches(template) {
                        count += entry.quantity_total - entry.quantity_produced;
                    }
                }
            }
        }
    }
    count
}

/// Prerequisites: AND across blocks, OR within. Object prerequisites are
/// bypassed by `Buildable = Ignore_Prerequisites`; science ones never are.
fn prerequisites_met(world: &mut World, side: &str, template: &str) -> bool {
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.object_def(template) else {
        return false;
    };
    let ignore_objects = def.buildable == crate::data::Buildable::IgnorePrerequisites;
    for block in &def.prerequisites {
        let mut ok = block.objects.is_empty() && block.sciences.is_empty();
        if !ignore_objects {
            for object in &block.objects {
                if !crate::store::ids_by_template_and_side(world, object, side).is_empty() {
                    ok = true;
                    break;
                }
            }
        } else if !block.objects.is_empty() {
            ok = true;
        }
        if !ok {
            for science in &block.sciences {
                let has = world
                    .resource::<SideTable>()
                    .get(side)
                    .map(|s| s.has_science(science))
                    .unwrap_or(false);
                if has {
                    ok = true;
                    break;
                }
            }
        }
        if !ok {
            return false;
        }
    }
    true
}

/// Every gate except the producer-local ones; shared with dozer construct.
fn template_buildable_by(world: &mut World, side: &str, template: &str) -> bool {
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.object_def(template) else {
        return false;
    };
    match def.buildable {
        crate::data::Buildable::No => return false,
        crate::data::Buildable::OnlyByAi => {
            let is_ai = world
                .resource::<SideTable>()
                .get(side)
                .map(|s| s.player_type == PlayerType::Computer)
                .unwrap_or(false);
            if !is_ai {
                return false;
            }
        }
        _ => {}
    }
    if !prerequisites_met(world, side, template) {
        return false;
    }
    if let Some(limit) = def.max_simultaneous {
        if simultaneous_count(world, side, template) >= limit {
            return false;
        }
    }
    true
}

// ============================================================================
// QUEUE OPERATIONS
// ============================================================================

pub fn try_queue_unit(world: &mut World, producer: ObjectId, template: &str) -> bool {
    let template = crate::data::norm_name(template);
    let Some(entity) = lookup(world, producer) else {
        return false;
    };
    if !producer_can_accept(world, entity) {
        return false;
    }
    let Some(production) = world.get::<ProductionState>(entity) else {
        return false;
    };
    if production.queue.len() as u32 >= production.max_queue.max(1) {
        return false;
    }
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.object_def(&template) else {
        return false;
    };
    if !command_set_exposes(world, entity, ButtonCommand::UnitBuild, Some(&template), None) {
        return false;
    }
    if !template_buildable_by(world, &side, &template) {
        return false;
    }

    // Parking gate for aircraft not produced at a helipad.
    let needs_parking = def.is_kind("AIRCRAFT") && !def.is_kind("PRODUCED_AT_HELIPAD");
    if needs_parking {
        let available = world
            .get::<ProductionState>(entity)
            .and_then(|p| p.parking)
            .map(|p| p.available())
            .unwrap_or(false);
        if !available {
            return false;
        }
    }

    // Cost gate, with the side's cost modifiers applied.
    let cost = {
        let sides = world.resource::<SideTable>();
        let multiplier = sides
            .get(&side)
            .map(|s| s.cost_multiplier(&def.kind_of))
            .unwrap_or(1.0);
        (def.build_cost as f32 * multiplier).round() as i64
    };
    {
        let mut sides = world.resource_mut::<SideTable>();
        let Some(state) = sides.get_mut(&side) else {
            return false;
        };
        if !state.try_debit(cost) {
            return false;
        }
    }

    let Some(mut production) = world.get_mut::<ProductionState>(entity) else {
        return false;
    };
    let quantity = production
        .quantity_modifiers
        .get(&registry.build_variation_class(&template))
        .or_else(|| production.quantity_modifiers.get(&template))
        .copied()
        .unwrap_or(1);
    production.next_production_id += 1;
    let production_id = production.next_production_id;
    production.queue.push(ProductionEntry {
        production_id,
        kind: ProductionKind::Unit {
            template: template.clone(),
        },
        build_frames: def.build_time_frames.max(1),
        elapsed_frames: 0,
        cost,
        quantity_total: quantity,
        quantity_produced: 0,
        exit_wait: 0,
        reserved_parking: needs_parking,
    });
    if needs_parking {
        if let Some(parking) = &mut production.parking {
            parking.reserved += 1;
        }
    }
    true
}

pub fn cancel_unit(world: &mut World, producer: ObjectId, production_id: u32) -> bool {
    let Some(entity) = lookup(world, producer) else {
        return false;
    };
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let removed = {
        let Some(mut production) = world.get_mut::<ProductionState>(entity) else {
            return false;
        };
        let Some(slot) = production
            .queue
            .iter()
            .position(|e| e.production_id == production_id)
        else {
            return false;
        };
        let entry = production.queue.remove(slot);
        if entry.reserved_parking {
            if let Some(parking) = &mut production.parking {
                parking.reserved = parking.reserved.saturating_sub(1);
            }
        }
        entry
    };
    let mut sides = world.resource_mut::<SideTable>();
    if let Some(state) = sides.get_mut(&side) {
        state.add_credits(removed.cost);
    }
    true
}

pub fn try_queue_upgrade(world: &mut World, producer: ObjectId, upgrade: &str) -> bool {
    let upgrade = crate::data::norm_name(upgrade);
    let Some(entity) = lookup(world, producer) else {
        return false;
    };
    if !producer_can_accept(world, entity) {
        return false;
    }
    let Some(production) = world.get::<ProductionState>(entity) else {
        return false;
    };
    if production.queue.len() as u32 >= production.max_queue.max(1) {
        return false;
    }
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.upgrade_def(&upgrade) else {
        return false;
    };
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    let exposes_player =
        command_set_exposes(world, entity, ButtonCommand::PlayerUpgrade, None, Some(&upgrade));
    let exposes_object =
        command_set_exposes(world, entity, ButtonCommand::ObjectUpgrade, None, Some(&upgrade));
    if !(exposes_player || exposes_object) {
        return false;
    }

    match def.upgrade_type {
        UpgradeType::Player => {
            let state_ok = world
                .resource::<SideTable>()
                .get(&side)
                .map(|s| {
                    !s.upgrades_completed.contains(&upgrade)
                        && !s.upgrades_in_production.contains(&upgrade)
                })
                .unwrap_or(false);
            if !state_ok {
                return false;
            }
        }
        UpgradeType::Object => {
            let already = world
                .get::<UpgradeOwnership>(entity)
                .map(|u| u.0.contains(&upgrade))
                .unwrap_or(false);
            let queued = world
                .get::<ProductionState>(entity)
                .map(|p| {
                    p.queue.iter().any(|e| {
                        matches!(&e.kind, ProductionKind::Upgrade { upgrade: u } if *u == upgrade)
                    })
                })
                .unwrap_or(false);
            if already || queued {
                return false;
            }
        }
    }

    {
        let mut sides = world.resource_mut::<SideTable>();
        let Some(state) = sides.get_mut(&side) else {
            return false;
        };
        if !state.try_debit(def.build_cost) {
            return false;
        }
        if def.upgrade_type == UpgradeType::Player {
            state.upgrades_in_production.insert(upgrade.clone());
        }
    }

    let Some(mut production) = world.get_mut::<ProductionState>(entity) else {
        return false;
    };
    production.next_production_id += 1;
    let production_id = production.next_production_id;
    production.queue.push(ProductionEntry {
        production_id,
        kind: ProductionKind::Upgrade {
            upgrade: upgrade.clone(),
        },
        build_frames: def.build_time_frames.max(1),
        elapsed_frames: 0,
        cost: def.build_cost,
        quantity_total: 1,
        quantity_produced: 0,
        exit_wait: 0,
        reserved_parking: false,
    });
    true
}

pub fn cancel_upgrade(world: &mut World, producer: ObjectId, upgrade: &str) -> bool {
    let upgrade = crate::data::norm_name(upgrade);
    let Some(entity) = lookup(world, producer) else {
        return false;
    };
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let removed = {
        let Some(mut production) = world.get_mut::<ProductionState>(entity) else {
            return false;
        };
        let Some(slot) = production.queue.iter().position(|e| {
            matches!(&e.kind, ProductionKind::Upgrade { upgrade: u } if *u == upgrade)
        }) else {
            return false;
        };
        production.queue.remove(slot)
    };
    let mut sides = world.resource_mut::<SideTable>();
    if let Some(state) = sides.get_mut(&side) {
        state.add_credits(removed.cost);
        state.upgrades_in_production.remove(&upgrade);
    }
    true
}

// ============================================================================
// FRAME PHASE
// ============================================================================

pub fn production_phase(world: &mut World) {
    let ids = world.resource::<EntityIndex>().ids();
    for id in ids {
        let Some(entity) = lookup(world, id) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        if !alive {
            continue;
        }

        advance_queue(world, id, entity);
        drive_construction(world, id, entity);
        tick_sell(world, id, entity);
    }
}

fn advance_queue(world: &mut World, producer: ObjectId, entity: Entity) {
    let status = world.get::<Status>(entity).copied().unwrap_or_default();
    if status.contains(Status::UNDER_CONSTRUCTION) || status.is_disabled() {
        return;
    }

    enum Completion {
        None,
        SpawnUnit { template: String },
        FinishUpgrade { upgrade: String },
    }

    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();

    let completion = {
        let Some(mut production) = world.get_mut::<ProductionState>(entity) else {
            return;
        };
        let exit_delay = production
            .exit
            .map(|e| e.exit_delay_frames)
            .unwrap_or(0);
        let Some(front) = production.queue.first_mut() else {
            return;
        };

        if front.elapsed_frames < front.build_frames {
            front.elapsed_frames += 1;
            if front.elapsed_frames < front.build_frames {
                Completion::None
            } else {
                // Build finished this frame: the first unit exits now.
                match front.kind.clone() {
                    ProductionKind::Unit { template } => {
                        front.quantity_produced += 1;
                        front.exit_wait = exit_delay;
                        if front.quantity_produced >= front.quantity_total {
                            production.queue.remove(0);
                        }
                        Completion::SpawnUnit { template }
                    }
                    ProductionKind::Upgrade { upgrade } => {
                        production.queue.remove(0);
                        Completion::FinishUpgrade { upgrade }
                    }
                }
            }
        } else {
            // Quantity-expanded follow-ups wait out the exit delay.
            match front.kind.clone() {
                ProductionKind::Unit { template } => {
                    if front.exit_wait > 1 {
                        front.exit_wait -= 1;
                        Completion::None
                    } else {
                        front.quantity_produced += 1;
                        front.exit_wait = exit_delay;
                        if front.quantity_produced >= front.quantity_total {
                            production.queue.remove(0);
                        }
                        Completion::SpawnUnit { template }
                    }
                }
                ProductionKind::Upgrade { upgrade } => {
                    production.queue.remove(0);
                    Completion::FinishUpgrade { upgrade }
                }
            }
        }
    };

    match completion {
        Completion::None => {}
        Completion::SpawnUnit { template } => {
            spawn_produced_unit(world, producer, entity, &side, &template);
        }
        Completion::FinishUpgrade { upgrade } => {
            let registry = world.resource::<DataRegistry>().clone();
            let upgrade_type = registry
                .upgrade_def(&upgrade)
                .map(|u| u.upgrade_type)
                .unwrap_or(UpgradeType::Player);
            match upgrade_type {
                UpgradeType::Player => {
                    crate::systems::upgrades::apply_player_upgrade(world, &side, &upgrade);
                }
                UpgradeType::Object => {
                    crate::systems::upgrades::apply_object_upgrade(world, producer, &upgrade);
                }
            }
            world
                .resource_mut::<VisualEventBus>()
                .emit(VisualEvent::simple(VisualEventKind::BuildComplete, producer));
        }
    }
}

fn spawn_produced_unit(
    world: &mut World,
    producer: ObjectId,
    entity: Entity,
    side: &str,
    template: &str,
) {
    let producer_position = world.get::<Position>(entity).copied().unwrap_or_default();
    let (create_point, rally, has_parking) = {
        let production = world.get::<ProductionState>(entity);
        (
            production
                .and_then(|p| p.exit)
                .map(|e| e.create_point)
                .unwrap_or((0.0, 0.0, 0.0)),
            production.and_then(|p| p.rally_point),
            production.and_then(|p| p.parking).is_some(),
        )
    };
    let registry = world.resource::<DataRegistry>().clone();
    let parked = registry
        .object_def(template)
        .map(|d| d.is_kind("AIRCRAFT") && !d.is_kind("PRODUCED_AT_HELIPAD") && has_parking)
        .unwrap_or(false);

    let spawn_props = SpawnProps {
        parked_at: parked.then_some(producer),
        ..Default::default()
    };
    let spawned = spawn_object(
        world,
        template,
        side,
        producer_position.x + create_point.0,
        producer_position.z + create_point.2,
        spawn_props,
    );
    if let Some(spawned) = spawned {
        world
            .resource_mut::<VisualEventBus>()
            .emit(VisualEvent::simple(VisualEventKind::BuildComplete, spawned));
        if let Some((rx, rz)) = rally {
            crate::systems::movement::order_move(world, spawned, rx, rz);
        }
    }
    // The reservation made at enqueue time now belongs to the spawned
    // aircraft's ParkingReservation; it releases when the aircraft dies.
}

// ============================================================================
// DOZER CONSTRUCTION
// ============================================================================

pub fn construct_building(
    world: &mut World,
    dozer: ObjectId,
    template: &str,
    x: f32,
    z: f32,
    angle: f32,
) -> bool {
    let template = crate::data::norm_name(template);
    let Some(dozer_entity) = lookup(world, dozer) else {
        return false;
    };
    if world.get::<DozerState>(dozer_entity).is_none() {
        return false;
    }
    let alive = world
        .get::<Body>(dozer_entity)
        .map(|b| b.alive)
        .unwrap_or(false);
    if !alive {
        return false;
    }
    let side = world
        .get::<Allegiance>(dozer_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    if !command_set_exposes(
        world,
        dozer_entity,
        ButtonCommand::DozerConstruct,
        Some(&template),
        None,
    ) {
        return false;
    }
    if !template_buildable_by(world, &side, &template) {
        return false;
    }
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.object_def(&template) else {
        return false;
    };

    // Footprint blockers, checked before any money moves.
    if !clear_footprint(world, &side, x, z, def.geometry.major_radius) {
        return false;
    }

    let cost = {
        let sides = world.resource::<SideTable>();
        let multiplier = sides
            .get(&side)
            .map(|s| s.cost_multiplier(&def.kind_of))
            .unwrap_or(1.0);
        (def.build_cost as f32 * multiplier).round() as i64
    };
    {
        let mut sides = world.resource_mut::<SideTable>();
        let Some(state) = sides.get_mut(&side) else {
            return false;
        };
        if !state.try_debit(cost) {
            return false;
        }
    }

    let Some(building) = spawn_object(
        world,
        &template,
        &side,
        x,
        z,
        SpawnProps {
            angle,
            under_construction: true,
            ..Default::default()
        },
    ) else {
        return false;
    };
    let Some(building_entity) = lookup(world, building) else {
        return false;
    };
    world.entity_mut(building_entity).insert(ConstructionState {
        percent: 0.0,
        builder: Some(dozer),
        build_frames_total: def.build_time_frames.max(1),
    });
    if let Some(mut dozer_state) = world.get_mut::<DozerState>(dozer_entity) {
        dozer_state.construct_target = Some(building);
    }
    crate::systems::movement::order_move(world, dozer, x, z);
    true
}

/// Line build: place one building per footprint-width tile from start to
/// end, skipping blocked tiles. Returns how many got placed.
pub fn construct_line(
    world: &mut World,
    dozer: ObjectId,
    template: &str,
    start: (f32, f32),
    end: (f32, f32),
) -> u32 {
    let registry = world.resource::<DataRegistry>().clone();
    let Some(def) = registry.object_def(template) else {
        return 0;
    };
    let spacing = (def.geometry.major_radius * 2.0).max(1.0);
    let dx = end.0 - start.0;
    let dz = end.1 - start.1;
    let length = (dx * dx + dz * dz).sqrt();
    let steps = (length / spacing).floor() as u32;
    let mut placed = 0;
    for i in 0..=steps {
        let t = if steps == 0 { 0.0 } else { i as f32 / steps as f32 };
        let x = start.0 + dx * t;
        let z = start.1 + dz * t;
        if construct_building(world, dozer, template, x, z, 0.0) {
            placed += 1;
        }
    }
    placed
}

/// Shrubbery under the footprint is flattened, allied mobiles are nudged
/// aside, anything immobile or hostile fails the command.
fn clear_footprint(world: &mut World, side: &str, x: f32, z: f32, radius: f32) -> bool {
    crate::spatial::rebuild_spatial_grid(world);
    let blockers = world
        .resource::<crate::spatial::SpatialGrid>()
        .query_radius(x, z, radius.max(1.0));
    let mut to_clear = Vec::new();
    let mut to_move = Vec::new();
    for entry in blockers {
        let Some(entity) = lookup(world, entry.id) else {
            continue;
        };
        let Some(template) = world.get::<Template>(entity) else {
            continue;
        };
        if template.is_kind("SHRUBBERY") {
            to_clear.push(entry.id);
            continue;
        }
        let mobile = template
            .def
            .as_ref()
            .map(|d| d.speed > 0.0 || !d.locomotor_sets.is_empty())
            .unwrap_or(false);
        let their_side = world
            .get::<Allegiance>(entity)
            .map(|a| a.side.clone())
            .unwrap_or_default();
        let allied = world
            .resource::<SideTable>()
            .relationship(side, &their_side)
            == Relationship::Allies;
        if mobile && allied {
            to_move.push((entry.id, entry.x, entry.z));
        } else {
            return false;
        }
    }
    for id in to_clear {
        crate::store::kill_object(world, id);
    }
    for (id, bx, bz) in to_move {
        let away_x = bx + (bx - x).signum() * (radius + 10.0);
        let away_z = bz + (bz - z).signum() * (radius + 10.0);
        crate::systems::movement::order_move(world, id, away_x, away_z);
    }
    true
}

pub fn cancel_dozer_construction(world: &mut World, dozer: ObjectId) -> bool {
    let Some(dozer_entity) = lookup(world, dozer) else {
        return false;
    };
    let Some(target) = world
        .get::<DozerState>(dozer_entity)
        .and_then(|d| d.construct_target)
    else {
        return false;
    };
    let Some(building_entity) = lookup(world, target) else {
        return false;
    };
    let under_construction = world
        .get::<Status>(building_entity)
        .map(|s| s.contains(Status::UNDER_CONSTRUCTION))
        .unwrap_or(false);
    if !under_construction {
        return false;
    }
    let side = world
        .get::<Allegiance>(building_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let cost = world
        .get::<Template>(building_entity)
        .and_then(|t| t.def.as_ref().map(|d| d.build_cost))
        .unwrap_or(0);
    {
        let mut sides = world.resource_mut::<SideTable>();
        if let Some(state) = sides.get_mut(&side) {
            state.add_credits(cost);
        }
    }
    if let Some(mut dozer_state) = world.get_mut::<DozerState>(dozer_entity) {
        dozer_state.construct_target = None;
    }
    crate::store::kill_object(world, target);
    true
}

pub fn repair_building(world: &mut World, dozer: ObjectId, building: ObjectId) -> bool {
    let Some(dozer_entity) = lookup(world, dozer) else {
        return false;
    };
    if world.get::<DozerState>(dozer_entity).is_none() {
        return false;
    }
    let Some(building_entity) = lookup(world, building) else {
        return false;
    };
    let needs_work = world
        .get::<Body>(building_entity)
        .map(|b| b.alive && b.health < b.max_health)
        .unwrap_or(false);
    if !needs_work {
        return false;
    }
    let target_position = world
        .get::<Position>(building_entity)
        .copied()
        .unwrap_or_default();
    if let Some(mut dozer_state) = world.get_mut::<DozerState>(dozer_entity) {
        dozer_state.construct_target = Some(building);
    }
    crate::systems::movement::order_move(world, dozer, target_position.x, target_position.z);
    true
}

/// Dozer proximity drives construction progress and repair.
fn drive_construction(world: &mut World, dozer_id: ObjectId, entity: Entity) {
    let Some(target) = world
        .get::<DozerState>(entity)
        .and_then(|d| d.construct_target)
    else {
        return;
    };
    let Some(target_entity) = lookup(world, target) else {
        if let Some(mut dozer_state) = world.get_mut::<DozerState>(entity) {
            dozer_state.construct_target = None;
        }
        return;
    };
    let dozer_position = world.get::<Position>(entity).copied().unwrap_or_default();
    let target_position = world
        .get::<Position>(target_entity)
        .copied()
        .unwrap_or_default();
    let work_range = DOZER_WORK_RANGE
        + world
            .get::<Template>(target_entity)
            .and_then(|t| t.def.as_ref().map(|d| d.geometry.major_radius))
            .unwrap_or(0.0);
    if dozer_position.distance_xz(&target_position) > work_range {
        return;
    }

    let under_construction = world
        .get::<Status>(target_entity)
        .map(|s| s.contains(Status::UNDER_CONSTRUCTION))
        .unwrap_or(false);

    if under_construction {
        let finished = {
            let Some(mut construction) = world.get_mut::<ConstructionState>(target_entity) else {
                return;
            };
            let step = 100.0 / construction.build_frames_total.max(1) as f32;
            construction.percent = (construction.percent + step).min(100.0);
            construction.percent >= 100.0
        };
        // Health ramps with progress.
        let percent = world
            .get::<ConstructionState>(target_entity)
            .map(|c| c.percent)
            .unwrap_or(0.0);
        if let Some(mut body) = world.get_mut::<Body>(target_entity) {
            body.health = (body.max_health * percent / 100.0).max(1.0);
        }
        if finished {
            finish_construction(world, dozer_id, entity, target, target_entity);
        }
    } else {
        // Repair.
        let healed = {
            let Some(mut body) = world.get_mut::<Body>(target_entity) else {
                return;
            };
            let rate = body.max_health * REPAIR_FRACTION_PER_FRAME;
            body.heal(rate);
            body.health >= body.max_health
        };
        if healed {
            if let Some(mut dozer_state) = world.get_mut::<DozerState>(entity) {
                dozer_state.construct_target = None;
            }
        }
    }
}

fn finish_construction(
    world: &mut World,
    _dozer_id: ObjectId,
    dozer_entity: Entity,
    building: ObjectId,
    building_entity: Entity,
) {
    if let Some(mut status) = world.get_mut::<Status>(building_entity) {
        status.remove(Status::UNDER_CONSTRUCTION);
    }
    if let Some(mut body) = world.get_mut::<Body>(building_entity) {
        body.health = body.max_health;
    }
    world.entity_mut(building_entity).remove::<ConstructionState>();
    // Power joins the grid only now.
    let energy = world
        .get::<Template>(building_entity)
        .and_then(|t| t.def.as_ref().map(|d| d.energy_production))
        .unwrap_or(0);
    let side = world
        .get::<Allegiance>(building_entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    if energy != 0 {
        let mut sides = world.resource_mut::<SideTable>();
        if let Some(state) = sides.get_mut(&side) {
            if energy > 0 {
                state.power_production += energy;
            } else {
                state.power_consumption += -energy;
            }
        }
    }
    if let Some(mut dozer_state) = world.get_mut::<DozerState>(dozer_entity) {
        dozer_state.construct_target = None;
    }
    world
        .resource_mut::<VisualEventBus>()
        .emit(VisualEvent::simple(VisualEventKind::ConstructionComplete, building));
}

// ============================================================================
// SELL
// ============================================================================

pub fn sell(world: &mut World, building: ObjectId) -> bool {
    let Some(entity) = lookup(world, building) else {
        return false;
    };
    let sellable = world
        .get::<Template>(entity)
        .map(|t| t.is_kind("STRUCTURE"))
        .unwrap_or(false);
    let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
    if !sellable || !alive || world.get::<SellState>(entity).is_some() {
        return false;
    }
    let frames = world.resource::<SimConfig>().sell_frames.max(1);
    world.entity_mut(entity).insert(SellState {
        frames_remaining: frames,
    });
    if let Some(mut status) = world.get_mut::<Status>(entity) {
        status.insert(Status::UNSELECTABLE);
    }
    true
}

fn tick_sell(world: &mut World, id: ObjectId, entity: Entity) {
    let Some(mut sell_state) = world.get_mut::<SellState>(entity) else {
        return;
    };
    if sell_state.frames_remaining > 1 {
        sell_state.frames_remaining -= 1;
        return;
    }
    let side = world
        .get::<Allegiance>(entity)
        .map(|a| a.side.clone())
        .unwrap_or_default();
    let refund = world
        .get::<Template>(entity)
        .and_then(|t| t.def.as_ref())
        .map(|d| {
            if d.refund_value > 0 {
                d.refund_value
            } else {
                let fraction = world.resource::<SimConfig>().sell_percentage;
                (d.build_cost as f32 * fraction).round() as i64
            }
        })
        .unwrap_or(0);
    {
        let mut sides = world.resource_mut::<SideTable>();
        if let Some(state) = sides.get_mut(&side) {
            state.add_credits(refund);
        }
    }
    world
        .resource_mut::<VisualEventBus>()
        .emit(VisualEvent::simple(VisualEventKind::Sold, id));
    if let Some(mut body) = world.get_mut::<Body>(entity) {
        body.health = 0.0;
        body.alive = false;
    }
    world.entity_mut(entity).insert(PendingDestroy);
}

/// Bias a producer's rally point (production exits walk there).
pub fn set_rally_point(world: &mut World, producer: ObjectId, x: f32, z: f32) {
    if let Some(entity) = lookup(world, producer) {
        if let Some(mut production) = world.get_mut::<ProductionState>(entity) {
            production.rally_point = Some((x, z));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        BehaviorInput, CommandButtonInput, CommandSetInput, DataBundle, ObjectInput,
        QuantityModifierInput, UpgradeInput,
    };
    use crate::systems::combat::tests::combat_world;

    fn barracks_bundle() -> DataBundle {
        let button = CommandButtonInput {
            name: "Command_BuildRedguard".to_string(),
            command: "UNIT_BUILD".to_string(),
            object: Some("Redguard".to_string()),
            ..Default::default()
        };
        let set = CommandSetInput {
            name: "BarracksSet".to_string(),
            buttons: vec![(1, "Command_BuildRedguard".to_string())],
        };
        let barracks = ObjectInput {
            name: "Barracks".to_string(),
            kind_of: vec!["STRUCTURE".to_string()],
            command_set: Some("BarracksSet".to_string()),
            behaviors: vec![
                BehaviorInput::ProductionUpdate {
                    max_queue_entries: 3,
                    quantity_modifiers: vec![QuantityModifierInput {
                        template: "Redguard".to_string(),
                        count: 2,
                    }],
                },
                BehaviorInput::QueueProductionExitUpdate {
                    unit_create_point: (10.0, 0.0, 0.0),
                    exit_delay: 66.0,
                },
            ],
            ..Default::default()
        };
        let redguard = ObjectInput {
            name: "Redguard".to_string(),
            kind_of: vec!["INFANTRY".to_string()],
            build_cost: Some(300),
            build_time: Some(0.1),
            ..Default::default()
        };
        DataBundle {
            objects: vec![barracks, redguard],
            command_buttons: vec![button],
            command_sets: vec![set],
            ..Default::default()
        }
    }

    fn produced_count(world: &mut World) -> usize {
        crate::store::ids_by_template(world, "Redguard").len()
    }

    #[test]
    fn test_fifo_production_with_quantity_modifier() {
        let mut world = combat_world(barracks_bundle());
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 1000;
        assert!(try_queue_unit(&mut world, barracks, "Redguard"));
        assert_eq!(
            world.resource::<SideTable>().get("china").unwrap().credits,
            700,
            "cost debited at enqueue"
        );

        // BuildTime 0.1s = 3 frames, ExitDelay 66ms = 2 frames, quantity 2:
        // counts over six frames are [0, 0, 1, 1, 2, 2].
        let mut counts = Vec::new();
        for _ in 0..6 {
            production_phase(&mut world);
            counts.push(produced_count(&mut world));
        }
        assert_eq!(counts, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_insufficient_credits_rejected() {
        let mut world = combat_world(barracks_bundle());
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 100;
        assert!(!try_queue_unit(&mut world, barracks, "Redguard"));
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 100);
    }

    #[test]
    fn test_command_set_gating() {
        let mut bundle = barracks_bundle();
        bundle.objects.push(ObjectInput {
            name: "Dragon".to_string(),
            build_cost: Some(100),
            build_time: Some(0.1),
            ..Default::default()
        });
        let mut world = combat_world(bundle);
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 1000;
        assert!(
            !try_queue_unit(&mut world, barracks, "Dragon"),
            "no button for this template"
        );
    }

    #[test]
    fn test_cancel_refunds_once() {
        let mut world = combat_world(barracks_bundle());
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 1000;
        try_queue_unit(&mut world, barracks, "Redguard");
        let production_id = {
            let entity = lookup(&world, barracks).unwrap();
            world.get::<ProductionState>(entity).unwrap().queue[0].production_id
        };
        assert!(cancel_unit(&mut world, barracks, production_id));
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 1000);
        assert!(!cancel_unit(&mut world, barracks, production_id), "already gone");
    }

    #[test]
    fn test_max_queue_entries() {
        let mut world = combat_world(barracks_bundle());
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 10_000;
        for _ in 0..3 {
            assert!(try_queue_unit(&mut world, barracks, "Redguard"));
        }
        assert!(!try_queue_unit(&mut world, barracks, "Redguard"), "queue full");
    }

    #[test]
    fn test_max_simultaneous_counts_existing_and_queued() {
        let mut bundle = barracks_bundle();
        bundle.objects[1].max_simultaneous_of_type = Some(2);
        let mut world = combat_world(bundle);
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 10_000;
        // One queue entry expands to quantity 2, hitting the cap.
        assert!(try_queue_unit(&mut world, barracks, "Redguard"));
        assert!(!try_queue_unit(&mut world, barracks, "Redguard"));
    }

    #[test]
    fn test_parking_reservation_limits_aircraft() {
        let button = CommandButtonInput {
            name: "Command_BuildRaptor".to_string(),
            command: "UNIT_BUILD".to_string(),
            object: Some("Raptor".to_string()),
            ..Default::default()
        };
        let set = CommandSetInput {
            name: "AirfieldSet".to_string(),
            buttons: vec![(1, "Command_BuildRaptor".to_string())],
        };
        let airfield = ObjectInput {
            name: "Airfield".to_string(),
            kind_of: vec!["STRUCTURE".to_string(), "FS_AIRFIELD".to_string()],
            command_set: Some("AirfieldSet".to_string()),
            behaviors: vec![
                BehaviorInput::ProductionUpdate {
                    max_queue_entries: 9,
                    quantity_modifiers: vec![],
                },
                BehaviorInput::QueueProductionExitUpdate {
                    unit_create_point: (10.0, 0.0, 0.0),
                    exit_delay: 0.0,
                },
                BehaviorInput::ParkingPlaceBehavior {
                    num_rows: 1,
                    num_cols: 2,
                },
            ],
            ..Default::default()
        };
        let raptor = ObjectInput {
            name: "Raptor".to_string(),
            kind_of: vec!["AIRCRAFT".to_string()],
            build_cost: Some(100),
            build_time: Some(0.1),
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![airfield, raptor],
            command_buttons: vec![button],
            command_sets: vec![set],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let airfield = spawn_object(
            &mut world,
            "Airfield",
            "america",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("america").credits = 10_000;

        assert!(try_queue_unit(&mut world, airfield, "Raptor"));
        assert!(try_queue_unit(&mut world, airfield, "Raptor"));
        assert!(
            !try_queue_unit(&mut world, airfield, "Raptor"),
            "both parking slots reserved"
        );
        // Cancel releases the slot.
        let production_id = {
            let entity = lookup(&world, airfield).unwrap();
            world.get::<ProductionState>(entity).unwrap().queue[1].production_id
        };
        cancel_unit(&mut world, airfield, production_id);
        assert!(try_queue_unit(&mut world, airfield, "Raptor"));
    }

    #[test]
    fn test_player_upgrade_production() {
        let button = CommandButtonInput {
            name: "Command_UpgradeNationalism".to_string(),
            command: "PLAYER_UPGRADE".to_string(),
            upgrade: Some("Upgrade_Nationalism".to_string()),
            ..Default::default()
        };
        let mut bundle = barracks_bundle();
        bundle.command_buttons.push(button);
        bundle.command_sets[0]
            .buttons
            .push((2, "Command_UpgradeNationalism".to_string()));
        bundle.upgrades.push(UpgradeInput {
            name: "Upgrade_Nationalism".to_string(),
            r#type: Some("PLAYER".to_string()),
            build_cost: 500,
            build_time: 0.1,
        });
        let mut world = combat_world(bundle);
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 1000;

        assert!(try_queue_upgrade(&mut world, barracks, "Upgrade_Nationalism"));
        assert!(
            !try_queue_upgrade(&mut world, barracks, "Upgrade_Nationalism"),
            "already in production"
        );
        for _ in 0..3 {
            production_phase(&mut world);
        }
        assert!(world
            .resource::<SideTable>()
            .get("china")
            .unwrap()
            .has_upgrade("UPGRADE_NATIONALISM"));
    }

    #[test]
    fn test_dozer_construction_lifecycle() {
        let button = CommandButtonInput {
            name: "Command_ConstructPowerPlant".to_string(),
            command: "DOZER_CONSTRUCT".to_string(),
            object: Some("PowerPlant".to_string()),
            ..Default::default()
        };
        let set = CommandSetInput {
            name: "DozerSet".to_string(),
            buttons: vec![(1, "Command_ConstructPowerPlant".to_string())],
        };
        let dozer = ObjectInput {
            name: "Dozer".to_string(),
            kind_of: vec!["VEHICLE".to_string(), "DOZER".to_string()],
            command_set: Some("DozerSet".to_string()),
            speed: Some(60.0),
            ..Default::default()
        };
        let plant = ObjectInput {
            name: "PowerPlant".to_string(),
            kind_of: vec!["STRUCTURE".to_string()],
            build_cost: Some(600),
            build_time: Some(0.2), // 6 frames
            energy_production: Some(10),
            body: Some(crate::data::BodyInput {
                max_health: Some(400.0),
                initial_health: None,
            }),
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![dozer, plant],
            command_buttons: vec![button],
            command_sets: vec![set],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let dozer =
            spawn_object(&mut world, "Dozer", "china", 50.0, 50.0, SpawnProps::default()).unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 1000;

        assert!(construct_building(&mut world, dozer, "PowerPlant", 60.0, 50.0, 0.0));
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 400);

        let buildings = crate::store::ids_by_template(&mut world, "PowerPlant");
        assert_eq!(buildings.len(), 1);
        let building_entity = lookup(&world, buildings[0]).unwrap();
        assert!(world
            .get::<Status>(building_entity)
            .unwrap()
            .contains(Status::UNDER_CONSTRUCTION));
        // No power until the build completes.
        assert_eq!(
            world.resource::<SideTable>().get("china").unwrap().power_production,
            0
        );

        // The dozer is already in range; 6 frames of proximity finish it.
        for _ in 0..6 {
            production_phase(&mut world);
        }
        assert!(!world
            .get::<Status>(building_entity)
            .unwrap()
            .contains(Status::UNDER_CONSTRUCTION));
        assert_eq!(world.get::<Body>(building_entity).unwrap().health, 400.0);
        assert_eq!(
            world.resource::<SideTable>().get("china").unwrap().power_production,
            10
        );
    }

    #[test]
    fn test_cancel_dozer_construction_refunds() {
        let button = CommandButtonInput {
            name: "Command_ConstructPowerPlant".to_string(),
            command: "DOZER_CONSTRUCT".to_string(),
            object: Some("PowerPlant".to_string()),
            ..Default::default()
        };
        let set = CommandSetInput {
            name: "DozerSet".to_string(),
            buttons: vec![(1, "Command_ConstructPowerPlant".to_string())],
        };
        let dozer = ObjectInput {
            name: "Dozer".to_string(),
            kind_of: vec!["VEHICLE".to_string(), "DOZER".to_string()],
            command_set: Some("DozerSet".to_string()),
            ..Default::default()
        };
        let plant = ObjectInput {
            name: "PowerPlant".to_string(),
            kind_of: vec!["STRUCTURE".to_string()],
            build_cost: Some(600),
            build_time: Some(10.0),
            ..Default::default()
        };
        let bundle = DataBundle {
            objects: vec![dozer, plant],
            command_buttons: vec![button],
            command_sets: vec![set],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        let dozer =
            spawn_object(&mut world, "Dozer", "china", 50.0, 50.0, SpawnProps::default()).unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 600;
        assert!(construct_building(&mut world, dozer, "PowerPlant", 60.0, 50.0, 0.0));
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 0);

        assert!(cancel_dozer_construction(&mut world, dozer));
        crate::systems::death::cleanup_phase(&mut world);
        assert_eq!(world.resource::<SideTable>().get("china").unwrap().credits, 600);
        assert!(crate::store::ids_by_template(&mut world, "PowerPlant").is_empty());
    }

    #[test]
    fn test_sell_refunds() {
        let mut bundle = barracks_bundle();
        bundle.objects[0].build_cost = Some(1000);
        let mut world = combat_world(bundle);
        world.insert_resource(SimConfig::default());
        let barracks = spawn_object(
            &mut world,
            "Barracks",
            "china",
            50.0,
            50.0,
            SpawnProps::default(),
        )
        .unwrap();
        world.resource_mut::<SideTable>().ensure("china").credits = 0;
        assert!(sell(&mut world, barracks));
        for _ in 0..30 {
            production_phase(&mut world);
        }
        crate::systems::death::cleanup_phase(&mut world);
        assert!(lookup(&world, barracks).is_none());
        assert_eq!(
            world.resource::<SideTable>().get("china").unwrap().credits,
            500,
            "half the build cost back"
        );
    }
}
