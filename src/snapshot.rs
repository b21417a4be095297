//! Snapshot projection: the serializable view of simulation state.
//!
//! Snapshots are the only window a renderer gets. Entities appear in
//! ascending id order and status flags are sorted, so two identical runs
//! serialize byte-for-byte identically.

use std::collections::BTreeMap;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::*;
use crate::sides::{PlayerType, SideTable};
use crate::systems::special_power::LastDispatch;

/// Snapshot of a single entity's public state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub id: ObjectId,
    pub template_name: String,
    pub side: String,
    pub original_owner_player: String,
    pub resolved: bool,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub angle: f32,
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
    /// Sorted ascending by bit for testable equality.
    pub status_flags: Vec<String>,
    /// IDLE | MOVE | ATTACK | DIE | PRONE.
    pub animation_state: String,
    pub render_asset_path: Option<String>,
    pub render_asset_resolved: bool,
    pub render_asset_candidates: Vec<String>,
    pub render_animation_state_clips: BTreeMap<String, String>,
    /// -1 means not under construction.
    pub construction_percent: f32,
    pub speed: f32,
    pub vision_range: f32,
    pub attack_target_entity_id: Option<ObjectId>,
    pub battle_plan_damage_scalar: f32,
    pub weapon_bonus_condition_flags: u32,
    pub veterancy_level: String,
    pub current_experience: i32,
    pub contained_by: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_special_power_dispatch:
        Option<crate::systems::special_power::SpecialPowerDispatch>,
}

/// Per-side public state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideSnapshot {
    pub name: String,
    pub credits: i64,
    pub player_type: String,
    pub power_production: i32,
    pub power_consumption: i32,
    pub power_bonus: i32,
    pub radar_active: bool,
    pub science_purchase_points: i32,
    pub sciences: Vec<String>,
    pub upgrades_completed: Vec<String>,
    pub beacon_count: u32,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub frame: u64,
    pub time: f32,
    pub entities: Vec<EntitySnapshot>,
    pub sides: Vec<SideSnapshot>,
}

fn animation_state(world: &World, entity: Entity) -> &'static str {
    let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
    if !alive {
        return "DIE";
    }
    let status = world.get::<Status>(entity).copied().unwrap_or_default();
    if status.contains(Status::PRONE) {
        return "PRONE";
    }
    if status.intersects(Status::IS_FIRING_WEAPON | Status::IS_AIMING_WEAPON) {
        return "ATTACK";
    }
    let moving = world
        .get::<Locomotion>(entity)
        .map(|l| l.is_moving())
        .unwrap_or(false);
    if moving {
        return "MOVE";
    }
    "IDLE"
}

/// Project one entity. `None` when the id is not in the store.
pub fn get_entity_state(world: &World, id: ObjectId) -> Option<EntitySnapshot> {
    let entity = world.resource::<EntityIndex>().entity(id)?;
    let template = world.get::<Template>(entity)?;
    let allegiance = world.get::<Allegiance>(entity)?;
    let position = world.get::<Position>(entity)?;
    let body = world.get::<Body>(entity)?;
    let status = world.get::<Status>(entity).copied().unwrap_or_default();
    let render = world.get::<RenderMeta>(entity);
    let construction_percent = world
        .get::<ConstructionState>(entity)
        .map(|c| c.percent)
        .unwrap_or(-1.0);

    Some(EntitySnapshot {
        id,
        template_name: template.name.clone(),
        side: allegiance.side.clone(),
        original_owner_player: allegiance.original_owner.clone(),
        resolved: template.resolved(),
        x: position.x,
        y: position.y,
        z: position.z,
        angle: world.get::<Facing>(entity).map(|f| f.angle).unwrap_or(0.0),
        health: body.health,
        max_health: body.max_health,
        alive: body.alive,
        status_flags: status.names().into_iter().map(String::from).collect(),
        animation_state: animation_state(world, entity).to_string(),
        render_asset_path: render.and_then(|r| r.asset_path.clone()),
        render_asset_resolved: render.map(|r| r.asset_resolved).unwrap_or(false),
        render_asset_candidates: render.map(|r| r.candidates.clone()).unwrap_or_default(),
        render_animation_state_clips: render.map(|r| r.clips.clone()).unwrap_or_default(),
        construction_percent,
        speed: world.get::<Locomotion>(entity).map(|l| l.speed).unwrap_or(0.0),
        vision_range: world
            .get::<Vision>(entity)
            .map(|v| v.effective())
            .unwrap_or(0.0),
        attack_target_entity_id: world
            .get::<AiState>(entity)
            .and_then(|ai| ai.attack_target),
        battle_plan_damage_scalar: body.battle_plan_damage_scalar,
        weapon_bonus_condition_flags: world
            .get::<WeaponState>(entity)
            .map(|w| w.bonus_flags.bits())
            .unwrap_or(0),
        veterancy_level: world
            .get::<Veterancy>(entity)
            .map(|v| v.level.name().to_string())
            .unwrap_or_else(|| "REGULAR".to_string()),
        current_experience: world
            .get::<Veterancy>(entity)
            .map(|v| v.experience)
            .unwrap_or(0),
        contained_by: world.get::<Contained>(entity).map(|c| c.container),
        last_special_power_dispatch: world.get::<LastDispatch>(entity).map(|d| d.0.clone()),
    })
}

/// Entities worth rendering: alive ones plus slow-death corpses in their
/// grace window.
pub fn get_renderable_entity_states(world: &World) -> Vec<EntitySnapshot> {
    let ids = world.resource::<EntityIndex>().ids();
    let mut out = Vec::new();
    for id in ids {
        let Some(entity) = world.resource::<EntityIndex>().entity(id) else {
            continue;
        };
        let alive = world.get::<Body>(entity).map(|b| b.alive).unwrap_or(false);
        let dying = world.get::<DyingState>(entity).is_some();
        if !alive && !dying {
            continue;
        }
        if let Some(snapshot) = get_entity_state(world, id) {
            out.push(snapshot);
        }
    }
    out
}

impl GameSnapshot {
    pub fn from_world(world: &World, frame: u64, time: f32) -> Self {
        let entities = get_renderable_entity_states(world);
        let sides = world
            .resource::<SideTable>()
            .iter()
            .map(|(name, state)| SideSnapshot {
                name: name.clone(),
                credits: state.credits,
                player_type: match state.player_type {
                    PlayerType::Human => "HUMAN".to_string(),
                    PlayerType::Computer => "COMPUTER".to_string(),
                },
                power_production: state.power_production,
                power_consumption: state.power_consumption,
                power_bonus: state.power_bonus,
                radar_active: state.radar_active(),
                science_purchase_points: state.science_purchase_points,
                sciences: state.sciences.iter().cloned().collect(),
                upgrades_completed: state.upgrades_completed.iter().cloned().collect(),
                beacon_count: state.beacon_count,
            })
            .collect();
        Self {
            frame,
            time,
            entities,
            sides,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Serialize a snapshot to JSON bytes.
pub fn snapshot_to_json(snapshot: &GameSnapshot) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(snapshot)
}

/// Deserialize a snapshot from JSON bytes.
pub fn snapshot_from_json(data: &[u8]) -> Result<GameSnapshot, serde_json::Error> {
    serde_json::from_slice(data)
}
