//! ECS components for the game-logic simulation.
//!
//! Components are pure data containers attached to entities.
//! All game logic lives in systems that query these components.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{norm_name, ObjectDef, WeaponDef};

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable 1-based entity identifier. Monotonic, never reused.
#[derive(
    Component, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(pub u32);

/// Monotonic id allocator plus id -> ECS entity index.
///
/// Iterating `ids()` yields ascending ObjectId order; every cross-entity
/// phase walks entities through this index so runs stay bit-identical.
#[derive(Resource, Debug, Default)]
pub struct EntityIndex {
    by_id: BTreeMap<ObjectId, Entity>,
    next: u32,
}

impl EntityIndex {
    pub fn allocate(&mut self) -> ObjectId {
        self.next += 1;
        ObjectId(self.next)
    }

    pub fn bind(&mut self, id: ObjectId, entity: Entity) {
        self.by_id.insert(id, entity);
    }

    pub fn unbind(&mut self, id: ObjectId) {
        self.by_id.remove(&id);
    }

    pub fn entity(&self, id: ObjectId) -> Option<Entity> {
        self.by_id.get(&id).copied()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.by_id.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn highest_allocated(&self) -> u32 {
        self.next
    }
}

/// Current logic frame number.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct SimFrame(pub u64);

/// Simulation-wide configuration.
#[derive(Resource, Debug, Clone, Copy)]
pub struct SimConfig {
    /// Seconds per logic frame.
    pub fixed_timestep: f32,
    /// Spatial hash cell size in world units.
    pub spatial_cell_size: f32,
    /// Pathfind / fog-of-war cell size in world units.
    pub pathfind_cell_size: f32,
    /// RNG seed. Same seed = same simulation.
    pub seed: u64,
    /// Sell refund fraction when `RefundValue` is absent.
    pub sell_percentage: f32,
    /// Frames a sell takes to complete.
    pub sell_frames: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0,
            spatial_cell_size: 40.0,
            pathfind_cell_size: 10.0,
            seed: 42,
            sell_percentage: 0.5,
            sell_frames: 30,
        }
    }
}

/// Template identity plus the resolved definition, if any.
///
/// Unresolved templates still spawn (placeholder rendering) but are inert in
/// combat and production.
#[derive(Component, Debug, Clone)]
pub struct Template {
    pub name: String,
    pub def: Option<Arc<ObjectDef>>,
}

impl Template {
    pub fn resolved(&self) -> bool {
        self.def.is_some()
    }

    pub fn is_kind(&self, flag: &str) -> bool {
        self.def.as_ref().map(|d| d.is_kind(flag)).unwrap_or(false)
    }
}

/// Side ownership. `side` is the current (capturable) side, normalized
/// lower-case; `original_owner` is the fixed founding player string.
#[derive(Component, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Allegiance {
    pub side: String,
    pub original_owner: String,
}

// ============================================================================
// SPATIAL
// ============================================================================

/// World position. The ground plane is X-Z; Y is elevation.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Ground-plane distance.
    pub fn distance_xz(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Full 3D distance (XZ plus elevation delta).
    pub fn distance_3d(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Off-map marker convention: negative X is off-map.
    pub fn is_off_map(&self) -> bool {
        self.x < 0.0
    }
}

/// Facing angle in radians around the Y axis.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Facing {
    pub angle: f32,
}

// ============================================================================
// BODY / STATUS
// ============================================================================

/// Health and damage bookkeeping.
#[derive(Component, Debug, Clone)]
pub struct Body {
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
    /// Persistent damage multiplier (subdual effects and the like).
    pub damage_scalar: f32,
    /// Hold-the-Line battle-plan multiplier, reverted on pack.
    pub battle_plan_damage_scalar: f32,
    /// Armor set selected by upgrade condition.
    pub armor_upgraded: bool,
}

impl Body {
    pub fn new(max_health: f32) -> Self {
        Self {
            health: max_health,
            max_health,
            alive: max_health > 0.0,
            damage_scalar: 1.0,
            battle_plan_damage_scalar: 1.0,
            armor_upgraded: false,
        }
    }

    pub fn with_health(max_health: f32, health: f32) -> Self {
        let mut body = Self::new(max_health);
        body.health = health.clamp(0.0, max_health);
        body.alive = body.health > 0.0;
        body
    }

    pub fn fraction(&self) -> f32 {
        if self.max_health <= 0.0 {
            0.0
        } else {
            (self.health / self.max_health).clamp(0.0, 1.0)
        }
    }

    pub fn heal(&mut self, amount: f32) {
        if self.alive {
            self.health = (self.health + amount).min(self.max_health);
        }
    }
}

bitflags::bitflags! {
    /// Object status bits. Bit order is the snapshot sort order.
    #[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Status: u64 {
        const IS_AIMING_WEAPON = 1 << 0;
        const IS_FIRING_WEAPON = 1 << 1;
        const IS_ATTACKING = 1 << 2;
        const STEALTHED = 1 << 3;
        const DETECTED = 1 << 4;
        const MASKED = 1 << 5;
        const NO_ATTACK = 1 << 6;
        const NO_ATTACK_FROM_AI = 1 << 7;
        const IGNORING_STEALTH = 1 << 8;
        const CAN_STEALTH = 1 << 9;
        const DISABLED_EMP = 1 << 10;
        const DISABLED_HACKED = 1 << 11;
        const DISABLED_SUBDUED = 1 << 12;
        const DISABLED_UNDERPOWERED = 1 << 13;
        const DISABLED_HELD = 1 << 14;
        const SCRIPT_DISABLED = 1 << 15;
        const UNDER_CONSTRUCTION = 1 << 16;
        const UNSELECTABLE = 1 << 17;
        const HIJACKED = 1 << 18;
        const PRONE = 1 << 19;
    }
}

impl Status {
    const NAMES: [(Status, &'static str); 20] = [
        (Status::IS_AIMING_WEAPON, "IS_AIMING_WEAPON"),
        (Status::IS_FIRING_WEAPON, "IS_FIRING_WEAPON"),
        (Status::IS_ATTACKING, "IS_ATTACKING"),
        (Status::STEALTHED, "STEALTHED"),
        (Status::DETECTED, "DETECTED"),
        (Status::MASKED, "MASKED"),
        (Status::NO_ATTACK, "NO_ATTACK"),
        (Status::NO_ATTACK_FROM_AI, "NO_ATTACK_FROM_AI"),
        (Status::IGNORING_STEALTH, "IGNORING_STEALTH"),
        (Status::CAN_STEALTH, "CAN_STEALTH"),
        (Status::DISABLED_EMP, "DISABLED_EMP"),
        (Status::DISABLED_HACKED, "DISABLED_HACKED"),
        (Status::DISABLED_SUBDUED, "DISABLED_SUBDUED"),
        (Status::DISABLED_UNDERPOWERED, "DISABLED_UNDERPOWERED"),
        (Status::DISABLED_HELD, "DISABLED_HELD"),
        (Status::SCRIPT_DISABLED, "SCRIPT_DISABLED"),
        (Status::UNDER_CONSTRUCTION, "UNDER_CONSTRUCTION"),
        (Status::UNSELECTABLE, "UNSELECTABLE"),
        (Status::HIJACKED, "HIJACKED"),
        (Status::PRONE, "PRONE"),
    ];

    pub fn is_disabled(&self) -> bool {
        self.intersects(
            Status::DISABLED_EMP
                | Status::DISABLED_HACKED
                | Status::DISABLED_SUBDUED
                | Status::DISABLED_UNDERPOWERED
                | Status::DISABLED_HELD,
        )
    }

    /// Flag names in ascending bit order, for testable snapshot equality.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    pub fn by_name(name: &str) -> Option<Status> {
        let name = norm_name(name);
        Self::NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(flag, _)| *flag)
    }
}

bitflags::bitflags! {
    /// Weapon-bonus condition flags used for `WeaponSet` selection.
    #[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct WeaponBonus: u32 {
        const HORDE = 1 << 1;
        const NATIONALISM = 1 << 4;
        const PLAYER_UPGRADE = 1 << 5;
        const BOMBARDMENT = 1 << 6;
        const HOLD_THE_LINE = 1 << 7;
        const SEARCH_AND_DESTROY = 1 << 8;
        const WEAPON_UPGRADE_ONE = 1 << 12;
        const WEAPON_UPGRADE_TWO = 1 << 13;
        const WEAPON_UPGRADE_THREE = 1 << 14;
        const FANATICISM = 1 << 23;
    }
}

impl WeaponBonus {
    pub fn parse_conditions(names: &[String]) -> Self {
        let mut flags = Self::empty();
        for name in names {
            match norm_name(name).as_str() {
                "HORDE" => flags |= Self::HORDE,
                "NATIONALISM" => flags |= Self::NATIONALISM,
                "PLAYER_UPGRADE" => flags |= Self::PLAYER_UPGRADE,
                "BOMBARDMENT" => flags |= Self::BOMBARDMENT,
                "HOLD_THE_LINE" => flags |= Self::HOLD_THE_LINE,
                "SEARCH_AND_DESTROY" => flags |= Self::SEARCH_AND_DESTROY,
                "WEAPON_UPGRADE_ONE" => flags |= Self::WEAPON_UPGRADE_ONE,
                "WEAPON_UPGRADE_TWO" => flags |= Self::WEAPON_UPGRADE_TWO,
                "WEAPON_UPGRADE_THREE" => flags |= Self::WEAPON_UPGRADE_THREE,
                "FANATICISM" => flags |= Self::FANATICISM,
                _ => {}
            }
        }
        flags
    }

    pub fn upgrade_slot(slot: u8) -> Self {
        match slot {
            0 => Self::WEAPON_UPGRADE_ONE,
            1 => Self::WEAPON_UPGRADE_TWO,
            _ => Self::WEAPON_UPGRADE_THREE,
        }
    }
}

// ============================================================================
// COMBAT
// ============================================================================

pub use crate::data::PreAttackType;

/// Per-attacker fire state machine data.
#[derive(Component, Debug, Clone, Default)]
pub struct WeaponState {
    /// Index into the template's weapon sets.
    pub active_set: usize,
    /// Resolved PRIMARY weapon of the active set.
    pub weapon: Option<Arc<WeaponDef>>,
    pub clip_remaining: u32,
    /// Frames until the next shot is allowed (DelayBetweenShots).
    pub reload_remaining: u32,
    /// Frames until the clip refills (ClipReloadTime).
    pub clip_reload_remaining: u32,
    /// Frames of pre-attack aim left; the shot lands on the first frame this
    /// is already zero while an aim is armed.
    pub aim_remaining: u32,
    pub aiming: bool,
    /// PER_ATTACK: aim already served for the current target.
    pub aim_done_for_attack: bool,
    /// PER_CLIP: aim already served since the last clip reload.
    pub aim_done_for_clip: bool,
    pub last_shot_frame: u64,
    pub last_target: Option<ObjectId>,
    /// ScatterTarget indices not yet consumed this clip.
    pub scatter_cycle: Vec<u32>,
    /// Consecutive frames without an engagement, for AutoReloadWhenIdle.
    pub idle_frames: u32,
    /// Bonus flags currently held (horde, upgrades, battle plans).
    pub bonus_flags: WeaponBonus,
}

impl WeaponState {
    /// Re-resolve the active weapon set against current bonus flags.
    /// Exact condition match wins, then the largest subset, then NONE.
    pub fn select_weapon_set(
        &mut self,
        def: &ObjectDef,
        lookup: impl Fn(&str) -> Option<Arc<WeaponDef>>,
    ) {
        let mut best: Option<(usize, u32, bool)> = None;
        for (index, set) in def.weapon_sets.iter().enumerate() {
            if !self.bonus_flags.contains(set.conditions) {
                continue;
            }
            let exact = set.conditions == self.bonus_flags;
            let bits = set.conditions.bits().count_ones();
            best = match best {
                None => Some((index, bits, exact)),
                Some((_, best_bits, best_exact)) => {
                    if (exact && !best_exact) || (exact == best_exact && bits > best_bits) {
                        Some((index, bits, exact))
                    } else {
                        best
                    }
                }
            };
        }
        if let Some((index, _, _)) = best {
            if index != self.active_set || self.weapon.is_none() {
                self.active_set = index;
                self.weapon = def.weapon_sets[index].slots[0].as_deref().and_then(lookup);
                if let Some(weapon) = &self.weapon {
                    self.clip_remaining = weapon.clip_size;
                    self.scatter_cycle.clear();
                }
            }
        }
    }
}

/// Attack intent and command provenance.
#[derive(Component, Debug, Clone, Default)]
pub struct AiState {
    pub attack_target: Option<ObjectId>,
    pub continue_anchor: Option<ContinueAnchor>,
    pub command_source: CommandSource,
}

/// Where a destroyed target stood, for continue-attack sweeps.
#[derive(Debug, Clone)]
pub struct ContinueAnchor {
    pub x: f32,
    pub z: f32,
    /// Original owner of the destroyed target; the next target must match.
    pub owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandSource {
    #[default]
    Player,
    Ai,
}

/// Experience tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VeterancyLevel {
    #[default]
    Regular,
    Veteran,
    Elite,
    Heroic,
}

impl VeterancyLevel {
    pub fn index(&self) -> usize {
        match self {
            Self::Regular => 0,
            Self::Veteran => 1,
            Self::Elite => 2,
            Self::Heroic => 3,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Regular,
            1 => Self::Veteran,
            2 => Self::Elite,
            _ => Self::Heroic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::Veteran => "VETERAN",
            Self::Elite => "ELITE",
            Self::Heroic => "HEROIC",
        }
    }
}

#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Veterancy {
    pub level: VeterancyLevel,
    pub experience: i32,
}

impl Veterancy {
    /// Level up while the next threshold is passed.
    pub fn absorb(&mut self, experience: i32, thresholds: &[i32; 4]) {
        self.experience += experience;
        while self.level < VeterancyLevel::Heroic {
            let next = thresholds[self.level.index() + 1];
            if next == i32::MAX || self.experience < next {
                break;
            }
            self.level = VeterancyLevel::from_index(self.level.index() + 1);
        }
    }
}

/// Jet-AI deception: incoming shots miss by `offset` while the window runs.
#[derive(Component, Debug, Clone, Default)]
pub struct SneakyOffset {
    pub offset: f32,
    pub persist_frames: u32,
    /// Refreshed every frame the owner has IS_ATTACKING.
    pub window_remaining: u32,
}

impl SneakyOffset {
    pub fn window_active(&self) -> bool {
        self.window_remaining > 0
    }
}

/// In-flight projectile bookkeeping.
#[derive(Component, Debug, Clone)]
pub struct ProjectileState {
    pub launcher: ObjectId,
    /// Container holding the launcher at launch, excluded from collision.
    pub launcher_container: Option<ObjectId>,
    pub weapon: Arc<WeaponDef>,
    /// Impact point resolved at launch; not tracked afterwards.
    pub impact: Position,
    pub speed_per_frame: f32,
    pub intended_victim: Option<ObjectId>,
}

// ============================================================================
// MOVEMENT
// ============================================================================

/// Locomotion state: active locomotor set, goal and grid path.
#[derive(Component, Debug, Clone)]
pub struct Locomotion {
    /// `SET_NORMAL` or an upgraded set condition.
    pub active_set: String,
    pub goal: Option<(f32, f32)>,
    pub path: Vec<(f32, f32)>,
    pub next_waypoint: usize,
    /// Ground speed actually applied last frame, world units per second.
    pub speed: f32,
}

impl Default for Locomotion {
    fn default() -> Self {
        Self {
            active_set: "SET_NORMAL".to_string(),
            goal: None,
            path: Vec::new(),
            next_waypoint: 0,
            speed: 0.0,
        }
    }
}

impl Locomotion {
    pub fn clear_path(&mut self) {
        self.goal = None;
        self.path.clear();
        self.next_waypoint = 0;
    }

    pub fn is_moving(&self) -> bool {
        self.goal.is_some()
    }
}

// ============================================================================
// UPGRADES
// ============================================================================

/// Per-object upgrade ownership (idempotent set).
#[derive(Component, Debug, Clone, Default)]
pub struct UpgradeOwnership(pub BTreeSet<String>);

/// Which behavior-module indices have already dispatched their effect, and
/// which currently hold a side-level aggregate effect (power, radar, cost)
/// that capture or disablement must move or revert.
#[derive(Component, Debug, Clone, Default)]
pub struct UpgradeModuleState {
    pub activated: BTreeSet<usize>,
    pub side_effects_applied: BTreeSet<usize>,
}

/// Command-set override chain from `CommandSetUpgrade`.
#[derive(Component, Debug, Clone, Default)]
pub struct CommandSetOverride {
    pub current: Option<String>,
}

// ============================================================================
// CONTAINERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainKind {
    Open,
    Transport,
    Overlord,
    Helix,
    Garrison,
    Tunnel,
}

/// State for an entity that can hold passengers.
#[derive(Component, Debug, Clone)]
pub struct ContainerState {
    pub kind: ContainKind,
    pub capacity: u32,
    pub passengers: Vec<ObjectId>,
    pub passengers_allowed_to_fire: bool,
    /// PassengersFireUpgrade override.
    pub fire_override: bool,
    /// Helix portable-structure whitelist.
    pub payload_templates: Vec<String>,
    /// The one portable rider currently allowed to fire.
    pub active_rider: Option<ObjectId>,
    /// Tunnel linear heal duration.
    pub heal_frames_total: u32,
}

impl ContainerState {
    pub fn new(kind: ContainKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            passengers: Vec::new(),
            passengers_allowed_to_fire: false,
            fire_override: false,
            payload_templates: Vec::new(),
            active_rider: None,
            heal_frames_total: 0,
        }
    }

    pub fn allows_fire(&self) -> bool {
        self.passengers_allowed_to_fire || self.fire_override
    }

    pub fn has_room(&self) -> bool {
        (self.passengers.len() as u32) < self.capacity
    }
}

/// Back-reference from a passenger to its container.
#[derive(Component, Debug, Clone, Copy)]
pub struct Contained {
    pub container: ObjectId,
}

// ============================================================================
// PRODUCTION / CONSTRUCTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductionKind {
    Unit { template: String },
    Upgrade { upgrade: String },
}

#[derive(Debug, Clone)]
pub struct ProductionEntry {
    pub production_id: u32,
    pub kind: ProductionKind,
    pub build_frames: u32,
    pub elapsed_frames: u32,
    pub cost: i64,
    pub quantity_total: u32,
    pub quantity_produced: u32,
    /// Frames until the next quantity-expanded spawn.
    pub exit_wait: u32,
    pub reserved_parking: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExitInfo {
    pub create_point: (f32, f32, f32),
    pub exit_delay_frames: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParkingInfo {
    pub rows: u32,
    pub cols: u32,
    pub reserved: u32,
}

impl ParkingInfo {
    pub fn slots(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn available(&self) -> bool {
        self.reserved < self.slots()
    }
}

/// Production queue carried by producer structures.
#[derive(Component, Debug, Clone, Default)]
pub struct ProductionState {
    pub max_queue: u32,
    pub queue: Vec<ProductionEntry>,
    pub next_production_id: u32,
    pub exit: Option<ExitInfo>,
    pub parking: Option<ParkingInfo>,
    pub quantity_modifiers: BTreeMap<String, u32>,
    pub rally_point: Option<(f32, f32)>,
}

/// State of a building being raised by a dozer.
#[derive(Component, Debug, Clone, Default)]
pub struct ConstructionState {
    /// 0..=100.
    pub percent: f32,
    pub builder: Option<ObjectId>,
    pub build_frames_total: u32,
}

/// Dozer-side construction assignment.
#[derive(Component, Debug, Clone, Default)]
pub struct DozerState {
    pub construct_target: Option<ObjectId>,
}

/// Countdown started by a sell command.
#[derive(Component, Debug, Clone, Copy)]
pub struct SellState {
    pub frames_remaining: u32,
}

/// Produced-from-parking back-reference; shields the aircraft from
/// incidental projectile collisions with its home building.
#[derive(Component, Debug, Clone, Copy)]
pub struct ParkingReservation {
    pub building: ObjectId,
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Slow-death grace window. The entity is dead but still rendered.
#[derive(Component, Debug, Clone, Default)]
pub struct DyingState {
    pub destruction_remaining: u32,
    pub sink_remaining: u32,
    pub sinking: bool,
    pub ocl_final: Option<String>,
}

/// Marks an entity for despawn in the cleanup phase.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct PendingDestroy;

#[derive(Component, Debug, Clone, Copy)]
pub struct LifetimeState {
    pub remaining: u32,
}

// ============================================================================
// SPECIAL SUBSYSTEM STATES
// ============================================================================

#[derive(Component, Debug, Clone, Default)]
pub struct MinefieldState {
    pub virtual_mines: f32,
    pub scan_cooldown: u32,
}

#[derive(Component, Debug, Clone, Default)]
pub struct DemoTrapState {
    pub proximity_mode: bool,
    pub scan_cooldown: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    #[default]
    ReadyToMove,
    Unpacking,
    ReadyToAttack,
    Packing,
}

#[derive(Component, Debug, Clone, Default)]
pub struct DeployState {
    pub mode: DeployMode,
    pub timer: u32,
}

#[derive(Component, Debug, Clone, Default)]
pub struct PointDefenseState {
    pub scan_cooldown: u32,
}

#[derive(Component, Debug, Clone, Default)]
pub struct HordeState {
    pub cooldown: u32,
    pub in_horde: bool,
}

#[derive(Component, Debug, Clone, Default)]
pub struct ProneState {
    pub frames: u32,
}

#[derive(Component, Debug, Clone, Default)]
pub struct RebuildHoleState {
    /// Template of the structure this hole rebuilds.
    pub rebuild_template: String,
    pub rebuild_angle: f32,
    pub worker: Option<ObjectId>,
    pub reconstruction: Option<ObjectId>,
    pub worker_respawn_timer: u32,
}

#[derive(Component, Debug, Clone, Default)]
pub struct AutoDepositState {
    pub cooldown: u32,
    pub initial_bonus_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HackMode {
    #[default]
    Packed,
    Unpacking,
    Unpacked,
    Packing,
}

#[derive(Component, Debug, Clone, Default)]
pub struct HackInternetState {
    pub mode: HackMode,
    pub timer: u32,
    pub cash_cooldown: u32,
    /// Move goals buffered while packing, flushed when the pack completes.
    pub deferred_moves: Vec<(f32, f32)>,
}

#[derive(Component, Debug, Clone, Default)]
pub struct RailedTransportState {
    /// Waypoint-prefix endpoint currently docked at.
    pub docked_prefix: Option<String>,
    pub in_transit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattlePlanKind {
    Bombardment,
    HoldTheLine,
    SearchAndDestroy,
}

impl BattlePlanKind {
    pub fn bonus(&self) -> WeaponBonus {
        match self {
            Self::Bombardment => WeaponBonus::BOMBARDMENT,
            Self::HoldTheLine => WeaponBonus::HOLD_THE_LINE,
            Self::SearchAndDestroy => WeaponBonus::SEARCH_AND_DESTROY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BattlePlanPhase {
    #[default]
    Idle,
    Unpacking,
    Active,
    Packing,
}

#[derive(Component, Debug, Clone, Default)]
pub struct BattlePlanState {
    pub phase: BattlePlanPhase,
    pub current: Option<BattlePlanKind>,
    /// Plan queued behind an in-progress pack.
    pub pending: Option<BattlePlanKind>,
    pub timer: u32,
}

/// Per-source special-power cooldowns: template name -> frame when ready.
#[derive(Component, Debug, Clone, Default)]
pub struct SpecialPowerReady {
    pub ready_frame: BTreeMap<String, u64>,
}

// ============================================================================
// RENDERING METADATA
// ============================================================================

/// Render projection data surfaced in snapshots; the core never draws.
#[derive(Component, Debug, Clone, Default)]
pub struct RenderMeta {
    pub asset_path: Option<String>,
    pub asset_resolved: bool,
    pub candidates: Vec<String>,
    /// IDLE | MOVE | ATTACK | DIE -> clip name.
    pub clips: BTreeMap<String, String>,
}

/// Sight range with battle-plan scaling applied multiplicatively.
#[derive(Component, Debug, Clone)]
pub struct Vision {
    pub range: f32,
    pub scalar: f32,
}

impl Default for Vision {
    fn default() -> Self {
        Self {
            range: 0.0,
            scalar: 1.0,
        }
    }
}

impl Vision {
    pub fn effective(&self) -> f32 {
        self.range * self.scalar
    }
}
