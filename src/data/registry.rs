//! Normalized, indexed view of the data bundle.
//!
//! The registry is built once and read-only afterwards. All names are
//! trimmed and upper-cased (sides lower-cased) at build time, inheritance is
//! flattened, `BuildVariations` equivalence classes are indexed, and weapon
//! timings are converted from milliseconds to whole logic frames.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use bevy_ecs::prelude::*;
use thiserror::Error;

use crate::components::WeaponBonus;
use crate::data::bundle::*;

/// Logical simulation rate.
pub const LOGIC_FRAMES_PER_SECOND: u32 = 30;
/// Milliseconds represented by one logic frame.
pub const MS_PER_FRAME: f32 = 1000.0 / LOGIC_FRAMES_PER_SECOND as f32;

/// Convert a millisecond duration from data into whole frames.
pub fn frames_from_ms(ms: f32) -> u32 {
    if ms <= 0.0 {
        0
    } else {
        (ms * LOGIC_FRAMES_PER_SECOND as f32 / 1000.0).ceil() as u32
    }
}

/// Convert a second duration (INI `BuildTime`) into whole frames.
pub fn frames_from_seconds(seconds: f32) -> u32 {
    frames_from_ms(seconds * 1000.0)
}

/// Canonical template/weapon/upgrade name form: trimmed, upper-cased.
pub fn norm_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Canonical side form: trimmed, lower-cased.
pub fn norm_side(side: &str) -> String {
    side.trim().to_ascii_lowercase()
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("heightmap bytes are not valid base64: {0}")]
    Heightmap(#[from] base64::DecodeError),
    #[error("object {0} inherits through a cycle")]
    InheritanceCycle(String),
}

// ============================================================================
// NORMALIZED DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Buildable {
    #[default]
    Yes,
    No,
    OnlyByAi,
    IgnorePrerequisites,
}

impl Buildable {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(norm_name).as_deref() {
            Some("NO") => Self::No,
            Some("ONLY_BY_AI") => Self::OnlyByAi,
            Some("IGNORE_PREREQUISITES") => Self::IgnorePrerequisites,
            _ => Self::Yes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryShape {
    Cylinder,
    Box,
}

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub shape: GeometryShape,
    pub major_radius: f32,
    pub minor_radius: f32,
    pub height: f32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            shape: GeometryShape::Cylinder,
            major_radius: 5.0,
            minor_radius: 5.0,
            height: 10.0,
        }
    }
}

/// One `WeaponSet` with its parsed condition bitset and weapon slot names.
#[derive(Debug, Clone, Default)]
pub struct WeaponSetDef {
    pub conditions: WeaponBonus,
    pub slots: [Option<String>; 3],
}

#[derive(Debug, Clone, Default)]
pub struct ArmorSetDef {
    /// `PLAYER_UPGRADE` marks the upgraded set; empty is the default set.
    pub conditions: Vec<String>,
    pub armor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocomotorSetDef {
    pub condition: String,
    pub locomotor: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrereqBlock {
    pub objects: Vec<String>,
    pub sciences: Vec<String>,
}

/// Render metadata surfaced verbatim in snapshots.
#[derive(Debug, Clone, Default)]
pub struct RenderTemplate {
    pub candidates: Vec<String>,
    /// IDLE | MOVE | ATTACK | DIE -> clip name.
    pub clips: BTreeMap<String, String>,
}

/// Fully resolved object template.
#[derive(Debug, Clone)]
pub struct ObjectDef {
    pub name: String,
    pub side: String,
    pub kind_of: BTreeSet<String>,
    pub build_cost: i64,
    pub build_time_frames: u32,
    pub max_simultaneous: Option<u32>,
    pub max_simultaneous_link_key: Option<String>,
    pub buildable: Buildable,
    pub vision_range: f32,
    pub command_set: Option<String>,
    pub energy_production: i32,
    pub energy_bonus: i32,
    pub geometry: Geometry,
    pub speed: f32,
    pub crusher_level: u8,
    pub crushable_level: u8,
    pub sneaky_offset: f32,
    pub attackers_miss_persist_frames: u32,
    pub experience_required: [i32; 4],
    pub experience_value: [i32; 4],
    pub refund_value: i64,
    pub build_variations: Vec<String>,
    pub max_health: f32,
    pub initial_health: Option<f32>,
    pub weapon_sets: Vec<WeaponSetDef>,
    pub armor_sets: Vec<ArmorSetDef>,
    pub locomotor_sets: Vec<LocomotorSetDef>,
    pub prerequisites: Vec<PrereqBlock>,
    pub behaviors: Vec<BehaviorInput>,
    pub render: RenderTemplate,
}

impl ObjectDef {
    pub fn is_kind(&self, flag: &str) -> bool {
        self.kind_of.contains(flag)
    }

    /// Rest height above terrain, derived from kind and geometry.
    pub fn base_height(&self) -> f32 {
        if self.is_kind("AIRCRAFT") {
            20.0
        } else if self.is_kind("STRUCTURE") {
            self.geometry.height
        } else {
            0.0
        }
    }

    /// Bounding sphere radius for 3D radius-damage distance math.
    pub fn bounding_sphere_radius(&self) -> f32 {
        let bsr = self.geometry.major_radius.max(self.base_height());
        if self.is_kind("STRUCTURE") {
            bsr.max(10.0)
        } else {
            bsr
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreAttackType {
    #[default]
    PerShot,
    PerAttack,
    PerClip,
}

bitflags::bitflags! {
    /// `RadiusDamageAffects` mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RadiusAffects: u16 {
        const ENEMIES = 1 << 0;
        const ALLIES = 1 << 1;
        const SELF = 1 << 2;
        const SUICIDE = 1 << 3;
        const NOT_SIMILAR = 1 << 4;
        const NEUTRAL = 1 << 5;
        const NOT_AIRBORNE = 1 << 6;
    }
}

impl RadiusAffects {
    fn parse(names: &[String]) -> Self {
        let mut mask = Self::empty();
        for name in names {
            match norm_name(name).as_str() {
                "ENEMIES" => mask |= Self::ENEMIES,
                "ALLIES" => mask |= Self::ALLIES,
                "SELF" => mask |= Self::SELF,
                "SUICIDE" => mask |= Self::SUICIDE,
                "NOT_SIMILAR" => mask |= Self::NOT_SIMILAR,
                "NEUTRAL" => mask |= Self::NEUTRAL,
                "NOT_AIRBORNE" => mask |= Self::NOT_AIRBORNE,
                _ => {}
            }
        }
        if mask.is_empty() {
            Self::ENEMIES
        } else {
            mask
        }
    }
}

/// Input `WeaponSpeed` at or above this is an instant hit.
pub const INSTANT_WEAPON_SPEED: f32 = 999_999.0;

/// Fully resolved weapon template, timings in frames, speed per frame.
#[derive(Debug, Clone)]
pub struct WeaponDef {
    pub name: String,
    pub primary_damage: f32,
    pub primary_radius: f32,
    pub secondary_damage: f32,
    pub secondary_radius: f32,
    pub radius_affects: RadiusAffects,
    pub radius_angle: Option<f32>,
    pub self_position: bool,
    pub attack_range: f32,
    pub min_range: f32,
    pub continue_range: f32,
    /// None = instant hit.
    pub speed_per_frame: Option<f32>,
    pub min_speed_per_frame: f32,
    pub scale_speed: bool,
    pub delay_frames: u32,
    pub clip_size: u32,
    pub clip_reload_frames: u32,
    pub pre_attack_frames: u32,
    pub pre_attack_type: PreAttackType,
    pub auto_reload_idle_frames: Option<u32>,
    pub projectile: Option<String>,
    pub projectile_collides: Vec<String>,
    pub scatter_radius: f32,
    pub scatter_radius_infantry: f32,
    pub scatter_targets: Vec<(f32, f32)>,
    pub scatter_scalar: f32,
    pub damage_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArmorDef {
    pub name: String,
    pub default_coefficient: f32,
    pub coefficients: BTreeMap<String, f32>,
}

impl ArmorDef {
    /// Damage fraction for a damage type; 1.0 when not listed.
    pub fn coefficient(&self, damage_type: &str) -> f32 {
        self.coefficients
            .get(damage_type)
            .copied()
            .unwrap_or(self.default_coefficient)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeType {
    #[default]
    Player,
    Object,
}

#[derive(Debug, Clone)]
pub struct UpgradeDef {
    pub name: String,
    pub upgrade_type: UpgradeType,
    pub build_cost: i64,
    pub build_time_frames: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ScienceDef {
    pub name: String,
    pub purchase_cost: i32,
    pub prerequisites: Vec<String>,
    pub is_grantable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LocomotorDef {
    pub name: String,
    /// World units per second.
    pub speed: f32,
    pub surfaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonCommand {
    UnitBuild,
    PlayerUpgrade,
    ObjectUpgrade,
    DozerConstruct,
    SpecialPower,
    Other,
}

#[derive(Debug, Clone)]
pub struct CommandButtonDef {
    pub name: String,
    pub command: ButtonCommand,
    pub object: Option<String>,
    pub upgrade: Option<String>,
    pub special_power: Option<String>,
    pub options: Vec<String>,
}

impl CommandButtonDef {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandSetDef {
    pub name: String,
    pub buttons: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SpecialPowerDef {
    pub name: String,
    pub template: String,
    pub reload_frames: u32,
    pub shared_synced_timer: bool,
    pub ocl: Option<String>,
    pub amount: i64,
    pub damage: f32,
    pub radius: f32,
    pub damage_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct OclDef {
    pub name: String,
    pub entries: Vec<OclEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct OclEntry {
    pub template: String,
    pub count: u32,
    pub offset: (f32, f32),
    pub spread: f32,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Read-only post-load registry resource. Cheap to clone (shared defs).
#[derive(Resource, Debug, Clone, Default)]
pub struct DataRegistry {
    objects: HashMap<String, Arc<ObjectDef>>,
    weapons: HashMap<String, Arc<WeaponDef>>,
    armors: HashMap<String, Arc<ArmorDef>>,
    upgrades: HashMap<String, Arc<UpgradeDef>>,
    sciences: HashMap<String, Arc<ScienceDef>>,
    locomotors: HashMap<String, Arc<LocomotorDef>>,
    command_buttons: HashMap<String, Arc<CommandButtonDef>>,
    command_sets: HashMap<String, Arc<CommandSetDef>>,
    special_powers: HashMap<String, Arc<SpecialPowerDef>>,
    ocls: HashMap<String, Arc<OclDef>>,
    variation_canon: HashMap<String, String>,
    factions: Vec<String>,
}

impl DataRegistry {
    pub fn from_json(json: &str) -> Result<Self, DataError> {
        let bundle: DataBundle = serde_json::from_str(json)?;
        Self::from_bundle(&bundle)
    }

    pub fn from_bundle(bundle: &DataBundle) -> Result<Self, DataError> {
        let mut registry = Self {
            factions: bundle.factions.iter().map(|f| norm_side(f)).collect(),
            ..Self::default()
        };

        let raw_objects: HashMap<String, &ObjectInput> = bundle
            .objects
            .iter()
            .map(|o| (norm_name(&o.name), o))
            .collect();

        for input in &bundle.objects {
            let def = resolve_object(&raw_objects, input, &mut Vec::new())?;
            let name = def.name.clone();
            for variation in &def.build_variations {
                registry.variation_canon.insert(variation.clone(), name.clone());
            }
            registry.objects.insert(name, Arc::new(def));
        }

        for input in &bundle.weapons {
            let def = normalize_weapon(input);
            registry.weapons.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.armors {
            let def = normalize_armor(input);
            registry.armors.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.upgrades {
            let def = UpgradeDef {
                name: norm_name(&input.name),
                upgrade_type: match input.r#type.as_deref().map(norm_name).as_deref() {
                    Some("OBJECT") => UpgradeType::Object,
                    _ => UpgradeType::Player,
                },
                build_cost: input.build_cost,
                build_time_frames: frames_from_seconds(input.build_time),
            };
            registry.upgrades.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.sciences {
            let def = ScienceDef {
                name: norm_name(&input.name),
                purchase_cost: input.science_purchase_point_cost,
                prerequisites: input.prerequisite_sciences.iter().map(|s| norm_name(s)).collect(),
                is_grantable: input.is_grantable,
            };
            registry.sciences.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.locomotors {
            let def = LocomotorDef {
                name: norm_name(&input.name),
                speed: input.speed,
                surfaces: input.surfaces.iter().map(|s| norm_name(s)).collect(),
            };
            registry.locomotors.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.command_buttons {
            let def = CommandButtonDef {
                name: norm_name(&input.name),
                command: match norm_name(&input.command).as_str() {
                    "UNIT_BUILD" => ButtonCommand::UnitBuild,
                    "PLAYER_UPGRADE" => ButtonCommand::PlayerUpgrade,
                    "OBJECT_UPGRADE" => ButtonCommand::ObjectUpgrade,
                    "DOZER_CONSTRUCT" => ButtonCommand::DozerConstruct,
                    "SPECIAL_POWER" => ButtonCommand::SpecialPower,
                    _ => ButtonCommand::Other,
                },
                object: input.object.as_deref().map(norm_name),
                upgrade: input.upgrade.as_deref().map(norm_name),
                special_power: input.special_power.as_deref().map(norm_name),
                options: input.options.iter().map(|o| norm_name(o)).collect(),
            };
            registry.command_buttons.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.command_sets {
            let def = CommandSetDef {
                name: norm_name(&input.name),
                buttons: input
                    .buttons
                    .iter()
                    .map(|(slot, button)| (*slot, norm_name(button)))
                    .collect(),
            };
            registry.command_sets.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.special_powers {
            let def = SpecialPowerDef {
                name: norm_name(&input.name),
                template: norm_name(&input.template),
                reload_frames: frames_from_ms(input.reload_time),
                shared_synced_timer: input.shared_synced_timer,
                ocl: input.ocl.as_deref().map(norm_name),
                amount: input.amount.unwrap_or(0),
                damage: input.damage.unwrap_or(0.0),
                radius: input.radius.unwrap_or(0.0),
                damage_type: input
                    .damage_type
                    .as_deref()
                    .map(norm_name)
                    .unwrap_or_else(|| "EXPLOSION".to_string()),
            };
            registry.special_powers.insert(def.name.clone(), Arc::new(def));
        }
        for input in &bundle.object_creation_lists {
            let def = OclDef {
                name: norm_name(&input.name),
                entries: input
                    .entries
                    .iter()
                    .map(|e| OclEntry {
                        template: norm_name(&e.template),
                        count: e.count.max(1),
                        offset: e.offset,
                        spread: e.spread,
                    })
                    .collect(),
            };
            registry.ocls.insert(def.name.clone(), Arc::new(def));
        }

        Ok(registry)
    }

    pub fn object_def(&self, name: &str) -> Option<Arc<ObjectDef>> {
        self.objects.get(&norm_name(name)).cloned()
    }

    pub fn weapon_def(&self, name: &str) -> Option<Arc<WeaponDef>> {
        self.weapons.get(&norm_name(name)).cloned()
    }

    pub fn armor_def(&self, name: &str) -> Option<Arc<ArmorDef>> {
        self.armors.get(&norm_name(name)).cloned()
    }

    pub fn upgrade_def(&self, name: &str) -> Option<Arc<UpgradeDef>> {
        self.upgrades.get(&norm_name(name)).cloned()
    }

    pub fn science_def(&self, name: &str) -> Option<Arc<ScienceDef>> {
        self.sciences.get(&norm_name(name)).cloned()
    }

    pub fn locomotor_def(&self, name: &str) -> Option<Arc<LocomotorDef>> {
        self.locomotors.get(&norm_name(name)).cloned()
    }

    pub fn command_button(&self, name: &str) -> Option<Arc<CommandButtonDef>> {
        self.command_buttons.get(&norm_name(name)).cloned()
    }

    pub fn command_set(&self, name: &str) -> Option<Arc<CommandSetDef>> {
        self.command_sets.get(&norm_name(name)).cloned()
    }

    pub fn special_power_def(&self, name: &str) -> Option<Arc<SpecialPowerDef>> {
        self.special_powers.get(&norm_name(name)).cloned()
    }

    pub fn object_creation_list(&self, name: &str) -> Option<Arc<OclDef>> {
        self.ocls.get(&norm_name(name)).cloned()
    }

    pub fn factions(&self) -> &[String] {
        &self.factions
    }

    /// Canonical name for MaxSimultaneous/prerequisite/quantity equivalence.
    pub fn build_variation_class(&self, name: &str) -> String {
        let name = norm_name(name);
        self.variation_canon.get(&name).cloned().unwrap_or(name)
    }

    pub fn is_science_grantable(&self, name: &str) -> bool {
        self.science_def(name).map(|s| s.is_grantable).unwrap_or(false)
    }

    pub fn science_cost(&self, name: &str) -> i32 {
        self.science_def(name).map(|s| s.purchase_cost).unwrap_or(0)
    }

    pub fn science_prerequisites(&self, name: &str) -> Vec<String> {
        self.science_def(name)
            .map(|s| s.prerequisites.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

fn resolve_object(
    raw: &HashMap<String, &ObjectInput>,
    input: &ObjectInput,
    visiting: &mut Vec<String>,
) -> Result<ObjectDef, DataError> {
    let name = norm_name(&input.name);
    if visiting.contains(&name) {
        return Err(DataError::InheritanceCycle(name));
    }

    let mut def = match input.inherits.as_deref().map(norm_name) {
        Some(parent_name) => match raw.get(&parent_name) {
            Some(parent) => {
                visiting.push(name.clone());
                let resolved = resolve_object(raw, parent, visiting)?;
                visiting.pop();
                resolved
            }
            None => default_object_def(),
        },
        None => default_object_def(),
    };

    def.name = name;
    if let Some(side) = &input.side {
        def.side = norm_side(side);
    }
    for kind in &input.kind_of {
        def.kind_of.insert(norm_name(kind));
    }
    if let Some(v) = input.build_cost {
        def.build_cost = v;
    }
    if let Some(v) = input.build_time {
        def.build_time_frames = frames_from_seconds(v);
    }
    if let Some(v) = input.max_simultaneous_of_type {
        def.max_simultaneous = Some(v);
    }
    if let Some(v) = &input.max_simultaneous_link_key {
        def.max_simultaneous_link_key = Some(norm_name(v));
    }
    if input.buildable.is_some() {
        def.buildable = Buildable::parse(input.buildable.as_deref());
    }
    if let Some(v) = input.vision_range {
        def.vision_range = v;
    }
    if let Some(v) = &input.command_set {
        def.command_set = Some(norm_name(v));
    }
    if let Some(v) = input.energy_production {
        def.energy_production = v;
    }
    if let Some(v) = input.energy_bonus {
        def.energy_bonus = v;
    }
    if let Some(g) = &input.geometry {
        def.geometry = Geometry {
            shape: match norm_name(&g.shape).as_str() {
                "BOX" => GeometryShape::Box,
                _ => GeometryShape::Cylinder,
            },
            major_radius: g.major_radius,
            minor_radius: g.minor_radius,
            height: g.height,
        };
    }
    if let Some(v) = input.speed {
        def.speed = v;
    }
    if let Some(v) = input.crusher_level {
        def.crusher_level = v;
    }
    if let Some(v) = input.crushable_level {
        def.crushable_level = v;
    }
    if let Some(v) = input.sneaky_offset_when_attacking {
        def.sneaky_offset = v;
    }
    if let Some(v) = input.attackers_miss_persist_time {
        def.attackers_miss_persist_frames = frames_from_ms(v);
    }
    if let Some(v) = &input.experience_required {
        def.experience_required = levels_array(v);
    }
    if let Some(v) = &input.experience_value {
        def.experience_value = levels_array(v);
    }
    if let Some(v) = input.refund_value {
        def.refund_value = v;
    }
    if !input.build_variations.is_empty() {
        def.build_variations = input.build_variations.iter().map(|v| norm_name(v)).collect();
    }
    if let Some(body) = &input.body {
        if let Some(v) = body.max_health {
            def.max_health = v;
        }
        def.initial_health = body.initial_health.or(def.initial_health);
    }
    if !input.weapon_sets.is_empty() {
        def.weapon_sets = input
            .weapon_sets
            .iter()
            .map(|ws| WeaponSetDef {
                conditions: WeaponBonus::parse_conditions(&ws.conditions),
                slots: [
                    ws.primary.as_deref().map(norm_name),
                    ws.secondary.as_deref().map(norm_name),
                    ws.tertiary.as_deref().map(norm_name),
                ],
            })
            .collect();
    }
    if !input.armor_sets.is_empty() {
        def.armor_sets = input
            .armor_sets
            .iter()
            .map(|set| ArmorSetDef {
                conditions: set.conditions.iter().map(|c| norm_name(c)).collect(),
                armor: set.armor.as_deref().map(norm_name),
            })
            .collect();
    }
    if !input.locomotor_sets.is_empty() {
        def.locomotor_sets = input
            .locomotor_sets
            .iter()
            .map(|set| LocomotorSetDef {
                condition: norm_name(&set.condition),
                locomotor: norm_name(&set.locomotor),
            })
            .collect();
    }
    if !input.prerequisites.is_empty() {
        def.prerequisites = input
            .prerequisites
            .iter()
            .map(|p| PrereqBlock {
                objects: p.objects.iter().map(|o| norm_name(o)).collect(),
                sciences: p.sciences.iter().map(|s| norm_name(s)).collect(),
            })
            .collect();
    }
    if !input.draw.is_empty() {
        let mut render = RenderTemplate::default();
        for state in &input.draw {
            if let Some(model) = &state.model {
                if !render.candidates.contains(model) {
                    render.candidates.push(model.clone());
                }
            }
            for (key, clip) in [
                ("IDLE", &state.idle_animation),
                ("MOVE", &state.move_animation),
                ("ATTACK", &state.attack_animation),
                ("DIE", &state.die_animation),
            ] {
                if let Some(clip) = clip {
                    render.clips.entry(key.to_string()).or_insert_with(|| clip.clone());
                }
            }
        }
        def.render = render;
    }
    if !input.behaviors.is_empty() {
        def.behaviors
            .extend(input.behaviors.iter().map(normalize_behavior));
    }

    Ok(def)
}

fn default_object_def() -> ObjectDef {
    ObjectDef {
        name: String::new(),
        side: String::new(),
        kind_of: BTreeSet::new(),
        build_cost: 0,
        build_time_frames: 0,
        max_simultaneous: None,
        max_simultaneous_link_key: None,
        buildable: Buildable::Yes,
        vision_range: 0.0,
        command_set: None,
        energy_production: 0,
        energy_bonus: 0,
        geometry: Geometry::default(),
        speed: 0.0,
        crusher_level: 0,
        crushable_level: 0,
        sneaky_offset: 0.0,
        attackers_miss_persist_frames: 0,
        experience_required: [0, i32::MAX, i32::MAX, i32::MAX],
        experience_value: [0, 0, 0, 0],
        refund_value: 0,
        build_variations: Vec::new(),
        max_health: 100.0,
        initial_health: None,
        weapon_sets: Vec::new(),
        armor_sets: Vec::new(),
        locomotor_sets: Vec::new(),
        prerequisites: Vec::new(),
        behaviors: Vec::new(),
        render: RenderTemplate::default(),
    }
}

fn levels_array(values: &[i32]) -> [i32; 4] {
    let mut out = [0, i32::MAX, i32::MAX, i32::MAX];
    for (slot, value) in out.iter_mut().zip(values.iter()) {
        *slot = *value;
    }
    out
}

fn normalize_weapon(input: &WeaponInput) -> WeaponDef {
    let speed_per_frame = match input.weapon_speed {
        Some(speed) if speed < INSTANT_WEAPON_SPEED => {
            Some(speed / LOGIC_FRAMES_PER_SECOND as f32)
        }
        _ => None,
    };
    WeaponDef {
        name: norm_name(&input.name),
        primary_damage: input.primary_damage,
        primary_radius: input.primary_damage_radius,
        secondary_damage: input.secondary_damage,
        secondary_radius: input.secondary_damage_radius,
        radius_affects: RadiusAffects::parse(&input.radius_damage_affects),
        radius_angle: input.radius_damage_angle,
        self_position: input.damage_dealt_at_self_position,
        attack_range: input.attack_range,
        min_range: input.minimum_attack_range,
        continue_range: input.continue_attack_range,
        speed_per_frame,
        min_speed_per_frame: input.min_weapon_speed.unwrap_or(0.0)
            / LOGIC_FRAMES_PER_SECOND as f32,
        scale_speed: input.scale_weapon_speed,
        delay_frames: frames_from_ms(input.delay_between_shots),
        clip_size: input.clip_size,
        clip_reload_frames: frames_from_ms(input.clip_reload_time),
        pre_attack_frames: frames_from_ms(input.pre_attack_delay),
        pre_attack_type: match input.pre_attack_type.as_deref().map(norm_name).as_deref() {
            Some("PER_ATTACK") => PreAttackType::PerAttack,
            Some("PER_CLIP") => PreAttackType::PerClip,
            _ => PreAttackType::PerShot,
        },
        auto_reload_idle_frames: input.auto_reload_when_idle.map(frames_from_ms),
        projectile: input.projectile_object.as_deref().map(norm_name),
        projectile_collides: input
            .projectile_collides_with
            .iter()
            .map(|k| norm_name(k))
            .collect(),
        scatter_radius: input.scatter_radius,
        scatter_radius_infantry: input.scatter_radius_vs_infantry,
        scatter_targets: input.scatter_target.clone(),
        scatter_scalar: if input.scatter_target_scalar == 0.0 {
            1.0
        } else {
            input.scatter_target_scalar
        },
        damage_type: input
            .damage_type
            .as_deref()
            .map(norm_name)
            .unwrap_or_else(|| "EXPLOSION".to_string()),
    }
}

fn normalize_armor(input: &ArmorInput) -> ArmorDef {
    let mut default_coefficient = 1.0;
    let mut coefficients = BTreeMap::new();
    for entry in &input.coefficients {
        let damage_type = norm_name(&entry.damage_type);
        let fraction = entry.percent / 100.0;
        if damage_type == "DEFAULT" {
            default_coefficient = fraction;
        } else {
            coefficients.insert(damage_type, fraction);
        }
    }
    ArmorDef {
        name: norm_name(&input.name),
        default_coefficient,
        coefficients,
    }
}

fn normalize_behavior(module: &BehaviorInput) -> BehaviorInput {
    let mut module = module.clone();
    match &mut module {
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
        | BehaviorInput::UnpauseSpecialPowerUpgrade { trigger, .. } => {
            normalize_trigger(trigger);
        }
        _ => {}
    }
    match &mut module {
        BehaviorInput::LocomotorSetUpgrade { upgraded_set, .. } => {
            *upgraded_set = norm_name(upgraded_set);
        }
        BehaviorInput::StatusBitsUpgrade {
            status_to_set,
            status_to_clear,
            ..
        } => {
            for status in status_to_set.iter_mut().chain(status_to_clear.iter_mut()) {
                *status = norm_name(status);
            }
        }
        BehaviorInput::CommandSetUpgrade {
            command_set,
            command_set_alt,
            trigger_alt,
            ..
        } => {
            *command_set = norm_name(command_set);
            *command_set_alt = command_set_alt.as_deref().map(norm_name);
            *trigger_alt = trigger_alt.as_deref().map(norm_name);
        }
        BehaviorInput::GrantScienceUpgrade { grant_science, .. } => {
            for science in grant_science.iter_mut() {
                *science = norm_name(science);
            }
        }
        BehaviorInput::CostModifierUpgrade { effect_kind_of, .. } => {
            for kind in effect_kind_of.iter_mut() {
                *kind = norm_name(kind);
            }
        }
        BehaviorInput::UnpauseSpecialPowerUpgrade {
            special_power_template,
            ..
        } => {
            *special_power_template = norm_name(special_power_template);
        }
        BehaviorInput::ProductionUpdate {
            quantity_modifiers, ..
        } => {
            for modifier in quantity_modifiers.iter_mut() {
                modifier.template = norm_name(&modifier.template);
            }
        }
        BehaviorInput::HelixContain {
            payload_template_name,
            ..
        } => {
            for template in payload_template_name.iter_mut() {
                *template = norm_name(template);
            }
        }
        BehaviorInput::SlowDeathBehavior {
            ocl_initial,
            ocl_final,
            ..
        } => {
            *ocl_initial = ocl_initial.as_deref().map(norm_name);
            *ocl_final = ocl_final.as_deref().map(norm_name);
        }
        BehaviorInput::FireWeaponWhenDeadBehavior { death_weapon } => {
            *death_weapon = norm_name(death_weapon);
        }
        BehaviorInput::FireWeaponWhenDamagedBehavior {
            reaction_weapon_pristine,
            reaction_weapon_damaged,
            ..
        } => {
            *reaction_weapon_pristine = reaction_weapon_pristine.as_deref().map(norm_name);
            *reaction_weapon_damaged = reaction_weapon_damaged.as_deref().map(norm_name);
        }
        BehaviorInput::GenerateMinefieldBehavior { mine_name, .. } => {
            *mine_name = norm_name(mine_name);
        }
        BehaviorInput::MinefieldBehavior {
            detonation_weapon,
            detonated_by,
            ..
        } => {
            *detonation_weapon = norm_name(detonation_weapon);
            for mask in detonated_by.iter_mut() {
                *mask = norm_name(mask);
            }
        }
        BehaviorInput::DemoTrapUpdate {
            detonation_weapon, ..
        } => {
            *detonation_weapon = norm_name(detonation_weapon);
        }
        BehaviorInput::PointDefenseLaserUpdate {
            weapon_template,
            primary_target_types,
            secondary_target_types,
            ..
        } => {
            *weapon_template = norm_name(weapon_template);
            for kind in primary_target_types
                .iter_mut()
                .chain(secondary_target_types.iter_mut())
            {
                *kind = norm_name(kind);
            }
        }
        BehaviorInput::HordeUpdate { kind_of, .. } => {
            for kind in kind_of.iter_mut() {
                *kind = norm_name(kind);
            }
        }
        BehaviorInput::RebuildHoleExposeDie { hole_name } => {
            *hole_name = norm_name(hole_name);
        }
        BehaviorInput::RebuildHoleBehavior {
            worker_object_name, ..
        } => {
            *worker_object_name = norm_name(worker_object_name);
        }
        BehaviorInput::RailedTransportAIUpdate { path_prefix_name } => {
            *path_prefix_name = norm_name(path_prefix_name);
        }
        BehaviorInput::BattlePlanUpdate {
            bombardment_plan,
            hold_the_line_plan,
            search_and_destroy_plan,
            valid_member_kind_of,
            invalid_member_kind_of,
            ..
        } => {
            *bombardment_plan = norm_name(bombardment_plan);
            *hold_the_line_plan = norm_name(hold_the_line_plan);
            *search_and_destroy_plan = norm_name(search_and_destroy_plan);
            for kind in valid_member_kind_of
                .iter_mut()
                .chain(invalid_member_kind_of.iter_mut())
            {
                *kind = norm_name(kind);
            }
        }
        BehaviorInput::SpecialPowerModule {
            special_power_template,
        } => {
            *special_power_template = norm_name(special_power_template);
        }
        _ => {}
    }
    module
}

fn normalize_trigger(trigger: &mut UpgradeTrigger) {
    for name in trigger
        .triggered_by
        .iter_mut()
        .chain(trigger.removes_upgrades.iter_mut())
    {
        *name = norm_name(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str) -> ObjectInput {
        ObjectInput {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_conversion() {
        assert_eq!(frames_from_ms(100.0), 3);
        assert_eq!(frames_from_ms(66.0), 2);
        assert_eq!(frames_from_ms(0.0), 0);
        assert_eq!(frames_from_seconds(0.1), 3);
        assert_eq!(frames_from_seconds(1.0), 30);
    }

    #[test]
    fn test_name_normalization_on_lookup() {
        let bundle = DataBundle {
            objects: vec![object("AmericaTankCrusader")],
            ..Default::default()
        };
        let registry = DataRegistry::from_bundle(&bundle).unwrap();
        let def = registry.object_def("  americaTankCrusader ").unwrap();
        assert_eq!(def.name, "AMERICATANKCRUSADER");
    }

    #[test]
    fn test_inheritance_merges_parent_fields() {
        let mut parent = object("TankBase");
        parent.build_cost = Some(900);
        parent.kind_of = vec!["VEHICLE".to_string()];
        parent.vision_range = Some(150.0);

        let mut child = object("TankChild");
        child.inherits = Some("TankBase".to_string());
        child.vision_range = Some(200.0);
        child.kind_of = vec!["SELECTABLE".to_string()];

        let bundle = DataBundle {
            objects: vec![parent, child],
            ..Default::default()
        };
        let registry = DataRegistry::from_bundle(&bundle).unwrap();
        let def = registry.object_def("TankChild").unwrap();
        assert_eq!(def.build_cost, 900);
        assert_eq!(def.vision_range, 200.0);
        assert!(def.is_kind("VEHICLE"));
        assert!(def.is_kind("SELECTABLE"));
    }

    #[test]
    fn test_inheritance_cycle_is_an_error() {
        let mut a = object("A");
        a.inherits = Some("B".to_string());
        let mut b = object("B");
        b.inherits = Some("A".to_string());
        let bundle = DataBundle {
            objects: vec![a, b],
            ..Default::default()
        };
        assert!(matches!(
            DataRegistry::from_bundle(&bundle),
            Err(DataError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn test_build_variation_class() {
        let mut def = object("ChinaRedguard");
        def.build_variations = vec!["ChinaRedguardAlt".to_string()];
        let bundle = DataBundle {
            objects: vec![def],
            ..Default::default()
        };
        let registry = DataRegistry::from_bundle(&bundle).unwrap();
        assert_eq!(registry.build_variation_class("chinaRedguardAlt"), "CHINAREDGUARD");
        assert_eq!(registry.build_variation_class("CHINAREDGUARD"), "CHINAREDGUARD");
        assert_eq!(registry.build_variation_class("Unknown"), "UNKNOWN");
    }

    #[test]
    fn test_weapon_normalization() {
        let weapon = WeaponInput {
            name: "TankGun".to_string(),
            primary_damage: 30.0,
            attack_range: 120.0,
            delay_between_shots: 100.0,
            weapon_speed: Some(999999.0),
            ..Default::default()
        };
        let bundle = DataBundle {
            weapons: vec![weapon],
            ..Default::default()
        };
        let registry = DataRegistry::from_bundle(&bundle).unwrap();
        let def = registry.weapon_def("tankgun").unwrap();
        assert_eq!(def.delay_frames, 3);
        assert!(def.speed_per_frame.is_none(), "999999 means instant");
        assert_eq!(def.damage_type, "EXPLOSION");
        assert_eq!(def.radius_affects, RadiusAffects::ENEMIES);
    }

    #[test]
    fn test_armor_coefficients() {
        let armor = ArmorInput {
            name: "TankArmor".to_string(),
            coefficients: vec![
                ArmorCoefficientInput {
                    damage_type: "Default".to_string(),
                    percent: 100.0,
                },
                ArmorCoefficientInput {
                    damage_type: "Small_Arms".to_string(),
                    percent: 25.0,
                },
            ],
        };
        let bundle = DataBundle {
            armors: vec![armor],
            ..Default::default()
        };
        let registry = DataRegistry::from_bundle(&bundle).unwrap();
        let def = registry.armor_def("TankArmor").unwrap();
        assert_eq!(def.coefficient("SMALL_ARMS"), 0.25);
        assert_eq!(def.coefficient("EXPLOSION"), 1.0);
    }

    #[test]
    fn test_bounding_sphere_radius_floor_for_structures() {
        let mut structure = object("Bunker");
        structure.kind_of = vec!["STRUCTURE".to_string()];
        structure.geometry = Some(GeometryInput {
            major_radius: 4.0,
            height: 6.0,
            ..Default::default()
        });
        let bundle = DataBundle {
            objects: vec![structure],
            ..Default::default()
        };
        let registry = DataRegistry::from_bundle(&bundle).unwrap();
        let def = registry.object_def("Bunker").unwrap();
        assert_eq!(def.bounding_sphere_radius(), 10.0);
    }
}
