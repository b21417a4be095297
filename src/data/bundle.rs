//! Input model for the declarative data bundle.
//!
//! An external INI parser produces this bundle; the simulation only consumes
//! it. Field names mirror the INI keys (`BuildCost`, `AttackRange`, ...) so a
//! parsed bundle serializes naturally. All fields are defaulted: a minimal
//! object definition is just a name.
//!
//! Times arrive in the units the INI uses (`BuildTime` in seconds, everything
//! else in milliseconds); the registry converts them to whole logic frames.

use serde::{Deserialize, Serialize};

/// The complete declarative bundle handed to [`crate::data::DataRegistry`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataBundle {
    pub objects: Vec<ObjectInput>,
    pub weapons: Vec<WeaponInput>,
    pub armors: Vec<ArmorInput>,
    pub upgrades: Vec<UpgradeInput>,
    pub sciences: Vec<ScienceInput>,
    pub locomotors: Vec<LocomotorInput>,
    pub command_buttons: Vec<CommandButtonInput>,
    pub command_sets: Vec<CommandSetInput>,
    pub special_powers: Vec<SpecialPowerInput>,
    pub object_creation_lists: Vec<OclInput>,
    pub factions: Vec<String>,
}

// ============================================================================
// OBJECT DEFINITIONS
// ============================================================================

/// One `Object` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ObjectInput {
    pub name: String,
    /// Parent template for single-inheritance resolution (`ChildObject`).
    pub inherits: Option<String>,
    pub side: Option<String>,
    pub kind_of: Vec<String>,
    pub build_cost: Option<i64>,
    /// Seconds, as in the INI.
    pub build_time: Option<f32>,
    pub max_simultaneous_of_type: Option<u32>,
    pub max_simultaneous_link_key: Option<String>,
    /// `Yes` | `No` | `Only_By_AI` | `Ignore_Prerequisites`.
    pub buildable: Option<String>,
    pub vision_range: Option<f32>,
    pub command_set: Option<String>,
    /// Positive adds to side power production, negative consumes.
    pub energy_production: Option<i32>,
    /// Extra power granted once a `PowerPlantUpgrade` module activates.
    pub energy_bonus: Option<i32>,
    pub geometry: Option<GeometryInput>,
    /// Fallback movement speed when no locomotor set is declared.
    pub speed: Option<f32>,
    pub crusher_level: Option<u8>,
    pub crushable_level: Option<u8>,
    /// Jet-AI deception distance; incoming shots miss by this while the
    /// attackers-miss window is active.
    pub sneaky_offset_when_attacking: Option<f32>,
    /// Milliseconds the attackers-miss window persists after IS_ATTACKING.
    pub attackers_miss_persist_time: Option<f32>,
    pub experience_required: Option<Vec<i32>>,
    pub experience_value: Option<Vec<i32>>,
    pub refund_value: Option<i64>,
    pub build_variations: Vec<String>,
    pub body: Option<BodyInput>,
    pub weapon_sets: Vec<WeaponSetInput>,
    pub armor_sets: Vec<ArmorSetInput>,
    pub locomotor_sets: Vec<LocomotorSetInput>,
    /// AND across blocks, OR within a block.
    pub prerequisites: Vec<PrerequisiteInput>,
    pub draw: Vec<ModelConditionInput>,
    pub behaviors: Vec<BehaviorInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GeometryInput {
    /// `CYLINDER` or `BOX`.
    pub shape: String,
    pub major_radius: f32,
    pub minor_radius: f32,
    pub height: f32,
}

impl Default for GeometryInput {
    fn default() -> Self {
        Self {
            shape: "CYLINDER".to_string(),
            major_radius: 5.0,
            minor_radius: 5.0,
            height: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BodyInput {
    pub max_health: Option<f32>,
    pub initial_health: Option<f32>,
}

/// `WeaponSet` block: a conditions bitset plus up to three weapon slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WeaponSetInput {
    /// Condition flag names (`PLAYER_UPGRADE`, `HORDE`, ...); empty = NONE.
    pub conditions: Vec<String>,
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub tertiary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ArmorSetInput {
    pub conditions: Vec<String>,
    pub armor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LocomotorSetInput {
    /// `SET_NORMAL`, `SET_NORMAL_UPGRADED`, ...
    pub condition: String,
    pub locomotor: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PrerequisiteInput {
    pub objects: Vec<String>,
    pub sciences: Vec<String>,
}

/// One `ModelConditionState` from the Draw block, reduced to what the
/// renderer needs from snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ModelConditionInput {
    pub conditions: Vec<String>,
    pub model: Option<String>,
    pub idle_animation: Option<String>,
    pub move_animation: Option<String>,
    pub attack_animation: Option<String>,
    pub die_animation: Option<String>,
}

// ============================================================================
// BEHAVIOR MODULES
// ============================================================================

/// Shared trigger header carried by every upgrade-flavored module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct UpgradeTrigger {
    pub triggered_by: Vec<String>,
    pub requires_all_triggers: bool,
    pub removes_upgrades: Vec<String>,
}

/// `AddMaxHealth` redistribution policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthChangeType {
    #[default]
    SameCurrentHealth,
    PreserveRatio,
    Full,
}

/// Every Behavior/Die/Collide module kind the simulation dispatches on.
///
/// Modeled as one tagged variant so object definitions stay declaration
/// ordered and the kernels can match without downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Module", rename_all_fields = "PascalCase")]
pub enum BehaviorInput {
    // --- upgrade modules -------------------------------------------------
    WeaponSetUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
    },
    WeaponBonusUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        /// 0..=2, mapped to weapon-bonus bits 12..=14.
        #[serde(default)]
        bonus_slot: u8,
    },
    ArmorUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
    },
    LocomotorSetUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        upgraded_set: String,
    },
    MaxHealthUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        add_max_health: f32,
        #[serde(default)]
        change_type: HealthChangeType,
    },
    StatusBitsUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        status_to_set: Vec<String>,
        #[serde(default)]
        status_to_clear: Vec<String>,
    },
    CommandSetUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        command_set: String,
        #[serde(default)]
        command_set_alt: Option<String>,
        #[serde(default)]
        trigger_alt: Option<String>,
    },
    PowerPlantUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
    },
    RadarUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        disable_proof: bool,
    },
    GrantScienceUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        grant_science: Vec<String>,
    },
    CostModifierUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        effect_kind_of: Vec<String>,
        /// Multiplier delta in percent; -10 makes matching units 10% cheaper.
        #[serde(default)]
        percentage: f32,
    },
    StealthUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
    },
    UnpauseSpecialPowerUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
        #[serde(default)]
        special_power_template: String,
    },
    PassengersFireUpgrade {
        #[serde(flatten)]
        trigger: UpgradeTrigger,
    },

    // --- production ------------------------------------------------------
    ProductionUpdate {
        #[serde(default = "default_max_queue_entries")]
        max_queue_entries: u32,
        #[serde(default)]
        quantity_modifiers: Vec<QuantityModifierInput>,
    },
    QueueProductionExitUpdate {
        #[serde(default)]
        unit_create_point: (f32, f32, f32),
        #[serde(default)]
        exit_delay: f32,
    },
    SupplyCenterProductionExitUpdate {
        #[serde(default)]
        unit_create_point: (f32, f32, f32),
        #[serde(default)]
        exit_delay: f32,
    },
    SpawnPointProductionExitUpdate {
        #[serde(default)]
        unit_create_point: (f32, f32, f32),
        #[serde(default)]
        exit_delay: f32,
    },
    ParkingPlaceBehavior {
        #[serde(default)]
        num_rows: u32,
        #[serde(default)]
        num_cols: u32,
    },

    // --- containers ------------------------------------------------------
    OpenContain {
        #[serde(default)]
        contain_max: u32,
        #[serde(default)]
        passengers_allowed_to_fire: bool,
    },
    TransportContain {
        #[serde(default)]
        contain_max: u32,
        #[serde(default)]
        passengers_allowed_to_fire: bool,
    },
    OverlordContain {
        #[serde(default)]
        contain_max: u32,
        #[serde(default)]
        passengers_allowed_to_fire: bool,
    },
    HelixContain {
        #[serde(default)]
        contain_max: u32,
        #[serde(default)]
        passengers_allowed_to_fire: bool,
        #[serde(default)]
        payload_template_name: Vec<String>,
    },
    GarrisonContain {
        #[serde(default)]
        contain_max: u32,
    },
    TunnelContain {
        #[serde(default)]
        time_for_full_heal: f32,
    },

    // --- death and lifetime ----------------------------------------------
    SlowDeathBehavior {
        #[serde(default = "default_probability")]
        probability_modifier: u32,
        #[serde(default)]
        sink_delay: f32,
        #[serde(default)]
        destruction_delay: f32,
        #[serde(default)]
        ocl_initial: Option<String>,
        #[serde(default)]
        ocl_final: Option<String>,
    },
    LifetimeUpdate {
        #[serde(default)]
        min_lifetime: f32,
        #[serde(default)]
        max_lifetime: f32,
    },
    FireWeaponWhenDeadBehavior {
        #[serde(default)]
        death_weapon: String,
    },
    FireWeaponWhenDamagedBehavior {
        #[serde(default)]
        reaction_weapon_pristine: Option<String>,
        #[serde(default)]
        reaction_weapon_damaged: Option<String>,
        /// Health fraction at or below which the damaged reaction applies.
        #[serde(default = "default_damaged_threshold")]
        damaged_threshold: f32,
    },
    AutoHealBehavior {
        #[serde(default)]
        heal_amount_per_second: f32,
        #[serde(default)]
        start_heal_delay: f32,
    },

    // --- mines and traps -------------------------------------------------
    GenerateMinefieldBehavior {
        #[serde(default)]
        mine_name: String,
        #[serde(default)]
        distance_around_object: f32,
        #[serde(default)]
        mine_count: u32,
        #[serde(default)]
        border_only: bool,
        #[serde(default = "default_true")]
        on_death: bool,
    },
    MinefieldBehavior {
        #[serde(default)]
        detonation_weapon: String,
        #[serde(default)]
        detonated_by: Vec<String>,
        #[serde(default)]
        scan_rate: f32,
        #[serde(default = "default_true")]
        workers_detonate: bool,
        #[serde(default)]
        regenerates: bool,
        #[serde(default = "default_virtual_mines")]
        num_virtual_mines: u32,
    },
    DemoTrapUpdate {
        #[serde(default)]
        detonation_weapon: String,
        #[serde(default)]
        scan_rate: f32,
        #[serde(default)]
        trigger_detonation_range: f32,
        #[serde(default)]
        detonate_when_killed: bool,
        #[serde(default = "default_true")]
        default_proximity_mode: bool,
    },

    // --- unit behaviors --------------------------------------------------
    DeployStyleAIUpdate {
        #[serde(default)]
        unpack_time: f32,
        #[serde(default)]
        pack_time: f32,
    },
    PointDefenseLaserUpdate {
        #[serde(default)]
        weapon_template: String,
        #[serde(default)]
        primary_target_types: Vec<String>,
        #[serde(default)]
        secondary_target_types: Vec<String>,
        #[serde(default)]
        scan_rate: f32,
        #[serde(default)]
        scan_range: f32,
    },
    HordeUpdate {
        #[serde(default)]
        update_rate: f32,
        #[serde(default)]
        kind_of: Vec<String>,
        #[serde(default)]
        radius: f32,
        #[serde(default)]
        count: u32,
        #[serde(default)]
        rub_off_radius: f32,
    },
    ProneUpdate {
        #[serde(default)]
        damage_to_frames_ratio: f32,
    },

    // --- structures and economy ------------------------------------------
    RebuildHoleExposeDie {
        #[serde(default)]
        hole_name: String,
    },
    RebuildHoleBehavior {
        #[serde(default)]
        worker_object_name: String,
        #[serde(default)]
        worker_respawn_delay: f32,
        #[serde(default)]
        hole_health_regen_percent_per_second: f32,
        #[serde(default = "default_true")]
        transfer_attackers: bool,
    },
    AutoDepositUpdate {
        #[serde(default)]
        deposit_timing: f32,
        #[serde(default)]
        deposit_amount: i64,
        #[serde(default)]
        initial_capture_bonus: i64,
    },
    HackInternetAIUpdate {
        #[serde(default)]
        unpack_time: f32,
        #[serde(default)]
        pack_time: f32,
        #[serde(default)]
        cash_update_delay: f32,
        #[serde(default)]
        regular_cash_amount: i64,
    },
    RailedTransportAIUpdate {
        #[serde(default)]
        path_prefix_name: String,
    },
    BattlePlanUpdate {
        #[serde(default)]
        bombardment_plan: String,
        #[serde(default)]
        hold_the_line_plan: String,
        #[serde(default)]
        search_and_destroy_plan: String,
        #[serde(default)]
        transition_time: f32,
        #[serde(default)]
        battle_plan_change_paralyze_time: f32,
        #[serde(default)]
        valid_member_kind_of: Vec<String>,
        #[serde(default)]
        invalid_member_kind_of: Vec<String>,
        #[serde(default = "default_scalar")]
        hold_the_line_damage_scalar: f32,
        #[serde(default = "default_scalar")]
        search_and_destroy_sight_range_scalar: f32,
    },
    SpecialPowerModule {
        #[serde(default)]
        special_power_template: String,
    },
}

fn default_max_queue_entries() -> u32 {
    9
}
fn default_probability() -> u32 {
    100
}
fn default_damaged_threshold() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_virtual_mines() -> u32 {
    1
}
fn default_scalar() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct QuantityModifierInput {
    pub template: String,
    pub count: u32,
}

// ============================================================================
// WEAPONS / ARMORS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WeaponInput {
    pub name: String,
    pub primary_damage: f32,
    pub primary_damage_radius: f32,
    pub secondary_damage: f32,
    pub secondary_damage_radius: f32,
    /// `ENEMIES` | `ALLIES` | `SELF` | `SUICIDE` | `NOT_SIMILAR` | `NEUTRAL`
    /// | `NOT_AIRBORNE`. Empty means enemies only.
    pub radius_damage_affects: Vec<String>,
    /// Cone half-angle in degrees around attacker facing.
    pub radius_damage_angle: Option<f32>,
    pub damage_dealt_at_self_position: bool,
    pub attack_range: f32,
    pub minimum_attack_range: f32,
    pub continue_attack_range: f32,
    /// World units per second; 999999+ means instant hit.
    pub weapon_speed: Option<f32>,
    pub min_weapon_speed: Option<f32>,
    pub scale_weapon_speed: bool,
    /// Milliseconds.
    pub delay_between_shots: f32,
    pub clip_size: u32,
    pub clip_reload_time: f32,
    pub pre_attack_delay: f32,
    /// `PER_SHOT` | `PER_ATTACK` | `PER_CLIP`.
    pub pre_attack_type: Option<String>,
    /// Milliseconds of idle after which the clip silently refills.
    pub auto_reload_when_idle: Option<f32>,
    pub projectile_object: Option<String>,
    pub projectile_collides_with: Vec<String>,
    pub scatter_radius: f32,
    pub scatter_radius_vs_infantry: f32,
    /// Fixed offset unit vectors cycled once each before reshuffle.
    pub scatter_target: Vec<(f32, f32)>,
    pub scatter_target_scalar: f32,
    pub damage_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ArmorInput {
    pub name: String,
    /// `Default` plus damage-type overrides, as percent (100 = full damage).
    pub coefficients: Vec<ArmorCoefficientInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ArmorCoefficientInput {
    pub damage_type: String,
    pub percent: f32,
}

// ============================================================================
// UPGRADES / SCIENCES / LOCOMOTORS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct UpgradeInput {
    pub name: String,
    /// `PLAYER` or `OBJECT`.
    pub r#type: Option<String>,
    pub build_cost: i64,
    /// Seconds.
    pub build_time: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ScienceInput {
    pub name: String,
    pub science_purchase_point_cost: i32,
    pub prerequisite_sciences: Vec<String>,
    pub is_grantable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LocomotorInput {
    pub name: String,
    /// World units per second.
    pub speed: f32,
    pub surfaces: Vec<String>,
}

// ============================================================================
// COMMAND BUTTONS / SETS / SPECIAL POWERS / OCLS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CommandButtonInput {
    pub name: String,
    /// `UNIT_BUILD` | `PLAYER_UPGRADE` | `OBJECT_UPGRADE` | `DOZER_CONSTRUCT`
    /// | `SPECIAL_POWER` | anything else carried opaquely.
    pub command: String,
    pub object: Option<String>,
    pub upgrade: Option<String>,
    pub special_power: Option<String>,
    /// `NEED_TARGET_ENEMY_OBJECT`, `NEED_TARGET_POS`, ...
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CommandSetInput {
    pub name: String,
    /// Slot index -> button name.
    pub buttons: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SpecialPowerInput {
    /// The SpecialPowerTemplate name commands refer to.
    pub name: String,
    /// Built-in mechanism: `OCL` | `CASH_HACK` | `DEFECTOR` | `AREA_DAMAGE`
    /// | `BATTLE_PLAN` | anything else dispatched to hooks only.
    pub template: String,
    /// Milliseconds.
    pub reload_time: f32,
    pub shared_synced_timer: bool,
    pub ocl: Option<String>,
    /// CASH_HACK amount.
    pub amount: Option<i64>,
    /// AREA_DAMAGE parameters.
    pub damage: Option<f32>,
    pub radius: Option<f32>,
    pub damage_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OclInput {
    pub name: String,
    pub entries: Vec<OclEntryInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OclEntryInput {
    pub template: String,
    pub count: u32,
    /// Offset from the spawn origin, per created object.
    pub offset: (f32, f32),
    /// Ring radius for multi-count entries; offsets rotate around it.
    pub spread: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_from_json_defaults() {
        let bundle: DataBundle = serde_json::from_str(
            r#"{"objects":[{"Name":"AmericaTankCrusader","KindOf":["VEHICLE"]}]}"#,
        )
        .unwrap();
        assert_eq!(bundle.objects.len(), 1);
        assert_eq!(bundle.objects[0].name, "AmericaTankCrusader");
        assert_eq!(bundle.objects[0].kind_of, vec!["VEHICLE"]);
        assert!(bundle.weapons.is_empty());
    }

    #[test]
    fn test_behavior_module_tagging() {
        let json = r#"{"Module":"SlowDeathBehavior","DestructionDelay":2000.0,"OclInitial":"OCL_Explosion"}"#;
        let module: BehaviorInput = serde_json::from_str(json).unwrap();
        match module {
            BehaviorInput::SlowDeathBehavior {
                probability_modifier,
                destruction_delay,
                ocl_initial,
                ..
            } => {
                assert_eq!(probability_modifier, 100);
                assert_eq!(destruction_delay, 2000.0);
                assert_eq!(ocl_initial.as_deref(), Some("OCL_Explosion"));
            }
            other => panic!("wrong module parsed: {other:?}"),
        }
    }

    #[test]
    fn test_upgrade_trigger_flattened() {
        let json = r#"{"Module":"ArmorUpgrade","TriggeredBy":["Upgrade_Composite"],"RequiresAllTriggers":true}"#;
        let module: BehaviorInput = serde_json::from_str(json).unwrap();
        match module {
            BehaviorInput::ArmorUpgrade { trigger } => {
                assert_eq!(trigger.triggered_by, vec!["Upgrade_Composite"]);
                assert!(trigger.requires_all_triggers);
                assert!(trigger.removes_upgrades.is_empty());
            }
            other => panic!("wrong module parsed: {other:?}"),
        }
    }
}
