//! Command intake and dispatch.
//!
//! Commands are validated structurally at submit time, buffered, and applied
//! in submission order at the start of the next frame. Effects never land
//! mid-frame. Illegal commands are dropped silently (a debug log line is the
//! only trace), matching the engine's failure model.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::{CommandSource, ObjectId};
use crate::sides::{PlayerType, Relationship, SideTable};
use crate::systems::special_power::{LocalPlayer, SpecialPowerRequest};

/// The externally visible command union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameCommand {
    #[serde(rename_all = "camelCase")]
    Move { entity_id: ObjectId, x: f32, z: f32 },
    #[serde(rename_all = "camelCase")]
    AttackEntity {
        entity_id: ObjectId,
        target_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    Stop { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    ApplyUpgrade {
        entity_id: ObjectId,
        upgrade: String,
    },
    #[serde(rename_all = "camelCase")]
    ApplyPlayerUpgrade { side: String, upgrade: String },
    #[serde(rename_all = "camelCase")]
    QueueUnitProduction {
        producer_id: ObjectId,
        template: String,
    },
    #[serde(rename_all = "camelCase")]
    CancelUnitProduction {
        producer_id: ObjectId,
        production_id: u32,
    },
    #[serde(rename_all = "camelCase")]
    QueueUpgradeProduction {
        producer_id: ObjectId,
        upgrade: String,
    },
    #[serde(rename_all = "camelCase")]
    CancelUpgradeProduction {
        producer_id: ObjectId,
        upgrade: String,
    },
    #[serde(rename_all = "camelCase")]
    SetSideCredits { side: String, amount: i64 },
    #[serde(rename_all = "camelCase")]
    AddSideCredits { side: String, amount: i64 },
    #[serde(rename_all = "camelCase")]
    GrantSideScience { side: String, science: String },
    #[serde(rename_all = "camelCase")]
    PurchaseScience { side: String, science: String },
    #[serde(rename_all = "camelCase")]
    SetSidePlayerType { side: String, player_type: String },
    #[serde(rename_all = "camelCase")]
    SetTeamRelationship {
        side: String,
        other: String,
        relationship: u8,
    },
    #[serde(rename_all = "camelCase")]
    CaptureEntity {
        entity_id: ObjectId,
        new_side: String,
    },
    #[serde(rename_all = "camelCase")]
    ConstructBuilding {
        dozer_id: ObjectId,
        template: String,
        x: f32,
        z: f32,
        #[serde(default)]
        angle: f32,
        /// Present for line builds (walls).
        #[serde(default)]
        end_x: Option<f32>,
        #[serde(default)]
        end_z: Option<f32>,
    },
    #[serde(rename_all = "camelCase")]
    CancelDozerConstruction { dozer_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    RepairBuilding {
        dozer_id: ObjectId,
        building_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    Sell { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    EnterTransport {
        entity_id: ObjectId,
        transport_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    Evacuate { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    ExitContainer {
        entity_id: ObjectId,
        passenger_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    GarrisonBuilding {
        entity_id: ObjectId,
        building_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    CombatDrop {
        entity_id: ObjectId,
        building_id: ObjectId,
    },
    #[serde(rename_all = "camelCase")]
    EnterObject {
        entity_id: ObjectId,
        target_id: ObjectId,
        hijack_vehicle: bool,
    },
    #[serde(rename_all = "camelCase")]
    ToggleOvercharge { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    PlaceBeacon { side: String, x: f32, z: f32 },
    #[serde(rename_all = "camelCase")]
    BeaconDelete { side: String },
    #[serde(rename_all = "camelCase")]
    HackInternet { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    ExecuteRailedTransport { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    IssueSpecialPower {
        special_power: String,
        #[serde(default)]
        source_entity_id: Option<ObjectId>,
        #[serde(default)]
        issuing_entity_ids: Vec<ObjectId>,
        #[serde(default)]
        command_button: Option<String>,
        #[serde(default)]
        target_entity_id: Option<ObjectId>,
        #[serde(default)]
        target_x: Option<f32>,
        #[serde(default)]
        target_z: Option<f32>,
    },
    #[serde(rename_all = "camelCase")]
    ToggleDemoTrapMode { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    DetonateDemoTrap { entity_id: ObjectId },
    #[serde(rename_all = "camelCase")]
    SetPlayerSide { side: String },
}

#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: GameCommand,
    pub source: CommandSource,
}

/// Deferred command buffer drained at the top of each frame.
#[derive(Resource, Debug, Default)]
pub struct CommandBuffer {
    queued: Vec<QueuedCommand>,
}

impl CommandBuffer {
    /// Structural validation only; legality is checked at apply time.
    pub fn submit(&mut self, command: GameCommand, source: CommandSource) -> bool {
        if !structurally_valid(&command) {
            log::debug!("command dropped at submit: {command:?}");
            return false;
        }
        self.queued.push(QueuedCommand { command, source });
        true
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

fn structurally_valid(command: &GameCommand) -> bool {
    match command {
        GameCommand::SetSideCredits { amount, .. } => *amount >= 0,
        GameCommand::SetTeamRelationship { relationship, .. } => *relationship <= 2,
        GameCommand::Move { x, z, .. } => x.is_finite() && z.is_finite(),
        GameCommand::ConstructBuilding { x, z, .. } => x.is_finite() && z.is_finite(),
        GameCommand::PlaceBeacon { x, z, .. } => x.is_finite() && z.is_finite(),
        GameCommand::IssueSpecialPower {
            special_power,
            target_x,
            target_z,
            ..
        } => {
            !special_power.trim().is_empty()
                && target_x.map(|v| v.is_finite()).unwrap_or(true)
                && target_z.map(|v| v.is_finite()).unwrap_or(true)
        }
        _ => true,
    }
}

/// Frame phase 1: drain and apply every queued command in order.
pub fn command_phase(world: &mut World) {
    let queued = std::mem::take(&mut world.resource_mut::<CommandBuffer>().queued);
    for queued_command in queued {
        apply(world, queued_command);
    }
}

fn apply(world: &mut World, queued: QueuedCommand) {
    use GameCommand::*;
    let source = queued.source;
    match queued.command {
        Move { entity_id, x, z } => {
            let Some(entity) = crate::store::lookup(world, entity_id) else {
                return;
            };
            // Docked/transiting rail transports ignore normal moves;
            // hackers pack up first and buffer the order.
            if crate::systems::behaviors::rail_ignores_moves(world, entity) {
                return;
            }
            if crate::systems::behaviors::hack_internet_buffer_move(world, entity_id, x, z) {
                return;
            }
            crate::systems::movement::order_move(world, entity_id, x, z);
        }
        AttackEntity {
            entity_id,
            target_id,
        } => {
            crate::systems::combat::try_set_attack_target(world, entity_id, target_id, source);
        }
        Stop { entity_id } => {
            crate::systems::movement::order_stop(world, entity_id);
        }
        ApplyUpgrade { entity_id, upgrade } => {
            crate::systems::upgrades::apply_object_upgrade(world, entity_id, &upgrade);
        }
        ApplyPlayerUpgrade { side, upgrade } => {
            crate::systems::upgrades::apply_player_upgrade(world, &side, &upgrade);
        }
        QueueUnitProduction {
            producer_id,
            template,
        } => {
            crate::systems::production::try_queue_unit(world, producer_id, &template);
        }
        CancelUnitProduction {
            producer_id,
            production_id,
        } => {
            crate::systems::production::cancel_unit(world, producer_id, production_id);
        }
        QueueUpgradeProduction {
            producer_id,
            upgrade,
        } => {
            crate::systems::production::try_queue_upgrade(world, producer_id, &upgrade);
        }
        CancelUpgradeProduction {
            producer_id,
            upgrade,
        } => {
            crate::systems::production::cancel_upgrade(world, producer_id, &upgrade);
        }
        SetSideCredits { side, amount } => {
            let side = crate::data::norm_side(&side);
            world.resource_mut::<SideTable>().ensure(&side).credits = amount.max(0);
        }
        AddSideCredits { side, amount } => {
            let side = crate::data::norm_side(&side);
            world.resource_mut::<SideTable>().ensure(&side).add_credits(amount);
        }
        GrantSideScience { side, science } => {
            let side = crate::data::norm_side(&side);
            let science = crate::data::norm_name(&science);
            let grantable = world.resource::<crate::data::DataRegistry>().is_science_grantable(&science);
            if grantable {
                world
                    .resource_mut::<SideTable>()
                    .ensure(&side)
                    .sciences
                    .insert(science);
            }
        }
        PurchaseScience { side, science } => {
            purchase_science(world, &side, &science);
        }
        SetSidePlayerType { side, player_type } => {
            let side = crate::data::norm_side(&side);
            let player_type = match crate::data::norm_name(&player_type).as_str() {
                "COMPUTER" => PlayerType::Computer,
                _ => PlayerType::Human,
            };
            world.resource_mut::<SideTable>().ensure(&side).player_type = player_type;
        }
        SetTeamRelationship {
            side,
            other,
            relationship,
        } => {
            let side = crate::data::norm_side(&side);
            let other = crate::data::norm_side(&other);
            world.resource_mut::<SideTable>().ensure(&other);
            world
                .resource_mut::<SideTable>()
                .ensure(&side)
                .set_relationship(&other, Relationship::from_u8(relationship));
        }
        CaptureEntity { entity_id, new_side } => {
            crate::systems::upgrades::capture_transfer(world, entity_id, &new_side);
        }
        ConstructBuilding {
            dozer_id,
            template,
            x,
            z,
            angle,
            end_x,
            end_z,
        } => {
            match (end_x, end_z) {
                (Some(ex), Some(ez)) => {
                    crate::systems::production::construct_line(
                        world,
                        dozer_id,
                        &template,
                        (x, z),
                        (ex, ez),
                    );
                }
                _ => {
                    crate::systems::production::construct_building(
                        world, dozer_id, &template, x, z, angle,
                    );
                }
            }
        }
        CancelDozerConstruction { dozer_id } => {
            crate::systems::production::cancel_dozer_construction(world, dozer_id);
        }
        RepairBuilding {
            dozer_id,
            building_id,
        } => {
            crate::systems::production::repair_building(world, dozer_id, building_id);
        }
        Sell { entity_id } => {
            crate::systems::production::sell(world, entity_id);
        }
        EnterTransport {
            entity_id,
            transport_id,
        } => {
            crate::systems::container::enter(world, entity_id, transport_id);
        }
        Evacuate { entity_id } => {
            crate::systems::container::evacuate(world, entity_id);
        }
        ExitContainer {
            entity_id,
            passenger_id,
        } => {
            crate::systems::container::exit_one(world, entity_id, passenger_id);
        }
        GarrisonBuilding {
            entity_id,
            building_id,
        } => {
            crate::systems::container::enter(world, entity_id, building_id);
        }
        CombatDrop {
            entity_id,
            building_id,
        } => {
            crate::systems::container::combat_drop(world, entity_id, building_id);
        }
        EnterObject {
            entity_id,
            target_id,
            hijack_vehicle,
        } => {
            if hijack_vehicle {
                crate::systems::container::hijack(world, entity_id, target_id);
            } else {
                crate::systems::container::enter(world, entity_id, target_id);
            }
        }
        ToggleOvercharge { entity_id } => {
            crate::systems::behaviors::toggle_overcharge(world, entity_id);
        }
        PlaceBeacon { side, .. } => {
            let side = crate::data::norm_side(&side);
            world.resource_mut::<SideTable>().ensure(&side).beacon_count += 1;
        }
        BeaconDelete { side } => {
            let side = crate::data::norm_side(&side);
            let mut sides = world.resource_mut::<SideTable>();
            let state = sides.ensure(&side);
            state.beacon_count = state.beacon_count.saturating_sub(1);
        }
        HackInternet { entity_id } => {
            crate::systems::behaviors::hack_internet_command(world, entity_id);
        }
        ExecuteRailedTransport { entity_id } => {
            crate::systems::behaviors::execute_railed_transport(world, entity_id);
        }
        IssueSpecialPower {
            special_power,
            source_entity_id,
            issuing_entity_ids,
            command_button,
            target_entity_id,
            target_x,
            target_z,
        } => {
            crate::systems::special_power::issue(
                world,
                &SpecialPowerRequest {
                    special_power,
                    source_entity_id,
                    issuing_entity_ids,
                    command_button,
                    target_entity_id,
                    target_x,
                    target_z,
                },
            );
        }
        ToggleDemoTrapMode { entity_id } => {
            crate::systems::behaviors::toggle_demo_trap_mode(world, entity_id);
        }
        DetonateDemoTrap { entity_id } => {
            crate::systems::behaviors::detonate_demo_trap(world, entity_id);
        }
        SetPlayerSide { side } => {
            world.resource_mut::<LocalPlayer>().side = Some(crate::data::norm_side(&side));
        }
    }
}

fn purchase_science(world: &mut World, side: &str, science: &str) {
    let side = crate::data::norm_side(side);
    let science = crate::data::norm_name(science);
    let registry = world.resource::<crate::data::DataRegistry>().clone();
    let Some(def) = registry.science_def(&science) else {
        return;
    };
    let mut sides = world.resource_mut::<SideTable>();
    let Some(state) = sides.get_mut(&side) else {
        return;
    };
    if state.has_science(&science) {
        return;
    }
    if !def.prerequisites.iter().all(|p| state.has_science(p)) {
        return;
    }
    if state.science_purchase_points < def.purchase_cost {
        return;
    }
    state.science_purchase_points -= def.purchase_cost;
    state.sciences.insert(science);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBundle, ObjectInput, ScienceInput};
    use crate::store::{spawn_object, SpawnProps};
    use crate::systems::combat::tests::combat_world;

    fn command_world() -> World {
        let bundle = DataBundle {
            objects: vec![ObjectInput {
                name: "Tank".to_string(),
                speed: Some(60.0),
                ..Default::default()
            }],
            sciences: vec![ScienceInput {
                name: "SCIENCE_NATIONALISM".to_string(),
                science_purchase_point_cost: 1,
                prerequisite_sciences: vec![],
                is_grantable: true,
            }],
            ..Default::default()
        };
        let mut world = combat_world(bundle);
        world.insert_resource(CommandBuffer::default());
        world.insert_resource(LocalPlayer::default());
        world.insert_resource(crate::systems::special_power::SharedPowerTimers::default());
        world.insert_resource(crate::systems::special_power::SpecialPowerHooks::default());
        world
    }

    #[test]
    fn test_commands_deferred_to_next_phase() {
        let mut world = command_world();
        let id = spawn_object(&mut world, "Tank", "china", 10.0, 10.0, SpawnProps::default())
            .unwrap();
        world.resource_mut::<CommandBuffer>().submit(
            GameCommand::Move {
                entity_id: id,
                x: 100.0,
                z: 10.0,
            },
            CommandSource::Player,
        );

        // Nothing moves until the command phase runs.
        let entity = crate::store::lookup(&world, id).unwrap();
        assert!(world
            .get::<crate::components::Locomotion>(entity)
            .unwrap()
            .goal
            .is_none());

        command_phase(&mut world);
        assert_eq!(
            world
                .get::<crate::components::Locomotion>(entity)
                .unwrap()
                .goal,
            Some((100.0, 10.0))
        );
    }

    #[test]
    fn test_structural_validation() {
        let mut buffer = CommandBuffer::default();
        assert!(!buffer.submit(
            GameCommand::SetSideCredits {
                side: "china".to_string(),
                amount: -100,
            },
            CommandSource::Player,
        ));
        assert!(!buffer.submit(
            GameCommand::Move {
                entity_id: ObjectId(1),
                x: f32::NAN,
                z: 0.0,
            },
            CommandSource::Player,
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_credits_and_science_commands() {
        let mut world = command_world();
        for command in [
            GameCommand::SetSideCredits {
                side: "China".to_string(),
                amount: 5000,
            },
            GameCommand::AddSideCredits {
                side: "china".to_string(),
                amount: -2000,
            },
            GameCommand::GrantSideScience {
                side: "china".to_string(),
                science: "Science_Nationalism".to_string(),
            },
        ] {
            world
                .resource_mut::<CommandBuffer>()
                .submit(command, CommandSource::Player);
        }
        command_phase(&mut world);

        let sides = world.resource::<SideTable>();
        let china = sides.get("china").unwrap();
        assert_eq!(china.credits, 3000);
        assert!(china.has_science("SCIENCE_NATIONALISM"));
    }

    #[test]
    fn test_purchase_science_needs_points() {
        let mut world = command_world();
        world.resource_mut::<SideTable>().ensure("china");
        world.resource_mut::<CommandBuffer>().submit(
            GameCommand::PurchaseScience {
                side: "china".to_string(),
                science: "SCIENCE_NATIONALISM".to_string(),
            },
            CommandSource::Player,
        );
        command_phase(&mut world);
        assert!(!world
            .resource::<SideTable>()
            .get("china")
            .unwrap()
            .has_science("SCIENCE_NATIONALISM"));

        world.resource_mut::<SideTable>().ensure("china").science_purchase_points = 2;
        world.resource_mut::<CommandBuffer>().submit(
            GameCommand::PurchaseScience {
                side: "china".to_string(),
                science: "SCIENCE_NATIONALISM".to_string(),
            },
            CommandSource::Player,
        );
        command_phase(&mut world);
        let sides = world.resource::<SideTable>();
        let china = sides.get("china").unwrap();
        assert!(china.has_science("SCIENCE_NATIONALISM"));
        assert_eq!(china.science_purchase_points, 1);
    }

    #[test]
    fn test_relationship_command() {
        let mut world = command_world();
        world.resource_mut::<CommandBuffer>().submit(
            GameCommand::SetTeamRelationship {
                side: "china".to_string(),
                other: "gla".to_string(),
                relationship: 2,
            },
            CommandSource::Player,
        );
        command_phase(&mut world);
        assert_eq!(
            world.resource::<SideTable>().relationship("china", "gla"),
            Relationship::Allies
        );
    }

    #[test]
    fn test_command_json_roundtrip() {
        let json = r#"{"type":"attackEntity","entityId":1,"targetId":2}"#;
        let command: GameCommand = serde_json::from_str(json).unwrap();
        match command {
            GameCommand::AttackEntity {
                entity_id,
                target_id,
            } => {
                assert_eq!(entity_id, ObjectId(1));
                assert_eq!(target_id, ObjectId(2));
            }
            other => panic!("parsed wrong variant: {other:?}"),
        }
    }
}
