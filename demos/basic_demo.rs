//! Basic demonstration of the game-logic simulation.
//!
//! Run with: cargo run --example basic_demo

use generals_sim::data::{BodyInput, DataBundle, ObjectInput, WeaponInput, WeaponSetInput};
use generals_sim::{GameCommand, GameWorld, MapData, SpawnProps};

fn main() {
    println!("=== Game Logic Core - Demo ===\n");

    let bundle = demo_bundle();
    let mut game = GameWorld::new(&bundle, &MapData::default()).expect("demo bundle loads");

    // Two small tank lines facing each other.
    let mut america = Vec::new();
    let mut china = Vec::new();
    for i in 0..4 {
        america.push(
            game.spawn("Crusader", "america", 20.0, 20.0 + i as f32 * 25.0, SpawnProps::default())
                .unwrap(),
        );
        china.push(
            game.spawn(
                "Battlemaster",
                "china",
                120.0,
                20.0 + i as f32 * 25.0,
                SpawnProps::default(),
            )
            .unwrap(),
        );
    }

    println!("Initial state:");
    print_snapshot(&game);

    println!("\n--- Ordering the American tanks to attack ---\n");
    for (attacker, target) in america.iter().zip(china.iter()) {
        game.submit_command(GameCommand::AttackEntity {
            entity_id: *attacker,
            target_id: *target,
        });
    }

    // Run for 10 seconds of game time.
    for frame in 0..300 {
        game.step(1.0 / 30.0);
        if (frame + 1) % 60 == 0 {
            println!(
                "--- Frame {} (t={:.1}s) ---",
                game.current_frame(),
                game.current_time()
            );
            print_snapshot(&game);
        }
        for event in game.drain_visual_events() {
            if event.kind == generals_sim::VisualEventKind::Death {
                println!("  !! {:?} destroyed", event.victim_entity_id.unwrap());
            }
        }
    }

    println!("\n=== Final State (JSON) ===\n");
    println!("{}", game.snapshot().to_json_pretty().unwrap());
}

fn print_snapshot(game: &GameWorld) {
    let snapshot = game.snapshot();
    for side in ["america", "china"] {
        println!("  {side}:");
        for entity in snapshot.entities.iter().filter(|e| e.side == side) {
            println!(
                "    {:?} {}: pos=({:.1}, {:.1}) hp={:.0}/{:.0} [{}]",
                entity.id,
                entity.template_name,
                entity.x,
                entity.z,
                entity.health,
                entity.max_health,
                entity.animation_state
            );
        }
    }
}

fn demo_bundle() -> DataBundle {
    let tank = |name: &str, side: &str, damage: f32| ObjectInput {
        name: name.to_string(),
        side: Some(side.to_string()),
        kind_of: vec!["VEHICLE".to_string()],
        speed: Some(60.0),
        body: Some(BodyInput {
            max_health: Some(300.0),
            initial_health: None,
        }),
        weapon_sets: vec![WeaponSetInput {
            conditions: vec![],
            primary: Some(format!("{name}Gun")),
            ..Default::default()
        }],
        vision_range: Some(150.0),
        build_cost: Some(damage as i64 * 30),
        ..Default::default()
    };
    DataBundle {
        objects: vec![
            tank("Crusader", "america", 40.0),
            tank("Battlemaster", "china", 35.0),
        ],
        weapons: vec![
            WeaponInput {
                name: "CrusaderGun".to_string(),
                primary_damage: 40.0,
                attack_range: 130.0,
                delay_between_shots: 1200.0,
                ..Default::default()
            },
            WeaponInput {
                name: "BattlemasterGun".to_string(),
                primary_damage: 35.0,
                attack_range: 120.0,
                delay_between_shots: 1000.0,
                ..Default::default()
            },
        ],
        factions: vec!["america".to_string(), "china".to_string()],
        ..Default::default()
    }
}
