//! Frame-step benchmark: how fast a populated world advances.
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use generals_sim::data::{BodyInput, DataBundle, ObjectInput, WeaponInput, WeaponSetInput};
use generals_sim::{GameCommand, GameWorld, MapData, SpawnProps};

fn bench_bundle() -> DataBundle {
    let tank = |name: &str, side: &str| ObjectInput {
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
            primary: Some("TankGun".to_string()),
            ..Default::default()
        }],
        vision_range: Some(150.0),
        ..Default::default()
    };
    DataBundle {
        objects: vec![tank("Crusader", "america"), tank("Battlemaster", "china")],
        weapons: vec![WeaponInput {
            name: "TankGun".to_string(),
            primary_damage: 5.0,
            attack_range: 130.0,
            delay_between_shots: 1000.0,
            ..Default::default()
        }],
        factions: vec!["america".to_string(), "china".to_string()],
        ..Default::default()
    }
}

fn populated_world(units: usize) -> GameWorld {
    let bundle = bench_bundle();
    let mut game = GameWorld::new(&bundle, &MapData::default()).expect("bench bundle loads");
    let mut ids = Vec::new();
    for i in 0..units {
        let id = game
            .spawn(
                if i % 2 == 0 { "Crusader" } else { "Battlemaster" },
                if i % 2 == 0 { "america" } else { "china" },
                (i % 20) as f32 * 20.0,
                (i / 20) as f32 * 20.0,
                SpawnProps::default(),
            )
            .expect("spawn");
        ids.push(id);
    }
    // Pair the lines up so combat stays busy.
    for pair in ids.chunks(2) {
        if let [a, b] = pair {
            game.submit_command(GameCommand::AttackEntity {
                entity_id: *a,
                target_id: *b,
            });
        }
    }
    game
}

fn bench_frame_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_step");
    for units in [100usize, 400] {
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, &units| {
            let mut game = populated_world(units);
            b.iter(|| {
                game.step_frame();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_frame_step);
criterion_main!(benches);
