//! Tick throughput benchmark for a populated trenchraid room.
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use mudline_sim::commands::{ClientCommand, InputFrame};
use mudline_sim::config::{GameModeConfig, LevelType};
use mudline_sim::room::{Room, TICK_DT};

fn populated_room() -> Room {
    let mut room = Room::with_config("bench", 99, GameModeConfig::trenchraid());
    for i in 0..4 {
        room.handle(ClientCommand::Join {
            player_id: format!("p{i}"),
            name: format!("bench_{i}"),
        })
        .unwrap();
    }
    room.start_level(LevelType::Trenchraid);
    for i in 0..4 {
        room.handle(ClientCommand::Input {
            player_id: format!("p{i}"),
            frame: InputFrame { seq: 1, right: true, mouse_down: true, ..Default::default() },
        })
        .unwrap();
    }
    // Warm up so barracks troops exist and enemies are in motion.
    for _ in 0..300 {
        room.tick(TICK_DT);
    }
    room
}

fn bench_room_tick(c: &mut Criterion) {
    c.bench_function("room_tick_trenchraid", |b| {
        b.iter_batched_ref(
            populated_room,
            |room| room.tick(TICK_DT),
            BatchSize::LargeInput,
        )
    });

    c.bench_function("room_tick_60", |b| {
        b.iter_batched_ref(
            populated_room,
            |room| {
                for _ in 0..60 {
                    room.tick(TICK_DT);
                }
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_room_tick);
criterion_main!(benches);
