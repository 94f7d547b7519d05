//! End-to-end room demonstration.
//!
//! Run with: cargo run --example room_demo
//!
//! Two players join a lobby, start the ready timer, and fight through
//! the opening seconds of a trenchraid level while the demo prints
//! what the broadcaster would send to clients.

use mudline_sim::commands::{ClientCommand, InputFrame};
use mudline_sim::config::{GameModeConfig, LevelType};
use mudline_sim::room::{Room, TICK_DT};
use mudline_sim::snapshot::{Broadcaster, OutboundMessage, Subscriber};
use std::sync::{Arc, Mutex};

struct Printer {
    point_events: Arc<Mutex<u64>>,
}

impl Subscriber for Printer {
    fn deliver(&self, msg: &OutboundMessage) -> bool {
        match msg {
            OutboundMessage::SceneChange(change) => {
                println!(
                    "scene -> {} (boundary {}, {} obstacles, {} oriented boxes)",
                    change.scene,
                    change.boundary,
                    change.obstacles.len(),
                    change.oriented_boxes.len()
                );
            }
            OutboundMessage::Point(event) => {
                *self.point_events.lock().unwrap() += 1;
                let json = serde_json::to_string(event).unwrap_or_default();
                if json.len() < 120 {
                    println!("  event: {json}");
                }
            }
            _ => {}
        }
        true
    }
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let mut room = Room::with_config("demo", 20_240_817, GameModeConfig::trenchraid());
    let mut broadcaster = Broadcaster::new();
    let point_events = Arc::new(Mutex::new(0u64));
    broadcaster.subscribe(Box::new(Printer { point_events: point_events.clone() }));

    room.handle(ClientCommand::Join { player_id: "p1".into(), name: "Able".into() })
        .unwrap();
    room.handle(ClientCommand::Join { player_id: "p2".into(), name: "Baker".into() })
        .unwrap();
    room.handle(ClientCommand::StartReadyTimer {
        player_id: "p1".into(),
        level_type: LevelType::Trenchraid,
    })
    .unwrap();

    // Ready countdown (10s), then 20s of level play with both players
    // pushing east and firing.
    let mut sent_inputs = false;
    for tick in 0..(30.0 / TICK_DT) as u64 {
        room.tick(TICK_DT);
        broadcaster.sample(TICK_DT, &mut room);

        if room.scene == mudline_sim::room::Scene::Level && !sent_inputs {
            sent_inputs = true;
            for pid in ["p1", "p2"] {
                room.handle(ClientCommand::Input {
                    player_id: pid.into(),
                    frame: InputFrame {
                        seq: 1,
                        right: true,
                        mouse_down: true,
                        aim_angle: 0.0,
                        ..Default::default()
                    },
                })
                .unwrap();
            }
        }

        if tick % 300 == 299 {
            let p1 = &room.players["p1"];
            println!(
                "t={:5.1}s scene={:?} enemies={} troops={} p1=({:.0},{:.0}) hp={:.0}",
                room.time,
                room.scene,
                room.enemies.len(),
                room.troops.len(),
                p1.x,
                p1.y,
                p1.health
            );
        }
    }

    println!(
        "demo finished: {} point events, {} enemies live, {} troops live",
        point_events.lock().unwrap(),
        room.enemies.len(),
        room.troops.len()
    );
}
