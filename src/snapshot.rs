//! Replication snapshots and the throttled broadcaster.
//!
//! The broadcaster samples the room at fixed rates (enemies, troops
//! and npcs at 10 Hz), forwards change-driven state (hazards, chests,
//! timers) when the owning component marked it dirty, and fans out
//! point events in emission order. Delivery is non-blocking: a
//! subscriber that cannot keep up loses snapshot samples, never the
//! tick.

use crate::entities::{Chest, GroundItem, StuckZone};
use crate::events::GameEvent;
use crate::loot::ShopItem;
use crate::room::{Room, Scene};
use crate::systems::troops::SpawnPhase;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::SyncSender;
use tracing::trace;

/// Snapshot cadence for entity state dumps.
const STATE_INTERVAL: f32 = 0.1; // 10 Hz

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub aim_angle: f32,
    pub health: f32,
    pub health_max: f32,
    pub stamina: f32,
    pub stamina_max: f32,
    pub dashing: bool,
    pub invisible: bool,
    pub burning: bool,
    pub gassed: bool,
    pub ducats: i64,
    pub blood_markers: i64,
    pub victory_points: i64,
    pub loot_level: u8,
    pub evil: bool,
    pub last_input_seq: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnemyState {
    pub id: String,
    pub kind: crate::entities::EnemyKind,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub health_max: f32,
    pub burning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroopState {
    pub id: String,
    pub kind: crate::entities::TroopKind,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub health_max: f32,
    pub target_enemy: Option<String>,
    pub dot_count: usize,
    pub barrel_angle: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarracksState {
    pub id: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcState {
    pub id: String,
    pub kind: String,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub health_max: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardsState {
    pub sandbags: Vec<crate::systems::hazards::Sandbag>,
    pub barbed_wire: Vec<crate::systems::hazards::BarbedWire>,
    pub mud_pools: Vec<crate::systems::hazards::MudPool>,
    pub fire_pools: Vec<crate::systems::hazards::FirePool>,
    pub gas_canisters: Vec<crate::systems::hazards::GasCanister>,
    pub exploding_barrels: Vec<crate::systems::hazards::ExplodingBarrel>,
    pub puke_pools: Vec<crate::systems::hazards::PukePool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneChange {
    pub scene: String,
    pub level_type: Option<crate::config::LevelType>,
    pub boundary: f32,
    pub obstacles: Vec<crate::environment::Aabb>,
    /// Oriented boxes minus sandbag boxes; those replicate with the
    /// hazards so breakage stays consistent client-side.
    pub oriented_boxes: Vec<crate::environment::OrientedBox>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersState {
    pub ready_running: bool,
    pub ready_time_left: f32,
    pub extraction_running: bool,
    pub extraction_time_left: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub tick: u64,
    pub players: Vec<PlayerState>,
    pub chests: Vec<Chest>,
    pub ground_items: Vec<GroundItem>,
    pub timers: TimersState,
    pub shop: Vec<ShopItem>,
    pub mission_over: bool,
}

/// One outbound message addressed to the room's subscriber set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    SceneChange(SceneChange),
    RoomSnapshot(RoomSnapshot),
    EnemiesState { enemies: Vec<EnemyState> },
    TroopsState {
        troops: Vec<TroopState>,
        barracks: Vec<BarracksState>,
        /// Capped debug-overlay list of live stuck-avoid zones.
        stuck_zones: Vec<StuckZone>,
        spawning_locked: bool,
    },
    NpcsState { npcs: Vec<NpcState> },
    HazardsState(HazardsState),
    Point(GameEvent),
}

/// A transport endpoint for one client (or one fan-out queue). Must
/// not block; returning false counts as a dropped sample.
pub trait Subscriber: Send {
    fn deliver(&self, msg: &OutboundMessage) -> bool;
}

/// Subscriber backed by a bounded channel: full channel drops the
/// sample instead of stalling the tick.
pub struct ChannelSubscriber {
    pub tx: SyncSender<OutboundMessage>,
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, msg: &OutboundMessage) -> bool {
        self.tx.try_send(msg.clone()).is_ok()
    }
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: Vec<Box<dyn Subscriber>>,
    enemies_accum: f32,
    troops_accum: f32,
    npcs_accum: f32,
    snapshot_accum: f32,
    dropped: u64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sub: Box<dyn Subscriber>) {
        self.subscribers.push(sub);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Sample the room after a tick and fan the resulting messages out.
    pub fn sample(&mut self, dt: f32, room: &mut Room) {
        let mut out: Vec<OutboundMessage> = Vec::new();

        // Point events first, in emission order.
        for event in room.bus.drain() {
            out.push(OutboundMessage::Point(event));
        }

        if room.scene_changed {
            out.push(OutboundMessage::SceneChange(scene_change(room)));
            out.push(OutboundMessage::RoomSnapshot(room_snapshot(room)));
            room.scene_changed = false;
        }

        self.enemies_accum += dt;
        self.troops_accum += dt;
        self.npcs_accum += dt;
        self.snapshot_accum += dt;

        if self.enemies_accum >= STATE_INTERVAL {
            self.enemies_accum -= STATE_INTERVAL;
            out.push(OutboundMessage::EnemiesState {
                enemies: room
                    .enemies
                    .values()
                    .map(|e| EnemyState {
                        id: e.id.clone(),
                        kind: e.kind,
                        x: e.x,
                        y: e.y,
                        health: e.health,
                        health_max: e.health_max,
                        burning: e.burning,
                    })
                    .collect(),
            });
        }
        if self.troops_accum >= STATE_INTERVAL {
            self.troops_accum -= STATE_INTERVAL;
            out.push(OutboundMessage::TroopsState {
                troops: room
                    .troops
                    .values()
                    .map(|t| TroopState {
                        id: t.id.clone(),
                        kind: t.kind,
                        x: t.x,
                        y: t.y,
                        health: t.health,
                        health_max: t.health_max,
                        target_enemy: t.target_enemy.clone(),
                        dot_count: t.dots.len(),
                        barrel_angle: t.barrel_angle,
                    })
                    .collect(),
                barracks: room
                    .troop_ctl
                    .barracks
                    .values()
                    .map(|b| BarracksState { id: b.id.clone(), x: b.x, y: b.y })
                    .collect(),
                stuck_zones: room.troop_ctl.stuck_zones.clone(),
                spawning_locked: matches!(
                    room.troop_ctl.phase,
                    SpawnPhase::Locked | SpawnPhase::LockedFinal
                ),
            });
        }
        if self.npcs_accum >= STATE_INTERVAL {
            self.npcs_accum -= STATE_INTERVAL;
            out.push(OutboundMessage::NpcsState {
                npcs: room
                    .npcs
                    .values()
                    .map(|n| NpcState {
                        id: n.id.clone(),
                        kind: n.kind.clone(),
                        x: n.x,
                        y: n.y,
                        health: n.health,
                        health_max: n.health_max,
                    })
                    .collect(),
            });
        }

        // Change-driven state.
        if room.hazards.dirty {
            room.hazards.dirty = false;
            out.push(OutboundMessage::HazardsState(hazards_state(room)));
        }
        if room.chests_dirty || room.timers_dirty || self.snapshot_accum >= STATE_INTERVAL {
            room.chests_dirty = false;
            room.timers_dirty = false;
            if self.snapshot_accum >= STATE_INTERVAL {
                self.snapshot_accum -= STATE_INTERVAL;
            }
            out.push(OutboundMessage::RoomSnapshot(room_snapshot(room)));
        }

        if out.is_empty() {
            return;
        }
        for sub in &self.subscribers {
            for msg in &out {
                if !sub.deliver(msg) {
                    self.dropped += 1;
                    trace!(room = %room.id, "subscriber dropped a sample");
                }
            }
        }
    }
}

fn scene_change(room: &Room) -> SceneChange {
    SceneChange {
        scene: match room.scene {
            Scene::Lobby => "lobby".to_string(),
            Scene::Level => "level".to_string(),
        },
        level_type: (room.scene == Scene::Level).then_some(room.level_type),
        boundary: room.config.boundary,
        obstacles: room.env.obstacles.clone(),
        oriented_boxes: room
            .env
            .oriented_boxes
            .iter()
            .filter(|b| b.tag != crate::environment::BoxTag::Sandbag)
            .cloned()
            .collect(),
    }
}

fn hazards_state(room: &Room) -> HazardsState {
    HazardsState {
        sandbags: room.hazards.sandbags.values().cloned().collect(),
        barbed_wire: room.hazards.wire.values().cloned().collect(),
        mud_pools: room.hazards.mud.values().cloned().collect(),
        fire_pools: room.hazards.fire.values().cloned().collect(),
        gas_canisters: room.hazards.gas.values().cloned().collect(),
        exploding_barrels: room.hazards.barrels.values().cloned().collect(),
        puke_pools: room.hazards.puke.values().cloned().collect(),
    }
}

fn room_snapshot(room: &Room) -> RoomSnapshot {
    RoomSnapshot {
        tick: room.tick_count,
        players: room
            .players
            .values()
            .map(|p| PlayerState {
                id: p.id.clone(),
                name: p.name.clone(),
                x: p.x,
                y: p.y,
                aim_angle: p.aim_angle,
                health: p.health,
                health_max: p.health_max,
                stamina: p.stamina,
                stamina_max: p.stamina_max,
                dashing: p.dash.active,
                invisible: p.invisible,
                burning: p.burning,
                gassed: p.gassed_left > 0.0,
                ducats: p.ducats,
                blood_markers: p.blood_markers,
                victory_points: p.victory_points,
                loot_level: p.loot_level,
                evil: p.evil,
                last_input_seq: p.last_input_seq,
            })
            .collect(),
        chests: room.chests.values().cloned().collect(),
        ground_items: room.ground_items.values().cloned().collect(),
        timers: TimersState {
            ready_running: room.ready_timer.is_some(),
            ready_time_left: room.ready_timer.as_ref().map(|t| t.time_left).unwrap_or(0.0),
            extraction_running: room.extraction.is_some(),
            extraction_time_left: room.extraction.as_ref().map(|t| t.time_left).unwrap_or(0.0),
        },
        shop: room.loot.shop.clone(),
        mission_over: room.mission_over,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ClientCommand;
    use crate::config::{GameModeConfig, LevelType};
    use crate::room::TICK_DT;
    use std::sync::{Arc, Mutex};

    struct Collector {
        messages: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    impl Subscriber for Collector {
        fn deliver(&self, msg: &OutboundMessage) -> bool {
            self.messages.lock().unwrap().push(msg.clone());
            true
        }
    }

    fn room_with_player() -> Room {
        let mut room = Room::with_config("room_b", 11, GameModeConfig::test());
        room.handle(ClientCommand::Join { player_id: "p1".into(), name: "A".into() })
            .unwrap();
        room
    }

    #[test]
    fn test_enemies_state_rate_is_ten_hertz() {
        let mut room = room_with_player();
        room.start_level(LevelType::Test);
        let mut broadcaster = Broadcaster::new();
        let messages = Arc::new(Mutex::new(Vec::new()));
        broadcaster.subscribe(Box::new(Collector { messages: messages.clone() }));

        // 10 wall-seconds of steady ticking.
        for _ in 0..600 {
            room.tick(TICK_DT);
            broadcaster.sample(TICK_DT, &mut room);
        }

        let count = messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::EnemiesState { .. }))
            .count();
        let per_second = count as f32 / 10.0;
        assert!(
            (9.0..=11.0).contains(&per_second),
            "enemiesState rate {per_second}/s"
        );
    }

    #[test]
    fn test_point_events_forwarded_in_order() {
        let mut room = room_with_player();
        room.bus.emit(GameEvent::DamageText { x: 1.0, y: 2.0, amount: 3.0 });
        room.bus.emit(GameEvent::EntityDead { id: "enemy_9".into() });

        let mut broadcaster = Broadcaster::new();
        let messages = Arc::new(Mutex::new(Vec::new()));
        broadcaster.subscribe(Box::new(Collector { messages: messages.clone() }));
        broadcaster.sample(TICK_DT, &mut room);

        let msgs = messages.lock().unwrap();
        let points: Vec<_> = msgs
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Point(e) => Some(e.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(points.len(), 2);
        assert!(matches!(points[0], GameEvent::DamageText { .. }));
        assert!(matches!(points[1], GameEvent::EntityDead { .. }));
        assert!(room.bus.is_empty());
    }

    #[test]
    fn test_scene_change_filters_sandbag_boxes() {
        let mut room = room_with_player();
        room.start_level(LevelType::Trenchraid);
        // Trenchraid places sandbags; the scene payload must not leak
        // their boxes as permanent geometry.
        let change = scene_change(&room);
        assert!(change
            .oriented_boxes
            .iter()
            .all(|b| b.tag != crate::environment::BoxTag::Sandbag));
        assert_eq!(change.scene, "level");
        assert_eq!(change.boundary, 23_000.0);
    }

    #[test]
    fn test_hazards_state_sent_on_change_only() {
        let mut room = room_with_player();
        room.start_level(LevelType::Test);
        let mut broadcaster = Broadcaster::new();
        let messages = Arc::new(Mutex::new(Vec::new()));
        broadcaster.subscribe(Box::new(Collector { messages: messages.clone() }));

        // First sample flushes the level-start dirty flag.
        broadcaster.sample(TICK_DT, &mut room);
        let first = messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::HazardsState(_)))
            .count();
        assert_eq!(first, 1);

        // No hazard mutation: no further hazard dumps.
        messages.lock().unwrap().clear();
        for _ in 0..30 {
            room.tick(TICK_DT);
            broadcaster.sample(TICK_DT, &mut room);
        }
        let later = messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::HazardsState(_)))
            .count();
        assert_eq!(later, 0);
    }

    #[test]
    fn test_backpressure_drops_instead_of_blocking() {
        let mut room = room_with_player();
        room.start_level(LevelType::Test);
        let (tx, _rx) = std::sync::mpsc::sync_channel(2);
        let mut broadcaster = Broadcaster::new();
        broadcaster.subscribe(Box::new(ChannelSubscriber { tx }));

        for _ in 0..120 {
            room.tick(TICK_DT);
            broadcaster.sample(TICK_DT, &mut room);
        }
        // The channel held 2 messages; everything further was dropped,
        // and the loop never stalled.
        assert!(broadcaster.dropped() > 0);
    }

    #[test]
    fn test_room_snapshot_serializes() {
        let mut room = room_with_player();
        room.start_level(LevelType::Test);
        let snap = room_snapshot(&room);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"players\""));
        assert!(json.contains("\"shop\""));
    }
}
