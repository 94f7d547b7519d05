//! Typed events emitted by the core.
//!
//! Two queues live here. `EventBus` carries outward-facing point
//! events, drained by the broadcaster in emission order within the tick
//! that produced them. `Effect` records carry cross-component state
//! changes (a troop damaging an enemy, a barrel chaining into a
//! sandbag): components push them during their pass and the room
//! applies them at end of tick, which keeps each entity class mutated
//! by exactly one owner during the pass itself.

use crate::entities::{EnemyKind, TroopKind};
use serde::{Deserialize, Serialize};

/// Outward-facing point event. Value-typed, serialized by the
/// broadcaster in the tick it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameEvent {
    EnemyHealthUpdate { id: String, health: f32 },
    EnemyDead { id: String, kind: EnemyKind, x: f32, y: f32 },
    EntityDead { id: String },
    BoomerExploded { id: String, x: f32, y: f32 },
    TroopDamaged { id: String, health: f32 },
    TroopDeath { id: String, x: f32, y: f32 },
    TroopAttack { id: String, kind: TroopKind, target: String },
    TroopHitscan {
        id: String,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        blocked: bool,
        hit_hazard: Option<String>,
    },
    TroopGrenade { id: String, x: f32, y: f32, fuse: f32 },
    HazardHit { id: String, health: f32 },
    HazardRemoved { id: String },
    VfxEvent { kind: String, x: f32, y: f32 },
    DamageText { x: f32, y: f32, amount: f32 },
    HordeSpawned { zone: Option<String>, count: u32, diff: u8 },
    BurnStateChanged { id: String, burning: bool },
    ReadyTimerUpdate { started: bool, time_left: f32 },
    ExtractionTimerUpdate { started: bool, time_left: f32 },
    PurchaseResult { player_id: String, success: bool, reason: Option<String> },
    MissionAccomplished { victory_points: i64 },
    /// The room hit an unrecoverable fault and is being torn down.
    RoomTerminated { reason: String },
}

/// Ordered per-tick event queue.
#[derive(Debug, Default)]
pub struct EventBus {
    queue: Vec<GameEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: GameEvent) {
        self.queue.push(event);
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Peek without draining (tests).
    pub fn events(&self) -> &[GameEvent] {
        &self.queue
    }
}

/// Deferred cross-component state change, applied by the room at end
/// of tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    DamagePlayer { id: String, amount: f32 },
    DamageEnemy { id: String, amount: f32 },
    DamageTroop { id: String, amount: f32 },
    DamageNpc { id: String, amount: f32 },
    /// Damage a breakable hazard (sandbag or barrel) by id.
    DamageHazard { id: String, amount: f32 },
    DotPlayer { id: String, key: String, dps: f32, duration: f32 },
    DotEnemy { id: String, key: String, dps: f32, duration: f32 },
    DotTroop { id: String, key: String, dps: f32, duration: f32 },
    DotNpc { id: String, key: String, dps: f32, duration: f32 },
    /// Boomer death chain: spawn a puke pool.
    SpawnPukePool { x: f32, y: f32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emission_order_is_preserved() {
        let mut bus = EventBus::new();
        bus.emit(GameEvent::DamageText { x: 0.0, y: 0.0, amount: 5.0 });
        bus.emit(GameEvent::EntityDead { id: "enemy_1".into() });
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], GameEvent::DamageText { .. }));
        assert!(matches!(drained[1], GameEvent::EntityDead { .. }));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let e = GameEvent::BoomerExploded { id: "enemy_3".into(), x: 100.0, y: 100.0 };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"boomerExploded\""));
        assert!(json.contains("\"x\":100.0"));
    }
}
