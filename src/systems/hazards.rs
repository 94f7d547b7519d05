//! Hazard lifecycle: sandbags, barbed wire, mud, fire, gas, barrels,
//! and boomer puke pools.
//!
//! The hazard field owns the hazard records and applies their per-tick
//! zone effects to entities found through the spatial grid. Breakable
//! hazards (sandbags, barrels) register oriented collision boxes into
//! the environment; a sandbag's `box_index` mirrors its box's position
//! in the environment list and is renormalized whenever a sibling dies.

use crate::entities::{apply_dot, Enemy, Player, Troop, DOT_FIRE, DOT_PUKE};
use crate::environment::{BoxTag, Environment, OrientedBox};
use crate::error::SimFault;
use crate::events::{Effect, EventBus, GameEvent};
use crate::config::{HazardLayoutConfig, HazardStrategy, SpawnPoint};
use crate::entities::IdGen;
use crate::rng::GameRng;
use crate::spatial::{BodyKind, SpatialGrid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const FIRE_DPS: f32 = 10.0;
pub const FIRE_DOT_DURATION: f32 = 2.0;
pub const PUKE_DPS: f32 = 8.0;
pub const PUKE_DOT_DURATION: f32 = 1.5;
pub const WIRE_DPS: f32 = 6.0;
pub const MUD_LINGER: f32 = 0.7;
pub const GAS_LINGER: f32 = 1.5;
/// Inner radius of full barrel damage.
pub const EXPLOSION_INNER: f32 = 20.0;

pub const SANDBAG_HEALTH: f32 = 300.0;
pub const SANDBAG_W: f32 = 90.0;
pub const SANDBAG_H: f32 = 26.0;

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbag {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub angle: f32,
    pub health: f32,
    pub health_max: f32,
    /// Index of this sandbag's oriented box in the environment.
    pub box_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarbedWire {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub dps: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MudPool {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub r: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirePool {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub dps: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasCanister {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub r: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplodingBarrel {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub explosion_radius: f32,
    pub explosion_damage: f32,
}

/// Boomer death pool; short-lived, applies a stacking DOT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PukePool {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub ttl: f32,
    pub dps: f32,
}

/// Linear damage falloff from `dmg_inner` inside `inner` to
/// `dmg_outer` at `outer`.
pub fn linear_falloff(dist: f32, inner: f32, outer: f32, dmg_inner: f32, dmg_outer: f32) -> f32 {
    if dist <= inner {
        dmg_inner
    } else if dist >= outer {
        dmg_outer
    } else {
        let t = (dist - inner) / (outer - inner);
        dmg_inner + (dmg_outer - dmg_inner) * t
    }
}

// ============================================================================
// FIELD
// ============================================================================

#[derive(Debug, Default)]
pub struct HazardField {
    pub sandbags: BTreeMap<String, Sandbag>,
    pub wire: BTreeMap<String, BarbedWire>,
    pub mud: BTreeMap<String, MudPool>,
    pub fire: BTreeMap<String, FirePool>,
    pub gas: BTreeMap<String, GasCanister>,
    pub barrels: BTreeMap<String, ExplodingBarrel>,
    pub puke: BTreeMap<String, PukePool>,
    /// Set whenever the replicated hazard set changed this tick.
    pub dirty: bool,
}

impl HazardField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self, env: &mut Environment) {
        for sandbag in self.sandbags.values() {
            env.remove_boxes_owned_by(&sandbag.id);
        }
        self.sandbags.clear();
        self.wire.clear();
        self.mud.clear();
        self.fire.clear();
        self.gas.clear();
        self.barrels.clear();
        self.puke.clear();
        self.dirty = true;
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Place the level's hazards from a layout config. Placement is
    /// seeded; a scattered group whose orientation rolls all fail is
    /// legal and places nothing.
    pub fn spawn_layout(
        &mut self,
        layout: &HazardLayoutConfig,
        spawn: &SpawnPoint,
        env: &mut Environment,
        ids: &mut IdGen,
        rng: &mut GameRng,
    ) {
        let place_ok = |env: &Environment, layout: &HazardLayoutConfig, x: f32, y: f32| -> bool {
            if !env.is_inside_bounds(x, y, 60.0) {
                return false;
            }
            if layout.clear_zones.iter().any(|z| z.contains_point(x, y)) {
                return false;
            }
            let dx = x - spawn.x;
            let dy = y - spawn.y;
            (dx * dx + dy * dy).sqrt() >= layout.spawn_clearance
        };

        // Sandbags: each group rolls four orientations independently.
        if layout.sandbags.enabled {
            if let HazardStrategy::Scattered { groups, band, orientation_chance } =
                &layout.sandbags.strategy
            {
                for _ in 0..*groups {
                    let gx = rng.range_f32(band.0, band.1);
                    let gy = rng.range_f32(-9000.0, 9000.0);
                    if !place_ok(env, layout, gx, gy) {
                        continue;
                    }
                    for (i, angle) in [0.0, std::f32::consts::FRAC_PI_2, 0.0, std::f32::consts::FRAC_PI_2]
                        .into_iter()
                        .enumerate()
                    {
                        if !rng.chance(*orientation_chance) {
                            continue;
                        }
                        let side = if i < 2 { -1.0 } else { 1.0 };
                        let (x, y) = if angle == 0.0 {
                            (gx, gy + side * 70.0)
                        } else {
                            (gx + side * 70.0, gy)
                        };
                        if env.circle_hits_any(x, y, 50.0) {
                            continue;
                        }
                        self.add_sandbag(x, y, angle, env, ids);
                    }
                }
            }
        }

        let scatter = |enabled: bool,
                           strategy: &HazardStrategy,
                           env: &mut Environment,
                           out: &mut Vec<(f32, f32)>,
                           rng: &mut GameRng| {
            if !enabled {
                return;
            }
            if let HazardStrategy::Scattered { groups, band, orientation_chance } = strategy {
                for _ in 0..*groups {
                    let x = rng.range_f32(band.0, band.1);
                    let y = rng.range_f32(-9000.0, 9000.0);
                    if rng.chance(*orientation_chance)
                        && place_ok(env, layout, x, y)
                        && !env.circle_hits_any(x, y, 40.0)
                    {
                        out.push((x, y));
                    }
                }
            }
        };

        let mut spots = Vec::new();
        scatter(layout.barbed_wire.enabled, &layout.barbed_wire.strategy, env, &mut spots, rng);
        for (x, y) in spots.drain(..) {
            let id = ids.next("wire");
            self.wire.insert(id.clone(), BarbedWire { id, x, y, r: 60.0, dps: WIRE_DPS });
        }

        scatter(layout.mud_pools.enabled, &layout.mud_pools.strategy, env, &mut spots, rng);
        for (x, y) in spots.drain(..) {
            let id = ids.next("mud");
            self.mud.insert(id.clone(), MudPool { id, x, y, r: 90.0 });
        }

        scatter(layout.fire_pools.enabled, &layout.fire_pools.strategy, env, &mut spots, rng);
        for (x, y) in spots.drain(..) {
            let id = ids.next("fire");
            self.fire.insert(id.clone(), FirePool { id, x, y, r: 70.0, dps: FIRE_DPS });
        }

        scatter(layout.gas_canisters.enabled, &layout.gas_canisters.strategy, env, &mut spots, rng);
        for (x, y) in spots.drain(..) {
            let id = ids.next("gas");
            self.gas.insert(id.clone(), GasCanister { id, x, y, r: 80.0 });
        }

        scatter(layout.barrels.enabled, &layout.barrels.strategy, env, &mut spots, rng);
        for (x, y) in spots.drain(..) {
            let id = ids.next("barrel");
            self.barrels.insert(
                id.clone(),
                ExplodingBarrel {
                    id,
                    x,
                    y,
                    radius: 18.0,
                    health: 40.0,
                    health_max: 40.0,
                    explosion_radius: 140.0,
                    explosion_damage: 50.0,
                },
            );
        }

        self.dirty = true;
    }

    /// Add one sandbag, registering its collision box.
    pub fn add_sandbag(
        &mut self,
        x: f32,
        y: f32,
        angle: f32,
        env: &mut Environment,
        ids: &mut IdGen,
    ) -> String {
        let id = ids.next("sandbag");
        let box_index = env.add_oriented_box(
            OrientedBox::new(x, y, SANDBAG_W, SANDBAG_H, angle, BoxTag::Sandbag).with_owner(&id),
        );
        self.sandbags.insert(
            id.clone(),
            Sandbag {
                id: id.clone(),
                x,
                y,
                w: SANDBAG_W,
                h: SANDBAG_H,
                angle,
                health: SANDBAG_HEALTH,
                health_max: SANDBAG_HEALTH,
                box_index,
            },
        );
        self.dirty = true;
        id
    }

    pub fn spawn_puke_pool(&mut self, x: f32, y: f32, ids: &mut IdGen) {
        let id = ids.next("puke");
        self.puke.insert(
            id.clone(),
            PukePool { id, x, y, r: 100.0, ttl: 12.0, dps: PUKE_DPS },
        );
        self.dirty = true;
    }

    // ------------------------------------------------------------------
    // Per-tick zone effects
    // ------------------------------------------------------------------

    /// Apply zone effects to entities near each hazard. DOT stack
    /// ticking itself (damage, expiry, falling burn edges) is done by
    /// the room when it integrates each entity class.
    pub fn tick(
        &mut self,
        dt: f32,
        grid: &SpatialGrid,
        players: &mut BTreeMap<String, Player>,
        enemies: &mut BTreeMap<String, Enemy>,
        troops: &mut BTreeMap<String, Troop>,
        bus: &mut EventBus,
    ) {
        // Mud: movement x0.5 while inside, lingering briefly after.
        for pool in self.mud.values() {
            for entry in grid.query_circle(pool.x, pool.y, pool.r) {
                match entry.kind {
                    BodyKind::Player => {
                        if let Some(p) = players.get_mut(&entry.id) {
                            p.mud_linger = MUD_LINGER;
                        }
                    }
                    BodyKind::Enemy => {
                        if let Some(e) = enemies.get_mut(&entry.id) {
                            e.mud_linger = MUD_LINGER;
                        }
                    }
                    BodyKind::Troop => {
                        if let Some(t) = troops.get_mut(&entry.id) {
                            t.mud_linger = MUD_LINGER;
                        }
                    }
                    _ => {}
                }
            }
        }

        // Fire pools: refresh the fire DOT; rising edge reports burn.
        for pool in self.fire.values() {
            for entry in grid.query_circle(pool.x, pool.y, pool.r) {
                let rose = match entry.kind {
                    BodyKind::Player => players.get_mut(&entry.id).map(|p| {
                        let rose = apply_dot(&mut p.dots, DOT_FIRE, pool.dps, FIRE_DOT_DURATION);
                        p.burning = true;
                        rose
                    }),
                    BodyKind::Enemy => enemies.get_mut(&entry.id).map(|e| {
                        let rose = apply_dot(&mut e.dots, DOT_FIRE, pool.dps, FIRE_DOT_DURATION);
                        e.burning = true;
                        rose
                    }),
                    BodyKind::Troop => troops.get_mut(&entry.id).map(|t| {
                        let rose = apply_dot(&mut t.dots, DOT_FIRE, pool.dps, FIRE_DOT_DURATION);
                        t.burning = true;
                        rose
                    }),
                    _ => None,
                };
                if rose == Some(true) {
                    bus.emit(GameEvent::BurnStateChanged { id: entry.id.clone(), burning: true });
                }
            }
        }

        // Puke pools: DOT plus expiry.
        let mut expired = Vec::new();
        for pool in self.puke.values_mut() {
            pool.ttl -= dt;
            if pool.ttl <= 0.0 {
                expired.push(pool.id.clone());
                continue;
            }
            for entry in grid.query_circle(pool.x, pool.y, pool.r) {
                match entry.kind {
                    BodyKind::Player => {
                        if let Some(p) = players.get_mut(&entry.id) {
                            apply_dot(&mut p.dots, DOT_PUKE, pool.dps, PUKE_DOT_DURATION);
                        }
                    }
                    BodyKind::Troop => {
                        if let Some(t) = troops.get_mut(&entry.id) {
                            apply_dot(&mut t.dots, DOT_PUKE, pool.dps, PUKE_DOT_DURATION);
                        }
                    }
                    _ => {}
                }
            }
        }
        for id in expired {
            self.puke.remove(&id);
            bus.emit(GameEvent::HazardRemoved { id });
            self.dirty = true;
        }

        // Gas: vision impairment flag on players.
        for canister in self.gas.values() {
            for entry in grid.query_circle_kind(canister.x, canister.y, canister.r, BodyKind::Player)
            {
                if let Some(p) = players.get_mut(&entry.id) {
                    p.gassed_left = GAS_LINGER;
                }
            }
        }

        // Wire: flat contact damage to anything walking through.
        for wire in self.wire.values() {
            for entry in grid.query_circle(wire.x, wire.y, wire.r) {
                match entry.kind {
                    BodyKind::Player => {
                        if let Some(p) = players.get_mut(&entry.id) {
                            p.damage(wire.dps * dt);
                        }
                    }
                    BodyKind::Enemy => {
                        if let Some(e) = enemies.get_mut(&entry.id) {
                            e.damage(wire.dps * dt);
                        }
                    }
                    BodyKind::Troop => {
                        if let Some(t) = troops.get_mut(&entry.id) {
                            t.damage(wire.dps * dt);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// True when (x, y) is inside any fire pool. Used by the troop
    /// controller to detect fire deaths.
    pub fn point_in_fire(&self, x: f32, y: f32) -> bool {
        self.fire.values().any(|pool| {
            let dx = x - pool.x;
            let dy = y - pool.y;
            dx * dx + dy * dy <= pool.r * pool.r
        })
    }

    // ------------------------------------------------------------------
    // Damage to breakables
    // ------------------------------------------------------------------

    /// Nearest sandbag within `max_dist` of a point.
    pub fn nearest_sandbag(&self, x: f32, y: f32, max_dist: f32) -> Option<String> {
        self.sandbags
            .values()
            .filter_map(|s| {
                let d = ((s.x - x).powi(2) + (s.y - y).powi(2)).sqrt();
                (d <= max_dist).then_some((s.id.clone(), d))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id)
    }

    /// First sandbag or barrel intersected by a segment, if any.
    /// Returns the hazard id.
    pub fn line_hits_breakable(
        &self,
        env: &Environment,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
    ) -> Option<String> {
        for s in self.sandbags.values() {
            if let Some(obb) = env.oriented_boxes.get(s.box_index) {
                if obb.intersects_segment(x1, y1, x2, y2) {
                    return Some(s.id.clone());
                }
            }
        }
        for b in self.barrels.values() {
            // Segment-circle test via closest point on the segment.
            let (dx, dy) = (x2 - x1, y2 - y1);
            let len_sq = dx * dx + dy * dy;
            let t = if len_sq < 1e-6 {
                0.0
            } else {
                (((b.x - x1) * dx + (b.y - y1) * dy) / len_sq).clamp(0.0, 1.0)
            };
            let px = x1 + dx * t;
            let py = y1 + dy * t;
            if (px - b.x).powi(2) + (py - b.y).powi(2) <= b.radius * b.radius {
                return Some(b.id.clone());
            }
        }
        None
    }

    /// Apply damage to a breakable hazard by id. Returns true if the
    /// id matched a known sandbag or barrel.
    pub fn damage_hazard(
        &mut self,
        id: &str,
        amount: f32,
        env: &mut Environment,
        players: &BTreeMap<String, Player>,
        troops: &BTreeMap<String, Troop>,
        bus: &mut EventBus,
        effects: &mut Vec<Effect>,
    ) -> bool {
        if self.sandbags.contains_key(id) {
            self.damage_sandbag(id, amount, env, bus);
            true
        } else if self.barrels.contains_key(id) {
            self.damage_barrel(id, amount, players, troops, bus, effects);
            true
        } else {
            false
        }
    }

    pub fn damage_sandbag(
        &mut self,
        id: &str,
        amount: f32,
        env: &mut Environment,
        bus: &mut EventBus,
    ) {
        let died = {
            let Some(sandbag) = self.sandbags.get_mut(id) else {
                return;
            };
            sandbag.health = (sandbag.health - amount).max(0.0);
            bus.emit(GameEvent::HazardHit { id: id.to_string(), health: sandbag.health });
            self.dirty = true;
            sandbag.health <= 0.0
        };
        if died {
            self.remove_sandbag(id, env, bus);
        }
    }

    /// Remove a dead sandbag: delete exactly its oriented box and shift
    /// sibling indices down to stay consistent with the environment.
    fn remove_sandbag(&mut self, id: &str, env: &mut Environment, bus: &mut EventBus) {
        let Some(sandbag) = self.sandbags.remove(id) else {
            return;
        };

        let index_valid = env
            .oriented_boxes
            .get(sandbag.box_index)
            .map(|b| b.owner.as_deref() == Some(id))
            .unwrap_or(false);

        if index_valid {
            env.remove_oriented_box(sandbag.box_index);
            for other in self.sandbags.values_mut() {
                if other.box_index > sandbag.box_index {
                    other.box_index -= 1;
                }
            }
        } else {
            // Index drifted from the box list: repair by owner lookup
            // instead of removing the wrong wall.
            let fault = SimFault::StateViolation {
                detail: format!(
                    "sandbag {id} box index {} does not match the box list",
                    sandbag.box_index
                ),
            };
            warn!(%fault, "repairing by owner lookup");
            if let Some(actual) = env
                .oriented_boxes
                .iter()
                .position(|b| b.owner.as_deref() == Some(id))
            {
                env.remove_oriented_box(actual);
                for other in self.sandbags.values_mut() {
                    if other.box_index > actual {
                        other.box_index -= 1;
                    }
                }
            }
        }

        bus.emit(GameEvent::HazardRemoved { id: id.to_string() });
        self.dirty = true;
    }

    pub fn damage_barrel(
        &mut self,
        id: &str,
        amount: f32,
        players: &BTreeMap<String, Player>,
        troops: &BTreeMap<String, Troop>,
        bus: &mut EventBus,
        effects: &mut Vec<Effect>,
    ) {
        let exploded = {
            let Some(barrel) = self.barrels.get_mut(id) else {
                return;
            };
            barrel.health = (barrel.health - amount).max(0.0);
            bus.emit(GameEvent::HazardHit { id: id.to_string(), health: barrel.health });
            self.dirty = true;
            barrel.health <= 0.0
        };
        if !exploded {
            return;
        }

        let barrel = self.barrels.remove(id).expect("barrel checked above");
        bus.emit(GameEvent::VfxEvent { kind: "barrelExplosion".into(), x: barrel.x, y: barrel.y });
        bus.emit(GameEvent::HazardRemoved { id: id.to_string() });

        // Damage falls off linearly from full at the inner radius to
        // 40% at the outer edge.
        let outer_dmg = barrel.explosion_damage * 0.4;
        for p in players.values() {
            let dist = ((p.x - barrel.x).powi(2) + (p.y - barrel.y).powi(2)).sqrt();
            if dist <= barrel.explosion_radius + p.radius {
                let dmg = linear_falloff(
                    dist,
                    EXPLOSION_INNER,
                    barrel.explosion_radius,
                    barrel.explosion_damage,
                    outer_dmg,
                );
                effects.push(Effect::DamagePlayer { id: p.id.clone(), amount: dmg });
            }
        }
        for t in troops.values() {
            let dist = ((t.x - barrel.x).powi(2) + (t.y - barrel.y).powi(2)).sqrt();
            if dist <= barrel.explosion_radius + t.radius {
                let dmg = linear_falloff(
                    dist,
                    EXPLOSION_INNER,
                    barrel.explosion_radius,
                    barrel.explosion_damage,
                    outer_dmg,
                );
                effects.push(Effect::DamageTroop { id: t.id.clone(), amount: dmg });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::has_dot;

    fn small_world() -> (HazardField, Environment, IdGen, EventBus, SpatialGrid) {
        (
            HazardField::new(),
            Environment::with_boundary(2000.0),
            IdGen::new(),
            EventBus::new(),
            SpatialGrid::default(),
        )
    }

    #[test]
    fn test_sandbag_box_indices_renormalize_on_death() {
        let (mut field, mut env, mut ids, mut bus, _) = small_world();
        let a = field.add_sandbag(0.0, 0.0, 0.0, &mut env, &mut ids);
        let b = field.add_sandbag(200.0, 0.0, 0.0, &mut env, &mut ids);
        let c = field.add_sandbag(400.0, 0.0, 0.0, &mut env, &mut ids);
        assert_eq!(env.oriented_boxes.len(), 3);

        // Kill the first sandbag outright.
        field.damage_sandbag(&a, SANDBAG_HEALTH, &mut env, &mut bus);
        assert_eq!(env.oriented_boxes.len(), 2);
        assert!(!field.sandbags.contains_key(&a));

        // Remaining indices still point at their own boxes.
        for id in [&b, &c] {
            let s = &field.sandbags[id.as_str()];
            let obb = &env.oriented_boxes[s.box_index];
            assert_eq!(obb.owner.as_deref(), Some(id.as_str()));
        }
    }

    #[test]
    fn test_fire_pool_applies_dot_and_reports_burn_edge() {
        let (mut field, _env, mut ids, mut bus, mut grid) = small_world();
        let id = ids.next("fire");
        field.fire.insert(id.clone(), FirePool { id, x: 0.0, y: 0.0, r: 70.0, dps: FIRE_DPS });

        let mut players = BTreeMap::new();
        let mut p = Player::new("p1", "t");
        p.x = 10.0;
        p.y = 0.0;
        grid.insert("p1", BodyKind::Player, p.x, p.y);
        players.insert(p.id.clone(), p);
        let mut enemies = BTreeMap::new();
        let mut troops = BTreeMap::new();

        field.tick(0.05, &grid, &mut players, &mut enemies, &mut troops, &mut bus);
        assert!(has_dot(&players["p1"].dots, DOT_FIRE));
        assert!(players["p1"].burning);
        let burns: Vec<_> = bus
            .events()
            .iter()
            .filter(|e| matches!(e, GameEvent::BurnStateChanged { burning: true, .. }))
            .collect();
        assert_eq!(burns.len(), 1);

        // Second tick refreshes the stack without a second rising edge.
        bus.drain();
        field.tick(0.05, &grid, &mut players, &mut enemies, &mut troops, &mut bus);
        assert!(bus.events().iter().all(|e| !matches!(e, GameEvent::BurnStateChanged { .. })));
        assert_eq!(players["p1"].dots.len(), 1);
    }

    #[test]
    fn test_mud_sets_linger() {
        let (mut field, _env, mut ids, mut bus, mut grid) = small_world();
        let id = ids.next("mud");
        field.mud.insert(id.clone(), MudPool { id, x: 0.0, y: 0.0, r: 90.0 });

        let mut players = BTreeMap::new();
        let mut p = Player::new("p1", "t");
        p.x = 30.0;
        grid.insert("p1", BodyKind::Player, 30.0, 0.0);
        players.insert(p.id.clone(), p);

        field.tick(
            0.05,
            &grid,
            &mut players,
            &mut BTreeMap::new(),
            &mut BTreeMap::new(),
            &mut bus,
        );
        assert!((players["p1"].mud_linger - MUD_LINGER).abs() < 1e-5);
    }

    #[test]
    fn test_barrel_explosion_damage_curve() {
        let (mut field, _env, mut ids, mut bus, _grid) = small_world();
        let id = ids.next("barrel");
        field.barrels.insert(
            id.clone(),
            ExplodingBarrel {
                id: id.clone(),
                x: 0.0,
                y: 0.0,
                radius: 18.0,
                health: 10.0,
                health_max: 40.0,
                explosion_radius: 140.0,
                explosion_damage: 50.0,
            },
        );

        let mut players = BTreeMap::new();
        let mut close = Player::new("close", "a");
        close.x = 10.0;
        players.insert(close.id.clone(), close);
        let mut far = Player::new("far", "b");
        far.x = 140.0;
        players.insert(far.id.clone(), far);
        let mut outside = Player::new("outside", "c");
        outside.x = 400.0;
        players.insert(outside.id.clone(), outside);

        let mut effects = Vec::new();
        field.damage_barrel(&id, 10.0, &players, &BTreeMap::new(), &mut bus, &mut effects);

        assert!(field.barrels.is_empty());
        let dmg_of = |pid: &str| {
            effects.iter().find_map(|e| match e {
                Effect::DamagePlayer { id, amount } if id == pid => Some(*amount),
                _ => None,
            })
        };
        assert!((dmg_of("close").unwrap() - 50.0).abs() < 1e-3); // inside inner radius
        assert!((dmg_of("far").unwrap() - 20.0).abs() < 1e-3); // 40% at edge
        assert!(dmg_of("outside").is_none());
    }

    #[test]
    fn test_puke_pool_expires() {
        let (mut field, _env, mut ids, mut bus, grid) = small_world();
        field.spawn_puke_pool(100.0, 100.0, &mut ids);
        assert_eq!(field.puke.len(), 1);
        assert!((field.puke.values().next().unwrap().ttl - 12.0).abs() < 1e-5);

        // Run past the ttl.
        for _ in 0..245 {
            field.tick(
                0.05,
                &grid,
                &mut BTreeMap::new(),
                &mut BTreeMap::new(),
                &mut BTreeMap::new(),
                &mut bus,
            );
        }
        assert!(field.puke.is_empty());
        assert!(bus.events().iter().any(|e| matches!(e, GameEvent::HazardRemoved { .. })));
    }

    #[test]
    fn test_empty_scattered_group_is_legal() {
        let (mut field, mut env, mut ids, _bus, _grid) = small_world();
        let mut layout = HazardLayoutConfig::trenchraid();
        // Zero orientation chance: every group rolls empty.
        if let HazardStrategy::Scattered { orientation_chance, .. } = &mut layout.sandbags.strategy {
            *orientation_chance = 0.0;
        }
        layout.barbed_wire.enabled = false;
        layout.mud_pools.enabled = false;
        layout.fire_pools.enabled = false;
        layout.gas_canisters.enabled = false;
        layout.barrels.enabled = false;

        let spawn = SpawnPoint { x: 0.0, y: 0.0, radius: 100.0 };
        let mut rng = GameRng::new(5);
        field.spawn_layout(&layout, &spawn, &mut env, &mut ids, &mut rng);
        assert!(field.sandbags.is_empty());
    }
}
