//! Enemy director: per-enemy steering and combat.
//!
//! Runs once per tick over every live enemy within the active radius of
//! a player. Steering composes, in priority order: tactic overrides
//! (projectile kiting/strafing), prefer-contact rushes, ring slots,
//! approach arcs and flank targets; the result is blended with feeler
//! pre-steering, separation and the avoid state machine, then turn-rate
//! limited and resolved against the environment in sub-steps.
//!
//! Friendly-faction emplacements (turrets, artillery) live in the same
//! enemy table and are driven by a separate branch at the end.

use crate::entities::{
    AvoidPhase, Enemy, EnemyKind, Faction, FlankStyle, Player, RingSlot, Tactic, Troop,
};
use crate::environment::Environment;
use crate::events::{Effect, EventBus, GameEvent};
use crate::rng::GameRng;
use crate::spatial::{BodyKind, SpatialGrid};
use std::collections::BTreeMap;
use std::f32::consts::{PI, TAU};

/// Enemies further than this from every player are not stepped.
pub const ACTIVE_RADIUS: f32 = 1400.0;
/// Window around a player inside which enemies compete for ring slots.
pub const RING_WINDOW: f32 = 600.0;
/// Radius of the reserved ring.
pub const RING_RADIUS: f32 = 160.0;
/// Minimum seconds between global ring reassignments.
pub const RING_REASSIGN_INTERVAL: f32 = 0.25;
/// Arc centers re-roll roughly this often.
const ARC_ROLL_INTERVAL: f32 = 9.0;
const ARC_HALF_WIDTH: f32 = 0.45;
/// Distance beyond which arc bias starts, and where it reaches full.
const ARC_BIAS_NEAR: f32 = 380.0;
const ARC_BIAS_FAR: f32 = 1200.0;
/// Maximum turn rate, radians per second.
const TURN_RATE: f32 = 4.0;
const SEPARATION_RADIUS: f32 = 100.0;
const SEPARATION_PAD: f32 = 10.0;
const STUCK_TRIGGER: f32 = 0.28;
/// Projectile enemies hold this standoff distance.
const STANDOFF: f32 = 320.0;

/// Room-level director mode. Multiplies base speed and widens the
/// clearance padding used by the feelers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectorMode {
    #[default]
    Hunt,
    Scatter,
    Panic,
    Ambush,
}

impl DirectorMode {
    pub fn speed_mul(self) -> f32 {
        match self {
            DirectorMode::Hunt => 1.0,
            DirectorMode::Scatter => 0.85,
            DirectorMode::Panic => 1.35,
            DirectorMode::Ambush => 1.1,
        }
    }

    pub fn clearance_pad(self) -> f32 {
        match self {
            DirectorMode::Hunt => 14.0,
            DirectorMode::Scatter => 10.0,
            DirectorMode::Panic => 8.0,
            DirectorMode::Ambush => 16.0,
        }
    }
}

#[inline]
fn wrap_angle(a: f32) -> f32 {
    let mut a = a % TAU;
    if a > PI {
        a -= TAU;
    } else if a < -PI {
        a += TAU;
    }
    a
}

#[inline]
fn angle_diff(a: f32, b: f32) -> f32 {
    wrap_angle(a - b)
}

/// Rotate `current` toward `target` by at most `max_delta`.
fn turn_toward(current: f32, target: f32, max_delta: f32) -> f32 {
    let diff = angle_diff(target, current);
    wrap_angle(current + diff.clamp(-max_delta, max_delta))
}

#[inline]
fn norm(x: f32, y: f32) -> (f32, f32) {
    let len = (x * x + y * y).sqrt();
    if len < 1e-6 {
        (0.0, 0.0)
    } else {
        (x / len, y / len)
    }
}

pub struct Director {
    pub mode: DirectorMode,
    time: f32,
    ring_last_assign: f32,
    ring_epoch: u64,
    arcs: Vec<f32>,
    arcs_roll_in: f32,
    rng: GameRng,
}

impl Director {
    pub fn new(world_seed: u32) -> Self {
        Self {
            mode: DirectorMode::Hunt,
            time: 0.0,
            ring_last_assign: RING_REASSIGN_INTERVAL,
            ring_epoch: 0,
            arcs: Vec::new(),
            arcs_roll_in: 0.0,
            rng: GameRng::stream(world_seed, "director"),
        }
    }

    pub fn current_ring_epoch(&self) -> u64 {
        self.ring_epoch
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        dt: f32,
        players: &BTreeMap<String, Player>,
        troops: &BTreeMap<String, Troop>,
        enemies: &mut BTreeMap<String, Enemy>,
        env: &Environment,
        grid: &mut SpatialGrid,
        bus: &mut EventBus,
        effects: &mut Vec<Effect>,
    ) {
        self.time += dt;
        self.ring_last_assign += dt;
        self.arcs_roll_in -= dt;

        if self.arcs_roll_in <= 0.0 {
            self.roll_arcs(players);
            self.arcs_roll_in = ARC_ROLL_INTERVAL * self.rng.range_f32(0.85, 1.15);
        }
        if self.ring_last_assign >= RING_REASSIGN_INTERVAL {
            self.assign_ring(players, enemies);
            self.ring_last_assign = 0.0;
        }

        let ids: Vec<String> = enemies.keys().cloned().collect();
        for id in ids {
            let Some(mut enemy) = enemies.remove(&id) else {
                continue;
            };
            if enemy.alive {
                if enemy.kind.is_emplacement() {
                    self.step_emplacement(&mut enemy, dt, enemies, env, effects, bus);
                } else {
                    self.step_enemy(&mut enemy, dt, players, troops, env, grid, effects, bus);
                    grid.update(&enemy.id, BodyKind::Enemy, enemy.x, enemy.y);
                }
            }
            enemies.insert(id, enemy);
        }
    }

    /// Pick 2-3 arc centers relative to the first player's forward,
    /// preferring laterals and the rear.
    fn roll_arcs(&mut self, players: &BTreeMap<String, Player>) {
        let Some(player) = players.values().find(|p| p.is_alive()) else {
            return;
        };
        let forward = player.aim_angle;
        let count = self.rng.range_i32(2, 3);
        let mut arcs = Vec::with_capacity(count as usize);
        let candidates = [
            forward + PI,
            forward + 1.9,
            forward - 1.9,
            forward + 2.6,
            forward - 2.6,
        ];
        for _ in 0..count {
            let base = candidates[(self.rng.next_raw() as usize) % candidates.len()];
            let jitter = self.rng.range_f32(-0.3, 0.3);
            arcs.push(wrap_angle(base + jitter));
        }
        self.arcs = arcs;
    }

    /// Globally reassign ring slots around each player. Each candidate
    /// claims the free slot nearest to its current bearing; one enemy
    /// per slot per player per epoch.
    fn assign_ring(&mut self, players: &BTreeMap<String, Player>, enemies: &mut BTreeMap<String, Enemy>) {
        self.ring_epoch += 1;
        for enemy in enemies.values_mut() {
            enemy.ai.ring = None;
        }

        let slot_count = ((TAU * RING_RADIUS / 60.0).floor() as usize).clamp(4, 24);
        for player in players.values().filter(|p| p.is_alive()) {
            // Slot 0 sits opposite the player's forward direction, so
            // flanks and rear fill first.
            let anchor = wrap_angle(player.aim_angle + PI);
            let slot_angle =
                |i: usize| wrap_angle(anchor + i as f32 * TAU / slot_count as f32);

            let mut candidates: Vec<(String, f32, f32)> = enemies
                .values()
                .filter(|e| {
                    e.alive
                        && e.faction == Faction::Horde
                        && !e.kind.is_emplacement()
                        && e.ai.ring.is_none()
                })
                .filter_map(|e| {
                    let dx = e.x - player.x;
                    let dy = e.y - player.y;
                    let dist = (dx * dx + dy * dy).sqrt();
                    (dist <= RING_WINDOW).then(|| (e.id.clone(), dist, dy.atan2(dx)))
                })
                .collect();
            candidates.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });

            let mut taken = vec![false; slot_count];
            for (enemy_id, _, bearing) in candidates {
                let mut best: Option<(usize, f32)> = None;
                for (i, used) in taken.iter().enumerate() {
                    if *used {
                        continue;
                    }
                    let d = angle_diff(slot_angle(i), bearing).abs();
                    if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                        best = Some((i, d));
                    }
                }
                let Some((slot, _)) = best else {
                    break; // ring full
                };
                taken[slot] = true;
                if let Some(enemy) = enemies.get_mut(&enemy_id) {
                    enemy.ai.ring = Some(RingSlot {
                        player_id: player.id.clone(),
                        index: slot,
                        angle: slot_angle(slot),
                        radius: RING_RADIUS,
                        epoch: self.ring_epoch,
                    });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn step_enemy(
        &mut self,
        enemy: &mut Enemy,
        dt: f32,
        players: &BTreeMap<String, Player>,
        troops: &BTreeMap<String, Troop>,
        env: &Environment,
        grid: &SpatialGrid,
        effects: &mut Vec<Effect>,
        bus: &mut EventBus,
    ) {
        let Some(target) = nearest_player(enemy.x, enemy.y, players) else {
            return;
        };
        let dx = target.x - enemy.x;
        let dy = target.y - enemy.y;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist > ACTIVE_RADIUS {
            return;
        }

        self.tick_scratch_timers(enemy, dt, dist);

        // Ring slots expire when the enemy leaves the window.
        if let Some(ring) = &enemy.ai.ring {
            let holder_gone = players
                .get(&ring.player_id)
                .map(|p| {
                    let rdx = enemy.x - p.x;
                    let rdy = enemy.y - p.y;
                    (rdx * rdx + rdy * rdy).sqrt() > RING_WINDOW
                })
                .unwrap_or(true);
            if holder_gone {
                enemy.ai.ring = None;
            }
        }

        // Desired direction, by priority.
        let (mut dir_x, mut dir_y) = match enemy.ai.tactic {
            Tactic::Kite => self.kite_dir(enemy, target),
            Tactic::Strafe { dir } => self.strafe_dir(enemy, target, dir),
            Tactic::None => {
                if enemy.prefer_contact || self.rushing(enemy, dist) {
                    norm(dx, dy)
                } else {
                    self.composite_steer(enemy, target, players, dist)
                }
            }
        };

        // Feeler pre-steer.
        let pad = self.mode.clearance_pad();
        let (fx, fy) = self.feelers(enemy, env, dir_x, dir_y, pad);
        dir_x += fx;
        dir_y += fy;

        // Separation from neighbors.
        let (sx, sy, crowd) = separation(enemy, grid);
        let sep_weight = if enemy.ai.stuck_timer > STUCK_TRIGGER || crowd > 3 {
            0.7
        } else {
            0.4
        };
        dir_x += sx * sep_weight;
        dir_y += sy * sep_weight;

        // Avoid machine overrides steering entirely while active.
        let mut avoid_active = false;
        if let Some((ax, ay)) = self.avoid_dir(enemy, dt, env, dir_x, dir_y) {
            dir_x = ax;
            dir_y = ay;
            avoid_active = true;
        }

        // Turn-rate limit, then integrate. Avoid overrides snap the
        // heading; a rate-limited reverse would never reverse.
        let (nx, ny) = norm(dir_x, dir_y);
        if nx != 0.0 || ny != 0.0 {
            let desired = ny.atan2(nx);
            enemy.ai.heading = if avoid_active {
                desired
            } else {
                turn_toward(enemy.ai.heading, desired, TURN_RATE * dt)
            };
        }

        let mut speed = enemy.kind.base_speed() * enemy.speed_mul * self.mode.speed_mul();
        if enemy.mud_linger > 0.0 {
            speed *= 0.5;
            enemy.mud_linger = (enemy.mud_linger - dt).max(0.0);
        }
        // Prefer-contact rushes decelerate inside 30 units to keep
        // visible contact instead of orbit-jittering.
        let gap = dist - (enemy.radius + target.radius);
        if enemy.prefer_contact && gap < 30.0 {
            speed *= (gap / 30.0).clamp(0.15, 1.0);
        }
        // Bigboy dash burst.
        if enemy.kind == EnemyKind::Bigboy {
            enemy.dash_timer -= dt;
            if enemy.dash_timer <= 0.0 && enemy.dash_timer > -1.0 {
                speed *= 2.5;
            } else if enemy.dash_timer <= -1.0 {
                enemy.dash_timer = 6.0;
            }
        }

        let step_x = enemy.ai.heading.cos() * speed * dt;
        let step_y = enemy.ai.heading.sin() * speed * dt;
        let before_x = enemy.x;
        let before_y = enemy.y;
        let moved = env.move_circle(enemy.x, enemy.y, enemy.radius, step_x, step_y);
        enemy.x = moved.x;
        enemy.y = moved.y;

        // Stuck accounting feeds the avoid machine.
        let progress = ((enemy.x - before_x).powi(2) + (enemy.y - before_y).powi(2)).sqrt();
        let intended = (step_x * step_x + step_y * step_y).sqrt();
        if moved.collided && progress < intended * 0.35 {
            enemy.ai.stuck_timer += dt;
        } else {
            enemy.ai.stuck_timer = (enemy.ai.stuck_timer - dt * 2.0).max(0.0);
        }

        // Wallguy keeps its shield turned toward the target.
        if enemy.kind == EnemyKind::Wallguy {
            enemy.shield_angle = turn_toward(enemy.shield_angle, dy.atan2(dx), 2.0 * dt);
        }

        self.attack(enemy, dt, target, troops, env, effects, bus);
    }

    fn tick_scratch_timers(&mut self, enemy: &mut Enemy, dt: f32, dist: f32) {
        enemy.attack_cooldown = (enemy.attack_cooldown - dt).max(0.0);
        enemy.ai.next_style_roll -= dt;
        if enemy.ai.next_style_roll <= 0.0 {
            enemy.ai.style = self.pick_style(dist);
            enemy.ai.flank_radius = self.rng.range_f32(180.0, 280.0);
            enemy.ai.next_style_roll = self.rng.range_f32(4.0, 9.0);
        }
        // Projectile enemies toggle between kite and strafe tactics.
        if enemy.kind == EnemyKind::Projectile {
            enemy.ai.next_reeval -= dt;
            if enemy.ai.next_reeval <= 0.0 {
                enemy.ai.tactic = if dist < STANDOFF * 0.8 {
                    Tactic::Kite
                } else {
                    Tactic::Strafe {
                        dir: if self.rng.chance(0.5) { 1.0 } else { -1.0 },
                    }
                };
                enemy.ai.next_reeval = self.rng.range_f32(1.5, 3.0);
            }
        }
    }

    /// Distance-dependent flank style weights: far favors anything,
    /// near forces sides and rear to avoid head-on piling.
    fn pick_style(&mut self, dist: f32) -> FlankStyle {
        let weights = if dist > 600.0 {
            [0.2, 0.3, 0.3, 0.2]
        } else {
            [0.0, 0.35, 0.35, 0.3]
        };
        match self.rng.pick_weighted(&weights).unwrap_or(1) {
            0 => FlankStyle::Direct,
            1 => FlankStyle::FlankLeft,
            2 => FlankStyle::FlankRight,
            _ => FlankStyle::Rear,
        }
    }

    /// True when a non-contact enemy is close enough that direct
    /// approach beats maneuvering.
    fn rushing(&self, enemy: &Enemy, dist: f32) -> bool {
        enemy.ai.ring.is_none() && dist < enemy.radius + 60.0
    }

    /// Composite target rule: ring slot, else arc-biased flank target;
    /// blended Arrive + Orbit steering toward the predicted player
    /// position.
    fn composite_steer(
        &mut self,
        enemy: &Enemy,
        target: &Player,
        players: &BTreeMap<String, Player>,
        dist: f32,
    ) -> (f32, f32) {
        // Velocity lead, ramping up to 0.6s between 100 and 800 units.
        let lead = 0.6 * ((dist - 100.0) / 700.0).clamp(0.0, 1.0);
        let pred_x = target.x + target.vx * lead;
        let pred_y = target.y + target.vy * lead;

        let (tx, ty) = if let Some(ring) = &enemy.ai.ring {
            let holder = players.get(&ring.player_id).unwrap_or(target);
            (
                holder.x + ring.angle.cos() * ring.radius,
                holder.y + ring.angle.sin() * ring.radius,
            )
        } else {
            let mut approach = self.flank_angle(enemy, target);
            if dist > ARC_BIAS_NEAR {
                approach = bias_toward_arc(&self.arcs, approach, dist);
            }
            (
                target.x + approach.cos() * enemy.ai.flank_radius,
                target.y + approach.sin() * enemy.ai.flank_radius,
            )
        };

        // Arrive toward the target point.
        let (ax, ay) = norm(tx - enemy.x, ty - enemy.y);
        // Orbit tangentially around the predicted player position.
        let (px, py) = norm(enemy.x - pred_x, enemy.y - pred_y);
        let orbit_sign = match enemy.ai.style {
            FlankStyle::FlankRight => -1.0,
            _ => 1.0,
        };
        let (ox, oy) = (-py * orbit_sign, px * orbit_sign);

        (ax * 0.95 + ox * 0.8, ay * 0.95 + oy * 0.8)
    }

    /// Angular slot a flank style aims for, relative to the player's
    /// forward direction.
    fn flank_angle(&self, enemy: &Enemy, target: &Player) -> f32 {
        let forward = target.aim_angle;
        match enemy.ai.style {
            FlankStyle::Direct => (enemy.y - target.y).atan2(enemy.x - target.x),
            FlankStyle::FlankLeft => wrap_angle(forward + 2.0),
            FlankStyle::FlankRight => wrap_angle(forward - 2.0),
            FlankStyle::Rear => wrap_angle(forward + PI),
        }
    }

    fn kite_dir(&self, enemy: &Enemy, target: &Player) -> (f32, f32) {
        // Back away while keeping a strong tangential component.
        let (px, py) = norm(enemy.x - target.x, enemy.y - target.y);
        (px + -py * 0.8, py + px * 0.8)
    }

    fn strafe_dir(&self, enemy: &Enemy, target: &Player, dir: f32) -> (f32, f32) {
        let dx = enemy.x - target.x;
        let dy = enemy.y - target.y;
        let dist = (dx * dx + dy * dy).sqrt().max(0.1);
        let (px, py) = (dx / dist, dy / dist);
        // Hold the standoff radius while circling.
        let radial = (STANDOFF - dist) / STANDOFF;
        (px * radial + -py * dir, py * radial + px * dir)
    }

    /// Three-whisker obstacle anticipation. Returns a steering bias.
    fn feelers(
        &self,
        enemy: &Enemy,
        env: &Environment,
        dir_x: f32,
        dir_y: f32,
        pad: f32,
    ) -> (f32, f32) {
        let (nx, ny) = norm(dir_x, dir_y);
        if nx == 0.0 && ny == 0.0 {
            return (0.0, 0.0);
        }
        let aggressive = self.mode == DirectorMode::Panic;
        let len = if aggressive { 90.0 } else { 50.0 } + pad;
        let spread = if aggressive { 35f32 } else { 25f32 }.to_radians();
        let heading = ny.atan2(nx);

        let cast = |angle: f32, reach: f32| -> bool {
            env.line_hits_any(
                enemy.x,
                enemy.y,
                enemy.x + angle.cos() * reach,
                enemy.y + angle.sin() * reach,
            )
        };

        let fwd = cast(heading, len);
        let left = cast(heading + spread, len * 0.8);
        let right = cast(heading - spread, len * 0.8);

        if fwd {
            // Bias hard toward the clearer side.
            let side = match (left, right) {
                (false, true) => 1.0,
                (true, false) => -1.0,
                _ => {
                    if enemy.ai.avoid_side >= 0.0 {
                        1.0
                    } else {
                        -1.0
                    }
                }
            };
            let lateral = heading + side * (PI / 2.0);
            (lateral.cos() * 1.1, lateral.sin() * 1.1)
        } else if left != right {
            // Side graze: gentle nudge away from the grazing side.
            let side = if left { -1.0 } else { 1.0 };
            let lateral = heading + side * (PI / 2.0);
            (lateral.cos() * 0.35, lateral.sin() * 0.35)
        } else {
            (0.0, 0.0)
        }
    }

    /// Avoid state machine. Returns an overriding direction while a
    /// phase is active.
    fn avoid_dir(
        &mut self,
        enemy: &mut Enemy,
        dt: f32,
        env: &Environment,
        want_x: f32,
        want_y: f32,
    ) -> Option<(f32, f32)> {
        let heading = enemy.ai.heading;
        match enemy.ai.avoid {
            AvoidPhase::Idle => {
                if enemy.ai.stuck_timer > STUCK_TRIGGER {
                    // Probe both perpendiculars to pick the freer side.
                    let probe = |side: f32| {
                        let a = heading + side * (PI / 2.0);
                        !env.line_hits_any(
                            enemy.x,
                            enemy.y,
                            enemy.x + a.cos() * 60.0,
                            enemy.y + a.sin() * 60.0,
                        )
                    };
                    enemy.ai.avoid_side = match (probe(1.0), probe(-1.0)) {
                        (true, false) => 1.0,
                        (false, true) => -1.0,
                        _ => {
                            if self.rng.chance(0.5) {
                                1.0
                            } else {
                                -1.0
                            }
                        }
                    };
                    enemy.ai.avoid = AvoidPhase::Reverse;
                    enemy.ai.avoid_timer = self.rng.range_f32(0.15, 0.35);
                    enemy.ai.stuck_timer = 0.0;
                }
                None
            }
            AvoidPhase::Reverse => {
                enemy.ai.avoid_timer -= dt;
                if enemy.ai.avoid_timer <= 0.0 {
                    enemy.ai.avoid = AvoidPhase::Sidestep;
                    enemy.ai.avoid_timer = self.rng.range_f32(0.45, 1.05);
                }
                Some((-heading.cos(), -heading.sin()))
            }
            AvoidPhase::Sidestep => {
                enemy.ai.avoid_timer -= dt;
                if enemy.ai.avoid_timer <= 0.0 {
                    // Still jammed after a full reverse+sidestep cycle:
                    // run the longer probe escape.
                    if enemy.ai.stuck_timer > STUCK_TRIGGER {
                        enemy.ai.escape_angle = self.best_escape_angle(enemy, env, want_x, want_y);
                        enemy.ai.avoid = AvoidPhase::Escape;
                        enemy.ai.avoid_timer = self.rng.range_f32(0.5, 0.9);
                    } else {
                        enemy.ai.avoid = AvoidPhase::Idle;
                    }
                }
                let a = heading + enemy.ai.avoid_side * (PI / 2.0);
                Some((a.cos(), a.sin()))
            }
            AvoidPhase::Escape => {
                enemy.ai.avoid_timer -= dt;
                if enemy.ai.avoid_timer <= 0.0 {
                    enemy.ai.avoid = AvoidPhase::Idle;
                }
                Some((enemy.ai.escape_angle.cos(), enemy.ai.escape_angle.sin()))
            }
        }
    }

    /// Score k=12 probe angles; prefer no-contact rays, break ties by
    /// alignment with the wanted direction.
    fn best_escape_angle(&mut self, enemy: &Enemy, env: &Environment, want_x: f32, want_y: f32) -> f32 {
        let want = want_y.atan2(want_x);
        let mut best = (enemy.ai.heading + PI, f32::MIN);
        for k in 0..12 {
            let angle = wrap_angle(k as f32 * TAU / 12.0 + self.rng.range_f32(-0.1, 0.1));
            let clear = !env.line_hits_any(
                enemy.x,
                enemy.y,
                enemy.x + angle.cos() * 120.0,
                enemy.y + angle.sin() * 120.0,
            );
            let score = if clear { 2.0 } else { 0.0 } - angle_diff(angle, want).abs() * 0.3;
            if score > best.1 {
                best = (angle, score);
            }
        }
        best.0
    }

    /// Contact attacks, plus ranged shots for projectile enemies.
    #[allow(clippy::too_many_arguments)]
    fn attack(
        &mut self,
        enemy: &mut Enemy,
        _dt: f32,
        target: &Player,
        troops: &BTreeMap<String, Troop>,
        env: &Environment,
        effects: &mut Vec<Effect>,
        bus: &mut EventBus,
    ) {
        if enemy.attack_cooldown > 0.0 {
            return;
        }

        // Troops in reach take priority over the further player.
        let troop_target = troops
            .values()
            .filter(|t| t.is_alive())
            .map(|t| {
                let d = ((t.x - enemy.x).powi(2) + (t.y - enemy.y).powi(2)).sqrt();
                (t, d)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let player_dist =
            ((target.x - enemy.x).powi(2) + (target.y - enemy.y).powi(2)).sqrt();

        if enemy.kind == EnemyKind::Projectile {
            // Hitscan from standoff; walls block.
            let (tx, ty, tid, tdist, is_troop) = match &troop_target {
                Some((t, d)) if *d < player_dist => (t.x, t.y, t.id.clone(), *d, true),
                _ => (target.x, target.y, target.id.clone(), player_dist, false),
            };
            if tdist <= 500.0 && !env.line_hits_any(enemy.x, enemy.y, tx, ty) {
                let dmg = enemy.kind.contact_damage();
                if is_troop {
                    effects.push(Effect::DamageTroop { id: tid, amount: dmg });
                } else {
                    effects.push(Effect::DamagePlayer { id: tid, amount: dmg });
                }
                bus.emit(GameEvent::VfxEvent { kind: "enemyShot".into(), x: enemy.x, y: enemy.y });
                enemy.attack_cooldown = 1.5;
            }
            return;
        }

        let dmg = enemy.kind.contact_damage();
        if dmg <= 0.0 {
            return;
        }
        if let Some((troop, d)) = troop_target {
            if d <= enemy.radius + troop.radius + 6.0 {
                effects.push(Effect::DamageTroop { id: troop.id.clone(), amount: dmg });
                enemy.attack_cooldown = 0.8;
                return;
            }
        }
        if player_dist <= enemy.radius + target.radius + 6.0 {
            effects.push(Effect::DamagePlayer { id: target.id.clone(), amount: dmg });
            enemy.attack_cooldown = 0.8;
        }
    }

    /// Friendly turrets and artillery: stationary, fire at hostile
    /// enemies on their own cadence.
    fn step_emplacement(
        &mut self,
        emplacement: &mut Enemy,
        dt: f32,
        enemies: &BTreeMap<String, Enemy>,
        env: &Environment,
        effects: &mut Vec<Effect>,
        bus: &mut EventBus,
    ) {
        emplacement.attack_cooldown -= dt;
        if emplacement.attack_cooldown > 0.0 {
            return;
        }
        match emplacement.kind {
            EnemyKind::Turret => {
                let target = enemies
                    .values()
                    .filter(|e| e.alive && e.faction == Faction::Horde)
                    .filter_map(|e| {
                        let d = ((e.x - emplacement.x).powi(2) + (e.y - emplacement.y).powi(2))
                            .sqrt();
                        (d <= 700.0).then_some((e, d))
                    })
                    .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                if let Some((target, _)) = target {
                    if !env.line_hits_any(emplacement.x, emplacement.y, target.x, target.y) {
                        effects.push(Effect::DamageEnemy { id: target.id.clone(), amount: 10.0 });
                        bus.emit(GameEvent::VfxEvent {
                            kind: "turretShot".into(),
                            x: emplacement.x,
                            y: emplacement.y,
                        });
                        emplacement.attack_cooldown = 0.5;
                    }
                }
            }
            EnemyKind::Artillery => {
                let target = enemies
                    .values()
                    .filter(|e| e.alive && e.faction == Faction::Horde)
                    .filter_map(|e| {
                        let d = ((e.x - emplacement.x).powi(2) + (e.y - emplacement.y).powi(2))
                            .sqrt();
                        (d <= 2500.0).then_some((e.x, e.y, d))
                    })
                    .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
                if let Some((x, y, _)) = target {
                    for e in enemies.values().filter(|e| e.alive && e.faction == Faction::Horde) {
                        let d = ((e.x - x).powi(2) + (e.y - y).powi(2)).sqrt();
                        if d <= 120.0 {
                            effects.push(Effect::DamageEnemy { id: e.id.clone(), amount: 30.0 });
                        }
                    }
                    bus.emit(GameEvent::VfxEvent { kind: "artilleryStrike".into(), x, y });
                    emplacement.attack_cooldown = 8.0;
                }
            }
            _ => {}
        }
    }
}

/// Ramp an approach angle linearly onto its nearest arc center: no
/// bias at `ARC_BIAS_NEAR`, landing exactly on the center by
/// `ARC_BIAS_FAR`. Approaches already inside the arc sector are left
/// alone.
fn bias_toward_arc(arcs: &[f32], base: f32, dist: f32) -> f32 {
    let Some(arc) = arcs.iter().copied().min_by(|a, b| {
        angle_diff(*a, base)
            .abs()
            .partial_cmp(&angle_diff(*b, base).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    }) else {
        return base;
    };
    let offset = angle_diff(arc, base);
    if offset.abs() <= ARC_HALF_WIDTH {
        return base;
    }
    let t = ((dist - ARC_BIAS_NEAR) / (ARC_BIAS_FAR - ARC_BIAS_NEAR)).clamp(0.0, 1.0);
    wrap_angle(base + offset * t)
}

fn nearest_player<'a>(x: f32, y: f32, players: &'a BTreeMap<String, Player>) -> Option<&'a Player> {
    players
        .values()
        .filter(|p| p.is_alive())
        .min_by(|a, b| {
            let da = (a.x - x).powi(2) + (a.y - y).powi(2);
            let db = (b.x - x).powi(2) + (b.y - y).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Pairwise repulsion keeping `rA + rB + pad` spacing. Returns the
/// blended repulsion vector (overlap-capped) and the neighbor count.
fn separation(enemy: &Enemy, grid: &SpatialGrid) -> (f32, f32, usize) {
    let mut sep_x = 0.0;
    let mut sep_y = 0.0;
    let mut overlap_total = 0.0f32;
    let neighbors = grid.query_circle_kind(enemy.x, enemy.y, SEPARATION_RADIUS, BodyKind::Enemy);
    let mut count = 0;
    for other in &neighbors {
        if other.id == enemy.id {
            continue;
        }
        count += 1;
        let dx = enemy.x - other.x;
        let dy = enemy.y - other.y;
        let dist = (dx * dx + dy * dy).sqrt().max(0.1);
        // Neighbor radius is unknown from the grid entry; assume a
        // peer-sized body, which is what the padding absorbs.
        let desired = enemy.radius * 2.0 + SEPARATION_PAD;
        if dist < desired {
            let overlap = (desired - dist) / desired;
            overlap_total += overlap;
            sep_x += (dx / dist) * overlap;
            sep_y += (dy / dist) * overlap;
        }
    }
    let scale = overlap_total.min(1.2);
    let (nx, ny) = norm(sep_x, sep_y);
    (nx * scale, ny * scale, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::IdGen;

    fn world_with_player() -> (BTreeMap<String, Player>, BTreeMap<String, Troop>, Environment, SpatialGrid)
    {
        let mut players = BTreeMap::new();
        let mut p = Player::new("p1", "hunter");
        p.x = 0.0;
        p.y = 0.0;
        players.insert(p.id.clone(), p);
        (
            players,
            BTreeMap::new(),
            Environment::with_boundary(4000.0),
            SpatialGrid::default(),
        )
    }

    fn spawn_enemy(
        ids: &mut IdGen,
        enemies: &mut BTreeMap<String, Enemy>,
        grid: &mut SpatialGrid,
        kind: EnemyKind,
        x: f32,
        y: f32,
    ) -> String {
        let id = ids.next("enemy");
        let enemy = Enemy::new(id.clone(), kind, x, y);
        grid.insert(&id, BodyKind::Enemy, x, y);
        enemies.insert(id.clone(), enemy);
        id
    }

    #[test]
    fn test_mode_multipliers() {
        assert_eq!(DirectorMode::Hunt.speed_mul(), 1.0);
        assert_eq!(DirectorMode::Panic.speed_mul(), 1.35);
        assert_eq!(DirectorMode::Ambush.clearance_pad(), 16.0);
    }

    #[test]
    fn test_enemy_closes_on_player() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        let id = spawn_enemy(&mut ids, &mut enemies, &mut grid, EnemyKind::Basic, 800.0, 0.0);

        let mut director = Director::new(42);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        let start_dist = 800.0;
        for _ in 0..180 {
            director.tick(
                1.0 / 60.0,
                &players,
                &troops,
                &mut enemies,
                &env,
                &mut grid,
                &mut bus,
                &mut effects,
            );
        }
        let e = &enemies[&id];
        let dist = (e.x * e.x + e.y * e.y).sqrt();
        assert!(dist < start_dist - 100.0, "enemy should close distance, at {dist}");
    }

    #[test]
    fn test_far_enemy_is_not_stepped() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        let id = spawn_enemy(&mut ids, &mut enemies, &mut grid, EnemyKind::Basic, 3000.0, 0.0);

        let mut director = Director::new(42);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        for _ in 0..30 {
            director.tick(
                1.0 / 60.0,
                &players,
                &troops,
                &mut enemies,
                &env,
                &mut grid,
                &mut bus,
                &mut effects,
            );
        }
        assert_eq!(enemies[&id].x, 3000.0);
    }

    #[test]
    fn test_ring_slots_are_unique() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        for i in 0..12 {
            let angle = i as f32 * TAU / 12.0;
            spawn_enemy(
                &mut ids,
                &mut enemies,
                &mut grid,
                EnemyKind::Basic,
                angle.cos() * 400.0,
                angle.sin() * 400.0,
            );
        }

        let mut director = Director::new(7);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        director.tick(
            1.0 / 60.0,
            &players,
            &troops,
            &mut enemies,
            &env,
            &mut grid,
            &mut bus,
            &mut effects,
        );

        let mut seen = std::collections::HashSet::new();
        let mut assigned = 0;
        for e in enemies.values() {
            if let Some(ring) = &e.ai.ring {
                assert!(seen.insert((ring.player_id.clone(), ring.index)), "duplicate slot");
                assigned += 1;
            }
        }
        assert!(assigned >= 8, "most in-window enemies should hold slots");
    }

    #[test]
    fn test_ring_expires_outside_window() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        let id = spawn_enemy(&mut ids, &mut enemies, &mut grid, EnemyKind::Basic, 300.0, 0.0);

        let mut director = Director::new(7);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        director.tick(
            1.0 / 60.0,
            &players,
            &troops,
            &mut enemies,
            &env,
            &mut grid,
            &mut bus,
            &mut effects,
        );
        assert!(enemies[&id].ai.ring.is_some());

        // Teleport the enemy far outside the window; next step drops
        // the slot.
        {
            let e = enemies.get_mut(&id).unwrap();
            e.x = 1300.0;
            grid.update(&id, BodyKind::Enemy, e.x, e.y);
        }
        director.tick(
            1.0 / 60.0,
            &players,
            &troops,
            &mut enemies,
            &env,
            &mut grid,
            &mut bus,
            &mut effects,
        );
        // Either reassignment or the window check cleared it.
        assert!(enemies[&id].ai.ring.is_none());
    }

    #[test]
    fn test_contact_attack_emits_damage_effect() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        spawn_enemy(&mut ids, &mut enemies, &mut grid, EnemyKind::Basic, 25.0, 0.0);

        let mut director = Director::new(7);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        director.tick(
            1.0 / 60.0,
            &players,
            &troops,
            &mut enemies,
            &env,
            &mut grid,
            &mut bus,
            &mut effects,
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::DamagePlayer { id, .. } if id == "p1")));
    }

    #[test]
    fn test_projectile_enemy_keeps_standoff_and_shoots() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        let id = spawn_enemy(&mut ids, &mut enemies, &mut grid, EnemyKind::Projectile, 100.0, 0.0);

        let mut director = Director::new(7);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        for _ in 0..240 {
            director.tick(
                1.0 / 60.0,
                &players,
                &troops,
                &mut enemies,
                &env,
                &mut grid,
                &mut bus,
                &mut effects,
            );
        }
        let e = &enemies[&id];
        let dist = (e.x * e.x + e.y * e.y).sqrt();
        assert!(dist > 150.0, "projectile enemy should back off, at {dist}");
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::DamagePlayer { .. })));
    }

    #[test]
    fn test_turret_fires_at_horde() {
        let (players, troops, env, mut grid) = world_with_player();
        let mut enemies = BTreeMap::new();
        let mut ids = IdGen::new();
        let turret_id = ids.next("enemy");
        enemies.insert(
            turret_id.clone(),
            Enemy::new(turret_id.clone(), EnemyKind::Turret, 0.0, 200.0),
        );
        let hostile = spawn_enemy(&mut ids, &mut enemies, &mut grid, EnemyKind::Basic, 100.0, 200.0);

        let mut director = Director::new(7);
        let mut bus = EventBus::new();
        let mut effects = Vec::new();
        director.tick(
            1.0 / 60.0,
            &players,
            &troops,
            &mut enemies,
            &env,
            &mut grid,
            &mut bus,
            &mut effects,
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::DamageEnemy { id, .. } if *id == hostile)));
    }

    #[test]
    fn test_separation_pushes_apart() {
        let mut grid = SpatialGrid::default();
        grid.insert("enemy_1", BodyKind::Enemy, 0.0, 0.0);
        grid.insert("enemy_2", BodyKind::Enemy, 10.0, 0.0);
        let e = Enemy::new("enemy_1", EnemyKind::Basic, 0.0, 0.0);
        let (sx, _sy, count) = separation(&e, &grid);
        assert_eq!(count, 1);
        assert!(sx < 0.0, "pushed away from the neighbor on +x");
    }

    #[test]
    fn test_turn_rate_limit() {
        let turned = turn_toward(0.0, PI, 0.5);
        assert!((turned - 0.5).abs() < 1e-5);
        let turned = turn_toward(0.0, 0.2, 0.5);
        assert!((turned - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_arc_bias_ramps_onto_center() {
        let arcs = [1.0f32];
        // At the near edge there is no bias yet.
        assert!(bias_toward_arc(&arcs, 0.0, ARC_BIAS_NEAR).abs() < 1e-5);
        // Halfway out, half the offset.
        let mid = (ARC_BIAS_NEAR + ARC_BIAS_FAR) / 2.0;
        assert!((bias_toward_arc(&arcs, 0.0, mid) - 0.5).abs() < 1e-5);
        // Fully ramped: exactly the arc center, no overshoot.
        assert!((bias_toward_arc(&arcs, 0.0, ARC_BIAS_FAR) - 1.0).abs() < 1e-5);
        assert!((bias_toward_arc(&arcs, 0.0, ARC_BIAS_FAR + 800.0) - 1.0).abs() < 1e-5);
        // Already inside the arc sector: untouched.
        assert!((bias_toward_arc(&arcs, 0.8, ARC_BIAS_FAR) - 0.8).abs() < 1e-5);
        // No arcs rolled yet: untouched.
        assert!((bias_toward_arc(&[], 0.3, ARC_BIAS_FAR) - 0.3).abs() < 1e-5);
    }
}
