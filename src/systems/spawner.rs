//! Zone membership tracking and horde spawning.
//!
//! Zones are axis-aligned bands gating horde cadence and difficulty.
//! Entry triggers fire once per re-entry with a cooldown that
//! suppresses boundary oscillation. While the artifact is carried,
//! zones switch from their forward config to the faster, harder return
//! config. On top of the zone hordes sits the phase machine cadence:
//! search and guard trickles, then the extraction wave schedule with
//! its fixed start bursts.

use crate::config::{
    BurstConfig, DifficultyPreset, EnemySpawnConfig, HordePhaseConfig, ZoneSpawningConfig,
    SPAWN_SAFE_MIN_X,
};
use crate::commands::ExtractionKind;
use crate::entities::{Enemy, EnemyKind, Faction, IdGen, Player};
use crate::environment::Environment;
use crate::error::SimFault;
use crate::events::{EventBus, GameEvent};
use crate::rng::GameRng;
use crate::spatial::{BodyKind, SpatialGrid};
use std::collections::BTreeMap;
use tracing::debug;

/// Players closer than this to a candidate spawn point reject it.
const MIN_PLAYER_CLEARANCE: f32 = 700.0;
/// Placement attempt budget per enemy.
const PLACE_TRIES: u32 = 20;

/// Horde cadence phase, driven by the room's timer machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HordePhase {
    #[default]
    Search,
    Guard,
    Wave(usize),
}

/// A player crossed into a zone (entry trigger, post-cooldown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneEntry {
    pub player_id: String,
    pub zone: String,
}

#[derive(Debug, Clone, Default)]
struct Membership {
    inside: bool,
    /// Re-entry suppressed until this time.
    cooldown_until: f32,
}

pub struct ZoneSpawner {
    cfg: ZoneSpawningConfig,
    horde_cfg: HordePhaseConfig,
    pub phase: HordePhase,
    membership: BTreeMap<(String, String), Membership>,
    /// Per-zone countdown to the next repeat horde while occupied.
    zone_timers: BTreeMap<String, f32>,
    phase_timer: f32,
    /// Scheduled extraction bursts: (fire_at, config).
    bursts: Vec<(f32, BurstConfig)>,
    check_accum: f32,
    time: f32,
    rng: GameRng,
}

impl ZoneSpawner {
    pub fn new(world_seed: u32, cfg: ZoneSpawningConfig, horde_cfg: HordePhaseConfig) -> Self {
        let mut rng = GameRng::stream(world_seed, "spawner");
        let phase_timer = rng.range_f32(horde_cfg.search_interval.0, horde_cfg.search_interval.1);
        Self {
            cfg,
            horde_cfg,
            phase: HordePhase::Search,
            membership: BTreeMap::new(),
            zone_timers: BTreeMap::new(),
            phase_timer,
            bursts: Vec::new(),
            check_accum: 0.0,
            time: 0.0,
            rng,
        }
    }

    pub fn reset_level(&mut self) {
        self.membership.clear();
        self.zone_timers.clear();
        self.bursts.clear();
        self.phase = HordePhase::Search;
        self.check_accum = 0.0;
        self.phase_timer = self
            .rng
            .range_f32(self.horde_cfg.search_interval.0, self.horde_cfg.search_interval.1);
    }

    pub fn set_phase(&mut self, phase: HordePhase) {
        if self.phase == phase {
            return;
        }
        self.phase = phase;
        let interval = match phase {
            HordePhase::Search => self.horde_cfg.search_interval,
            HordePhase::Guard => self.horde_cfg.guard_interval,
            HordePhase::Wave(i) => {
                let wave = self.wave(i);
                wave.interval
            }
        };
        self.phase_timer = self.rng.range_f32(interval.0, interval.1);
    }

    fn wave(&self, i: usize) -> crate::config::WaveConfig {
        let waves = &self.horde_cfg.waves;
        waves
            .get(i.min(waves.len().saturating_sub(1)))
            .copied()
            .unwrap_or(crate::config::WaveConfig {
                diff: 4,
                interval: (15.0, 25.0),
                target_count: 20,
            })
    }

    /// Queue the fixed extraction-start bursts. The normal-only flag
    /// gates them off for heretic extraction.
    pub fn schedule_extraction_bursts(&mut self, kind: ExtractionKind) {
        if self.horde_cfg.bursts_normal_only && kind == ExtractionKind::Heretic {
            return;
        }
        let now = self.time;
        for burst in &self.horde_cfg.extraction_bursts {
            self.bursts
                .push((now + burst.delay_ms as f32 / 1000.0, *burst));
        }
    }

    /// Pending scheduled work is dropped on room shutdown.
    pub fn drop_scheduled(&mut self) {
        self.bursts.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        dt: f32,
        players: &BTreeMap<String, Player>,
        enemies: &mut BTreeMap<String, Enemy>,
        env: &Environment,
        grid: &mut SpatialGrid,
        ids: &mut IdGen,
        bus: &mut EventBus,
        artifact_carried: bool,
        spawn_cfg: &EnemySpawnConfig,
    ) -> Vec<ZoneEntry> {
        self.time += dt;
        self.check_accum += dt;

        let mut entries = Vec::new();
        if self.check_accum >= self.cfg.check_interval {
            self.check_accum = 0.0;
            entries = self.check_membership(players);
            for entry in &entries {
                // A fresh entry arms (or re-arms) the zone's horde.
                let interval = self.zone_interval(&entry.zone, artifact_carried);
                self.zone_timers.insert(entry.zone.clone(), interval);
            }
        }

        // Per-zone repeat hordes while occupied.
        let occupied: Vec<String> = self
            .cfg
            .zones
            .iter()
            .filter(|z| players.values().any(|p| p.is_alive() && z.contains(p.x, p.y)))
            .map(|z| z.name.clone())
            .collect();
        let timer_zones: Vec<String> = self.zone_timers.keys().cloned().collect();
        for zone_name in timer_zones {
            if !occupied.contains(&zone_name) {
                continue;
            }
            let expired = {
                let t = self.zone_timers.get_mut(&zone_name).unwrap();
                *t -= dt;
                *t <= 0.0
            };
            if expired {
                let diff = self.zone_diff(&zone_name, artifact_carried);
                self.spawn_horde(
                    diff,
                    Some(&zone_name),
                    artifact_carried,
                    players,
                    enemies,
                    env,
                    grid,
                    ids,
                    bus,
                    spawn_cfg,
                );
                let interval = self.zone_interval(&zone_name, artifact_carried);
                self.zone_timers.insert(zone_name, interval);
            }
        }

        // Phase cadence hordes.
        self.phase_timer -= dt;
        if self.phase_timer <= 0.0 {
            let (diff, interval, gated) = match self.phase {
                HordePhase::Search => (self.horde_cfg.search_diff, self.horde_cfg.search_interval, false),
                HordePhase::Guard => (self.horde_cfg.guard_diff, self.horde_cfg.guard_interval, false),
                HordePhase::Wave(i) => {
                    let wave = self.wave(i);
                    let live = enemies
                        .values()
                        .filter(|e| e.alive && e.faction == Faction::Horde)
                        .count() as u32;
                    (wave.diff, wave.interval, live >= wave.target_count)
                }
            };
            if !gated {
                self.spawn_horde(
                    diff,
                    None,
                    artifact_carried,
                    players,
                    enemies,
                    env,
                    grid,
                    ids,
                    bus,
                    spawn_cfg,
                );
            }
            self.phase_timer = self.rng.range_f32(interval.0, interval.1);
        }

        // Fire due extraction bursts.
        let due: Vec<BurstConfig> = {
            let now = self.time;
            let fired: Vec<_> = self
                .bursts
                .iter()
                .filter(|(at, _)| *at <= now)
                .map(|(_, b)| *b)
                .collect();
            self.bursts.retain(|(at, _)| *at > now);
            fired
        };
        for burst in due {
            for _ in 0..burst.count {
                self.spawn_horde(
                    burst.diff,
                    None,
                    artifact_carried,
                    players,
                    enemies,
                    env,
                    grid,
                    ids,
                    bus,
                    spawn_cfg,
                );
            }
        }

        entries
    }

    /// ~1 Hz membership sweep. Fires each (player, zone) entry once per
    /// re-entry, suppressed for the cooldown after the last exit.
    fn check_membership(&mut self, players: &BTreeMap<String, Player>) -> Vec<ZoneEntry> {
        let mut entries = Vec::new();
        for player in players.values().filter(|p| p.is_alive()) {
            for zone in &self.cfg.zones {
                let key = (player.id.clone(), zone.name.clone());
                let inside = zone.contains(player.x, player.y);
                let m = self.membership.entry(key).or_default();
                if inside && !m.inside {
                    if self.time >= m.cooldown_until {
                        entries.push(ZoneEntry {
                            player_id: player.id.clone(),
                            zone: zone.name.clone(),
                        });
                    }
                    m.inside = true;
                } else if !inside && m.inside {
                    m.inside = false;
                    m.cooldown_until = self.time + self.cfg.reentry_cooldown;
                }
            }
        }
        entries
    }

    fn zone_diff(&self, zone_name: &str, artifact_carried: bool) -> u8 {
        self.cfg
            .zones
            .iter()
            .find(|z| z.name == zone_name)
            .map(|z| {
                if artifact_carried {
                    z.horde.return_diff
                } else {
                    z.horde.forward_diff
                }
            })
            .unwrap_or(1)
    }

    fn zone_interval(&mut self, zone_name: &str, artifact_carried: bool) -> f32 {
        let interval = self
            .cfg
            .zones
            .iter()
            .find(|z| z.name == zone_name)
            .map(|z| {
                if artifact_carried {
                    z.horde.return_interval
                } else {
                    z.horde.forward_interval
                }
            })
            .unwrap_or((40.0, 70.0));
        self.rng.range_f32(interval.0, interval.1)
    }

    fn preset(&self, tier: u8) -> DifficultyPreset {
        self.cfg
            .difficulty_presets
            .iter()
            .find(|p| p.tier == tier)
            .or_else(|| self.cfg.difficulty_presets.first())
            .cloned()
            .unwrap_or(DifficultyPreset {
                tier: 1,
                size: 8,
                type_ratios: vec![(EnemyKind::Basic, 1.0)],
            })
    }

    /// Spawn one horde. Target: a player inside the zone if this is a
    /// zone horde, else any alive player. The anchor sits off-screen
    /// along the spawn direction (west when returning, east otherwise)
    /// and never inside the friendly safe zone.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_horde(
        &mut self,
        diff: u8,
        zone_name: Option<&str>,
        returning: bool,
        players: &BTreeMap<String, Player>,
        enemies: &mut BTreeMap<String, Enemy>,
        env: &Environment,
        grid: &mut SpatialGrid,
        ids: &mut IdGen,
        bus: &mut EventBus,
        spawn_cfg: &EnemySpawnConfig,
    ) -> u32 {
        let zone = zone_name.and_then(|n| self.cfg.zones.iter().find(|z| z.name == n));
        let target = zone
            .and_then(|z| {
                players
                    .values()
                    .find(|p| p.is_alive() && z.contains(p.x, p.y))
            })
            .or_else(|| players.values().find(|p| p.is_alive()));
        let Some(target) = target else {
            return 0;
        };

        let dir = if returning { -1.0 } else { 1.0 };
        let anchor_x = (target.x + dir * self.cfg.pre_spawn_distance).max(SPAWN_SAFE_MIN_X);
        let anchor_y = target.y;

        let preset = self.preset(diff);
        let weights: Vec<f32> = preset.type_ratios.iter().map(|(_, w)| *w).collect();
        let mut spawned = 0u32;

        for _ in 0..preset.size {
            let Some(kind_idx) = self.rng.pick_weighted(&weights) else {
                break;
            };
            let kind = preset.type_ratios[kind_idx].0;
            let radius = kind.radius();

            let mut placed = None;
            for attempt in 0..PLACE_TRIES {
                let reach = 150.0 + attempt as f32 * 30.0;
                let angle = self.rng.range_f32(-std::f32::consts::PI, std::f32::consts::PI);
                let dist = self.rng.range_f32(0.0, reach);
                let x = (anchor_x + angle.cos() * dist).max(SPAWN_SAFE_MIN_X);
                let y = anchor_y + angle.sin() * dist;

                if !env.is_inside_bounds(x, y, radius) {
                    continue;
                }
                if env.circle_hits_any(x, y, radius) {
                    continue;
                }
                let near_player = players.values().any(|p| {
                    p.is_alive()
                        && ((p.x - x).powi(2) + (p.y - y).powi(2)).sqrt() < MIN_PLAYER_CLEARANCE
                });
                if near_player {
                    continue;
                }
                placed = Some((x, y));
                break;
            }

            let Some((x, y)) = placed else {
                let fault = SimFault::SpawnExhausted { what: "horde enemy", attempts: PLACE_TRIES };
                debug!(diff, %fault, "spawn skipped");
                continue;
            };
            let id = ids.next("enemy");
            let mut enemy = Enemy::new(id.clone(), kind, x, y);
            enemy.health *= spawn_cfg.health_mul;
            enemy.health_max *= spawn_cfg.health_mul;
            enemy.speed_mul *= spawn_cfg.speed_mul;
            grid.insert(&id, BodyKind::Enemy, x, y);
            enemies.insert(id, enemy);
            spawned += 1;
        }

        if spawned > 0 {
            bus.emit(GameEvent::HordeSpawned {
                zone: zone_name.map(|s| s.to_string()),
                count: spawned,
                diff,
            });
        }
        spawned
    }

    /// Ambient baseline population scattered over the battlefield at
    /// level start.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_ambient(
        &mut self,
        count: u32,
        players: &BTreeMap<String, Player>,
        enemies: &mut BTreeMap<String, Enemy>,
        env: &Environment,
        grid: &mut SpatialGrid,
        ids: &mut IdGen,
        spawn_cfg: &EnemySpawnConfig,
    ) -> u32 {
        let weights: Vec<f32> = spawn_cfg.type_ratios.iter().map(|(_, w)| *w).collect();
        let mut spawned = 0;
        for _ in 0..count {
            let Some(kind_idx) = self.rng.pick_weighted(&weights) else {
                break;
            };
            let kind = spawn_cfg.type_ratios[kind_idx].0;
            let radius = kind.radius();
            let mut placed = None;
            for _ in 0..PLACE_TRIES {
                let x = self.rng.range_f32(SPAWN_SAFE_MIN_X, 9500.0);
                let y = self.rng.range_f32(-9000.0, 9000.0);
                if !env.is_inside_bounds(x, y, radius) || env.circle_hits_any(x, y, radius) {
                    continue;
                }
                if let Some((sx, sy, sr)) = env.spawn_safe {
                    if ((x - sx).powi(2) + (y - sy).powi(2)).sqrt() < sr {
                        continue;
                    }
                }
                let near_player = players.values().any(|p| {
                    ((p.x - x).powi(2) + (p.y - y).powi(2)).sqrt() < MIN_PLAYER_CLEARANCE
                });
                if near_player {
                    continue;
                }
                placed = Some((x, y));
                break;
            }
            if let Some((x, y)) = placed {
                let id = ids.next("enemy");
                let mut enemy = Enemy::new(id.clone(), kind, x, y);
                enemy.health *= spawn_cfg.health_mul;
                enemy.health_max *= spawn_cfg.health_mul;
                enemy.speed_mul *= spawn_cfg.speed_mul;
                grid.insert(&id, BodyKind::Enemy, x, y);
                enemies.insert(id, enemy);
                spawned += 1;
            } else {
                let fault = SimFault::SpawnExhausted { what: "ambient enemy", attempts: PLACE_TRIES };
                debug!(%fault, "spawn skipped");
            }
        }
        spawned
    }
}
