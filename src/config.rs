//! Game configuration surface.
//!
//! Configs are pure data: no callbacks, no closures. Zone entry
//! behavior, horde scheduling and hazard placement all live in the
//! components that consume these records. Everything derives serde so
//! deployments can override the built-in modes from JSON.

use crate::entities::EnemyKind;
use crate::environment::Aabb;
use serde::{Deserialize, Serialize};

/// Horde spawns are clamped so they never enter the friendly safe zone.
pub const SPAWN_SAFE_MIN_X: f32 = -9800.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelType {
    Test,
    Extraction,
    Payload,
    Trenchraid,
}

// ============================================================================
// ENEMIES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnemySpawnConfig {
    /// Ambient baseline population fired at level start.
    pub total_count: u32,
    pub type_ratios: Vec<(EnemyKind, f32)>,
    /// Global multipliers applied to per-kind base stats.
    pub health_mul: f32,
    pub speed_mul: f32,
    /// Per-kind currency drop table: (kind, chance, ducats min/max,
    /// blood markers min/max).
    pub drop_rates: Vec<EnemyDropRate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnemyDropRate {
    pub kind: EnemyKind,
    pub chance: f32,
    pub ducats: (i32, i32),
    pub blood_markers: (i32, i32),
}

fn standard_drop_rates() -> Vec<EnemyDropRate> {
    use EnemyKind::*;
    vec![
        EnemyDropRate { kind: Basic, chance: 0.25, ducats: (1, 4), blood_markers: (0, 1) },
        EnemyDropRate { kind: Projectile, chance: 0.3, ducats: (2, 5), blood_markers: (0, 1) },
        EnemyDropRate { kind: Licker, chance: 0.35, ducats: (2, 6), blood_markers: (0, 2) },
        EnemyDropRate { kind: Boomer, chance: 0.4, ducats: (3, 8), blood_markers: (1, 2) },
        EnemyDropRate { kind: Bigboy, chance: 1.0, ducats: (15, 30), blood_markers: (3, 6) },
        EnemyDropRate { kind: Wallguy, chance: 0.5, ducats: (4, 10), blood_markers: (1, 3) },
    ]
}

// ============================================================================
// ZONES & HORDES
// ============================================================================

/// Difficulty preset: horde size plus the enemy type mix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyPreset {
    pub tier: u8,
    pub size: u32,
    pub type_ratios: Vec<(EnemyKind, f32)>,
}

/// The seven standard presets. Higher tiers add lickers and bigboys
/// and enrich the wallguy/projectile mix.
pub fn standard_difficulty_presets() -> Vec<DifficultyPreset> {
    use EnemyKind::*;
    vec![
        DifficultyPreset { tier: 1, size: 8, type_ratios: vec![(Basic, 0.85), (Projectile, 0.15)] },
        DifficultyPreset { tier: 2, size: 12, type_ratios: vec![(Basic, 0.7), (Projectile, 0.2), (Boomer, 0.1)] },
        DifficultyPreset { tier: 3, size: 13, type_ratios: vec![(Basic, 0.6), (Projectile, 0.25), (Boomer, 0.15)] },
        DifficultyPreset { tier: 4, size: 14, type_ratios: vec![(Basic, 0.5), (Projectile, 0.25), (Boomer, 0.15), (Wallguy, 0.1)] },
        DifficultyPreset { tier: 5, size: 14, type_ratios: vec![(Basic, 0.4), (Projectile, 0.25), (Boomer, 0.15), (Wallguy, 0.1), (Licker, 0.1)] },
        DifficultyPreset { tier: 6, size: 15, type_ratios: vec![(Basic, 0.3), (Projectile, 0.25), (Boomer, 0.15), (Wallguy, 0.1), (Licker, 0.15), (Bigboy, 0.05)] },
        DifficultyPreset { tier: 7, size: 18, type_ratios: vec![(Basic, 0.2), (Projectile, 0.3), (Boomer, 0.15), (Wallguy, 0.15), (Licker, 0.15), (Bigboy, 0.05)] },
    ]
}

/// Per-zone horde cadence. "Return" mode is active while any gold
/// chest's artifact is being carried; its intervals are much shorter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneHordeConfig {
    pub forward_diff: u8,
    pub return_diff: u8,
    pub forward_interval: (f32, f32),
    pub return_interval: (f32, f32),
}

/// Axis-aligned zone; min edges inclusive, max exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub horde: ZoneHordeConfig,
}

impl ZoneConfig {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }
}

/// Standard battlefield bands A..G from the friendly line to the
/// heretic line, difficulty ramping eastward.
pub fn standard_zones() -> Vec<ZoneConfig> {
    let names = ["A", "B", "C", "D", "E", "F", "G"];
    let band = 2800.0;
    let west = -9800.0;
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let min_x = west + i as f32 * band;
            let tier_fwd = (1 + i / 2).min(4) as u8;
            let tier_ret = (4 + i / 2).min(7) as u8;
            ZoneConfig {
                name: (*name).to_string(),
                min_x,
                max_x: min_x + band,
                min_y: -11500.0,
                max_y: 11500.0,
                horde: ZoneHordeConfig {
                    forward_diff: tier_fwd,
                    return_diff: tier_ret,
                    forward_interval: (40.0, 70.0),
                    return_interval: (12.0, 25.0),
                },
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpawningConfig {
    pub zones: Vec<ZoneConfig>,
    pub difficulty_presets: Vec<DifficultyPreset>,
    /// Off-screen anchor distance for horde spawn points.
    pub pre_spawn_distance: f32,
    /// Seconds between zone membership checks.
    pub check_interval: f32,
    /// Seconds a zone's entry trigger stays suppressed after exit.
    pub reentry_cooldown: f32,
}

impl Default for ZoneSpawningConfig {
    fn default() -> Self {
        Self {
            zones: standard_zones(),
            difficulty_presets: standard_difficulty_presets(),
            pre_spawn_distance: 900.0,
            check_interval: 1.0,
            reentry_cooldown: 8.0,
        }
    }
}

/// One extraction wave: its own cadence and on-screen target count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaveConfig {
    pub diff: u8,
    pub interval: (f32, f32),
    pub target_count: u32,
}

/// Fixed horde fired when the extraction timer starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BurstConfig {
    pub diff: u8,
    pub count: u32,
    /// Delay after extraction start, milliseconds.
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HordePhaseConfig {
    /// Cadence while searching for the artifact.
    pub search_interval: (f32, f32),
    pub search_diff: u8,
    /// Cadence while the artifact is carried but extraction not started.
    pub guard_interval: (f32, f32),
    pub guard_diff: u8,
    pub waves: Vec<WaveConfig>,
    pub extraction_bursts: Vec<BurstConfig>,
    /// When set, bursts fire only for normal (non-heretic) extraction.
    pub bursts_normal_only: bool,
}

impl Default for HordePhaseConfig {
    fn default() -> Self {
        Self {
            search_interval: (55.0, 90.0),
            search_diff: 2,
            guard_interval: (25.0, 45.0),
            guard_diff: 4,
            waves: vec![
                WaveConfig { diff: 3, interval: (14.0, 22.0), target_count: 18 },
                WaveConfig { diff: 4, interval: (12.0, 20.0), target_count: 22 },
                WaveConfig { diff: 5, interval: (10.0, 18.0), target_count: 26 },
                WaveConfig { diff: 6, interval: (9.0, 15.0), target_count: 30 },
                WaveConfig { diff: 7, interval: (8.0, 13.0), target_count: 34 },
            ],
            extraction_bursts: vec![
                BurstConfig { diff: 5, count: 1, delay_ms: 0 },
                BurstConfig { diff: 5, count: 1, delay_ms: 15_000 },
                BurstConfig { diff: 6, count: 1, delay_ms: 15_000 },
            ],
            bursts_normal_only: true,
        }
    }
}

// ============================================================================
// TROOPS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarracksConfig {
    pub x: f32,
    pub y: f32,
    pub cap: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroopsConfig {
    pub barracks: Vec<BarracksConfig>,
    /// Base seconds between spawns (actual interval jitters +-20%).
    pub spawn_interval: f32,
    /// Name of the zone whose entry (by the artifact carrier) unlocks
    /// the second spawning phase.
    pub refill_zone: String,
}

impl Default for TroopsConfig {
    fn default() -> Self {
        Self {
            barracks: vec![
                BarracksConfig { x: -10_400.0, y: -900.0, cap: 8 },
                BarracksConfig { x: -10_400.0, y: 0.0, cap: 8 },
                BarracksConfig { x: -10_400.0, y: 900.0, cap: 8 },
            ],
            spawn_interval: 3.0,
            refill_zone: "C".to_string(),
        }
    }
}

// ============================================================================
// LOOT & NPCS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LootConfig {
    /// Minimum clearance from obstacles for chest placement.
    pub clearance: f32,
    /// Gold (artifact) chest position.
    pub gold_chest: (f32, f32),
    pub brown_chest_count: u32,
    /// X range brown chests scatter across.
    pub brown_chest_band: (f32, f32),
}

impl Default for LootConfig {
    fn default() -> Self {
        Self {
            clearance: 60.0,
            gold_chest: (9000.0, 0.0),
            brown_chest_count: 12,
            brown_chest_band: (-8000.0, 8500.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcTypeConfig {
    pub kind: String,
    pub count: u32,
    pub health: f32,
    /// X band the type spawns in.
    pub band: (f32, f32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcConfig {
    pub types: Vec<NpcTypeConfig>,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            types: vec![
                NpcTypeConfig { kind: "medic".into(), count: 2, health: 120.0, band: (-10_800.0, -9900.0) },
                NpcTypeConfig { kind: "quartermaster".into(), count: 1, health: 150.0, band: (-10_800.0, -9900.0) },
            ],
        }
    }
}

// ============================================================================
// TIMERS, SPAWN, EXTRACTION
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimerConfig {
    pub ready_seconds: f32,
    pub extraction_seconds: f32,
    pub extraction_zone_radius: f32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ready_seconds: 10.0,
            extraction_seconds: 60.0,
            extraction_zone_radius: 260.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

// ============================================================================
// HAZARD LAYOUT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HazardStrategy {
    /// Groups scattered over a band; each of the four orientations in a
    /// group rolls independently, so a group may come up empty.
    Scattered {
        groups: u32,
        band: (f32, f32),
        orientation_chance: f32,
    },
    /// Regular grid over a band.
    Grid {
        cols: u32,
        rows: u32,
        band: (f32, f32),
        spacing: f32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardGroupConfig {
    pub enabled: bool,
    pub strategy: HazardStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardLayoutConfig {
    pub sandbags: HazardGroupConfig,
    pub barbed_wire: HazardGroupConfig,
    pub mud_pools: HazardGroupConfig,
    pub fire_pools: HazardGroupConfig,
    pub gas_canisters: HazardGroupConfig,
    pub barrels: HazardGroupConfig,
    /// Areas kept free of all hazards.
    pub clear_zones: Vec<Aabb>,
    /// Clearance kept around the player spawn.
    pub spawn_clearance: f32,
}

impl HazardLayoutConfig {
    pub fn none() -> Self {
        let off = HazardGroupConfig {
            enabled: false,
            strategy: HazardStrategy::Scattered { groups: 0, band: (0.0, 0.0), orientation_chance: 0.0 },
        };
        Self {
            sandbags: off.clone(),
            barbed_wire: off.clone(),
            mud_pools: off.clone(),
            fire_pools: off.clone(),
            gas_canisters: off.clone(),
            barrels: off,
            clear_zones: Vec::new(),
            spawn_clearance: 400.0,
        }
    }

    /// The trenchraid layout: dense sandbag groups through the middle
    /// bands, pools and wire scattered across no-man's-land.
    pub fn trenchraid() -> Self {
        Self {
            sandbags: HazardGroupConfig {
                enabled: true,
                strategy: HazardStrategy::Scattered { groups: 40, band: (-9000.0, 9000.0), orientation_chance: 0.55 },
            },
            barbed_wire: HazardGroupConfig {
                enabled: true,
                strategy: HazardStrategy::Scattered { groups: 28, band: (-8500.0, 9000.0), orientation_chance: 0.8 },
            },
            mud_pools: HazardGroupConfig {
                enabled: true,
                strategy: HazardStrategy::Scattered { groups: 24, band: (-9000.0, 9000.0), orientation_chance: 0.9 },
            },
            fire_pools: HazardGroupConfig {
                enabled: true,
                strategy: HazardStrategy::Scattered { groups: 10, band: (-6000.0, 9000.0), orientation_chance: 0.7 },
            },
            gas_canisters: HazardGroupConfig {
                enabled: true,
                strategy: HazardStrategy::Scattered { groups: 8, band: (-4000.0, 9000.0), orientation_chance: 0.7 },
            },
            barrels: HazardGroupConfig {
                enabled: true,
                strategy: HazardStrategy::Scattered { groups: 16, band: (-8000.0, 9000.0), orientation_chance: 0.8 },
            },
            clear_zones: vec![Aabb::new(-11_500.0, -11_500.0, -10_000.0, 11_500.0)],
            spawn_clearance: 500.0,
        }
    }
}

// ============================================================================
// WEAPONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponDef {
    pub name: String,
    pub damage: f32,
    pub cooldown: f32,
    pub range: f32,
    pub secondary_damage: f32,
    pub secondary_cooldown: f32,
}

/// 8 weapons x 7 loot levels of (primary, secondary) multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponProgression {
    pub weapons: Vec<WeaponDef>,
    pub multipliers: Vec<[(f32, f32); 7]>,
}

impl Default for WeaponProgression {
    fn default() -> Self {
        let weapons = vec![
            WeaponDef { name: "Service Rifle".into(), damage: 18.0, cooldown: 0.45, range: 900.0, secondary_damage: 40.0, secondary_cooldown: 2.5 },
            WeaponDef { name: "Trench Shotgun".into(), damage: 34.0, cooldown: 0.9, range: 260.0, secondary_damage: 60.0, secondary_cooldown: 3.5 },
            WeaponDef { name: "Carbine".into(), damage: 14.0, cooldown: 0.3, range: 700.0, secondary_damage: 30.0, secondary_cooldown: 2.0 },
            WeaponDef { name: "Revolver".into(), damage: 22.0, cooldown: 0.55, range: 520.0, secondary_damage: 44.0, secondary_cooldown: 2.8 },
            WeaponDef { name: "Scoped Rifle".into(), damage: 55.0, cooldown: 1.4, range: 1600.0, secondary_damage: 110.0, secondary_cooldown: 5.0 },
            WeaponDef { name: "Machine Pistol".into(), damage: 9.0, cooldown: 0.12, range: 480.0, secondary_damage: 18.0, secondary_cooldown: 1.6 },
            WeaponDef { name: "Flare Gun".into(), damage: 12.0, cooldown: 1.1, range: 640.0, secondary_damage: 24.0, secondary_cooldown: 4.0 },
            WeaponDef { name: "Breach Hammer".into(), damage: 48.0, cooldown: 1.0, range: 60.0, secondary_damage: 90.0, secondary_cooldown: 4.5 },
        ];
        let multipliers = (0..weapons.len())
            .map(|_| {
                let mut row = [(1.0f32, 1.0f32); 7];
                for (lvl, cell) in row.iter_mut().enumerate() {
                    let m = 1.0 + lvl as f32 * 0.12;
                    *cell = (m, m * 1.05);
                }
                row
            })
            .collect();
        Self { weapons, multipliers }
    }
}

impl WeaponProgression {
    /// (primary, secondary) multiplier for a weapon at a loot level.
    /// Out-of-range indices clamp rather than fail.
    pub fn multiplier(&self, weapon: usize, loot_level: u8) -> (f32, f32) {
        let w = weapon.min(self.multipliers.len().saturating_sub(1));
        let l = (loot_level as usize).min(6);
        self.multipliers.get(w).map(|row| row[l]).unwrap_or((1.0, 1.0))
    }

    pub fn weapon(&self, index: usize) -> &WeaponDef {
        &self.weapons[index.min(self.weapons.len() - 1)]
    }
}

// ============================================================================
// GAME MODE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameModeConfig {
    pub level_type: LevelType,
    /// Full boundary width; the world spans +-(boundary/2) on each axis.
    pub boundary: f32,
    pub enemies: EnemySpawnConfig,
    /// Ambient baseline population enabled.
    pub ambient_enabled: bool,
    pub zone_spawning: ZoneSpawningConfig,
    pub horde_spawning: HordePhaseConfig,
    pub troops: TroopsConfig,
    pub loot: LootConfig,
    pub npcs: NpcConfig,
    pub timers: TimerConfig,
    pub spawn: SpawnPoint,
    pub extraction: SpawnPoint,
    pub hazards: HazardLayoutConfig,
    pub weapons: WeaponProgression,
    /// Gap areas carved out of generated obstacles before defensive
    /// walls are added.
    pub gap_areas: Vec<Aabb>,
    /// Defensive wall segments placed after carving: (x, y, w, h, angle).
    pub defensive_walls: Vec<(f32, f32, f32, f32, f32)>,
    /// Victory points awarded for a completed extraction.
    pub victory_points: i64,
}

impl GameModeConfig {
    pub fn trenchraid() -> Self {
        use EnemyKind::*;
        Self {
            level_type: LevelType::Trenchraid,
            boundary: 23_000.0,
            enemies: EnemySpawnConfig {
                total_count: 200,
                type_ratios: vec![(Basic, 0.55), (Projectile, 0.2), (Boomer, 0.1), (Wallguy, 0.1), (Licker, 0.05)],
                health_mul: 1.0,
                speed_mul: 1.0,
                drop_rates: standard_drop_rates(),
            },
            ambient_enabled: true,
            zone_spawning: ZoneSpawningConfig::default(),
            horde_spawning: HordePhaseConfig::default(),
            troops: TroopsConfig::default(),
            loot: LootConfig::default(),
            npcs: NpcConfig::default(),
            timers: TimerConfig::default(),
            spawn: SpawnPoint { x: -11_000.0, y: 0.0, radius: 300.0 },
            extraction: SpawnPoint { x: -10_600.0, y: 0.0, radius: 260.0 },
            hazards: HazardLayoutConfig::trenchraid(),
            weapons: WeaponProgression::default(),
            gap_areas: vec![
                Aabb::new(-10_200.0, -400.0, -9_800.0, 400.0),
                Aabb::new(-10_200.0, -3_400.0, -9_800.0, -2_600.0),
                Aabb::new(-10_200.0, 2_600.0, -9_800.0, 3_400.0),
            ],
            defensive_walls: vec![
                (-10_000.0, -1_800.0, 2_000.0, 60.0, std::f32::consts::FRAC_PI_2),
                (-10_000.0, 1_800.0, 2_000.0, 60.0, std::f32::consts::FRAC_PI_2),
            ],
            victory_points: 3,
        }
    }

    pub fn extraction() -> Self {
        let mut cfg = Self::trenchraid();
        cfg.level_type = LevelType::Extraction;
        cfg.hazards = HazardLayoutConfig::none();
        cfg.defensive_walls.clear();
        cfg.gap_areas.clear();
        cfg
    }

    pub fn payload() -> Self {
        let mut cfg = Self::trenchraid();
        cfg.level_type = LevelType::Payload;
        cfg.enemies.total_count = 150;
        cfg.horde_spawning.bursts_normal_only = false;
        cfg
    }

    /// Small deterministic world for tests: tiny population, no
    /// hazards, short timers.
    pub fn test() -> Self {
        let mut cfg = Self::trenchraid();
        cfg.level_type = LevelType::Test;
        cfg.enemies.total_count = 10;
        cfg.ambient_enabled = false;
        cfg.hazards = HazardLayoutConfig::none();
        cfg.npcs.types.clear();
        cfg.loot.brown_chest_count = 2;
        cfg
    }

    pub fn for_level(level_type: LevelType) -> Self {
        match level_type {
            LevelType::Test => Self::test(),
            LevelType::Extraction => Self::extraction(),
            LevelType::Payload => Self::payload(),
            LevelType::Trenchraid => Self::trenchraid(),
        }
    }

    pub fn preset(&self, tier: u8) -> &DifficultyPreset {
        self.zone_spawning
            .difficulty_presets
            .iter()
            .find(|p| p.tier == tier)
            .unwrap_or(&self.zone_spawning.difficulty_presets[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_zones_cover_band_contiguously() {
        let zones = standard_zones();
        assert_eq!(zones.len(), 7);
        for pair in zones.windows(2) {
            assert!((pair[0].max_x - pair[1].min_x).abs() < 1e-3);
        }
        // Min inclusive, max exclusive at the shared edge.
        assert!(zones[0].contains(zones[0].min_x, 0.0));
        assert!(!zones[0].contains(zones[0].max_x, 0.0));
        assert!(zones[1].contains(zones[1].min_x, 0.0));
    }

    #[test]
    fn test_presets_ramp_in_size_and_mix() {
        let presets = standard_difficulty_presets();
        assert_eq!(presets.len(), 7);
        let p2 = &presets[1];
        let p6 = &presets[5];
        assert_eq!(p2.size, 12);
        assert_eq!(p6.size, 15);
        assert!(!p2.type_ratios.iter().any(|(k, _)| *k == EnemyKind::Licker));
        assert!(p6.type_ratios.iter().any(|(k, _)| *k == EnemyKind::Licker));
    }

    #[test]
    fn test_weapon_progression_clamps() {
        let prog = WeaponProgression::default();
        assert_eq!(prog.multiplier(0, 0), (1.0, 1.05));
        let (p6, _) = prog.multiplier(0, 6);
        assert!(p6 > 1.5);
        // Out-of-range requests clamp instead of panicking.
        let _ = prog.multiplier(99, 99);
        let _ = prog.weapon(99);
    }

    #[test]
    fn test_mode_constructors() {
        assert_eq!(GameModeConfig::for_level(LevelType::Test).enemies.total_count, 10);
        let tr = GameModeConfig::for_level(LevelType::Trenchraid);
        assert_eq!(tr.boundary, 23_000.0);
        assert!(tr.ambient_enabled);
        assert!((tr.spawn.x - -11_000.0).abs() < 1.0);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let cfg = GameModeConfig::trenchraid();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GameModeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.zone_spawning.zones.len(), cfg.zone_spawning.zones.len());
        assert_eq!(back.level_type, LevelType::Trenchraid);
    }
}
