//! Typed entity records for the room simulation.
//!
//! Entities are tagged records addressed by per-type string ids and
//! owned by exactly one room. Records are pure data with small helper
//! impls; tick logic lives in the owning system (director for enemies,
//! troop controller for troops, hazard field for hazards). Cross-
//! component references are ids, resolved through the room's tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// ID ALLOCATION
// ============================================================================

/// Per-type stable id allocator: `enemy_1`, `troop_4`, `chest_2`, ...
#[derive(Debug, Default)]
pub struct IdGen {
    counters: HashMap<&'static str, u64>,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, prefix: &'static str) -> String {
        let n = self.counters.entry(prefix).or_insert(0);
        *n += 1;
        format!("{prefix}_{n}")
    }
}

// ============================================================================
// DAMAGE OVER TIME
// ============================================================================

/// A damage-over-time tag. Stacks with distinct keys sum; re-applying
/// the same key refreshes duration and keeps the strongest dps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotStack {
    pub key: String,
    pub dps: f32,
    pub time_left: f32,
}

/// Key used by fire pools; burn-state edges are reported for this key.
pub const DOT_FIRE: &str = "hazard_fire";
/// Key used by boomer puke pools.
pub const DOT_PUKE: &str = "hazard_puke";

/// Apply a DOT to a stack list. Returns true when the key is new
/// (rising edge for burn-state reporting).
pub fn apply_dot(stacks: &mut Vec<DotStack>, key: &str, dps: f32, duration: f32) -> bool {
    if let Some(existing) = stacks.iter_mut().find(|s| s.key == key) {
        existing.dps = existing.dps.max(dps);
        existing.time_left = duration;
        false
    } else {
        stacks.push(DotStack {
            key: key.to_string(),
            dps,
            time_left: duration,
        });
        true
    }
}

/// Result of advancing a DOT stack list by one tick.
#[derive(Debug, Default)]
pub struct DotTick {
    pub damage: f32,
    pub expired: Vec<String>,
}

/// Advance all stacks by `dt`: accumulate damage, drop expired stacks.
pub fn tick_dots(stacks: &mut Vec<DotStack>, dt: f32) -> DotTick {
    let mut out = DotTick::default();
    for s in stacks.iter_mut() {
        out.damage += s.dps * dt;
        s.time_left -= dt;
    }
    stacks.retain(|s| {
        if s.time_left > 0.0 {
            true
        } else {
            out.expired.push(s.key.clone());
            false
        }
    });
    out
}

pub fn has_dot(stacks: &[DotStack], key: &str) -> bool {
    stacks.iter().any(|s| s.key == key)
}

// ============================================================================
// ITEMS & CURRENCY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKind {
    MaxHealth,
    MaxStamina,
    MoveSpeed,
    Damage,
    DashCooldown,
    StaminaRegen,
}

/// An equippable stat item (chest drop or shop purchase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatItem {
    pub name: String,
    pub stat: StatKind,
    pub value: f32,
    pub is_percent: bool,
    pub rarity: Rarity,
}

/// A dropped item lying on the ground.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundItem {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub item: StatItem,
}

// ============================================================================
// PLAYER
// ============================================================================

pub const PLAYER_RADIUS: f32 = 12.0;
pub const PLAYER_BASE_HEALTH: f32 = 100.0;
pub const PLAYER_BASE_STAMINA: f32 = 100.0;
pub const PLAYER_BASE_SPEED: f32 = 220.0;

/// Dash latch state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DashState {
    pub active: bool,
    pub time_left: f32,
    pub cooldown_left: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Velocity of the last integrated tick, used for aim lead.
    pub vx: f32,
    pub vy: f32,
    pub aim_angle: f32,
    pub health: f32,
    pub health_max: f32,
    pub stamina: f32,
    pub stamina_max: f32,
    pub sprinting: bool,
    /// Set when stamina hits zero; cleared at 30% recovery.
    pub exhausted: bool,
    pub dash: DashState,
    pub invisible: bool,
    pub invisible_left: f32,
    pub dots: Vec<DotStack>,
    pub burning: bool,
    /// Seconds of gas vision impairment remaining.
    pub gassed_left: f32,
    /// Seconds of mud slow remaining after leaving the pool.
    pub mud_linger: f32,
    pub inventory: Vec<StatItem>,
    pub ducats: i64,
    pub blood_markers: i64,
    pub victory_points: i64,
    pub loot_level: u8,
    pub evil: bool,
    pub last_input_seq: u32,
    /// Weapon fire cooldowns: (primary, secondary).
    pub fire_cooldown: f32,
    pub secondary_cooldown: f32,
    pub weapon_index: usize,
    /// Chest currently being opened by this player, if any.
    pub opening_chest: Option<String>,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            x: 0.0,
            y: 0.0,
            radius: PLAYER_RADIUS,
            vx: 0.0,
            vy: 0.0,
            aim_angle: 0.0,
            health: PLAYER_BASE_HEALTH,
            health_max: PLAYER_BASE_HEALTH,
            stamina: PLAYER_BASE_STAMINA,
            stamina_max: PLAYER_BASE_STAMINA,
            sprinting: false,
            exhausted: false,
            dash: DashState::default(),
            invisible: false,
            invisible_left: 0.0,
            dots: Vec::new(),
            burning: false,
            gassed_left: 0.0,
            mud_linger: 0.0,
            inventory: Vec::new(),
            ducats: 0,
            blood_markers: 0,
            victory_points: 0,
            loot_level: 0,
            evil: false,
            last_input_seq: 0,
            fire_cooldown: 0.0,
            secondary_cooldown: 0.0,
            weapon_index: 0,
            opening_chest: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    pub fn damage(&mut self, amount: f32) {
        self.health = (self.health - amount).max(0.0);
    }

    pub fn heal(&mut self, amount: f32) {
        self.health = (self.health + amount).min(self.health_max);
    }

    /// Recompute derived maxima from base + equipped items. Flat
    /// bonuses apply before percentage bonuses.
    pub fn recompute_stats(&mut self) {
        let health_frac = if self.health_max > 0.0 {
            self.health / self.health_max
        } else {
            1.0
        };
        let stamina_frac = if self.stamina_max > 0.0 {
            self.stamina / self.stamina_max
        } else {
            1.0
        };

        self.health_max = derive_stat(PLAYER_BASE_HEALTH, &self.inventory, StatKind::MaxHealth);
        self.stamina_max = derive_stat(PLAYER_BASE_STAMINA, &self.inventory, StatKind::MaxStamina);
        self.health = (self.health_max * health_frac).clamp(0.0, self.health_max);
        self.stamina = (self.stamina_max * stamina_frac).clamp(0.0, self.stamina_max);
    }

    pub fn move_speed(&self) -> f32 {
        derive_stat(PLAYER_BASE_SPEED, &self.inventory, StatKind::MoveSpeed)
    }

    /// Weapon damage multiplier from equipped percent items.
    pub fn damage_multiplier(&self) -> f32 {
        derive_stat(100.0, &self.inventory, StatKind::Damage) / 100.0
    }

    /// Dash cooldown after percent reductions.
    pub fn dash_cooldown(&self) -> f32 {
        let reduction = self
            .inventory
            .iter()
            .filter(|i| i.stat == StatKind::DashCooldown && i.is_percent)
            .map(|i| i.value)
            .sum::<f32>()
            .min(60.0);
        1.2 * (1.0 - reduction / 100.0)
    }
}

fn derive_stat(base: f32, inventory: &[StatItem], kind: StatKind) -> f32 {
    let flat: f32 = inventory
        .iter()
        .filter(|i| i.stat == kind && !i.is_percent)
        .map(|i| i.value)
        .sum();
    let pct: f32 = inventory
        .iter()
        .filter(|i| i.stat == kind && i.is_percent)
        .map(|i| i.value)
        .sum();
    (base + flat) * (1.0 + pct / 100.0)
}

// ============================================================================
// ENEMY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnemyKind {
    Basic,
    Projectile,
    Licker,
    Boomer,
    Bigboy,
    Wallguy,
    /// Friendly-faction emplacement spawned at level start.
    Turret,
    /// Friendly-faction artillery gun spawned at level start.
    Artillery,
}

impl EnemyKind {
    pub fn base_health(&self) -> f32 {
        match self {
            EnemyKind::Basic => 60.0,
            EnemyKind::Projectile => 45.0,
            EnemyKind::Licker => 35.0,
            EnemyKind::Boomer => 80.0,
            EnemyKind::Bigboy => 400.0,
            EnemyKind::Wallguy => 150.0,
            EnemyKind::Turret => 250.0,
            EnemyKind::Artillery => 300.0,
        }
    }

    pub fn radius(&self) -> f32 {
        match self {
            EnemyKind::Basic => 16.0,
            EnemyKind::Projectile => 14.0,
            EnemyKind::Licker => 13.0,
            EnemyKind::Boomer => 20.0,
            EnemyKind::Bigboy => 32.0,
            EnemyKind::Wallguy => 18.0,
            EnemyKind::Turret => 22.0,
            EnemyKind::Artillery => 28.0,
        }
    }

    pub fn base_speed(&self) -> f32 {
        match self {
            EnemyKind::Basic => 120.0,
            EnemyKind::Projectile => 110.0,
            EnemyKind::Licker => 200.0,
            EnemyKind::Boomer => 95.0,
            EnemyKind::Bigboy => 85.0,
            EnemyKind::Wallguy => 100.0,
            EnemyKind::Turret | EnemyKind::Artillery => 0.0,
        }
    }

    pub fn contact_damage(&self) -> f32 {
        match self {
            EnemyKind::Basic => 8.0,
            EnemyKind::Projectile => 6.0,
            EnemyKind::Licker => 6.0,
            EnemyKind::Boomer => 0.0,
            EnemyKind::Bigboy => 20.0,
            EnemyKind::Wallguy => 10.0,
            EnemyKind::Turret | EnemyKind::Artillery => 0.0,
        }
    }

    pub fn prefer_contact(&self) -> bool {
        matches!(self, EnemyKind::Licker | EnemyKind::Bigboy)
    }

    pub fn is_emplacement(&self) -> bool {
        matches!(self, EnemyKind::Turret | EnemyKind::Artillery)
    }
}

/// Which side an entity fights for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Faction {
    Horde,
    Friendly,
}

/// Flanking style an enemy commits to for a few seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlankStyle {
    Direct,
    FlankLeft,
    FlankRight,
    Rear,
}

/// Avoid-state machine phase shared by enemies (troops have their own
/// richer variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AvoidPhase {
    #[default]
    Idle,
    Reverse,
    Sidestep,
    Escape,
}

/// Projectile-enemy tactic override.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Tactic {
    #[default]
    None,
    Kite,
    /// Strafe around the target; `dir` is +1/-1 tangential direction.
    Strafe {
        dir: f32,
    },
}

/// Ring slot held by an enemy around a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingSlot {
    /// Player the ring is anchored to.
    pub player_id: String,
    pub index: usize,
    pub angle: f32,
    pub radius: f32,
    /// Reassignment epoch that granted this slot.
    pub epoch: u64,
}

/// Director scratch state carried per enemy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiScratch {
    pub style: FlankStyle,
    pub next_style_roll: f32,
    pub flank_radius: f32,
    pub next_reeval: f32,
    pub stuck_timer: f32,
    pub avoid: AvoidPhase,
    pub avoid_timer: f32,
    /// +1 or -1, side chosen for reverse/sidestep.
    pub avoid_side: f32,
    pub escape_angle: f32,
    pub heading: f32,
    pub ring: Option<RingSlot>,
    pub arc_center: Option<f32>,
    pub tactic: Tactic,
}

impl Default for AiScratch {
    fn default() -> Self {
        Self {
            style: FlankStyle::Direct,
            next_style_roll: 0.0,
            flank_radius: 220.0,
            next_reeval: 0.0,
            stuck_timer: 0.0,
            avoid: AvoidPhase::Idle,
            avoid_timer: 0.0,
            avoid_side: 1.0,
            escape_angle: 0.0,
            heading: 0.0,
            ring: None,
            arc_center: None,
            tactic: Tactic::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enemy {
    pub id: String,
    pub kind: EnemyKind,
    pub faction: Faction,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub speed_mul: f32,
    pub health: f32,
    pub health_max: f32,
    pub alive: bool,
    pub prefer_contact: bool,
    pub dots: Vec<DotStack>,
    pub burning: bool,
    pub mud_linger: f32,
    pub attack_cooldown: f32,
    /// Bigboy: seconds until the next dash; while negative, dashing.
    pub dash_timer: f32,
    /// Wallguy: current shield facing.
    pub shield_angle: f32,
    pub ai: AiScratch,
}

impl Enemy {
    pub fn new(id: impl Into<String>, kind: EnemyKind, x: f32, y: f32) -> Self {
        let faction = if kind.is_emplacement() {
            Faction::Friendly
        } else {
            Faction::Horde
        };
        Self {
            id: id.into(),
            kind,
            faction,
            x,
            y,
            radius: kind.radius(),
            speed_mul: 1.0,
            health: kind.base_health(),
            health_max: kind.base_health(),
            alive: true,
            prefer_contact: kind.prefer_contact(),
            dots: Vec::new(),
            burning: false,
            mud_linger: 0.0,
            attack_cooldown: 0.0,
            dash_timer: 6.0,
            shield_angle: 0.0,
            ai: AiScratch::default(),
        }
    }

    pub fn damage(&mut self, amount: f32) {
        self.health = (self.health - amount).max(0.0);
    }
}

// ============================================================================
// TROOP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TroopKind {
    Melee,
    Ranged,
    Grenadier,
}

impl TroopKind {
    pub fn base_health(&self) -> f32 {
        match self {
            TroopKind::Melee => 70.0,
            TroopKind::Ranged => 50.0,
            TroopKind::Grenadier => 55.0,
        }
    }

    pub fn base_speed(&self) -> f32 {
        match self {
            TroopKind::Melee => 130.0,
            TroopKind::Ranged => 120.0,
            TroopKind::Grenadier => 115.0,
        }
    }

    pub fn attack_range(&self) -> f32 {
        match self {
            TroopKind::Melee => 40.0,
            TroopKind::Ranged => 420.0,
            TroopKind::Grenadier => 380.0,
        }
    }
}

/// Troop avoidance phases; mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TroopAvoidPhase {
    #[default]
    None,
    Reverse,
    Sidestep,
    Escape,
    ZoneEscape,
    FireDetour,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TroopAvoid {
    pub phase: TroopAvoidPhase,
    pub timer: f32,
    /// Direction for reverse/sidestep/escape/fireDetour.
    pub dir: (f32, f32),
    /// Escape point for zoneEscape.
    pub escape_target: Option<(f32, f32)>,
    /// Continuous seconds spent clear of red zones while escaping.
    pub clear_t: f32,
    /// Distance moved since the escape began.
    pub escape_moved: f32,
    /// Distance required before the exit latch can release.
    pub escape_need: f32,
    /// Seconds until the escape target may be re-picked.
    pub repick_in: f32,
    /// Continuous seconds of blocked movement (reverse trigger).
    pub blocked_t: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Troop {
    pub id: String,
    pub kind: TroopKind,
    pub faction: Faction,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub attack_range: f32,
    pub attack_cooldown: f32,
    pub target_enemy: Option<String>,
    pub avoid: TroopAvoid,
    pub stuck_anchor: (f32, f32),
    pub stuck_hold: f32,
    /// Unit vector of the last movement step.
    pub last_move: (f32, f32),
    pub barracks_id: String,
    /// Zone-progression waypoint.
    pub goal: (f32, f32),
    /// Aim angle replicated for ranged/grenadier barrels.
    pub barrel_angle: f32,
    pub dots: Vec<DotStack>,
    pub burning: bool,
    pub mud_linger: f32,
    pub wall_contact: bool,
    /// Continuous seconds spent inside a red stuck zone.
    pub red_zone_t: f32,
    /// Scheduled grenade throw cooldown bookkeeping.
    pub grenade_cooldown: f32,
}

impl Troop {
    pub fn new(id: impl Into<String>, kind: TroopKind, barracks_id: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            kind,
            faction: Faction::Friendly,
            x,
            y,
            radius: 14.0,
            health: kind.base_health(),
            health_max: kind.base_health(),
            attack_range: kind.attack_range(),
            attack_cooldown: 0.0,
            target_enemy: None,
            avoid: TroopAvoid::default(),
            stuck_anchor: (x, y),
            stuck_hold: 0.0,
            last_move: (1.0, 0.0),
            barracks_id: barracks_id.into(),
            goal: (x, y),
            barrel_angle: 0.0,
            dots: Vec::new(),
            burning: false,
            mud_linger: 0.0,
            wall_contact: false,
            red_zone_t: 0.0,
            grenade_cooldown: 0.0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    pub fn damage(&mut self, amount: f32) {
        self.health = (self.health - amount).max(0.0);
    }
}

/// A troop spawn point owned by the troop controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Barracks {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub cap: u32,
    pub next_spawn_in: f32,
    /// Round-robin cursor over grenadier/ranged/melee.
    pub rr_index: usize,
}

// ============================================================================
// CHESTS & ARTIFACT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChestVariant {
    Brown,
    Gold,
    StartGear,
    Debug,
}

impl ChestVariant {
    pub fn open_time(&self) -> f32 {
        match self {
            ChestVariant::Brown => 3.0,
            ChestVariant::Gold => 5.0,
            ChestVariant::StartGear => 1.5,
            ChestVariant::Debug => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChestState {
    Sealed,
    Opening,
    Opened,
}

/// Where a gold chest's artifact currently is. Exactly one variant
/// holds at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Artifact {
    Inside,
    Carried { by: String },
    Dropped { x: f32, y: f32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chest {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub variant: ChestVariant,
    pub state: ChestState,
    pub time_left: f32,
    pub time_total: f32,
    pub started_by: Option<String>,
    /// Seeded drop list, revealed on open.
    pub drops: Vec<StatItem>,
    /// Gold chests carry the mission artifact.
    pub artifact: Option<Artifact>,
}

impl Chest {
    pub fn new(id: impl Into<String>, variant: ChestVariant, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            radius: 24.0,
            variant,
            state: ChestState::Sealed,
            time_left: 0.0,
            time_total: variant.open_time(),
            started_by: None,
            drops: Vec::new(),
            artifact: if variant == ChestVariant::Gold {
                Some(Artifact::Inside)
            } else {
                None
            },
        }
    }
}

// ============================================================================
// NPCS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub kind: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub dots: Vec<DotStack>,
    pub burning: bool,
}

impl Npc {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, x: f32, y: f32, health: f32) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            x,
            y,
            radius: 14.0,
            health,
            health_max: health,
            dots: Vec::new(),
            burning: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

// ============================================================================
// STUCK-AVOID ZONES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StuckKind {
    /// Yellow: wall contact, short-lived marker.
    WallHit,
    /// Red: promoted after sustained occupancy; suggests an exit.
    Stuck,
    /// A troop died in fire here; detour sideways.
    FireDeath,
}

/// Hard cap on live stuck zones per room.
pub const STUCK_ZONE_CAP: usize = 48;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckZone {
    pub kind: StuckKind,
    pub x: f32,
    pub y: f32,
    pub r: f32,
    pub ttl: f32,
    pub occupied: bool,
    /// Continuous occupancy seconds (drives yellow -> red promotion).
    pub occupancy: f32,
    /// Suggested exit direction (red and fireDeath zones).
    pub exit_angle: Option<f32>,
    /// Base angle the periodic resample jitters around.
    pub base_exit: f32,
    pub exit_resample_in: f32,
}

impl StuckZone {
    pub fn yellow(x: f32, y: f32) -> Self {
        Self {
            kind: StuckKind::WallHit,
            x,
            y,
            r: 70.0,
            ttl: 2.5,
            occupied: false,
            occupancy: 0.0,
            exit_angle: None,
            base_exit: 0.0,
            exit_resample_in: 0.0,
        }
    }

    pub fn fire_death(x: f32, y: f32, exit_angle: f32) -> Self {
        Self {
            kind: StuckKind::FireDeath,
            x,
            y,
            r: 90.0,
            ttl: 8.0,
            occupied: false,
            occupancy: 0.0,
            exit_angle: Some(exit_angle),
            base_exit: exit_angle,
            exit_resample_in: 0.0,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        let dx = x - self.x;
        let dy = y - self.y;
        dx * dx + dy * dy <= self.r * self.r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_gen_per_type_counters() {
        let mut gen = IdGen::new();
        assert_eq!(gen.next("enemy"), "enemy_1");
        assert_eq!(gen.next("enemy"), "enemy_2");
        assert_eq!(gen.next("troop"), "troop_1");
    }

    #[test]
    fn test_dot_refresh_keeps_strongest_dps() {
        let mut stacks = Vec::new();
        assert!(apply_dot(&mut stacks, DOT_FIRE, 10.0, 3.0));
        assert!(!apply_dot(&mut stacks, DOT_FIRE, 4.0, 5.0));
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].dps, 10.0);
        assert_eq!(stacks[0].time_left, 5.0);
    }

    #[test]
    fn test_dot_tick_damage_and_expiry() {
        let mut stacks = Vec::new();
        apply_dot(&mut stacks, DOT_FIRE, 10.0, 0.5);
        apply_dot(&mut stacks, "ability_3", 2.0, 2.0);

        let t = tick_dots(&mut stacks, 0.5);
        assert!((t.damage - 6.0).abs() < 1e-4); // 10*0.5 + 2*0.5
        assert_eq!(t.expired, vec![DOT_FIRE.to_string()]);
        assert_eq!(stacks.len(), 1);
    }

    #[test]
    fn test_player_stat_derivation() {
        let mut p = Player::new("p1", "tester");
        p.inventory.push(StatItem {
            name: "Iron Plate".into(),
            stat: StatKind::MaxHealth,
            value: 40.0,
            is_percent: false,
            rarity: Rarity::Rare,
        });
        p.inventory.push(StatItem {
            name: "Blessed Charm".into(),
            stat: StatKind::MaxHealth,
            value: 10.0,
            is_percent: true,
            rarity: Rarity::Epic,
        });
        p.recompute_stats();
        assert!((p.health_max - 154.0).abs() < 1e-3); // (100+40)*1.1
        assert!((p.health - 154.0).abs() < 1e-3); // was full, stays full
    }

    #[test]
    fn test_recompute_preserves_health_fraction() {
        let mut p = Player::new("p1", "tester");
        p.health = 50.0; // half
        p.inventory.push(StatItem {
            name: "Iron Plate".into(),
            stat: StatKind::MaxHealth,
            value: 100.0,
            is_percent: false,
            rarity: Rarity::Common,
        });
        p.recompute_stats();
        assert!((p.health_max - 200.0).abs() < 1e-3);
        assert!((p.health - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_gold_chest_starts_with_artifact_inside() {
        let gold = Chest::new("chest_1", ChestVariant::Gold, 0.0, 0.0);
        assert_eq!(gold.artifact, Some(Artifact::Inside));
        let brown = Chest::new("chest_2", ChestVariant::Brown, 0.0, 0.0);
        assert!(brown.artifact.is_none());
    }

    #[test]
    fn test_enemy_kind_factions() {
        assert_eq!(Enemy::new("e", EnemyKind::Basic, 0.0, 0.0).faction, Faction::Horde);
        assert_eq!(
            Enemy::new("t", EnemyKind::Turret, 0.0, 0.0).faction,
            Faction::Friendly
        );
    }

    #[test]
    fn test_stuck_zone_contains() {
        let z = StuckZone::yellow(100.0, 0.0);
        assert!(z.contains(150.0, 0.0));
        assert!(!z.contains(180.0, 0.0));
    }
}
