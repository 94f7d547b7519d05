//! Seeded loot: chest drops, enemy currency drops, and the shop.
//!
//! Every roll is seeded from `world_seed + fnv(chest_id | enemy_id)`,
//! so a room's loot is fully determined at creation and re-rolling the
//! same chest twice (or replaying the room) yields the same drops.

use crate::config::EnemyDropRate;
use crate::entities::{ChestVariant, EnemyKind, Player, Rarity, StatItem, StatKind};
use crate::error::{ActionResult, Reject};
use crate::rng::{fnv1a, GameRng};
use serde::{Deserialize, Serialize};

const RARITIES: [Rarity; 5] = [
    Rarity::Common,
    Rarity::Uncommon,
    Rarity::Rare,
    Rarity::Epic,
    Rarity::Legendary,
];

/// Standard rarity weights for brown-tier chests.
const RARITY_WEIGHTS: [f32; 5] = [45.0, 28.0, 16.0, 8.0, 3.0];

const STATS: [StatKind; 6] = [
    StatKind::MaxHealth,
    StatKind::MaxStamina,
    StatKind::MoveSpeed,
    StatKind::Damage,
    StatKind::DashCooldown,
    StatKind::StaminaRegen,
];

/// Rarity-indexed value table per stat, and whether the stat rolls as
/// a percentage.
fn stat_table(stat: StatKind) -> ([f32; 5], bool) {
    match stat {
        StatKind::MaxHealth => ([10.0, 18.0, 30.0, 45.0, 70.0], false),
        StatKind::MaxStamina => ([8.0, 14.0, 22.0, 34.0, 50.0], false),
        StatKind::MoveSpeed => ([2.0, 4.0, 6.0, 9.0, 14.0], true),
        StatKind::Damage => ([3.0, 5.0, 8.0, 12.0, 18.0], true),
        StatKind::DashCooldown => ([4.0, 7.0, 10.0, 15.0, 22.0], true),
        StatKind::StaminaRegen => ([5.0, 8.0, 12.0, 18.0, 26.0], true),
    }
}

fn stat_noun(stat: StatKind) -> &'static str {
    match stat {
        StatKind::MaxHealth => "Plate",
        StatKind::MaxStamina => "Canteen",
        StatKind::MoveSpeed => "Boots",
        StatKind::Damage => "Bayonet",
        StatKind::DashCooldown => "Harness",
        StatKind::StaminaRegen => "Rations",
    }
}

fn rarity_prefix(rarity: Rarity) -> &'static str {
    match rarity {
        Rarity::Common => "Standard",
        Rarity::Uncommon => "Polished",
        Rarity::Rare => "Officer's",
        Rarity::Epic => "Gilded",
        Rarity::Legendary => "Saint's",
    }
}

fn roll_item(rng: &mut GameRng, rarity: Rarity) -> StatItem {
    let stat = STATS[rng.range_i32(0, STATS.len() as i32 - 1) as usize];
    let (values, is_percent) = stat_table(stat);
    let rarity_idx = RARITIES.iter().position(|r| *r == rarity).unwrap_or(0);
    let base = values[rarity_idx];
    // +-15% value jitter within the rarity band.
    let value = (base * rng.range_f32(0.85, 1.15) * 10.0).round() / 10.0;
    StatItem {
        name: format!("{} {}", rarity_prefix(rarity), stat_noun(stat)),
        stat,
        value,
        is_percent,
        rarity,
    }
}

fn roll_rarity(rng: &mut GameRng, boss: bool) -> Rarity {
    if boss {
        // Boss-tier chests drop Epic/Legendary only.
        if rng.chance(0.7) {
            Rarity::Epic
        } else {
            Rarity::Legendary
        }
    } else {
        RARITIES[rng.pick_weighted(&RARITY_WEIGHTS).unwrap_or(0)]
    }
}

// ============================================================================
// SHOP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ShopOffer {
    Stat(StatItem),
    Cosmetic { name: String, slot: CosmeticSlot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CosmeticSlot {
    Hat,
    Skin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub offer: ShopOffer,
    pub price_ducats: i64,
    pub price_victory_points: i64,
    pub sold: bool,
}

const EPIC_PRICE: i64 = 400;
const LEGENDARY_PRICE: i64 = 900;

// ============================================================================
// MANAGER
// ============================================================================

#[derive(Debug, Clone)]
pub struct LootManager {
    world_seed: u32,
    pub shop: Vec<ShopItem>,
}

impl LootManager {
    pub fn new(world_seed: u32) -> Self {
        let mut mgr = Self {
            world_seed,
            shop: Vec::new(),
        };
        mgr.roll_shop();
        mgr
    }

    fn seeded(&self, tag: &str) -> GameRng {
        GameRng::new(self.world_seed.wrapping_add(fnv1a(tag)))
    }

    /// Roll a chest's drop list. Same chest id always rolls the same.
    pub fn roll_chest_drops(&self, chest_id: &str, variant: ChestVariant) -> Vec<StatItem> {
        let mut rng = self.seeded(chest_id);
        let (count, boss) = match variant {
            ChestVariant::Brown => (rng.range_i32(1, 2), false),
            ChestVariant::Gold => (3, true),
            ChestVariant::StartGear => (2, false),
            ChestVariant::Debug => (6, false),
        };
        (0..count)
            .map(|_| {
                let rarity = roll_rarity(&mut rng, boss);
                roll_item(&mut rng, rarity)
            })
            .collect()
    }

    /// Roll an enemy's currency drop. Independently seeded per enemy.
    pub fn roll_enemy_drop(
        &self,
        enemy_id: &str,
        kind: EnemyKind,
        rates: &[EnemyDropRate],
    ) -> Option<(i64, i64)> {
        let rate = rates.iter().find(|r| r.kind == kind)?;
        let mut rng = self.seeded(enemy_id);
        if !rng.chance(rate.chance) {
            return None;
        }
        let ducats = rng.range_i32(rate.ducats.0, rate.ducats.1) as i64;
        let markers = rng.range_i32(rate.blood_markers.0, rate.blood_markers.1) as i64;
        Some((ducats, markers))
    }

    /// Roll the room's shop inventory: 4 Epic + 4 Legendary stat items
    /// plus the fixed cosmetics.
    pub fn roll_shop(&mut self) {
        let mut rng = self.seeded("shop");
        let mut shop = Vec::new();
        for _ in 0..4 {
            shop.push(ShopItem {
                offer: ShopOffer::Stat(roll_item(&mut rng, Rarity::Epic)),
                price_ducats: EPIC_PRICE,
                price_victory_points: 0,
                sold: false,
            });
        }
        for _ in 0..4 {
            shop.push(ShopItem {
                offer: ShopOffer::Stat(roll_item(&mut rng, Rarity::Legendary)),
                price_ducats: LEGENDARY_PRICE,
                price_victory_points: 0,
                sold: false,
            });
        }
        for (name, slot, vp) in [
            ("Brodie Helmet", CosmeticSlot::Hat, 1i64),
            ("Gas Hood", CosmeticSlot::Hat, 2),
            ("Mud-Caked Greatcoat", CosmeticSlot::Skin, 2),
            ("Penitent Wraps", CosmeticSlot::Skin, 3),
        ] {
            shop.push(ShopItem {
                offer: ShopOffer::Cosmetic { name: name.to_string(), slot },
                price_ducats: 0,
                price_victory_points: vp,
                sold: false,
            });
        }
        self.shop = shop;
    }

    /// Validate and apply a purchase. Either the whole purchase applies
    /// (funds deducted, item granted, stats recomputed, slot marked
    /// sold) or nothing changes.
    pub fn purchase(&mut self, player: &mut Player, index: usize) -> ActionResult {
        let item = self
            .shop
            .get(index)
            .ok_or_else(|| Reject::new("No such shop item"))?;
        if item.sold {
            return Err(Reject::new("Item already sold"));
        }
        if player.ducats < item.price_ducats {
            return Err(Reject::new("Insufficient ducats"));
        }
        if player.victory_points < item.price_victory_points {
            return Err(Reject::new("Insufficient victory points"));
        }

        let item = &mut self.shop[index];
        player.ducats -= item.price_ducats;
        player.victory_points -= item.price_victory_points;
        if let ShopOffer::Stat(stat_item) = &item.offer {
            player.inventory.push(stat_item.clone());
            player.recompute_stats();
        }
        item.sold = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameModeConfig;

    #[test]
    fn test_chest_rolls_are_deterministic() {
        let a = LootManager::new(777);
        let b = LootManager::new(777);
        assert_eq!(
            a.roll_chest_drops("chest_3", ChestVariant::Brown),
            b.roll_chest_drops("chest_3", ChestVariant::Brown)
        );
        assert_ne!(
            a.roll_chest_drops("chest_3", ChestVariant::Brown),
            a.roll_chest_drops("chest_4", ChestVariant::Brown)
        );
    }

    #[test]
    fn test_gold_chest_restricted_to_high_rarity() {
        let mgr = LootManager::new(1);
        for i in 0..32 {
            let drops = mgr.roll_chest_drops(&format!("gold_{i}"), ChestVariant::Gold);
            assert_eq!(drops.len(), 3);
            for d in drops {
                assert!(matches!(d.rarity, Rarity::Epic | Rarity::Legendary));
            }
        }
    }

    #[test]
    fn test_debug_chest_has_six_items() {
        let mgr = LootManager::new(5);
        assert_eq!(mgr.roll_chest_drops("dbg_1", ChestVariant::Debug).len(), 6);
    }

    #[test]
    fn test_enemy_drop_uses_type_rates() {
        let mgr = LootManager::new(9);
        let rates = GameModeConfig::trenchraid().enemies.drop_rates;
        // Bigboy drops at 100%.
        let drop = mgr.roll_enemy_drop("enemy_1", EnemyKind::Bigboy, &rates);
        let (ducats, _) = drop.expect("bigboy always drops");
        assert!((15..=30).contains(&(ducats as i32)));
        // Same enemy id rolls identically.
        assert_eq!(drop, mgr.roll_enemy_drop("enemy_1", EnemyKind::Bigboy, &rates));
    }

    #[test]
    fn test_shop_layout() {
        let mgr = LootManager::new(3);
        let epics = mgr
            .shop
            .iter()
            .filter(|s| matches!(&s.offer, ShopOffer::Stat(i) if i.rarity == Rarity::Epic))
            .count();
        let legendaries = mgr
            .shop
            .iter()
            .filter(|s| matches!(&s.offer, ShopOffer::Stat(i) if i.rarity == Rarity::Legendary))
            .count();
        let cosmetics = mgr
            .shop
            .iter()
            .filter(|s| matches!(s.offer, ShopOffer::Cosmetic { .. }))
            .count();
        assert_eq!(epics, 4);
        assert_eq!(legendaries, 4);
        assert_eq!(cosmetics, 4);
    }

    #[test]
    fn test_purchase_insufficient_funds_changes_nothing() {
        let mut mgr = LootManager::new(3);
        let mut player = Player::new("p1", "pauper");
        player.ducats = 50;

        let err = mgr.purchase(&mut player, 3).unwrap_err();
        assert_eq!(err.reason, "Insufficient ducats");
        assert_eq!(player.ducats, 50);
        assert!(player.inventory.is_empty());
        assert!(!mgr.shop[3].sold);
    }

    #[test]
    fn test_purchase_applies_fully() {
        let mut mgr = LootManager::new(3);
        let mut player = Player::new("p1", "flush");
        player.ducats = 500;

        mgr.purchase(&mut player, 0).unwrap();
        assert_eq!(player.ducats, 100);
        assert_eq!(player.inventory.len(), 1);
        assert!(mgr.shop[0].sold);
        // Second purchase of the same slot rejects.
        let err = mgr.purchase(&mut player, 0).unwrap_err();
        assert_eq!(err.reason, "Item already sold");
    }

    #[test]
    fn test_inventory_serialization_roundtrip_is_stable() {
        let mgr = LootManager::new(11);
        let inv = mgr.roll_chest_drops("chest_1", ChestVariant::Gold);
        let first = serde_json::to_vec(&inv).unwrap();
        let back: Vec<StatItem> = serde_json::from_slice(&first).unwrap();
        let second = serde_json::to_vec(&back).unwrap();
        assert_eq!(first, second);
    }
}
