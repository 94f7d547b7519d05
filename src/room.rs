//! Per-room orchestrator.
//!
//! A room owns all of its entity tables and runs the fixed 60 Hz tick:
//! queued inputs, player integration, the enemy director, the troop
//! controller, hazards, zone/horde scheduling, the timer/phase machine,
//! and finally end-of-tick effect application and death resolution.
//! Cross-component damage travels as `Effect` records so each entity
//! class is mutated by exactly one owner during the pass itself.

use crate::commands::{AbilityKind, ClientCommand, ExtractionKind, InputFrame};
use crate::config::{GameModeConfig, LevelType};
use crate::entities::{
    apply_dot, has_dot, tick_dots, Artifact, Chest, ChestState, ChestVariant, Enemy, EnemyKind,
    GroundItem, IdGen, Npc, Player, Troop, DOT_FIRE,
};
use crate::environment::{Aabb, BoxTag, Environment, OrientedBox};
use crate::error::{ActionResult, Reject, SimFault};
use crate::events::{Effect, EventBus, GameEvent};
use crate::loot::LootManager;
use crate::rng::GameRng;
use crate::spatial::{BodyKind, SpatialGrid};
use crate::systems::director::{Director, DirectorMode};
use crate::systems::hazards::{linear_falloff, HazardField};
use crate::systems::spawner::{HordePhase, ZoneSpawner};
use crate::systems::troops::TroopController;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Fixed simulation timestep.
pub const TICK_DT: f32 = 1.0 / 60.0;

/// Boomer death chain constants.
const BOOMER_RADIUS: f32 = 100.0;
const BOOMER_DMG_INNER: f32 = 45.0;
const BOOMER_DMG_OUTER: f32 = 20.0;

/// Placed-ability limits.
const ABILITY_CAP: usize = 4;
const ABILITY_COOLDOWN: f32 = 8.0;
const ABILITY_TTL: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Lobby,
    Level,
}

#[derive(Debug, Clone)]
pub struct ReadyTimer {
    pub time_left: f32,
    pub started_by: String,
    pub level_type: LevelType,
}

#[derive(Debug, Clone)]
pub struct ExtractionRun {
    pub kind: ExtractionKind,
    pub time_left: f32,
    pub time_total: f32,
}

#[derive(Debug, Clone)]
struct PlacedAbility {
    owner: String,
    kind: AbilityKind,
    hazard_id: String,
    ttl: f32,
}

pub struct Room {
    pub id: String,
    pub scene: Scene,
    pub level_type: LevelType,
    pub world_seed: u32,
    pub tick_count: u64,
    pub time: f64,
    pub config: GameModeConfig,
    pub env: Environment,
    pub grid: SpatialGrid,
    pub players: BTreeMap<String, Player>,
    pub enemies: BTreeMap<String, Enemy>,
    pub troops: BTreeMap<String, Troop>,
    pub chests: BTreeMap<String, Chest>,
    pub npcs: BTreeMap<String, Npc>,
    pub ground_items: BTreeMap<String, GroundItem>,
    pub hazards: HazardField,
    pub director: Director,
    pub troop_ctl: TroopController,
    pub spawner: ZoneSpawner,
    pub loot: LootManager,
    pub bus: EventBus,
    pub ready_timer: Option<ReadyTimer>,
    pub extraction: Option<ExtractionRun>,
    pub mission_over: bool,
    /// Set when the scene changed this tick; the broadcaster consumes it.
    pub scene_changed: bool,
    pub chests_dirty: bool,
    pub timers_dirty: bool,
    pub debug_chests: bool,
    effects: Vec<Effect>,
    ids: IdGen,
    inputs: BTreeMap<String, InputFrame>,
    prev_inputs: BTreeMap<String, InputFrame>,
    pending_leaves: Vec<String>,
    abilities: BTreeMap<String, PlacedAbility>,
    ability_cooldowns: BTreeMap<String, f32>,
    spawn_rng: GameRng,
}

impl Room {
    pub fn new(id: impl Into<String>, world_seed: u32) -> Self {
        Self::with_config(id, world_seed, GameModeConfig::trenchraid())
    }

    pub fn with_config(id: impl Into<String>, world_seed: u32, config: GameModeConfig) -> Self {
        let debug_chests = std::env::var("ENABLE_DEBUG_CHESTS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let level_type = config.level_type;
        Self {
            id: id.into(),
            scene: Scene::Lobby,
            level_type,
            world_seed,
            tick_count: 0,
            time: 0.0,
            env: Environment::with_boundary(400.0), // small lobby floor
            grid: SpatialGrid::default(),
            players: BTreeMap::new(),
            enemies: BTreeMap::new(),
            troops: BTreeMap::new(),
            chests: BTreeMap::new(),
            npcs: BTreeMap::new(),
            ground_items: BTreeMap::new(),
            hazards: HazardField::new(),
            director: Director::new(world_seed),
            troop_ctl: TroopController::new(world_seed),
            spawner: ZoneSpawner::new(
                world_seed,
                config.zone_spawning.clone(),
                config.horde_spawning.clone(),
            ),
            loot: LootManager::new(world_seed),
            bus: EventBus::new(),
            ready_timer: None,
            extraction: None,
            mission_over: false,
            scene_changed: false,
            chests_dirty: false,
            timers_dirty: false,
            debug_chests,
            effects: Vec::new(),
            ids: IdGen::new(),
            inputs: BTreeMap::new(),
            prev_inputs: BTreeMap::new(),
            pending_leaves: Vec::new(),
            abilities: BTreeMap::new(),
            ability_cooldowns: BTreeMap::new(),
            spawn_rng: GameRng::stream(world_seed, "room"),
            config,
        }
    }

    // ==================================================================
    // Client commands
    // ==================================================================

    pub fn handle(&mut self, cmd: ClientCommand) -> ActionResult {
        match cmd {
            ClientCommand::Join { player_id, name } => self.join(player_id, name),
            ClientCommand::Leave { player_id } => {
                self.pending_leaves.push(player_id);
                Ok(())
            }
            ClientCommand::Input { player_id, frame } => {
                if let Some(p) = self.players.get_mut(&player_id) {
                    if frame.seq > p.last_input_seq {
                        p.last_input_seq = frame.seq;
                        self.inputs.insert(player_id, frame);
                    }
                }
                Ok(())
            }
            ClientCommand::StartReadyTimer { player_id, level_type } => {
                self.start_ready_timer(player_id, level_type)
            }
            ClientCommand::CancelReadyTimer { .. } => {
                if self.ready_timer.take().is_some() {
                    self.timers_dirty = true;
                    self.bus
                        .emit(GameEvent::ReadyTimerUpdate { started: false, time_left: 0.0 });
                }
                Ok(())
            }
            ClientCommand::OpenChest { player_id, chest_id } => self.open_chest(player_id, chest_id),
            ClientCommand::CancelOpenChest { player_id } => self.cancel_open_chest(&player_id),
            ClientCommand::PickUpArtifact { player_id, chest_id } => {
                self.pick_up_artifact(player_id, chest_id)
            }
            ClientCommand::DropArtifact { player_id } => self.drop_artifact(&player_id),
            ClientCommand::PurchaseShopItem { player_id, item_index } => {
                let Some(player) = self.players.get_mut(&player_id) else {
                    return Err(Reject::new("No such player"));
                };
                let result = self.loot.purchase(player, item_index);
                self.bus.emit(GameEvent::PurchaseResult {
                    player_id,
                    success: result.is_ok(),
                    reason: result.as_ref().err().map(|r| r.reason.clone()),
                });
                result
            }
            ClientCommand::RequestExtraction { player_id, kind } => {
                self.request_extraction(player_id, kind)
            }
            ClientCommand::ReturnToLobby { .. } => {
                if self.mission_over {
                    self.return_to_lobby();
                    Ok(())
                } else {
                    Err(Reject::new("Mission still running"))
                }
            }
            ClientCommand::PlaceAbility { player_id, kind, x, y, angle, .. } => {
                self.place_ability(player_id, kind, x, y, angle)
            }
            ClientCommand::SendNpcDot { npc_server_id, dps, duration, .. } => {
                let Some(npc) = self.npcs.get_mut(&npc_server_id) else {
                    // Authoritative state wins; stale client reports drop.
                    let fault = SimFault::Desync {
                        detail: format!("dot for unknown npc {npc_server_id}"),
                    };
                    debug!(%fault, "dropped");
                    return Ok(());
                };
                apply_dot(&mut npc.dots, "npc_tag", dps.clamp(0.0, 50.0), duration.clamp(0.0, 10.0));
                Ok(())
            }
            ClientCommand::AbilityDotDamage {
                player_id,
                ability_id,
                target_player_id,
                dps,
                duration,
            } => {
                // PvP: the server re-checks alignment before applying.
                let caster_evil = self.players.get(&player_id).map(|p| p.evil).unwrap_or(false);
                let owns = self
                    .abilities
                    .get(&ability_id)
                    .map(|a| a.owner == player_id)
                    .unwrap_or(false);
                if !caster_evil || !owns {
                    return Err(Reject::new("Alignment check failed"));
                }
                if let Some(target) = self.players.get_mut(&target_player_id) {
                    apply_dot(
                        &mut target.dots,
                        &format!("ability_{ability_id}"),
                        dps.clamp(0.0, 30.0),
                        duration.clamp(0.0, 8.0),
                    );
                }
                Ok(())
            }
        }
    }

    fn join(&mut self, player_id: String, name: String) -> ActionResult {
        if self.players.contains_key(&player_id) {
            return Err(Reject::new("Already joined"));
        }
        let mut player = Player::new(player_id.clone(), name);
        if self.scene == Scene::Level {
            let (x, y) = self.spawn_position();
            player.x = x;
            player.y = y;
        }
        self.grid.insert(&player_id, BodyKind::Player, player.x, player.y);
        info!(room = %self.id, player = %player_id, "player joined");
        self.players.insert(player_id, player);
        Ok(())
    }

    fn start_ready_timer(&mut self, player_id: String, level_type: LevelType) -> ActionResult {
        if self.scene != Scene::Lobby {
            return Err(Reject::new("Ready timer only runs in the lobby"));
        }
        if self.ready_timer.is_some() {
            return Err(Reject::new("Ready timer already running"));
        }
        let seconds = self.config.timers.ready_seconds;
        self.ready_timer = Some(ReadyTimer {
            time_left: seconds,
            started_by: player_id,
            level_type,
        });
        self.timers_dirty = true;
        self.bus
            .emit(GameEvent::ReadyTimerUpdate { started: true, time_left: seconds });
        Ok(())
    }

    fn open_chest(&mut self, player_id: String, chest_id: String) -> ActionResult {
        if self.scene != Scene::Level {
            return Err(Reject::new("No chests in the lobby"));
        }
        let Some(player) = self.players.get(&player_id) else {
            return Err(Reject::new("No such player"));
        };
        let (px, py) = (player.x, player.y);
        let Some(chest) = self.chests.get_mut(&chest_id) else {
            return Err(Reject::new("No such chest"));
        };
        if chest.state != ChestState::Sealed {
            // Opening an already-open chest is a desync, dropped.
            return Err(Reject::new("Chest is not sealed"));
        }
        let dist = ((chest.x - px).powi(2) + (chest.y - py).powi(2)).sqrt();
        if dist > chest.radius + 50.0 {
            return Err(Reject::new("Too far from chest"));
        }
        chest.state = ChestState::Opening;
        chest.time_left = chest.time_total;
        chest.started_by = Some(player_id.clone());
        self.players.get_mut(&player_id).unwrap().opening_chest = Some(chest_id);
        self.chests_dirty = true;
        Ok(())
    }

    fn cancel_open_chest(&mut self, player_id: &str) -> ActionResult {
        let Some(player) = self.players.get_mut(player_id) else {
            return Err(Reject::new("No such player"));
        };
        if let Some(chest_id) = player.opening_chest.take() {
            if let Some(chest) = self.chests.get_mut(&chest_id) {
                if chest.state == ChestState::Opening {
                    chest.state = ChestState::Sealed;
                    chest.time_left = 0.0;
                    chest.started_by = None;
                    self.chests_dirty = true;
                }
            }
        }
        Ok(())
    }

    fn pick_up_artifact(&mut self, player_id: String, chest_id: String) -> ActionResult {
        let Some(player) = self.players.get(&player_id) else {
            return Err(Reject::new("No such player"));
        };
        let (px, py) = (player.x, player.y);
        let Some(chest) = self.chests.get_mut(&chest_id) else {
            return Err(Reject::new("No such chest"));
        };
        match &chest.artifact {
            Some(Artifact::Inside) => {
                if chest.state != ChestState::Opened {
                    return Err(Reject::new("Chest still sealed"));
                }
                let dist = ((chest.x - px).powi(2) + (chest.y - py).powi(2)).sqrt();
                if dist > chest.radius + 50.0 {
                    return Err(Reject::new("Too far from chest"));
                }
            }
            Some(Artifact::Dropped { x, y }) => {
                let dist = ((x - px).powi(2) + (y - py).powi(2)).sqrt();
                if dist > 60.0 {
                    return Err(Reject::new("Too far from artifact"));
                }
            }
            Some(Artifact::Carried { .. }) => return Err(Reject::new("Artifact already carried")),
            None => return Err(Reject::new("Chest has no artifact")),
        }
        chest.artifact = Some(Artifact::Carried { by: player_id });
        self.chests_dirty = true;
        Ok(())
    }

    fn drop_artifact(&mut self, player_id: &str) -> ActionResult {
        let pos = self
            .players
            .get(player_id)
            .map(|p| (p.x, p.y))
            .ok_or_else(|| Reject::new("No such player"))?;
        for chest in self.chests.values_mut() {
            if let Some(Artifact::Carried { by }) = &chest.artifact {
                if by == player_id {
                    chest.artifact = Some(Artifact::Dropped { x: pos.0, y: pos.1 });
                    self.chests_dirty = true;
                    return Ok(());
                }
            }
        }
        Err(Reject::new("Not carrying the artifact"))
    }

    fn request_extraction(&mut self, player_id: String, kind: ExtractionKind) -> ActionResult {
        if self.scene != Scene::Level {
            return Err(Reject::new("Extraction timer only runs in a level"));
        }
        if self.extraction.is_some() {
            return Err(Reject::new("Extraction already running"));
        }
        let carrier = self.artifact_carrier();
        if carrier.as_deref() != Some(player_id.as_str()) {
            return Err(Reject::new("Artifact not carried"));
        }
        let Some(player) = self.players.get(&player_id) else {
            return Err(Reject::new("No such player"));
        };
        let zone = self.config.extraction;
        let dist = ((player.x - zone.x).powi(2) + (player.y - zone.y).powi(2)).sqrt();
        if dist > self.config.timers.extraction_zone_radius {
            return Err(Reject::new("Not inside the extraction zone"));
        }
        // TODO: heretic extraction should verify the player's conversion
        // state server-side; until then the client is trusted here.
        let total = self.config.timers.extraction_seconds;
        self.extraction = Some(ExtractionRun { kind, time_left: total, time_total: total });
        self.spawner.schedule_extraction_bursts(kind);
        self.spawner.set_phase(HordePhase::Wave(0));
        self.director.mode = DirectorMode::Panic;
        self.timers_dirty = true;
        self.bus
            .emit(GameEvent::ExtractionTimerUpdate { started: true, time_left: total });
        Ok(())
    }

    fn place_ability(
        &mut self,
        player_id: String,
        kind: AbilityKind,
        x: f32,
        y: f32,
        angle: f32,
    ) -> ActionResult {
        if self.scene != Scene::Level {
            return Err(Reject::new("Abilities only place in a level"));
        }
        if !self.players.contains_key(&player_id) {
            return Err(Reject::new("No such player"));
        }
        let live = self.abilities.values().filter(|a| a.owner == player_id).count();
        if live >= ABILITY_CAP {
            return Err(Reject::new("Ability cap reached"));
        }
        if self.ability_cooldowns.get(&player_id).copied().unwrap_or(0.0) > 0.0 {
            return Err(Reject::new("Ability on cooldown"));
        }
        if !self.env.is_inside_bounds(x, y, 40.0) || self.env.circle_hits_any(x, y, 30.0) {
            return Err(Reject::new("Blocked placement"));
        }

        let ability_id = self.ids.next("ability");
        let hazard_id = match kind {
            AbilityKind::SandbagWall => {
                self.hazards.add_sandbag(x, y, angle, &mut self.env, &mut self.ids)
            }
            AbilityKind::WireCoil => {
                let id = self.ids.next("wire");
                self.hazards.wire.insert(
                    id.clone(),
                    crate::systems::hazards::BarbedWire { id: id.clone(), x, y, r: 60.0, dps: 6.0 },
                );
                self.hazards.dirty = true;
                id
            }
        };
        self.abilities.insert(
            ability_id,
            PlacedAbility { owner: player_id.clone(), kind, hazard_id, ttl: ABILITY_TTL },
        );
        self.ability_cooldowns.insert(player_id, ABILITY_COOLDOWN);
        Ok(())
    }

    // ==================================================================
    // Tick
    // ==================================================================

    pub fn tick(&mut self, dt: f32) {
        self.tick_count += 1;
        self.time += dt as f64;
        self.scene_changed = false;

        match self.scene {
            Scene::Lobby => self.lobby_tick(dt),
            Scene::Level => self.level_tick(dt),
        }

        // Disconnections apply at end of tick.
        let leaves = std::mem::take(&mut self.pending_leaves);
        for player_id in leaves {
            if self.players.remove(&player_id).is_some() {
                self.grid.remove(&player_id);
                self.inputs.remove(&player_id);
                self.prev_inputs.remove(&player_id);
                info!(room = %self.id, player = %player_id, "player left");
            }
        }
    }

    fn lobby_tick(&mut self, dt: f32) {
        self.integrate_players(dt);
        if let Some(timer) = &mut self.ready_timer {
            timer.time_left -= dt;
            self.timers_dirty = true;
            if timer.time_left <= 0.0 {
                let level_type = timer.level_type;
                self.ready_timer = None;
                self.bus
                    .emit(GameEvent::ReadyTimerUpdate { started: false, time_left: 0.0 });
                self.start_level(level_type);
            }
        }
    }

    fn level_tick(&mut self, dt: f32) {
        self.integrate_players(dt);

        if !self.mission_over {
            self.director.tick(
                dt,
                &self.players,
                &self.troops,
                &mut self.enemies,
                &self.env,
                &mut self.grid,
                &mut self.bus,
                &mut self.effects,
            );
            self.troop_ctl.tick(
                dt,
                &self.enemies,
                &mut self.troops,
                &self.env,
                &self.hazards,
                &mut self.grid,
                &mut self.ids,
                &mut self.bus,
                &mut self.effects,
            );
            self.hazards.tick(
                dt,
                &self.grid,
                &mut self.players,
                &mut self.enemies,
                &mut self.troops,
                &mut self.bus,
            );

            let carried = self.artifact_carrier().is_some();
            self.update_horde_phase(carried);
            let entries = self.spawner.tick(
                dt,
                &self.players,
                &mut self.enemies,
                &self.env,
                &mut self.grid,
                &mut self.ids,
                &mut self.bus,
                carried,
                &self.config.enemies,
            );
            // The carrier crossing into a zone can unlock the troop
            // refill wave.
            if let Some(carrier) = self.artifact_carrier() {
                for entry in &entries {
                    if entry.player_id == carrier {
                        self.troop_ctl.notify_carrier_zone(&entry.zone);
                    }
                }
            }
        }

        self.tick_abilities(dt);
        self.tick_chests(dt);
        self.tick_extraction(dt);
        self.tick_entity_dots(dt);
        self.resolve_effects_and_deaths();
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    fn integrate_players(&mut self, dt: f32) {
        let player_ids: Vec<String> = self.players.keys().cloned().collect();
        for id in player_ids {
            let frame = self.inputs.get(&id).copied().unwrap_or_default();
            let prev = self.prev_inputs.get(&id).copied().unwrap_or_default();

            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            player.fire_cooldown = (player.fire_cooldown - dt).max(0.0);
            player.secondary_cooldown = (player.secondary_cooldown - dt).max(0.0);
            player.gassed_left = (player.gassed_left - dt).max(0.0);
            player.dash.cooldown_left = (player.dash.cooldown_left - dt).max(0.0);
            player.invisible_left = (player.invisible_left - dt).max(0.0);
            player.invisible = player.invisible_left > 0.0;

            if !player.is_alive() {
                player.vx = 0.0;
                player.vy = 0.0;
                continue;
            }

            player.aim_angle = frame.aim_angle;
            player.weapon_index = frame.weapon_index.min(7);

            // Movement direction from held keys.
            let mut mx = 0.0f32;
            let mut my = 0.0f32;
            if frame.up {
                my -= 1.0;
            }
            if frame.down {
                my += 1.0;
            }
            if frame.left {
                mx -= 1.0;
            }
            if frame.right {
                mx += 1.0;
            }
            let len = (mx * mx + my * my).sqrt();
            if len > 0.0 {
                mx /= len;
                my /= len;
            }

            // Sprint drains stamina; hitting zero latches exhaustion
            // until 30% recovers.
            let wants_sprint = frame.sprint && len > 0.0;
            if player.exhausted && player.stamina >= player.stamina_max * 0.3 {
                player.exhausted = false;
            }
            player.sprinting = wants_sprint && !player.exhausted && player.stamina > 0.0;
            if player.sprinting {
                player.stamina = (player.stamina - 20.0 * dt).max(0.0);
                if player.stamina <= 0.0 {
                    player.exhausted = true;
                    player.sprinting = false;
                }
            } else {
                player.stamina = (player.stamina + 15.0 * dt).min(player.stamina_max);
            }

            // Tapping the sprint key triggers a dash when off cooldown.
            if frame.sprint && !prev.sprint && len > 0.0 && player.dash.cooldown_left <= 0.0 {
                player.dash.active = true;
                player.dash.time_left = 0.18;
                player.dash.cooldown_left = player.dash_cooldown();
            }
            if player.dash.active {
                player.dash.time_left -= dt;
                if player.dash.time_left <= 0.0 {
                    player.dash.active = false;
                }
            }

            let mut speed = player.move_speed();
            if player.sprinting {
                speed *= 1.5;
            }
            if player.dash.active {
                speed *= 3.2;
            }
            if player.mud_linger > 0.0 {
                speed *= 0.5;
                player.mud_linger = (player.mud_linger - dt).max(0.0);
            }

            let before = (player.x, player.y);
            let moved =
                self.env
                    .move_circle(player.x, player.y, player.radius, mx * speed * dt, my * speed * dt);
            player.x = moved.x;
            player.y = moved.y;
            player.vx = (moved.x - before.0) / dt;
            player.vy = (moved.y - before.1) / dt;
            self.grid.update(&id, BodyKind::Player, player.x, player.y);

            // Weapon fire.
            let can_fight = self.scene == Scene::Level && !self.mission_over;
            if can_fight && frame.mouse_down && player.fire_cooldown <= 0.0 {
                self.fire_weapon(&id, false);
            }
            if can_fight && frame.secondary_requested && !prev.secondary_requested {
                if let Some(p) = self.players.get(&id) {
                    if p.secondary_cooldown <= 0.0 {
                        self.fire_weapon(&id, true);
                    }
                }
            }

            self.prev_inputs.insert(id, frame);
        }
    }

    /// Hitscan shot along the player's aim. Walls block; a sandbag or
    /// barrel in the way soaks the hit; a wallguy's shield deflects
    /// frontal shots.
    fn fire_weapon(&mut self, player_id: &str, secondary: bool) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        let weapon = self.config.weapons.weapon(player.weapon_index).clone();
        let (mul_primary, mul_secondary) =
            self.config.weapons.multiplier(player.weapon_index, player.loot_level);
        let (base_damage, multiplier, cooldown) = if secondary {
            (weapon.secondary_damage, mul_secondary, weapon.secondary_cooldown)
        } else {
            (weapon.damage, mul_primary, weapon.cooldown)
        };
        let damage = base_damage * multiplier * player.damage_multiplier();

        let (px, py) = (player.x, player.y);
        let aim = player.aim_angle;
        let end_x = px + aim.cos() * weapon.range;
        let end_y = py + aim.sin() * weapon.range;

        // Nearest enemy whose body the ray crosses and whose center is
        // not behind a wall.
        let mut best: Option<(String, f32)> = None;
        for enemy in self.enemies.values().filter(|e| e.alive) {
            let (dx, dy) = (end_x - px, end_y - py);
            let len_sq = dx * dx + dy * dy;
            let t = (((enemy.x - px) * dx + (enemy.y - py) * dy) / len_sq).clamp(0.0, 1.0);
            let cx = px + dx * t;
            let cy = py + dy * t;
            let d = ((enemy.x - cx).powi(2) + (enemy.y - cy).powi(2)).sqrt();
            if d > enemy.radius {
                continue;
            }
            let dist = ((enemy.x - px).powi(2) + (enemy.y - py).powi(2)).sqrt();
            if self.env.line_hits_any(px, py, enemy.x, enemy.y) {
                continue;
            }
            if best.as_ref().map(|(_, bd)| dist < *bd).unwrap_or(true) {
                best = Some((enemy.id.clone(), dist));
            }
        }

        self.bus
            .emit(GameEvent::VfxEvent { kind: "playerShot".into(), x: px, y: py });

        if let Some((enemy_id, _)) = best {
            // A breakable hazard between shooter and target soaks it.
            let enemy = &self.enemies[&enemy_id];
            if let Some(hazard_id) =
                self.hazards.line_hits_breakable(&self.env, px, py, enemy.x, enemy.y)
            {
                self.effects.push(Effect::DamageHazard { id: hazard_id, amount: damage });
            } else {
                // Wallguy shields deflect shots into the front cone.
                let deflected = enemy.kind == EnemyKind::Wallguy && {
                    let incoming = (py - enemy.y).atan2(px - enemy.x);
                    let diff = (incoming - enemy.shield_angle + std::f32::consts::PI)
                        .rem_euclid(std::f32::consts::TAU)
                        - std::f32::consts::PI;
                    diff.abs() < 60f32.to_radians()
                };
                if deflected {
                    self.bus.emit(GameEvent::VfxEvent {
                        kind: "shieldDeflect".into(),
                        x: enemy.x,
                        y: enemy.y,
                    });
                } else {
                    self.effects
                        .push(Effect::DamageEnemy { id: enemy_id, amount: damage });
                }
            }
        } else if let Some(hazard_id) =
            self.hazards.line_hits_breakable(&self.env, px, py, end_x, end_y)
        {
            self.effects.push(Effect::DamageHazard { id: hazard_id, amount: damage });
        }

        let player = self.players.get_mut(player_id).unwrap();
        if secondary {
            player.secondary_cooldown = cooldown;
        } else {
            player.fire_cooldown = cooldown;
        }
    }

    // ------------------------------------------------------------------
    // Chests, abilities, timers
    // ------------------------------------------------------------------

    fn tick_chests(&mut self, dt: f32) {
        let mut finished = Vec::new();
        let mut aborted = Vec::new();
        for chest in self.chests.values_mut() {
            if chest.state != ChestState::Opening {
                continue;
            }
            // The opener must stay alive and in range.
            let opener_ok = chest
                .started_by
                .as_ref()
                .and_then(|pid| self.players.get(pid))
                .map(|p| {
                    p.is_alive()
                        && ((p.x - chest.x).powi(2) + (p.y - chest.y).powi(2)).sqrt()
                            <= chest.radius + 60.0
                })
                .unwrap_or(false);
            if !opener_ok {
                aborted.push(chest.id.clone());
                continue;
            }
            chest.time_left -= dt;
            self.chests_dirty = true;
            if chest.time_left <= 0.0 {
                finished.push(chest.id.clone());
            }
        }

        for id in aborted {
            if let Some(chest) = self.chests.get_mut(&id) {
                let opener = chest.started_by.take();
                chest.state = ChestState::Sealed;
                chest.time_left = 0.0;
                self.chests_dirty = true;
                if let Some(pid) = opener {
                    if let Some(p) = self.players.get_mut(&pid) {
                        p.opening_chest = None;
                    }
                }
            }
        }

        for id in finished {
            let Some(chest) = self.chests.get_mut(&id) else {
                continue;
            };
            chest.state = ChestState::Opened;
            chest.time_left = 0.0;
            chest.drops = self.loot.roll_chest_drops(&id, chest.variant);
            let opener = chest.started_by.clone();
            // Drops go straight to the opener's inventory.
            if let Some(pid) = opener {
                let drops = chest.drops.clone();
                if let Some(p) = self.players.get_mut(&pid) {
                    p.opening_chest = None;
                    for item in drops {
                        p.inventory.push(item);
                    }
                    p.recompute_stats();
                    p.loot_level = (p.loot_level + 1).min(6);
                }
            }
            self.chests_dirty = true;
        }
    }

    fn tick_abilities(&mut self, dt: f32) {
        for cd in self.ability_cooldowns.values_mut() {
            *cd = (*cd - dt).max(0.0);
        }
        let mut expired = Vec::new();
        for (id, ability) in self.abilities.iter_mut() {
            ability.ttl -= dt;
            if ability.ttl <= 0.0 {
                expired.push(id.clone());
            }
        }
        for id in expired {
            let Some(ability) = self.abilities.remove(&id) else {
                continue;
            };
            match ability.kind {
                AbilityKind::SandbagWall => {
                    // Reuses the sandbag death path so box indices stay
                    // consistent.
                    self.hazards.damage_sandbag(
                        &ability.hazard_id,
                        f32::MAX,
                        &mut self.env,
                        &mut self.bus,
                    );
                }
                AbilityKind::WireCoil => {
                    if self.hazards.wire.remove(&ability.hazard_id).is_some() {
                        self.hazards.dirty = true;
                        self.bus.emit(GameEvent::HazardRemoved { id: ability.hazard_id });
                    }
                }
            }
        }
    }

    fn tick_extraction(&mut self, dt: f32) {
        let Some(run) = &mut self.extraction else {
            return;
        };

        // Cancel when the artifact lies dropped outside the zone.
        let zone = self.config.extraction;
        let zone_r = self.config.timers.extraction_zone_radius;
        let mut cancel = false;
        let mut any_artifact = false;
        for chest in self.chests.values() {
            match &chest.artifact {
                Some(Artifact::Dropped { x, y }) => {
                    any_artifact = true;
                    let dist = ((x - zone.x).powi(2) + (y - zone.y).powi(2)).sqrt();
                    if dist > zone_r {
                        cancel = true;
                    }
                }
                Some(_) => any_artifact = true,
                None => {}
            }
        }
        if !any_artifact {
            cancel = true;
        }
        if cancel {
            self.extraction = None;
            self.timers_dirty = true;
            self.director.mode = DirectorMode::Hunt;
            self.bus
                .emit(GameEvent::ExtractionTimerUpdate { started: false, time_left: 0.0 });
            return;
        }

        run.time_left -= dt;
        self.timers_dirty = true;

        // Advance the wave schedule across the countdown.
        let elapsed = run.time_total - run.time_left;
        let wave_len = run.time_total / 5.0;
        let wave_idx = ((elapsed / wave_len).floor() as usize).min(4);
        let finished = run.time_left <= 0.0;
        self.spawner.set_phase(HordePhase::Wave(wave_idx));

        if finished {
            let vp = self.config.victory_points;
            for p in self.players.values_mut() {
                p.victory_points += vp;
            }
            self.extraction = None;
            self.mission_over = true;
            self.timers_dirty = true;
            self.bus
                .emit(GameEvent::ExtractionTimerUpdate { started: false, time_left: 0.0 });
            self.bus.emit(GameEvent::MissionAccomplished { victory_points: vp });
            info!(room = %self.id, "mission accomplished");
        }
    }

    fn update_horde_phase(&mut self, artifact_carried: bool) {
        if self.extraction.is_some() {
            return; // wave phase is driven by the extraction countdown
        }
        let phase = if artifact_carried { HordePhase::Guard } else { HordePhase::Search };
        self.spawner.set_phase(phase);
    }

    // ------------------------------------------------------------------
    // DOTs, effects, deaths
    // ------------------------------------------------------------------

    fn tick_entity_dots(&mut self, dt: f32) {
        if self.mission_over {
            return;
        }
        for player in self.players.values_mut() {
            let result = tick_dots(&mut player.dots, dt);
            if result.damage > 0.0 && player.is_alive() {
                player.damage(result.damage);
            }
            if result.expired.iter().any(|k| k == DOT_FIRE) {
                player.burning = has_dot(&player.dots, DOT_FIRE);
                if !player.burning {
                    self.bus
                        .emit(GameEvent::BurnStateChanged { id: player.id.clone(), burning: false });
                }
            }
        }
        for enemy in self.enemies.values_mut() {
            let result = tick_dots(&mut enemy.dots, dt);
            if result.damage > 0.0 && enemy.alive {
                enemy.damage(result.damage);
            }
            if result.expired.iter().any(|k| k == DOT_FIRE) {
                enemy.burning = has_dot(&enemy.dots, DOT_FIRE);
                if !enemy.burning {
                    self.bus
                        .emit(GameEvent::BurnStateChanged { id: enemy.id.clone(), burning: false });
                }
            }
        }
        for troop in self.troops.values_mut() {
            let result = tick_dots(&mut troop.dots, dt);
            if result.damage > 0.0 && troop.is_alive() {
                troop.damage(result.damage);
            }
            if result.expired.iter().any(|k| k == DOT_FIRE) {
                troop.burning = has_dot(&troop.dots, DOT_FIRE);
                if !troop.burning {
                    self.bus
                        .emit(GameEvent::BurnStateChanged { id: troop.id.clone(), burning: false });
                }
            }
        }
        for npc in self.npcs.values_mut() {
            let result = tick_dots(&mut npc.dots, dt);
            if result.damage > 0.0 && npc.is_alive() {
                npc.health = (npc.health - result.damage).max(0.0);
            }
        }
    }

    /// Apply queued effects, resolve deaths, and keep going until the
    /// chains (barrel into boomer into pool) run dry.
    fn resolve_effects_and_deaths(&mut self) {
        for _round in 0..8 {
            let effects = std::mem::take(&mut self.effects);
            let had_effects = !effects.is_empty();
            for effect in effects {
                self.apply_effect(effect);
            }
            let deaths = self.process_deaths();
            if !had_effects && !deaths {
                break;
            }
        }
        if !self.effects.is_empty() {
            // An effect storm this deep means something is feeding back.
            warn!(room = %self.id, pending = self.effects.len(), "effect chain truncated");
            self.effects.clear();
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::DamagePlayer { id, amount } => {
                if self.mission_over {
                    return;
                }
                if let Some(p) = self.players.get_mut(&id) {
                    if p.is_alive() {
                        p.damage(amount);
                        self.bus
                            .emit(GameEvent::DamageText { x: p.x, y: p.y, amount });
                    }
                }
            }
            Effect::DamageEnemy { id, amount } => {
                if let Some(e) = self.enemies.get_mut(&id) {
                    if e.alive {
                        e.damage(amount);
                        self.bus
                            .emit(GameEvent::EnemyHealthUpdate { id: id.clone(), health: e.health });
                        self.bus
                            .emit(GameEvent::DamageText { x: e.x, y: e.y, amount });
                    }
                } else {
                    let fault = SimFault::Desync {
                        detail: format!("damage for unknown enemy {id}"),
                    };
                    debug!(%fault, "dropped");
                }
            }
            Effect::DamageTroop { id, amount } => {
                if let Some(t) = self.troops.get_mut(&id) {
                    if t.is_alive() {
                        t.damage(amount);
                        self.bus
                            .emit(GameEvent::TroopDamaged { id: id.clone(), health: t.health });
                    }
                }
            }
            Effect::DamageNpc { id, amount } => {
                if let Some(n) = self.npcs.get_mut(&id) {
                    n.health = (n.health - amount).max(0.0);
                }
            }
            Effect::DamageHazard { id, amount } => {
                self.hazards.damage_hazard(
                    &id,
                    amount,
                    &mut self.env,
                    &self.players,
                    &self.troops,
                    &mut self.bus,
                    &mut self.effects,
                );
            }
            Effect::DotPlayer { id, key, dps, duration } => {
                if let Some(p) = self.players.get_mut(&id) {
                    if apply_dot(&mut p.dots, &key, dps, duration) && key == DOT_FIRE {
                        p.burning = true;
                        self.bus
                            .emit(GameEvent::BurnStateChanged { id, burning: true });
                    }
                }
            }
            Effect::DotEnemy { id, key, dps, duration } => {
                if let Some(e) = self.enemies.get_mut(&id) {
                    if apply_dot(&mut e.dots, &key, dps, duration) && key == DOT_FIRE {
                        e.burning = true;
                        self.bus
                            .emit(GameEvent::BurnStateChanged { id, burning: true });
                    }
                }
            }
            Effect::DotTroop { id, key, dps, duration } => {
                if let Some(t) = self.troops.get_mut(&id) {
                    if apply_dot(&mut t.dots, &key, dps, duration) && key == DOT_FIRE {
                        t.burning = true;
                        self.bus
                            .emit(GameEvent::BurnStateChanged { id, burning: true });
                    }
                }
            }
            Effect::DotNpc { id, key, dps, duration } => {
                if let Some(n) = self.npcs.get_mut(&id) {
                    apply_dot(&mut n.dots, &key, dps, duration);
                }
            }
            Effect::SpawnPukePool { x, y } => {
                self.hazards.spawn_puke_pool(x, y, &mut self.ids);
            }
        }
    }

    /// Death is one-way and triggers drops exactly once. Returns true
    /// if anything died this round.
    fn process_deaths(&mut self) -> bool {
        let mut any = false;

        let dead_enemies: Vec<String> = self
            .enemies
            .iter()
            .filter(|(_, e)| e.alive && e.health <= 0.0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead_enemies {
            any = true;
            let Some(mut enemy) = self.enemies.remove(&id) else {
                continue;
            };
            enemy.alive = false;
            self.grid.remove(&id);
            self.bus.emit(GameEvent::EnemyDead {
                id: id.clone(),
                kind: enemy.kind,
                x: enemy.x,
                y: enemy.y,
            });
            self.bus.emit(GameEvent::EntityDead { id: id.clone() });

            // Currency drop to the nearest living player.
            if let Some((ducats, markers)) =
                self.loot
                    .roll_enemy_drop(&id, enemy.kind, &self.config.enemies.drop_rates)
            {
                let nearest = self
                    .players
                    .values_mut()
                    .filter(|p| p.is_alive())
                    .min_by(|a, b| {
                        let da = (a.x - enemy.x).powi(2) + (a.y - enemy.y).powi(2);
                        let db = (b.x - enemy.x).powi(2) + (b.y - enemy.y).powi(2);
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    });
                if let Some(p) = nearest {
                    p.ducats += ducats;
                    p.blood_markers += markers;
                }
            }

            match enemy.kind {
                EnemyKind::Boomer => {
                    self.bus.emit(GameEvent::BoomerExploded { id: id.clone(), x: enemy.x, y: enemy.y });
                    self.effects.push(Effect::SpawnPukePool { x: enemy.x, y: enemy.y });
                    for p in self.players.values() {
                        let dist = ((p.x - enemy.x).powi(2) + (p.y - enemy.y).powi(2)).sqrt();
                        if dist <= BOOMER_RADIUS + p.radius {
                            let dmg = linear_falloff(
                                dist,
                                20.0,
                                BOOMER_RADIUS,
                                BOOMER_DMG_INNER,
                                BOOMER_DMG_OUTER,
                            );
                            self.effects
                                .push(Effect::DamagePlayer { id: p.id.clone(), amount: dmg });
                        }
                    }
                    for t in self.troops.values() {
                        let dist = ((t.x - enemy.x).powi(2) + (t.y - enemy.y).powi(2)).sqrt();
                        if dist <= BOOMER_RADIUS + t.radius {
                            let dmg = linear_falloff(
                                dist,
                                20.0,
                                BOOMER_RADIUS,
                                BOOMER_DMG_INNER,
                                BOOMER_DMG_OUTER,
                            );
                            self.effects
                                .push(Effect::DamageTroop { id: t.id.clone(), amount: dmg });
                        }
                    }
                }
                EnemyKind::Bigboy => {
                    // Boss loot lands on the ground.
                    let drops = self.loot.roll_chest_drops(&id, ChestVariant::Gold);
                    if let Some(item) = drops.into_iter().next() {
                        let gid = self.ids.next("ground");
                        self.ground_items.insert(
                            gid.clone(),
                            GroundItem { id: gid, x: enemy.x, y: enemy.y, item },
                        );
                    }
                }
                _ => {}
            }
        }

        let dead_troops: Vec<String> = self
            .troops
            .iter()
            .filter(|(_, t)| t.health <= 0.0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead_troops {
            any = true;
            let Some(troop) = self.troops.remove(&id) else {
                continue;
            };
            self.grid.remove(&id);
            self.troop_ctl.on_troop_death(&troop, &self.hazards);
            self.bus
                .emit(GameEvent::TroopDeath { id: id.clone(), x: troop.x, y: troop.y });
            self.bus.emit(GameEvent::EntityDead { id });
        }

        // A dead carrier drops the artifact where they fell.
        let dead_players: Vec<(String, f32, f32)> = self
            .players
            .values()
            .filter(|p| !p.is_alive())
            .map(|p| (p.id.clone(), p.x, p.y))
            .collect();
        for (pid, x, y) in dead_players {
            for chest in self.chests.values_mut() {
                if let Some(Artifact::Carried { by }) = &chest.artifact {
                    if *by == pid {
                        chest.artifact = Some(Artifact::Dropped { x, y });
                        self.chests_dirty = true;
                    }
                }
            }
        }

        any
    }

    // ------------------------------------------------------------------
    // Scene transitions
    // ------------------------------------------------------------------

    fn spawn_position(&mut self) -> (f32, f32) {
        let spawn = self.config.spawn;
        (
            spawn.x + self.spawn_rng.range_f32(-spawn.radius * 0.3, spawn.radius * 0.3),
            spawn.y + self.spawn_rng.range_f32(-spawn.radius, spawn.radius),
        )
    }

    pub fn start_level(&mut self, level_type: LevelType) {
        info!(room = %self.id, ?level_type, seed = self.world_seed, "starting level");
        self.config = GameModeConfig::for_level(level_type);
        self.level_type = level_type;
        self.scene = Scene::Level;
        self.scene_changed = true;
        self.mission_over = false;
        self.ground_items.clear();
        self.enemies.clear();
        self.troops.clear();
        self.npcs.clear();
        self.chests.clear();
        self.abilities.clear();
        self.ability_cooldowns.clear();
        self.grid.clear();

        self.build_environment();
        let mut layout_rng = GameRng::stream(self.world_seed, "hazards");
        let mut hazards = std::mem::take(&mut self.hazards);
        hazards.clear(&mut self.env);
        hazards.spawn_layout(
            &self.config.hazards,
            &self.config.spawn,
            &mut self.env,
            &mut self.ids,
            &mut layout_rng,
        );
        self.hazards = hazards;

        self.spawn_chests();
        self.spawn_npcs();
        self.spawn_emplacements();

        self.troop_ctl
            .setup_level(&self.config.troops.clone(), &self.config.zone_spawning.zones.clone(), &mut self.ids);
        self.spawner.reset_level();
        self.loot.roll_shop();

        // Reposition everyone at the mode spawn.
        let player_ids: Vec<String> = self.players.keys().cloned().collect();
        for pid in player_ids {
            let (x, y) = self.spawn_position();
            if let Some(p) = self.players.get_mut(&pid) {
                p.x = x;
                p.y = y;
                p.health = p.health_max;
                p.stamina = p.stamina_max;
                p.dots.clear();
                p.burning = false;
            }
            self.grid.insert(&pid, BodyKind::Player, x, y);
            if self.debug_chests {
                let cid = self.ids.next("chest");
                let mut chest = Chest::new(cid.clone(), ChestVariant::Debug, x + 60.0, y);
                chest.drops = self.loot.roll_chest_drops(&cid, ChestVariant::Debug);
                self.chests.insert(cid, chest);
            }
        }

        if self.config.ambient_enabled {
            let count = self.config.enemies.total_count;
            let spawned = self.spawner.spawn_ambient(
                count,
                &self.players,
                &mut self.enemies,
                &self.env,
                &mut self.grid,
                &mut self.ids,
                &self.config.enemies,
            );
            debug!(room = %self.id, spawned, requested = count, "ambient population");
        }

        self.chests_dirty = true;
        self.hazards.dirty = true;
    }

    pub fn return_to_lobby(&mut self) {
        info!(room = %self.id, "returning to lobby");
        self.scene = Scene::Lobby;
        self.scene_changed = true;
        self.mission_over = false;
        self.extraction = None;
        self.ready_timer = None;
        self.enemies.clear();
        self.troops.clear();
        self.npcs.clear();
        self.chests.clear();
        self.abilities.clear();
        self.ability_cooldowns.clear();
        self.troop_ctl.clear();
        self.spawner.drop_scheduled();
        let mut hazards = std::mem::take(&mut self.hazards);
        hazards.clear(&mut self.env);
        self.hazards = hazards;
        self.env = Environment::with_boundary(400.0);
        self.grid.clear();
        for (pid, p) in self.players.iter_mut() {
            p.x = 0.0;
            p.y = 0.0;
            p.dots.clear();
            p.burning = false;
            p.health = p.health_max;
            self.grid.insert(pid, BodyKind::Player, 0.0, 0.0);
        }
        self.chests_dirty = true;
        self.timers_dirty = true;
    }

    /// Seeded level geometry: scattered ruins, gap carving, defensive
    /// walls, and the mode's trench lines.
    fn build_environment(&mut self) {
        let half = self.config.boundary / 2.0;
        let mut env = Environment::with_boundary(half);
        env.spawn_safe = Some((self.config.spawn.x, self.config.spawn.y, 800.0));

        // Scattered ruins through no-man's-land.
        let mut rng = GameRng::stream(self.world_seed, "terrain");
        for _ in 0..120 {
            let x = rng.range_f32(-9000.0, 9500.0);
            let y = rng.range_f32(-9000.0, 9000.0);
            let w = rng.range_f32(60.0, 260.0);
            let h = rng.range_f32(60.0, 260.0);
            let near_spawn = ((x - self.config.spawn.x).powi(2)
                + (y - self.config.spawn.y).powi(2))
            .sqrt()
                < 1200.0;
            if !near_spawn {
                env.add_obstacle(Aabb::from_center(x, y, w, h));
            }
        }

        // Carve doorways, then place the defensive walls behind them.
        env.clear_gap_areas(&self.config.gap_areas);
        for (x, y, w, h, angle) in &self.config.defensive_walls {
            env.add_oriented_box(OrientedBox::new(*x, *y, *w, *h, *angle, BoxTag::Wall));
        }

        if self.level_type == LevelType::Trenchraid {
            for seg in trench_wall_cache() {
                env.add_oriented_box(seg.clone());
            }
        }

        self.env = env;
    }

    fn spawn_chests(&mut self) {
        let loot_cfg = self.config.loot.clone();
        let mut rng = GameRng::stream(self.world_seed, "chests");

        // The gold chest holds the artifact.
        let gold_id = self.ids.next("chest");
        let gold = Chest::new(gold_id.clone(), ChestVariant::Gold, loot_cfg.gold_chest.0, loot_cfg.gold_chest.1);
        self.chests.insert(gold_id, gold);

        // Start-gear chest by the spawn.
        let sg_id = self.ids.next("chest");
        let sg = Chest::new(
            sg_id.clone(),
            ChestVariant::StartGear,
            self.config.spawn.x + 120.0,
            self.config.spawn.y,
        );
        self.chests.insert(sg_id, sg);

        for _ in 0..loot_cfg.brown_chest_count {
            let mut placed = None;
            for _ in 0..20 {
                let x = rng.range_f32(loot_cfg.brown_chest_band.0, loot_cfg.brown_chest_band.1);
                let y = rng.range_f32(-8500.0, 8500.0);
                if !self.env.circle_hits_any(x, y, loot_cfg.clearance) {
                    placed = Some((x, y));
                    break;
                }
            }
            if let Some((x, y)) = placed {
                let id = self.ids.next("chest");
                self.chests
                    .insert(id.clone(), Chest::new(id, ChestVariant::Brown, x, y));
            }
        }
    }

    fn spawn_npcs(&mut self) {
        let types = self.config.npcs.types.clone();
        let mut rng = GameRng::stream(self.world_seed, "npcs");
        for t in types {
            for _ in 0..t.count {
                let x = rng.range_f32(t.band.0, t.band.1);
                let y = rng.range_f32(-800.0, 800.0);
                let id = self.ids.next("npc");
                self.grid.insert(&id, BodyKind::Npc, x, y);
                self.npcs
                    .insert(id.clone(), Npc::new(id, t.kind.clone(), x, y, t.health));
            }
        }
    }

    /// Defensive turrets and artillery guns join the enemies table on
    /// the friendly faction.
    fn spawn_emplacements(&mut self) {
        let spawn = self.config.spawn;
        for (dx, dy, kind) in [
            (600.0, -700.0, EnemyKind::Turret),
            (600.0, 700.0, EnemyKind::Turret),
            (200.0, 0.0, EnemyKind::Artillery),
        ] {
            let id = self.ids.next("enemy");
            let e = Enemy::new(id.clone(), kind, spawn.x + dx, spawn.y + dy);
            self.grid.insert(&id, BodyKind::Enemy, e.x, e.y);
            self.enemies.insert(id, e);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Player currently carrying any gold chest's artifact.
    pub fn artifact_carrier(&self) -> Option<String> {
        self.chests.values().find_map(|c| match &c.artifact {
            Some(Artifact::Carried { by }) => Some(by.clone()),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Sets the room-level director mode (hunt, scatter, panic or
    /// ambush).
    pub fn set_director_mode(&mut self, mode: DirectorMode) {
        self.director.mode = mode;
    }
}

/// Trenchraid's trench wall lines; computed once and shared by every
/// room since the layout is mode-fixed, not seed-dependent.
fn trench_wall_cache() -> &'static [OrientedBox] {
    static CACHE: OnceLock<Vec<OrientedBox>> = OnceLock::new();
    CACHE.get_or_init(|| {
        let mut walls = Vec::new();
        // Three north-south trench lines with periodic gaps.
        for (i, line_x) in [-4000.0f32, 1000.0, 6000.0].into_iter().enumerate() {
            let mut y = -9000.0;
            while y < 9000.0 {
                let len = 1200.0;
                walls.push(OrientedBox::new(
                    line_x + (i as f32) * 40.0,
                    y + len / 2.0,
                    60.0,
                    len,
                    0.0,
                    BoxTag::Trench,
                ));
                y += len + 500.0; // gap between segments
            }
        }
        walls
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_room() -> Room {
        let mut room = Room::with_config("room_1", 4242, GameModeConfig::test());
        room.handle(ClientCommand::Join { player_id: "p1".into(), name: "Able".into() })
            .unwrap();
        room.handle(ClientCommand::Join { player_id: "p2".into(), name: "Baker".into() })
            .unwrap();
        room
    }

    fn run(room: &mut Room, seconds: f32) {
        let steps = (seconds / TICK_DT).round() as usize;
        for _ in 0..steps {
            room.tick(TICK_DT);
        }
    }

    /// S1: ready timer happy path.
    #[test]
    fn test_ready_timer_starts_level() {
        let mut room = test_room();
        room.handle(ClientCommand::StartReadyTimer {
            player_id: "p1".into(),
            level_type: LevelType::Trenchraid,
        })
        .unwrap();
        assert!(room.ready_timer.is_some());

        run(&mut room, 10.1);
        assert_eq!(room.scene, Scene::Level);
        assert_eq!(room.level_type, LevelType::Trenchraid);
        assert_eq!(room.config.boundary, 23_000.0);

        for p in room.players.values() {
            assert!((p.x - -11_000.0).abs() <= 300.0 * 0.3 + 1.0, "x = {}", p.x);
            assert!(p.y.abs() <= 300.0 + 1.0, "y = {}", p.y);
        }
        // Trench walls appear in the world.
        assert!(room
            .env
            .oriented_boxes
            .iter()
            .any(|b| b.tag == BoxTag::Trench));
    }

    #[test]
    fn test_ready_timer_requires_lobby_and_cancels() {
        let mut room = test_room();
        room.handle(ClientCommand::StartReadyTimer {
            player_id: "p1".into(),
            level_type: LevelType::Test,
        })
        .unwrap();
        room.handle(ClientCommand::CancelReadyTimer { player_id: "p2".into() })
            .unwrap();
        assert!(room.ready_timer.is_none());

        room.start_level(LevelType::Test);
        let err = room
            .handle(ClientCommand::StartReadyTimer {
                player_id: "p1".into(),
                level_type: LevelType::Test,
            })
            .unwrap_err();
        assert!(err.reason.contains("lobby"));
    }

    #[test]
    fn test_scene_transition_clears_level_entities() {
        let mut room = test_room();
        room.start_level(LevelType::Test);
        assert!(!room.chests.is_empty());
        room.mission_over = true;
        room.handle(ClientCommand::ReturnToLobby { player_id: "p1".into() })
            .unwrap();
        assert_eq!(room.scene, Scene::Lobby);
        assert!(room.enemies.is_empty());
        assert!(room.troops.is_empty());
        assert!(room.chests.is_empty());
        assert!(room.hazards.sandbags.is_empty());
        // Seed persists across the reset.
        assert_eq!(room.world_seed, 4242);
    }

    #[test]
    fn test_chest_open_cancel_restores_state() {
        let mut room = test_room();
        room.start_level(LevelType::Test);
        let chest_id = room
            .chests
            .values()
            .find(|c| c.variant == ChestVariant::Brown)
            .map(|c| c.id.clone())
            .unwrap();
        // Teleport the opener next to the chest.
        let (cx, cy) = {
            let c = &room.chests[&chest_id];
            (c.x, c.y)
        };
        room.players.get_mut("p1").unwrap().x = cx + 10.0;
        room.players.get_mut("p1").unwrap().y = cy;

        room.handle(ClientCommand::OpenChest { player_id: "p1".into(), chest_id: chest_id.clone() })
            .unwrap();
        run(&mut room, 1.0);
        assert_eq!(room.chests[&chest_id].state, ChestState::Opening);

        room.handle(ClientCommand::CancelOpenChest { player_id: "p1".into() })
            .unwrap();
        let chest = &room.chests[&chest_id];
        assert_eq!(chest.state, ChestState::Sealed);
        assert_eq!(chest.time_left, 0.0);
        assert!(chest.drops.is_empty());
    }

    #[test]
    fn test_chest_opens_and_grants_drops() {
        let mut room = test_room();
        room.start_level(LevelType::Test);
        let chest_id = room
            .chests
            .values()
            .find(|c| c.variant == ChestVariant::Brown)
            .map(|c| c.id.clone())
            .unwrap();
        let (cx, cy) = {
            let c = &room.chests[&chest_id];
            (c.x, c.y)
        };
        room.players.get_mut("p1").unwrap().x = cx + 10.0;
        room.players.get_mut("p1").unwrap().y = cy;

        room.handle(ClientCommand::OpenChest { player_id: "p1".into(), chest_id: chest_id.clone() })
            .unwrap();
        run(&mut room, 3.2);
        assert_eq!(room.chests[&chest_id].state, ChestState::Opened);
        assert!(!room.players["p1"].inventory.is_empty());
        assert_eq!(room.players["p1"].loot_level, 1);
    }

    /// S3: extraction cancels when the artifact drops outside the zone.
    #[test]
    fn test_extraction_cancels_on_dropped_artifact() {
        let mut room = test_room();
        room.start_level(LevelType::Test);

        // Open the gold chest and carry the artifact into the zone.
        let gold_id = room
            .chests
            .values()
            .find(|c| c.variant == ChestVariant::Gold)
            .map(|c| c.id.clone())
            .unwrap();
        {
            let chest = room.chests.get_mut(&gold_id).unwrap();
            chest.state = ChestState::Opened;
            chest.artifact = Some(Artifact::Carried { by: "p1".into() });
        }
        let zone = room.config.extraction;
        {
            let p = room.players.get_mut("p1").unwrap();
            p.x = zone.x;
            p.y = zone.y;
        }
        room.handle(ClientCommand::RequestExtraction {
            player_id: "p1".into(),
            kind: ExtractionKind::Normal,
        })
        .unwrap();
        assert!(room.extraction.is_some());

        // Walk out and drop it.
        {
            let p = room.players.get_mut("p1").unwrap();
            p.x = zone.x + 2000.0;
        }
        room.handle(ClientCommand::DropArtifact { player_id: "p1".into() }).unwrap();
        room.tick(TICK_DT);
        assert!(room.extraction.is_none());
        assert!(room.bus.events().iter().any(|e| matches!(
            e,
            GameEvent::ExtractionTimerUpdate { started: false, time_left } if *time_left == 0.0
        )));
    }

    #[test]
    fn test_extraction_completion_awards_victory_points() {
        let mut room = test_room();
        room.start_level(LevelType::Test);
        let gold_id = room
            .chests
            .values()
            .find(|c| c.variant == ChestVariant::Gold)
            .map(|c| c.id.clone())
            .unwrap();
        {
            let chest = room.chests.get_mut(&gold_id).unwrap();
            chest.state = ChestState::Opened;
            chest.artifact = Some(Artifact::Carried { by: "p1".into() });
        }
        let zone = room.config.extraction;
        {
            let p = room.players.get_mut("p1").unwrap();
            p.x = zone.x;
            p.y = zone.y;
        }
        room.handle(ClientCommand::RequestExtraction {
            player_id: "p1".into(),
            kind: ExtractionKind::Normal,
        })
        .unwrap();

        let extraction_wait = room.config.timers.extraction_seconds + 1.0;
        run(&mut room, extraction_wait);
        assert!(room.mission_over);
        assert_eq!(room.players["p1"].victory_points, room.config.victory_points);
        assert_eq!(room.players["p2"].victory_points, room.config.victory_points);
    }

    /// S4: boomer death chain.
    #[test]
    fn test_boomer_death_chain() {
        let mut room = test_room();
        room.start_level(LevelType::Test);
        {
            let p = room.players.get_mut("p1").unwrap();
            p.x = 110.0;
            p.y = 100.0;
        }
        let id = room.ids.next("enemy");
        let mut boomer = Enemy::new(id.clone(), EnemyKind::Boomer, 100.0, 100.0);
        boomer.health = 1.0;
        room.grid.insert(&id, BodyKind::Enemy, 100.0, 100.0);
        room.enemies.insert(id.clone(), boomer);

        let hp_before = room.players["p1"].health;
        room.effects.push(Effect::DamageEnemy { id: id.clone(), amount: 10.0 });
        room.tick(TICK_DT);

        assert!(room
            .bus
            .events()
            .iter()
            .any(|e| matches!(e, GameEvent::BoomerExploded { x, y, .. } if *x == 100.0 && *y == 100.0))
            || room.players["p1"].health < hp_before);
        assert!(!room.enemies.contains_key(&id));
        assert_eq!(room.hazards.puke.len(), 1);
        let pool = room.hazards.puke.values().next().unwrap();
        assert_eq!(pool.r, 100.0);
        assert!((pool.ttl - 12.0).abs() < 0.1);
        // ~10 units from the blast center: close to full damage.
        let taken = hp_before - room.players["p1"].health;
        assert!(taken > 40.0 && taken <= 45.0, "boomer damage {taken}");
    }

    /// S6: purchase with insufficient funds.
    #[test]
    fn test_purchase_insufficient_funds() {
        let mut room = test_room();
        room.players.get_mut("p1").unwrap().ducats = 50;
        let err = room
            .handle(ClientCommand::PurchaseShopItem { player_id: "p1".into(), item_index: 3 })
            .unwrap_err();
        assert_eq!(err.reason, "Insufficient ducats");
        assert_eq!(room.players["p1"].ducats, 50);
        assert!(!room.loot.shop[3].sold);
        assert!(room.bus.events().iter().any(|e| matches!(
            e,
            GameEvent::PurchaseResult { success: false, reason: Some(r), .. }
                if r == "Insufficient ducats"
        )));
    }

    #[test]
    fn test_ability_cap_and_cooldown() {
        let mut room = test_room();
        room.start_level(LevelType::Test);
        let (px, py) = {
            let p = &room.players["p1"];
            (p.x, p.y)
        };

        room.handle(ClientCommand::PlaceAbility {
            player_id: "p1".into(),
            kind: AbilityKind::WireCoil,
            x: px + 100.0,
            y: py,
            angle: 0.0,
            progression: 0,
        })
        .unwrap();

        // Cooldown rejects an immediate second placement.
        let err = room
            .handle(ClientCommand::PlaceAbility {
                player_id: "p1".into(),
                kind: AbilityKind::WireCoil,
                x: px + 200.0,
                y: py,
                angle: 0.0,
                progression: 0,
            })
            .unwrap_err();
        assert!(err.reason.contains("cooldown"));
        assert_eq!(room.hazards.wire.len(), 1);
    }

    #[test]
    fn test_player_sprint_exhaustion_latch() {
        let mut room = test_room();
        let frame = InputFrame {
            seq: 1,
            right: true,
            sprint: true,
            ..Default::default()
        };
        room.handle(ClientCommand::Input { player_id: "p1".into(), frame }).unwrap();

        // Sprint until the stamina runs dry (100 / 20 per sec = 5s).
        run(&mut room, 6.0);
        let p = &room.players["p1"];
        assert!(p.exhausted);
        assert!(!p.sprinting);

        // The latch holds below 30% recovery even with sprint held.
        run(&mut room, 0.5);
        assert!(room.players["p1"].exhausted);

        // Release sprint and recover past the latch threshold.
        room.handle(ClientCommand::Input {
            player_id: "p1".into(),
            frame: InputFrame { seq: 2, right: true, sprint: false, ..Default::default() },
        })
        .unwrap();
        run(&mut room, 2.5);
        assert!(!room.players["p1"].exhausted);
    }

    #[test]
    fn test_disconnect_removes_player_at_end_of_tick() {
        let mut room = test_room();
        room.handle(ClientCommand::Leave { player_id: "p2".into() }).unwrap();
        assert!(room.players.contains_key("p2"));
        room.tick(TICK_DT);
        assert!(!room.players.contains_key("p2"));
        assert!(!room.grid.contains("p2"));
    }

    #[test]
    fn test_determinism_same_seed_same_transcript() {
        let build = || {
            let mut room = Room::with_config("det", 777, GameModeConfig::test());
            room.handle(ClientCommand::Join { player_id: "p1".into(), name: "A".into() })
                .unwrap();
            room.start_level(LevelType::Test);
            room.handle(ClientCommand::Input {
                player_id: "p1".into(),
                frame: InputFrame { seq: 1, right: true, aim_angle: 0.3, ..Default::default() },
            })
            .unwrap();
            room
        };
        let mut a = build();
        let mut b = build();
        for _ in 0..300 {
            a.tick(TICK_DT);
            b.tick(TICK_DT);
        }
        let snap = |r: &Room| {
            let mut s = String::new();
            for (id, e) in &r.enemies {
                s.push_str(&format!("{id}:{:.3},{:.3},{:.1};", e.x, e.y, e.health));
            }
            for (id, t) in &r.troops {
                s.push_str(&format!("{id}:{:.3},{:.3},{:.1};", t.x, t.y, t.health));
            }
            let p = &r.players["p1"];
            s.push_str(&format!("p:{:.3},{:.3}", p.x, p.y));
            s
        };
        assert_eq!(snap(&a), snap(&b));
    }

    #[test]
    fn test_live_entities_never_penetrate_geometry() {
        let mut room = test_room();
        room.start_level(LevelType::Trenchraid);
        room.handle(ClientCommand::Input {
            player_id: "p1".into(),
            frame: InputFrame { seq: 1, right: true, sprint: true, ..Default::default() },
        })
        .unwrap();
        run(&mut room, 3.0);

        for p in room.players.values() {
            assert!(!room.env.circle_hits_any(p.x, p.y, p.radius), "player in wall");
        }
        for t in room.troops.values() {
            assert!(!room.env.circle_hits_any(t.x, t.y, t.radius), "troop in wall");
        }
    }
}
