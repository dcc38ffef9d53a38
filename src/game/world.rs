//! The live world.
//!
//! [`GameWorld`] is assembled once by the server from configuration and
//! content, then shared behind an `Arc`. It owns every registry and the
//! timer queue, and exposes the notification helpers that the operations in
//! `movement`, `combat` and `npc` build on. Nothing in here is async: every
//! operation takes short per-entity locks and returns.
//!
//! Lock order, for anything that holds more than one:
//! entity (pairs in id order) -> faction / shop / ground cell -> registry
//! index -> timer queue. The router and the persistence sender keep their
//! own locks and are safe to call from anywhere.

use log::{debug, info, warn};
use rand::thread_rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::game::combatant::{CombatantState, ACCURACY};
use crate::game::content::{Content, LootTable, NpcTemplate};
use crate::game::cooldown::{ticks_to_seconds, CooldownEngine};
use crate::game::entity::{spawn_npc, Entity, PlayerData, Role};
use crate::game::errors::{GameError, GameResult};
use crate::game::faction::{Faction, FactionRegistry};
use crate::game::ground::GroundItems;
use crate::game::item::ItemCatalog;
use crate::game::map::MapRegistry;
use crate::game::registry::{lock, EntityHandle, EntityRegistry};
use crate::game::scheduler::{TimerKey, TimerKind, TimerQueue, TimerStats};
use crate::game::shop::ShopRegistry;
use crate::game::types::{EntityKind, EntityRef, Location, GAME_ROOM};
use crate::server::messages;
use crate::server::router::{Envelope, Router};
use crate::storage::{CharacterRecord, PersistJob, ShopStock};

pub struct GameWorld {
    pub config: Arc<Config>,
    pub maps: MapRegistry,
    pub catalog: ItemCatalog,
    pub npc_templates: HashMap<String, NpcTemplate>,
    pub loot_tables: HashMap<String, LootTable>,
    pub entities: EntityRegistry,
    pub shops: ShopRegistry,
    pub factions: FactionRegistry,
    pub ground: GroundItems,
    pub cooldowns: CooldownEngine,
    pub router: Arc<Router>,
    timers: Mutex<TimerQueue>,
    persist: Mutex<Option<mpsc::UnboundedSender<PersistJob>>>,
    start_map: String,
    next_npc: AtomicU64,
    day: AtomicU64,
}

impl std::fmt::Debug for GameWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameWorld")
            .field("maps", &self.maps.len())
            .field("entities", &self.entities.len())
            .field("factions", &self.factions.len())
            .finish_non_exhaustive()
    }
}

impl GameWorld {
    pub fn new(config: Arc<Config>, content: Content, router: Arc<Router>) -> Self {
        let npc_templates = content.npc_templates();
        let loot_tables = content.loot_table_map();
        let start_map = content
            .maps
            .first()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        let cooldowns = CooldownEngine::new(
            config.cooldowns.actions.clone(),
            config.cooldowns.default_seconds,
        );
        Self {
            maps: MapRegistry::new(content.maps),
            catalog: ItemCatalog::new(content.items),
            shops: ShopRegistry::new(content.shops),
            npc_templates,
            loot_tables,
            entities: EntityRegistry::new(),
            factions: FactionRegistry::default(),
            ground: GroundItems::new(),
            cooldowns,
            router,
            config,
            timers: Mutex::new(TimerQueue::new()),
            persist: Mutex::new(None),
            start_map,
            next_npc: AtomicU64::new(1),
            day: AtomicU64::new(0),
        }
    }

    /// Installs the factions loaded from the store.
    pub fn with_factions(mut self, factions: Vec<Faction>) -> Self {
        self.factions = FactionRegistry::new(factions);
        self
    }

    /// Routes persistence jobs produced by the world to `tx`.
    pub fn with_persistence(mut self, tx: mpsc::UnboundedSender<PersistJob>) -> Self {
        self.persist = Mutex::new(Some(tx));
        self
    }

    /// Overwrites a shop's stock with a persisted snapshot.
    pub fn restore_shop_state(&self, shop_id: &str, stock: &ShopStock) {
        if let Some(shop) = self.shops.get(shop_id) {
            shop.lock()
                .unwrap_or_else(|e| e.into_inner())
                .apply_stock(stock);
        }
    }

    pub fn handle(&self, id: &str) -> GameResult<EntityHandle> {
        self.entities.get(id).ok_or(GameError::Stale)
    }

    /// Respawn point of the first map in content; where new characters and
    /// characters stranded on a removed map appear.
    pub fn start_location(&self) -> Location {
        self.maps
            .get(&self.start_map)
            .map(|m| m.respawn_location())
            .unwrap_or_else(|| Location::new(self.start_map.clone(), 0, 0))
    }

    pub fn day(&self) -> u64 {
        self.day.load(Ordering::Relaxed)
    }

    // ---- timers -------------------------------------------------------

    fn timers(&self) -> MutexGuard<'_, TimerQueue> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schedule(&self, owner: &str, kind: TimerKind, seconds: f64) {
        let delay = Duration::from_secs_f64(seconds.max(0.0));
        self.timers()
            .schedule(TimerKey::new(owner, kind), delay, Instant::now());
    }

    pub fn cancel_timer(&self, owner: &str, kind: TimerKind) -> bool {
        self.timers().cancel(&TimerKey::new(owner, kind))
    }

    pub fn cancel_timers(&self, owner: &str) -> usize {
        self.timers().cancel_owner(owner)
    }

    pub fn timer_pending(&self, owner: &str, kind: TimerKind) -> bool {
        self.timers().is_pending(&TimerKey::new(owner, kind))
    }

    pub fn due_timers(&self, now: Instant) -> Vec<TimerKey> {
        self.timers().due(now)
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.timers().stats()
    }

    /// Runs one fired timer. Called from the dispatcher shard owning
    /// `key.owner`.
    pub fn run_timer(&self, key: &TimerKey) {
        debug!("timer {:?} for {}", key.kind, key.owner);
        match key.kind {
            TimerKind::NpcMove => self.npc_move_tick(&key.owner),
            TimerKind::NpcAttack => self.npc_attack_tick(&key.owner),
            TimerKind::NpcRespawn => self.respawn_npc(&key.owner),
            TimerKind::Eviction => {
                if let Some(job) = self.evict(&key.owner) {
                    self.persist(job);
                }
            }
        }
    }

    // ---- cooldowns ----------------------------------------------------

    /// Fails with the remaining time when `action` is still cooling down.
    pub fn check_cooldown(&self, state: &CombatantState, action: &str) -> GameResult<()> {
        let left = state.cooldowns.ticks_left(action);
        if left > 0 {
            return Err(GameError::CooldownActive {
                action: action.to_string(),
                seconds: ticks_to_seconds(left),
            });
        }
        Ok(())
    }

    pub fn start_cooldown(&self, state: &mut CombatantState, action: &str) {
        self.cooldowns.add(&mut state.cooldowns, action, None, true);
    }

    /// One game tick for every managed entity. Returns how many expired
    /// cooldowns were swept when `sweep` is set.
    pub fn tick_cooldowns(&self, sweep: bool) -> usize {
        let mut swept = 0;
        for (_, handle) in self.entities.handles() {
            let mut entity = lock(&handle);
            entity.state.cooldowns.tick();
            if sweep {
                swept += entity.state.cooldowns.cleanup();
            }
        }
        swept
    }

    // ---- notifications ------------------------------------------------

    /// Sends to the player owning `entity`. NPCs have no connection.
    pub fn send_to_entity(&self, entity: &Entity, envelope: Envelope) {
        if let Some(player) = entity.player() {
            self.router.to_user(&player.user_id, envelope);
        }
    }

    /// Like [`send_to_entity`](Self::send_to_entity) without taking the
    /// entity lock.
    pub fn send_to_id(&self, id: &str, envelope: Envelope) {
        if let Some(user) = self.entities.user_of(id) {
            self.router.to_user(&user, envelope);
        }
    }

    pub fn feed(&self, entity: &Entity, text: impl Into<String>) {
        self.send_to_entity(entity, messages::feed(text));
    }

    pub fn to_cell(&self, location: &Location, envelope: Envelope) {
        self.router.to_room(&location.room_key(), envelope);
    }

    pub fn location_snapshot(&self, location: &Location, viewer: &str) -> Envelope {
        let occupants: Vec<EntityRef> = self
            .entities
            .visible_in_cell(location)
            .into_iter()
            .filter(|r| r.id != viewer)
            .collect();
        let ground = self.ground.list(location);
        messages::location(location, &occupants, &ground)
    }

    pub fn broadcast_ground(&self, location: &Location) {
        let items = self.ground.list(location);
        self.to_cell(location, messages::ground_items(location, &items));
    }

    /// Joins the entity's cell room and tells the cell it arrived.
    pub(crate) fn announce_arrival(&self, entity: &Entity) {
        let location = &entity.state.location;
        let room = location.room_key();
        let connection = entity.connection().map(String::as_str);
        if let Some(conn) = connection {
            self.router.join(conn, &room);
        }
        if !entity.state.hidden {
            self.router
                .to_room_except(&room, connection, messages::joined(&entity.state.entity_ref()));
        }
        if connection.is_some() {
            self.send_to_entity(entity, self.location_snapshot(location, entity.id()));
        }
    }

    /// Leaves the `from` cell room and tells the cell the entity is gone.
    pub(crate) fn announce_departure(&self, entity: &Entity, from: &Location) {
        let room = from.room_key();
        if let Some(conn) = entity.connection() {
            self.router.leave(conn, &room);
        }
        if !entity.state.hidden {
            self.router.to_room(&room, messages::left(&entity.state.entity_ref()));
        }
    }

    /// Moves a locked entity to `to`, keeping the cell index and the rooms
    /// in step. Callers must have released the entity's own aim first.
    pub(crate) fn place(&self, entity: &mut Entity, to: Location) {
        let from = entity.state.location.clone();
        self.announce_departure(entity, &from);
        entity.state.location = to.clone();
        self.entities.relocate(entity.id(), &to);
        self.announce_arrival(entity);
    }

    // ---- persistence --------------------------------------------------

    pub fn persist(&self, job: PersistJob) {
        let guard = self.persist.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return;
        };
        let what = job.describe();
        if tx.send(job).is_err() {
            warn!("persistence queue closed, dropping {}", what);
        }
    }

    /// Drops the queue's sender so the worker finishes what is queued and
    /// exits. Jobs produced afterwards are discarded.
    pub fn close_persistence(&self) -> bool {
        self.persist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }

    pub fn character_job(entity: &Entity) -> Option<PersistJob> {
        CharacterRecord::from_entity(entity).map(|(record, items)| PersistJob::Character { record, items })
    }

    /// Jobs saving every managed character, faction and shop.
    pub fn snapshot_all(&self) -> Vec<PersistJob> {
        let mut jobs: Vec<PersistJob> = self
            .entities
            .handles()
            .iter()
            .filter_map(|(_, handle)| Self::character_job(&lock(handle)))
            .collect();
        jobs.extend(self.factions.all().into_iter().map(PersistJob::Faction));
        jobs.extend(self.shop_jobs());
        jobs
    }

    fn shop_jobs(&self) -> Vec<PersistJob> {
        self.shops
            .ids()
            .into_iter()
            .filter_map(|id| {
                let shop = self.shops.get(&id)?;
                let stock = shop.lock().unwrap_or_else(|e| e.into_inner()).stock_snapshot();
                Some(PersistJob::ShopState { shop_id: id, stock })
            })
            .collect()
    }

    // ---- lifecycle ----------------------------------------------------

    /// Resupplies every shop and announces the new day. Returns the day
    /// number and the shop stock to persist.
    pub fn new_day(&self) -> (u64, Vec<PersistJob>) {
        let restocked = self.shops.resupply_all();
        let day = self.day.fetch_add(1, Ordering::Relaxed) + 1;
        info!("day {} begins, {} shop entries restocked", day, restocked);
        self.router.to_room(GAME_ROOM, messages::new_day(day));
        (day, self.shop_jobs())
    }

    fn next_npc_id(&self) -> String {
        format!("npc-{}", self.next_npc.fetch_add(1, Ordering::Relaxed))
    }

    /// Populates every map from its spawn descriptors.
    pub fn spawn_npcs(&self) -> usize {
        let mut rng = thread_rng();
        let mut spawned = Vec::new();
        for map in self.maps.iter() {
            for spawn in &map.npc_spawns {
                let Some(template) = self.npc_templates.get(&spawn.template_id) else {
                    warn!("map {} spawns unknown npc {}", map.id, spawn.template_id);
                    continue;
                };
                for _ in 0..spawn.count {
                    let location = match spawn.location {
                        Some(p) => Location::new(map.id.clone(), p.x, p.y),
                        None => map.random_location(&mut rng),
                    };
                    let id = self.next_npc_id();
                    let npc = spawn_npc(&id, template, &self.catalog, location, spawn.location, &mut rng);
                    let logic = template.logic.clone();
                    let handle = self.entities.insert(npc);
                    self.announce_arrival(&lock(&handle));
                    spawned.push((id, logic));
                }
            }
        }
        let count = spawned.len();
        for (id, logic) in spawned {
            self.arm_npc_timers(&id, &logic);
        }
        info!("spawned {} npcs", count);
        count
    }

    /// A brand new character at the start location with the configured
    /// starting cash, health, inventory and accuracy.
    pub fn new_character(&self, user_id: &str, name: &str) -> Entity {
        let economy = &self.config.economy;
        let id = uuid::Uuid::new_v4().to_string();
        let mut state = CombatantState::new(
            &id,
            EntityKind::Player,
            name.trim(),
            self.start_location(),
            economy.starting_health,
            economy.inventory_capacity,
        );
        state.cash = economy.starting_cash;
        state.set_skill(ACCURACY, self.config.combat.starting_accuracy);
        Entity {
            state,
            role: Role::Player(PlayerData {
                user_id: user_id.to_string(),
                name_key: name.trim().to_lowercase(),
                faction_id: None,
                connection: None,
                created_at: chrono::Utc::now(),
            }),
        }
    }

    /// Brings a loaded (or freshly created) character into the world on
    /// `connection`. Fails when the character, its user or its name is
    /// already live. Stale faction links are dropped here: a character
    /// kicked or disbanded while offline still carries the old id.
    pub fn login(&self, mut entity: Entity, connection: &str) -> GameResult<EntityRef> {
        let me = entity.state.entity_ref();
        let user_id = entity
            .player()
            .map(|p| p.user_id.clone())
            .ok_or_else(|| GameError::invalid("Only characters can log in."))?;
        if !self.maps.contains(&entity.state.location) {
            entity.state.location = self.start_location();
        }
        entity.state.target = None;
        entity.state.targeted_by.clear();
        entity.state.hidden = false;
        if let Some(player) = entity.player_mut() {
            player.connection = Some(connection.to_string());
        }

        let handle = self.entities.insert_player(entity)?;
        let mut guard = lock(&handle);
        let faction_id = guard.faction_id().map(str::to_string).filter(|fid| {
            self.factions
                .with_faction(fid, |f| {
                    if f.is_member(&me.id) {
                        f.set_online(&me);
                        Ok(())
                    } else {
                        Err(GameError::not_found("not a member"))
                    }
                })
                .is_ok()
        });
        if let Some(player) = guard.player_mut() {
            player.faction_id = faction_id.clone();
        }
        self.router.attach(connection, &user_id);
        if let Some(fid) = &faction_id {
            self.router.join(connection, fid);
        }
        info!("{} entered the world at {}", me.name, guard.state.location);
        self.send_to_entity(&guard, messages::feed(self.config.server.motd.clone()));
        self.send_to_entity(&guard, messages::character(&guard.state));
        self.send_to_entity(&guard, messages::inventory(&guard.state));
        self.announce_arrival(&guard);
        Ok(me)
    }

    /// Re-binds a character still inside its disconnect grace period to a
    /// new connection and cancels the pending eviction.
    pub fn reattach(&self, id: &str, connection: &str) -> GameResult<EntityRef> {
        self.cancel_timer(id, TimerKind::Eviction);
        let handle = self.handle(id)?;
        let mut entity = lock(&handle);
        let user_id = entity
            .player()
            .map(|p| p.user_id.clone())
            .ok_or(GameError::Stale)?;
        if let Some(player) = entity.player_mut() {
            player.connection = Some(connection.to_string());
        }
        self.router.attach(connection, &user_id);
        self.router.join(connection, &entity.state.location.room_key());
        if let Some(fid) = entity.faction_id() {
            self.router.join(connection, fid);
        }
        info!("{} reconnected", entity.state.name);
        self.send_to_entity(&entity, messages::character(&entity.state));
        self.send_to_entity(&entity, messages::inventory(&entity.state));
        self.send_to_entity(&entity, self.location_snapshot(&entity.state.location, id));
        Ok(entity.state.entity_ref())
    }

    /// Marks the character connection-less and starts the grace timer.
    /// Ignored when the character has already moved to another connection.
    pub fn disconnect(&self, id: &str, connection: &str) {
        let Some(handle) = self.entities.get(id) else {
            return;
        };
        {
            let mut entity = lock(&handle);
            let Some(player) = entity.player_mut() else {
                return;
            };
            if player.connection.as_deref() != Some(connection) {
                return;
            }
            player.connection = None;
        }
        let grace = self.config.timing.disconnect_grace_seconds as f64;
        self.schedule(id, TimerKind::Eviction, grace);
        debug!("{} disconnected, evicting in {}s", id, grace);
    }

    /// Removes a disconnected character from the world and returns its final
    /// save. Does nothing if the character reconnected meanwhile.
    pub fn evict(&self, id: &str) -> Option<PersistJob> {
        let handle = self.entities.get(id)?;
        if lock(&handle).connection().is_some() {
            return None;
        }
        self.cancel_timers(id);
        self.release_all(id);
        let entity = lock(&handle);
        if entity.connection().is_some() {
            return None;
        }
        let location = entity.state.location.clone();
        self.announce_departure(&entity, &location);
        if let Some(fid) = entity.faction_id() {
            let _ = self.factions.with_faction(fid, |f| {
                f.set_offline(id);
                Ok(())
            });
        }
        self.entities.remove(id);
        info!("{} left the world", entity.state.name);
        Self::character_job(&entity)
    }

    /// Final snapshot used at shutdown.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "day": self.day(),
            "entities": self.entities.len(),
            "players": self.entities.players().len(),
            "factions": self.factions.len(),
            "groundItems": self.ground.total_items(),
            "timers": self.timers().len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::router::RecordingTransport;

    pub(crate) fn world() -> (Arc<GameWorld>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let router = Arc::new(Router::new(transport.clone()));
        let world = GameWorld::new(Arc::new(Config::default()), Content::starter(), router);
        (Arc::new(world), transport)
    }

    pub(crate) fn player(id: &str, name: &str, location: Location) -> Entity {
        let mut state = CombatantState::new(id, EntityKind::Player, name, location, 100, 12);
        state.set_skill(crate::game::combatant::ACCURACY, 50.0);
        Entity {
            state,
            role: Role::Player(PlayerData {
                user_id: format!("user-{}", id),
                name_key: name.to_lowercase(),
                faction_id: None,
                connection: None,
                created_at: chrono::Utc::now(),
            }),
        }
    }

    pub(crate) fn join(world: &GameWorld, id: &str, name: &str, location: Location) -> String {
        let conn = format!("conn-{}", id);
        world.login(player(id, name, location), &conn).unwrap();
        conn
    }

    #[test]
    fn login_joins_cell_and_game_rooms() {
        let (world, transport) = world();
        let conn = join(&world, "c1", "Ash", Location::new("town", 2, 2));
        assert!(world.router.is_in_room(&conn, GAME_ROOM));
        assert!(world.router.is_in_room(&conn, "town_2_2"));
        assert!(!transport.to(&conn, messages::UPDATE_LOCATION).is_empty());
        assert!(world.login(player("c1", "Ash", Location::new("town", 2, 2)), "other").is_err());
    }

    #[test]
    fn login_on_unknown_map_lands_on_start() {
        let (world, _) = world();
        join(&world, "c1", "Ash", Location::new("atlantis", 1, 1));
        assert_eq!(world.entities.location_of("c1"), Some(world.start_location()));
    }

    #[test]
    fn stale_faction_is_cleared_at_login() {
        let (world, _) = world();
        let mut entity = player("c1", "Ash", Location::new("town", 1, 1));
        if let Some(p) = entity.player_mut() {
            p.faction_id = Some("gone".into());
        }
        world.login(entity, "conn").unwrap();
        let handle = world.entities.get("c1").unwrap();
        assert_eq!(lock(&handle).faction_id(), None);
    }

    #[test]
    fn eviction_waits_for_disconnect_and_saves() {
        let (world, _) = world();
        join(&world, "c1", "Ash", Location::new("town", 1, 1));
        assert!(world.evict("c1").is_none());
        world.disconnect("c1", "conn-c1");
        assert!(world.timer_pending("c1", TimerKind::Eviction));
        let job = world.evict("c1").unwrap();
        assert!(matches!(job, PersistJob::Character { .. }));
        assert!(!world.entities.contains("c1"));
    }

    #[test]
    fn reattach_cancels_eviction() {
        let (world, _) = world();
        join(&world, "c1", "Ash", Location::new("town", 1, 1));
        world.disconnect("c1", "conn-c1");
        world.reattach("c1", "conn-new").unwrap();
        assert!(!world.timer_pending("c1", TimerKind::Eviction));
        assert!(world.router.is_in_room("conn-new", "town_1_1"));
        assert!(world.evict("c1").is_none());
    }

    #[test]
    fn stale_connection_close_is_ignored() {
        let (world, _) = world();
        join(&world, "c1", "Ash", Location::new("town", 1, 1));
        world.reattach("c1", "conn-new").unwrap();
        world.disconnect("c1", "conn-c1");
        assert!(!world.timer_pending("c1", TimerKind::Eviction));
    }

    #[test]
    fn new_day_restocks_and_broadcasts() {
        let (world, transport) = world();
        let conn = join(&world, "c1", "Ash", Location::new("town", 1, 1));
        let (day, jobs) = world.new_day();
        assert_eq!(day, 1);
        assert_eq!(jobs.len(), world.shops.ids().len());
        assert_eq!(transport.to(&conn, messages::NEW_DAY).len(), 1);
    }

    #[test]
    fn spawn_fills_maps_and_arms_timers() {
        let (world, _) = world();
        let count = world.spawn_npcs();
        assert!(count > 0);
        assert_eq!(world.entities.ids_of_kind(EntityKind::Npc).len(), count);
        assert!(world.timer_stats().scheduled_total > 0);
    }

    #[test]
    fn cooldown_gate_reports_remaining_seconds() {
        let (world, _) = world();
        let mut state = CombatantState::new("c1", EntityKind::Player, "Ash", Location::new("town", 1, 1), 10, 1);
        assert!(world.check_cooldown(&state, "move").is_ok());
        world.start_cooldown(&mut state, "move");
        match world.check_cooldown(&state, "move") {
            Err(GameError::CooldownActive { action, seconds }) => {
                assert_eq!(action, "move");
                assert!((seconds - 0.4).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
