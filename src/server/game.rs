//! The orchestrator.
//!
//! [`GameServer`] assembles the world once at startup (content, factions and
//! shop stock from the store), owns the dispatcher and the persistence
//! worker, and drives the clocks: the game tick, autosave, new day and the
//! final save on shutdown.
//!
//! Storage calls always run on the blocking pool and never while an entity
//! lock is held; the world only ever enqueues [`PersistJob`]s.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::game::content::Content;
use crate::game::entity::Entity;
use crate::game::errors::{GameError, GameResult};
use crate::game::types::EntityRef;
use crate::game::world::GameWorld;
use crate::metrics;
use crate::server::dispatch::{start_dispatcher, DispatcherHandle, ShardStats, WorkUnit};
use crate::server::router::Router;
use crate::storage::{PersistJob, Persistence, StoreError};

const MAX_NAME_LEN: usize = 20;

enum Loaded {
    Existing(Entity),
    Fresh,
    Taken,
}

pub struct GameServer {
    pub world: Arc<GameWorld>,
    store: Arc<dyn Persistence>,
    dispatcher: DispatcherHandle,
    persist_worker: Mutex<Option<JoinHandle<()>>>,
    ticks: AtomicU64,
}

impl GameServer {
    pub async fn new(
        config: Arc<Config>,
        content: Content,
        router: Arc<Router>,
        store: Arc<dyn Persistence>,
    ) -> Result<Self> {
        let factions = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.load_factions())
                .await
                .context("faction load task failed")?
                .context("failed to load factions")?
        };
        info!("loaded {} factions", factions.len());

        let (tx, rx) = mpsc::unbounded_channel();
        let world = GameWorld::new(config.clone(), content, router)
            .with_factions(factions)
            .with_persistence(tx);
        let world = Arc::new(world);

        for shop_id in world.shops.ids() {
            let store = store.clone();
            let id = shop_id.clone();
            let stock = tokio::task::spawn_blocking(move || store.load_shop_state(&id))
                .await
                .context("shop load task failed")?
                .with_context(|| format!("failed to load stock for shop {}", shop_id))?;
            if let Some(stock) = stock {
                world.restore_shop_state(&shop_id, &stock);
            }
        }

        let persist_worker = spawn_persistence_worker(store.clone(), rx);
        world.spawn_npcs();
        let registry = Arc::new(CommandRegistry::standard());
        let commands = registry.len();
        let dispatcher = start_dispatcher(&config.dispatch, world.clone(), registry);
        info!(
            "{} ready: {} maps, {} commands on {} shards",
            config.server.name,
            world.maps.len(),
            commands,
            dispatcher.shard_count()
        );
        Ok(Self {
            world,
            store,
            dispatcher,
            persist_worker: Mutex::new(Some(persist_worker)),
            ticks: AtomicU64::new(0),
        })
    }

    /// Attaches an authenticated user on `connection`: re-binds a character
    /// still in its grace period, else loads the stored one, else creates
    /// one called `name`.
    pub async fn connect(&self, connection: &str, user_id: &str, name: &str) -> GameResult<EntityRef> {
        if let Some(id) = self.world.entities.by_user(user_id) {
            let (tx, rx) = oneshot::channel();
            self.dispatcher
                .submit(WorkUnit::Reattach {
                    actor: id,
                    connection: connection.to_string(),
                    reply: tx,
                })
                .await;
            return rx.await.map_err(|_| GameError::Stale)?;
        }

        let entity = match self.load(user_id, name).await? {
            Loaded::Existing(entity) => entity,
            Loaded::Fresh => {
                check_name(name)?;
                info!("creating character {} for {}", name.trim(), user_id);
                self.world.new_character(user_id, name)
            }
            Loaded::Taken => {
                return Err(GameError::Conflict(format!("The name {} is taken.", name.trim())))
            }
        };
        let (tx, rx) = oneshot::channel();
        self.dispatcher
            .submit(WorkUnit::Login {
                entity: Box::new(entity),
                connection: connection.to_string(),
                reply: tx,
            })
            .await;
        rx.await.map_err(|_| GameError::Stale)?
    }

    async fn load(&self, user_id: &str, name: &str) -> GameResult<Loaded> {
        let store = self.store.clone();
        let user = user_id.to_string();
        let name = name.trim().to_string();
        let result = tokio::task::spawn_blocking(move || -> Result<Loaded, StoreError> {
            let record = match store.load_character(&user, &name)? {
                Some(record) => Some(record),
                None if name.is_empty() => store.find_character_by_user(&user)?,
                None => None,
            };
            if let Some(record) = record {
                let items = store.load_inventory(&record.id)?;
                return Ok(Loaded::Existing(record.into_entity(items)));
            }
            if !name.is_empty() && store.name_taken(&name)? {
                return Ok(Loaded::Taken);
            }
            Ok(Loaded::Fresh)
        })
        .await;
        match result {
            Ok(Ok(loaded)) => Ok(loaded),
            Ok(Err(e)) => {
                warn!("failed to load character for {}: {}", user_id, e);
                metrics::inc_persistence_failure();
                Err(GameError::invalid("Could not load your character. Please try again."))
            }
            Err(e) => {
                warn!("character load task for {} failed: {}", user_id, e);
                Err(GameError::invalid("Could not load your character. Please try again."))
            }
        }
    }

    pub async fn command(&self, actor: &str, connection: &str, line: &str) {
        self.dispatcher
            .submit(WorkUnit::Command {
                actor: actor.to_string(),
                connection: connection.to_string(),
                line: line.to_string(),
            })
            .await;
    }

    /// Drops the connection and starts the character's grace timer.
    pub async fn disconnect(&self, actor: &str, connection: &str) {
        self.world.router.detach(connection);
        self.dispatcher
            .submit(WorkUnit::Disconnect {
                actor: actor.to_string(),
                connection: connection.to_string(),
            })
            .await;
    }

    /// One game tick: cooldowns, the periodic sweep and due timers.
    pub async fn tick(&self) {
        let n = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let every = u64::from(self.world.config.timing.cleanup_interval_ticks.max(1));
        let swept = self.world.tick_cooldowns(n % every == 0);
        if swept > 0 {
            debug!("tick {}: swept {} expired cooldowns", n, swept);
        }
        for key in self.world.due_timers(std::time::Instant::now()) {
            self.dispatcher.submit(WorkUnit::Timer(key)).await;
        }
    }

    /// Waits until every unit queued so far has run.
    pub async fn settle(&self) -> Vec<ShardStats> {
        self.dispatcher.snapshot().await
    }

    pub fn autosave(&self) -> usize {
        let jobs = self.world.snapshot_all();
        let count = jobs.len();
        for job in jobs {
            self.world.persist(job);
        }
        metrics::inc_autosave();
        self.world.persist(PersistJob::Metrics(metrics::snapshot()));
        info!("autosave queued {} records", count);
        count
    }

    pub fn new_day(&self) -> u64 {
        let (day, jobs) = self.world.new_day();
        for job in jobs {
            self.world.persist(job);
        }
        day
    }

    /// Saves everything directly, bypassing the queue. Returns the number
    /// of failed writes.
    pub async fn save_all(&self) -> Result<usize> {
        let mut jobs = self.world.snapshot_all();
        jobs.push(PersistJob::Metrics(metrics::snapshot()));
        apply_jobs(self.store.clone(), jobs).await
    }

    /// Closes the save queue and waits for the worker to apply everything
    /// still in it.
    async fn drain_persistence(&self) {
        self.world.close_persistence();
        let worker = self
            .persist_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("persistence worker failed: {}", e);
            }
        }
    }

    /// Runs the clocks until `shutdown` resolves, then saves everything.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let timing = self.world.config.timing.clone();
        let mut tick = interval(Duration::from_millis(timing.tick_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let autosave_every = Duration::from_secs(timing.autosave_seconds.max(1));
        let mut autosave = interval_at(Instant::now() + autosave_every, autosave_every);
        let day_every = Duration::from_secs(timing.new_day_minutes.max(1) * 60);
        let mut new_day = interval_at(Instant::now() + day_every, day_every);
        tokio::pin!(shutdown);

        info!("game loop started, tick {}ms", timing.tick_ms);
        loop {
            tokio::select! {
                _ = tick.tick() => self.tick().await,
                _ = autosave.tick() => {
                    self.autosave();
                }
                _ = new_day.tick() => {
                    self.new_day();
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }
        self.shutdown().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        for stats in self.dispatcher.snapshot().await {
            debug!(
                "shard {}: {} units ({} commands, {} timers), slowest {}us",
                stats.shard, stats.processed, stats.commands, stats.timers, stats.max_micros
            );
        }
        self.dispatcher.shutdown().await;
        let timers = self.world.timer_stats();
        debug!(
            "timers: {} scheduled, {} fired",
            timers.scheduled_total, timers.fired_total
        );
        // Queued saves (evictions among them) land before the final
        // snapshot so the newest state is written last.
        self.drain_persistence().await;
        let failures = self.save_all().await?;
        if failures > 0 {
            warn!("final save finished with {} failures", failures);
        }
        let m = metrics::snapshot();
        info!(
            "final state {} | commands={} validation_failures={} npc_kills={} player_deaths={} autosaves={} persistence_failures={}",
            self.world.summary(),
            m.commands_dispatched,
            m.validation_failures,
            m.npc_kills,
            m.player_deaths,
            m.autosaves,
            m.persistence_failures
        );
        Ok(())
    }
}

fn check_name(name: &str) -> GameResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GameError::invalid("Choose a name for your character."));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(GameError::invalid(format!(
            "Names are at most {} characters.",
            MAX_NAME_LEN
        )));
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(GameError::invalid("Names may only use letters, digits, - and _."));
    }
    Ok(())
}

fn spawn_persistence_worker(
    store: Arc<dyn Persistence>,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let what = job.describe();
            let store = store.clone();
            match tokio::task::spawn_blocking(move || job.apply(store.as_ref())).await {
                Ok(Ok(())) => debug!("saved {}", what),
                Ok(Err(e)) => {
                    warn!("failed to save {}: {}", what, e);
                    metrics::inc_persistence_failure();
                }
                Err(e) => {
                    warn!("save task for {} failed: {}", what, e);
                    metrics::inc_persistence_failure();
                }
            }
        }
        debug!("persistence queue closed");
    })
}

async fn apply_jobs(store: Arc<dyn Persistence>, jobs: Vec<PersistJob>) -> Result<usize> {
    let total = jobs.len();
    let failures = tokio::task::spawn_blocking(move || {
        jobs.iter()
            .filter(|job| match job.apply(store.as_ref()) {
                Ok(()) => false,
                Err(e) => {
                    warn!("failed to save {}: {}", job.describe(), e);
                    metrics::inc_persistence_failure();
                    true
                }
            })
            .count()
    })
    .await
    .context("save task failed")?;
    info!("saved {} records ({} failed)", total - failures, failures);
    Ok(failures)
}
