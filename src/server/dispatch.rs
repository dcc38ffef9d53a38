//! Sharded work dispatcher.
//!
//! Every unit of game work belongs to one entity: a player's command, an
//! NPC's timer, a login or a disconnect. The dispatcher hashes that entity id
//! onto one of N worker shards, each a tokio task draining its own bounded
//! queue. Work for one entity therefore runs strictly in arrival order while
//! different entities proceed on different shards. Cross-entity operations
//! (attacks, gives) still lock both entities in id order inside the world.
//!
//! The handle mirrors a small command protocol: `Work`, `Snapshot` and
//! `Shutdown`, each shard answering the last two over a oneshot.

use log::{debug, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::commands::{self, CommandRegistry};
use crate::config::DispatchConfig;
use crate::game::entity::Entity;
use crate::game::errors::GameResult;
use crate::game::scheduler::TimerKey;
use crate::game::types::EntityRef;
use crate::game::world::GameWorld;

pub enum WorkUnit {
    Command {
        actor: String,
        connection: String,
        line: String,
    },
    Timer(TimerKey),
    Login {
        entity: Box<Entity>,
        connection: String,
        reply: oneshot::Sender<GameResult<EntityRef>>,
    },
    Reattach {
        actor: String,
        connection: String,
        reply: oneshot::Sender<GameResult<EntityRef>>,
    },
    Disconnect {
        actor: String,
        connection: String,
    },
}

impl WorkUnit {
    /// The entity this work belongs to.
    pub fn key(&self) -> &str {
        match self {
            WorkUnit::Command { actor, .. } => actor,
            WorkUnit::Timer(key) => &key.owner,
            WorkUnit::Login { entity, .. } => entity.id(),
            WorkUnit::Reattach { actor, .. } => actor,
            WorkUnit::Disconnect { actor, .. } => actor,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WorkUnit::Command { .. } => "command",
            WorkUnit::Timer(_) => "timer",
            WorkUnit::Login { .. } => "login",
            WorkUnit::Reattach { .. } => "reattach",
            WorkUnit::Disconnect { .. } => "disconnect",
        }
    }
}

enum ShardCommand {
    Work(WorkUnit),
    Snapshot(oneshot::Sender<ShardStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub shard: usize,
    pub processed: u64,
    pub commands: u64,
    pub timers: u64,
    /// Slowest single unit, in microseconds.
    pub max_micros: u64,
}

#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    shards: Vec<mpsc::Sender<ShardCommand>>,
}

/// Stable shard index for an entity id.
pub fn shard_index(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

impl DispatcherHandle {
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Queues work on its entity's shard, waiting while the shard is full.
    pub async fn submit(&self, work: WorkUnit) {
        let idx = shard_index(work.key(), self.shards.len());
        let label = work.label();
        if self.shards[idx].send(ShardCommand::Work(work)).await.is_err() {
            warn!("dispatcher shard {} closed, dropping {}", idx, label);
        }
    }

    pub async fn snapshot(&self) -> Vec<ShardStats> {
        let mut out = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(ShardCommand::Snapshot(tx)).await.is_ok() {
                if let Ok(stats) = rx.await {
                    out.push(stats);
                }
            }
        }
        out
    }

    /// Stops every shard after the work already queued has run.
    pub async fn shutdown(&self) {
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(ShardCommand::Shutdown(tx)).await.is_ok() {
                let _ = rx.await;
            }
        }
    }
}

fn run_unit(world: &GameWorld, registry: &CommandRegistry, work: WorkUnit, stats: &mut ShardStats) {
    match work {
        WorkUnit::Command {
            actor,
            connection,
            line,
        } => {
            stats.commands += 1;
            commands::execute(world, registry, &actor, &connection, &line);
        }
        WorkUnit::Timer(key) => {
            stats.timers += 1;
            world.run_timer(&key);
        }
        WorkUnit::Login {
            entity,
            connection,
            reply,
        } => {
            let _ = reply.send(world.login(*entity, &connection));
        }
        WorkUnit::Reattach {
            actor,
            connection,
            reply,
        } => {
            let _ = reply.send(world.reattach(&actor, &connection));
        }
        WorkUnit::Disconnect { actor, connection } => world.disconnect(&actor, &connection),
    }
}

pub fn start_dispatcher(
    cfg: &DispatchConfig,
    world: Arc<GameWorld>,
    registry: Arc<CommandRegistry>,
) -> DispatcherHandle {
    let count = cfg.shards.max(1);
    let depth = cfg.queue_depth.max(1);
    let mut shards = Vec::with_capacity(count);
    for idx in 0..count {
        let (tx, mut rx) = mpsc::channel::<ShardCommand>(depth);
        shards.push(tx);
        let world = world.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut stats = ShardStats {
                shard: idx,
                ..Default::default()
            };
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    ShardCommand::Work(work) => {
                        let started = Instant::now();
                        run_unit(&world, &registry, work, &mut stats);
                        stats.processed += 1;
                        let micros = started.elapsed().as_micros() as u64;
                        stats.max_micros = stats.max_micros.max(micros);
                    }
                    ShardCommand::Snapshot(resp) => {
                        let _ = resp.send(stats.clone());
                    }
                    ShardCommand::Shutdown(done) => {
                        debug!("shard {} stopping after {} units", idx, stats.processed);
                        let _ = done.send(());
                        break;
                    }
                }
            }
        });
    }
    DispatcherHandle { shards }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::Location;
    use crate::game::world::tests::{player, world};

    #[test]
    fn shard_index_is_stable_and_in_range() {
        for key in ["c1", "npc-3", "8d9f"] {
            let a = shard_index(key, 4);
            assert_eq!(a, shard_index(key, 4));
            assert!(a < 4);
        }
        assert_eq!(shard_index("anything", 0), 0);
    }

    #[tokio::test]
    async fn login_then_commands_run_in_order() {
        let (world, transport) = world();
        let registry = Arc::new(CommandRegistry::standard());
        let cfg = DispatchConfig {
            shards: 3,
            queue_depth: 8,
        };
        let dispatcher = start_dispatcher(&cfg, world.clone(), registry);

        let (tx, rx) = oneshot::channel();
        dispatcher
            .submit(WorkUnit::Login {
                entity: Box::new(player("c1", "Ash", Location::new("town", 3, 3))),
                connection: "conn-c1".into(),
                reply: tx,
            })
            .await;
        assert_eq!(rx.await.unwrap().unwrap().id, "c1");

        for line in ["/move north", "/move north"] {
            dispatcher
                .submit(WorkUnit::Command {
                    actor: "c1".into(),
                    connection: "conn-c1".into(),
                    line: line.into(),
                })
                .await;
        }
        let stats = dispatcher.snapshot().await;
        assert_eq!(stats.iter().map(|s| s.commands).sum::<u64>(), 2);
        dispatcher.shutdown().await;

        // the second move hits the move cooldown
        assert_eq!(world.entities.location_of("c1"), Some(Location::new("town", 3, 2)));
        assert_eq!(transport.to("conn-c1", crate::server::messages::COMMAND_ERROR).len(), 1);
    }
}
