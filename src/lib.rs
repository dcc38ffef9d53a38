//! # Gridrealm - real-time core for a persistent multiplayer text world
//!
//! Players and NPCs share maps made of grid cells. Commands typed as chat
//! text move characters around, aim and fight, trade at shops, and form
//! factions; NPCs wander and fight back on their own timers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gridrealm::config::Config;
//! use gridrealm::game::content::Content;
//! use gridrealm::server::{ChannelTransport, GameServer, Router};
//! use gridrealm::storage::SledStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load("config.toml").await?);
//!     let content = Content::load(config.storage.content_path()).await?;
//!     let store = Arc::new(SledStore::open(config.storage.db_path())?);
//!     let transport = Arc::new(ChannelTransport::new());
//!     let router = Arc::new(Router::new(transport.clone()));
//!     let server = GameServer::new(config, content, router, store).await?;
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`game`] - the simulation: entities, combat, NPCs, shops, factions
//! - [`commands`] - tokenizer, parameter rules and the command handlers
//! - [`server`] - routing, dispatch, orchestration and the TCP transport
//! - [`storage`] - the persistence trait and its sled adapter
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  TCP transport  │ ← JSON lines in and out
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Dispatcher    │ ← one ordered queue per entity shard
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Game world    │ ← per-entity locks, timers, router
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Storage       │ ← queued saves on the blocking pool
//! └─────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod game;
pub mod logutil;
pub mod metrics;
pub mod server;
pub mod storage;
