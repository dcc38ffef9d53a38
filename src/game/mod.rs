//! # Game core
//!
//! The authoritative simulation: maps, entities, items, shops, factions,
//! cooldowns and timers, plus the world operations that tie them together.
//!
//! - Static data: [`map`], [`item`], [`content`]
//! - Entity model: [`combatant`], [`entity`], [`registry`], [`targeting`]
//! - Economy and social: [`shop`], [`faction`], [`ground`]
//! - Time: [`cooldown`], [`scheduler`]
//! - World operations: [`world`] (context and lifecycle), [`movement`],
//!   [`combat`], [`npc`]

pub mod combat;
pub mod combatant;
pub mod content;
pub mod cooldown;
pub mod entity;
pub mod errors;
pub mod faction;
pub mod ground;
pub mod item;
pub mod map;
pub mod movement;
pub mod npc;
pub mod registry;
pub mod scheduler;
pub mod shop;
pub mod targeting;
pub mod types;
pub mod world;

pub use errors::{GameError, GameResult};
pub use world::GameWorld;
