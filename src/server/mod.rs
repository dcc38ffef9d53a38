//! # Server
//!
//! Everything between the world and the network:
//!
//! - [`router`] - rooms, the user table and the [`router::Transport`] seam
//! - [`messages`] - outbound envelope types and payload builders
//! - [`dispatch`] - per-entity sharded work queues
//! - [`game`] - the orchestrator owning clocks and persistence
//! - [`tcp`] - newline-delimited JSON over TCP

pub mod dispatch;
pub mod game;
pub mod messages;
pub mod router;
pub mod tcp;

pub use game::GameServer;
pub use router::{ChannelTransport, Envelope, Router};
