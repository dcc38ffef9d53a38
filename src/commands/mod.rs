//! # Command pipeline
//!
//! Raw chat text becomes a game action in four steps:
//!
//! 1. [`tokenizer::tokenize`] splits the line (double quotes group words).
//! 2. [`registry::CommandRegistry::resolve`] finds the command, expanding
//!    aliases such as `/n` into `/move north`.
//! 3. [`rules::validate`] coerces and resolves every declared parameter.
//! 4. The handler runs with a [`CommandContext`] holding the validated
//!    [`rules::Params`].
//!
//! Validation and game errors go back to the invoking connection only as
//! `COMMAND_ERROR`. An actor that vanished mid-command ([`GameError::Stale`])
//! gets nothing.

pub mod handlers;
pub mod registry;
pub mod rules;
pub mod tokenizer;

use log::debug;

use crate::game::errors::{GameError, GameResult};
use crate::game::registry::{lock, EntityHandle, Scope};
use crate::game::types::{EntityKind, EntityRef, Location};
use crate::game::world::GameWorld;
use crate::logutil::escaped;
use crate::metrics;
use crate::server::messages;
use crate::server::router::Envelope;

pub use registry::{CommandRegistry, CommandSpec};
pub use rules::{Params, ValidationError};

/// Everything a handler may touch.
pub struct CommandContext<'a> {
    pub world: &'a GameWorld,
    /// Character id of the invoker.
    pub actor: &'a str,
    pub connection: &'a str,
    pub spec: &'a CommandSpec,
    pub registry: &'a CommandRegistry,
    pub params: Params,
}

impl<'a> CommandContext<'a> {
    pub fn handle(&self) -> GameResult<EntityHandle> {
        self.world.handle(self.actor)
    }

    pub fn send(&self, envelope: Envelope) {
        self.world.router.to_connection(self.connection, envelope);
    }

    pub fn reply(&self, text: impl Into<String>) {
        self.send(messages::feed(text));
    }

    pub fn reply_lines(&self, lines: &[String]) {
        self.send(messages::feed_lines(lines));
    }

    pub fn location(&self) -> GameResult<Location> {
        self.world.entities.location_of(self.actor).ok_or(GameError::Stale)
    }

    /// Validated text parameter; declared required so always present.
    pub fn text(&self, name: &str) -> GameResult<String> {
        self.params
            .text(name)
            .ok_or_else(|| GameError::invalid(format!("Usage: {}", self.spec.usage())))
    }

    pub fn entity(&self, name: &str) -> GameResult<&EntityRef> {
        self.params
            .entity(name)
            .ok_or_else(|| GameError::invalid(format!("Usage: {}", self.spec.usage())))
    }

    pub fn id(&self, name: &str) -> GameResult<&str> {
        self.params
            .id(name)
            .ok_or_else(|| GameError::invalid(format!("Usage: {}", self.spec.usage())))
    }
}

/// Resolves rule lookups against the live world from the invoker's point
/// of view. No lock is held across calls.
pub struct WorldResolver<'a> {
    world: &'a GameWorld,
    actor: &'a str,
}

impl<'a> WorldResolver<'a> {
    pub fn new(world: &'a GameWorld, actor: &'a str) -> Self {
        Self { world, actor }
    }
}

impl rules::Resolver for WorldResolver<'_> {
    fn entity(&self, query: &str, kind: Option<EntityKind>, map_wide: bool) -> Option<EntityRef> {
        let here = self.world.entities.location_of(self.actor)?;
        let scope = if map_wide {
            Scope::Map(here.map_id)
        } else {
            Scope::Cell(here)
        };
        self.world
            .entities
            .resolve_name(query, &scope, kind, self.actor)
    }

    fn faction(&self, query: &str) -> Option<String> {
        self.world.factions.resolve(query)
    }

    fn game_map(&self, query: &str) -> Option<String> {
        self.world.maps.find(query).map(|m| m.id.clone())
    }

    fn item(&self, query: &str) -> Option<String> {
        self.world.catalog.find(query).map(|t| t.id.clone())
    }

    fn slot(&self, slot: usize) -> bool {
        self.world
            .entities
            .get(self.actor)
            .map_or(false, |h| lock(&h).state.inventory.get(slot).is_some())
    }
}

/// Runs one line of player input for `actor`.
pub fn execute(
    world: &GameWorld,
    registry: &CommandRegistry,
    actor: &str,
    connection: &str,
    raw: &str,
) {
    let tokens = tokenizer::tokenize(raw);
    if tokens.is_empty() {
        return;
    }
    let Some((spec, args)) = registry.resolve(&tokens) else {
        metrics::inc_validation_failure();
        world.router.to_connection(
            connection,
            messages::command_error(
                &format!("Unknown command {}. Try /help.", tokens[0]),
                None,
            ),
        );
        return;
    };
    metrics::inc_command(spec.name);
    debug!("{} {}: {}", actor, spec.name, escaped(raw));

    let resolver = WorldResolver::new(world, actor);
    let params = match rules::validate(&spec.params, &args, &resolver) {
        Ok(params) => params,
        Err(e) => {
            metrics::inc_validation_failure();
            debug!("{} {} rejected: {} ({})", actor, spec.name, e, e.param);
            world
                .router
                .to_connection(connection, messages::command_error(&e.message, Some(&spec.usage())));
            return;
        }
    };

    let ctx = CommandContext {
        world,
        actor,
        connection,
        spec,
        registry,
        params,
    };
    let result = run_gated(&ctx);
    match result {
        Ok(()) => {}
        Err(GameError::Stale) => debug!("{} {} dropped: actor gone", actor, spec.name),
        Err(e) => {
            debug!("{} {} failed: {}", actor, spec.name, e);
            ctx.send(messages::command_error(&e.to_string(), None));
        }
    }
}

fn run_gated(ctx: &CommandContext<'_>) -> GameResult<()> {
    if let Some(action) = ctx.spec.cooldown {
        let handle = ctx.handle()?;
        let entity = lock(&handle);
        ctx.world.check_cooldown(&entity.state, action)?;
    }
    (ctx.spec.handler)(ctx)?;
    if let Some(action) = ctx.spec.cooldown {
        if let Some(handle) = ctx.world.entities.get(ctx.actor) {
            let mut entity = lock(&handle);
            ctx.world.start_cooldown(&mut entity.state, action);
        }
    }
    Ok(())
}
