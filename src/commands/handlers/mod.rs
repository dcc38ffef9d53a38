//! Command handlers, grouped the way `/help` lists them.

pub mod combat;
pub mod economy;
pub mod faction;
pub mod items;
pub mod movement;
pub mod social;

use crate::commands::registry::CommandRegistry;

pub fn register_all(registry: &mut CommandRegistry) {
    movement::register(registry);
    combat::register(registry);
    items::register(registry);
    economy::register(registry);
    social::register(registry);
    faction::register(registry);
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use crate::commands::{execute, CommandRegistry};
    use crate::game::entity::Entity;
    use crate::game::types::Location;
    use crate::game::world::tests::{join, world};
    use crate::game::world::GameWorld;
    use crate::server::router::RecordingTransport;

    /// A world with a command table and a way to type into it.
    pub(crate) struct Harness {
        pub world: Arc<GameWorld>,
        pub transport: Arc<RecordingTransport>,
        pub registry: CommandRegistry,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let (world, transport) = world();
            Self {
                world,
                transport,
                registry: CommandRegistry::standard(),
            }
        }

        pub(crate) fn join(&self, id: &str, name: &str, location: Location) -> String {
            join(&self.world, id, name, location)
        }

        /// Runs `line` for `id`, clearing its cooldowns first so tests can
        /// fire commands back to back.
        pub(crate) fn run(&self, id: &str, line: &str) {
            if let Some(h) = self.world.entities.get(id) {
                crate::game::registry::lock(&h).state.cooldowns.clear();
            }
            let conn = format!("conn-{}", id);
            execute(&self.world, &self.registry, id, &conn, line);
        }

        pub(crate) fn edit<T>(&self, id: &str, f: impl FnOnce(&mut Entity) -> T) -> T {
            let handle = self.world.entities.get(id).expect("entity");
            let mut entity = crate::game::registry::lock(&handle);
            f(&mut entity)
        }

        pub(crate) fn errors(&self, id: &str) -> Vec<String> {
            self.transport
                .to(&format!("conn-{}", id), crate::server::messages::COMMAND_ERROR)
                .into_iter()
                .map(|e| e.payload["message"].as_str().unwrap_or_default().to_string())
                .collect()
        }

        pub(crate) fn feed(&self, id: &str) -> Vec<String> {
            self.transport
                .to(&format!("conn-{}", id), crate::server::messages::EVENT_FEED)
                .into_iter()
                .map(|e| e.payload["message"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }
}
