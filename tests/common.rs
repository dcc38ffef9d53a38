//! Shared fixtures: a starter world wired to a recording transport.

#![allow(dead_code)]

use std::sync::Arc;

use gridrealm::config::Config;
use gridrealm::game::content::Content;
use gridrealm::game::entity::Entity;
use gridrealm::game::registry::lock;
use gridrealm::game::types::Location;
use gridrealm::game::GameWorld;
use gridrealm::server::router::{RecordingTransport, Router};

pub fn world() -> (Arc<GameWorld>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let router = Arc::new(Router::new(transport.clone()));
    let world = GameWorld::new(Arc::new(Config::default()), Content::starter(), router);
    (Arc::new(world), transport)
}

/// Creates and logs in a character at `location`. Returns `(id, connection)`.
pub fn enter(world: &GameWorld, name: &str, location: Location) -> (String, String) {
    let mut entity = world.new_character(&format!("user-{}", name.to_lowercase()), name);
    entity.state.location = location;
    let conn = format!("conn-{}", name.to_lowercase());
    let me = world.login(entity, &conn).expect("login");
    (me.id, conn)
}

pub fn edit<T>(world: &GameWorld, id: &str, f: impl FnOnce(&mut Entity) -> T) -> T {
    let handle = world.entities.get(id).expect("entity");
    let mut entity = lock(&handle);
    f(&mut entity)
}

pub fn give(world: &GameWorld, id: &str, item: &str, amount: u32) {
    let instance = world.catalog.instantiate(item, amount).expect("item");
    edit(world, id, |e| e.state.inventory.add(instance).expect("room"));
}

/// Clears every cooldown so a test can issue commands back to back.
pub fn rested(world: &GameWorld, id: &str) {
    edit(world, id, |e| e.state.cooldowns.clear());
}
