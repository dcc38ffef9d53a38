//! # Persistence
//!
//! The game core talks to durable storage only through the [`Persistence`]
//! trait. Calls are synchronous; the server runs them on the blocking pool
//! after every entity lock has been released, so a slow disk never stalls
//! the simulation. The in-memory world is the source of truth: a failed save
//! is logged and retried on the next autosave.
//!
//! [`SledStore`] is the shipped implementation (sled trees, bincode records
//! carrying a schema version).

use std::collections::HashMap;
use thiserror::Error;

use crate::game::faction::Faction;
use crate::game::item::ItemInstance;
use crate::metrics::Snapshot;

pub mod records;
pub mod sled_store;

pub use records::{CharacterRecord, MetricsRecord, CHARACTER_SCHEMA_VERSION};
pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ShopStock = HashMap<String, Option<u32>>;

pub trait Persistence: Send + Sync {
    /// The character called `name` owned by `user_id`, if any.
    fn load_character(&self, user_id: &str, name: &str) -> Result<Option<CharacterRecord>, StoreError>;
    /// Most recently saved character of a user.
    fn find_character_by_user(&self, user_id: &str) -> Result<Option<CharacterRecord>, StoreError>;
    fn save_character(&self, record: &CharacterRecord) -> Result<(), StoreError>;
    /// Case-insensitive character name check.
    fn name_taken(&self, name: &str) -> Result<bool, StoreError>;

    fn load_inventory(&self, owner_id: &str) -> Result<Vec<(usize, ItemInstance)>, StoreError>;
    fn save_item(&self, owner_id: &str, slot: usize, item: &ItemInstance) -> Result<(), StoreError>;
    /// Deletes the owner's items whose fingerprint is not in `keep`.
    fn delete_orphaned_items(&self, owner_id: &str, keep: &[String]) -> Result<usize, StoreError>;

    fn load_factions(&self) -> Result<Vec<Faction>, StoreError>;
    fn save_faction(&self, faction: &Faction) -> Result<(), StoreError>;
    fn delete_faction(&self, id: &str) -> Result<(), StoreError>;
    /// Clears `faction_id` on every stored character in the faction.
    fn clear_faction_membership(&self, faction_id: &str) -> Result<usize, StoreError>;

    fn load_shop_state(&self, shop_id: &str) -> Result<Option<ShopStock>, StoreError>;
    fn save_shop_state(&self, shop_id: &str, stock: &ShopStock) -> Result<(), StoreError>;

    fn load_metrics(&self) -> Result<Option<MetricsRecord>, StoreError>;
    fn save_metrics(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// A queued write produced by the game and applied by the persistence
/// worker.
#[derive(Debug, Clone)]
pub enum PersistJob {
    Character {
        record: CharacterRecord,
        items: Vec<(usize, ItemInstance)>,
    },
    Faction(Faction),
    DeleteFaction {
        id: String,
    },
    ShopState {
        shop_id: String,
        stock: ShopStock,
    },
    Metrics(Snapshot),
}

impl PersistJob {
    pub fn describe(&self) -> String {
        match self {
            PersistJob::Character { record, .. } => format!("character {}", record.id),
            PersistJob::Faction(f) => format!("faction {}", f.id),
            PersistJob::DeleteFaction { id } => format!("faction delete {}", id),
            PersistJob::ShopState { shop_id, .. } => format!("shop {}", shop_id),
            PersistJob::Metrics(_) => "metrics".to_string(),
        }
    }

    pub fn apply(&self, store: &dyn Persistence) -> Result<(), StoreError> {
        match self {
            PersistJob::Character { record, items } => {
                store.save_character(record)?;
                for (slot, item) in items {
                    store.save_item(&record.id, *slot, item)?;
                }
                let keep: Vec<String> = items.iter().map(|(_, i)| i.fingerprint.clone()).collect();
                store.delete_orphaned_items(&record.id, &keep)?;
                Ok(())
            }
            PersistJob::Faction(faction) => store.save_faction(faction),
            PersistJob::DeleteFaction { id } => {
                store.delete_faction(id)?;
                store.clear_faction_membership(id)?;
                Ok(())
            }
            PersistJob::ShopState { shop_id, stock } => store.save_shop_state(shop_id, stock),
            PersistJob::Metrics(snapshot) => store.save_metrics(snapshot),
        }
    }
}
