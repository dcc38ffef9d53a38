use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::game::combatant::CombatantState;
use crate::game::entity::{Entity, PlayerData, Role};
use crate::game::item::{Inventory, ItemInstance};
use crate::game::types::{EntityKind, Gender, Location};
use crate::metrics::Snapshot;

pub const CHARACTER_SCHEMA_VERSION: u8 = 1;
pub const ITEM_SCHEMA_VERSION: u8 = 1;
pub const FACTION_SCHEMA_VERSION: u8 = 1;
pub const SHOP_SCHEMA_VERSION: u8 = 1;
pub const METRICS_SCHEMA_VERSION: u8 = 1;

/// Durable part of a player character. Targeting, cooldowns and the
/// connection are runtime-only and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterRecord {
    pub schema_version: u8,
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub gender: Gender,
    pub location: Location,
    pub health: u32,
    pub health_max: u32,
    pub cash: u64,
    pub bank: u64,
    pub experience: u64,
    pub inventory_capacity: usize,
    pub skills: BTreeMap<String, f64>,
    pub faction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CharacterRecord {
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Snapshot of a live player. `None` for NPCs.
    pub fn from_entity(entity: &Entity) -> Option<(Self, Vec<(usize, ItemInstance)>)> {
        let player = entity.player()?;
        let s = &entity.state;
        let record = Self {
            schema_version: CHARACTER_SCHEMA_VERSION,
            id: s.id.clone(),
            user_id: player.user_id.clone(),
            name: s.name.clone(),
            gender: s.gender,
            location: s.location.clone(),
            health: s.health,
            health_max: s.health_max,
            cash: s.cash,
            bank: s.bank,
            experience: s.experience,
            inventory_capacity: s.inventory.capacity,
            skills: s.skills.clone(),
            faction_id: player.faction_id.clone(),
            created_at: player.created_at,
            updated_at: Utc::now(),
        };
        let items = s
            .inventory
            .iter()
            .map(|(slot, item)| (*slot, item.clone()))
            .collect();
        Some((record, items))
    }

    /// Rebuilds a live player from its record and stored items.
    pub fn into_entity(self, items: Vec<(usize, ItemInstance)>) -> Entity {
        let mut state = CombatantState::new(
            &self.id,
            EntityKind::Player,
            &self.name,
            self.location,
            self.health_max,
            self.inventory_capacity,
        );
        state.health = self.health.max(1);
        state.gender = self.gender;
        state.cash = self.cash;
        state.bank = self.bank;
        state.experience = self.experience;
        state.skills = self.skills;
        state.inventory = Inventory::restore(self.inventory_capacity, items);
        Entity {
            state,
            role: Role::Player(PlayerData {
                user_id: self.user_id,
                name_key: self.name.to_lowercase(),
                faction_id: self.faction_id,
                connection: None,
                created_at: self.created_at,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub schema_version: u8,
    pub owner_id: String,
    pub slot: usize,
    pub item: ItemInstance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShopStateRecord {
    pub schema_version: u8,
    pub shop_id: String,
    pub stock: Vec<(String, Option<u32>)>,
    pub updated_at: DateTime<Utc>,
}

/// Counters of the last server run, as of its latest autosave or shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub schema_version: u8,
    pub snapshot: Snapshot,
    pub recorded_at: DateTime<Utc>,
}
