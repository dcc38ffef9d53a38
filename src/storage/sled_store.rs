use std::path::Path;

use chrono::Utc;
use sled::IVec;

use crate::game::faction::Faction;
use crate::game::item::ItemInstance;
use crate::metrics::Snapshot;
use crate::storage::records::{
    CharacterRecord, ItemRecord, MetricsRecord, ShopStateRecord, CHARACTER_SCHEMA_VERSION,
    FACTION_SCHEMA_VERSION, ITEM_SCHEMA_VERSION, METRICS_SCHEMA_VERSION, SHOP_SCHEMA_VERSION,
};
use crate::storage::{Persistence, ShopStock, StoreError};

const TREE_CHARACTERS: &str = "characters";
const TREE_ITEMS: &str = "items";
const TREE_FACTIONS: &str = "factions";
const TREE_SHOPS: &str = "shops";
const TREE_META: &str = "meta";
const KEY_METRICS: &[u8] = b"metrics";

/// Faction rows carry their own version byte in front of the payload.
#[derive(serde::Serialize, serde::Deserialize)]
struct FactionRow {
    schema_version: u8,
    faction: Faction,
}

/// Sled-backed store for characters, items, factions and shop stock.
pub struct SledStore {
    _db: sled::Db,
    characters: sled::Tree,
    items: sled::Tree,
    factions: sled::Tree,
    shops: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        Ok(Self {
            characters: db.open_tree(TREE_CHARACTERS)?,
            items: db.open_tree(TREE_ITEMS)?,
            factions: db.open_tree(TREE_FACTIONS)?,
            shops: db.open_tree(TREE_SHOPS)?,
            meta: db.open_tree(TREE_META)?,
            _db: db,
        })
    }

    fn character_key(id: &str) -> Vec<u8> {
        format!("characters:{}", id).into_bytes()
    }

    fn name_key(name: &str) -> Vec<u8> {
        format!("names:{}", name.to_lowercase()).into_bytes()
    }

    fn user_key(user_id: &str, character_id: &str) -> Vec<u8> {
        format!("users:{}:{}", user_id, character_id).into_bytes()
    }

    fn item_prefix(owner_id: &str) -> Vec<u8> {
        format!("items:{}:", owner_id).into_bytes()
    }

    fn item_key(owner_id: &str, fingerprint: &str) -> Vec<u8> {
        format!("items:{}:{}", owner_id, fingerprint).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, StoreError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    fn get_character(&self, id: &str) -> Result<Option<CharacterRecord>, StoreError> {
        let Some(bytes) = self.characters.get(Self::character_key(id))? else {
            return Ok(None);
        };
        let record: CharacterRecord = Self::deserialize(bytes)?;
        if record.schema_version != CHARACTER_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "character",
                expected: CHARACTER_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    /// Ids of every stored character.
    pub fn list_character_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in self.characters.scan_prefix(b"characters:") {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(id) = text.strip_prefix("characters:") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.characters.flush()?;
        self.items.flush()?;
        self.factions.flush()?;
        self.shops.flush()?;
        self.meta.flush()?;
        Ok(())
    }
}

impl Persistence for SledStore {
    fn load_character(&self, user_id: &str, name: &str) -> Result<Option<CharacterRecord>, StoreError> {
        let Some(id) = self.characters.get(Self::name_key(name))? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&id).to_string();
        Ok(self
            .get_character(&id)?
            .filter(|record| record.user_id == user_id))
    }

    fn find_character_by_user(&self, user_id: &str) -> Result<Option<CharacterRecord>, StoreError> {
        let prefix = format!("users:{}:", user_id).into_bytes();
        let mut latest: Option<CharacterRecord> = None;
        for entry in self.characters.scan_prefix(&prefix) {
            let (_, id) = entry?;
            let id = String::from_utf8_lossy(&id).to_string();
            if let Some(record) = self.get_character(&id)? {
                if latest.as_ref().map_or(true, |l| record.updated_at > l.updated_at) {
                    latest = Some(record);
                }
            }
        }
        Ok(latest)
    }

    fn save_character(&self, record: &CharacterRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.schema_version = CHARACTER_SCHEMA_VERSION;
        record.updated_at = Utc::now();
        let bytes = Self::serialize(&record)?;
        self.characters.insert(Self::character_key(&record.id), bytes)?;
        self.characters
            .insert(Self::name_key(&record.name), record.id.as_bytes())?;
        self.characters.insert(
            Self::user_key(&record.user_id, &record.id),
            record.id.as_bytes(),
        )?;
        self.characters.flush()?;
        Ok(())
    }

    fn name_taken(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.characters.contains_key(Self::name_key(name))?)
    }

    fn load_inventory(&self, owner_id: &str) -> Result<Vec<(usize, ItemInstance)>, StoreError> {
        let mut items = Vec::new();
        for entry in self.items.scan_prefix(Self::item_prefix(owner_id)) {
            let (_, bytes) = entry?;
            let record: ItemRecord = Self::deserialize(bytes)?;
            if record.schema_version != ITEM_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    entity: "item",
                    expected: ITEM_SCHEMA_VERSION,
                    found: record.schema_version,
                });
            }
            items.push((record.slot, record.item));
        }
        items.sort_by_key(|(slot, _)| *slot);
        Ok(items)
    }

    fn save_item(&self, owner_id: &str, slot: usize, item: &ItemInstance) -> Result<(), StoreError> {
        let record = ItemRecord {
            schema_version: ITEM_SCHEMA_VERSION,
            owner_id: owner_id.to_string(),
            slot,
            item: item.clone(),
        };
        self.items.insert(
            Self::item_key(owner_id, &item.fingerprint),
            Self::serialize(&record)?,
        )?;
        Ok(())
    }

    fn delete_orphaned_items(&self, owner_id: &str, keep: &[String]) -> Result<usize, StoreError> {
        let prefix = Self::item_prefix(owner_id);
        let mut stale = Vec::new();
        for entry in self.items.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let fingerprint = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            if !keep.contains(&fingerprint) {
                stale.push(key);
            }
        }
        for key in &stale {
            self.items.remove(key)?;
        }
        self.items.flush()?;
        Ok(stale.len())
    }

    fn load_factions(&self) -> Result<Vec<Faction>, StoreError> {
        let mut factions = Vec::new();
        for entry in self.factions.iter() {
            let (_, bytes) = entry?;
            let row: FactionRow = Self::deserialize(bytes)?;
            if row.schema_version != FACTION_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    entity: "faction",
                    expected: FACTION_SCHEMA_VERSION,
                    found: row.schema_version,
                });
            }
            factions.push(row.faction);
        }
        Ok(factions)
    }

    fn save_faction(&self, faction: &Faction) -> Result<(), StoreError> {
        let row = FactionRow {
            schema_version: FACTION_SCHEMA_VERSION,
            faction: faction.clone(),
        };
        self.factions
            .insert(faction.id.as_bytes(), Self::serialize(&row)?)?;
        self.factions.flush()?;
        Ok(())
    }

    fn delete_faction(&self, id: &str) -> Result<(), StoreError> {
        self.factions.remove(id.as_bytes())?;
        self.factions.flush()?;
        Ok(())
    }

    fn clear_faction_membership(&self, faction_id: &str) -> Result<usize, StoreError> {
        let mut cleared = 0;
        for id in self.list_character_ids()? {
            let Some(mut record) = self.get_character(&id)? else {
                continue;
            };
            if record.faction_id.as_deref() == Some(faction_id) {
                record.faction_id = None;
                self.save_character(&record)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn load_shop_state(&self, shop_id: &str) -> Result<Option<ShopStock>, StoreError> {
        let Some(bytes) = self.shops.get(shop_id.as_bytes())? else {
            return Ok(None);
        };
        let record: ShopStateRecord = Self::deserialize(bytes)?;
        if record.schema_version != SHOP_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "shop",
                expected: SHOP_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record.stock.into_iter().collect()))
    }

    fn save_shop_state(&self, shop_id: &str, stock: &ShopStock) -> Result<(), StoreError> {
        let mut entries: Vec<(String, Option<u32>)> =
            stock.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort();
        let record = ShopStateRecord {
            schema_version: SHOP_SCHEMA_VERSION,
            shop_id: shop_id.to_string(),
            stock: entries,
            updated_at: Utc::now(),
        };
        self.shops
            .insert(shop_id.as_bytes(), Self::serialize(&record)?)?;
        self.shops.flush()?;
        Ok(())
    }

    fn load_metrics(&self) -> Result<Option<MetricsRecord>, StoreError> {
        let Some(bytes) = self.meta.get(KEY_METRICS)? else {
            return Ok(None);
        };
        let record: MetricsRecord = Self::deserialize(bytes)?;
        if record.schema_version != METRICS_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "metrics",
                expected: METRICS_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    fn save_metrics(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let record = MetricsRecord {
            schema_version: METRICS_SCHEMA_VERSION,
            snapshot: snapshot.clone(),
            recorded_at: Utc::now(),
        };
        self.meta.insert(KEY_METRICS, Self::serialize(&record)?)?;
        self.meta.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::item::{ItemKind, ItemStats, ItemTemplate};
    use crate::game::types::{Gender, Location};
    use crate::game::types::{EntityKind, EntityRef};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(id: &str, user: &str, name: &str) -> CharacterRecord {
        CharacterRecord {
            schema_version: CHARACTER_SCHEMA_VERSION,
            id: id.into(),
            user_id: user.into(),
            name: name.into(),
            gender: Gender::Female,
            location: Location::new("town", 1, 1),
            health: 90,
            health_max: 100,
            cash: 10,
            bank: 0,
            experience: 0,
            inventory_capacity: 8,
            skills: BTreeMap::new(),
            faction_id: Some("f1".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item() -> ItemInstance {
        ItemInstance::from_template(&ItemTemplate {
            id: "knife".into(),
            name: "Knife".into(),
            kind: ItemKind::Weapon,
            price: 5,
            equip_slot: None,
            stackable: false,
            durability: 10,
            stats: ItemStats::default(),
        })
    }

    #[test]
    fn character_round_trip_and_name_lookup() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStore::open(dir.path()).expect("store");
        store.save_character(&record("c1", "u1", "Ash")).expect("save");

        assert!(store.name_taken("ASH").unwrap());
        let loaded = store.load_character("u1", "ash").unwrap().expect("owned");
        assert_eq!(loaded.health, 90);
        assert!(store.load_character("u2", "ash").unwrap().is_none());
        assert_eq!(store.find_character_by_user("u1").unwrap().unwrap().id, "c1");
    }

    #[test]
    fn orphaned_items_are_deleted() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStore::open(dir.path()).expect("store");
        let keep = item();
        let drop = item();
        store.save_item("c1", 0, &keep).unwrap();
        store.save_item("c1", 1, &drop).unwrap();
        store.save_item("c2", 0, &item()).unwrap();

        let removed = store
            .delete_orphaned_items("c1", &[keep.fingerprint.clone()])
            .unwrap();
        assert_eq!(removed, 1);
        let left = store.load_inventory("c1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].1.fingerprint, keep.fingerprint);
        assert_eq!(store.load_inventory("c2").unwrap().len(), 1);
    }

    #[test]
    fn disband_clears_stored_membership() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStore::open(dir.path()).expect("store");
        store.save_character(&record("c1", "u1", "Ash")).unwrap();
        let leader = EntityRef {
            id: "c1".into(),
            kind: EntityKind::Player,
            name: "Ash".into(),
        };
        let faction = Faction::new("f1", "Wolves", "WLF", &leader);
        store.save_faction(&faction).unwrap();
        assert_eq!(store.load_factions().unwrap().len(), 1);

        store.delete_faction("f1").unwrap();
        assert_eq!(store.clear_faction_membership("f1").unwrap(), 1);
        assert!(store.load_factions().unwrap().is_empty());
        let loaded = store.load_character("u1", "Ash").unwrap().unwrap();
        assert_eq!(loaded.faction_id, None);
    }

    #[test]
    fn shop_stock_persists() {
        let dir = TempDir::new().expect("tempdir");
        let store = SledStore::open(dir.path()).expect("store");
        let mut stock = ShopStock::new();
        stock.insert("bandage".into(), Some(2));
        stock.insert("knife".into(), None);
        store.save_shop_state("clinic", &stock).unwrap();
        assert_eq!(store.load_shop_state("clinic").unwrap(), Some(stock));
        assert!(store.load_shop_state("none").unwrap().is_none());
    }

    #[test]
    fn metrics_outlive_the_process_that_recorded_them() {
        let dir = TempDir::new().expect("tempdir");
        let snapshot = Snapshot {
            commands_dispatched: 12,
            autosaves: 3,
            top_commands: vec![("/say".into(), 7)],
            ..Snapshot::default()
        };
        {
            let store = SledStore::open(dir.path()).expect("store");
            assert!(store.load_metrics().unwrap().is_none());
            store.save_metrics(&snapshot).unwrap();
        }
        let store = SledStore::open(dir.path()).expect("reopen");
        let record = store.load_metrics().unwrap().unwrap();
        assert_eq!(record.snapshot, snapshot);
        assert_eq!(record.schema_version, METRICS_SCHEMA_VERSION);
    }
}
