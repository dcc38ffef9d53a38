//! Static content: item, NPC, shop and loot definitions plus the maps.
//!
//! Content is read once at startup from a JSON file and never mutated. A
//! content file that fails [`Content::validate`] aborts startup.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::game::item::{EquipSlot, ItemKind, ItemStats, ItemTemplate};
use crate::game::map::{GameMap, NpcSpawn, Point, Structure};
use crate::game::shop::{BuyList, Resupply, SellList, Shop, ShopItem};
use crate::game::types::Gender;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse content: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid content: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Interval for an NPC logic timer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerInterval {
    Fixed { seconds: f64 },
    Random { min: f64, max: f64 },
}

impl TimerInterval {
    /// Next firing delay; randomized intervals draw a fresh value each call.
    pub fn next_seconds<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            TimerInterval::Fixed { seconds } => seconds,
            TimerInterval::Random { min, max } if max > min => rng.gen_range(min..=max),
            TimerInterval::Random { min, .. } => min,
        }
    }

    fn is_valid(&self) -> bool {
        match *self {
            TimerInterval::Fixed { seconds } => seconds > 0.0,
            TimerInterval::Random { min, max } => min > 0.0 && max >= min,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcLogic {
    #[serde(default, rename = "move")]
    pub move_interval: Option<TimerInterval>,
    #[serde(default, rename = "attack")]
    pub attack_interval: Option<TimerInterval>,
    #[serde(default = "default_respawn_seconds")]
    pub respawn_seconds: f64,
}

fn default_respawn_seconds() -> f64 {
    30.0
}

impl Default for NpcLogic {
    fn default() -> Self {
        Self {
            move_interval: None,
            attack_interval: None,
            respawn_seconds: default_respawn_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcTemplate {
    pub id: String,
    /// Candidate display names; a random one is picked on every spawn.
    pub names: Vec<String>,
    #[serde(default)]
    pub genders: Vec<Gender>,
    pub health: u32,
    #[serde(default)]
    pub cash: u64,
    #[serde(default = "default_npc_accuracy")]
    pub accuracy: f64,
    /// Experience granted to whoever kills it.
    #[serde(default)]
    pub experience_reward: u64,
    #[serde(default = "default_npc_capacity")]
    pub inventory_capacity: usize,
    /// Item template ids created and equipped on spawn.
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub loot_table: Option<String>,
    #[serde(default)]
    pub shop_id: Option<String>,
    /// Skip ammo and stack consumption.
    #[serde(default = "default_true")]
    pub ignore_quantity: bool,
    #[serde(default)]
    pub logic: NpcLogic,
}

fn default_npc_accuracy() -> f64 {
    50.0
}

fn default_npc_capacity() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl NpcTemplate {
    pub fn random_name<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        if self.names.is_empty() {
            return self.id.clone();
        }
        self.names[rng.gen_range(0..self.names.len())].clone()
    }

    pub fn random_gender<R: Rng + ?Sized>(&self, rng: &mut R) -> Gender {
        if self.genders.is_empty() {
            return if rng.gen_bool(0.5) {
                Gender::Male
            } else {
                Gender::Female
            };
        }
        self.genders[rng.gen_range(0..self.genders.len())]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LootEntry {
    pub item_id: String,
    /// Drop probability in `0.0..=1.0`.
    pub chance: f64,
    #[serde(default = "default_loot_amount")]
    pub amount: u32,
}

fn default_loot_amount() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LootTable {
    pub id: String,
    #[serde(default)]
    pub entries: Vec<LootEntry>,
}

impl LootTable {
    /// Rolls every entry independently. Returns `(item_id, amount)` pairs.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(String, u32)> {
        self.entries
            .iter()
            .filter(|e| rng.gen_bool(e.chance.clamp(0.0, 1.0)))
            .map(|e| (e.item_id.clone(), e.amount))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub items: Vec<ItemTemplate>,
    #[serde(default)]
    pub npcs: Vec<NpcTemplate>,
    #[serde(default)]
    pub shops: Vec<Shop>,
    #[serde(default)]
    pub loot_tables: Vec<LootTable>,
    #[serde(default)]
    pub maps: Vec<GameMap>,
}

impl Content {
    pub fn from_json(text: &str) -> Result<Self, ContentError> {
        let content: Content = serde_json::from_str(text)?;
        content.validate()?;
        Ok(content)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ContentError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ContentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks referential integrity. Every problem is reported, not just
    /// the first one.
    pub fn validate(&self) -> Result<(), ContentError> {
        let mut problems = Vec::new();
        let items: HashSet<&str> = self.items.iter().map(|i| i.id.as_str()).collect();
        let npcs: HashSet<&str> = self.npcs.iter().map(|n| n.id.as_str()).collect();
        let shops: HashSet<&str> = self.shops.iter().map(|s| s.id.as_str()).collect();
        let loot: HashSet<&str> = self.loot_tables.iter().map(|l| l.id.as_str()).collect();

        check_unique("item", self.items.iter().map(|i| i.id.as_str()), &mut problems);
        check_unique("npc", self.npcs.iter().map(|n| n.id.as_str()), &mut problems);
        check_unique("shop", self.shops.iter().map(|s| s.id.as_str()), &mut problems);
        check_unique("map", self.maps.iter().map(|m| m.id.as_str()), &mut problems);

        if self.maps.is_empty() {
            problems.push("at least one map is required".to_string());
        }

        for item in &self.items {
            if item.stats.damage_min > item.stats.damage_max {
                problems.push(format!("item {}: damage_min exceeds damage_max", item.id));
            }
        }

        for npc in &self.npcs {
            if npc.health == 0 {
                problems.push(format!("npc {}: health must be positive", npc.id));
            }
            for id in &npc.equipment {
                if !items.contains(id.as_str()) {
                    problems.push(format!("npc {}: unknown equipment {}", npc.id, id));
                }
            }
            if let Some(table) = &npc.loot_table {
                if !loot.contains(table.as_str()) {
                    problems.push(format!("npc {}: unknown loot table {}", npc.id, table));
                }
            }
            if let Some(shop) = &npc.shop_id {
                if !shops.contains(shop.as_str()) {
                    problems.push(format!("npc {}: unknown shop {}", npc.id, shop));
                }
            }
            for interval in [npc.logic.move_interval, npc.logic.attack_interval]
                .iter()
                .flatten()
            {
                if !interval.is_valid() {
                    problems.push(format!("npc {}: invalid timer interval", npc.id));
                }
            }
        }

        for shop in &self.shops {
            for entry in &shop.sell.list {
                if !items.contains(entry.id.as_str()) {
                    problems.push(format!("shop {}: unknown item {}", shop.id, entry.id));
                }
            }
            for id in &shop.buy.list {
                if !items.contains(id.as_str()) {
                    problems.push(format!("shop {}: unknown buy item {}", shop.id, id));
                }
            }
        }

        for table in &self.loot_tables {
            for entry in &table.entries {
                if !items.contains(entry.item_id.as_str()) {
                    problems.push(format!("loot {}: unknown item {}", table.id, entry.item_id));
                }
            }
        }

        for map in &self.maps {
            if map.width <= 0 || map.height <= 0 {
                problems.push(format!("map {}: empty grid", map.id));
                continue;
            }
            if !map.in_bounds(map.respawn.x, map.respawn.y) {
                problems.push(format!("map {}: respawn point out of bounds", map.id));
            }
            for s in &map.structures {
                if !map.in_bounds(s.x, s.y) {
                    problems.push(format!("map {}: structure {} out of bounds", map.id, s.id));
                }
                if let Some(shop) = &s.shop_id {
                    if !shops.contains(shop.as_str()) {
                        problems.push(format!(
                            "map {}: structure {} references unknown shop {}",
                            map.id, s.id, shop
                        ));
                    }
                }
            }
            for spawn in &map.npc_spawns {
                if !npcs.contains(spawn.template_id.as_str()) {
                    problems.push(format!(
                        "map {}: unknown npc template {}",
                        map.id, spawn.template_id
                    ));
                }
                if let Some(p) = spawn.location {
                    if !map.in_bounds(p.x, p.y) {
                        problems.push(format!(
                            "map {}: spawn of {} out of bounds",
                            map.id, spawn.template_id
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ContentError::Invalid(problems))
        }
    }

    pub fn npc_templates(&self) -> HashMap<String, NpcTemplate> {
        self.npcs.iter().map(|n| (n.id.clone(), n.clone())).collect()
    }

    pub fn loot_table_map(&self) -> HashMap<String, LootTable> {
        self.loot_tables
            .iter()
            .map(|l| (l.id.clone(), l.clone()))
            .collect()
    }

    /// A small two-map world: a town with a bank, clinic and trader, and
    /// the wastes populated by rats and a raider.
    pub fn starter() -> Self {
        let items = vec![
            item("knife", "Knife", ItemKind::Weapon, 25, Some(EquipSlot::Weapon), 60, ItemStats {
                damage_min: 2,
                damage_max: 5,
                ..Default::default()
            }),
            item("sword", "Sword", ItemKind::Weapon, 60, Some(EquipSlot::Weapon), 100, ItemStats {
                damage_min: 4,
                damage_max: 9,
                ..Default::default()
            }),
            item("pistol", "Pistol", ItemKind::Weapon, 120, Some(EquipSlot::Weapon), 150, ItemStats {
                damage_min: 5,
                damage_max: 10,
                ranged: true,
                ammo_type: Some("9mm".into()),
                ..Default::default()
            }),
            ItemTemplate {
                stackable: true,
                ..item("ammo_9mm", "9mm Rounds", ItemKind::Ammo, 2, Some(EquipSlot::Ammo), 1, ItemStats {
                    ammo_type: Some("9mm".into()),
                    damage_bonus: 2,
                    ..Default::default()
                })
            },
            item("leather_armor", "Leather Armor", ItemKind::Armor, 45, Some(EquipSlot::Armor), 40, ItemStats {
                armor_reduction: 3,
                ..Default::default()
            }),
            ItemTemplate {
                stackable: true,
                ..item("bandage", "Bandage", ItemKind::Consumable, 12, None, 1, ItemStats {
                    heal_amount: 15,
                    ..Default::default()
                })
            },
            ItemTemplate {
                stackable: true,
                ..item("rat_tail", "Rat Tail", ItemKind::Trash, 3, None, 1, ItemStats::default())
            },
        ];

        let npcs = vec![
            NpcTemplate {
                id: "rat".into(),
                names: vec!["Sewer Rat".into(), "Mangy Rat".into(), "Giant Rat".into()],
                genders: vec![],
                health: 12,
                cash: 0,
                accuracy: 40.0,
                experience_reward: 5,
                inventory_capacity: 4,
                equipment: vec![],
                loot_table: Some("rat".into()),
                shop_id: None,
                ignore_quantity: true,
                logic: NpcLogic {
                    move_interval: Some(TimerInterval::Random { min: 4.0, max: 10.0 }),
                    attack_interval: Some(TimerInterval::Fixed { seconds: 2.0 }),
                    respawn_seconds: 20.0,
                },
            },
            NpcTemplate {
                id: "raider".into(),
                names: vec!["Raider Vex".into(), "Raider Kord".into()],
                genders: vec![],
                health: 40,
                cash: 25,
                accuracy: 55.0,
                experience_reward: 25,
                inventory_capacity: 6,
                equipment: vec!["pistol".into(), "ammo_9mm".into(), "leather_armor".into()],
                loot_table: Some("raider".into()),
                shop_id: None,
                ignore_quantity: true,
                logic: NpcLogic {
                    move_interval: Some(TimerInterval::Random { min: 6.0, max: 15.0 }),
                    attack_interval: Some(TimerInterval::Fixed { seconds: 3.0 }),
                    respawn_seconds: 60.0,
                },
            },
            NpcTemplate {
                id: "trader".into(),
                names: vec!["Old Marta".into()],
                genders: vec![Gender::Female],
                health: 80,
                cash: 0,
                accuracy: 70.0,
                experience_reward: 0,
                inventory_capacity: 4,
                equipment: vec!["sword".into()],
                loot_table: None,
                shop_id: Some("trader".into()),
                ignore_quantity: true,
                logic: NpcLogic {
                    move_interval: None,
                    attack_interval: Some(TimerInterval::Fixed { seconds: 2.5 }),
                    respawn_seconds: 120.0,
                },
            },
        ];

        let shops = vec![
            Shop {
                sell: SellList {
                    list: vec![ShopItem {
                        resupply: Some(Resupply { amount: 2, max: 5 }),
                        ..ShopItem::limited("bandage", 3, 10)
                    }],
                },
                buy: BuyList {
                    list: vec!["bandage".into()],
                    kinds: vec![ItemKind::Trash],
                },
                ..Shop::new("clinic", "Town Clinic")
            },
            Shop {
                sell: SellList {
                    list: vec![
                        ShopItem::infinite("knife", 25),
                        ShopItem {
                            required_experience: 50,
                            ..ShopItem::limited("sword", 2, 60)
                        },
                        ShopItem {
                            required_experience: 100,
                            resupply: Some(Resupply { amount: 1, max: 1 }),
                            ..ShopItem::limited("pistol", 1, 120)
                        },
                        ShopItem {
                            dynamic_pricing: true,
                            resupply: Some(Resupply { amount: 40, max: 100 }),
                            ..ShopItem::limited("ammo_9mm", 100, 2)
                        },
                        ShopItem::limited("leather_armor", 3, 45),
                    ],
                },
                buy: BuyList {
                    list: vec![],
                    kinds: vec![ItemKind::Weapon, ItemKind::Armor, ItemKind::Ammo],
                },
                price_multiplier: 1.1,
                sell_multiplier: 0.4,
                ..Shop::new("trader", "Marta's Wares")
            },
        ];

        let loot_tables = vec![
            LootTable {
                id: "rat".into(),
                entries: vec![LootEntry {
                    item_id: "rat_tail".into(),
                    chance: 0.6,
                    amount: 1,
                }],
            },
            LootTable {
                id: "raider".into(),
                entries: vec![
                    LootEntry {
                        item_id: "ammo_9mm".into(),
                        chance: 0.8,
                        amount: 6,
                    },
                    LootEntry {
                        item_id: "bandage".into(),
                        chance: 0.4,
                        amount: 1,
                    },
                ],
            },
        ];

        let maps = vec![
            GameMap {
                id: "town".into(),
                name: "Old Town".into(),
                width: 10,
                height: 10,
                respawn: Point { x: 5, y: 5 },
                structures: vec![
                    structure("bank", "First Bank", 5, 5, &["bank"], None),
                    structure("clinic", "Town Clinic", 4, 5, &["shop"], Some("clinic")),
                    structure("terminal", "Travel Terminal", 5, 4, &["travel"], None),
                ],
                npc_spawns: vec![NpcSpawn {
                    template_id: "trader".into(),
                    count: 1,
                    location: Some(Point { x: 6, y: 5 }),
                }],
            },
            GameMap {
                id: "wastes".into(),
                name: "The Wastes".into(),
                width: 16,
                height: 16,
                respawn: Point { x: 0, y: 0 },
                structures: vec![structure("outpost", "Outpost Terminal", 0, 0, &["travel"], None)],
                npc_spawns: vec![
                    NpcSpawn {
                        template_id: "rat".into(),
                        count: 6,
                        location: None,
                    },
                    NpcSpawn {
                        template_id: "raider".into(),
                        count: 2,
                        location: None,
                    },
                ],
            },
        ];

        Self {
            items,
            npcs,
            shops,
            loot_tables,
            maps,
        }
    }
}

fn check_unique<'a>(what: &str, ids: impl Iterator<Item = &'a str>, problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            problems.push(format!("duplicate {} id {}", what, id));
        }
    }
}

fn item(
    id: &str,
    name: &str,
    kind: ItemKind,
    price: u64,
    equip_slot: Option<EquipSlot>,
    durability: u32,
    stats: ItemStats,
) -> ItemTemplate {
    ItemTemplate {
        id: id.into(),
        name: name.into(),
        kind,
        price,
        equip_slot,
        stackable: false,
        durability,
        stats,
    }
}

fn structure(
    id: &str,
    name: &str,
    x: i32,
    y: i32,
    commands: &[&str],
    shop_id: Option<&str>,
) -> Structure {
    Structure {
        id: id.into(),
        name: name.into(),
        x,
        y,
        description: String::new(),
        commands: commands.iter().map(|c| c.to_string()).collect(),
        shop_id: shop_id.map(str::to_string),
    }
}
