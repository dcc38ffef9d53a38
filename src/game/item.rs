//! Item templates, live item instances and the slot-keyed inventory.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Armor,
    Ammo,
    Consumable,
    Trash,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Armor,
    Ammo,
}

impl EquipSlot {
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "weapon" => Some(EquipSlot::Weapon),
            "armor" | "armour" => Some(EquipSlot::Armor),
            "ammo" => Some(EquipSlot::Ammo),
            _ => None,
        }
    }
}

/// Combat-relevant numbers copied onto every instance at creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ItemStats {
    pub damage_min: u32,
    pub damage_max: u32,
    pub ranged: bool,
    /// Ammo type a ranged weapon fires, or the type a piece of ammo provides.
    pub ammo_type: Option<String>,
    pub damage_bonus: u32,
    pub armor_reduction: u32,
    pub heal_amount: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemTemplate {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub price: u64,
    #[serde(default)]
    pub equip_slot: Option<EquipSlot>,
    /// Stackable items use `durability` as their quantity.
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "default_durability")]
    pub durability: u32,
    #[serde(default)]
    pub stats: ItemStats,
}

fn default_durability() -> u32 {
    1
}

/// A live item. Ownership (inventory slot, ground cell or shop list) is
/// implied by the container holding it, never stored twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemInstance {
    /// Process-unique identity distinguishing otherwise identical items.
    pub fingerprint: String,
    pub template_id: String,
    pub name: String,
    pub kind: ItemKind,
    pub durability: u32,
    pub max_durability: u32,
    pub price: u64,
    pub equip_slot: Option<EquipSlot>,
    pub stackable: bool,
    #[serde(default)]
    pub equipped: bool,
    pub stats: ItemStats,
}

pub fn new_fingerprint() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl ItemInstance {
    pub fn from_template(template: &ItemTemplate) -> Self {
        Self {
            fingerprint: new_fingerprint(),
            template_id: template.id.clone(),
            name: template.name.clone(),
            kind: template.kind,
            durability: template.durability,
            max_durability: template.durability.max(1),
            price: template.price,
            equip_slot: template.equip_slot,
            stackable: template.stackable,
            equipped: false,
            stats: template.stats.clone(),
        }
    }

    /// A stack of `quantity` units (or a single item with that durability).
    pub fn with_quantity(template: &ItemTemplate, quantity: u32) -> Self {
        let mut item = Self::from_template(template);
        if template.stackable {
            item.durability = quantity;
            item.max_durability = item.max_durability.max(quantity);
        }
        item
    }

    /// Units represented by this instance.
    pub fn quantity(&self) -> u32 {
        if self.stackable {
            self.durability
        } else {
            1
        }
    }

    /// Splits `amount` units off a stack into a fresh instance.
    pub fn split(&mut self, amount: u32) -> Option<ItemInstance> {
        if !self.stackable || amount == 0 || amount >= self.durability {
            return None;
        }
        self.durability -= amount;
        let mut part = self.clone();
        part.fingerprint = new_fingerprint();
        part.durability = amount;
        part.equipped = false;
        Some(part)
    }

    pub fn durability_ratio(&self) -> f64 {
        if self.stackable || self.max_durability == 0 {
            return 1.0;
        }
        (self.durability as f64 / self.max_durability as f64).clamp(0.0, 1.0)
    }

    pub fn matches_name(&self, query: &str) -> bool {
        self.template_id.eq_ignore_ascii_case(query) || self.name.eq_ignore_ascii_case(query)
    }
}

/// Read-only item definitions loaded from content.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    templates: HashMap<String, ItemTemplate>,
}

impl ItemCatalog {
    pub fn new(templates: impl IntoIterator<Item = ItemTemplate>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ItemTemplate> {
        self.templates.get(id)
    }

    /// Lookup by id first, then by case-insensitive name.
    pub fn find(&self, query: &str) -> Option<&ItemTemplate> {
        let query = query.trim();
        if let Some(t) = self.templates.get(query) {
            return Some(t);
        }
        let lower = query.to_ascii_lowercase();
        self.templates
            .values()
            .find(|t| t.id.to_ascii_lowercase() == lower || t.name.to_ascii_lowercase() == lower)
    }

    pub fn instantiate(&self, id: &str, quantity: u32) -> Option<ItemInstance> {
        self.get(id).map(|t| ItemInstance::with_quantity(t, quantity))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Bounded inventory keyed by slot number (0-based).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub capacity: usize,
    slots: BTreeMap<usize, ItemInstance>,
}

impl Inventory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn get(&self, slot: usize) -> Option<&ItemInstance> {
        self.slots.get(&slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut ItemInstance> {
        self.slots.get_mut(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &ItemInstance)> {
        self.slots.iter()
    }

    pub fn occupied_slots(&self) -> Vec<usize> {
        self.slots.keys().copied().collect()
    }

    /// Puts the item in the first free slot. Stackables merge into an
    /// existing unequipped stack of the same template first.
    pub fn add(&mut self, item: ItemInstance) -> Result<usize, ItemInstance> {
        if item.stackable {
            if let Some((slot, stack)) = self
                .slots
                .iter_mut()
                .find(|(_, s)| s.template_id == item.template_id && s.stackable)
            {
                stack.durability = stack.durability.saturating_add(item.durability);
                stack.max_durability = stack.max_durability.max(stack.durability);
                return Ok(*slot);
            }
        }
        match (0..self.capacity).find(|s| !self.slots.contains_key(s)) {
            Some(slot) => {
                self.slots.insert(slot, item);
                Ok(slot)
            }
            None => Err(item),
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<ItemInstance> {
        self.slots.remove(&slot)
    }

    pub fn remove_by_fingerprint(&mut self, fingerprint: &str) -> Option<ItemInstance> {
        let slot = self
            .slots
            .iter()
            .find(|(_, i)| i.fingerprint == fingerprint)
            .map(|(s, _)| *s)?;
        self.slots.remove(&slot)
    }

    /// First slot holding an item of the template (or name).
    pub fn find(&self, query: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|(_, i)| i.matches_name(query))
            .map(|(s, _)| *s)
    }

    pub fn count_of(&self, template_id: &str) -> u32 {
        self.slots
            .values()
            .filter(|i| i.template_id == template_id)
            .map(|i| i.quantity())
            .sum()
    }

    /// Takes up to `amount` units of a template out of the inventory.
    /// Equipped items are only taken when nothing else matches.
    pub fn take(&mut self, template_id: &str, amount: u32) -> Vec<ItemInstance> {
        let mut taken = Vec::new();
        let mut remaining = amount;
        let mut candidates: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, i)| i.template_id == template_id)
            .map(|(s, _)| *s)
            .collect();
        candidates.sort_by_key(|s| self.slots.get(s).map(|i| i.equipped).unwrap_or(false));
        for slot in candidates {
            if remaining == 0 {
                break;
            }
            let Some(item) = self.slots.get_mut(&slot) else {
                continue;
            };
            if item.stackable && item.durability > remaining {
                if let Some(part) = item.split(remaining) {
                    taken.push(part);
                    remaining = 0;
                }
                continue;
            }
            remaining = remaining.saturating_sub(item.quantity());
            if let Some(mut whole) = self.slots.remove(&slot) {
                whole.equipped = false;
                taken.push(whole);
            }
        }
        taken
    }

    pub fn equipped(&self, slot: EquipSlot) -> Option<(usize, &ItemInstance)> {
        self.slots
            .iter()
            .find(|(_, i)| i.equipped && i.equip_slot == Some(slot))
            .map(|(s, i)| (*s, i))
    }

    pub fn equipped_mut(&mut self, slot: EquipSlot) -> Option<&mut ItemInstance> {
        self.slots
            .values_mut()
            .find(|i| i.equipped && i.equip_slot == Some(slot))
    }

    /// Equips the item in `slot`, un-equipping whatever held its equip slot.
    pub fn equip(&mut self, slot: usize) -> Result<EquipSlot, &'static str> {
        let equip_slot = match self.slots.get(&slot) {
            Some(item) => item.equip_slot.ok_or("That item cannot be equipped.")?,
            None => return Err("There is nothing in that slot."),
        };
        for item in self.slots.values_mut() {
            if item.equip_slot == Some(equip_slot) {
                item.equipped = false;
            }
        }
        if let Some(item) = self.slots.get_mut(&slot) {
            item.equipped = true;
        }
        Ok(equip_slot)
    }

    pub fn unequip(&mut self, equip_slot: EquipSlot) -> Option<String> {
        let item = self.equipped_mut(equip_slot)?;
        item.equipped = false;
        Some(item.name.clone())
    }

    /// Removes and returns every unequipped item.
    pub fn drain_unequipped(&mut self) -> Vec<ItemInstance> {
        let slots: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, i)| !i.equipped)
            .map(|(s, _)| *s)
            .collect();
        slots
            .into_iter()
            .filter_map(|s| self.slots.remove(&s))
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<ItemInstance> {
        std::mem::take(&mut self.slots)
            .into_values()
            .map(|mut i| {
                i.equipped = false;
                i
            })
            .collect()
    }

    /// Rebuilds an inventory from persisted `(slot, item)` pairs.
    pub fn restore(capacity: usize, items: impl IntoIterator<Item = (usize, ItemInstance)>) -> Self {
        let mut inv = Self::new(capacity);
        for (slot, item) in items {
            if slot < capacity && !inv.slots.contains_key(&slot) {
                inv.slots.insert(slot, item);
            } else if let Err(lost) = inv.add(item) {
                log::warn!("dropping item {} on restore: inventory full", lost.fingerprint);
            }
        }
        inv
    }
}
