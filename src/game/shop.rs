//! Shop and vendor economy.
//!
//! This module provides:
//! - Sell lists with finite or infinite stock and experience requirements
//! - Buy lists accepting item ids or item kinds
//! - Price multipliers and optional scarcity-driven dynamic pricing
//! - Resupply rules applied on each new day
//! - Stock snapshots for persistence

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::game::errors::GameError;
use crate::game::item::{ItemCatalog, ItemInstance, ItemKind};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ShopError {
    #[error("That item is not for sale here.")]
    NotListed,
    #[error("That item is out of stock.")]
    OutOfStock,
    #[error("Only {available} left in stock.")]
    InsufficientStock { available: u32 },
    #[error("You need {0} experience to buy that.")]
    ExperienceRequired(u64),
    #[error("You cannot afford that ({needed} needed).")]
    InsufficientFunds { needed: u64 },
    #[error("The shop is not interested in that item.")]
    NotAccepted,
    #[error("Amount must be at least 1.")]
    ZeroQuantity,
}

impl From<ShopError> for GameError {
    fn from(e: ShopError) -> Self {
        match e {
            ShopError::InsufficientFunds { needed } => GameError::InsufficientFunds { needed },
            other => GameError::InvalidState(other.to_string()),
        }
    }
}

/// Periodic restock: add `amount` each new day, never above `max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resupply {
    pub amount: u32,
    pub max: u32,
}

/// One entry of a shop's sell list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShopItem {
    /// Item template id.
    pub id: String,
    /// Units in stock, `None` for infinite.
    #[serde(default)]
    pub shop_quantity: Option<u32>,
    /// Overrides the template price.
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub required_experience: u64,
    #[serde(default)]
    pub resupply: Option<Resupply>,
    /// Raise the price as stock falls below the resupply maximum.
    #[serde(default)]
    pub dynamic_pricing: bool,
}

impl ShopItem {
    pub fn limited(id: &str, quantity: u32, price: u64) -> Self {
        Self {
            id: id.to_string(),
            shop_quantity: Some(quantity),
            price: Some(price),
            required_experience: 0,
            resupply: None,
            dynamic_pricing: false,
        }
    }

    pub fn infinite(id: &str, price: u64) -> Self {
        Self {
            shop_quantity: None,
            ..Self::limited(id, 0, price)
        }
    }

    fn reduce_stock(&mut self, amount: u32) {
        if let Some(q) = self.shop_quantity.as_mut() {
            *q = q.saturating_sub(amount);
        }
    }

    fn increase_stock(&mut self, amount: u32) {
        if let Some(q) = self.shop_quantity.as_mut() {
            *q = q.saturating_add(amount);
        }
    }

    /// Applies the resupply rule. Returns true when stock changed.
    fn resupply(&mut self) -> bool {
        match (self.shop_quantity, &self.resupply) {
            (Some(qty), Some(rule)) if qty < rule.max => {
                self.shop_quantity = Some(qty.saturating_add(rule.amount).min(rule.max));
                true
            }
            _ => false,
        }
    }

    /// Multiplier in `[1.0, 1.5]` growing as stock is depleted.
    fn scarcity_factor(&self) -> f64 {
        if !self.dynamic_pricing {
            return 1.0;
        }
        match (self.shop_quantity, &self.resupply) {
            (Some(qty), Some(rule)) if rule.max > 0 => {
                let missing = rule.max.saturating_sub(qty) as f64 / rule.max as f64;
                1.0 + missing * 0.5
            }
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SellList {
    #[serde(default)]
    pub list: Vec<ShopItem>,
}

/// What the shop is willing to buy from players.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuyList {
    #[serde(default)]
    pub list: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<ItemKind>,
}

fn default_price_multiplier() -> f64 {
    1.0
}

fn default_sell_multiplier() -> f64 {
    0.5
}

/// A shop exposed by a structure or an NPC vendor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sell: SellList,
    #[serde(default)]
    pub buy: BuyList,
    /// Applied to what players pay.
    #[serde(default = "default_price_multiplier")]
    pub price_multiplier: f64,
    /// Applied to what the shop pays players.
    #[serde(default = "default_sell_multiplier")]
    pub sell_multiplier: f64,
}

/// Result of a completed purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub total_price: u64,
    pub items: Vec<ItemInstance>,
}

/// Listing row used for `UPDATE_SHOP` payloads and text output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShopListing {
    pub id: String,
    pub name: String,
    pub price: u64,
    pub shop_quantity: Option<u32>,
    pub required_experience: u64,
}

impl Shop {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            sell: SellList::default(),
            buy: BuyList::default(),
            price_multiplier: default_price_multiplier(),
            sell_multiplier: default_sell_multiplier(),
        }
    }

    pub fn item(&self, id: &str) -> Option<&ShopItem> {
        self.sell.list.iter().find(|i| i.id == id)
    }

    fn item_mut(&mut self, id: &str) -> Option<&mut ShopItem> {
        self.sell.list.iter_mut().find(|i| i.id == id)
    }

    /// Price of one unit including multiplier and scarcity.
    pub fn unit_price(&self, entry: &ShopItem, catalog: &ItemCatalog) -> u64 {
        let base = entry
            .price
            .or_else(|| catalog.get(&entry.id).map(|t| t.price))
            .unwrap_or(0);
        (base as f64 * self.price_multiplier * entry.scarcity_factor()).round() as u64
    }

    /// Checks a purchase without touching stock.
    pub fn quote_buy(
        &self,
        item_id: &str,
        amount: u32,
        buyer_experience: u64,
        catalog: &ItemCatalog,
    ) -> Result<u64, ShopError> {
        if amount == 0 {
            return Err(ShopError::ZeroQuantity);
        }
        let entry = self.item(item_id).ok_or(ShopError::NotListed)?;
        if buyer_experience < entry.required_experience {
            return Err(ShopError::ExperienceRequired(entry.required_experience));
        }
        match entry.shop_quantity {
            Some(0) => return Err(ShopError::OutOfStock),
            Some(available) if available < amount => {
                return Err(ShopError::InsufficientStock { available })
            }
            _ => {}
        }
        Ok(self.unit_price(entry, catalog).saturating_mul(amount as u64))
    }

    /// Validates and commits a purchase. Stock is only reduced when every
    /// check passes, so a failed purchase leaves the shop untouched.
    pub fn process_buy(
        &mut self,
        item_id: &str,
        amount: u32,
        buyer_experience: u64,
        buyer_cash: u64,
        catalog: &ItemCatalog,
    ) -> Result<Purchase, ShopError> {
        let total_price = self.quote_buy(item_id, amount, buyer_experience, catalog)?;
        if buyer_cash < total_price {
            return Err(ShopError::InsufficientFunds {
                needed: total_price,
            });
        }
        let template = catalog.get(item_id).ok_or(ShopError::NotListed)?;
        let items = if template.stackable {
            vec![ItemInstance::with_quantity(template, amount)]
        } else {
            (0..amount)
                .map(|_| ItemInstance::from_template(template))
                .collect()
        };
        if let Some(entry) = self.item_mut(item_id) {
            entry.reduce_stock(amount);
        }
        Ok(Purchase { total_price, items })
    }

    pub fn accepts(&self, item: &ItemInstance) -> bool {
        self.buy.list.iter().any(|id| id == &item.template_id) || self.buy.kinds.contains(&item.kind)
    }

    pub fn sell_price(&self, item: &ItemInstance) -> u64 {
        (item.price as f64 * self.sell_multiplier * item.durability_ratio() * item.quantity() as f64)
            .round() as u64
    }

    /// Takes an item from a player. Listed items go back into stock.
    pub fn process_sell(&mut self, item: &ItemInstance) -> Result<u64, ShopError> {
        if !self.accepts(item) {
            return Err(ShopError::NotAccepted);
        }
        let price = self.sell_price(item);
        let quantity = item.quantity();
        if let Some(entry) = self.item_mut(&item.template_id) {
            entry.increase_stock(quantity);
        }
        Ok(price)
    }

    /// New-day restock. Returns how many entries changed.
    pub fn resupply(&mut self) -> usize {
        self.sell
            .list
            .iter_mut()
            .map(|entry| entry.resupply())
            .filter(|changed| *changed)
            .count()
    }

    /// Empties every limited entry, returning `(item id, units)` removed.
    /// Used when an NPC vendor dies and its stock hits the floor.
    pub fn drain_stock(&mut self) -> Vec<(String, u32)> {
        self.sell
            .list
            .iter_mut()
            .filter_map(|entry| match entry.shop_quantity {
                Some(qty) if qty > 0 => {
                    entry.shop_quantity = Some(0);
                    Some((entry.id.clone(), qty))
                }
                _ => None,
            })
            .collect()
    }

    pub fn listing(&self, catalog: &ItemCatalog) -> Vec<ShopListing> {
        self.sell
            .list
            .iter()
            .map(|entry| ShopListing {
                id: entry.id.clone(),
                name: catalog
                    .get(&entry.id)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| entry.id.clone()),
                price: self.unit_price(entry, catalog),
                shop_quantity: entry.shop_quantity,
                required_experience: entry.required_experience,
            })
            .collect()
    }

    pub fn stock_snapshot(&self) -> HashMap<String, Option<u32>> {
        self.sell
            .list
            .iter()
            .map(|e| (e.id.clone(), e.shop_quantity))
            .collect()
    }

    /// Restores persisted stock. Unknown ids are ignored and infinite
    /// entries stay infinite.
    pub fn apply_stock(&mut self, stock: &HashMap<String, Option<u32>>) {
        for entry in self.sell.list.iter_mut() {
            if let (Some(Some(qty)), Some(_)) = (stock.get(&entry.id), entry.shop_quantity) {
                entry.shop_quantity = Some(*qty);
            }
        }
    }
}

/// Format a shop listing for the text feed.
pub fn format_shop_listing(shop: &Shop, catalog: &ItemCatalog) -> Vec<String> {
    let mut lines = vec![format!("=== {} ===", shop.name)];
    let listing = shop.listing(catalog);
    if listing.is_empty() {
        lines.push("Nothing for sale.".to_string());
        return lines;
    }
    for (idx, row) in listing.iter().enumerate() {
        let stock = match row.shop_quantity {
            Some(q) => format!(" ({})", q),
            None => String::new(),
        };
        let req = if row.required_experience > 0 {
            format!(" [{} xp]", row.required_experience)
        } else {
            String::new()
        };
        lines.push(format!("{}. {}{} - ${}{}", idx + 1, row.name, stock, row.price, req));
    }
    lines
}

/// All live shops, each behind its own lock.
#[derive(Debug, Default)]
pub struct ShopRegistry {
    shops: HashMap<String, Arc<Mutex<Shop>>>,
}

impl ShopRegistry {
    pub fn new(shops: impl IntoIterator<Item = Shop>) -> Self {
        Self {
            shops: shops
                .into_iter()
                .map(|s| (s.id.clone(), Arc::new(Mutex::new(s))))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<Shop>>> {
        self.shops.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.shops.keys().cloned().collect()
    }

    /// Runs the new-day resupply on every shop.
    pub fn resupply_all(&self) -> usize {
        self.shops
            .values()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).resupply())
            .sum()
    }
}
