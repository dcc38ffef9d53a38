//! Items lying on grid cells. Each cell has its own lock; it is always taken
//! after any entity lock held by the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::game::item::ItemInstance;
use crate::game::types::Location;

pub type CellItems = Arc<Mutex<Vec<ItemInstance>>>;

#[derive(Debug, Default)]
pub struct GroundItems {
    cells: RwLock<HashMap<Location, CellItems>>,
}

impl GroundItems {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, location: &Location) -> CellItems {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(location)
        {
            return cell.clone();
        }
        self.cells
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(location.clone())
            .or_default()
            .clone()
    }

    /// Locks one cell's item list for a read-modify-write.
    pub fn with_cell<T>(&self, location: &Location, action: impl FnOnce(&mut Vec<ItemInstance>) -> T) -> T {
        let cell = self.cell(location);
        let mut items: MutexGuard<'_, Vec<ItemInstance>> = cell.lock().unwrap_or_else(|e| e.into_inner());
        action(&mut items)
    }

    /// Appends items to the cell, merging stackables.
    pub fn drop_items(&self, location: &Location, dropped: Vec<ItemInstance>) {
        if dropped.is_empty() {
            return;
        }
        self.with_cell(location, |items| {
            for mut item in dropped {
                item.equipped = false;
                if item.stackable {
                    if let Some(stack) = items
                        .iter_mut()
                        .find(|i| i.stackable && i.template_id == item.template_id)
                    {
                        stack.durability = stack.durability.saturating_add(item.durability);
                        stack.max_durability = stack.max_durability.max(stack.durability);
                        continue;
                    }
                }
                items.push(item);
            }
        });
    }

    pub fn list(&self, location: &Location) -> Vec<ItemInstance> {
        self.with_cell(location, |items| items.clone())
    }

    /// Takes up to `amount` units matching `query` (template id or name).
    /// Returns `None` when nothing matches.
    pub fn take(&self, location: &Location, query: &str, amount: u32) -> Option<Vec<ItemInstance>> {
        self.with_cell(location, |items| take_matching(items, query, amount))
    }

    pub fn total_items(&self) -> usize {
        let cells: Vec<CellItems> = self
            .cells
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        cells
            .iter()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }
}

/// Removes up to `amount` units matching `query` from a list.
pub fn take_matching(items: &mut Vec<ItemInstance>, query: &str, amount: u32) -> Option<Vec<ItemInstance>> {
    let mut taken = Vec::new();
    let mut remaining = amount.max(1);
    while remaining > 0 {
        let Some(pos) = items.iter().position(|i| i.matches_name(query)) else {
            break;
        };
        if items[pos].stackable && items[pos].durability > remaining {
            if let Some(part) = items[pos].split(remaining) {
                taken.push(part);
            }
            remaining = 0;
        } else {
            let item = items.remove(pos);
            remaining = remaining.saturating_sub(item.quantity());
            taken.push(item);
        }
    }
    if taken.is_empty() {
        None
    } else {
        Some(taken)
    }
}
