//! Live entity registry.
//!
//! Each entity sits behind its own mutex. The registry index (ids, names,
//! cell occupancy) is a separate `RwLock` that is only ever taken briefly
//! and never while waiting on an entity lock, so the lock order is always
//! entity first, index second.
//!
//! Operations touching two entities lock them through [`lock_pair`], which
//! orders by id to keep concurrent cross-entity work deadlock free.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::game::entity::Entity;
use crate::game::errors::{GameError, GameResult};
use crate::game::types::{EntityId, EntityKind, EntityRef, Location};

pub type EntityHandle = Arc<Mutex<Entity>>;

/// Locks one entity. A poisoned lock still yields the data: a panic in one
/// handler must not take a player out of the world.
pub fn lock(handle: &EntityHandle) -> MutexGuard<'_, Entity> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Locks two distinct entities in id order and returns the guards in the
/// order they were asked for.
pub fn lock_pair<'a>(
    a: &'a EntityHandle,
    a_id: &str,
    b: &'a EntityHandle,
    b_id: &str,
) -> GameResult<(MutexGuard<'a, Entity>, MutexGuard<'a, Entity>)> {
    if a_id == b_id || Arc::ptr_eq(a, b) {
        return Err(GameError::invalid("You can't do that to yourself."));
    }
    if a_id < b_id {
        let ga = lock(a);
        let gb = lock(b);
        Ok((ga, gb))
    } else {
        let gb = lock(b);
        let ga = lock(a);
        Ok((ga, gb))
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    handle: EntityHandle,
    kind: EntityKind,
    name: String,
    location: Location,
    present: bool,
    hidden: bool,
    user_id: Option<String>,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<EntityId, IndexEntry>,
    cells: HashMap<Location, BTreeSet<EntityId>>,
    users: HashMap<String, EntityId>,
}

impl Index {
    fn vacate_cell(&mut self, id: &str, location: &Location) {
        if let Some(cell) = self.cells.get_mut(location) {
            cell.remove(id);
            if cell.is_empty() {
                self.cells.remove(location);
            }
        }
    }
}

/// Name lookup breadth for [`EntityRegistry::resolve_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Cell(Location),
    Map(String),
}

impl Scope {
    fn contains(&self, location: &Location) -> bool {
        match self {
            Scope::Cell(cell) => cell == location,
            Scope::Map(map_id) => &location.map_id == map_id,
        }
    }
}

/// Lowercase with collapsed whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    index: RwLock<Index>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    fn entry_for(entity: Entity) -> (EntityId, IndexEntry) {
        let id = entity.state.id.clone();
        let entry = IndexEntry {
            kind: entity.state.kind,
            name: entity.state.name.clone(),
            location: entity.state.location.clone(),
            present: entity.is_present(),
            hidden: entity.state.hidden,
            user_id: entity.player().map(|p| p.user_id.clone()),
            handle: Arc::new(Mutex::new(entity)),
        };
        (id, entry)
    }

    fn place(index: &mut Index, id: EntityId, entry: IndexEntry) {
        if let Some(old) = index.entries.remove(&id) {
            index.vacate_cell(&id, &old.location);
        }
        if let Some(user) = &entry.user_id {
            index.users.insert(user.clone(), id.clone());
        }
        if entry.present {
            index.cells.entry(entry.location.clone()).or_default().insert(id.clone());
        }
        index.entries.insert(id, entry);
    }

    /// Registers an entity and places it in its cell. Returns the handle.
    pub fn insert(&self, entity: Entity) -> EntityHandle {
        let (id, entry) = Self::entry_for(entity);
        let handle = entry.handle.clone();
        Self::place(&mut self.write(), id, entry);
        handle
    }

    /// Registers a player unless its id, its user or its name (ignoring
    /// case) is already live. Check and insert share one index lock, so of
    /// two logins racing for a name exactly one gets in.
    pub fn insert_player(&self, entity: Entity) -> GameResult<EntityHandle> {
        let (id, entry) = Self::entry_for(entity);
        let key = normalize_name(&entry.name);
        let mut index = self.write();
        if index.entries.contains_key(&id) {
            return Err(GameError::Conflict(format!("{} is already in the world.", entry.name)));
        }
        if entry.user_id.as_ref().is_some_and(|u| index.users.contains_key(u)) {
            return Err(GameError::Conflict("You are already in the world.".into()));
        }
        let clash = index
            .entries
            .values()
            .any(|e| e.kind == EntityKind::Player && normalize_name(&e.name) == key);
        if clash {
            return Err(GameError::Conflict(format!("The name {} is taken.", entry.name)));
        }
        let handle = entry.handle.clone();
        Self::place(&mut index, id, entry);
        Ok(handle)
    }

    pub fn remove(&self, id: &str) -> Option<EntityHandle> {
        let mut index = self.write();
        let entry = index.entries.remove(id)?;
        index.vacate_cell(id, &entry.location);
        if let Some(user) = &entry.user_id {
            if index.users.get(user).map(String::as_str) == Some(id) {
                index.users.remove(user);
            }
        }
        Some(entry.handle)
    }

    pub fn get(&self, id: &str) -> Option<EntityHandle> {
        self.read().entries.get(id).map(|e| e.handle.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().entries.contains_key(id)
    }

    pub fn by_user(&self, user_id: &str) -> Option<EntityId> {
        self.read().users.get(user_id).cloned()
    }

    /// Owning user of a player entity.
    pub fn user_of(&self, id: &str) -> Option<String> {
        self.read().entries.get(id).and_then(|e| e.user_id.clone())
    }

    pub fn location_of(&self, id: &str) -> Option<Location> {
        self.read().entries.get(id).map(|e| e.location.clone())
    }

    /// Keeps the cell index in step with an entity's location. Call while
    /// still holding the entity lock that changed it.
    pub fn relocate(&self, id: &str, to: &Location) {
        let mut index = self.write();
        let Some(entry) = index.entries.get(id) else {
            return;
        };
        let from = entry.location.clone();
        let present = entry.present;
        index.vacate_cell(id, &from);
        if present {
            index.cells.entry(to.clone()).or_default().insert(id.to_string());
        }
        if let Some(entry) = index.entries.get_mut(id) {
            entry.location = to.clone();
        }
    }

    /// Marks an entity present (alive) or absent (dead NPC).
    pub fn set_present(&self, id: &str, present: bool) {
        let mut index = self.write();
        let Some(entry) = index.entries.get_mut(id) else {
            return;
        };
        entry.present = present;
        let location = entry.location.clone();
        if present {
            index.cells.entry(location).or_default().insert(id.to_string());
        } else {
            index.vacate_cell(id, &location);
        }
    }

    pub fn set_hidden(&self, id: &str, hidden: bool) {
        if let Some(entry) = self.write().entries.get_mut(id) {
            entry.hidden = hidden;
        }
    }

    pub fn rename(&self, id: &str, name: &str) {
        if let Some(entry) = self.write().entries.get_mut(id) {
            entry.name = name.to_string();
        }
    }

    /// Everyone present in a cell, hidden entities included.
    pub fn in_cell(&self, location: &Location) -> Vec<EntityRef> {
        let index = self.read();
        index
            .cells
            .get(location)
            .into_iter()
            .flatten()
            .filter_map(|id| index.entries.get(id).map(|e| (id, e)))
            .map(|(id, e)| EntityRef {
                id: id.clone(),
                kind: e.kind,
                name: e.name.clone(),
            })
            .collect()
    }

    /// Visible entities in a cell.
    pub fn visible_in_cell(&self, location: &Location) -> Vec<EntityRef> {
        let index = self.read();
        index
            .cells
            .get(location)
            .into_iter()
            .flatten()
            .filter_map(|id| index.entries.get(id).map(|e| (id, e)))
            .filter(|(_, e)| !e.hidden)
            .map(|(id, e)| EntityRef {
                id: id.clone(),
                kind: e.kind,
                name: e.name.clone(),
            })
            .collect()
    }

    pub fn ids_of_kind(&self, kind: EntityKind) -> Vec<EntityId> {
        self.read()
            .entries
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn players(&self) -> Vec<EntityRef> {
        let index = self.read();
        let mut refs: Vec<EntityRef> = index
            .entries
            .iter()
            .filter(|(_, e)| e.kind == EntityKind::Player)
            .map(|(id, e)| EntityRef {
                id: id.clone(),
                kind: e.kind,
                name: e.name.clone(),
            })
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        refs
    }

    /// Every handle, for tick and autosave sweeps.
    pub fn handles(&self) -> Vec<(EntityId, EntityHandle)> {
        self.read()
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Two-stage lookup among visible, present entities in `scope`: exact
    /// case-insensitive name first, then the first name with the query as
    /// a prefix. `exclude` (the invoker) never matches.
    pub fn resolve_name(
        &self,
        query: &str,
        scope: &Scope,
        kind: Option<EntityKind>,
        exclude: &str,
    ) -> Option<EntityRef> {
        let query = normalize_name(query);
        if query.is_empty() {
            return None;
        }
        let index = self.read();
        let mut candidates: Vec<(&EntityId, &IndexEntry)> = index
            .entries
            .iter()
            .filter(|(id, e)| {
                id.as_str() != exclude
                    && e.present
                    && !e.hidden
                    && scope.contains(&e.location)
                    && kind.map_or(true, |k| k == e.kind)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.name.cmp(&b.1.name).then_with(|| a.0.cmp(b.0)));

        let to_ref = |(id, e): &(&EntityId, &IndexEntry)| EntityRef {
            id: (*id).clone(),
            kind: e.kind,
            name: e.name.clone(),
        };
        candidates
            .iter()
            .find(|(_, e)| normalize_name(&e.name) == query)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|(_, e)| normalize_name(&e.name).starts_with(&query))
            })
            .map(to_ref)
    }
}
