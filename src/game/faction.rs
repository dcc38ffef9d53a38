//! Player factions.
//!
//! Every faction lives behind its own mutex and every faction operation
//! goes through [`FactionRegistry::with_faction`], which resolves the
//! faction and runs the action inside one critical section. Disbanding sets
//! `removed` under that same lock, so a command racing a disband either
//! completes first or sees the faction as gone; it never acts on a
//! half-dismantled faction.
//!
//! Lock order: an entity lock may be held while taking a faction lock, never
//! the other way round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::game::errors::{GameError, GameResult};
use crate::game::types::{EntityId, EntityRef};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Faction {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub leader_id: EntityId,
    pub invites: Vec<EntityId>,
    /// Full roster, character id to display name.
    pub members: BTreeMap<EntityId, String>,
    /// Members currently in the world.
    #[serde(skip)]
    pub online: Vec<EntityRef>,
    #[serde(skip)]
    pub removed: bool,
    pub created_at: DateTime<Utc>,
}

impl Faction {
    pub fn new(id: &str, name: &str, tag: &str, leader: &EntityRef) -> Self {
        let mut members = BTreeMap::new();
        members.insert(leader.id.clone(), leader.name.clone());
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
            leader_id: leader.id.clone(),
            invites: Vec::new(),
            members,
            online: vec![leader.clone()],
            removed: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn is_leader(&self, id: &str) -> bool {
        self.leader_id == id
    }

    pub fn invite(&mut self, id: &str) -> bool {
        if self.is_member(id) || self.invites.iter().any(|i| i == id) {
            return false;
        }
        self.invites.push(id.to_string());
        true
    }

    /// Consumes an invite and adds the member.
    pub fn accept(&mut self, member: &EntityRef) -> GameResult<()> {
        let before = self.invites.len();
        self.invites.retain(|i| i != &member.id);
        if before == self.invites.len() {
            return Err(GameError::invalid(format!(
                "You have not been invited to {}.",
                self.name
            )));
        }
        self.members.insert(member.id.clone(), member.name.clone());
        self.set_online(member);
        Ok(())
    }

    pub fn remove_member(&mut self, id: &str) -> Option<String> {
        self.online.retain(|m| m.id != id);
        self.members.remove(id)
    }

    pub fn set_online(&mut self, member: &EntityRef) {
        if !self.online.iter().any(|m| m.id == member.id) {
            self.online.push(member.clone());
        }
    }

    pub fn set_offline(&mut self, id: &str) {
        self.online.retain(|m| m.id != id);
    }

    /// Roster id for a case-insensitive member name.
    pub fn member_by_name(&self, name: &str) -> Option<EntityId> {
        self.members
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(id, _)| id.clone())
    }
}

pub type FactionHandle = Arc<Mutex<Faction>>;

#[derive(Debug, Default)]
pub struct FactionRegistry {
    factions: RwLock<HashMap<String, FactionHandle>>,
}

fn lock_faction(handle: &FactionHandle) -> std::sync::MutexGuard<'_, Faction> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

fn gone() -> GameError {
    GameError::not_found("That faction no longer exists.")
}

impl FactionRegistry {
    pub fn new(factions: impl IntoIterator<Item = Faction>) -> Self {
        Self {
            factions: RwLock::new(
                factions
                    .into_iter()
                    .map(|f| (f.id.clone(), Arc::new(Mutex::new(f))))
                    .collect(),
            ),
        }
    }

    fn handles(&self) -> Vec<FactionHandle> {
        self.factions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn handle(&self, id: &str) -> Option<FactionHandle> {
        self.factions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Creates a faction led by `leader`. Name and tag are unique
    /// case-insensitively.
    pub fn create(&self, name: &str, tag: &str, leader: &EntityRef) -> GameResult<Faction> {
        let mut map = self.factions.write().unwrap_or_else(|e| e.into_inner());
        for handle in map.values() {
            let f = lock_faction(handle);
            if f.name.eq_ignore_ascii_case(name) {
                return Err(GameError::Conflict(format!("A faction named {} already exists.", f.name)));
            }
            if f.tag.eq_ignore_ascii_case(tag) {
                return Err(GameError::Conflict(format!("The tag [{}] is taken.", f.tag)));
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        let faction = Faction::new(&id, name, tag, leader);
        map.insert(id, Arc::new(Mutex::new(faction.clone())));
        Ok(faction)
    }

    /// Id of the faction matching an id, name or tag.
    pub fn resolve(&self, query: &str) -> Option<String> {
        let query = query.trim();
        if self.handle(query).is_some() {
            return Some(query.to_string());
        }
        self.handles().into_iter().find_map(|h| {
            let f = lock_faction(&h);
            let hit = !f.removed
                && (f.name.eq_ignore_ascii_case(query) || f.tag.eq_ignore_ascii_case(query));
            hit.then(|| f.id.clone())
        })
    }

    /// Resolves the faction and runs `action` under its lock.
    pub fn with_faction<T>(
        &self,
        id: &str,
        action: impl FnOnce(&mut Faction) -> GameResult<T>,
    ) -> GameResult<T> {
        let handle = self.handle(id).ok_or_else(gone)?;
        let mut faction = lock_faction(&handle);
        if faction.removed {
            return Err(gone());
        }
        action(&mut faction)
    }

    /// Marks the faction removed and drops it from the registry. Only the
    /// leader may disband. Returns the final snapshot so the caller can
    /// unlink members.
    pub fn disband(&self, id: &str, by: &str) -> GameResult<Faction> {
        let snapshot = self.with_faction(id, |f| {
            if !f.is_leader(by) {
                return Err(GameError::invalid("Only the faction leader can do that."));
            }
            f.removed = true;
            Ok(f.clone())
        })?;
        self.factions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(snapshot)
    }

    pub fn snapshot(&self, id: &str) -> Option<Faction> {
        let handle = self.handle(id)?;
        let f = lock_faction(&handle);
        (!f.removed).then(|| f.clone())
    }

    pub fn all(&self) -> Vec<Faction> {
        self.handles()
            .iter()
            .map(|h| lock_faction(h).clone())
            .filter(|f| !f.removed)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
