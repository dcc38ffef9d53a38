//! Player and NPC composition over [`CombatantState`].

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::game::combatant::{CombatantState, ACCURACY};
use crate::game::content::{NpcLogic, NpcTemplate};
use crate::game::item::ItemCatalog;
use crate::game::map::Point;
use crate::game::types::{ConnectionId, EntityKind, EntityRef, Location};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerData {
    pub user_id: String,
    /// Lowercase name, unique across all characters.
    pub name_key: String,
    pub faction_id: Option<String>,
    pub connection: Option<ConnectionId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpcData {
    pub template_id: String,
    /// Everyone who ever gridlocked this NPC. Cleared only on respawn.
    pub hostiles: Vec<EntityRef>,
    pub dead: bool,
    pub shop_id: Option<String>,
    pub loot_table: Option<String>,
    pub logic: NpcLogic,
    pub experience_reward: u64,
    pub home_map: String,
    pub fixed_spawn: Option<Point>,
}

impl NpcData {
    pub fn remember_hostile(&mut self, attacker: &EntityRef) {
        if !self.hostiles.iter().any(|h| h.id == attacker.id) {
            self.hostiles.push(attacker.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Player(PlayerData),
    Npc(NpcData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub state: CombatantState,
    pub role: Role,
}

impl Entity {
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn kind(&self) -> EntityKind {
        self.state.kind
    }

    pub fn player(&self) -> Option<&PlayerData> {
        match &self.role {
            Role::Player(p) => Some(p),
            Role::Npc(_) => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerData> {
        match &mut self.role {
            Role::Player(p) => Some(p),
            Role::Npc(_) => None,
        }
    }

    pub fn npc(&self) -> Option<&NpcData> {
        match &self.role {
            Role::Npc(n) => Some(n),
            Role::Player(_) => None,
        }
    }

    pub fn npc_mut(&mut self) -> Option<&mut NpcData> {
        match &mut self.role {
            Role::Npc(n) => Some(n),
            Role::Player(_) => None,
        }
    }

    /// Present in the world: logged in, or an NPC that is not dead.
    pub fn is_present(&self) -> bool {
        match &self.role {
            Role::Player(_) => true,
            Role::Npc(n) => !n.dead,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionId> {
        self.player().and_then(|p| p.connection.as_ref())
    }

    pub fn faction_id(&self) -> Option<&str> {
        self.player().and_then(|p| p.faction_id.as_deref())
    }
}

/// Builds a fresh NPC from its template at `location`.
pub fn spawn_npc<R: Rng + ?Sized>(
    id: &str,
    template: &NpcTemplate,
    catalog: &ItemCatalog,
    location: Location,
    fixed_spawn: Option<Point>,
    rng: &mut R,
) -> Entity {
    let mut state = CombatantState::new(
        id,
        EntityKind::Npc,
        &template.random_name(rng),
        location.clone(),
        template.health,
        template.inventory_capacity,
    );
    apply_template(&mut state, template, catalog, rng);
    Entity {
        state,
        role: Role::Npc(NpcData {
            template_id: template.id.clone(),
            hostiles: Vec::new(),
            dead: false,
            shop_id: template.shop_id.clone(),
            loot_table: template.loot_table.clone(),
            logic: template.logic.clone(),
            experience_reward: template.experience_reward,
            home_map: location.map_id,
            fixed_spawn,
        }),
    }
}

/// Resets stats, name, gender and equipment to the template defaults.
pub fn apply_template<R: Rng + ?Sized>(
    state: &mut CombatantState,
    template: &NpcTemplate,
    catalog: &ItemCatalog,
    rng: &mut R,
) {
    state.name = template.random_name(rng);
    state.gender = template.random_gender(rng);
    state.health_max = template.health;
    state.health = template.health;
    state.cash = template.cash;
    state.ignore_quantity = template.ignore_quantity;
    state.hidden = false;
    state.skills.clear();
    state.set_skill(ACCURACY, template.accuracy);
    state.cooldowns.clear();
    state.target = None;
    state.targeted_by.clear();
    state.inventory.drain_all();
    for item_id in &template.equipment {
        let Some(item) = catalog.instantiate(item_id, 1) else {
            continue;
        };
        if let Ok(slot) = state.inventory.add(item) {
            let _ = state.inventory.equip(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::content::Content;
    use crate::game::item::EquipSlot;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn spawned_npc_is_equipped_from_template() {
        let content = Content::starter();
        let catalog = ItemCatalog::new(content.items.clone());
        let raider = content.npcs.iter().find(|n| n.id == "raider").unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let npc = spawn_npc("npc-1", raider, &catalog, Location::new("wastes", 3, 3), None, &mut rng);

        assert!(raider.names.contains(&npc.state.name));
        assert!(npc.state.inventory.equipped(EquipSlot::Weapon).is_some());
        assert!(npc.state.inventory.equipped(EquipSlot::Ammo).is_some());
        assert!(npc.state.inventory.equipped(EquipSlot::Armor).is_some());
        assert!(npc.state.ignore_quantity);
        assert_eq!(npc.state.skill(ACCURACY), raider.accuracy);
        assert!(npc.is_present());
    }

    #[test]
    fn hostiles_are_remembered_once() {
        let content = Content::starter();
        let catalog = ItemCatalog::new(content.items.clone());
        let mut rng = StdRng::seed_from_u64(2);
        let mut npc = spawn_npc("npc-2", &content.npcs[0], &catalog, Location::new("wastes", 0, 0), None, &mut rng);
        let attacker = EntityRef {
            id: "p1".into(),
            kind: EntityKind::Player,
            name: "Ash".into(),
        };
        let data = npc.npc_mut().unwrap();
        data.remember_hostile(&attacker);
        data.remember_hostile(&attacker);
        assert_eq!(data.hostiles.len(), 1);
    }
}
