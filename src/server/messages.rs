//! Outbound message types and the payloads built for them.

use serde_json::{json, Value};

use crate::game::combatant::{CombatantState, ACCURACY};
use crate::game::faction::Faction;
use crate::game::item::{ItemCatalog, ItemInstance};
use crate::game::shop::Shop;
use crate::game::types::{EntityKind, EntityRef, Location};
use crate::server::router::Envelope;

pub const COMMAND: &str = "COMMAND";
pub const AUTH: &str = "AUTH";

pub const EVENT_FEED: &str = "EVENT_FEED";
pub const COMMAND_ERROR: &str = "COMMAND_ERROR";
pub const CHAT_MESSAGE: &str = "CHAT_MESSAGE";
pub const UPDATE_CHARACTER: &str = "UPDATE_CHARACTER";
pub const UPDATE_INVENTORY: &str = "UPDATE_INVENTORY";
pub const UPDATE_LOCATION: &str = "UPDATE_LOCATION";
pub const UPDATE_GROUND_ITEMS: &str = "UPDATE_GROUND_ITEMS";
pub const CHARACTER_JOINED_GRID: &str = "CHARACTER_JOINED_GRID";
pub const CHARACTER_LEFT_GRID: &str = "CHARACTER_LEFT_GRID";
pub const NPC_JOINED_GRID: &str = "NPC_JOINED_GRID";
pub const NPC_LEFT_GRID: &str = "NPC_LEFT_GRID";
pub const COMBAT_LOG: &str = "COMBAT_LOG";
pub const UPDATE_SHOP: &str = "UPDATE_SHOP";
pub const FACTION_UPDATE: &str = "FACTION_UPDATE";
pub const NEW_DAY: &str = "NEW_DAY";

pub fn feed(text: impl Into<String>) -> Envelope {
    Envelope::new(EVENT_FEED, json!({ "message": text.into() }))
}

pub fn feed_lines(lines: &[String]) -> Envelope {
    feed(lines.join("\n"))
}

pub fn command_error(message: &str, usage: Option<&str>) -> Envelope {
    Envelope::new(
        COMMAND_ERROR,
        json!({ "message": message, "usage": usage }),
    )
}

pub fn chat(channel: &str, from: &str, message: &str) -> Envelope {
    Envelope::new(
        CHAT_MESSAGE,
        json!({ "channel": channel, "from": from, "message": message }),
    )
}

pub fn combat_log(message: impl Into<String>) -> Envelope {
    Envelope::new(COMBAT_LOG, json!({ "message": message.into() }))
}

pub fn item_json(item: &ItemInstance) -> Value {
    json!({
        "fingerprint": item.fingerprint,
        "id": item.template_id,
        "name": item.name,
        "kind": item.kind,
        "durability": item.durability,
        "maxDurability": item.max_durability,
        "equipped": item.equipped,
        "equipSlot": item.equip_slot,
    })
}

pub fn character(state: &CombatantState) -> Envelope {
    Envelope::new(
        UPDATE_CHARACTER,
        json!({
            "id": state.id,
            "name": state.name,
            "health": state.health,
            "healthMax": state.health_max,
            "cash": state.cash,
            "bank": state.bank,
            "experience": state.experience,
            "accuracy": state.skill(ACCURACY),
            "skills": state.skills,
            "hidden": state.hidden,
            "target": state.target.as_ref().map(|t| &t.name),
            "targetedBy": state.targeted_by.iter().map(|t| &t.name).collect::<Vec<_>>(),
        }),
    )
}

pub fn inventory(state: &CombatantState) -> Envelope {
    let slots: Vec<Value> = state
        .inventory
        .iter()
        .map(|(slot, item)| {
            let mut v = item_json(item);
            v["slot"] = json!(slot);
            v
        })
        .collect();
    Envelope::new(
        UPDATE_INVENTORY,
        json!({ "capacity": state.inventory.capacity, "items": slots }),
    )
}

pub fn location(location: &Location, occupants: &[EntityRef], ground: &[ItemInstance]) -> Envelope {
    Envelope::new(
        UPDATE_LOCATION,
        json!({
            "map": location.map_id,
            "x": location.x,
            "y": location.y,
            "room": location.room_key(),
            "occupants": occupants,
            "groundItems": ground.iter().map(item_json).collect::<Vec<_>>(),
        }),
    )
}

pub fn ground_items(location: &Location, items: &[ItemInstance]) -> Envelope {
    Envelope::new(
        UPDATE_GROUND_ITEMS,
        json!({
            "room": location.room_key(),
            "items": items.iter().map(item_json).collect::<Vec<_>>(),
        }),
    )
}

pub fn joined(entity: &EntityRef) -> Envelope {
    let kind = match entity.kind {
        EntityKind::Player => CHARACTER_JOINED_GRID,
        EntityKind::Npc => NPC_JOINED_GRID,
    };
    Envelope::new(kind, json!({ "id": entity.id, "name": entity.name }))
}

pub fn left(entity: &EntityRef) -> Envelope {
    let kind = match entity.kind {
        EntityKind::Player => CHARACTER_LEFT_GRID,
        EntityKind::Npc => NPC_LEFT_GRID,
    };
    Envelope::new(kind, json!({ "id": entity.id, "name": entity.name }))
}

pub fn new_day(day: u64) -> Envelope {
    Envelope::new(NEW_DAY, json!({ "day": day }))
}

pub fn shop(shop: &Shop, catalog: &ItemCatalog) -> Envelope {
    Envelope::new(
        UPDATE_SHOP,
        json!({ "id": shop.id, "name": shop.name, "items": shop.listing(catalog) }),
    )
}

/// Current roster of a faction; `None` tells the client it has none.
pub fn faction_update(faction: Option<&Faction>) -> Envelope {
    let payload = match faction {
        Some(f) => json!({
            "id": f.id,
            "name": f.name,
            "tag": f.tag,
            "leader": f.leader_id,
            "members": f.members.values().collect::<Vec<_>>(),
            "online": f.online.iter().map(|m| &m.name).collect::<Vec<_>>(),
        }),
        None => json!(null),
    };
    Envelope::new(FACTION_UPDATE, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_and_left_pick_type_by_kind() {
        let npc = EntityRef {
            id: "npc-1".into(),
            kind: EntityKind::Npc,
            name: "Rat".into(),
        };
        assert_eq!(joined(&npc).kind, NPC_JOINED_GRID);
        let player = EntityRef {
            kind: EntityKind::Player,
            ..npc
        };
        assert_eq!(left(&player).kind, CHARACTER_LEFT_GRID);
        assert_eq!(left(&player).payload["name"], "Rat");
    }
}
