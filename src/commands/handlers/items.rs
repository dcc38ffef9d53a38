use crate::commands::registry::{CommandRegistry, CommandSpec};
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::errors::{GameError, GameResult};
use crate::game::ground::take_matching;
use crate::game::item::{EquipSlot, ItemInstance};
use crate::game::registry::{lock, lock_pair};
use crate::server::messages;

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandSpec::new("/inventory", "List what you carry.", inventory));
    registry.alias("/inv", "/inventory", &[]);
    registry.alias("/i", "/inventory", &[]);
    registry.add(
        CommandSpec::new("/drop", "Drop items on the ground.", drop)
            .param(ParamSpec::new("item", "Item", &["required", "item"]))
            .param(ParamSpec::new("amount", "Amount", &["integer", "min:1"])),
    );
    registry.add(
        CommandSpec::new("/pickup", "Pick items up from the ground.", pickup)
            .param(ParamSpec::new("item", "Item", &["required", "item"]))
            .param(ParamSpec::new("amount", "Amount", &["integer", "min:1"])),
    );
    registry.alias("/get", "/pickup", &[]);
    registry.add(
        CommandSpec::new("/give", "Hand items to a player in your cell.", give)
            .param(ParamSpec::new("player", "Player", &["required", "player"]))
            .param(ParamSpec::new("item", "Item", &["required", "item"]))
            .param(ParamSpec::new("amount", "Amount", &["integer", "min:1"])),
    );
    registry.add(
        CommandSpec::new("/equip", "Equip the item in an inventory slot.", equip)
            .param(ParamSpec::new("slot", "Slot", &["required", "integer", "slot"])),
    );
    registry.add(
        CommandSpec::new("/unequip", "Unequip your weapon, armor or ammo.", unequip)
            .param(ParamSpec::new("slot", "Slot", &["required", "options:weapon,armor,ammo"])),
    );
    registry.add(
        CommandSpec::new("/use", "Use a consumable.", use_item)
            .param(ParamSpec::new("item", "Item", &["required", "item"]))
            .cooldown("skill"),
    );
}

fn describe(item: &ItemInstance) -> String {
    if item.stackable {
        format!("{} x{}", item.name, item.quantity())
    } else {
        item.name.clone()
    }
}

fn describe_all(items: &[ItemInstance]) -> String {
    items.iter().map(describe).collect::<Vec<_>>().join(", ")
}

fn inventory(ctx: &CommandContext<'_>) -> GameResult<()> {
    let handle = ctx.handle()?;
    let entity = lock(&handle);
    let inv = &entity.state.inventory;
    let mut lines = vec![format!("Inventory ({}/{}), cash ${}", inv.len(), inv.capacity, entity.state.cash)];
    if inv.is_empty() {
        lines.push("  (empty)".to_string());
    }
    for (slot, item) in inv.iter() {
        let mut line = format!("  [{}] {}", slot, describe(item));
        if !item.stackable && item.max_durability > 0 {
            line.push_str(&format!(" ({}/{})", item.durability, item.max_durability));
        }
        if item.equipped {
            line.push_str(" *equipped*");
        }
        lines.push(line);
    }
    ctx.send(messages::inventory(&entity.state));
    ctx.reply_lines(&lines);
    Ok(())
}

fn drop(ctx: &CommandContext<'_>) -> GameResult<()> {
    let item_id = ctx.id("item")?;
    let amount = ctx.params.count("amount", 1);
    let handle = ctx.handle()?;
    let (location, dropped) = {
        let mut entity = lock(&handle);
        let dropped = entity.state.inventory.take(item_id, amount);
        if dropped.is_empty() {
            return Err(GameError::not_found("You don't have that."));
        }
        let location = entity.state.location.clone();
        ctx.world.ground.drop_items(&location, dropped.clone());
        ctx.send(messages::inventory(&entity.state));
        (location, dropped)
    };
    ctx.world.broadcast_ground(&location);
    ctx.reply(format!("You drop {}.", describe_all(&dropped)));
    Ok(())
}

fn pickup(ctx: &CommandContext<'_>) -> GameResult<()> {
    let item_id = ctx.id("item")?;
    let amount = ctx.params.count("amount", 1);
    let handle = ctx.handle()?;
    let (location, picked, left_behind) = {
        let mut entity = lock(&handle);
        let location = entity.state.location.clone();
        let result = ctx.world.ground.with_cell(&location, |items| {
            let taken = take_matching(items, item_id, amount)?;
            let mut picked = Vec::new();
            let mut left = 0;
            for item in taken {
                let shown = item.clone();
                match entity.state.inventory.add(item) {
                    Ok(_) => picked.push(shown),
                    Err(back) => {
                        left += 1;
                        items.push(back);
                    }
                }
            }
            Some((picked, left))
        });
        let (picked, left) = result.ok_or_else(|| GameError::not_found("That isn't here."))?;
        if !picked.is_empty() {
            ctx.send(messages::inventory(&entity.state));
        }
        (location, picked, left)
    };
    if picked.is_empty() {
        return Err(GameError::InventoryFull);
    }
    ctx.world.broadcast_ground(&location);
    let mut line = format!("You pick up {}.", describe_all(&picked));
    if left_behind > 0 {
        line.push_str(" Your inventory is full; the rest stays on the ground.");
    }
    ctx.reply(line);
    Ok(())
}

fn give(ctx: &CommandContext<'_>) -> GameResult<()> {
    let receiver = ctx.entity("player")?.clone();
    let item_id = ctx.id("item")?;
    let amount = ctx.params.count("amount", 1);
    let giver = ctx.handle()?;
    let taker = ctx
        .world
        .entities
        .get(&receiver.id)
        .ok_or_else(|| GameError::not_found("There is nobody around by that name."))?;

    let (given, giver_name, spilled) = {
        let (mut from, mut to) = lock_pair(&giver, ctx.actor, &taker, &receiver.id)?;
        if !to.is_present() || to.state.location != from.state.location {
            return Err(GameError::not_found("There is nobody around by that name."));
        }
        let items = from.state.inventory.take(item_id, amount);
        if items.is_empty() {
            return Err(GameError::not_found("You don't have that."));
        }
        let mut given = Vec::new();
        let mut refused = Vec::new();
        for item in items {
            let shown = item.clone();
            match to.state.inventory.add(item) {
                Ok(_) => given.push(shown),
                Err(back) => refused.push(back),
            }
        }
        let mut spilled = None;
        for item in refused {
            if let Err(lost) = from.state.inventory.add(item) {
                ctx.world.ground.drop_items(&from.state.location, vec![lost]);
                spilled = Some(from.state.location.clone());
            }
        }
        ctx.world.send_to_entity(&from, messages::inventory(&from.state));
        ctx.world.send_to_entity(&to, messages::inventory(&to.state));
        (given, from.state.name.clone(), spilled)
    };
    if let Some(here) = spilled {
        ctx.world.broadcast_ground(&here);
    }
    if given.is_empty() {
        return Err(GameError::invalid(format!("{} can't carry any more.", receiver.name)));
    }
    let what = describe_all(&given);
    ctx.reply(format!("You give {} to {}.", what, receiver.name));
    ctx.world
        .send_to_id(&receiver.id, messages::feed(format!("{} gives you {}.", giver_name, what)));
    Ok(())
}

fn equip(ctx: &CommandContext<'_>) -> GameResult<()> {
    let slot = ctx
        .params
        .slot("slot")
        .ok_or_else(|| GameError::invalid("There is nothing in that slot."))?;
    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    entity.state.inventory.equip(slot).map_err(GameError::invalid)?;
    let name = entity
        .state
        .inventory
        .get(slot)
        .map(|i| i.name.clone())
        .unwrap_or_default();
    ctx.send(messages::inventory(&entity.state));
    ctx.reply(format!("You equip {}.", name));
    Ok(())
}

fn unequip(ctx: &CommandContext<'_>) -> GameResult<()> {
    let slot = ctx
        .params
        .text("slot")
        .and_then(|s| EquipSlot::parse(&s))
        .ok_or_else(|| GameError::invalid(format!("Usage: {}", ctx.spec.usage())))?;
    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    let name = entity
        .state
        .inventory
        .unequip(slot)
        .ok_or_else(|| GameError::invalid("You have nothing equipped there."))?;
    ctx.send(messages::inventory(&entity.state));
    ctx.reply(format!("You unequip {}.", name));
    Ok(())
}

fn use_item(ctx: &CommandContext<'_>) -> GameResult<()> {
    let item_id = ctx.id("item")?;
    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    let slot = entity
        .state
        .inventory
        .find(item_id)
        .ok_or_else(|| GameError::not_found("You don't have that."))?;
    let heal = entity
        .state
        .inventory
        .get(slot)
        .map(|i| i.stats.heal_amount)
        .unwrap_or(0);
    if heal == 0 {
        return Err(GameError::invalid("You can't use that."));
    }
    if entity.state.health >= entity.state.health_max {
        return Err(GameError::invalid("You are already at full health."));
    }
    let used = entity.state.inventory.take(item_id, 1);
    let name = used.first().map(|i| i.name.clone()).unwrap_or_default();
    let healed = entity.state.heal(heal);
    ctx.send(messages::inventory(&entity.state));
    ctx.send(messages::character(&entity.state));
    ctx.reply(format!("You use {} and recover {} health.", name, healed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::handlers::testutil::Harness;
    use crate::game::types::Location;
    use crate::server::messages;

    fn give_item(h: &Harness, id: &str, item: &str, amount: u32) {
        let instance = h.world.catalog.instantiate(item, amount).unwrap();
        h.edit(id, |e| e.state.inventory.add(instance).unwrap());
    }

    #[test]
    fn drop_puts_items_on_the_ground_and_tells_the_cell() {
        let h = Harness::new();
        let here = Location::new("town", 5, 5);
        let watcher = h.join("c2", "Bo", here.clone());
        h.join("c1", "Ash", here.clone());
        give_item(&h, "c1", "sword", 1);
        h.transport.take();

        h.run("c1", "/drop sword 1");
        assert_eq!(h.edit("c1", |e| e.state.inventory.count_of("sword")), 0);
        let ground = h.world.ground.list(&here);
        assert!(ground.iter().any(|i| i.template_id == "sword"));
        let updates = h.transport.to(&watcher, messages::UPDATE_GROUND_ITEMS);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].payload["items"][0]["id"], "sword");
    }

    #[test]
    fn pickup_splits_stacks() {
        let h = Harness::new();
        let here = Location::new("town", 2, 2);
        h.join("c1", "Ash", here.clone());
        let stack = h.world.catalog.instantiate("bandage", 5).unwrap();
        h.world.ground.drop_items(&here, vec![stack]);

        h.run("c1", "/pickup bandage 2");
        assert_eq!(h.edit("c1", |e| e.state.inventory.count_of("bandage")), 2);
        assert_eq!(h.world.ground.list(&here)[0].quantity(), 3);
        h.run("c1", "/pickup sword");
        assert_eq!(h.errors("c1"), vec!["That isn't here.".to_string()]);
    }

    #[test]
    fn give_moves_items_between_players() {
        let h = Harness::new();
        let here = Location::new("town", 2, 2);
        h.join("c2", "Bo", here.clone());
        h.join("c1", "Ash", here);
        give_item(&h, "c1", "bandage", 3);
        h.run("c1", "/give bo bandage 2");
        assert_eq!(h.edit("c1", |e| e.state.inventory.count_of("bandage")), 1);
        assert_eq!(h.edit("c2", |e| e.state.inventory.count_of("bandage")), 2);
        assert!(h.feed("c2").iter().any(|l| l.contains("Ash gives you Bandage x2")));
    }

    #[test]
    fn give_spill_is_shown_to_the_cell() {
        let h = Harness::new();
        let here = Location::new("town", 2, 2);
        let watcher = h.join("c3", "Cy", here.clone());
        h.join("c2", "Bo", here.clone());
        h.join("c1", "Ash", here.clone());
        give_item(&h, "c1", "bandage", 1);
        give_item(&h, "c1", "sword", 1);
        give_item(&h, "c1", "sword", 1);
        // Neither side has room left once the swords are out of their slots.
        h.edit("c1", |e| e.state.inventory.capacity = 1);
        h.edit("c2", |e| e.state.inventory.capacity = 0);
        h.transport.take();

        h.run("c1", "/give bo sword 2");
        assert_eq!(h.errors("c1"), vec!["Bo can't carry any more.".to_string()]);
        let ground = h.world.ground.list(&here);
        assert_eq!(ground.iter().filter(|i| i.template_id == "sword").count(), 2);
        let updates = h.transport.to(&watcher, messages::UPDATE_GROUND_ITEMS);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].payload["room"], here.room_key());
    }

    #[test]
    fn equip_and_use() {
        let h = Harness::new();
        h.join("c1", "Ash", Location::new("town", 2, 2));
        give_item(&h, "c1", "knife", 1);
        give_item(&h, "c1", "bandage", 2);
        h.run("c1", "/equip 0");
        assert!(h.edit("c1", |e| e.state.inventory.get(0).unwrap().equipped));
        h.run("c1", "/equip 7");
        assert_eq!(h.errors("c1"), vec!["There is nothing in that slot.".to_string()]);

        h.run("c1", "/use bandage");
        assert!(h.errors("c1").last().unwrap().contains("full health"));
        h.edit("c1", |e| e.state.health = 50);
        h.run("c1", "/use bandage");
        assert_eq!(h.edit("c1", |e| e.state.health), 65);
        assert_eq!(h.edit("c1", |e| e.state.inventory.count_of("bandage")), 1);

        h.run("c1", "/unequip weapon");
        assert!(!h.edit("c1", |e| e.state.inventory.get(0).unwrap().equipped));
    }
}
