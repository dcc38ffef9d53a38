use std::sync::MutexGuard;

use crate::commands::registry::{CommandRegistry, CommandSpec};
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::combatant::ACCURACY;
use crate::game::errors::{GameError, GameResult};
use crate::game::registry::lock;
use crate::game::shop::{format_shop_listing, Shop};
use crate::game::types::{EntityKind, Location};
use crate::server::messages;

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandSpec::new("/shop", "Browse the shop in your cell.", shop));
    registry.add(
        CommandSpec::new("/buy", "Buy from the shop in your cell.", buy)
            .param(ParamSpec::new("item", "Item", &["required", "item"]))
            .param(ParamSpec::new("amount", "Amount", &["integer", "min:1", "max:999"]))
            .cooldown("shop"),
    );
    registry.add(
        CommandSpec::new("/sell", "Sell the item in an inventory slot.", sell)
            .param(ParamSpec::new("slot", "Slot", &["required", "integer", "slot"]))
            .cooldown("shop"),
    );
    registry.add(
        CommandSpec::new("/deposit", "Put cash in the bank.", deposit)
            .param(ParamSpec::new("amount", "Amount", &["required", "integer", "min:1"])),
    );
    registry.add(
        CommandSpec::new("/withdraw", "Take cash out of the bank.", withdraw)
            .param(ParamSpec::new("amount", "Amount", &["required", "integer", "min:1"])),
    );
    registry.add(
        CommandSpec::new("/train", "Spend experience to improve a skill.", train)
            .param(ParamSpec::new("skill", "Skill", &["required", "options:accuracy"]))
            .cooldown("skill"),
    );
}

fn lock_shop(shop: &std::sync::Mutex<Shop>) -> MutexGuard<'_, Shop> {
    shop.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shop of a structure in the cell, else of a live vendor NPC standing in
/// it.
fn shop_at(ctx: &CommandContext<'_>, here: &Location) -> GameResult<String> {
    let world = ctx.world;
    if let Some(id) = world
        .maps
        .structures_at(here)
        .into_iter()
        .find_map(|s| s.shop_id.clone())
    {
        return Ok(id);
    }
    for occupant in world.entities.visible_in_cell(here) {
        if occupant.kind != EntityKind::Npc {
            continue;
        }
        let Some(handle) = world.entities.get(&occupant.id) else {
            continue;
        };
        let npc = lock(&handle);
        if let Some(shop_id) = npc.npc().filter(|n| !n.dead).and_then(|n| n.shop_id.clone()) {
            return Ok(shop_id);
        }
    }
    Err(GameError::invalid("There is no shop here."))
}

fn shop(ctx: &CommandContext<'_>) -> GameResult<()> {
    let here = ctx.location()?;
    let shop_id = shop_at(ctx, &here)?;
    let handle = ctx
        .world
        .shops
        .get(&shop_id)
        .ok_or_else(|| GameError::invalid("There is no shop here."))?;
    let shop = lock_shop(&handle);
    ctx.send(messages::shop(&shop, &ctx.world.catalog));
    ctx.reply_lines(&format_shop_listing(&shop, &ctx.world.catalog));
    Ok(())
}

fn buy(ctx: &CommandContext<'_>) -> GameResult<()> {
    let item_id = ctx.id("item")?;
    let amount = ctx.params.count("amount", 1);
    let world = ctx.world;
    let here = ctx.location()?;
    let shop_id = shop_at(ctx, &here)?;
    let shop_handle = world
        .shops
        .get(&shop_id)
        .ok_or_else(|| GameError::invalid("There is no shop here."))?;

    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    let (purchase, update) = {
        let mut shop = lock_shop(&shop_handle);
        shop.quote_buy(item_id, amount, entity.state.experience, &world.catalog)?;
        let mut probe = entity.state.inventory.clone();
        for unit in world.instantiate_units(item_id, amount) {
            if probe.add(unit).is_err() {
                return Err(GameError::InventoryFull);
            }
        }
        let purchase = shop.process_buy(
            item_id,
            amount,
            entity.state.experience,
            entity.state.cash,
            &world.catalog,
        )?;
        (purchase, messages::shop(&shop, &world.catalog))
    };
    entity.state.cash -= purchase.total_price;
    let name = purchase.items.first().map(|i| i.name.clone()).unwrap_or_default();
    for item in purchase.items {
        if let Err(overflow) = entity.state.inventory.add(item) {
            world.ground.drop_items(&here, vec![overflow]);
        }
    }
    ctx.send(messages::inventory(&entity.state));
    ctx.send(messages::character(&entity.state));
    drop(entity);
    world.to_cell(&here, update);
    ctx.reply(format!("You buy {} x{} for ${}.", name, amount, purchase.total_price));
    Ok(())
}

fn sell(ctx: &CommandContext<'_>) -> GameResult<()> {
    let slot = ctx
        .params
        .slot("slot")
        .ok_or_else(|| GameError::invalid("There is nothing in that slot."))?;
    let world = ctx.world;
    let here = ctx.location()?;
    let shop_id = shop_at(ctx, &here)?;
    let shop_handle = world
        .shops
        .get(&shop_id)
        .ok_or_else(|| GameError::invalid("There is no shop here."))?;

    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    let item = entity
        .state
        .inventory
        .get(slot)
        .cloned()
        .ok_or_else(|| GameError::invalid("There is nothing in that slot."))?;
    if item.equipped {
        return Err(GameError::invalid("Unequip it first."));
    }
    let (price, update) = {
        let mut shop = lock_shop(&shop_handle);
        let price = shop.process_sell(&item)?;
        (price, messages::shop(&shop, &world.catalog))
    };
    entity.state.inventory.remove(slot);
    entity.state.cash = entity.state.cash.saturating_add(price);
    ctx.send(messages::inventory(&entity.state));
    ctx.send(messages::character(&entity.state));
    drop(entity);
    world.to_cell(&here, update);
    ctx.reply(format!("You sell {} for ${}.", item.name, price));
    Ok(())
}

fn at_bank(ctx: &CommandContext<'_>) -> GameResult<()> {
    if !ctx.world.config.economy.bank_enabled {
        return Err(GameError::invalid("Banking is closed."));
    }
    let here = ctx.location()?;
    if ctx.world.maps.structure_offering(&here, "bank").is_none() {
        return Err(GameError::invalid("There is no bank here."));
    }
    Ok(())
}

fn amount(ctx: &CommandContext<'_>) -> GameResult<u64> {
    ctx.params
        .int("amount")
        .filter(|a| *a > 0)
        .map(|a| a as u64)
        .ok_or_else(|| GameError::invalid(format!("Usage: {}", ctx.spec.usage())))
}

fn deposit(ctx: &CommandContext<'_>) -> GameResult<()> {
    at_bank(ctx)?;
    let amount = amount(ctx)?;
    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    if entity.state.cash < amount {
        return Err(GameError::InsufficientFunds { needed: amount });
    }
    entity.state.cash -= amount;
    entity.state.bank = entity.state.bank.saturating_add(amount);
    ctx.send(messages::character(&entity.state));
    ctx.reply(format!("You deposit ${}. Balance: ${}.", amount, entity.state.bank));
    Ok(())
}

fn withdraw(ctx: &CommandContext<'_>) -> GameResult<()> {
    at_bank(ctx)?;
    let amount = amount(ctx)?;
    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    if entity.state.bank < amount {
        return Err(GameError::invalid(format!(
            "Your balance is only ${}.",
            entity.state.bank
        )));
    }
    entity.state.bank -= amount;
    entity.state.cash = entity.state.cash.saturating_add(amount);
    ctx.send(messages::character(&entity.state));
    ctx.reply(format!("You withdraw ${}. Balance: ${}.", amount, entity.state.bank));
    Ok(())
}

fn train(ctx: &CommandContext<'_>) -> GameResult<()> {
    let skill = ctx.text("skill")?;
    let economy = &ctx.world.config.economy;
    let cap = match skill.as_str() {
        ACCURACY => ctx.world.config.combat.accuracy_cap,
        other => return Err(GameError::invalid(format!("You can't train {}.", other))),
    };
    let handle = ctx.handle()?;
    let mut entity = lock(&handle);
    if entity.state.experience < economy.training_cost {
        return Err(GameError::invalid(format!(
            "Training costs {} experience.",
            economy.training_cost
        )));
    }
    let current = entity.state.skill(&skill);
    let next = current + economy.training_gain;
    if next >= cap {
        return Err(GameError::invalid(format!("Your {} can't improve any further.", skill)));
    }
    entity.state.experience -= economy.training_cost;
    entity.state.set_skill(&skill, next);
    ctx.send(messages::character(&entity.state));
    ctx.reply(format!("Your {} rises to {:.1}.", skill, next));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::handlers::testutil::Harness;
    use crate::game::types::Location;
    use crate::server::messages;

    fn clinic() -> Location {
        Location::new("town", 4, 5)
    }

    #[test]
    fn buy_moves_stock_cash_and_items() {
        let h = Harness::new();
        h.join("c1", "Ash", clinic());
        h.edit("c1", |e| e.state.cash = 100);
        h.transport.take();

        h.run("c1", "/buy bandage 2");
        assert_eq!(h.edit("c1", |e| e.state.cash), 80);
        assert_eq!(h.edit("c1", |e| e.state.inventory.count_of("bandage")), 2);
        let shop = h.world.shops.get("clinic").unwrap();
        assert_eq!(shop.lock().unwrap().item("bandage").unwrap().shop_quantity, Some(1));
        assert_eq!(h.transport.to("conn-c1", messages::UPDATE_SHOP).len(), 1);

        h.run("c1", "/buy bandage 2");
        assert_eq!(h.errors("c1"), vec!["Only 1 left in stock.".to_string()]);
        assert_eq!(h.edit("c1", |e| e.state.cash), 80);
    }

    #[test]
    fn buy_refuses_when_broke_and_leaves_stock() {
        let h = Harness::new();
        h.join("c1", "Ash", clinic());
        h.edit("c1", |e| e.state.cash = 5);
        h.run("c1", "/buy bandage");
        assert_eq!(h.errors("c1"), vec!["You cannot afford that (10 needed).".to_string()]);
        let shop = h.world.shops.get("clinic").unwrap();
        assert_eq!(shop.lock().unwrap().item("bandage").unwrap().shop_quantity, Some(3));
    }

    #[test]
    fn sell_and_bank() {
        let h = Harness::new();
        h.join("c1", "Ash", clinic());
        let bandage = h.world.catalog.instantiate("bandage", 1).unwrap();
        h.edit("c1", |e| e.state.inventory.add(bandage).unwrap());
        h.run("c1", "/sell 0");
        assert!(h.edit("c1", |e| e.state.inventory.is_empty()));
        assert!(h.edit("c1", |e| e.state.cash) > 0);

        h.run("c1", "/deposit 1");
        assert_eq!(h.errors("c1"), vec!["There is no bank here.".to_string()]);
        h.world.teleport("c1", Location::new("town", 5, 5)).unwrap();
        let cash = h.edit("c1", |e| e.state.cash);
        h.run("c1", "/deposit 1");
        assert_eq!(h.edit("c1", |e| (e.state.cash, e.state.bank)), (cash - 1, 1));
        h.run("c1", "/withdraw 2");
        assert_eq!(h.errors("c1").last().unwrap(), "Your balance is only $1.");
    }

    #[test]
    fn training_spends_experience() {
        let h = Harness::new();
        h.join("c1", "Ash", Location::new("town", 1, 1));
        h.run("c1", "/train accuracy");
        assert!(h.errors("c1")[0].contains("experience"));
        h.edit("c1", |e| e.state.experience = 30);
        h.run("c1", "/train accuracy");
        assert_eq!(h.edit("c1", |e| e.state.experience), 5);
        assert_eq!(h.edit("c1", |e| e.state.skill("accuracy")), 51.0);
    }
}
