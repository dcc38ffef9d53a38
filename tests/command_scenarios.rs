//! End-to-end command scenarios run through the full pipeline.

mod common;

use std::collections::HashMap;

use gridrealm::commands::rules::{validate, validate_value};
use gridrealm::commands::{execute, CommandRegistry, WorldResolver};
use gridrealm::game::types::Location;
use gridrealm::server::messages;

#[test]
fn drop_sword_lands_on_the_ground_and_is_broadcast() {
    let (world, transport) = common::world();
    let registry = CommandRegistry::standard();
    let here = Location::new("town", 5, 5);
    let (_, watcher) = common::enter(&world, "Bo", here.clone());
    let (ash, conn) = common::enter(&world, "Ash", here.clone());
    common::give(&world, &ash, "sword", 1);
    transport.take();

    execute(&world, &registry, &ash, &conn, "/drop sword 1");

    assert_eq!(common::edit(&world, &ash, |e| e.state.inventory.count_of("sword")), 0);
    let ground = world.ground.list(&here);
    assert_eq!(ground.len(), 1);
    assert_eq!(ground[0].template_id, "sword");

    let updates = transport.to(&watcher, messages::UPDATE_GROUND_ITEMS);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].payload["room"], here.room_key());
    assert_eq!(updates[0].payload["items"][0]["id"], "sword");
    assert!(transport.to(&conn, messages::COMMAND_ERROR).is_empty());
}

#[test]
fn buying_reduces_stock_and_cash_until_sold_out() {
    let (world, transport) = common::world();
    let registry = CommandRegistry::standard();
    let clinic = Location::new("town", 4, 5);
    let (ash, conn) = common::enter(&world, "Ash", clinic);
    let cash = common::edit(&world, &ash, |e| e.state.cash);

    execute(&world, &registry, &ash, &conn, "/buy bandage 1");
    let shop = world.shops.get("clinic").unwrap();
    assert_eq!(shop.lock().unwrap().item("bandage").unwrap().shop_quantity, Some(2));
    assert_eq!(common::edit(&world, &ash, |e| e.state.cash), cash - 10);

    let empty: HashMap<String, Option<u32>> = [("bandage".to_string(), Some(0))].into_iter().collect();
    world.restore_shop_state("clinic", &empty);
    common::rested(&world, &ash);
    transport.take();

    execute(&world, &registry, &ash, &conn, "/buy bandage 1");
    let errors = transport.to(&conn, messages::COMMAND_ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["message"], "That item is out of stock.");
    assert_eq!(common::edit(&world, &ash, |e| e.state.cash), cash - 10);
    assert_eq!(common::edit(&world, &ash, |e| e.state.inventory.count_of("bandage")), 1);
    assert_eq!(shop.lock().unwrap().item("bandage").unwrap().shop_quantity, Some(0));
}

#[test]
fn validation_is_idempotent() {
    let (world, _) = common::world();
    let registry = CommandRegistry::standard();
    let here = Location::new("town", 2, 2);
    common::enter(&world, "Bo", here.clone());
    let (ash, _) = common::enter(&world, "Ash", here);
    let resolver = WorldResolver::new(&world, &ash);

    let spec = registry.get("/give").unwrap();
    let args: Vec<String> = ["BO", "Bandage", "2"].iter().map(|s| s.to_string()).collect();
    let first = validate(&spec.params, &args, &resolver).unwrap();
    let second = validate(&spec.params, &args, &resolver).unwrap();
    assert_eq!(first, second);

    // Feeding coerced values back through their rules changes nothing.
    for param in &spec.params {
        let value = first.get(param.name).unwrap().clone();
        assert_eq!(validate_value(param, value.clone(), &resolver).unwrap(), value);
    }
    assert_eq!(first.count("amount", 1), 2);
    assert_eq!(first.id("item"), Some("bandage"));
}

#[test]
fn errors_only_reach_the_invoker() {
    let (world, transport) = common::world();
    let registry = CommandRegistry::standard();
    let here = Location::new("town", 2, 2);
    let (_, bo) = common::enter(&world, "Bo", here.clone());
    let (ash, conn) = common::enter(&world, "Ash", here);
    transport.take();

    execute(&world, &registry, &ash, &conn, "/aim nobody");
    execute(&world, &registry, &ash, &conn, "/dance");
    assert_eq!(transport.to(&conn, messages::COMMAND_ERROR).len(), 2);
    assert!(transport.to(&bo, messages::COMMAND_ERROR).is_empty());
}
