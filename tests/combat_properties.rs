//! Gridlock, flee, NPC targeting and damage properties.

mod common;

use std::sync::Arc;
use std::thread;

use gridrealm::game::combatant::CombatantState;
use gridrealm::game::entity::spawn_npc;
use gridrealm::game::item::{EquipSlot, ItemCatalog};
use gridrealm::game::content::Content;
use gridrealm::game::registry::lock;
use gridrealm::game::types::{EntityKind, Location};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn gridlock_is_symmetric_until_released() {
    let (world, _) = common::world();
    let here = Location::new("town", 3, 3);
    let (a, _) = common::enter(&world, "Ash", here.clone());
    let (b, _) = common::enter(&world, "Bo", here);

    world.gridlock(&a, &b).unwrap();
    assert_eq!(common::edit(&world, &a, |e| e.state.target.clone()).unwrap().id, b);
    assert!(common::edit(&world, &b, |e| e.state.targeted_by.iter().any(|r| r.id == a)));

    world.release_target(&a);
    assert!(common::edit(&world, &a, |e| e.state.target.is_none()));
    assert!(common::edit(&world, &b, |e| e.state.targeted_by.is_empty()));
}

#[test]
fn gridlocked_defender_cannot_move() {
    let (world, _) = common::world();
    let here = Location::new("town", 3, 3);
    let (a, _) = common::enter(&world, "Ash", here.clone());
    let (b, _) = common::enter(&world, "Bo", here.clone());
    world.gridlock(&a, &b).unwrap();
    assert!(world
        .move_entity(&b, gridrealm::game::types::Direction::North)
        .is_err());
    assert_eq!(world.entities.location_of(&b), Some(here));
}

#[test]
fn simultaneous_flee_clears_both_sides() {
    for _ in 0..20 {
        let (world, _) = common::world();
        let here = Location::new("town", 0, 0);
        let (a, _) = common::enter(&world, "Ash", here.clone());
        let (b, _) = common::enter(&world, "Bo", here.clone());
        world.gridlock(&a, &b).unwrap();
        world.gridlock(&b, &a).unwrap();

        let runs: Vec<_> = [(a.clone(), "north"), (b.clone(), "west")]
            .into_iter()
            .map(|(id, dir)| {
                let world = Arc::clone(&world);
                thread::spawn(move || {
                    let dir = gridrealm::game::types::Direction::parse(dir);
                    world.flee(&id, dir).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = runs.into_iter().map(|h| h.join().unwrap()).collect();

        for id in [&a, &b] {
            let (target, aimers) =
                common::edit(&world, id, |e| (e.state.target.clone(), e.state.targeted_by.clone()));
            assert!(target.is_none());
            assert!(aimers.is_empty());
        }
        // Both steps leave the grid from the corner, so both turn aside to
        // one of the corner's two open neighbours.
        let open = [Location::new("town", 0, 1), Location::new("town", 1, 0)];
        for (id, outcome) in [&a, &b].into_iter().zip(&outcomes) {
            assert!(outcome.reversed);
            assert!(open.contains(&outcome.to));
            assert_eq!(world.entities.location_of(id), Some(outcome.to.clone()));
        }
    }
}

#[test]
fn npc_prefers_aimers_over_remembered_hostiles() {
    let (world, _) = common::world();
    let here = Location::new("town", 2, 2);
    let template = world.npc_templates.get("rat").unwrap().clone();
    let mut rng = StdRng::seed_from_u64(11);
    let npc = spawn_npc("npc-test", &template, &world.catalog, here.clone(), None, &mut rng);
    world.entities.insert(npc);

    let (aimer, _) = common::enter(&world, "Ash", here.clone());
    let (h1, _) = common::enter(&world, "Bo", here.clone());
    let (h2, _) = common::enter(&world, "Cy", here);
    for hostile in [&h1, &h2] {
        world.gridlock(hostile, "npc-test").unwrap();
        world.release_target(hostile);
    }
    world.gridlock(&aimer, "npc-test").unwrap();

    let handle = world.entities.get("npc-test").unwrap();
    {
        let npc = lock(&handle);
        assert_eq!(npc.npc().unwrap().hostiles.len(), 3);
        assert_eq!(npc.state.targeted_by.len(), 1);
    }
    let chosen = world.npc_active_target("npc-test").unwrap();
    assert_eq!(chosen.id, aimer);
    assert_eq!(chosen.kind, EntityKind::Player);
    assert!(lock(&handle).state.is_targeting(&aimer));
}

#[test]
fn armor_absorbs_small_hits_and_wears_down() {
    let catalog = ItemCatalog::new(Content::starter().items);
    for amount in 1..=3 {
        let mut state = CombatantState::new(
            "c1",
            EntityKind::Player,
            "Ash",
            Location::new("town", 1, 1),
            50,
            6,
        );
        let armor = catalog.instantiate("leather_armor", 1).unwrap();
        let reduction = armor.stats.armor_reduction;
        let durability = armor.durability;
        let slot = state.inventory.add(armor).unwrap();
        state.inventory.equip(slot).unwrap();
        assert!(amount <= reduction.min(durability));

        let report = state.deal_damage(amount, false);
        assert_eq!(report.dealt, 0);
        assert_eq!(report.armor_durability_left, Some(durability - amount));
        assert_eq!(state.health, 50);
        let left = state.inventory.equipped(EquipSlot::Armor).unwrap().1.durability;
        assert_eq!(left, durability - amount);
    }
}

#[test]
fn armor_is_bypassed_when_ignored() {
    let mut state = CombatantState::new("c1", EntityKind::Player, "Ash", Location::new("town", 1, 1), 50, 6);
    let report = state.deal_damage(7, true);
    assert_eq!(report.dealt, 7);
    assert_eq!(state.health, 43);
}

#[test]
fn cooldowns_count_down_to_zero() {
    let (world, _) = common::world();
    let mut state = CombatantState::new("c1", EntityKind::Player, "Ash", Location::new("town", 1, 1), 50, 6);
    world.cooldowns.add(&mut state.cooldowns, "attack", Some(1.5), true);
    let mut last = state.cooldowns.ticks_left("attack");
    assert_eq!(last, 15);
    for _ in 0..20 {
        state.cooldowns.tick();
        let now = state.cooldowns.ticks_left("attack");
        assert!(now <= last);
        last = now;
    }
    assert_eq!(last, 0);
}
