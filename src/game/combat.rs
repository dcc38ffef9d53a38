//! Gridlock, attacks and death.

use log::debug;
use rand::thread_rng;

use crate::game::combatant::{AttackKind, DamageReport};
use crate::game::errors::{GameError, GameResult};
use crate::game::registry::{lock, lock_pair, EntityHandle};
use crate::game::scheduler::TimerKind;
use crate::game::targeting;
use crate::game::types::{EntityKind, EntityRef};
use crate::game::world::GameWorld;
use crate::server::messages;

#[derive(Debug, Clone, PartialEq)]
pub struct AttackOutcome {
    pub defender: EntityRef,
    pub weapon: String,
    /// `None` on a miss.
    pub damage: Option<DamageReport>,
}

impl AttackOutcome {
    pub fn killed(&self) -> bool {
        self.damage.as_ref().map_or(false, |d| d.killed)
    }
}

fn nobody() -> GameError {
    GameError::not_found("There is nobody around by that name.")
}

impl GameWorld {
    /// `attacker` aims at `defender`. Any previous aim of the attacker is
    /// released first; both must be present in the same cell.
    pub fn gridlock(&self, attacker_id: &str, defender_id: &str) -> GameResult<EntityRef> {
        let attacker = self.handle(attacker_id)?;
        let defender = self.entities.get(defender_id).ok_or_else(nobody)?;

        let current = lock(&attacker).state.target.clone();
        if let Some(current) = current {
            if current.id == defender_id {
                return Err(GameError::invalid(format!("You are already aiming at {}.", current.name)));
            }
            self.release_target(attacker_id);
        }

        let (mut a, mut d) = lock_pair(&attacker, attacker_id, &defender, defender_id)?;
        if !a.is_present() || !a.state.is_alive() {
            return Err(GameError::Stale);
        }
        if !d.is_present() || d.state.hidden || d.state.location != a.state.location {
            return Err(nobody());
        }
        targeting::link(&mut a.state, &mut d.state);
        let attacker_ref = a.state.entity_ref();
        if let Some(npc) = d.npc_mut() {
            npc.remember_hostile(&attacker_ref);
        }
        debug!("{} gridlocked {}", attacker_id, defender_id);
        self.send_to_entity(&d, messages::combat_log(format!("{} is aiming at you!", a.state.name)));
        self.send_to_entity(&d, messages::character(&d.state));
        self.send_to_entity(&a, messages::character(&a.state));
        Ok(d.state.entity_ref())
    }

    /// Drops `id`'s own aim, clearing both halves of the link. Returns who it
    /// was aiming at.
    pub fn release_target(&self, id: &str) -> Option<EntityRef> {
        let handle = self.entities.get(id)?;
        // The target can change between reading it and locking the pair.
        for _ in 0..3 {
            let target = lock(&handle).state.target.clone()?;
            match self.entities.get(&target.id) {
                Some(other) if target.id != id => {
                    let Ok((mut a, mut t)) = lock_pair(&handle, id, &other, &target.id) else {
                        return None;
                    };
                    if !a.state.is_targeting(&target.id) {
                        continue;
                    }
                    targeting::unlink(&mut a.state, &mut t.state);
                    self.send_to_entity(&t, messages::character(&t.state));
                    self.send_to_entity(&a, messages::character(&a.state));
                }
                _ => {
                    let mut a = lock(&handle);
                    if a.state.is_targeting(&target.id) {
                        a.state.target = None;
                    }
                }
            }
            return Some(target);
        }
        None
    }

    /// Releases `id`'s aim and every aim held on `id`.
    pub fn release_all(&self, id: &str) {
        self.release_target(id);
        let Some(handle) = self.entities.get(id) else {
            return;
        };
        let aimers = lock(&handle).state.targeted_by.clone();
        for aimer in aimers {
            match self.entities.get(&aimer.id) {
                Some(other) if aimer.id != id => {
                    if let Ok((mut a, mut me)) = lock_pair(&other, &aimer.id, &handle, id) {
                        targeting::unlink(&mut a.state, &mut me.state);
                        self.send_to_entity(&a, messages::character(&a.state));
                    }
                }
                _ => {
                    lock(&handle).state.targeted_by.retain(|r| r.id != aimer.id);
                }
            }
        }
        if let Ok(entity) = self.handle(id) {
            let entity = lock(&entity);
            self.send_to_entity(&entity, messages::character(&entity.state));
        }
    }

    /// One attack on the current target. Kills are resolved after both
    /// entity locks are released.
    pub fn attack(&self, attacker_id: &str, kind: AttackKind) -> GameResult<AttackOutcome> {
        let attacker = self.handle(attacker_id)?;
        let target = lock(&attacker)
            .state
            .target
            .clone()
            .ok_or_else(|| GameError::invalid("You are not aiming at anyone. Use /aim first."))?;
        let Some(defender) = self.entities.get(&target.id) else {
            self.release_target(attacker_id);
            return Err(GameError::invalid(format!("{} is no longer here.", target.name)));
        };

        let mut rng = thread_rng();
        let rules = &self.config.combat;
        let outcome = {
            let (mut a, mut d) = lock_pair(&attacker, attacker_id, &defender, &target.id)?;
            if !a.is_present() || !a.state.is_alive() {
                return Err(GameError::Stale);
            }
            if !a.state.is_targeting(&target.id) {
                return Err(GameError::invalid("You are not aiming at anyone. Use /aim first."));
            }
            if !d.is_present() || d.state.location != a.state.location {
                targeting::unlink(&mut a.state, &mut d.state);
                return Err(GameError::invalid(format!("{} is no longer here.", target.name)));
            }
            if !d.state.is_alive() {
                return Err(GameError::invalid(format!("{} is already down.", d.state.name)));
            }

            let roll = a.state.roll_attack(kind, &mut rng, rules)?;
            if kind == AttackKind::Shoot && !a.state.ignore_quantity {
                self.send_to_entity(&a, messages::inventory(&a.state));
            }
            if let Some(ammo) = &roll.ammo_depleted {
                self.feed(&a, format!("Your {} is used up.", ammo));
            }
            let location = a.state.location.clone();
            let hit = a.state.roll_accuracy(&mut rng, rules);
            let damage = if hit {
                let report = d.state.deal_damage(roll.damage, false);
                let mut line = format!(
                    "{} {} {} with {} for {} damage.",
                    a.state.name,
                    kind.verb(),
                    d.state.name,
                    roll.weapon,
                    report.dealt
                );
                if report.blocked > 0 {
                    line.push_str(&format!(" ({} blocked by armor)", report.blocked));
                }
                self.to_cell(&location, messages::combat_log(line));
                if let Some(armor) = &report.armor_ruined {
                    self.to_cell(
                        &location,
                        messages::combat_log(format!("{}'s {} falls apart.", d.state.name, armor)),
                    );
                }
                if report.armor_durability_left.is_some() {
                    self.send_to_entity(&d, messages::inventory(&d.state));
                }
                Some(report)
            } else {
                self.to_cell(
                    &location,
                    messages::combat_log(format!("{} {} at {} and misses.", a.state.name, kind.verb(), d.state.name)),
                );
                None
            };
            self.send_to_entity(&a, messages::character(&a.state));
            self.send_to_entity(&d, messages::character(&d.state));
            AttackOutcome {
                defender: d.state.entity_ref(),
                weapon: roll.weapon,
                damage,
            }
        };

        if outcome.killed() {
            let killer = lock(&attacker).state.entity_ref();
            self.handle_death(&target.id, Some(&killer));
        }
        Ok(outcome)
    }

    /// Resolves a death at zero health. Safe to call more than once.
    pub fn handle_death(&self, victim_id: &str, killer: Option<&EntityRef>) {
        let Some(handle) = self.entities.get(victim_id) else {
            return;
        };
        let kind = {
            let entity = lock(&handle);
            if entity.state.is_alive() || !entity.is_present() {
                return;
            }
            entity.kind()
        };
        self.release_all(victim_id);
        match kind {
            EntityKind::Npc => self.kill_npc(&handle, victim_id, killer),
            EntityKind::Player => self.kill_player(&handle, victim_id, killer),
        }
    }

    fn kill_npc(&self, handle: &EntityHandle, id: &str, killer: Option<&EntityRef>) {
        let mut rng = thread_rng();
        let (name, location, reward, cash, shop_id, respawn) = {
            let mut entity = lock(handle);
            let Some(npc) = entity.npc() else {
                return;
            };
            if npc.dead {
                return;
            }
            let loot_table = npc.loot_table.clone();
            let shop_id = npc.shop_id.clone();
            let reward = npc.experience_reward;
            let respawn = npc.logic.respawn_seconds;

            let mut dropped = entity.state.inventory.drain_all();
            if let Some(table) = loot_table.and_then(|t| self.loot_tables.get(&t)) {
                for (item_id, amount) in table.roll(&mut rng) {
                    dropped.extend(self.instantiate_units(&item_id, amount));
                }
            }
            let location = entity.state.location.clone();
            self.announce_departure(&entity, &location);
            if let Some(npc) = entity.npc_mut() {
                npc.dead = true;
            }
            let cash = std::mem::take(&mut entity.state.cash);
            self.entities.set_present(id, false);
            self.ground.drop_items(&location, dropped);
            (entity.state.name.clone(), location, reward, cash, shop_id, respawn)
        };

        if let Some(shop) = shop_id.and_then(|s| self.shops.get(&s)) {
            let stock = shop.lock().unwrap_or_else(|e| e.into_inner()).drain_stock();
            let items = stock
                .into_iter()
                .flat_map(|(item_id, qty)| self.instantiate_units(&item_id, qty))
                .collect();
            self.ground.drop_items(&location, items);
        }

        self.cancel_timers(id);
        self.schedule(id, TimerKind::NpcRespawn, respawn);
        crate::metrics::inc_npc_kill();

        let line = match killer {
            Some(k) => format!("{} has been killed by {}.", name, k.name),
            None => format!("{} has died.", name),
        };
        self.to_cell(&location, messages::combat_log(line));
        self.broadcast_ground(&location);
        if let Some(killer) = killer {
            self.reward(&killer.id, reward, cash, &name);
        }
    }

    fn kill_player(&self, handle: &EntityHandle, id: &str, killer: Option<&EntityRef>) {
        let rules = &self.config.combat;
        let (name, from) = {
            let mut entity = lock(handle);
            if entity.state.is_alive() {
                return;
            }
            let from = entity.state.location.clone();
            let dropped = entity.state.inventory.drain_unequipped();
            let cash_lost = entity.state.lose_cash_percent(rules.death_cash_penalty_percent);
            entity.state.restore_health();
            self.ground.drop_items(&from, dropped);
            let respawn = self
                .maps
                .get(&from.map_id)
                .map(|m| m.respawn_location())
                .unwrap_or_else(|| self.start_location());
            self.place(&mut entity, respawn);
            self.feed(
                &entity,
                format!("You died. You lost {} cash and everything you were not holding.", cash_lost),
            );
            self.send_to_entity(&entity, messages::character(&entity.state));
            self.send_to_entity(&entity, messages::inventory(&entity.state));
            (entity.state.name.clone(), from)
        };
        crate::metrics::inc_player_death();
        log::info!("{} ({}) died", name, id);

        let line = match killer {
            Some(k) => format!("{} has been killed by {}.", name, k.name),
            None => format!("{} has died.", name),
        };
        self.to_cell(&from, messages::combat_log(line));
        self.broadcast_ground(&from);
        if let Some(killer) = killer.filter(|k| k.kind == EntityKind::Player) {
            self.reward(&killer.id, rules.pvp_kill_experience, 0, &name);
        }
    }

    fn reward(&self, id: &str, experience: u64, cash: u64, victim: &str) {
        let Some(handle) = self.entities.get(id) else {
            return;
        };
        let mut entity = lock(&handle);
        entity.state.experience += experience;
        entity.state.cash += cash;
        if experience > 0 || cash > 0 {
            self.feed(
                &entity,
                format!("You gain {} experience and {} cash for killing {}.", experience, cash, victim),
            );
        }
        self.send_to_entity(&entity, messages::character(&entity.state));
    }

    /// `amount` units of an item: one stack, or that many single items.
    pub(crate) fn instantiate_units(&self, item_id: &str, amount: u32) -> Vec<crate::game::item::ItemInstance> {
        let Some(template) = self.catalog.get(item_id) else {
            return Vec::new();
        };
        if template.stackable {
            self.catalog.instantiate(item_id, amount).into_iter().collect()
        } else {
            (0..amount)
                .filter_map(|_| self.catalog.instantiate(item_id, 1))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::Location;
    use crate::game::world::tests::{join, world};

    fn cell() -> Location {
        Location::new("town", 3, 3)
    }

    #[test]
    fn gridlock_links_both_sides_and_release_clears_them() {
        let (world, _) = world();
        join(&world, "a", "Ash", cell());
        join(&world, "b", "Bo", cell());
        world.gridlock("a", "b").unwrap();
        {
            let a = world.entities.get("a").unwrap();
            let b = world.entities.get("b").unwrap();
            assert!(lock(&a).state.is_targeting("b"));
            assert!(lock(&b).state.targeted_by.iter().any(|r| r.id == "a"));
        }
        assert_eq!(world.release_target("a").map(|r| r.id), Some("b".to_string()));
        let a = world.entities.get("a").unwrap();
        let b = world.entities.get("b").unwrap();
        assert!(lock(&a).state.target.is_none());
        assert!(lock(&b).state.targeted_by.is_empty());
    }

    #[test]
    fn gridlock_needs_same_cell_and_visibility() {
        let (world, _) = world();
        join(&world, "a", "Ash", cell());
        join(&world, "b", "Bo", Location::new("town", 4, 3));
        assert_eq!(world.gridlock("a", "b"), Err(nobody()));
        world.teleport("b", cell()).unwrap();
        world.set_hidden("b", true).unwrap();
        assert_eq!(world.gridlock("a", "b"), Err(nobody()));
    }

    #[test]
    fn re_aiming_moves_the_link() {
        let (world, _) = world();
        join(&world, "a", "Ash", cell());
        join(&world, "b", "Bo", cell());
        join(&world, "c", "Cy", cell());
        world.gridlock("a", "b").unwrap();
        world.gridlock("a", "c").unwrap();
        let b = world.entities.get("b").unwrap();
        let c = world.entities.get("c").unwrap();
        assert!(lock(&b).state.targeted_by.is_empty());
        assert_eq!(lock(&c).state.targeted_by.len(), 1);
    }

    #[test]
    fn attack_without_aim_is_rejected() {
        let (world, _) = world();
        join(&world, "a", "Ash", cell());
        assert!(matches!(world.attack("a", AttackKind::Punch), Err(GameError::InvalidState(_))));
    }

    #[test]
    fn player_death_drops_items_and_respawns() {
        let (world, _) = world();
        join(&world, "a", "Ash", cell());
        join(&world, "b", "Bo", cell());
        {
            let b = world.entities.get("b").unwrap();
            let mut b = lock(&b);
            let knife = world.catalog.instantiate("knife", 1).unwrap();
            b.state.inventory.add(knife).unwrap();
            b.state.cash = 100;
            b.state.health = 0;
        }
        world.gridlock("a", "b").unwrap();
        let killer = EntityRef {
            id: "a".into(),
            kind: EntityKind::Player,
            name: "Ash".into(),
        };
        world.handle_death("b", Some(&killer));

        let b = world.entities.get("b").unwrap();
        let b = lock(&b);
        assert_eq!(b.state.health, b.state.health_max);
        assert_eq!(b.state.cash, 90);
        assert!(b.state.inventory.is_empty());
        assert!(b.state.targeted_by.is_empty());
        assert_eq!(b.state.location, Location::new("town", 5, 5));
        assert_eq!(world.ground.list(&cell()).len(), 1);
        let a = world.entities.get("a").unwrap();
        assert_eq!(lock(&a).state.experience, world.config.combat.pvp_kill_experience);
    }

    #[test]
    fn npc_death_drops_loot_and_schedules_respawn() {
        let (world, _) = world();
        world.spawn_npcs();
        let rat = world
            .entities
            .ids_of_kind(EntityKind::Npc)
            .into_iter()
            .find(|id| {
                let h = world.entities.get(id).unwrap();
                let g = lock(&h);
                g.npc().map(|n| n.template_id.as_str()) == Some("rat")
            })
            .unwrap();
        let location = world.entities.location_of(&rat).unwrap();
        lock(&world.entities.get(&rat).unwrap()).state.health = 0;
        world.handle_death(&rat, None);

        assert!(world.timer_pending(&rat, TimerKind::NpcRespawn));
        assert!(!world.timer_pending(&rat, TimerKind::NpcMove));
        assert!(!world.entities.in_cell(&location).iter().any(|r| r.id == rat));
        // a second call is a no-op
        world.handle_death(&rat, None);
        assert!(world.timer_pending(&rat, TimerKind::NpcRespawn));
    }
}
