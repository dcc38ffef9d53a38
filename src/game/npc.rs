//! NPC autonomy.
//!
//! Each NPC owns up to two repeating timers (`move`, `attack`) plus a one
//! shot respawn timer while dead. Timers are re-armed after they fire,
//! drawing a fresh delay for randomized intervals. On every tick the NPC
//! picks its target by threat priority, see [`select_target`].

use log::debug;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use crate::game::combatant::AttackKind;
use crate::game::content::NpcLogic;
use crate::game::entity::apply_template;
use crate::game::errors::GameError;
use crate::game::item::EquipSlot;
use crate::game::registry::lock;
use crate::game::scheduler::TimerKind;
use crate::game::types::{Direction, EntityRef, Location};
use crate::game::world::GameWorld;

/// Threat priority for an NPC:
/// 1. its current target, if still in the cell;
/// 2. a random one of the entities aiming at it from the cell;
/// 3. the first remembered hostile in the cell.
pub fn select_target<R: Rng + ?Sized>(
    current: Option<&EntityRef>,
    targeted_by: &[EntityRef],
    hostiles: &[EntityRef],
    here: &[EntityRef],
    rng: &mut R,
) -> Option<EntityRef> {
    let in_cell = |r: &EntityRef| here.iter().any(|h| h.id == r.id);
    if let Some(current) = current.filter(|c| in_cell(*c)) {
        return Some(current.clone());
    }
    let aimers: Vec<&EntityRef> = targeted_by.iter().filter(|r| in_cell(*r)).collect();
    if let Some(aimer) = aimers.choose(rng) {
        return Some((*aimer).clone());
    }
    hostiles.iter().find(|r| in_cell(*r)).cloned()
}

impl GameWorld {
    pub fn arm_npc_timers(&self, id: &str, logic: &NpcLogic) {
        let mut rng = thread_rng();
        if let Some(interval) = logic.move_interval {
            self.schedule(id, TimerKind::NpcMove, interval.next_seconds(&mut rng));
        }
        if let Some(interval) = logic.attack_interval {
            self.schedule(id, TimerKind::NpcAttack, interval.next_seconds(&mut rng));
        }
    }

    /// Logic of a live NPC; `None` once dead or gone.
    fn live_npc_logic(&self, id: &str) -> Option<NpcLogic> {
        let handle = self.entities.get(id)?;
        let entity = lock(&handle);
        entity.npc().filter(|n| !n.dead).map(|n| n.logic.clone())
    }

    /// Resolves the NPC's target for this tick, dropping a stale aim and
    /// gridlocking a new one when needed.
    pub fn npc_active_target(&self, id: &str) -> Option<EntityRef> {
        let handle = self.entities.get(id)?;
        let (current, aimers, hostiles, location) = {
            let entity = lock(&handle);
            let npc = entity.npc().filter(|n| !n.dead)?;
            (
                entity.state.target.clone(),
                entity.state.targeted_by.clone(),
                npc.hostiles.clone(),
                entity.state.location.clone(),
            )
        };
        let here = self.entities.visible_in_cell(&location);
        let choice = select_target(current.as_ref(), &aimers, &hostiles, &here, &mut thread_rng());
        if let Some(current) = &current {
            if choice.as_ref().map(|c| &c.id) == Some(&current.id) {
                return choice;
            }
            self.release_target(id);
        }
        let choice = choice?;
        match self.gridlock(id, &choice.id) {
            Ok(target) => Some(target),
            Err(e) => {
                debug!("{} could not aim at {}: {}", id, choice.id, e);
                None
            }
        }
    }

    fn npc_attack_kind(&self, id: &str) -> AttackKind {
        let Some(handle) = self.entities.get(id) else {
            return AttackKind::Punch;
        };
        let entity = lock(&handle);
        match entity.state.inventory.equipped(EquipSlot::Weapon) {
            Some((_, weapon)) if weapon.stats.ranged => AttackKind::Shoot,
            Some(_) => AttackKind::Strike,
            None => AttackKind::Punch,
        }
    }

    pub(crate) fn npc_move_tick(&self, id: &str) {
        let Some(logic) = self.live_npc_logic(id) else {
            return;
        };
        if self.npc_active_target(id).is_none() {
            let mut directions = Direction::ALL.to_vec();
            directions.shuffle(&mut thread_rng());
            for direction in directions {
                match self.move_entity(id, direction) {
                    Ok(_) => break,
                    Err(GameError::OutOfBounds) => continue,
                    Err(_) => break,
                }
            }
        }
        if let Some(interval) = logic.move_interval {
            self.schedule(id, TimerKind::NpcMove, interval.next_seconds(&mut thread_rng()));
        }
    }

    pub(crate) fn npc_attack_tick(&self, id: &str) {
        let Some(logic) = self.live_npc_logic(id) else {
            return;
        };
        if self.npc_active_target(id).is_some() {
            let kind = self.npc_attack_kind(id);
            if let Err(e) = self.attack(id, kind) {
                debug!("{} attack failed: {}", id, e);
            }
        }
        if self.live_npc_logic(id).is_some() {
            if let Some(interval) = logic.attack_interval {
                self.schedule(id, TimerKind::NpcAttack, interval.next_seconds(&mut thread_rng()));
            }
        }
    }

    /// Brings a dead NPC back with template stats, a new name and a new
    /// location. The hostility list is kept.
    pub fn respawn_npc(&self, id: &str) {
        let Some(handle) = self.entities.get(id) else {
            return;
        };
        let mut rng = thread_rng();
        let logic = {
            let mut entity = lock(&handle);
            let Some(npc) = entity.npc().filter(|n| n.dead) else {
                return;
            };
            let Some(template) = self.npc_templates.get(&npc.template_id) else {
                return;
            };
            let location = match (npc.fixed_spawn, self.maps.get(&npc.home_map)) {
                (Some(p), _) => Location::new(npc.home_map.clone(), p.x, p.y),
                (None, Some(map)) => map.random_location(&mut rng),
                (None, None) => return,
            };
            apply_template(&mut entity.state, template, &self.catalog, &mut rng);
            entity.state.location = location.clone();
            // Grudges outlive death.
            if let Some(npc) = entity.npc_mut() {
                npc.dead = false;
            }
            self.entities.rename(id, &entity.state.name);
            self.entities.set_hidden(id, false);
            self.entities.relocate(id, &location);
            self.entities.set_present(id, true);
            self.announce_arrival(&entity);
            debug!("{} respawned as {} at {}", id, entity.state.name, location);
            template.logic.clone()
        };
        self.arm_npc_timers(id, &logic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::EntityKind;
    use crate::game::world::tests::{join, world};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn r(id: &str) -> EntityRef {
        EntityRef {
            id: id.into(),
            kind: EntityKind::Player,
            name: id.to_uppercase(),
        }
    }

    #[test]
    fn aimers_beat_remembered_hostiles() {
        let mut rng = StdRng::seed_from_u64(7);
        let here = vec![r("a"), r("h1"), r("h2")];
        for _ in 0..20 {
            let pick = select_target(None, &[r("a")], &[r("h1"), r("h2")], &here, &mut rng);
            assert_eq!(pick.map(|p| p.id), Some("a".to_string()));
        }
    }

    #[test]
    fn current_target_kept_only_while_in_cell() {
        let mut rng = StdRng::seed_from_u64(1);
        let current = r("x");
        let pick = select_target(Some(&current), &[r("a")], &[], &[r("x"), r("a")], &mut rng);
        assert_eq!(pick.unwrap().id, "x");
        let pick = select_target(Some(&current), &[r("a")], &[], &[r("a")], &mut rng);
        assert_eq!(pick.unwrap().id, "a");
        let pick = select_target(Some(&current), &[], &[r("h")], &[r("h")], &mut rng);
        assert_eq!(pick.unwrap().id, "h");
        assert!(select_target(None, &[], &[r("h")], &[], &mut rng).is_none());
    }

    fn first_npc(world: &GameWorld, template: &str) -> String {
        world
            .entities
            .ids_of_kind(EntityKind::Npc)
            .into_iter()
            .find(|id| {
                let h = world.entities.get(id).unwrap();
                let g = lock(&h);
                g.npc().map(|n| n.template_id.as_str()) == Some(template)
            })
            .unwrap()
    }

    #[test]
    fn npc_aims_back_at_its_attacker() {
        let (world, _) = world();
        world.spawn_npcs();
        let rat = first_npc(&world, "rat");
        let location = world.entities.location_of(&rat).unwrap();
        join(&world, "c1", "Ash", location);
        world.gridlock("c1", &rat).unwrap();
        let target = world.npc_active_target(&rat).unwrap();
        assert_eq!(target.id, "c1");
        let h = world.entities.get("c1").unwrap();
        assert!(lock(&h).state.targeted_by.iter().any(|r| r.id == rat));
    }

    #[test]
    fn respawn_restores_template_state_and_keeps_grudges() {
        let (world, _) = world();
        world.spawn_npcs();
        let rat = first_npc(&world, "rat");
        let location = world.entities.location_of(&rat).unwrap();
        join(&world, "c1", "Ash", location);
        world.gridlock("c1", &rat).unwrap();
        {
            let h = world.entities.get(&rat).unwrap();
            lock(&h).state.health = 0;
        }
        world.handle_death(&rat, None);
        world.respawn_npc(&rat);
        let h = world.entities.get(&rat).unwrap();
        let g = lock(&h);
        assert!(g.is_present());
        assert_eq!(g.state.health, g.state.health_max);
        let hostiles = &g.npc().unwrap().hostiles;
        assert_eq!(hostiles.len(), 1);
        assert_eq!(hostiles[0].id, "c1");
        assert!(g.state.targeted_by.is_empty());
        drop(g);
        assert!(world.timer_pending(&rat, TimerKind::NpcMove));
        let location = world.entities.location_of(&rat).unwrap();
        assert!(world.entities.in_cell(&location).iter().any(|r| r.id == rat));
    }
}
