//! Location changes: stepping, travel, teleport, flee, hide.
//!
//! Every path that changes a location drops the mover's own aim first and
//! then re-checks the gridlock under the entity lock, so a defender can never
//! leave a cell while someone still holds it.

use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use crate::game::errors::{GameError, GameResult};
use crate::game::entity::Entity;
use crate::game::item::{Inventory, ItemInstance};
use crate::game::map::MapRegistry;
use crate::game::registry::lock;
use crate::game::types::{Direction, Location};
use crate::game::world::GameWorld;
use crate::server::messages;

#[derive(Debug, Clone, PartialEq)]
pub struct FleeOutcome {
    pub from: Location,
    pub to: Location,
    /// The requested step was off the grid and the run went another way.
    pub reversed: bool,
    pub dropped: Vec<ItemInstance>,
    pub experience_lost: u64,
}

fn ensure_can_move(entity: &Entity) -> GameResult<()> {
    if !entity.is_present() {
        return Err(GameError::Stale);
    }
    if entity.state.is_gridlocked() {
        return Err(GameError::Gridlocked);
    }
    Ok(())
}

/// Where a flee ends up: the requested step when it stays on the grid.
/// An off-grid step turns back with probability `reverse_chance` and
/// otherwise scatters to a random valid neighbour, as does a flee without a
/// direction. Stays put only on a one-cell map.
pub fn flee_destination<R: Rng + ?Sized>(
    maps: &MapRegistry,
    from: &Location,
    direction: Option<Direction>,
    reverse_chance: f64,
    rng: &mut R,
) -> (Location, bool) {
    if let Some(dir) = direction {
        let step = from.step(dir);
        if maps.contains(&step) {
            return (step, false);
        }
        let back = from.step(dir.reverse());
        if maps.contains(&back) && rng.gen_bool(reverse_chance.clamp(0.0, 1.0)) {
            return (back, true);
        }
    }
    let options: Vec<Location> = Direction::ALL
        .iter()
        .map(|d| from.step(*d))
        .filter(|l| maps.contains(l))
        .collect();
    match options.choose(rng) {
        Some(to) => (to.clone(), direction.is_some()),
        None => (from.clone(), false),
    }
}

/// Removes `min..=max` random items (bounded by what is carried).
pub fn drop_random_items<R: Rng + ?Sized>(
    inventory: &mut Inventory,
    min: u32,
    max: u32,
    rng: &mut R,
) -> Vec<ItemInstance> {
    let mut slots = inventory.occupied_slots();
    if slots.is_empty() {
        return Vec::new();
    }
    let wanted = (if max > min { rng.gen_range(min..=max) } else { min }) as usize;
    slots.shuffle(rng);
    slots
        .into_iter()
        .take(wanted)
        .filter_map(|slot| inventory.remove(slot))
        .collect()
}

impl GameWorld {
    /// Steps one cell in `direction`.
    pub fn move_entity(&self, id: &str, direction: Direction) -> GameResult<Location> {
        let handle = self.handle(id)?;
        {
            let entity = lock(&handle);
            ensure_can_move(&entity)?;
            if !self.maps.contains(&entity.state.location.step(direction)) {
                return Err(GameError::OutOfBounds);
            }
        }
        self.release_target(id);
        let mut entity = lock(&handle);
        ensure_can_move(&entity)?;
        let next = entity.state.location.step(direction);
        if !self.maps.contains(&next) {
            return Err(GameError::OutOfBounds);
        }
        self.place(&mut entity, next.clone());
        Ok(next)
    }

    /// Pays the fare and moves to another map's respawn point. Only from a
    /// cell with a structure offering `travel`.
    pub fn travel(&self, id: &str, map_id: &str) -> GameResult<Location> {
        let map = self
            .maps
            .get(map_id)
            .ok_or_else(|| GameError::not_found("There is no such place."))?;
        let destination = map.respawn_location();
        let cost = self.config.economy.travel_cost;
        let check = |entity: &Entity| -> GameResult<()> {
            ensure_can_move(entity)?;
            let here = &entity.state.location;
            if self.maps.structure_offering(here, "travel").is_none() {
                return Err(GameError::invalid("There is no way to travel from here."));
            }
            if here.map_id == destination.map_id {
                return Err(GameError::invalid("You are already there."));
            }
            if entity.state.cash < cost {
                return Err(GameError::InsufficientFunds { needed: cost });
            }
            Ok(())
        };

        let handle = self.handle(id)?;
        check(&lock(&handle))?;
        self.release_target(id);
        let mut entity = lock(&handle);
        check(&entity)?;
        entity.state.cash -= cost;
        self.place(&mut entity, destination.clone());
        self.send_to_entity(&entity, messages::character(&entity.state));
        self.feed(&entity, format!("You pay {} and travel to {}.", cost, map.name));
        Ok(destination)
    }

    /// Moves an entity anywhere, breaking every gridlock it is part of.
    pub fn teleport(&self, id: &str, to: Location) -> GameResult<()> {
        if !self.maps.contains(&to) {
            return Err(GameError::OutOfBounds);
        }
        self.release_all(id);
        let handle = self.handle(id)?;
        let mut entity = lock(&handle);
        if !entity.is_present() {
            return Err(GameError::Stale);
        }
        self.place(&mut entity, to);
        Ok(())
    }

    /// Breaks out of combat: drops every gridlock, loses a few items and a
    /// share of experience, then runs. Outside combat (including when the
    /// other side fled first) the run costs nothing.
    pub fn flee(&self, id: &str, direction: Option<Direction>) -> GameResult<FleeOutcome> {
        let handle = self.handle(id)?;
        let engaged = {
            let entity = lock(&handle);
            if !entity.is_present() {
                return Err(GameError::Stale);
            }
            entity.state.target.is_some() || entity.state.is_gridlocked()
        };
        self.release_all(id);

        let rules = &self.config.combat;
        let mut rng = thread_rng();
        let outcome = {
            let mut entity = lock(&handle);
            if !entity.is_present() {
                return Err(GameError::Stale);
            }
            let from = entity.state.location.clone();
            let (to, reversed) = flee_destination(
                &self.maps,
                &from,
                direction,
                rules.flee_reverse_chance,
                &mut rng,
            );
            let (dropped, experience_lost) = if engaged {
                let dropped = drop_random_items(
                    &mut entity.state.inventory,
                    rules.flee_drop_min,
                    rules.flee_drop_max,
                    &mut rng,
                );
                let lost = entity
                    .state
                    .lose_experience_percent(rules.flee_experience_penalty_percent);
                (dropped, lost)
            } else {
                (Vec::new(), 0)
            };
            self.ground.drop_items(&from, dropped.clone());
            self.place(&mut entity, to.clone());
            self.send_to_entity(&entity, messages::character(&entity.state));
            self.send_to_entity(&entity, messages::inventory(&entity.state));
            FleeOutcome {
                from,
                to,
                reversed,
                dropped,
                experience_lost,
            }
        };
        // Anyone who aimed during the run was aiming across cells.
        self.release_all(id);
        if !outcome.dropped.is_empty() {
            self.broadcast_ground(&outcome.from);
        }
        Ok(outcome)
    }

    pub fn set_hidden(&self, id: &str, hidden: bool) -> GameResult<()> {
        let handle = self.handle(id)?;
        let mut entity = lock(&handle);
        if hidden && entity.state.is_gridlocked() {
            return Err(GameError::Gridlocked);
        }
        if entity.state.hidden == hidden {
            return Err(GameError::invalid(if hidden {
                "You are already hidden."
            } else {
                "You are not hidden."
            }));
        }
        entity.state.hidden = hidden;
        self.entities.set_hidden(id, hidden);
        let room = entity.state.location.room_key();
        let me = entity.state.entity_ref();
        let envelope = if hidden {
            messages::left(&me)
        } else {
            messages::joined(&me)
        };
        self.router
            .to_room_except(&room, entity.connection().map(String::as_str), envelope);
        self.send_to_entity(&entity, messages::character(&entity.state));
        Ok(())
    }
}
