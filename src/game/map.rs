//! Static map grids and the structures placed on them.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::game::types::Location;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Something built on a cell: a bank, a shop front, a travel terminal.
/// `commands` lists the structure-bound commands usable there, e.g.
/// `"bank"`, `"travel"`, `"heal"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Structure {
    pub id: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub shop_id: Option<String>,
}

impl Structure {
    pub fn offers(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c.eq_ignore_ascii_case(command))
    }
}

/// Where and how many NPCs of a template live on a map. Without a fixed
/// `location` each instance spawns on a random cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcSpawn {
    pub template_id: String,
    #[serde(default = "default_spawn_count")]
    pub count: u32,
    #[serde(default)]
    pub location: Option<Point>,
}

fn default_spawn_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameMap {
    pub id: String,
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub respawn: Point,
    #[serde(default)]
    pub structures: Vec<Structure>,
    #[serde(default)]
    pub npc_spawns: Vec<NpcSpawn>,
}

impl GameMap {
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    pub fn respawn_location(&self) -> Location {
        Location::new(self.id.clone(), self.respawn.x, self.respawn.y)
    }

    pub fn random_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Location {
        Location::new(
            self.id.clone(),
            rng.gen_range(0..self.width.max(1)),
            rng.gen_range(0..self.height.max(1)),
        )
    }

    pub fn structures_at(&self, x: i32, y: i32) -> impl Iterator<Item = &Structure> {
        self.structures.iter().filter(move |s| s.x == x && s.y == y)
    }
}

/// All loaded maps. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct MapRegistry {
    maps: HashMap<String, GameMap>,
}

impl MapRegistry {
    pub fn new(maps: impl IntoIterator<Item = GameMap>) -> Self {
        Self {
            maps: maps.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&GameMap> {
        self.maps.get(id)
    }

    /// Case-insensitive lookup by id or display name.
    pub fn find(&self, query: &str) -> Option<&GameMap> {
        let query = query.trim();
        self.maps.get(query).or_else(|| {
            self.maps
                .values()
                .find(|m| m.id.eq_ignore_ascii_case(query) || m.name.eq_ignore_ascii_case(query))
        })
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.maps
            .get(&location.map_id)
            .map(|m| m.in_bounds(location.x, location.y))
            .unwrap_or(false)
    }

    pub fn structures_at(&self, location: &Location) -> Vec<&Structure> {
        match self.maps.get(&location.map_id) {
            Some(map) => map.structures_at(location.x, location.y).collect(),
            None => Vec::new(),
        }
    }

    /// The first structure on `location` offering `command`.
    pub fn structure_offering(&self, location: &Location, command: &str) -> Option<&Structure> {
        self.structures_at(location)
            .into_iter()
            .find(|s| s.offers(command))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameMap> {
        self.maps.values()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn town() -> GameMap {
        GameMap {
            id: "town".into(),
            name: "Old Town".into(),
            width: 10,
            height: 8,
            respawn: Point { x: 1, y: 1 },
            structures: vec![Structure {
                id: "bank".into(),
                name: "Bank".into(),
                x: 2,
                y: 3,
                description: String::new(),
                commands: vec!["bank".into()],
                shop_id: None,
            }],
            npc_spawns: vec![],
        }
    }

    #[test]
    fn bounds_are_checked_per_map() {
        let maps = MapRegistry::new(vec![town()]);
        assert!(maps.contains(&Location::new("town", 9, 7)));
        assert!(!maps.contains(&Location::new("town", 10, 0)));
        assert!(!maps.contains(&Location::new("town", -1, 0)));
        assert!(!maps.contains(&Location::new("nowhere", 0, 0)));
    }

    #[test]
    fn finds_maps_and_structures() {
        let maps = MapRegistry::new(vec![town()]);
        assert_eq!(maps.find("old town").unwrap().id, "town");
        let loc = Location::new("town", 2, 3);
        assert_eq!(maps.structure_offering(&loc, "BANK").unwrap().id, "bank");
        assert!(maps.structure_offering(&loc, "travel").is_none());
    }
}
