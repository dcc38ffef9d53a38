use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a live combatant. Player ids are UUIDs, NPC ids are `npc-<n>`.
pub type EntityId = String;

/// Opaque transport connection id.
pub type ConnectionId = String;

/// Room name used by the broadcast router for the whole-world channel.
pub const GAME_ROOM: &str = "game";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Accepts the full name or the single letter abbreviation, any case.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "south" | "s" => Some(Direction::South),
            "east" | "e" => Some(Direction::East),
            "west" | "w" => Some(Direction::West),
            _ => None,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Grid delta; north decreases `y`.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A grid cell address. Not a stored entity, only a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Location {
    pub map_id: String,
    pub x: i32,
    pub y: i32,
}

impl Location {
    pub fn new(map_id: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            map_id: map_id.into(),
            x,
            y,
        }
    }

    /// Broadcast room for this cell, `map_y_x`.
    pub fn room_key(&self) -> String {
        format!("{}_{}_{}", self.map_id, self.y, self.x)
    }

    /// The adjacent cell; bounds are not checked here.
    pub fn step(&self, direction: Direction) -> Location {
        let (dx, dy) = direction.delta();
        Location {
            map_id: self.map_id.clone(),
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.map_id, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Npc,
}

/// Weak reference to another combatant: an id plus a display-name snapshot.
/// Always resolved again through the registry before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directions_and_abbreviations() {
        assert_eq!(Direction::parse("N"), Some(Direction::North));
        assert_eq!(Direction::parse("west"), Some(Direction::West));
        assert_eq!(Direction::parse("up"), None);
    }

    #[test]
    fn room_key_is_map_y_x() {
        let loc = Location::new("town", 5, 7);
        assert_eq!(loc.room_key(), "town_7_5");
        assert_eq!(loc.step(Direction::North), Location::new("town", 5, 6));
        assert_eq!(Direction::East.reverse(), Direction::West);
    }
}
