//! State shared by players and NPCs, plus the combat math that acts on it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::CombatConfig;
use crate::game::cooldown::Cooldowns;
use crate::game::errors::{GameError, GameResult};
use crate::game::item::{EquipSlot, Inventory};
use crate::game::types::{EntityId, EntityKind, EntityRef, Gender, Location};

pub const ACCURACY: &str = "accuracy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Shoot,
    Strike,
    Punch,
}

impl AttackKind {
    pub fn verb(self) -> &'static str {
        match self {
            AttackKind::Shoot => "shoots",
            AttackKind::Strike => "strikes",
            AttackKind::Punch => "punches",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DamageReport {
    pub requested: u32,
    pub blocked: u32,
    pub dealt: u32,
    pub armor_durability_left: Option<u32>,
    /// Name of armor destroyed by this hit.
    pub armor_ruined: Option<String>,
    pub killed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttackRoll {
    pub damage: u32,
    pub weapon: String,
    /// Ammo stack destroyed by this shot.
    pub ammo_depleted: Option<String>,
}

/// Everything a combatant carries, independent of whether a player or the
/// world controls it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombatantState {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub gender: Gender,
    pub location: Location,
    pub health: u32,
    pub health_max: u32,
    pub cash: u64,
    pub bank: u64,
    pub experience: u64,
    pub inventory: Inventory,
    pub skills: BTreeMap<String, f64>,
    #[serde(skip)]
    pub cooldowns: Cooldowns,
    #[serde(skip)]
    pub target: Option<EntityRef>,
    #[serde(skip)]
    pub targeted_by: Vec<EntityRef>,
    #[serde(default)]
    pub hidden: bool,
    /// Ammo and stacks are never consumed.
    #[serde(default)]
    pub ignore_quantity: bool,
}

impl CombatantState {
    pub fn new(id: &str, kind: EntityKind, name: &str, location: Location, health: u32, capacity: usize) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            gender: Gender::Male,
            location,
            health,
            health_max: health,
            cash: 0,
            bank: 0,
            experience: 0,
            inventory: Inventory::new(capacity),
            skills: BTreeMap::new(),
            cooldowns: Cooldowns::new(),
            target: None,
            targeted_by: Vec::new(),
            hidden: false,
            ignore_quantity: false,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn is_gridlocked(&self) -> bool {
        !self.targeted_by.is_empty()
    }

    pub fn is_targeting(&self, id: &str) -> bool {
        self.target.as_ref().map_or(false, |t| t.id == id)
    }

    pub fn skill(&self, name: &str) -> f64 {
        self.skills.get(name).copied().unwrap_or(0.0)
    }

    pub fn set_skill(&mut self, name: &str, value: f64) {
        self.skills.insert(name.to_string(), value);
    }

    pub fn heal(&mut self, amount: u32) -> u32 {
        let before = self.health;
        self.health = self.health.saturating_add(amount).min(self.health_max);
        self.health - before
    }

    pub fn restore_health(&mut self) {
        self.health = self.health_max;
    }

    /// Applies a hit. Equipped armor blocks up to `min(amount, reduction,
    /// durability)`; its durability is then worn down by the full requested
    /// amount and the armor is destroyed when it reaches zero.
    pub fn deal_damage(&mut self, amount: u32, ignore_armor: bool) -> DamageReport {
        let mut report = DamageReport {
            requested: amount,
            ..Default::default()
        };
        if !ignore_armor {
            if let Some(armor) = self.inventory.equipped_mut(EquipSlot::Armor) {
                let reduction = armor.stats.armor_reduction;
                report.blocked = amount.min(reduction).min(armor.durability);
                armor.durability = armor.durability.saturating_sub(amount);
                report.armor_durability_left = Some(armor.durability);
                if armor.durability == 0 {
                    let fingerprint = armor.fingerprint.clone();
                    report.armor_ruined = self
                        .inventory
                        .remove_by_fingerprint(&fingerprint)
                        .map(|a| a.name);
                }
            }
        }
        report.dealt = amount.saturating_sub(report.blocked);
        self.health = self.health.saturating_sub(report.dealt);
        report.killed = self.health == 0;
        report
    }

    /// Rolls `0.0..=99.9` against the current accuracy. A hit moves the skill
    /// a `gain` fraction of the way towards `cap`; it never arrives.
    pub fn roll_accuracy<R: Rng + ?Sized>(&mut self, rng: &mut R, rules: &CombatConfig) -> bool {
        let roll = rng.gen_range(0..1000) as f64 / 10.0;
        let current = self.skill(ACCURACY);
        let hit = roll < current;
        if hit {
            self.set_skill(ACCURACY, improve_towards_cap(current, rules.accuracy_cap, rules.accuracy_gain));
        }
        hit
    }

    /// Damage for one attack of the given kind, consuming ammo on shots.
    pub fn roll_attack<R: Rng + ?Sized>(
        &mut self,
        kind: AttackKind,
        rng: &mut R,
        rules: &CombatConfig,
    ) -> GameResult<AttackRoll> {
        match kind {
            AttackKind::Punch => Ok(AttackRoll {
                damage: roll_range(rng, rules.fists_damage_min, rules.fists_damage_max),
                weapon: "fists".to_string(),
                ammo_depleted: None,
            }),
            AttackKind::Strike => {
                let (_, weapon) = self
                    .inventory
                    .equipped(EquipSlot::Weapon)
                    .ok_or_else(|| GameError::invalid("You have no weapon equipped."))?;
                if weapon.stats.ranged {
                    return Err(GameError::invalid("You can't strike with a ranged weapon. Try /shoot."));
                }
                Ok(AttackRoll {
                    damage: roll_range(rng, weapon.stats.damage_min, weapon.stats.damage_max),
                    weapon: weapon.name.clone(),
                    ammo_depleted: None,
                })
            }
            AttackKind::Shoot => self.fire_ranged(rng),
        }
    }

    fn fire_ranged<R: Rng + ?Sized>(&mut self, rng: &mut R) -> GameResult<AttackRoll> {
        let (_, weapon) = self
            .inventory
            .equipped(EquipSlot::Weapon)
            .ok_or_else(|| GameError::invalid("You have no weapon equipped."))?;
        if !weapon.stats.ranged {
            return Err(GameError::invalid("You can't shoot with a melee weapon. Try /strike."));
        }
        let weapon_name = weapon.name.clone();
        let base = roll_range(rng, weapon.stats.damage_min, weapon.stats.damage_max);
        let wanted_ammo = weapon.stats.ammo_type.clone();

        let ignore_quantity = self.ignore_quantity;
        let ammo = self
            .inventory
            .equipped_mut(EquipSlot::Ammo)
            .filter(|a| wanted_ammo.is_none() || a.stats.ammo_type == wanted_ammo)
            .ok_or_else(|| GameError::invalid("You have no suitable ammo equipped."))?;
        if ammo.durability == 0 && !ignore_quantity {
            return Err(GameError::invalid("You are out of ammo."));
        }
        let bonus = ammo.stats.damage_bonus;
        let mut depleted = None;
        if !ignore_quantity {
            ammo.durability -= 1;
            if ammo.durability == 0 {
                let fingerprint = ammo.fingerprint.clone();
                depleted = self
                    .inventory
                    .remove_by_fingerprint(&fingerprint)
                    .map(|a| a.name);
            }
        }
        Ok(AttackRoll {
            damage: base + bonus,
            weapon: weapon_name,
            ammo_depleted: depleted,
        })
    }

    /// Deducts `percent` of experience and returns the amount lost.
    pub fn lose_experience_percent(&mut self, percent: f64) -> u64 {
        let lost = (self.experience as f64 * percent / 100.0).round() as u64;
        self.experience = self.experience.saturating_sub(lost);
        lost
    }

    pub fn lose_cash_percent(&mut self, percent: f64) -> u64 {
        let lost = (self.cash as f64 * percent / 100.0).round() as u64;
        self.cash = self.cash.saturating_sub(lost);
        lost
    }
}

/// `value + (cap - value) * gain`, kept strictly below `cap`.
pub fn improve_towards_cap(value: f64, cap: f64, gain: f64) -> f64 {
    if value >= cap {
        return value;
    }
    let next = value + (cap - value) * gain;
    if next >= cap {
        value
    } else {
        next
    }
}

fn roll_range<R: Rng + ?Sized>(rng: &mut R, min: u32, max: u32) -> u32 {
    if max <= min {
        min
    } else {
        rng.gen_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::item::{ItemInstance, ItemKind, ItemStats, ItemTemplate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn armor(reduction: u32, durability: u32) -> ItemTemplate {
        ItemTemplate {
            id: "vest".into(),
            name: "Vest".into(),
            kind: ItemKind::Armor,
            price: 10,
            equip_slot: Some(EquipSlot::Armor),
            stackable: false,
            durability,
            stats: ItemStats {
                armor_reduction: reduction,
                ..Default::default()
            },
        }
    }

    fn fighter() -> CombatantState {
        CombatantState::new("p1", EntityKind::Player, "Ash", Location::new("m", 0, 0), 50, 6)
    }

    fn equip(state: &mut CombatantState, template: &ItemTemplate) {
        let slot = state.inventory.add(ItemInstance::from_template(template)).unwrap();
        state.inventory.equip(slot).unwrap();
    }

    #[test]
    fn armor_absorbs_small_hits_and_wears_by_full_amount() {
        for (amount, r, dur) in [(1u32, 3u32, 10u32), (3, 3, 3), (2, 5, 4), (4, 4, 9)] {
            let mut s = fighter();
            equip(&mut s, &armor(r, dur));
            let report = s.deal_damage(amount, false);
            assert_eq!(report.dealt, 0, "amount {} r {} dur {}", amount, r, dur);
            assert_eq!(s.health, 50);
            let left = dur - amount;
            if left == 0 {
                assert_eq!(report.armor_ruined.as_deref(), Some("Vest"));
                assert!(s.inventory.equipped(EquipSlot::Armor).is_none());
            } else {
                assert_eq!(report.armor_durability_left, Some(left));
            }
        }
    }

    #[test]
    fn large_hit_breaks_through_and_ruins_armor() {
        let mut s = fighter();
        equip(&mut s, &armor(3, 5));
        let report = s.deal_damage(10, false);
        assert_eq!(report.blocked, 3);
        assert_eq!(report.dealt, 7);
        assert_eq!(s.health, 43);
        assert_eq!(report.armor_ruined.as_deref(), Some("Vest"));
    }

    #[test]
    fn ignore_armor_and_floor_at_zero() {
        let mut s = fighter();
        equip(&mut s, &armor(10, 10));
        let report = s.deal_damage(80, true);
        assert_eq!(report.dealt, 80);
        assert_eq!(s.health, 0);
        assert!(report.killed);
        assert!(s.inventory.equipped(EquipSlot::Armor).is_some());
    }

    #[test]
    fn accuracy_never_reaches_cap() {
        let mut value = 50.0;
        for _ in 0..10_000 {
            value = improve_towards_cap(value, 100.0, 0.05);
            assert!(value < 100.0);
        }
        assert!(value > 99.0);
    }

    #[test]
    fn shooting_consumes_ammo_unless_ignored() {
        let pistol = ItemTemplate {
            id: "pistol".into(),
            name: "Pistol".into(),
            kind: ItemKind::Weapon,
            price: 1,
            equip_slot: Some(EquipSlot::Weapon),
            stackable: false,
            durability: 10,
            stats: ItemStats {
                damage_min: 4,
                damage_max: 4,
                ranged: true,
                ammo_type: Some("9mm".into()),
                ..Default::default()
            },
        };
        let rounds = ItemTemplate {
            id: "ammo".into(),
            name: "Rounds".into(),
            kind: ItemKind::Ammo,
            price: 1,
            equip_slot: Some(EquipSlot::Ammo),
            stackable: true,
            durability: 1,
            stats: ItemStats {
                ammo_type: Some("9mm".into()),
                damage_bonus: 2,
                ..Default::default()
            },
        };
        let mut rng = StdRng::seed_from_u64(3);
        let rules = CombatConfig::default();
        let mut s = fighter();
        equip(&mut s, &pistol);
        let slot = s.inventory.add(ItemInstance::with_quantity(&rounds, 2)).unwrap();
        s.inventory.equip(slot).unwrap();

        let first = s.roll_attack(AttackKind::Shoot, &mut rng, &rules).unwrap();
        assert_eq!(first.damage, 6);
        assert_eq!(first.ammo_depleted, None);
        let second = s.roll_attack(AttackKind::Shoot, &mut rng, &rules).unwrap();
        assert_eq!(second.ammo_depleted.as_deref(), Some("Rounds"));
        assert!(s.roll_attack(AttackKind::Shoot, &mut rng, &rules).is_err());

        let mut npc = fighter();
        npc.ignore_quantity = true;
        equip(&mut npc, &pistol);
        let slot = npc.inventory.add(ItemInstance::with_quantity(&rounds, 1)).unwrap();
        npc.inventory.equip(slot).unwrap();
        for _ in 0..5 {
            npc.roll_attack(AttackKind::Shoot, &mut rng, &rules).unwrap();
        }
        assert_eq!(npc.inventory.count_of("ammo"), 1);
    }

    #[test]
    fn punch_uses_configured_fists() {
        let mut rng = StdRng::seed_from_u64(9);
        let rules = CombatConfig {
            fists_damage_min: 2,
            fists_damage_max: 2,
            ..Default::default()
        };
        let roll = fighter().roll_attack(AttackKind::Punch, &mut rng, &rules).unwrap();
        assert_eq!(roll.damage, 2);
        assert_eq!(roll.weapon, "fists");
    }
}
