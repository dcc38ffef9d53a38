//! Gridlock bookkeeping on a pair of combatants.
//!
//! A gridlock is two halves kept in agreement: the attacker's `target` and
//! the defender's `targeted_by` entry. These helpers only touch the two
//! states they are handed, so callers must hold both entity locks.

use crate::game::combatant::CombatantState;

/// Points `attacker` at `defender` and records the attacker on the
/// defender's side. Returns false when the link already existed.
pub fn link(attacker: &mut CombatantState, defender: &mut CombatantState) -> bool {
    let already = attacker.is_targeting(&defender.id)
        && defender.targeted_by.iter().any(|r| r.id == attacker.id);
    attacker.target = Some(defender.entity_ref());
    if !defender.targeted_by.iter().any(|r| r.id == attacker.id) {
        defender.targeted_by.push(attacker.entity_ref());
    }
    !already
}

/// Removes both halves of `attacker -> defender`. Safe to call when only
/// one half (or neither) exists.
pub fn unlink(attacker: &mut CombatantState, defender: &mut CombatantState) -> bool {
    let had_target = attacker.is_targeting(&defender.id);
    if had_target {
        attacker.target = None;
    }
    let before = defender.targeted_by.len();
    defender.targeted_by.retain(|r| r.id != attacker.id);
    had_target || before != defender.targeted_by.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::{EntityKind, Location};

    fn state(id: &str) -> CombatantState {
        CombatantState::new(id, EntityKind::Player, id, Location::new("m", 0, 0), 10, 2)
    }

    #[test]
    fn link_is_symmetric_and_unlink_clears_both_sides() {
        let mut a = state("a");
        let mut b = state("b");
        assert!(link(&mut a, &mut b));
        assert!(a.is_targeting("b"));
        assert!(b.targeted_by.iter().any(|r| r.id == "a"));
        assert!(!link(&mut a, &mut b));
        assert_eq!(b.targeted_by.len(), 1);

        assert!(unlink(&mut a, &mut b));
        assert!(a.target.is_none());
        assert!(b.targeted_by.is_empty());
        assert!(!unlink(&mut a, &mut b));
    }

    #[test]
    fn mutual_locks_are_independent() {
        let mut a = state("a");
        let mut b = state("b");
        link(&mut a, &mut b);
        link(&mut b, &mut a);
        unlink(&mut a, &mut b);
        assert!(b.is_targeting("a"));
        assert!(a.targeted_by.iter().any(|r| r.id == "b"));
        assert!(b.targeted_by.is_empty());
    }
}
