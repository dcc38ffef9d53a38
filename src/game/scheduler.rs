//! Timer queue for NPC logic, respawns and disconnect evictions.
//!
//! The queue is polled: the game tick calls [`TimerQueue::due`] with the
//! current instant and routes each returned key into the dispatcher, so a
//! timer firing is ordered with the owning entity's commands. The
//! implementation is a `Vec` kept sorted by due time; queues stay small
//! (a few entries per NPC) so this beats a heap with removal support.

use std::time::{Duration, Instant};

use crate::game::types::EntityId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TimerKind {
    NpcMove,
    NpcAttack,
    NpcRespawn,
    Eviction,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerKey {
    pub owner: EntityId,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn new(owner: &str, kind: TimerKind) -> Self {
        Self {
            owner: owner.to_string(),
            kind,
        }
    }
}

#[derive(Debug)]
struct Timer {
    key: TimerKey,
    due: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub scheduled_total: u64,
    pub fired_total: u64,
    pub cancelled_total: u64,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: Vec<Timer>,
    stats: TimerStats,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` to fire after `delay`, replacing any pending timer with the
    /// same key.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration, now: Instant) {
        self.timers.retain(|t| t.key != key);
        self.timers.push(Timer {
            key,
            due: now + delay,
        });
        self.timers.sort_by(|a, b| a.due.cmp(&b.due));
        self.stats.scheduled_total += 1;
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| &t.key != key);
        let removed = before != self.timers.len();
        if removed {
            self.stats.cancelled_total += 1;
        }
        removed
    }

    /// Drops every timer owned by `owner`. Returns how many were pending.
    pub fn cancel_owner(&mut self, owner: &str) -> usize {
        let before = self.timers.len();
        self.timers.retain(|t| t.key.owner != owner);
        let removed = before - self.timers.len();
        self.stats.cancelled_total += removed as u64;
        removed
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.timers.iter().any(|t| &t.key == key)
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<TimerKey> {
        let split = self.timers.partition_point(|t| t.due <= now);
        let fired: Vec<TimerKey> = self.timers.drain(..split).map(|t| t.key).collect();
        self.stats.fired_total += fired.len() as u64;
        fired
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn stats(&self) -> TimerStats {
        self.stats.clone()
    }
}
