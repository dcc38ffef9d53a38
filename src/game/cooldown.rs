//! Per-entity named cooldown timers.
//!
//! Durations are kept in whole ticks (one tick is 100ms) so repeated
//! decrements never drift. Every managed entity owns a [`Cooldowns`] list;
//! the orchestrator drives [`Cooldowns::tick`] from its shared game tick and
//! calls [`Cooldowns::cleanup`] on a fixed interval to purge expired entries.
//!
//! Rate-limited actions gate themselves with [`Cooldowns::ticks_left`] and
//! start their cooldown through [`CooldownEngine::add`], which resolves the
//! configured default duration when none is given.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Length of one tick in milliseconds.
pub const TICK_MS: u64 = 100;

/// Converts seconds to ticks as `seconds * 1000 / 100`.
pub fn seconds_to_ticks(seconds: f64) -> u32 {
    if seconds <= 0.0 {
        return 0;
    }
    ((seconds * 1000.0) / TICK_MS as f64).round() as u32
}

pub fn ticks_to_seconds(ticks: u32) -> f64 {
    ticks as f64 * TICK_MS as f64 / 1000.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub action: String,
    pub duration_ticks: u32,
    pub remaining_ticks: u32,
    pub running: bool,
    /// Set when the timer hits zero; the entry is purged by the next cleanup.
    pub remove: bool,
}

impl Cooldown {
    fn new(action: &str, duration_ticks: u32) -> Self {
        Self {
            action: action.to_string(),
            duration_ticks,
            remaining_ticks: duration_ticks,
            running: false,
            remove: duration_ticks == 0,
        }
    }

    fn is_active(&self) -> bool {
        !self.remove
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldowns {
    entries: Vec<Cooldown>,
}

impl Cooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the active cooldown for `action`, creating one with
    /// `duration_ticks` if none is active. At most one active entry exists
    /// per action.
    pub fn add(&mut self, action: &str, duration_ticks: u32, autostart: bool) -> &Cooldown {
        let idx = match self
            .entries
            .iter()
            .position(|c| c.action == action && c.is_active())
        {
            Some(idx) => idx,
            None => {
                // An expired entry may linger until the next sweep.
                self.entries.retain(|c| c.action != action);
                self.entries.push(Cooldown::new(action, duration_ticks));
                self.entries.len() - 1
            }
        };
        if autostart && !self.entries[idx].remove {
            self.entries[idx].running = true;
        }
        &self.entries[idx]
    }

    /// Starts a cooldown created with `autostart = false`.
    pub fn start(&mut self, action: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|c| c.action == action && c.is_active())
        {
            Some(c) => {
                c.running = true;
                true
            }
            None => false,
        }
    }

    /// Remaining ticks for `action`, `0` when none is active.
    pub fn ticks_left(&self, action: &str) -> u32 {
        self.entries
            .iter()
            .find(|c| c.action == action && c.is_active())
            .map(|c| c.remaining_ticks)
            .unwrap_or(0)
    }

    /// One shared 100ms decrement for every running cooldown. The entry is
    /// flagged for removal on the same tick its counter reaches zero.
    pub fn tick(&mut self) {
        for cooldown in self.entries.iter_mut().filter(|c| c.running && !c.remove) {
            cooldown.remaining_ticks = cooldown.remaining_ticks.saturating_sub(1);
            if cooldown.remaining_ticks == 0 {
                cooldown.running = false;
                cooldown.remove = true;
            }
        }
    }

    /// Purges every entry flagged for removal. Returns how many were dropped.
    pub fn cleanup(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|c| !c.remove);
        before - self.entries.len()
    }

    /// Drops every cooldown, used when an NPC respawns.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves per-action default durations from configuration.
#[derive(Debug, Clone)]
pub struct CooldownEngine {
    defaults: HashMap<String, f64>,
    fallback_seconds: f64,
}

impl CooldownEngine {
    pub fn new(defaults: HashMap<String, f64>, fallback_seconds: f64) -> Self {
        Self {
            defaults,
            fallback_seconds,
        }
    }

    pub fn default_seconds(&self, action: &str) -> f64 {
        self.defaults
            .get(action)
            .copied()
            .unwrap_or(self.fallback_seconds)
    }

    /// Creates (or returns) the cooldown for `action`, using the configured
    /// default when `duration_seconds` is `None`.
    pub fn add<'a>(
        &self,
        cooldowns: &'a mut Cooldowns,
        action: &str,
        duration_seconds: Option<f64>,
        autostart: bool,
    ) -> &'a Cooldown {
        let seconds = duration_seconds.unwrap_or_else(|| self.default_seconds(action));
        cooldowns.add(action, seconds_to_ticks(seconds), autostart)
    }
}

impl Default for CooldownEngine {
    fn default() -> Self {
        Self::new(HashMap::new(), 1.0)
    }
}
