//! Process-wide counters.
//! Logged on shutdown and stored with every autosave, where
//! `gridrealm status` reads them back.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static COMMANDS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static VALIDATION_FAILURES: AtomicU64 = AtomicU64::new(0);
static NPC_KILLS: AtomicU64 = AtomicU64::new(0);
static PLAYER_DEATHS: AtomicU64 = AtomicU64::new(0);
static AUTOSAVES: AtomicU64 = AtomicU64::new(0);
static PERSISTENCE_FAILURES: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DROPPED: AtomicU64 = AtomicU64::new(0);

static COMMAND_COUNTS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

fn command_counts() -> &'static Mutex<HashMap<String, u64>> {
    COMMAND_COUNTS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn inc_command(name: &str) {
    COMMANDS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
    let mut guard = command_counts().lock().unwrap_or_else(|e| e.into_inner());
    *guard.entry(name.to_string()).or_insert(0) += 1;
}

pub fn inc_validation_failure() {
    VALIDATION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_npc_kill() {
    NPC_KILLS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_player_death() {
    PLAYER_DEATHS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_autosave() {
    AUTOSAVES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_persistence_failure() {
    PERSISTENCE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_message_dropped() {
    MESSAGES_DROPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub commands_dispatched: u64,
    pub validation_failures: u64,
    pub npc_kills: u64,
    pub player_deaths: u64,
    pub autosaves: u64,
    pub persistence_failures: u64,
    pub messages_dropped: u64,
    /// Top commands by use, most used first.
    pub top_commands: Vec<(String, u64)>,
}

pub fn snapshot() -> Snapshot {
    let mut top_commands: Vec<(String, u64)> = command_counts()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    top_commands.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_commands.truncate(5);
    Snapshot {
        commands_dispatched: COMMANDS_DISPATCHED.load(Ordering::Relaxed),
        validation_failures: VALIDATION_FAILURES.load(Ordering::Relaxed),
        npc_kills: NPC_KILLS.load(Ordering::Relaxed),
        player_deaths: PLAYER_DEATHS.load(Ordering::Relaxed),
        autosaves: AUTOSAVES.load(Ordering::Relaxed),
        persistence_failures: PERSISTENCE_FAILURES.load(Ordering::Relaxed),
        messages_dropped: MESSAGES_DROPPED.load(Ordering::Relaxed),
        top_commands,
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "commands={} validation_failures={} npc_kills={} player_deaths={} autosaves={} persistence_failures={} dropped={}",
            self.commands_dispatched,
            self.validation_failures,
            self.npc_kills,
            self.player_deaths,
            self.autosaves,
            self.persistence_failures,
            self.messages_dropped
        )
    }
}
