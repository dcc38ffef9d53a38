//! # Configuration
//!
//! TOML configuration for the gridrealm server. Every section has defaults,
//! so a partial file (or none, via [`Config::default`]) is enough to run.
//!
//! ## Sections
//!
//! - [`ServerConfig`] - name, listen address and message of the day
//! - [`StorageConfig`] - data directory, database and content paths
//! - [`LoggingConfig`] - log level and optional log file
//! - [`TimingConfig`] - tick length, autosave, new day and disconnect grace
//! - [`CooldownConfig`] - per-action default cooldown seconds
//! - [`CombatConfig`] - fists, accuracy and flee/death penalties
//! - [`EconomyConfig`] - travel, bank and training costs
//! - [`DispatchConfig`] - number of worker shards
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gridrealm::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("listening on {}", config.server.listen_addr);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub cooldowns: CooldownConfig,
    #[serde(default)]
    pub combat: CombatConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub listen_addr: String,
    pub motd: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Gridrealm".to_string(),
            listen_addr: "127.0.0.1:4820".to_string(),
            motd: "Welcome to the grid.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Sled database path; defaults to `<data_dir>/world`.
    pub db_path: Option<String>,
    /// Content JSON; defaults to `<data_dir>/content.json`.
    pub content_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            db_path: None,
            content_path: None,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(&self.data_dir).join("world"),
        }
    }

    pub fn content_path(&self) -> PathBuf {
        match &self.content_path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(&self.data_dir).join("content.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("gridrealm.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Length of one game tick in milliseconds.
    pub tick_ms: u64,
    /// Ticks between cooldown cleanup sweeps.
    pub cleanup_interval_ticks: u32,
    pub autosave_seconds: u64,
    pub new_day_minutes: u64,
    /// How long a disconnected character stays in the world.
    pub disconnect_grace_seconds: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            cleanup_interval_ticks: 50,
            autosave_seconds: 300,
            new_day_minutes: 60,
            disconnect_grace_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Used for any action without an entry in `actions`.
    pub default_seconds: f64,
    pub actions: HashMap<String, f64>,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        let actions = [
            ("chat", 0.5),
            ("move", 0.4),
            ("aim", 1.0),
            ("attack", 1.5),
            ("flee", 5.0),
            ("travel", 10.0),
            ("shop", 0.5),
            ("skill", 2.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            default_seconds: 1.0,
            actions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub fists_damage_min: u32,
    pub fists_damage_max: u32,
    /// Starting accuracy (percent) for new characters.
    pub starting_accuracy: f64,
    /// Accuracy approaches but never reaches this value.
    pub accuracy_cap: f64,
    /// Fraction of the remaining distance to the cap gained on a hit.
    pub accuracy_gain: f64,
    pub flee_experience_penalty_percent: f64,
    /// Chance that a flee blocked by the map edge turns back the way it came
    /// instead of scattering to any open neighbour.
    pub flee_reverse_chance: f64,
    pub flee_drop_min: u32,
    pub flee_drop_max: u32,
    pub death_cash_penalty_percent: f64,
    /// Experience for killing another player.
    pub pvp_kill_experience: u64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            fists_damage_min: 1,
            fists_damage_max: 3,
            starting_accuracy: 50.0,
            accuracy_cap: 100.0,
            accuracy_gain: 0.02,
            flee_experience_penalty_percent: 5.0,
            flee_reverse_chance: 0.75,
            flee_drop_min: 1,
            flee_drop_max: 3,
            death_cash_penalty_percent: 10.0,
            pvp_kill_experience: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub starting_cash: u64,
    pub starting_health: u32,
    pub inventory_capacity: usize,
    pub travel_cost: u64,
    pub bank_enabled: bool,
    /// Experience spent per `/train` call.
    pub training_cost: u64,
    /// Skill points gained per `/train` call.
    pub training_gain: f64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            starting_cash: 100,
            starting_health: 100,
            inventory_capacity: 12,
            travel_cost: 20,
            bank_enabled: true,
            training_cost: 25,
            training_gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub shards: usize,
    /// Per-shard queue depth before senders wait.
    pub queue_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            queue_depth: 256,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.timing.tick_ms == 0 {
            return Err(anyhow!("timing.tick_ms must be positive"));
        }
        if self.dispatch.shards == 0 {
            return Err(anyhow!("dispatch.shards must be at least 1"));
        }
        if self.combat.fists_damage_min > self.combat.fists_damage_max {
            return Err(anyhow!("combat.fists_damage_min exceeds fists_damage_max"));
        }
        if self.combat.flee_drop_min > self.combat.flee_drop_max {
            return Err(anyhow!("combat.flee_drop_min exceeds flee_drop_max"));
        }
        if !(0.0..=1.0).contains(&self.combat.flee_reverse_chance) {
            return Err(anyhow!("combat.flee_reverse_chance must be in [0, 1]"));
        }
        if !(0.0..1.0).contains(&self.combat.accuracy_gain) {
            return Err(anyhow!("combat.accuracy_gain must be in [0, 1)"));
        }
        Ok(())
    }
}
