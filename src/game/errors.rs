use thiserror::Error;

/// Failures raised by world operations.
///
/// Every variant renders as a message that can be shown to the player who
/// triggered it; nothing in here is fatal to the simulation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GameError {
    /// A named thing (character, item, map, faction...) could not be resolved.
    #[error("{0}")]
    NotFound(String),

    /// The acting entity is in a state that forbids the action.
    #[error("{0}")]
    InvalidState(String),

    /// A move would leave the map grid.
    #[error("You can't go that way.")]
    OutOfBounds,

    /// A gridlocked entity tried to move or hide.
    #[error("You are gridlocked and cannot move. Try /flee.")]
    Gridlocked,

    /// The action is still cooling down.
    #[error("You must wait {seconds:.1}s before you can {action} again.")]
    CooldownActive { action: String, seconds: f64 },

    #[error("You cannot afford that ({needed} needed).")]
    InsufficientFunds { needed: u64 },

    #[error("Your inventory is full.")]
    InventoryFull,

    /// The acting entity vanished (logged out, evicted, died) mid-operation.
    #[error("That is no longer possible.")]
    Stale,

    /// Name collision for characters or factions.
    #[error("{0}")]
    Conflict(String),
}

impl GameError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        GameError::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        GameError::InvalidState(msg.into())
    }
}

pub type GameResult<T> = Result<T, GameError>;
