//! Business-rule failures shared by the server and any Rust client.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request that is well formed but breaks one of the room, wallet or social
/// rules. Never retried: the same inputs against the same state fail again.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleViolation {
    #[error("seat {index} does not exist (room has {seat_count} seats)")]
    SeatOutOfRange { index: usize, seat_count: usize },

    #[error("seat {0} is already occupied")]
    SeatOccupied(usize),

    #[error("seat {0} is locked")]
    SeatLocked(usize),

    #[error("seat 0 is reserved for the host")]
    HostSeatReserved,

    #[error("user is not on a seat")]
    NotSeated,

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("banned from this room until {until}")]
    Banned { until: i64 },

    #[error("item {0} is not owned")]
    ItemNotOwned(String),

    #[error("item {0} has expired")]
    ItemExpired(String),

    #[error("a higher VIP level is still active")]
    VipDowngrade,

    #[error("invalid VIP level {0}")]
    InvalidVipLevel(u8),

    #[error("cannot target yourself")]
    SelfTarget,

    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("recipient {0} is not on a seat")]
    RecipientNotSeated(String),

    #[error("recipient {0} listed twice")]
    DuplicateRecipient(String),

    #[error("already friends")]
    AlreadyFriends,

    #[error("request was already handled")]
    RequestAlreadyHandled,

    #[error("user is not in the room")]
    NotInRoom,

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

impl RuleViolation {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            RuleViolation::SeatOutOfRange { .. } => "SEAT_001",
            RuleViolation::SeatOccupied(_) => "SEAT_002",
            RuleViolation::SeatLocked(_) => "SEAT_003",
            RuleViolation::HostSeatReserved => "SEAT_004",
            RuleViolation::NotSeated => "SEAT_005",
            RuleViolation::NotPermitted(_) => "PERM_001",
            RuleViolation::InsufficientFunds { .. } => "WALLET_001",
            RuleViolation::Banned { .. } => "ROOM_002",
            RuleViolation::ItemNotOwned(_) => "ITEM_001",
            RuleViolation::ItemExpired(_) => "ITEM_002",
            RuleViolation::VipDowngrade => "VIP_001",
            RuleViolation::InvalidVipLevel(_) => "VIP_002",
            RuleViolation::SelfTarget => "SOCIAL_001",
            RuleViolation::InvalidQuantity => "GIFT_001",
            RuleViolation::RecipientNotSeated(_) => "GIFT_002",
            RuleViolation::DuplicateRecipient(_) => "GIFT_003",
            RuleViolation::AlreadyFriends => "SOCIAL_002",
            RuleViolation::RequestAlreadyHandled => "SOCIAL_003",
            RuleViolation::NotInRoom => "ROOM_003",
            RuleViolation::InvalidSetting(_) => "ROOM_004",
        }
    }
}
