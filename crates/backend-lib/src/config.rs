// ============================
// voiceroom-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use voiceroom_common::room::{DEFAULT_SEAT_COUNT, MAX_SEAT_COUNT};
use voiceroom_common::user::MAX_VIP_LEVEL;

use crate::store::RetryPolicy;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "voiceroom.toml";
/// Prefix for environment overrides, e.g. `VOICEROOM_ECONOMY__STARTING_DIAMONDS`
pub const ENV_PREFIX: &str = "VOICEROOM_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path
    pub data_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Session TTL in seconds
    pub session_ttl_secs: u64,
    /// scrypt cost exponent for new password hashes
    pub password_log_n: u8,
    pub rate_limit: RateLimitSettings,
    pub economy: EconomySettings,
    pub rooms: RoomDefaults,
    pub store: StoreSettings,
    pub ai: AiSettings,
}

/// Request and login throttling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSettings {
    /// Requests allowed per window and client
    pub max_requests: u32,
    pub window_secs: u64,
    /// Failed logins before an IP is locked out
    pub login_max_attempts: u32,
    pub login_lockout_secs: u64,
}

/// Currency rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EconomySettings {
    /// Diamonds granted on registration
    pub starting_diamonds: u64,
    /// Share of a gift's diamond price credited to the recipient as coins
    pub coin_share_percent: u64,
    /// Coins needed for one diamond when exchanging
    pub coins_per_diamond: u64,
    /// Diamond price of one VIP period, indexed by level - 1
    pub vip_prices: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomDefaults {
    pub default_seat_count: usize,
    /// Room messages returned by a history request
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSettings {
    /// Change feed buffer; slower subscribers resync from snapshots
    pub feed_capacity: usize,
    pub txn_max_attempts: u32,
    pub txn_base_delay_ms: u64,
    pub txn_max_delay_ms: u64,
}

/// Generative-text endpoint used by the AI host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSettings {
    pub endpoint: String,
    pub model: String,
    /// Without a key the scripted host answers instead
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            session_ttl_secs: 60 * 60 * 24 * 7, // 7 days
            password_log_n: 15,
            rate_limit: RateLimitSettings::default(),
            economy: EconomySettings::default(),
            rooms: RoomDefaults::default(),
            store: StoreSettings::default(),
            ai: AiSettings::default(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
            login_max_attempts: 5,
            login_lockout_secs: 5 * 60,
        }
    }
}

impl Default for EconomySettings {
    fn default() -> Self {
        Self {
            starting_diamonds: 100,
            coin_share_percent: 100,
            coins_per_diamond: 10,
            vip_prices: vec![1_000, 3_000, 6_000, 10_000, 20_000],
        }
    }
}

impl Default for RoomDefaults {
    fn default() -> Self {
        Self {
            default_seat_count: DEFAULT_SEAT_COUNT,
            history_limit: 50,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            feed_capacity: 1024,
            txn_max_attempts: retry.max_attempts,
            txn_base_delay_ms: retry.base_delay_ms,
            txn_max_delay_ms: retry.max_delay_ms,
        }
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            timeout_secs: 20,
        }
    }
}

impl Settings {
    /// Load defaults, then `voiceroom.toml`, then `VOICEROOM_*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Same as [`Settings::load`] with an explicit config file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values the services cannot work with
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!("log_level must be one of {LOG_LEVELS:?}");
        }
        if self.session_ttl_secs == 0 {
            bail!("session_ttl_secs must be positive");
        }
        if !(10..=20).contains(&self.password_log_n) {
            bail!("password_log_n must be between 10 and 20");
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            bail!("rate limit window and request budget must be positive");
        }
        if self.rate_limit.login_max_attempts == 0 {
            bail!("login_max_attempts must be positive");
        }
        if self.economy.coin_share_percent > 100 {
            bail!("coin_share_percent must be at most 100");
        }
        if self.economy.coins_per_diamond == 0 {
            bail!("coins_per_diamond must be positive");
        }
        if self.economy.vip_prices.len() != usize::from(MAX_VIP_LEVEL) {
            bail!("vip_prices must list {MAX_VIP_LEVEL} prices");
        }
        if self.rooms.default_seat_count == 0 || self.rooms.default_seat_count > MAX_SEAT_COUNT {
            bail!("default_seat_count must be between 1 and {MAX_SEAT_COUNT}");
        }
        if self.rooms.history_limit == 0 {
            bail!("history_limit must be positive");
        }
        if self.store.feed_capacity == 0 || self.store.txn_max_attempts == 0 {
            bail!("feed_capacity and txn_max_attempts must be positive");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.store.txn_max_attempts,
            base_delay_ms: self.store.txn_base_delay_ms,
            max_delay_ms: self.store.txn_max_delay_ms,
            jitter: true,
        }
    }

    /// Price of one period at `level`, if the level exists
    pub fn vip_price(&self, level: u8) -> Option<u64> {
        let index = usize::from(level).checked_sub(1)?;
        self.economy.vip_prices.get(index).copied()
    }
}
