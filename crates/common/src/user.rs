//! User document: wallet, VIP, inventory, social graph and preferences.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{Slot, StoreItem, DAY_MS};
use crate::error::RuleViolation;
use crate::{Millis, RoomId, UserId};

/// Recently visited rooms kept per user
pub const MAX_RECENT_ROOMS: usize = 20;
/// Highest wealth or charm level
pub const MAX_LEVEL: u32 = 99;
/// Highest purchasable VIP tier
pub const MAX_VIP_LEVEL: u8 = 5;
/// Length of one VIP purchase
pub const VIP_PERIOD_MS: Millis = 30 * DAY_MS;

/// Home screen layout preference.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Short numeric id users search each other by
    pub display_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: String,

    pub diamonds: u64,
    pub coins: u64,
    pub vip_level: u8,
    pub vip_expires_at: Millis,
    pub diamonds_spent: u64,
    pub coins_earned: u64,
    pub gifts_received: u64,

    /// item id -> expiry
    #[serde(default)]
    pub inventory: BTreeMap<String, Millis>,
    #[serde(default)]
    pub equipped: BTreeMap<Slot, String>,

    #[serde(default)]
    pub following: BTreeSet<UserId>,
    #[serde(default)]
    pub followers: BTreeSet<UserId>,
    #[serde(default)]
    pub friends: BTreeSet<UserId>,

    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub suspended: bool,

    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub recent_rooms: Vec<RoomId>,
    #[serde(default)]
    pub welcome_message: Option<String>,
    pub created_at: Millis,
}

/// Level for a spend or earn counter: `isqrt(points / 100)`, capped.
pub fn level_for(points: u64) -> u32 {
    let n = points / 100;
    let mut root = (n as f64).sqrt() as u64;
    // correct float rounding at the boundaries
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    u32::try_from(root).unwrap_or(MAX_LEVEL).min(MAX_LEVEL)
}

impl User {
    pub fn new(
        id: UserId,
        username: String,
        display_id: String,
        display_name: String,
        starting_diamonds: u64,
        now: Millis,
    ) -> Self {
        Self {
            id,
            username,
            display_id,
            display_name,
            avatar_url: None,
            bio: String::new(),
            diamonds: starting_diamonds,
            coins: 0,
            vip_level: 0,
            vip_expires_at: 0,
            diamonds_spent: 0,
            coins_earned: 0,
            gifts_received: 0,
            inventory: BTreeMap::new(),
            equipped: BTreeMap::new(),
            following: BTreeSet::new(),
            followers: BTreeSet::new(),
            friends: BTreeSet::new(),
            is_admin: false,
            suspended: false,
            view_mode: ViewMode::Grid,
            recent_rooms: Vec::new(),
            welcome_message: None,
            created_at: now,
        }
    }

    pub fn wealth_level(&self) -> u32 {
        level_for(self.diamonds_spent)
    }

    pub fn charm_level(&self) -> u32 {
        level_for(self.coins_earned)
    }

    /// Debit diamonds and count them as spent. Leaves the user untouched on failure.
    pub fn spend_diamonds(&mut self, amount: u64) -> Result<(), RuleViolation> {
        if self.diamonds < amount {
            return Err(RuleViolation::InsufficientFunds {
                needed: amount,
                available: self.diamonds,
            });
        }
        self.diamonds -= amount;
        self.diamonds_spent = self.diamonds_spent.saturating_add(amount);
        Ok(())
    }

    pub fn credit_diamonds(&mut self, amount: u64) {
        self.diamonds = self.diamonds.saturating_add(amount);
    }

    /// Credit the coin share of received gifts.
    pub fn receive_gift(&mut self, coins: u64, quantity: u64) {
        self.coins = self.coins.saturating_add(coins);
        self.coins_earned = self.coins_earned.saturating_add(coins);
        self.gifts_received = self.gifts_received.saturating_add(quantity);
    }

    /// Convert coins into diamonds at `coins_per_diamond`. Returns diamonds gained.
    pub fn exchange_coins(&mut self, coins: u64, coins_per_diamond: u64) -> Result<u64, RuleViolation> {
        if coins == 0 || coins_per_diamond == 0 || coins % coins_per_diamond != 0 {
            return Err(RuleViolation::InvalidQuantity);
        }
        if self.coins < coins {
            return Err(RuleViolation::InsufficientFunds {
                needed: coins,
                available: self.coins,
            });
        }
        let gained = coins / coins_per_diamond;
        self.coins -= coins;
        self.credit_diamonds(gained);
        Ok(gained)
    }

    /// VIP tier in effect at `now`; 0 once expired.
    pub fn effective_vip(&self, now: Millis) -> u8 {
        if self.vip_level > 0 && self.vip_expires_at > now {
            self.vip_level
        } else {
            0
        }
    }

    /// Buy `level` for one period at `price`.
    ///
    /// Same level extends the running period, a higher level replaces it with a
    /// fresh period, a lower level while a higher one is active is refused.
    pub fn purchase_vip(&mut self, level: u8, price: u64, now: Millis) -> Result<(), RuleViolation> {
        if level == 0 || level > MAX_VIP_LEVEL {
            return Err(RuleViolation::InvalidVipLevel(level));
        }
        let current = self.effective_vip(now);
        if current > level {
            return Err(RuleViolation::VipDowngrade);
        }
        self.spend_diamonds(price)?;
        if current == level {
            self.vip_expires_at += VIP_PERIOD_MS;
        } else {
            self.vip_level = level;
            self.vip_expires_at = now + VIP_PERIOD_MS;
        }
        Ok(())
    }

    /// Buy a store item, extending any unexpired ownership.
    pub fn purchase_item(&mut self, item: &StoreItem, now: Millis) -> Result<Millis, RuleViolation> {
        self.spend_diamonds(item.price)?;
        let base = self.inventory.get(&item.id).copied().unwrap_or(0).max(now);
        let expiry = base + item.duration_ms();
        self.inventory.insert(item.id.clone(), expiry);
        Ok(expiry)
    }

    pub fn owns_item(&self, item_id: &str, now: Millis) -> bool {
        self.inventory.get(item_id).is_some_and(|expiry| *expiry > now)
    }

    pub fn equip(&mut self, item: &StoreItem, now: Millis) -> Result<(), RuleViolation> {
        match self.inventory.get(&item.id) {
            None => Err(RuleViolation::ItemNotOwned(item.id.clone())),
            Some(expiry) if *expiry <= now => Err(RuleViolation::ItemExpired(item.id.clone())),
            Some(_) => {
                self.equipped.insert(item.slot, item.id.clone());
                Ok(())
            },
        }
    }

    pub fn unequip(&mut self, slot: Slot) -> Option<String> {
        self.equipped.remove(&slot)
    }

    /// Equipped items whose ownership has not lapsed.
    pub fn effective_equipped(&self, now: Millis) -> BTreeMap<Slot, String> {
        self.equipped
            .iter()
            .filter(|(_, item)| self.owns_item(item, now))
            .map(|(slot, item)| (*slot, item.clone()))
            .collect()
    }

    /// Move `room_id` to the front of the recent list.
    pub fn record_visit(&mut self, room_id: &str) {
        self.recent_rooms.retain(|r| r != room_id);
        self.recent_rooms.insert(0, room_id.to_string());
        self.recent_rooms.truncate(MAX_RECENT_ROOMS);
    }
}
