//! Store items and gifts.
use serde::{Deserialize, Serialize};

/// One day in milliseconds.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Cosmetic slot an item is equipped into.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// Avatar frame
    Frame,
    /// Room entrance effect
    Entrance,
    /// Chat bubble
    Bubble,
    /// Profile badge
    Badge,
}

/// Item sold in the store, priced in diamonds for a fixed number of days.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreItem {
    pub id: String,
    pub name: String,
    pub slot: Slot,
    pub price: u64,
    pub duration_days: u32,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl StoreItem {
    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration_days) * DAY_MS
    }
}

/// Virtual gift sent to seated users.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Gift {
    pub id: String,
    pub name: String,
    /// Price per unit in diamonds.
    pub price: u64,
    #[serde(default)]
    pub icon_url: Option<String>,
}

/// Gifts seeded into an empty store.
pub fn default_gifts() -> Vec<Gift> {
    [("rose", "Rose", 1), ("heart", "Heart", 10), ("crown", "Crown", 520), ("rocket", "Rocket", 1314)]
        .into_iter()
        .map(|(id, name, price)| Gift {
            id: id.to_string(),
            name: name.to_string(),
            price,
            icon_url: None,
        })
        .collect()
}

/// Store items seeded into an empty store.
pub fn default_store_items() -> Vec<StoreItem> {
    [
        ("frame-gold", "Gold Frame", Slot::Frame, 300, 7),
        ("entrance-dragon", "Dragon Entrance", Slot::Entrance, 800, 7),
        ("bubble-neon", "Neon Bubble", Slot::Bubble, 150, 30),
        ("badge-star", "Star Badge", Slot::Badge, 100, 30),
    ]
    .into_iter()
    .map(|(id, name, slot, price, duration_days)| StoreItem {
        id: id.to_string(),
        name: name.to_string(),
        slot,
        price,
        duration_days,
        image_url: None,
    })
    .collect()
}
