// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const AUTH_LOGIN: &str = "auth.login";
pub const AUTH_FAILED: &str = "auth.failed";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_JOINED: &str = "room.joined";
pub const ROOM_ACTIVE: &str = "room.active";
pub const ROOM_VIEWERS: &str = "room.viewers";
pub const SEAT_CHANGE: &str = "seat.change";
pub const GIFT_SENT: &str = "gift.sent";
pub const GIFT_DIAMONDS: &str = "gift.diamonds";
pub const STORE_PURCHASE: &str = "store.purchase";
pub const TXN_COMMIT: &str = "txn.commit";
pub const TXN_CONFLICT: &str = "txn.conflict";
pub const TXN_ABORTED: &str = "txn.aborted";
pub const FEED_LAGGED: &str = "feed.lagged";
pub const AI_REPLY: &str = "ai.reply";
