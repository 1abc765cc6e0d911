// ================
// common/src/lib.rs
// ================
//! Common types shared by the `VoiceRoom` client and server.
//!
//! The document model and its rules live in the submodules; this file defines
//! the WebSocket protocol that carries them.

pub mod catalog;
pub mod error;
pub mod room;
pub mod social;
pub mod user;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use catalog::{Gift, Slot, StoreItem};
pub use error::RuleViolation;
pub use room::{GameMode, Occupant, Role, Room, RoomSettings, Seat};
pub use social::{
    Badges, Banner, FriendRequest, Notification, NotificationKind, PrivateMessage, RequestStatus, RoomMessage,
    WelcomeRequest,
};
pub use user::{User, ViewMode};

/// Wall-clock milliseconds since the Unix epoch
pub type Millis = i64;
pub type UserId = String;
pub type RoomId = String;

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "msgType")]
pub enum ClientToServer {
    /// Create an account and bind this connection to it
    Register {
        username: String,
        password: String,
        display_name: String,
    },
    /// Log in with username and password
    Login { username: String, password: String },
    /// Re-bind a connection to an existing session
    Resume { session_token: String },
    Logout,

    /// Fetch a profile; `None` means the caller's own account
    GetProfile {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    LookupDisplayId { display_id: String },
    UpdateProfile {
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        avatar_url: Option<String>,
        #[serde(default)]
        bio: Option<String>,
    },
    Follow { user_id: UserId },
    Unfollow { user_id: UserId },
    SetViewMode { mode: ViewMode },
    GetBadges,

    CreateRoom {
        title: String,
        #[serde(default)]
        seat_count: Option<usize>,
    },
    ListRooms,
    /// Enter a room and start receiving its snapshots
    JoinRoom { room_id: RoomId },
    LeaveRoom { room_id: RoomId },
    UpdateRoom { room_id: RoomId, settings: RoomSettings },
    SetRoomAdmin { room_id: RoomId, user_id: UserId, admin: bool },
    /// Ban a user; no duration means permanent
    BanUser {
        room_id: RoomId,
        user_id: UserId,
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    UnbanUser { room_id: RoomId, user_id: UserId },

    /// Sit on a seat, moving off any seat already held
    TakeSeat { room_id: RoomId, seat: usize },
    LeaveSeat { room_id: RoomId },
    KickFromSeat { room_id: RoomId, user_id: UserId },
    SetSeatMuted { room_id: RoomId, seat: usize, muted: bool },
    SetSeatLocked { room_id: RoomId, seat: usize, locked: bool },

    ListGifts,
    /// Send `quantity` of a gift to each seated recipient
    SendGift {
        room_id: RoomId,
        gift_id: String,
        quantity: u64,
        recipients: Vec<UserId>,
    },

    ListStoreItems,
    PurchaseItem { item_id: String },
    EquipItem { item_id: String },
    UnequipSlot { slot: Slot },
    PurchaseVip { level: u8 },
    ExchangeCoins { coins: u64 },

    SendRoomMessage { room_id: RoomId, text: String },
    RoomHistory { room_id: RoomId },
    AskAiHost { room_id: RoomId, prompt: String },

    SendPrivateMessage { to: UserId, text: String },
    GetConversation { with: UserId },
    MarkConversationRead { with: UserId },

    ListNotifications,
    MarkNotificationsRead,

    SendFriendRequest { to: UserId },
    RespondFriendRequest { request_id: String, accept: bool },
    ListFriendRequests,

    ListBanners,
    CreateBanner {
        image_url: String,
        #[serde(default)]
        link: Option<String>,
        position: u32,
    },
    DeleteBanner { banner_id: String },

    RequestWelcome { message: String },
    ListWelcomeRequests,
    ReviewWelcome { request_id: String, approve: bool },

    GrantDiamonds { user_id: UserId, amount: u64 },
    SetUserSuspended { user_id: UserId, suspended: bool },
    UpsertStoreItem { item: StoreItem },
    UpsertGift { gift: Gift },

    GetVoiceGrant { room_id: RoomId },
}

impl ClientToServer {
    /// Operations allowed before the connection is authenticated
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientToServer::Register { .. } | ClientToServer::Login { .. } | ClientToServer::Resume { .. }
        )
    }
}

/// What other users may see of a profile
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PublicProfile {
    pub id: UserId,
    pub display_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: String,
    pub vip_level: u8,
    pub wealth_level: u32,
    pub charm_level: u32,
    pub followers: usize,
    pub following: usize,
    pub friends: usize,
    pub equipped: BTreeMap<Slot, String>,
}

impl PublicProfile {
    pub fn of(user: &User, now: Millis) -> Self {
        Self {
            id: user.id.clone(),
            display_id: user.display_id.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            bio: user.bio.clone(),
            vip_level: user.effective_vip(now),
            wealth_level: user.wealth_level(),
            charm_level: user.charm_level(),
            followers: user.followers.len(),
            following: user.following.len(),
            friends: user.friends.len(),
            equipped: user.effective_equipped(now),
        }
    }
}

/// Room list entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub title: String,
    pub host_id: UserId,
    pub occupied_seats: usize,
    pub seat_count: usize,
    pub viewers: usize,
    pub wealth: f64,
}

/// Outcome of a committed gift
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GiftReceipt {
    pub gift_id: String,
    pub quantity: u64,
    pub recipients: Vec<UserId>,
    pub total_cost: u64,
    pub sender_diamonds: u64,
}

/// Where to connect for audio and whether to publish the microphone
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceGrant {
    pub channel: RoomId,
    pub uid: String,
    pub can_publish: bool,
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "msgType")]
pub enum ServerToClient {
    /// Connection is bound to `user`
    Authenticated { session_token: String, user: User },
    /// Caller's own account, also pushed whenever it changes
    Account { user: User },
    Profile { profile: PublicProfile },
    /// Room snapshot, also pushed whenever the room changes
    Room { room: Room, viewers: usize },
    Rooms { rooms: Vec<RoomSummary> },
    RoomMessages { room_id: RoomId, messages: Vec<RoomMessage> },
    /// Single chat line, pushed to everyone in the room
    RoomMessage { message: RoomMessage },
    Gifts { gifts: Vec<Gift> },
    GiftSent { receipt: GiftReceipt },
    StoreItems { items: Vec<StoreItem> },
    Conversation { with: UserId, messages: Vec<PrivateMessage> },
    PrivateMessage { message: PrivateMessage },
    Notifications { notifications: Vec<Notification> },
    Notification { notification: Notification },
    FriendRequests { requests: Vec<FriendRequest> },
    Banners { banners: Vec<Banner> },
    WelcomeRequests { requests: Vec<WelcomeRequest> },
    Badges { badges: Badges },
    VoiceGrant { grant: VoiceGrant },
    /// Request succeeded with nothing else to report
    Ack { op: String },
    /// Request failed
    Error { code: String, message: String },
    /// Frame could not be parsed
    MalformedMessage { err_msg: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientToServer::TakeSeat {
            room_id: "r1".to_string(),
            seat: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["msgType"], "TakeSeat");
        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["seat"], 3);

        let parsed: ClientToServer = serde_json::from_str(r#"{"msgType":"Logout"}"#).unwrap();
        assert_eq!(parsed, ClientToServer::Logout);

        let parsed: ClientToServer =
            serde_json::from_str(r#"{"msgType":"BanUser","room_id":"r1","user_id":"u2"}"#).unwrap();
        assert!(matches!(parsed, ClientToServer::BanUser { duration_secs: None, .. }));
    }

    #[test]
    fn test_only_auth_messages_skip_the_session_check() {
        assert!(ClientToServer::Resume { session_token: "t".into() }.is_auth());
        assert!(!ClientToServer::ListRooms.is_auth());
        assert!(!ClientToServer::Logout.is_auth());
    }

    #[test]
    fn test_public_profile_hides_expired_state() {
        let mut user = User::new("u1".into(), "bob".into(), "7654321".into(), "Bob".into(), 0, 0);
        user.vip_level = 3;
        user.vip_expires_at = 10;
        user.equipped.insert(Slot::Badge, "badge-star".into());
        let profile = PublicProfile::of(&user, 20);
        assert_eq!(profile.vip_level, 0);
        assert!(profile.equipped.is_empty());
    }
}
