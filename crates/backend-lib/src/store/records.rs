//! Typed records and the collections they live in.
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use voiceroom_common::{
    Banner, FriendRequest, Gift, Notification, PrivateMessage, Room, RoomMessage, StoreItem, User, UserId,
    WelcomeRequest,
};

use super::DocKey;
use crate::error::AppError;

pub mod collections {
    pub const USERS: &str = "users";
    pub const CREDENTIALS: &str = "credentials";
    pub const DISPLAY_IDS: &str = "display_ids";
    pub const ROOMS: &str = "rooms";
    pub const ROOM_MESSAGES: &str = "room_messages";
    pub const PRIVATE_MESSAGES: &str = "private_messages";
    pub const UNREAD_MESSAGES: &str = "unread_messages";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const FRIEND_REQUESTS: &str = "friend_requests";
    pub const BANNERS: &str = "banners";
    pub const WELCOME_REQUESTS: &str = "welcome_requests";
    pub const STORE_ITEMS: &str = "store_items";
    pub const GIFTS: &str = "gifts";
}

/// A document type stored under a fixed collection
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn key(&self) -> DocKey {
        DocKey::new(Self::COLLECTION, self.id())
    }

    /// Error for a required record that does not exist
    fn missing(id: &str) -> AppError {
        AppError::NotFound(format!("{}/{id}", Self::COLLECTION))
    }
}

/// Login secret, keyed by username so registration claims the name atomically
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub user_id: UserId,
    pub password_hash: String,
}

/// Reverse index from the public numeric id to the account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayIdEntry {
    pub display_id: String,
    pub user_id: UserId,
}

/// Marker for a private message its recipient has not read, filed under the recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadEntry {
    pub id: String,
    pub message_id: String,
}

impl UnreadEntry {
    pub fn for_message(message: &PrivateMessage) -> Self {
        Self {
            id: format!("{}/{}", message.to, message.id),
            message_id: message.id.clone(),
        }
    }
}

macro_rules! record {
    ($ty:ty, $collection:expr, $field:ident) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.$field
            }
        }
    };
    ($ty:ty, $collection:expr, $field:ident, $missing:expr) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.$field
            }

            fn missing(_id: &str) -> AppError {
                $missing
            }
        }
    };
}

record!(User, collections::USERS, id, AppError::UserNotFound);
record!(Room, collections::ROOMS, id, AppError::RoomNotFound);
record!(Credentials, collections::CREDENTIALS, username, AppError::InvalidPassword);
record!(DisplayIdEntry, collections::DISPLAY_IDS, display_id, AppError::UserNotFound);
record!(RoomMessage, collections::ROOM_MESSAGES, id);
record!(PrivateMessage, collections::PRIVATE_MESSAGES, id);
record!(UnreadEntry, collections::UNREAD_MESSAGES, id);
record!(Notification, collections::NOTIFICATIONS, id);
record!(FriendRequest, collections::FRIEND_REQUESTS, id);
record!(Banner, collections::BANNERS, id);
record!(WelcomeRequest, collections::WELCOME_REQUESTS, id);
record!(StoreItem, collections::STORE_ITEMS, id);
record!(Gift, collections::GIFTS, id);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_use_record_collection() {
        let entry = DisplayIdEntry {
            display_id: "1234567".to_string(),
            user_id: "u1".to_string(),
        };
        assert_eq!(entry.key().to_string(), "display_ids/1234567");
        assert!(matches!(User::missing("u1"), AppError::UserNotFound));
        assert!(matches!(Gift::missing("rose"), AppError::NotFound(path) if path == "gifts/rose"));
    }

    #[test]
    fn test_unread_entry_is_filed_under_recipient() {
        let message = PrivateMessage {
            id: "a:b/0000000000001-x".to_string(),
            conversation_id: "a:b".to_string(),
            from: "a".to_string(),
            to: "b".to_string(),
            text: "hi".to_string(),
            read: false,
            created_at: 1,
        };
        let entry = UnreadEntry::for_message(&message);
        assert_eq!(entry.key().to_string(), "unread_messages/b/a:b/0000000000001-x");
        assert_eq!(entry.message_id, message.id);
    }
}
