//! Chat, private messages, notifications, friend requests, banners and
//! welcome requests.
use serde::{Deserialize, Serialize};

use crate::error::RuleViolation;
use crate::{Millis, RoomId, UserId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Gift,
    System,
    Ai,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoomMessage {
    pub id: String,
    pub room_id: RoomId,
    /// `None` for system and AI host messages
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub kind: MessageKind,
    pub text: String,
    pub created_at: Millis,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PrivateMessage {
    pub id: String,
    pub conversation_id: String,
    pub from: UserId,
    pub to: UserId,
    pub text: String,
    pub read: bool,
    pub created_at: Millis,
}

/// Order-independent id of the conversation between two users.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Gift,
    Follow,
    FriendRequest,
    FriendAccepted,
    System,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub text: String,
    pub read: bool,
    pub created_at: Millis,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FriendRequest {
    pub id: String,
    pub from: UserId,
    pub to: UserId,
    pub status: RequestStatus,
    pub created_at: Millis,
    #[serde(default)]
    pub responded_at: Option<Millis>,
}

impl FriendRequest {
    /// Settle a pending request. Only the addressee may answer.
    pub fn respond(&mut self, actor: &str, accept: bool, now: Millis) -> Result<(), RuleViolation> {
        if actor != self.to {
            return Err(RuleViolation::NotPermitted("only the recipient may respond".to_string()));
        }
        if self.status != RequestStatus::Pending {
            return Err(RuleViolation::RequestAlreadyHandled);
        }
        self.status = if accept {
            RequestStatus::Accepted
        } else {
            RequestStatus::Declined
        };
        self.responded_at = Some(now);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Banner {
    pub id: String,
    pub image_url: String,
    #[serde(default)]
    pub link: Option<String>,
    pub position: u32,
    pub active: bool,
    pub created_at: Millis,
}

/// Request for a custom entrance greeting, reviewed by an admin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WelcomeRequest {
    pub id: String,
    pub user_id: UserId,
    pub message: String,
    pub status: RequestStatus,
    pub created_at: Millis,
}

impl WelcomeRequest {
    pub fn review(&mut self, approve: bool) -> Result<(), RuleViolation> {
        if self.status != RequestStatus::Pending {
            return Err(RuleViolation::RequestAlreadyHandled);
        }
        self.status = if approve {
            RequestStatus::Accepted
        } else {
            RequestStatus::Declined
        };
        Ok(())
    }
}

/// Unread counters shown on the navigation bar.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Badges {
    pub unread_private: usize,
    pub unread_notifications: usize,
    pub pending_friend_requests: usize,
}
