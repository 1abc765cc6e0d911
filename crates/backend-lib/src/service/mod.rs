// ============================
// voiceroom-backend-lib/src/service/mod.rs
// ============================
//! Application services.
//!
//! Every operation takes the acting user's id, runs its reads and writes as
//! [`Db::transact`] calls and applies the rules from `voiceroom_common`.
//! Each submodule adds one group of operations to [`Services`].
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;
use voiceroom_common::{
    catalog, social::MessageKind, Gift, Millis, Notification, NotificationKind, RoomMessage, StoreItem, User,
};

use crate::auth::{AuthRateLimiter, SessionManager};
use crate::config::Settings;
use crate::error::AppError;
use crate::hub::RoomHub;
use crate::store::{Db, DocKey, Storage};
use crate::time::now_ms;

pub mod accounts;
pub mod ai;
pub mod gifting;
pub mod rooms;
pub mod seats;
pub mod shop;
pub mod social;
pub mod voice;

pub use ai::{AiHost, GenerativeTextClient, ScriptedHost};

/// Shared service layer
pub struct Services<S> {
    pub db: Db<S>,
    pub settings: Arc<Settings>,
    pub hub: RoomHub,
    pub sessions: SessionManager,
    pub login_limiter: AuthRateLimiter,
    pub ai: Box<dyn AiHost>,
}

impl<S: Storage + 'static> Services<S> {
    /// Wire the services over `storage`. Must be called inside a tokio runtime.
    pub fn new(storage: S, settings: Settings) -> Result<Self, AppError> {
        let ai = ai::from_settings(&settings.ai)?;
        Ok(Self::with_ai_host(storage, settings, ai))
    }

    pub fn with_ai_host(storage: S, settings: Settings, ai: Box<dyn AiHost>) -> Self {
        let db = Db::new(storage, settings.retry_policy(), settings.store.feed_capacity);
        Self {
            db,
            hub: RoomHub::new(),
            sessions: SessionManager::new(Duration::from_secs(settings.session_ttl_secs)),
            login_limiter: AuthRateLimiter::from_settings(&settings.rate_limit),
            settings: Arc::new(settings),
            ai,
        }
    }

    /// Insert the default gifts and store items unless a catalog already exists
    pub async fn seed_catalog(&self) -> Result<(), AppError> {
        if self.db.list::<Gift>("").await?.is_empty() {
            for gift in catalog::default_gifts() {
                self.db.insert(&gift).await?;
            }
        }
        if self.db.list::<StoreItem>("").await?.is_empty() {
            for item in catalog::default_store_items() {
                self.db.insert(&item).await?;
            }
        }
        Ok(())
    }

    /// The acting user, refused if suspended
    pub(crate) async fn active_user(&self, user_id: &str) -> Result<User, AppError> {
        let user: User = self.db.require(user_id).await?;
        if user.suspended {
            return Err(AppError::Suspended);
        }
        Ok(user)
    }

    /// Global admin check for back-office operations
    pub(crate) async fn require_admin(&self, user_id: &str) -> Result<User, AppError> {
        let user = self.active_user(user_id).await?;
        if !user.is_admin {
            return Err(voiceroom_common::RuleViolation::NotPermitted("admin only".to_string()).into());
        }
        Ok(user)
    }

    /// Append a chat line to a room's history
    pub(crate) async fn post_room_message(
        &self,
        room_id: &str,
        sender: Option<&User>,
        kind: MessageKind,
        text: String,
    ) -> Result<RoomMessage, AppError> {
        let now = now_ms();
        let message = RoomMessage {
            id: record_id(room_id, now),
            room_id: room_id.to_string(),
            sender_id: sender.map(|u| u.id.clone()),
            sender_name: match (sender, kind) {
                (Some(user), _) => user.display_name.clone(),
                (None, MessageKind::Ai) => "AI Host".to_string(),
                (None, _) => "System".to_string(),
            },
            kind,
            text,
            created_at: now,
        };
        self.db.insert(&message).await?;
        if let Err(e) = self.trim_room_history(room_id).await {
            warn!(room_id, error = %e, "failed to trim room history");
        }
        Ok(message)
    }

    /// Delete the oldest messages of `room_id` beyond `history_limit`
    async fn trim_room_history(&self, room_id: &str) -> Result<usize, AppError> {
        let stored: Vec<RoomMessage> = self.db.list(&owner_prefix(room_id)).await?;
        let excess = stored.len().saturating_sub(self.settings.rooms.history_limit);
        if excess == 0 {
            return Ok(0);
        }
        let doomed: Vec<String> = stored.into_iter().take(excess).map(|m| m.id).collect();
        let keys = doomed.iter().map(|id| DocKey::of::<RoomMessage>(id)).collect();
        self.db
            .transact(keys, |txn| {
                let mut removed = 0;
                for id in &doomed {
                    if txn.exists::<RoomMessage>(id)? {
                        txn.delete::<RoomMessage>(id)?;
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
    }

    /// Notify `user_id`; failures are logged, never returned
    pub(crate) async fn notify(&self, user_id: &str, kind: NotificationKind, text: String) {
        let now = now_ms();
        let notification = Notification {
            id: record_id(user_id, now),
            user_id: user_id.to_string(),
            kind,
            text,
            read: false,
            created_at: now,
        };
        if let Err(e) = self.db.insert(&notification).await {
            warn!(user_id, error = %e, "failed to write notification");
        }
    }
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// `now`, bumped past the previous stamp so ids minted in the same
/// millisecond still sort in creation order
fn next_stamp(now: Millis) -> Millis {
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let stamp = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, stamp, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return stamp,
            Err(current) => last = current,
        }
    }
}

/// Id for an append-only record under `prefix`, ordered by creation time
pub(crate) fn record_id(prefix: &str, now: Millis) -> String {
    let stamp = next_stamp(now);
    format!("{prefix}/{stamp:013}-{}", Uuid::new_v4().simple())
}

/// Prefix matching every record created under `owner` by [`record_id`]
pub(crate) fn owner_prefix(owner: &str) -> String {
    format!("{owner}/")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_sort_by_creation() {
        let now = 1_700_000_000_000;
        let first = record_id("r1", now);
        let second = record_id("r1", now);
        assert!(first.starts_with(&owner_prefix("r1")));
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_seed_catalog_is_idempotent() {
        let services = test_support::services().await;
        services.seed_catalog().await.unwrap();
        let gifts: Vec<Gift> = services.db.list("").await.unwrap();
        assert_eq!(gifts.len(), catalog::default_gifts().len());
    }
}
