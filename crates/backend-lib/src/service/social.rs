//! Chat, private messages, notifications, friends, banners, welcome
//! greetings and account moderation.
use metrics::counter;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use voiceroom_common::{
    social::{conversation_id, MessageKind},
    Badges, Banner, FriendRequest, Notification, NotificationKind, PrivateMessage, RequestStatus, Room,
    RoomMessage, RuleViolation, User, WelcomeRequest,
};

use super::{owner_prefix, record_id, Services};
use crate::error::AppError;
use crate::metrics::AI_REPLY;
use crate::store::{DocKey, Record, Storage, UnreadEntry};
use crate::time::now_ms;
use crate::validation;

/// One request per ordered pair, filed under the recipient
fn friend_request_id(from: &str, to: &str) -> String {
    format!("{}{from}", owner_prefix(to))
}

enum FriendOutcome {
    Sent,
    AlreadyPending,
    Accepted,
}

impl<S: Storage + 'static> Services<S> {
    /// Post a chat line; the sender must be in the room
    pub async fn send_room_message(&self, actor: &str, room_id: &str, text: &str) -> Result<RoomMessage, AppError> {
        validation::validate_message_text(text)?;
        let _: Room = self.db.require(room_id).await?;
        if !self.hub.is_present(room_id, actor) {
            return Err(RuleViolation::NotInRoom.into());
        }
        let sender = self.active_user(actor).await?;
        self.post_room_message(room_id, Some(&sender), MessageKind::Text, text.trim().to_string())
            .await
    }

    /// The latest `history_limit` messages, oldest first
    pub async fn room_history(&self, room_id: &str) -> Result<Vec<RoomMessage>, AppError> {
        let _: Room = self.db.require(room_id).await?;
        let mut messages: Vec<RoomMessage> = self.db.list(&owner_prefix(room_id)).await?;
        let limit = self.settings.rooms.history_limit;
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    /// Post `prompt` to the room and the AI host's answer after it
    #[instrument(skip(self, prompt))]
    pub async fn ask_ai_host(&self, actor: &str, room_id: &str, prompt: &str) -> Result<RoomMessage, AppError> {
        validation::validate_prompt(prompt)?;
        let room: Room = self.db.require(room_id).await?;
        if !room.ai_host_enabled {
            return Err(RuleViolation::NotPermitted("the AI host is off in this room".to_string()).into());
        }
        if !self.hub.is_present(room_id, actor) {
            return Err(RuleViolation::NotInRoom.into());
        }
        let asker = self.active_user(actor).await?;
        self.post_room_message(room_id, Some(&asker), MessageKind::Text, prompt.trim().to_string())
            .await?;

        let reply = self.ai.reply(&room.title, prompt).await?;
        counter!(AI_REPLY).increment(1);
        self.post_room_message(room_id, None, MessageKind::Ai, reply).await
    }

    pub async fn send_private_message(&self, actor: &str, to: &str, text: &str) -> Result<PrivateMessage, AppError> {
        validation::validate_message_text(text)?;
        if actor == to {
            return Err(RuleViolation::SelfTarget.into());
        }
        self.active_user(actor).await?;
        let _: User = self.db.require(to).await?;

        let now = now_ms();
        let conversation = conversation_id(actor, to);
        let message = PrivateMessage {
            id: record_id(&conversation, now),
            conversation_id: conversation,
            from: actor.to_string(),
            to: to.to_string(),
            text: text.trim().to_string(),
            read: false,
            created_at: now,
        };
        let unread = UnreadEntry::for_message(&message);
        let keys = vec![message.key(), unread.key()];
        self.db
            .transact(keys, |txn| {
                if txn.exists::<PrivateMessage>(&message.id)? {
                    return Err(AppError::Conflict(message.id.clone()));
                }
                txn.put(&message)?;
                txn.put(&unread)
            })
            .await?;
        Ok(message)
    }

    /// Messages between `actor` and `with`, oldest first
    pub async fn conversation(&self, actor: &str, with: &str) -> Result<Vec<PrivateMessage>, AppError> {
        self.db.list(&owner_prefix(&conversation_id(actor, with))).await
    }

    /// Mark every message from `with` to `actor` as read; returns how many changed
    pub async fn mark_conversation_read(&self, actor: &str, with: &str) -> Result<usize, AppError> {
        let ids: Vec<String> = self
            .conversation(actor, with)
            .await?
            .into_iter()
            .filter(|m| m.to == actor && !m.read)
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let mut keys = Vec::with_capacity(ids.len() * 2);
        for id in &ids {
            keys.push(DocKey::of::<PrivateMessage>(id));
            keys.push(DocKey::of::<UnreadEntry>(&format!("{}{id}", owner_prefix(actor))));
        }
        self.db
            .transact(keys, |txn| {
                let mut changed = 0;
                for id in &ids {
                    let Some(mut message) = txn.get::<PrivateMessage>(id)? else {
                        continue;
                    };
                    if !message.read {
                        message.read = true;
                        txn.put(&message)?;
                        txn.delete::<UnreadEntry>(&UnreadEntry::for_message(&message).id)?;
                        changed += 1;
                    }
                }
                Ok(changed)
            })
            .await
    }

    pub async fn list_notifications(&self, actor: &str) -> Result<Vec<Notification>, AppError> {
        let mut notifications: Vec<Notification> = self.db.list(&owner_prefix(actor)).await?;
        notifications.reverse();
        Ok(notifications)
    }

    pub async fn mark_notifications_read(&self, actor: &str) -> Result<usize, AppError> {
        let unread: Vec<Notification> = self
            .db
            .list::<Notification>(&owner_prefix(actor))
            .await?
            .into_iter()
            .filter(|n| !n.read)
            .collect();
        self.mark_read(unread, |n: &mut Notification| &mut n.read).await
    }

    /// Flip the read flag of `records` in one transaction
    async fn mark_read<R, F>(&self, records: Vec<R>, flag: F) -> Result<usize, AppError>
    where
        R: Record,
        F: Fn(&mut R) -> &mut bool,
    {
        if records.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        let keys = ids.iter().map(|id| DocKey::of::<R>(id)).collect();
        self.db
            .transact(keys, |txn| {
                let mut changed = 0;
                for id in &ids {
                    if let Some(mut record) = txn.get::<R>(id)? {
                        let read = flag(&mut record);
                        if !*read {
                            *read = true;
                            changed += 1;
                            txn.put(&record)?;
                        }
                    }
                }
                Ok(changed)
            })
            .await
    }

    /// Ask `to` for friendship. A pending request from `actor` is returned as
    /// is; a pending request from `to` is accepted instead.
    #[instrument(skip(self))]
    pub async fn send_friend_request(&self, actor: &str, to: &str) -> Result<FriendRequest, AppError> {
        if actor == to {
            return Err(RuleViolation::SelfTarget.into());
        }
        self.active_user(actor).await?;
        let _: User = self.db.require(to).await?;

        let forward_id = friend_request_id(actor, to);
        let reverse_id = friend_request_id(to, actor);
        let keys = vec![
            DocKey::of::<FriendRequest>(&forward_id),
            DocKey::of::<FriendRequest>(&reverse_id),
            DocKey::of::<User>(actor),
            DocKey::of::<User>(to),
        ];
        let now = now_ms();
        let (request, outcome, me, them) = self
            .db
            .transact(keys, |txn| {
                let mut me: User = txn.require(actor)?;
                let mut them: User = txn.require(to)?;
                if me.friends.contains(to) {
                    return Err(RuleViolation::AlreadyFriends.into());
                }
                if let Some(mut crossed) = txn.get::<FriendRequest>(&reverse_id)? {
                    if crossed.status == RequestStatus::Pending {
                        crossed.respond(actor, true, now)?;
                        me.friends.insert(them.id.clone());
                        them.friends.insert(me.id.clone());
                        txn.put(&me)?;
                        txn.put(&them)?;
                        txn.put(&crossed)?;
                        return Ok((crossed, FriendOutcome::Accepted, me, them));
                    }
                }
                if let Some(existing) = txn.get::<FriendRequest>(&forward_id)? {
                    if existing.status == RequestStatus::Pending {
                        return Ok((existing, FriendOutcome::AlreadyPending, me, them));
                    }
                }
                // replaces an earlier answered request between the same pair
                let request = FriendRequest {
                    id: forward_id.clone(),
                    from: actor.to_string(),
                    to: to.to_string(),
                    status: RequestStatus::Pending,
                    created_at: now,
                    responded_at: None,
                };
                txn.put(&request)?;
                Ok((request, FriendOutcome::Sent, me, them))
            })
            .await?;

        match outcome {
            FriendOutcome::Sent => {
                self.notify(
                    to,
                    NotificationKind::FriendRequest,
                    format!("{} wants to be your friend", me.display_name),
                )
                .await;
            },
            FriendOutcome::Accepted => {
                self.notify(
                    to,
                    NotificationKind::FriendAccepted,
                    format!("{} accepted your friend request", me.display_name),
                )
                .await;
                debug!(from = %them.id, to = %me.id, "crossed friend requests linked");
            },
            FriendOutcome::AlreadyPending => {},
        }
        Ok(request)
    }

    /// Accept or decline; accepting links both users in the same commit
    #[instrument(skip(self))]
    pub async fn respond_friend_request(
        &self,
        actor: &str,
        request_id: &str,
        accept: bool,
    ) -> Result<FriendRequest, AppError> {
        let pending: FriendRequest = self.db.require(request_id).await?;
        let keys = vec![
            DocKey::of::<FriendRequest>(request_id),
            DocKey::of::<User>(&pending.from),
            DocKey::of::<User>(&pending.to),
        ];
        let now = now_ms();
        let (request, responder) = self
            .db
            .transact(keys, |txn| {
                let mut request: FriendRequest = txn.require(request_id)?;
                request.respond(actor, accept, now)?;
                let mut from: User = txn.require(&request.from)?;
                let mut to: User = txn.require(&request.to)?;
                if accept {
                    from.friends.insert(to.id.clone());
                    to.friends.insert(from.id.clone());
                    txn.put(&from)?;
                    txn.put(&to)?;
                }
                txn.put(&request)?;
                Ok((request, to))
            })
            .await?;
        if accept {
            self.notify(
                &request.from,
                NotificationKind::FriendAccepted,
                format!("{} accepted your friend request", responder.display_name),
            )
            .await;
        }
        Ok(request)
    }

    /// Pending requests addressed to `actor`
    pub async fn list_friend_requests(&self, actor: &str) -> Result<Vec<FriendRequest>, AppError> {
        Ok(self
            .db
            .list::<FriendRequest>(&owner_prefix(actor))
            .await?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect())
    }

    pub async fn badges(&self, actor: &str) -> Result<Badges, AppError> {
        let unread_private = self.db.list::<UnreadEntry>(&owner_prefix(actor)).await?.len();
        let unread_notifications = self
            .db
            .list::<Notification>(&owner_prefix(actor))
            .await?
            .iter()
            .filter(|n| !n.read)
            .count();
        Ok(Badges {
            unread_private,
            unread_notifications,
            pending_friend_requests: self.list_friend_requests(actor).await?.len(),
        })
    }

    /// Active banners by position
    pub async fn list_banners(&self) -> Result<Vec<Banner>, AppError> {
        let mut banners: Vec<Banner> = self.db.list("").await?;
        banners.retain(|b| b.active);
        banners.sort_by_key(|b| b.position);
        Ok(banners)
    }

    pub async fn create_banner(
        &self,
        actor: &str,
        image_url: &str,
        link: Option<String>,
        position: u32,
    ) -> Result<Banner, AppError> {
        self.require_admin(actor).await?;
        validation::validate_url(image_url)?;
        if let Some(link) = &link {
            validation::validate_url(link)?;
        }
        let banner = Banner {
            id: Uuid::new_v4().to_string(),
            image_url: image_url.to_string(),
            link,
            position,
            active: true,
            created_at: now_ms(),
        };
        self.db.insert(&banner).await?;
        Ok(banner)
    }

    pub async fn delete_banner(&self, actor: &str, banner_id: &str) -> Result<(), AppError> {
        self.require_admin(actor).await?;
        self.db
            .transact(vec![DocKey::of::<Banner>(banner_id)], |txn| {
                if !txn.exists::<Banner>(banner_id)? {
                    return Err(Banner::missing(banner_id));
                }
                txn.delete::<Banner>(banner_id)
            })
            .await
    }

    /// Submit an entrance greeting for admin review
    pub async fn request_welcome(&self, actor: &str, message: &str) -> Result<WelcomeRequest, AppError> {
        validation::validate_message_text(message)?;
        self.active_user(actor).await?;
        let now = now_ms();
        let request = WelcomeRequest {
            id: format!("{now:013}-{}", Uuid::new_v4().simple()),
            user_id: actor.to_string(),
            message: message.trim().to_string(),
            status: RequestStatus::Pending,
            created_at: now,
        };
        self.db.insert(&request).await?;
        Ok(request)
    }

    pub async fn list_welcome_requests(&self, actor: &str) -> Result<Vec<WelcomeRequest>, AppError> {
        self.require_admin(actor).await?;
        Ok(self
            .db
            .list::<WelcomeRequest>("")
            .await?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect())
    }

    /// Approving copies the greeting onto the requester's account
    pub async fn review_welcome(&self, actor: &str, request_id: &str, approve: bool) -> Result<WelcomeRequest, AppError> {
        self.require_admin(actor).await?;
        let pending: WelcomeRequest = self.db.require(request_id).await?;
        let keys = vec![
            DocKey::of::<WelcomeRequest>(request_id),
            DocKey::of::<User>(&pending.user_id),
        ];
        self.db
            .transact(keys, |txn| {
                let mut request: WelcomeRequest = txn.require(request_id)?;
                request.review(approve)?;
                if approve {
                    let mut user: User = txn.require(&request.user_id)?;
                    user.welcome_message = Some(request.message.clone());
                    txn.put(&user)?;
                }
                txn.put(&request)?;
                Ok(request)
            })
            .await
    }

    /// Suspend or reinstate an account; suspension ends its sessions
    #[instrument(skip(self))]
    pub async fn set_user_suspended(&self, actor: &str, target: &str, suspended: bool) -> Result<User, AppError> {
        self.require_admin(actor).await?;
        if actor == target {
            return Err(RuleViolation::SelfTarget.into());
        }
        let user = self
            .db
            .transact(vec![DocKey::of::<User>(target)], |txn| {
                let mut user: User = txn.require(target)?;
                user.suspended = suspended;
                txn.put(&user)?;
                Ok(user)
            })
            .await?;
        if suspended {
            let revoked = self.sessions.revoke_user(target).await;
            info!(target, revoked, "account suspended");
        }
        Ok(user)
    }
}
