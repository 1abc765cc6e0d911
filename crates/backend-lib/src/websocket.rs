// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! WebSocket Handler Module
//!
//! One `WebSocketHandler` lives per connection. It binds the connection to an
//! account, turns each [`ClientToServer`] request into a service call and its
//! [`ServerToClient`] reply, and filters the store's change feed down to the
//! pushes this connection watches:
//! - its own user document (`Account`)
//! - the room it has joined (`Room`) and that room's chat (`RoomMessage`)
//! - private messages addressed to it (`PrivateMessage`)
//! - its notifications (`Notification`)
//!
//! A connection that falls behind the feed calls [`WebSocketHandler::resync`]
//! to get fresh snapshots instead of the missed changes.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;
use voiceroom_common::{
    ClientToServer, Notification, PrivateMessage, Room, RoomId, RoomMessage, ServerToClient, User, UserId,
};

use crate::error::AppError;
use crate::store::{collections, Change, Storage};
use crate::time::now_ms;
use crate::validation;
use crate::AppState;

/// WebSocket handler for processing messages
pub struct WebSocketHandler<S: Storage + 'static> {
    state: Arc<AppState<S>>,
    client_id: String,
    client_ip: IpAddr,
    user_id: Option<UserId>,
    session_token: Option<String>,
    room_id: Option<RoomId>,
}

impl<S: Storage + 'static> WebSocketHandler<S> {
    pub fn new(state: Arc<AppState<S>>, client_ip: IpAddr) -> Self {
        Self {
            state,
            client_id: Uuid::new_v4().to_string(),
            client_ip,
            user_id: None,
            session_token: None,
            room_id: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    fn require_user(&self) -> Result<UserId, AppError> {
        self.user_id
            .clone()
            .ok_or_else(|| AppError::Auth("not authenticated".to_string()))
    }

    fn bind(&mut self, token: String, user: User) -> ServerToClient {
        info!(client_id = %self.client_id, user_id = %user.id, "connection authenticated");
        self.user_id = Some(user.id.clone());
        self.session_token = Some(token.clone());
        ServerToClient::Authenticated {
            session_token: token,
            user,
        }
    }

    /// Move this connection's presence to `room_id`
    async fn enter_room(&mut self, user_id: &str, room_id: &str) -> Result<ServerToClient, AppError> {
        let state = Arc::clone(&self.state);
        let services = &state.services;
        if self.room_id.as_deref() != Some(room_id) {
            // presence is counted per connection, so re-joining must not count twice
            let (room, viewers) = services.join_room(user_id, room_id).await?;
            if let Some(previous) = self.room_id.replace(room_id.to_string()) {
                services.leave_room(user_id, &previous).await?;
            }
            return Ok(ServerToClient::Room { room, viewers });
        }
        let (room, viewers) = services.room_snapshot(room_id).await?;
        Ok(ServerToClient::Room { room, viewers })
    }

    fn room_reply(&self, room: Room) -> ServerToClient {
        let viewers = self.state.services.hub.viewers(&room.id);
        ServerToClient::Room { room, viewers }
    }

    /// Handle one request from the client
    #[allow(clippy::too_many_lines)]
    pub async fn handle_message(&mut self, message: ClientToServer) -> Result<ServerToClient, AppError> {
        let state = Arc::clone(&self.state);
        let services = &state.services;

        if message.is_auth() {
            return match message {
                ClientToServer::Register {
                    username,
                    password,
                    display_name,
                } => {
                    let (token, user) = services.register(&username, &password, &display_name).await?;
                    Ok(self.bind(token, user))
                },
                ClientToServer::Login { username, password } => {
                    let (token, user) = services.login(&username, &password, self.client_ip).await?;
                    Ok(self.bind(token, user))
                },
                ClientToServer::Resume { session_token } => {
                    let user = services.resume(&session_token).await?;
                    Ok(self.bind(session_token, user))
                },
                _ => Err(AppError::Internal("unhandled auth message".to_string())),
            };
        }

        let me = self.require_user()?;
        let reply = match message {
            ClientToServer::Logout => {
                self.disconnect().await;
                if let Some(token) = self.session_token.take() {
                    services.logout(&token).await;
                }
                self.user_id = None;
                ack("Logout")
            },

            ClientToServer::GetProfile { user_id: None } => ServerToClient::Account {
                user: services.account(&me).await?,
            },
            ClientToServer::GetProfile { user_id: Some(id) } => ServerToClient::Profile {
                profile: services.profile(&id).await?,
            },
            ClientToServer::LookupDisplayId { display_id } => ServerToClient::Profile {
                profile: services.lookup_display_id(&display_id).await?,
            },
            ClientToServer::UpdateProfile {
                display_name,
                avatar_url,
                bio,
            } => ServerToClient::Account {
                user: services.update_profile(&me, display_name, avatar_url, bio).await?,
            },
            ClientToServer::Follow { user_id } => ServerToClient::Account {
                user: services.follow(&me, &user_id).await?,
            },
            ClientToServer::Unfollow { user_id } => ServerToClient::Account {
                user: services.unfollow(&me, &user_id).await?,
            },
            ClientToServer::SetViewMode { mode } => ServerToClient::Account {
                user: services.set_view_mode(&me, mode).await?,
            },
            ClientToServer::GetBadges => ServerToClient::Badges {
                badges: services.badges(&me).await?,
            },

            ClientToServer::CreateRoom { title, seat_count } => {
                let room = services.create_room(&me, &title, seat_count).await?;
                self.enter_room(&me, &room.id).await?
            },
            ClientToServer::ListRooms => ServerToClient::Rooms {
                rooms: services.list_rooms().await?,
            },
            ClientToServer::JoinRoom { room_id } => self.enter_room(&me, &room_id).await?,
            ClientToServer::LeaveRoom { room_id } => {
                if self.room_id.as_deref() == Some(room_id.as_str()) {
                    self.room_id = None;
                    services.leave_room(&me, &room_id).await?;
                }
                ack("LeaveRoom")
            },
            ClientToServer::UpdateRoom { room_id, settings } => {
                self.room_reply(services.update_room(&me, &room_id, settings).await?)
            },
            ClientToServer::SetRoomAdmin {
                room_id,
                user_id,
                admin,
            } => self.room_reply(services.set_room_admin(&me, &room_id, &user_id, admin).await?),
            ClientToServer::BanUser {
                room_id,
                user_id,
                duration_secs,
            } => self.room_reply(services.ban_user(&me, &room_id, &user_id, duration_secs).await?),
            ClientToServer::UnbanUser { room_id, user_id } => {
                self.room_reply(services.unban_user(&me, &room_id, &user_id).await?)
            },

            ClientToServer::TakeSeat { room_id, seat } => {
                self.room_reply(services.take_seat(&me, &room_id, seat).await?)
            },
            ClientToServer::LeaveSeat { room_id } => self.room_reply(services.leave_seat(&me, &room_id).await?),
            ClientToServer::KickFromSeat { room_id, user_id } => {
                self.room_reply(services.kick_from_seat(&me, &room_id, &user_id).await?)
            },
            ClientToServer::SetSeatMuted { room_id, seat, muted } => {
                self.room_reply(services.set_seat_muted(&me, &room_id, seat, muted).await?)
            },
            ClientToServer::SetSeatLocked { room_id, seat, locked } => {
                self.room_reply(services.set_seat_locked(&me, &room_id, seat, locked).await?)
            },

            ClientToServer::ListGifts => ServerToClient::Gifts {
                gifts: services.list_gifts().await?,
            },
            ClientToServer::SendGift {
                room_id,
                gift_id,
                quantity,
                recipients,
            } => ServerToClient::GiftSent {
                receipt: services
                    .send_gift(&me, &room_id, &gift_id, quantity, &recipients)
                    .await?,
            },
            ClientToServer::ListStoreItems => ServerToClient::StoreItems {
                items: services.list_store_items().await?,
            },
            ClientToServer::PurchaseItem { item_id } => ServerToClient::Account {
                user: services.purchase_item(&me, &item_id).await?,
            },
            ClientToServer::EquipItem { item_id } => ServerToClient::Account {
                user: services.equip_item(&me, &item_id).await?,
            },
            ClientToServer::UnequipSlot { slot } => ServerToClient::Account {
                user: services.unequip_slot(&me, slot).await?,
            },
            ClientToServer::PurchaseVip { level } => ServerToClient::Account {
                user: services.purchase_vip(&me, level).await?,
            },
            ClientToServer::ExchangeCoins { coins } => ServerToClient::Account {
                user: services.exchange_coins(&me, coins).await?,
            },

            ClientToServer::SendRoomMessage { room_id, text } => ServerToClient::RoomMessage {
                message: services.send_room_message(&me, &room_id, &text).await?,
            },
            ClientToServer::RoomHistory { room_id } => ServerToClient::RoomMessages {
                messages: services.room_history(&room_id).await?,
                room_id,
            },
            ClientToServer::AskAiHost { room_id, prompt } => ServerToClient::RoomMessage {
                message: services.ask_ai_host(&me, &room_id, &prompt).await?,
            },

            ClientToServer::SendPrivateMessage { to, text } => ServerToClient::PrivateMessage {
                message: services.send_private_message(&me, &to, &text).await?,
            },
            ClientToServer::GetConversation { with } => ServerToClient::Conversation {
                messages: services.conversation(&me, &with).await?,
                with,
            },
            ClientToServer::MarkConversationRead { with } => {
                services.mark_conversation_read(&me, &with).await?;
                ack("MarkConversationRead")
            },

            ClientToServer::ListNotifications => ServerToClient::Notifications {
                notifications: services.list_notifications(&me).await?,
            },
            ClientToServer::MarkNotificationsRead => {
                services.mark_notifications_read(&me).await?;
                ack("MarkNotificationsRead")
            },

            ClientToServer::SendFriendRequest { to } => {
                services.send_friend_request(&me, &to).await?;
                ack("SendFriendRequest")
            },
            ClientToServer::RespondFriendRequest { request_id, accept } => {
                services.respond_friend_request(&me, &request_id, accept).await?;
                ack("RespondFriendRequest")
            },
            ClientToServer::ListFriendRequests => ServerToClient::FriendRequests {
                requests: services.list_friend_requests(&me).await?,
            },

            ClientToServer::ListBanners => ServerToClient::Banners {
                banners: services.list_banners().await?,
            },
            ClientToServer::CreateBanner {
                image_url,
                link,
                position,
            } => {
                services.create_banner(&me, &image_url, link, position).await?;
                ServerToClient::Banners {
                    banners: services.list_banners().await?,
                }
            },
            ClientToServer::DeleteBanner { banner_id } => {
                services.delete_banner(&me, &banner_id).await?;
                ServerToClient::Banners {
                    banners: services.list_banners().await?,
                }
            },

            ClientToServer::RequestWelcome { message } => {
                services.request_welcome(&me, &message).await?;
                ack("RequestWelcome")
            },
            ClientToServer::ListWelcomeRequests => ServerToClient::WelcomeRequests {
                requests: services.list_welcome_requests(&me).await?,
            },
            ClientToServer::ReviewWelcome { request_id, approve } => {
                services.review_welcome(&me, &request_id, approve).await?;
                ServerToClient::WelcomeRequests {
                    requests: services.list_welcome_requests(&me).await?,
                }
            },

            ClientToServer::GrantDiamonds { user_id, amount } => {
                services.grant_diamonds(&me, &user_id, amount).await?;
                ack("GrantDiamonds")
            },
            ClientToServer::SetUserSuspended { user_id, suspended } => {
                services.set_user_suspended(&me, &user_id, suspended).await?;
                ack("SetUserSuspended")
            },
            ClientToServer::UpsertStoreItem { item } => {
                services.upsert_store_item(&me, item).await?;
                ServerToClient::StoreItems {
                    items: services.list_store_items().await?,
                }
            },
            ClientToServer::UpsertGift { gift } => {
                services.upsert_gift(&me, gift).await?;
                ServerToClient::Gifts {
                    gifts: services.list_gifts().await?,
                }
            },

            ClientToServer::GetVoiceGrant { room_id } => ServerToClient::VoiceGrant {
                grant: services.voice_grant(&me, &room_id).await?,
            },

            ClientToServer::Register { .. } | ClientToServer::Login { .. } | ClientToServer::Resume { .. } => {
                return Err(AppError::Internal("auth message reached the session path".to_string()));
            },
        };
        Ok(reply)
    }

    /// Parse, validate and handle one text frame; failures become error replies
    pub async fn handle_text(&mut self, text: &str) -> ServerToClient {
        let message = match serde_json::from_str::<ClientToServer>(text) {
            Ok(message) => message,
            Err(e) => {
                return ServerToClient::MalformedMessage { err_msg: e.to_string() };
            },
        };
        if let Err(e) = validation::validate_client_message(&message) {
            let error: AppError = e.into();
            return error_reply(&error);
        }
        match self.handle_message(message).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, code = e.error_code(), "request failed");
                error_reply(&e)
            },
        }
    }

    /// Map a committed change to a push for this connection, if it watches it
    pub async fn handle_change(&mut self, change: &Change) -> Result<Option<ServerToClient>, AppError> {
        let Some(me) = self.user_id.clone() else {
            return Ok(None);
        };
        let Some(body) = &change.body else {
            return Ok(None);
        };
        let key = &change.key;

        match key.collection.as_str() {
            collections::USERS if key.id == me => {
                let user: User = serde_json::from_value(body.clone())?;
                if user.suspended {
                    self.disconnect().await;
                    self.user_id = None;
                    return Ok(Some(error_reply(&AppError::Suspended)));
                }
                Ok(Some(ServerToClient::Account { user }))
            },
            collections::ROOMS if self.room_id.as_deref() == Some(key.id.as_str()) => {
                let room: Room = serde_json::from_value(body.clone())?;
                if let Err(violation) = room.check_entry(&me, now_ms()) {
                    // banned while inside: drop presence and tell the client
                    debug!(client_id = %self.client_id, room_id = %room.id, "removed from room by ban");
                    self.disconnect().await;
                    let error: AppError = violation.into();
                    return Ok(Some(error_reply(&error)));
                }
                Ok(Some(self.room_reply(room)))
            },
            collections::ROOM_MESSAGES => match &self.room_id {
                Some(room_id) if key.id.starts_with(&format!("{room_id}/")) => {
                    let message: RoomMessage = serde_json::from_value(body.clone())?;
                    Ok(Some(ServerToClient::RoomMessage { message }))
                },
                _ => Ok(None),
            },
            collections::PRIVATE_MESSAGES => {
                let message: PrivateMessage = serde_json::from_value(body.clone())?;
                // only new messages; read-flag updates are not pushed
                if message.to == me && change.version == 1 {
                    Ok(Some(ServerToClient::PrivateMessage { message }))
                } else {
                    Ok(None)
                }
            },
            collections::NOTIFICATIONS if key.id.starts_with(&format!("{me}/")) && change.version == 1 => {
                let notification: Notification = serde_json::from_value(body.clone())?;
                Ok(Some(ServerToClient::Notification { notification }))
            },
            _ => Ok(None),
        }
    }

    /// Fresh snapshots of everything this connection watches
    pub async fn resync(&mut self) -> Vec<ServerToClient> {
        let Some(me) = self.user_id.clone() else {
            return Vec::new();
        };
        let state = Arc::clone(&self.state);
        let services = &state.services;
        let mut pushes = Vec::new();
        match services.account(&me).await {
            Ok(user) => pushes.push(ServerToClient::Account { user }),
            Err(e) => warn!(client_id = %self.client_id, error = %e, "resync of account failed"),
        }
        if let Some(room_id) = self.room_id.clone() {
            match services.room_snapshot(&room_id).await {
                Ok((room, viewers)) => pushes.push(ServerToClient::Room { room, viewers }),
                Err(e) => warn!(client_id = %self.client_id, error = %e, "resync of room failed"),
            }
            match services.room_history(&room_id).await {
                Ok(messages) => pushes.push(ServerToClient::RoomMessages { room_id, messages }),
                Err(e) => warn!(client_id = %self.client_id, error = %e, "resync of chat failed"),
            }
        }
        match services.badges(&me).await {
            Ok(badges) => pushes.push(ServerToClient::Badges { badges }),
            Err(e) => warn!(client_id = %self.client_id, error = %e, "resync of badges failed"),
        }
        pushes
    }

    /// Leave the joined room, if any. Runs on logout and when the socket closes.
    pub async fn disconnect(&mut self) {
        let (Some(me), Some(room_id)) = (self.user_id.clone(), self.room_id.take()) else {
            return;
        };
        if let Err(e) = self.state.services.leave_room(&me, &room_id).await {
            warn!(client_id = %self.client_id, room_id = %room_id, error = %e, "failed to leave room on disconnect");
        }
    }
}

fn ack(op: &str) -> ServerToClient {
    ServerToClient::Ack { op: op.to_string() }
}

/// Error reply for a failed request
pub fn error_reply(error: &AppError) -> ServerToClient {
    ServerToClient::Error {
        code: error.error_code().to_string(),
        message: error.client_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::settings;
    use crate::service::{ScriptedHost, Services};
    use crate::store::MemoryStorage;
    use tokio::sync::broadcast;

    async fn state() -> Arc<AppState<MemoryStorage>> {
        let services = Services::with_ai_host(MemoryStorage::new(), settings(), Box::new(ScriptedHost));
        services.seed_catalog().await.unwrap();
        Arc::new(AppState::from_services(services))
    }

    fn localhost() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    async fn registered(state: &Arc<AppState<MemoryStorage>>, username: &str) -> WebSocketHandler<MemoryStorage> {
        let mut handler = WebSocketHandler::new(Arc::clone(state), localhost());
        let reply = handler
            .handle_message(ClientToServer::Register {
                username: username.to_string(),
                password: "password 123".to_string(),
                display_name: username.to_uppercase(),
            })
            .await
            .unwrap();
        assert!(matches!(reply, ServerToClient::Authenticated { .. }));
        handler
    }

    /// Feed every pending change to `handler` and collect its pushes
    async fn drain(
        feed: &mut broadcast::Receiver<Change>,
        handler: &mut WebSocketHandler<MemoryStorage>,
    ) -> Vec<ServerToClient> {
        let mut pushes = Vec::new();
        while let Ok(change) = feed.try_recv() {
            if let Some(push) = handler.handle_change(&change).await.unwrap() {
                pushes.push(push);
            }
        }
        pushes
    }

    #[tokio::test]
    async fn test_requests_need_a_session() {
        let state = state().await;
        let mut handler = WebSocketHandler::new(Arc::clone(&state), localhost());
        let reply = handler.handle_text(r#"{"msgType":"ListRooms"}"#).await;
        assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "AUTH_001"));

        let reply = handler.handle_text("not json").await;
        assert!(matches!(reply, ServerToClient::MalformedMessage { .. }));

        let reply = handler
            .handle_text(r#"{"msgType":"Register","username":"x","password":"password 123","display_name":"X"}"#)
            .await;
        assert!(matches!(reply, ServerToClient::Error { ref code, .. } if code == "VAL_001"));
    }

    #[tokio::test]
    async fn test_resume_binds_a_second_connection() {
        let state = state().await;
        let mut first = WebSocketHandler::new(Arc::clone(&state), localhost());
        let ServerToClient::Authenticated { session_token, user } = first
            .handle_message(ClientToServer::Register {
                username: "host".to_string(),
                password: "password 123".to_string(),
                display_name: "Host".to_string(),
            })
            .await
            .unwrap()
        else {
            panic!("expected Authenticated");
        };

        let mut second = WebSocketHandler::new(Arc::clone(&state), localhost());
        second
            .handle_message(ClientToServer::Resume { session_token })
            .await
            .unwrap();
        assert_eq!(second.user_id(), Some(user.id.as_str()));

        first.handle_message(ClientToServer::Logout).await.unwrap();
        assert!(first.user_id().is_none());
        let reply = first.handle_text(r#"{"msgType":"GetBadges"}"#).await;
        assert!(matches!(reply, ServerToClient::Error { .. }));
    }

    #[tokio::test]
    async fn test_room_changes_reach_members() {
        let state = state().await;
        let mut feed = state.services.db.subscribe();
        let mut host = registered(&state, "host").await;
        let mut guest = registered(&state, "guest").await;

        let reply = host
            .handle_message(ClientToServer::CreateRoom {
                title: "Lounge".to_string(),
                seat_count: None,
            })
            .await
            .unwrap();
        let ServerToClient::Room { room, viewers } = reply else {
            panic!("expected Room");
        };
        assert_eq!(viewers, 1);
        assert_eq!(host.room_id(), Some(room.id.as_str()));

        guest
            .handle_message(ClientToServer::JoinRoom { room_id: room.id.clone() })
            .await
            .unwrap();
        drain(&mut feed, &mut host).await;

        guest
            .handle_message(ClientToServer::TakeSeat {
                room_id: room.id.clone(),
                seat: 1,
            })
            .await
            .unwrap();
        guest
            .handle_message(ClientToServer::SendRoomMessage {
                room_id: room.id.clone(),
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        let pushes = drain(&mut feed, &mut host).await;
        assert!(pushes.iter().any(|p| matches!(
            p,
            ServerToClient::Room { room, viewers: 2 } if room.seats[1].occupant.is_some()
        )));
        assert!(pushes
            .iter()
            .any(|p| matches!(p, ServerToClient::RoomMessage { message } if message.text == "hello")));
    }

    #[tokio::test]
    async fn test_private_messages_push_to_recipient_only() {
        let state = state().await;
        let mut feed = state.services.db.subscribe();
        let mut ann_feed = state.services.db.subscribe();
        let mut ann = registered(&state, "ann").await;
        let mut ben = registered(&state, "ben").await;
        let ben_id = ben.user_id().unwrap().to_string();
        drain(&mut feed, &mut ben).await;

        ann.handle_message(ClientToServer::SendPrivateMessage {
            to: ben_id,
            text: "hi".to_string(),
        })
        .await
        .unwrap();

        let pushes = drain(&mut feed, &mut ben).await;
        assert!(pushes
            .iter()
            .any(|p| matches!(p, ServerToClient::PrivateMessage { message } if message.text == "hi")));
        let pushes = drain(&mut ann_feed, &mut ann).await;
        assert!(!pushes
            .iter()
            .any(|p| matches!(p, ServerToClient::PrivateMessage { .. })));
    }

    #[tokio::test]
    async fn test_ban_removes_connection_from_room() {
        let state = state().await;
        let mut feed = state.services.db.subscribe();
        let mut host = registered(&state, "host").await;
        let mut guest = registered(&state, "guest").await;
        let guest_id = guest.user_id().unwrap().to_string();

        let ServerToClient::Room { room, .. } = host
            .handle_message(ClientToServer::CreateRoom {
                title: "Lounge".to_string(),
                seat_count: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected Room");
        };
        guest
            .handle_message(ClientToServer::JoinRoom { room_id: room.id.clone() })
            .await
            .unwrap();
        drain(&mut feed, &mut guest).await;

        host.handle_message(ClientToServer::BanUser {
            room_id: room.id.clone(),
            user_id: guest_id.clone(),
            duration_secs: None,
        })
        .await
        .unwrap();

        let pushes = drain(&mut feed, &mut guest).await;
        assert!(pushes
            .iter()
            .any(|p| matches!(p, ServerToClient::Error { code, .. } if code == "ROOM_002")));
        assert!(guest.room_id().is_none());
        assert!(!state.services.hub.is_present(&room.id, &guest_id));

        let reply = guest.handle_message(ClientToServer::JoinRoom { room_id: room.id.clone() }).await;
        assert!(reply.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_releases_seat() {
        let state = state().await;
        let mut host = registered(&state, "host").await;
        let mut guest = registered(&state, "guest").await;
        let ServerToClient::Room { room, .. } = host
            .handle_message(ClientToServer::CreateRoom {
                title: "Lounge".to_string(),
                seat_count: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected Room");
        };
        guest
            .handle_message(ClientToServer::JoinRoom { room_id: room.id.clone() })
            .await
            .unwrap();
        guest
            .handle_message(ClientToServer::TakeSeat {
                room_id: room.id.clone(),
                seat: 2,
            })
            .await
            .unwrap();

        guest.disconnect().await;
        let (room, viewers) = state.services.room_snapshot(&room.id).await.unwrap();
        assert_eq!(viewers, 1);
        assert!(room.seats[2].occupant.is_none());
    }

    #[tokio::test]
    async fn test_resync_returns_snapshots() {
        let state = state().await;
        let mut host = registered(&state, "host").await;
        host.handle_message(ClientToServer::CreateRoom {
            title: "Lounge".to_string(),
            seat_count: None,
        })
        .await
        .unwrap();
        let pushes = host.resync().await;
        assert!(matches!(pushes[0], ServerToClient::Account { .. }));
        assert!(pushes.iter().any(|p| matches!(p, ServerToClient::Room { .. })));
        assert!(pushes.iter().any(|p| matches!(p, ServerToClient::RoomMessages { .. })));
    }
}
