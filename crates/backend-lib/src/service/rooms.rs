//! Room lifecycle, presence and moderation.
use metrics::counter;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use voiceroom_common::{
    room::PERMANENT_BAN, social::MessageKind, Occupant, Room, RoomSettings, RoomSummary, RuleViolation, User,
};

use super::Services;
use crate::error::AppError;
use crate::metrics::ROOM_CREATED;
use crate::store::{DocKey, Storage};
use crate::time::{after_secs, now_ms};
use crate::validation;

pub(crate) fn occupant_of(user: &User) -> Occupant {
    Occupant {
        user_id: user.id.clone(),
        name: user.display_name.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

impl<S: Storage + 'static> Services<S> {
    /// Open a room hosted by `actor`, who starts on the host seat
    #[instrument(skip(self))]
    pub async fn create_room(&self, actor: &str, title: &str, seat_count: Option<usize>) -> Result<Room, AppError> {
        validation::validate_room_title(title)?;
        let host = self.active_user(actor).await?;
        let room = Room::new(
            Uuid::new_v4().to_string(),
            title.trim().to_string(),
            occupant_of(&host),
            seat_count.unwrap_or(self.settings.rooms.default_seat_count),
            now_ms(),
        )?;
        self.db.insert(&room).await?;
        counter!(ROOM_CREATED).increment(1);
        info!(room_id = %room.id, host = %actor, "room created");
        Ok(room)
    }

    /// Every room, busiest first
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, AppError> {
        let rooms: Vec<Room> = self.db.list("").await?;
        let mut summaries: Vec<RoomSummary> = rooms
            .into_iter()
            .map(|room| RoomSummary {
                viewers: self.hub.viewers(&room.id),
                occupied_seats: room.occupied_count(),
                seat_count: room.seats.len(),
                id: room.id,
                title: room.title,
                host_id: room.host_id,
                wealth: room.wealth,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.viewers
                .cmp(&a.viewers)
                .then_with(|| b.wealth.total_cmp(&a.wealth))
        });
        Ok(summaries)
    }

    /// Room document plus its live viewer count
    pub async fn room_snapshot(&self, room_id: &str) -> Result<(Room, usize), AppError> {
        let room: Room = self.db.require(room_id).await?;
        Ok((room, self.hub.viewers(room_id)))
    }

    /// Enter a room: refused while banned, records the visit, registers
    /// presence and announces an approved entrance greeting
    #[instrument(skip(self))]
    pub async fn join_room(&self, actor: &str, room_id: &str) -> Result<(Room, usize), AppError> {
        let now = now_ms();
        let (room, user) = self
            .db
            .transact(vec![DocKey::of::<Room>(room_id), DocKey::of::<User>(actor)], |txn| {
                let room: Room = txn.require(room_id)?;
                let mut user: User = txn.require(actor)?;
                if user.suspended {
                    return Err(AppError::Suspended);
                }
                room.check_entry(actor, now)?;
                user.record_visit(room_id);
                txn.put(&user)?;
                Ok((room, user))
            })
            .await?;

        let first = self.hub.enter(room_id, actor);
        if first {
            if let Some(greeting) = &user.welcome_message {
                let text = format!("{} has arrived: {greeting}", user.display_name);
                if let Err(e) = self.post_room_message(room_id, None, MessageKind::System, text).await {
                    warn!(room_id, error = %e, "failed to announce entrance");
                }
            }
        }
        Ok((room, self.hub.viewers(room_id)))
    }

    /// Leave a room. The seat is only given up with the user's last connection.
    #[instrument(skip(self))]
    pub async fn leave_room(&self, actor: &str, room_id: &str) -> Result<(), AppError> {
        if !self.hub.exit(room_id, actor) {
            return Ok(());
        }
        let vacated = self
            .db
            .transact(vec![DocKey::of::<Room>(room_id)], |txn| {
                let Some(mut room) = txn.get::<Room>(room_id)? else {
                    return Ok(None);
                };
                let vacated = room.vacate(actor);
                if vacated.is_some() {
                    txn.put(&room)?;
                }
                Ok(vacated)
            })
            .await?;
        if let Some(seat) = vacated {
            info!(room_id, user_id = actor, seat, "seat released on leave");
        }
        Ok(())
    }

    /// Read-modify-write of one room through `edit`
    pub(crate) async fn mutate_room<T, F>(&self, room_id: &str, mut edit: F) -> Result<(Room, T), AppError>
    where
        F: FnMut(&mut Room) -> Result<T, RuleViolation>,
    {
        self.db
            .transact(vec![DocKey::of::<Room>(room_id)], |txn| {
                let mut room: Room = txn.require(room_id)?;
                let out = edit(&mut room)?;
                txn.put(&room)?;
                Ok((room, out))
            })
            .await
    }

    pub async fn update_room(&self, actor: &str, room_id: &str, settings: RoomSettings) -> Result<Room, AppError> {
        if let Some(title) = &settings.title {
            validation::validate_room_title(title)?;
        }
        let (room, ()) = self
            .mutate_room(room_id, |room| room.update_settings(actor, settings.clone()))
            .await?;
        Ok(room)
    }

    pub async fn set_room_admin(&self, actor: &str, room_id: &str, target: &str, admin: bool) -> Result<Room, AppError> {
        let (room, ()) = self.mutate_room(room_id, |room| room.set_admin(actor, target, admin)).await?;
        Ok(room)
    }

    /// Ban `target` for `duration_secs`, or forever when `None`
    #[instrument(skip(self))]
    pub async fn ban_user(
        &self,
        actor: &str,
        room_id: &str,
        target: &str,
        duration_secs: Option<u64>,
    ) -> Result<Room, AppError> {
        let until = duration_secs.map_or(PERMANENT_BAN, |secs| after_secs(now_ms(), secs));
        let (room, vacated) = self.mutate_room(room_id, |room| room.ban(actor, target, until)).await?;
        info!(room_id, target, until, ?vacated, "user banned");
        Ok(room)
    }

    pub async fn unban_user(&self, actor: &str, room_id: &str, target: &str) -> Result<Room, AppError> {
        let (room, _) = self.mutate_room(room_id, |room| room.unban(actor, target)).await?;
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{services, user};
    use super::*;
    use voiceroom_common::RoomMessage;

    #[tokio::test]
    async fn test_create_seats_host_and_join_tracks_presence() {
        let services = services().await;
        let host = user(&services, "host").await;
        let guest = user(&services, "guest").await;
        let room = services.create_room(&host, "Lounge", Some(8)).await.unwrap();
        assert_eq!(room.seats.len(), 8);
        assert_eq!(room.seat_of(&host), Some(0));

        let (_, viewers) = services.join_room(&guest, &room.id).await.unwrap();
        assert_eq!(viewers, 1);
        let account = services.account(&guest).await.unwrap();
        assert_eq!(account.recent_rooms, vec![room.id.clone()]);

        assert!(services.create_room(&host, "Too big", Some(21)).await.is_err());
    }

    #[tokio::test]
    async fn test_ban_blocks_join_until_expiry() {
        let services = services().await;
        let host = user(&services, "host").await;
        let guest = user(&services, "guest").await;
        let room = services.create_room(&host, "Lounge", None).await.unwrap();

        services.ban_user(&host, &room.id, &guest, None).await.unwrap();
        let err = services.join_room(&guest, &room.id).await.unwrap_err();
        assert!(matches!(err, AppError::Rule(RuleViolation::Banned { until: PERMANENT_BAN })));

        services.unban_user(&host, &room.id, &guest).await.unwrap();
        services.join_room(&guest, &room.id).await.unwrap();

        // an elapsed ban no longer blocks
        services
            .mutate_room(&room.id, |room| {
                room.bans.insert(guest.clone(), 1);
                Ok(())
            })
            .await
            .unwrap();
        services.join_room(&guest, &room.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_releases_seat_on_last_connection() {
        let services = services().await;
        let host = user(&services, "host").await;
        let guest = user(&services, "guest").await;
        let room = services.create_room(&host, "Lounge", None).await.unwrap();

        services.join_room(&guest, &room.id).await.unwrap();
        services.join_room(&guest, &room.id).await.unwrap();
        services.take_seat(&guest, &room.id, 3).await.unwrap();

        services.leave_room(&guest, &room.id).await.unwrap();
        let (room_now, _) = services.room_snapshot(&room.id).await.unwrap();
        assert_eq!(room_now.seat_of(&guest), Some(3));

        services.leave_room(&guest, &room.id).await.unwrap();
        let (room_now, viewers) = services.room_snapshot(&room.id).await.unwrap();
        assert_eq!(room_now.seat_of(&guest), None);
        assert_eq!(viewers, 0);
    }

    #[tokio::test]
    async fn test_list_orders_by_viewers_then_wealth() {
        let services = services().await;
        let host = user(&services, "host").await;
        let guest = user(&services, "guest").await;
        let quiet = services.create_room(&host, "Quiet", None).await.unwrap();
        let rich = services.create_room(&host, "Rich", None).await.unwrap();
        let busy = services.create_room(&host, "Busy", None).await.unwrap();
        services
            .mutate_room(&rich.id, |room| {
                room.wealth = 500.0;
                Ok(())
            })
            .await
            .unwrap();
        services.join_room(&guest, &busy.id).await.unwrap();

        let ids: Vec<_> = services.list_rooms().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![busy.id, rich.id, quiet.id]);
    }

    #[tokio::test]
    async fn test_moderation_permissions() {
        let services = services().await;
        let host = user(&services, "host").await;
        let admin = user(&services, "admin").await;
        let other = user(&services, "other").await;
        let room = services.create_room(&host, "Lounge", None).await.unwrap();

        assert!(services.set_room_admin(&admin, &room.id, &other, true).await.is_err());
        services.set_room_admin(&host, &room.id, &admin, true).await.unwrap();

        let settings = RoomSettings {
            luck_percent: Some(101),
            ..RoomSettings::default()
        };
        assert!(matches!(
            services.update_room(&admin, &room.id, settings).await,
            Err(AppError::Rule(RuleViolation::InvalidSetting(_)))
        ));
        assert!(services.ban_user(&admin, &room.id, &host, Some(60)).await.is_err());
        let banned = services.ban_user(&admin, &room.id, &other, Some(60)).await.unwrap();
        assert!(banned.active_ban(&other, now_ms()).is_some());
    }

    #[tokio::test]
    async fn test_welcome_message_is_announced_on_entry() {
        let services = services().await;
        let host = user(&services, "host").await;
        let guest = user(&services, "guest").await;
        services
            .update_user(&guest, |u| {
                u.welcome_message = Some("the party is here".into());
                Ok(())
            })
            .await
            .unwrap();
        let room = services.create_room(&host, "Lounge", None).await.unwrap();
        services.join_room(&guest, &room.id).await.unwrap();

        let history: Vec<RoomMessage> = services.db.list(&format!("{}/", room.id)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].text.contains("the party is here"));
    }
}
