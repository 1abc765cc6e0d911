//! Voice channel grants for the client's audio transport.
use voiceroom_common::{Room, RuleViolation, User, VoiceGrant};

use super::Services;
use crate::error::AppError;
use crate::store::Storage;

impl<S: Storage + 'static> Services<S> {
    /// Channel and identity to join with. Publishing needs an unmuted seat.
    pub async fn voice_grant(&self, actor: &str, room_id: &str) -> Result<VoiceGrant, AppError> {
        let room: Room = self.db.require(room_id).await?;
        if !self.hub.is_present(room_id, actor) {
            return Err(RuleViolation::NotInRoom.into());
        }
        let user: User = self.active_user(actor).await?;
        let can_publish = room.seat_of(actor).is_some_and(|index| !room.seats[index].muted);
        Ok(VoiceGrant {
            channel: room.id,
            uid: user.display_id,
            can_publish,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{services, user};
    use super::*;

    #[tokio::test]
    async fn test_only_unmuted_seats_publish() {
        let services = services().await;
        let host = user(&services, "host").await;
        let guest = user(&services, "guest").await;
        let room = services.create_room(&host, "Lounge", None).await.unwrap();
        assert!(services.voice_grant(&guest, &room.id).await.is_err());

        services.join_room(&guest, &room.id).await.unwrap();
        let grant = services.voice_grant(&guest, &room.id).await.unwrap();
        assert!(!grant.can_publish);
        assert_eq!(grant.channel, room.id);
        assert_eq!(grant.uid.len(), 7);

        services.take_seat(&guest, &room.id, 2).await.unwrap();
        assert!(services.voice_grant(&guest, &room.id).await.unwrap().can_publish);
        services.set_seat_muted(&host, &room.id, 2, true).await.unwrap();
        assert!(!services.voice_grant(&guest, &room.id).await.unwrap().can_publish);
    }
}
