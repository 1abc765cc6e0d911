//! Seat operations: each is one optimistic read-validate-write of the room.
use metrics::counter;
use tracing::debug;
use voiceroom_common::{Room, RuleViolation};

use super::rooms::occupant_of;
use super::Services;
use crate::error::AppError;
use crate::metrics::SEAT_CHANGE;
use crate::store::Storage;
use crate::time::now_ms;

impl<S: Storage + 'static> Services<S> {
    pub(super) fn require_presence(&self, actor: &str, room_id: &str) -> Result<(), AppError> {
        if self.hub.is_present(room_id, actor) {
            Ok(())
        } else {
            Err(RuleViolation::NotInRoom.into())
        }
    }

    /// Sit on `seat`, moving off any seat already held
    pub async fn take_seat(&self, actor: &str, room_id: &str, seat: usize) -> Result<Room, AppError> {
        self.require_presence(actor, room_id)?;
        let occupant = occupant_of(&self.active_user(actor).await?);
        let now = now_ms();
        let (room, moved) = self
            .mutate_room(room_id, |room| {
                room.check_entry(actor, now)?;
                room.take_seat(occupant.clone(), seat)
            })
            .await?;
        counter!(SEAT_CHANGE).increment(1);
        debug!(room_id, user_id = actor, from = ?moved.from, to = moved.to, "seat taken");
        Ok(room)
    }

    pub async fn leave_seat(&self, actor: &str, room_id: &str) -> Result<Room, AppError> {
        let (room, _) = self.mutate_room(room_id, |room| room.leave_seat(actor)).await?;
        counter!(SEAT_CHANGE).increment(1);
        Ok(room)
    }

    pub async fn kick_from_seat(&self, actor: &str, room_id: &str, target: &str) -> Result<Room, AppError> {
        let (room, seat) = self.mutate_room(room_id, |room| room.kick(actor, target)).await?;
        counter!(SEAT_CHANGE).increment(1);
        debug!(room_id, actor, target, seat, "kicked from seat");
        Ok(room)
    }

    pub async fn set_seat_muted(&self, actor: &str, room_id: &str, seat: usize, muted: bool) -> Result<Room, AppError> {
        let (room, ()) = self.mutate_room(room_id, |room| room.set_muted(actor, seat, muted)).await?;
        Ok(room)
    }

    pub async fn set_seat_locked(&self, actor: &str, room_id: &str, seat: usize, locked: bool) -> Result<Room, AppError> {
        let (room, ()) = self.mutate_room(room_id, |room| room.set_locked(actor, seat, locked)).await?;
        Ok(room)
    }
}
