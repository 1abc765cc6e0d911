//! Gift ledger.
//!
//! The sender debit, the room's contribution and wealth totals, the
//! recipients' seat values and every recipient's coin credit commit as one
//! transaction. The chat line and notifications that follow are best-effort.
use metrics::counter;
use tracing::{info, instrument, warn};
use voiceroom_common::{
    social::MessageKind, Gift, GiftReceipt, NotificationKind, Room, RuleViolation, User, UserId,
};

use super::Services;
use crate::error::AppError;
use crate::metrics::{GIFT_DIAMONDS, GIFT_SENT};
use crate::store::{DocKey, Storage};
use crate::time::now_ms;

impl<S: Storage + 'static> Services<S> {
    /// Gift catalog, cheapest first
    pub async fn list_gifts(&self) -> Result<Vec<Gift>, AppError> {
        let mut gifts: Vec<Gift> = self.db.list("").await?;
        gifts.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.id.cmp(&b.id)));
        Ok(gifts)
    }

    /// Send `quantity` of `gift_id` to each of `recipients`, all seated in
    /// `room_id`. The sender must be in the room and not banned from it.
    #[instrument(skip(self))]
    pub async fn send_gift(
        &self,
        actor: &str,
        room_id: &str,
        gift_id: &str,
        quantity: u64,
        recipients: &[UserId],
    ) -> Result<GiftReceipt, AppError> {
        if quantity == 0 || recipients.is_empty() {
            return Err(RuleViolation::InvalidQuantity.into());
        }
        if recipients.iter().any(|r| r == actor) {
            return Err(RuleViolation::SelfTarget.into());
        }
        self.require_presence(actor, room_id)?;
        let now = now_ms();
        let share = self.settings.economy.coin_share_percent;

        let mut keys = vec![
            DocKey::of::<Gift>(gift_id),
            DocKey::of::<Room>(room_id),
            DocKey::of::<User>(actor),
        ];
        keys.extend(recipients.iter().map(|r| DocKey::of::<User>(r)));

        let (gift, sender, total) = self
            .db
            .transact(keys, |txn| {
                let gift: Gift = txn.require(gift_id)?;
                let mut room: Room = txn.require(room_id)?;
                room.check_entry(actor, now)?;
                let mut sender: User = txn.require(actor)?;
                if sender.suspended {
                    return Err(AppError::Suspended);
                }

                let unit_value = gift
                    .price
                    .checked_mul(quantity)
                    .ok_or(RuleViolation::InvalidQuantity)?;
                // validates recipients and books the room side
                let total = room.record_gift(actor, recipients, unit_value)?;
                sender.spend_diamonds(total)?;

                let coins = unit_value.saturating_mul(share) / 100;
                for recipient in recipients {
                    let mut user: User = txn.require(recipient)?;
                    user.receive_gift(coins, quantity);
                    txn.put(&user)?;
                }
                txn.put(&room)?;
                txn.put(&sender)?;
                Ok((gift, sender, total))
            })
            .await?;

        counter!(GIFT_SENT).increment(1);
        counter!(GIFT_DIAMONDS).increment(total);
        info!(room_id, sender = actor, gift_id, quantity, total, "gift sent");

        self.announce_gift(room_id, &sender, &gift, quantity, recipients).await;

        Ok(GiftReceipt {
            gift_id: gift.id,
            quantity,
            recipients: recipients.to_vec(),
            total_cost: total,
            sender_diamonds: sender.diamonds,
        })
    }

    async fn announce_gift(&self, room_id: &str, sender: &User, gift: &Gift, quantity: u64, recipients: &[UserId]) {
        let mut names = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match self.db.get::<User>(recipient).await {
                Ok(Some(user)) => names.push(user.display_name),
                Ok(None) => names.push(recipient.clone()),
                Err(e) => {
                    warn!(recipient, error = %e, "could not load gift recipient");
                    names.push(recipient.clone());
                },
            }
        }
        let text = format!("sent {} x{quantity} to {}", gift.name, names.join(", "));
        if let Err(e) = self
            .post_room_message(room_id, Some(sender), MessageKind::Gift, text)
            .await
        {
            warn!(room_id, error = %e, "failed to post gift message");
        }
        for recipient in recipients {
            let text = format!("{} sent you {} x{quantity}", sender.display_name, gift.name);
            self.notify(recipient, NotificationKind::Gift, text).await;
        }
    }
}
