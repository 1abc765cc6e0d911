//! Store, inventory, VIP and wallet operations.
use metrics::counter;
use tracing::{info, instrument};
use voiceroom_common::{Gift, RuleViolation, Slot, StoreItem, User};

use super::Services;
use crate::error::AppError;
use crate::metrics::STORE_PURCHASE;
use crate::store::{DocKey, Storage};
use crate::time::now_ms;

impl<S: Storage + 'static> Services<S> {
    pub async fn list_store_items(&self) -> Result<Vec<StoreItem>, AppError> {
        let mut items: Vec<StoreItem> = self.db.list("").await?;
        items.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.price.cmp(&b.price)));
        Ok(items)
    }

    /// Buy `item_id`, extending any time still left on it
    #[instrument(skip(self))]
    pub async fn purchase_item(&self, actor: &str, item_id: &str) -> Result<User, AppError> {
        let now = now_ms();
        let user = self
            .db
            .transact(vec![DocKey::of::<StoreItem>(item_id), DocKey::of::<User>(actor)], |txn| {
                let item: StoreItem = txn.require(item_id)?;
                let mut user: User = txn.require(actor)?;
                if user.suspended {
                    return Err(AppError::Suspended);
                }
                user.purchase_item(&item, now)?;
                txn.put(&user)?;
                Ok(user)
            })
            .await?;
        counter!(STORE_PURCHASE, "kind" => "item").increment(1);
        info!(user_id = actor, item_id, "store item purchased");
        Ok(user)
    }

    pub async fn equip_item(&self, actor: &str, item_id: &str) -> Result<User, AppError> {
        let item: StoreItem = self.db.require(item_id).await?;
        let now = now_ms();
        self.update_user(actor, |user| user.equip(&item, now).map_err(AppError::from))
            .await
    }

    pub async fn unequip_slot(&self, actor: &str, slot: Slot) -> Result<User, AppError> {
        self.update_user(actor, |user| {
            user.unequip(slot);
            Ok(())
        })
        .await
    }

    /// Buy one VIP period at `level` for the configured price
    #[instrument(skip(self))]
    pub async fn purchase_vip(&self, actor: &str, level: u8) -> Result<User, AppError> {
        let price = self
            .settings
            .vip_price(level)
            .ok_or(RuleViolation::InvalidVipLevel(level))?;
        let now = now_ms();
        let user = self
            .update_user(actor, |user| user.purchase_vip(level, price, now).map_err(AppError::from))
            .await?;
        counter!(STORE_PURCHASE, "kind" => "vip").increment(1);
        info!(user_id = actor, level, price, "VIP purchased");
        Ok(user)
    }

    pub async fn exchange_coins(&self, actor: &str, coins: u64) -> Result<User, AppError> {
        let rate = self.settings.economy.coins_per_diamond;
        self.update_user(actor, |user| user.exchange_coins(coins, rate).map(|_| ()).map_err(AppError::from))
            .await
    }

    /// Credit diamonds to `target`; global admins only
    #[instrument(skip(self))]
    pub async fn grant_diamonds(&self, actor: &str, target: &str, amount: u64) -> Result<User, AppError> {
        self.require_admin(actor).await?;
        let user = self
            .db
            .transact(vec![DocKey::of::<User>(target)], |txn| {
                let mut user: User = txn.require(target)?;
                user.credit_diamonds(amount);
                txn.put(&user)?;
                Ok(user)
            })
            .await?;
        info!(admin = actor, target, amount, "diamonds granted");
        Ok(user)
    }

    pub async fn upsert_store_item(&self, actor: &str, item: StoreItem) -> Result<StoreItem, AppError> {
        self.require_admin(actor).await?;
        self.db
            .transact(vec![DocKey::of::<StoreItem>(&item.id)], |txn| {
                txn.put(&item)?;
                Ok(())
            })
            .await?;
        Ok(item)
    }

    pub async fn upsert_gift(&self, actor: &str, gift: Gift) -> Result<Gift, AppError> {
        self.require_admin(actor).await?;
        self.db
            .transact(vec![DocKey::of::<Gift>(&gift.id)], |txn| {
                txn.put(&gift)?;
                Ok(())
            })
            .await?;
        Ok(gift)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{fund, services, user};
    use super::*;
    use voiceroom_common::catalog::DAY_MS;

    #[tokio::test]
    async fn test_unaffordable_purchase_leaves_balance() {
        let services = services().await;
        let alice = user(&services, "alice").await;
        fund(&services, &alice, 299).await;

        let err = services.purchase_item(&alice, "frame-gold").await.unwrap_err();
        assert!(matches!(err, AppError::Rule(RuleViolation::InsufficientFunds { .. })));
        let account = services.account(&alice).await.unwrap();
        assert_eq!(account.diamonds, 299);
        assert!(account.inventory.is_empty());
    }

    #[tokio::test]
    async fn test_purchase_extends_and_equip_requires_ownership() {
        let services = services().await;
        let alice = user(&services, "alice").await;
        fund(&services, &alice, 1_000).await;

        assert!(matches!(
            services.equip_item(&alice, "frame-gold").await,
            Err(AppError::Rule(RuleViolation::ItemNotOwned(_)))
        ));
        let first = services.purchase_item(&alice, "frame-gold").await.unwrap();
        let second = services.purchase_item(&alice, "frame-gold").await.unwrap();
        assert_eq!(second.inventory["frame-gold"] - first.inventory["frame-gold"], 7 * DAY_MS);
        assert_eq!(second.diamonds, 400);
        assert_eq!(second.diamonds_spent, 600);

        let equipped = services.equip_item(&alice, "frame-gold").await.unwrap();
        assert_eq!(equipped.equipped[&Slot::Frame], "frame-gold");
        let cleared = services.unequip_slot(&alice, Slot::Frame).await.unwrap();
        assert!(cleared.equipped.is_empty());
    }

    #[tokio::test]
    async fn test_expired_item_cannot_be_equipped() {
        let services = services().await;
        let alice = user(&services, "alice").await;
        services
            .update_user(&alice, |u| {
                u.inventory.insert("badge-star".into(), 1);
                Ok(())
            })
            .await
            .unwrap();
        assert!(matches!(
            services.equip_item(&alice, "badge-star").await,
            Err(AppError::Rule(RuleViolation::ItemExpired(_)))
        ));
    }

    #[tokio::test]
    async fn test_vip_purchase_rules() {
        let services = services().await;
        let alice = user(&services, "alice").await;
        fund(&services, &alice, 10_000).await;

        let vip = services.purchase_vip(&alice, 2).await.unwrap();
        assert_eq!(vip.effective_vip(now_ms()), 2);
        assert_eq!(vip.diamonds, 7_000);
        assert!(matches!(
            services.purchase_vip(&alice, 1).await,
            Err(AppError::Rule(RuleViolation::VipDowngrade))
        ));
        assert!(matches!(
            services.purchase_vip(&alice, 6).await,
            Err(AppError::Rule(RuleViolation::InvalidVipLevel(6)))
        ));
    }

    #[tokio::test]
    async fn test_exchange_and_admin_grant() {
        let services = services().await;
        let alice = user(&services, "alice").await;
        let admin = user(&services, "admin").await;
        services
            .update_user(&alice, |u| {
                u.coins = 35;
                Ok(())
            })
            .await
            .unwrap();
        let before = services.account(&alice).await.unwrap().diamonds;
        let after = services.exchange_coins(&alice, 30).await.unwrap();
        assert_eq!(after.coins, 5);
        assert_eq!(after.diamonds, before + 3);
        assert!(services.exchange_coins(&alice, 5).await.is_err());

        assert!(services.grant_diamonds(&alice, &alice, 10).await.is_err());
        services
            .update_user(&admin, |u| {
                u.is_admin = true;
                Ok(())
            })
            .await
            .unwrap();
        let granted = services.grant_diamonds(&admin, &alice, 10).await.unwrap();
        assert_eq!(granted.diamonds, before + 13);
    }
}
