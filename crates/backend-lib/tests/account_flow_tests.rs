//! Accounts, wallet and persistence through the journal.
mod common;

use std::net::IpAddr;

use backend_lib::error::AppError;
use common::{open_state, register, setup_test_env, test_settings};
use voiceroom_common::{RuleViolation, Slot};

#[tokio::test]
async fn test_unaffordable_purchase_changes_nothing() {
    let (state, _dir) = setup_test_env(test_settings()).await;
    let buyer = register(&state, "buyer").await;

    let err = state.services.purchase_item(&buyer, "frame-gold").await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Rule(RuleViolation::InsufficientFunds { needed: 300, available: 100 })
    ));
    let account = state.services.account(&buyer).await.unwrap();
    assert_eq!(account.diamonds, 100);
    assert!(account.inventory.is_empty());

    let account = state.services.purchase_item(&buyer, "badge-star").await.unwrap();
    assert_eq!(account.diamonds, 0);
    let account = state.services.equip_item(&buyer, "badge-star").await.unwrap();
    assert_eq!(account.equipped.get(&Slot::Badge).map(String::as_str), Some("badge-star"));
}

#[tokio::test]
async fn test_login_locks_out_after_repeated_failures() {
    let mut settings = test_settings();
    settings.rate_limit.login_max_attempts = 3;
    let (state, _dir) = setup_test_env(settings).await;
    register(&state, "carol").await;
    let ip: IpAddr = "10.0.0.9".parse().unwrap();

    for _ in 0..3 {
        let err = state.services.login("carol", "wrong pass 1", ip).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPassword));
    }
    let err = state.services.login("carol", "password 123", ip).await.unwrap_err();
    assert!(matches!(err, AppError::AuthRateLimited));

    let other: IpAddr = "10.0.0.10".parse().unwrap();
    assert!(state.services.login("carol", "password 123", other).await.is_ok());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let (state, dir) = setup_test_env(test_settings()).await;
    let host = register(&state, "host").await;
    let room = state.services.create_room(&host, "Lounge", None).await.unwrap();
    state
        .services
        .send_room_message(&host, &room.id, "still here")
        .await
        .unwrap_err();
    state.services.join_room(&host, &room.id).await.unwrap();
    state
        .services
        .send_room_message(&host, &room.id, "still here")
        .await
        .unwrap();
    drop(state);

    let state = open_state(&dir, test_settings()).await;
    let (room, viewers) = state.services.room_snapshot(&room.id).await.unwrap();
    assert_eq!(viewers, 0);
    assert_eq!(room.seat_of(&host), Some(0));
    let history = state.services.room_history(&room.id).await.unwrap();
    assert_eq!(history.last().map(|m| m.text.as_str()), Some("still here"));

    let ip: IpAddr = "127.0.0.1".parse().unwrap();
    let (_, user) = state.services.login("host", "password 123", ip).await.unwrap();
    assert_eq!(user.id, host);
    assert_eq!(state.services.list_gifts().await.unwrap().len(), 4);
}
