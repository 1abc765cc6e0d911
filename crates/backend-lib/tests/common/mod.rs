//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use backend_lib::{
    config::Settings,
    service::{ScriptedHost, Services},
    store::FlatFileStorage,
    AppState,
};
use tempfile::TempDir;

/// Settings tuned for tests: cheap password hashing and eager retries
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.password_log_n = 10;
    settings.store.txn_max_attempts = 500;
    settings.store.txn_base_delay_ms = 0;
    settings.store.txn_max_delay_ms = 1;
    settings
}

/// State over a journal in a fresh temp dir. Keep the `TempDir` alive for the test.
pub async fn setup_test_env(settings: Settings) -> (Arc<AppState<FlatFileStorage>>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let state = open_state(&temp_dir, settings).await;
    (state, temp_dir)
}

/// Open (or reopen) the journal in `dir`
pub async fn open_state(dir: &TempDir, settings: Settings) -> Arc<AppState<FlatFileStorage>> {
    let storage = FlatFileStorage::new(dir.path()).unwrap();
    let services = Services::with_ai_host(storage, settings, Box::new(ScriptedHost));
    services.seed_catalog().await.unwrap();
    Arc::new(AppState::from_services(services))
}

/// Register `username` with the shared test password and return its id
pub async fn register(state: &AppState<FlatFileStorage>, username: &str) -> String {
    let (_, user) = state
        .services
        .register(username, "password 123", &username.to_uppercase())
        .await
        .unwrap();
    user.id
}
