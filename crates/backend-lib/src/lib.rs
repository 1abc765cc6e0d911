// ============================
// voiceroom-backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the `VoiceRoom` WebSocket server.

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod middleware;
pub mod service;
pub mod store;
pub mod time;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Settings;
use crate::error::AppError;
use crate::middleware::rate_limit::RateLimitEntry;
use crate::service::Services;
use crate::store::Storage;

/// Application state shared across all handlers
pub struct AppState<S> {
    /// Service layer over the document store
    pub services: Services<S>,
    /// Settings the services were built with
    pub settings: Arc<Settings>,
    /// Per-client HTTP request windows
    pub rate_limits: DashMap<String, RateLimitEntry>,
}

impl<S: Storage + 'static> AppState<S> {
    /// Create a new application state. Must be called inside a tokio runtime.
    pub fn new(storage: S, settings: Settings) -> Result<Self, AppError> {
        Ok(Self::from_services(Services::new(storage, settings)?))
    }

    pub fn from_services(services: Services<S>) -> Self {
        Self {
            settings: Arc::clone(&services.settings),
            services,
            rate_limits: DashMap::new(),
        }
    }
}
