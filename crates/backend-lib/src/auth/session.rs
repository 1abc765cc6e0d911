// ============================
// voiceroom-backend-lib/src/auth/session.rs
// ============================
//! Session token handling and management.
use metrics::{counter, gauge};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;
use voiceroom_common::UserId;

const SESSION_CREATED: &str = "session.created";
const SESSION_EXPIRED: &str = "session.expired";
const SESSION_ACTIVE: &str = "session.active";

/// Session information
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
}

/// Session manager for handling authentication tokens
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionManager {
    /// Create a session manager and spawn its cleanup task.
    /// Must be called inside a tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        let manager = SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        };

        let manager_clone = manager.clone();
        tokio::spawn(async move {
            manager_clone.cleanup_task().await;
        });

        manager
    }

    /// Create a new session for `user_id` and return its token
    pub async fn new_session(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(token.clone(), session);

        counter!(SESSION_CREATED).increment(1);
        gauge!(SESSION_ACTIVE).set(sessions.len() as f64);

        token
    }

    /// Get an unexpired session by token
    pub async fn get(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|session| SystemTime::now() < session.expires_at)
            .cloned()
    }

    /// Drop one token
    pub async fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(token).is_some();
        gauge!(SESSION_ACTIVE).set(sessions.len() as f64);
        removed
    }

    /// Drop every token of `user_id`, e.g. on suspension
    pub async fn revoke_user(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.user_id != user_id);
        gauge!(SESSION_ACTIVE).set(sessions.len() as f64);
        before - sessions.len()
    }

    /// Remove expired sessions; returns how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = SystemTime::now();
        let before_count = sessions.len();
        sessions.retain(|_, session| now < session.expires_at);
        let removed = before_count - sessions.len();
        if removed > 0 {
            counter!(SESSION_EXPIRED).increment(removed as u64);
            gauge!(SESSION_ACTIVE).set(sessions.len() as f64);
        }
        removed
    }

    /// Cleanup task that runs periodically to remove expired sessions
    async fn cleanup_task(&self) {
        let cleanup_interval = self.ttl.min(Duration::from_secs(60 * 60));

        loop {
            tokio::time::sleep(cleanup_interval).await;
            let removed = self.purge_expired().await;
            if removed > 0 {
                debug!(removed, "expired sessions purged");
            }
        }
    }
}
