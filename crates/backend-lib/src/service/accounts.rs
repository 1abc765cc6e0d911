//! Registration, login, sessions, profiles and the follow graph.
use std::net::IpAddr;

use metrics::counter;
use rand::Rng;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use voiceroom_common::{NotificationKind, PublicProfile, RuleViolation, User, ViewMode};

use super::Services;
use crate::auth::{hash_password_secure, verify_password};
use crate::error::AppError;
use crate::metrics::{AUTH_FAILED, AUTH_LOGIN};
use crate::store::{Credentials, DisplayIdEntry, DocKey, Storage};
use crate::time::now_ms;
use crate::validation;

/// Attempts at drawing an unused display id before giving up
const DISPLAY_ID_ATTEMPTS: usize = 16;

fn random_display_id() -> String {
    rand::rng().random_range(1_000_000..=9_999_999u32).to_string()
}

impl<S: Storage + 'static> Services<S> {
    /// Create an account and open a session for it
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str, display_name: &str) -> Result<(String, User), AppError> {
        validation::validate_username(username)?;
        validation::validate_password(password)?;
        validation::validate_display_name(display_name)?;

        let mut plain = password.to_string();
        let log_n = self.settings.password_log_n;
        let password_hash = tokio::task::spawn_blocking(move || hash_password_secure(&mut plain, log_n))
            .await
            .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let user_id = Uuid::new_v4().to_string();
        let starting_diamonds = self.settings.economy.starting_diamonds;

        for _ in 0..DISPLAY_ID_ATTEMPTS {
            let display_id = random_display_id();
            let keys = vec![
                DocKey::of::<Credentials>(username),
                DocKey::of::<DisplayIdEntry>(&display_id),
                DocKey::of::<User>(&user_id),
            ];
            let created = self
                .db
                .transact(keys, |txn| {
                    if txn.exists::<Credentials>(username)? {
                        return Err(AppError::UsernameTaken);
                    }
                    if txn.exists::<DisplayIdEntry>(&display_id)? {
                        return Ok(None);
                    }
                    let user = User::new(
                        user_id.clone(),
                        username.to_string(),
                        display_id.clone(),
                        display_name.trim().to_string(),
                        starting_diamonds,
                        now_ms(),
                    );
                    txn.put(&Credentials {
                        username: username.to_string(),
                        user_id: user_id.clone(),
                        password_hash: password_hash.clone(),
                    })?;
                    txn.put(&DisplayIdEntry {
                        display_id: display_id.clone(),
                        user_id: user_id.clone(),
                    })?;
                    txn.put(&user)?;
                    Ok(Some(user))
                })
                .await?;

            if let Some(user) = created {
                info!(user_id = %user.id, display_id = %user.display_id, "account registered");
                let token = self.sessions.new_session(&user.id).await;
                return Ok((token, user));
            }
        }
        Err(AppError::Internal("could not allocate a display id".to_string()))
    }

    /// Check credentials and open a session. Failures count against `ip`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str, ip: IpAddr) -> Result<(String, User), AppError> {
        if !self.login_limiter.check_rate_limit(ip) {
            counter!(AUTH_FAILED).increment(1);
            return Err(AppError::AuthRateLimited);
        }

        let credentials: Option<Credentials> = self.db.get(username).await?;
        let verified = match &credentials {
            Some(creds) => {
                let hash = creds.password_hash.clone();
                let plain = password.to_string();
                tokio::task::spawn_blocking(move || verify_password(&hash, &plain))
                    .await
                    .map_err(|e| AppError::Internal(format!("verify task failed: {e}")))?
            },
            None => false,
        };
        let Some(creds) = credentials.filter(|_| verified) else {
            self.login_limiter.record_failed_attempt(ip);
            counter!(AUTH_FAILED).increment(1);
            warn!(%ip, "login failed");
            return Err(AppError::InvalidPassword);
        };

        let user = self.active_user(&creds.user_id).await?;
        self.login_limiter.record_success(ip);
        counter!(AUTH_LOGIN).increment(1);
        let token = self.sessions.new_session(&user.id).await;
        Ok((token, user))
    }

    /// Rebind to an existing session
    pub async fn resume(&self, token: &str) -> Result<User, AppError> {
        let session = self
            .sessions
            .get(token)
            .await
            .ok_or_else(|| AppError::Auth("session expired or unknown".to_string()))?;
        self.active_user(&session.user_id).await
    }

    pub async fn logout(&self, token: &str) {
        self.sessions.revoke(token).await;
    }

    /// The caller's own full account
    pub async fn account(&self, user_id: &str) -> Result<User, AppError> {
        self.db.require(user_id).await
    }

    pub async fn profile(&self, user_id: &str) -> Result<PublicProfile, AppError> {
        let user: User = self.db.require(user_id).await?;
        Ok(PublicProfile::of(&user, now_ms()))
    }

    pub async fn lookup_display_id(&self, display_id: &str) -> Result<PublicProfile, AppError> {
        let entry: DisplayIdEntry = self.db.require(display_id).await?;
        self.profile(&entry.user_id).await
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        display_name: Option<String>,
        avatar_url: Option<String>,
        bio: Option<String>,
    ) -> Result<User, AppError> {
        if let Some(name) = &display_name {
            validation::validate_display_name(name)?;
        }
        if let Some(url) = &avatar_url {
            validation::validate_url(url)?;
        }
        if let Some(bio) = &bio {
            validation::validate_bio(bio)?;
        }
        self.update_user(user_id, |user| {
            if let Some(name) = &display_name {
                user.display_name = name.trim().to_string();
            }
            if avatar_url.is_some() {
                user.avatar_url = avatar_url.clone();
            }
            if let Some(bio) = &bio {
                user.bio = bio.clone();
            }
            Ok(())
        })
        .await
    }

    pub async fn set_view_mode(&self, user_id: &str, mode: ViewMode) -> Result<User, AppError> {
        self.update_user(user_id, |user| {
            user.view_mode = mode;
            Ok(())
        })
        .await
    }

    /// Follow `target`; following twice is a no-op
    #[instrument(skip(self))]
    pub async fn follow(&self, actor: &str, target: &str) -> Result<User, AppError> {
        if actor == target {
            return Err(RuleViolation::SelfTarget.into());
        }
        self.active_user(actor).await?;
        let (me, added) = self
            .db
            .transact(vec![DocKey::of::<User>(actor), DocKey::of::<User>(target)], |txn| {
                let mut me: User = txn.require(actor)?;
                let mut them: User = txn.require(target)?;
                let added = me.following.insert(target.to_string());
                them.followers.insert(actor.to_string());
                if added {
                    txn.put(&me)?;
                    txn.put(&them)?;
                }
                Ok((me, added))
            })
            .await?;
        if added {
            self.notify(target, NotificationKind::Follow, format!("{} started following you", me.display_name))
                .await;
        }
        Ok(me)
    }

    pub async fn unfollow(&self, actor: &str, target: &str) -> Result<User, AppError> {
        if actor == target {
            return Err(RuleViolation::SelfTarget.into());
        }
        self.db
            .transact(vec![DocKey::of::<User>(actor), DocKey::of::<User>(target)], |txn| {
                let mut me: User = txn.require(actor)?;
                let mut them: User = txn.require(target)?;
                if me.following.remove(target) {
                    them.followers.remove(actor);
                    txn.put(&me)?;
                    txn.put(&them)?;
                }
                Ok(me)
            })
            .await
    }

    /// Single-document edit of a user
    pub(crate) async fn update_user<F>(&self, user_id: &str, mut edit: F) -> Result<User, AppError>
    where
        F: FnMut(&mut User) -> Result<(), AppError>,
    {
        self.db
            .transact(vec![DocKey::of::<User>(user_id)], |txn| {
                let mut user: User = txn.require(user_id)?;
                if user.suspended {
                    return Err(AppError::Suspended);
                }
                edit(&mut user)?;
                txn.put(&user)?;
                Ok(user)
            })
            .await
    }
}
