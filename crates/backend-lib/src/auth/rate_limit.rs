// ============================
// crates/backend-lib/src/auth/rate_limit.rs
// ============================
//! Rate limiting for authentication attempts.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::RateLimitSettings;

/// Failure records older than this are forgotten by [`AuthRateLimiter::cleanup`]
const FAILURE_MEMORY: Duration = Duration::from_secs(24 * 60 * 60);

/// Entry in the rate limit map
#[derive(Debug, Clone)]
struct RateLimitEntry {
    failed_attempts: u32,
    last_failure: Instant,
    /// Set while the IP is locked out
    lockout_expiry: Option<Instant>,
}

/// Per-IP lockout after repeated failed logins
#[derive(Debug, Clone)]
pub struct AuthRateLimiter {
    attempts: Arc<DashMap<IpAddr, RateLimitEntry>>,
    max_attempts: u32,
    lockout_duration: Duration,
}

impl AuthRateLimiter {
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts,
            lockout_duration,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.login_max_attempts,
            Duration::from_secs(settings.login_lockout_secs),
        )
    }

    /// Record a failed authentication attempt
    pub fn record_failed_attempt(&self, ip: IpAddr) {
        let now = Instant::now();

        let mut entry = self.attempts.entry(ip).or_insert_with(|| RateLimitEntry {
            failed_attempts: 0,
            last_failure: now,
            lockout_expiry: None,
        });

        // an expired lockout starts a fresh count
        if entry.lockout_expiry.is_some_and(|expiry| now >= expiry) {
            entry.failed_attempts = 0;
            entry.lockout_expiry = None;
        }

        entry.failed_attempts += 1;
        entry.last_failure = now;

        if entry.failed_attempts >= self.max_attempts && entry.lockout_expiry.is_none() {
            entry.lockout_expiry = Some(now + self.lockout_duration);
            warn!(%ip, attempts = entry.failed_attempts, "IP locked out after failed logins");
        }
    }

    /// Record a successful authentication
    pub fn record_success(&self, ip: IpAddr) {
        self.attempts.remove(&ip);
    }

    /// Check if an IP is allowed to attempt authentication
    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        match self.attempts.get(&ip) {
            Some(entry) => !entry.lockout_expiry.is_some_and(|expiry| Instant::now() < expiry),
            None => true,
        }
    }

    /// Drop expired lockouts and stale failure records
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.attempts.retain(|_, entry| match entry.lockout_expiry {
            Some(expiry) => now < expiry,
            None => now.duration_since(entry.last_failure) < FAILURE_MEMORY,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    #[test]
    fn test_lockout_after_max_attempts() {
        let limiter = AuthRateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            limiter.record_failed_attempt(IP);
            assert!(limiter.check_rate_limit(IP));
        }
        limiter.record_failed_attempt(IP);
        assert!(!limiter.check_rate_limit(IP));

        // other addresses are unaffected
        assert!(limiter.check_rate_limit(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_success_clears_failures() {
        let limiter = AuthRateLimiter::new(2, Duration::from_secs(60));
        limiter.record_failed_attempt(IP);
        limiter.record_success(IP);
        limiter.record_failed_attempt(IP);
        assert!(limiter.check_rate_limit(IP));
    }

    #[test]
    fn test_lockout_expires() {
        let limiter = AuthRateLimiter::new(1, Duration::from_millis(1));
        limiter.record_failed_attempt(IP);
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check_rate_limit(IP));
        limiter.cleanup();
        assert!(limiter.attempts.is_empty());
    }
}
