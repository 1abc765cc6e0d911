//! Wall clock in the millisecond form stored on documents.
use chrono::Utc;
use voiceroom_common::Millis;

pub fn now_ms() -> Millis {
    Utc::now().timestamp_millis()
}

/// `now + secs`, saturating instead of overflowing.
pub fn after_secs(now: Millis, secs: u64) -> Millis {
    let ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
    now.saturating_add(ms)
}
