//! Session reset lifecycle — daily + idle with per-kind and per-transport
//! overrides.
//!
//! Staleness is evaluated on every inbound message.  If the session is stale
//! (crossed the daily boundary or exceeded the idle timeout), the store
//! archives the old entry and mints a new session ID for the same key.

use chrono::{DateTime, Utc};

use cb_domain::config::{InboundMetadata, LifecycleConfig};

use crate::store::SessionEntry;

/// Reason a session was reset, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetReason {
    DailyReset { hour: u8 },
    IdleTimeout { idle_minutes: u32 },
    Manual,
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyReset { hour } => write!(f, "daily reset (hour={hour})"),
            Self::IdleTimeout { idle_minutes } => {
                write!(f, "idle timeout ({idle_minutes}m)")
            }
            Self::Manual => write!(f, "manual reset"),
        }
    }
}

/// Evaluates whether a session should be reset.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    /// Evaluate whether the given session is stale at `now`.
    /// Returns `Some(reason)` if a reset is needed.
    pub fn should_reset(
        &self,
        entry: &SessionEntry,
        meta: &InboundMetadata,
        now: DateTime<Utc>,
    ) -> Option<ResetReason> {
        let transport = meta.transport.as_deref().unwrap_or("default");
        let (daily_hour, idle_mins) = self.config.resolve(meta.chat_kind, transport);

        // Daily boundary first.
        if let Some(hour) = daily_hour {
            if crossed_daily_boundary(entry.last_message_at, now, hour) {
                return Some(ResetReason::DailyReset { hour });
            }
        }

        if let Some(idle) = idle_mins {
            let elapsed = now.signed_duration_since(entry.last_message_at).num_minutes();
            if elapsed >= i64::from(idle) {
                return Some(ResetReason::IdleTimeout { idle_minutes: idle });
            }
        }

        None
    }
}

/// Check whether the daily boundary at `hour:00` UTC was crossed between
/// `last_active` and `now`.
fn crossed_daily_boundary(last_active: DateTime<Utc>, now: DateTime<Utc>, hour: u8) -> bool {
    // If less than a minute has passed, no reset.
    if now.signed_duration_since(last_active).num_seconds() < 60 {
        return false;
    }

    // Find the most recent reset boundary at `hour:00` before `now`.
    let Some(today_boundary) = now.date_naive().and_hms_opt(u32::from(hour), 0, 0) else {
        // hour >= 24: invalid configuration — treat as no boundary crossed.
        return false;
    };
    let today_boundary = today_boundary.and_utc();

    let boundary = if now >= today_boundary {
        today_boundary
    } else {
        today_boundary - chrono::Duration::days(1)
    };

    last_active < boundary && now >= boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionOrigin;
    use cb_domain::message::ChatKind;
    use chrono::TimeZone;

    fn entry_at(last: DateTime<Utc>) -> SessionEntry {
        let mut e = SessionEntry::new("k", SessionOrigin::default());
        e.created_at = last - chrono::Duration::hours(2);
        e.updated_at = last;
        e.last_message_at = last;
        e
    }

    fn dm_meta() -> InboundMetadata {
        InboundMetadata {
            transport: Some("telegram".into()),
            chat_kind: ChatKind::Direct,
            ..Default::default()
        }
    }

    #[test]
    fn daily_boundary_crossed() {
        let last = Utc.with_ymd_and_hms(2026, 1, 15, 3, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 5, 0, 0).unwrap();
        assert!(crossed_daily_boundary(last, now, 4));
    }

    #[test]
    fn daily_boundary_not_crossed() {
        // Both after today's boundary.
        let last = Utc.with_ymd_and_hms(2026, 1, 15, 5, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 6, 0, 0).unwrap();
        assert!(!crossed_daily_boundary(last, now, 4));
    }

    #[test]
    fn daily_boundary_across_days() {
        let last = Utc.with_ymd_and_hms(2026, 1, 14, 23, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 5, 0, 0).unwrap();
        assert!(crossed_daily_boundary(last, now, 4));
    }

    #[test]
    fn sub_minute_gap_never_resets() {
        let last = Utc.with_ymd_and_hms(2026, 1, 15, 3, 59, 50).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 10).unwrap();
        assert!(!crossed_daily_boundary(last, now, 4));
    }

    #[test]
    fn idle_timeout_fires() {
        let cfg = LifecycleConfig {
            daily_reset_hour: None,
            idle_minutes: Some(30),
            ..Default::default()
        };
        let mgr = LifecycleManager::new(cfg);
        let now = Utc::now();
        let entry = entry_at(now - chrono::Duration::minutes(45));
        let reason = mgr.should_reset(&entry, &dm_meta(), now);
        assert_eq!(reason, Some(ResetReason::IdleTimeout { idle_minutes: 30 }));
    }

    #[test]
    fn active_session_not_stale() {
        let cfg = LifecycleConfig {
            daily_reset_hour: None,
            idle_minutes: Some(30),
            ..Default::default()
        };
        let mgr = LifecycleManager::new(cfg);
        let now = Utc::now();
        let entry = entry_at(now - chrono::Duration::minutes(5));
        assert_eq!(mgr.should_reset(&entry, &dm_meta(), now), None);
    }

    #[test]
    fn no_policy_means_never_stale() {
        let mgr = LifecycleManager::new(LifecycleConfig::default());
        let now = Utc::now();
        let entry = entry_at(now - chrono::Duration::days(90));
        assert_eq!(mgr.should_reset(&entry, &dm_meta(), now), None);
    }
}
