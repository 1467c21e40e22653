//! Gateway access locks.
//!
//! Three scopes: global, per-user, per-group, plus IP black/whitelists and
//! an allow-during-lock bypass set.  A lock with an auto-release time in the
//! past is treated as released on read.  Evaluation is deny-biased; global
//! admins are checked by the caller before this chain.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use cb_domain::config::AccessConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lock state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a lock was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Manual,
    RateLimit,
    Security,
    Maintenance,
    Emergency,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::RateLimit => "rate_limit",
            Self::Security => "security",
            Self::Maintenance => "maintenance",
            Self::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

/// One lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockState {
    pub active: bool,
    pub reason: LockReason,
    /// User-visible message shown on denial.
    pub message: String,
    pub locked_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    /// Treated as released once this time passes.
    pub auto_release: Option<DateTime<Utc>>,
}

impl LockState {
    fn new(
        reason: LockReason,
        message: String,
        locked_by: Option<String>,
        duration: Option<Duration>,
    ) -> Self {
        Self {
            active: true,
            reason,
            message,
            locked_at: Utc::now(),
            locked_by,
            auto_release: duration.map(|d| Utc::now() + d),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.auto_release {
            Some(at) => now < at,
            None => true,
        }
    }
}

/// A lock history event, kept in a bounded ring.
#[derive(Debug, Clone, Serialize)]
pub struct LockEvent {
    pub at: DateTime<Utc>,
    pub action: &'static str,
    pub target: String,
    pub reason: Option<LockReason>,
    pub by: Option<String>,
}

const HISTORY_CAP: usize = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AccessLock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AccessLock {
    global: RwLock<Option<LockState>>,
    users: RwLock<HashMap<String, LockState>>,
    groups: RwLock<HashMap<String, LockState>>,
    ip_blacklist: RwLock<HashSet<String>>,
    ip_whitelist: RwLock<HashSet<String>>,
    allowed_during_lock: RwLock<HashSet<String>>,
    history: Mutex<Vec<LockEvent>>,
}

impl AccessLock {
    pub fn from_config(config: &AccessConfig) -> Self {
        Self {
            global: RwLock::new(None),
            users: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            ip_blacklist: RwLock::new(config.ip_blacklist.clone()),
            ip_whitelist: RwLock::new(config.ip_whitelist.clone()),
            allowed_during_lock: RwLock::new(HashSet::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    // ── Global lock ──────────────────────────────────────────────────

    pub fn lock(
        &self,
        reason: LockReason,
        message: &str,
        duration: Option<Duration>,
        locked_by: Option<&str>,
    ) -> LockState {
        let state = LockState::new(
            reason,
            message.to_owned(),
            locked_by.map(ToOwned::to_owned),
            duration,
        );
        *self.global.write() = Some(state.clone());
        self.log("lock", "global", Some(reason), locked_by);
        tracing::warn!(%reason, message, "gateway locked");
        state
    }

    pub fn unlock(&self, unlocked_by: Option<&str>) -> bool {
        let was_locked = self.global.write().take().is_some();
        if was_locked {
            self.log("unlock", "global", None, unlocked_by);
            tracing::info!("gateway unlocked");
        }
        was_locked
    }

    pub fn is_locked(&self) -> bool {
        self.global
            .read()
            .as_ref()
            .is_some_and(LockState::is_active)
    }

    pub fn global_state(&self) -> Option<LockState> {
        self.global.read().clone()
    }

    /// Emergency lockdown: global lock with no auto-release.
    pub fn emergency_lockdown(&self, locked_by: Option<&str>) -> LockState {
        self.lock(
            LockReason::Emergency,
            "Emergency lockdown activated. Bot is temporarily unavailable.",
            None,
            locked_by,
        )
    }

    /// Maintenance mode with auto-release.
    pub fn maintenance(&self, duration: Duration, locked_by: Option<&str>) -> LockState {
        self.lock(
            LockReason::Maintenance,
            "Bot is under maintenance. Please try again later.",
            Some(duration),
            locked_by,
        )
    }

    // ── User & group locks ───────────────────────────────────────────

    pub fn lock_user(
        &self,
        user_id: &str,
        reason: LockReason,
        message: &str,
        duration: Option<Duration>,
    ) -> LockState {
        let state = LockState::new(reason, message.to_owned(), None, duration);
        self.users.write().insert(user_id.to_owned(), state.clone());
        self.log("lock", &format!("user:{user_id}"), Some(reason), None);
        state
    }

    pub fn unlock_user(&self, user_id: &str) -> bool {
        let removed = self.users.write().remove(user_id).is_some();
        if removed {
            self.log("unlock", &format!("user:{user_id}"), None, None);
        }
        removed
    }

    pub fn is_user_locked(&self, user_id: &str) -> bool {
        let mut users = self.users.write();
        match users.get(user_id) {
            Some(lock) if lock.is_active() => true,
            Some(_) => {
                // Auto-release expired; drop the record.
                users.remove(user_id);
                false
            }
            None => false,
        }
    }

    pub fn lock_group(
        &self,
        group_id: &str,
        reason: LockReason,
        message: &str,
        duration: Option<Duration>,
    ) -> LockState {
        let state = LockState::new(reason, message.to_owned(), None, duration);
        self.groups
            .write()
            .insert(group_id.to_owned(), state.clone());
        self.log("lock", &format!("group:{group_id}"), Some(reason), None);
        state
    }

    pub fn unlock_group(&self, group_id: &str) -> bool {
        self.groups.write().remove(group_id).is_some()
    }

    pub fn is_group_locked(&self, group_id: &str) -> bool {
        let mut groups = self.groups.write();
        match groups.get(group_id) {
            Some(lock) if lock.is_active() => true,
            Some(_) => {
                groups.remove(group_id);
                false
            }
            None => false,
        }
    }

    // ── Lock bypass & IPs ────────────────────────────────────────────

    pub fn allow_during_lock(&self, user_id: &str) {
        self.allowed_during_lock.write().insert(user_id.to_owned());
    }

    pub fn disallow_during_lock(&self, user_id: &str) {
        self.allowed_during_lock.write().remove(user_id);
    }

    pub fn blacklist_ip(&self, ip: &str) {
        self.ip_blacklist.write().insert(ip.to_owned());
        self.ip_whitelist.write().remove(ip);
    }

    pub fn whitelist_ip(&self, ip: &str) {
        self.ip_whitelist.write().insert(ip.to_owned());
        self.ip_blacklist.write().remove(ip);
    }

    // ── Access evaluation ────────────────────────────────────────────

    /// Deny-biased access check.
    ///
    /// Order: IP blacklist → IP whitelist (non-membership denies when the
    /// whitelist is configured) → per-user lock → per-group lock → global
    /// lock (bypassed only by the allow-during-lock set).  Returns the
    /// triggering rule on denial.
    pub fn can_access(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        ip: Option<&str>,
    ) -> (bool, String) {
        if let Some(ip) = ip {
            if self.ip_blacklist.read().contains(ip) {
                return (false, "IP address is blacklisted".into());
            }
            let whitelist = self.ip_whitelist.read();
            if !whitelist.is_empty() && !whitelist.contains(ip) {
                return (false, "IP address not in whitelist".into());
            }
        }

        if self.is_user_locked(user_id) {
            let message = self
                .users
                .read()
                .get(user_id)
                .map(|l| l.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Your access has been restricted".into());
            return (false, message);
        }

        if let Some(gid) = group_id {
            if self.is_group_locked(gid) {
                let message = self
                    .groups
                    .read()
                    .get(gid)
                    .map(|l| l.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "This group has been restricted".into());
                return (false, message);
            }
        }

        if self.is_locked() {
            if self.allowed_during_lock.read().contains(user_id) {
                return (true, String::new());
            }
            let message = self
                .global
                .read()
                .as_ref()
                .map(|l| l.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Bot is currently locked".into());
            return (false, message);
        }

        (true, String::new())
    }

    // ── History ──────────────────────────────────────────────────────

    fn log(&self, action: &'static str, target: &str, reason: Option<LockReason>, by: Option<&str>) {
        let mut history = self.history.lock();
        history.push(LockEvent {
            at: Utc::now(),
            action,
            target: target.to_owned(),
            reason,
            by: by.map(ToOwned::to_owned),
        });
        if history.len() > HISTORY_CAP {
            let overflow = history.len() - HISTORY_CAP;
            history.drain(..overflow);
        }
    }

    pub fn history(&self, limit: usize) -> Vec<LockEvent> {
        let history = self.history.lock();
        history.iter().rev().take(limit).rev().cloned().collect()
    }
}
