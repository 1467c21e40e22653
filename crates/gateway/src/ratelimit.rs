//! Per-user token-bucket rate limiting.
//!
//! One bucket per (canonical user, kind).  Refill is continuous at
//! `capacity / window` and clamped to the burst capacity.  Evaluation order
//! inside one check: explicit block → cooldown → refill → bucket test.
//!
//! Buckets operate on an explicit seconds timeline (`check_at`) so the
//! arithmetic is testable; `check` supplies wall time.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use cb_domain::config::{LimitRule, RateLimitConfig};
use cb_domain::trace::TraceEvent;
use cb_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds & defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resource kinds with independent buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Requests,
    Tokens,
    Commands,
    Uploads,
    Websocket,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Tokens => "tokens",
            Self::Commands => "commands",
            Self::Uploads => "uploads",
            Self::Websocket => "websocket",
        }
    }

    const ALL: [LimitKind; 5] = [
        Self::Requests,
        Self::Tokens,
        Self::Commands,
        Self::Uploads,
        Self::Websocket,
    ];
}

fn default_rules() -> HashMap<LimitKind, LimitRule> {
    let mut rules = HashMap::new();
    rules.insert(
        LimitKind::Requests,
        LimitRule {
            capacity: 60,
            window_secs: 60,
            burst: Some(10),
            cooldown_secs: 0,
        },
    );
    rules.insert(
        LimitKind::Tokens,
        LimitRule {
            capacity: 100_000,
            window_secs: 3600,
            burst: None,
            cooldown_secs: 0,
        },
    );
    rules.insert(
        LimitKind::Commands,
        LimitRule {
            capacity: 30,
            window_secs: 60,
            burst: Some(5),
            cooldown_secs: 0,
        },
    );
    rules.insert(
        LimitKind::Uploads,
        LimitRule {
            capacity: 10,
            window_secs: 300,
            burst: None,
            cooldown_secs: 0,
        },
    );
    rules.insert(
        LimitKind::Websocket,
        LimitRule {
            capacity: 100,
            window_secs: 60,
            burst: None,
            cooldown_secs: 0,
        },
    );
    rules
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result & bucket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// Seconds-since-epoch when the bucket is expected to be usable again.
    pub reset_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_update: f64,
    cooldown_until: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RateLimiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RateLimiter {
    rules: RwLock<HashMap<LimitKind, LimitRule>>,
    /// (user, kind) → bucket.  Buckets are cheap and never deleted.
    buckets: Mutex<HashMap<(String, LimitKind), Bucket>>,
    /// user → blocked-until (seconds since epoch).  Denies all kinds.
    blocked: Mutex<HashMap<String, f64>>,
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut rules = default_rules();
        for (tag, rule) in &config.rules {
            let kind = match tag.as_str() {
                "requests" => LimitKind::Requests,
                "tokens" => LimitKind::Tokens,
                "commands" => LimitKind::Commands,
                "uploads" => LimitKind::Uploads,
                "websocket" => LimitKind::Websocket,
                other => {
                    tracing::warn!(kind = other, "unknown rate-limit kind in config, ignoring");
                    continue;
                }
            };
            rules.insert(kind, *rule);
        }
        Self {
            rules: RwLock::new(rules),
            buckets: Mutex::new(HashMap::new()),
            blocked: Mutex::new(HashMap::new()),
        }
    }

    /// Override a rule at runtime.
    pub fn set_rule(&self, kind: LimitKind, rule: LimitRule) {
        self.rules.write().insert(kind, rule);
    }

    /// Check and consume `cost` tokens using wall time.
    pub fn check(&self, user_id: &str, kind: LimitKind, cost: u32) -> RateLimitResult {
        self.check_at(user_id, kind, cost, epoch_secs())
    }

    /// Check and consume at an explicit point on the seconds timeline.
    pub fn check_at(&self, user_id: &str, kind: LimitKind, cost: u32, now: f64) -> RateLimitResult {
        let rule = match self.rules.read().get(&kind) {
            Some(rule) => *rule,
            None => {
                return RateLimitResult {
                    allowed: true,
                    remaining: u32::MAX,
                    reset_at: now,
                    retry_after: None,
                    limit: u32::MAX,
                }
            }
        };

        // 1. Explicit block denies every kind until expiry.
        {
            let mut blocked = self.blocked.lock();
            if let Some(&until) = blocked.get(user_id) {
                if now < until {
                    return denial(&rule, 0.0, until - now, until);
                }
                blocked.remove(user_id);
            }
        }

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((user_id.to_owned(), kind))
            .or_insert_with(|| Bucket {
                tokens: f64::from(rule.burst_capacity()),
                last_update: now,
                cooldown_until: 0.0,
            });

        // 2. A request during cooldown is denied without refill.
        if now < bucket.cooldown_until {
            let retry = bucket.cooldown_until - now;
            return denial(&rule, bucket.tokens, retry, bucket.cooldown_until);
        }

        // 3. Refill, clamped to burst capacity.
        let elapsed = (now - bucket.last_update).max(0.0);
        bucket.tokens =
            (bucket.tokens + elapsed * rule.rate()).min(f64::from(rule.burst_capacity()));
        bucket.last_update = now;

        // 4. Bucket test.
        if bucket.tokens >= f64::from(cost) {
            bucket.tokens -= f64::from(cost);
            RateLimitResult {
                allowed: true,
                remaining: bucket.tokens as u32,
                reset_at: now + f64::from(rule.window_secs),
                retry_after: None,
                limit: rule.capacity,
            }
        } else {
            if rule.cooldown_secs > 0 {
                bucket.cooldown_until = now + f64::from(rule.cooldown_secs);
            }
            let retry = (f64::from(cost) - bucket.tokens) / rule.rate();
            let result = denial(&rule, bucket.tokens, retry, now + retry);
            drop(buckets);
            TraceEvent::RateLimited {
                user_id: user_id.to_owned(),
                kind: kind.as_str().to_owned(),
                retry_after: retry,
            }
            .emit();
            result
        }
    }

    /// Check and convert a denial into [`Error::RateLimitExceeded`] so
    /// callers can surface a deterministic user-visible delay.
    pub fn enforce(&self, user_id: &str, kind: LimitKind, cost: u32) -> Result<RateLimitResult> {
        let result = self.check(user_id, kind, cost);
        if result.allowed {
            Ok(result)
        } else {
            Err(Error::RateLimitExceeded {
                retry_after: result.retry_after.unwrap_or_default(),
            })
        }
    }

    // ── Blocks ───────────────────────────────────────────────────────

    /// Temporarily deny all kinds for a user.
    pub fn block_user(&self, user_id: &str, seconds: u32) {
        self.block_user_at(user_id, seconds, epoch_secs());
        tracing::warn!(user_id, seconds, "user temporarily blocked");
    }

    pub fn block_user_at(&self, user_id: &str, seconds: u32, now: f64) {
        self.blocked
            .lock()
            .insert(user_id.to_owned(), now + f64::from(seconds));
    }

    pub fn unblock_user(&self, user_id: &str) {
        self.blocked.lock().remove(user_id);
    }

    pub fn is_blocked(&self, user_id: &str) -> bool {
        let mut blocked = self.blocked.lock();
        match blocked.get(user_id) {
            Some(&until) if epoch_secs() < until => true,
            Some(_) => {
                blocked.remove(user_id);
                false
            }
            None => false,
        }
    }

    /// Drop every bucket and block for a user.
    pub fn reset_user(&self, user_id: &str) {
        self.buckets.lock().retain(|(uid, _), _| uid != user_id);
        self.blocked.lock().remove(user_id);
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Per-kind snapshot for a user, refilled to `now` without consuming.
    pub fn status(&self, user_id: &str) -> HashMap<&'static str, RateLimitResult> {
        let now = epoch_secs();
        let rules = self.rules.read().clone();
        let mut buckets = self.buckets.lock();
        let mut out = HashMap::new();

        for kind in LimitKind::ALL {
            let Some(rule) = rules.get(&kind) else {
                continue;
            };
            let bucket = buckets
                .entry((user_id.to_owned(), kind))
                .or_insert_with(|| Bucket {
                    tokens: f64::from(rule.burst_capacity()),
                    last_update: now,
                    cooldown_until: 0.0,
                });
            let elapsed = (now - bucket.last_update).max(0.0);
            let tokens =
                (bucket.tokens + elapsed * rule.rate()).min(f64::from(rule.burst_capacity()));
            out.insert(
                kind.as_str(),
                RateLimitResult {
                    allowed: tokens >= 1.0,
                    remaining: tokens as u32,
                    reset_at: bucket.last_update + f64::from(rule.window_secs),
                    retry_after: None,
                    limit: rule.capacity,
                },
            );
        }
        out
    }
}

fn denial(rule: &LimitRule, tokens: f64, retry_after: f64, reset_at: f64) -> RateLimitResult {
    RateLimitResult {
        allowed: false,
        remaining: tokens as u32,
        reset_at,
        retry_after: Some(retry_after),
        limit: rule.capacity,
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
