//! Channel routing: apply per-chat config and the ordered rule list to
//! decide where a message goes.
//!
//! Rules are kept in a copy-on-write list sorted by descending priority
//! (stable for equal priorities, so insertion order breaks ties).  Routing
//! short-circuits on the first matched `block` rule; otherwise matched rules
//! accumulate — target agent is last-writer-wins, forwards append, and
//! transforms left-fold over the text.

pub mod channel;
pub mod rules;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;

use cb_domain::message::ChatKind;
use cb_domain::trace::TraceEvent;
use cb_domain::Result;

pub use channel::ChannelConfig;
pub use rules::{RouteRule, RuleTransform};

/// Per-channel forward delivery callback.
pub type ForwardHandler =
    Arc<dyn Fn(String, Option<String>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Outcome of routing one message.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub processed: bool,
    pub blocked: bool,
    pub target_agent: Option<String>,
    pub transformed_text: String,
    pub forwards: Vec<String>,
}

impl RouteDecision {
    fn blocked(text: &str) -> Self {
        Self {
            processed: false,
            blocked: true,
            target_agent: None,
            transformed_text: text.to_owned(),
            forwards: Vec::new(),
        }
    }
}

/// Result of a forward fan-out.  Never raises; per-target diagnosis only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ForwardReport {
    pub success: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct ChannelRouter {
    channels: RwLock<HashMap<String, ChannelConfig>>,
    /// Copy-on-write: reads clone the Arc, writes clone the list and swap.
    rules: RwLock<Arc<Vec<RouteRule>>>,
    handlers: RwLock<HashMap<String, ForwardHandler>>,
    forwarding_enabled: RwLock<bool>,
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            rules: RwLock::new(Arc::new(Vec::new())),
            handlers: RwLock::new(HashMap::new()),
            forwarding_enabled: RwLock::new(true),
        }
    }

    // ── Channel management ───────────────────────────────────────────

    pub fn register_channel(&self, config: ChannelConfig) {
        tracing::info!(chat_id = %config.chat_id, kind = ?config.chat_kind, "channel registered");
        self.channels.write().insert(config.chat_id.clone(), config);
    }

    pub fn channel(&self, chat_id: &str) -> Option<ChannelConfig> {
        self.channels.read().get(chat_id).cloned()
    }

    pub fn update_channel<F>(&self, chat_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ChannelConfig),
    {
        let mut channels = self.channels.write();
        match channels.get_mut(chat_id) {
            Some(config) => {
                f(config);
                true
            }
            None => false,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    // ── Rules ────────────────────────────────────────────────────────

    /// Add a rule.  The list is re-sorted by descending priority with a
    /// stable sort, so rules of equal priority keep insertion order.
    pub fn add_rule(&self, rule: RouteRule) {
        let mut guard = self.rules.write();
        let mut next: Vec<RouteRule> = guard.as_ref().clone();
        next.push(rule);
        next.sort_by_key(|r| std::cmp::Reverse(r.priority));
        *guard = Arc::new(next);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut guard = self.rules.write();
        let before = guard.len();
        let next: Vec<RouteRule> = guard
            .as_ref()
            .iter()
            .filter(|r| r.name != name)
            .cloned()
            .collect();
        let removed = next.len() < before;
        *guard = Arc::new(next);
        removed
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Route one message.  See module docs for the accumulation semantics.
    pub fn route(
        &self,
        chat_id: &str,
        chat_kind: ChatKind,
        text: &str,
        command: Option<&str>,
    ) -> RouteDecision {
        // Lazily materialize the channel config and bump activity counters.
        let config = {
            let mut channels = self.channels.write();
            let config = channels
                .entry(chat_id.to_owned())
                .or_insert_with(|| ChannelConfig::new(chat_id, chat_kind));
            config.last_activity = Some(Utc::now());
            config.message_count += 1;
            config.clone()
        };

        if !config.should_process(text, command) {
            let decision = RouteDecision::blocked(text);
            self.trace(chat_id, &decision);
            return decision;
        }

        let rules = self.rules.read().clone();
        let mut target_agent: Option<String> = None;
        let mut forwards: Vec<String> = Vec::new();
        let mut transformed = text.to_owned();

        for rule in rules.iter() {
            if !rule.matches(chat_id, chat_kind, text, command) {
                continue;
            }

            // Hard block short-circuits; accumulated state is discarded.
            if rule.block {
                let decision = RouteDecision::blocked(text);
                self.trace(chat_id, &decision);
                return decision;
            }

            if let Some(agent) = &rule.target_agent {
                target_agent = Some(agent.clone());
            }
            forwards.extend(rule.forward_to.iter().cloned());

            if let Some(transform) = &rule.transform {
                match transform.apply(&transformed) {
                    Ok(next) => transformed = next,
                    Err(e) => {
                        // Skip the failing rule; prior rules' work is kept.
                        tracing::warn!(rule = %rule.name, error = %e, "rule transform failed, skipping");
                    }
                }
            }
        }

        if target_agent.is_none() {
            target_agent = config.assigned_agent.clone();
        }

        if *self.forwarding_enabled.read() {
            forwards.extend(config.forward_to.iter().cloned());
        }

        let decision = RouteDecision {
            processed: true,
            blocked: false,
            target_agent,
            transformed_text: transformed,
            forwards: dedupe_preserving_order(forwards),
        };
        self.trace(chat_id, &decision);
        decision
    }

    fn trace(&self, chat_id: &str, decision: &RouteDecision) {
        TraceEvent::RouteDecided {
            chat_id: chat_id.to_owned(),
            blocked: decision.blocked,
            target_agent: decision.target_agent.clone(),
            forwards: decision.forwards.len(),
        }
        .emit();
    }

    // ── Forwarding ───────────────────────────────────────────────────

    pub fn register_handler(&self, chat_id: &str, handler: ForwardHandler) {
        self.handlers.write().insert(chat_id.to_owned(), handler);
    }

    pub fn remove_handler(&self, chat_id: &str) -> bool {
        self.handlers.write().remove(chat_id).is_some()
    }

    pub fn set_forwarding_enabled(&self, enabled: bool) {
        *self.forwarding_enabled.write() = enabled;
    }

    /// Deliver `text` to each target's registered handler.  Never raises;
    /// targets without a handler or with a failing handler land in `failed`.
    pub async fn forward(
        &self,
        text: &str,
        targets: &[String],
        source: Option<&str>,
    ) -> ForwardReport {
        let mut report = ForwardReport::default();
        for target in targets {
            let handler = self.handlers.read().get(target).cloned();
            match handler {
                Some(handler) => {
                    match handler(text.to_owned(), source.map(ToOwned::to_owned)).await {
                        Ok(()) => report.success.push(target.clone()),
                        Err(e) => {
                            tracing::error!(target, error = %e, "forward failed");
                            report.failed.push((target.clone(), e.to_string()));
                        }
                    }
                }
                None => report.failed.push((target.clone(), "no handler".into())),
            }
        }
        report
    }
}

fn dedupe_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}
