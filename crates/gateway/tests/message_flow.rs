//! End-to-end pipeline tests: a recording adapter on the bus, a scripted
//! executor behind the bridge, and real policy/session/streaming components
//! in between.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use cb_domain::config::{Config, DmScope, LimitRule};
use cb_domain::message::{
    CanonicalUser, ChatKind, MessageKind, OutgoingMessage, Transport, UnifiedMessage,
};
use cb_domain::stream::{BoxStream, ExecutorOptions, TextDelta};
use cb_domain::Result;
use cb_sessions::{IdentityResolver, LifecycleManager, SessionStore};

use cb_gateway::access::{AccessLock, AuditLog, LockReason, PermissionManager};
use cb_gateway::bus::{ChannelAdapter, DedupeStore, Gateway};
use cb_gateway::executor::Executor;
use cb_gateway::health::{FleetSupervisor, HeartbeatMonitor};
use cb_gateway::lifecycle::Lifecycle;
use cb_gateway::queue::TaskQueue;
use cb_gateway::ratelimit::{LimitKind, RateLimiter};
use cb_gateway::routing::ChannelRouter;
use cb_gateway::runtime::cancel::CancelMap;
use cb_gateway::runtime::session_lock::SessionLockMap;
use cb_gateway::state::AppState;
use cb_gateway::streaming::{DraftStreamer, MessageChunker};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RecordingAdapter {
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().clone()
    }

    /// Draft edits carry an `edit_message_id` marker; everything else is a
    /// plain outbound message.
    fn edits(&self) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.metadata.contains_key("edit_message_id"))
            .collect()
    }

    fn plain(&self) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|m| !m.metadata.contains_key("edit_message_id"))
            .collect()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn transport(&self) -> Transport {
        Transport::Telegram
    }
    async fn start(&self) -> Result<()> {
        Ok(())
    }
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
    async fn send(&self, message: &OutgoingMessage) -> Result<bool> {
        self.sent.lock().push(message.clone());
        Ok(true)
    }
    async fn get_user(&self, _id: &str) -> Option<CanonicalUser> {
        None
    }
}

/// Scripted executor: replies with fixed deltas and records what it saw.
struct ScriptedExecutor {
    deltas: Vec<String>,
    fail: bool,
    runs: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedExecutor {
    fn replying(deltas: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            deltas: deltas.iter().map(|s| s.to_string()).collect(),
            fail: false,
            runs: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            deltas: Vec::new(),
            fail: true,
            runs: Mutex::new(Vec::new()),
        })
    }

    fn runs(&self) -> Vec<(String, Option<String>)> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn create_chat(&self) -> Result<String> {
        Ok("chat-9".into())
    }

    async fn run(
        &self,
        prompt: &str,
        chat_handle: Option<&str>,
        _options: &ExecutorOptions,
    ) -> Result<BoxStream<'static, TextDelta>> {
        self.runs
            .lock()
            .push((prompt.to_owned(), chat_handle.map(ToOwned::to_owned)));

        let deltas = self.deltas.clone();
        let fail = self.fail;
        let stream = async_stream::stream! {
            if fail {
                yield TextDelta::error("executor exploded");
                return;
            }
            for text in deltas {
                yield TextDelta::text(text);
            }
            yield TextDelta::done();
        };
        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
    adapter: Arc<RecordingAdapter>,
    _dir: tempfile::TempDir,
}

fn harness(mut config: Config, executor: Arc<dyn Executor>) -> Harness {
    config.sessions.agent_id = "default".into();
    let config = Arc::new(config);

    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(Gateway::new());
    let adapter = RecordingAdapter::new();
    gateway.register_adapter(adapter.clone());

    let streamer = DraftStreamer::new(config.streaming.clone());
    {
        let gateway = gateway.clone();
        streamer.on_update(Arc::new(move |update| {
            let gateway = gateway.clone();
            Box::pin(async move {
                let mut outgoing =
                    OutgoingMessage::text(&update.chat_id, &update.content);
                outgoing.metadata.insert(
                    "edit_message_id".into(),
                    serde_json::json!(update.message_id),
                );
                gateway.send(&outgoing).await.map(|_| ())
            })
        }));
    }

    let state = AppState {
        config: config.clone(),
        gateway: gateway.clone(),
        executor,
        sessions: Arc::new(SessionStore::new(dir.path()).unwrap()),
        identity: Arc::new(IdentityResolver::from_config(
            &config.sessions.identity_links,
        )),
        reset_lifecycle: Arc::new(LifecycleManager::new(config.sessions.lifecycle.clone())),
        permissions: Arc::new(PermissionManager::from_config(&config.access, None)),
        locks: Arc::new(AccessLock::from_config(&config.access)),
        limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
        audit: Arc::new(AuditLog::new(50)),
        router: Arc::new(ChannelRouter::new()),
        streamer,
        chunker: Arc::new(MessageChunker::new(config.streaming.chunk)),
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        heartbeat: Arc::new(HeartbeatMonitor::new(config.heartbeat)),
        fleet: Arc::new(FleetSupervisor::new(config.fleet.clone())),
        queue: TaskQueue::new(config.queue.clone()),
        lifecycle: Arc::new(Lifecycle::default()),
        dedupe: Arc::new(DedupeStore::new(std::time::Duration::from_secs(3600))),
    };

    {
        let state2 = state.clone();
        gateway.on_message(Arc::new(move |msg| {
            let state = state2.clone();
            Box::pin(async move { cb_gateway::runtime::handle_inbound(state, msg).await })
        }));
    }

    Harness {
        state,
        adapter,
        _dir: dir,
    }
}

fn telegram_dm(id: &str, sender: &str, content: &str) -> UnifiedMessage {
    UnifiedMessage {
        id: id.to_owned(),
        transport: Transport::Telegram,
        kind: MessageKind::Text,
        content: content.to_owned(),
        sender: CanonicalUser {
            transport: Transport::Telegram,
            platform_id: sender.to_owned(),
            username: String::new(),
            display_name: String::new(),
            is_bot: false,
            metadata: HashMap::new(),
        },
        chat_id: sender.to_owned(),
        chat_kind: ChatKind::Direct,
        timestamp: chrono::Utc::now(),
        reply_to: None,
        thread_id: None,
        attachments: Vec::new(),
        metadata: HashMap::new(),
        raw: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn dm_main_scope_reuses_one_session() {
    let mut config = Config::default();
    config.sessions.dm_scope = DmScope::Main;
    let executor = ScriptedExecutor::replying(&["Hello ", "world"]);
    let h = harness(config, executor.clone());

    h.state.gateway.receive(telegram_dm("m1", "42", "hi there")).await;
    h.state.gateway.receive(telegram_dm("m2", "42", "again")).await;

    // Both turns landed on the same main-scope session.
    let session = h.state.sessions.get("agent:default:main").unwrap();
    assert_eq!(session.message_count, 2);
    assert_eq!(h.state.sessions.live_count(), 1);

    // The first run created a chat handle; the second resumed it.
    let runs = executor.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].1.as_deref(), Some("chat-9"));
    assert_eq!(runs[1].1.as_deref(), Some("chat-9"));
    assert_eq!(runs[1].0, "again");

    // The draft's final edit carries the full reply.
    let edits = h.adapter.edits();
    let final_edit = edits.last().unwrap();
    assert_eq!(final_edit.content, "Hello world");
}

#[tokio::test]
async fn per_peer_scope_isolates_users() {
    let mut config = Config::default();
    config.sessions.dm_scope = DmScope::PerPeer;
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(config, executor);

    h.state.gateway.receive(telegram_dm("m1", "alice", "hi")).await;
    h.state.gateway.receive(telegram_dm("m2", "bob", "hi")).await;

    let alice = h.state.sessions.get("agent:default:dm:telegram:alice").unwrap();
    let bob = h.state.sessions.get("agent:default:dm:telegram:bob").unwrap();
    assert_eq!(alice.message_count, 1);
    assert_eq!(bob.message_count, 1);
    assert_ne!(alice.session_id, bob.session_id);
}

#[tokio::test]
async fn identity_links_share_canonical_user() {
    let mut config = Config::default();
    config.sessions.dm_scope = DmScope::PerChannelPeer;
    config.sessions.identity_links = vec![cb_domain::config::IdentityLink {
        canonical: "alice".into(),
        peer_ids: vec!["telegram:42".into()],
    }];
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(config, executor);

    h.state.gateway.receive(telegram_dm("m1", "42", "hi")).await;

    // The session key uses the canonical identity, not the raw peer.
    let session = h
        .state
        .sessions
        .get("agent:default:telegram:dm:alice")
        .unwrap();
    assert_eq!(session.user_id, "alice");
}

#[tokio::test]
async fn locked_user_gets_the_lock_message() {
    let executor = ScriptedExecutor::replying(&["never"]);
    let h = harness(Config::default(), executor.clone());

    h.state.locks.lock_user(
        "telegram:42",
        LockReason::Security,
        "Access suspended pending review",
        None,
    );

    h.state.gateway.receive(telegram_dm("m1", "42", "hi")).await;

    // No executor run, and the user sees the lock message.
    assert!(executor.runs().is_empty());
    let plain = h.adapter.plain();
    assert_eq!(plain.len(), 1);
    assert_eq!(plain[0].content, "Access suspended pending review");
    // The denial is audited.
    assert_eq!(h.state.audit.recent("telegram:42", 10).len(), 1);
}

#[tokio::test]
async fn allow_list_silently_ignores_strangers() {
    let mut config = Config::default();
    config.access.allowed_users.insert("telegram:42".into());
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(config, executor.clone());

    h.state.gateway.receive(telegram_dm("m1", "99", "hi")).await;
    assert!(executor.runs().is_empty());
    assert!(h.adapter.sent().is_empty());

    h.state.gateway.receive(telegram_dm("m2", "42", "hi")).await;
    assert_eq!(executor.runs().len(), 1);
}

#[tokio::test]
async fn global_admin_bypasses_locks() {
    let mut config = Config::default();
    config.access.global_admins.insert("telegram:1".into());
    let executor = ScriptedExecutor::replying(&["yes boss"]);
    let h = harness(config, executor.clone());

    h.state
        .locks
        .lock(LockReason::Maintenance, "down for maintenance", None, None);

    h.state.gateway.receive(telegram_dm("m1", "1", "status?")).await;
    assert_eq!(executor.runs().len(), 1);
}

#[tokio::test]
async fn rate_limited_turn_is_denied_with_retry_hint() {
    let mut config = Config::default();
    config.rate_limit.rules.insert(
        "requests".into(),
        LimitRule {
            capacity: 1,
            window_secs: 60,
            burst: Some(1),
            cooldown_secs: 0,
        },
    );
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(config, executor.clone());

    h.state.gateway.receive(telegram_dm("m1", "42", "one")).await;
    h.state.gateway.receive(telegram_dm("m2", "42", "two")).await;

    // Only the first message reached the executor.
    assert_eq!(executor.runs().len(), 1);
    let plain = h.adapter.plain();
    assert!(plain
        .iter()
        .any(|m| m.content.contains("Too many requests")));
}

#[tokio::test]
async fn reset_command_opens_a_fresh_session() {
    let mut config = Config::default();
    config.sessions.dm_scope = DmScope::Main;
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(config, executor);

    h.state.gateway.receive(telegram_dm("m1", "42", "hello")).await;
    let before = h.state.sessions.get("agent:default:main").unwrap();

    h.state.gateway.receive(telegram_dm("m2", "42", "/reset")).await;
    let after = h.state.sessions.get("agent:default:main").unwrap();

    assert_ne!(before.session_id, after.session_id);
    assert!(after.cli_chat_id.is_none());
    assert!(h
        .adapter
        .plain()
        .iter()
        .any(|m| m.content.contains("Session reset")));
}

#[tokio::test]
async fn blocking_route_rule_silences_the_chat() {
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(Config::default(), executor.clone());

    let mut rule = cb_gateway::routing::RouteRule::named("mute", 10);
    rule.command_pattern = Some("/spam".into());
    rule.block = true;
    h.state.router.add_rule(rule);

    h.state.gateway.receive(telegram_dm("m1", "42", "/spam hello")).await;

    assert!(executor.runs().is_empty());
    assert!(h.adapter.sent().is_empty());
}

#[tokio::test]
async fn rule_transform_reaches_the_executor() {
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(Config::default(), executor.clone());

    let mut rule = cb_gateway::routing::RouteRule::named("shout", 10);
    rule.transform = Some(cb_gateway::routing::RuleTransform::Uppercase);
    h.state.router.add_rule(rule);

    h.state.gateway.receive(telegram_dm("m1", "42", "quiet words")).await;

    assert_eq!(executor.runs()[0].0, "QUIET WORDS");
}

#[tokio::test]
async fn long_reply_is_chunked_across_messages() {
    // One delta far over the Telegram budget: the final edit takes chunk 1
    // and the rest go out as follow-up messages.
    let long = "sentence ".repeat(1500);
    let executor = ScriptedExecutor::replying(&[long.as_str()]);
    let h = harness(Config::default(), executor);

    h.state.gateway.receive(telegram_dm("m1", "42", "write a lot")).await;

    let edits = h.adapter.edits();
    let final_edit = edits.last().unwrap();
    assert!(final_edit.content.chars().count() <= 4096 - 100);

    let follow_ups = h.adapter.plain();
    assert!(
        follow_ups.len() >= 2,
        "expected follow-up chunks, got {}",
        follow_ups.len()
    );
    for chunk in &follow_ups {
        assert!(chunk.content.chars().count() <= 4096 - 100);
    }
}

#[tokio::test]
async fn executor_failure_surfaces_a_user_message() {
    let executor = ScriptedExecutor::failing();
    let h = harness(Config::default(), executor);

    h.state.gateway.receive(telegram_dm("m1", "42", "hi")).await;

    let plain = h.adapter.plain();
    assert_eq!(plain.len(), 1);
    assert_eq!(plain[0].content, "AI model error");
}

#[tokio::test]
async fn duplicate_delivery_is_dropped() {
    let executor = ScriptedExecutor::replying(&["once"]);
    let h = harness(Config::default(), executor.clone());

    h.state.gateway.receive(telegram_dm("m1", "42", "hi")).await;
    h.state.gateway.receive(telegram_dm("m1", "42", "hi")).await;

    assert_eq!(executor.runs().len(), 1);
}

#[tokio::test]
async fn shutdown_drops_new_inbound_and_fails_sends() {
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(Config::default(), executor.clone());

    h.state.gateway.begin_shutdown();
    h.state.gateway.receive(telegram_dm("m1", "42", "hi")).await;
    assert!(executor.runs().is_empty());

    let err = h
        .state
        .gateway
        .send(&OutgoingMessage::text("42", "late"))
        .await
        .unwrap_err();
    assert!(matches!(err, cb_domain::Error::Unavailable(_)));
}

#[tokio::test]
async fn lock_command_requires_elevation() {
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(Config::default(), executor.clone());

    // A plain user cannot lock the gateway.
    h.state.gateway.receive(telegram_dm("m1", "42", "/lock be right back")).await;
    assert!(h
        .adapter
        .plain()
        .iter()
        .any(|m| m.content.contains("/elevated on")));
    assert!(!h.state.locks.is_locked());

    // Elevation unlocks the protected action.  An explicit window is
    // honored; an out-of-range one is clamped.
    h.state.gateway.receive(telegram_dm("m2", "42", "/elevated on 5")).await;
    assert!(h.state.permissions.is_elevated("telegram:42"));
    assert!(h
        .adapter
        .plain()
        .iter()
        .any(|m| m.content.contains("granted for 5 minutes")));

    h.state.gateway.receive(telegram_dm("m2b", "42", "/elevated on 500")).await;
    assert!(h
        .adapter
        .plain()
        .iter()
        .any(|m| m.content.contains("granted for 60 minutes")));

    h.state.gateway.receive(telegram_dm("m3", "42", "/lock be right back")).await;
    assert!(h.state.locks.is_locked());

    // Another user now hits the lock message; no executor turn runs.
    h.state.gateway.receive(telegram_dm("m4", "7", "hello?")).await;
    assert!(executor.runs().is_empty());
    assert!(h
        .adapter
        .plain()
        .iter()
        .any(|m| m.content == "be right back"));
}

#[tokio::test]
async fn websocket_rate_kind_is_independent() {
    // Draining the requests bucket must not consume websocket tokens.
    let executor = ScriptedExecutor::replying(&["ok"]);
    let h = harness(Config::default(), executor);

    let user = "telegram:42";
    for _ in 0..10 {
        h.state.limiter.check(user, LimitKind::Requests, 1);
    }
    let status = h.state.limiter.status(user);
    assert_eq!(status["websocket"].remaining, 100);
    assert!(status["requests"].remaining < 10);
}
