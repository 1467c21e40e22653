//! The orchestration handler — one inbound message, end to end.
//!
//! Pipeline: dedupe → identity → access locks → permissions → rate limit →
//! reset commands → routing → session open/resume → executor run (serialized
//! per session, cancellable) → draft streaming → chunked egress.
//!
//! Policy denials become localized user-visible replies and audit entries;
//! a raw error never reaches the transport.

pub mod cancel;
pub mod session_lock;

use futures_util::StreamExt;

use cb_domain::config::InboundMetadata;
use cb_domain::message::{ChatKind, OutgoingMessage, UnifiedMessage};
use cb_domain::stream::{ExecutorOptions, ExecutorScope};
use cb_domain::trace::TraceEvent;
use cb_domain::{Error, Result};
use cb_sessions::{compute_session_key, SessionOrigin};

use crate::access::Permission;
use crate::ratelimit::LimitKind;
use crate::state::AppState;
use crate::streaming::chunker::platform_budget;

/// Handle one normalized inbound message.
pub async fn handle_inbound(state: AppState, msg: UnifiedMessage) -> Result<()> {
    // Redelivered events are dropped silently.
    if state.dedupe.seen(&msg.id) {
        tracing::debug!(id = %msg.id, "duplicate inbound message dropped");
        return Ok(());
    }

    let canonical = state.identity.resolve(&msg.sender.peer_id());
    let command = msg.command().map(ToOwned::to_owned);
    let group_id = (msg.chat_kind != ChatKind::Direct).then(|| msg.chat_id.clone());
    let locale = state.config.server.locale.clone();

    // ── Access: allow-list and locks (global admins bypass both) ─────
    if !state.permissions.is_global_admin(&canonical) {
        let allow_list = &state.config.access.allowed_users;
        if !allow_list.is_empty() && !allow_list.contains(&canonical) {
            state.audit.record(&canonical, "deny", "allowed_users", None);
            tracing::debug!(user_id = %canonical, "sender not in allowed_users, ignoring");
            return Ok(());
        }

        let (allowed, rule) = state
            .locks
            .can_access(&canonical, group_id.as_deref(), lookup_ip(&msg));
        if !allowed {
            TraceEvent::AccessDenied {
                user_id: canonical.clone(),
                rule: rule.clone(),
            }
            .emit();
            state.audit.record(&canonical, "deny", &rule, None);
            reply(&state, &msg, &rule).await;
            return Ok(());
        }
    }

    // ── Access: permissions ──────────────────────────────────────────
    let needed = if command.is_some() {
        Permission::UseCommands
    } else {
        Permission::SendMessage
    };
    if !state
        .permissions
        .check_permission(&canonical, needed, group_id.as_deref())
    {
        let err = Error::Forbidden {
            permission: needed.as_str().to_owned(),
        };
        state
            .audit
            .record(&canonical, "deny", needed.as_str(), None);
        reply(&state, &msg, &err.user_message(&locale)).await;
        return Ok(());
    }

    // ── Rate limits ──────────────────────────────────────────────────
    let kind = if command.is_some() {
        LimitKind::Commands
    } else if matches!(
        msg.kind,
        cb_domain::message::MessageKind::Image
            | cb_domain::message::MessageKind::Audio
            | cb_domain::message::MessageKind::Video
            | cb_domain::message::MessageKind::File
    ) {
        LimitKind::Uploads
    } else {
        LimitKind::Requests
    };
    if let Err(err) = state.limiter.enforce(&canonical, kind, 1) {
        state.audit.record(
            &canonical,
            "rate_limit",
            kind.as_str(),
            Some(serde_json::json!(err.details())),
        );
        reply(&state, &msg, &err.user_message(&locale)).await;
        return Ok(());
    }

    // ── Built-in commands (elevation, locks) ─────────────────────────
    if let Some(cmd) = &command {
        if handle_builtin_command(&state, &msg, &canonical, cmd, &locale).await {
            return Ok(());
        }
    }

    // ── Reset commands (config-provided trigger list) ────────────────
    let session_key = session_key_for(&state, &msg, &canonical);
    if let Some(cmd) = &command {
        if state.config.sessions.reset_commands.iter().any(|c| c == cmd) {
            state.sessions.reset(&session_key);
            reply(&state, &msg, "Session reset. Starting fresh.").await;
            return Ok(());
        }
    }

    // ── Routing ──────────────────────────────────────────────────────
    let decision = state.router.route(
        &msg.chat_id,
        msg.chat_kind,
        &msg.content,
        command.as_deref(),
    );
    if decision.blocked {
        return Ok(());
    }

    if !decision.forwards.is_empty() {
        let report = state
            .router
            .forward(&decision.transformed_text, &decision.forwards, Some(&msg.chat_id))
            .await;
        if !report.failed.is_empty() {
            tracing::warn!(failed = report.failed.len(), "some forwards failed");
        }
    }

    if !decision.processed {
        return Ok(());
    }

    // Channels with auto-reply off still route and forward, but the
    // executor is not consulted.
    if state
        .router
        .channel(&msg.chat_id)
        .is_some_and(|c| !c.auto_reply)
    {
        return Ok(());
    }

    // ── Session resolution ───────────────────────────────────────────
    let meta = inbound_metadata(&msg, &canonical);
    let origin = SessionOrigin {
        label: decision.target_agent.clone(),
        provider: Some(msg.transport.to_string()),
        from_id: Some(canonical.clone()),
        to_id: Some(msg.chat_id.clone()),
        account_id: None,
        thread_id: msg.thread_id.clone(),
    };
    let (session, _opened) = state.sessions.get_or_open(&session_key, origin, |entry| {
        state
            .reset_lifecycle
            .should_reset(entry, &meta, chrono::Utc::now())
    });
    state.sessions.increment_messages(&session_key);

    // ── Turn execution ───────────────────────────────────────────────
    run_turn(&state, &msg, &canonical, &session_key, session.cli_chat_id, &decision.transformed_text)
        .await
}

/// Execute one executor turn for a session: serialize on the session lock,
/// stream deltas into a draft, then chunk and send the final reply.
async fn run_turn(
    state: &AppState,
    msg: &UnifiedMessage,
    canonical: &str,
    session_key: &str,
    mut chat_handle: Option<String>,
    prompt: &str,
) -> Result<()> {
    let locale = state.config.server.locale.clone();
    let started = std::time::Instant::now();

    // Turns are serialized per session key.
    let _permit = state.session_locks.acquire(session_key).await;
    let cancel = state.cancel_map.register(session_key);

    TraceEvent::TurnStarted {
        session_key: session_key.to_owned(),
        transport: msg.transport.to_string(),
    }
    .emit();

    // First turn for this session: create the executor-side chat handle so
    // the executor preserves context across turns.  A failure here degrades
    // to a context-free run.
    if chat_handle.is_none() {
        match state.executor.create_chat().await {
            Ok(handle) => {
                state
                    .sessions
                    .set_cli_chat_id(session_key, handle.clone());
                chat_handle = Some(handle);
            }
            Err(e) => {
                tracing::warn!(error = %e, "create-chat failed; running without context");
            }
        }
    }

    let options = executor_options(state, msg, canonical);
    TraceEvent::ExecutorSpawned {
        session_key: session_key.to_owned(),
        chat_handle: chat_handle.clone(),
        model: options.model.clone(),
    }
    .emit();

    let mut stream = match state
        .executor
        .run(prompt, chat_handle.as_deref(), &options)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            state.cancel_map.remove(session_key);
            tracing::error!(error = %e, "executor spawn failed");
            reply(state, msg, &e.user_message(&locale)).await;
            return Ok(());
        }
    };

    state.streamer.start_stream(&msg.chat_id, &msg.id, "");

    let mut full_text = String::new();
    let mut stream_error: Option<String> = None;
    let mut cancelled = false;

    while let Some(delta) = stream.next().await {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        if let Some(error) = delta.error {
            stream_error = Some(error);
            break;
        }
        if !delta.text.is_empty() {
            full_text.push_str(&delta.text);
            state.streamer.append(&msg.chat_id, &msg.id, &delta.text);
        }
        if delta.is_final {
            break;
        }
    }
    // Dropping the stream tears down the subprocess read.
    drop(stream);
    state.cancel_map.remove(session_key);

    if cancelled {
        // The final draft update still fires with the partial content.
        state.streamer.complete(&msg.chat_id, &msg.id, None).await;
        state.sessions.touch(session_key);
        return Ok(());
    }

    if let Some(error) = stream_error {
        state.streamer.cancel(&msg.chat_id, &msg.id);
        tracing::error!(error = %error, session_key, "executor stream failed");
        let err = Error::ExecutorFailure {
            reason: cb_domain::error::ExecutorFailureReason::Internal,
        };
        reply(state, msg, &err.user_message(&locale)).await;
        return Ok(());
    }

    // Chunk the finished reply to the transport budget.  The first chunk
    // lands as the draft's final edit; any remainder goes out as follow-up
    // messages.
    let budget = platform_budget(msg.transport, &state.config.streaming.chunk);
    let mut chunks = state.chunker.chunk(&full_text, Some(budget));
    if state.config.streaming.chunk.add_indicators && chunks.len() > 1 {
        chunks = state.chunker.add_indicators(chunks);
    }

    let mut chunks = chunks.into_iter();
    let first = chunks.next().unwrap_or_default();
    state
        .streamer
        .complete(&msg.chat_id, &msg.id, Some(&first))
        .await;

    for chunk in chunks {
        let outgoing = OutgoingMessage::text(&msg.chat_id, chunk).to_transport(msg.transport);
        if let Err(e) = state.gateway.send(&outgoing).await {
            tracing::error!(error = %e, "follow-up chunk send failed");
            break;
        }
    }

    // Text-mode executors report no usage; count a coarse 4-chars-per-token
    // estimate so session totals stay meaningful.
    state.sessions.record_tokens(
        session_key,
        (prompt.chars().count() / 4) as u64,
        (full_text.chars().count() / 4) as u64,
        0,
    );

    TraceEvent::TurnCompleted {
        session_key: session_key.to_owned(),
        duration_ms: started.elapsed().as_millis() as u64,
        output_chars: full_text.chars().count(),
    }
    .emit();

    Ok(())
}

/// Longest elevation window a request may ask for.
const MAX_ELEVATION_MINUTES: u32 = 60;

/// Handle the built-in control commands.  Returns true when the message
/// was consumed.
async fn handle_builtin_command(
    state: &AppState,
    msg: &UnifiedMessage,
    canonical: &str,
    command: &str,
    locale: &str,
) -> bool {
    let arg = msg.content.split_whitespace().nth(1).unwrap_or("");

    match command {
        "/elevated" => {
            match arg {
                "on" => {
                    // `/elevated on [minutes]` — the caller may pick a
                    // window, clamped to 1..=60.
                    let minutes = msg
                        .content
                        .split_whitespace()
                        .nth(2)
                        .and_then(|m| m.parse::<u32>().ok())
                        .unwrap_or(state.config.access.elevation_minutes)
                        .clamp(1, MAX_ELEVATION_MINUTES);
                    state
                        .permissions
                        .elevate(canonical, chrono::Duration::minutes(i64::from(minutes)));
                    reply(
                        state,
                        msg,
                        &format!("Elevated permissions granted for {minutes} minutes."),
                    )
                    .await;
                }
                "off" => {
                    state.permissions.revoke_elevation(canonical);
                    reply(state, msg, "Elevated permissions revoked.").await;
                }
                _ => reply(state, msg, "Usage: /elevated on|off [minutes]").await,
            }
            true
        }
        "/lock" | "/unlock" => {
            // Locking the gateway is a protected action.
            if !state
                .permissions
                .check_permission(canonical, Permission::ElevatedOperations, None)
            {
                let err = Error::ElevationRequired {
                    action: command.to_owned(),
                };
                state
                    .audit
                    .record(canonical, "elevation_required", command, None);
                reply(state, msg, &err.user_message(locale)).await;
                return true;
            }

            if command == "/lock" {
                let message = msg
                    .content
                    .splitn(2, char::is_whitespace)
                    .nth(1)
                    .unwrap_or("")
                    .trim();
                state
                    .locks
                    .lock(crate::access::LockReason::Manual, message, None, Some(canonical));
                reply(state, msg, "Gateway locked.").await;
            } else {
                state.locks.unlock(Some(canonical));
                reply(state, msg, "Gateway unlocked.").await;
            }
            true
        }
        _ => false,
    }
}

/// Send a user-visible reply back on the message's own transport.
async fn reply(state: &AppState, msg: &UnifiedMessage, text: &str) {
    let mut outgoing = OutgoingMessage::text(&msg.chat_id, text).to_transport(msg.transport);
    outgoing.reply_to = Some(msg.id.clone());
    if let Err(e) = state.gateway.send(&outgoing).await {
        tracing::warn!(error = %e, "reply send failed");
    }
}

fn session_key_for(state: &AppState, msg: &UnifiedMessage, canonical: &str) -> String {
    let meta = inbound_metadata(msg, canonical);
    compute_session_key(
        &state.config.sessions.agent_id,
        state.config.sessions.dm_scope,
        &state.config.sessions.main_key,
        &meta,
    )
}

fn inbound_metadata(msg: &UnifiedMessage, canonical: &str) -> InboundMetadata {
    InboundMetadata {
        transport: Some(msg.transport.to_string()),
        peer_id: Some(canonical.to_owned()),
        chat_id: Some(msg.chat_id.clone()),
        thread_id: msg.thread_id.clone(),
        chat_kind: msg.chat_kind,
    }
}

fn executor_options(state: &AppState, msg: &UnifiedMessage, canonical: &str) -> ExecutorOptions {
    // Edit-capable turns require the execute-code permission; everyone else
    // gets ask-only scope.
    let scope = if state
        .permissions
        .check_permission(canonical, Permission::ExecuteCode, None)
    {
        ExecutorScope::Edit
    } else {
        ExecutorScope::ReadOnly
    };

    ExecutorOptions {
        model: msg
            .metadata
            .get("model")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .or_else(|| state.config.executor.model.clone()),
        verbosity: 0,
        thinking_budget: state.config.executor.thinking_budget,
        scope,
        working_dir: state.config.executor.working_dir.clone(),
    }
}

/// API/WebChat messages may carry the caller's IP for the lock chain.
fn lookup_ip(msg: &UnifiedMessage) -> Option<&str> {
    msg.metadata.get("ip").and_then(|v| v.as_str())
}
