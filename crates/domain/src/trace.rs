use serde::Serialize;

/// Structured trace events emitted across all CursorBot crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    IdentityResolved {
        raw_peer_id: String,
        canonical: String,
    },
    SessionResolved {
        session_key: String,
        session_id: String,
        is_new: bool,
    },
    SessionReset {
        session_key: String,
        old_session_id: String,
        new_session_id: String,
        reason: String,
    },
    AccessDenied {
        user_id: String,
        rule: String,
    },
    RateLimited {
        user_id: String,
        kind: String,
        retry_after: f64,
    },
    RouteDecided {
        chat_id: String,
        blocked: bool,
        target_agent: Option<String>,
        forwards: usize,
    },
    TurnStarted {
        session_key: String,
        transport: String,
    },
    TurnCompleted {
        session_key: String,
        duration_ms: u64,
        output_chars: usize,
    },
    ExecutorSpawned {
        session_key: String,
        chat_handle: Option<String>,
        model: Option<String>,
    },
    DraftCompleted {
        chat_id: String,
        edits: u32,
    },
    GatewayStateChanged {
        gateway_id: String,
        state: String,
    },
    ProbeStateChanged {
        probe: String,
        state: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cb_event");
    }
}
