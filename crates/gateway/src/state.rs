use std::sync::Arc;

use cb_domain::config::Config;
use cb_sessions::{IdentityResolver, LifecycleManager, SessionStore};

use crate::access::{AccessLock, AuditLog, PermissionManager};
use crate::bus::{DedupeStore, Gateway};
use crate::executor::Executor;
use crate::health::{FleetSupervisor, HeartbeatMonitor};
use crate::lifecycle::Lifecycle;
use crate::queue::TaskQueue;
use crate::ratelimit::RateLimiter;
use crate::routing::ChannelRouter;
use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::streaming::{DraftStreamer, MessageChunker};

/// Shared application state threaded through the message pipeline.
///
/// Fields are grouped by concern:
/// - **Core** — config, the gateway bus, the executor seam
/// - **Sessions** — registry, identity links, reset lifecycle
/// - **Policy** — permissions, locks, rate limits, audit
/// - **Flow** — router, drafts, chunker, per-session locks, cancellation
/// - **Operations** — heartbeat, fleet, queue, lifecycle, dedupe
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub gateway: Arc<Gateway>,
    pub executor: Arc<dyn Executor>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub identity: Arc<IdentityResolver>,
    pub reset_lifecycle: Arc<LifecycleManager>,

    // ── Policy ────────────────────────────────────────────────────────
    pub permissions: Arc<PermissionManager>,
    pub locks: Arc<AccessLock>,
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditLog>,

    // ── Flow ──────────────────────────────────────────────────────────
    pub router: Arc<ChannelRouter>,
    pub streamer: DraftStreamer,
    pub chunker: Arc<MessageChunker>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,

    // ── Operations ────────────────────────────────────────────────────
    pub heartbeat: Arc<HeartbeatMonitor>,
    pub fleet: Arc<FleetSupervisor>,
    pub queue: TaskQueue,
    pub lifecycle: Arc<Lifecycle>,
    pub dedupe: Arc<DedupeStore>,
}
