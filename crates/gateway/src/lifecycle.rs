//! Startup sequencing and graceful shutdown.
//!
//! The readiness gate opens only after startup completes and closes the
//! moment shutdown begins.  Shutdown hooks run LIFO under a bounded
//! per-hook timeout; further signals during shutdown are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Duration;

/// Process exit codes.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
/// Signal-initiated shutdown (128 + SIGINT).
pub const EXIT_SIGNAL: i32 = 130;

pub type ShutdownHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Lifecycle {
    ready: AtomicBool,
    shutting_down: AtomicBool,
    hooks: Mutex<Vec<(String, ShutdownHook)>>,
    hook_timeout: Duration,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Lifecycle {
    pub fn new(hook_timeout: Duration) -> Self {
        Self {
            ready: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
            hook_timeout,
        }
    }

    /// Open the readiness gate once startup has completed.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
        tracing::info!("ready");
    }

    /// External callers see "ready" only when startup completed and no
    /// shutdown is in progress.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.shutting_down.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Register a shutdown hook.  Hooks run in reverse registration order.
    pub fn on_shutdown(&self, name: &str, hook: ShutdownHook) {
        self.hooks.lock().push((name.to_owned(), hook));
    }

    /// Flip into shutdown.  Returns false when shutdown was already in
    /// progress (repeat signals are ignored).
    pub fn begin_shutdown(&self) -> bool {
        let first = !self.shutting_down.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!("shutdown initiated");
        }
        first
    }

    /// Run all registered hooks LIFO, each bounded by the hook timeout.
    pub async fn run_shutdown_hooks(&self) {
        let hooks: Vec<(String, ShutdownHook)> = {
            let mut guard = self.hooks.lock();
            guard.drain(..).collect()
        };

        for (name, hook) in hooks.into_iter().rev() {
            tracing::info!(hook = %name, "running shutdown hook");
            if tokio::time::timeout(self.hook_timeout, hook()).await.is_err() {
                tracing::warn!(hook = %name, timeout = ?self.hook_timeout, "shutdown hook timed out");
            }
        }
    }
}

/// Block until SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = term.recv() => tracing::info!("received SIGTERM"),
            _ = int.recv() => tracing::info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c");
    }
}
