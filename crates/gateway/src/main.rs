use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cb_domain::config::{Config, ConfigSeverity};
use cb_domain::env as env_validation;
use cb_sessions::{IdentityResolver, LifecycleManager, SessionStore};

use cb_gateway::access::{AccessLock, AuditLog, PermissionManager};
use cb_gateway::api;
use cb_gateway::bus::{DedupeStore, Gateway};
use cb_gateway::executor::CliExecutor;
use cb_gateway::health::{FleetSupervisor, HeartbeatMonitor};
use cb_gateway::lifecycle::{self, Lifecycle};
use cb_gateway::queue::TaskQueue;
use cb_gateway::ratelimit::RateLimiter;
use cb_gateway::routing::ChannelRouter;
use cb_gateway::runtime;
use cb_gateway::runtime::cancel::CancelMap;
use cb_gateway::runtime::session_lock::SessionLockMap;
use cb_gateway::state::AppState;
use cb_gateway::streaming::{DraftStreamer, MessageChunker};

#[derive(Parser)]
#[command(name = "cursorbotd", about = "CursorBot multi-platform chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and environment, then exit.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config { command }) => {
            let config = load_config()?;
            match command {
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        eprintln!("{issue}");
                    }
                    let report = validate_environment();
                    for issue in &report.issues {
                        eprintln!("{issue}");
                    }
                    if issues.iter().any(|i| i.severity == ConfigSeverity::Error)
                        || !report.startable()
                    {
                        std::process::exit(lifecycle::EXIT_CONFIG);
                    }
                    println!("configuration OK");
                    Ok(())
                }
                ConfigCommand::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                    Ok(())
                }
            }
        }
        Some(Command::Version) => {
            println!("cursorbotd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cb_gateway=debug")),
        )
        .json()
        .init();
}

/// Load `cursorbot.toml` (or `$CB_CONFIG`) with defaults for everything
/// missing.
fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var("CB_CONFIG").unwrap_or_else(|_| "cursorbot.toml".into());
    if std::path::Path::new(&path).exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {path}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {path}"))
    } else {
        Ok(Config::default())
    }
}

fn validate_environment() -> env_validation::EnvReport {
    let vars: HashMap<String, String> = std::env::vars().collect();
    env_validation::validate(&env_validation::default_specs(), &vars)
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("CursorBot starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        tracing::error!("config validation failed");
        std::process::exit(lifecycle::EXIT_CONFIG);
    }

    // ── Environment validation ───────────────────────────────────────
    let report = validate_environment();
    for issue in &report.issues {
        tracing::warn!("env: {issue}");
    }
    if !report.startable() {
        tracing::error!("missing required environment variables");
        std::process::exit(lifecycle::EXIT_CONFIG);
    }
    if !report.disabled_features.is_empty() {
        tracing::warn!(
            disabled = ?report.disabled_features,
            "features disabled by missing environment variables"
        );
    }

    // ── State directory ──────────────────────────────────────────────
    let state_path = std::env::var("CB_DATA_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| config.workspace.state_path.clone());
    std::fs::create_dir_all(&state_path)
        .with_context(|| format!("creating state dir {}", state_path.display()))?;

    // ── Session management ───────────────────────────────────────────
    let sessions =
        Arc::new(SessionStore::new(&state_path).context("initializing session store")?);
    let identity = Arc::new(IdentityResolver::from_config(
        &config.sessions.identity_links,
    ));
    let reset_lifecycle = Arc::new(LifecycleManager::new(config.sessions.lifecycle.clone()));
    tracing::info!(
        agent_id = %config.sessions.agent_id,
        dm_scope = ?config.sessions.dm_scope,
        identity_links = identity.len(),
        "session management ready"
    );

    // Archive anything that went stale while the gateway was down.
    {
        let lifecycle_mgr = reset_lifecycle.clone();
        sessions.sweep(|entry| {
            let meta = cb_domain::config::InboundMetadata {
                transport: entry.origin.provider.clone(),
                ..Default::default()
            };
            lifecycle_mgr.should_reset(entry, &meta, chrono::Utc::now())
        });
    }

    // ── Policy ───────────────────────────────────────────────────────
    let permissions = Arc::new(PermissionManager::from_config(
        &config.access,
        Some(&state_path),
    ));
    let locks = Arc::new(AccessLock::from_config(&config.access));
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let audit = Arc::new(AuditLog::new(200));
    tracing::info!("access control ready");

    // ── Flow ─────────────────────────────────────────────────────────
    let gateway = Arc::new(Gateway::new());
    let router = Arc::new(ChannelRouter::new());
    let streamer = DraftStreamer::new(config.streaming.clone());
    let chunker = Arc::new(MessageChunker::new(config.streaming.chunk));
    let session_locks = Arc::new(SessionLockMap::new());
    let cancel_map = Arc::new(CancelMap::new());
    let dedupe = Arc::new(DedupeStore::new(std::time::Duration::from_secs(86_400)));

    // Draft edits go back out through the gateway as message edits.
    {
        let gateway = gateway.clone();
        streamer.on_update(Arc::new(move |update| {
            let gateway = gateway.clone();
            Box::pin(async move {
                let mut outgoing = cb_domain::message::OutgoingMessage::text(
                    &update.chat_id,
                    &update.content,
                );
                outgoing
                    .metadata
                    .insert("edit_message_id".into(), serde_json::json!(update.message_id));
                outgoing
                    .metadata
                    .insert("final".into(), serde_json::json!(update.is_final));
                gateway.send(&outgoing).await.map(|_| ())
            })
        }));
    }

    // ── Operations ───────────────────────────────────────────────────
    let heartbeat = Arc::new(HeartbeatMonitor::new(config.heartbeat));
    let fleet = Arc::new(FleetSupervisor::new(config.fleet.clone()));
    let queue = TaskQueue::new(config.queue.clone());
    let lifecycle = Arc::new(Lifecycle::default());

    let state = AppState {
        config: config.clone(),
        gateway: gateway.clone(),
        executor: Arc::new(CliExecutor::new(config.executor.clone())),
        sessions: sessions.clone(),
        identity,
        reset_lifecycle: reset_lifecycle.clone(),
        permissions,
        locks,
        limiter,
        audit,
        router,
        streamer: streamer.clone(),
        chunker,
        session_locks: session_locks.clone(),
        cancel_map,
        heartbeat: heartbeat.clone(),
        fleet: fleet.clone(),
        queue: queue.clone(),
        lifecycle: lifecycle.clone(),
        dedupe: dedupe.clone(),
    };

    // ── Orchestration handler ────────────────────────────────────────
    {
        let state = state.clone();
        gateway.on_message(Arc::new(move |msg| {
            let state = state.clone();
            Box::pin(async move { runtime::handle_inbound(state, msg).await })
        }));
    }

    // ── Adapters ─────────────────────────────────────────────────────
    // Platform adapters register themselves against the bus; failures are
    // isolated per adapter inside `start`.
    gateway.start().await;
    if gateway.list_adapters().is_empty() {
        tracing::warn!("no transport adapters registered — only the control surface is live");
    }

    // ── Default probes ───────────────────────────────────────────────
    {
        use cb_gateway::health::heartbeat::ProbeConfig;

        let sessions_probe = sessions.clone();
        heartbeat.register_with(
            "sessions",
            ProbeConfig::from_defaults(&config.heartbeat).required(),
            Arc::new(move || {
                let sessions = sessions_probe.clone();
                Box::pin(async move { Ok(sessions.flush().is_ok()) })
            }),
            None,
        );

        let executor_binary = config.executor.binary.clone();
        heartbeat.register(
            "executor",
            Arc::new(move || {
                let binary = executor_binary.clone();
                Box::pin(async move {
                    // Configured and resolvable, either as a path or on PATH.
                    let found = std::path::Path::new(&binary).exists()
                        || std::env::var_os("PATH").is_some_and(|paths| {
                            std::env::split_paths(&paths).any(|p| p.join(&binary).exists())
                        });
                    Ok(found)
                })
            }),
            None,
        );
    }
    heartbeat.spawn();
    fleet.spawn_health_checks();
    queue.start();

    // ── Periodic sweeps ──────────────────────────────────────────────
    {
        let sessions = sessions.clone();
        let reset_lifecycle = reset_lifecycle.clone();
        let session_locks = session_locks.clone();
        let dedupe = dedupe.clone();
        let queue_sweep = queue.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                sessions.sweep(|entry| {
                    let meta = cb_domain::config::InboundMetadata {
                        transport: entry.origin.provider.clone(),
                        ..Default::default()
                    };
                    reset_lifecycle.should_reset(entry, &meta, chrono::Utc::now())
                });
                sessions.persist();
                session_locks.prune_idle();
                dedupe.prune();
                queue_sweep.evict_terminal(chrono::Duration::hours(1));
            }
        });
    }

    // ── Shutdown hooks (run LIFO) ────────────────────────────────────
    {
        let gateway_hook = gateway.clone();
        lifecycle.on_shutdown("stop-adapters", Arc::new(move || {
            let gateway = gateway_hook.clone();
            Box::pin(async move { gateway.stop().await })
        }));

        let queue_hook = queue.clone();
        lifecycle.on_shutdown("drain-queue", Arc::new(move || {
            let queue = queue_hook.clone();
            Box::pin(async move { queue.stop(true).await })
        }));

        let sessions_hook = sessions.clone();
        lifecycle.on_shutdown("persist-sessions", Arc::new(move || {
            let sessions = sessions_hook.clone();
            Box::pin(async move {
                if let Err(e) = sessions.flush() {
                    tracing::warn!(error = %e, "final session snapshot failed");
                }
            })
        }));
    }

    // ── Control surface ──────────────────────────────────────────────
    let server = if config.server.control_surface {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding to {addr}"))?;
        tracing::info!(addr = %addr, "control surface listening");
        let app = api::router(state.clone())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower::limit::ConcurrencyLimitLayer::new(256));
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "control surface server error");
            }
        }))
    } else {
        None
    };

    lifecycle.mark_ready();
    tracing::info!("CursorBot running");

    // ── Graceful drain on signal ─────────────────────────────────────
    lifecycle::wait_for_signal().await;
    lifecycle.begin_shutdown();
    gateway.begin_shutdown();
    lifecycle.run_shutdown_hooks().await;
    if let Some(server) = server {
        server.abort();
    }

    tracing::info!("CursorBot stopped");
    std::process::exit(lifecycle::EXIT_SIGNAL);
}
