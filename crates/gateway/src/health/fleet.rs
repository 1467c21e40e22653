//! Multi-gateway fleet supervision.
//!
//! Manages a fleet of gateway instances with load-balancing strategies,
//! TTL-bound session affinity, and `/health`-probe driven failover.  Only
//! `Healthy` and `Degraded` instances receive new assignments; a draining
//! gateway keeps serving existing connections but refuses new ones.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};

use cb_domain::config::{BalanceStrategy, FleetConfig};
use cb_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Draining,
    Stopped,
}

impl GatewayState {
    pub fn is_available(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// One gateway instance in the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayInstance {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
    pub current_connections: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub state: GatewayState,
    pub failure_count: u32,
    pub success_count: u32,
}

impl GatewayInstance {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 1.0;
        }
        f64::from(self.current_connections) / f64::from(self.max_connections)
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStats {
    pub strategy: BalanceStrategy,
    pub total_gateways: usize,
    pub available_gateways: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_connections: u32,
    pub sticky_sessions: bool,
    pub active_affinities: usize,
}

struct Affinity {
    gateway_id: String,
    assigned_at: Instant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FleetSupervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FleetSupervisor {
    config: FleetConfig,
    gateways: RwLock<HashMap<String, GatewayInstance>>,
    round_robin: Mutex<usize>,
    affinity: Mutex<HashMap<String, Affinity>>,
    http: reqwest::Client,
}

impl FleetSupervisor {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            gateways: RwLock::new(HashMap::new()),
            round_robin: Mutex::new(0),
            affinity: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    // ── Registration ─────────────────────────────────────────────────

    pub fn register(&self, id: &str, host: &str, port: u16, weight: u32) -> GatewayInstance {
        let instance = GatewayInstance {
            id: id.to_owned(),
            name: id.to_owned(),
            host: host.to_owned(),
            port,
            weight: weight.max(1),
            max_connections: 1000,
            current_connections: 0,
            total_requests: 0,
            failed_requests: 0,
            state: GatewayState::Starting,
            failure_count: 0,
            success_count: 0,
        };
        self.gateways.write().insert(id.to_owned(), instance.clone());
        tracing::info!(gateway_id = id, host, port, "gateway registered");
        instance
    }

    /// Idempotent.  Purges affinity records referencing the gateway.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.gateways.write().remove(id).is_some();
        self.affinity.lock().retain(|_, a| a.gateway_id != id);
        if removed {
            tracing::info!(gateway_id = id, "gateway unregistered");
        }
        removed
    }

    pub fn set_state(&self, id: &str, state: GatewayState) {
        if let Some(gw) = self.gateways.write().get_mut(id) {
            gw.state = state;
            TraceEvent::GatewayStateChanged {
                gateway_id: id.to_owned(),
                state: format!("{state:?}"),
            }
            .emit();
        }
    }

    /// Stop accepting new assignments while existing connections finish.
    pub fn drain(&self, id: &str) {
        self.set_state(id, GatewayState::Draining);
    }

    pub fn get(&self, id: &str) -> Option<GatewayInstance> {
        self.gateways.read().get(id).cloned()
    }

    // ── Assignment ───────────────────────────────────────────────────

    /// Pick a gateway for a user under the configured strategy, honoring
    /// sticky sessions.  Returns `None` when no gateway is available.
    pub fn get_gateway(&self, user_id: Option<&str>) -> Option<GatewayInstance> {
        let available = self.available();
        if available.is_empty() {
            tracing::warn!("no available gateways");
            return None;
        }

        // Sticky affinity first: reuse while unexpired and still available.
        if self.config.sticky_sessions {
            if let Some(user) = user_id {
                let mut affinity = self.affinity.lock();
                if let Some(existing) = affinity.get(user) {
                    let fresh = existing.assigned_at.elapsed()
                        < Duration::from_secs(self.config.sticky_ttl_secs);
                    let gateway = fresh
                        .then(|| available.iter().find(|g| g.id == existing.gateway_id))
                        .flatten();
                    match gateway {
                        Some(g) => return Some(g.clone()),
                        None => {
                            affinity.remove(user);
                        }
                    }
                }
            }
        }

        let chosen = self.select(&available, user_id)?;

        if self.config.sticky_sessions {
            if let Some(user) = user_id {
                self.affinity.lock().insert(
                    user.to_owned(),
                    Affinity {
                        gateway_id: chosen.id.clone(),
                        assigned_at: Instant::now(),
                    },
                );
            }
        }

        Some(chosen)
    }

    /// Available instances in a stable order (sorted by id).
    fn available(&self) -> Vec<GatewayInstance> {
        let mut list: Vec<GatewayInstance> = self
            .gateways
            .read()
            .values()
            .filter(|g| g.state.is_available())
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn select(
        &self,
        available: &[GatewayInstance],
        user_id: Option<&str>,
    ) -> Option<GatewayInstance> {
        let chosen = match self.config.strategy {
            BalanceStrategy::RoundRobin => {
                let mut index = self.round_robin.lock();
                *index = (*index + 1) % available.len();
                available[*index].clone()
            }
            BalanceStrategy::LeastConnections => available
                .iter()
                .min_by_key(|g| g.current_connections)?
                .clone(),
            BalanceStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..available.len());
                available[index].clone()
            }
            BalanceStrategy::IpHash => match user_id {
                Some(user) => {
                    let digest = Sha256::digest(user.as_bytes());
                    let hash = u64::from_be_bytes(digest[..8].try_into().expect("digest ≥ 8 bytes"));
                    available[(hash % available.len() as u64) as usize].clone()
                }
                None => {
                    let mut index = self.round_robin.lock();
                    *index = (*index + 1) % available.len();
                    available[*index].clone()
                }
            },
            BalanceStrategy::Weighted => {
                let total: u32 = available.iter().map(|g| g.weight).sum();
                let mut draw = rand::thread_rng().gen_range(0..total.max(1));
                let mut chosen = available.last()?.clone();
                for g in available {
                    if draw < g.weight {
                        chosen = g.clone();
                        break;
                    }
                    draw -= g.weight;
                }
                chosen
            }
        };
        Some(chosen)
    }

    // ── Counters ─────────────────────────────────────────────────────

    pub fn record_request(&self, id: &str, success: bool) {
        if let Some(gw) = self.gateways.write().get_mut(id) {
            gw.total_requests += 1;
            if !success {
                gw.failed_requests += 1;
            }
        }
    }

    pub fn increment_connections(&self, id: &str) {
        if let Some(gw) = self.gateways.write().get_mut(id) {
            gw.current_connections += 1;
        }
    }

    pub fn decrement_connections(&self, id: &str) {
        if let Some(gw) = self.gateways.write().get_mut(id) {
            gw.current_connections = gw.current_connections.saturating_sub(1);
        }
    }

    // ── Health checking ──────────────────────────────────────────────

    /// Probe one gateway's `/health` endpoint and evolve its state.
    pub async fn check_health(&self, id: &str) -> bool {
        let url = match self.get(id) {
            Some(gw) => format!("{}/health", gw.url()),
            None => return false,
        };

        let success = match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(gateway_id = id, error = %e, "health check failed");
                false
            }
        };

        self.apply_health_result(id, success);
        success
    }

    /// Threshold discipline shared with the heartbeat monitor: consecutive
    /// failures demote, consecutive successes promote through Degraded.
    pub fn apply_health_result(&self, id: &str, success: bool) {
        let mut gateways = self.gateways.write();
        let Some(gw) = gateways.get_mut(id) else { return };

        // Administrative states don't evolve from probes.
        if matches!(gw.state, GatewayState::Draining | GatewayState::Stopped) {
            return;
        }

        let previous = gw.state;
        if success {
            gw.failure_count = 0;
            match gw.state {
                GatewayState::Unhealthy => {
                    gw.success_count = 1;
                    gw.state = GatewayState::Degraded;
                }
                GatewayState::Degraded => {
                    gw.success_count += 1;
                    if gw.success_count >= self.config.recovery_threshold {
                        gw.state = GatewayState::Healthy;
                        gw.success_count = 0;
                    }
                }
                GatewayState::Starting => gw.state = GatewayState::Healthy,
                GatewayState::Healthy => {}
                GatewayState::Draining | GatewayState::Stopped => unreachable!(),
            }
        } else {
            gw.success_count = 0;
            gw.failure_count += 1;
            if gw.failure_count >= self.config.failure_threshold {
                if gw.state != GatewayState::Unhealthy {
                    tracing::warn!(
                        gateway_id = id,
                        failures = gw.failure_count,
                        "gateway marked unhealthy"
                    );
                }
                gw.state = GatewayState::Unhealthy;
            }
        }

        if previous != gw.state {
            TraceEvent::GatewayStateChanged {
                gateway_id: id.to_owned(),
                state: format!("{:?}", gw.state),
            }
            .emit();
        }
    }

    /// Background task probing every gateway at the configured interval.
    pub fn spawn_health_checks(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let fleet = self.clone();
        let interval = Duration::from_secs(self.config.health_check_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let ids: Vec<String> = fleet.gateways.read().keys().cloned().collect();
                for id in ids {
                    fleet.check_health(&id).await;
                }
            }
        })
    }

    // ── Stats ────────────────────────────────────────────────────────

    pub fn stats(&self) -> FleetStats {
        let gateways = self.gateways.read();
        FleetStats {
            strategy: self.config.strategy,
            total_gateways: gateways.len(),
            available_gateways: gateways.values().filter(|g| g.state.is_available()).count(),
            total_requests: gateways.values().map(|g| g.total_requests).sum(),
            failed_requests: gateways.values().map(|g| g.failed_requests).sum(),
            total_connections: gateways.values().map(|g| g.current_connections).sum(),
            sticky_sessions: self.config.sticky_sessions,
            active_affinities: self.affinity.lock().len(),
        }
    }

    pub fn list(&self) -> Vec<GatewayInstance> {
        let mut list: Vec<GatewayInstance> = self.gateways.read().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}
