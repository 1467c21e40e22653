//! Heartbeat monitoring.
//!
//! Named probes are invoked on an interval; a probe that returns false,
//! errors, or exceeds its timeout counts as a failure.  State machine:
//!
//! ```text
//! Healthy   ──failure──► Healthy (counter++)   while counter < failure_threshold
//! Healthy   ──failure──► Unhealthy             when counter ≥ failure_threshold
//! Unhealthy ──success──► Degraded (counter++)  while counter < recovery_threshold
//! Degraded  ──success──► Healthy               when counter ≥ recovery_threshold
//! Degraded  ──failure──► Unhealthy
//! ```
//!
//! On the transition to Unhealthy the probe's recovery callback (if any) is
//! invoked once; its result does not change state — recovery is confirmed
//! only by subsequent successes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Duration;

use cb_domain::config::HeartbeatConfig;
use cb_domain::trace::TraceEvent;
use cb_domain::Result;

/// Probe health states, ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A health-check callable: `Ok(true)` is a pass, anything else a failure.
pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Invoked once when a probe transitions to Unhealthy.
pub type RecoveryFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-probe parameters.
#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub auto_recover: bool,
    /// Required probes gate readiness.
    pub required: bool,
}

impl ProbeConfig {
    pub fn from_defaults(config: &HeartbeatConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            failure_threshold: config.failure_threshold,
            recovery_threshold: config.recovery_threshold,
            auto_recover: config.auto_recover,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Snapshot of one probe's health.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeHealth {
    pub name: String,
    pub state: ProbeState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub required: bool,
}

struct Probe {
    config: ProbeConfig,
    check: ProbeFn,
    recover: Option<RecoveryFn>,
    health: ProbeHealth,
}

pub struct HeartbeatMonitor {
    defaults: HeartbeatConfig,
    probes: Mutex<HashMap<String, Probe>>,
}

impl HeartbeatMonitor {
    pub fn new(defaults: HeartbeatConfig) -> Self {
        Self {
            defaults,
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Register a probe under the default config.
    pub fn register(&self, name: &str, check: ProbeFn, recover: Option<RecoveryFn>) {
        self.register_with(
            name,
            ProbeConfig::from_defaults(&self.defaults),
            check,
            recover,
        );
    }

    pub fn register_with(
        &self,
        name: &str,
        config: ProbeConfig,
        check: ProbeFn,
        recover: Option<RecoveryFn>,
    ) {
        let probe = Probe {
            config,
            check,
            recover,
            health: ProbeHealth {
                name: name.to_owned(),
                state: ProbeState::Healthy,
                failure_count: 0,
                success_count: 0,
                last_check: None,
                last_success: None,
                latency_ms: None,
                error: None,
                required: config.required,
            },
        };
        self.probes.lock().insert(name.to_owned(), probe);
        tracing::info!(probe = name, "heartbeat probe registered");
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.probes.lock().remove(name).is_some()
    }

    /// Invoke one probe and evolve its state.
    pub async fn check(&self, name: &str) -> Option<ProbeState> {
        let (check, timeout) = {
            let probes = self.probes.lock();
            let probe = probes.get(name)?;
            (probe.check.clone(), probe.config.timeout)
        };

        let started = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, check()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (success, error) = match outcome {
            Ok(Ok(true)) => (true, None),
            Ok(Ok(false)) => (false, Some("health check returned false".to_owned())),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("health check timed out after {timeout:?}"))),
        };

        let (state, fire_recovery) = {
            let mut probes = self.probes.lock();
            let probe = probes.get_mut(name)?;
            let previous = probe.health.state;

            probe.health.last_check = Some(Utc::now());
            probe.health.latency_ms = Some(latency_ms);
            probe.health.error = error;
            if success {
                probe.health.last_success = Some(Utc::now());
            }

            apply_transition(&mut probe.health, &probe.config, success);

            let entered_unhealthy =
                previous != ProbeState::Unhealthy && probe.health.state == ProbeState::Unhealthy;
            if previous != probe.health.state {
                TraceEvent::ProbeStateChanged {
                    probe: name.to_owned(),
                    state: format!("{:?}", probe.health.state),
                }
                .emit();
            }

            let recovery = (entered_unhealthy && probe.config.auto_recover)
                .then(|| probe.recover.clone())
                .flatten();
            (probe.health.state, recovery)
        };

        if let Some(recover) = fire_recovery {
            tracing::warn!(probe = name, "probe unhealthy, invoking recovery callback");
            recover(name.to_owned()).await;
        }

        Some(state)
    }

    /// Check every registered probe once.
    pub async fn check_all(&self) {
        let names: Vec<String> = self.probes.lock().keys().cloned().collect();
        for name in names {
            self.check(&name).await;
        }
    }

    /// The worst state across all probes.
    pub fn overall_status(&self) -> ProbeState {
        self.probes
            .lock()
            .values()
            .map(|p| p.health.state)
            .max()
            .unwrap_or(ProbeState::Healthy)
    }

    /// True when every required probe is healthy or degraded.
    pub fn required_passing(&self) -> bool {
        self.probes
            .lock()
            .values()
            .filter(|p| p.config.required)
            .all(|p| p.health.state != ProbeState::Unhealthy)
    }

    pub fn report(&self) -> Vec<ProbeHealth> {
        let mut report: Vec<ProbeHealth> = self
            .probes
            .lock()
            .values()
            .map(|p| p.health.clone())
            .collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    /// Background loop checking all probes at the default interval.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        let interval = Duration::from_secs(monitor.defaults.interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.check_all().await;
            }
        })
    }
}

/// Evolve one probe's state from a single check result.
fn apply_transition(health: &mut ProbeHealth, config: &ProbeConfig, success: bool) {
    match (health.state, success) {
        (ProbeState::Healthy, false) => {
            health.failure_count += 1;
            if health.failure_count >= config.failure_threshold {
                health.state = ProbeState::Unhealthy;
                health.success_count = 0;
            }
        }
        (ProbeState::Healthy, true) => {
            // Counter is monotone within the state; it resets on re-entry.
        }
        (ProbeState::Unhealthy, true) => {
            health.success_count += 1;
            if health.success_count >= config.recovery_threshold {
                health.state = ProbeState::Healthy;
                health.failure_count = 0;
                health.success_count = 0;
            } else {
                health.state = ProbeState::Degraded;
            }
        }
        (ProbeState::Unhealthy, false) => {}
        (ProbeState::Degraded, true) => {
            health.success_count += 1;
            if health.success_count >= config.recovery_threshold {
                health.state = ProbeState::Healthy;
                health.failure_count = 0;
                health.success_count = 0;
            }
        }
        (ProbeState::Degraded, false) => {
            health.state = ProbeState::Unhealthy;
            health.success_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn config(failure_threshold: u32, recovery_threshold: u32) -> ProbeConfig {
        ProbeConfig {
            interval: Duration::from_secs(30),
            timeout: Duration::from_millis(200),
            failure_threshold,
            recovery_threshold,
            auto_recover: true,
            required: false,
        }
    }

    fn flag_probe(flag: Arc<AtomicBool>) -> ProbeFn {
        Arc::new(move || {
            let flag = flag.clone();
            Box::pin(async move { Ok(flag.load(Ordering::SeqCst)) })
        })
    }

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig::default())
    }

    #[tokio::test]
    async fn healthy_until_threshold() {
        let m = monitor();
        let ok = Arc::new(AtomicBool::new(false));
        m.register_with("svc", config(3, 2), flag_probe(ok.clone()), None);

        assert_eq!(m.check("svc").await, Some(ProbeState::Healthy));
        assert_eq!(m.check("svc").await, Some(ProbeState::Healthy));
        // Third failure reaches the threshold.
        assert_eq!(m.check("svc").await, Some(ProbeState::Unhealthy));
    }

    #[tokio::test]
    async fn recovery_goes_through_degraded() {
        let m = monitor();
        let ok = Arc::new(AtomicBool::new(false));
        m.register_with("svc", config(1, 2), flag_probe(ok.clone()), None);

        assert_eq!(m.check("svc").await, Some(ProbeState::Unhealthy));

        ok.store(true, Ordering::SeqCst);
        assert_eq!(m.check("svc").await, Some(ProbeState::Degraded));
        assert_eq!(m.check("svc").await, Some(ProbeState::Healthy));
    }

    #[tokio::test]
    async fn degraded_failure_falls_back_to_unhealthy() {
        let m = monitor();
        let ok = Arc::new(AtomicBool::new(false));
        m.register_with("svc", config(1, 3), flag_probe(ok.clone()), None);

        m.check("svc").await; // Unhealthy
        ok.store(true, Ordering::SeqCst);
        assert_eq!(m.check("svc").await, Some(ProbeState::Degraded));
        ok.store(false, Ordering::SeqCst);
        assert_eq!(m.check("svc").await, Some(ProbeState::Unhealthy));
    }

    #[tokio::test]
    async fn failure_counter_is_monotone_in_healthy() {
        let m = monitor();
        let ok = Arc::new(AtomicBool::new(false));
        m.register_with("svc", config(5, 2), flag_probe(ok.clone()), None);

        m.check("svc").await;
        m.check("svc").await;
        let count_after_failures = m.report()[0].failure_count;
        assert_eq!(count_after_failures, 2);

        // A success while Healthy does not decrease the counter.
        ok.store(true, Ordering::SeqCst);
        m.check("svc").await;
        assert_eq!(m.report()[0].failure_count, 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let m = monitor();
        let slow: ProbeFn = Arc::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(true)
            })
        });
        m.register_with("slow", config(1, 2), slow, None);

        assert_eq!(m.check("slow").await, Some(ProbeState::Unhealthy));
        let report = m.report();
        assert!(report[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn probe_error_counts_as_failure() {
        let m = monitor();
        let failing: ProbeFn =
            Arc::new(|| Box::pin(async { Err(cb_domain::Error::Internal("probe broke".into())) }));
        m.register_with("bad", config(1, 2), failing, None);
        assert_eq!(m.check("bad").await, Some(ProbeState::Unhealthy));
    }

    #[tokio::test]
    async fn recovery_callback_fires_once_per_transition() {
        let m = monitor();
        let ok = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let recover: RecoveryFn = Arc::new(move |_name| {
            let calls = calls2.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });
        m.register_with("svc", config(1, 2), flag_probe(ok), Some(recover));

        m.check("svc").await; // → Unhealthy: callback fires
        m.check("svc").await; // still Unhealthy: no second call
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overall_is_worst_state() {
        let m = monitor();
        let ok = Arc::new(AtomicBool::new(true));
        let bad = Arc::new(AtomicBool::new(false));
        m.register_with("good", config(1, 2), flag_probe(ok), None);
        m.register_with("bad", config(1, 2), flag_probe(bad), None);

        m.check_all().await;
        assert_eq!(m.overall_status(), ProbeState::Unhealthy);
    }

    #[tokio::test]
    async fn required_probes_gate_readiness() {
        let m = monitor();
        let bad = Arc::new(AtomicBool::new(false));
        m.register_with("critical", config(1, 2).required(), flag_probe(bad.clone()), None);

        assert!(m.required_passing());
        m.check("critical").await;
        assert!(!m.required_passing());

        bad.store(true, Ordering::SeqCst);
        m.check("critical").await; // Degraded counts as passing
        assert!(m.required_passing());
    }

    #[tokio::test]
    async fn no_probes_is_healthy() {
        let m = monitor();
        assert_eq!(m.overall_status(), ProbeState::Healthy);
        assert!(m.required_passing());
    }
}
