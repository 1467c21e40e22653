//! Liveness: per-dependency heartbeat probes and the multi-gateway fleet
//! supervisor.

pub mod fleet;
pub mod heartbeat;

pub use fleet::{FleetSupervisor, GatewayInstance, GatewayState};
pub use heartbeat::{HeartbeatMonitor, ProbeState};
