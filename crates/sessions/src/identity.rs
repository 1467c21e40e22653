//! Identity linking — collapse the same person across transports.
//!
//! Maps many raw peer IDs to one canonical identity so "Alice on Telegram"
//! and "Alice on Signal" share the same DM session when desired.
//!
//! Input IDs are prefixed: `telegram:123`, `discord:987`, `signal:+33…`.
//! If an inbound peer matches any entry, the session key uses the canonical
//! identity (e.g. `alice`) in place of the raw peer ID.  A peer belongs to at
//! most one canonical identity; duplicate links keep the first mapping.

use std::collections::HashMap;

use cb_domain::config::IdentityLink;
use cb_domain::trace::TraceEvent;

/// Resolves raw peer IDs to canonical identities.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    /// peer_id → canonical
    map: HashMap<String, String>,
}

impl IdentityResolver {
    /// Build a resolver from the configured identity links.
    pub fn from_config(links: &[IdentityLink]) -> Self {
        let mut map = HashMap::new();
        for link in links {
            for pid in &link.peer_ids {
                if let Some(existing) = map.get(pid) {
                    if existing != &link.canonical {
                        tracing::warn!(
                            peer_id = %pid,
                            kept = %existing,
                            ignored = %link.canonical,
                            "peer linked to multiple identities; keeping first"
                        );
                    }
                    continue;
                }
                map.insert(pid.clone(), link.canonical.clone());
            }
        }
        Self { map }
    }

    /// Resolve a raw peer ID.  If the peer matches a configured identity
    /// link, returns the canonical identity.  Otherwise returns the raw ID
    /// unchanged.
    pub fn resolve(&self, raw_peer_id: &str) -> String {
        if let Some(canonical) = self.map.get(raw_peer_id) {
            TraceEvent::IdentityResolved {
                raw_peer_id: raw_peer_id.to_owned(),
                canonical: canonical.clone(),
            }
            .emit();
            canonical.clone()
        } else {
            raw_peer_id.to_owned()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of raw peer IDs mapped.
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
