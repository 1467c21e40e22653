//! The transport adapter contract.
//!
//! One implementation per messenger platform.  Adapters normalize platform
//! events into [`UnifiedMessage`] and call [`Gateway::receive`] on ingress;
//! the gateway calls [`ChannelAdapter::send`] on egress.
//!
//! [`Gateway::receive`]: super::Gateway::receive

use async_trait::async_trait;

use cb_domain::message::{CanonicalUser, OutgoingMessage, Transport};
use cb_domain::Result;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The transport this adapter serves.
    fn transport(&self) -> Transport;

    /// Connect to the platform and start delivering inbound events.
    async fn start(&self) -> Result<()>;

    /// Disconnect.  Must be safe to call more than once.
    async fn stop(&self) -> Result<()>;

    /// Send a message.  Returns `Ok(false)` for a soft refusal (e.g. unknown
    /// chat) and `Err` for transport failures.
    async fn send(&self, message: &OutgoingMessage) -> Result<bool>;

    /// Resolve a platform sender ID to its user descriptor, if known.
    async fn get_user(&self, platform_sender_id: &str) -> Option<CanonicalUser>;
}
