//! The unified gateway — platform-agnostic ingress/egress hub.
//!
//! Adapters register against a transport tag.  Inbound messages flow through
//! an ordered middleware chain and fan out to registered handlers; outbound
//! messages fan out to one or all adapters.  Handler and adapter failures
//! are isolated: one failure never aborts the rest of the chain.

pub mod adapter;
pub mod dedupe;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;

use cb_domain::message::{OutgoingMessage, SendReport, Transport, UnifiedMessage};
use cb_domain::{Error, Result};

pub use adapter::ChannelAdapter;
pub use dedupe::DedupeStore;

/// Middleware: transform or drop an inbound message.  Returning `None`
/// filters the message out.
pub type Middleware =
    Arc<dyn Fn(UnifiedMessage) -> BoxFuture<'static, Option<UnifiedMessage>> + Send + Sync>;

/// A terminal consumer of inbound messages.
pub type MessageHandler =
    Arc<dyn Fn(UnifiedMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Gateway throughput counters.
#[derive(Debug, Default, Serialize)]
pub struct GatewayStats {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub handler_errors: u64,
    pub adapters: Vec<String>,
}

pub struct Gateway {
    adapters: RwLock<HashMap<Transport, Arc<dyn ChannelAdapter>>>,
    /// Adapters whose `start()` failed; excluded from fan-out until restarted.
    down: RwLock<HashSet<Transport>>,
    middleware: RwLock<Vec<Middleware>>,
    handlers: RwLock<Vec<MessageHandler>>,
    shutting_down: AtomicBool,
    received: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    handler_errors: AtomicU64,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            down: RwLock::new(HashSet::new()),
            middleware: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        }
    }

    // ── Adapter management ───────────────────────────────────────────

    pub fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) {
        let transport = adapter.transport();
        self.adapters.write().insert(transport, adapter);
        tracing::info!(transport = %transport, "adapter registered");
    }

    pub fn unregister_adapter(&self, transport: Transport) {
        self.adapters.write().remove(&transport);
        self.down.write().remove(&transport);
    }

    pub fn adapter(&self, transport: Transport) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.read().get(&transport).cloned()
    }

    pub fn list_adapters(&self) -> Vec<Transport> {
        self.adapters.read().keys().copied().collect()
    }

    // ── Ingress ──────────────────────────────────────────────────────

    pub fn use_middleware(&self, mw: Middleware) {
        self.middleware.write().push(mw);
    }

    pub fn on_message(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }

    /// Process an incoming message: middleware chain, then handler fan-out.
    ///
    /// Handler errors are counted and logged; they never abort the chain for
    /// the remaining handlers.
    pub async fn receive(&self, message: UnifiedMessage) {
        self.received.fetch_add(1, Ordering::Relaxed);

        if self.shutting_down.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(id = %message.id, "dropping inbound message during shutdown");
            return;
        }

        let middleware: Vec<Middleware> = self.middleware.read().clone();
        let mut message = message;
        for mw in middleware {
            match mw(message).await {
                Some(next) => message = next,
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        let handlers: Vec<MessageHandler> = self.handlers.read().clone();
        for handler in handlers {
            if let Err(e) = handler(message.clone()).await {
                self.handler_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, id = %message.id, "message handler failed");
            }
        }
    }

    // ── Egress ───────────────────────────────────────────────────────

    /// Send a message.  When `transport` is unset, fan out to every
    /// registered adapter that is up.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<SendReport> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::Unavailable("gateway is shutting down".into()));
        }

        let targets: Vec<Arc<dyn ChannelAdapter>> = match message.transport {
            Some(transport) => match self.adapter(transport) {
                Some(a) => vec![a],
                None => {
                    return Ok(SendReport {
                        success: vec![],
                        failed: vec![(transport.to_string(), "no adapter".into())],
                    })
                }
            },
            None => {
                let down = self.down.read().clone();
                self.adapters
                    .read()
                    .iter()
                    .filter(|(t, _)| !down.contains(t))
                    .map(|(_, a)| a.clone())
                    .collect()
            }
        };

        let mut report = SendReport::default();
        for adapter in targets {
            let tag = adapter.transport().to_string();
            match adapter.send(message).await {
                Ok(true) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    report.success.push(tag);
                }
                Ok(false) => report.failed.push((tag, "send refused".into())),
                Err(e) => report.failed.push((tag, e.to_string())),
            }
        }
        Ok(report)
    }

    /// `send` with the transport unset.
    pub async fn broadcast(&self, chat_id: &str, content: &str) -> Result<SendReport> {
        self.send(&OutgoingMessage::text(chat_id, content)).await
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start every adapter.  Individual failures are isolated: the adapter
    /// is marked down and the gateway keeps starting the rest.
    pub async fn start(&self) {
        let adapters: Vec<Arc<dyn ChannelAdapter>> =
            self.adapters.read().values().cloned().collect();
        for adapter in adapters {
            let transport = adapter.transport();
            match adapter.start().await {
                Ok(()) => {
                    self.down.write().remove(&transport);
                    tracing::info!(transport = %transport, "adapter started");
                }
                Err(e) => {
                    self.down.write().insert(transport);
                    tracing::error!(transport = %transport, error = %e, "adapter failed to start");
                }
            }
        }
    }

    pub async fn stop(&self) {
        let adapters: Vec<Arc<dyn ChannelAdapter>> =
            self.adapters.read().values().cloned().collect();
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                tracing::warn!(transport = %adapter.transport(), error = %e, "adapter stop failed");
            }
        }
    }

    /// Flip the gateway into shutdown mode: inbound messages are dropped and
    /// `send` fails fast with `Unavailable`.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            messages_received: self.received.load(Ordering::Relaxed),
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            adapters: self
                .list_adapters()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cb_domain::message::{CanonicalUser, ChatKind, MessageKind};
    use parking_lot::Mutex;

    /// Records everything sent through it.
    struct RecordingAdapter {
        transport: Transport,
        sent: Mutex<Vec<OutgoingMessage>>,
        fail_sends: bool,
    }

    impl RecordingAdapter {
        fn new(transport: Transport) -> Arc<Self> {
            Arc::new(Self {
                transport,
                sent: Mutex::new(Vec::new()),
                fail_sends: false,
            })
        }

        fn failing(transport: Transport) -> Arc<Self> {
            Arc::new(Self {
                transport,
                sent: Mutex::new(Vec::new()),
                fail_sends: true,
            })
        }
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn transport(&self) -> Transport {
            self.transport
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, message: &OutgoingMessage) -> Result<bool> {
            if self.fail_sends {
                return Err(Error::Internal("boom".into()));
            }
            self.sent.lock().push(message.clone());
            Ok(true)
        }
        async fn get_user(&self, _id: &str) -> Option<CanonicalUser> {
            None
        }
    }

    fn message(content: &str) -> UnifiedMessage {
        UnifiedMessage {
            id: uuid::Uuid::new_v4().to_string(),
            transport: Transport::Telegram,
            kind: MessageKind::Text,
            content: content.into(),
            sender: CanonicalUser {
                transport: Transport::Telegram,
                platform_id: "42".into(),
                username: String::new(),
                display_name: String::new(),
                is_bot: false,
                metadata: Default::default(),
            },
            chat_id: "42".into(),
            chat_kind: ChatKind::Direct,
            timestamp: chrono::Utc::now(),
            reply_to: None,
            thread_id: None,
            attachments: vec![],
            metadata: Default::default(),
            raw: None,
        }
    }

    #[tokio::test]
    async fn send_fans_out_to_all_adapters() {
        let gateway = Gateway::new();
        let tg = RecordingAdapter::new(Transport::Telegram);
        let dc = RecordingAdapter::new(Transport::Discord);
        gateway.register_adapter(tg.clone());
        gateway.register_adapter(dc.clone());

        let report = gateway.broadcast("chat", "hello").await.unwrap();
        assert_eq!(report.success.len(), 2);
        assert_eq!(tg.sent.lock().len(), 1);
        assert_eq!(dc.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn targeted_send_hits_one_adapter() {
        let gateway = Gateway::new();
        let tg = RecordingAdapter::new(Transport::Telegram);
        let dc = RecordingAdapter::new(Transport::Discord);
        gateway.register_adapter(tg.clone());
        gateway.register_adapter(dc.clone());

        let msg = OutgoingMessage::text("chat", "hi").to_transport(Transport::Discord);
        let report = gateway.send(&msg).await.unwrap();
        assert_eq!(report.success, vec!["discord".to_string()]);
        assert!(tg.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn failing_adapter_reported_not_fatal() {
        let gateway = Gateway::new();
        gateway.register_adapter(RecordingAdapter::new(Transport::Telegram));
        gateway.register_adapter(RecordingAdapter::failing(Transport::Discord));

        let report = gateway.broadcast("chat", "hi").await.unwrap();
        assert_eq!(report.success, vec!["telegram".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "discord");
    }

    #[tokio::test]
    async fn middleware_can_drop_messages() {
        let gateway = Arc::new(Gateway::new());
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        gateway.use_middleware(Arc::new(|msg: UnifiedMessage| {
            Box::pin(async move {
                if msg.content.contains("spam") {
                    None
                } else {
                    Some(msg)
                }
            })
        }));

        let seen2 = seen.clone();
        gateway.on_message(Arc::new(move |msg: UnifiedMessage| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.lock().push(msg.content);
                Ok(())
            })
        }));

        gateway.receive(message("hello")).await;
        gateway.receive(message("buy spam now")).await;

        assert_eq!(&*seen.lock(), &["hello".to_string()]);
        assert_eq!(gateway.stats().messages_dropped, 1);
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_other_handlers() {
        let gateway = Arc::new(Gateway::new());
        let reached = Arc::new(Mutex::new(false));

        gateway.on_message(Arc::new(|_msg| {
            Box::pin(async { Err(Error::Internal("handler exploded".into())) })
        }));
        let reached2 = reached.clone();
        gateway.on_message(Arc::new(move |_msg| {
            let reached = reached2.clone();
            Box::pin(async move {
                *reached.lock() = true;
                Ok(())
            })
        }));

        gateway.receive(message("hi")).await;
        assert!(*reached.lock());
        assert_eq!(gateway.stats().handler_errors, 1);
    }

    #[tokio::test]
    async fn send_after_shutdown_is_unavailable() {
        let gateway = Gateway::new();
        gateway.register_adapter(RecordingAdapter::new(Transport::Telegram));
        gateway.begin_shutdown();

        let err = gateway.broadcast("chat", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn middleware_transform_applies_in_order() {
        let gateway = Arc::new(Gateway::new());
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        gateway.use_middleware(Arc::new(|mut msg: UnifiedMessage| {
            Box::pin(async move {
                msg.content = format!("{}!", msg.content);
                Some(msg)
            })
        }));
        gateway.use_middleware(Arc::new(|mut msg: UnifiedMessage| {
            Box::pin(async move {
                msg.content = msg.content.to_uppercase();
                Some(msg)
            })
        }));

        let seen2 = seen.clone();
        gateway.on_message(Arc::new(move |msg: UnifiedMessage| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.lock().push(msg.content);
                Ok(())
            })
        }));

        gateway.receive(message("hey")).await;
        assert_eq!(&*seen.lock(), &["HEY!".to_string()]);
    }
}
