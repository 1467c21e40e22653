//! Session key computation.
//!
//! Key templates:
//! - `agent:<agentId>:<mainKey>`                       (DM scope = main)
//! - `agent:<agentId>:dm:<peerId>`                     (DM scope = per-peer)
//! - `agent:<agentId>:<transport>:dm:<peerId>`         (DM scope = per-channel-peer)
//! - `agent:<agentId>:<transport>:group:<chatId>[:topic:<threadId>]`
//! - `agent:<agentId>:<transport>:thread:<chatId>:<threadId>`
//! - `agent:<agentId>:<transport>:channel:<chatId>`

use cb_domain::config::{DmScope, InboundMetadata};
use cb_domain::message::ChatKind;

/// Compute a stable session key from the agent ID, DM scope, main key, and
/// inbound message metadata.  The key deterministically routes messages to
/// sessions.
pub fn compute_session_key(
    agent_id: &str,
    dm_scope: DmScope,
    main_key: &str,
    meta: &InboundMetadata,
) -> String {
    let base = format!("agent:{agent_id}");
    let transport = meta.transport.as_deref().unwrap_or("default");
    let chat = meta.chat_id.as_deref().unwrap_or("unknown");

    match meta.chat_kind {
        ChatKind::Direct => {
            let peer = meta.peer_id.as_deref().unwrap_or("unknown");
            match dm_scope {
                DmScope::Main => format!("{base}:{main_key}"),
                DmScope::PerPeer => format!("{base}:dm:{peer}"),
                DmScope::PerChannelPeer => format!("{base}:{transport}:dm:{peer}"),
            }
        }
        ChatKind::Group => {
            let key = format!("{base}:{transport}:group:{chat}");
            match &meta.thread_id {
                Some(tid) => format!("{key}:topic:{tid}"),
                None => key,
            }
        }
        ChatKind::Thread => {
            let tid = meta.thread_id.as_deref().unwrap_or("unknown");
            format!("{base}:{transport}:thread:{chat}:{tid}")
        }
        ChatKind::Channel => format!("{base}:{transport}:channel:{chat}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(transport: &str, peer: &str, chat: &str) -> InboundMetadata {
        InboundMetadata {
            transport: Some(transport.into()),
            peer_id: Some(peer.into()),
            chat_id: Some(chat.into()),
            thread_id: None,
            chat_kind: ChatKind::Direct,
        }
    }

    #[test]
    fn dm_main_scope() {
        let key = compute_session_key("default", DmScope::Main, "main", &dm("telegram", "42", "42"));
        assert_eq!(key, "agent:default:main");
    }

    #[test]
    fn dm_main_scope_ignores_peer() {
        // Two different senders collapse onto the same key under `main`.
        let a = compute_session_key("default", DmScope::Main, "main", &dm("telegram", "42", "42"));
        let b = compute_session_key("default", DmScope::Main, "main", &dm("telegram", "7", "7"));
        assert_eq!(a, b);
    }

    #[test]
    fn dm_per_peer() {
        let key =
            compute_session_key("default", DmScope::PerPeer, "main", &dm("telegram", "alice", "a"));
        assert_eq!(key, "agent:default:dm:alice");
    }

    #[test]
    fn dm_per_peer_isolates_users() {
        let alice =
            compute_session_key("default", DmScope::PerPeer, "main", &dm("telegram", "alice", "a"));
        let bob =
            compute_session_key("default", DmScope::PerPeer, "main", &dm("telegram", "bob", "b"));
        assert_eq!(alice, "agent:default:dm:alice");
        assert_eq!(bob, "agent:default:dm:bob");
        assert_ne!(alice, bob);
    }

    #[test]
    fn dm_per_channel_peer_differs_by_transport() {
        // Same canonical user on two transports gets two keys.
        let tg = compute_session_key(
            "default",
            DmScope::PerChannelPeer,
            "main",
            &dm("telegram", "alice", "42"),
        );
        let line = compute_session_key(
            "default",
            DmScope::PerChannelPeer,
            "main",
            &dm("line", "alice", "7"),
        );
        assert_eq!(tg, "agent:default:telegram:dm:alice");
        assert_eq!(line, "agent:default:line:dm:alice");
        assert_ne!(tg, line);
    }

    #[test]
    fn group_key_with_topic() {
        let meta = InboundMetadata {
            transport: Some("telegram".into()),
            peer_id: Some("alice".into()),
            chat_id: Some("g99".into()),
            thread_id: Some("t5".into()),
            chat_kind: ChatKind::Group,
        };
        let key = compute_session_key("default", DmScope::PerChannelPeer, "main", &meta);
        assert_eq!(key, "agent:default:telegram:group:g99:topic:t5");
    }

    #[test]
    fn thread_and_channel_keys() {
        let thread = InboundMetadata {
            transport: Some("discord".into()),
            chat_id: Some("c1".into()),
            thread_id: Some("th2".into()),
            chat_kind: ChatKind::Thread,
            ..Default::default()
        };
        assert_eq!(
            compute_session_key("default", DmScope::Main, "main", &thread),
            "agent:default:discord:thread:c1:th2"
        );

        let channel = InboundMetadata {
            transport: Some("discord".into()),
            chat_id: Some("c1".into()),
            chat_kind: ChatKind::Channel,
            ..Default::default()
        };
        assert_eq!(
            compute_session_key("default", DmScope::Main, "main", &channel),
            "agent:default:discord:channel:c1"
        );
    }

    #[test]
    fn key_is_pure() {
        let meta = dm("telegram", "alice", "42");
        let a = compute_session_key("bot", DmScope::PerChannelPeer, "main", &meta);
        let b = compute_session_key("bot", DmScope::PerChannelPeer, "main", &meta);
        assert_eq!(a, b);
    }
}
