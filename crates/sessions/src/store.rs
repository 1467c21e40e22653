//! Gateway-owned session registry.
//!
//! Persists session state in `sessions.json` under the configured state
//! path; archived sessions go to `sessions_archive.json` with their counters
//! preserved.  Snapshots are written through on mutation via a temp file and
//! atomic rename; a failed write logs a warning and never fails the
//! in-memory operation.  Load-time errors degrade to an empty registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use cb_domain::error::{Error, Result};
use cb_domain::trace::TraceEvent;

use crate::lifecycle::ResetReason;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Origin metadata describing where the session came from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionOrigin {
    #[serde(default)]
    pub label: Option<String>,
    /// Transport tag (`"telegram"`, `"discord"`, …).
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub from_id: Option<String>,
    #[serde(default)]
    pub to_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// A single session tracked by the gateway.
///
/// Readers must tolerate missing fields; everything except the identifiers
/// is serde-defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub session_key: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub chat_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub context_tokens: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub compaction_count: u64,
    #[serde(default)]
    pub origin: SessionOrigin,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    /// Executor-side chat handle, set after the first turn.
    #[serde(default)]
    pub cli_chat_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionEntry {
    pub fn new(session_key: &str, origin: SessionOrigin) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_key: session_key.to_owned(),
            user_id: origin.from_id.clone().unwrap_or_default(),
            chat_id: origin.to_id.clone().unwrap_or_default(),
            chat_type: String::new(),
            created_at: now,
            updated_at: now,
            last_message_at: now,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            context_tokens: 0,
            message_count: 0,
            compaction_count: 0,
            origin,
            display_name: None,
            channel: None,
            subject: None,
            cli_chat_id: None,
            metadata: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway-owned session registry backed by JSON snapshots.
///
/// Exactly one live session exists per session key; structural changes hold
/// the table's write lock, so concurrent `get_or_open` calls for the same
/// key serialize rather than conflict.
pub struct SessionStore {
    sessions_path: PathBuf,
    archive_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    archive: Mutex<Vec<SessionEntry>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions = load_map(&sessions_path);
        let archive_path = dir.join("sessions_archive.json");
        let archive = load_vec(&archive_path);

        tracing::info!(
            sessions = sessions.len(),
            archived = archive.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            archive_path,
            sessions: RwLock::new(sessions),
            archive: Mutex::new(archive),
        })
    }

    /// Look up a live session by its key.
    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Look up a live session by its ID.
    pub fn get_by_id(&self, session_id: &str) -> Result<SessionEntry> {
        self.sessions
            .read()
            .values()
            .find(|e| e.session_id == session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    /// Resolve or open a session for the given key.
    ///
    /// `stale` is consulted for an existing entry; `Some(reason)` archives it
    /// and opens a fresh session under the same key (display hints carried
    /// over).  Returns `(entry, opened)`.
    pub fn get_or_open<F>(
        &self,
        session_key: &str,
        origin: SessionOrigin,
        stale: F,
    ) -> (SessionEntry, bool)
    where
        F: FnOnce(&SessionEntry) -> Option<ResetReason>,
    {
        let mut sessions = self.sessions.write();

        if let Some(entry) = sessions.get(session_key) {
            match stale(entry) {
                None => {
                    let entry = entry.clone();
                    drop(sessions);
                    return (entry, false);
                }
                Some(reason) => {
                    let old = sessions.remove(session_key).expect("entry present");
                    let fresh = reopen_from(&old, session_key, origin);

                    TraceEvent::SessionReset {
                        session_key: session_key.to_owned(),
                        old_session_id: old.session_id.clone(),
                        new_session_id: fresh.session_id.clone(),
                        reason: reason.to_string(),
                    }
                    .emit();

                    self.archive.lock().push(old);
                    sessions.insert(session_key.to_owned(), fresh.clone());
                    drop(sessions);
                    self.persist();
                    return (fresh, true);
                }
            }
        }

        let entry = SessionEntry::new(session_key, origin);
        TraceEvent::SessionResolved {
            session_key: session_key.to_owned(),
            session_id: entry.session_id.clone(),
            is_new: true,
        }
        .emit();
        sessions.insert(session_key.to_owned(), entry.clone());
        drop(sessions);
        self.persist();
        (entry, true)
    }

    /// Force a new session for the key (manual reset), preserving display
    /// hints.  Returns the fresh entry, or `None` when no session exists.
    pub fn reset(&self, session_key: &str) -> Option<SessionEntry> {
        let mut sessions = self.sessions.write();
        let old = sessions.remove(session_key)?;
        let fresh = reopen_from(&old, session_key, old.origin.clone());

        TraceEvent::SessionReset {
            session_key: session_key.to_owned(),
            old_session_id: old.session_id.clone(),
            new_session_id: fresh.session_id.clone(),
            reason: ResetReason::Manual.to_string(),
        }
        .emit();

        self.archive.lock().push(old);
        sessions.insert(session_key.to_owned(), fresh.clone());
        drop(sessions);
        self.persist();
        Some(fresh)
    }

    /// Add to the token counters.  Counters only ever grow.
    pub fn record_tokens(&self, session_key: &str, input: u64, output: u64, context: u64) {
        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(session_key) {
                entry.input_tokens += input;
                entry.output_tokens += output;
                entry.total_tokens += input + output;
                entry.context_tokens = entry.context_tokens.max(context);
                entry.updated_at = Utc::now();
            }
        }
        self.persist();
    }

    /// Bump the message counter and the activity timestamps.
    pub fn increment_messages(&self, session_key: &str) {
        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(session_key) {
                entry.message_count += 1;
                let now = Utc::now();
                entry.updated_at = now;
                entry.last_message_at = now;
            }
        }
        self.persist();
    }

    /// Store the executor-side chat handle for a session.
    pub fn set_cli_chat_id(&self, session_key: &str, cli_chat_id: String) {
        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(session_key) {
                entry.cli_chat_id = Some(cli_chat_id);
            }
        }
        self.persist();
    }

    /// Touch the activity timestamps without counting a message.
    pub fn touch(&self, session_key: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.updated_at = Utc::now();
        }
    }

    /// Archive every stale session in one pass.  Called on a timer and at
    /// startup.  Returns the number archived.
    pub fn sweep<F>(&self, mut stale: F) -> usize
    where
        F: FnMut(&SessionEntry) -> Option<ResetReason>,
    {
        let mut archived = 0;
        {
            let mut sessions = self.sessions.write();
            let keys: Vec<String> = sessions.keys().cloned().collect();
            for key in keys {
                let is_stale = sessions
                    .get(&key)
                    .and_then(|e| stale(e))
                    .is_some();
                if is_stale {
                    if let Some(old) = sessions.remove(&key) {
                        self.archive.lock().push(old);
                        archived += 1;
                    }
                }
            }
        }
        if archived > 0 {
            tracing::info!(archived, "session sweep archived stale sessions");
            self.persist();
        }
        archived
    }

    /// List all live session entries.
    pub fn list(&self) -> Vec<SessionEntry> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn archived_count(&self) -> usize {
        self.archive.lock().len()
    }

    /// Persist the current state to disk.  Best-effort: failures are logged
    /// and never propagated to the caller.
    pub fn persist(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "session snapshot write failed");
        }
    }

    /// Write both snapshots via temp file + atomic rename.
    pub fn flush(&self) -> Result<()> {
        let live = {
            let sessions = self.sessions.read();
            serde_json::to_string_pretty(&*sessions)?
        };
        write_atomic(&self.sessions_path, &live)?;

        let archived = {
            let archive = self.archive.lock();
            serde_json::to_string_pretty(&*archive)?
        };
        write_atomic(&self.archive_path, &archived)?;
        Ok(())
    }
}

/// Mint a fresh session under the same key, carrying over display hints.
fn reopen_from(old: &SessionEntry, session_key: &str, origin: SessionOrigin) -> SessionEntry {
    let mut fresh = SessionEntry::new(session_key, origin);
    fresh.display_name = old.display_name.clone();
    fresh.subject = old.subject.clone();
    fresh.channel = old.channel.clone();
    fresh.chat_type = old.chat_type.clone();
    fresh
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(Error::Io)?;
    std::fs::write(tmp.path(), contents).map_err(Error::Io)?;
    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn load_map(path: &Path) -> HashMap<String, SessionEntry> {
    if !path.exists() {
        return HashMap::new();
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "corrupt session snapshot, starting empty");
            HashMap::new()
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read session snapshot, starting empty");
            HashMap::new()
        }
    }
}

fn load_vec(path: &Path) -> Vec<SessionEntry> {
    if !path.exists() {
        return Vec::new();
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ResetReason;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn origin(provider: &str, from: &str) -> SessionOrigin {
        SessionOrigin {
            provider: Some(provider.into()),
            from_id: Some(from.into()),
            ..Default::default()
        }
    }

    #[test]
    fn second_open_touches_not_creates() {
        // S1: same key twice resolves to the same session.
        let (store, _dir) = store();
        let (first, opened) = store.get_or_open("agent:default:main", origin("telegram", "42"), |_| None);
        assert!(opened);

        let (second, opened) =
            store.get_or_open("agent:default:main", origin("telegram", "42"), |_| None);
        assert!(!opened);
        assert_eq!(first.session_id, second.session_id);

        store.increment_messages("agent:default:main");
        store.increment_messages("agent:default:main");
        assert_eq!(store.get("agent:default:main").unwrap().message_count, 2);
    }

    #[test]
    fn per_peer_counters_are_isolated() {
        // S2: two keys, two sessions, independent counters.
        let (store, _dir) = store();
        store.get_or_open("agent:default:dm:alice", origin("telegram", "alice"), |_| None);
        store.get_or_open("agent:default:dm:bob", origin("telegram", "bob"), |_| None);

        store.record_tokens("agent:default:dm:alice", 10, 20, 0);
        let alice = store.get("agent:default:dm:alice").unwrap();
        let bob = store.get("agent:default:dm:bob").unwrap();
        assert_eq!(alice.total_tokens, 30);
        assert_eq!(bob.total_tokens, 0);
    }

    #[test]
    fn linked_identity_shares_canonical_user_totals() {
        // S3: per-transport keys differ but the canonical user aggregates.
        let (store, _dir) = store();
        store.get_or_open(
            "agent:default:telegram:dm:alice",
            origin("telegram", "alice"),
            |_| None,
        );
        store.get_or_open("agent:default:line:dm:alice", origin("line", "alice"), |_| None);

        store.record_tokens("agent:default:telegram:dm:alice", 5, 5, 0);
        store.record_tokens("agent:default:line:dm:alice", 7, 3, 0);

        let total: u64 = store
            .list()
            .iter()
            .filter(|e| e.user_id == "alice")
            .map(|e| e.total_tokens)
            .sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn stale_session_is_archived_and_reopened() {
        let (store, _dir) = store();
        let (first, _) = store.get_or_open("k", SessionOrigin::default(), |_| None);

        let (second, opened) = store.get_or_open("k", SessionOrigin::default(), |_| {
            Some(ResetReason::IdleTimeout { idle_minutes: 30 })
        });
        assert!(opened);
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(second.session_key, "k");
        assert_eq!(second.message_count, 0);
        assert_eq!(store.archived_count(), 1);
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn manual_reset_preserves_display_hints() {
        let (store, _dir) = store();
        store.get_or_open("k", SessionOrigin::default(), |_| None);
        {
            let mut sessions = store.sessions.write();
            let e = sessions.get_mut("k").unwrap();
            e.display_name = Some("Alice".into());
            e.subject = Some("build plans".into());
        }

        let fresh = store.reset("k").unwrap();
        assert_eq!(fresh.display_name.as_deref(), Some("Alice"));
        assert_eq!(fresh.subject.as_deref(), Some("build plans"));
        assert!(fresh.cli_chat_id.is_none());
    }

    #[test]
    fn counters_are_monotone() {
        let (store, _dir) = store();
        store.get_or_open("k", SessionOrigin::default(), |_| None);
        store.record_tokens("k", 5, 3, 100);
        store.record_tokens("k", 2, 1, 50);

        let e = store.get("k").unwrap();
        assert_eq!(e.input_tokens, 7);
        assert_eq!(e.output_tokens, 4);
        assert_eq!(e.total_tokens, 11);
        // Context window tracks the high-water mark.
        assert_eq!(e.context_tokens, 100);
        assert!(e.created_at <= e.updated_at);
        assert!(e.updated_at >= e.last_message_at || e.updated_at == e.last_message_at);
    }

    #[test]
    fn get_by_id_not_found() {
        let (store, _dir) = store();
        let err = store.get_by_id("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.get_or_open("k", origin("telegram", "42"), |_| None);
            store.record_tokens("k", 1, 2, 0);
            store.set_cli_chat_id("k", "chat-99".into());
            store.flush().unwrap();
        }

        let reloaded = SessionStore::new(dir.path()).unwrap();
        let e = reloaded.get("k").unwrap();
        assert_eq!(e.total_tokens, 3);
        assert_eq!(e.cli_chat_id.as_deref(), Some("chat-99"));
    }

    #[test]
    fn corrupt_snapshot_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sessions_dir = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions_dir).unwrap();
        std::fs::write(sessions_dir.join("sessions.json"), "{ not json").unwrap();

        let store = SessionStore::new(dir.path()).unwrap();
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let sessions_dir = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions_dir).unwrap();
        // A minimal legacy entry: identifiers and timestamps only.
        std::fs::write(
            sessions_dir.join("sessions.json"),
            r#"{"k":{"session_id":"s1","session_key":"k",
                "created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z"}}"#,
        )
        .unwrap();

        let store = SessionStore::new(dir.path()).unwrap();
        let e = store.get("k").unwrap();
        assert_eq!(e.message_count, 0);
        assert!(e.cli_chat_id.is_none());
    }

    #[test]
    fn sweep_archives_stale_entries() {
        let (store, _dir) = store();
        store.get_or_open("a", SessionOrigin::default(), |_| None);
        store.get_or_open("b", SessionOrigin::default(), |_| None);

        let archived = store.sweep(|e| {
            (e.session_key == "a").then_some(ResetReason::IdleTimeout { idle_minutes: 1 })
        });
        assert_eq!(archived, 1);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
    }
}
