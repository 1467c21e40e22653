//! Draft message streaming.
//!
//! A draft is a mutable reply handle bound to (chat id, message id).  Text
//! appended during a streamed executor run is buffered and flushed to the
//! platform as message edits: at least `batch_chars` buffered or
//! `min_update_interval` elapsed, debounced so rapid appends collapse into
//! one edit, and capped at `max_updates_per_second`.  Between flushes the
//! visible content carries a cursor glyph; the final edit always sends and
//! drops the cursor.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use cb_domain::config::StreamingConfig;
use cb_domain::trace::TraceEvent;
use cb_domain::Result;

/// Streaming states of one draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Paused,
    Completed,
    Error,
}

/// Payload handed to the update callback.
#[derive(Debug, Clone)]
pub struct DraftUpdate {
    pub chat_id: String,
    pub message_id: String,
    /// Visible content; carries the cursor glyph unless `final`.
    pub content: String,
    pub is_final: bool,
}

/// Platform edit callback.
pub type UpdateCallback = Arc<dyn Fn(DraftUpdate) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug)]
struct Draft {
    chat_id: String,
    message_id: String,
    content: String,
    buffer: String,
    state: StreamState,
    last_update: Option<Instant>,
    update_count: u32,
}

struct Inner {
    config: StreamingConfig,
    drafts: Mutex<HashMap<String, Draft>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    on_update: RwLock<Option<UpdateCallback>>,
    on_complete: RwLock<Option<UpdateCallback>>,
}

/// Owns all in-flight drafts.  Cheap to clone.
#[derive(Clone)]
pub struct DraftStreamer {
    inner: Arc<Inner>,
}

impl DraftStreamer {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                drafts: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                on_update: RwLock::new(None),
                on_complete: RwLock::new(None),
            }),
        }
    }

    /// Set the platform edit callback.
    pub fn on_update(&self, callback: UpdateCallback) {
        *self.inner.on_update.write() = Some(callback);
    }

    /// Set the completion callback, fired once per draft after the final
    /// edit.
    pub fn on_complete(&self, callback: UpdateCallback) {
        *self.inner.on_complete.write() = Some(callback);
    }

    // ── Stream lifecycle ─────────────────────────────────────────────

    /// Allocate a draft in state `streaming`.
    pub fn start_stream(&self, chat_id: &str, message_id: &str, initial: &str) {
        let key = draft_key(chat_id, message_id);
        let draft = Draft {
            chat_id: chat_id.to_owned(),
            message_id: message_id.to_owned(),
            content: initial.to_owned(),
            buffer: String::new(),
            state: StreamState::Streaming,
            last_update: None,
            update_count: 0,
        };
        self.inner.drafts.lock().insert(key.clone(), draft);
        tracing::debug!(key, "draft stream started");
    }

    /// Queue text onto the draft's buffer, scheduling a debounced flush
    /// when the batch threshold or the update interval is reached.
    pub fn append(&self, chat_id: &str, message_id: &str, text: &str) {
        let key = draft_key(chat_id, message_id);
        let should_flush = {
            let mut drafts = self.inner.drafts.lock();
            let Some(draft) = drafts.get_mut(&key) else {
                return;
            };
            if draft.state != StreamState::Streaming {
                return;
            }
            draft.buffer.push_str(text);

            draft.buffer.chars().count() >= self.inner.config.batch_chars
                || draft.last_update.is_none_or(|at| {
                    at.elapsed() >= Duration::from_millis(self.inner.config.min_update_interval_ms)
                })
        };

        if should_flush {
            self.schedule_flush(&key);
        }
    }

    /// Flush the buffer, mark completed, fire the final edit (always sent,
    /// no cursor) and the completion callback, then release the draft.
    pub async fn complete(&self, chat_id: &str, message_id: &str, final_content: Option<&str>) {
        let key = draft_key(chat_id, message_id);
        self.abort_timer(&key);

        let update = {
            let mut drafts = self.inner.drafts.lock();
            let Some(draft) = drafts.get_mut(&key) else {
                return;
            };
            let buffered = std::mem::take(&mut draft.buffer);
            draft.content.push_str(&buffered);
            if let Some(content) = final_content {
                draft.content = content.to_owned();
            }
            draft.state = StreamState::Completed;
            draft.update_count += 1;
            let update = DraftUpdate {
                chat_id: draft.chat_id.clone(),
                message_id: draft.message_id.clone(),
                content: draft.content.clone(),
                is_final: true,
            };
            TraceEvent::DraftCompleted {
                chat_id: draft.chat_id.clone(),
                edits: draft.update_count,
            }
            .emit();
            update
        };

        let on_update = self.inner.on_update.read().clone();
        if let Some(callback) = on_update {
            if let Err(e) = callback(update.clone()).await {
                tracing::error!(error = %e, "final draft update failed");
            }
        }
        let on_complete = self.inner.on_complete.read().clone();
        if let Some(callback) = on_complete {
            if let Err(e) = callback(update).await {
                tracing::error!(error = %e, "draft completion callback failed");
            }
        }

        self.inner.drafts.lock().remove(&key);
        tracing::debug!(key, "draft stream completed");
    }

    /// Drop a draft without a final update.
    pub fn cancel(&self, chat_id: &str, message_id: &str) {
        let key = draft_key(chat_id, message_id);
        self.abort_timer(&key);
        self.inner.drafts.lock().remove(&key);
    }

    /// Number of drafts currently streaming.
    pub fn active_count(&self) -> usize {
        self.inner
            .drafts
            .lock()
            .values()
            .filter(|d| d.state == StreamState::Streaming)
            .count()
    }

    // ── Flush machinery ──────────────────────────────────────────────

    /// The effective minimum gap between platform edits: the configured
    /// interval, but never more often than `max_updates_per_second`.
    fn min_gap(&self) -> Duration {
        let interval = Duration::from_millis(self.inner.config.min_update_interval_ms);
        let ceiling = Duration::from_secs_f64(1.0 / self.inner.config.max_updates_per_second);
        interval.max(ceiling)
    }

    /// (Re-)arm the debounce timer.  An append within the window cancels
    /// and reschedules the previous timer.
    fn schedule_flush(&self, key: &str) {
        self.abort_timer(key);

        let streamer = self.clone();
        let key_owned = key.to_owned();
        let debounce = Duration::from_millis(self.inner.config.debounce_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            streamer.flush(&key_owned).await;
        });
        self.inner.timers.lock().insert(key.to_owned(), handle);
    }

    fn flush<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // Honor the edit-rate ceiling: if the last edit was too recent,
            // re-arm the timer for the remainder instead of editing now.
            let reschedule_after = {
                let drafts = self.inner.drafts.lock();
                let Some(draft) = drafts.get(key) else { return };
                draft
                    .last_update
                    .map(|at| at.elapsed())
                    .filter(|elapsed| *elapsed < self.min_gap())
                    .map(|elapsed| self.min_gap() - elapsed)
            };
            if let Some(remaining) = reschedule_after {
                let streamer = self.clone();
                let key_owned = key.to_owned();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(remaining).await;
                    streamer.flush(&key_owned).await;
                });
                self.inner.timers.lock().insert(key.to_owned(), handle);
                return;
            }

            let update = {
                let mut drafts = self.inner.drafts.lock();
                let Some(draft) = drafts.get_mut(key) else { return };
                if draft.buffer.is_empty() || draft.state != StreamState::Streaming {
                    return;
                }
                let buffered = std::mem::take(&mut draft.buffer);
                draft.content.push_str(&buffered);
                draft.last_update = Some(Instant::now());
                draft.update_count += 1;

                let mut content = draft.content.clone();
                if self.inner.config.show_cursor {
                    content.push_str(&self.inner.config.cursor);
                }
                DraftUpdate {
                    chat_id: draft.chat_id.clone(),
                    message_id: draft.message_id.clone(),
                    content,
                    is_final: false,
                }
            };

            let on_update = self.inner.on_update.read().clone();
            if let Some(callback) = on_update {
                if let Err(e) = callback(update).await {
                    tracing::error!(error = %e, "draft update failed");
                    if let Some(draft) = self.inner.drafts.lock().get_mut(key) {
                        draft.state = StreamState::Error;
                    }
                }
            }
        })
    }

    fn abort_timer(&self, key: &str) {
        if let Some(handle) = self.inner.timers.lock().remove(key) {
            handle.abort();
        }
    }
}

fn draft_key(chat_id: &str, message_id: &str) -> String {
    format!("{chat_id}:{message_id}")
}
