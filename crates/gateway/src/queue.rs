//! Background task queue.
//!
//! Bounded in-memory priority queue feeding `max_concurrent` workers.
//! Priorities are Critical > High > Normal > Low with FIFO order inside a
//! priority.  Failed tasks retry with exponential backoff up to
//! `max_retries`; a pending task can be cancelled, a running one cannot.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use cb_domain::config::QueueConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The work itself: an async closure returning `Ok(result)` or
/// `Err(diagnostic)`.
pub type TaskJob =
    Arc<dyn Fn() -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// Completion callback, invoked once with the finished record.
pub type TaskCallback = Arc<dyn Fn(TaskRecord) -> BoxFuture<'static, ()> + Send + Sync>;

/// Public view of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
}

struct TaskSlot {
    record: TaskRecord,
    job: TaskJob,
    timeout: Duration,
    callback: Option<TaskCallback>,
}

/// Heap entry: higher priority first, then earlier submission.
struct QueuedEntry {
    priority: TaskPriority,
    seq: u64,
    id: Uuid,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedEntry {}
impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub total_tracked: usize,
    pub workers: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskQueue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    config: QueueConfig,
    tasks: Mutex<HashMap<Uuid, TaskSlot>>,
    heap: Mutex<BinaryHeap<QueuedEntry>>,
    notify: Notify,
    seq: AtomicU64,
    running: AtomicBool,
    running_count: AtomicUsize,
    last_start: Mutex<Option<Instant>>,
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
    workers: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tasks: Mutex::new(HashMap::new()),
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                running: AtomicBool::new(false),
                running_count: AtomicUsize::new(0),
                last_start: Mutex::new(None),
            }),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start the worker pool.  Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock();
        for worker_id in 0..self.inner.config.max_concurrent {
            let queue = self.clone();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id).await;
            }));
        }
        tracing::info!(
            workers = self.inner.config.max_concurrent,
            "task queue started"
        );
    }

    /// Submit a task.  Returns its ID.
    pub fn submit(
        &self,
        job: TaskJob,
        priority: TaskPriority,
        timeout: Option<Duration>,
        max_retries: Option<u32>,
        callback: Option<TaskCallback>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let record = TaskRecord {
            id,
            priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retries: 0,
            max_retries: max_retries.unwrap_or(self.inner.config.default_max_retries),
        };
        let slot = TaskSlot {
            record,
            job,
            timeout: timeout
                .unwrap_or(Duration::from_secs(self.inner.config.default_timeout_secs)),
            callback,
        };
        self.inner.tasks.lock().insert(id, slot);
        self.push(priority, id);
        tracing::debug!(task_id = %id, ?priority, "task submitted");
        id
    }

    fn push(&self, priority: TaskPriority, id: Uuid) {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.heap.lock().push(QueuedEntry { priority, seq, id });
        self.inner.notify.notify_one();
    }

    pub fn get(&self, id: &Uuid) -> Option<TaskRecord> {
        self.inner.tasks.lock().get(id).map(|s| s.record.clone())
    }

    /// Cancel a task.  Succeeds only while the task is still pending.
    pub fn cancel(&self, id: &Uuid) -> bool {
        let mut tasks = self.inner.tasks.lock();
        match tasks.get_mut(id) {
            Some(slot) if slot.record.status == TaskStatus::Pending => {
                slot.record.status = TaskStatus::Cancelled;
                slot.record.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Wait for a task to reach a terminal state.
    pub async fn wait(&self, id: &Uuid, timeout: Duration) -> Option<TaskRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.get(id) {
                Some(record) if record.status.is_terminal() => return Some(record),
                Some(_) => {
                    if Instant::now() >= deadline {
                        return self.get(id);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                None => return None,
            }
        }
    }

    /// Stop the queue.  `drain` waits for running tasks before cancelling
    /// workers; otherwise workers are cancelled immediately and pending
    /// tasks stay in the queue.
    pub async fn stop(&self, drain: bool) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();

        if drain {
            while self.inner.running_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
        tracing::info!(drain, "task queue stopped");
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.inner.heap.lock().len(),
            running: self.inner.running_count.load(Ordering::SeqCst),
            total_tracked: self.inner.tasks.lock().len(),
            workers: self.workers.lock().len(),
        }
    }

    /// Remove terminal tasks older than `older_than`.
    pub fn evict_terminal(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        self.inner.tasks.lock().retain(|_, slot| {
            !slot.record.status.is_terminal()
                || slot.record.completed_at.is_none_or(|at| at > cutoff)
        });
    }

    // ── Worker ───────────────────────────────────────────────────────

    async fn worker_loop(&self, _worker_id: usize) {
        while self.inner.running.load(Ordering::SeqCst) {
            let popped = self.inner.heap.lock().pop();
            let Some(entry) = popped else {
                // Nothing queued; park until a submit.
                let notified = self.inner.notify.notified();
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }
                continue;
            };

            // Optional global minimum gap between task starts.
            if let Some(gap) = self.inner.config.rate_limit_gap_secs {
                let wait = {
                    let last = self.inner.last_start.lock();
                    last.map(|at| {
                        Duration::from_secs_f64(gap).saturating_sub(at.elapsed())
                    })
                };
                if let Some(wait) = wait.filter(|w| !w.is_zero()) {
                    tokio::time::sleep(wait).await;
                }
                *self.inner.last_start.lock() = Some(Instant::now());
            }

            self.execute(entry.id).await;
        }
    }

    async fn execute(&self, id: Uuid) {
        let (job, timeout) = {
            let mut tasks = self.inner.tasks.lock();
            let Some(slot) = tasks.get_mut(&id) else { return };
            // Cancelled while queued: skip silently.
            if slot.record.status == TaskStatus::Cancelled {
                return;
            }
            slot.record.status = TaskStatus::Running;
            slot.record.started_at = Some(Utc::now());
            (slot.job.clone(), slot.timeout)
        };
        self.inner.running_count.fetch_add(1, Ordering::SeqCst);

        let outcome = match tokio::time::timeout(timeout, job()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!("task timed out after {timeout:?}")),
        };

        self.inner.running_count.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(result) => {
                let (record, callback) = {
                    let mut tasks = self.inner.tasks.lock();
                    let Some(slot) = tasks.get_mut(&id) else { return };
                    slot.record.status = TaskStatus::Completed;
                    slot.record.completed_at = Some(Utc::now());
                    slot.record.result = Some(result);
                    (slot.record.clone(), slot.callback.clone())
                };
                tracing::debug!(task_id = %id, "task completed");
                // Callback failures are isolated from the queue.
                if let Some(callback) = callback {
                    callback(record).await;
                }
            }
            Err(error) => self.handle_failure(id, error).await,
        }
    }

    async fn handle_failure(&self, id: Uuid, error: String) {
        let retry_delay = {
            let mut tasks = self.inner.tasks.lock();
            let Some(slot) = tasks.get_mut(&id) else { return };
            slot.record.error = Some(error.clone());

            if slot.record.retries < slot.record.max_retries {
                slot.record.retries += 1;
                slot.record.status = TaskStatus::Retrying;
                // Exponential backoff, capped at one minute.
                let delay = self.inner.config.retry_base_delay_secs
                    * f64::powi(2.0, slot.record.retries as i32 - 1);
                Some((Duration::from_secs_f64(delay.min(60.0)), slot.record.priority))
            } else {
                slot.record.status = TaskStatus::Failed;
                slot.record.completed_at = Some(Utc::now());
                tracing::error!(
                    task_id = %id,
                    retries = slot.record.retries,
                    error,
                    "task failed permanently"
                );
                None
            }
        };

        if let Some((delay, priority)) = retry_delay {
            tracing::warn!(task_id = %id, ?delay, "task failed, retrying");
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut tasks = queue.inner.tasks.lock();
                    if let Some(slot) = tasks.get_mut(&id) {
                        if slot.record.status != TaskStatus::Retrying {
                            return;
                        }
                        slot.record.status = TaskStatus::Pending;
                        slot.record.started_at = None;
                    } else {
                        return;
                    }
                }
                queue.push(priority, id);
            });
        } else {
            let callback = self.inner.tasks.lock().get(&id).and_then(|s| s.callback.clone());
            if let Some(callback) = callback {
                if let Some(record) = self.get(&id) {
                    callback(record).await;
                }
            }
        }
    }
}
