use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures_util::future::BoxFuture;
use relay_telemetry::TelemetryAggregator;
use relay_types::{ControlState, HistoryRecord, TaskKey, TaskState};
use relay_webdav::{ByteSource, TransferError, TransferExecutor, TransferObserver};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::control::TaskControlTable;
use crate::error::RelayError;
use crate::history::History;
use crate::pending::PendingSet;

/// One file handed to the coordinator.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub key: TaskKey,
    /// Local-style path; its location under the save root decides the
    /// remote directory.
    pub file_name: String,
    pub total_bytes: u64,
    /// Correlates with the external source task, 0 when unknown.
    pub task_id: i64,
}

#[derive(Debug)]
pub enum RelayOutcome {
    /// Uploaded and durably recorded.
    Completed(HistoryRecord),
    /// Terminal failure; the task stays visible as `failed`.
    Failed(RelayError),
    /// Deleted while queued or in flight; the task is gone.
    Cancelled,
}

impl RelayOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Drives one transfer through the executor while keeping telemetry,
/// control state, the pending set and history consistent.
pub struct TransferCoordinator {
    executor: TransferExecutor,
    controls: Arc<TaskControlTable>,
    pending: Arc<PendingSet>,
    history: Arc<History>,
    downloads: Arc<TelemetryAggregator>,
    uploads: Arc<TelemetryAggregator>,
}

impl TransferCoordinator {
    pub fn new(
        executor: TransferExecutor,
        controls: Arc<TaskControlTable>,
        pending: Arc<PendingSet>,
        history: Arc<History>,
        downloads: Arc<TelemetryAggregator>,
        uploads: Arc<TelemetryAggregator>,
    ) -> Self {
        Self {
            executor,
            controls,
            pending,
            history,
            downloads,
            uploads,
        }
    }

    pub fn executor(&self) -> &TransferExecutor {
        &self.executor
    }

    /// Registers the task before any bytes flow, streams `source` to remote
    /// storage and finalizes state. Retries happen inside the executor only.
    pub async fn relay(&self, request: &RelayRequest, source: &dyn ByteSource) -> RelayOutcome {
        let key = request.key;
        self.downloads
            .register(key, &request.file_name, request.total_bytes, request.task_id);
        self.uploads
            .register(key, &request.file_name, request.total_bytes, request.task_id);
        self.pending.add(key, &request.file_name);

        let cancel = self.controls.token(key);
        let remote = self.executor.remote_path_for(&request.file_name);
        let observer = Arc::new(RelayObserver {
            key,
            controls: Arc::clone(&self.controls),
            downloads: Arc::clone(&self.downloads),
            uploads: Arc::clone(&self.uploads),
            attempt_started: std::sync::Mutex::new(Instant::now()),
            last_sent: AtomicU64::new(0),
        });

        info!(group_id = key.group_id, item_id = key.item_id, path = %remote, total = request.total_bytes, "Relaying file");
        let result = self
            .executor
            .send(&remote, source, request.total_bytes, observer, &cancel)
            .await;
        self.controls.release(key);

        let deleted = self.controls.state(key) == ControlState::Deleted;
        match result {
            _ if deleted => {
                self.discard(key);
                RelayOutcome::Cancelled
            }
            Err(e) if e.is_abort() => {
                self.discard(key);
                RelayOutcome::Cancelled
            }
            Err(e) => {
                self.fail(key);
                RelayOutcome::Failed(RelayError::Transfer(e))
            }
            Ok(()) => match self.verify_and_record(key, &request.file_name, request.total_bytes, request.task_id) {
                Ok(record) => {
                    self.downloads.set_state(key, TaskState::Success);
                    self.uploads.set_state(key, TaskState::Success);
                    RelayOutcome::Completed(record)
                }
                Err(e) => {
                    error!(group_id = key.group_id, item_id = key.item_id, error = %e, "Uploaded but could not record completion");
                    self.fail(key);
                    RelayOutcome::Failed(e)
                }
            },
        }
    }

    /// Durably marks `key` complete, then drops its pending record and
    /// control entry.
    ///
    /// With no history record yet, one is synthesized from the download-side
    /// snapshot, then the upload-side one, then the arguments.
    pub fn verify_and_record(
        &self,
        key: TaskKey,
        file_name: &str,
        total_bytes: u64,
        task_id: i64,
    ) -> Result<HistoryRecord, RelayError> {
        let snapshot = self.downloads.get_task(key).or_else(|| self.uploads.get_task(key));
        let now = Utc::now();
        let seed = match snapshot {
            Some(task) => HistoryRecord {
                transferred_bytes: task.total_bytes,
                total_bytes: if task.total_bytes > 0 { task.total_bytes } else { total_bytes },
                file_name: if task.file_name.is_empty() { file_name.to_string() } else { task.file_name },
                speed_bytes_per_sec: task.speed_bytes_per_sec,
                started_at: task.created_at,
                finished_at: now,
                task_id: if task.task_id != 0 { task.task_id } else { task_id },
            },
            None => HistoryRecord {
                transferred_bytes: total_bytes,
                total_bytes,
                file_name: file_name.to_string(),
                speed_bytes_per_sec: 0,
                started_at: now,
                finished_at: now,
                task_id,
            },
        };

        let record = self.history.verify_and_record(key, seed)?;
        self.pending.remove(key);
        self.controls.clear(key);
        Ok(record)
    }

    fn discard(&self, key: TaskKey) {
        info!(group_id = key.group_id, item_id = key.item_id, "Transfer cancelled");
        self.pending.remove(key);
        self.downloads.remove(key);
        self.uploads.remove(key);
    }

    fn fail(&self, key: TaskKey) {
        self.downloads.set_state(key, TaskState::Failed);
        self.uploads.set_state(key, TaskState::Failed);
    }
}

/// Per-transfer hooks: cooperative pause/delete at every chunk, telemetry on
/// both sides.
struct RelayObserver {
    key: TaskKey,
    controls: Arc<TaskControlTable>,
    downloads: Arc<TelemetryAggregator>,
    uploads: Arc<TelemetryAggregator>,
    attempt_started: std::sync::Mutex<Instant>,
    last_sent: AtomicU64,
}

impl RelayObserver {
    fn upload_speed(&self, sent: u64) -> Option<u64> {
        let started = *self
            .attempt_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = started.elapsed().as_secs_f64();
        (elapsed > 0.0).then(|| (sent as f64 / elapsed) as u64)
    }
}

impl TransferObserver for RelayObserver {
    fn on_attempt(&self, attempt: u32) {
        if let Ok(mut started) = self.attempt_started.lock() {
            *started = Instant::now();
        }
        self.last_sent.store(0, Ordering::Relaxed);
        if attempt > 1 {
            self.downloads.begin_attempt(self.key);
            self.uploads.begin_attempt(self.key);
        }
        self.downloads.set_state(self.key, TaskState::Uploading);
        self.uploads.set_state(self.key, TaskState::Uploading);
    }

    fn on_progress(&self, sent: u64, total: u64) -> BoxFuture<'_, ControlFlow<()>> {
        Box::pin(async move {
            let waited_from = Instant::now();
            if self.controls.wait_runnable(self.key).await.is_break() {
                return ControlFlow::Break(());
            }
            // Time spent paused is not transfer time.
            let waited = waited_from.elapsed();
            if !waited.is_zero() {
                let mut started = self
                    .attempt_started
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *started += waited;
            }
            self.last_sent.store(sent, Ordering::Relaxed);
            self.downloads.update(self.key, sent, total, None, "");
            self.uploads.update(self.key, sent, total, self.upload_speed(sent), "");
            ControlFlow::Continue(())
        })
    }

    fn on_retry(&self, attempt: u32, error: &TransferError) {
        warn!(
            group_id = self.key.group_id,
            item_id = self.key.item_id,
            attempt,
            sent = self.last_sent.load(Ordering::Relaxed),
            error = %error,
            "Retrying transfer"
        );
        self.uploads.set_state(self.key, TaskState::Retrying);
        self.downloads.set_state(self.key, TaskState::Retrying);
    }
}
