use std::sync::Arc;

use relay_store::SettingsStore;
use relay_telemetry::TelemetryAggregator;
use relay_types::{ControlState, DownloadState, HistoryRecord, PendingRecord, TaskKey, TaskState, TransferTask};
use relay_webdav::{ByteSource, TransferExecutor, WebDavConfig};
use serde::Serialize;
use tracing::info;

use crate::control::TaskControlTable;
use crate::coordinator::{RelayOutcome, RelayRequest, TransferCoordinator};
use crate::error::RelayError;
use crate::history::History;
use crate::pending::PendingSet;

/// Aggregate view for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub download_speed: u64,
    pub upload_speed: u64,
    pub download_state: DownloadState,
    pub active: usize,
    pub pending: usize,
    pub completed: usize,
}

/// One in-progress (or failed) transfer as shown to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTask {
    #[serde(flatten)]
    pub upload: TransferTask,
    pub control: ControlState,
    pub downloaded_bytes: u64,
    pub download_speed_bytes_per_sec: u64,
}

/// Every relay component wired to one settings store.
pub struct Relay {
    coordinator: TransferCoordinator,
    controls: Arc<TaskControlTable>,
    pending: Arc<PendingSet>,
    history: Arc<History>,
    downloads: Arc<TelemetryAggregator>,
    uploads: Arc<TelemetryAggregator>,
}

impl Relay {
    /// Loads history, pending records and control state from `store`.
    pub fn open(store: Arc<dyn SettingsStore>, config: WebDavConfig) -> Result<Self, RelayError> {
        let executor = TransferExecutor::new(config)?;
        let history = Arc::new(History::load(Arc::clone(&store)));
        let pending = Arc::new(PendingSet::load(Arc::clone(&store)));
        let controls = Arc::new(TaskControlTable::load(Arc::clone(&store), Arc::clone(&pending)));
        let downloads = Arc::new(TelemetryAggregator::download());
        let uploads = Arc::new(TelemetryAggregator::upload());

        let coordinator = TransferCoordinator::new(
            executor,
            Arc::clone(&controls),
            Arc::clone(&pending),
            Arc::clone(&history),
            Arc::clone(&downloads),
            Arc::clone(&uploads),
        );
        info!(history = history.len(), pending = pending.len(), "Relay state loaded");

        Ok(Self {
            coordinator,
            controls,
            pending,
            history,
            downloads,
            uploads,
        })
    }

    /// Prunes pending records already complete in history and returns the
    /// transfers left to re-issue, oldest first.
    pub fn recover(&self) -> Vec<PendingRecord> {
        self.pending.recover(&self.history)
    }

    pub async fn relay(&self, request: &RelayRequest, source: &dyn ByteSource) -> RelayOutcome {
        self.coordinator.relay(request, source).await
    }

    pub fn verify_and_record(
        &self,
        key: TaskKey,
        file_name: &str,
        total_bytes: u64,
        task_id: i64,
    ) -> Result<HistoryRecord, RelayError> {
        self.coordinator.verify_and_record(key, file_name, total_bytes, task_id)
    }

    pub fn coordinator(&self) -> &TransferCoordinator {
        &self.coordinator
    }

    pub fn controls(&self) -> &TaskControlTable {
        &self.controls
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn downloads(&self) -> &TelemetryAggregator {
        &self.downloads
    }

    pub fn uploads(&self) -> &TelemetryAggregator {
        &self.uploads
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            download_speed: self.downloads.global_speed(),
            upload_speed: self.uploads.global_speed(),
            download_state: self.controls.download_state(),
            active: self.active_tasks().len(),
            pending: self.pending.len(),
            completed: self.history.len(),
        }
    }

    /// Tasks not yet successful, failed ones included, oldest first.
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        let downloads = self.downloads.get();
        let mut active: Vec<ActiveTask> = self
            .uploads
            .get()
            .into_values()
            .filter(|task| task.state != TaskState::Success)
            .map(|upload| {
                let download = downloads.get(&upload.key);
                ActiveTask {
                    control: self.controls.state(upload.key),
                    downloaded_bytes: download.map_or(0, |d| d.transferred_bytes),
                    download_speed_bytes_per_sec: download.map_or(0, |d| d.speed_bytes_per_sec),
                    upload,
                }
            })
            .collect();
        active.sort_by_key(|task| task.upload.created_at);
        active
    }

    pub fn completed_tasks(&self) -> Vec<(TaskKey, HistoryRecord)> {
        self.history.completed()
    }

    pub fn pause_task(&self, key: TaskKey) {
        self.controls.set_state(key, ControlState::Paused);
    }

    pub fn resume_task(&self, key: TaskKey) {
        self.controls.set_state(key, ControlState::Running);
    }

    /// Aborts the live transfer, if any, and forgets the pending record.
    pub fn delete_task(&self, key: TaskKey) {
        self.controls.set_state(key, ControlState::Deleted);
    }

    pub fn pause_all(&self) {
        self.controls.pause_all();
    }

    pub fn resume_all(&self) {
        self.controls.resume_all();
    }

    /// Drops one task from history and from both telemetry maps.
    pub fn remove_task(&self, key: TaskKey) -> bool {
        let in_history = self.history.remove_task(key);
        let in_downloads = self.downloads.remove(key).is_some();
        let in_uploads = self.uploads.remove(key).is_some();
        in_history || in_downloads || in_uploads
    }

    /// Drops completed records from history and both telemetry maps.
    pub fn clear_history(&self) -> usize {
        let removed = self.history.clear_history();
        self.downloads.remove_completed();
        self.uploads.remove_completed();
        info!(removed, "History cleared");
        removed
    }
}
