use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use relay_store::SettingsStore;
use relay_types::{ControlState, DownloadState, TaskKey, keys};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pending::PendingSet;
use crate::settings;

/// What a transfer may do at its next suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Run,
    Wait,
    Abort,
}

struct Inner {
    entries: HashMap<TaskKey, ControlState>,
    download_state: DownloadState,
}

/// Per-task running / paused / deleted state plus the global pause flag.
///
/// Waiters are woken through a watch channel bumped on every change, so a
/// paused transfer resumes as soon as it is allowed to rather than on the
/// next poll.
pub struct TaskControlTable {
    store: Arc<dyn SettingsStore>,
    pending: Arc<PendingSet>,
    inner: Mutex<Inner>,
    changed: watch::Sender<u64>,
    tokens: DashMap<TaskKey, CancellationToken>,
}

impl TaskControlTable {
    /// Restores `task_states` and `download_state` from the store.
    pub fn load(store: Arc<dyn SettingsStore>, pending: Arc<PendingSet>) -> Self {
        let saved: BTreeMap<String, String> =
            settings::load(store.as_ref(), keys::TASK_STATES).unwrap_or_default();
        let entries: HashMap<TaskKey, ControlState> = saved
            .iter()
            .filter_map(|(key, state)| {
                let key = TaskKey::parse_colon(key)?;
                match state.parse::<ControlState>() {
                    Ok(ControlState::Running) => None,
                    Ok(state) => Some((key, state)),
                    Err(e) => {
                        warn!(%key, error = %e, "Skipping task state");
                        None
                    }
                }
            })
            .collect();
        let download_state: DownloadState =
            settings::load(store.as_ref(), keys::DOWNLOAD_STATE).unwrap_or_default();
        if !entries.is_empty() || download_state != DownloadState::Downloading {
            info!(entries = entries.len(), ?download_state, "Restored control state");
        }

        Self {
            store,
            pending,
            inner: Mutex::new(Inner {
                entries,
                download_state,
            }),
            changed: watch::Sender::new(0),
            tokens: DashMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_entries(&self, entries: &HashMap<TaskKey, ControlState>) {
        let to_save: BTreeMap<String, &str> = entries
            .iter()
            .map(|(key, state)| (key.colon_key(), state.as_str()))
            .collect();
        settings::save(self.store.as_ref(), keys::TASK_STATES, &to_save);
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn state(&self, key: TaskKey) -> ControlState {
        self.lock().entries.get(&key).copied().unwrap_or_default()
    }

    /// `Running` clears the entry. `Deleted` also aborts the live transfer
    /// and forgets the pending record so it is never resumed.
    pub fn set_state(&self, key: TaskKey, state: ControlState) {
        {
            let mut inner = self.lock();
            match state {
                ControlState::Running => {
                    inner.entries.remove(&key);
                }
                other => {
                    inner.entries.insert(key, other);
                }
            }
            self.persist_entries(&inner.entries);
        }
        debug!(%key, state = state.as_str(), "Task control state set");

        if state == ControlState::Deleted {
            if let Some(token) = self.tokens.get(&key) {
                token.cancel();
            }
            self.pending.remove(key);
        }
        self.notify();
    }

    pub fn download_state(&self) -> DownloadState {
        self.lock().download_state
    }

    pub fn set_download_state(&self, state: DownloadState) {
        {
            let mut inner = self.lock();
            inner.download_state = state;
        }
        settings::save(self.store.as_ref(), keys::DOWNLOAD_STATE, &state);
        info!(?state, "Download state changed");
        self.notify();
    }

    pub fn pause_all(&self) {
        self.set_download_state(DownloadState::Stopped);
    }

    pub fn resume_all(&self) {
        self.set_download_state(DownloadState::Downloading);
    }

    /// A task's own entry wins; the global flag only holds back tasks with
    /// no entry.
    pub fn gate(&self, key: TaskKey) -> Gate {
        let inner = self.lock();
        match inner.entries.get(&key) {
            Some(ControlState::Deleted) => Gate::Abort,
            Some(ControlState::Paused) => Gate::Wait,
            _ if inner.download_state == DownloadState::Stopped => Gate::Wait,
            _ => Gate::Run,
        }
    }

    /// Suspends until `key` may run. `Break` means the task was deleted.
    pub async fn wait_runnable(&self, key: TaskKey) -> ControlFlow<()> {
        let mut logged = false;
        loop {
            // Subscribe before checking so a change in between still wakes us.
            let mut rx = self.changed.subscribe();
            match self.gate(key) {
                Gate::Run => {
                    if logged {
                        debug!(%key, "Transfer resumed");
                    }
                    return ControlFlow::Continue(());
                }
                Gate::Abort => return ControlFlow::Break(()),
                Gate::Wait => {
                    if !logged {
                        debug!(%key, "Transfer paused");
                        logged = true;
                    }
                    if rx.changed().await.is_err() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    /// Cancellation handle for the live transfer of `key`. Already cancelled
    /// when the task is marked deleted.
    pub fn token(&self, key: TaskKey) -> CancellationToken {
        let token = self.tokens.entry(key).or_default().clone();
        if self.state(key) == ControlState::Deleted {
            token.cancel();
        }
        token
    }

    /// Forgets the live transfer handle once the transfer has ended.
    pub fn release(&self, key: TaskKey) {
        self.tokens.remove(&key);
    }

    /// Drops the entry without touching pending state, after a transfer is
    /// durably recorded.
    pub fn clear(&self, key: TaskKey) {
        let mut inner = self.lock();
        if inner.entries.remove(&key).is_some() {
            self.persist_entries(&inner.entries);
        }
    }

    pub fn entries(&self) -> BTreeMap<TaskKey, ControlState> {
        self.lock().entries.iter().map(|(k, v)| (*k, *v)).collect()
    }
}
