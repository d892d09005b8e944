use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use relay_types::{TaskKey, TaskState, TransferTask};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Window over which the global speed is recomputed.
    pub tick: Duration,
    /// With no update for longer than this, the global speed reads zero.
    /// Also bounds how old a per-task speed may be to count in the fallback sum.
    pub quiet_period: Duration,
}

impl TelemetryConfig {
    /// Byte-counting download side: 5 s quiet period.
    pub fn download() -> Self {
        Self {
            tick: Duration::from_secs(1),
            quiet_period: Duration::from_secs(5),
        }
    }

    /// Rate-hint upload side: 2 s quiet period.
    pub fn upload() -> Self {
        Self {
            tick: Duration::from_secs(1),
            quiet_period: Duration::from_secs(2),
        }
    }
}

struct TaskEntry {
    task: TransferTask,
    last_touch: Instant,
    window_start: Instant,
    window_bytes: u64,
}

struct GlobalSpeed {
    pending_bytes: u64,
    window_start: Instant,
    current: u64,
    last_activity: Option<Instant>,
}

struct Inner {
    groups: BTreeMap<i64, BTreeMap<i64, TaskEntry>>,
    global: GlobalSpeed,
}

/// Owns every [`TransferTask`] snapshot for one direction.
pub struct TelemetryAggregator {
    config: TelemetryConfig,
    inner: Mutex<Inner>,
}

impl TelemetryAggregator {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                groups: BTreeMap::new(),
                global: GlobalSpeed {
                    pending_bytes: 0,
                    window_start: Instant::now(),
                    current: 0,
                    last_activity: None,
                },
            }),
        }
    }

    pub fn download() -> Self {
        Self::new(TelemetryConfig::download())
    }

    pub fn upload() -> Self {
        Self::new(TelemetryConfig::upload())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates (or resets) the entry for a transfer before any bytes flow.
    pub fn register(&self, key: TaskKey, file_name: &str, total: u64, task_id: i64) -> TransferTask {
        let now = Instant::now();
        let stamp = Utc::now();
        let task = TransferTask {
            key,
            file_name: file_name.to_string(),
            total_bytes: total,
            transferred_bytes: 0,
            speed_bytes_per_sec: 0,
            state: TaskState::Waiting,
            created_at: stamp,
            updated_at: stamp,
            task_id,
            eta: None,
        };
        let mut inner = self.lock();
        inner.groups.entry(key.group_id).or_default().insert(
            key.item_id,
            TaskEntry {
                task: task.clone(),
                last_touch: now,
                window_start: now,
                window_bytes: 0,
            },
        );
        task
    }

    /// Records progress for one task and feeds the global counter.
    ///
    /// `transferred` never moves backwards and is capped at a known total;
    /// a regression is ignored rather than applied.
    pub fn update(
        &self,
        key: TaskKey,
        transferred: u64,
        total: u64,
        speed_hint: Option<u64>,
        display_name: &str,
    ) -> TransferTask {
        let now = Instant::now();
        let tick = self.config.tick;
        let mut guard = self.lock();
        let inner = &mut *guard;

        let entry = inner
            .groups
            .entry(key.group_id)
            .or_default()
            .entry(key.item_id)
            .or_insert_with(|| {
                let stamp = Utc::now();
                TaskEntry {
                    task: TransferTask {
                        key,
                        file_name: display_name.to_string(),
                        total_bytes: total,
                        transferred_bytes: 0,
                        speed_bytes_per_sec: 0,
                        state: TaskState::Uploading,
                        created_at: stamp,
                        updated_at: stamp,
                        task_id: 0,
                        eta: None,
                    },
                    last_touch: now,
                    window_start: now,
                    window_bytes: 0,
                }
            });

        let task = &mut entry.task;
        if total > 0 {
            task.total_bytes = total;
        }
        if !display_name.is_empty() {
            task.file_name = display_name.to_string();
        }

        let mut next = transferred.max(task.transferred_bytes);
        if task.total_bytes > 0 {
            next = next.min(task.total_bytes);
        }
        let delta = next.saturating_sub(task.transferred_bytes);
        task.transferred_bytes = next;

        entry.window_bytes += delta;
        let elapsed = now.duration_since(entry.window_start);
        let derived = if elapsed >= tick {
            let speed = (entry.window_bytes as f64 / elapsed.as_secs_f64()) as u64;
            entry.window_start = now;
            entry.window_bytes = 0;
            Some(speed)
        } else {
            None
        };
        // A caller-supplied rate wins; otherwise keep the last derived one.
        if let Some(speed) = speed_hint.or(derived) {
            task.speed_bytes_per_sec = speed;
        }
        task.updated_at = Utc::now();
        entry.last_touch = now;
        let snapshot = entry.task.clone();

        let global = &mut inner.global;
        global.pending_bytes += delta;
        global.last_activity = Some(now);
        let window = now.duration_since(global.window_start);
        if window >= tick {
            global.current = (global.pending_bytes as f64 / window.as_secs_f64()) as u64;
            global.pending_bytes = 0;
            global.window_start = now;
        }

        snapshot
    }

    /// Applies a lifecycle transition; illegal transitions are ignored.
    pub fn set_state(&self, key: TaskKey, state: TaskState) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner
            .groups
            .get_mut(&key.group_id)
            .and_then(|items| items.get_mut(&key.item_id))
        else {
            return false;
        };
        if !entry.task.state.can_transition_to(state) {
            debug!(%key, from = ?entry.task.state, to = ?state, "Ignoring state transition");
            return false;
        }
        entry.task.state = state;
        entry.task.updated_at = Utc::now();
        if state.is_terminal() {
            entry.task.speed_bytes_per_sec = 0;
        }
        true
    }

    /// Starts a fresh attempt: the byte count restarts from zero because the
    /// source is re-read from the beginning.
    pub fn begin_attempt(&self, key: TaskKey) {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(entry) = inner
            .groups
            .get_mut(&key.group_id)
            .and_then(|items| items.get_mut(&key.item_id))
        {
            entry.task.transferred_bytes = 0;
            entry.task.speed_bytes_per_sec = 0;
            entry.window_start = now;
            entry.window_bytes = 0;
        }
    }

    pub fn set_eta(&self, key: TaskKey, eta: Option<String>) {
        let mut inner = self.lock();
        if let Some(entry) = inner
            .groups
            .get_mut(&key.group_id)
            .and_then(|items| items.get_mut(&key.item_id))
        {
            entry.task.eta = eta;
        }
    }

    pub fn get_task(&self, key: TaskKey) -> Option<TransferTask> {
        let inner = self.lock();
        inner
            .groups
            .get(&key.group_id)
            .and_then(|items| items.get(&key.item_id))
            .map(|entry| entry.task.clone())
    }

    /// Snapshot of every task, keyed by identity.
    pub fn get(&self) -> BTreeMap<TaskKey, TransferTask> {
        let inner = self.lock();
        inner
            .groups
            .values()
            .flat_map(|items| items.values())
            .map(|entry| (entry.task.key, entry.task.clone()))
            .collect()
    }

    /// Throughput in bytes per second across every task.
    ///
    /// Zero once the quiet period passes without updates. When the tick-based
    /// figure is zero, recently active incomplete tasks contribute their own
    /// speeds instead.
    pub fn global_speed(&self) -> u64 {
        let now = Instant::now();
        let quiet = self.config.quiet_period;
        let mut inner = self.lock();

        let stale = match inner.global.last_activity {
            Some(at) => now.duration_since(at) > quiet,
            None => true,
        };
        if stale {
            inner.global.current = 0;
        }
        if inner.global.current > 0 {
            return inner.global.current;
        }

        inner
            .groups
            .values()
            .flat_map(|items| items.values())
            .filter(|entry| {
                let task = &entry.task;
                task.speed_bytes_per_sec > 0
                    && !task.is_complete()
                    && !task.state.is_terminal()
                    && now.duration_since(entry.last_touch) <= quiet
            })
            .map(|entry| entry.task.speed_bytes_per_sec)
            .sum()
    }

    /// Deletes one task; an emptied group is dropped with it.
    pub fn remove(&self, key: TaskKey) -> Option<TransferTask> {
        let mut inner = self.lock();
        let items = inner.groups.get_mut(&key.group_id)?;
        let removed = items.remove(&key.item_id).map(|entry| entry.task);
        if items.is_empty() {
            inner.groups.remove(&key.group_id);
        }
        removed
    }

    /// Drops every successful task, returning how many. Failed tasks stay
    /// until removed one by one, even when every byte was sent.
    pub fn remove_completed(&self) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        inner.groups.retain(|_, items| {
            let before = items.len();
            items.retain(|_, entry| entry.task.state != TaskState::Success);
            removed += before - items.len();
            !items.is_empty()
        });
        removed
    }

    pub fn group_count(&self) -> usize {
        self.lock().groups.len()
    }

    pub fn len(&self) -> usize {
        self.lock().groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
