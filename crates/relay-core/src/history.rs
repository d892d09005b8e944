use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use relay_store::SettingsStore;
use relay_types::{HistoryRecord, TaskKey, keys};
use tracing::{debug, info};

use crate::error::RelayError;
use crate::settings;

type Records = BTreeMap<i64, BTreeMap<i64, HistoryRecord>>;

/// Durable record of finished transfers, persisted under `download_history`
/// as `{group: {item: record}}`.
pub struct History {
    store: Arc<dyn SettingsStore>,
    records: Mutex<Records>,
}

impl History {
    /// Loads persisted history. Incomplete records cannot be resumed after a
    /// restart, so they are dropped and the pruned map is written back.
    pub fn load(store: Arc<dyn SettingsStore>) -> Self {
        let saved: Records = settings::load(store.as_ref(), keys::DOWNLOAD_HISTORY).unwrap_or_default();

        let mut dropped = 0usize;
        let records: Records = saved
            .into_iter()
            .filter_map(|(group, items)| {
                let before = items.len();
                let kept: BTreeMap<i64, HistoryRecord> =
                    items.into_iter().filter(|(_, r)| r.is_complete()).collect();
                dropped += before - kept.len();
                (!kept.is_empty()).then_some((group, kept))
            })
            .collect();

        let history = Self {
            store,
            records: Mutex::new(records),
        };
        if dropped > 0 {
            info!(dropped, "Cleaned incomplete history records");
            history.persist(&history.lock());
        }
        history
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, records: &Records) {
        settings::save(self.store.as_ref(), keys::DOWNLOAD_HISTORY, records);
    }

    pub fn get(&self, key: TaskKey) -> Option<HistoryRecord> {
        self.lock()
            .get(&key.group_id)
            .and_then(|items| items.get(&key.item_id))
            .cloned()
    }

    pub fn is_complete(&self, key: TaskKey) -> bool {
        self.get(key).is_some_and(|r| r.is_complete())
    }

    /// Every complete record, ordered by finish time, newest first.
    pub fn completed(&self) -> Vec<(TaskKey, HistoryRecord)> {
        let mut list: Vec<(TaskKey, HistoryRecord)> = self
            .lock()
            .iter()
            .flat_map(|(group, items)| {
                items
                    .iter()
                    .filter(|(_, r)| r.is_complete())
                    .map(move |(item, r)| (TaskKey::new(*group, *item), r.clone()))
            })
            .collect();
        list.sort_by(|a, b| b.1.finished_at.cmp(&a.1.finished_at));
        list
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `key` as 100% complete and persists history.
    ///
    /// An existing record is completed in place; otherwise `seed` is stored.
    /// Calling it again for a recorded task only refreshes `finished_at`.
    /// The write must succeed before the caller may drop pending state.
    pub fn verify_and_record(&self, key: TaskKey, seed: HistoryRecord) -> Result<HistoryRecord, RelayError> {
        let now = Utc::now();
        let mut records = self.lock();
        let items = records.entry(key.group_id).or_default();
        let record = match items.get_mut(&key.item_id) {
            Some(existing) => {
                existing.transferred_bytes = existing.total_bytes;
                existing.finished_at = now;
                if existing.task_id == 0 {
                    existing.task_id = seed.task_id;
                }
                debug!(%key, "Updated existing history record");
                existing.clone()
            }
            None => {
                let record = HistoryRecord {
                    transferred_bytes: seed.total_bytes,
                    finished_at: now,
                    ..seed
                };
                items.insert(key.item_id, record.clone());
                debug!(%key, file = %record.file_name, total = record.total_bytes, "Created history record");
                record
            }
        };
        settings::try_save(self.store.as_ref(), keys::DOWNLOAD_HISTORY, &*records)?;
        Ok(record)
    }

    /// Drops every completed record and keeps anything still in progress.
    pub fn clear_history(&self) -> usize {
        let mut records = self.lock();
        let mut removed = 0;
        records.retain(|_, items| {
            let before = items.len();
            items.retain(|_, r| !r.is_complete());
            removed += before - items.len();
            !items.is_empty()
        });
        self.persist(&records);
        removed
    }

    pub fn remove_task(&self, key: TaskKey) -> bool {
        let mut records = self.lock();
        let Some(items) = records.get_mut(&key.group_id) else {
            return false;
        };
        let removed = items.remove(&key.item_id).is_some();
        if items.is_empty() {
            records.remove(&key.group_id);
        }
        if removed {
            self.persist(&records);
        }
        removed
    }
}
