use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use relay_store::SettingsStore;
use relay_types::{PendingRecord, TaskKey, keys};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::history::History;
use crate::settings;

/// Transfers that started but are not yet durably recorded as complete.
///
/// Persisted whole under `pending_downloads` as `{"group_item": record}`.
pub struct PendingSet {
    store: Arc<dyn SettingsStore>,
    records: Mutex<BTreeMap<String, PendingRecord>>,
}

impl PendingSet {
    /// Loads the persisted set, rewriting foreign path separators.
    pub fn load(store: Arc<dyn SettingsStore>) -> Self {
        let raw: BTreeMap<String, Value> =
            settings::load(store.as_ref(), keys::PENDING_DOWNLOADS).unwrap_or_default();

        let mut records = BTreeMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<PendingRecord>(value) {
                Ok(mut record) => {
                    if record.file_name.contains('\\') {
                        record.file_name = record.file_name.replace('\\', "/");
                        debug!(file = %record.file_name, "Normalized pending path");
                    }
                    records.insert(record.key().underscore_key(), record);
                }
                Err(e) => warn!(key, error = %e, "Dropping malformed pending record"),
            }
        }

        Self {
            store,
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, PendingRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, records: &BTreeMap<String, PendingRecord>) {
        settings::save(self.store.as_ref(), keys::PENDING_DOWNLOADS, records);
    }

    pub fn add(&self, key: TaskKey, file_name: &str) {
        let record = PendingRecord {
            group_id: key.group_id,
            item_id: key.item_id,
            file_name: file_name.to_string(),
            started_at: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        let mut records = self.lock();
        records.insert(key.underscore_key(), record);
        self.persist(&records);
    }

    pub fn remove(&self, key: TaskKey) -> bool {
        let mut records = self.lock();
        let removed = records.remove(&key.underscore_key()).is_some();
        if removed {
            self.persist(&records);
        }
        removed
    }

    pub fn contains(&self, key: TaskKey) -> bool {
        self.lock().contains_key(&key.underscore_key())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest first.
    pub fn list_pending(&self) -> Vec<PendingRecord> {
        let mut list: Vec<PendingRecord> = self.lock().values().cloned().collect();
        list.sort_by(|a, b| {
            a.started_at
                .total_cmp(&b.started_at)
                .then_with(|| a.key().cmp(&b.key()))
        });
        list
    }

    /// Startup reconciliation: drops records whose history already shows the
    /// transfer complete and returns the survivors.
    pub fn recover(&self, history: &History) -> Vec<PendingRecord> {
        {
            let mut records = self.lock();
            let before = records.len();
            records.retain(|_, record| !history.is_complete(record.key()));
            let pruned = before - records.len();
            if pruned > 0 {
                info!(pruned, "Removed already-completed transfers from pending");
                self.persist(&records);
            }
            info!(loaded = before, remaining = records.len(), "Pending transfers recovered");
        }
        self.list_pending()
    }
}
