use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::Value;

use crate::SettingsStore;

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: Option<&Value>) -> Result<()> {
        let mut values = self.values.lock().map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        match value {
            Some(v) => {
                values.insert(key.to_string(), v.clone());
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}
