//! Typed access to the settings store. Failures are logged and swallowed:
//! persistence is eventual and never aborts a transfer.

use anyhow::Context;
use relay_store::SettingsStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

pub(crate) fn load<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str) -> Option<T> {
    let value = match store.load(key) {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "Failed to load setting");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key, error = %e, "Ignoring malformed setting");
            None
        }
    }
}

/// Writes `value` whole, propagating the failure.
pub(crate) fn try_save<T: Serialize>(store: &dyn SettingsStore, key: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_value(value).with_context(|| format!("serialize {key}"))?;
    store.save(key, Some(&json))
}

pub(crate) fn save<T: Serialize>(store: &dyn SettingsStore, key: &str, value: &T) {
    if let Err(e) = try_save(store, key, value) {
        warn!(key, error = %e, "Failed to persist setting");
    }
}
