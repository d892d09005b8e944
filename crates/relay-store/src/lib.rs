//! Durable key-value settings store.
//!
//! Every key maps to one JSON document that is written whole. Saving `None`
//! deletes the key.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use anyhow::Result;
use serde_json::Value;

pub use memory::MemorySettings;
pub use sqlite::SqliteSettings;

pub trait SettingsStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Replaces the value at `key`; `None` removes it.
    fn save(&self, key: &str, value: Option<&Value>) -> Result<()>;
}
