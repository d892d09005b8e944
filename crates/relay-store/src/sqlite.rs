use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{SettingsStore, migrations};

/// SQLite-backed settings table, one row per key.
pub struct SqliteSettings {
    conn: Mutex<Connection>,
}

impl SqliteSettings {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode so readers never block the writer
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Settings DB opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        f(&conn)
    }
}

impl SettingsStore for SqliteSettings {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;
            match raw {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
    }

    fn save(&self, key: &str, value: Option<&Value>) -> Result<()> {
        self.with_conn(|conn| {
            match value {
                Some(value) => {
                    conn.execute(
                        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                        (key, value.to_string()),
                    )?;
                }
                None => {
                    conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
                    debug!("Deleted setting {}", key);
                }
            }
            Ok(())
        })
    }
}
