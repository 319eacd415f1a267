use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::activity::{self, Kind};
use crate::config::Config;

/// Durable string-keyed storage for persisted settings.
///
/// Values are opaque strings; `KeyValueStoreExt` layers typed JSON access on top.
pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub trait KeyValueStoreExt {
    /// Read `key`, falling back to `default` when it is missing, unreadable or fails to decode.
    fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T;
    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {
    fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.get_raw(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(e) => {
                activity::log_with(Kind::Warning, format!("Failed to read {}: {}", key, e));
                return default;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug_eprintln!("[store] {} holds undecodable value {:?}: {}", key, raw, e);
                default
            }
        }
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.set_raw(key, &encoded)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        values.remove(key);
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)?;
        activity::log_with(Kind::Store, format!("Opened settings store at {}", path.display()));
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn open_default(config: &Config) -> Result<Self> {
        Self::open(&config.database_path())
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("settings store poisoned"))?;
        let mut stmt = conn.prepare("SELECT key FROM settings WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let keys = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }
}

impl KeyValueStore for SqliteStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("settings store poisoned"))?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("settings store poisoned"))?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("settings store poisoned"))?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_falls_back_when_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent", 42u32), 42);
        assert!(store.get("absent.flag", true));
    }

    #[test]
    fn test_get_falls_back_on_undecodable_value() {
        let store = MemoryStore::new();
        store.set_raw("default_ui.message_font_size", "not json").unwrap();
        assert_eq!(store.get("default_ui.message_font_size", 12u32), 12);
    }

    #[test]
    fn test_typed_set_and_get() {
        let store = MemoryStore::new();
        store.set("default_ui.allow_continuation", &false).unwrap();
        assert!(!store.get("default_ui.allow_continuation", true));
        store.remove("default_ui.allow_continuation").unwrap();
        assert!(store.get("default_ui.allow_continuation", true));
    }

    #[test]
    fn test_sqlite_upsert_and_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("a.b", &1u32).unwrap();
        store.set("a.b", &2u32).unwrap();
        assert_eq!(store.get("a.b", 0u32), 2);

        store.remove("a.b").unwrap();
        assert_eq!(store.get_raw("a.b").unwrap(), None);
    }

    #[test]
    fn test_sqlite_prefix_listing_escapes_wildcards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_raw("sequence.1.override", "{}").unwrap();
        store.set_raw("sequence.1.inference", "{}").unwrap();
        store.set_raw("sequenceX1", "{}").unwrap();
        store.set_raw("default_ui.force_retrieval", "false").unwrap();

        let keys = store.keys_with_prefix("sequence.1.").unwrap();
        assert_eq!(keys, vec!["sequence.1.inference", "sequence.1.override"]);

        store.set_raw("defaultXui.force_retrieval", "true").unwrap();
        let keys = store.keys_with_prefix("default_ui").unwrap();
        assert_eq!(keys, vec!["default_ui.force_retrieval"]);
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "chat-settings-store-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let path = dir.join("settings.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("default_ui.render_as_markdown", &false).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(!reopened.get("default_ui.render_as_markdown", true));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
