use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::migrations;
use crate::models::{Classification, Event, Rule, TransportMode};

/// Setting keys shared with the rest of the workspace
pub mod keys {
    pub const RULES: &str = "rules";
    pub const DEFAULT_CLASSIFICATION: &str = "defaultClassification";
    pub const MONITORING_ENABLED: &str = "monitoringEnabled";
    pub const TRANSPORT_MODE: &str = "transportMode";
}

/// Database connection wrapper
///
/// The connection sits behind a mutex so a single `Database` can be shared
/// between the application context and the transport.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the settings database
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrations::init_schema(&conn)?;

        log::info!("Database initialized at: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get default database path
    #[must_use]
    pub fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("zonein");
        path.push("zonein.db");
        path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))
    }

    /// Read a JSON-encoded setting
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored value cannot be decoded
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|value| {
            serde_json::from_str(&value).with_context(|| format!("Corrupt setting '{key}'"))
        })
        .transpose()
    }

    /// Write a JSON-encoded setting
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the upsert fails
    pub fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn()?.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, json],
        )?;
        Ok(())
    }

    /// Persisted rule list, if one was ever saved
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored rules are corrupt
    pub fn get_rules(&self) -> Result<Option<Vec<Rule>>> {
        self.get_setting(keys::RULES)
    }

    /// Persisted default classification, if one was ever saved
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored value is corrupt
    pub fn get_default_classification(&self) -> Result<Option<Classification>> {
        self.get_setting(keys::DEFAULT_CLASSIFICATION)
    }

    /// Save the rule list and default classification together
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails
    pub fn save_rules(&self, rules: &[Rule], default: Classification) -> Result<()> {
        let rules_json = serde_json::to_string(rules)?;
        let default_json = serde_json::to_string(&default)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (key, value) in [
            (keys::RULES, rules_json),
            (keys::DEFAULT_CLASSIFICATION, default_json),
        ] {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }
        tx.commit()?;

        log::debug!("Saved {} rules (default: {default})", rules.len());
        Ok(())
    }

    /// Whether monitoring is enabled (defaults to true)
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn get_monitoring_enabled(&self) -> Result<bool> {
        Ok(self
            .get_setting::<bool>(keys::MONITORING_ENABLED)?
            .unwrap_or(true))
    }

    /// Persist the monitoring flag
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails
    pub fn set_monitoring_enabled(&self, enabled: bool) -> Result<()> {
        self.set_setting(keys::MONITORING_ENABLED, &enabled)
    }

    /// Configured transport mode, `None` if the user never chose one
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored value is corrupt
    pub fn get_transport_mode(&self) -> Result<Option<TransportMode>> {
        self.get_setting(keys::TRANSPORT_MODE)
    }

    /// Persist the transport mode
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails
    pub fn set_transport_mode(&self, mode: TransportMode) -> Result<()> {
        self.set_setting(keys::TRANSPORT_MODE, &mode)
    }

    /// Append an event to history, keeping only the newest `limit` entries
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails
    pub fn push_history(&self, event: &Event, limit: usize) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO event_history (payload) VALUES (?1)",
            params![payload],
        )?;
        tx.execute(
            "DELETE FROM event_history WHERE id NOT IN (
                SELECT id FROM event_history ORDER BY id DESC LIMIT ?1
            )",
            params![limit],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recent events, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn recent_history(&self, limit: usize) -> Result<Vec<Event>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM event_history ORDER BY id DESC LIMIT ?1")?;
        let payloads = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut events = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str(&payload) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!("Skipping corrupt history entry: {e}"),
            }
        }
        Ok(events)
    }

    /// Delete all recorded history
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub fn clear_history(&self) -> Result<usize> {
        Ok(self.conn()?.execute("DELETE FROM event_history", [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NO_TAB_ID;

    fn event(n: i64) -> Event {
        Event {
            timestamp: n,
            url: format!("https://example.com/{n}"),
            host: Some("example.com".to_string()),
            path: Some(format!("/{n}")),
            classification: Classification::Neutral,
            rule_id: None,
            tab_id: NO_TAB_ID,
            title: None,
        }
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting::<String>("missing").unwrap(), None);

        db.set_setting("greeting", "hello").unwrap();
        db.set_setting("greeting", "hello again").unwrap();
        assert_eq!(
            db.get_setting::<String>("greeting").unwrap().as_deref(),
            Some("hello again")
        );
    }

    #[test]
    fn test_defaults_when_unset() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_monitoring_enabled().unwrap());
        assert_eq!(db.get_transport_mode().unwrap(), None);
        assert_eq!(db.get_rules().unwrap(), None);
        assert_eq!(db.get_default_classification().unwrap(), None);
    }

    #[test]
    fn test_save_rules_stores_both_keys() {
        let db = Database::open_in_memory().unwrap();
        let rules = vec![Rule::domain("github.com", Classification::Productive).with_id("github")];
        db.save_rules(&rules, Classification::Distracting).unwrap();

        assert_eq!(db.get_rules().unwrap(), Some(rules));
        assert_eq!(
            db.get_default_classification().unwrap(),
            Some(Classification::Distracting)
        );
    }

    #[test]
    fn test_transport_mode_and_monitoring() {
        let db = Database::open_in_memory().unwrap();
        db.set_transport_mode(TransportMode::Native).unwrap();
        db.set_monitoring_enabled(false).unwrap();
        assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Native));
        assert!(!db.get_monitoring_enabled().unwrap());
    }

    #[test]
    fn test_corrupt_setting_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting(keys::TRANSPORT_MODE, "carrier-pigeon").unwrap();
        assert!(db.get_transport_mode().is_err());
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for n in 0..5 {
            db.push_history(&event(n), 3).unwrap();
        }

        let history = db.recent_history(10).unwrap();
        let stamps: Vec<i64> = history.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![4, 3, 2]);

        assert_eq!(db.recent_history(1).unwrap()[0].timestamp, 4);
        assert_eq!(db.clear_history().unwrap(), 3);
        assert!(db.recent_history(10).unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("zonein.db");
        {
            let db = Database::new(Some(path.clone())).unwrap();
            db.set_monitoring_enabled(false).unwrap();
        }
        let db = Database::new(Some(path)).unwrap();
        assert!(!db.get_monitoring_enabled().unwrap());
    }
}
