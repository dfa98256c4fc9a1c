//! Append-only JSON file of received events.

use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of events kept on disk
pub const MAX_STORED_EVENTS: usize = 1000;

/// Environment variable overriding the events file location
pub const EVENTS_FILE_ENV: &str = "ZONEIN_EVENTS_FILE";

/// Default file name (in the home directory) for the native host
pub const NATIVE_EVENTS_FILE: &str = ".zonein-events.json";

/// Default file name (in the home directory) for the HTTP receiver
pub const HTTP_EVENTS_FILE: &str = ".zonein-events-http.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event must be a JSON object")]
    NotAnObject,
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("events file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("events file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolve the events file, honoring `ZONEIN_EVENTS_FILE`
///
/// # Errors
///
/// Returns `StoreError::NoHomeDir` if no override is set and the home directory is unknown
pub fn events_file_path(file_name: &str) -> Result<PathBuf, StoreError> {
    if let Some(path) = std::env::var_os(EVENTS_FILE_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(file_name))
        .ok_or(StoreError::NoHomeDir)
}

pub struct EventStore {
    path: PathBuf,
    capacity: usize,
    events: Vec<Value>,
}

impl EventStore {
    /// Open the store, starting empty if the file is missing or unreadable
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, MAX_STORED_EVENTS)
    }

    #[must_use]
    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let events = match read_events(&path) {
            Ok(events) => events,
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::error!("Failed to load events from {}: {e}", path.display());
                Vec::new()
            }
        };
        log::debug!("Loaded {} stored events from {}", events.len(), path.display());
        Self {
            path,
            capacity,
            events,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn events(&self) -> &[Value] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Stamp an event with `receivedAt`, keep it, and rewrite the file
    ///
    /// A failed save is logged; the event stays in memory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotAnObject` if the event is not a JSON object
    pub fn record(&mut self, event: Value) -> Result<(), StoreError> {
        let Value::Object(mut fields) = event else {
            return Err(StoreError::NotAnObject);
        };
        fields.insert(
            "receivedAt".to_string(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
        self.events.push(Value::Object(fields));

        if self.events.len() > self.capacity {
            let excess = self.events.len() - self.capacity;
            self.events.drain(..excess);
        }

        if let Err(e) = self.save() {
            log::error!("Failed to save events to {}: {e}", self.path.display());
        }
        Ok(())
    }

    /// Write all events as a pretty-printed JSON array
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails
    pub fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.events)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

fn read_events(path: &Path) -> Result<Vec<Value>, StoreError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
