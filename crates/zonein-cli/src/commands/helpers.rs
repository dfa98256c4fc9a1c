//! Helper utility functions for CLI commands

use anyhow::Result;
use chrono::{Local, TimeZone};
use std::path::PathBuf;
use std::sync::Arc;
use zonein_storage::Database;

/// Safely truncate a string to a maximum number of characters (not bytes).
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

/// Render an epoch-milliseconds timestamp in local time
pub fn format_timestamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Display helper for optional fields
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

pub fn open_database(path: Option<PathBuf>) -> Result<Arc<Database>> {
    Ok(Arc::new(Database::new(path)?))
}
