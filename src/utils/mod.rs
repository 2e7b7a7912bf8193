//! Utility functions and helpers for ad-job-state
//!
//! This module provides common utility functions used throughout the application:
//! - File name sanitizing
//! - Date parsing and conversion
//! - File system helpers
//! - Conversion utilities

use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// String utilities
pub mod string {
    /// Sanitize a name for use as a file name
    ///
    /// Every character outside `[A-Za-z0-9_-]` becomes `_`, which rules out
    /// directory separators and relative path components.
    ///
    /// # Arguments
    /// * `name` - Raw name, usually a job or document id
    ///
    /// # Returns
    /// * `String` - Safe file name fragment
    pub fn sanitize_filename(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Time and date utilities
pub mod time {
    use super::*;
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    use crate::error::ExportError;

    /// Date format accepted on the command line
    pub const CLI_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    /// Parse a command-line date (`YYYY-MM-DDTHH:MM:SS`) as UTC
    ///
    /// # Arguments
    /// * `value` - Date text
    ///
    /// # Returns
    /// * `Result<DateTime<Utc>>` - Parsed instant or error
    pub fn parse_cli_date(value: &str) -> Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(value.trim(), CLI_DATE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|_| ExportError::InvalidDate(value.to_string()).into())
    }

    /// Convert epoch milliseconds to an instant
    pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Render an instant the way the datafeed range queries expect it
    ///
    /// # Returns
    /// * `String` - ISO-8601 text without offset, e.g. `2024-01-31T12:00:00`
    pub fn to_iso(date: &DateTime<Utc>) -> String {
        date.format(CLI_DATE_FORMAT).to_string()
    }

    /// Format duration as human-readable string
    ///
    /// # Arguments
    /// * `duration` - Duration to format
    ///
    /// # Returns
    /// * `String` - Formatted duration (e.g., "1h 30m 45s")
    pub fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();

        if secs == 0 {
            return format!("{}ms", millis);
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        let mut parts = Vec::new();

        if hours > 0 {
            parts.push(format!("{}h", hours));
        }
        if minutes > 0 {
            parts.push(format!("{}m", minutes));
        }
        if seconds > 0 || parts.is_empty() {
            parts.push(format!("{}s", seconds));
        }

        parts.join(" ")
    }
}

/// File system utilities
pub mod fs {
    use super::*;
    use tracing::warn;

    /// Ensure directory exists, create if not
    ///
    /// # Arguments
    /// * `path` - Directory path
    ///
    /// # Returns
    /// * `Result<()>` - Success or error
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Get the final component of a path as text
    pub fn file_name<P: AsRef<Path>>(path: P) -> String {
        path.as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Remove files, logging the ones that could not be removed
    ///
    /// # Arguments
    /// * `paths` - Files to remove
    pub fn remove_files<P: AsRef<Path>>(paths: &[P]) {
        for path in paths {
            let path = path.as_ref();
            if path.exists()
                && let Err(e) = std::fs::remove_file(path)
            {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Conversion utilities
pub mod convert {
    /// Format bytes as human-readable size
    ///
    /// # Arguments
    /// * `bytes` - Number of bytes
    ///
    /// # Returns
    /// * `String` - Formatted size (e.g., "1.5 MB")
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
