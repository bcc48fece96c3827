use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::settings_store::app_dir;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeLogEntry {
    pub timestamp_unix_ms: u128,
    pub level: LogLevel,
    pub event: String,
    pub message: String,
}

pub fn default_log_path() -> PathBuf {
    app_dir().join("runtime.log")
}

/// Appends one JSON line and mirrors it to the `log` facade.
pub fn append(path: &Path, level: LogLevel, event: &str, message: &str) -> Result<(), String> {
    match level {
        LogLevel::Info => log::info!("{event}: {message}"),
        LogLevel::Warn => log::warn!("{event}: {message}"),
        LogLevel::Error => log::error!("{event}: {message}"),
    }

    let parent = path
        .parent()
        .ok_or_else(|| "log path has no parent directory".to_string())?;
    fs::create_dir_all(parent).map_err(io_to_string)?;

    let timestamp_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| error.to_string())?
        .as_millis();

    let mut line = serde_json::to_string(&RuntimeLogEntry {
        timestamp_unix_ms,
        level,
        event: event.to_string(),
        message: message.to_string(),
    })
    .map_err(|error| error.to_string())?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_to_string)?;
    file.write_all(line.as_bytes()).map_err(io_to_string)
}

pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<RuntimeLogEntry>, String> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path).map_err(io_to_string)?;
    let entries = contents
        .lines()
        .filter_map(|line| serde_json::from_str::<RuntimeLogEntry>(line).ok())
        .collect::<Vec<_>>();
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.into_iter().skip(skip).collect())
}

pub fn clear(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Ok(());
    }
    fs::remove_file(path).map_err(io_to_string)
}

fn io_to_string(error: io::Error) -> String {
    error.to_string()
}
