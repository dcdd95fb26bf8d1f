//! Capped in-memory log of provider operations, newest first.
//!
//! Every provider call records a `pending` entry when it starts and a
//! `success` (with duration) or `error` entry when it ends. The host UI
//! shows the log in its monitoring panel.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

/// Maximum number of entries kept.
pub const MAX_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    pub id: String,
    pub method: String,
    pub status: OperationStatus,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Wall time of the finished call, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Default)]
pub struct OperationLog {
    entries: VecDeque<OperationLogEntry>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, method: &str, status: OperationStatus, duration: Option<Duration>) {
        let id = uuid::Uuid::new_v4().as_simple().to_string();
        self.entries.push_front(OperationLogEntry {
            id: id[..8].to_string(),
            method: method.to_string(),
            status,
            timestamp: Utc::now().timestamp_millis(),
            duration: duration.map(|d| d.as_millis() as u64),
        });
        self.entries.truncate(MAX_ENTRIES);
    }

    /// Snapshot, newest first.
    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.entries.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedOperationLog = Arc<Mutex<OperationLog>>;

pub fn shared() -> SharedOperationLog {
    Arc::new(Mutex::new(OperationLog::new()))
}

/// Record into a shared log, tolerating a poisoned lock.
pub fn record(log: &SharedOperationLog, method: &str, status: OperationStatus, duration: Option<Duration>) {
    match log.lock() {
        Ok(mut guard) => guard.record(method, status, duration),
        Err(e) => warn!("Failed to lock operation log: {}", e),
    }
}

pub fn snapshot(log: &SharedOperationLog) -> Vec<OperationLogEntry> {
    log.lock().map(|g| g.entries()).unwrap_or_default()
}

/// Run `fut`, recording `pending` first and then `success` or `error`.
pub async fn track<T, F>(log: &SharedOperationLog, method: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    record(log, method, OperationStatus::Pending, None);
    let started = Instant::now();
    let result = fut.await;
    match &result {
        Ok(_) => record(log, method, OperationStatus::Success, Some(started.elapsed())),
        Err(_) => record(log, method, OperationStatus::Error, None),
    }
    result
}
