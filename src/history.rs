//! History sinks
//!
//! Durable storage for finished units is an external concern. The scheduler
//! hands each terminal [`UnitSnapshot`] to a [`HistorySink`] on a spawned task
//! and never waits for the outcome.

use crate::error::GenerationError;
use crate::queue::UnitSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, unit: UnitSnapshot) -> Result<(), GenerationError>;
}

/// Keeps records in memory
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<UnitSnapshot>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UnitSnapshot> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, unit: UnitSnapshot) -> Result<(), GenerationError> {
        self.records.lock().push(unit);
        Ok(())
    }
}

/// Appends one JSON document per line
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back. A malformed line is an error.
    pub fn read_all(&self) -> Result<Vec<serde_json::Value>, GenerationError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let body = std::fs::read_to_string(&self.path)?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(GenerationError::from))
            .collect()
    }
}

#[async_trait]
impl HistorySink for JsonlHistory {
    async fn record(&self, unit: UnitSnapshot) -> Result<(), GenerationError> {
        let mut line = serde_json::to_string(&unit)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
