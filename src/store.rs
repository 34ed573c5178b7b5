//! Record store access. A [`RecordStore`] hands out [`Session`]s; each
//! benchmark run acquires its own session and releases it on drop.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MaintenanceError, Result};
use crate::ingest;
use crate::models::Record;

#[async_trait]
pub trait Session: Send {
    /// Full scan of the record table.
    async fn scan_records(&mut self) -> Result<Vec<Record>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn session(&self) -> Result<Box<dyn Session>>;
}

/// Scans through `session`, treating an empty table as a reportable error.
pub async fn load_records(session: &mut dyn Session) -> Result<Vec<Record>> {
    let records = session.scan_records().await?;
    if records.is_empty() {
        return Err(MaintenanceError::EmptyStore);
    }
    debug!(rows = records.len(), "scanned record store");
    Ok(records)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Vec<Record>>,
}

impl MemoryStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn from_csv(path: &Path) -> anyhow::Result<Self> {
        let outcome = ingest::read_csv(path)?;
        Ok(Self::new(outcome.into_records()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn memory_session(&self) -> MemorySession {
        MemorySession {
            records: Arc::clone(&self.records),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(self.memory_session()))
    }
}

#[derive(Debug, Clone)]
pub struct MemorySession {
    records: Arc<Vec<Record>>,
}

#[async_trait]
impl Session for MemorySession {
    async fn scan_records(&mut self) -> Result<Vec<Record>> {
        Ok(self.records.as_ref().clone())
    }
}
