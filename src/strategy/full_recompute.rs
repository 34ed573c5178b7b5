use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{clear, elapsed_ms, read_guard, write_guard, MaintenanceStrategy, StrategyKind};
use crate::error::{MaintenanceError, Result};
use crate::models::{DerivedScore, MetricDefinition, RefreshResult};
use crate::risk;
use crate::store::{load_records, Session};

/// Baseline: scores every record from scratch on every read.
#[derive(Debug, Default)]
pub struct FullRecompute {
    writer: Mutex<()>,
    definition: RwLock<Option<MetricDefinition>>,
}

impl FullRecompute {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaintenanceStrategy for FullRecompute {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FullRecompute
    }

    async fn apply_definition_change(
        &self,
        _session: &mut dyn Session,
        _old: &MetricDefinition,
        new: &MetricDefinition,
    ) -> Result<RefreshResult> {
        let _writer = self.writer.lock().await;
        let start = Instant::now();
        new.validate()?;
        *write_guard(&self.definition)? = Some(new.clone());
        debug!(version = new.version, "full recompute will score under new definition");
        Ok(RefreshResult {
            elapsed_ms: elapsed_ms(start),
            rows_affected: 0,
        })
    }

    async fn read_top_k(&self, session: &mut dyn Session, k: usize) -> Result<Vec<DerivedScore>> {
        let definition = read_guard(&self.definition)?.clone().ok_or_else(|| {
            MaintenanceError::ComputeError("no definition applied to full recompute".to_string())
        })?;
        let records = load_records(session).await?;
        Ok(risk::top_k(risk::derived_scores(&records, &definition), k))
    }

    fn teardown(&self) {
        clear(&self.definition);
    }

    fn current_definition(&self) -> Option<MetricDefinition> {
        self.definition.read().ok().and_then(|guard| guard.clone())
    }
}
