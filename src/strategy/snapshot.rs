use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{clear, elapsed_ms, read_guard, write_guard, MaintenanceStrategy, StrategyKind};
use crate::error::{MaintenanceError, Result};
use crate::models::{DerivedScore, MetricDefinition, RefreshResult};
use crate::risk;
use crate::store::{load_records, Session};

#[derive(Debug)]
struct Snapshot {
    definition: MetricDefinition,
    rows: Vec<DerivedScore>,
}

/// Eagerly materialized score table, rebuilt in full on every definition
/// change. Rebuilds happen off to the side and are swapped in whole, so
/// readers see either the previous snapshot or the new one.
#[derive(Debug, Default)]
pub struct MaterializedSnapshot {
    writer: Mutex<()>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl MaterializedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaintenanceStrategy for MaterializedSnapshot {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MaterializedSnapshot
    }

    async fn apply_definition_change(
        &self,
        session: &mut dyn Session,
        _old: &MetricDefinition,
        new: &MetricDefinition,
    ) -> Result<RefreshResult> {
        let _writer = self.writer.lock().await;
        new.validate()?;
        if let Some(window) = new.window_size {
            return Err(MaintenanceError::DefinitionIncompatible(format!(
                "materialized snapshot stores instantaneous scores and cannot hold a \
                 {window}-row window (definition v{})",
                new.version
            )));
        }

        let start = Instant::now();
        let records = load_records(session).await?;
        let rows = risk::derived_scores(&records, new);
        let rows_affected = rows.len() as u64;

        let previous = write_guard(&self.snapshot)?.replace(Snapshot {
            definition: new.clone(),
            rows,
        });
        let elapsed_ms = elapsed_ms(start);

        if let Some(previous) = previous {
            debug!(
                dropped_version = previous.definition.version,
                "dropped previous snapshot"
            );
        }
        info!(
            version = new.version,
            rows = rows_affected,
            elapsed_ms,
            "materialized snapshot rebuilt"
        );

        Ok(RefreshResult {
            elapsed_ms,
            rows_affected,
        })
    }

    async fn read_top_k(&self, _session: &mut dyn Session, k: usize) -> Result<Vec<DerivedScore>> {
        let guard = read_guard(&self.snapshot)?;
        let snapshot = guard.as_ref().ok_or_else(|| {
            MaintenanceError::StoreUnavailable("snapshot has not been materialized".to_string())
        })?;
        Ok(risk::top_k(snapshot.rows.iter().cloned(), k))
    }

    fn teardown(&self) {
        clear(&self.snapshot);
    }

    fn current_definition(&self) -> Option<MetricDefinition> {
        self.snapshot
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.definition.clone()))
    }
}
