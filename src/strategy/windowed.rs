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

/// Rolling mean of the base score per university, ordered by record id,
/// evaluated at read time. Window and weight changes need no migration.
#[derive(Debug, Default)]
pub struct WindowedPartition {
    writer: Mutex<()>,
    definition: RwLock<Option<MetricDefinition>>,
}

impl WindowedPartition {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaintenanceStrategy for WindowedPartition {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WindowedPartition
    }

    async fn apply_definition_change(
        &self,
        _session: &mut dyn Session,
        old: &MetricDefinition,
        new: &MetricDefinition,
    ) -> Result<RefreshResult> {
        let _writer = self.writer.lock().await;
        let start = Instant::now();
        new.validate()?;
        *write_guard(&self.definition)? = Some(new.clone());
        debug!(
            from_window = ?old.window_size,
            to_window = ?new.window_size,
            "windowed partition frame updated"
        );
        Ok(RefreshResult {
            elapsed_ms: elapsed_ms(start),
            rows_affected: 0,
        })
    }

    async fn read_top_k(&self, session: &mut dyn Session, k: usize) -> Result<Vec<DerivedScore>> {
        let definition = read_guard(&self.definition)?.clone().ok_or_else(|| {
            MaintenanceError::ComputeError("no definition applied to windowed partition".to_string())
        })?;
        let records = load_records(session).await?;

        let weights = definition.weights;
        let preceding = definition.window_size.unwrap_or(0);
        let rolling = risk::rolling_average(&records, preceding, |record| weights.score(record));

        Ok(risk::top_k(
            records
                .iter()
                .zip(rolling)
                .map(|(record, score)| DerivedScore {
                    record_id: record.id,
                    university: record.university.clone(),
                    score,
                    as_of: definition.version,
                }),
            k,
        ))
    }

    fn teardown(&self) {
        clear(&self.definition);
    }

    fn current_definition(&self) -> Option<MetricDefinition> {
        self.definition.read().ok().and_then(|guard| guard.clone())
    }
}
