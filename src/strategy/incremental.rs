use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{clear, elapsed_ms, read_guard, write_guard, MaintenanceStrategy, StrategyKind};
use crate::error::{MaintenanceError, Result};
use crate::models::{DerivedScore, MetricDefinition, RefreshResult, Record};
use crate::risk;
use crate::store::{load_records, Session};

#[derive(Debug, Clone)]
struct DeltaRow {
    record_id: i64,
    university: String,
    /// Multiplicands of the weights: raw sub-scores, or their rolling means
    /// under a windowed definition.
    attributes: [f64; 3],
    score: f64,
}

#[derive(Debug)]
struct DeltaTable {
    definition: MetricDefinition,
    rows: Vec<DeltaRow>,
}

impl DeltaTable {
    fn seed(records: &[Record], definition: &MetricDefinition) -> Self {
        let rows = risk::effective_attributes(records, definition.window_size)
            .into_iter()
            .zip(records)
            .map(|(attributes, record)| DeltaRow {
                record_id: record.id,
                university: record.university.clone(),
                attributes,
                score: definition.weights.dot(&attributes),
            })
            .collect();
        Self {
            definition: definition.clone(),
            rows,
        }
    }
}

/// Per-record scores seeded once, then shifted by `attribute × (new - old)`
/// for each weight that moved.
#[derive(Debug, Default)]
pub struct IncrementalDelta {
    writer: Mutex<()>,
    table: RwLock<Option<DeltaTable>>,
}

impl IncrementalDelta {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaintenanceStrategy for IncrementalDelta {
    fn kind(&self) -> StrategyKind {
        StrategyKind::IncrementalDelta
    }

    async fn apply_definition_change(
        &self,
        session: &mut dyn Session,
        old: &MetricDefinition,
        new: &MetricDefinition,
    ) -> Result<RefreshResult> {
        let _writer = self.writer.lock().await;
        old.validate()?;
        new.validate()?;
        if !old.is_comparable(new) {
            return Err(MaintenanceError::DefinitionIncompatible(format!(
                "cannot derive a delta from v{} (window {:?}) to v{} (window {:?})",
                old.version, old.window_size, new.version, new.window_size
            )));
        }

        let (at_new, at_old) = {
            let guard = read_guard(&self.table)?;
            match guard.as_ref() {
                Some(table) => (
                    table.definition.same_content(new),
                    table.definition.same_content(old),
                ),
                None => (false, false),
            }
        };

        if at_new {
            let start = Instant::now();
            if let Some(table) = write_guard(&self.table)?.as_mut() {
                table.definition.version = new.version;
            }
            debug!(version = new.version, "delta table already reflects definition");
            return Ok(RefreshResult {
                elapsed_ms: elapsed_ms(start),
                rows_affected: 0,
            });
        }

        // Anything not already at `old` is rebuilt from scratch rather than
        // patched on top of unknown state. Seeding is setup, so the refresh
        // clock starts once the baseline table exists.
        let reseeded = if at_old {
            None
        } else {
            let seed_start = Instant::now();
            let records = load_records(session).await?;
            let table = DeltaTable::seed(&records, old);
            debug!(
                version = old.version,
                rows = table.rows.len(),
                seed_ms = elapsed_ms(seed_start),
                "seeded delta table"
            );
            Some(table)
        };

        let start = Instant::now();
        let deltas = old.weights.deltas_to(&new.weights);
        let mut guard = write_guard(&self.table)?;
        if let Some(table) = reseeded {
            *guard = Some(table);
        }
        let table = guard.as_mut().ok_or_else(|| {
            MaintenanceError::StoreUnavailable("delta table dropped during refresh".to_string())
        })?;

        for row in table.rows.iter_mut() {
            for delta in &deltas {
                row.score += row.attributes[delta.dimension.index()] * delta.delta;
            }
        }
        table.definition = new.clone();

        let rows_affected = if deltas.is_empty() {
            0
        } else {
            table.rows.len() as u64
        };
        drop(guard);

        let elapsed_ms = elapsed_ms(start);
        info!(
            from = old.version,
            to = new.version,
            dimensions = deltas.len(),
            rows = rows_affected,
            elapsed_ms,
            "applied weight delta"
        );

        Ok(RefreshResult {
            elapsed_ms,
            rows_affected,
        })
    }

    async fn read_top_k(&self, _session: &mut dyn Session, k: usize) -> Result<Vec<DerivedScore>> {
        let guard = read_guard(&self.table)?;
        let table = guard.as_ref().ok_or_else(|| {
            MaintenanceError::StoreUnavailable("delta table has not been seeded".to_string())
        })?;
        let version = table.definition.version;
        Ok(risk::top_k(
            table.rows.iter().map(|row| DerivedScore {
                record_id: row.record_id,
                university: row.university.clone(),
                score: row.score,
                as_of: version,
            }),
            k,
        ))
    }

    fn teardown(&self) {
        clear(&self.table);
    }

    fn current_definition(&self) -> Option<MetricDefinition> {
        self.table
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|t| t.definition.clone()))
    }
}
