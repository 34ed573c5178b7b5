//! Maintenance strategies for the derived risk score.
//!
//! Every strategy keeps a queryable top-k view of the score under the most
//! recently applied [`MetricDefinition`]. They differ in where the cost of a
//! definition change lands:
//!
//! | strategy              | refresh | read          |
//! |-----------------------|---------|---------------|
//! | full recompute        | O(1)    | O(n log k)    |
//! | materialized snapshot | O(n)    | O(m log k)    |
//! | incremental delta     | O(n·d)  | O(m log k)    |
//! | windowed partition    | O(1)    | O(n log n)    |
//!
//! where `d` is the number of weight dimensions that changed.

use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MaintenanceError, Result};
use crate::models::{DerivedScore, MetricDefinition, RefreshResult};
use crate::store::Session;

mod full_recompute;
mod incremental;
mod snapshot;
mod windowed;

pub use full_recompute::FullRecompute;
pub use incremental::IncrementalDelta;
pub use snapshot::MaterializedSnapshot;
pub use windowed::WindowedPartition;

#[async_trait]
pub trait MaintenanceStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Makes subsequent reads reflect `new`. Safe to call again with the same
    /// pair after a success.
    async fn apply_definition_change(
        &self,
        session: &mut dyn Session,
        old: &MetricDefinition,
        new: &MetricDefinition,
    ) -> Result<RefreshResult>;

    /// Highest `k` scores, descending, ties by ascending record id.
    async fn read_top_k(&self, session: &mut dyn Session, k: usize) -> Result<Vec<DerivedScore>>;

    /// Drops any auxiliary state. Must be safe to call more than once.
    fn teardown(&self);

    fn current_definition(&self) -> Option<MetricDefinition>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FullRecompute,
    MaterializedSnapshot,
    IncrementalDelta,
    WindowedPartition,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::FullRecompute,
        StrategyKind::MaterializedSnapshot,
        StrategyKind::IncrementalDelta,
        StrategyKind::WindowedPartition,
    ];

    /// Stable identifier used by the invocation surface.
    pub fn id(self) -> u8 {
        match self {
            StrategyKind::FullRecompute => 0,
            StrategyKind::MaterializedSnapshot => 1,
            StrategyKind::IncrementalDelta => 2,
            StrategyKind::WindowedPartition => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::FullRecompute => "full-recompute",
            StrategyKind::MaterializedSnapshot => "materialized-snapshot",
            StrategyKind::IncrementalDelta => "incremental-delta",
            StrategyKind::WindowedPartition => "windowed-partition",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StrategyKind::FullRecompute => "Full Recomputation",
            StrategyKind::MaterializedSnapshot => "Materialized Snapshot",
            StrategyKind::IncrementalDelta => "Incremental Delta",
            StrategyKind::WindowedPartition => "Windowed Partition Aggregation",
        }
    }

    /// Headline complexity shown next to benchmark results.
    pub fn complexity_class(self) -> ComplexityClass {
        match self {
            StrategyKind::FullRecompute => ComplexityClass::Linear,
            StrategyKind::MaterializedSnapshot => ComplexityClass::Constant,
            StrategyKind::IncrementalDelta => ComplexityClass::Logarithmic,
            StrategyKind::WindowedPartition => ComplexityClass::Linear,
        }
    }

    pub fn build(self) -> Box<dyn MaintenanceStrategy> {
        match self {
            StrategyKind::FullRecompute => Box::new(FullRecompute::new()),
            StrategyKind::MaterializedSnapshot => Box::new(MaterializedSnapshot::new()),
            StrategyKind::IncrementalDelta => Box::new(IncrementalDelta::new()),
            StrategyKind::WindowedPartition => Box::new(WindowedPartition::new()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    /// Accepts the slug or the numeric id.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<u8>() {
            return Self::from_id(id).ok_or_else(|| format!("unknown strategy id {id}"));
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed)
            .ok_or_else(|| format!("unknown strategy '{trimmed}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexityClass {
    #[serde(rename = "O(1)")]
    Constant,
    #[serde(rename = "O(log n)")]
    Logarithmic,
    #[serde(rename = "O(n)")]
    Linear,
}

impl ComplexityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityClass::Constant => "O(1)",
            ComplexityClass::Logarithmic => "O(log n)",
            ComplexityClass::Linear => "O(n)",
        }
    }
}

/// Runs [`MaintenanceStrategy::teardown`] when dropped, so auxiliary state is
/// released on success, error, panic and future cancellation alike.
pub struct TeardownGuard<'a> {
    strategy: &'a dyn MaintenanceStrategy,
}

impl<'a> TeardownGuard<'a> {
    pub fn new(strategy: &'a dyn MaintenanceStrategy) -> Self {
        Self { strategy }
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.strategy.teardown();
    }
}

pub(crate) fn read_guard<'a, T>(lock: &'a RwLock<T>) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| MaintenanceError::ComputeError("derived view lock poisoned".to_string()))
}

pub(crate) fn write_guard<'a, T>(lock: &'a RwLock<T>) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| MaintenanceError::ComputeError("derived view lock poisoned".to_string()))
}

/// Teardown must succeed even after a panic poisoned the lock.
pub(crate) fn clear<T>(lock: &RwLock<Option<T>>) {
    let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
    *guard = None;
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
