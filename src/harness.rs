//! Benchmark harness: one timed definition change followed by sequential
//! timed reads against a single strategy.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cost::ScenarioClass;
use crate::error::{MaintenanceError, Result};
use crate::models::{DerivedScore, Dimension, MetricDefinition, RefreshResult, Weights};
use crate::store::{RecordStore, Session};
use crate::strategy::{MaintenanceStrategy, StrategyKind, TeardownGuard};

pub const DEFAULT_ITERATIONS: usize = 10;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefinitionChangeScenario {
    pub name: String,
    pub old: MetricDefinition,
    pub new: MetricDefinition,
}

impl DefinitionChangeScenario {
    pub fn new(name: impl Into<String>, old: MetricDefinition, new: MetricDefinition) -> Self {
        Self {
            name: name.into(),
            old,
            new,
        }
    }

    pub fn baseline() -> MetricDefinition {
        MetricDefinition::new(1, Weights::new(0.4, 0.3, 0.3))
    }

    /// Every weight moves at once.
    pub fn full_reweight() -> Self {
        Self::new(
            "full-reweight",
            Self::baseline(),
            MetricDefinition::new(2, Weights::new(0.5, 0.4, 0.1)),
        )
    }

    /// Only the stress weight moves, 0.3 to 0.5.
    pub fn single_dimension() -> Self {
        let old = Self::baseline();
        let new = MetricDefinition::new(2, old.weights.with(Dimension::Stress, 0.5));
        Self::new("single-dimension", old, new)
    }

    /// Rolling window widened from 5 to 50 preceding rows.
    pub fn window_width() -> Self {
        let old = Self::baseline().with_window(5);
        let new = MetricDefinition {
            version: 2,
            ..Self::baseline().with_window(50)
        };
        Self::new("window-width", old, new)
    }

    pub fn class(&self) -> ScenarioClass {
        ScenarioClass::classify(&self.old, &self.new)
    }

    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::FullRecompute | StrategyKind::MaterializedSnapshot => {
                Self::full_reweight()
            }
            StrategyKind::IncrementalDelta => Self::single_dimension(),
            StrategyKind::WindowedPartition => Self::window_width(),
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "full-reweight" => Some(Self::full_reweight()),
            "single-dimension" => Some(Self::single_dimension()),
            "window-width" => Some(Self::window_width()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleError {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&MaintenanceError> for SampleError {
    fn from(err: &MaintenanceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSample {
    pub run_id: Uuid,
    pub strategy: StrategyKind,
    pub scenario: String,
    pub iterations_requested: usize,
    pub refresh: Option<RefreshResult>,
    pub latencies_ms: Vec<f64>,
    pub sample_rows: Vec<DerivedScore>,
    pub error: Option<SampleError>,
}

impl BenchmarkSample {
    fn start(strategy: StrategyKind, scenario: &DefinitionChangeScenario, iterations: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            strategy,
            scenario: scenario.name.clone(),
            iterations_requested: iterations,
            refresh: None,
            latencies_ms: Vec::with_capacity(iterations),
            sample_rows: Vec::new(),
            error: None,
        }
    }

    pub fn refresh_latency_ms(&self) -> Option<f64> {
        self.refresh.map(|r| r.elapsed_ms)
    }

    /// Mean over the iterations that completed. `None` when none did.
    pub fn average_read_latency_ms(&self) -> Option<f64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        Some(self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64)
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.latencies_ms.len() == self.iterations_requested
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub iterations: usize,
    pub k: usize,
    /// Per-operation bound; expiry is reported as `StoreUnavailable`.
    pub deadline: Option<Duration>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            k: DEFAULT_TOP_K,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkHarness {
    config: HarnessConfig,
}

impl BenchmarkHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.deadline {
            None => operation.await,
            Some(deadline) => tokio::time::timeout(deadline, operation)
                .await
                .unwrap_or_else(|_| {
                    Err(MaintenanceError::StoreUnavailable(format!(
                        "operation exceeded deadline of {} ms",
                        deadline.as_millis()
                    )))
                }),
        }
    }

    /// Applies the scenario once, then reads `iterations` times. The first
    /// failure ends the run; latencies gathered so far are kept. The strategy
    /// is torn down on every exit path.
    pub async fn run(
        &self,
        strategy: &dyn MaintenanceStrategy,
        session: &mut dyn Session,
        scenario: &DefinitionChangeScenario,
    ) -> BenchmarkSample {
        let _teardown = TeardownGuard::new(strategy);
        let mut sample = BenchmarkSample::start(strategy.kind(), scenario, self.config.iterations);
        info!(
            run_id = %sample.run_id,
            strategy = %strategy.kind(),
            scenario = %scenario.name,
            iterations = self.config.iterations,
            "benchmark run started"
        );

        let refresh = self
            .bounded(strategy.apply_definition_change(session, &scenario.old, &scenario.new))
            .await;
        match refresh {
            Ok(result) => sample.refresh = Some(result),
            Err(err) => {
                warn!(run_id = %sample.run_id, error = %err, "definition change failed");
                sample.error = Some(SampleError::from(&err));
                return sample;
            }
        }

        for iteration in 0..self.config.iterations {
            let start = Instant::now();
            let read = self.bounded(strategy.read_top_k(session, self.config.k)).await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            match read {
                Ok(rows) => {
                    sample.latencies_ms.push(latency_ms);
                    if iteration == 0 {
                        sample.sample_rows = rows;
                    }
                }
                Err(err) => {
                    warn!(
                        run_id = %sample.run_id,
                        iteration = iteration + 1,
                        error = %err,
                        "read failed; aborting remaining iterations"
                    );
                    sample.error = Some(SampleError::from(&err));
                    break;
                }
            }
        }

        info!(
            run_id = %sample.run_id,
            refresh_ms = ?sample.refresh_latency_ms(),
            avg_read_ms = ?sample.average_read_latency_ms(),
            completed = sample.latencies_ms.len(),
            "benchmark run finished"
        );
        sample
    }

    /// Acquires a dedicated session, builds the strategy and runs it.
    pub async fn run_kind(
        &self,
        store: &dyn RecordStore,
        kind: StrategyKind,
        scenario: &DefinitionChangeScenario,
    ) -> BenchmarkSample {
        let mut session = match self.bounded(store.session()).await {
            Ok(session) => session,
            Err(err) => {
                warn!(strategy = %kind, error = %err, "could not acquire a session");
                let mut sample = BenchmarkSample::start(kind, scenario, self.config.iterations);
                sample.error = Some(SampleError::from(&err));
                return sample;
            }
        };
        let strategy = kind.build();
        self.run(strategy.as_ref(), session.as_mut(), scenario).await
    }

    /// Runs every `(kind, scenario)` pair, each on its own session. Results
    /// come back in plan order.
    pub async fn run_all(
        &self,
        store: Arc<dyn RecordStore>,
        plan: Vec<(StrategyKind, DefinitionChangeScenario)>,
        parallel: bool,
    ) -> Vec<BenchmarkSample> {
        if !parallel {
            let mut samples = Vec::with_capacity(plan.len());
            for (kind, scenario) in &plan {
                samples.push(self.run_kind(store.as_ref(), *kind, scenario).await);
            }
            return samples;
        }

        let mut tasks = JoinSet::new();
        for (position, (kind, scenario)) in plan.iter().cloned().enumerate() {
            let harness = self.clone();
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                let sample = harness.run_kind(store.as_ref(), kind, &scenario).await;
                (position, sample)
            });
        }

        let mut slots: Vec<Option<BenchmarkSample>> = vec![None; plan.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, sample)) => slots[position] = Some(sample),
                Err(err) => warn!(error = %err, "benchmark task did not complete"),
            }
        }

        plan.iter()
            .zip(slots)
            .map(|((kind, scenario), slot)| {
                slot.unwrap_or_else(|| {
                    let mut sample = BenchmarkSample::start(*kind, scenario, self.config.iterations);
                    sample.error = Some(SampleError::from(&MaintenanceError::ComputeError(
                        "benchmark task panicked or was cancelled".to_string(),
                    )));
                    sample
                })
            })
            .collect()
    }
}
