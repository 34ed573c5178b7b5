//! Cost model and strategy selector.
//!
//! `total = refresh_ms + reads_per_window × mean_read_ms`. Recommendations are
//! advisory; [`switch_strategy`] is how a caller acts on one.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::harness::BenchmarkSample;
use crate::models::{MetricDefinition, RefreshResult};
use crate::store::Session;
use crate::strategy::{MaintenanceStrategy, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioClass {
    Unchanged,
    SingleDimension,
    FullReweight,
    WindowWidth,
}

impl ScenarioClass {
    pub fn classify(old: &MetricDefinition, new: &MetricDefinition) -> Self {
        if old.window_size != new.window_size {
            return ScenarioClass::WindowWidth;
        }
        match old.weights.deltas_to(&new.weights).len() {
            0 => ScenarioClass::Unchanged,
            1 => ScenarioClass::SingleDimension,
            _ => ScenarioClass::FullReweight,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioClass::Unchanged => "unchanged",
            ScenarioClass::SingleDimension => "single-dimension",
            ScenarioClass::FullReweight => "full-reweight",
            ScenarioClass::WindowWidth => "window-width",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub strategy: StrategyKind,
    pub refresh_ms: f64,
    pub read_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub strategy: StrategyKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub strategy: StrategyKind,
    pub reads_per_window: u64,
    /// Cheapest first.
    pub estimates: Vec<CostEstimate>,
    pub excluded: Vec<Exclusion>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub reads_per_window: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            reads_per_window: 100,
        }
    }
}

impl CostModel {
    pub fn new(reads_per_window: u64) -> Self {
        Self { reads_per_window }
    }

    /// Failed or partial samples cannot be priced and are rejected with the
    /// reason.
    pub fn estimate(&self, sample: &BenchmarkSample) -> std::result::Result<CostEstimate, String> {
        if let Some(err) = &sample.error {
            return Err(err.message.clone());
        }
        let refresh_ms = sample
            .refresh_latency_ms()
            .ok_or_else(|| "no refresh was measured".to_string())?;
        let read_ms = sample
            .average_read_latency_ms()
            .ok_or_else(|| "no reads were measured".to_string())?;

        Ok(CostEstimate {
            strategy: sample.strategy,
            refresh_ms,
            read_ms,
            total_ms: refresh_ms + self.reads_per_window as f64 * read_ms,
        })
    }

    pub fn recommend(&self, samples: &[BenchmarkSample]) -> Option<Recommendation> {
        let mut estimates = Vec::new();
        let mut excluded = Vec::new();

        for sample in samples {
            match self.estimate(sample) {
                Ok(estimate) => estimates.push(estimate),
                Err(reason) => excluded.push(Exclusion {
                    strategy: sample.strategy,
                    reason,
                }),
            }
        }

        estimates.sort_by(|a, b| {
            a.total_ms
                .total_cmp(&b.total_ms)
                .then_with(|| a.strategy.id().cmp(&b.strategy.id()))
        });
        let strategy = estimates.first()?.strategy;

        Some(Recommendation {
            strategy,
            reads_per_window: self.reads_per_window,
            estimates,
            excluded,
        })
    }
}

/// Accumulates samples per change class and recommends per class or for a
/// weighted mix of classes.
#[derive(Debug, Default)]
pub struct StrategySelector {
    model: CostModel,
    history: HashMap<ScenarioClass, Vec<BenchmarkSample>>,
}

impl StrategySelector {
    pub fn new(model: CostModel) -> Self {
        Self {
            model,
            history: HashMap::new(),
        }
    }

    pub fn record(&mut self, class: ScenarioClass, sample: BenchmarkSample) {
        self.history.entry(class).or_default().push(sample);
    }

    /// Latest successful estimate per strategy for `class`.
    fn latest_estimates(&self, class: ScenarioClass) -> HashMap<StrategyKind, CostEstimate> {
        let mut latest = HashMap::new();
        if let Some(samples) = self.history.get(&class) {
            for sample in samples {
                if let Ok(estimate) = self.model.estimate(sample) {
                    latest.insert(sample.strategy, estimate);
                }
            }
        }
        latest
    }

    pub fn recommend_for(&self, class: ScenarioClass) -> Option<Recommendation> {
        let samples = self.history.get(&class)?;
        self.model.recommend(samples)
    }

    pub fn recommend_for_change(
        &self,
        old: &MetricDefinition,
        new: &MetricDefinition,
    ) -> Option<Recommendation> {
        self.recommend_for(ScenarioClass::classify(old, new))
    }

    /// Expected cost over a predicted mix, e.g. 80% single-dimension and 20%
    /// window-width. Only strategies measured under every class with a
    /// positive share compete.
    pub fn recommend_for_pattern(&self, pattern: &[(ScenarioClass, f64)]) -> Option<StrategyKind> {
        let per_class: Vec<(f64, HashMap<StrategyKind, CostEstimate>)> = pattern
            .iter()
            .filter(|(_, share)| *share > 0.0)
            .map(|(class, share)| (*share, self.latest_estimates(*class)))
            .collect();
        if per_class.is_empty() {
            return None;
        }

        StrategyKind::ALL
            .into_iter()
            .filter_map(|kind| {
                per_class
                    .iter()
                    .map(|(share, estimates)| estimates.get(&kind).map(|e| share * e.total_ms))
                    .sum::<Option<f64>>()
                    .map(|expected| (kind, expected))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id().cmp(&b.0.id())))
            .map(|(kind, _)| kind)
    }
}

/// Replaces `current` with a freshly built `next` strategy brought up to
/// `live`. The old strategy is torn down only once the new one is ready; on
/// failure the new one is torn down and `current` is left serving.
pub async fn switch_strategy(
    current: &mut Box<dyn MaintenanceStrategy>,
    next: StrategyKind,
    session: &mut dyn Session,
    live: &MetricDefinition,
) -> Result<RefreshResult> {
    let replacement = next.build();
    let refresh = match replacement.apply_definition_change(session, live, live).await {
        Ok(refresh) => refresh,
        Err(err) => {
            replacement.teardown();
            return Err(err);
        }
    };

    let previous = std::mem::replace(current, replacement);
    previous.teardown();
    info!(
        from = %previous.kind(),
        to = %next,
        version = live.version,
        "switched maintenance strategy"
    );
    Ok(refresh)
}
