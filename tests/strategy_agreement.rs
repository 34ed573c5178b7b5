use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use risk_view_maintenance::harness::{BenchmarkHarness, DefinitionChangeScenario, HarnessConfig};
use risk_view_maintenance::ingest::seed_records;
use risk_view_maintenance::risk;
use risk_view_maintenance::store::{MemoryStore, Session};
use risk_view_maintenance::strategy::{
    FullRecompute, IncrementalDelta, MaterializedSnapshot, WindowedPartition,
};
use risk_view_maintenance::{
    DerivedScore, Dimension, MaintenanceError, MaintenanceStrategy, MetricDefinition, Record,
    StrategyKind, Weights,
};

const TOLERANCE: f64 = 1e-9;

fn scenario_records() -> Vec<Record> {
    vec![
        Record::new(1, "IUB", 10, 5, 2),
        Record::new(2, "IUB", 2, 8, 9),
        Record::new(3, "IUB", 7, 7, 7),
    ]
}

fn baseline() -> MetricDefinition {
    MetricDefinition::new(1, Weights::new(0.4, 0.3, 0.3))
}

fn by_id(rows: &[DerivedScore]) -> HashMap<i64, f64> {
    rows.iter().map(|row| (row.record_id, row.score)).collect()
}

fn assert_same_scores(left: &[DerivedScore], right: &[DerivedScore]) {
    assert_eq!(left.len(), right.len());
    let right = by_id(right);
    for row in left {
        let other = right[&row.record_id];
        assert!(
            (row.score - other).abs() < TOLERANCE,
            "record {} scored {} vs {}",
            row.record_id,
            row.score,
            other
        );
    }
}

/// Brings a strategy to `definition`. Delta needs a baseline to shift from.
async fn bring_up(
    strategy: &dyn MaintenanceStrategy,
    session: &mut dyn Session,
    definition: &MetricDefinition,
) {
    let old = if definition.is_windowed() {
        definition.clone()
    } else {
        baseline()
    };
    strategy
        .apply_definition_change(session, &old, definition)
        .await
        .unwrap();
}

/// Serves the first `healthy_scans` scans, then fails or hangs.
struct FaultySession {
    records: Vec<Record>,
    scans: Arc<AtomicUsize>,
    healthy_scans: usize,
    hang: bool,
}

#[async_trait]
impl Session for FaultySession {
    async fn scan_records(&mut self) -> risk_view_maintenance::Result<Vec<Record>> {
        let scan = self.scans.fetch_add(1, Ordering::SeqCst);
        if scan < self.healthy_scans {
            return Ok(self.records.clone());
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        Err(MaintenanceError::StoreUnavailable(
            "connection reset by peer".to_string(),
        ))
    }
}

/// Announces each scan on `entered`, then holds it until `gate` hands out a
/// permit.
struct GatedSession {
    records: Vec<Record>,
    entered: Arc<Notify>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Session for GatedSession {
    async fn scan_records(&mut self) -> risk_view_maintenance::Result<Vec<Record>> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| MaintenanceError::StoreUnavailable(err.to_string()))?;
        Ok(self.records.clone())
    }
}

/// Every scan costs `delay` before the rows come back.
struct SlowSession {
    records: Vec<Record>,
    delay: Duration,
}

#[async_trait]
impl Session for SlowSession {
    async fn scan_records(&mut self) -> risk_view_maintenance::Result<Vec<Record>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.records.clone())
    }
}

/// Rows form one whole view: a single `as_of` and the scores `definition`
/// produces.
fn assert_whole_view(rows: &[DerivedScore], records: &[Record], definition: &MetricDefinition) {
    assert!(
        rows.iter().all(|row| row.as_of == definition.version),
        "expected every row at v{}",
        definition.version
    );
    assert_same_scores(rows, &risk::derived_scores(records, definition));
}

#[tokio::test]
async fn scenario_a_top_two_under_baseline_weights() {
    let store = MemoryStore::new(scenario_records());
    let mut session = store.memory_session();
    let d0 = baseline();

    for kind in StrategyKind::ALL {
        let strategy = kind.build();
        strategy
            .apply_definition_change(&mut session, &d0, &d0)
            .await
            .unwrap();
        let top = strategy.read_top_k(&mut session, 2).await.unwrap();
        let ids: Vec<i64> = top.iter().map(|row| row.record_id).collect();
        assert_eq!(ids, vec![3, 1], "{kind}");
        assert!((top[0].score - 7.0).abs() < TOLERANCE);
        assert!((top[1].score - 6.1).abs() < TOLERANCE);
    }
}

#[tokio::test]
async fn scenario_b_stress_delta_matches_full_recompute() {
    let store = MemoryStore::new(scenario_records());
    let mut session = store.memory_session();
    let d0 = baseline();
    let d1 = MetricDefinition::new(2, d0.weights.with(Dimension::Stress, 0.5));

    let delta = IncrementalDelta::new();
    let refresh = delta
        .apply_definition_change(&mut session, &d0, &d1)
        .await
        .unwrap();
    assert_eq!(refresh.rows_affected, 3);
    let maintained = delta.read_top_k(&mut session, 3).await.unwrap();

    let ids: Vec<i64> = maintained.iter().map(|row| row.record_id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    for (row, expected) in maintained.iter().zip([8.4, 7.6, 7.1]) {
        assert!((row.score - expected).abs() < TOLERANCE);
        assert_eq!(row.as_of, 2);
    }

    let recompute = FullRecompute::new();
    recompute
        .apply_definition_change(&mut session, &d0, &d1)
        .await
        .unwrap();
    let fresh = recompute.read_top_k(&mut session, 3).await.unwrap();
    assert_same_scores(&maintained, &fresh);
}

#[tokio::test]
async fn scenario_c_window_change_rejected_by_snapshot() {
    let store = MemoryStore::new(scenario_records());
    let mut session = store.memory_session();
    let d0 = baseline();
    let windowed = MetricDefinition {
        version: 2,
        ..d0.clone().with_window(5)
    };

    let err = MaterializedSnapshot::new()
        .apply_definition_change(&mut session, &d0, &windowed)
        .await
        .unwrap_err();
    assert!(matches!(err, MaintenanceError::DefinitionIncompatible(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn scenario_d_store_loss_mid_run_keeps_partial_latencies() {
    let scans = Arc::new(AtomicUsize::new(0));
    let mut session = FaultySession {
        records: seed_records(),
        scans: Arc::clone(&scans),
        healthy_scans: 3,
        hang: false,
    };
    let strategy = FullRecompute::new();
    let harness = BenchmarkHarness::new(HarnessConfig {
        iterations: 10,
        k: 5,
        deadline: None,
    });

    let sample = harness
        .run(&strategy, &mut session, &DefinitionChangeScenario::full_reweight())
        .await;

    assert_eq!(sample.latencies_ms.len(), 3);
    assert_eq!(sample.sample_rows.len(), 5);
    let error = sample.error.as_ref().unwrap();
    assert_eq!(error.kind, "store_unavailable");
    assert!(error.retryable);
    assert!(sample.average_read_latency_ms().is_some());
    assert_eq!(scans.load(Ordering::SeqCst), 4);
    assert!(strategy.current_definition().is_none());
}

#[tokio::test]
async fn all_strategies_agree_on_scores() {
    let store = MemoryStore::new(seed_records());
    let mut session = store.memory_session();
    let definition = MetricDefinition::new(7, Weights::new(0.25, 0.6, 0.15));
    let k = seed_records().len();

    let mut results = Vec::new();
    for kind in StrategyKind::ALL {
        let strategy = kind.build();
        bring_up(strategy.as_ref(), &mut session, &definition).await;
        results.push(strategy.read_top_k(&mut session, k).await.unwrap());
    }

    for rows in &results[1..] {
        assert_same_scores(&results[0], rows);
    }
}

#[tokio::test]
async fn windowed_definitions_agree_between_recompute_delta_and_partition() {
    let store = MemoryStore::new(seed_records());
    let mut session = store.memory_session();
    let definition = baseline().with_window(2);
    let k = seed_records().len();

    let mut results = Vec::new();
    for kind in [
        StrategyKind::FullRecompute,
        StrategyKind::IncrementalDelta,
        StrategyKind::WindowedPartition,
    ] {
        let strategy = kind.build();
        bring_up(strategy.as_ref(), &mut session, &definition).await;
        results.push(strategy.read_top_k(&mut session, k).await.unwrap());
    }

    assert_same_scores(&results[0], &results[1]);
    assert_same_scores(&results[0], &results[2]);
}

#[tokio::test]
async fn delta_changes_compose() {
    let store = MemoryStore::new(seed_records());
    let mut session = store.memory_session();
    let d0 = baseline();
    let d1 = MetricDefinition::new(2, Weights::new(0.1, 0.7, 0.3));
    let d2 = MetricDefinition::new(3, Weights::new(0.9, 0.2, 0.05));
    let k = seed_records().len();

    let stepwise = IncrementalDelta::new();
    stepwise
        .apply_definition_change(&mut session, &d0, &d1)
        .await
        .unwrap();
    stepwise
        .apply_definition_change(&mut session, &d1, &d2)
        .await
        .unwrap();

    let direct = IncrementalDelta::new();
    direct
        .apply_definition_change(&mut session, &d0, &d2)
        .await
        .unwrap();

    assert_same_scores(
        &stepwise.read_top_k(&mut session, k).await.unwrap(),
        &direct.read_top_k(&mut session, k).await.unwrap(),
    );
}

#[tokio::test]
async fn snapshot_refresh_is_idempotent() {
    let store = MemoryStore::new(seed_records());
    let mut session = store.memory_session();
    let d0 = baseline();
    let d1 = MetricDefinition::new(2, Weights::new(0.5, 0.4, 0.1));
    let k = seed_records().len();

    let strategy = MaterializedSnapshot::new();
    strategy
        .apply_definition_change(&mut session, &d0, &d1)
        .await
        .unwrap();
    let once = strategy.read_top_k(&mut session, k).await.unwrap();
    strategy
        .apply_definition_change(&mut session, &d0, &d1)
        .await
        .unwrap();
    let twice = strategy.read_top_k(&mut session, k).await.unwrap();

    assert_eq!(once, twice);
}

#[tokio::test]
async fn top_k_is_non_increasing_for_every_strategy() {
    let store = MemoryStore::new(seed_records());
    let mut session = store.memory_session();
    let definition = baseline();
    let n = seed_records().len();

    for kind in StrategyKind::ALL {
        let strategy = kind.build();
        bring_up(strategy.as_ref(), &mut session, &definition).await;
        for k in 1..=n + 1 {
            let rows = strategy.read_top_k(&mut session, k).await.unwrap();
            assert_eq!(rows.len(), k.min(n));
            assert!(
                rows.windows(2).all(|pair| pair[0].score >= pair[1].score),
                "{kind} not descending at k={k}"
            );
        }
    }
}

#[tokio::test]
async fn incompatible_refresh_reports_without_reads() {
    let store = MemoryStore::new(seed_records());
    let sample = BenchmarkHarness::default()
        .run_kind(
            &store,
            StrategyKind::MaterializedSnapshot,
            &DefinitionChangeScenario::window_width(),
        )
        .await;

    assert!(sample.refresh.is_none());
    assert!(sample.latencies_ms.is_empty());
    assert_eq!(sample.average_read_latency_ms(), None);
    assert_eq!(
        sample.error.map(|err| err.kind),
        Some("definition_incompatible")
    );
}

#[tokio::test]
async fn deadline_expiry_surfaces_as_store_unavailable() {
    let mut session = FaultySession {
        records: seed_records(),
        scans: Arc::new(AtomicUsize::new(0)),
        healthy_scans: 0,
        hang: true,
    };
    let harness = BenchmarkHarness::new(HarnessConfig {
        iterations: 5,
        k: 5,
        deadline: Some(Duration::from_millis(20)),
    });
    let strategy = FullRecompute::new();

    let sample = harness
        .run(&strategy, &mut session, &DefinitionChangeScenario::full_reweight())
        .await;

    assert!(sample.refresh.is_some());
    assert!(sample.latencies_ms.is_empty());
    let error = sample.error.unwrap();
    assert_eq!(error.kind, "store_unavailable");
    assert!(error.message.contains("deadline"));
}

#[tokio::test]
async fn cancelled_run_still_tears_down() {
    let mut session = FaultySession {
        records: seed_records(),
        scans: Arc::new(AtomicUsize::new(0)),
        healthy_scans: 0,
        hang: true,
    };
    let strategy = FullRecompute::new();
    let harness = BenchmarkHarness::default();
    let scenario = DefinitionChangeScenario::full_reweight();

    let run = harness.run(&strategy, &mut session, &scenario);
    let outcome = tokio::time::timeout(Duration::from_millis(50), run).await;

    assert!(outcome.is_err(), "run should still be blocked on the store");
    assert!(strategy.current_definition().is_none());
}

#[tokio::test]
async fn delta_refresh_time_excludes_seed_scan() {
    let delay = Duration::from_millis(40);
    let delay_ms = delay.as_secs_f64() * 1000.0;
    let mut session = SlowSession {
        records: seed_records(),
        delay,
    };
    let harness = BenchmarkHarness::new(HarnessConfig {
        iterations: 2,
        k: 5,
        deadline: None,
    });
    let scenario = DefinitionChangeScenario::single_dimension();

    let snapshot = harness
        .run(&MaterializedSnapshot::new(), &mut session, &scenario)
        .await;
    let delta = harness
        .run(&IncrementalDelta::new(), &mut session, &scenario)
        .await;

    let snapshot_ms = snapshot.refresh_latency_ms().unwrap();
    let delta_ms = delta.refresh_latency_ms().unwrap();
    assert!(snapshot_ms >= delay_ms, "snapshot refresh took {snapshot_ms}ms");
    assert!(delta_ms < delay_ms, "delta refresh took {delta_ms}ms");
    assert_eq!(
        delta.refresh.as_ref().map(|refresh| refresh.rows_affected),
        Some(seed_records().len() as u64)
    );
}

#[tokio::test]
async fn windowed_partition_matches_recompute_on_large_partition() {
    let records: Vec<Record> = (1..=300_000)
        .map(|id| {
            Record::new(
                id,
                "IUB",
                (id % 37) as i32,
                (id % 23) as i32,
                (id % 41) as i32,
            )
        })
        .collect();
    let n = records.len();
    let store = MemoryStore::new(records);
    let mut session = store.memory_session();
    let definition = baseline();

    let recompute = FullRecompute::new();
    let windowed = WindowedPartition::new();
    let strategies: [&dyn MaintenanceStrategy; 2] = [&recompute, &windowed];
    for strategy in strategies {
        strategy
            .apply_definition_change(&mut session, &definition, &definition)
            .await
            .unwrap();
    }

    assert_same_scores(
        &recompute.read_top_k(&mut session, n).await.unwrap(),
        &windowed.read_top_k(&mut session, n).await.unwrap(),
    );
}

#[tokio::test]
async fn snapshot_readers_keep_previous_view_during_rebuild() {
    let records = seed_records();
    let n = records.len();
    let store = MemoryStore::new(records.clone());
    let mut session = store.memory_session();
    let d0 = baseline();
    let d1 = MetricDefinition::new(2, Weights::new(0.5, 0.4, 0.1));

    let strategy = Arc::new(MaterializedSnapshot::new());
    strategy
        .apply_definition_change(&mut session, &d0, &d0)
        .await
        .unwrap();

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let mut gated = GatedSession {
        records: records.clone(),
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
    };
    let rebuild = {
        let strategy = Arc::clone(&strategy);
        let (old, new) = (d0.clone(), d1.clone());
        tokio::spawn(async move {
            strategy
                .apply_definition_change(&mut gated, &old, &new)
                .await
        })
    };

    entered.notified().await;
    for _ in 0..3 {
        let rows = strategy.read_top_k(&mut session, n).await.unwrap();
        assert_whole_view(&rows, &records, &d0);
        assert_eq!(strategy.current_definition(), Some(d0.clone()));
        tokio::task::yield_now().await;
    }

    gate.add_permits(1);
    rebuild.await.unwrap().unwrap();
    let rows = strategy.read_top_k(&mut session, n).await.unwrap();
    assert_whole_view(&rows, &records, &d1);
}

#[tokio::test]
async fn delta_readers_keep_previous_view_during_reseed() {
    let records = seed_records();
    let n = records.len();
    let store = MemoryStore::new(records.clone());
    let mut session = store.memory_session();
    let d0 = baseline();
    let d1 = MetricDefinition::new(2, Weights::new(0.1, 0.7, 0.3));
    let d2 = MetricDefinition::new(3, Weights::new(0.9, 0.2, 0.05));

    let strategy = Arc::new(IncrementalDelta::new());
    strategy
        .apply_definition_change(&mut session, &d0, &d0)
        .await
        .unwrap();

    // The table sits at d0, so a d1 -> d2 change reseeds under d1 first.
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let mut gated = GatedSession {
        records: records.clone(),
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
    };
    let refresh = {
        let strategy = Arc::clone(&strategy);
        let (old, new) = (d1.clone(), d2.clone());
        tokio::spawn(async move {
            strategy
                .apply_definition_change(&mut gated, &old, &new)
                .await
        })
    };

    entered.notified().await;
    for _ in 0..3 {
        let rows = strategy.read_top_k(&mut session, n).await.unwrap();
        assert_whole_view(&rows, &records, &d0);
        tokio::task::yield_now().await;
    }

    gate.add_permits(1);
    let result = refresh.await.unwrap().unwrap();
    assert_eq!(result.rows_affected, n as u64);
    let rows = strategy.read_top_k(&mut session, n).await.unwrap();
    assert_whole_view(&rows, &records, &d2);
}

#[tokio::test]
async fn failed_refresh_releases_existing_snapshot() {
    let store = MemoryStore::new(seed_records());
    let mut healthy = store.memory_session();
    let d0 = baseline();
    let strategy = MaterializedSnapshot::new();
    strategy
        .apply_definition_change(&mut healthy, &d0, &d0)
        .await
        .unwrap();
    assert_eq!(strategy.current_definition(), Some(d0));

    let mut session = FaultySession {
        records: seed_records(),
        scans: Arc::new(AtomicUsize::new(0)),
        healthy_scans: 0,
        hang: false,
    };
    let sample = BenchmarkHarness::default()
        .run(&strategy, &mut session, &DefinitionChangeScenario::full_reweight())
        .await;

    assert!(sample.refresh.is_none());
    assert_eq!(
        sample.error.map(|err| err.kind),
        Some("store_unavailable")
    );
    assert!(strategy.current_definition().is_none());
    let err = strategy.read_top_k(&mut healthy, 5).await.unwrap_err();
    assert!(matches!(err, MaintenanceError::StoreUnavailable(_)));
}

#[tokio::test]
async fn cancelled_delta_run_releases_table() {
    let store = MemoryStore::new(seed_records());
    let mut healthy = store.memory_session();
    let seeded = MetricDefinition::new(1, Weights::new(0.1, 0.7, 0.3));
    let strategy = IncrementalDelta::new();
    strategy
        .apply_definition_change(&mut healthy, &seeded, &seeded)
        .await
        .unwrap();
    assert!(strategy.current_definition().is_some());

    // The scenario starts from different weights, so the refresh reseeds and
    // blocks on the store.
    let mut session = FaultySession {
        records: seed_records(),
        scans: Arc::new(AtomicUsize::new(0)),
        healthy_scans: 0,
        hang: true,
    };
    let harness = BenchmarkHarness::default();
    let scenario = DefinitionChangeScenario::single_dimension();

    let run = harness.run(&strategy, &mut session, &scenario);
    let outcome = tokio::time::timeout(Duration::from_millis(50), run).await;

    assert!(outcome.is_err(), "run should still be blocked on the store");
    assert!(strategy.current_definition().is_none());
    let err = strategy.read_top_k(&mut healthy, 5).await.unwrap_err();
    assert!(matches!(err, MaintenanceError::StoreUnavailable(_)));
}
