//! End-to-end derivation over in-memory snapshots
//!
//! Covers the reservation/pricing join, content-addressed ids across runs,
//! idempotent persistence and the monitoring aggregates.

mod common;

use anyhow::Result;
use chrono::Duration;
use common::{allocation_api, config, init_tracing, pipeline, run_at, MemoryObjectStore, MemoryStore};
use costflow_ingest::cache::SnapshotCache;
use costflow_ingest::domain::{AccountCost, PricingEntry, UsageQuantity, Utilization};
use costflow_ingest::pipeline::Stores;
use costflow_ingest::writers::MonitoringWriter;
use costflow_ingest::Pipeline;
use std::sync::Arc;

fn covering(utilizations: &[Utilization], instance_type: &str) -> (f64, f64) {
    let u = utilizations
        .iter()
        .find(|u| u.instance_type == instance_type)
        .unwrap();
    (u.covering_cost, u.percentage)
}

#[tokio::test]
async fn test_covering_cost_allocation() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let pipeline = pipeline(config(&[]), store, Arc::new(allocation_api()));
    pipeline.prepare().await?;

    let batch = pipeline.full_batch().await?;

    assert_eq!(batch.utilizations.len(), 3);
    let (cost, pct) = covering(&batch.utilizations, "m5.large");
    assert_eq!(cost, 10.0);
    assert!((pct - 100.0 / 3.0).abs() < 1e-9);

    let (cost, pct) = covering(&batch.utilizations, "c5.large");
    assert_eq!(cost, 20.0);
    assert!((pct - 200.0 / 3.0).abs() < 1e-9);

    assert_eq!(covering(&batch.utilizations, "r5.large"), (0.0, 0.0));

    assert_eq!(batch.warnings.len(), 1);
    assert_eq!(batch.warnings[0].instance_type, "r5.large");
    Ok(())
}

#[tokio::test]
async fn test_batch_window_and_records() -> Result<()> {
    init_tracing();
    let pipeline = pipeline(
        config(&[]),
        Arc::new(MemoryObjectStore::default()),
        Arc::new(allocation_api()),
    );
    pipeline.prepare().await?;

    let batch = pipeline.full_batch().await?;
    let day = run_at().date_naive() - Duration::days(1);

    assert_eq!(batch.window, Some((day, day)));
    assert_eq!(batch.account_costs.len(), 2);
    assert_eq!(batch.usage_quantities.len(), 1);
    assert!(batch.account_costs.iter().all(|c| c.date == day));
    assert!(batch.account_costs.iter().all(|c| c.id.len() == 64));
    assert!(batch.utilizations.iter().all(|u| u.id.len() == 64));
    Ok(())
}

#[tokio::test]
async fn test_ids_do_not_depend_on_run_time() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api());

    let first = pipeline(config(&[]), store.clone(), api.clone());
    first.prepare().await?;
    let later = Pipeline::new(
        config(&[]),
        SnapshotCache::new(store, api),
        run_at() + Duration::hours(3),
    );
    later.prepare().await?;

    let a = first.full_batch().await?;
    let b = later.full_batch().await?;

    assert_ne!(a.account_costs[0].inserted_at, b.account_costs[0].inserted_at);
    for (x, y) in a.utilizations.iter().zip(&b.utilizations) {
        assert_eq!(x.id, y.id);
    }
    for (x, y) in a.account_costs.iter().zip(&b.account_costs) {
        assert_eq!(x.id, y.id);
    }
    Ok(())
}

#[tokio::test]
async fn test_persist_twice_inserts_nothing_new() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api());

    let pricing = MemoryStore::<PricingEntry>::new();
    let account_cost = MemoryStore::<AccountCost>::new();
    let usage_quantity = MemoryStore::<UsageQuantity>::new();
    let utilization = MemoryStore::<Utilization>::new();
    let stores = Stores {
        pricing: &pricing,
        account_cost: &account_cost,
        usage_quantity: &usage_quantity,
        utilization: &utilization,
    };

    let first = pipeline(config(&[]), store.clone(), api.clone());
    first.prepare().await?;
    let inserted = first.persist(&stores).await?;
    let ids = utilization.ids();

    let second = pipeline(config(&[]), store, api);
    second.prepare().await?;
    let repeated = second.persist(&stores).await?;

    assert_eq!(inserted.iter().map(|s| s.inserted).sum::<usize>(), 2 + 2 + 1 + 3);
    assert!(repeated.iter().all(|s| s.inserted == 0));
    assert_eq!(repeated.iter().map(|s| s.skipped).sum::<usize>(), 8);
    assert_eq!(utilization.ids(), ids);
    assert_eq!(account_cost.rows().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_monitoring_points_skip_ignored_record_types() -> Result<()> {
    init_tracing();
    let pipeline = Arc::new(pipeline(
        config(&[("MACKEREL_APIKEY", "key"), ("MACKEREL_SERVICE_NAME", "billing")]),
        Arc::new(MemoryObjectStore::default()),
        Arc::new(allocation_api()),
    ));
    pipeline.prepare().await?;

    let points = MonitoringWriter::new(Arc::clone(&pipeline)).points().await?;
    let value = |name: &str| points.iter().find(|p| p.name == name).map(|p| p.value);

    assert_eq!(value("aws.1d.unblended_cost.prod"), Some(15.0));
    assert_eq!(value("aws.1d.ri_covering_cost.prod"), Some(30.0));
    assert_eq!(value("aws.1d.total_cost.prod"), Some(45.0));
    assert!(points.iter().all(|p| p.time == run_at().timestamp()));
    Ok(())
}

#[tokio::test]
async fn test_join_warning_is_reported_once_per_run() -> Result<()> {
    init_tracing();
    let pipeline = pipeline(
        config(&[]),
        Arc::new(MemoryObjectStore::default()),
        Arc::new(allocation_api()),
    );
    pipeline.prepare().await?;
    let period = pipeline.config().periods[0].clone();

    let full = pipeline.full_batch().await?;
    let first = pipeline.period_batch(&period).await?;
    let second = pipeline.period_batch(&period).await?;

    // every batch still carries the warning for its caller
    assert_eq!(full.warnings.len(), 1);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(pipeline.reported_warnings().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_suppress_warning_only_changes_logging() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api());

    let loud = pipeline(config(&[("SUPPRESS_WARNING", "false")]), store.clone(), api.clone());
    loud.prepare().await?;
    let quiet = pipeline(config(&[("SUPPRESS_WARNING", "true")]), store, api);
    quiet.prepare().await?;
    assert!(!loud.config().suppress_warning);
    assert!(quiet.config().suppress_warning);

    let expected = loud.full_batch().await?;
    let actual = quiet.full_batch().await?;

    assert_eq!(actual.account_costs, expected.account_costs);
    assert_eq!(actual.usage_quantities, expected.usage_quantities);
    assert_eq!(actual.utilizations, expected.utilizations);
    assert_eq!(actual.warnings, expected.warnings);
    assert_eq!(quiet.pricing().await?, loud.pricing().await?);
    Ok(())
}
