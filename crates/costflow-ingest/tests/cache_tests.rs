//! Snapshot cache integration tests
//!
//! Pricing snapshots are reused once stored; cost, usage and reservation
//! snapshots are deleted and fetched again on every run.

mod common;

use anyhow::Result;
use common::{allocation_api, config, init_tracing, pipeline, MemoryObjectStore};
use costflow_common::calendar::{parse_date, DateRange};
use costflow_ingest::billing::CostLineItem;
use costflow_ingest::cache::{SnapshotCache, SnapshotKey};
use costflow_ingest::IngestError;
use std::sync::Arc;

const PRICING_KEY: &str = "pricing/us-west-2.json";
const COST_KEY: &str = "cost/2024-05-01.json";

#[tokio::test]
async fn test_first_refresh_fetches_everything() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api());

    let summary = pipeline(config(&[]), store.clone(), api.clone()).prepare().await?;

    assert_eq!(summary.fetched, 4);
    assert_eq!(summary.reused, 0);
    assert_eq!(
        store.keys(),
        vec![
            COST_KEY,
            PRICING_KEY,
            "reservation/2024-05-01.json",
            "usage/2024-05-01.json"
        ]
    );
    assert_eq!(store.deletes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_stored_pricing_is_not_fetched_again() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    store.insert(PRICING_KEY, "[]");
    let api = Arc::new(allocation_api());

    let summary = pipeline(config(&[]), store.clone(), api.clone()).prepare().await?;

    assert_eq!(api.calls("pricing"), 0);
    assert_eq!(summary.reused, 1);
    assert_eq!(store.get(PRICING_KEY).as_deref(), Some(b"[]".as_slice()));
    Ok(())
}

#[tokio::test]
async fn test_stored_cost_is_deleted_and_fetched_once() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    store.insert(COST_KEY, "[]");
    let api = Arc::new(allocation_api());

    let pipeline = pipeline(config(&[]), store.clone(), api.clone());
    pipeline.prepare().await?;
    pipeline.prepare().await?;

    assert_eq!(api.calls("cost"), 1);
    assert_eq!(store.deletes(), 1);

    let cost: Vec<CostLineItem> = serde_json::from_slice(&store.get(COST_KEY).unwrap())?;
    assert_eq!(cost.len(), 2);
    assert!(cost.iter().all(|c| c.date == "2024-05-01"));
    Ok(())
}

#[tokio::test]
async fn test_next_run_refetches_dated_snapshots_only() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api());

    pipeline(config(&[]), store.clone(), api.clone()).prepare().await?;
    let second = pipeline(config(&[]), store.clone(), api.clone()).prepare().await?;

    assert_eq!(second.reused, 1);
    assert_eq!(second.fetched, 3);
    assert_eq!(api.calls("pricing"), 1);
    assert_eq!(api.calls("cost"), 2);
    assert_eq!(api.calls("usage"), 2);
    assert_eq!(api.calls("reservation"), 2);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_periods_fetch_each_day_once() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api());

    // 2024-05-02: both periods cover 2024-05-01
    pipeline(config(&[("PERIOD", "1m,1d")]), store.clone(), api.clone())
        .prepare()
        .await?;

    assert_eq!(api.calls("cost"), 1);
    assert_eq!(api.calls("reservation"), 1);
    Ok(())
}

#[tokio::test]
async fn test_api_failure_is_reported_with_key() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryObjectStore::default());
    let api = Arc::new(allocation_api().unavailable());
    let cache = SnapshotCache::new(store.clone(), api);

    let day = DateRange::day(parse_date("2024-05-01")?);
    let err = cache.fetch_if_needed(&SnapshotKey::Cost(day)).await.unwrap_err();

    match err {
        IngestError::Fetch { key, message } => {
            assert_eq!(key, COST_KEY);
            assert!(message.contains("unavailable"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.get(COST_KEY).is_none());
    Ok(())
}
