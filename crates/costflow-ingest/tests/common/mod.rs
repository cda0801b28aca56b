//! Shared fixtures for costflow-ingest integration tests
//!
//! In-memory stand-ins for object storage, the billing API and sink tables,
//! so the pipeline can be exercised without external services.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use costflow_common::calendar::DateRange;
use costflow_ingest::billing::{
    BillingApi, CostAmount, CostLineItem, PriceLineItem, ReservationLineItem, UsageLineItem,
};
use costflow_ingest::cache::SnapshotCache;
use costflow_ingest::domain::Record;
use costflow_ingest::identity::RecordStore;
use costflow_ingest::storage::ObjectStore;
use costflow_ingest::{Config, Pipeline};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,costflow_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// 2024-05-02 06:00 UTC, so a `1d` period covers 2024-05-01
pub fn run_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap()
}

// ============================================================================
// Object storage
// ============================================================================

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key).ok_or_else(|| anyhow!("no such key: {}", key))
    }

    async fn write(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(key, data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn create_bucket_if_not_exists(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Billing API
// ============================================================================

/// Serves fixed line items; dated items get the requested day as their date
#[derive(Default)]
pub struct FakeBillingApi {
    pub prices: Vec<PriceLineItem>,
    pub costs: Vec<CostLineItem>,
    pub usage: Vec<UsageLineItem>,
    pub reservations: Vec<ReservationLineItem>,
    unavailable: bool,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeBillingApi {
    /// Fail every dated request from now on
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn calls(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    fn called(&self, kind: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(kind).or_default() += 1;
        if self.unavailable && kind != "pricing" {
            return Err(anyhow!("billing API unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingApi for FakeBillingApi {
    async fn pricing(&self, region: &str) -> Result<Vec<PriceLineItem>> {
        self.called("pricing")?;
        Ok(self.prices.iter().filter(|p| p.region == region).cloned().collect())
    }

    async fn cost(&self, range: &DateRange) -> Result<Vec<CostLineItem>> {
        self.called("cost")?;
        Ok(self
            .costs
            .iter()
            .cloned()
            .map(|mut item| {
                item.date = range.key();
                item
            })
            .collect())
    }

    async fn usage(&self, range: &DateRange) -> Result<Vec<UsageLineItem>> {
        self.called("usage")?;
        Ok(self
            .usage
            .iter()
            .cloned()
            .map(|mut item| {
                item.date = range.key();
                item
            })
            .collect())
    }

    async fn reservation(&self, range: &DateRange) -> Result<Vec<ReservationLineItem>> {
        self.called("reservation")?;
        Ok(self
            .reservations
            .iter()
            .cloned()
            .map(|mut item| {
                item.date = range.key();
                item
            })
            .collect())
    }
}

pub fn amount(value: &str) -> CostAmount {
    CostAmount {
        amount: value.to_string(),
        unit: "USD".to_string(),
    }
}

pub fn cost_item(description: &str, service: &str, record_type: &str, unblended: &str) -> CostLineItem {
    CostLineItem {
        account_id: "123456789012".into(),
        description: description.into(),
        service: service.into(),
        record_type: record_type.into(),
        unblended: amount(unblended),
        blended: amount(unblended),
        amortized: amount(unblended),
        net_amortized: amount(unblended),
        net_unblended: amount(unblended),
        ..Default::default()
    }
}

pub fn linux_price(region: &str, instance_type: &str, ondemand: f64) -> PriceLineItem {
    PriceLineItem {
        version: "20240501000000".into(),
        sku: format!("{}-{}", region, instance_type),
        offer_term_code: "JRTCKXETXF".into(),
        region: region.into(),
        instance_type: instance_type.into(),
        usage_type: format!("BoxUsage:{}", instance_type),
        ondemand,
        tenancy: "Shared".into(),
        pre_installed: "NA".into(),
        operating_system: "Linux".into(),
        ..Default::default()
    }
}

pub fn reservation(region: &str, instance_type: &str, platform: &str, hours: f64) -> ReservationLineItem {
    ReservationLineItem {
        account_id: "123456789012".into(),
        description: "prod".into(),
        region: region.into(),
        instance_type: instance_type.into(),
        platform: platform.into(),
        hours,
        num: 1.0,
        percentage: 100.0,
        ..Default::default()
    }
}

/// Two priced reservations (covering 10 and 20) and one without a catalog entry
pub fn allocation_api() -> FakeBillingApi {
    FakeBillingApi {
        prices: vec![
            linux_price("us-west-2", "m5.large", 1.0),
            linux_price("us-west-2", "c5.large", 2.0),
        ],
        costs: vec![
            cost_item("prod", "Amazon Simple Storage Service", "Usage", "15"),
            cost_item("prod", "Tax", "Tax", "3"),
        ],
        usage: vec![UsageLineItem {
            account_id: "123456789012".into(),
            description: "prod".into(),
            region: "us-west-2".into(),
            usage_type: "USW2-BoxUsage:m5.large".into(),
            instance_hour: 10.0,
            instance_num: 1.0,
            unit: "Hrs".into(),
            ..Default::default()
        }],
        reservations: vec![
            reservation("us-west-2", "m5.large", "Linux/UNIX", 10.0),
            reservation("us-west-2", "c5.large", "Linux/UNIX (Amazon VPC)", 10.0),
            reservation("us-west-2", "r5.large", "Linux/UNIX", 10.0),
        ],
        ..Default::default()
    }
}

// ============================================================================
// Record stores
// ============================================================================

pub struct MemoryStore<R> {
    table: String,
    rows: Mutex<Vec<R>>,
}

impl<R: Record + Clone> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            table: R::KIND.to_string(),
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn rows(&self) -> Vec<R> {
        self.rows.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rows().iter().map(|r| r.id().to_string()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl<R: Record + Clone> RecordStore<R> for MemoryStore<R> {
    fn table(&self) -> &str {
        &self.table
    }

    async fn exists(&self, id: &str) -> costflow_ingest::Result<bool> {
        Ok(self.rows.lock().unwrap().iter().any(|r| r.id() == id))
    }

    async fn save(&self, record: &R) -> costflow_ingest::Result<()> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Configuration and pipeline
// ============================================================================

/// Configuration from defaults plus `vars`; one region and `1d` unless overridden
pub fn config(vars: &[(&str, &str)]) -> Config {
    let mut all: HashMap<String, String> = HashMap::from([
        ("PERIOD".to_string(), "1d".to_string()),
        ("REGION".to_string(), "us-west-2".to_string()),
    ]);
    all.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    Config::from_lookup(|k| all.get(k).cloned()).unwrap()
}

pub fn pipeline(config: Config, store: Arc<MemoryObjectStore>, api: Arc<FakeBillingApi>) -> Pipeline {
    Pipeline::new(config, SnapshotCache::new(store, api), run_at())
}
