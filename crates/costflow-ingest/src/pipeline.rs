//! Per-run pipeline state shared by all writers
//!
//! A run refreshes the snapshot cache once, then each writer derives the
//! records it needs from the stored snapshots. Derived records are never
//! cached: covering cost and percentage are recomputed on every call.
//! Join warnings are logged once per run even when several writers derive
//! the same days.

use crate::billing::{CostLineItem, PriceLineItem, ReservationLineItem, UsageLineItem};
use crate::cache::{RefreshSummary, SnapshotCache, SnapshotKey};
use crate::config::Config;
use crate::domain::{AccountCost, PricingEntry, UsageQuantity, Utilization};
use crate::error::Result;
use crate::identity::{assign_ids, save_all, RecordStore, SaveSummary};
use crate::transform::{self, JoinWarning};
use chrono::{DateTime, NaiveDate, Utc};
use costflow_common::calendar::{unique_ranges, DateRange, Period};
use std::collections::HashSet;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument};

/// Records derived for a set of days, with ids assigned
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// First and last day covered, inclusive
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub account_costs: Vec<AccountCost>,
    pub usage_quantities: Vec<UsageQuantity>,
    pub utilizations: Vec<Utilization>,
    pub warnings: Vec<JoinWarning>,
}

/// Destination tables for [`Pipeline::persist`]
pub struct Stores<'a> {
    pub pricing: &'a dyn RecordStore<PricingEntry>,
    pub account_cost: &'a dyn RecordStore<AccountCost>,
    pub usage_quantity: &'a dyn RecordStore<UsageQuantity>,
    pub utilization: &'a dyn RecordStore<Utilization>,
}

pub struct Pipeline {
    config: Config,
    cache: SnapshotCache,
    run_at: DateTime<Utc>,
    refreshed: OnceCell<RefreshSummary>,
    reported: Mutex<HashSet<JoinWarning>>,
}

impl Pipeline {
    pub fn new(config: Config, cache: SnapshotCache, run_at: DateTime<Utc>) -> Self {
        Self {
            config,
            cache,
            run_at,
            refreshed: OnceCell::new(),
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Calendar day the run's periods are computed from
    pub fn today(&self) -> NaiveDate {
        self.run_at.date_naive()
    }

    /// Refresh all snapshots for the configured periods and regions.
    /// Only the first call per run does any work.
    pub async fn prepare(&self) -> Result<RefreshSummary> {
        let summary = self
            .refreshed
            .get_or_try_init(|| {
                self.cache
                    .refresh(&self.config.periods, &self.config.regions, self.today())
            })
            .await?;
        Ok(*summary)
    }

    /// Distinct join warnings seen so far in this run
    pub async fn reported_warnings(&self) -> usize {
        self.reported.lock().await.len()
    }

    /// Pricing catalog for the configured regions
    pub async fn pricing(&self) -> Result<Vec<PricingEntry>> {
        let mut entries = Vec::new();
        for region in &self.config.regions {
            let items: Vec<PriceLineItem> = self.cache.read(&SnapshotKey::pricing(region)).await?;
            entries.extend(transform::pricing_entries(&items, self.run_at));
        }
        assign_ids(entries)
    }

    /// Records for the days of one period
    pub async fn period_batch(&self, period: &Period) -> Result<Batch> {
        self.batch(&period.ranges(self.today())).await
    }

    /// Records for every day touched by any configured period, each day once
    pub async fn full_batch(&self) -> Result<Batch> {
        self.batch(&unique_ranges(&self.config.periods, self.today())).await
    }

    #[instrument(skip(self, ranges), fields(days = ranges.len()))]
    async fn batch(&self, ranges: &[DateRange]) -> Result<Batch> {
        let mut costs: Vec<CostLineItem> = Vec::new();
        let mut usage: Vec<UsageLineItem> = Vec::new();
        let mut reservations: Vec<ReservationLineItem> = Vec::new();

        for range in ranges {
            costs.extend(self.cache.read::<CostLineItem>(&SnapshotKey::Cost(*range)).await?);
            usage.extend(self.cache.read::<UsageLineItem>(&SnapshotKey::Usage(*range)).await?);
            reservations.extend(
                self.cache
                    .read::<ReservationLineItem>(&SnapshotKey::Reservation(*range))
                    .await?,
            );
        }

        let catalog = self.pricing().await?;
        let joined = transform::utilizations(&reservations, &catalog, self.run_at)?;
        let fresh: Vec<JoinWarning> = {
            let mut reported = self.reported.lock().await;
            joined
                .warnings
                .iter()
                .filter(|w| reported.insert((*w).clone()))
                .cloned()
                .collect()
        };
        transform::report_warnings(&fresh, self.config.suppress_warning);

        let batch = Batch {
            window: ranges.first().zip(ranges.last()).map(|(a, b)| (a.start, b.start)),
            account_costs: assign_ids(transform::account_costs(&costs, self.run_at)?)?,
            usage_quantities: assign_ids(transform::usage_quantities(&usage, self.run_at)?)?,
            utilizations: assign_ids(joined.records)?,
            warnings: joined.warnings,
        };

        debug!(
            account_costs = batch.account_costs.len(),
            usage_quantities = batch.usage_quantities.len(),
            utilizations = batch.utilizations.len(),
            warnings = batch.warnings.len(),
            "Derived batch"
        );
        Ok(batch)
    }

    /// Save the pricing catalog and the full batch, skipping ids already stored
    pub async fn persist(&self, stores: &Stores<'_>) -> Result<Vec<SaveSummary>> {
        let suppress = self.config.suppress_warning;
        let pricing = self.pricing().await?;
        let batch = self.full_batch().await?;

        let summaries = vec![
            save_all(stores.pricing, &pricing, suppress).await?,
            save_all(stores.account_cost, &batch.account_costs, suppress).await?,
            save_all(stores.usage_quantity, &batch.usage_quantities, suppress).await?,
            save_all(stores.utilization, &batch.utilizations, suppress).await?,
        ];

        let inserted: usize = summaries.iter().map(|s| s.inserted).sum();
        let skipped: usize = summaries.iter().map(|s| s.skipped).sum();
        info!(inserted, skipped, "Persisted batch");
        Ok(summaries)
    }
}
