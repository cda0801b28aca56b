//! Snapshot cache over object storage
//!
//! Raw billing API responses are kept in the bucket under
//! `<kind>/<partition>.json`. Whether an existing snapshot may be reused is a
//! property of its kind:
//!
//! | kind          | partition | policy        |
//! |---------------|-----------|---------------|
//! | `pricing`     | region    | `Immutable`   |
//! | `cost`        | date      | `Refreshable` |
//! | `usage`       | date      | `Refreshable` |
//! | `reservation` | date      | `Refreshable` |
//!
//! Refreshable snapshots are deleted and fetched again every time they are
//! touched, because the provider revises a day's figures after first
//! publishing them.

use crate::billing::BillingApi;
use crate::error::{IngestError, Result};
use crate::storage::ObjectStore;
use costflow_common::calendar::{unique_ranges, DateRange, Period};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshPolicy {
    /// Reuse the stored snapshot when present
    Immutable,
    /// Delete and refetch on every run
    Refreshable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    Pricing,
    Cost,
    Usage,
    Reservation,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 4] = [
        SnapshotKind::Pricing,
        SnapshotKind::Cost,
        SnapshotKind::Usage,
        SnapshotKind::Reservation,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            SnapshotKind::Pricing => "pricing",
            SnapshotKind::Cost => "cost",
            SnapshotKind::Usage => "usage",
            SnapshotKind::Reservation => "reservation",
        }
    }

    pub fn refresh_policy(self) -> RefreshPolicy {
        match self {
            SnapshotKind::Pricing => RefreshPolicy::Immutable,
            SnapshotKind::Cost | SnapshotKind::Usage | SnapshotKind::Reservation => {
                RefreshPolicy::Refreshable
            },
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Identifies one snapshot: its kind plus region (pricing) or day (everything else)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotKey {
    Pricing { region: String },
    Cost(DateRange),
    Usage(DateRange),
    Reservation(DateRange),
}

impl SnapshotKey {
    pub fn pricing(region: impl Into<String>) -> Self {
        Self::Pricing {
            region: region.into(),
        }
    }

    /// Key of a date-partitioned kind for `range`; `None` for pricing
    pub fn dated(kind: SnapshotKind, range: DateRange) -> Option<Self> {
        match kind {
            SnapshotKind::Pricing => None,
            SnapshotKind::Cost => Some(Self::Cost(range)),
            SnapshotKind::Usage => Some(Self::Usage(range)),
            SnapshotKind::Reservation => Some(Self::Reservation(range)),
        }
    }

    pub fn kind(&self) -> SnapshotKind {
        match self {
            Self::Pricing { .. } => SnapshotKind::Pricing,
            Self::Cost(_) => SnapshotKind::Cost,
            Self::Usage(_) => SnapshotKind::Usage,
            Self::Reservation(_) => SnapshotKind::Reservation,
        }
    }

    /// Object key in the bucket, e.g. `pricing/us-west-2.json` or `cost/2024-05-01.json`
    pub fn object_key(&self) -> String {
        match self {
            Self::Pricing { region } => format!("{}/{}.json", self.kind().prefix(), region),
            Self::Cost(range) | Self::Usage(range) | Self::Reservation(range) => {
                format!("{}/{}.json", self.kind().prefix(), range.key())
            },
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_key())
    }
}

/// Counts from one [`SnapshotCache::refresh`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub reused: usize,
    pub fetched: usize,
}

#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn ObjectStore>,
    api: Arc<dyn BillingApi>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn ObjectStore>, api: Arc<dyn BillingApi>) -> Self {
        Self { store, api }
    }

    /// Return the snapshot bytes for `key`, fetching from the billing API
    /// according to the kind's [`RefreshPolicy`].
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn fetch_if_needed(&self, key: &SnapshotKey) -> Result<Vec<u8>> {
        Ok(self.fetch_with_status(key).await?.0)
    }

    async fn fetch_with_status(&self, key: &SnapshotKey) -> Result<(Vec<u8>, bool)> {
        let object_key = key.object_key();
        let exists = self
            .store
            .exists(&object_key)
            .await
            .map_err(|e| storage_error(&object_key, e))?;

        if exists {
            match key.kind().refresh_policy() {
                RefreshPolicy::Immutable => {
                    debug!(key = %object_key, "Reusing cached snapshot");
                    let data = self
                        .store
                        .read(&object_key)
                        .await
                        .map_err(|e| storage_error(&object_key, e))?;
                    return Ok((data, false));
                },
                RefreshPolicy::Refreshable => {
                    info!(key = %object_key, "Deleting stale snapshot");
                    self.store
                        .delete(&object_key)
                        .await
                        .map_err(|e| storage_error(&object_key, e))?;
                },
            }
        }

        let data = self.fetch_from_api(key).await?;
        self.store
            .write(&object_key, data.clone())
            .await
            .map_err(|e| storage_error(&object_key, e))?;

        info!(key = %object_key, bytes = data.len(), "Wrote snapshot");
        Ok((data, true))
    }

    async fn fetch_from_api(&self, key: &SnapshotKey) -> Result<Vec<u8>> {
        let fetch_error = |e: anyhow::Error| IngestError::Fetch {
            key: key.object_key(),
            message: format!("{e:#}"),
        };

        let data = match key {
            SnapshotKey::Pricing { region } => {
                serde_json::to_vec(&self.api.pricing(region).await.map_err(fetch_error)?)?
            },
            SnapshotKey::Cost(range) => {
                serde_json::to_vec(&self.api.cost(range).await.map_err(fetch_error)?)?
            },
            SnapshotKey::Usage(range) => {
                serde_json::to_vec(&self.api.usage(range).await.map_err(fetch_error)?)?
            },
            SnapshotKey::Reservation(range) => {
                serde_json::to_vec(&self.api.reservation(range).await.map_err(fetch_error)?)?
            },
        };

        Ok(data)
    }

    /// Read and decode a stored snapshot
    pub async fn read<T: DeserializeOwned>(&self, key: &SnapshotKey) -> Result<Vec<T>> {
        let object_key = key.object_key();
        let data = self
            .store
            .read(&object_key)
            .await
            .map_err(|e| storage_error(&object_key, e))?;

        Ok(serde_json::from_slice(&data)?)
    }

    /// Bring every snapshot needed for `periods` and `regions` up to date:
    /// pricing per region, then cost/usage/reservation per distinct day.
    #[instrument(skip(self, periods, regions))]
    pub async fn refresh(
        &self,
        periods: &[Period],
        regions: &[String],
        today: NaiveDate,
    ) -> Result<RefreshSummary> {
        self.store
            .create_bucket_if_not_exists()
            .await
            .map_err(|e| storage_error("<bucket>", e))?;

        let mut keys: Vec<SnapshotKey> = regions.iter().map(SnapshotKey::pricing).collect();
        for range in unique_ranges(periods, today) {
            keys.extend(
                SnapshotKind::ALL
                    .iter()
                    .filter_map(|kind| SnapshotKey::dated(*kind, range)),
            );
        }

        let mut summary = RefreshSummary::default();
        for key in &keys {
            if self.fetch_with_status(key).await?.1 {
                summary.fetched += 1;
            } else {
                summary.reused += 1;
            }
        }

        info!(
            fetched = summary.fetched,
            reused = summary.reused,
            "Snapshot refresh complete"
        );
        Ok(summary)
    }
}

fn storage_error(key: &str, e: anyhow::Error) -> IngestError {
    IngestError::Storage {
        key: key.to_string(),
        message: format!("{e:#}"),
    }
}
