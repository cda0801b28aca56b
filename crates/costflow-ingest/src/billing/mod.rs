//! Billing API collaborator
//!
//! The billing API returns the provider's native line items for one kind of
//! data and one region or day. Line items are stored in snapshots exactly as
//! received; parsing into domain records happens in [`crate::transform`].

use async_trait::async_trait;
use costflow_common::calendar::DateRange;
use serde::{Deserialize, Serialize};

pub mod http;

pub use http::{BillingConfig, HttpBillingClient};

// ============================================================================
// Line items
// ============================================================================

/// A currency amount as published by the provider, e.g. `{"amount": "12.5", "unit": "USD"}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostAmount {
    pub amount: String,
    pub unit: String,
}

/// One account/service/record-type cost row for a day
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostLineItem {
    pub account_id: String,
    pub description: String,
    pub date: String,
    pub service: String,
    pub record_type: String,
    pub unblended: CostAmount,
    pub blended: CostAmount,
    pub amortized: CostAmount,
    pub net_amortized: CostAmount,
    pub net_unblended: CostAmount,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageLineItem {
    pub account_id: String,
    pub description: String,
    pub region: String,
    pub usage_type: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub cache_engine: String,
    #[serde(default)]
    pub database_engine: String,
    pub date: String,
    #[serde(default)]
    pub instance_hour: f64,
    #[serde(default)]
    pub instance_num: f64,
    #[serde(default)]
    pub giga_byte: f64,
    #[serde(default)]
    pub requests: f64,
    #[serde(default)]
    pub unit: String,
}

/// Reserved-capacity utilization for one reservation group and day
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReservationLineItem {
    pub account_id: String,
    pub description: String,
    pub region: String,
    pub instance_type: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub cache_engine: String,
    #[serde(default)]
    pub database_engine: String,
    #[serde(default)]
    pub deployment_option: String,
    #[serde(default)]
    pub tenancy: String,
    pub date: String,
    /// Reserved hours actually used
    pub hours: f64,
    #[serde(default)]
    pub num: f64,
    /// Provider-reported utilization percentage
    #[serde(default)]
    pub percentage: f64,
}

/// One on-demand or reserved price from the pricing catalog
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceLineItem {
    pub version: String,
    pub sku: String,
    pub offer_term_code: String,
    pub region: String,
    pub instance_type: String,
    pub usage_type: String,
    #[serde(default)]
    pub lease_contract_length: String,
    #[serde(default)]
    pub purchase_option: String,
    /// On-demand hourly rate
    pub ondemand: f64,
    #[serde(default)]
    pub reserved_quantity: f64,
    #[serde(default)]
    pub reserved_hours: f64,
    #[serde(default)]
    pub tenancy: String,
    #[serde(default)]
    pub pre_installed: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub cache_engine: String,
    #[serde(default)]
    pub database_engine: String,
    #[serde(default)]
    pub offering_class: String,
    #[serde(default)]
    pub normalization_size_factor: String,
}

// ============================================================================
// Client trait
// ============================================================================

/// Source of raw billing line items. Implementations do not retry.
#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn pricing(&self, region: &str) -> anyhow::Result<Vec<PriceLineItem>>;

    async fn cost(&self, range: &DateRange) -> anyhow::Result<Vec<CostLineItem>>;

    async fn usage(&self, range: &DateRange) -> anyhow::Result<Vec<UsageLineItem>>;

    async fn reservation(&self, range: &DateRange) -> anyhow::Result<Vec<ReservationLineItem>>;
}
