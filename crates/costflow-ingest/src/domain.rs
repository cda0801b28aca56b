//! Canonical domain records
//!
//! One struct per record kind, shared by every sink. Each record carries an
//! `id` derived from its business attributes (see [`crate::identity`]) and an
//! `inserted_at` run timestamp that is stored but never part of identity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Fields that are row metadata rather than business attributes
pub const NON_IDENTITY_FIELDS: [&str; 2] = ["id", "inserted_at"];

/// A derived billing record with a content-addressed id
pub trait Record: Serialize + Send + Sync {
    /// Short kind name used in logs and summaries
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

macro_rules! impl_record {
    ($ty:ty, $kind:literal) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        }
    };
}

/// Daily cost of one service for one account and record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCost {
    pub id: String,
    pub account_id: String,
    pub description: String,
    pub date: NaiveDate,
    pub service: String,
    pub record_type: String,
    pub unblended_amount: f64,
    pub unblended_unit: String,
    pub blended_amount: f64,
    pub blended_unit: String,
    pub amortized_amount: f64,
    pub amortized_unit: String,
    pub net_amortized_amount: f64,
    pub net_amortized_unit: String,
    pub net_unblended_amount: f64,
    pub net_unblended_unit: String,
    pub inserted_at: DateTime<Utc>,
}

/// Daily usage quantity of one usage type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageQuantity {
    pub id: String,
    pub account_id: String,
    pub description: String,
    pub region: String,
    pub usage_type: String,
    pub platform: String,
    pub cache_engine: String,
    pub database_engine: String,
    pub date: NaiveDate,
    pub instance_hour: f64,
    pub instance_num: f64,
    pub giga_byte: f64,
    pub requests: f64,
    pub unit: String,
    pub inserted_at: DateTime<Utc>,
}

/// Reserved-capacity utilization with its on-demand covering cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub id: String,
    pub account_id: String,
    pub description: String,
    pub region: String,
    pub instance_type: String,
    pub platform: String,
    pub cache_engine: String,
    pub database_engine: String,
    pub deployment_option: String,
    pub tenancy: String,
    pub date: NaiveDate,
    pub hours: f64,
    pub num: f64,
    /// Utilization percentage reported by the provider
    pub utilization_rate: f64,
    /// On-demand hourly rate times reserved hours used; 0 when unpriced
    pub covering_cost: f64,
    /// Share of the (region, date) group's covering cost, 0..=100
    pub percentage: f64,
    pub inserted_at: DateTime<Utc>,
}

/// One entry of the pricing catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub id: String,
    pub version: String,
    pub sku: String,
    pub offer_term_code: String,
    pub region: String,
    pub instance_type: String,
    pub usage_type: String,
    pub lease_contract_length: String,
    pub purchase_option: String,
    pub ondemand: f64,
    pub reserved_quantity: f64,
    pub reserved_hours: f64,
    pub tenancy: String,
    pub pre_installed: String,
    pub operation: String,
    pub operating_system: String,
    pub cache_engine: String,
    pub database_engine: String,
    pub offering_class: String,
    pub normalization_size_factor: String,
    pub inserted_at: DateTime<Utc>,
}

impl_record!(AccountCost, "account_cost");
impl_record!(UsageQuantity, "usage_quantity");
impl_record!(Utilization, "utilization");
impl_record!(PricingEntry, "pricing");
