//! Line items to domain records
//!
//! Parsing is strict: a malformed amount or date fails the whole batch
//! rather than producing a zeroed record. Identity is assigned afterwards by
//! [`crate::identity`].

use crate::billing::{CostAmount, CostLineItem, PriceLineItem, ReservationLineItem, UsageLineItem};
use crate::domain::{AccountCost, PricingEntry, UsageQuantity, Utilization};
use crate::error::{IngestError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use costflow_common::calendar::parse_date;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Tenancy assumed when a reservation does not report one
pub const DEFAULT_TENANCY: &str = "Shared";

// ============================================================================
// Account cost, usage and pricing
// ============================================================================

pub fn account_costs(items: &[CostLineItem], inserted_at: DateTime<Utc>) -> Result<Vec<AccountCost>> {
    items.iter().map(|item| account_cost(item, inserted_at)).collect()
}

fn account_cost(item: &CostLineItem, inserted_at: DateTime<Utc>) -> Result<AccountCost> {
    let amount = |field: &str, value: &CostAmount| {
        parse_amount(&value.amount).map_err(|reason| {
            IngestError::parse(format!(
                "{field} amount {:?} for account {} service {:?} on {}: {reason}",
                value.amount, item.account_id, item.service, item.date
            ))
        })
    };

    Ok(AccountCost {
        id: String::new(),
        account_id: item.account_id.clone(),
        description: item.description.clone(),
        date: line_item_date(&item.date)?,
        service: item.service.clone(),
        record_type: item.record_type.clone(),
        unblended_amount: amount("unblended", &item.unblended)?,
        unblended_unit: item.unblended.unit.clone(),
        blended_amount: amount("blended", &item.blended)?,
        blended_unit: item.blended.unit.clone(),
        amortized_amount: amount("amortized", &item.amortized)?,
        amortized_unit: item.amortized.unit.clone(),
        net_amortized_amount: amount("net_amortized", &item.net_amortized)?,
        net_amortized_unit: item.net_amortized.unit.clone(),
        net_unblended_amount: amount("net_unblended", &item.net_unblended)?,
        net_unblended_unit: item.net_unblended.unit.clone(),
        inserted_at,
    })
}

pub fn usage_quantities(
    items: &[UsageLineItem],
    inserted_at: DateTime<Utc>,
) -> Result<Vec<UsageQuantity>> {
    items
        .iter()
        .map(|item| {
            Ok(UsageQuantity {
                id: String::new(),
                account_id: item.account_id.clone(),
                description: item.description.clone(),
                region: item.region.clone(),
                usage_type: item.usage_type.clone(),
                platform: item.platform.clone(),
                cache_engine: item.cache_engine.clone(),
                database_engine: item.database_engine.clone(),
                date: line_item_date(&item.date)?,
                instance_hour: item.instance_hour,
                instance_num: item.instance_num,
                giga_byte: item.giga_byte,
                requests: item.requests,
                unit: item.unit.clone(),
                inserted_at,
            })
        })
        .collect()
}

pub fn pricing_entries(items: &[PriceLineItem], inserted_at: DateTime<Utc>) -> Vec<PricingEntry> {
    items
        .iter()
        .map(|item| PricingEntry {
            id: String::new(),
            version: item.version.clone(),
            sku: item.sku.clone(),
            offer_term_code: item.offer_term_code.clone(),
            region: item.region.clone(),
            instance_type: item.instance_type.clone(),
            usage_type: item.usage_type.clone(),
            lease_contract_length: item.lease_contract_length.clone(),
            purchase_option: item.purchase_option.clone(),
            ondemand: item.ondemand,
            reserved_quantity: item.reserved_quantity,
            reserved_hours: item.reserved_hours,
            tenancy: item.tenancy.clone(),
            pre_installed: item.pre_installed.clone(),
            operation: item.operation.clone(),
            operating_system: item.operating_system.clone(),
            cache_engine: item.cache_engine.clone(),
            database_engine: item.database_engine.clone(),
            offering_class: item.offering_class.clone(),
            normalization_size_factor: item.normalization_size_factor.clone(),
            inserted_at,
        })
        .collect()
}

/// Parse a provider decimal string. Empty and non-finite values are rejected.
pub fn parse_amount(value: &str) -> std::result::Result<f64, String> {
    let parsed: f64 = value.trim().parse().map_err(|e| format!("{e}"))?;
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err("not a finite number".to_string())
    }
}

fn line_item_date(value: &str) -> Result<NaiveDate> {
    parse_date(value).map_err(|e| IngestError::parse(e.to_string()))
}

// ============================================================================
// Utilization / pricing join
// ============================================================================

/// A utilization line item with no pricing catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinWarning {
    pub account_id: String,
    pub description: String,
    pub region: String,
    pub instance_type: String,
    pub platform: String,
    pub cache_engine: String,
    pub database_engine: String,
    pub date: String,
}

impl fmt::Display for JoinWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no pricing for {} (platform {:?}, cache {:?}, database {:?}) in {} on {}, account {} ({})",
            self.instance_type,
            self.platform,
            self.cache_engine,
            self.database_engine,
            self.region,
            self.date,
            self.account_id,
            self.description,
        )
    }
}

impl From<&ReservationLineItem> for JoinWarning {
    fn from(item: &ReservationLineItem) -> Self {
        Self {
            account_id: item.account_id.clone(),
            description: item.description.clone(),
            region: item.region.clone(),
            instance_type: item.instance_type.clone(),
            platform: item.platform.clone(),
            cache_engine: item.cache_engine.clone(),
            database_engine: item.database_engine.clone(),
            date: item.date.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinOutput {
    pub records: Vec<Utilization>,
    pub warnings: Vec<JoinWarning>,
}

/// Join utilization line items against the pricing catalog.
///
/// Unmatched items are still emitted with `covering_cost = 0` and produce a
/// [`JoinWarning`]. `percentage` is each record's share of the covering cost
/// of its (region, date) group, or 0 when the group total is 0.
pub fn utilizations(
    items: &[ReservationLineItem],
    catalog: &[PricingEntry],
    inserted_at: DateTime<Utc>,
) -> Result<JoinOutput> {
    let mut output = JoinOutput::default();

    for item in items {
        let covering_cost = match find_price(item, catalog) {
            Some(price) => price.ondemand * item.hours,
            None => {
                output.warnings.push(JoinWarning::from(item));
                0.0
            },
        };

        output.records.push(Utilization {
            id: String::new(),
            account_id: item.account_id.clone(),
            description: item.description.clone(),
            region: item.region.clone(),
            instance_type: item.instance_type.clone(),
            platform: item.platform.clone(),
            cache_engine: item.cache_engine.clone(),
            database_engine: item.database_engine.clone(),
            deployment_option: item.deployment_option.clone(),
            tenancy: tenancy(item).to_string(),
            date: line_item_date(&item.date)?,
            hours: item.hours,
            num: item.num,
            utilization_rate: item.percentage,
            covering_cost,
            percentage: 0.0,
            inserted_at,
        });
    }

    assign_percentages(&mut output.records);
    Ok(output)
}

fn assign_percentages(records: &mut [Utilization]) {
    let mut totals: HashMap<(String, NaiveDate), f64> = HashMap::new();
    for record in records.iter() {
        *totals
            .entry((record.region.clone(), record.date))
            .or_default() += record.covering_cost;
    }

    for record in records.iter_mut() {
        let total = totals
            .get(&(record.region.clone(), record.date))
            .copied()
            .unwrap_or(0.0);
        record.percentage = if total > 0.0 {
            record.covering_cost / total * 100.0
        } else {
            0.0
        };
    }
}

/// First catalog entry in the same region and instance type whose engine or
/// platform matches the reservation.
fn find_price<'a>(item: &ReservationLineItem, catalog: &'a [PricingEntry]) -> Option<&'a PricingEntry> {
    let mut candidates = catalog
        .iter()
        .filter(|p| p.region == item.region && p.instance_type == item.instance_type);

    if !item.cache_engine.is_empty() {
        return candidates
            .find(|p| p.cache_engine.eq_ignore_ascii_case(&item.cache_engine));
    }

    if !item.database_engine.is_empty() {
        return candidates
            .find(|p| p.database_engine.eq_ignore_ascii_case(&item.database_engine));
    }

    let (os, pre_installed) = platform_dimensions(&item.platform)?;
    let tenancy = tenancy(item);
    candidates
        .filter(|p| p.operating_system == os && p.pre_installed == pre_installed)
        .find(|p| p.tenancy.is_empty() || p.tenancy.eq_ignore_ascii_case(tenancy))
}

/// Map a reservation platform onto the catalog's operating system and
/// pre-installed software columns
fn platform_dimensions(platform: &str) -> Option<(&'static str, &'static str)> {
    let dims = match platform {
        "Linux/UNIX" | "Linux/UNIX (Amazon VPC)" => ("Linux", "NA"),
        "Red Hat Enterprise Linux" => ("RHEL", "NA"),
        "SUSE Linux" => ("SUSE", "NA"),
        "Windows" | "Windows (Amazon VPC)" => ("Windows", "NA"),
        "Windows with SQL Server Standard" => ("Windows", "SQL Std"),
        "Windows with SQL Server Enterprise" => ("Windows", "SQL Ent"),
        "Windows with SQL Server Web" => ("Windows", "SQL Web"),
        "Linux with SQL Server Standard" => ("Linux", "SQL Std"),
        "Linux with SQL Server Enterprise" => ("Linux", "SQL Ent"),
        "Linux with SQL Server Web" => ("Linux", "SQL Web"),
        _ => return None,
    };
    Some(dims)
}

fn tenancy(item: &ReservationLineItem) -> &str {
    if item.tenancy.is_empty() {
        DEFAULT_TENANCY
    } else {
        &item.tenancy
    }
}

/// Log join warnings unless suppressed. Suppression never changes the records.
pub fn report_warnings(warnings: &[JoinWarning], suppress_warning: bool) {
    if suppress_warning {
        return;
    }
    for warning in warnings {
        warn!("{}", warning);
    }
}
