//! Cost metrics for the monitoring sink
//!
//! Per period label `<p>`, one gauge per account description `<d>`:
//!
//! - `aws.<p>.unblended_cost.<d>`: unblended cost, ignored record types excluded
//! - `aws.<p>.ri_covering_cost.<d>`: on-demand value covered by reservations
//! - `aws.<p>.total_cost.<d>`: the sum of both
//! - `aws.<p>.unblended_cost_<d>.<service>`: per service, when grouping is enabled

use crate::domain::{AccountCost, Utilization};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// One metric point as posted to the monitoring service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub name: String,
    /// Unix seconds
    pub time: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Record types excluded from unblended and per-service cost
    pub ignore_record_types: Vec<String>,
    pub group_by_service: bool,
}

impl AggregateOptions {
    fn ignores(&self, record_type: &str) -> bool {
        self.ignore_record_types.iter().any(|t| t == record_type)
    }
}

/// Build the metric points for one period, sorted by name
pub fn aggregate(
    period_label: &str,
    costs: &[AccountCost],
    utilizations: &[Utilization],
    options: &AggregateOptions,
    time: i64,
) -> Vec<MetricValue> {
    let mut unblended: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_service: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut covering: BTreeMap<String, f64> = BTreeMap::new();

    for cost in costs.iter().filter(|c| !options.ignores(&c.record_type)) {
        let Some(description) = segment(description_key(&cost.description), &cost.description)
        else {
            continue;
        };
        *unblended.entry(description.clone()).or_default() += cost.unblended_amount;

        if options.group_by_service {
            if let Some(service) = segment(service_key(&cost.service), &cost.service) {
                *by_service.entry((description, service)).or_default() += cost.unblended_amount;
            }
        }
    }

    for utilization in utilizations {
        if let Some(description) =
            segment(description_key(&utilization.description), &utilization.description)
        {
            *covering.entry(description).or_default() += utilization.covering_cost;
        }
    }

    let mut totals = unblended.clone();
    for (description, value) in &covering {
        *totals.entry(description.clone()).or_default() += value;
    }

    let point = |name: String, value: f64| MetricValue { name, time, value };
    let mut points: Vec<MetricValue> = Vec::new();

    points.extend(
        unblended
            .into_iter()
            .map(|(d, v)| point(format!("aws.{}.unblended_cost.{}", period_label, d), v)),
    );
    points.extend(
        covering
            .into_iter()
            .map(|(d, v)| point(format!("aws.{}.ri_covering_cost.{}", period_label, d), v)),
    );
    points.extend(
        totals
            .into_iter()
            .map(|(d, v)| point(format!("aws.{}.total_cost.{}", period_label, d), v)),
    );
    points.extend(by_service.into_iter().map(|((d, s), v)| {
        point(format!("aws.{}.unblended_cost_{}.{}", period_label, d, s), v)
    }));

    points.sort_by(|a, b| a.name.cmp(&b.name));
    points
}

/// Description as a metric name segment: spaces removed
pub fn description_key(description: &str) -> String {
    description.replace(' ', "")
}

/// Service as a metric name segment: spaces to `_`, `-` removed
pub fn service_key(service: &str) -> String {
    service.replace(' ', "_").replace('-', "")
}

/// A name segment, or `None` with a warning when nothing is left of `raw`
fn segment(key: String, raw: &str) -> Option<String> {
    if key.is_empty() {
        warn!(value = ?raw, "Skipping metric with an empty name segment");
        None
    } else {
        Some(key)
    }
}
