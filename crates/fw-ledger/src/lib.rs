//! Cost estimation for FleetWatch.
//!
//! Prices aggregated usage against a configurable [`PricingTable`] with free
//! allowances, and projects spend forward from the last two periods.

#![forbid(unsafe_code)]

use fw_proto::{AssetType, MetricKey, MetricKind, Metrics, Snapshot, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Days in the billing month that monthly prices and allowances refer to.
pub const BILLING_MONTH_DAYS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("invalid {asset_type} rate for {metric}: {reason}")]
    InvalidRate {
        asset_type: AssetType,
        metric: MetricKey,
        reason: String,
    },
}

// ─── Pricing table ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Basis {
    /// Billed on the amount consumed in the period.
    Usage,
    /// Billed on the level held, per month.
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRate {
    pub metric: MetricKey,
    /// Units included at no charge per billing month.
    #[serde(default)]
    pub free_allowance: f64,
    /// Number of units `unit_price` buys.
    pub unit_size: f64,
    pub unit_price: f64,
    #[serde(default = "default_basis")]
    pub basis: Basis,
}

fn default_basis() -> Basis {
    Basis::Usage
}

impl UnitRate {
    pub fn usage(metric: MetricKey, free_allowance: f64, unit_size: f64, unit_price: f64) -> Self {
        Self {
            metric,
            free_allowance,
            unit_size,
            unit_price,
            basis: Basis::Usage,
        }
    }

    pub fn monthly(metric: MetricKey, free_allowance: f64, unit_size: f64, unit_price: f64) -> Self {
        Self {
            basis: Basis::Monthly,
            ..Self::usage(metric, free_allowance, unit_size, unit_price)
        }
    }

    /// Charge for `amount` units after the free allowance.
    pub fn charge(&self, amount: f64) -> f64 {
        if self.unit_size <= 0.0 {
            return 0.0;
        }
        (amount - self.free_allowance).max(0.0) / self.unit_size * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub rates: BTreeMap<AssetType, Vec<UnitRate>>,
}

fn default_currency() -> String {
    "USD".to_string()
}

const GB: f64 = 1_000_000_000.0;
const MILLION: f64 = 1_000_000.0;

impl Default for PricingTable {
    /// Published list prices for the platform's paid plan.
    fn default() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(
            AssetType::Function,
            vec![
                UnitRate::usage(MetricKey::Requests, 10.0 * MILLION, MILLION, 0.30),
                UnitRate::usage(MetricKey::CpuTimeMs, 30.0 * MILLION, MILLION, 0.02),
            ],
        );
        rates.insert(
            AssetType::Bucket,
            vec![
                UnitRate::monthly(MetricKey::StorageBytes, 10.0 * GB, GB, 0.015),
                UnitRate::usage(MetricKey::ClassAOps, MILLION, MILLION, 4.50),
                UnitRate::usage(MetricKey::ClassBOps, 10.0 * MILLION, MILLION, 0.36),
            ],
        );
        rates.insert(
            AssetType::RelationalDb,
            vec![
                UnitRate::usage(MetricKey::ReadQueries, 25_000.0 * MILLION, MILLION, 0.001),
                UnitRate::usage(MetricKey::WriteQueries, 50.0 * MILLION, MILLION, 1.00),
                UnitRate::monthly(MetricKey::StorageBytes, 5.0 * GB, GB, 0.75),
            ],
        );
        rates.insert(
            AssetType::KvNamespace,
            vec![
                UnitRate::usage(MetricKey::ReadOps, 10.0 * MILLION, MILLION, 0.50),
                UnitRate::usage(MetricKey::WriteOps, MILLION, MILLION, 5.00),
                UnitRate::usage(MetricKey::DeleteOps, MILLION, MILLION, 5.00),
                UnitRate::usage(MetricKey::ListOps, MILLION, MILLION, 5.00),
                UnitRate::monthly(MetricKey::StorageBytes, GB, GB, 0.50),
            ],
        );
        rates.insert(
            AssetType::ActorNamespace,
            vec![UnitRate::usage(MetricKey::Requests, MILLION, MILLION, 0.15)],
        );

        Self {
            currency: default_currency(),
            rates,
        }
    }
}

impl PricingTable {
    pub fn rates_for(&self, asset_type: AssetType) -> &[UnitRate] {
        self.rates.get(&asset_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn validate(&self) -> Result<(), PricingError> {
        for (asset_type, rates) in &self.rates {
            for rate in rates {
                let invalid = |reason: &str| PricingError::InvalidRate {
                    asset_type: *asset_type,
                    metric: rate.metric,
                    reason: reason.to_string(),
                };
                if !(rate.unit_size.is_finite() && rate.unit_size > 0.0) {
                    return Err(invalid("unit_size must be a positive number"));
                }
                if !(rate.unit_price.is_finite() && rate.unit_price >= 0.0) {
                    return Err(invalid("unit_price must be a non-negative number"));
                }
                if !(rate.free_allowance.is_finite() && rate.free_allowance >= 0.0) {
                    return Err(invalid("free_allowance must be a non-negative number"));
                }
            }
        }
        Ok(())
    }

    /// The table scaled to a `days`-long period by `days / 30`. Usage rates
    /// scale their free allowance; monthly rates keep the held allowance and
    /// scale their price.
    pub fn prorated(&self, days: f64) -> Self {
        let factor = days / BILLING_MONTH_DAYS;
        let rates = self
            .rates
            .iter()
            .map(|(asset_type, rates)| {
                let scaled = rates
                    .iter()
                    .map(|r| match r.basis {
                        Basis::Usage => UnitRate {
                            free_allowance: r.free_allowance * factor,
                            ..r.clone()
                        },
                        Basis::Monthly => UnitRate {
                            unit_price: r.unit_price * factor,
                            ..r.clone()
                        },
                    })
                    .collect();
                (*asset_type, scaled)
            })
            .collect();
        Self {
            currency: self.currency.clone(),
            rates,
        }
    }
}

// ─── Estimation ──────────────────────────────────────────────────────────────

/// Cost of `usage` for one asset type: the sum over its rates of
/// `max(0, usage - free) / unit_size * unit_price`. Missing metrics cost 0.
pub fn estimate(asset_type: AssetType, usage: &Metrics, pricing: &PricingTable) -> f64 {
    pricing
        .rates_for(asset_type)
        .iter()
        .map(|rate| rate.charge(usage.get(rate.metric).unwrap_or(0.0)))
        .sum()
}

/// Fold snapshots into per-type usage. Counters are summed over every
/// snapshot; gauges take each asset's latest value and sum those across
/// assets. Derived metrics are not aggregated.
pub fn aggregate_usage(snapshots: &[Snapshot]) -> BTreeMap<AssetType, Metrics> {
    let mut counters: BTreeMap<AssetType, BTreeMap<MetricKey, f64>> = BTreeMap::new();
    let mut gauges: HashMap<(&str, MetricKey), (AssetType, i64, f64)> = HashMap::new();

    for snap in snapshots {
        for (name, value) in snap.metrics.iter() {
            let Ok(key) = name.parse::<MetricKey>() else {
                continue;
            };
            match key.kind() {
                MetricKind::Counter => {
                    *counters
                        .entry(snap.asset_type)
                        .or_default()
                        .entry(key)
                        .or_insert(0.0) += value;
                }
                MetricKind::Gauge => {
                    let slot = gauges
                        .entry((snap.asset_id.as_str(), key))
                        .or_insert((snap.asset_type, snap.timestamp, value));
                    if snap.timestamp > slot.1 {
                        *slot = (snap.asset_type, snap.timestamp, value);
                    }
                }
                MetricKind::Derived => {}
            }
        }
    }

    for ((_, key), (asset_type, _, value)) in gauges {
        *counters.entry(asset_type).or_default().entry(key).or_insert(0.0) += value;
    }

    counters
        .into_iter()
        .map(|(asset_type, sums)| {
            let metrics = sums
                .into_iter()
                .fold(Metrics::new(), |m, (key, value)| m.with(key, value));
            (asset_type, metrics)
        })
        .collect()
}

/// Total cost of a period's snapshots, priced with the table prorated to `days`.
pub fn period_cost(snapshots: &[Snapshot], days: f64, pricing: &PricingTable) -> f64 {
    let table = pricing.prorated(days);
    aggregate_usage(snapshots)
        .iter()
        .map(|(asset_type, usage)| estimate(*asset_type, usage, &table))
        .sum()
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub timeframe: Timeframe,
    pub by_type: BTreeMap<AssetType, f64>,
    pub total: f64,
    pub currency: String,
}

impl CostReport {
    /// Price the snapshots that fall inside `timeframe`.
    pub fn build(timeframe: Timeframe, snapshots: &[Snapshot], pricing: &PricingTable) -> Self {
        let table = pricing.prorated(timeframe.days());
        let by_type: BTreeMap<AssetType, f64> = aggregate_usage(snapshots)
            .iter()
            .map(|(asset_type, usage)| (*asset_type, estimate(*asset_type, usage, &table)))
            .collect();
        let total = by_type.values().sum();
        Self {
            timeframe,
            by_type,
            total,
            currency: pricing.currency.clone(),
        }
    }
}

/// Spend projection from the current and previous period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub current: f64,
    pub previous: f64,
    pub trend: f64,
    pub trend_percent: f64,
    pub estimate: f64,
    pub low: f64,
    pub high: f64,
}

/// Project the next period as `current * (current / previous)` with a ±10%
/// band. Without a previous period the trend is flat.
pub fn forecast(current: f64, previous: f64) -> Forecast {
    let trend = if previous == 0.0 { 1.0 } else { current / previous };
    let estimate = current * trend;
    Forecast {
        current,
        previous,
        trend,
        trend_percent: (trend - 1.0) * 100.0,
        estimate,
        low: estimate * 0.9,
        high: estimate * 1.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_proto::HealthStatus;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn snap(asset: &str, asset_type: AssetType, ts: i64, metrics: Metrics) -> Snapshot {
        Snapshot {
            asset_id: asset.to_string(),
            asset_type,
            project: "shop".to_string(),
            timestamp: ts,
            metrics,
            status: HealthStatus::Healthy,
            error: None,
        }
    }

    #[test]
    fn test_below_free_tier_costs_nothing() {
        let table = PricingTable::default();
        let usage = Metrics::new().with(MetricKey::Requests, 5.0 * MILLION);
        assert_eq!(estimate(AssetType::Function, &usage, &table), 0.0);
    }

    #[test]
    fn test_free_tier_boundary_costs_nothing() {
        let table = PricingTable::default();
        let usage = Metrics::new()
            .with(MetricKey::Requests, 10.0 * MILLION)
            .with(MetricKey::CpuTimeMs, 30.0 * MILLION);
        assert_eq!(estimate(AssetType::Function, &usage, &table), 0.0);
    }

    #[test]
    fn test_overage_is_priced_per_unit() {
        let table = PricingTable::default();
        let usage = Metrics::new().with(MetricKey::Requests, 12.0 * MILLION);
        assert!(approx(estimate(AssetType::Function, &usage, &table), 0.60));
    }

    #[test]
    fn test_unpriced_type_costs_nothing() {
        let table = PricingTable {
            currency: "USD".to_string(),
            rates: BTreeMap::new(),
        };
        let usage = Metrics::new().with(MetricKey::Requests, 1e12);
        assert_eq!(estimate(AssetType::Function, &usage, &table), 0.0);
    }

    #[test]
    fn test_prorated_scales_usage_allowances_and_monthly_prices() {
        let table = PricingTable::default().prorated(15.0);
        let bucket = table.rates_for(AssetType::Bucket);
        let storage = bucket.iter().find(|r| r.metric == MetricKey::StorageBytes).expect("storage");
        assert!(approx(storage.free_allowance, 10.0 * GB));
        assert!(approx(storage.unit_price, 0.0075));
        let class_a = bucket.iter().find(|r| r.metric == MetricKey::ClassAOps).expect("class a");
        assert!(approx(class_a.free_allowance, 0.5 * MILLION));
        assert!(approx(class_a.unit_price, 4.50));
    }

    #[test]
    fn test_aggregate_sums_counters_and_latest_gauges() {
        let snaps = vec![
            snap("b1", AssetType::Bucket, 1, Metrics::new().with(MetricKey::ClassAOps, 10.0).with(MetricKey::StorageBytes, 100.0)),
            snap("b1", AssetType::Bucket, 2, Metrics::new().with(MetricKey::ClassAOps, 5.0).with(MetricKey::StorageBytes, 300.0)),
            snap("b2", AssetType::Bucket, 1, Metrics::new().with(MetricKey::StorageBytes, 50.0)),
            snap("f1", AssetType::Function, 1, Metrics::new().with(MetricKey::Requests, 7.0).with(MetricKey::ErrorRate, 0.5)),
        ];
        let usage = aggregate_usage(&snaps);
        let bucket = &usage[&AssetType::Bucket];
        assert_eq!(bucket.get(MetricKey::ClassAOps), Some(15.0));
        assert_eq!(bucket.get(MetricKey::StorageBytes), Some(350.0));
        let function = &usage[&AssetType::Function];
        assert_eq!(function.get(MetricKey::Requests), Some(7.0));
        assert_eq!(function.get(MetricKey::ErrorRate), None);
    }

    #[test]
    fn test_cost_report_totals() {
        let snaps = vec![snap(
            "f1",
            AssetType::Function,
            1,
            Metrics::new().with(MetricKey::Requests, 12.0 * MILLION),
        )];
        let report = CostReport::build(Timeframe::Month, &snaps, &PricingTable::default());
        assert!(approx(report.by_type[&AssetType::Function], 0.60));
        assert!(approx(report.total, 0.60));
        assert_eq!(report.currency, "USD");
        assert!(approx(period_cost(&snaps, 30.0, &PricingTable::default()), 0.60));
    }

    #[test]
    fn test_day_report_keeps_held_storage_allowance() {
        let table = PricingTable::default();
        let held = |bytes: f64| vec![snap("b1", AssetType::Bucket, 1, Metrics::new().with(MetricKey::StorageBytes, bytes))];

        let at_free_tier = CostReport::build(Timeframe::Day, &held(10.0 * GB), &table);
        assert_eq!(at_free_tier.total, 0.0);

        let over = CostReport::build(Timeframe::Day, &held(11.0 * GB), &table);
        assert!(approx(over.total, 0.015 / 30.0));
    }

    #[test]
    fn test_forecast_growth() {
        let f = forecast(110.0, 100.0);
        assert!(approx(f.trend, 1.10));
        assert!(approx(f.estimate, 121.0));
        assert!(approx(f.low, 108.9));
        assert!(approx(f.high, 133.1));
        assert!(approx(f.trend_percent, 10.0));
    }

    #[test]
    fn test_forecast_without_previous_period() {
        let f = forecast(42.0, 0.0);
        assert_eq!(f.trend, 1.0);
        assert_eq!(f.trend_percent, 0.0);
        assert_eq!(f.estimate, 42.0);
    }

    #[test]
    fn test_validate_rejects_zero_unit_size() {
        let mut table = PricingTable::default();
        table
            .rates
            .insert(AssetType::Function, vec![UnitRate::usage(MetricKey::Requests, 0.0, 0.0, 1.0)]);
        assert!(matches!(table.validate(), Err(PricingError::InvalidRate { .. })));
        assert!(PricingTable::default().validate().is_ok());
    }

    #[test]
    fn test_pricing_table_from_json() {
        let table: PricingTable = serde_json::from_str(
            r#"{"rates":{"function":[{"metric":"requests","free_allowance":0,"unit_size":1000,"unit_price":1}]}}"#,
        )
        .expect("deserialize");
        assert_eq!(table.currency, "USD");
        let usage = Metrics::new().with(MetricKey::Requests, 2500.0);
        assert!(approx(estimate(AssetType::Function, &usage, &table), 2.5));
    }
}
