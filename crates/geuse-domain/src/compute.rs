use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::PriceSource;
use crate::state::HOURS_PER_MONTH;

// ── Savings ───────────────────────────────────────────────────────────────────

/// Spot vs on-demand savings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsComparison {
    pub on_demand_hourly: Decimal,
    pub selected_hourly: Decimal,
    pub hourly_savings: Decimal,
    pub monthly_savings: Decimal,
    pub savings_percentage: f64,
}

impl SavingsComparison {
    pub fn new(on_demand_hourly: Decimal, selected_hourly: Decimal) -> Self {
        let hourly_savings = if on_demand_hourly > selected_hourly {
            on_demand_hourly - selected_hourly
        } else {
            Decimal::ZERO
        };
        let savings_percentage = if on_demand_hourly.is_zero() {
            0.0
        } else {
            let ratio = hourly_savings / on_demand_hourly * Decimal::from(100);
            f64::try_from(ratio).unwrap_or(0.0)
        };
        Self {
            on_demand_hourly,
            selected_hourly,
            hourly_savings,
            monthly_savings: hourly_savings * Decimal::from(HOURS_PER_MONTH),
            savings_percentage,
        }
    }
}

// ── Spot analysis ─────────────────────────────────────────────────────────────

/// Spot market analysis for an instance type in a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotAnalysis {
    pub instance_type: String,
    pub region: String,
    /// Newest observed spot price per availability zone.
    pub prices_by_az: BTreeMap<String, Decimal>,
    /// Lowest-priced AZ cheaper than on-demand, if any.
    pub recommended_az: Option<String>,
    pub lowest_price: Decimal,
    /// Max over AZs of `max(0, 1 - pstdev/mean)`; 1.0 with insufficient data.
    pub price_stability_score: f64,
    pub on_demand_price: Decimal,
    pub savings_percentage: f64,
    /// Spot placement scores per AZ in [1, 10]; empty when unavailable.
    #[serde(default)]
    pub placement_scores_by_az: BTreeMap<String, f64>,
    pub analysis_timestamp: DateTime<Utc>,
}

// ── Instance selection ────────────────────────────────────────────────────────

/// Final compute placement decision for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSelection {
    pub instance_type: String,
    pub availability_zone: Option<String>,
    pub is_spot: bool,
    pub price_per_hour: Decimal,
    pub selection_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub savings_vs_on_demand: SavingsComparison,
    pub pricing_source: PriceSource,
}
