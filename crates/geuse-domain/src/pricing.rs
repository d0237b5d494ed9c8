use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a price figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Live,
    Cached,
    Estimated,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSource::Live => write!(f, "live"),
            PriceSource::Cached => write!(f, "cached"),
            PriceSource::Estimated => write!(f, "estimated"),
        }
    }
}

/// Uniform envelope for pricing lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingResult<T> {
    pub value: T,
    pub source: PriceSource,
    pub fetched_at: DateTime<Utc>,
}

impl<T> PricingResult<T> {
    pub fn new(value: T, source: PriceSource) -> Self {
        Self {
            value,
            source,
            fetched_at: Utc::now(),
        }
    }

    /// Re-tag a cache hit.
    pub fn cached(mut self) -> Self {
        self.source = PriceSource::Cached;
        self
    }
}

/// Spot price entry for a specific AZ and instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotPrice {
    pub instance_type: String,
    pub availability_zone: String,
    pub price_per_hour: Decimal,
    pub timestamp: DateTime<Utc>,
    pub region: String,
}

/// On-demand pricing details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDemandPrice {
    pub instance_type: String,
    pub price_per_hour: Decimal,
    pub region: String,
    #[serde(default = "default_os")]
    pub operating_system: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_os() -> String {
    "Linux".into()
}

fn default_currency() -> String {
    "USD".into()
}

/// EFS storage pricing (per GB-month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfsPricing {
    pub region: String,
    pub standard_gb_month: Decimal,
    pub ia_gb_month: Decimal,
}

/// ALB hourly and LCU pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbPricing {
    pub region: String,
    pub hourly_price: Decimal,
    pub lcu_price: Decimal,
}

/// CDN pricing for data transfer and requests, keyed by price class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdnPricing {
    pub price_class: String,
    pub data_transfer_gb: Decimal,
    pub requests_per_10k: Decimal,
}
