//! Live + cached + estimated pricing per resource kind. Provider failures
//! always degrade to conservative estimates; this module never errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use geuse_domain::{
    AlbPricing, CdnPricing, EfsPricing, OnDemandPrice, PriceSource, PricingResult, SpotPrice,
};
use geuse_aws::{AwsClient, Ec2Service, PricingApi};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::cache::TtlCache;

/// Map region codes to pricing catalogue location names.
const REGION_TO_LOCATION: &[(&str, &str)] = &[
    ("us-east-1", "US East (N. Virginia)"),
    ("us-east-2", "US East (Ohio)"),
    ("us-west-1", "US West (N. California)"),
    ("us-west-2", "US West (Oregon)"),
    ("eu-west-1", "EU (Ireland)"),
    ("eu-west-2", "EU (London)"),
    ("eu-central-1", "EU (Frankfurt)"),
    ("ap-southeast-1", "Asia Pacific (Singapore)"),
    ("ap-southeast-2", "Asia Pacific (Sydney)"),
    ("ap-northeast-1", "Asia Pacific (Tokyo)"),
];

/// Conservative fallbacks when the pricing catalogue is unavailable.
const FALLBACK_ON_DEMAND: &[(&str, &str)] = &[
    ("t3.medium", "0.0416"),
    ("m5.large", "0.096"),
    ("g4dn.xlarge", "0.526"),
];
const DEFAULT_ON_DEMAND: &str = "0.15";

/// Synthetic spot samples assume 60% of the on-demand rate.
const DEFAULT_SPOT_DISCOUNT_PERCENT: u32 = 40;

fn dec(s: &str) -> Decimal {
    s.parse().expect("static price literal parses")
}

pub struct PricingService {
    region: String,
    pricing_api: PricingApi,
    ec2: Ec2Service,
    on_demand_cache: TtlCache<OnDemandPrice>,
    spot_cache: TtlCache<Vec<SpotPrice>>,
    efs_cache: TtlCache<EfsPricing>,
    alb_cache: TtlCache<AlbPricing>,
    cdn_cache: TtlCache<CdnPricing>,
}

impl PricingService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self::with_ttl(client, crate::cache::DEFAULT_TTL)
    }

    pub fn with_ttl(client: Arc<AwsClient>, ttl: Duration) -> Self {
        Self {
            region: client.region().to_string(),
            pricing_api: PricingApi::new(client.clone()),
            ec2: Ec2Service::new(client),
            on_demand_cache: TtlCache::new(ttl),
            spot_cache: TtlCache::new(ttl),
            efs_cache: TtlCache::new(ttl),
            alb_cache: TtlCache::new(ttl),
            cdn_cache: TtlCache::new(ttl),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    // ── Compute on-demand ─────────────────────────────────────────────────────

    pub async fn get_on_demand_price(
        &self,
        instance_type: &str,
    ) -> PricingResult<OnDemandPrice> {
        let cache_key = format!("ondemand:{}:{}", instance_type, self.region);
        if let Some(cached) = self.on_demand_cache.get(&cache_key) {
            return PricingResult::new(cached, PriceSource::Cached);
        }

        let (price, source) = match self.query_on_demand(instance_type).await {
            Ok(price) => (price, PriceSource::Live),
            Err(e) => {
                warn!(instance_type, error = %e, "pricing catalogue unavailable, using fallback");
                (self.fallback_on_demand(instance_type), PriceSource::Estimated)
            }
        };
        self.on_demand_cache.set(cache_key, price.clone());
        PricingResult::new(price, source)
    }

    async fn query_on_demand(&self, instance_type: &str) -> Result<OnDemandPrice, String> {
        let location = REGION_TO_LOCATION
            .iter()
            .find(|(r, _)| *r == self.region)
            .map(|(_, l)| *l)
            .unwrap_or(self.region.as_str());

        let products = self
            .pricing_api
            .get_products(
                "AmazonEC2",
                &[
                    ("instanceType", instance_type),
                    ("location", location),
                    ("operatingSystem", "Linux"),
                    ("preInstalledSw", "NA"),
                    ("tenancy", "Shared"),
                ],
            )
            .await
            .map_err(|e| e.to_string())?;

        let product = products.first().ok_or("empty price list")?;
        let terms = product["terms"]["OnDemand"]
            .as_object()
            .ok_or("missing on-demand terms")?;
        let dimensions = terms
            .values()
            .next()
            .and_then(|t| t["priceDimensions"].as_object())
            .ok_or("missing price dimensions")?;
        let usd = dimensions
            .values()
            .next()
            .and_then(|d| d["pricePerUnit"]["USD"].as_str())
            .ok_or("missing USD price")?;
        let price: Decimal = usd.parse().map_err(|_| "unparseable price")?;
        if price <= Decimal::ZERO {
            return Err("invalid zero price from catalogue".into());
        }
        Ok(OnDemandPrice {
            instance_type: instance_type.to_string(),
            price_per_hour: price,
            region: self.region.clone(),
            operating_system: "Linux".into(),
            currency: "USD".into(),
        })
    }

    fn fallback_on_demand(&self, instance_type: &str) -> OnDemandPrice {
        let price = FALLBACK_ON_DEMAND
            .iter()
            .find(|(t, _)| *t == instance_type)
            .map(|(_, p)| dec(p))
            .unwrap_or_else(|| dec(DEFAULT_ON_DEMAND));
        OnDemandPrice {
            instance_type: instance_type.to_string(),
            price_per_hour: price,
            region: self.region.clone(),
            operating_system: "Linux".into(),
            currency: "USD".into(),
        }
    }

    // ── Spot history ──────────────────────────────────────────────────────────

    /// Up to 50 most-recent spot prices across AZs from the last hour. When
    /// the history is empty a single synthetic sample is produced at
    /// on-demand x 0.6 in the region's first AZ.
    pub async fn get_spot_prices(&self, instance_type: &str) -> PricingResult<Vec<SpotPrice>> {
        let cache_key = format!("spot:{}:{}", instance_type, self.region);
        if let Some(cached) = self.spot_cache.get(&cache_key) {
            return PricingResult::new(cached, PriceSource::Cached);
        }

        let start_time = Utc::now() - chrono::Duration::hours(1);
        let fetched = self
            .ec2
            .spot_price_history(instance_type, start_time, 50)
            .await;

        let (prices, source) = match fetched {
            Ok(prices) if !prices.is_empty() => (prices, PriceSource::Live),
            Ok(_) => {
                debug!(instance_type, "empty spot history, synthesizing sample");
                (vec![self.synthetic_spot(instance_type).await], PriceSource::Estimated)
            }
            Err(e) => {
                warn!(instance_type, error = %e, "spot history unavailable, synthesizing sample");
                (vec![self.synthetic_spot(instance_type).await], PriceSource::Estimated)
            }
        };
        self.spot_cache.set(cache_key, prices.clone());
        PricingResult::new(prices, source)
    }

    async fn synthetic_spot(&self, instance_type: &str) -> SpotPrice {
        let on_demand = self.get_on_demand_price(instance_type).await.value;
        let discount =
            Decimal::ONE - Decimal::new(DEFAULT_SPOT_DISCOUNT_PERCENT as i64, 2);
        SpotPrice {
            instance_type: instance_type.to_string(),
            availability_zone: format!("{}a", self.region),
            price_per_hour: (on_demand.price_per_hour * discount).round_dp(4),
            timestamp: Utc::now(),
            region: self.region.clone(),
        }
    }

    // ── Filesystem ────────────────────────────────────────────────────────────

    pub async fn get_efs_pricing(&self) -> PricingResult<EfsPricing> {
        let cache_key = format!("efs:{}", self.region);
        if let Some(cached) = self.efs_cache.get(&cache_key) {
            return PricingResult::new(cached, PriceSource::Cached);
        }

        let location = REGION_TO_LOCATION
            .iter()
            .find(|(r, _)| *r == self.region)
            .map(|(_, l)| *l)
            .unwrap_or(self.region.as_str());

        let queried = self
            .pricing_api
            .get_products(
                "AmazonEFS",
                &[("productFamily", "Storage"), ("location", location)],
            )
            .await;

        let (pricing, source) = match queried.ok().and_then(|products| {
            let product = products.into_iter().next()?;
            let terms = product["terms"]["OnDemand"].as_object()?.values().next()?.clone();
            let usd = terms["priceDimensions"]
                .as_object()?
                .values()
                .next()?["pricePerUnit"]["USD"]
                .as_str()?
                .to_string();
            usd.parse::<Decimal>().ok()
        }) {
            Some(standard) => (
                EfsPricing {
                    region: self.region.clone(),
                    standard_gb_month: standard,
                    ia_gb_month: dec("0.025"),
                },
                PriceSource::Live,
            ),
            None => (
                EfsPricing {
                    region: self.region.clone(),
                    standard_gb_month: dec("0.30"),
                    ia_gb_month: dec("0.025"),
                },
                PriceSource::Estimated,
            ),
        };
        self.efs_cache.set(cache_key, pricing.clone());
        PricingResult::new(pricing, source)
    }

    // ── Load balancer & CDN (static tables) ───────────────────────────────────

    pub fn get_alb_pricing(&self) -> PricingResult<AlbPricing> {
        let cache_key = format!("alb:{}", self.region);
        if let Some(cached) = self.alb_cache.get(&cache_key) {
            return PricingResult::new(cached, PriceSource::Cached);
        }
        // ALB pricing is largely region-neutral.
        let pricing = AlbPricing {
            region: self.region.clone(),
            hourly_price: dec("0.0225"),
            lcu_price: dec("0.008"),
        };
        self.alb_cache.set(cache_key, pricing.clone());
        PricingResult::new(pricing, PriceSource::Estimated)
    }

    pub fn get_cdn_pricing(&self, price_class: &str) -> PricingResult<CdnPricing> {
        let cache_key = format!("cdn:{price_class}");
        if let Some(cached) = self.cdn_cache.get(&cache_key) {
            return PricingResult::new(cached, PriceSource::Cached);
        }
        let (data_transfer_gb, requests_per_10k) = match price_class {
            "PriceClass_200" => ("0.12", "0.0090"),
            "PriceClass_All" => ("0.14", "0.0100"),
            _ => ("0.085", "0.0075"),
        };
        let pricing = CdnPricing {
            price_class: if matches!(price_class, "PriceClass_200" | "PriceClass_All") {
                price_class.to_string()
            } else {
                "PriceClass_100".to_string()
            },
            data_transfer_gb: dec(data_transfer_gb),
            requests_per_10k: dec(requests_per_10k),
        };
        self.cdn_cache.set(cache_key, pricing.clone());
        PricingResult::new(pricing, PriceSource::Estimated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_aws::{AwsCredentials, BaseUrls};
    use geuse_aws::creds::StaticCredentialsProvider;
    use wiremock::matchers::{body_string_contains, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: &str) -> PricingService {
        PricingService::new(Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single(url),
        )))
    }

    use geuse_aws::AwsClient;

    fn price_list_body(price: &str) -> serde_json::Value {
        let doc = serde_json::json!({
            "product": { "sku": "SKU" },
            "terms": { "OnDemand": { "SKU.1": { "priceDimensions": {
                "SKU.1.1": { "pricePerUnit": { "USD": price } }
            }}}}
        });
        serde_json::json!({ "PriceList": [doc.to_string()] })
    }

    #[tokio::test]
    async fn live_price_then_cache_hit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AWSPriceListService.GetProducts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(price_list_body("0.0416")))
            .mount(&server)
            .await;

        let pricing = service(&server.uri());
        let first = pricing.get_on_demand_price("t3.medium").await;
        assert_eq!(first.source, PriceSource::Live);
        assert_eq!(first.value.price_per_hour, dec("0.0416"));

        let second = pricing.get_on_demand_price("t3.medium").await;
        assert_eq!(second.source, PriceSource::Cached);
    }

    #[tokio::test]
    async fn zero_price_falls_back_to_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AWSPriceListService.GetProducts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(price_list_body("0")))
            .mount(&server)
            .await;

        let result = service(&server.uri()).get_on_demand_price("t3.medium").await;
        assert_eq!(result.source, PriceSource::Estimated);
        assert_eq!(result.value.price_per_hour, dec("0.0416"));
    }

    #[tokio::test]
    async fn unknown_type_uses_default_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let result = service(&server.uri()).get_on_demand_price("z9.mega").await;
        assert_eq!(result.source, PriceSource::Estimated);
        assert_eq!(result.value.price_per_hour, dec("0.15"));
    }

    #[tokio::test]
    async fn empty_spot_history_synthesizes_discounted_sample() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeSpotPriceHistory"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeSpotPriceHistoryResponse><spotPriceHistorySet></spotPriceHistorySet></DescribeSpotPriceHistoryResponse>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AWSPriceListService.GetProducts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(price_list_body("0.10")))
            .mount(&server)
            .await;

        let result = service(&server.uri()).get_spot_prices("t3.medium").await;
        assert_eq!(result.source, PriceSource::Estimated);
        assert_eq!(result.value.len(), 1);
        assert_eq!(result.value[0].availability_zone, "us-east-1a");
        // 60% of the on-demand rate.
        assert_eq!(result.value[0].price_per_hour, dec("0.06"));
    }

    #[tokio::test]
    async fn efs_falls_back_to_typed_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let result = service(&server.uri()).get_efs_pricing().await;
        assert_eq!(result.source, PriceSource::Estimated);
        assert_eq!(result.value.standard_gb_month, dec("0.30"));
        assert_eq!(result.value.ia_gb_month, dec("0.025"));
    }

    #[tokio::test]
    async fn static_alb_and_cdn_tables() {
        let server = MockServer::start().await;
        let pricing = service(&server.uri());
        let alb = pricing.get_alb_pricing();
        assert_eq!(alb.value.hourly_price, dec("0.0225"));
        assert_eq!(alb.value.lcu_price, dec("0.008"));

        let cdn = pricing.get_cdn_pricing("PriceClass_100");
        assert_eq!(cdn.value.data_transfer_gb, dec("0.085"));
        let unknown = pricing.get_cdn_pricing("PriceClass_999");
        assert_eq!(unknown.value.price_class, "PriceClass_100");
    }
}
