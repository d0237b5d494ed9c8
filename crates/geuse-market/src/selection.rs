//! Turns pricing + capacity + placement into a single placement decision.

use std::sync::Arc;

use geuse_domain::{
    DeploymentConfig, InstanceSelection, PriceSource, SavingsComparison, SpotAnalysis,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::capacity::CapacityService;

/// Spot is only attractive below this share of the on-demand rate.
const SPOT_PRICE_CEILING_PERCENT: u32 = 80;

/// Below this stability score the market is too volatile for spot.
const STABILITY_FLOOR: f64 = 0.5;

/// Candidate AZs without a placement score sort at mid-range.
const DEFAULT_PLACEMENT_SCORE: f64 = 5.0;

pub struct SelectionEngine {
    capacity: Arc<CapacityService>,
}

impl SelectionEngine {
    pub fn new(capacity: Arc<CapacityService>) -> Self {
        Self { capacity }
    }

    /// Choose spot or on-demand placement honoring the caller's preference.
    /// Pricing and capacity failures degrade internally, so selection always
    /// produces a decision.
    pub async fn select_instance_type(&self, config: &DeploymentConfig) -> InstanceSelection {
        let analysis = self.capacity.analyze_spot_prices(&config.instance_type).await;
        let on_demand = analysis.on_demand_price;
        let ceiling = on_demand * Decimal::new(SPOT_PRICE_CEILING_PERCENT as i64, 2);

        if !config.use_spot {
            return on_demand_selection(
                config,
                on_demand,
                "user requested on-demand",
                None,
                PriceSource::Live,
            );
        }

        if analysis.lowest_price >= ceiling {
            info!(
                lowest = %analysis.lowest_price,
                on_demand = %on_demand,
                "spot price too high, falling back to on-demand"
            );
            return on_demand_selection(
                config,
                on_demand,
                "falling back to on-demand",
                Some("spot price ≥ 80% of on-demand".into()),
                PriceSource::Estimated,
            );
        }

        if analysis.price_stability_score < STABILITY_FLOOR {
            info!(
                stability = analysis.price_stability_score,
                "spot price volatility too high, falling back to on-demand"
            );
            return on_demand_selection(
                config,
                on_demand,
                "falling back to on-demand",
                Some("spot price volatility too high".into()),
                PriceSource::Estimated,
            );
        }

        let mut viable: Vec<(String, Decimal)> = analysis
            .prices_by_az
            .iter()
            .filter(|(_, price)| **price < ceiling)
            .map(|(az, price)| (az.clone(), *price))
            .collect();

        if viable.is_empty() {
            return on_demand_selection(
                config,
                on_demand,
                "falling back to on-demand",
                Some("no viable spot AZs".into()),
                PriceSource::Estimated,
            );
        }

        // Best placement score first, then cheapest.
        viable.sort_by(|(az_a, price_a), (az_b, price_b)| {
            let score_a = placement_of(&analysis, az_a);
            let score_b = placement_of(&analysis, az_b);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(price_a.cmp(price_b))
        });

        let mut unavailable: Vec<String> = Vec::new();
        for (az, price) in &viable {
            debug!(az = %az, price = %price, "probing spot capacity");
            if self
                .capacity
                .check_spot_capacity(&config.instance_type, az)
                .await
            {
                let placement = placement_of(&analysis, az);
                info!(
                    az = %az,
                    price = %price,
                    stability = analysis.price_stability_score,
                    placement,
                    "spot instance selected"
                );
                return InstanceSelection {
                    instance_type: config.instance_type.clone(),
                    availability_zone: Some(az.clone()),
                    is_spot: true,
                    price_per_hour: *price,
                    selection_reason: format!(
                        "best available spot price with capacity (placement score: {placement:.1})"
                    ),
                    fallback_reason: None,
                    savings_vs_on_demand: SavingsComparison::new(on_demand, *price),
                    pricing_source: PriceSource::Live,
                };
            }
            unavailable.push(az.clone());
        }

        let fallback = format!(
            "spot capacity unavailable in all {} viable AZs: {}",
            viable.len(),
            unavailable.join(", ")
        );
        info!(%fallback, "falling back to on-demand");
        on_demand_selection(
            config,
            on_demand,
            "falling back to on-demand",
            Some(fallback),
            PriceSource::Estimated,
        )
    }
}

fn placement_of(analysis: &SpotAnalysis, az: &str) -> f64 {
    analysis
        .placement_scores_by_az
        .get(az)
        .copied()
        .unwrap_or(DEFAULT_PLACEMENT_SCORE)
}

fn on_demand_selection(
    config: &DeploymentConfig,
    on_demand: Decimal,
    reason: &str,
    fallback_reason: Option<String>,
    pricing_source: PriceSource,
) -> InstanceSelection {
    InstanceSelection {
        instance_type: config.instance_type.clone(),
        availability_zone: None,
        is_spot: false,
        price_per_hour: on_demand,
        selection_reason: reason.to_string(),
        fallback_reason,
        savings_vs_on_demand: SavingsComparison::new(on_demand, on_demand),
        pricing_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PricingService;
    use geuse_aws::creds::StaticCredentialsProvider;
    use geuse_aws::{AwsClient, AwsCredentials, BaseUrls};
    use geuse_domain::Tier;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(url: &str) -> SelectionEngine {
        let client = Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single(url),
        ));
        let pricing = Arc::new(PricingService::new(client.clone()));
        SelectionEngine::new(Arc::new(CapacityService::new(client, pricing)))
    }

    fn config(use_spot: bool) -> DeploymentConfig {
        let mut cfg = DeploymentConfig::new("demo", Tier::Dev, "us-east-1").unwrap();
        cfg.use_spot = use_spot;
        cfg
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn mock_pricing_down(server: &MockServer) {
        // Catalogue down: the fallback table provides t3.medium at 0.0416.
        Mock::given(method("POST"))
            .and(body_string_contains("GetProducts"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({})))
            .mount(server)
            .await;
    }

    async fn mock_placement_empty(server: &MockServer) {
        Mock::given(method("POST"))
            .and(body_string_contains("Action=GetSpotPlacementScores"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<GetSpotPlacementScoresResponse></GetSpotPlacementScoresResponse>",
            ))
            .mount(server)
            .await;
    }

    fn spot_history(entries: &[(&str, &str)]) -> String {
        let items: String = entries
            .iter()
            .map(|(az, price)| {
                format!(
                    "<item><instanceType>t3.medium</instanceType><availabilityZone>{az}</availabilityZone><spotPrice>{price}</spotPrice><timestamp>2026-01-01T00:00:00.000Z</timestamp></item>"
                )
            })
            .collect();
        format!(
            "<DescribeSpotPriceHistoryResponse><spotPriceHistorySet>{items}</spotPriceHistorySet></DescribeSpotPriceHistoryResponse>"
        )
    }

    async fn mock_history(server: &MockServer, entries: &[(&str, &str)]) {
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeSpotPriceHistory"))
            .respond_with(ResponseTemplate::new(200).set_body_string(spot_history(entries)))
            .mount(server)
            .await;
    }

    async fn mock_probe_image(server: &MockServer) {
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeImages"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeImagesResponse><imagesSet><item><imageId>ami-probe</imageId><name>base</name><imageState>available</imageState><creationDate>2026-01-01</creationDate></item></imagesSet></DescribeImagesResponse>",
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn user_requested_on_demand() {
        let server = MockServer::start().await;
        mock_pricing_down(&server).await;
        mock_placement_empty(&server).await;
        mock_history(&server, &[("us-east-1a", "0.0125")]).await;

        let selection = engine(&server.uri()).select_instance_type(&config(false)).await;
        assert!(!selection.is_spot);
        assert_eq!(selection.selection_reason, "user requested on-demand");
        assert!(selection.fallback_reason.is_none());
        assert_eq!(selection.price_per_hour, dec("0.0416"));
    }

    #[tokio::test]
    async fn expensive_spot_falls_back() {
        let server = MockServer::start().await;
        mock_pricing_down(&server).await;
        mock_placement_empty(&server).await;
        // 0.036 is above 80% of 0.0416 (= 0.03328).
        mock_history(&server, &[("us-east-1a", "0.036")]).await;

        let selection = engine(&server.uri()).select_instance_type(&config(true)).await;
        assert!(!selection.is_spot);
        assert!(selection
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("≥ 80%"));
        assert_eq!(selection.pricing_source, PriceSource::Estimated);
    }

    #[tokio::test]
    async fn spot_selected_in_cheapest_az_with_capacity() {
        let server = MockServer::start().await;
        mock_pricing_down(&server).await;
        mock_placement_empty(&server).await;
        mock_probe_image(&server).await;
        mock_history(&server, &[("us-east-1a", "0.0125"), ("us-east-1b", "0.0150")]).await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=RunInstances"))
            .and(body_string_contains("DryRun=true"))
            .respond_with(ResponseTemplate::new(412).set_body_string(
                "<Response><Errors><Error><Code>DryRunOperation</Code><Message>ok</Message></Error></Errors></Response>",
            ))
            .mount(&server)
            .await;

        let selection = engine(&server.uri()).select_instance_type(&config(true)).await;
        assert!(selection.is_spot);
        assert_eq!(selection.availability_zone.as_deref(), Some("us-east-1a"));
        assert_eq!(selection.price_per_hour, dec("0.0125"));
        // Invariant: savings arithmetic holds for every spot selection.
        let savings = &selection.savings_vs_on_demand;
        assert!(savings.hourly_savings >= Decimal::ZERO);
        assert_eq!(
            savings.hourly_savings,
            savings.on_demand_hourly - savings.selected_hourly
        );
    }

    #[tokio::test]
    async fn no_capacity_anywhere_falls_back_and_lists_azs() {
        let server = MockServer::start().await;
        mock_pricing_down(&server).await;
        mock_placement_empty(&server).await;
        mock_probe_image(&server).await;
        mock_history(&server, &[("us-east-1a", "0.0125"), ("us-east-1b", "0.0150")]).await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=RunInstances"))
            .and(body_string_contains("DryRun=true"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                "<Response><Errors><Error><Code>InsufficientInstanceCapacity</Code><Message>none</Message></Error></Errors></Response>",
            ))
            .mount(&server)
            .await;

        let selection = engine(&server.uri()).select_instance_type(&config(true)).await;
        assert!(!selection.is_spot);
        let reason = selection.fallback_reason.unwrap();
        assert!(reason.contains("unavailable in all 2 viable AZs"));
        assert!(reason.contains("us-east-1a"));
        assert!(reason.contains("us-east-1b"));
    }
}
