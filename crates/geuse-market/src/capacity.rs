//! Spot market analysis: per-AZ pricing, stability scoring, placement
//! scores, and dry-run capacity probes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use geuse_domain::{Architecture, AmiVariant, OsType, SpotAnalysis};
use geuse_aws::{AwsClient, Ec2Service, ImageResolver};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::pricing::PricingService;

/// Capacity probe results go stale quickly.
const CAPACITY_TTL: Duration = Duration::from_secs(120);

pub struct CapacityService {
    region: String,
    ec2: Ec2Service,
    resolver: ImageResolver,
    pricing: Arc<PricingService>,
    capacity_cache: TtlCache<bool>,
    /// Resolved probe image, one per service lifetime.
    probe_image: Mutex<Option<String>>,
}

impl CapacityService {
    pub fn new(client: Arc<AwsClient>, pricing: Arc<PricingService>) -> Self {
        Self {
            region: client.region().to_string(),
            ec2: Ec2Service::new(client.clone()),
            resolver: ImageResolver::new(client),
            pricing,
            capacity_cache: TtlCache::new(CAPACITY_TTL),
            probe_image: Mutex::new(None),
        }
    }

    /// Full spot market analysis for an instance type.
    pub async fn analyze_spot_prices(&self, instance_type: &str) -> SpotAnalysis {
        let spot = self.pricing.get_spot_prices(instance_type).await;
        let on_demand = self.pricing.get_on_demand_price(instance_type).await;
        let on_demand_price = on_demand.value.price_per_hour;

        // History is newest-first; keep the first sample seen per AZ.
        let mut prices_by_az: BTreeMap<String, Decimal> = BTreeMap::new();
        for price in &spot.value {
            prices_by_az
                .entry(price.availability_zone.clone())
                .or_insert(price.price_per_hour);
        }

        let placement_scores_by_az = self.placement_scores(instance_type).await;

        let mut recommended_az = None;
        let mut lowest_price = on_demand_price;
        for (az, price) in &prices_by_az {
            if *price < lowest_price {
                lowest_price = *price;
                recommended_az = Some(az.clone());
            }
        }

        let stability_scores = self.stability_scores(instance_type, &prices_by_az).await;
        let price_stability_score = if stability_scores.is_empty() {
            0.0
        } else {
            stability_scores.values().fold(0.0f64, |best, s| best.max(*s))
        };

        let savings_percentage = if on_demand_price.is_zero() {
            0.0
        } else {
            let saved = (on_demand_price - lowest_price).max(Decimal::ZERO);
            f64::try_from(saved / on_demand_price * Decimal::from(100)).unwrap_or(0.0)
        };

        SpotAnalysis {
            instance_type: instance_type.to_string(),
            region: self.region.clone(),
            prices_by_az,
            recommended_az,
            lowest_price,
            price_stability_score,
            on_demand_price,
            savings_percentage,
            placement_scores_by_az,
            analysis_timestamp: Utc::now(),
        }
    }

    /// Per-AZ stability from 24 h of history: `max(0, 1 - pstdev/mean)` with
    /// at least two samples, 1.0 otherwise.
    async fn stability_scores(
        &self,
        instance_type: &str,
        prices_by_az: &BTreeMap<String, Decimal>,
    ) -> BTreeMap<String, f64> {
        let start_time = Utc::now() - chrono::Duration::hours(24);
        let history = match self
            .ec2
            .spot_price_history(instance_type, start_time, 200)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                debug!(instance_type, error = %e, "stability history unavailable");
                Vec::new()
            }
        };

        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for entry in history {
            let price = f64::try_from(entry.price_per_hour).unwrap_or(0.0);
            grouped.entry(entry.availability_zone).or_default().push(price);
        }

        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for (az, samples) in grouped {
            if samples.len() < 2 {
                scores.insert(az, 1.0);
                continue;
            }
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            if mean == 0.0 {
                scores.insert(az, 0.0);
                continue;
            }
            let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
                / samples.len() as f64;
            let coefficient = variance.sqrt() / mean;
            scores.insert(az, (1.0 - coefficient).max(0.0));
        }

        // AZs with current prices but no history default to fully stable.
        for az in prices_by_az.keys() {
            scores.entry(az.clone()).or_insert(1.0);
        }
        scores
    }

    /// Spot placement scores in [1, 10]; an API failure yields the empty map,
    /// never an error.
    pub async fn placement_scores(&self, instance_type: &str) -> BTreeMap<String, f64> {
        match self.ec2.spot_placement_scores(instance_type).await {
            Ok(scores) => scores,
            Err(e) => {
                debug!(instance_type, error = %e, "placement scores unavailable");
                BTreeMap::new()
            }
        }
    }

    /// Dry-run a spot launch in the AZ. Results are cached for two minutes.
    pub async fn check_spot_capacity(&self, instance_type: &str, az: &str) -> bool {
        let cache_key = format!("{instance_type}:{az}");
        if let Some(cached) = self.capacity_cache.get(&cache_key) {
            return cached;
        }

        let Some(image_id) = self.probe_image().await else {
            warn!(instance_type, az, "no probe image resolvable, reporting no capacity");
            self.capacity_cache.set(cache_key, false);
            return false;
        };

        let available = match self
            .ec2
            .dry_run_spot_capacity(instance_type, &image_id, az)
            .await
        {
            Ok(available) => available,
            Err(e) => {
                debug!(instance_type, az, error = %e, "capacity probe error");
                false
            }
        };
        self.capacity_cache.set(cache_key, available);
        available
    }

    async fn probe_image(&self) -> Option<String> {
        if let Some(cached) = self.probe_image.lock().expect("probe image poisoned").clone() {
            return Some(cached);
        }
        let resolved = self
            .resolver
            .resolve(
                OsType::AmazonLinux2023,
                Architecture::X86_64,
                AmiVariant::Base,
                None,
            )
            .await
            .ok()?;
        *self.probe_image.lock().expect("probe image poisoned") = Some(resolved.clone());
        Some(resolved)
    }
}
