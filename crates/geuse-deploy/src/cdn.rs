//! CDN stage appended for Tier-3 deployments.

use std::time::Duration;

use async_trait::async_trait;
use geuse_aws::DistributionSpec;
use geuse_domain::{Provenance, ResourceKind};
use tracing::info;

use crate::error::DeployError;
use crate::pipeline::{DeployContext, Services, Stage};

/// Distribution propagation: up to 40 minutes at a 30 s interval.
const DEPLOY_WAIT_ATTEMPTS: u32 = 80;
const DEPLOY_WAIT_DELAY: Duration = Duration::from_secs(30);

pub struct CdnStage;

#[async_trait]
impl Stage for CdnStage {
    fn name(&self) -> &'static str {
        "cdn"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        if !cx.config.enable_alb {
            return Err(DeployError::MissingPrecondition(
                "a CDN requires the load balancer as its origin; enable the load balancer".into(),
            ));
        }
        let alb = cx.alb.clone().ok_or_else(|| {
            DeployError::MissingPrecondition("load balancer stage did not produce an ALB".into())
        })?;

        let stack = cx.config.stack_name.clone();
        let spec = DistributionSpec {
            alb_dns_name: alb.alb_dns.clone(),
            caller_reference: format!("{stack}-{}", chrono::Utc::now().timestamp()),
            comment: format!("GeuseMaker CDN for {stack}"),
            price_class: "PriceClass_100".into(),
            certificate_arn: cx.config.cloudfront_certificate_arn.clone(),
        };

        let distribution = services.cloudfront.create_distribution(&spec).await?;
        info!(
            distribution_id = %distribution.distribution_id,
            "distribution created, waiting for global propagation"
        );
        services
            .cloudfront
            .wait_for_deployed(
                &distribution.distribution_id,
                DEPLOY_WAIT_ATTEMPTS,
                DEPLOY_WAIT_DELAY,
            )
            .await?;

        let state = cx.state_mut()?;
        state.cloudfront_id = Some(distribution.distribution_id.clone());
        state.cloudfront_domain = Some(distribution.domain_name.clone());
        // The distribution redirects viewers to HTTPS regardless of origin
        // scheme, so the primary URL always uses it.
        state.n8n_url = format!("https://{}", distribution.domain_name);
        state.https_endpoint = Some(state.n8n_url.clone());
        state
            .resource_provenance
            .set(ResourceKind::Cloudfront, Provenance::Created);

        let mut updated = state.clone();
        services.store.save(&mut updated).await?;
        cx.state = Some(updated);
        info!(domain = %distribution.domain_name, "CDN deployed");
        Ok(())
    }
}
