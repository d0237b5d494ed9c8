//! Load-balancer stage appended for Tier-2 deployments.

use std::time::Duration;

use async_trait::async_trait;
use geuse_aws::tags;
use geuse_domain::{Provenance, ResourceKind};
use tracing::info;

use crate::error::DeployError;
use crate::pipeline::{AlbPlan, DeployContext, Services, Stage};

const HEALTH_WAIT_ATTEMPTS: u32 = 60;
const HEALTH_WAIT_DELAY: Duration = Duration::from_secs(5);

pub struct AlbStage;

#[async_trait]
impl Stage for AlbStage {
    fn name(&self) -> &'static str {
        "load-balancer"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        if !cx.config.enable_alb {
            info!("load balancer not enabled, skipping");
            return Ok(());
        }

        let config = cx.config.clone();
        let network = cx.network()?.clone();
        let sg_id = cx.security_group()?.to_string();
        let instance_id = cx
            .instance
            .clone()
            .ok_or_else(|| DeployError::MissingPrecondition("instance has not been launched".into()))?
            .instance_id;

        // The load balancer needs subnets in at least two AZs; prefer the
        // public pair.
        let mut subnets = network.public_subnet_ids.clone();
        if subnets.len() < 2 {
            subnets = network.all_subnet_ids();
        }
        if subnets.len() < 2 {
            return Err(DeployError::MissingPrecondition(format!(
                "a load balancer requires at least 2 subnets in different availability zones; found {}",
                subnets.len()
            )));
        }
        subnets.truncate(2);

        let stack = &config.stack_name;
        let lb_tags = tags::standard(stack, config.tier, &format!("{stack}-alb"));

        let lb = services
            .elb
            .create_load_balancer(&format!("{stack}-alb"), &subnets, &[sg_id], &lb_tags)
            .await?;
        let target_group_arn = services
            .elb
            .create_target_group(&format!("{stack}-tg"), &network.vpc_id, &lb_tags)
            .await?;

        let https_enabled = config.enable_https && config.alb_certificate_arn.is_some();
        let mut https_listener = false;
        if https_enabled {
            let certificate = config.alb_certificate_arn.as_deref().unwrap_or_default();
            services
                .elb
                .create_https_listener(&lb.load_balancer_arn, &target_group_arn, certificate)
                .await?;
            https_listener = true;
            if config.force_https_redirect {
                services
                    .elb
                    .create_redirect_listener(&lb.load_balancer_arn)
                    .await?;
                info!("HTTPS enabled with HTTP redirect listener");
            } else {
                services
                    .elb
                    .create_http_listener(&lb.load_balancer_arn, &target_group_arn)
                    .await?;
                info!("HTTPS enabled with plain HTTP listener alongside");
            }
        } else {
            services
                .elb
                .create_http_listener(&lb.load_balancer_arn, &target_group_arn)
                .await?;
        }

        services
            .elb
            .register_targets(&target_group_arn, &[instance_id.clone()])
            .await?;
        services
            .elb
            .wait_for_healthy(
                &target_group_arn,
                &[instance_id],
                HEALTH_WAIT_ATTEMPTS,
                HEALTH_WAIT_DELAY,
            )
            .await?;
        info!(dns = %lb.dns_name, "load balancer serving healthy targets");

        let state = cx.state_mut()?;
        state.alb_arn = Some(lb.load_balancer_arn.clone());
        state.alb_dns = Some(lb.dns_name.clone());
        state.target_group_arn = Some(target_group_arn.clone());
        state.https_enabled = https_enabled;
        if https_enabled {
            state.n8n_url = format!("https://{}", lb.dns_name);
            state.https_endpoint = Some(state.n8n_url.clone());
            state.certificate_arn = config.alb_certificate_arn.clone();
        } else {
            state.n8n_url = format!("http://{}:80", lb.dns_name);
            state.https_endpoint = None;
        }
        state
            .resource_provenance
            .set(ResourceKind::Alb, Provenance::Created);
        state
            .resource_provenance
            .set(ResourceKind::TargetGroup, Provenance::Created);
        state
            .resource_provenance
            .set(ResourceKind::Listener, Provenance::Created);
        if https_listener {
            state
                .resource_provenance
                .set(ResourceKind::HttpsListener, Provenance::Created);
        }

        let mut updated = state.clone();
        services.store.save(&mut updated).await?;
        cx.state = Some(updated);
        cx.alb = Some(AlbPlan {
            alb_arn: lb.load_balancer_arn,
            alb_dns: lb.dns_name,
            target_group_arn,
            https_enabled,
        });
        Ok(())
    }
}
