//! Application load balancer operations (elasticloadbalancing Query API).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::client::{AwsClient, Params};
use crate::error::AwsError;
use crate::types::{LoadBalancerInfo, TargetHealthInfo};
use crate::xml::{xml_blocks, xml_text};

const ELB_VERSION: &str = "2015-12-01";
const SERVICE: &str = "elasticloadbalancing";

pub struct ElbService {
    client: Arc<AwsClient>,
}

impl ElbService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn query(&self, params: &Params) -> Result<String, AwsError> {
        let base = self.client.base().elbv2.clone();
        let region = self.client.region().to_string();
        self.client.query_api(&base, SERVICE, &region, params).await
    }

    /// Create an internet-facing ALB across the given subnets (>= 2 AZs).
    pub async fn create_load_balancer(
        &self,
        name: &str,
        subnets: &[String],
        security_groups: &[String],
        tags: &[(String, String)],
    ) -> Result<LoadBalancerInfo, AwsError> {
        info!(name, "creating load balancer");
        let mut params = Params::action("CreateLoadBalancer", ELB_VERSION)
            .add("Name", name)
            .add("Scheme", "internet-facing")
            .add("Type", "application");
        for (i, subnet) in subnets.iter().enumerate() {
            params = params.add(format!("Subnets.member.{}", i + 1), subnet);
        }
        for (i, sg) in security_groups.iter().enumerate() {
            params = params.add(format!("SecurityGroups.member.{}", i + 1), sg);
        }
        for (i, (key, value)) in tags.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("Tags.member.{n}.Key"), key)
                .add(format!("Tags.member.{n}.Value"), value);
        }

        let xml = self.query(&params).await?;
        let load_balancer_arn = xml_text(&xml, "LoadBalancerArn")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "LoadBalancerArn"))?;
        let dns_name = xml_text(&xml, "DNSName")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "DNSName"))?;
        Ok(LoadBalancerInfo {
            load_balancer_arn,
            dns_name,
        })
    }

    /// Target group with HTTP health checks on `/`: thresholds 2/3, 30 s
    /// interval, 5 s timeout.
    pub async fn create_target_group(
        &self,
        name: &str,
        vpc_id: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(name, vpc_id, "creating target group");
        let mut params = Params::action("CreateTargetGroup", ELB_VERSION)
            .add("Name", name)
            .add("Protocol", "HTTP")
            .add("Port", "80")
            .add("VpcId", vpc_id)
            .add("TargetType", "instance")
            .add("HealthCheckProtocol", "HTTP")
            .add("HealthCheckPath", "/")
            .add("HealthCheckIntervalSeconds", "30")
            .add("HealthCheckTimeoutSeconds", "5")
            .add("HealthyThresholdCount", "2")
            .add("UnhealthyThresholdCount", "3");
        for (i, (key, value)) in tags.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("Tags.member.{n}.Key"), key)
                .add(format!("Tags.member.{n}.Value"), value);
        }
        let xml = self.query(&params).await?;
        xml_text(&xml, "TargetGroupArn")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "TargetGroupArn"))
    }

    pub async fn create_http_listener(
        &self,
        load_balancer_arn: &str,
        target_group_arn: &str,
    ) -> Result<String, AwsError> {
        let xml = self
            .query(
                &Params::action("CreateListener", ELB_VERSION)
                    .add("LoadBalancerArn", load_balancer_arn)
                    .add("Protocol", "HTTP")
                    .add("Port", "80")
                    .add("DefaultActions.member.1.Type", "forward")
                    .add("DefaultActions.member.1.TargetGroupArn", target_group_arn),
            )
            .await?;
        xml_text(&xml, "ListenerArn")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "ListenerArn"))
    }

    pub async fn create_https_listener(
        &self,
        load_balancer_arn: &str,
        target_group_arn: &str,
        certificate_arn: &str,
    ) -> Result<String, AwsError> {
        let xml = self
            .query(
                &Params::action("CreateListener", ELB_VERSION)
                    .add("LoadBalancerArn", load_balancer_arn)
                    .add("Protocol", "HTTPS")
                    .add("Port", "443")
                    .add("Certificates.member.1.CertificateArn", certificate_arn)
                    .add("DefaultActions.member.1.Type", "forward")
                    .add("DefaultActions.member.1.TargetGroupArn", target_group_arn),
            )
            .await?;
        xml_text(&xml, "ListenerArn")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "ListenerArn"))
    }

    /// HTTP :80 listener that issues a permanent redirect to HTTPS :443.
    pub async fn create_redirect_listener(
        &self,
        load_balancer_arn: &str,
    ) -> Result<String, AwsError> {
        let xml = self
            .query(
                &Params::action("CreateListener", ELB_VERSION)
                    .add("LoadBalancerArn", load_balancer_arn)
                    .add("Protocol", "HTTP")
                    .add("Port", "80")
                    .add("DefaultActions.member.1.Type", "redirect")
                    .add("DefaultActions.member.1.RedirectConfig.Protocol", "HTTPS")
                    .add("DefaultActions.member.1.RedirectConfig.Port", "443")
                    .add("DefaultActions.member.1.RedirectConfig.StatusCode", "HTTP_301"),
            )
            .await?;
        xml_text(&xml, "ListenerArn")
            .ok_or_else(|| AwsError::missing_field(SERVICE, "ListenerArn"))
    }

    pub async fn register_targets(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
    ) -> Result<(), AwsError> {
        let mut params = Params::action("RegisterTargets", ELB_VERSION)
            .add("TargetGroupArn", target_group_arn);
        for (i, id) in instance_ids.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("Targets.member.{n}.Id"), id)
                .add(format!("Targets.member.{n}.Port"), "80");
        }
        self.query(&params).await.map(|_| ())
    }

    pub async fn describe_target_health(
        &self,
        target_group_arn: &str,
    ) -> Result<Vec<TargetHealthInfo>, AwsError> {
        let xml = self
            .query(
                &Params::action("DescribeTargetHealth", ELB_VERSION)
                    .add("TargetGroupArn", target_group_arn),
            )
            .await?;
        let mut targets = Vec::new();
        for block in xml_blocks(&xml, "TargetHealthDescriptions") {
            for member in xml_blocks(&block, "member") {
                let target_id = xml_blocks(&member, "Target")
                    .first()
                    .and_then(|t| xml_text(t, "Id"));
                let state = xml_blocks(&member, "TargetHealth")
                    .first()
                    .and_then(|t| xml_text(t, "State"));
                if let (Some(target_id), Some(state)) = (target_id, state) {
                    targets.push(TargetHealthInfo { target_id, state });
                }
            }
        }
        Ok(targets)
    }

    /// Poll until every given instance reports healthy.
    pub async fn wait_for_healthy(
        &self,
        target_group_arn: &str,
        instance_ids: &[String],
        max_attempts: u32,
        delay: Duration,
    ) -> Result<(), AwsError> {
        for attempt in 1..=max_attempts {
            let health = self.describe_target_health(target_group_arn).await?;
            let all_healthy = instance_ids.iter().all(|id| {
                health
                    .iter()
                    .any(|t| &t.target_id == id && t.state == "healthy")
            });
            if all_healthy {
                return Ok(());
            }
            debug!(target_group_arn, attempt, "waiting for healthy targets");
            tokio::time::sleep(delay).await;
        }
        Err(AwsError::WaitTimeout {
            resource: target_group_arn.to_string(),
            target: "healthy",
            attempts: max_attempts,
        })
    }

    /// Region service probe used by the validator.
    pub async fn describe_load_balancers_probe(&self) -> Result<(), AwsError> {
        self.query(&Params::action("DescribeLoadBalancers", ELB_VERSION).add("PageSize", "1"))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BaseUrls;
    use crate::creds::{AwsCredentials, StaticCredentialsProvider};
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: &str) -> ElbService {
        ElbService::new(Arc::new(AwsClient::with_base_urls(
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

    #[tokio::test]
    async fn create_target_group_sends_health_thresholds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=CreateTargetGroup"))
            .and(body_string_contains("HealthyThresholdCount=2"))
            .and(body_string_contains("UnhealthyThresholdCount=3"))
            .and(body_string_contains("HealthCheckIntervalSeconds=30"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<CreateTargetGroupResponse><TargetGroups><member><TargetGroupArn>arn:tg</TargetGroupArn></member></TargetGroups></CreateTargetGroupResponse>",
            ))
            .mount(&server)
            .await;

        let arn = service(&server.uri())
            .create_target_group("demo-tg", "vpc-1", &[])
            .await
            .unwrap();
        assert_eq!(arn, "arn:tg");
    }

    #[tokio::test]
    async fn target_health_parses_states() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<DescribeTargetHealthResponse><DescribeTargetHealthResult><TargetHealthDescriptions>
                <member><Target><Id>i-1</Id><Port>80</Port></Target><TargetHealth><State>healthy</State></TargetHealth></member>
                <member><Target><Id>i-2</Id><Port>80</Port></Target><TargetHealth><State>initial</State></TargetHealth></member>
                </TargetHealthDescriptions></DescribeTargetHealthResult></DescribeTargetHealthResponse>"#,
            ))
            .mount(&server)
            .await;

        let health = service(&server.uri())
            .describe_target_health("arn:tg")
            .await
            .unwrap();
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].state, "healthy");
        assert_eq!(health[1].target_id, "i-2");
    }
}
