//! Post-deployment checks: instance status, mount target, live health.

use std::sync::Arc;
use std::time::Instant;

use geuse_aws::{AwsClient, Ec2Service, EfsService};
use geuse_domain::{DeploymentState, Severity, ValidationCheck, ValidationReport};
use geuse_health::{check_all_services, HealthProbe};
use tracing::info;

pub struct PostDeploymentValidator {
    ec2: Ec2Service,
    efs: EfsService,
    probe: HealthProbe,
}

impl PostDeploymentValidator {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self {
            ec2: Ec2Service::new(client.clone()),
            efs: EfsService::new(client),
            probe: HealthProbe::new(),
        }
    }

    pub async fn validate(&self, state: &DeploymentState, check_health: bool) -> ValidationReport {
        let started = Instant::now();
        let mut report = ValidationReport::new();
        report.deployment_name = Some(state.stack_name.clone());

        report.add(self.check_instance(state).await);
        report.add(self.check_mount_target(state).await);
        if check_health {
            report.add(self.check_live_health(state).await);
        }

        report.validation_duration_seconds = Some(started.elapsed().as_secs_f64());
        info!(
            stack = %state.stack_name,
            passed = report.passed(),
            "post-deployment validation finished"
        );
        report
    }

    async fn check_instance(&self, state: &DeploymentState) -> ValidationCheck {
        if state.instance_id.is_empty() {
            return ValidationCheck::failed(
                "instance_status",
                "Deployment has no instance id recorded.",
                "Re-run the deploy; provisioning did not reach the launch stage.",
            );
        }
        match self.ec2.instance_status(&state.instance_id).await {
            Ok(status) if status.instance_state == "running" => {
                let checks_ok = status.instance_status == "ok" && status.system_status == "ok";
                if checks_ok {
                    ValidationCheck::passed(
                        "instance_status",
                        "Instance is running and passing status checks.",
                    )
                } else {
                    ValidationCheck::failed(
                        "instance_status",
                        format!(
                            "Instance is running; status checks are {}/{}.",
                            status.instance_status, status.system_status
                        ),
                        "Status checks usually settle a few minutes after launch.",
                    )
                    .with_severity(Severity::Warning)
                }
            }
            Ok(status) => ValidationCheck::failed(
                "instance_status",
                format!("Instance is {}.", status.instance_state),
                "Start the instance or re-run the deploy.",
            ),
            Err(e) => ValidationCheck::failed(
                "instance_status",
                format!("Instance status unavailable: {e}"),
                "Verify the instance exists in the provider console.",
            ),
        }
    }

    async fn check_mount_target(&self, state: &DeploymentState) -> ValidationCheck {
        if state.efs_mount_target_id.is_empty() {
            return ValidationCheck::failed(
                "mount_target",
                "Deployment has no mount target recorded.",
                "Re-run the deploy; storage provisioning did not complete.",
            );
        }
        match self.efs.describe_mount_target(&state.efs_mount_target_id).await {
            Ok(info) if info.life_cycle_state == "available" && info.ip_address.is_some() => {
                ValidationCheck::passed(
                    "mount_target",
                    format!(
                        "Mount target available at {}.",
                        info.ip_address.as_deref().unwrap_or("unknown")
                    ),
                )
            }
            Ok(info) => ValidationCheck::failed(
                "mount_target",
                format!("Mount target is {}.", info.life_cycle_state),
                "Wait for the mount target to become available.",
            ),
            Err(e) => ValidationCheck::failed(
                "mount_target",
                format!("Mount target lookup failed: {e}"),
                "Verify the filesystem still exists.",
            ),
        }
    }

    async fn check_live_health(&self, state: &DeploymentState) -> ValidationCheck {
        let Some(host) = state.host() else {
            return ValidationCheck::failed(
                "live_health",
                "Deployment has no reachable host address.",
                "Assign a public IP or probe from inside the network.",
            );
        };

        let results = check_all_services(&self.probe, host, true).await;
        let unhealthy: Vec<&str> = results
            .iter()
            .filter(|r| !r.healthy)
            .map(|r| r.service_name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ValidationCheck::passed("live_health", "All services report healthy.")
        } else {
            ValidationCheck::failed(
                "live_health",
                format!("Services unhealthy: {}.", unhealthy.join(", ")),
                "Services can take several minutes to start after launch.",
            )
            .with_severity(Severity::Warning)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_aws::creds::StaticCredentialsProvider;
    use geuse_aws::{AwsCredentials, BaseUrls};
    use geuse_domain::{CostTracking, DeploymentConfig, DeploymentStatus, Tier};
    use rust_decimal::Decimal;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn validator(url: &str) -> PostDeploymentValidator {
        PostDeploymentValidator::new(Arc::new(AwsClient::with_base_urls(
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

    fn state() -> DeploymentState {
        let config = DeploymentConfig::new("demo", Tier::Dev, "us-east-1").unwrap();
        let cost = CostTracking::from_selection(
            "t3.medium",
            false,
            Decimal::new(416, 4),
            Decimal::new(416, 4),
            None,
        );
        let mut state = DeploymentState::new(config, cost, DeploymentStatus::Running);
        state.instance_id = "i-1".into();
        state.efs_mount_target_id = "fsmt-1".into();
        state
    }

    #[tokio::test]
    async fn running_instance_with_ok_checks_passes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstanceStatus"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<DescribeInstanceStatusResponse><instanceStatusSet><item>
                <instanceId>i-1</instanceId>
                <instanceState><name>running</name></instanceState>
                <systemStatus><status>ok</status></systemStatus>
                <instanceStatus><status>ok</status></instanceStatus>
                </item></instanceStatusSet></DescribeInstanceStatusResponse>"#,
            ))
            .mount(&server)
            .await;

        let check = validator(&server.uri()).check_instance(&state()).await;
        assert!(check.passed);
    }

    #[tokio::test]
    async fn stopped_instance_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<DescribeInstanceStatusResponse><instanceStatusSet><item>
                <instanceId>i-1</instanceId>
                <instanceState><name>stopped</name></instanceState>
                </item></instanceStatusSet></DescribeInstanceStatusResponse>"#,
            ))
            .mount(&server)
            .await;

        let check = validator(&server.uri()).check_instance(&state()).await;
        assert!(!check.passed);
        assert_eq!(check.severity, Severity::Error);
    }

    #[tokio::test]
    async fn available_mount_target_with_ip_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "MountTargets": [{
                    "MountTargetId": "fsmt-1",
                    "FileSystemId": "fs-1",
                    "SubnetId": "subnet-1",
                    "LifeCycleState": "available",
                    "IpAddress": "10.0.1.5"
                }]
            })))
            .mount(&server)
            .await;

        let check = validator(&server.uri()).check_mount_target(&state()).await;
        assert!(check.passed);
        assert!(check.message.contains("10.0.1.5"));
    }
}
