//! Configuration rollback: revert to a previous snapshot, replaying the
//! instance-type primitive. No resource deletion happens here.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use geuse_aws::{AwsClient, Ec2Service};
use geuse_domain::{
    DeploymentState, DeploymentStatus, RollbackRecord, RollbackResult, RollbackTrigger,
};
use geuse_store::StateStore;
use tracing::info;

use crate::error::DeployError;

pub struct RollbackService {
    ec2: Ec2Service,
    store: StateStore,
}

impl RollbackService {
    pub fn new(client: Arc<AwsClient>, store: StateStore) -> Self {
        Self {
            ec2: Ec2Service::new(client),
            store,
        }
    }

    /// Revert to `previous_states[to_version - 1]`. The current state is
    /// pushed onto the ring first, so the rollback itself can be rolled back.
    pub async fn rollback(
        &self,
        stack_name: &str,
        to_version: u32,
        trigger: RollbackTrigger,
    ) -> Result<RollbackResult, DeployError> {
        let start = Instant::now();
        let mut state = self
            .store
            .load(stack_name, true)
            .await?
            .ok_or_else(|| {
                DeployError::InvalidUpdate(format!("deployment '{stack_name}' not found"))
            })?;

        if state.previous_states.is_empty() {
            return Err(DeployError::NoRollbackHistory);
        }
        if to_version < 1 || to_version as usize > state.previous_states.len() {
            return Err(DeployError::RollbackVersionOutOfRange {
                requested: to_version,
                available: state.previous_states.len(),
            });
        }

        let target_snapshot = state.previous_states[(to_version - 1) as usize].clone();
        let target: DeploymentState = serde_json::from_value(target_snapshot.clone())
            .map_err(|e| DeployError::InvalidUpdate(format!("snapshot is not a valid state: {e}")))?;

        let current_snapshot = serde_json::to_value(&state)
            .map_err(|e| DeployError::InvalidUpdate(format!("state snapshot failed: {e}")))?;
        state.push_previous(current_snapshot);
        state.status = DeploymentStatus::RollingBack;
        self.store.save(&mut state).await?;

        let mut changes: Vec<String> = Vec::new();

        if target.config.instance_type != state.config.instance_type {
            info!(
                from = %state.config.instance_type,
                to = %target.config.instance_type,
                "rolling back instance type"
            );
            self.ec2.stop_instance(&state.instance_id).await?;
            self.ec2.wait_for_stopped(&state.instance_id).await?;
            self.ec2
                .modify_instance_type(&state.instance_id, &target.config.instance_type)
                .await?;
            self.ec2.start_instance(&state.instance_id).await?;
            self.ec2.wait_for_running(&state.instance_id).await?;
            changes.push(format!("instance_type:{}", target.config.instance_type));
        }

        if target.container_images != state.container_images {
            // Pure state revert; no remote re-pull.
            state.container_images = target.container_images.clone();
            changes.push("container_images:rolled_back".into());
        }

        state.config = target.config.clone();
        state.cost.instance_type = target.config.instance_type.clone();
        state.last_healthy_state = Some(target_snapshot);

        state.rollback_history.push(RollbackRecord {
            timestamp: Utc::now(),
            trigger,
            resources_deleted: vec![],
            success: true,
            error_message: None,
            previous_state_version: Some(to_version),
            rolled_back_changes: changes.clone(),
        });
        state.status = DeploymentStatus::Running;
        self.store.save(&mut state).await?;

        info!(stack = stack_name, to_version, ?changes, "rollback complete");
        Ok(RollbackResult {
            success: true,
            trigger: trigger.to_string(),
            changes_reverted: changes,
            duration_seconds: start.elapsed().as_secs_f64(),
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_aws::creds::StaticCredentialsProvider;
    use geuse_aws::{AwsCredentials, BaseUrls};
    use geuse_domain::{CostTracking, DeploymentConfig, Tier};
    use rust_decimal::Decimal;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: &str, dir: &TempDir) -> RollbackService {
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
        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        RollbackService::new(client, store)
    }

    fn base_state(instance_type: &str, image: &str) -> DeploymentState {
        let mut config = DeploymentConfig::new("demo", Tier::Dev, "us-east-1").unwrap();
        config.instance_type = instance_type.to_string();
        let cost = CostTracking::from_selection(
            instance_type,
            false,
            Decimal::new(416, 4),
            Decimal::new(416, 4),
            None,
        );
        let mut state = DeploymentState::new(config, cost, DeploymentStatus::Running);
        state.vpc_id = "vpc-1".into();
        state.subnet_ids = vec!["subnet-1".into()];
        state.security_group_id = "sg-1".into();
        state.efs_id = "fs-1".into();
        state.efs_mount_target_id = "fsmt-1".into();
        state.instance_id = "i-1".into();
        state.private_ip = "10.0.0.5".into();
        state.n8n_url = "https://10.0.0.5".into();
        state
            .container_images
            .insert("n8n".into(), image.to_string());
        state
    }

    /// A "demo" record currently at t3.large / :new with a t3.medium / :old
    /// snapshot at version 1.
    fn seed(dir: &TempDir) {
        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        let old = base_state("t3.medium", "n8nio/n8n:old");
        let mut current = base_state("t3.large", "n8nio/n8n:new");
        current.push_previous(serde_json::to_value(&old).unwrap());
        store.save_sync(&mut current).unwrap();
    }

    async fn mock_instance_cycle(server: &MockServer) {
        for action in ["StopInstances", "StartInstances", "ModifyInstanceAttribute"] {
            Mock::given(method("POST"))
                .and(body_string_contains(format!("Action={action}")))
                .respond_with(
                    ResponseTemplate::new(200).set_body_string(format!("<{action}Response/>")),
                )
                .mount(server)
                .await;
        }
        // First describe answers the stopped wait, the second the running wait.
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><reservationSet><item><instancesSet><item><instanceId>i-1</instanceId><instanceState><name>stopped</name></instanceState></item></instancesSet></item></reservationSet></DescribeInstancesResponse>",
            ))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><reservationSet><item><instancesSet><item><instanceId>i-1</instanceId><instanceState><name>running</name></instanceState></item></instancesSet></item></reservationSet></DescribeInstancesResponse>",
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn rollback_reverts_instance_type_and_images() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        seed(&dir);
        mock_instance_cycle(&server).await;

        let result = service(&server.uri(), &dir)
            .rollback("demo", 1, RollbackTrigger::Manual)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result
            .changes_reverted
            .contains(&"instance_type:t3.medium".to_string()));
        assert!(result
            .changes_reverted
            .contains(&"container_images:rolled_back".to_string()));

        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        let state = store.load_sync("demo", true).unwrap().unwrap();
        assert_eq!(state.status, DeploymentStatus::Running);
        assert_eq!(state.config.instance_type, "t3.medium");
        assert_eq!(state.cost.instance_type, "t3.medium");
        assert_eq!(
            state.container_images.get("n8n").map(String::as_str),
            Some("n8nio/n8n:old")
        );
        assert_eq!(state.rollback_history.len(), 1);
        let record = &state.rollback_history[0];
        assert_eq!(record.trigger, RollbackTrigger::Manual);
        assert_eq!(record.previous_state_version, Some(1));
        assert!(record.success);
        // The pre-rollback (post-update) snapshot now sits at index 0.
        assert_eq!(state.previous_states[0]["config"]["instance_type"], "t3.large");
    }

    #[tokio::test]
    async fn ring_grows_by_one_capped_at_five() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();

        let old = base_state("t3.medium", "n8nio/n8n:old");
        let mut current = base_state("t3.medium", "n8nio/n8n:old");
        for _ in 0..5 {
            current.push_previous(serde_json::to_value(&old).unwrap());
        }
        assert_eq!(current.previous_states.len(), 5);
        // Identical snapshot: no instance mocks needed, nothing to replay.
        current
            .container_images
            .insert("n8n".into(), "n8nio/n8n:new".into());
        store.save_sync(&mut current).unwrap();

        service(&server.uri(), &dir)
            .rollback("demo", 2, RollbackTrigger::HealthCheckFailed)
            .await
            .unwrap();

        let state = store.load_sync("demo", true).unwrap().unwrap();
        assert_eq!(state.previous_states.len(), 5, "ring stays capped");
    }

    #[tokio::test]
    async fn version_bounds_are_enforced() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let service = service(&server.uri(), &dir);

        let err = service
            .rollback("demo", 0, RollbackTrigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::RollbackVersionOutOfRange { .. }));

        let err = service
            .rollback("demo", 2, RollbackTrigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::RollbackVersionOutOfRange { requested: 2, available: 1 }
        ));
    }
}
