//! The staged provisioning pipeline. One pipeline type carries every tier:
//! higher tiers append stages instead of subclassing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geuse_aws::{
    AwsClient, CloudFrontService, Ec2Service, EfsService, ElbService, IamService, ImageResolver,
    SecurityGroupService,
};
use geuse_domain::{DeploymentConfig, DeploymentState, InstanceSelection, Provenance};
use geuse_market::SelectionEngine;
use geuse_store::StateStore;
use tracing::{debug, info};

use crate::error::{DeployError, StageFailure};

// ── Shared service handles ────────────────────────────────────────────────────

/// Everything a stage may talk to, injected once at construction.
pub struct Services {
    pub region: String,
    pub ec2: Ec2Service,
    pub sg: SecurityGroupService,
    pub efs: EfsService,
    pub iam: IamService,
    pub elb: ElbService,
    pub cloudfront: CloudFrontService,
    pub resolver: ImageResolver,
    pub selection: Arc<SelectionEngine>,
    pub store: StateStore,
    /// Delay between launch attempts on identity-propagation errors.
    pub launch_retry_delay: Duration,
}

impl Services {
    pub fn new(client: Arc<AwsClient>, selection: Arc<SelectionEngine>, store: StateStore) -> Self {
        Self {
            region: client.region().to_string(),
            ec2: Ec2Service::new(client.clone()),
            sg: SecurityGroupService::new(client.clone()),
            efs: EfsService::new(client.clone()),
            iam: IamService::new(client.clone()),
            elb: ElbService::new(client.clone()),
            cloudfront: CloudFrontService::new(client.clone()),
            resolver: ImageResolver::new(client),
            selection,
            store,
            launch_retry_delay: Duration::from_secs(3),
        }
    }
}

// ── Per-deploy context ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetworkPlan {
    pub vpc_id: String,
    pub vpc_cidr: String,
    pub created: bool,
    pub public_subnet_ids: Vec<String>,
    pub private_subnet_ids: Vec<String>,
    pub chosen_public_subnet_id: String,
    pub chosen_public_subnet_az: Option<String>,
    pub chosen_storage_subnet_id: String,
}

impl NetworkPlan {
    pub fn all_subnet_ids(&self) -> Vec<String> {
        let mut ids = self.public_subnet_ids.clone();
        ids.extend(self.private_subnet_ids.iter().cloned());
        ids
    }
}

#[derive(Debug, Clone)]
pub struct StoragePlan {
    pub efs_id: String,
    pub mount_target_id: String,
    pub mount_target_ip: Option<String>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone)]
pub struct IamPlan {
    pub role_name: String,
    pub role_arn: String,
    pub profile_name: String,
    pub profile_arn: String,
}

#[derive(Debug, Clone)]
pub struct LaunchedInstance {
    pub instance_id: String,
    pub public_ip: Option<String>,
    pub private_ip: String,
}

#[derive(Debug, Clone)]
pub struct AlbPlan {
    pub alb_arn: String,
    pub alb_dns: String,
    pub target_group_arn: String,
    pub https_enabled: bool,
}

/// Mutable working set threaded through the stages. Each stage fills in its
/// slice; the finalize stage assembles the durable record.
pub struct DeployContext {
    pub config: DeploymentConfig,
    pub selection: Option<InstanceSelection>,
    pub network: Option<NetworkPlan>,
    pub security_group_id: Option<String>,
    pub sg_provenance: Provenance,
    pub storage: Option<StoragePlan>,
    pub iam: Option<IamPlan>,
    pub user_data: Option<Vec<u8>>,
    pub instance: Option<LaunchedInstance>,
    pub alb: Option<AlbPlan>,
    pub state: Option<DeploymentState>,
    /// True once the partial-state checkpoint is on disk; compensating
    /// cleanup is only possible from that point on.
    pub checkpoint_written: bool,
}

impl DeployContext {
    pub fn new(config: DeploymentConfig) -> Self {
        Self {
            config,
            selection: None,
            network: None,
            security_group_id: None,
            sg_provenance: Provenance::Created,
            storage: None,
            iam: None,
            user_data: None,
            instance: None,
            alb: None,
            state: None,
            checkpoint_written: false,
        }
    }

    pub fn network(&self) -> Result<&NetworkPlan, DeployError> {
        self.network
            .as_ref()
            .ok_or_else(|| DeployError::MissingPrecondition("network stage has not run".into()))
    }

    pub fn selection(&self) -> Result<&InstanceSelection, DeployError> {
        self.selection
            .as_ref()
            .ok_or_else(|| DeployError::MissingPrecondition("compute selection has not run".into()))
    }

    pub fn storage(&self) -> Result<&StoragePlan, DeployError> {
        self.storage
            .as_ref()
            .ok_or_else(|| DeployError::MissingPrecondition("storage stage has not run".into()))
    }

    pub fn security_group(&self) -> Result<&str, DeployError> {
        self.security_group_id.as_deref().ok_or_else(|| {
            DeployError::MissingPrecondition("security group stage has not run".into())
        })
    }

    pub fn state_mut(&mut self) -> Result<&mut DeploymentState, DeployError> {
        self.state
            .as_mut()
            .ok_or_else(|| DeployError::MissingPrecondition("final state has not been built".into()))
    }
}

// ── Stage & pipeline ──────────────────────────────────────────────────────────

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run all stages in order, checking the monotonic deadline at every
    /// stage boundary.
    pub async fn run(
        &self,
        services: &Services,
        cx: &mut DeployContext,
    ) -> Result<(), StageFailure> {
        let minutes = cx.config.rollback_timeout_minutes;
        let deadline = Instant::now() + Duration::from_secs(u64::from(minutes) * 60);
        self.run_with_deadline(services, cx, deadline, minutes).await
    }

    pub(crate) async fn run_with_deadline(
        &self,
        services: &Services,
        cx: &mut DeployContext,
        deadline: Instant,
        minutes: u32,
    ) -> Result<(), StageFailure> {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 && Instant::now() > deadline {
                return Err(StageFailure {
                    stage: stage.name(),
                    error: DeployError::Timeout {
                        minutes,
                        stage: stage.name(),
                    },
                });
            }
            info!(stage = stage.name(), "running pipeline stage");
            stage.run(services, cx).await.map_err(|error| {
                debug!(stage = stage.name(), error = %error, "stage failed");
                StageFailure {
                    stage: stage.name(),
                    error,
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_domain::Tier;

    struct Noop(&'static str);

    #[async_trait]
    impl Stage for Noop {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, _services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
            // Record execution order through the security-group slot.
            let mut seen = cx.security_group_id.take().unwrap_or_default();
            seen.push_str(self.0);
            seen.push(',');
            cx.security_group_id = Some(seen);
            Ok(())
        }
    }

    fn context() -> DeployContext {
        DeployContext::new(DeploymentConfig::new("demo", Tier::Dev, "us-east-1").unwrap())
    }

    fn services() -> Services {
        use geuse_aws::creds::StaticCredentialsProvider;
        use geuse_aws::{AwsCredentials, BaseUrls};
        use geuse_market::{CapacityService, PricingService};

        let client = Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single("http://127.0.0.1:1"),
        ));
        let pricing = Arc::new(PricingService::new(client.clone()));
        let capacity = Arc::new(CapacityService::new(client.clone(), pricing));
        let store = StateStore::open(Some(tempfile::tempdir().unwrap().into_path())).unwrap();
        Services::new(client, Arc::new(SelectionEngine::new(capacity)), store)
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let pipeline = Pipeline::new(vec![Box::new(Noop("a")), Box::new(Noop("b")), Box::new(Noop("c"))]);
        let services = services();
        let mut cx = context();
        pipeline.run(&services, &mut cx).await.unwrap();
        assert_eq!(cx.security_group_id.as_deref(), Some("a,b,c,"));
    }

    #[tokio::test]
    async fn breached_deadline_aborts_before_the_next_stage() {
        let pipeline = Pipeline::new(vec![Box::new(Noop("a")), Box::new(Noop("b"))]);
        let services = services();
        let mut cx = context();
        let past = Instant::now() - Duration::from_secs(1);
        let failure = pipeline
            .run_with_deadline(&services, &mut cx, past, 15)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, "b");
        assert!(matches!(failure.error, DeployError::Timeout { minutes: 15, .. }));
        // The first stage ran; the second never did.
        assert_eq!(cx.security_group_id.as_deref(), Some("a,"));
    }
}
