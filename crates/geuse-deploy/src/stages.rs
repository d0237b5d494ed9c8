//! Tier-1 pipeline stages: compute selection through the saved final state.

use async_trait::async_trait;
use geuse_aws::{tags, IngressRule, LaunchSpec, SubnetInfo};
use geuse_domain::{
    CostTracking, DeploymentState, DeploymentStatus, InstanceSelection, Provenance, ResourceKind,
};
use tracing::{info, warn};

use crate::error::DeployError;
use crate::pipeline::{
    DeployContext, IamPlan, LaunchedInstance, NetworkPlan, Services, Stage, StoragePlan,
};
use crate::userdata::{self, UserDataSpec};

const VPC_CIDR: &str = "10.0.0.0/16";
const PUBLIC_SUBNET_CIDRS: [&str; 2] = ["10.0.1.0/24", "10.0.2.0/24"];
const PRIVATE_SUBNET_CIDRS: [&str; 2] = ["10.0.101.0/24", "10.0.102.0/24"];

const ROOT_VOLUME_GIB: u32 = 75;
const MAX_LAUNCH_ATTEMPTS: u32 = 5;

const N8N_PORT: u16 = 5678;
const NFS_PORT: u16 = 2049;

// ── Stage 1: compute selection ────────────────────────────────────────────────

pub struct SelectComputeStage;

#[async_trait]
impl Stage for SelectComputeStage {
    fn name(&self) -> &'static str {
        "select-compute"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        // Reuse a pre-computed selection so every log line and downstream
        // decision in this deploy sees the same choice.
        if cx.selection.is_none() {
            cx.selection = Some(services.selection.select_instance_type(&cx.config).await);
        }
        let selection = cx.selection()?;
        if selection.is_spot {
            info!(
                az = selection.availability_zone.as_deref().unwrap_or("best AZ"),
                price = %selection.price_per_hour,
                on_demand = %selection.savings_vs_on_demand.on_demand_hourly,
                "using spot capacity"
            );
        } else {
            info!(
                price = %selection.price_per_hour,
                reason = selection
                    .fallback_reason
                    .as_deref()
                    .unwrap_or(&selection.selection_reason),
                "using on-demand capacity"
            );
        }
        Ok(())
    }
}

// ── Stage 2: network ──────────────────────────────────────────────────────────

pub struct NetworkStage;

#[async_trait]
impl Stage for NetworkStage {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let selection_az = cx.selection()?.availability_zone.clone();
        let config = cx.config.clone();

        let (vpc_id, vpc_cidr, created, subnets, public_ids, private_ids) =
            match config.vpc_id.clone() {
                Some(vpc_id) => adopt_existing_network(services, cx, &vpc_id).await?,
                None => create_network(services, cx).await?,
            };

        if public_ids.is_empty() {
            return Err(DeployError::MissingPrecondition(format!(
                "no public subnets available in VPC {vpc_id}"
            )));
        }

        let chosen_public_subnet_id = match config.subnet_id.clone() {
            Some(requested) => {
                if !public_ids.contains(&requested) {
                    return Err(DeployError::MissingPrecondition(format!(
                        "configured subnet {requested} is not a public subnet in VPC {vpc_id}"
                    )));
                }
                requested
            }
            None => {
                let mut chosen = public_ids[0].clone();
                if let Some(ref az) = selection_az {
                    let matched = subnets.iter().find(|s| {
                        public_ids.contains(&s.subnet_id) && &s.availability_zone == az
                    });
                    if let Some(subnet) = matched {
                        chosen = subnet.subnet_id.clone();
                        info!(az = %az, "placing compute in the spot-selected AZ");
                    }
                }
                chosen
            }
        };

        // Mount targets resolve by DNS only inside their own AZ, so storage
        // defaults to the compute subnet.
        let chosen_storage_subnet_id = match config.storage_subnet_id.clone() {
            Some(requested) => {
                let known = public_ids.contains(&requested) || private_ids.contains(&requested);
                if !known {
                    return Err(DeployError::MissingPrecondition(format!(
                        "configured storage subnet {requested} is not part of VPC {vpc_id}"
                    )));
                }
                requested
            }
            None => chosen_public_subnet_id.clone(),
        };

        let chosen_public_subnet_az = subnets
            .iter()
            .find(|s| s.subnet_id == chosen_public_subnet_id)
            .map(|s| s.availability_zone.clone());

        cx.network = Some(NetworkPlan {
            vpc_id,
            vpc_cidr,
            created,
            public_subnet_ids: public_ids,
            private_subnet_ids: private_ids,
            chosen_public_subnet_id,
            chosen_public_subnet_az,
            chosen_storage_subnet_id,
        });
        Ok(())
    }
}

type NetworkFacts = (
    String,
    String,
    bool,
    Vec<SubnetInfo>,
    Vec<String>,
    Vec<String>,
);

/// Create a fresh network: /16 VPC, two public and two private subnets across
/// two AZs, default route through an internet gateway, public subnets
/// auto-assigning public IPs.
async fn create_network(
    services: &Services,
    cx: &DeployContext,
) -> Result<NetworkFacts, DeployError> {
    let stack = &cx.config.stack_name;
    let tier = cx.config.tier;
    let vpc_tags = tags::network(stack, tier, stack);

    let vpc_id = services.ec2.create_vpc(VPC_CIDR, &vpc_tags).await?;
    let _ = services
        .ec2
        .modify_vpc_attribute(&vpc_id, "EnableDnsSupport.Value", "true")
        .await;
    let _ = services
        .ec2
        .modify_vpc_attribute(&vpc_id, "EnableDnsHostnames.Value", "true")
        .await;

    let azs = services.ec2.describe_availability_zones().await?;
    if azs.len() < 2 {
        return Err(DeployError::MissingPrecondition(format!(
            "region {} has fewer than two availability zones",
            services.region
        )));
    }

    let igw_id = services
        .ec2
        .create_internet_gateway(&tags::network(stack, tier, &format!("{stack}-igw")))
        .await?;
    services.ec2.attach_internet_gateway(&igw_id, &vpc_id).await?;

    let mut subnets: Vec<SubnetInfo> = Vec::new();
    let mut public_ids = Vec::new();
    let mut private_ids = Vec::new();

    for (i, cidr) in PUBLIC_SUBNET_CIDRS.iter().enumerate() {
        let subnet_id = services
            .ec2
            .create_subnet(
                &vpc_id,
                cidr,
                &azs[i],
                &tags::network(stack, tier, &format!("{stack}-public-{}", i + 1)),
            )
            .await?;
        services.ec2.enable_auto_assign_public_ip(&subnet_id).await?;
        subnets.push(SubnetInfo {
            subnet_id: subnet_id.clone(),
            vpc_id: vpc_id.clone(),
            availability_zone: azs[i].clone(),
            cidr_block: cidr.to_string(),
            map_public_ip_on_launch: true,
        });
        public_ids.push(subnet_id);
    }
    for (i, cidr) in PRIVATE_SUBNET_CIDRS.iter().enumerate() {
        let subnet_id = services
            .ec2
            .create_subnet(
                &vpc_id,
                cidr,
                &azs[i],
                &tags::network(stack, tier, &format!("{stack}-private-{}", i + 1)),
            )
            .await?;
        subnets.push(SubnetInfo {
            subnet_id: subnet_id.clone(),
            vpc_id: vpc_id.clone(),
            availability_zone: azs[i].clone(),
            cidr_block: cidr.to_string(),
            map_public_ip_on_launch: false,
        });
        private_ids.push(subnet_id);
    }

    let route_table_id = services
        .ec2
        .create_route_table(&vpc_id, &tags::network(stack, tier, &format!("{stack}-public-rt")))
        .await?;
    services
        .ec2
        .create_default_route(&route_table_id, &igw_id)
        .await?;
    for subnet_id in &public_ids {
        services
            .ec2
            .associate_route_table(&route_table_id, subnet_id)
            .await?;
    }

    info!(vpc_id, "network created");
    Ok((vpc_id, VPC_CIDR.to_string(), true, subnets, public_ids, private_ids))
}

/// Adopt an existing network: validate availability and DNS attributes,
/// attach an internet gateway only when the caller opted in, and resolve the
/// public/private subnet split.
async fn adopt_existing_network(
    services: &Services,
    cx: &DeployContext,
    vpc_id: &str,
) -> Result<NetworkFacts, DeployError> {
    let config = &cx.config;
    let stack = &config.stack_name;

    let vpc = services.ec2.describe_vpc(vpc_id).await?;
    if vpc.state != "available" {
        return Err(DeployError::MissingPrecondition(format!(
            "VPC {vpc_id} is in {} state",
            vpc.state
        )));
    }

    let _ = services
        .ec2
        .modify_vpc_attribute(vpc_id, "EnableDnsSupport.Value", "true")
        .await;
    let _ = services
        .ec2
        .modify_vpc_attribute(vpc_id, "EnableDnsHostnames.Value", "true")
        .await;
    // Stamp the adoption so orphan cleanup can see the association.
    let _ = services
        .ec2
        .create_tags(vpc_id, &tags::network(stack, config.tier, stack))
        .await;

    let subnets = services.ec2.describe_subnets(vpc_id).await?;
    let discovered_public: Vec<String> = subnets
        .iter()
        .filter(|s| s.map_public_ip_on_launch)
        .map(|s| s.subnet_id.clone())
        .collect();
    let public_ids = config.public_subnet_ids.clone().unwrap_or_else(|| {
        if discovered_public.is_empty() {
            subnets.iter().map(|s| s.subnet_id.clone()).collect()
        } else {
            discovered_public
        }
    });
    let private_ids = config.private_subnet_ids.clone().unwrap_or_else(|| {
        subnets
            .iter()
            .map(|s| s.subnet_id.clone())
            .filter(|id| !public_ids.contains(id))
            .collect()
    });

    let igws = services.ec2.internet_gateways_for_vpc(vpc_id).await?;
    if igws.is_empty() {
        if !config.attach_internet_gateway {
            return Err(DeployError::MissingPrecondition(format!(
                "VPC {vpc_id} has no internet gateway; rerun with --attach-internet-gateway"
            )));
        }
        warn!(vpc_id, "attaching internet gateway to reused VPC");
        let igw_id = services
            .ec2
            .create_internet_gateway(&tags::network(stack, config.tier, &format!("{stack}-igw")))
            .await?;
        services.ec2.attach_internet_gateway(&igw_id, vpc_id).await?;
        let route_table_id = services
            .ec2
            .create_route_table(vpc_id, &tags::network(stack, config.tier, &format!("{stack}-public-rt")))
            .await?;
        services
            .ec2
            .create_default_route(&route_table_id, &igw_id)
            .await?;
        for subnet_id in &public_ids {
            services
                .ec2
                .associate_route_table(&route_table_id, subnet_id)
                .await?;
        }
    } else {
        let route_tables = services.ec2.describe_route_tables(vpc_id).await?;
        if !route_tables.iter().any(|rt| rt.has_igw_route) {
            warn!(vpc_id, "no public route found in reused VPC");
        }
    }

    info!(vpc_id, "adopted existing network");
    Ok((
        vpc_id.to_string(),
        vpc.cidr_block,
        false,
        subnets,
        public_ids,
        private_ids,
    ))
}

// ── Stage 3: security group ───────────────────────────────────────────────────

pub struct SecurityGroupStage;

#[async_trait]
impl Stage for SecurityGroupStage {
    fn name(&self) -> &'static str {
        "security-group"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        if let Some(sg_id) = cx.config.security_group_id.clone() {
            if cx.config.enable_https {
                let added = services.sg.ensure_https_port(&sg_id).await?;
                if added {
                    info!(sg_id, "HTTPS port 443 added to reused security group");
                } else {
                    info!(sg_id, "port 443 already open on reused security group");
                }
            }
            cx.sg_provenance = Provenance::Reused;
            cx.security_group_id = Some(sg_id);
            return Ok(());
        }

        let network = cx.network()?.clone();
        let mut ingress = vec![
            IngressRule::open(22),
            IngressRule::open(80),
            IngressRule::open(N8N_PORT),
            IngressRule::restricted(NFS_PORT, network.vpc_cidr.clone()),
        ];
        if cx.config.enable_https {
            ingress.push(IngressRule::open(443));
        }

        let group_id = services
            .sg
            .create_security_group(
                &format!("{}-sg", cx.config.stack_name),
                "GeuseMaker deployment security group",
                &network.vpc_id,
                &ingress,
                &tags::standard(
                    &cx.config.stack_name,
                    cx.config.tier,
                    &format!("{}-sg", cx.config.stack_name),
                ),
            )
            .await?;
        cx.sg_provenance = Provenance::Created;
        cx.security_group_id = Some(group_id);
        Ok(())
    }
}

// ── Stage 4: storage ──────────────────────────────────────────────────────────

pub struct StorageStage;

#[async_trait]
impl Stage for StorageStage {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let network = cx.network()?.clone();
        let sg_id = cx.security_group()?.to_string();

        if let Some(efs_id) = cx.config.efs_id.clone() {
            // Reuse: keep the filesystem, ensure a mount target exists in the
            // storage subnet.
            services.efs.describe_file_system(&efs_id).await?;
            let existing = services
                .efs
                .list_mount_targets(&efs_id)
                .await?
                .into_iter()
                .find(|mt| mt.subnet_id == network.chosen_storage_subnet_id);
            let (mount_target_id, mount_target_ip) = match existing {
                Some(mt) => {
                    if mt.life_cycle_state != "available" {
                        services
                            .efs
                            .wait_for_mount_target_available(&mt.mount_target_id)
                            .await?;
                    }
                    let ip = services.efs.mount_target_ip(&mt.mount_target_id).await.ok();
                    (mt.mount_target_id, ip)
                }
                None => {
                    let mt_id = services
                        .efs
                        .create_mount_target(
                            &efs_id,
                            &network.chosen_storage_subnet_id,
                            &[sg_id],
                        )
                        .await?;
                    services.efs.wait_for_mount_target_available(&mt_id).await?;
                    let ip = services.efs.mount_target_ip(&mt_id).await?;
                    (mt_id, Some(ip))
                }
            };
            cx.storage = Some(StoragePlan {
                efs_id,
                mount_target_id,
                mount_target_ip,
                provenance: Provenance::Reused,
            });
            return Ok(());
        }

        let efs_id = services
            .efs
            .create_file_system(
                &cx.config.stack_name,
                &tags::standard(&cx.config.stack_name, cx.config.tier, &cx.config.stack_name),
            )
            .await?;
        services.efs.wait_for_available(&efs_id).await?;

        let mount_target_id = services
            .efs
            .create_mount_target(&efs_id, &network.chosen_storage_subnet_id, &[sg_id])
            .await?;
        services
            .efs
            .wait_for_mount_target_available(&mount_target_id)
            .await?;
        let mount_target_ip = services.efs.mount_target_ip(&mount_target_id).await?;

        cx.storage = Some(StoragePlan {
            efs_id,
            mount_target_id,
            mount_target_ip: Some(mount_target_ip),
            provenance: Provenance::Created,
        });
        Ok(())
    }
}

// ── Stage 5: partial-state checkpoint ─────────────────────────────────────────

/// First durable write. From here on a failure can be compensated: the
/// record names every resource created so far, with the instance pending.
pub struct CheckpointStage;

#[async_trait]
impl Stage for CheckpointStage {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let mut state = build_state(cx, DeploymentStatus::Creating, None)?;
        services.store.save(&mut state).await?;
        cx.checkpoint_written = true;
        info!(stack = %cx.config.stack_name, "partial state checkpoint written");
        Ok(())
    }
}

// ── Stage 6: identity ─────────────────────────────────────────────────────────

pub struct IdentityStage;

#[async_trait]
impl Stage for IdentityStage {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let stack = &cx.config.stack_name;
        let role_name = format!("{stack}-efs-mount-role");
        let profile_name = format!("{stack}-instance-profile");
        let role_tags = tags::standard(stack, cx.config.tier, &role_name);

        let role_arn = services.iam.create_efs_mount_role(&role_name, &role_tags).await?;
        let profile_arn = services
            .iam
            .create_instance_profile(&profile_name, &role_tags)
            .await?;
        services
            .iam
            .add_role_to_instance_profile(&profile_name, &role_name)
            .await?;
        services
            .iam
            .wait_for_instance_profile(&profile_name, &role_name)
            .await?;

        cx.iam = Some(IamPlan {
            role_name,
            role_arn,
            profile_name,
            profile_arn,
        });
        Ok(())
    }
}

// ── Stage 7: user data ────────────────────────────────────────────────────────

pub struct UserDataStage;

#[async_trait]
impl Stage for UserDataStage {
    fn name(&self) -> &'static str {
        "user-data"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let storage = cx.storage()?.clone();
        let spec = UserDataSpec {
            efs_dns: format!("{}.efs.{}.amazonaws.com", storage.efs_id, services.region),
            efs_id: storage.efs_id,
            efs_mount_target_ip: storage.mount_target_ip,
            tier: cx.config.tier,
            stack_name: cx.config.stack_name.clone(),
            region: services.region.clone(),
            postgres_password: userdata::generate_postgres_password(),
            use_runtime_bundle: cx.config.use_runtime_bundle,
            runtime_bundle_path: cx.config.runtime_bundle_path.clone(),
        };
        let payload = userdata::compress(&userdata::generate_script(&spec))?;
        info!(bytes = payload.len(), "user data rendered and compressed");
        cx.user_data = Some(payload);
        Ok(())
    }
}

// ── Stage 8: instance launch ──────────────────────────────────────────────────

pub struct LaunchInstanceStage;

#[async_trait]
impl Stage for LaunchInstanceStage {
    fn name(&self) -> &'static str {
        "launch-instance"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let config = cx.config.clone();
        let network = cx.network()?.clone();
        let selection = cx.selection()?.clone();
        let iam = cx
            .iam
            .clone()
            .ok_or_else(|| DeployError::MissingPrecondition("identity stage has not run".into()))?;
        let user_data = cx
            .user_data
            .clone()
            .ok_or_else(|| DeployError::MissingPrecondition("user data has not been rendered".into()))?;

        let image_id = match config.ami_id.clone() {
            Some(id) => {
                info!(image_id = %id, "using caller-supplied machine image");
                id
            }
            None => {
                services
                    .resolver
                    .resolve(
                        config.os_type,
                        config.architecture,
                        config.ami_type,
                        Some(&config.instance_type),
                    )
                    .await?
            }
        };
        let root_device_name = services.resolver.root_device_name(&image_id).await;

        let spec = LaunchSpec {
            image_id,
            instance_type: config.instance_type.clone(),
            subnet_id: network.chosen_public_subnet_id.clone(),
            security_group_ids: vec![cx.security_group()?.to_string()],
            user_data,
            iam_instance_profile_name: Some(iam.profile_name.clone()),
            key_name: config.keypair_name.clone(),
            availability_zone: network.chosen_public_subnet_az.clone(),
            spot: selection.is_spot,
            root_device_name,
            root_volume_gib: ROOT_VOLUME_GIB,
            tags: tags::standard(&config.stack_name, config.tier, &config.stack_name),
        };

        // IAM instance profiles propagate to the compute service with a lag;
        // the provider reports them as invalid parameters until visible.
        let mut instance_id = None;
        let mut last_error = String::new();
        for attempt in 1..=MAX_LAUNCH_ATTEMPTS {
            match services.ec2.run_instances(&spec).await {
                Ok(id) => {
                    instance_id = Some(id);
                    break;
                }
                Err(e) if e.is_code("InvalidParameterValue") || e.is_code("does not exist") => {
                    warn!(
                        attempt,
                        max = MAX_LAUNCH_ATTEMPTS,
                        "instance profile not yet visible, retrying launch"
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(services.launch_retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let instance_id = instance_id.ok_or(DeployError::LaunchRetriesExhausted {
            attempts: MAX_LAUNCH_ATTEMPTS,
            reason: last_error,
        })?;

        services.ec2.wait_for_running(&instance_id).await?;
        let described = services.ec2.describe_instance(&instance_id).await?;
        cx.instance = Some(LaunchedInstance {
            instance_id,
            public_ip: described.public_ip,
            private_ip: described.private_ip.unwrap_or_default(),
        });
        Ok(())
    }
}

// ── Stage 9: finalize ─────────────────────────────────────────────────────────

pub struct FinalizeStage;

#[async_trait]
impl Stage for FinalizeStage {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn run(&self, services: &Services, cx: &mut DeployContext) -> Result<(), DeployError> {
        let instance = cx
            .instance
            .clone()
            .ok_or_else(|| DeployError::MissingPrecondition("instance has not been launched".into()))?;
        let mut state = build_state(cx, DeploymentStatus::Running, Some(&instance))?;
        state.cost.instance_start_time = Some(chrono::Utc::now());
        services.store.save(&mut state).await?;
        info!(
            stack = %state.stack_name,
            instance_id = %state.instance_id,
            url = %state.n8n_url,
            "deployment provisioned"
        );
        cx.state = Some(state);
        Ok(())
    }
}

// ── State assembly ────────────────────────────────────────────────────────────

pub(crate) fn build_state(
    cx: &DeployContext,
    status: DeploymentStatus,
    instance: Option<&LaunchedInstance>,
) -> Result<DeploymentState, DeployError> {
    let config = cx.config.clone();
    let selection: &InstanceSelection = cx.selection()?;
    let network = cx.network()?;
    let storage = cx.storage()?;

    let cost = CostTracking::from_selection(
        &config.instance_type,
        selection.is_spot,
        selection.price_per_hour,
        selection.savings_vs_on_demand.on_demand_hourly,
        config.budget_limit,
    );

    let network_provenance = if network.created {
        Provenance::Created
    } else {
        Provenance::Reused
    };

    let mut state = DeploymentState::new(config.clone(), cost, status);
    state.vpc_id = network.vpc_id.clone();
    state.subnet_ids = network.all_subnet_ids();
    state.storage_subnet_id = Some(network.chosen_storage_subnet_id.clone());
    state.security_group_id = cx.security_group()?.to_string();
    state.efs_id = storage.efs_id.clone();
    state.efs_mount_target_id = storage.mount_target_id.clone();
    state.efs_mount_target_ip = storage.mount_target_ip.clone();
    state.https_enabled = config.enable_https;

    let provenance = &mut state.resource_provenance;
    provenance.set(ResourceKind::Vpc, network_provenance);
    provenance.set(ResourceKind::Subnets, network_provenance);
    provenance.set(ResourceKind::SecurityGroup, cx.sg_provenance);
    provenance.set(ResourceKind::Efs, storage.provenance);
    provenance.set(
        ResourceKind::EfsMountTarget,
        if storage.provenance == Provenance::Reused {
            Provenance::Reused
        } else {
            Provenance::Created
        },
    );
    provenance.set(
        ResourceKind::KeyPair,
        if config.keypair_name.is_some() {
            Provenance::Reused
        } else {
            Provenance::Created
        },
    );

    if let Some(iam) = &cx.iam {
        state.iam_role_name = Some(iam.role_name.clone());
        state.iam_role_arn = Some(iam.role_arn.clone());
        state.iam_instance_profile_name = Some(iam.profile_name.clone());
        state.iam_instance_profile_arn = Some(iam.profile_arn.clone());
        provenance.set(ResourceKind::IamRole, Provenance::Created);
        provenance.set(ResourceKind::IamInstanceProfile, Provenance::Created);
    }

    match instance {
        Some(launched) => {
            state.instance_id = launched.instance_id.clone();
            state.public_ip = launched.public_ip.clone();
            state.private_ip = launched.private_ip.clone();
            let host = launched
                .public_ip
                .clone()
                .unwrap_or_else(|| launched.private_ip.clone());
            if !host.is_empty() {
                let scheme = if config.enable_https { "https" } else { "http" };
                state.n8n_url = format!("{scheme}://{host}");
                if config.enable_https {
                    state.https_endpoint = Some(state.n8n_url.clone());
                }
            }
            provenance.set(ResourceKind::Instance, Provenance::Created);
        }
        None => {
            provenance.set(ResourceKind::Instance, Provenance::Pending);
        }
    }

    Ok(state)
}

/// The fixed Tier-1 stage list.
pub fn tier1_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(SelectComputeStage),
        Box::new(NetworkStage),
        Box::new(SecurityGroupStage),
        Box::new(StorageStage),
        Box::new(CheckpointStage),
        Box::new(IdentityStage),
        Box::new(UserDataStage),
        Box::new(LaunchInstanceStage),
        Box::new(FinalizeStage),
    ]
}
