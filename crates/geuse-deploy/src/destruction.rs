//! Reverse-dependency teardown with preservation of reused resources.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use geuse_aws::{AwsClient, Ec2Service, EfsService, SecurityGroupService};
use geuse_domain::{
    DeletedResource, DeploymentState, DeploymentStatus, DestructionResult, PreservedResource,
    Provenance, ResourceKind,
};
use geuse_store::StateStore;
use tracing::{info, warn};

use crate::error::DeployError;

#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyOptions {
    /// Report what would happen without any mutating call.
    pub dry_run: bool,
    /// Treat the filesystem as preserved even when this tool created it.
    pub preserve_efs: bool,
}

pub struct DestructionService {
    ec2: Ec2Service,
    efs: EfsService,
    sg: SecurityGroupService,
    store: StateStore,
}

impl DestructionService {
    pub fn new(client: Arc<AwsClient>, store: StateStore) -> Self {
        Self {
            ec2: Ec2Service::new(client.clone()),
            efs: EfsService::new(client.clone()),
            sg: SecurityGroupService::new(client),
            store,
        }
    }

    /// Destroy resources strictly in reverse-dependency order, skipping
    /// anything reused, collecting per-step errors instead of aborting.
    /// Success iff no errors. The final state is archived and the live record
    /// deleted (unless dry-run).
    pub async fn destroy(
        &self,
        state: &DeploymentState,
        options: DestroyOptions,
    ) -> Result<DestructionResult, DeployError> {
        let start = Instant::now();
        let mut deleted: Vec<DeletedResource> = Vec::new();
        let mut preserved: Vec<PreservedResource> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let dry_run = options.dry_run;

        let reused = |kind: ResourceKind| state.resource_provenance.is_reused(kind);
        let efs_preserved = options.preserve_efs || reused(ResourceKind::Efs);

        // 1. Compute.
        if !state.instance_id.is_empty() {
            if reused(ResourceKind::Instance) {
                preserved.push(PreservedResource::reused("ec2_instance", &state.instance_id));
            } else {
                info!(instance_id = %state.instance_id, dry_run, "terminating instance");
                if dry_run {
                    deleted.push(DeletedResource::now("ec2_instance", &state.instance_id));
                } else {
                    match self.terminate_and_wait(&state.instance_id).await {
                        Ok(()) => {
                            deleted.push(DeletedResource::now("ec2_instance", &state.instance_id))
                        }
                        Err(e) => errors.push(format!("Instance termination failed: {e}")),
                    }
                }
            }
        }

        // 2 + 3. Mount targets, then the filesystem.
        if !state.efs_id.is_empty() {
            if efs_preserved {
                if !state.efs_mount_target_id.is_empty() {
                    preserved.push(PreservedResource::reused(
                        "efs_mount_target",
                        &state.efs_mount_target_id,
                    ));
                }
                preserved.push(PreservedResource::reused("efs", &state.efs_id));
            } else {
                for mt_id in self.mount_target_ids(state).await {
                    info!(mount_target_id = %mt_id, dry_run, "deleting mount target");
                    if dry_run {
                        deleted.push(DeletedResource::now("efs_mount_target", &mt_id));
                        continue;
                    }
                    let result = async {
                        self.efs.delete_mount_target(&mt_id).await?;
                        self.efs.wait_for_mount_target_deleted(&mt_id).await
                    }
                    .await;
                    match result {
                        Ok(()) => deleted.push(DeletedResource::now("efs_mount_target", &mt_id)),
                        Err(e) => {
                            errors.push(format!("EFS mount target {mt_id} deletion failed: {e}"))
                        }
                    }
                }

                info!(efs_id = %state.efs_id, dry_run, "deleting filesystem");
                if dry_run {
                    deleted.push(DeletedResource::now("efs", &state.efs_id));
                } else {
                    match self.efs.delete_file_system(&state.efs_id).await {
                        Ok(()) => deleted.push(DeletedResource::now("efs", &state.efs_id)),
                        Err(e) => errors.push(format!("EFS deletion failed: {e}")),
                    }
                }
            }
        }

        // 4. Security group.
        if !state.security_group_id.is_empty() {
            if reused(ResourceKind::SecurityGroup) {
                preserved.push(PreservedResource::reused(
                    "security_group",
                    &state.security_group_id,
                ));
            } else if dry_run {
                deleted.push(DeletedResource::now("security_group", &state.security_group_id));
            } else {
                match self.sg.delete_security_group(&state.security_group_id).await {
                    Ok(()) => deleted
                        .push(DeletedResource::now("security_group", &state.security_group_id)),
                    Err(e) => errors.push(format!("Security group deletion failed: {e}")),
                }
            }
        }

        // 5. Subnets.
        if reused(ResourceKind::Subnets) {
            for subnet_id in &state.subnet_ids {
                preserved.push(PreservedResource::reused("subnet", subnet_id));
            }
        } else {
            for subnet_id in &state.subnet_ids {
                if dry_run {
                    deleted.push(DeletedResource::now("subnet", subnet_id));
                    continue;
                }
                match self.ec2.delete_subnet(subnet_id).await {
                    Ok(()) => deleted.push(DeletedResource::now("subnet", subnet_id)),
                    Err(e) => errors.push(format!("Subnet {subnet_id} deletion failed: {e}")),
                }
            }
        }

        // 6. Network dependencies, then the network itself.
        if reused(ResourceKind::Vpc) {
            preserved.push(PreservedResource::reused("vpc", &state.vpc_id));
        } else if !state.vpc_id.is_empty() {
            if dry_run {
                deleted.push(DeletedResource::now("vpc", &state.vpc_id));
            } else {
                self.delete_vpc_dependencies(&state.vpc_id, &mut errors).await;
                match self.ec2.delete_vpc(&state.vpc_id).await {
                    Ok(()) => deleted.push(DeletedResource::now("vpc", &state.vpc_id)),
                    Err(e) => errors.push(format!("VPC deletion failed: {e}")),
                }
            }
        }

        // 7. Archive the final state and delete the live record.
        let mut archived_state_path = None;
        if !dry_run {
            let mut terminal = state.clone();
            terminal.status = DeploymentStatus::Terminated;
            terminal.terminated_at = Some(Utc::now());
            match self.store.archive(&mut terminal).await {
                Ok(path) => archived_state_path = Some(path.display().to_string()),
                Err(e) => errors.push(format!("State archival failed: {e}")),
            }
            if let Err(e) = self.store.delete(&state.stack_name).await {
                errors.push(format!("State deletion failed: {e}"));
            }
        }

        Ok(DestructionResult {
            success: errors.is_empty(),
            deleted_resources: deleted,
            preserved_resources: preserved,
            errors,
            duration_seconds: start.elapsed().as_secs_f64(),
            archived_state_path,
        })
    }

    async fn terminate_and_wait(&self, instance_id: &str) -> Result<(), geuse_aws::AwsError> {
        self.ec2.terminate_instance(instance_id).await?;
        self.ec2.wait_for_terminated(instance_id).await
    }

    /// All mount targets of the filesystem, falling back to the recorded id
    /// when enumeration is empty.
    async fn mount_target_ids(&self, state: &DeploymentState) -> Vec<String> {
        let listed = self
            .efs
            .list_mount_targets(&state.efs_id)
            .await
            .map(|mts| mts.into_iter().map(|mt| mt.mount_target_id).collect::<Vec<_>>())
            .unwrap_or_default();
        if listed.is_empty() && !state.efs_mount_target_id.is_empty() {
            vec![state.efs_mount_target_id.clone()]
        } else {
            listed
        }
    }

    /// Detachable network interfaces, internet gateways, and non-main route
    /// tables stand between us and VPC deletion.
    async fn delete_vpc_dependencies(&self, vpc_id: &str, errors: &mut Vec<String>) {
        match self.ec2.describe_network_interfaces(vpc_id).await {
            Ok(interfaces) => {
                for eni in interfaces {
                    // Interfaces still attached to compute disappear with the
                    // instance.
                    if eni.attached {
                        continue;
                    }
                    if let Some(attachment_id) = &eni.attachment_id {
                        let _ = self.ec2.detach_network_interface(attachment_id).await;
                    }
                    if let Err(e) = self
                        .ec2
                        .delete_network_interface(&eni.network_interface_id)
                        .await
                    {
                        errors.push(format!(
                            "Network interface {} deletion failed: {e}",
                            eni.network_interface_id
                        ));
                    }
                }
            }
            Err(e) => errors.push(format!("Describe network interfaces failed: {e}")),
        }

        match self.ec2.internet_gateways_for_vpc(vpc_id).await {
            Ok(igws) => {
                for igw_id in igws {
                    if let Err(e) = self.ec2.detach_internet_gateway(&igw_id, vpc_id).await {
                        warn!(igw_id, error = %e, "internet gateway detach failed");
                    }
                    if let Err(e) = self.ec2.delete_internet_gateway(&igw_id).await {
                        errors.push(format!("Internet gateway {igw_id} deletion failed: {e}"));
                    }
                }
            }
            Err(e) => errors.push(format!("Describe internet gateways failed: {e}")),
        }

        match self.ec2.describe_route_tables(vpc_id).await {
            Ok(tables) => {
                for table in tables {
                    if table.is_main {
                        continue;
                    }
                    if let Err(e) = self.ec2.delete_route_table(&table.route_table_id).await {
                        errors.push(format!(
                            "Route table {} deletion failed: {e}",
                            table.route_table_id
                        ));
                    }
                }
            }
            Err(e) => errors.push(format!("Describe route tables failed: {e}")),
        }
    }
}
