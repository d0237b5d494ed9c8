//! Orphan detection: provider resources tagged for this tool with no active
//! local record.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use geuse_aws::tags::{DEPLOYMENT_TAG_KEY, STACK_TAG_KEY};
use geuse_aws::{AwsClient, Ec2Service, EfsService, SecurityGroupService};
use geuse_domain::{CleanupReport, DeletedResource, OrphanedResource};
use geuse_store::StateStore;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::DeployError;

/// Fixed monthly cost estimates per resource kind.
fn estimated_monthly_cost(resource_type: &str) -> Decimal {
    match resource_type {
        "ec2" => Decimal::new(2500, 2),
        "efs" => Decimal::new(500, 2),
        _ => Decimal::ZERO,
    }
}

pub struct OrphanDetector {
    region: String,
    ec2: Ec2Service,
    efs: EfsService,
    sg: SecurityGroupService,
    store: StateStore,
}

impl OrphanDetector {
    pub fn new(client: Arc<AwsClient>, store: StateStore) -> Self {
        Self {
            region: client.region().to_string(),
            ec2: Ec2Service::new(client.clone()),
            efs: EfsService::new(client.clone()),
            sg: SecurityGroupService::new(client),
            store,
        }
    }

    /// Cross-reference tagged resources with the set of active stacks.
    pub async fn detect_orphans(&self) -> Result<Vec<OrphanedResource>, DeployError> {
        let active: std::collections::BTreeSet<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|s| s.stack_name)
            .collect();
        let tag_keys = [DEPLOYMENT_TAG_KEY, STACK_TAG_KEY];
        let mut orphans: Vec<OrphanedResource> = Vec::new();
        let now = Utc::now();

        for instance in self.ec2.describe_instances_by_tag_keys(&tag_keys).await? {
            let Some(deployment) = deployment_tag(&instance.tags) else {
                continue;
            };
            if active.contains(&deployment) {
                continue;
            }
            let created_at = instance.launch_time.unwrap_or(now);
            orphans.push(OrphanedResource {
                resource_type: "ec2".into(),
                resource_id: instance.instance_id,
                name: instance.tags.get("Name").cloned(),
                region: self.region.clone(),
                deployment_tag: deployment,
                created_at,
                age_days: (now - created_at).num_days().max(0),
                estimated_monthly_cost: estimated_monthly_cost("ec2"),
                tags: instance.tags,
            });
        }

        for fs in self.efs.describe_file_systems().await? {
            let Some(deployment) = deployment_tag(&fs.tags) else {
                continue;
            };
            if active.contains(&deployment) {
                continue;
            }
            let created_at = fs.creation_time.unwrap_or(now);
            orphans.push(OrphanedResource {
                resource_type: "efs".into(),
                resource_id: fs.file_system_id,
                name: fs.tags.get("Name").cloned(),
                region: self.region.clone(),
                deployment_tag: deployment,
                created_at,
                age_days: (now - created_at).num_days().max(0),
                estimated_monthly_cost: estimated_monthly_cost("efs"),
                tags: fs.tags,
            });
        }

        for vpc in self.ec2.describe_vpcs_by_tag_keys(&tag_keys).await? {
            let Some(deployment) = deployment_tag(&vpc.tags) else {
                continue;
            };
            if active.contains(&deployment) {
                continue;
            }
            orphans.push(OrphanedResource {
                resource_type: "vpc".into(),
                resource_id: vpc.vpc_id,
                name: vpc.tags.get("Name").cloned(),
                region: self.region.clone(),
                deployment_tag: deployment,
                created_at: now,
                age_days: 0,
                estimated_monthly_cost: estimated_monthly_cost("vpc"),
                tags: vpc.tags,
            });
        }

        for group in self.sg.describe_by_tag_keys(&tag_keys).await? {
            let Some(deployment) = deployment_tag(&group.tags) else {
                continue;
            };
            if active.contains(&deployment) {
                continue;
            }
            orphans.push(OrphanedResource {
                resource_type: "security_group".into(),
                resource_id: group.group_id,
                name: Some(group.group_name),
                region: self.region.clone(),
                deployment_tag: deployment,
                created_at: now,
                age_days: 0,
                estimated_monthly_cost: estimated_monthly_cost("security_group"),
                tags: group.tags,
            });
        }

        info!(count = orphans.len(), region = %self.region, "orphan scan complete");
        Ok(orphans)
    }

    /// Best-effort deletion, one resource at a time; errors are collected.
    pub async fn delete_orphans(
        &self,
        orphans: &[OrphanedResource],
        dry_run: bool,
    ) -> (Vec<DeletedResource>, Vec<String>) {
        let mut deleted: Vec<DeletedResource> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for orphan in orphans {
            if dry_run {
                continue;
            }
            let result = match orphan.resource_type.as_str() {
                "ec2" => self.ec2.terminate_instance(&orphan.resource_id).await,
                "efs" => self.efs.delete_file_system(&orphan.resource_id).await,
                "vpc" => self.ec2.delete_vpc(&orphan.resource_id).await,
                "security_group" => self.sg.delete_security_group(&orphan.resource_id).await,
                other => {
                    warn!(resource_type = other, "unknown orphan type, skipping");
                    continue;
                }
            };
            match result {
                Ok(()) => deleted.push(DeletedResource::now(
                    &orphan.resource_type,
                    &orphan.resource_id,
                )),
                Err(e) => errors.push(format!(
                    "Failed to delete {} {}: {e}",
                    orphan.resource_type, orphan.resource_id
                )),
            }
        }
        (deleted, errors)
    }

    pub fn build_report(
        &self,
        orphans: &[OrphanedResource],
        deleted: Vec<DeletedResource>,
        errors: Vec<String>,
        dry_run: bool,
    ) -> CleanupReport {
        let orphans_deleted = if dry_run { 0 } else { deleted.len() };
        let mut savings = Decimal::ZERO;
        if !dry_run {
            for orphan in orphans {
                if deleted.iter().any(|d| d.resource_id == orphan.resource_id) {
                    savings += orphan.estimated_monthly_cost;
                }
            }
        }
        CleanupReport {
            scanned_regions: vec![self.region.clone()],
            orphans_found: orphans.len(),
            orphans_deleted,
            orphans_preserved: orphans.len() - orphans_deleted,
            estimated_monthly_savings: savings,
            deleted_resources: deleted,
            errors,
        }
    }
}

fn deployment_tag(tags: &BTreeMap<String, String>) -> Option<String> {
    tags.get(DEPLOYMENT_TAG_KEY)
        .or_else(|| tags.get(STACK_TAG_KEY))
        .cloned()
        .filter(|t| !t.is_empty())
}
