//! Elastic filesystem operations (REST-JSON protocol).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::AwsClient;
use crate::error::AwsError;
use crate::types::{FileSystemInfo, MountTargetInfo};

const API: &str = "/2015-02-01";
const SERVICE: &str = "elasticfilesystem";

const WAIT_MAX_ATTEMPTS: u32 = 60;
const WAIT_DELAY: Duration = Duration::from_secs(5);

pub struct EfsService {
    client: Arc<AwsClient>,
}

impl EfsService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn call(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<&Value>,
    ) -> Result<Value, AwsError> {
        let base = self.client.base().efs.clone();
        let region = self.client.region().to_string();
        self.client
            .rest_json(method, &base, SERVICE, &region, path_and_query, body)
            .await
    }

    /// Create an encrypted general-purpose filesystem in bursting mode.
    pub async fn create_file_system(
        &self,
        creation_token: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(creation_token, "creating filesystem");
        let tag_values: Vec<Value> = tags
            .iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect();
        let body = json!({
            "CreationToken": creation_token,
            "PerformanceMode": "generalPurpose",
            "ThroughputMode": "bursting",
            "Encrypted": true,
            "Tags": tag_values,
        });
        let resp = self
            .call("POST", &format!("{API}/file-systems"), Some(&body))
            .await?;
        resp["FileSystemId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AwsError::missing_field(SERVICE, "FileSystemId"))
    }

    pub async fn describe_file_system(&self, fs_id: &str) -> Result<FileSystemInfo, AwsError> {
        let resp = self
            .call(
                "GET",
                &format!("{API}/file-systems?FileSystemId={fs_id}"),
                None,
            )
            .await?;
        parse_file_systems(&resp)
            .into_iter()
            .next()
            .ok_or_else(|| AwsError::api(SERVICE, "FileSystemNotFound", fs_id.to_string()))
    }

    /// All filesystems in the region, with tags (orphan scan).
    pub async fn describe_file_systems(&self) -> Result<Vec<FileSystemInfo>, AwsError> {
        let resp = self.call("GET", &format!("{API}/file-systems"), None).await?;
        Ok(parse_file_systems(&resp))
    }

    pub async fn wait_for_available(&self, fs_id: &str) -> Result<(), AwsError> {
        for attempt in 1..=WAIT_MAX_ATTEMPTS {
            let info = self.describe_file_system(fs_id).await?;
            if info.life_cycle_state == "available" {
                return Ok(());
            }
            debug!(fs_id, state = %info.life_cycle_state, attempt, "waiting for filesystem");
            tokio::time::sleep(WAIT_DELAY).await;
        }
        Err(AwsError::WaitTimeout {
            resource: fs_id.to_string(),
            target: "available",
            attempts: WAIT_MAX_ATTEMPTS,
        })
    }

    pub async fn delete_file_system(&self, fs_id: &str) -> Result<(), AwsError> {
        info!(fs_id, "deleting filesystem");
        self.call("DELETE", &format!("{API}/file-systems/{fs_id}"), None)
            .await
            .map(|_| ())
    }

    // ── Mount targets ─────────────────────────────────────────────────────────

    pub async fn create_mount_target(
        &self,
        fs_id: &str,
        subnet_id: &str,
        security_groups: &[String],
    ) -> Result<String, AwsError> {
        info!(fs_id, subnet_id, "creating mount target");
        let body = json!({
            "FileSystemId": fs_id,
            "SubnetId": subnet_id,
            "SecurityGroups": security_groups,
        });
        let resp = self
            .call("POST", &format!("{API}/mount-targets"), Some(&body))
            .await?;
        resp["MountTargetId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AwsError::missing_field(SERVICE, "MountTargetId"))
    }

    pub async fn describe_mount_target(
        &self,
        mount_target_id: &str,
    ) -> Result<MountTargetInfo, AwsError> {
        let resp = self
            .call(
                "GET",
                &format!("{API}/mount-targets?MountTargetId={mount_target_id}"),
                None,
            )
            .await?;
        parse_mount_targets(&resp)
            .into_iter()
            .next()
            .ok_or_else(|| {
                AwsError::api(SERVICE, "MountTargetNotFound", mount_target_id.to_string())
            })
    }

    pub async fn list_mount_targets(&self, fs_id: &str) -> Result<Vec<MountTargetInfo>, AwsError> {
        let resp = self
            .call(
                "GET",
                &format!("{API}/mount-targets?FileSystemId={fs_id}"),
                None,
            )
            .await?;
        Ok(parse_mount_targets(&resp))
    }

    pub async fn wait_for_mount_target_available(
        &self,
        mount_target_id: &str,
    ) -> Result<(), AwsError> {
        for attempt in 1..=WAIT_MAX_ATTEMPTS {
            let info = self.describe_mount_target(mount_target_id).await?;
            if info.life_cycle_state == "available" {
                return Ok(());
            }
            debug!(mount_target_id, state = %info.life_cycle_state, attempt, "waiting for mount target");
            tokio::time::sleep(WAIT_DELAY).await;
        }
        Err(AwsError::WaitTimeout {
            resource: mount_target_id.to_string(),
            target: "available",
            attempts: WAIT_MAX_ATTEMPTS,
        })
    }

    pub async fn mount_target_ip(&self, mount_target_id: &str) -> Result<String, AwsError> {
        let info = self.describe_mount_target(mount_target_id).await?;
        info.ip_address
            .ok_or_else(|| AwsError::missing_field(SERVICE, "IpAddress"))
    }

    pub async fn delete_mount_target(&self, mount_target_id: &str) -> Result<(), AwsError> {
        info!(mount_target_id, "deleting mount target");
        self.call(
            "DELETE",
            &format!("{API}/mount-targets/{mount_target_id}"),
            None,
        )
        .await
        .map(|_| ())
    }

    /// Deleted means the describe starts failing with MountTargetNotFound.
    pub async fn wait_for_mount_target_deleted(
        &self,
        mount_target_id: &str,
    ) -> Result<(), AwsError> {
        for attempt in 1..=WAIT_MAX_ATTEMPTS {
            match self.describe_mount_target(mount_target_id).await {
                Err(e) if e.is_code("MountTargetNotFound") => return Ok(()),
                Err(e) => return Err(e),
                Ok(info) => {
                    debug!(mount_target_id, state = %info.life_cycle_state, attempt, "waiting for mount target deletion");
                }
            }
            tokio::time::sleep(WAIT_DELAY).await;
        }
        Err(AwsError::WaitTimeout {
            resource: mount_target_id.to_string(),
            target: "deleted",
            attempts: WAIT_MAX_ATTEMPTS,
        })
    }
}

fn parse_file_systems(resp: &Value) -> Vec<FileSystemInfo> {
    let empty = vec![];
    resp["FileSystems"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|fs| {
            let file_system_id = fs["FileSystemId"].as_str()?.to_string();
            let mut tags = BTreeMap::new();
            if let Some(items) = fs["Tags"].as_array() {
                for t in items {
                    if let (Some(k), Some(v)) = (t["Key"].as_str(), t["Value"].as_str()) {
                        tags.insert(k.to_string(), v.to_string());
                    }
                }
            }
            let creation_time = fs["CreationTime"]
                .as_f64()
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());
            Some(FileSystemInfo {
                file_system_id,
                life_cycle_state: fs["LifeCycleState"].as_str().unwrap_or("").to_string(),
                creation_time,
                tags,
            })
        })
        .collect()
}

fn parse_mount_targets(resp: &Value) -> Vec<MountTargetInfo> {
    let empty = vec![];
    resp["MountTargets"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|mt| {
            Some(MountTargetInfo {
                mount_target_id: mt["MountTargetId"].as_str()?.to_string(),
                file_system_id: mt["FileSystemId"].as_str().unwrap_or("").to_string(),
                subnet_id: mt["SubnetId"].as_str().unwrap_or("").to_string(),
                life_cycle_state: mt["LifeCycleState"].as_str().unwrap_or("").to_string(),
                ip_address: mt["IpAddress"].as_str().map(str::to_string),
            })
        })
        .collect()
}
