//! Result and request shapes for destruction, cleanup, update, and rollback.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Destruction ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedResource {
    pub resource_type: String,
    pub resource_id: String,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedResource {
    pub fn now(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            deleted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreservedResource {
    pub resource_type: String,
    pub resource_id: String,
    pub reason: String,
}

impl PreservedResource {
    pub fn reused(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            reason: "reused".into(),
        }
    }
}

/// Outcome of destroying a deployment. `success` iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestructionResult {
    pub success: bool,
    #[serde(default)]
    pub deleted_resources: Vec<DeletedResource>,
    #[serde(default)]
    pub preserved_resources: Vec<PreservedResource>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_state_path: Option<String>,
}

// ── Cleanup ───────────────────────────────────────────────────────────────────

/// Provider resource tagged for this tool but with no active local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedResource {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub region: String,
    pub deployment_tag: String,
    pub created_at: DateTime<Utc>,
    pub age_days: i64,
    pub estimated_monthly_cost: Decimal,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Summary of a cleanup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub scanned_regions: Vec<String>,
    pub orphans_found: usize,
    pub orphans_deleted: usize,
    pub orphans_preserved: usize,
    pub estimated_monthly_savings: Decimal,
    #[serde(default)]
    pub deleted_resources: Vec<DeletedResource>,
    #[serde(default)]
    pub errors: Vec<String>,
}

// ── Update ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub deployment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub container_images: BTreeMap<String, String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub success: bool,
    #[serde(default)]
    pub changes_applied: Vec<String>,
    pub duration_seconds: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ── Rollback ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub trigger: String,
    #[serde(default)]
    pub changes_reverted: Vec<String>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
