use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DeploymentConfig;
use crate::error::DomainError;

/// Schema version stamped on every state file written by this build.
/// Older versions are migrated forward on read; newer versions are rejected.
pub const STATE_SCHEMA_VERSION: u32 = 2;

/// Previous-state snapshots retained for rollback (ring, newest first).
pub const PREVIOUS_STATES_CAP: usize = 5;

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// Deployment lifecycle.
///
/// Transitions:
///   Creating → Running ↔ Updating
///   Running → RollingBack → Running
///   Running | Failed → Destroying → Terminated
///   Creating → Failed (cleanup declined)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Creating,
    Running,
    Updating,
    RollingBack,
    Destroying,
    Failed,
    Terminated,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Creating => "creating",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Updating => "updating",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::Destroying => "destroying",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(DeploymentStatus::Creating),
            "running" => Ok(DeploymentStatus::Running),
            "updating" => Ok(DeploymentStatus::Updating),
            "rolling_back" => Ok(DeploymentStatus::RollingBack),
            "destroying" => Ok(DeploymentStatus::Destroying),
            "failed" => Ok(DeploymentStatus::Failed),
            "terminated" => Ok(DeploymentStatus::Terminated),
            other => Err(DomainError::InvalidConfig(format!(
                "unknown deployment status '{other}'"
            ))),
        }
    }
}

// ── Provenance ────────────────────────────────────────────────────────────────

/// How a recorded resource came to be associated with this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Created,
    Reused,
    AutoDiscovered,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnets,
    SecurityGroup,
    Efs,
    EfsMountTarget,
    IamRole,
    IamInstanceProfile,
    Instance,
    KeyPair,
    Alb,
    TargetGroup,
    Listener,
    HttpsListener,
    Cloudfront,
}

/// Closed per-kind provenance map. Reused resources must never enter the
/// destroy path's deletion set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceProvenance(pub BTreeMap<ResourceKind, Provenance>);

impl ResourceProvenance {
    pub fn set(&mut self, kind: ResourceKind, provenance: Provenance) {
        self.0.insert(kind, provenance);
    }

    pub fn with(mut self, kind: ResourceKind, provenance: Provenance) -> Self {
        self.set(kind, provenance);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Provenance> {
        self.0.get(&kind).copied()
    }

    pub fn is_reused(&self, kind: ResourceKind) -> bool {
        self.get(kind) == Some(Provenance::Reused)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Cost tracking ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTracking {
    pub instance_type: String,
    pub is_spot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price_per_hour: Option<Decimal>,
    pub on_demand_price_per_hour: Decimal,
    #[serde(default = "default_efs_gb_month")]
    pub efs_gb_month_price: Decimal,
    pub estimated_monthly_cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_runtime_hours: f64,
}

fn default_efs_gb_month() -> Decimal {
    Decimal::new(30, 2)
}

/// Hours in a billing month, the figure AWS cost examples use.
pub const HOURS_PER_MONTH: u32 = 730;

impl CostTracking {
    pub fn from_selection(
        instance_type: impl Into<String>,
        is_spot: bool,
        hourly: Decimal,
        on_demand_hourly: Decimal,
        budget_limit: Option<Decimal>,
    ) -> Self {
        Self {
            instance_type: instance_type.into(),
            is_spot,
            spot_price_per_hour: is_spot.then_some(hourly),
            on_demand_price_per_hour: on_demand_hourly,
            efs_gb_month_price: default_efs_gb_month(),
            estimated_monthly_cost: hourly * Decimal::from(HOURS_PER_MONTH),
            budget_limit,
            instance_start_time: None,
            total_runtime_hours: 0.0,
        }
    }
}

// ── Rollback records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    Manual,
    HealthCheckFailed,
    Timeout,
    SpotInterruption,
}

impl std::fmt::Display for RollbackTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollbackTrigger::Manual => "manual",
            RollbackTrigger::HealthCheckFailed => "health_check_failed",
            RollbackTrigger::Timeout => "timeout",
            RollbackTrigger::SpotInterruption => "spot_interruption",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub timestamp: DateTime<Utc>,
    pub trigger: RollbackTrigger,
    #[serde(default)]
    pub resources_deleted: Vec<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state_version: Option<u32>,
    #[serde(default)]
    pub rolled_back_changes: Vec<String>,
}

// ── DeploymentState ───────────────────────────────────────────────────────────

/// Mutable record of a deployment, one JSON file per stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub stack_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DeploymentStatus,

    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub security_group_id: String,
    pub efs_id: String,
    pub efs_mount_target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efs_mount_target_ip: Option<String>,
    pub instance_id: String,
    #[serde(default)]
    pub keypair_name: String,

    // IAM resources (required for EFS mount with IAM authentication)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_role_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile_arn: Option<String>,

    // Optional resources (Tier 2/3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alb_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alb_dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudfront_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudfront_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_subnet_id: Option<String>,

    // Access info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub n8n_url: String,

    // HTTPS/TLS state
    #[serde(default)]
    pub https_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
    #[serde(default)]
    pub nginx_proxy_enabled: bool,

    #[serde(default)]
    pub rollback_history: Vec<RollbackRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_healthy_state: Option<Value>,
    /// Bounded ring of prior snapshots, index 0 = most recent.
    #[serde(default)]
    pub previous_states: Vec<Value>,
    #[serde(default)]
    pub container_images: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_provenance: ResourceProvenance,
    #[serde(default)]
    pub migration_history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,

    pub cost: CostTracking,
    pub config: DeploymentConfig,
}

fn default_schema_version() -> u32 {
    1
}

impl DeploymentState {
    /// Empty-but-valid-shape record for a config; resource ids are filled in
    /// by the provisioning pipeline before the first save.
    pub fn new(config: DeploymentConfig, cost: CostTracking, status: DeploymentStatus) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            stack_name: config.stack_name.clone(),
            created_at: now,
            updated_at: now,
            status,
            vpc_id: String::new(),
            subnet_ids: Vec::new(),
            security_group_id: String::new(),
            efs_id: String::new(),
            efs_mount_target_id: String::new(),
            efs_mount_target_ip: None,
            instance_id: String::new(),
            keypair_name: config.keypair_name.clone().unwrap_or_default(),
            iam_role_name: None,
            iam_role_arn: None,
            iam_instance_profile_name: None,
            iam_instance_profile_arn: None,
            alb_arn: None,
            alb_dns: None,
            target_group_arn: None,
            cloudfront_id: None,
            cloudfront_domain: None,
            storage_subnet_id: None,
            public_ip: None,
            private_ip: String::new(),
            n8n_url: String::new(),
            https_enabled: false,
            https_endpoint: None,
            certificate_arn: None,
            nginx_proxy_enabled: false,
            rollback_history: Vec::new(),
            last_healthy_state: None,
            previous_states: Vec::new(),
            container_images: BTreeMap::new(),
            resource_provenance: ResourceProvenance::default(),
            migration_history: Vec::new(),
            terminated_at: None,
            cost,
            config,
        }
    }

    /// Host to reach the deployment: public IP when present, else private.
    pub fn host(&self) -> Option<&str> {
        if let Some(ip) = self.public_ip.as_deref() {
            if !ip.is_empty() {
                return Some(ip);
            }
        }
        if self.private_ip.is_empty() {
            None
        } else {
            Some(&self.private_ip)
        }
    }

    /// Push a snapshot onto the previous-states ring, newest first, capped.
    pub fn push_previous(&mut self, snapshot: Value) {
        self.previous_states.insert(0, snapshot);
        self.previous_states.truncate(PREVIOUS_STATES_CAP);
    }

    /// Integrity checks beyond what serde enforces. Terminated states are
    /// archived snapshots and are exempt.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.status == DeploymentStatus::Terminated {
            return Ok(());
        }

        let mut missing: Vec<&str> = Vec::new();
        if self.stack_name.is_empty() {
            missing.push("stack_name");
        }
        if self.vpc_id.is_empty() {
            missing.push("vpc_id");
        }
        if self.subnet_ids.is_empty() {
            missing.push("subnet_ids");
        }
        if self.security_group_id.is_empty() {
            missing.push("security_group_id");
        }
        if self.efs_id.is_empty() {
            missing.push("efs_id");
        }

        // instance_id may be empty only while the checkpoint says the
        // instance is still pending.
        let instance_pending = self.status == DeploymentStatus::Creating
            && self.resource_provenance.get(ResourceKind::Instance) == Some(Provenance::Pending);
        if self.instance_id.is_empty() && !instance_pending {
            missing.push("instance_id");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::MissingRequiredFields(missing.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;

    pub(crate) fn dummy_state(stack: &str) -> DeploymentState {
        let config = DeploymentConfig::new(stack, Tier::Dev, "us-east-1").unwrap();
        let now = Utc::now();
        DeploymentState {
            schema_version: STATE_SCHEMA_VERSION,
            stack_name: stack.to_string(),
            created_at: now,
            updated_at: now,
            status: DeploymentStatus::Running,
            vpc_id: "vpc-123".into(),
            subnet_ids: vec!["subnet-1".into(), "subnet-2".into()],
            security_group_id: "sg-123".into(),
            efs_id: "fs-123".into(),
            efs_mount_target_id: "fsmt-123".into(),
            efs_mount_target_ip: Some("10.0.1.5".into()),
            instance_id: "i-123".into(),
            keypair_name: String::new(),
            iam_role_name: None,
            iam_role_arn: None,
            iam_instance_profile_name: None,
            iam_instance_profile_arn: None,
            alb_arn: None,
            alb_dns: None,
            target_group_arn: None,
            cloudfront_id: None,
            cloudfront_domain: None,
            storage_subnet_id: None,
            public_ip: Some("1.2.3.4".into()),
            private_ip: "10.0.1.10".into(),
            n8n_url: "https://1.2.3.4".into(),
            https_enabled: true,
            https_endpoint: None,
            certificate_arn: None,
            nginx_proxy_enabled: false,
            rollback_history: vec![],
            last_healthy_state: None,
            previous_states: vec![],
            container_images: BTreeMap::new(),
            resource_provenance: ResourceProvenance::default(),
            migration_history: vec![],
            terminated_at: None,
            cost: CostTracking::from_selection(
                "t3.medium",
                false,
                Decimal::new(416, 4),
                Decimal::new(416, 4),
                None,
            ),
            config,
        }
    }

    #[test]
    fn validate_accepts_complete_state() {
        assert!(dummy_state("demo").validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_instance_when_not_pending() {
        let mut state = dummy_state("demo");
        state.instance_id = String::new();
        assert!(state.validate().is_err());
    }

    #[test]
    fn validate_allows_pending_instance_while_creating() {
        let mut state = dummy_state("demo");
        state.instance_id = String::new();
        state.status = DeploymentStatus::Creating;
        state
            .resource_provenance
            .set(ResourceKind::Instance, Provenance::Pending);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn previous_states_ring_caps_at_five() {
        let mut state = dummy_state("demo");
        for i in 0..7 {
            state.push_previous(serde_json::json!({ "n": i }));
        }
        assert_eq!(state.previous_states.len(), PREVIOUS_STATES_CAP);
        // Index 0 is the most recent snapshot.
        assert_eq!(state.previous_states[0]["n"], 6);
        assert_eq!(state.previous_states[4]["n"], 2);
    }

    #[test]
    fn provenance_round_trips_as_snake_case() {
        let prov = ResourceProvenance::default()
            .with(ResourceKind::Vpc, Provenance::Created)
            .with(ResourceKind::SecurityGroup, Provenance::Reused)
            .with(ResourceKind::Instance, Provenance::Pending);
        let json = serde_json::to_string(&prov).unwrap();
        assert!(json.contains("\"security_group\":\"reused\""));
        let back: ResourceProvenance = serde_json::from_str(&json).unwrap();
        assert_eq!(prov, back);
    }

    #[test]
    fn state_round_trips_through_json() {
        let state = dummy_state("roundtrip");
        let json = serde_json::to_string(&state).unwrap();
        let back: DeploymentState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
