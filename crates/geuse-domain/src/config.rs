use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Enums ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Dev,
    Automation,
    Gpu,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Dev => write!(f, "dev"),
            Tier::Automation => write!(f, "automation"),
            Tier::Gpu => write!(f, "gpu"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Tier::Dev),
            "automation" => Ok(Tier::Automation),
            "gpu" => Ok(Tier::Gpu),
            other => Err(DomainError::InvalidConfig(format!(
                "tier must be one of dev, automation, gpu; got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    #[serde(rename = "amazon-linux-2023")]
    AmazonLinux2023,
    #[serde(rename = "ubuntu-22.04")]
    Ubuntu2204,
    #[serde(rename = "ubuntu-24.04")]
    Ubuntu2404,
    #[serde(rename = "amazon-linux-2")]
    AmazonLinux2,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsType::AmazonLinux2023 => write!(f, "amazon-linux-2023"),
            OsType::Ubuntu2204 => write!(f, "ubuntu-22.04"),
            OsType::Ubuntu2404 => write!(f, "ubuntu-24.04"),
            OsType::AmazonLinux2 => write!(f, "amazon-linux-2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    /// The value the EC2 API expects in `architecture` filters.
    pub fn as_ec2_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ec2_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmiVariant {
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "pytorch")]
    Pytorch,
    #[serde(rename = "tensorflow")]
    Tensorflow,
    #[serde(rename = "multi-framework")]
    MultiFramework,
}

impl std::fmt::Display for AmiVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmiVariant::Base => write!(f, "base"),
            AmiVariant::Pytorch => write!(f, "pytorch"),
            AmiVariant::Tensorflow => write!(f, "tensorflow"),
            AmiVariant::MultiFramework => write!(f, "multi-framework"),
        }
    }
}

// ── DeploymentConfig ──────────────────────────────────────────────────────────

/// Immutable configuration for a deployment. Construct with [`DeploymentConfig::new`]
/// (which validates) or deserialize and call [`DeploymentConfig::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Identifier for the deployment; used for tagging and state files.
    pub stack_name: String,
    pub tier: Tier,
    #[serde(default = "default_region")]
    pub region: String,

    // Instance configuration
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_true")]
    pub use_spot: bool,
    /// Monthly budget limit in USD; optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<Decimal>,
    #[serde(default = "default_os_type")]
    pub os_type: OsType,
    #[serde(default = "default_architecture")]
    pub architecture: Architecture,
    #[serde(default = "default_ami_variant")]
    pub ami_type: AmiVariant,
    /// Custom AMI id. Overrides os_type, architecture, and ami_type selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_id: Option<String>,

    // Networking (None = auto-discover or create)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_subnet_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_subnet_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    /// Existing EFS filesystem id to reuse; None creates a new filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efs_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair_name: Option<String>,
    /// When reusing a VPC, allow attaching an internet gateway and creating
    /// public routes.
    #[serde(default)]
    pub attach_internet_gateway: bool,

    // Provisioning optimisations
    #[serde(default)]
    pub use_runtime_bundle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_bundle_path: Option<String>,

    // Optional features
    #[serde(default)]
    pub enable_alb: bool,
    #[serde(default)]
    pub enable_cdn: bool,

    // HTTPS/TLS
    #[serde(default = "default_true")]
    pub enable_https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alb_certificate_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudfront_certificate_arn: Option<String>,
    #[serde(default = "default_true")]
    pub force_https_redirect: bool,

    // Rollback settings
    #[serde(default = "default_true")]
    pub auto_rollback_on_failure: bool,
    #[serde(default = "default_rollback_timeout")]
    pub rollback_timeout_minutes: u32,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_instance_type() -> String {
    "t3.medium".into()
}

fn default_true() -> bool {
    true
}

fn default_os_type() -> OsType {
    OsType::Ubuntu2204
}

fn default_architecture() -> Architecture {
    Architecture::X86_64
}

fn default_ami_variant() -> AmiVariant {
    AmiVariant::Base
}

fn default_rollback_timeout() -> u32 {
    15
}

impl DeploymentConfig {
    /// Minimal valid config with everything else defaulted.
    pub fn new(
        stack_name: impl Into<String>,
        tier: Tier,
        region: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let config = Self {
            stack_name: stack_name.into(),
            tier,
            region: region.into(),
            instance_type: default_instance_type(),
            use_spot: true,
            budget_limit: None,
            os_type: default_os_type(),
            architecture: default_architecture(),
            ami_type: default_ami_variant(),
            ami_id: None,
            vpc_id: None,
            subnet_id: None,
            public_subnet_ids: None,
            private_subnet_ids: None,
            storage_subnet_id: None,
            security_group_id: None,
            efs_id: None,
            keypair_name: None,
            attach_internet_gateway: false,
            use_runtime_bundle: false,
            runtime_bundle_path: None,
            enable_alb: false,
            enable_cdn: false,
            enable_https: true,
            alb_certificate_arn: None,
            cloudfront_certificate_arn: None,
            force_https_redirect: true,
            auto_rollback_on_failure: true,
            rollback_timeout_minutes: default_rollback_timeout(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !is_valid_stack_name(&self.stack_name) {
            return Err(DomainError::InvalidStackName(self.stack_name.clone()));
        }
        if !is_valid_region(&self.region) {
            return Err(DomainError::InvalidRegion(self.region.clone()));
        }
        if !(5..=60).contains(&self.rollback_timeout_minutes) {
            return Err(DomainError::InvalidRollbackTimeout(
                self.rollback_timeout_minutes,
            ));
        }
        Ok(())
    }
}

/// Stack names start with a letter, contain only letters, digits, and dashes,
/// and are at most 128 characters.
pub fn is_valid_stack_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 128 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Region codes look like `us-east-1`: two lowercase letters, a lowercase word,
/// and a single digit, dash-separated.
pub fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() != 3 {
        return false;
    }
    let [prefix, middle, digit] = [parts[0], parts[1], parts[2]];
    prefix.len() == 2
        && prefix.chars().all(|c| c.is_ascii_lowercase())
        && !middle.is_empty()
        && middle.chars().all(|c| c.is_ascii_lowercase())
        && digit.len() == 1
        && digit.chars().all(|c| c.is_ascii_digit())
}
