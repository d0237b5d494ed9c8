use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "geusemaker",
    about = "Deploy and operate a reproducible AI service stack on AWS",
    version
)]
pub struct Cli {
    /// Output format for command results.
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// State directory (default: ~/.geusemaker).
    #[arg(long, global = true, env = "GEUSEMAKER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Show verbose/debug output.
    #[arg(short = 'v', long, global = true, conflicts_with = "silent")]
    pub verbose: bool,

    /// Suppress non-error output.
    #[arg(long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum TierArg {
    Dev,
    Automation,
    Gpu,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OsTypeArg {
    #[value(name = "amazon-linux-2023")]
    AmazonLinux2023,
    #[value(name = "ubuntu-22.04")]
    Ubuntu2204,
    #[value(name = "ubuntu-24.04")]
    Ubuntu2404,
    #[value(name = "amazon-linux-2")]
    AmazonLinux2,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ArchitectureArg {
    #[value(name = "x86_64")]
    X86_64,
    Arm64,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum AmiTypeArg {
    Base,
    Pytorch,
    Tensorflow,
    #[value(name = "multi-framework")]
    MultiFramework,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevelArg {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[arg(long)]
    pub stack_name: String,

    #[arg(long, value_enum)]
    pub tier: TierArg,

    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    #[arg(long)]
    pub instance_type: Option<String>,

    /// Prefer spot capacity (default).
    #[arg(long, overrides_with = "no_spot")]
    pub use_spot: bool,

    /// Launch on-demand instead of spot.
    #[arg(long)]
    pub no_spot: bool,

    #[arg(long, value_enum)]
    pub os_type: Option<OsTypeArg>,

    #[arg(long, value_enum)]
    pub architecture: Option<ArchitectureArg>,

    #[arg(long, value_enum)]
    pub ami_type: Option<AmiTypeArg>,

    /// Explicit image id; overrides os-type/architecture/ami-type selection.
    #[arg(long)]
    pub ami_id: Option<String>,

    // Pre-existing network references.
    #[arg(long)]
    pub vpc_id: Option<String>,
    #[arg(long)]
    pub subnet_id: Option<String>,
    #[arg(long)]
    pub storage_subnet_id: Option<String>,
    #[arg(long)]
    pub security_group_id: Option<String>,
    #[arg(long)]
    pub efs_id: Option<String>,
    #[arg(long)]
    pub keypair_name: Option<String>,

    #[arg(long)]
    pub enable_alb: bool,
    #[arg(long)]
    pub enable_cdn: bool,
    #[arg(long)]
    pub alb_certificate_arn: Option<String>,
    #[arg(long)]
    pub cloudfront_certificate_arn: Option<String>,

    /// Disable HTTPS for the deployment.
    #[arg(long)]
    pub no_https: bool,
    /// Keep plain HTTP alongside HTTPS instead of redirecting.
    #[arg(long)]
    pub no_https_redirect: bool,

    /// When reusing a network, attach an internet gateway and create public
    /// routes.
    #[arg(long)]
    pub attach_internet_gateway: bool,

    /// Skip pre-deployment validation.
    #[arg(long)]
    pub skip_validation: bool,

    /// Do not clean up automatically when provisioning fails.
    #[arg(long)]
    pub no_rollback: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long)]
    pub stack_name: String,
    #[arg(long, value_enum, default_value = "dev")]
    pub tier: TierArg,
    #[arg(long, default_value = "us-east-1")]
    pub region: String,
    #[arg(long)]
    pub instance_type: Option<String>,
    #[arg(long, overrides_with = "no_spot")]
    pub use_spot: bool,
    #[arg(long)]
    pub no_spot: bool,
    #[arg(long)]
    pub vpc_id: Option<String>,
    #[arg(long)]
    pub security_group_id: Option<String>,
    #[arg(long)]
    pub attach_internet_gateway: bool,
}

#[derive(Debug, Subcommand)]
pub enum MonitorCommand {
    /// Start the monitoring loop for a deployment.
    Start {
        stack: String,
        /// Override the probed host (default: the recorded public/private IP).
        #[arg(long)]
        host: Option<String>,
        /// Seconds between probe sets.
        #[arg(long, default_value_t = 60)]
        interval: u64,
        /// Stop after N iterations (default: run until stopped).
        #[arg(long)]
        checks: Option<u64>,
        /// Detach and keep monitoring in the background.
        #[arg(long)]
        background: bool,
        /// Directory for monitor logs (default: <state-dir>/logs).
        #[arg(long)]
        log_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "info")]
        log_level: LogLevelArg,
        #[arg(long, overrides_with = "skip_postgres")]
        include_postgres: bool,
        #[arg(long)]
        skip_postgres: bool,
    },
    /// Stop a background monitor.
    Stop { stack: String },
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Create a compressed backup of a deployment record.
    Create {
        stack: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// List available backups, newest first.
    List { stack: Option<String> },
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision a deployment.
    Deploy(DeployArgs),

    /// Destroy a deployment's resources and archive its record.
    Destroy {
        stack: String,
        /// Skip the interactive confirmation.
        #[arg(long)]
        force: bool,
        /// Report what would be destroyed without changing anything.
        #[arg(long)]
        dry_run: bool,
        /// Keep the filesystem even when this tool created it.
        #[arg(long)]
        preserve_efs: bool,
    },

    /// Update an existing deployment in place.
    Update {
        stack: String,
        #[arg(long)]
        instance_type: Option<String>,
        /// Container image override, repeatable: --image name=reference
        #[arg(long = "image", value_name = "NAME=REF")]
        images: Vec<String>,
        #[arg(long)]
        force: bool,
    },

    /// Revert configuration to a previous snapshot.
    Rollback {
        stack: String,
        /// 1 = most recent snapshot.
        #[arg(long, default_value_t = 1)]
        to_version: u32,
        #[arg(long)]
        force: bool,
    },

    /// Run pre-deployment validation without provisioning.
    Validate(ValidateArgs),

    /// Render a deployment report.
    Report {
        #[arg(long)]
        stack_name: String,
        /// Probe live service health while building the report.
        #[arg(long)]
        refresh: bool,
        /// Include post-deployment provider checks.
        #[arg(long)]
        post: bool,
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Probe the service stack on a host once.
    Health {
        #[arg(long)]
        host: String,
        #[arg(long, overrides_with = "skip_postgres")]
        include_postgres: bool,
        #[arg(long)]
        skip_postgres: bool,
        /// Per-request timeout in seconds.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Continuous monitoring.
    Monitor {
        #[command(subcommand)]
        command: MonitorCommand,
    },

    /// List local deployments.
    List {
        /// Discover tagged provider resources instead of local records.
        #[arg(long)]
        discover_from_aws: bool,
        #[arg(long, default_value = "us-east-1")]
        region: String,
    },

    /// Dump a deployment record.
    Inspect { stack: String },

    /// Summarise a deployment, optionally with live health.
    Info {
        stack: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        skip_health: bool,
    },

    /// Backup operations.
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Restore a deployment record from a backup.
    Restore {
        stack: String,
        /// Restore the most recent backup.
        #[arg(long, conflicts_with = "backup")]
        latest: bool,
        /// Restore a specific backup file.
        #[arg(long)]
        backup: Option<PathBuf>,
    },

    /// Find (and optionally delete) orphaned provider resources.
    Cleanup {
        #[arg(long)]
        dry_run: bool,
        /// Delete everything found instead of reporting only.
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "us-east-1")]
        region: String,
    },

    /// Show a deployment's lifecycle status.
    Status {
        #[arg(long)]
        stack_name: String,
    },

    /// Tail monitoring logs for a deployment.
    Logs {
        #[arg(long)]
        stack_name: String,
        #[arg(long, default_value_t = 50)]
        tail: usize,
    },

    /// Show cost tracking for a deployment.
    Cost {
        #[arg(long)]
        stack_name: String,
    },

    /// Initialise the state directory.
    Init {
        #[arg(long)]
        directory: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}
