use geuse_aws::AwsError;
use geuse_domain::DomainError;
use geuse_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("unsupported tier: {0}")]
    UnsupportedTier(String),

    #[error("missing precondition: {0}")]
    MissingPrecondition(String),

    #[error("deployment exceeded rollback timeout ({minutes} minutes) before stage '{stage}'")]
    Timeout { minutes: u32, stage: &'static str },

    #[error(
        "compressed user data is {size} bytes which exceeds the provider limit of {limit} bytes"
    )]
    UserDataTooLarge { size: usize, limit: usize },

    #[error("failed to launch instance after {attempts} attempts: {reason}")]
    LaunchRetriesExhausted { attempts: u32, reason: String },

    #[error("remote command failed: {0}")]
    RemoteCommandFailed(String),

    #[error("invalid update request: {0}")]
    InvalidUpdate(String),

    #[error("rollback version {requested} is out of range (history holds {available})")]
    RollbackVersionOutOfRange { requested: u32, available: usize },

    #[error("no rollback history available")]
    NoRollbackHistory,

    /// Terminal orchestrator error: the pipeline failed and compensating
    /// cleanup was attempted (or skipped) as described by `outcome`.
    #[error("Deployment failed during {stage}: {source}. {outcome}")]
    Failed {
        stage: &'static str,
        outcome: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error(transparent)]
    Provider(#[from] AwsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Typed pipeline outcome: which stage failed and why.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: DeployError,
}
