use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid stack name '{0}': must match ^[A-Za-z][A-Za-z0-9-]*$ and be at most 128 characters")]
    InvalidStackName(String),

    #[error("invalid region '{0}': expected a region code like us-east-1")]
    InvalidRegion(String),

    #[error("rollback timeout {0} minutes is out of range [5, 60]")]
    InvalidRollbackTimeout(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("state integrity violation: missing required fields: {0}")]
    MissingRequiredFields(String),
}
