use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// State file is unreadable or not valid JSON.
    #[error("corrupted state file: {0}")]
    Corruption(String),

    /// Schema migration could not be applied.
    #[error("state migration failed: {0}")]
    Migration(String),

    /// State parsed but failed integrity validation.
    #[error("state validation failed: {0}")]
    Validation(String),

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("could not acquire state lock for {0} within {1} seconds")]
    LockTimeout(String, u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
