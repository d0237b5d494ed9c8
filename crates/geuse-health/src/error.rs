use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("deployment has no reachable host address")]
    NoHost,
}
