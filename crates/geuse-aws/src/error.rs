use thiserror::Error;

#[derive(Debug, Error)]
pub enum AwsError {
    /// The provider returned an error response; `code` is the provider's own
    /// error code (XML `<Code>` or JSON `__type`).
    #[error("{service} {code}: {message}")]
    Api {
        service: &'static str,
        code: String,
        message: String,
    },

    #[error("http request failed: {0}")]
    Http(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("timed out waiting for {resource} to reach {target} after {attempts} attempts")]
    WaitTimeout {
        resource: String,
        target: &'static str,
        attempts: u32,
    },

    #[error("unexpected response from {service}: {source}")]
    Malformed {
        service: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Internal(String),
}

impl AwsError {
    pub fn api(service: &'static str, code: impl Into<String>, message: impl Into<String>) -> Self {
        AwsError::Api {
            service,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(service: &'static str, field: &str) -> Self {
        AwsError::Internal(format!("{service}: missing '{field}' in response"))
    }

    /// True when the provider error code matches (exact or substring of the
    /// message, which is how idempotent paths recognise already-done work).
    pub fn is_code(&self, needle: &str) -> bool {
        match self {
            AwsError::Api { code, message, .. } => code == needle || message.contains(needle),
            _ => false,
        }
    }
}
