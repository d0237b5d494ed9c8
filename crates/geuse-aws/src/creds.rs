use std::process::Command as StdCommand;

use serde_json::Value;

use crate::error::AwsError;

#[derive(Clone, Debug)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Source of signing credentials. Implementations must be cheap to call;
/// anything expensive should cache internally.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<AwsCredentials, AwsError>;
}

// ── Static credentials from the environment ───────────────────────────────────

pub struct EnvCredentialsProvider {
    creds: AwsCredentials,
}

impl EnvCredentialsProvider {
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            creds: AwsCredentials {
                access_key_id,
                secret_access_key,
                session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            },
        })
    }
}

impl CredentialsProvider for EnvCredentialsProvider {
    fn credentials(&self) -> Result<AwsCredentials, AwsError> {
        Ok(self.creds.clone())
    }
}

// ── AWS CLI fallback ──────────────────────────────────────────────────────────

/// Shells out to `aws sts get-session-token`; used when no env credentials
/// are present (the usual case on an operator workstation with `aws configure`).
pub struct CliCredentialsProvider {
    cache: std::sync::Mutex<Option<AwsCredentials>>,
}

impl CliCredentialsProvider {
    pub fn new() -> Self {
        Self {
            cache: std::sync::Mutex::new(None),
        }
    }
}

impl Default for CliCredentialsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialsProvider for CliCredentialsProvider {
    fn credentials(&self) -> Result<AwsCredentials, AwsError> {
        if let Some(creds) = self.cache.lock().expect("creds cache poisoned").as_ref() {
            return Ok(creds.clone());
        }

        let output = StdCommand::new("aws")
            .args([
                "sts",
                "get-session-token",
                "--duration-seconds",
                "3600",
                "--output",
                "json",
            ])
            .output()
            .map_err(|e| {
                AwsError::Credentials(format!(
                    "aws CLI not found: {e}. Install the AWS CLI or set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY."
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AwsError::Credentials(format!(
                "aws sts get-session-token failed: {}. Run 'aws configure' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| AwsError::Credentials(format!("aws CLI output parse: {e}")))?;
        let c = &resp["Credentials"];
        let creds = AwsCredentials {
            access_key_id: c["AccessKeyId"].as_str().unwrap_or("").to_string(),
            secret_access_key: c["SecretAccessKey"].as_str().unwrap_or("").to_string(),
            session_token: c["SessionToken"].as_str().map(str::to_string),
        };
        if creds.access_key_id.is_empty() {
            return Err(AwsError::Credentials(
                "aws CLI returned no AccessKeyId".into(),
            ));
        }
        *self.cache.lock().expect("creds cache poisoned") = Some(creds.clone());
        Ok(creds)
    }
}

// ── Fixed credentials (tests) ─────────────────────────────────────────────────

pub struct StaticCredentialsProvider(pub AwsCredentials);

impl CredentialsProvider for StaticCredentialsProvider {
    fn credentials(&self) -> Result<AwsCredentials, AwsError> {
        Ok(self.0.clone())
    }
}

/// Environment credentials when set, otherwise the AWS CLI.
pub fn default_provider() -> Box<dyn CredentialsProvider> {
    match EnvCredentialsProvider::from_env() {
        Some(p) => Box::new(p),
        None => Box::new(CliCredentialsProvider::new()),
    }
}
