//! Remote script execution through the provider's command service.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::AwsClient;
use crate::error::AwsError;

const SERVICE: &str = "ssm";
const TARGET_PREFIX: &str = "AmazonSSM";

const POLL_DELAY: Duration = Duration::from_secs(5);

/// Terminal outcome of a remote command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command_id: String,
    pub status: String,
    pub status_details: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == "Success"
    }
}

pub struct SsmService {
    client: Arc<AwsClient>,
}

impl SsmService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn call(&self, target: &str, body: &Value) -> Result<Value, AwsError> {
        let base = self.client.base().ssm.clone();
        let region = self.client.region().to_string();
        self.client
            .json_api(&base, SERVICE, &region, &format!("{TARGET_PREFIX}.{target}"), body)
            .await
    }

    pub async fn send_shell_script(
        &self,
        instance_id: &str,
        script: &str,
        comment: &str,
        timeout_seconds: u32,
    ) -> Result<String, AwsError> {
        info!(instance_id, comment, "submitting remote script");
        let resp = self
            .call(
                "SendCommand",
                &json!({
                    "DocumentName": "AWS-RunShellScript",
                    "InstanceIds": [instance_id],
                    "Comment": comment,
                    "TimeoutSeconds": timeout_seconds,
                    "Parameters": {
                        "commands": [script],
                        "executionTimeout": [timeout_seconds.to_string()],
                    },
                }),
            )
            .await?;
        resp["Command"]["CommandId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AwsError::missing_field(SERVICE, "Command.CommandId"))
    }

    pub async fn get_command_outcome(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<CommandOutcome, AwsError> {
        let resp = self
            .call(
                "GetCommandInvocation",
                &json!({ "CommandId": command_id, "InstanceId": instance_id }),
            )
            .await?;
        Ok(CommandOutcome {
            command_id: command_id.to_string(),
            status: resp["Status"].as_str().unwrap_or("Unknown").to_string(),
            status_details: resp["StatusDetails"].as_str().unwrap_or("").to_string(),
            stderr: resp["StandardErrorContent"].as_str().unwrap_or("").to_string(),
        })
    }

    /// Submit a script and poll until it reaches a terminal status or the
    /// timeout budget is spent.
    pub async fn run_shell_script(
        &self,
        instance_id: &str,
        script: &str,
        comment: &str,
        timeout_seconds: u32,
    ) -> Result<CommandOutcome, AwsError> {
        let command_id = self
            .send_shell_script(instance_id, script, comment, timeout_seconds)
            .await?;
        let max_attempts = (timeout_seconds / POLL_DELAY.as_secs() as u32).max(1);

        for attempt in 1..=max_attempts {
            tokio::time::sleep(POLL_DELAY).await;
            let outcome = match self.get_command_outcome(&command_id, instance_id).await {
                Ok(o) => o,
                // The invocation record lags the SendCommand call briefly.
                Err(e) if e.is_code("InvocationDoesNotExist") => continue,
                Err(e) => return Err(e),
            };
            match outcome.status.as_str() {
                "Pending" | "InProgress" | "Delayed" => {
                    debug!(command_id, attempt, "remote script still running");
                }
                _ => return Ok(outcome),
            }
        }
        Err(AwsError::WaitTimeout {
            resource: command_id,
            target: "terminal command status",
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BaseUrls;
    use crate::creds::{AwsCredentials, StaticCredentialsProvider};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: &str) -> SsmService {
        SsmService::new(Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single(url),
        )))
    }

    #[tokio::test]
    async fn send_returns_command_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AmazonSSM.SendCommand"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Command": { "CommandId": "cmd-1", "Status": "Pending" }
            })))
            .mount(&server)
            .await;

        let id = service(&server.uri())
            .send_shell_script("i-1", "echo hi", "test", 900)
            .await
            .unwrap();
        assert_eq!(id, "cmd-1");
    }

    #[tokio::test]
    async fn outcome_reports_failure_details() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AmazonSSM.GetCommandInvocation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Status": "Failed",
                "StatusDetails": "NonZeroExitCode",
                "StandardErrorContent": "pull failed"
            })))
            .mount(&server)
            .await;

        let outcome = service(&server.uri())
            .get_command_outcome("cmd-1", "i-1")
            .await
            .unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.status_details, "NonZeroExitCode");
    }
}
