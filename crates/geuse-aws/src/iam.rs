//! IAM role/instance-profile operations and the STS caller identity.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use crate::client::{AwsClient, Params};
use crate::error::AwsError;
use crate::types::SimulatedAction;
use crate::xml::{xml_blocks, xml_text};

const IAM_VERSION: &str = "2010-05-08";
const STS_VERSION: &str = "2011-06-15";
const SERVICE: &str = "iam";

/// IAM and STS are global services signed against us-east-1.
const GLOBAL_REGION: &str = "us-east-1";

const PROFILE_WAIT_ATTEMPTS: u32 = 30;
const PROFILE_WAIT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

pub struct IamService {
    client: Arc<AwsClient>,
}

impl IamService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn query(&self, params: &Params) -> Result<String, AwsError> {
        let base = self.client.base().iam.clone();
        self.client
            .query_api(&base, SERVICE, GLOBAL_REGION, params)
            .await
    }

    // ── STS ───────────────────────────────────────────────────────────────────

    pub async fn get_caller_identity(&self) -> Result<CallerIdentity, AwsError> {
        let base = self.client.base().sts.clone();
        let xml = self
            .client
            .query_api(
                &base,
                "sts",
                GLOBAL_REGION,
                &Params::action("GetCallerIdentity", STS_VERSION),
            )
            .await?;
        Ok(CallerIdentity {
            account: xml_text(&xml, "Account")
                .ok_or_else(|| AwsError::missing_field("sts", "Account"))?,
            arn: xml_text(&xml, "Arn").ok_or_else(|| AwsError::missing_field("sts", "Arn"))?,
            user_id: xml_text(&xml, "UserId").unwrap_or_default(),
        })
    }

    // ── Roles ─────────────────────────────────────────────────────────────────

    /// Create the role an instance assumes to mount the filesystem and talk to
    /// the remote-exec service. Attaches the managed SSM core policy and an
    /// inline filesystem-client policy. Idempotent on EntityAlreadyExists.
    pub async fn create_efs_mount_role(
        &self,
        role_name: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(role_name, "creating IAM role");
        let trust = serde_json::to_string(&json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ec2.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        }))
        .expect("static trust policy serializes");

        let mut params = Params::action("CreateRole", IAM_VERSION)
            .add("RoleName", role_name)
            .add("AssumeRolePolicyDocument", trust);
        for (i, (key, value)) in tags.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("Tags.member.{n}.Key"), key)
                .add(format!("Tags.member.{n}.Value"), value);
        }

        let role_arn = match self.query(&params).await {
            Ok(xml) => xml_text(&xml, "Arn")
                .ok_or_else(|| AwsError::missing_field(SERVICE, "Arn"))?,
            Err(e) if e.is_code("EntityAlreadyExists") => {
                info!(role_name, "IAM role already exists, retrieving ARN");
                self.get_role_arn(role_name).await?
            }
            Err(e) => return Err(e),
        };

        self.attach_role_policy(
            role_name,
            "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
        )
        .await?;

        let mount_policy = serde_json::to_string(&json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": [
                    "elasticfilesystem:ClientMount",
                    "elasticfilesystem:ClientWrite",
                    "elasticfilesystem:ClientRootAccess"
                ],
                "Resource": "*"
            }]
        }))
        .expect("static mount policy serializes");
        self.put_role_policy(role_name, "efs-client-mount", &mount_policy)
            .await?;

        Ok(role_arn)
    }

    pub async fn get_role_arn(&self, role_name: &str) -> Result<String, AwsError> {
        let xml = self
            .query(&Params::action("GetRole", IAM_VERSION).add("RoleName", role_name))
            .await?;
        xml_text(&xml, "Arn").ok_or_else(|| AwsError::missing_field(SERVICE, "Arn"))
    }

    pub async fn attach_role_policy(
        &self,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("AttachRolePolicy", IAM_VERSION)
                .add("RoleName", role_name)
                .add("PolicyArn", policy_arn),
        )
        .await
        .map(|_| ())
    }

    pub async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<(), AwsError> {
        self.query(
            &Params::action("PutRolePolicy", IAM_VERSION)
                .add("RoleName", role_name)
                .add("PolicyName", policy_name)
                .add("PolicyDocument", policy_document),
        )
        .await
        .map(|_| ())
    }

    // ── Instance profiles ─────────────────────────────────────────────────────

    pub async fn create_instance_profile(
        &self,
        profile_name: &str,
        tags: &[(String, String)],
    ) -> Result<String, AwsError> {
        info!(profile_name, "creating instance profile");
        let mut params = Params::action("CreateInstanceProfile", IAM_VERSION)
            .add("InstanceProfileName", profile_name);
        for (i, (key, value)) in tags.iter().enumerate() {
            let n = i + 1;
            params = params
                .add(format!("Tags.member.{n}.Key"), key)
                .add(format!("Tags.member.{n}.Value"), value);
        }
        match self.query(&params).await {
            Ok(xml) => {
                xml_text(&xml, "Arn").ok_or_else(|| AwsError::missing_field(SERVICE, "Arn"))
            }
            Err(e) if e.is_code("EntityAlreadyExists") => {
                info!(profile_name, "instance profile already exists");
                self.get_instance_profile_arn(profile_name).await
            }
            Err(e) => Err(e),
        }
    }

    async fn get_instance_profile_arn(&self, profile_name: &str) -> Result<String, AwsError> {
        let xml = self
            .query(
                &Params::action("GetInstanceProfile", IAM_VERSION)
                    .add("InstanceProfileName", profile_name),
            )
            .await?;
        xml_text(&xml, "Arn").ok_or_else(|| AwsError::missing_field(SERVICE, "Arn"))
    }

    pub async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<(), AwsError> {
        let result = self
            .query(
                &Params::action("AddRoleToInstanceProfile", IAM_VERSION)
                    .add("InstanceProfileName", profile_name)
                    .add("RoleName", role_name),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_code("LimitExceeded") => {
                // A profile holds at most one role; the role is already attached.
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the profile lists the role. IAM is eventually consistent and
    /// EC2 rejects launches until the attachment is visible.
    pub async fn wait_for_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<(), AwsError> {
        for attempt in 1..=PROFILE_WAIT_ATTEMPTS {
            let xml = self
                .query(
                    &Params::action("GetInstanceProfile", IAM_VERSION)
                        .add("InstanceProfileName", profile_name),
                )
                .await?;
            let names: Vec<String> = xml_blocks(&xml, "Roles")
                .first()
                .map(|roles| crate::xml::xml_all_texts(roles, "RoleName"))
                .unwrap_or_default();
            if names.iter().any(|n| n == role_name) {
                return Ok(());
            }
            debug!(profile_name, role_name, attempt, "waiting for role attachment");
            tokio::time::sleep(PROFILE_WAIT_DELAY).await;
        }
        Err(AwsError::WaitTimeout {
            resource: profile_name.to_string(),
            target: "role attached",
            attempts: PROFILE_WAIT_ATTEMPTS,
        })
    }

    // ── Policy simulation ─────────────────────────────────────────────────────

    pub async fn simulate_principal_policy(
        &self,
        policy_source_arn: &str,
        actions: &[&str],
    ) -> Result<Vec<SimulatedAction>, AwsError> {
        let mut params = Params::action("SimulatePrincipalPolicy", IAM_VERSION)
            .add("PolicySourceArn", policy_source_arn);
        for (i, action) in actions.iter().enumerate() {
            params = params.add(format!("ActionNames.member.{}", i + 1), *action);
        }
        let xml = self.query(&params).await?;
        let mut results = Vec::new();
        for block in xml_blocks(&xml, "EvaluationResults") {
            for member in xml_blocks(&block, "member") {
                if let (Some(action), Some(decision)) = (
                    xml_text(&member, "EvalActionName"),
                    xml_text(&member, "EvalDecision"),
                ) {
                    results.push(SimulatedAction { action, decision });
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BaseUrls;
    use crate::creds::{AwsCredentials, StaticCredentialsProvider};
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: &str) -> IamService {
        IamService::new(Arc::new(AwsClient::with_base_urls(
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
    async fn caller_identity_parses_account_and_arn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=GetCallerIdentity"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<GetCallerIdentityResponse><GetCallerIdentityResult><Arn>arn:aws:iam::123456789012:user/dev</Arn><UserId>AIDA</UserId><Account>123456789012</Account></GetCallerIdentityResult></GetCallerIdentityResponse>",
            ))
            .mount(&server)
            .await;

        let identity = service(&server.uri()).get_caller_identity().await.unwrap();
        assert_eq!(identity.account, "123456789012");
        assert!(identity.arn.ends_with("user/dev"));
    }

    #[tokio::test]
    async fn simulate_collects_decisions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<SimulatePrincipalPolicyResponse><SimulatePrincipalPolicyResult><EvaluationResults>
                <member><EvalActionName>ec2:RunInstances</EvalActionName><EvalDecision>allowed</EvalDecision></member>
                <member><EvalActionName>elasticfilesystem:CreateFileSystem</EvalActionName><EvalDecision>implicitDeny</EvalDecision></member>
                </EvaluationResults></SimulatePrincipalPolicyResult></SimulatePrincipalPolicyResponse>"#,
            ))
            .mount(&server)
            .await;

        let results = service(&server.uri())
            .simulate_principal_policy("arn:aws:iam::1:user/dev", &["ec2:RunInstances"])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].decision, "allowed");
        assert_eq!(results[1].decision, "implicitDeny");
    }

    #[tokio::test]
    async fn existing_role_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=CreateRole"))
            .respond_with(ResponseTemplate::new(409).set_body_string(
                "<ErrorResponse><Error><Code>EntityAlreadyExists</Code><Message>Role exists</Message></Error></ErrorResponse>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=GetRole"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<GetRoleResponse><Role><Arn>arn:aws:iam::1:role/demo</Arn></Role></GetRoleResponse>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=AttachRolePolicy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<AttachRolePolicyResponse/>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=PutRolePolicy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<PutRolePolicyResponse/>"))
            .mount(&server)
            .await;

        let arn = service(&server.uri())
            .create_efs_mount_role("demo", &[])
            .await
            .unwrap();
        assert_eq!(arn, "arn:aws:iam::1:role/demo");
    }
}
