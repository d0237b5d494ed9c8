//! Service quota lookups.

use std::sync::Arc;

use serde_json::json;

use crate::client::AwsClient;
use crate::error::AwsError;

const SERVICE: &str = "servicequotas";
const TARGET: &str = "ServiceQuotasV20190624.GetServiceQuota";

pub struct QuotaService {
    client: Arc<AwsClient>,
}

impl QuotaService {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    pub async fn get_service_quota(
        &self,
        service_code: &str,
        quota_code: &str,
    ) -> Result<f64, AwsError> {
        let base = self.client.base().service_quotas.clone();
        let region = self.client.region().to_string();
        let resp = self
            .client
            .json_api(
                &base,
                SERVICE,
                &region,
                TARGET,
                &json!({ "ServiceCode": service_code, "QuotaCode": quota_code }),
            )
            .await?;
        resp["Quota"]["Value"]
            .as_f64()
            .ok_or_else(|| AwsError::missing_field(SERVICE, "Quota.Value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BaseUrls;
    use crate::creds::{AwsCredentials, StaticCredentialsProvider};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn quota_value_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", TARGET))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Quota": { "Value": 64.0 }
            })))
            .mount(&server)
            .await;

        let service = QuotaService::new(Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single(&server.uri()),
        )));
        let value = service.get_service_quota("ec2", "L-1216C47A").await.unwrap();
        assert_eq!(value, 64.0);
    }
}
