//! Signed HTTP client for the AWS Query, JSON, and REST protocols, plus the
//! per-region client cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::creds::{default_provider, CredentialsProvider};
use crate::error::AwsError;
use crate::sign::{host_of, sign_request, SignableRequest};
use crate::xml::{xml_error_code, xml_error_message};

// ── Endpoints ─────────────────────────────────────────────────────────────────

/// Service endpoints for one region. Overridden wholesale in tests.
#[derive(Clone, Debug)]
pub struct BaseUrls {
    pub ec2: String,
    pub efs: String,
    pub iam: String,
    pub sts: String,
    pub elbv2: String,
    pub cloudfront: String,
    pub ssm: String,
    pub pricing: String,
    pub service_quotas: String,
}

impl BaseUrls {
    pub fn for_region(region: &str) -> Self {
        Self {
            ec2: format!("https://ec2.{}.amazonaws.com", region),
            efs: format!("https://elasticfilesystem.{}.amazonaws.com", region),
            iam: "https://iam.amazonaws.com".into(),
            sts: "https://sts.amazonaws.com".into(),
            elbv2: format!("https://elasticloadbalancing.{}.amazonaws.com", region),
            cloudfront: "https://cloudfront.amazonaws.com".into(),
            ssm: format!("https://ssm.{}.amazonaws.com", region),
            pricing: "https://api.pricing.us-east-1.amazonaws.com".into(),
            service_quotas: format!("https://servicequotas.{}.amazonaws.com", region),
        }
    }

    /// Point every service at one base URL (wiremock tests).
    pub fn single(url: &str) -> Self {
        Self {
            ec2: url.into(),
            efs: url.into(),
            iam: url.into(),
            sts: url.into(),
            elbv2: url.into(),
            cloudfront: url.into(),
            ssm: url.into(),
            pricing: url.into(),
            service_quotas: url.into(),
        }
    }
}

// ── Query parameter builder ───────────────────────────────────────────────────

/// Ordered form parameters for the AWS Query protocol.
#[derive(Debug, Clone)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn action(action: &str, version: &str) -> Self {
        Self(vec![
            ("Action".into(), action.into()),
            ("Version".into(), version.into()),
        ])
    }

    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn maybe(self, key: impl Into<String>, value: Option<String>) -> Self {
        match value {
            Some(v) => self.add(key, v),
            None => self,
        }
    }

    /// Numbered tag specification for create calls, e.g.
    /// `TagSpecification.1.Tag.1.Key`.
    pub fn tag_spec(mut self, resource_type: &str, tags: &[(String, String)]) -> Self {
        self.0.push(
            ("TagSpecification.1.ResourceType".into(), resource_type.into()),
        );
        for (i, (key, value)) in tags.iter().enumerate() {
            let n = i + 1;
            self.0
                .push((format!("TagSpecification.1.Tag.{n}.Key"), key.clone()));
            self.0
                .push((format!("TagSpecification.1.Tag.{n}.Value"), value.clone()));
        }
        self
    }

    fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

// ── AwsClient ─────────────────────────────────────────────────────────────────

/// One signed client per region. Cheap to clone via the factory's `Arc`.
pub struct AwsClient {
    region: String,
    http: reqwest::Client,
    creds: Arc<dyn CredentialsProvider>,
    base: BaseUrls,
}

impl AwsClient {
    pub fn new(region: &str, http: reqwest::Client, creds: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            region: region.to_string(),
            http,
            creds,
            base: BaseUrls::for_region(region),
        }
    }

    /// Test constructor with explicit endpoints.
    pub fn with_base_urls(
        region: &str,
        http: reqwest::Client,
        creds: Arc<dyn CredentialsProvider>,
        base: BaseUrls,
    ) -> Self {
        Self {
            region: region.to_string(),
            http,
            creds,
            base,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn base(&self) -> &BaseUrls {
        &self.base
    }

    /// POST an AWS Query-protocol request, returning the raw XML response.
    pub async fn query_api(
        &self,
        base_url: &str,
        service: &'static str,
        sign_region: &str,
        params: &Params,
    ) -> Result<String, AwsError> {
        let creds = self.creds.credentials()?;
        let host = host_of(base_url).to_string();
        let url = format!("{}/", base_url.trim_end_matches('/'));

        let body = params.encode();
        let ct = "application/x-www-form-urlencoded; charset=utf-8";
        let sig_headers = sign_request(
            &SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                content_type: ct,
                body: body.as_bytes(),
                host: &host,
            },
            &creds,
            sign_region,
            service,
        );

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", ct)
            .body(body.into_bytes());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AwsError::Http(format!("POST {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();

        if status >= 400 {
            let code = xml_error_code(&text);
            let message = xml_error_message(&text);
            debug!(service, code, status, "query api error");
            return Err(AwsError::api(service, code, message));
        }
        Ok(text)
    }

    /// POST an AWS JSON-1.1 request with an `X-Amz-Target`, returning JSON.
    pub async fn json_api(
        &self,
        base_url: &str,
        service: &'static str,
        sign_region: &str,
        target: &str,
        body: &Value,
    ) -> Result<Value, AwsError> {
        let creds = self.creds.credentials()?;
        let host = host_of(base_url).to_string();
        let url = format!("{}/", base_url.trim_end_matches('/'));
        let body_str = serde_json::to_string(body).unwrap_or_default();
        let ct = "application/x-amz-json-1.1";

        let sig_headers = sign_request(
            &SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                content_type: ct,
                body: body_str.as_bytes(),
                host: &host,
            },
            &creds,
            sign_region,
            service,
        );

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", ct)
            .header("X-Amz-Target", target)
            .body(body_str.into_bytes());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AwsError::Http(format!("POST {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let resp_body: Value = resp.json().await.unwrap_or(Value::Null);

        if status >= 400 {
            let code = json_error_code(&resp_body);
            let message = resp_body["message"]
                .as_str()
                .or_else(|| resp_body["Message"].as_str())
                .unwrap_or("unknown error")
                .to_string();
            debug!(service, code, status, target, "json api error");
            return Err(AwsError::api(service, code, message));
        }
        Ok(resp_body)
    }

    /// REST-JSON request (EFS). `path_and_query` includes any query string.
    pub async fn rest_json(
        &self,
        method: &str,
        base_url: &str,
        service: &'static str,
        sign_region: &str,
        path_and_query: &str,
        body: Option<&Value>,
    ) -> Result<Value, AwsError> {
        let creds = self.creds.credentials()?;
        let host = host_of(base_url).to_string();
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path_and_query, ""),
        };
        let url = format!("{}{}", base_url.trim_end_matches('/'), path_and_query);
        let body_str = body.map(|b| serde_json::to_string(b).unwrap_or_default());
        let body_bytes = body_str.as_deref().unwrap_or("").as_bytes().to_vec();
        let ct = "application/json";

        let sig_headers = sign_request(
            &SignableRequest {
                method,
                path,
                query,
                content_type: ct,
                body: &body_bytes,
                host: &host,
            },
            &creds,
            sign_region,
            service,
        );

        let mut req = self
            .http
            .request(
                method.parse().map_err(|_| {
                    AwsError::Internal(format!("invalid http method '{method}'"))
                })?,
                &url,
            )
            .header("Content-Type", ct)
            .body(body_bytes);
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AwsError::Http(format!("{method} {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let resp_body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };

        if status >= 400 {
            let code = resp_body["ErrorCode"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| json_error_code(&resp_body));
            let message = resp_body["Message"]
                .as_str()
                .or_else(|| resp_body["message"].as_str())
                .unwrap_or("unknown error")
                .to_string();
            debug!(service, code, status, path, "rest json error");
            return Err(AwsError::api(service, code, message));
        }
        Ok(resp_body)
    }

    /// REST-XML request (CloudFront). Returns the raw response body.
    pub async fn rest_xml(
        &self,
        method: &str,
        base_url: &str,
        service: &'static str,
        sign_region: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<String, AwsError> {
        let creds = self.creds.credentials()?;
        let host = host_of(base_url).to_string();
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let body_bytes = body.unwrap_or("").as_bytes().to_vec();
        let ct = "text/xml; charset=utf-8";

        let sig_headers = sign_request(
            &SignableRequest {
                method,
                path,
                query: "",
                content_type: ct,
                body: &body_bytes,
                host: &host,
            },
            &creds,
            sign_region,
            service,
        );

        let mut req = self
            .http
            .request(
                method.parse().map_err(|_| {
                    AwsError::Internal(format!("invalid http method '{method}'"))
                })?,
                &url,
            )
            .header("Content-Type", ct)
            .body(body_bytes);
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AwsError::Http(format!("{method} {url} failed: {e}")))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();

        if status >= 400 {
            let code = xml_error_code(&text);
            let message = xml_error_message(&text);
            debug!(service, code, status, path, "rest xml error");
            return Err(AwsError::api(service, code, message));
        }
        Ok(text)
    }
}

fn json_error_code(body: &Value) -> String {
    body["__type"]
        .as_str()
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "Unknown".into())
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Caches one [`AwsClient`] per region. Construction is guarded so concurrent
/// first access builds the client exactly once.
pub struct AwsClientFactory {
    http: reqwest::Client,
    creds: Arc<dyn CredentialsProvider>,
    clients: Mutex<HashMap<String, Arc<AwsClient>>>,
}

impl AwsClientFactory {
    pub fn new() -> Self {
        Self::with_provider(default_provider().into())
    }

    pub fn with_provider(creds: Arc<dyn CredentialsProvider>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            http,
            creds,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self, region: &str) -> Arc<AwsClient> {
        let mut cache = self.clients.lock().expect("client cache poisoned");
        cache
            .entry(region.to_string())
            .or_insert_with(|| {
                Arc::new(AwsClient::new(region, self.http.clone(), self.creds.clone()))
            })
            .clone()
    }
}

impl Default for AwsClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
