//! HTTP and raw-socket health probes with retries and timing.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use geuse_domain::{HealthCheckConfig, HealthCheckResult};
use tokio::net::TcpStream;

#[derive(Clone)]
pub struct HealthProbe {
    http: reqwest::Client,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProbe {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .expect("reqwest client construction cannot fail with static config"),
        }
    }

    /// HTTP check with exponential backoff capped at `max_delay_seconds`.
    /// Retries on any HTTP error, timeout, or unexpected status.
    pub async fn check_http(&self, config: &HealthCheckConfig) -> HealthCheckResult {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error: Option<String> = None;
        let mut status_code: Option<u16> = None;

        loop {
            let response = self
                .http
                .get(&config.endpoint)
                .timeout(Duration::from_secs_f64(config.timeout_seconds))
                .send()
                .await;
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    status_code = Some(status);
                    if status == config.expected_status {
                        return HealthCheckResult {
                            service_name: config.service_name.clone(),
                            healthy: true,
                            status_code,
                            response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                            error_message: None,
                            endpoint: config.endpoint.clone(),
                            checked_at: Utc::now(),
                            retry_count: attempt,
                        };
                    }
                    last_error = Some(format!("Unexpected status {status}"));
                }
                Err(e) => last_error = Some(e.to_string()),
            }

            attempt += 1;
            if attempt > config.max_retries {
                break;
            }
            let delay = (config.base_delay_seconds * 2f64.powi(attempt as i32 - 1))
                .min(config.max_delay_seconds);
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        HealthCheckResult {
            service_name: config.service_name.clone(),
            healthy: false,
            status_code,
            response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            error_message: last_error,
            endpoint: config.endpoint.clone(),
            checked_at: Utc::now(),
            retry_count: attempt - 1,
        }
    }

    /// Open a TCP socket within the timeout; success means healthy.
    pub async fn check_tcp(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        service_name: &str,
    ) -> HealthCheckResult {
        let start = Instant::now();
        let endpoint = format!("{host}:{port}");
        let connect = tokio::time::timeout(timeout, TcpStream::connect(&endpoint)).await;
        let (healthy, error_message) = match connect {
            Ok(Ok(_)) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("connect timed out after {timeout:?}"))),
        };
        HealthCheckResult {
            service_name: service_name.to_string(),
            healthy,
            status_code: None,
            response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            error_message,
            endpoint,
            checked_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Run a set of HTTP checks in parallel, preserving input order.
    pub async fn check_all(&self, configs: &[HealthCheckConfig]) -> Vec<HealthCheckResult> {
        join_all(configs.iter().map(|c| self.check_http(c))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(endpoint: String) -> HealthCheckConfig {
        let mut config = HealthCheckConfig::http("svc", endpoint);
        config.base_delay_seconds = 0.01;
        config.max_delay_seconds = 0.02;
        config
    }

    #[tokio::test]
    async fn healthy_endpoint_passes_without_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = HealthProbe::new()
            .check_http(&fast_config(format!("{}/healthz", server.uri())))
            .await;
        assert!(result.healthy);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn failing_endpoint_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4) // initial attempt + 3 retries
            .mount(&server)
            .await;

        let result = HealthProbe::new()
            .check_http(&fast_config(format!("{}/healthz", server.uri())))
            .await;
        assert!(!result.healthy);
        assert_eq!(result.retry_count, 3);
        assert!(result.error_message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn tcp_check_reports_open_and_closed_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = HealthProbe::new();

        let open = probe
            .check_tcp("127.0.0.1", port, Duration::from_secs(1), "postgres")
            .await;
        assert!(open.healthy);

        drop(listener);
        let closed = probe
            .check_tcp("127.0.0.1", port, Duration::from_secs(1), "postgres")
            .await;
        assert!(!closed.healthy);
        assert!(closed.error_message.is_some());
    }

    #[tokio::test]
    async fn check_all_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut a = fast_config(format!("{}/a", server.uri()));
        a.service_name = "a".into();
        let mut b = fast_config(format!("{}/b", server.uri()));
        b.service_name = "b".into();
        b.max_retries = 0;

        let results = HealthProbe::new().check_all(&[a, b]).await;
        assert_eq!(results[0].service_name, "a");
        assert!(results[0].healthy);
        assert_eq!(results[1].service_name, "b");
        assert!(!results[1].healthy);
    }
}
