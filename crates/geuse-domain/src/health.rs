use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service_name: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub endpoint: String,
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

/// Configuration for an HTTP health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub service_name: String,
    pub endpoint: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
}

fn default_expected_status() -> u16 {
    200
}

fn default_timeout_seconds() -> f64 {
    10.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    0.5
}

fn default_max_delay() -> f64 {
    5.0
}

impl HealthCheckConfig {
    pub fn http(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            expected_status: default_expected_status(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
        }
    }
}
