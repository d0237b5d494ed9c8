use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Healthy => write!(f, "healthy"),
            ServiceStatus::Unhealthy => write!(f, "unhealthy"),
            ServiceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

// ── Per-service rolling metrics ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub service_name: String,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub uptime_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_status: ServiceStatus,
    pub consecutive_failures: u32,
    /// Incremental mean; no per-sample history is kept.
    pub average_response_time_ms: f64,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub disk_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resource_check: Option<DateTime<Utc>>,
}

impl ServiceMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            uptime_percentage: 0.0,
            last_check_at: None,
            last_status: ServiceStatus::Unknown,
            consecutive_failures: 0,
            average_response_time_ms: 0.0,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            last_resource_check: None,
        }
    }

    pub fn record(&mut self, healthy: bool, response_time_ms: f64) {
        self.total_checks += 1;
        if healthy {
            self.successful_checks += 1;
            self.consecutive_failures = 0;
        } else {
            self.failed_checks += 1;
            self.consecutive_failures += 1;
        }
        self.last_status = if healthy {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };
        self.last_check_at = Some(Utc::now());
        self.average_response_time_ms +=
            (response_time_ms - self.average_response_time_ms) / self.total_checks as f64;
        self.uptime_percentage =
            self.successful_checks as f64 / self.total_checks as f64 * 100.0;
    }
}

// ── Monitoring state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringState {
    pub deployment_name: String,
    pub started_at: DateTime<Utc>,
    pub check_interval_seconds: u64,
    pub total_checks: u64,
    #[serde(default)]
    pub service_metrics: BTreeMap<String, ServiceMetrics>,
}

impl MonitoringState {
    pub fn new(deployment_name: impl Into<String>, check_interval_seconds: u64) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            started_at: Utc::now(),
            check_interval_seconds,
            total_checks: 0,
            service_metrics: BTreeMap::new(),
        }
    }

    /// Average uptime across all services.
    pub fn overall_uptime_percentage(&self) -> f64 {
        if self.service_metrics.is_empty() {
            return 0.0;
        }
        self.service_metrics
            .values()
            .map(|m| m.uptime_percentage)
            .sum::<f64>()
            / self.service_metrics.len() as f64
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventKind {
    Check,
    StatusChange,
    Alert,
}

impl std::fmt::Display for HealthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthEventKind::Check => write!(f, "check"),
            HealthEventKind::StatusChange => write!(f, "status_change"),
            HealthEventKind::Alert => write!(f, "alert"),
        }
    }
}

/// Event emitted during monitoring, dispatched to every registered notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub event_type: HealthEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<ServiceStatus>,
    pub new_status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HealthEvent {
    pub fn new(
        service_name: impl Into<String>,
        event_type: HealthEventKind,
        previous_status: Option<ServiceStatus>,
        new_status: ServiceStatus,
        details: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            service_name: service_name.into(),
            event_type,
            previous_status,
            new_status,
            details,
        }
    }
}
