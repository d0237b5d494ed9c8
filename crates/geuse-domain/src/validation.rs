use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Outcome of a single validation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub check_name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    pub severity: Severity,
}

impl ValidationCheck {
    pub fn passed(check_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            passed: true,
            message: message.into(),
            details: None,
            remediation: None,
            severity: Severity::Info,
        }
    }

    pub fn failed(
        check_name: impl Into<String>,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            passed: false,
            message: message.into(),
            details: None,
            remediation: Some(remediation.into()),
            severity: Severity::Error,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Summary statistics for a validation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub overall_status: OverallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_duration_seconds: Option<f64>,
}

/// Aggregated validation results. `passed()` is true iff no error-severity
/// check failed; warnings never fail the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
    pub validated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_duration_seconds: Option<f64>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            validated_at: Utc::now(),
            deployment_name: None,
            validation_duration_seconds: None,
        }
    }

    pub fn add(&mut self, check: ValidationCheck) {
        self.checks.push(check);
    }

    pub fn errors(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Error)
            .count()
    }

    pub fn warnings(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Warning)
            .count()
    }

    pub fn passed(&self) -> bool {
        self.errors() == 0
    }

    pub fn summary(&self) -> ValidationSummary {
        let failed = self.errors();
        let warnings = self.warnings();
        let overall_status = match (failed, warnings) {
            (0, 0) => OverallStatus::Healthy,
            (0, _) => OverallStatus::Degraded,
            _ => OverallStatus::Unhealthy,
        };
        ValidationSummary {
            total_checks: self.checks.len(),
            passed: self.checks.len() - failed - warnings,
            failed,
            warnings,
            overall_status,
            validation_duration_seconds: self.validation_duration_seconds,
        }
    }
}
