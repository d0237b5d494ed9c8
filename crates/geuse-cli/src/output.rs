//! Machine-readable output envelope and rendering helpers.

use chrono::Utc;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// The uniform response shape for non-text output:
/// `{status, timestamp, message?, error_code?, errors?, data?}`.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn ok(data: Option<Value>, message: Option<String>) -> Self {
        Self {
            status: "ok",
            timestamp: Utc::now().to_rfc3339(),
            message,
            error_code: None,
            errors: None,
            data,
        }
    }

    pub fn error(message: String, error_code: &str, errors: Vec<String>) -> Self {
        Self {
            status: "error",
            timestamp: Utc::now().to_rfc3339(),
            message: Some(message),
            error_code: Some(error_code.to_string()),
            errors: if errors.is_empty() { None } else { Some(errors) },
            data: None,
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
            }
            OutputFormat::Yaml => serde_yaml::to_string(self).unwrap_or_default(),
            OutputFormat::Text => self
                .message
                .clone()
                .unwrap_or_else(|| self.status.to_string()),
        }
    }
}

/// Print a command result: human text in text mode, the envelope otherwise.
pub fn emit_success(format: OutputFormat, text: &str, data: Option<Value>) {
    if format.is_text() {
        if !text.is_empty() {
            println!("{text}");
        }
    } else {
        println!("{}", Envelope::ok(data, None).render(format));
    }
}

pub fn emit_error(format: OutputFormat, message: &str, error_code: &str, errors: Vec<String>) {
    if format.is_text() {
        eprintln!("error: {message}");
        for detail in &errors {
            eprintln!("  - {detail}");
        }
    } else {
        println!(
            "{}",
            Envelope::error(message.to_string(), error_code, errors).render(format)
        );
    }
}

/// Serialize any model into the envelope `data` slot.
pub fn to_data<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_has_status_and_timestamp() {
        let envelope = Envelope::ok(Some(serde_json::json!({"k": 1})), None);
        let rendered = envelope.render(OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["data"]["k"], 1);
        assert!(parsed.get("error_code").is_none());
    }

    #[test]
    fn error_envelope_carries_code_and_errors() {
        let envelope = Envelope::error(
            "validation failed".into(),
            "validation_failed",
            vec!["vpc_internet_gateway".into()],
        );
        let rendered = envelope.render(OutputFormat::Yaml);
        let parsed: Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed["status"], "error");
        assert_eq!(parsed["error_code"], "validation_failed");
        assert_eq!(parsed["errors"][0], "vpc_internet_gateway");
    }
}
