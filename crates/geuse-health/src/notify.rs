//! Notification sinks for monitoring events.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use geuse_domain::{HealthEvent, HealthEventKind};
use tracing::{debug, info, warn};

use crate::error::HealthError;

/// A sink for monitoring events. Failures are logged and swallowed by the
/// monitor; a broken sink must never stop the loop.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &HealthEvent) -> Result<(), HealthError>;
}

// ── Console ───────────────────────────────────────────────────────────────────

/// Emits events as tracing records: checks at debug, transitions at info,
/// alerts at warn.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, event: &HealthEvent) -> Result<(), HealthError> {
        let previous = event
            .previous_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        match event.event_type {
            HealthEventKind::Check => {
                debug!(
                    service = %event.service_name,
                    status = %event.new_status,
                    details = event.details.as_deref().unwrap_or(""),
                    "health check"
                );
            }
            HealthEventKind::StatusChange => {
                info!(
                    service = %event.service_name,
                    from = %previous,
                    to = %event.new_status,
                    "service status changed"
                );
            }
            HealthEventKind::Alert => {
                warn!(
                    service = %event.service_name,
                    from = %previous,
                    to = %event.new_status,
                    details = event.details.as_deref().unwrap_or(""),
                    "health alert"
                );
            }
        }
        Ok(())
    }
}

// ── JSONL file log ────────────────────────────────────────────────────────────

const DEFAULT_MAX_BYTES: u64 = 1_000_000;

/// Newline-delimited JSON event log, rotated once at `max_bytes` to `.log.1`.
pub struct LogNotifier {
    log_path: PathBuf,
    max_bytes: u64,
}

impl LogNotifier {
    pub fn new(log_path: PathBuf) -> Result<Self, HealthError> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| HealthError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        Ok(Self {
            log_path,
            max_bytes: DEFAULT_MAX_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn rotate_if_needed(&self) -> Result<(), HealthError> {
        let size = match fs::metadata(&self.log_path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size > self.max_bytes {
            let mut rotated = self.log_path.clone();
            rotated.set_extension("log.1");
            fs::rename(&self.log_path, &rotated).map_err(|e| HealthError::Io {
                path: rotated.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, event: &HealthEvent) -> Result<(), HealthError> {
        self.rotate_if_needed()?;
        let line = serde_json::to_string(event).unwrap_or_default();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| HealthError::Io {
                path: self.log_path.display().to_string(),
                source: e,
            })?;
        writeln!(file, "{line}").map_err(|e| HealthError::Io {
            path: self.log_path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_domain::ServiceStatus;
    use tempfile::TempDir;

    fn event(service: &str) -> HealthEvent {
        HealthEvent::new(
            service,
            HealthEventKind::Check,
            Some(ServiceStatus::Unknown),
            ServiceStatus::Healthy,
            None,
        )
    }

    #[test]
    fn events_append_as_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health_events.log");
        let notifier = LogNotifier::new(path.clone()).unwrap();
        notifier.notify(&event("n8n")).unwrap();
        notifier.notify(&event("qdrant")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: HealthEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.service_name, "n8n");
    }

    #[test]
    fn log_rotates_past_size_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health_events.log");
        let notifier = LogNotifier::new(path.clone()).unwrap().with_max_bytes(64);

        for _ in 0..10 {
            notifier.notify(&event("n8n")).unwrap();
        }
        let rotated = dir.path().join("health_events.log.1");
        assert!(rotated.exists(), "rotation target should exist");
        assert!(path.exists(), "live log should be recreated");
    }
}
