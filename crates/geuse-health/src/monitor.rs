//! Periodic health monitoring with rolling metrics, change detection, and
//! throttled alerts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use geuse_domain::{
    HealthCheckResult, HealthEvent, HealthEventKind, MonitoringState, ServiceMetrics,
    ServiceStatus,
};
use tracing::debug;

use crate::notify::Notifier;
use crate::probe::HealthProbe;
use crate::services::check_all_services;

// ── Stop signal ───────────────────────────────────────────────────────────────

/// Cooperative stop: the loop finishes the probe set in flight, then exits.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: tokio::sync::Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until stopped, whichever comes first.
    /// Returns true when the signal fired.
    pub async fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            _ = self.inner.notify.notified() => true,
            _ = tokio::time::sleep(duration) => self.is_stopped(),
        }
    }
}

// ── Resource sampling ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

/// Optional host resource sampler plugged in by the caller.
pub type ResourceSampler = Arc<dyn Fn(&str) -> Option<ResourceSample> + Send + Sync>;

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// None runs until the stop signal fires.
    pub iterations: Option<u64>,
    pub include_postgres: bool,
    /// Consecutive failures at which an alert fires even without a transition.
    pub alert_threshold: u32,
    /// Per-(service, kind) alert suppression window.
    pub alert_cooldown: Duration,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            iterations: None,
            include_postgres: true,
            alert_threshold: 3,
            alert_cooldown: Duration::from_secs(300),
            cpu_threshold: 90.0,
            memory_threshold: 90.0,
            disk_threshold: 95.0,
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

pub struct HealthMonitor {
    probe: HealthProbe,
    settings: MonitorSettings,
    notifiers: Vec<Box<dyn Notifier>>,
    resource_sampler: Option<ResourceSampler>,
    recent_alerts: Mutex<HashMap<(String, &'static str), DateTime<Utc>>>,
}

impl HealthMonitor {
    pub fn new(settings: MonitorSettings, notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self {
            probe: HealthProbe::new(),
            settings,
            notifiers,
            resource_sampler: None,
            recent_alerts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_resource_sampler(mut self, sampler: ResourceSampler) -> Self {
        self.resource_sampler = Some(sampler);
        self
    }

    /// Run the loop: strictly serial iterations, bounded by
    /// `settings.iterations` or the stop signal. The callback sees the state
    /// after every iteration (live display refresh).
    pub async fn monitor(
        &self,
        deployment_name: &str,
        host: &str,
        stop: Option<StopSignal>,
        mut on_iteration: Option<Box<dyn FnMut(&MonitoringState) + Send>>,
    ) -> MonitoringState {
        let mut state = MonitoringState::new(
            deployment_name,
            self.settings.interval.as_secs(),
        );
        let mut count: u64 = 0;

        loop {
            self.run_once(&mut state, host).await;
            count += 1;

            if let Some(ref mut callback) = on_iteration {
                callback(&state);
            }

            if let Some(limit) = self.settings.iterations {
                if count >= limit {
                    break;
                }
            }
            match &stop {
                Some(signal) => {
                    if signal.is_stopped() || signal.wait_timeout(self.settings.interval).await {
                        break;
                    }
                }
                None => tokio::time::sleep(self.settings.interval).await,
            }
        }
        state
    }

    /// One probe set + metrics update.
    pub async fn run_once(&self, state: &mut MonitoringState, host: &str) {
        let results =
            check_all_services(&self.probe, host, self.settings.include_postgres).await;
        let resources = self
            .resource_sampler
            .as_ref()
            .and_then(|sampler| sampler(host));
        self.record_results(state, &results, resources);
    }

    pub(crate) fn record_results(
        &self,
        state: &mut MonitoringState,
        results: &[HealthCheckResult],
        resources: Option<ResourceSample>,
    ) {
        state.total_checks += 1;
        let mut resource_alert_emitted = false;

        for result in results {
            let mut metrics = state
                .service_metrics
                .get(&result.service_name)
                .cloned()
                .unwrap_or_else(|| ServiceMetrics::new(&result.service_name));
            let previous_status = metrics.last_status;
            metrics.record(result.healthy, result.response_time_ms);
            if let Some(sample) = resources {
                metrics.cpu_percent = sample.cpu;
                metrics.memory_percent = sample.memory;
                metrics.disk_percent = sample.disk;
                metrics.last_resource_check = Some(Utc::now());
            }
            let new_status = metrics.last_status;
            let consecutive_failures = metrics.consecutive_failures;
            state
                .service_metrics
                .insert(result.service_name.clone(), metrics);

            self.notify(HealthEvent::new(
                &result.service_name,
                HealthEventKind::Check,
                Some(previous_status),
                new_status,
                result.error_message.clone(),
            ));

            if previous_status != new_status && previous_status != ServiceStatus::Unknown {
                self.notify(HealthEvent::new(
                    &result.service_name,
                    HealthEventKind::StatusChange,
                    Some(previous_status),
                    new_status,
                    result.error_message.clone(),
                ));
            }

            let became_unhealthy = new_status == ServiceStatus::Unhealthy
                && matches!(
                    previous_status,
                    ServiceStatus::Healthy | ServiceStatus::Unknown
                );
            let persistent_failure = new_status == ServiceStatus::Unhealthy
                && consecutive_failures >= self.settings.alert_threshold;
            if (became_unhealthy || persistent_failure)
                && self.should_alert((result.service_name.clone(), "health"))
            {
                let details = result.error_message.clone().unwrap_or_else(|| {
                    format!("{consecutive_failures} consecutive failures")
                });
                self.notify(HealthEvent::new(
                    &result.service_name,
                    HealthEventKind::Alert,
                    Some(previous_status),
                    new_status,
                    Some(details),
                ));
            }

            if let Some(sample) = resources {
                if !resource_alert_emitted {
                    if let Some(details) = self.resource_breaches(sample) {
                        if self.should_alert(("system".to_string(), "resource")) {
                            resource_alert_emitted = true;
                            self.notify(HealthEvent::new(
                                "system",
                                HealthEventKind::Alert,
                                None,
                                ServiceStatus::Unhealthy,
                                Some(details),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn resource_breaches(&self, sample: ResourceSample) -> Option<String> {
        let mut breaches = Vec::new();
        if sample.cpu > self.settings.cpu_threshold {
            breaches.push(format!("CPU {:.1}%", sample.cpu));
        }
        if sample.memory > self.settings.memory_threshold {
            breaches.push(format!("Memory {:.1}%", sample.memory));
        }
        if sample.disk > self.settings.disk_threshold {
            breaches.push(format!("Disk {:.1}%", sample.disk));
        }
        if breaches.is_empty() {
            None
        } else {
            Some(breaches.join("; "))
        }
    }

    fn should_alert(&self, key: (String, &'static str)) -> bool {
        let now = Utc::now();
        let mut recent = self.recent_alerts.lock().expect("alert map poisoned");
        if let Some(last) = recent.get(&key) {
            let elapsed = (now - *last).num_seconds();
            if elapsed < self.settings.alert_cooldown.as_secs() as i64 {
                return false;
            }
        }
        recent.insert(key, now);
        true
    }

    fn notify(&self, event: HealthEvent) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&event) {
                debug!(error = %e, "notifier error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HealthError;

    struct Capture(Mutex<Vec<HealthEvent>>);

    impl Notifier for Arc<Capture> {
        fn notify(&self, event: &HealthEvent) -> Result<(), HealthError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn result(service: &str, healthy: bool) -> HealthCheckResult {
        HealthCheckResult {
            service_name: service.to_string(),
            healthy,
            status_code: Some(if healthy { 200 } else { 503 }),
            response_time_ms: 10.0,
            error_message: (!healthy).then(|| "boom".to_string()),
            endpoint: format!("http://h/{service}"),
            checked_at: Utc::now(),
            retry_count: 0,
        }
    }

    fn monitor_with_capture(settings: MonitorSettings) -> (HealthMonitor, Arc<Capture>) {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let monitor = HealthMonitor::new(settings, vec![Box::new(capture.clone())]);
        (monitor, capture)
    }

    fn events_of_kind(capture: &Capture, kind: HealthEventKind) -> Vec<HealthEvent> {
        capture
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == kind)
            .cloned()
            .collect()
    }

    #[test]
    fn totals_and_uptime_stay_consistent() {
        let (monitor, _capture) = monitor_with_capture(MonitorSettings::default());
        let mut state = MonitoringState::new("demo", 60);
        monitor.record_results(&mut state, &[result("n8n", true)], None);
        monitor.record_results(&mut state, &[result("n8n", false)], None);
        monitor.record_results(&mut state, &[result("n8n", true)], None);

        let metrics = &state.service_metrics["n8n"];
        assert_eq!(metrics.successful_checks + metrics.failed_checks, metrics.total_checks);
        let expected = metrics.successful_checks as f64 / metrics.total_checks as f64 * 100.0;
        assert!((metrics.uptime_percentage - expected).abs() < 1e-9);
    }

    #[test]
    fn transition_emits_status_change_but_not_from_unknown() {
        let (monitor, capture) = monitor_with_capture(MonitorSettings::default());
        let mut state = MonitoringState::new("demo", 60);

        // unknown -> healthy: no status_change.
        monitor.record_results(&mut state, &[result("n8n", true)], None);
        assert!(events_of_kind(&capture, HealthEventKind::StatusChange).is_empty());

        // healthy -> unhealthy: one status_change.
        monitor.record_results(&mut state, &[result("n8n", false)], None);
        let changes = events_of_kind(&capture, HealthEventKind::StatusChange);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].previous_status, Some(ServiceStatus::Healthy));
        assert_eq!(changes[0].new_status, ServiceStatus::Unhealthy);
    }

    #[test]
    fn alerts_fire_on_transition_and_are_throttled() {
        let (monitor, capture) = monitor_with_capture(MonitorSettings::default());
        let mut state = MonitoringState::new("demo", 60);

        monitor.record_results(&mut state, &[result("n8n", true)], None);
        monitor.record_results(&mut state, &[result("n8n", false)], None);
        monitor.record_results(&mut state, &[result("n8n", false)], None);
        monitor.record_results(&mut state, &[result("n8n", false)], None);

        // The transition alert fires once; subsequent failures are inside the
        // cooldown window.
        let alerts = events_of_kind(&capture, HealthEventKind::Alert);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn threshold_alert_fires_without_cooldown() {
        let settings = MonitorSettings {
            alert_cooldown: Duration::from_secs(0),
            ..Default::default()
        };
        let (monitor, capture) = monitor_with_capture(settings);
        let mut state = MonitoringState::new("demo", 60);

        for _ in 0..4 {
            monitor.record_results(&mut state, &[result("qdrant", false)], None);
        }
        let alerts = events_of_kind(&capture, HealthEventKind::Alert);
        // First failure transitions from unknown; the third and fourth reach
        // the consecutive-failures threshold.
        assert!(alerts.len() >= 3);
        assert_eq!(state.service_metrics["qdrant"].consecutive_failures, 4);
    }

    #[test]
    fn resource_breach_emits_single_system_alert() {
        let settings = MonitorSettings {
            alert_cooldown: Duration::from_secs(300),
            ..Default::default()
        };
        let (monitor, capture) = monitor_with_capture(settings);
        let mut state = MonitoringState::new("demo", 60);

        let sample = ResourceSample {
            cpu: 95.0,
            memory: 50.0,
            disk: 97.0,
        };
        monitor.record_results(
            &mut state,
            &[result("n8n", true), result("qdrant", true)],
            Some(sample),
        );

        let alerts = events_of_kind(&capture, HealthEventKind::Alert);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].service_name, "system");
        let details = alerts[0].details.as_deref().unwrap();
        assert!(details.contains("CPU 95.0%"));
        assert!(details.contains("Disk 97.0%"));
        assert!(!details.contains("Memory"));
    }

    #[tokio::test]
    async fn stop_signal_interrupts_the_sleep() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_timeout(Duration::from_secs(30)).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.stop();
        assert!(handle.await.unwrap());
    }
}
