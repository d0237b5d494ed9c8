pub mod error;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod services;

pub use error::HealthError;
pub use monitor::{HealthMonitor, MonitorSettings, ResourceSample, StopSignal};
pub use notify::{ConsoleNotifier, LogNotifier, Notifier};
pub use probe::HealthProbe;
pub use services::{check_all_services, default_service_checks, POSTGRES_PORT};
