//! The fixed set of services a deployment hosts.

use std::time::Duration;

use geuse_domain::{HealthCheckConfig, HealthCheckResult};

use crate::probe::HealthProbe;

pub const N8N_PORT: u16 = 5678;
pub const OLLAMA_PORT: u16 = 11434;
pub const QDRANT_PORT: u16 = 6333;
pub const CRAWL4AI_PORT: u16 = 11235;
pub const POSTGRES_PORT: u16 = 5432;

fn http_check(service: &str, host: &str, port: u16, path: &str) -> HealthCheckConfig {
    HealthCheckConfig::http(service, format!("http://{host}:{port}{path}"))
}

/// HTTP checks for the bundled service stack.
pub fn default_service_checks(host: &str) -> Vec<HealthCheckConfig> {
    vec![
        http_check("n8n", host, N8N_PORT, "/healthz"),
        http_check("ollama", host, OLLAMA_PORT, "/api/version"),
        http_check("qdrant", host, QDRANT_PORT, "/health"),
        http_check("qdrant-ui", host, QDRANT_PORT, "/dashboard"),
        http_check("crawl4ai", host, CRAWL4AI_PORT, "/health"),
    ]
}

/// Probe every service in parallel; postgres is a raw-socket check.
pub async fn check_all_services(
    probe: &HealthProbe,
    host: &str,
    include_postgres: bool,
) -> Vec<HealthCheckResult> {
    let mut results = probe.check_all(&default_service_checks(host)).await;
    if include_postgres {
        results.push(
            probe
                .check_tcp(host, POSTGRES_PORT, Duration::from_secs(5), "postgres")
                .await,
        );
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_set_covers_the_stack() {
        let checks = default_service_checks("10.0.0.5");
        let names: Vec<&str> = checks.iter().map(|c| c.service_name.as_str()).collect();
        assert_eq!(names, vec!["n8n", "ollama", "qdrant", "qdrant-ui", "crawl4ai"]);
        assert_eq!(checks[0].endpoint, "http://10.0.0.5:5678/healthz");
        assert_eq!(checks[1].endpoint, "http://10.0.0.5:11434/api/version");
        assert_eq!(checks[3].endpoint, "http://10.0.0.5:6333/dashboard");
    }
}
