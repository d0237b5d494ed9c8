//! One-shot health probes and the continuous monitoring loop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use geuse_domain::HealthCheckResult;
use geuse_health::{
    ConsoleNotifier, HealthMonitor, HealthProbe, LogNotifier, MonitorSettings, Notifier,
    StopSignal,
};
use serde_json::json;
use tracing::info;

use crate::cli::LogLevelArg;
use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

fn render_results_text(results: &[HealthCheckResult]) -> String {
    let mut out = String::new();
    for result in results {
        let mark = if result.healthy { "UP" } else { "DOWN" };
        out.push_str(&format!(
            "[{mark:>4}] {:<10} {:>7.1} ms  {}",
            result.service_name, result.response_time_ms, result.endpoint
        ));
        if let Some(error) = &result.error_message {
            out.push_str(&format!("  ({error})"));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

pub async fn health(ctx: &CliContext, host: &str, include_postgres: bool, timeout: u64) -> Result<u8> {
    let probe = HealthProbe::new();
    let mut configs = geuse_health::default_service_checks(host);
    for config in &mut configs {
        config.timeout_seconds = timeout as f64;
    }
    let mut results = probe.check_all(&configs).await;
    if include_postgres {
        results.push(
            probe
                .check_tcp(
                    host,
                    geuse_health::POSTGRES_PORT,
                    Duration::from_secs(timeout),
                    "postgres",
                )
                .await,
        );
    }

    let healthy = results.iter().filter(|r| r.healthy).count();
    let all_healthy = healthy == results.len();
    let text = format!(
        "{}\n{healthy}/{} services healthy",
        render_results_text(&results),
        results.len()
    );
    if all_healthy {
        emit_success(ctx.format, &text, to_data(&results));
        Ok(0)
    } else {
        if ctx.format.is_text() {
            println!("{text}");
        }
        let failing: Vec<String> = results
            .iter()
            .filter(|r| !r.healthy)
            .map(|r| r.service_name.clone())
            .collect();
        emit_error(ctx.format, "deployment unhealthy", "unhealthy", failing);
        Ok(1)
    }
}

fn pid_path(ctx: &CliContext, stack: &str) -> PathBuf {
    ctx.store.monitoring_dir().join(format!("{stack}.pid"))
}

fn log_dir_or_default(ctx: &CliContext, log_dir: Option<PathBuf>) -> PathBuf {
    log_dir.unwrap_or_else(|| ctx.store.base_dir().join("logs"))
}

#[allow(clippy::too_many_arguments)]
pub async fn start(
    ctx: &CliContext,
    stack: &str,
    host: Option<String>,
    interval: u64,
    checks: Option<u64>,
    background: bool,
    log_dir: Option<PathBuf>,
    log_level: LogLevelArg,
    include_postgres: bool,
) -> Result<u8> {
    let host = match host {
        Some(host) => host,
        None => {
            let Some(state) = ctx.store.load(stack, true).await? else {
                emit_error(
                    ctx.format,
                    &format!("deployment '{stack}' not found"),
                    "not_found",
                    vec![],
                );
                return Ok(1);
            };
            match state.host() {
                Some(host) => host.to_string(),
                None => {
                    emit_error(
                        ctx.format,
                        "deployment has no reachable host address",
                        "no_host",
                        vec![],
                    );
                    return Ok(1);
                }
            }
        }
    };
    let log_dir = log_dir_or_default(ctx, log_dir);

    if background {
        return spawn_background(ctx, stack, &host, interval, checks, &log_dir, include_postgres);
    }

    let log_path = log_dir.join("health_events.log");
    let notifiers: Vec<Box<dyn Notifier>> = vec![
        Box::new(LogNotifier::new(log_path)?),
        Box::new(ConsoleNotifier),
    ];
    let settings = MonitorSettings {
        interval: Duration::from_secs(interval),
        iterations: checks,
        include_postgres,
        ..Default::default()
    };
    let monitor = HealthMonitor::new(settings, notifiers);

    // Ctrl-C finishes the probe set in flight, then exits cleanly.
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler_stop.stop();
        }
    });

    let _ = log_level; // level shaping happens through the tracing filter
    info!(stack, host = %host, interval, "monitoring started");
    let state = monitor.monitor(stack, &host, Some(stop), None).await;

    let text = format!(
        "monitoring finished after {} iteration(s); overall uptime {:.1}%",
        state.total_checks,
        state.overall_uptime_percentage()
    );
    emit_success(ctx.format, &text, to_data(&state));
    Ok(0)
}

/// Re-exec this binary detached, with stdout/stderr routed to the monitor
/// log files and the child pid recorded for `monitor stop`.
fn spawn_background(
    ctx: &CliContext,
    stack: &str,
    host: &str,
    interval: u64,
    checks: Option<u64>,
    log_dir: &std::path::Path,
    include_postgres: bool,
) -> Result<u8> {
    std::fs::create_dir_all(log_dir)?;
    let out = std::fs::File::create(log_dir.join(format!("{stack}.monitor.out.log")))?;
    let err = std::fs::File::create(log_dir.join(format!("{stack}.monitor.err.log")))?;

    let exe = std::env::current_exe().context("current executable not resolvable")?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("--state-dir")
        .arg(ctx.store.base_dir())
        .args(["monitor", "start", stack, "--host", host])
        .args(["--interval", &interval.to_string()])
        .args(["--log-dir", &log_dir.display().to_string()]);
    if let Some(checks) = checks {
        command.args(["--checks", &checks.to_string()]);
    }
    if !include_postgres {
        command.arg("--skip-postgres");
    }
    let child = command
        .stdin(std::process::Stdio::null())
        .stdout(out)
        .stderr(err)
        .spawn()?;

    std::fs::write(pid_path(ctx, stack), child.id().to_string())?;
    let text = format!("monitoring '{stack}' in the background (pid {})", child.id());
    emit_success(ctx.format, &text, Some(json!({ "pid": child.id() })));
    Ok(0)
}

pub async fn stop(ctx: &CliContext, stack: &str) -> Result<u8> {
    let pid_file = pid_path(ctx, stack);
    let Ok(raw) = std::fs::read_to_string(&pid_file) else {
        emit_error(
            ctx.format,
            &format!("no background monitor recorded for '{stack}'"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };
    let pid = raw.trim().to_string();

    let status = std::process::Command::new("kill").arg(&pid).status();
    let _ = std::fs::remove_file(&pid_file);
    match status {
        Ok(status) if status.success() => {
            emit_success(
                ctx.format,
                &format!("stopped monitor for '{stack}' (pid {pid})"),
                Some(json!({ "pid": pid })),
            );
            Ok(0)
        }
        _ => {
            emit_error(
                ctx.format,
                &format!("monitor process {pid} was not running; removed stale pid file"),
                "not_running",
                vec![],
            );
            Ok(1)
        }
    }
}
