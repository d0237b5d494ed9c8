//! Local-record commands: list, inspect, info, status, cost, logs, backups,
//! restore, and state-directory initialisation.

use std::path::PathBuf;

use anyhow::Result;
use geuse_aws::tags::{DEPLOYMENT_TAG_KEY, STACK_TAG_KEY};
use geuse_aws::Ec2Service;
use geuse_health::{check_all_services, HealthProbe};
use serde_json::json;

use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

pub async fn list(ctx: &CliContext, discover_from_aws: bool, region: &str) -> Result<u8> {
    if discover_from_aws {
        return discover(ctx, region).await;
    }

    let states = ctx.store.list().await?;
    if ctx.format.is_text() {
        if states.is_empty() {
            println!("no deployments recorded");
        } else {
            println!(
                "{:<24} {:<12} {:<12} {:<10} {}",
                "STACK", "STATUS", "REGION", "TIER", "UPDATED"
            );
            for state in &states {
                println!(
                    "{:<24} {:<12} {:<12} {:<10} {}",
                    state.stack_name,
                    state.status.to_string(),
                    state.config.region,
                    state.config.tier.to_string(),
                    state.updated_at.format("%Y-%m-%d %H:%M:%SZ")
                );
            }
        }
    }
    emit_success(ctx.format, "", to_data(&states));
    Ok(0)
}

async fn discover(ctx: &CliContext, region: &str) -> Result<u8> {
    let ec2 = Ec2Service::new(ctx.client(region));
    let instances = ec2
        .describe_instances_by_tag_keys(&[DEPLOYMENT_TAG_KEY, STACK_TAG_KEY])
        .await?;

    let mut rows = Vec::new();
    for instance in &instances {
        let stack = instance
            .tags
            .get(DEPLOYMENT_TAG_KEY)
            .or_else(|| instance.tags.get(STACK_TAG_KEY))
            .cloned()
            .unwrap_or_default();
        rows.push(json!({
            "stack": stack,
            "instance_id": instance.instance_id,
            "state": instance.state,
            "instance_type": instance.instance_type,
            "public_ip": instance.public_ip,
            "region": region,
        }));
    }

    if ctx.format.is_text() {
        if rows.is_empty() {
            println!("no tagged instances found in {region}");
        } else {
            println!("{:<24} {:<20} {:<12} {}", "STACK", "INSTANCE", "STATE", "TYPE");
            for instance in &instances {
                let stack = instance
                    .tags
                    .get(DEPLOYMENT_TAG_KEY)
                    .or_else(|| instance.tags.get(STACK_TAG_KEY))
                    .map(String::as_str)
                    .unwrap_or("-");
                println!(
                    "{:<24} {:<20} {:<12} {}",
                    stack, instance.instance_id, instance.state, instance.instance_type
                );
            }
        }
    }
    emit_success(ctx.format, "", Some(json!(rows)));
    Ok(0)
}

pub async fn inspect(ctx: &CliContext, stack: &str) -> Result<u8> {
    let Some(state) = ctx.store.load(stack, true).await? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };
    if ctx.format.is_text() {
        // The full record, pretty-printed.
        println!("{}", ctx.store.export_json(&state, true)?);
    }
    emit_success(ctx.format, "", to_data(&state));
    Ok(0)
}

pub async fn info(
    ctx: &CliContext,
    stack: &str,
    host: Option<String>,
    skip_health: bool,
) -> Result<u8> {
    let Some(state) = ctx.store.load(stack, true).await? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };

    let mut text = format!(
        "{} ({}, {})\n  status: {}\n  instance: {} ({})\n  url: {}\n",
        state.stack_name,
        state.config.tier,
        state.config.region,
        state.status,
        state.instance_id,
        state.cost.instance_type,
        state.n8n_url,
    );
    let mut data = serde_json::to_value(&state)?;

    if !skip_health {
        let target = host.or_else(|| state.host().map(str::to_string));
        if let Some(target) = target {
            let probe = HealthProbe::new();
            let results = check_all_services(&probe, &target, true).await;
            let healthy = results.iter().filter(|r| r.healthy).count();
            text.push_str(&format!("  health: {healthy}/{} healthy\n", results.len()));
            data["health"] = serde_json::to_value(&results)?;
        }
    }

    emit_success(ctx.format, text.trim_end(), Some(data));
    Ok(0)
}

pub async fn status(ctx: &CliContext, stack: &str) -> Result<u8> {
    let Some(state) = ctx.store.load(stack, true).await? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };
    emit_success(
        ctx.format,
        &format!("{}: {}", state.stack_name, state.status),
        Some(json!({
            "stack_name": state.stack_name,
            "status": state.status,
            "updated_at": state.updated_at,
        })),
    );
    Ok(0)
}

pub async fn cost(ctx: &CliContext, stack: &str) -> Result<u8> {
    let Some(state) = ctx.store.load(stack, true).await? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };
    let cost = &state.cost;
    let text = format!(
        "{}: {} {} at ${}/hr, estimated ${}/month (filesystem ${}/GB-month){}",
        state.stack_name,
        if cost.is_spot { "spot" } else { "on-demand" },
        cost.instance_type,
        cost.spot_price_per_hour.unwrap_or(cost.on_demand_price_per_hour),
        cost.estimated_monthly_cost,
        cost.efs_gb_month_price,
        cost.budget_limit
            .map(|b| format!(", budget ${b}/month"))
            .unwrap_or_default(),
    );
    emit_success(ctx.format, &text, to_data(cost));
    Ok(0)
}

pub async fn logs(ctx: &CliContext, stack: &str, tail: usize) -> Result<u8> {
    let log_dir = ctx.store.base_dir().join("logs");
    let candidates = [
        log_dir.join(format!("{stack}.monitor.out.log")),
        log_dir.join("health_events.log"),
    ];
    let Some(path) = candidates.iter().find(|p| p.exists()) else {
        emit_error(
            ctx.format,
            &format!("no logs found for '{stack}' under {}", log_dir.display()),
            "not_found",
            vec![],
        );
        return Ok(1);
    };

    let contents = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(tail);
    let tail_lines = &lines[start..];

    if ctx.format.is_text() {
        for line in tail_lines {
            println!("{line}");
        }
    }
    emit_success(
        ctx.format,
        "",
        Some(json!({
            "path": path.display().to_string(),
            "lines": tail_lines,
        })),
    );
    Ok(0)
}

pub async fn backup_create(ctx: &CliContext, stack: &str, label: Option<String>) -> Result<u8> {
    match ctx.store.backup(stack, label.as_deref()) {
        Ok(path) => {
            emit_success(
                ctx.format,
                &format!("backup written to {}", path.display()),
                Some(json!({ "path": path.display().to_string() })),
            );
            Ok(0)
        }
        Err(e) => {
            emit_error(ctx.format, &e.to_string(), "backup_failed", vec![]);
            Ok(1)
        }
    }
}

pub async fn backup_list(ctx: &CliContext, stack: Option<String>) -> Result<u8> {
    let backups = ctx.store.list_backups(stack.as_deref())?;
    if ctx.format.is_text() {
        if backups.is_empty() {
            println!("no backups found");
        } else {
            for backup in &backups {
                println!("{}", backup.display());
            }
        }
    }
    let paths: Vec<String> = backups.iter().map(|p| p.display().to_string()).collect();
    emit_success(ctx.format, "", Some(json!(paths)));
    Ok(0)
}

pub async fn restore(
    ctx: &CliContext,
    stack: &str,
    latest: bool,
    backup: Option<PathBuf>,
) -> Result<u8> {
    let backup_path = match (latest, backup) {
        (_, Some(path)) => path,
        (true, None) => {
            let Some(newest) = ctx.store.list_backups(Some(stack))?.into_iter().next() else {
                emit_error(
                    ctx.format,
                    &format!("no backups available for '{stack}'"),
                    "not_found",
                    vec![],
                );
                return Ok(1);
            };
            newest
        }
        (false, None) => {
            emit_error(
                ctx.format,
                "pass --latest or --backup PATH",
                "invalid_request",
                vec![],
            );
            return Ok(1);
        }
    };

    match ctx.store.restore_from_backup(stack, &backup_path) {
        Ok(state) => {
            emit_success(
                ctx.format,
                &format!(
                    "restored '{stack}' from {} (status {})",
                    backup_path.display(),
                    state.status
                ),
                to_data(&state),
            );
            Ok(0)
        }
        Err(e) => {
            emit_error(ctx.format, &e.to_string(), "restore_failed", vec![]);
            Ok(1)
        }
    }
}

pub async fn init(ctx: &CliContext, directory: Option<PathBuf>, force: bool) -> Result<u8> {
    use geuse_store::StateStore;

    // Re-open against an explicit directory when given; open() creates the
    // full sub-tree.
    let store = match directory {
        Some(dir) => StateStore::open(Some(dir))?,
        None => ctx.store.clone(),
    };

    let defaults = store.base_dir().join("config").join("defaults.yaml");
    if !defaults.exists() || force {
        std::fs::write(
            &defaults,
            "# GeuseMaker defaults; flags override these values.\nregion: us-east-1\ntier: dev\ninstance_type: t3.medium\nuse_spot: true\n",
        )?;
    }

    emit_success(
        ctx.format,
        &format!("state directory initialised at {}", store.base_dir().display()),
        Some(json!({ "base": store.base_dir().display().to_string() })),
    );
    Ok(0)
}
