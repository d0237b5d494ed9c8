use std::path::PathBuf;

use anyhow::Result;
use geuse_health::{check_all_services, HealthProbe};
use geuse_validate::PostDeploymentValidator;
use serde_json::json;

use crate::commands::deploy::render_report_text;
use crate::context::CliContext;
use crate::output::{emit_error, emit_success};

/// Build a deployment report: the stored record, optionally refreshed live
/// health, optionally provider-side post-deployment checks.
pub async fn run(
    ctx: &CliContext,
    stack: &str,
    refresh: bool,
    post: bool,
    output_file: Option<PathBuf>,
) -> Result<u8> {
    // Sync read surface: the report path never mutates the record.
    let Some(state) = ctx.store.load_sync(stack, true)? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };

    let mut report = json!({
        "stack_name": state.stack_name,
        "status": state.status,
        "created_at": state.created_at,
        "updated_at": state.updated_at,
        "region": state.config.region,
        "tier": state.config.tier,
        "url": state.n8n_url,
        "instance": {
            "id": state.instance_id,
            "type": state.cost.instance_type,
            "public_ip": state.public_ip,
            "private_ip": state.private_ip,
        },
        "cost": state.cost,
        "resources": {
            "vpc_id": state.vpc_id,
            "subnet_ids": state.subnet_ids,
            "security_group_id": state.security_group_id,
            "efs_id": state.efs_id,
            "alb_dns": state.alb_dns,
            "cloudfront_domain": state.cloudfront_domain,
        },
        "resource_provenance": state.resource_provenance,
    });

    let mut text = format!(
        "Report for {} ({}, {})\n  status: {}\n  url: {}\n",
        state.stack_name, state.config.tier, state.config.region, state.status, state.n8n_url
    );

    if refresh {
        if let Some(host) = state.host() {
            let probe = HealthProbe::new();
            let results = check_all_services(&probe, host, true).await;
            let healthy = results.iter().filter(|r| r.healthy).count();
            text.push_str(&format!(
                "  health: {healthy}/{} services healthy\n",
                results.len()
            ));
            report["health"] = serde_json::to_value(&results)?;
        } else {
            text.push_str("  health: no reachable host\n");
        }
    }

    if post {
        let client = ctx.client(&state.config.region);
        let validator = PostDeploymentValidator::new(client);
        let post_report = validator.validate(&state, refresh).await;
        text.push_str(&render_report_text(&post_report));
        text.push('\n');
        report["post_deployment"] = serde_json::to_value(&post_report)?;
    }

    if let Some(path) = output_file {
        let rendered = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(&report)?,
            _ => serde_json::to_string_pretty(&report)?,
        };
        std::fs::write(&path, rendered)?;
        text.push_str(&format!("report written to {}\n", path.display()));
    }

    emit_success(ctx.format, text.trim_end(), Some(report));
    Ok(0)
}
