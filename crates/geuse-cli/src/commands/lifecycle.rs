//! In-place update and configuration rollback commands.

use std::collections::BTreeMap;

use anyhow::Result;
use geuse_deploy::{RollbackService, UpdateOrchestrator};
use geuse_domain::{RollbackTrigger, UpdateRequest};

use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

fn parse_image_overrides(images: &[String]) -> Result<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for entry in images {
        let Some((name, reference)) = entry.split_once('=') else {
            anyhow::bail!("invalid --image '{entry}': expected NAME=REFERENCE");
        };
        if name.is_empty() || reference.is_empty() {
            anyhow::bail!("invalid --image '{entry}': name and reference must be non-empty");
        }
        parsed.insert(name.to_string(), reference.to_string());
    }
    Ok(parsed)
}

pub async fn update(
    ctx: &CliContext,
    stack: &str,
    instance_type: Option<String>,
    images: Vec<String>,
    force: bool,
) -> Result<u8> {
    let container_images = match parse_image_overrides(&images) {
        Ok(parsed) => parsed,
        Err(e) => {
            emit_error(ctx.format, &e.to_string(), "invalid_request", vec![]);
            return Ok(1);
        }
    };

    let Some(state) = ctx.store.load(stack, true).await? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };

    if !force {
        let confirmed = ctx.confirm(&format!(
            "Apply in-place update to '{stack}' (instance restarts may interrupt service)?"
        ))?;
        if !confirmed {
            emit_success(ctx.format, "aborted", None);
            return Ok(1);
        }
    }

    let client = ctx.client(&state.config.region);
    let orchestrator = UpdateOrchestrator::new(client, ctx.store.clone());
    let request = UpdateRequest {
        deployment_name: stack.to_string(),
        instance_type,
        container_images,
        force,
    };

    match orchestrator.update(&request).await {
        Ok(result) => {
            let mut text = format!(
                "update applied in {:.1}s:\n",
                result.duration_seconds
            );
            for change in &result.changes_applied {
                text.push_str(&format!("  {change}\n"));
            }
            for warning in &result.warnings {
                text.push_str(&format!("  warning: {warning}\n"));
            }
            emit_success(ctx.format, text.trim_end(), to_data(&result));
            Ok(0)
        }
        Err(e) => {
            emit_error(
                ctx.format,
                &format!("{e}. The record stays in 'updating'; run rollback to revert."),
                "update_failed",
                vec![],
            );
            Ok(1)
        }
    }
}

pub async fn rollback(ctx: &CliContext, stack: &str, to_version: u32, force: bool) -> Result<u8> {
    let Some(state) = ctx.store.load(stack, true).await? else {
        emit_error(
            ctx.format,
            &format!("deployment '{stack}' not found"),
            "not_found",
            vec![],
        );
        return Ok(1);
    };

    if !force {
        let confirmed = ctx.confirm(&format!(
            "Roll '{stack}' back to snapshot {to_version}?"
        ))?;
        if !confirmed {
            emit_success(ctx.format, "aborted", None);
            return Ok(1);
        }
    }

    let client = ctx.client(&state.config.region);
    let service = RollbackService::new(client, ctx.store.clone());
    match service
        .rollback(stack, to_version, RollbackTrigger::Manual)
        .await
    {
        Ok(result) => {
            let text = format!(
                "rolled back to snapshot {to_version} in {:.1}s: {}",
                result.duration_seconds,
                if result.changes_reverted.is_empty() {
                    "no differences".to_string()
                } else {
                    result.changes_reverted.join(", ")
                }
            );
            emit_success(ctx.format, &text, to_data(&result));
            Ok(0)
        }
        Err(e) => {
            emit_error(ctx.format, &e.to_string(), "rollback_failed", vec![]);
            Ok(1)
        }
    }
}
