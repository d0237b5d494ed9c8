use anyhow::Result;
use geuse_deploy::{DestroyOptions, DestructionService};
use geuse_domain::DestructionResult;

use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

fn render_result_text(result: &DestructionResult) -> String {
    let mut out = String::new();
    for deleted in &result.deleted_resources {
        out.push_str(&format!(
            "deleted   {:<18} {}\n",
            deleted.resource_type, deleted.resource_id
        ));
    }
    for preserved in &result.preserved_resources {
        out.push_str(&format!(
            "preserved {:<18} {} ({})\n",
            preserved.resource_type, preserved.resource_id, preserved.reason
        ));
    }
    for error in &result.errors {
        out.push_str(&format!("error     {error}\n"));
    }
    if let Some(path) = &result.archived_state_path {
        out.push_str(&format!("archived state: {path}\n"));
    }
    out.push_str(&format!(
        "destruction {} in {:.1}s",
        if result.success { "succeeded" } else { "finished with errors" },
        result.duration_seconds
    ));
    out
}

pub async fn run(
    ctx: &CliContext,
    stack: &str,
    force: bool,
    dry_run: bool,
    preserve_efs: bool,
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

    if !dry_run && !force {
        let confirmed = ctx.confirm(&format!(
            "Destroy deployment '{stack}' and delete its created resources?"
        ))?;
        if !confirmed {
            emit_success(ctx.format, "aborted", None);
            return Ok(1);
        }
    }

    let client = ctx.client(&state.config.region);
    let destruction = DestructionService::new(client, ctx.store.clone());
    let result = destruction
        .destroy(&state, DestroyOptions { dry_run, preserve_efs })
        .await?;

    let code = if result.success { 0 } else { 1 };
    if result.success {
        emit_success(ctx.format, &render_result_text(&result), to_data(&result));
    } else {
        if ctx.format.is_text() {
            println!("{}", render_result_text(&result));
        }
        emit_error(
            ctx.format,
            "destruction finished with errors",
            "destroy_failed",
            result.errors.clone(),
        );
    }
    Ok(code)
}
