use anyhow::Result;
use geuse_deploy::OrphanDetector;
use geuse_domain::CleanupReport;

use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

fn render_report_text(report: &CleanupReport) -> String {
    let mut out = format!(
        "scanned {}: {} orphans found, {} deleted, {} preserved\n",
        report.scanned_regions.join(", "),
        report.orphans_found,
        report.orphans_deleted,
        report.orphans_preserved
    );
    for deleted in &report.deleted_resources {
        out.push_str(&format!(
            "  deleted {:<16} {}\n",
            deleted.resource_type, deleted.resource_id
        ));
    }
    for error in &report.errors {
        out.push_str(&format!("  error: {error}\n"));
    }
    out.push_str(&format!(
        "estimated monthly savings: ${}",
        report.estimated_monthly_savings
    ));
    out
}

pub async fn run(ctx: &CliContext, dry_run: bool, all: bool, region: &str) -> Result<u8> {
    let client = ctx.client(region);
    let detector = OrphanDetector::new(client, ctx.store.clone());
    let orphans = detector.detect_orphans().await?;

    let deleting = if dry_run {
        false
    } else if all {
        true
    } else if orphans.is_empty() {
        false
    } else {
        ctx.confirm(&format!(
            "Delete {} orphaned resource(s) in {region}?",
            orphans.len()
        ))?
    };

    let (deleted, errors) = detector.delete_orphans(&orphans, !deleting).await;
    let report = detector.build_report(&orphans, deleted, errors, !deleting);

    let code = if report.errors.is_empty() { 0 } else { 1 };
    if report.errors.is_empty() {
        emit_success(ctx.format, &render_report_text(&report), to_data(&report));
    } else {
        if ctx.format.is_text() {
            println!("{}", render_report_text(&report));
        }
        emit_error(
            ctx.format,
            "cleanup finished with errors",
            "cleanup_failed",
            report.errors.clone(),
        );
    }
    Ok(code)
}
