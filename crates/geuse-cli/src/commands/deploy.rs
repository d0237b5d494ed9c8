use std::sync::Arc;

use anyhow::Result;
use geuse_deploy::{Orchestrator, Services};
use geuse_domain::{DeploymentConfig, DeploymentState, ValidationReport};
use geuse_market::{CapacityService, PricingService, SelectionEngine};
use geuse_validate::PreDeploymentValidator;

use crate::cli::DeployArgs;
use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

pub(crate) fn build_config(args: &DeployArgs) -> Result<DeploymentConfig> {
    let mut config = DeploymentConfig::new(
        args.stack_name.clone(),
        args.tier.clone().into(),
        args.region.clone(),
    )?;
    if let Some(instance_type) = &args.instance_type {
        config.instance_type = instance_type.clone();
    }
    config.use_spot = args.use_spot || !args.no_spot;
    if let Some(os_type) = &args.os_type {
        config.os_type = os_type.clone().into();
    }
    if let Some(architecture) = &args.architecture {
        config.architecture = architecture.clone().into();
    }
    if let Some(ami_type) = &args.ami_type {
        config.ami_type = ami_type.clone().into();
    }
    config.ami_id = args.ami_id.clone();
    config.vpc_id = args.vpc_id.clone();
    config.subnet_id = args.subnet_id.clone();
    config.storage_subnet_id = args.storage_subnet_id.clone();
    config.security_group_id = args.security_group_id.clone();
    config.efs_id = args.efs_id.clone();
    config.keypair_name = args.keypair_name.clone();
    config.attach_internet_gateway = args.attach_internet_gateway;
    config.enable_alb = args.enable_alb;
    config.enable_cdn = args.enable_cdn;
    config.alb_certificate_arn = args.alb_certificate_arn.clone();
    config.cloudfront_certificate_arn = args.cloudfront_certificate_arn.clone();
    config.enable_https = !args.no_https;
    config.force_https_redirect = !args.no_https_redirect;
    config.auto_rollback_on_failure = !args.no_rollback;
    config.validate()?;
    Ok(config)
}

pub(crate) fn render_report_text(report: &ValidationReport) -> String {
    let mut out = String::new();
    for check in &report.checks {
        let mark = if check.passed { "PASS" } else { "FAIL" };
        out.push_str(&format!(
            "[{mark}] {:<24} {}\n",
            check.check_name, check.message
        ));
        if let Some(details) = &check.details {
            out.push_str(&format!("       {details}\n"));
        }
        if !check.passed {
            if let Some(remediation) = &check.remediation {
                out.push_str(&format!("       remediation: {remediation}\n"));
            }
        }
    }
    let summary = report.summary();
    out.push_str(&format!(
        "{} checks: {} passed, {} failed, {} warnings ({:?})",
        summary.total_checks,
        summary.passed,
        summary.failed,
        summary.warnings,
        summary.overall_status
    ));
    out
}

fn render_state_text(state: &DeploymentState) -> String {
    let mut out = format!(
        "Deployment {} is {}\n  instance: {} ({})\n  url: {}\n",
        state.stack_name,
        state.status,
        state.instance_id,
        state.cost.instance_type,
        state.n8n_url
    );
    out.push_str(&format!(
        "  vpc: {}  sg: {}  efs: {}\n",
        state.vpc_id, state.security_group_id, state.efs_id
    ));
    if let Some(dns) = &state.alb_dns {
        out.push_str(&format!("  load balancer: {dns}\n"));
    }
    if let Some(domain) = &state.cloudfront_domain {
        out.push_str(&format!("  cdn: {domain}\n"));
    }
    out.push_str(&format!(
        "  pricing: {} at ${}/hr (estimated ${}/month)",
        if state.cost.is_spot { "spot" } else { "on-demand" },
        state
            .cost
            .spot_price_per_hour
            .unwrap_or(state.cost.on_demand_price_per_hour),
        state.cost.estimated_monthly_cost
    ));
    out
}

pub async fn run(ctx: &CliContext, args: DeployArgs) -> Result<u8> {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            emit_error(ctx.format, &e.to_string(), "invalid_config", vec![]);
            return Ok(1);
        }
    };
    let client = ctx.client(&config.region);

    if !args.skip_validation {
        let validator = PreDeploymentValidator::new(client.clone(), ctx.store.clone());
        let report = validator.validate(&config).await;
        if !report.passed() {
            let failing: Vec<String> = report
                .checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| format!("{}: {}", c.check_name, c.message))
                .collect();
            if ctx.format.is_text() {
                println!("{}", render_report_text(&report));
            }
            emit_error(
                ctx.format,
                "pre-deployment validation failed",
                "validation_failed",
                failing,
            );
            return Ok(1);
        }
        if ctx.format.is_text() {
            println!("{}", render_report_text(&report));
        }
    }

    let pricing = Arc::new(PricingService::new(client.clone()));
    let capacity = Arc::new(CapacityService::new(client.clone(), pricing));
    let selection = Arc::new(SelectionEngine::new(capacity));
    let services = Services::new(client.clone(), selection, ctx.store.clone());
    let orchestrator = Orchestrator::new(client, services);

    match orchestrator.deploy(config, !args.no_rollback, None).await {
        Ok(state) => {
            emit_success(ctx.format, &render_state_text(&state), to_data(&state));
            Ok(0)
        }
        Err(e) => {
            emit_error(ctx.format, &e.to_string(), "deploy_failed", vec![]);
            Ok(1)
        }
    }
}
