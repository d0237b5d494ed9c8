use anyhow::Result;
use geuse_domain::DeploymentConfig;
use geuse_validate::PreDeploymentValidator;

use crate::cli::ValidateArgs;
use crate::commands::deploy::render_report_text;
use crate::context::CliContext;
use crate::output::{emit_error, emit_success, to_data};

pub async fn run(ctx: &CliContext, args: ValidateArgs) -> Result<u8> {
    let mut config = DeploymentConfig::new(
        args.stack_name.clone(),
        args.tier.clone().into(),
        args.region.clone(),
    )?;
    if let Some(instance_type) = &args.instance_type {
        config.instance_type = instance_type.clone();
    }
    config.use_spot = args.use_spot || !args.no_spot;
    config.vpc_id = args.vpc_id.clone();
    config.security_group_id = args.security_group_id.clone();
    config.attach_internet_gateway = args.attach_internet_gateway;

    let client = ctx.client(&config.region);
    let validator = PreDeploymentValidator::new(client, ctx.store.clone());
    let report = validator.validate(&config).await;

    if report.passed() {
        emit_success(ctx.format, &render_report_text(&report), to_data(&report));
        Ok(0)
    } else {
        if ctx.format.is_text() {
            println!("{}", render_report_text(&report));
        }
        let failing: Vec<String> = report
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.check_name, c.message))
            .collect();
        emit_error(
            ctx.format,
            "validation failed",
            "validation_failed",
            failing,
        );
        Ok(1)
    }
}
