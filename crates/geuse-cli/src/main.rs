mod cli;
mod commands;
mod context;
mod output;

use std::process::ExitCode;

use clap::Parser;
use cli::{BackupCommand, Cli, Command, MonitorCommand};
use context::CliContext;
use output::emit_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.silent {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = cli.output;
    let ctx = match CliContext::new(cli.state_dir.clone(), format) {
        Ok(ctx) => ctx,
        Err(e) => {
            emit_error(format, &format!("state directory unavailable: {e}"), "state_error", vec![]);
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, args).await,
        Command::Destroy {
            stack,
            force,
            dry_run,
            preserve_efs,
        } => commands::destroy::run(&ctx, &stack, force, dry_run, preserve_efs).await,
        Command::Update {
            stack,
            instance_type,
            images,
            force,
        } => commands::lifecycle::update(&ctx, &stack, instance_type, images, force).await,
        Command::Rollback {
            stack,
            to_version,
            force,
        } => commands::lifecycle::rollback(&ctx, &stack, to_version, force).await,
        Command::Validate(args) => commands::validate::run(&ctx, args).await,
        Command::Report {
            stack_name,
            refresh,
            post,
            output_file,
        } => commands::report::run(&ctx, &stack_name, refresh, post, output_file).await,
        Command::Health {
            host,
            include_postgres: _,
            skip_postgres,
            timeout,
        } => commands::monitor::health(&ctx, &host, !skip_postgres, timeout).await,
        Command::Monitor { command } => match command {
            MonitorCommand::Start {
                stack,
                host,
                interval,
                checks,
                background,
                log_dir,
                log_level,
                include_postgres: _,
                skip_postgres,
            } => {
                commands::monitor::start(
                    &ctx,
                    &stack,
                    host,
                    interval,
                    checks,
                    background,
                    log_dir,
                    log_level,
                    !skip_postgres,
                )
                .await
            }
            MonitorCommand::Stop { stack } => commands::monitor::stop(&ctx, &stack).await,
        },
        Command::List {
            discover_from_aws,
            region,
        } => commands::state::list(&ctx, discover_from_aws, &region).await,
        Command::Inspect { stack } => commands::state::inspect(&ctx, &stack).await,
        Command::Info {
            stack,
            host,
            skip_health,
        } => commands::state::info(&ctx, &stack, host, skip_health).await,
        Command::Backup { command } => match command {
            BackupCommand::Create { stack, label } => {
                commands::state::backup_create(&ctx, &stack, label).await
            }
            BackupCommand::List { stack } => commands::state::backup_list(&ctx, stack).await,
        },
        Command::Restore {
            stack,
            latest,
            backup,
        } => commands::state::restore(&ctx, &stack, latest, backup).await,
        Command::Cleanup {
            dry_run,
            all,
            region,
        } => commands::cleanup::run(&ctx, dry_run, all, &region).await,
        Command::Status { stack_name } => commands::state::status(&ctx, &stack_name).await,
        Command::Logs { stack_name, tail } => commands::state::logs(&ctx, &stack_name, tail).await,
        Command::Cost { stack_name } => commands::state::cost(&ctx, &stack_name).await,
        Command::Init { directory, force } => commands::state::init(&ctx, directory, force).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            emit_error(format, &e.to_string(), "command_failed", vec![]);
            ExitCode::from(1)
        }
    }
}
