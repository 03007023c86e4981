mod cli;
mod client;
mod commands;
mod flags;

use clap::Parser;

use overseer_logging::init_client_log;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    match cli.command {
        cli::Command::Start(args) => commands::start::execute(cli.config, args).await,
        cli::Command::Daemon => commands::start::run_daemon_command(cli.config).await,
        cli::Command::Service { action } => {
            init_client_log();
            commands::service::execute(cli.config, action).await
        }
        cli::Command::AddProc(args) => {
            init_client_log();
            commands::add_proc::execute(cli.config, args).await
        }
        cli::Command::Reload => {
            init_client_log();
            commands::reload::execute(cli.config).await
        }
        cli::Command::Exec { file } => {
            init_client_log();
            commands::exec::execute(cli.config, file).await
        }
        cli::Command::Shutdown { force, clear } => {
            init_client_log();
            commands::shutdown::execute(cli.config, force, clear).await
        }
    }
}
