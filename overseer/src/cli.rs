use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "overseer")]
#[command(about = "Keep a fleet of local processes alive under one parent", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ../conf/supervisord.conf next to the binary)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the supervisor daemon
    Start(SpecArgs),

    /// Operate on supervised processes through the running daemon
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Register and start one more process on the running daemon
    AddProc(SpecArgs),

    /// Ask the running daemon to re-read its config file
    Reload,

    /// Evaluate a script file on the running daemon
    Exec {
        /// Script file; a `#!` first line turns stdout capture on
        file: PathBuf,
    },

    /// Stop every process and exit the daemon
    Shutdown {
        /// Skip the confirmation prompt and stop immediately
        #[arg(short, long)]
        force: bool,

        /// Erase purge-eligible log files on the way out
        #[arg(long)]
        clear: bool,
    },

    /// Run the daemon in the foreground (spawned by start)
    #[command(hide = true)]
    Daemon,
}

#[derive(Args)]
pub struct SpecArgs {
    /// `-supvr.<key> <value>` overrides, then `<name> [-supvr.<key> <value>] <cmd> [args...]`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub spec: Vec<String>,
}

#[derive(Subcommand)]
pub enum ServiceAction {
    /// Start one process, or all of them
    Start { name: Option<String> },

    /// Stop one process, or all of them
    Stop { name: Option<String> },

    /// Restart one process, or all of them
    Restart { name: Option<String> },

    /// Show the process table
    Status {
        /// Print the raw JSON snapshots
        #[arg(long)]
        json: bool,
    },

    /// Dump each process's effective environment
    Env,

    /// Treat the next exit of one (or every) process as success
    OmitExitCode { name: Option<String> },
}
