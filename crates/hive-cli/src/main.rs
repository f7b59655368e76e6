// ABOUTME: hive CLI entry point.
// ABOUTME: Provides init, spawn and clean subcommands.

use clap::{Parser, Subcommand};
use hive_cli::{run_clean, run_init, run_spawn, SpawnOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hive")]
#[command(about = "Spawn and supervise application drones")]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, env = "HIVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Spawn one drone and supervise it until Ctrl-C
    Spawn {
        /// Application name
        #[arg(long)]
        app: String,
        /// Owner of the application
        #[arg(long)]
        user: String,
        /// Start script, relative to --cwd
        #[arg(long)]
        script: PathBuf,
        /// Working directory of the drone (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Give up after this many restarts (unbounded when omitted)
        #[arg(long)]
        max_restarts: Option<u32>,
        /// Extra environment variable, KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Keep the drone environment out of the logs
        #[arg(long)]
        hide_env: bool,
        /// Isolate the drone in this root directory
        #[arg(long, requires = "app_path")]
        root: Option<PathBuf>,
        /// Working directory inside --root
        #[arg(long, requires = "root")]
        app_path: Option<PathBuf>,
        /// Arguments for the start script
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Stop an application and remove its checkout
    Clean {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    hive_log::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => run_init(cli.config, force),
        Commands::Spawn {
            app,
            user,
            script,
            cwd,
            max_restarts,
            env,
            hide_env,
            root,
            app_path,
            args,
        } => {
            run_spawn(SpawnOptions {
                config_path: cli.config,
                app,
                user,
                script,
                cwd,
                max_restarts,
                env,
                hide_env,
                root,
                app_path,
                args,
            })
            .await
        }
        Commands::Clean { user, name } => run_clean(cli.config, user, name).await,
    }
}
