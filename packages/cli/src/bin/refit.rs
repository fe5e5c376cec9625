// ABOUTME: refit binary with `serve` for the backend and `agent` for the in-sandbox agent server
// ABOUTME: Flags override the port and host read from the environment

use clap::{Parser, Subcommand};
use colored::*;
use std::process;

#[derive(Parser)]
#[command(name = "refit")]
#[command(about = "Refit - sandboxed repository refactoring with background agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backend service
    Serve {
        /// Listen port (overrides REFIT_API_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Bind address (overrides REFIT_HOST)
        #[arg(long)]
        host: Option<String>,
    },
    /// Run the agent server inside a project sandbox
    Agent {
        /// Listen port (overrides REFIT_AGENT_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Bind address (overrides REFIT_HOST)
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut config = refit_core::Config::from_env()?;
    refit_cli::init_tracing(&config.log_level);

    match command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.api_port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            refit_cli::run_backend(config).await?;
        }
        Commands::Agent { port, host } => {
            if let Some(port) = port {
                config.agent_port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            refit_cli::run_agent_server(config).await?;
        }
    }
    Ok(())
}
