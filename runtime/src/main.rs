// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use vfat_loader::cli;
use vfat_loader::cli::serve_cmd::ServeArgs;
use vfat_loader::config::RunArgs;

#[derive(Parser)]
#[command(
    name = "vfat-loader",
    about = "vfat-loader: loads DeFi yield dashboards and ingests the pools they report",
    version,
    after_help = "Run 'vfat-loader <command> --help' for details on each command."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and serve the dashboard, then load every selected protocol page
    Run(RunArgs),
    /// Run the ingestion API on its own
    Serve(ServeArgs),
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Values already in the environment win over .env entries.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    cli::init_tracing(cli.debug, cli.json_logs);

    let result = match cli.command {
        Commands::Run(args) => cli::run_cmd::run(&args).await,
        Commands::Serve(args) => cli::serve_cmd::run(&args).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "vfat-loader", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
