//! DeviceLab CLI - run remote mobile UI tests and keep test definitions in sync
//!
//! Runs are submitted to the DeviceLab service and followed live until they
//! finish; local test definitions under `.devicelab/` are pushed, pulled and
//! diffed against the service's copies.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use devicelab::common::error::ErrorPayload;
use devicelab::{cli, commands, common};

#[derive(Parser)]
#[command(name = "devicelab", about = "Run remote mobile UI tests and workflows")]
#[command(version, long_about = None)]
struct Cli {
    /// Use the development endpoints
    #[arg(long, global = true)]
    dev: bool,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Project directory containing .devicelab/ (default: current directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    common::logging::init_cli(cli.verbose);

    let opts = cli::GlobalOptions {
        dev: cli.dev,
        json: cli.json,
        project_dir: cli.project_dir.unwrap_or_else(|| PathBuf::from(".")),
    };

    if let Err(e) = cli::dispatch(cli.command, &opts).await {
        if opts.json {
            // Run outcomes were already printed as the result payload
            if !e.is_reported() {
                match serde_json::to_string_pretty(&ErrorPayload::from(&e)) {
                    Ok(payload) => println!("{payload}"),
                    Err(_) => eprintln!("Error: {e}"),
                }
            }
        } else {
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
        }
        std::process::exit(1);
    }
}
