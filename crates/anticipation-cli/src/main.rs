mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::anticipation::{AllocateArgs, ExpandArgs};

/// Receivables anticipation: operation/collateral allocation with per-diem discount
#[derive(Parser)]
#[command(
    name = "antecipa",
    version,
    about = "Receivables anticipation allocation engine",
    long_about = "Expands patients' open installment plans into an anticipation schedule, \
                  splits the installments into operation and collateral against a target \
                  collateral ratio, and reports discount and cash delivered with decimal precision."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log engine phases to stderr (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a portfolio into its dated, discounted installment schedule
    Expand(ExpandArgs),
    /// Split installments into operation and collateral against a target ratio
    Allocate(AllocateArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Expand(args) => commands::anticipation::run_expand(args),
        Commands::Allocate(args) => commands::anticipation::run_allocate(args),
        Commands::Version => {
            println!("antecipa {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
