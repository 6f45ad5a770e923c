mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::market_data::PrepareArgs;
use commands::optimize::{ExactArgs, FrontierArgs, OptimizeArgs};

/// Constrained portfolio optimization
#[derive(Parser)]
#[command(
    name = "pfo",
    version,
    about = "Constrained portfolio optimization: genetic search vs. exact MIQP",
    long_about = "Optimizes a portfolio under a volatility ceiling, per-asset and per-sector \
                  caps, sector exclusions, cardinality limits and lot sizes. Compares a \
                  genetic search with feasibility repair against a branch-and-bound MIQP \
                  solver, warm-started and cold."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run genetic, exact (warm) and exact (cold) and compare them
    Optimize(OptimizeArgs),
    /// Run the genetic search only
    Metaheuristic(OptimizeArgs),
    /// Run the exact solver only, optionally warm-started
    Exact(ExactArgs),
    /// Sweep risk-aversion levels into an efficient frontier
    Frontier(FrontierArgs),
    /// Build a market snapshot from price history or synthetic data
    Prepare(PrepareArgs),
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

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Metaheuristic(args) => commands::optimize::run_metaheuristic(args),
        Commands::Exact(args) => commands::optimize::run_exact(args),
        Commands::Frontier(args) => commands::optimize::run_frontier(args),
        Commands::Prepare(args) => commands::market_data::run_prepare(args),
        Commands::Version => {
            println!("pfo {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
