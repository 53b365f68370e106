pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use matchline_core::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "matchline",
    about = "Matchline registration matching CLI",
    long_about = "Run constellation workflows that match registrations to supplier offers, inspect configuration, and manage supplier capacity.",
    after_help = "Examples:\n  matchline run --scenario data/sbus/scenarios/overlap_only.yaml\n  matchline run --registrations data/regs.json --offers data/offers.json --constellation p1m1_p2m2\n  matchline reset-capacity results/capacity.json --supplier S1\n  matchline constellations\n  matchline scenarios data/sbus/scenarios"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to matchline.toml or config/matchline.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Process every registration through the selected constellation's phases")]
    Run(commands::run::RunArgs),
    #[command(about = "Reset supplier capacity usage to zero")]
    ResetCapacity {
        #[arg(help = "Capacity file to reset")]
        capacity_file: PathBuf,
        #[arg(long, help = "Reset only this supplier")]
        supplier: Option<String>,
    },
    #[command(about = "List the known constellations and their phases")]
    Constellations,
    #[command(about = "List scenario files and the inputs they resolve to")]
    Scenarios {
        #[arg(help = "Scenario directory (defaults to data/<business_line>/scenarios)")]
        dir: Option<PathBuf>,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
}

/// Installs the global subscriber once; later calls are ignored. Logs go to
/// stderr so stdout carries only the command's JSON document.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => commands::run::run(args, cli.config),
        Command::ResetCapacity { capacity_file, supplier } => {
            commands::reset_capacity::run(&capacity_file, supplier.as_deref())
        }
        Command::Constellations => commands::constellations::run(cli.config),
        Command::Scenarios { dir } => commands::scenarios::run(dir, cli.config),
        Command::Config => commands::config::run(cli.config),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
