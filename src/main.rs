use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use temporal_integrator::{integrator, PipelineConfig};

/// Merge dated CSV sources into one daily master table
#[derive(Parser)]
#[command(name = "temporal-integrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the master table
    Integrate {
        /// Pipeline file (TOML, YAML or JSON)
        #[arg(long, short)]
        config: PathBuf,
        /// Override the configured output path
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Load every source and print its shape, date range and missing values
    Inspect {
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("temporal_integrator=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Integrate { config, output } => {
            let mut cfg = PipelineConfig::load(&config)?;
            if let Some(path) = output {
                cfg.output.path = path;
            }
            let run = integrator::run(&cfg)?;
            info!(
                rows = run.report.rows_merged,
                start = ?run.report.date_start,
                end = ?run.report.date_end,
                path = %cfg.output.path.display(),
                "master table written"
            );
            for skipped in &run.report.skipped_sources {
                error!(source = %skipped.name, reason = %skipped.reason, "source skipped");
            }
        }
        Commands::Inspect { config } => {
            let cfg = PipelineConfig::load(&config)?;
            for (name, summary) in integrator::inspect(&cfg) {
                match summary {
                    Ok(text) => println!("{text}"),
                    Err(reason) => error!(source = %name, %reason, "could not load source"),
                }
            }
        }
    }

    Ok(())
}
