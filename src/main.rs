use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use oxdna_analysis::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "oxdna-analysis")]
#[command(about = "Free energies and FFS rates from oxDNA simulations", long_about = None)]
struct Cli {
    /// Config TOML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log per-replica details
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Standardized binding free energy of every umbrella sampling group
    FreeEnergy {
        /// Directory holding the replica directories (overrides input_root)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
    /// Forward Flux Sampling rate of every case
    Rate {
        /// Directory holding the case directories (overrides input_root)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    let json = match cli.command {
        Commands::FreeEnergy { root } => {
            if let Some(root) = root {
                config.input_root = root;
            }
            info!("free energies under {}", config.input_root.display());
            let reports = estimate_free_energies(&UmbrellaDirectories::new(&config), &config)?;
            serde_json::to_string_pretty(&reports)?
        }
        Commands::Rate { root } => {
            if let Some(root) = root {
                config.input_root = root;
            }
            info!("FFS rates under {}", config.input_root.display());
            let reports = estimate_rates(&FfsDirectories::new(&config), &config)?;
            serde_json::to_string_pretty(&reports)?
        }
    };

    println!("{}", json);
    Ok(())
}
