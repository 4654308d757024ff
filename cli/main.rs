#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use itertools::Itertools;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use mrfsmooth::config::RunConfig;
use mrfsmooth::data::{load_covariates, load_draws, load_observations, write_summary};
use mrfsmooth::pipeline::{PreparedModel, prepare};

#[derive(Args)]
struct InputArgs {
    /// Run configuration (.toml)
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// Observation CSV whose columns match the configured likelihood
    #[arg(long, value_name = "FILE")]
    data: PathBuf,

    /// Sampling times and counts (time,count) for heterochronous coalescent data
    #[arg(long, value_name = "FILE")]
    samples: Option<PathBuf>,

    /// Per-cell covariates, one row per grid cell
    #[arg(long, value_name = "FILE")]
    covariates: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "mrfsmooth",
    about = "Shrinkage-prior Markov random field smoothing: data preparation and calibration",
    long_about = "Builds an adaptive time grid from raw observations, aggregates per-cell \
                 sufficient statistics, calibrates the global shrinkage scale and writes the \
                 data payload for an external sampling engine. Posterior draws returned by the \
                 engine are mapped back onto the trajectory scale."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the engine data payload
    #[command(about = "Prepare the engine payload (outputs: payload.json)")]
    Prepare {
        #[command(flatten)]
        input: InputArgs,

        /// Where to write the JSON payload
        #[arg(long, value_name = "FILE", default_value = "payload.json")]
        out: PathBuf,
    },

    /// Report the grid and calibrated global scale without writing anything
    #[command(about = "Show the grid, skyline variance and calibrated zeta")]
    Calibrate {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Map engine draws of the field back onto the trajectory scale
    #[command(about = "Summarise posterior draws (outputs: trajectory.csv)")]
    Extract {
        #[command(flatten)]
        input: InputArgs,

        /// Link-scale draws: one row per draw, one column per cell
        #[arg(long, value_name = "FILE")]
        draws: PathBuf,

        /// Number of chains stored consecutively in the draws file
        #[arg(long, default_value_t = 1)]
        chains: usize,

        /// Credible level of the reported band
        #[arg(long, default_value_t = 0.95)]
        level: f64,

        #[arg(long, value_name = "FILE", default_value = "trajectory.csv")]
        out: PathBuf,
    },

    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Prepare { input, out }) => run_prepare(&input, &out),
        Some(Commands::Calibrate { input }) => run_calibrate(&input),
        Some(Commands::Extract {
            input,
            draws,
            chains,
            level,
            out,
        }) => run_extract(&input, &draws, chains, level, &out),
        Some(Commands::Version) => {
            println!("mrfsmooth {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_prepared(input: &InputArgs) -> Result<(RunConfig, PreparedModel), Box<dyn std::error::Error>> {
    let config = RunConfig::load(&input.config)?;
    let observations =
        load_observations(config.likelihood, &input.data, input.samples.as_deref())?;
    let covariates = input
        .covariates
        .as_deref()
        .map(load_covariates)
        .transpose()?;
    let prepared = prepare(&observations, &config, covariates)?;
    Ok((config, prepared))
}

fn run_prepare(input: &InputArgs, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (config, prepared) = load_prepared(input)?;
    let writer = BufWriter::new(fs::File::create(out)?);
    serde_json::to_writer_pretty(writer, &prepared.spec.payload())?;
    println!(
        "Wrote {} / {} payload ({} cells, zeta = {}) to {}",
        config.prior,
        config.likelihood,
        prepared.grid.cells(),
        prepared.zeta(),
        out.display()
    );
    Ok(())
}

fn run_calibrate(input: &InputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (config, prepared) = load_prepared(input)?;
    let calibration = &prepared.calibration;
    println!("Likelihood: {}", config.likelihood);
    println!("Prior:      {} (order {})", config.prior, config.order);
    println!(
        "Grid:       {} cells spanning {:.4} [{}]",
        prepared.grid.cells(),
        prepared.grid.span(),
        prepared
            .grid
            .boundaries()
            .iter()
            .map(|b| format!("{b:.4}"))
            .join(", ")
    );
    println!(
        "Skyline:    [{}]",
        prepared.naive().iter().map(|v| format!("{v:.4}")).join(", ")
    );
    println!(
        "Variance:   {:.6e} from {} differences",
        calibration.variance, calibration.differences
    );
    println!(
        "Zeta:       {} (alpha = {}, {} iterations)",
        calibration.zeta,
        config.calibration.alpha.value(),
        calibration.iterations
    );
    Ok(())
}

fn run_extract(
    input: &InputArgs,
    draws_path: &Path,
    chains: usize,
    level: f64,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, prepared) = load_prepared(input)?;
    let draws = load_draws(draws_path)?;
    let trajectory = prepared.extract(draws.view(), chains)?;
    let summary = trajectory.summary(level)?;
    write_summary(out, &summary)?;
    println!(
        "Summarised {} chains x {} draws of the {} trajectory into {}",
        trajectory.n_chains(),
        trajectory.draws_per_chain(),
        config.likelihood,
        out.display()
    );
    Ok(())
}
