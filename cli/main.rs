#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use illness_death::bundle::{ModelBundle, RunConfig};
use illness_death::incidence::{all_cumulative_incidences, coefficient_bands};
use illness_death::matrix::closed_form_matrices;
use illness_death::occupancy::OccupancyCurve;
use illness_death::simulate::{ClockScale, PathLabel};
use illness_death::{IllnessDeathModel, State, TrajectorySimulator, Transition};

#[derive(Clone, Copy, ValueEnum)]
enum ClockArg {
    Reset,
    Forward,
}

impl From<ClockArg> for ClockScale {
    fn from(value: ClockArg) -> Self {
        match value {
            ClockArg::Reset => ClockScale::Reset,
            ClockArg::Forward => ClockScale::Forward,
        }
    }
}

#[derive(Args)]
struct SimulateArgs {
    /// Run configuration (.toml) naming the bundle, stratum, profile and times
    #[arg(long)]
    config: PathBuf,

    /// Override the number of simulated subjects
    #[arg(long)]
    replicates: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Censor events after this time
    #[arg(long)]
    horizon: Option<f64>,

    /// Time scale for death after relapse
    #[arg(long, value_enum)]
    clock: Option<ClockArg>,

    /// Also report restricted mean time in each state up to this time
    #[arg(long, value_name = "HORIZON")]
    restricted_mean: Option<f64>,
}

#[derive(Parser)]
#[command(
    name = "illness-death",
    about = "Transition probabilities, simulation and cumulative incidence for illness-death models",
    long_about = "Evaluates fitted additive-hazard illness-death models (healthy -> relapsed -> dead) \
                 for a covariate profile: closed-form transition matrices, Monte Carlo state \
                 occupancy and cumulative incidence. Results are written to stdout as TSV."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Closed-form 3x3 transition probability matrices at each configured time
    Matrix {
        #[arg(long)]
        config: PathBuf,

        /// Also report restricted mean time in each state up to this time
        #[arg(long, value_name = "HORIZON")]
        restricted_mean: Option<f64>,
    },

    /// Monte Carlo state occupancy from simulated trajectories
    Simulate(SimulateArgs),

    /// Cumulative incidence with bands, per transition
    Incidence {
        #[arg(long)]
        config: PathBuf,

        /// Restrict output to one transition (1->2, 1->3 or 2->3)
        #[arg(long)]
        transition: Option<Transition>,

        /// Print coefficient bands of every table column instead of incidence
        #[arg(long)]
        bands: bool,
    },

    /// List the strata stored in a model bundle
    Strata {
        #[arg(value_name = "BUNDLE")]
        bundle: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Matrix {
            config,
            restricted_mean,
        }) => run_matrix(config, restricted_mean),
        Some(Commands::Simulate(args)) => run_simulate(args),
        Some(Commands::Incidence {
            config,
            transition,
            bands,
        }) => run_incidence(config, transition, bands),
        Some(Commands::Strata { bundle }) => run_strata(bundle),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load(config_path: &Path) -> Result<(RunConfig, IllnessDeathModel), Box<dyn Error>> {
    let config = RunConfig::load(config_path)?;
    let bundle = ModelBundle::load(&config.bundle)?;
    let model = bundle.model(&config.stratum)?;
    Ok((config, model))
}

fn run_matrix(config_path: PathBuf, restricted_mean: Option<f64>) -> Result<(), Box<dyn Error>> {
    let (config, model) = load(&config_path)?;
    let hazards = model.resolve(&config.profile)?;
    let matrices = closed_form_matrices(&hazards, &config.times)?;

    println!("time\tfrom\thealthy\trelapsed\tdead");
    for matrix in &matrices {
        for from in State::ALL {
            let row = matrix.row(from);
            println!(
                "{}\t{from}\t{:.6}\t{:.6}\t{:.6}",
                matrix.time(),
                row[0],
                row[1],
                row[2]
            );
        }
    }

    if let Some(horizon) = restricted_mean {
        let occupancy = OccupancyCurve::from_matrices(&matrices);
        print_restricted_mean(&occupancy, horizon);
    }
    Ok(())
}

fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn Error>> {
    let (mut config, model) = load(&args.config)?;
    if let Some(replicates) = args.replicates {
        config.simulation.replicates = replicates;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }
    if let Some(horizon) = args.horizon {
        config.simulation.horizon = Some(horizon);
    }
    if let Some(clock) = args.clock {
        config.simulation.clock = clock.into();
    }

    let hazards = model.resolve(&config.profile)?;
    let simulator = TrajectorySimulator::new(&hazards, config.simulation.clone())?;
    let summary = simulator.simulate(&config.times)?;

    println!("time\thealthy\trelapsed\tdead");
    for (time, value) in summary.occupancy().iter() {
        println!(
            "{time}\t{:.6}\t{:.6}\t{:.6}",
            value.healthy, value.relapsed, value.dead
        );
    }

    eprintln!("path\tcount\tfraction");
    for label in PathLabel::ALL {
        eprintln!(
            "{label}\t{}\t{:.6}",
            summary.paths().get(label),
            summary.paths().fraction(label)
        );
    }

    if let Some(horizon) = args.restricted_mean {
        print_restricted_mean(summary.occupancy(), horizon);
    }
    Ok(())
}

fn run_incidence(
    config_path: PathBuf,
    only: Option<Transition>,
    bands: bool,
) -> Result<(), Box<dyn Error>> {
    let (config, model) = load(&config_path)?;
    let selected = |transition: Transition| only.is_none_or(|t| t == transition);

    if bands {
        println!("transition\tcolumn\ttime\testimate\tlower\tupper");
        for transition in Transition::ALL.into_iter().filter(|&t| selected(t)) {
            for band in coefficient_bands(model.transition(transition)) {
                for (idx, time) in band.times.iter().enumerate() {
                    println!(
                        "{transition}\t{}\t{time}\t{:.6}\t{:.6}\t{:.6}",
                        band.label, band.estimate[idx], band.lower[idx], band.upper[idx]
                    );
                }
            }
        }
        return Ok(());
    }

    let hazards = model.resolve(&config.profile)?;
    println!("transition\ttime\tcif\tlower\tupper");
    for cif in all_cumulative_incidences(&hazards) {
        if !selected(cif.transition()) {
            continue;
        }
        for point in cif.at_times(&config.times)? {
            println!(
                "{}\t{}\t{:.6}\t{:.6}\t{:.6}",
                cif.transition(),
                point.time,
                point.estimate,
                point.lower,
                point.upper
            );
        }
    }
    Ok(())
}

fn run_strata(bundle_path: PathBuf) -> Result<(), Box<dyn Error>> {
    let bundle = ModelBundle::load(&bundle_path)?;
    for stratum in bundle.strata() {
        println!("{stratum}");
    }
    Ok(())
}

fn print_restricted_mean(occupancy: &OccupancyCurve, horizon: f64) {
    let means = occupancy.restricted_mean_time(horizon);
    println!();
    println!("state\trestricted_mean_time");
    for state in State::ALL {
        println!("{state}\t{:.6}", means.get(state));
    }
}
