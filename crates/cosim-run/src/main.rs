//! Cosim Run - Runs the double spring-mass-damper co-simulation
//!
//! Provisions the two virtual masses, couples them with the chosen master
//! algorithm, and writes the recorded trace as JSON.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use cosim_runtime::{Results, RunStats, Scenario, Simulation, Strategy, Timing, UnitSet};
use cosim_virtual::{VirtualProvider, double_msd, double_msd_units};
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Jacobi,
    GaussSeidel,
    Iterative,
}

#[derive(Parser, Debug)]
#[command(name = "cosim-run")]
#[command(about = "Run the double spring-mass-damper co-simulation")]
struct Cli {
    /// Master algorithm
    #[arg(long, value_enum, default_value = "iterative")]
    strategy: StrategyArg,

    /// Iteration budget per macro step (iterative only)
    #[arg(long, default_value = "100")]
    max_iterations: u32,

    /// Convergence tolerance (iterative only)
    #[arg(long, default_value = "1e-4")]
    tolerance: f64,

    /// Step units one after another under Jacobi
    #[arg(long)]
    sequential: bool,

    #[arg(long, default_value = "0.01")]
    step_size: f64,

    #[arg(long, default_value = "7.0")]
    stop_time: f64,

    #[arg(long, default_value = "0.1")]
    sampling_interval: f64,

    /// Coupling stiffness
    #[arg(long, default_value = "1.0")]
    ce: f64,

    /// Coupling damping
    #[arg(long, default_value = "1.0")]
    cef: f64,

    /// Directory to stage unit resources in
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Write results here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Cli {
    fn strategy(&self) -> cosim_runtime::Result<Strategy> {
        match self.strategy {
            StrategyArg::Jacobi => Ok(Strategy::Jacobi {
                parallel: !self.sequential,
            }),
            StrategyArg::GaussSeidel => Ok(Strategy::gauss_seidel()),
            StrategyArg::Iterative => Strategy::iterative(self.max_iterations, self.tolerance),
        }
    }

    fn timing(&self) -> Timing {
        Timing {
            step_size: self.step_size,
            stop_time: Some(self.stop_time),
            sampling_interval: self.sampling_interval,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    strategy: &'static str,
    timing: Timing,
    stats: RunStats,
    results: Results,
}

fn simulate(scenario: &Scenario, units: &mut UnitSet, strategy: &Strategy) -> cosim_runtime::Result<Report> {
    let mut simulation = Simulation::new(scenario, units, strategy)?;
    let mut on_progress = |time: f64| debug!(time, "sample recorded");
    simulation.run(Some(&mut on_progress))?;

    Ok(Report {
        strategy: strategy.name(),
        timing: *scenario.timing(),
        stats: simulation.stats(),
        results: simulation.into_results(),
    })
}

fn run(cli: &Cli) -> cosim_runtime::Result<Report> {
    let strategy = cli.strategy()?;
    let scenario = double_msd(cli.ce, cli.cef, cli.timing())?;

    let provider = match &cli.staging {
        Some(dir) => VirtualProvider::staged_in(dir),
        None => VirtualProvider::new(),
    };
    let mut units = double_msd_units(&provider)?;

    let report = simulate(&scenario, &mut units, &strategy);
    units.release();
    report
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosim_run=info,cosim_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    info!(strategy = ?cli.strategy, ce = cli.ce, cef = cli.cef, "Running double spring-mass-damper");

    let report = match run(&cli) {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        samples = report.results.len(),
        macro_steps = report.stats.macro_steps,
        "Simulation finished"
    );

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize results: {}", e);
            std::process::exit(1);
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, json) {
                error!("Failed to write {}: {}", path.display(), e);
                std::process::exit(1);
            }
            info!("Results written to: {}", path.display());
        }
        None => println!("{json}"),
    }
}
