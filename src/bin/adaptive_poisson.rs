use clap::Parser;
use eyre::WrapErr;
use log::info;
use std::path::PathBuf;
use visco_fem::comm::{SerialComm, ThreadComm};
use visco_fem::config::{Config, PoissonConfig};
use visco_fem::poisson::{AdaptivePoisson, CycleSummary};

/// Adaptive solution of a Poisson problem with a discontinuous source on the unit square.
#[derive(Parser, Debug)]
#[command(name = "adaptive-poisson", version)]
struct Args {
    /// TOML configuration file. Defaults are used for anything it leaves out.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of adaptive cycles, overriding the configuration.
    #[arg(long)]
    cycles: Option<usize>,

    /// Number of ranks, each running in its own thread.
    #[arg(short, long, default_value_t = 1)]
    ranks: usize,

    /// Write VTK output into this directory.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

fn run_ranks(config: &PoissonConfig, n_ranks: usize) -> eyre::Result<Vec<CycleSummary>> {
    if n_ranks == 1 {
        return AdaptivePoisson::new(config.clone(), SerialComm).run();
    }

    let comms = ThreadComm::create(n_ranks);
    let results: Vec<eyre::Result<Vec<CycleSummary>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || AdaptivePoisson::new(config.clone(), comm).run()))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(eyre::eyre!("A rank panicked")))
            })
            .collect()
    });

    // Every rank computes the same summaries, report those of rank 0
    let mut root_summaries = None;
    for result in results {
        let summaries = result?;
        root_summaries.get_or_insert(summaries);
    }
    root_summaries.ok_or_else(|| eyre::eyre!("No ranks were run"))
}

fn main() -> eyre::Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(cycles) = args.cycles {
        config.poisson.n_cycles = cycles;
    }
    if let Some(directory) = args.output {
        config.poisson.output.enabled = true;
        config.poisson.output.directory = directory;
    }
    eyre::ensure!(args.ranks > 0, "At least one rank is required");

    let summaries = run_ranks(&config.poisson, args.ranks).wrap_err("Adaptive Poisson run failed")?;

    info!("{:>5} {:>10} {:>10} {:>10} {:>14}", "cycle", "cells", "dofs", "cg iters", "est. error");
    for summary in &summaries {
        info!(
            "{:>5} {:>10} {:>10} {:>10} {:>14.6e}",
            summary.cycle, summary.n_active_cells, summary.n_dofs, summary.solver_iterations, summary.estimated_error
        );
    }
    Ok(())
}
