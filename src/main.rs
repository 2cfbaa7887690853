use clap::Parser;
use std::str::FromStr;

use fogsim::api::scenario_dto::ScenarioDto;
use fogsim::error::Result;
use fogsim::loader::parser::parse_json_file;
use fogsim::logger;
use fogsim::sim::context::PlacementStrategyKind;
use fogsim::sim::simulation::Simulation;

/// Discrete-event simulator for fog/edge service placement, routing and
/// migration policies.
#[derive(Debug, Parser)]
#[command(name = "fogsim", version, about)]
struct Cli {
    /// Path to the scenario JSON file.
    scenario: String,

    /// Overrides the scenario's end time (ms).
    #[arg(long)]
    until: Option<i64>,

    /// Overrides the scenario's placement strategy ("clustered" or
    /// "distributed").
    #[arg(long)]
    strategy: Option<String>,

    /// Writes the run counters to this CSV file.
    #[arg(long)]
    metrics_out: Option<String>,
}

fn main() {
    logger::init();

    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        log::error!("Simulation failed: {}", error);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    log::info!("Loading scenario from '{}'...", cli.scenario);
    let mut dto: ScenarioDto = parse_json_file(&cli.scenario)?;

    if let Some(strategy) = &cli.strategy {
        PlacementStrategyKind::from_str(strategy)?;
        log::info!("Overriding placement strategy '{}' with '{}'.", dto.config.placement_strategy, strategy);
        dto.config.placement_strategy = strategy.clone();
    }

    let mut simulation = Simulation::from_scenario(dto)?;

    if let Some(until) = cli.until {
        simulation.ctx.config.end_time = until;
    }

    simulation.run()?;
    simulation.stats().log_summary();

    if let Some(path) = &cli.metrics_out {
        simulation.stats().write_csv(path)?;
        log::info!("Metrics written to '{}'.", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_the_strategy_override() {
        let cli = Cli::try_parse_from(["fogsim", "scenario.json", "--strategy", "distributed", "--until", "100"])
            .expect("valid arguments");
        assert_eq!(cli.strategy.as_deref(), Some("distributed"));
        assert_eq!(cli.until, Some(100));
        assert!(PlacementStrategyKind::from_str(cli.strategy.as_deref().unwrap()).is_ok());
    }

    #[test]
    fn cli_rejects_garbage_strategy_values_at_validation() {
        let cli = Cli::try_parse_from(["fogsim", "scenario.json", "--strategy", "optimal"]).expect("parse succeeds");
        assert!(PlacementStrategyKind::from_str(cli.strategy.as_deref().unwrap()).is_err());
    }
}
