pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;
pub mod sim;

use crate::api::scenario_dto::ScenarioDto;
use crate::error::Result;
use crate::sim::simulation::Simulation;

/// Loads a scenario file and builds a ready-to-run simulation from it.
pub fn load_scenario(file_path: &str) -> Result<Simulation> {
    let dto: ScenarioDto = loader::parser::parse_json_file(file_path)?;
    log::info!(
        "Scenario loaded: {} node(s), {} service graph(s), {} placement request(s).",
        dto.nodes.len(),
        dto.service_graphs.len(),
        dto.placement_requests.len()
    );
    Simulation::from_scenario(dto)
}
