pub mod scenario_dto;
pub mod service_graph_dto;
