use thiserror::Error;

use crate::domain::utils::id::{ModuleName, NodeId, RequestId, ServiceGraphId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scenario JSON: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Failed to build internal system model: {0}")]
    ModelConstruction(String),

    #[error("Unknown node referenced: {0}")]
    UnknownNode(NodeId),

    #[error("Unknown service graph referenced: {0}")]
    UnknownServiceGraph(ServiceGraphId),

    #[error("Unknown module {module} in service graph {graph}")]
    UnknownModule { graph: ServiceGraphId, module: ModuleName },

    #[error("Routing table of {node} has no entry for destination {destination}")]
    TopologyInconsistency { node: NodeId, destination: NodeId },

    #[error("Placement request {0} cannot be satisfied anywhere in the hierarchy")]
    UnsatisfiablePlacement(RequestId),

    #[error("Failed to write metrics CSV: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
