use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::domain::utils::id::{ModuleName, NodeId, RequestId, ServiceGraphId};

/// How a placement pass left a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every module of the request is placed.
    Resolved,
    /// The request was handed to the named parent node.
    Forwarded(NodeId),
    /// Remaining modules were offloaded to the named cluster peer.
    ClusterOffload(NodeId),
}

/// A unit of work asking the orchestration core to map a client's
/// service-graph modules onto topology nodes.
///
/// Created at a client node, filled in by the placement engine, and carried
/// upward while partially placed.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub id: RequestId,
    pub graph: ServiceGraphId,

    /// The client node the request originates from.
    pub gateway: NodeId,

    /// Module name -> hosting node, for modules already fixed.
    pub placed: BTreeMap<ModuleName, NodeId>,
}

impl PlacementRequest {
    /// Derives the request id from the originating client instance.
    pub fn new(graph: ServiceGraphId, gateway: NodeId, pinned: BTreeMap<ModuleName, NodeId>) -> Self {
        let id = RequestId::new(format!("{}@{}#{}", graph, gateway, Uuid::new_v4()));
        PlacementRequest { id, graph, gateway, placed: pinned }
    }

    pub fn placed_modules(&self) -> BTreeSet<ModuleName> {
        self.placed.keys().cloned().collect()
    }

    pub fn is_placed(&self, module: &ModuleName) -> bool {
        self.placed.contains_key(module)
    }
}
