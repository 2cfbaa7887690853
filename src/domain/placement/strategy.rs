use std::collections::BTreeMap;

use crate::domain::placement::request::{PlacementRequest, Resolution};
use crate::domain::service::discovery::{DeltaKind, DiscoveryDelta};
use crate::domain::service::graph::ServiceGraph;
use crate::domain::topology::topology::FogTopology;
use crate::domain::utils::id::{ModuleName, NodeId, RequestId, ServiceGraphId};
use crate::error::Result;

/// A module instantiation order addressed to a target node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLaunch {
    pub graph: ServiceGraphId,
    pub module: ModuleName,
}

/// A discovery delta together with the orchestrator node it must be applied
/// at.
#[derive(Debug, Clone)]
pub struct AddressedDelta {
    pub target: NodeId,
    pub delta: DiscoveryDelta,
}

/// The result of one placement pass, already committed against live
/// availability.
#[derive(Debug, Default)]
pub struct PlacementOutcome {
    /// Per target node, the set of modules to instantiate.
    pub launches: BTreeMap<NodeId, Vec<ModuleLaunch>>,

    /// Service-discovery updates for the clients of newly placed modules.
    pub discovery_deltas: Vec<AddressedDelta>,

    /// Fully placed requests.
    pub completed: Vec<PlacementRequest>,

    /// Requests escalated upward, with the node to forward them to.
    pub forwarded: Vec<(NodeId, PlacementRequest)>,

    /// Per-request resolution status for reporting.
    pub resolutions: Vec<(RequestId, Resolution)>,
}

impl PlacementOutcome {
    pub fn record_launch(&mut self, host: NodeId, graph: ServiceGraphId, module: ModuleName) {
        self.launches.entry(host).or_default().push(ModuleLaunch { graph, module });
    }
}

/// A placement algorithm run by an orchestrating node.
///
/// Implementations commit resource demand against the topology exactly once,
/// after the whole pass completed, so no partial view of availability is
/// ever observed.
pub trait PlacementStrategy: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn place(
        &self,
        at: &NodeId,
        requests: Vec<PlacementRequest>,
        topology: &mut FogTopology,
        graphs: &BTreeMap<ServiceGraphId, ServiceGraph>,
    ) -> Result<PlacementOutcome>;
}

/// Emits the discovery deltas for one newly placed module: every node that
/// hosts a structural UP-predecessor of the module learns the new location,
/// through its responsible orchestrator.
pub fn deltas_for_placed_module(
    graph: &ServiceGraph,
    request: &PlacementRequest,
    module: &ModuleName,
    host: &NodeId,
    topology: &FogTopology,
    out: &mut Vec<AddressedDelta>,
) {
    for predecessor in graph.up_predecessors(module) {
        let Some(predecessor_host) = request.placed.get(&predecessor) else {
            continue;
        };
        let orchestrator = topology
            .get(predecessor_host)
            .ok()
            .and_then(|n| n.orchestrator.clone())
            .unwrap_or_else(|| predecessor_host.clone());
        out.push(AddressedDelta {
            target: orchestrator,
            delta: DiscoveryDelta { service: module.clone(), host: host.clone(), kind: DeltaKind::Add },
        });
    }
}
