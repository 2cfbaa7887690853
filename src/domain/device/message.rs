use uuid::Uuid;

use crate::domain::placement::request::PlacementRequest;
use crate::domain::placement::strategy::ModuleLaunch;
use crate::domain::service::discovery::DiscoveryDelta;
use crate::domain::service::graph::EdgeDirection;
use crate::domain::topology::node::Resources;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId, TupleId};

/// A unit of application data flowing between modules.
///
/// The destination node is resolved lazily: on the first UP hop through
/// service discovery, on DOWN hops through the tuple's own traversal
/// history.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub id: TupleId,
    pub graph: ServiceGraphId,

    /// The module that emitted this tuple, if any (sensor tuples have none).
    pub source_module: Option<ModuleName>,
    pub dest_module: ModuleName,
    pub direction: EdgeDirection,

    /// Resolved destination node, `None` until the first resolution.
    pub dest_node: Option<NodeId>,

    /// (node, module) pairs recorded at every executing hop.
    pub history: Vec<(NodeId, ModuleName)>,
}

impl Tuple {
    pub fn new(graph: ServiceGraphId, source_module: Option<ModuleName>, dest_module: ModuleName, direction: EdgeDirection) -> Self {
        Tuple {
            id: TupleId::new(Uuid::new_v4().to_string()),
            graph,
            source_module,
            dest_module,
            direction,
            dest_node: None,
            history: Vec::new(),
        }
    }

    /// The node recorded in the traversal history as the host of `module`.
    pub fn recorded_host(&self, module: &ModuleName) -> Option<NodeId> {
        self.history.iter().find(|(_, m)| m == module).map(|(n, _)| n.clone())
    }
}

/// Control-plane payloads, dispatched at the receiving node by kind.
#[derive(Debug, Clone)]
pub enum ControlKind {
    /// A placement request travelling towards (or between) orchestrators.
    Placement(PlacementRequest),

    /// A service-discovery mutation for the receiving orchestrator.
    Discovery(DiscoveryDelta),

    /// A resource-availability mutation at the receiving node.
    ResourceDelta { demand: Resources, release: bool },

    /// Modules the receiving node must instantiate.
    Deployment(Vec<ModuleLaunch>),
}

impl ControlKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ControlKind::Placement(_) => "placement",
            ControlKind::Discovery(_) => "discovery",
            ControlKind::ResourceDelta { .. } => "resource-delta",
            ControlKind::Deployment(_) => "deployment",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlMessage {
    pub dest_node: NodeId,
    pub kind: ControlKind,
}

/// Anything a node can put on a link: application data or control traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Tuple(Tuple),
    Control(ControlMessage),
}

impl Message {
    /// The resolved destination node, if any.
    pub fn dest_node(&self) -> Option<&NodeId> {
        match self {
            Message::Tuple(tuple) => tuple.dest_node.as_ref(),
            Message::Control(control) => Some(&control.dest_node),
        }
    }

    #[cfg(test)]
    pub fn test_message() -> Self {
        Message::Tuple(Tuple::new(
            ServiceGraphId::new("test-graph"),
            None,
            ModuleName::new("test-module"),
            EdgeDirection::Up,
        ))
    }
}
