use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::str::FromStr;

use crate::domain::device::message::Message;
use crate::domain::placement::request::PlacementRequest;
use crate::domain::service::discovery::ServiceDiscovery;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use crate::error::Error;

/// Role of a node in the fog hierarchy.
///
/// The role determines whether the node runs the placement engine
/// (orchestration-capable roles) or only hosts modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Edge device a user application attaches to (gateway).
    Client,
    /// Compute-only fog node (FCN), hosts modules but does not place them.
    Compute,
    /// Fog orchestration node (FON), runs the placement engine.
    Orchestration,
    /// Top-most node, orchestration-capable with effectively unbounded resources.
    Cloud,
}

impl NodeRole {
    pub fn is_orchestration_capable(&self) -> bool {
        matches!(self, NodeRole::Orchestration | NodeRole::Cloud)
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(NodeRole::Client),
            "compute" => Ok(NodeRole::Compute),
            "orchestration" => Ok(NodeRole::Orchestration),
            "cloud" => Ok(NodeRole::Cloud),
            other => Err(Error::ModelConstruction(format!("Unknown node role '{}'", other))),
        }
    }
}

/// Per-resource-kind quantities, used both for capacities and demands.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub ram: f64,
    pub storage: f64,
}

impl Resources {
    pub fn new(cpu: f64, ram: f64, storage: f64) -> Self {
        Resources { cpu, ram, storage }
    }

    pub fn zero() -> Self {
        Resources::default()
    }

    /// True iff every component of `self` fits within `other`.
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.cpu <= other.cpu && self.ram <= other.ram && self.storage <= other.storage
    }

    pub fn add(&self, other: &Resources) -> Resources {
        Resources { cpu: self.cpu + other.cpu, ram: self.ram + other.ram, storage: self.storage + other.storage }
    }

    pub fn sub(&self, other: &Resources) -> Resources {
        Resources { cpu: self.cpu - other.cpu, ram: self.ram - other.ram, storage: self.storage - other.storage }
    }
}

/// Geographic position used by dynamic clustering and mobility.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Great-circle distance in km between two positions, by haversine.
    pub fn distance_km(&self, other: &Location) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        let distance = EARTH_RADIUS_KM * c;

        (distance * distance).sqrt()
    }
}

/// The three unidirectional link kinds a node owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Up,
    Down,
    Cluster,
}

/// A message handed to a link together with its resolved next hop.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub message: Message,
    pub next_hop: NodeId,
    pub latency_ms: f64,
}

/// A unidirectional link with a busy flag and a FIFO queue of pending
/// transmissions. The link serializes one message at a time; queued
/// messages are drained on each link-freed event.
#[derive(Debug, Clone, Default)]
pub struct TransmissionLink {
    busy: bool,
    queue: VecDeque<Transmission>,
}

impl TransmissionLink {
    /// Submits a transmission. Returns it back if the link was free (the
    /// caller puts it on the wire now); otherwise it is queued.
    pub fn submit(&mut self, transmission: Transmission) -> Option<Transmission> {
        if self.busy {
            self.queue.push_back(transmission);
            None
        } else {
            self.busy = true;
            Some(transmission)
        }
    }

    /// Signals that the in-flight transmission completed. Returns the next
    /// queued transmission, if any; the link stays busy while draining.
    pub fn release(&mut self) -> Option<Transmission> {
        match self.queue.pop_front() {
            Some(next) => Some(next),
            None => {
                self.busy = false;
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Message-handling state of a node, `Idle` between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Idle,
    Processing,
}

/// State owned by an orchestration-capable node.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorState {
    pub discovery: ServiceDiscovery,

    /// Nodes this orchestrator is responsible for (its monitored set).
    pub monitored: BTreeSet<NodeId>,

    /// Placement requests received but not yet run through a placement pass.
    pub pending: Vec<PlacementRequest>,
}

/// A single node of the fog topology.
#[derive(Debug, Clone)]
pub struct FogNode {
    pub id: NodeId,
    pub role: NodeRole,
    pub level: u32,

    pub parent: Option<NodeId>,

    /// Ordered set of children.
    pub children: Vec<NodeId>,

    /// Downlink latency per child (ms).
    pub child_latencies: HashMap<NodeId, f64>,

    /// Latency of the link towards the parent (ms).
    pub uplink_latency: f64,

    pub uplink_bandwidth: f64,
    pub downlink_bandwidth: f64,

    pub location: Location,

    pub capacity: Resources,
    pub available: Resources,

    /// Symmetric cluster peer set with the uniform cluster latency (ms).
    pub cluster_peers: BTreeMap<NodeId, f64>,

    /// Set once a clustering pass has run for this node.
    pub in_cluster: bool,

    /// In cluster with an empty peer set (own-cluster-of-one).
    pub self_clustered: bool,

    /// dest id -> next-hop id, produced by the routing table generator.
    pub routing_table: HashMap<NodeId, NodeId>,

    /// Module instances currently running on this node.
    pub hosted: BTreeSet<(ServiceGraphId, ModuleName)>,

    /// The orchestration node responsible for this node.
    pub orchestrator: Option<NodeId>,

    pub state: DeviceState,

    pub up_link: TransmissionLink,
    pub down_link: TransmissionLink,
    pub cluster_link: TransmissionLink,

    /// Present iff the role is orchestration-capable.
    pub orchestration: Option<OrchestratorState>,
}

impl FogNode {
    pub fn new(id: NodeId, role: NodeRole, level: u32, capacity: Resources) -> Self {
        let orchestration = role.is_orchestration_capable().then(OrchestratorState::default);

        FogNode {
            id,
            role,
            level,
            parent: None,
            children: Vec::new(),
            child_latencies: HashMap::new(),
            uplink_latency: 0.0,
            uplink_bandwidth: 0.0,
            downlink_bandwidth: 0.0,
            location: Location::default(),
            capacity,
            available: capacity,
            cluster_peers: BTreeMap::new(),
            in_cluster: false,
            self_clustered: false,
            routing_table: HashMap::new(),
            hosted: BTreeSet::new(),
            orchestrator: None,
            state: DeviceState::Idle,
            up_link: TransmissionLink::default(),
            down_link: TransmissionLink::default(),
            cluster_link: TransmissionLink::default(),
            orchestration,
        }
    }

    pub fn can_host(&self, demand: &Resources) -> bool {
        demand.fits_within(&self.available)
    }

    /// Spare CPU, the ordering criterion for cluster-local load spreading.
    pub fn spare_cpu(&self) -> f64 {
        self.available.cpu
    }

    pub fn consume(&mut self, demand: &Resources) {
        self.available = self.available.sub(demand);
        if self.available.cpu < 0.0 || self.available.ram < 0.0 || self.available.storage < 0.0 {
            log::error!("ResourceOverCommit: Node {} availability went negative: {:?}", self.id, self.available);
        }
    }

    pub fn release(&mut self, demand: &Resources) {
        self.available = self.available.add(demand);
        if !self.available.fits_within(&self.capacity) {
            log::warn!("ResourceOverRelease: Node {} availability exceeds capacity, clamping.", self.id);
            self.available = Resources {
                cpu: self.available.cpu.min(self.capacity.cpu),
                ram: self.available.ram.min(self.capacity.ram),
                storage: self.available.storage.min(self.capacity.storage),
            };
        }
    }

    pub fn hosts_module(&self, graph: &ServiceGraphId, module: &ModuleName) -> bool {
        self.hosted.contains(&(graph.clone(), module.clone()))
    }

    pub fn hosts_any_module_of(&self, graph: &ServiceGraphId) -> bool {
        self.hosted.iter().any(|(g, _)| g == graph)
    }

    /// Instantiates a module. Duplicate placement of the same module on the
    /// same node is an idempotent no-op with a logged notice.
    pub fn instantiate_module(&mut self, graph: ServiceGraphId, module: ModuleName) -> bool {
        if !self.hosted.insert((graph.clone(), module.clone())) {
            log::info!("DuplicateModulePlacement: Module {} of graph {} already runs on node {}, ignoring.", module, graph, self.id);
            return false;
        }
        log::debug!("Node {} now hosts module {} of graph {}.", self.id, module, graph);
        true
    }

    pub fn remove_module(&mut self, graph: &ServiceGraphId, module: &ModuleName) -> bool {
        self.hosted.remove(&(graph.clone(), module.clone()))
    }

    pub fn link_mut(&mut self, direction: LinkDirection) -> &mut TransmissionLink {
        match direction {
            LinkDirection::Up => &mut self.up_link,
            LinkDirection::Down => &mut self.down_link,
            LinkDirection::Cluster => &mut self.cluster_link,
        }
    }

    /// Read view of this node's cluster, as produced by a clustering pass.
    pub fn cluster_descriptor(&self) -> Option<ClusterDescriptor> {
        if !self.in_cluster {
            return None;
        }
        let latency = self.cluster_peers.values().next().copied().unwrap_or(0.0);
        Some(ClusterDescriptor { peers: self.cluster_peers.keys().cloned().collect(), latency })
    }
}

/// Symmetric set of peer ids plus the shared cluster latency.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDescriptor {
    pub peers: BTreeSet<NodeId>,
    pub latency: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_fit_componentwise() {
        let capacity = Resources::new(100.0, 512.0, 1024.0);
        assert!(Resources::new(100.0, 512.0, 1024.0).fits_within(&capacity));
        assert!(!Resources::new(100.1, 0.0, 0.0).fits_within(&capacity));
    }

    #[test]
    fn link_serializes_one_message_at_a_time() {
        let mut link = TransmissionLink::default();
        let t = Transmission {
            message: crate::domain::device::message::Message::test_message(),
            next_hop: NodeId::new("n1"),
            latency_ms: 2.0,
        };

        // First submission goes out immediately, second is queued.
        assert!(link.submit(t.clone()).is_some());
        assert!(link.submit(t.clone()).is_none());
        assert_eq!(link.queued(), 1);

        // Draining returns the queued transmission, then frees the link.
        assert!(link.release().is_some());
        assert!(link.release().is_none());
        assert!(!link.is_busy());
    }

    #[test]
    fn duplicate_instantiation_is_a_no_op() {
        let mut node = FogNode::new(NodeId::new("n1"), NodeRole::Compute, 2, Resources::new(100.0, 100.0, 100.0));
        let graph = ServiceGraphId::new("app");
        let module = ModuleName::new("m1");

        assert!(node.instantiate_module(graph.clone(), module.clone()));
        assert!(!node.instantiate_module(graph.clone(), module.clone()));
        assert_eq!(node.hosted.len(), 1);
    }

    #[test]
    fn haversine_distance_is_symmetric() {
        let berlin = Location { latitude: 52.52, longitude: 13.405 };
        let munich = Location { latitude: 48.137, longitude: 11.575 };

        let d1 = berlin.distance_km(&munich);
        let d2 = munich.distance_km(&berlin);

        assert!((d1 - d2).abs() < 1e-9);
        // Berlin - Munich is roughly 500 km.
        assert!(d1 > 450.0 && d1 < 550.0, "unexpected distance {}", d1);
    }
}
