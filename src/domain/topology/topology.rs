use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::api::scenario_dto::FogNodeDto;
use crate::domain::topology::node::{FogNode, Location, NodeRole, Resources};
use crate::domain::utils::id::NodeId;
use crate::error::{Error, Result};

/// The complete fog hierarchy, owner of all node state.
///
/// All mutation of node resources, links and routing tables goes through
/// this type; other components only receive deltas or snapshots.
#[derive(Debug, Clone, Default)]
pub struct FogTopology {
    nodes: BTreeMap<NodeId, FogNode>,
}

impl FogTopology {
    pub fn new() -> Self {
        FogTopology::default()
    }

    pub fn insert(&mut self, node: FogNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Result<&FogNode> {
        self.nodes.get(id).ok_or_else(|| Error::UnknownNode(id.clone()))
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Result<&mut FogNode> {
        self.nodes.get_mut(id).ok_or_else(|| Error::UnknownNode(id.clone()))
    }

    /// All node ids in sorted order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &FogNode)> {
        self.nodes.iter()
    }

    /// The path from `start` (inclusive) up to the root (inclusive).
    pub fn path_to_root(&self, start: &NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = Some(start.clone());

        while let Some(id) = current {
            match self.nodes.get(&id) {
                Some(node) => {
                    path.push(id);
                    current = node.parent.clone();
                }
                None => {
                    log::error!("BrokenParentChain: Node {} referenced on a root path does not exist.", id);
                    break;
                }
            }
            if path.len() > self.nodes.len() {
                log::error!("ParentCycle: Root path starting at {} exceeds the node count, aborting walk.", start);
                break;
            }
        }
        path
    }

    /// The lowest common ancestor of two nodes: the first id on `a`'s root
    /// path that also lies on `b`'s root path.
    pub fn lowest_common_ancestor(&self, a: &NodeId, b: &NodeId) -> Option<NodeId> {
        let path_b: BTreeSet<NodeId> = self.path_to_root(b).into_iter().collect();
        self.path_to_root(a).into_iter().find(|id| path_b.contains(id))
    }

    /// Walks upward from `start` (inclusive) until an orchestration-capable
    /// node is found.
    pub fn nearest_orchestrator_at_or_above(&self, start: &NodeId) -> Option<NodeId> {
        self.path_to_root(start).into_iter().find(|id| {
            self.nodes.get(id).map(|n| n.role.is_orchestration_capable()).unwrap_or(false)
        })
    }

    /// Commits a placement run: subtracts the placed demand per node from
    /// live availability. Called exactly once per completed placement pass.
    pub fn commit_demand(&mut self, per_node: &BTreeMap<NodeId, Resources>) -> Result<()> {
        for (id, demand) in per_node {
            let node = self.get_mut(id)?;
            node.consume(demand);
            log::debug!("Committed demand {:?} on node {}, availability now {:?}.", demand, id, node.available);
        }
        Ok(())
    }

    pub fn detach_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<()> {
        let parent_node = self.get_mut(parent)?;
        parent_node.children.retain(|c| c != child);
        parent_node.child_latencies.remove(child);
        Ok(())
    }

    pub fn attach_child(&mut self, parent: &NodeId, child: &NodeId, latency: f64) -> Result<()> {
        let parent_node = self.get_mut(parent)?;
        if !parent_node.children.contains(child) {
            parent_node.children.push(child.clone());
        }
        parent_node.child_latencies.insert(child.clone(), latency);
        Ok(())
    }

    /// Checks the cluster-symmetry invariant: A in cluster(B) iff B in cluster(A).
    pub fn cluster_membership_is_symmetric(&self) -> bool {
        for (id, node) in &self.nodes {
            for peer in node.cluster_peers.keys() {
                match self.nodes.get(peer) {
                    Some(peer_node) if peer_node.cluster_peers.contains_key(id) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Builds the topology from scenario DTOs: creates nodes, links children
    /// to parents and assigns each node its responsible orchestrator.
    pub fn from_dtos(dtos: &[FogNodeDto]) -> Result<Self> {
        let mut topology = FogTopology::new();

        for dto in dtos {
            let id = NodeId::new(&dto.id);
            if topology.contains(&id) {
                return Err(Error::ModelConstruction(format!("Duplicate node id '{}'", dto.id)));
            }

            let role = NodeRole::from_str(&dto.role)?;
            let mut node = FogNode::new(id, role, dto.level, Resources::new(dto.cpu, dto.ram, dto.storage));
            node.parent = dto.parent.as_ref().map(NodeId::new);
            node.uplink_latency = dto.uplink_latency;
            node.uplink_bandwidth = dto.uplink_bandwidth;
            node.downlink_bandwidth = dto.downlink_bandwidth;
            node.location = Location { latitude: dto.latitude, longitude: dto.longitude };
            topology.insert(node);
        }

        // Wire up parent/child links. The downlink latency towards a child is
        // the child's configured uplink latency.
        let ids = topology.node_ids();
        for id in &ids {
            let (parent, uplink_latency) = {
                let node = topology.get(id)?;
                (node.parent.clone(), node.uplink_latency)
            };
            if let Some(parent_id) = parent {
                if !topology.contains(&parent_id) {
                    return Err(Error::ModelConstruction(format!("Node '{}' references unknown parent '{}'", id, parent_id)));
                }
                topology.attach_child(&parent_id, id, uplink_latency)?;
            }
        }

        // Assign every node its responsible orchestration node and fill the
        // monitored sets.
        for id in &ids {
            let orchestrator = topology.nearest_orchestrator_at_or_above(id);
            match orchestrator {
                Some(orch_id) => {
                    topology.get_mut(id)?.orchestrator = Some(orch_id.clone());
                    if let Some(state) = topology.get_mut(&orch_id)?.orchestration.as_mut() {
                        state.monitored.insert(id.clone());
                    }
                }
                None => {
                    log::warn!("NoOrchestratorAbove: Node {} has no orchestration-capable ancestor.", id);
                }
            }
        }

        Ok(topology)
    }
}
