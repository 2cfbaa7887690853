use std::collections::HashMap;

use crate::domain::topology::topology::FogTopology;
use crate::domain::utils::id::NodeId;
use crate::error::Result;

/// All-pairs shortest-path state: latency-weighted distances and the next
/// hop for every ordered node pair.
///
/// Built by iterative relaxation over the direct links (parent, child and
/// cluster edges). An entry is only replaced by a *strictly* shorter path
/// and the scan iterates node ids in sorted order, so among equal-cost
/// paths the first one discovered (lowest midpoint id) deterministically
/// wins.
#[derive(Debug, Clone)]
pub struct RoutingMatrix {
    order: Vec<NodeId>,
    dist: HashMap<(NodeId, NodeId), f64>,
    next: HashMap<(NodeId, NodeId), NodeId>,
}

impl RoutingMatrix {
    /// Seeds the matrix from direct links and relaxes until a full pass
    /// produces no change.
    pub fn build(topology: &FogTopology) -> Self {
        let order = topology.node_ids();
        let mut dist: HashMap<(NodeId, NodeId), f64> = HashMap::new();
        let mut next: HashMap<(NodeId, NodeId), NodeId> = HashMap::new();

        for (id, node) in topology.iter() {
            dist.insert((id.clone(), id.clone()), 0.0);

            if let Some(parent) = &node.parent {
                dist.insert((id.clone(), parent.clone()), node.uplink_latency);
                next.insert((id.clone(), parent.clone()), parent.clone());
            }
            for child in &node.children {
                let latency = node.child_latencies.get(child).copied().unwrap_or(0.0);
                dist.insert((id.clone(), child.clone()), latency);
                next.insert((id.clone(), child.clone()), child.clone());
            }
            for (peer, latency) in &node.cluster_peers {
                dist.insert((id.clone(), peer.clone()), *latency);
                next.insert((id.clone(), peer.clone()), peer.clone());
            }
        }

        let mut matrix = RoutingMatrix { order, dist, next };
        matrix.relax();
        matrix
    }

    fn relax(&mut self) {
        let mut passes = 0usize;
        loop {
            let mut changed = false;

            for row in &self.order {
                for column in &self.order {
                    if row == column {
                        continue;
                    }
                    for midpoint in &self.order {
                        if midpoint == row || midpoint == column {
                            continue;
                        }
                        let Some(&first_leg) = self.dist.get(&(row.clone(), midpoint.clone())) else {
                            continue;
                        };
                        let Some(&second_leg) = self.dist.get(&(midpoint.clone(), column.clone())) else {
                            continue;
                        };

                        let through = first_leg + second_leg;
                        let current = self.dist.get(&(row.clone(), column.clone())).copied();

                        if current.map(|c| through < c).unwrap_or(true) {
                            self.dist.insert((row.clone(), column.clone()), through);
                            let hop = self
                                .next
                                .get(&(row.clone(), midpoint.clone()))
                                .cloned()
                                .unwrap_or_else(|| midpoint.clone());
                            self.next.insert((row.clone(), column.clone()), hop);
                            changed = true;
                        }
                    }
                }
            }

            passes += 1;
            if !changed {
                break;
            }
        }
        log::debug!("Routing matrix converged after {} relaxation pass(es) over {} nodes.", passes, self.order.len());
    }

    pub fn distance(&self, from: &NodeId, to: &NodeId) -> Option<f64> {
        self.dist.get(&(from.clone(), to.clone())).copied()
    }

    pub fn next_hop(&self, from: &NodeId, to: &NodeId) -> Option<&NodeId> {
        self.next.get(&(from.clone(), to.clone()))
    }

    /// Writes the per-node `dest -> next hop` tables into the topology.
    pub fn install(&self, topology: &mut FogTopology) -> Result<()> {
        for from in &self.order {
            let mut table = HashMap::new();
            for to in &self.order {
                if from == to {
                    continue;
                }
                if let Some(hop) = self.next.get(&(from.clone(), to.clone())) {
                    table.insert(to.clone(), hop.clone());
                }
            }
            topology.get_mut(from)?.routing_table = table;
        }
        Ok(())
    }
}

/// Localized routing repair after a node changed its attachment point.
///
/// The moved node reaches everyone via its new parent; every other node
/// reaches the moved node via whatever next hop it already uses towards the
/// new parent. This avoids a full topology-wide recomputation per mobility
/// event.
pub fn repair_routes_after_move(topology: &mut FogTopology, moved: &NodeId, new_parent: &NodeId) -> Result<()> {
    let all_ids = topology.node_ids();

    {
        let moved_node = topology.get_mut(moved)?;
        moved_node.routing_table.clear();
        for dest in &all_ids {
            if dest != moved {
                moved_node.routing_table.insert(dest.clone(), new_parent.clone());
            }
        }
    }

    for id in &all_ids {
        if id == moved {
            continue;
        }
        let hop_to_moved = if id == new_parent {
            Some(moved.clone())
        } else {
            topology.get(id)?.routing_table.get(new_parent).cloned()
        };
        match hop_to_moved {
            Some(hop) => {
                topology.get_mut(id)?.routing_table.insert(moved.clone(), hop);
            }
            None => {
                log::error!("RouteRepairGap: Node {} has no route towards new parent {}, entry for {} left stale.", id, new_parent, moved);
            }
        }
    }
    Ok(())
}
