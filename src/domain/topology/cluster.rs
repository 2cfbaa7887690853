use std::collections::HashMap;

use union_find::{QuickUnionUf, UnionBySize, UnionFind};

use crate::domain::topology::topology::FogTopology;
use crate::domain::utils::id::NodeId;
use crate::error::Result;

/// Static cluster formation: every group of nodes at `level` sharing a
/// parent becomes one cluster, all members pairwise linked with the uniform
/// `latency`.
///
/// Grouping runs through a Disjoint Set Union over the candidate nodes,
/// unioning each node with the first seen sibling under the same parent.
pub fn form_static_clusters(topology: &mut FogTopology, level: u32, latency: f64) -> Result<()> {
    let candidates: Vec<NodeId> =
        topology.iter().filter(|(_, n)| n.level == level && n.parent.is_some()).map(|(id, _)| id.clone()).collect();

    let mut id_to_index: HashMap<NodeId, usize> = HashMap::with_capacity(candidates.len());
    for (index, id) in candidates.iter().enumerate() {
        id_to_index.insert(id.clone(), index);
    }

    let mut dsu = QuickUnionUf::<UnionBySize>::new(candidates.len());

    // Union each candidate with the first sibling seen under its parent.
    let mut first_child_of_parent: HashMap<NodeId, usize> = HashMap::new();
    for id in &candidates {
        let parent = topology.get(id)?.parent.clone().expect("candidates are filtered to parented nodes");
        let index = id_to_index[id];
        match first_child_of_parent.get(&parent) {
            Some(&first_index) => {
                dsu.union(first_index, index);
            }
            None => {
                first_child_of_parent.insert(parent, index);
            }
        }
    }

    // Collect members per representative.
    let mut groups: HashMap<usize, Vec<NodeId>> = HashMap::new();
    for id in &candidates {
        let rep = dsu.find(id_to_index[id]);
        groups.entry(rep).or_default().push(id.clone());
    }

    for members in groups.values() {
        for member in members {
            let node = topology.get_mut(member)?;
            node.in_cluster = true;
            node.self_clustered = members.len() == 1;
            for peer in members {
                if peer != member {
                    node.cluster_peers.insert(peer.clone(), latency);
                }
            }
        }
        log::info!("Formed static cluster of {} node(s): {:?}", members.len(), members);
    }

    debug_assert!(topology.cluster_membership_is_symmetric());
    Ok(())
}

/// Dynamic cluster formation for one node, triggered by its start-clustering
/// signal.
///
/// The node measures the great-circle distance to every sibling under the
/// same parent and admits those within `range_km`. Membership is written
/// symmetrically on both sides. A node with zero qualifying siblings is
/// marked self-clustered, so later logic treats it as an own-cluster-of-one.
pub fn dynamic_cluster_node(topology: &mut FogTopology, node_id: &NodeId, range_km: f64, latency: f64) -> Result<()> {
    let (parent, location) = {
        let node = topology.get(node_id)?;
        (node.parent.clone(), node.location)
    };

    let Some(parent_id) = parent else {
        log::debug!("Node {} has no parent, skipping dynamic clustering.", node_id);
        return Ok(());
    };

    let siblings: Vec<NodeId> = topology.get(&parent_id)?.children.iter().filter(|c| *c != node_id).cloned().collect();

    let mut admitted = Vec::new();
    for sibling in siblings {
        let distance = topology.get(&sibling)?.location.distance_km(&location);
        if distance <= range_km {
            admitted.push(sibling);
        } else {
            log::debug!("Node {} rejects sibling {} at {:.2} km (range {:.2} km).", node_id, sibling, distance, range_km);
        }
    }

    let node = topology.get_mut(node_id)?;
    node.in_cluster = true;
    node.self_clustered = admitted.is_empty();
    for peer in &admitted {
        node.cluster_peers.insert(peer.clone(), latency);
    }

    // Keep membership symmetric from the admitting side as well.
    for peer in &admitted {
        let peer_node = topology.get_mut(peer)?;
        peer_node.in_cluster = true;
        peer_node.self_clustered = false;
        peer_node.cluster_peers.insert(node_id.clone(), latency);
    }

    if admitted.is_empty() {
        log::info!("Node {} found no sibling in range, self-clustered.", node_id);
    } else {
        log::info!("Node {} clustered with {} peer(s): {:?}", node_id, admitted.len(), admitted);
    }

    debug_assert!(topology.cluster_membership_is_symmetric());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scenario_dto::FogNodeDto;

    fn node_dto(id: &str, role: &str, level: u32, parent: Option<&str>, lat: f64, lon: f64) -> FogNodeDto {
        FogNodeDto {
            id: id.to_string(),
            role: role.to_string(),
            level,
            parent: parent.map(|p| p.to_string()),
            uplink_latency: 4.0,
            uplink_bandwidth: 100.0,
            downlink_bandwidth: 100.0,
            latitude: lat,
            longitude: lon,
            cpu: 1000.0,
            ram: 1024.0,
            storage: 4096.0,
        }
    }

    fn two_group_topology() -> FogTopology {
        FogTopology::from_dtos(&[
            node_dto("cloud", "cloud", 0, None, 0.0, 0.0),
            node_dto("fon-1", "orchestration", 1, Some("cloud"), 0.0, 0.0),
            node_dto("fon-2", "orchestration", 1, Some("cloud"), 0.0, 1.0),
            node_dto("edge-a1", "compute", 2, Some("fon-1"), 52.50, 13.40),
            node_dto("edge-a2", "compute", 2, Some("fon-1"), 52.51, 13.41),
            node_dto("edge-b1", "compute", 2, Some("fon-2"), 48.13, 11.57),
        ])
        .expect("valid topology")
    }

    #[test]
    fn static_clusters_group_by_parent_and_are_symmetric() {
        let mut topology = two_group_topology();
        form_static_clusters(&mut topology, 2, 2.0).unwrap();

        let a1 = topology.get(&NodeId::new("edge-a1")).unwrap();
        assert!(a1.in_cluster);
        assert!(!a1.self_clustered);
        assert!(a1.cluster_peers.contains_key(&NodeId::new("edge-a2")));
        assert!(!a1.cluster_peers.contains_key(&NodeId::new("edge-b1")));

        let b1 = topology.get(&NodeId::new("edge-b1")).unwrap();
        assert!(b1.in_cluster);
        assert!(b1.self_clustered);
        assert!(b1.cluster_peers.is_empty());

        assert!(topology.cluster_membership_is_symmetric());
    }

    #[test]
    fn cluster_descriptors_expose_the_formed_membership() {
        let mut topology = two_group_topology();

        // Before any clustering pass there is no descriptor.
        assert!(topology.get(&NodeId::new("edge-a1")).unwrap().cluster_descriptor().is_none());

        form_static_clusters(&mut topology, 2, 2.0).unwrap();

        let descriptor = topology.get(&NodeId::new("edge-a1")).unwrap().cluster_descriptor().expect("clustered");
        assert_eq!(descriptor.peers, [NodeId::new("edge-a2")].into_iter().collect());
        assert_eq!(descriptor.latency, 2.0);

        // A cluster-of-one has an empty view with no peer latency.
        let lone = topology.get(&NodeId::new("edge-b1")).unwrap().cluster_descriptor().expect("self-clustered");
        assert!(lone.peers.is_empty());
        assert_eq!(lone.latency, 0.0);
    }

    #[test]
    fn dynamic_clustering_admits_only_siblings_in_range() {
        let mut topology = FogTopology::from_dtos(&[
            node_dto("fon-1", "orchestration", 1, None, 0.0, 0.0),
            node_dto("edge-1", "compute", 2, Some("fon-1"), 52.500, 13.400),
            node_dto("edge-2", "compute", 2, Some("fon-1"), 52.505, 13.405),
            node_dto("edge-3", "compute", 2, Some("fon-1"), 53.500, 14.400),
        ])
        .expect("valid topology");

        // edge-2 is well below 5 km from edge-1, edge-3 is far outside.
        dynamic_cluster_node(&mut topology, &NodeId::new("edge-1"), 5.0, 2.0).unwrap();

        let e1 = topology.get(&NodeId::new("edge-1")).unwrap();
        assert!(e1.cluster_peers.contains_key(&NodeId::new("edge-2")));
        assert!(!e1.cluster_peers.contains_key(&NodeId::new("edge-3")));
        assert!(topology.cluster_membership_is_symmetric());
    }

    #[test]
    fn isolated_node_becomes_self_clustered() {
        let mut topology = FogTopology::from_dtos(&[
            node_dto("fon-1", "orchestration", 1, None, 0.0, 0.0),
            node_dto("edge-1", "compute", 2, Some("fon-1"), 52.5, 13.4),
            node_dto("edge-2", "compute", 2, Some("fon-1"), 60.0, 20.0),
        ])
        .expect("valid topology");

        dynamic_cluster_node(&mut topology, &NodeId::new("edge-1"), 1.0, 2.0).unwrap();

        let e1 = topology.get(&NodeId::new("edge-1")).unwrap();
        assert!(e1.in_cluster);
        assert!(e1.self_clustered);
        assert!(e1.cluster_peers.is_empty());
    }
}
