use std::collections::{BTreeMap, BTreeSet};

use crate::domain::placement::request::{PlacementRequest, Resolution};
use crate::domain::placement::strategy::{PlacementOutcome, PlacementStrategy, deltas_for_placed_module};
use crate::domain::service::graph::ServiceGraph;
use crate::domain::topology::node::Resources;
use crate::domain::topology::topology::FogTopology;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use crate::error::{Error, Result};

/// Decentralized placement run independently by every orchestration-capable
/// node for the requests it receives.
///
/// Each node only reasons about itself, its cluster and escalation upward:
/// DAG-source frontier modules are packed locally while capacity allows,
/// leftovers go to the cluster peer with the greatest spare CPU if the most
/// demanding one fits there, and otherwise the partially placed request is
/// forwarded to the parent.
#[derive(Debug, Default)]
pub struct DistributedPlacement;

impl PlacementStrategy for DistributedPlacement {
    fn name(&self) -> &'static str {
        "distributed"
    }

    fn place(
        &self,
        at: &NodeId,
        requests: Vec<PlacementRequest>,
        topology: &mut FogTopology,
        graphs: &BTreeMap<ServiceGraphId, ServiceGraph>,
    ) -> Result<PlacementOutcome> {
        let mut outcome = PlacementOutcome::default();

        for mut request in requests {
            let graph = graphs.get(&request.graph).ok_or_else(|| Error::UnknownServiceGraph(request.graph.clone()))?;

            let mut failed: BTreeSet<ModuleName> = BTreeSet::new();
            let mut local_load = Resources::zero();
            let mut local_placements: Vec<ModuleName> = Vec::new();

            // Local loop: place frontier modules here while capacity allows;
            // modules that do not fit join the failed set, which prunes
            // their downstream closure from the next frontier.
            loop {
                let placed_set = request.placed_modules();
                let frontier = graph.dag_sources(&placed_set, &failed);
                if frontier.is_empty() {
                    break;
                }

                let mut progress = false;
                for module in frontier {
                    let demand = graph.module(&module)?.demand;

                    if let Some(allowed) = graph.constraints.get(&module) {
                        if !allowed.contains(at) {
                            if allowed.iter().all(|n| !topology.contains(n)) {
                                log::warn!("MalformedPlacementRequest: Module {} of request {} is pinned to nonexistent node(s) {:?}.", module, request.id, allowed);
                            }
                            failed.insert(module);
                            continue;
                        }
                    }

                    let here = topology.get(at)?;
                    if demand.add(&local_load).fits_within(&here.available) {
                        local_load = local_load.add(&demand);
                        request.placed.insert(module.clone(), at.clone());
                        local_placements.push(module);
                        progress = true;
                    } else {
                        log::debug!("Module {} of request {} does not fit on {}, marked failed here.", module, request.id, at);
                        failed.insert(module);
                    }
                }

                if !progress {
                    break;
                }
            }

            // Commit the local share before deciding how the rest proceeds.
            let mut commit = BTreeMap::new();
            if !local_placements.is_empty() {
                commit.insert(at.clone(), local_load);
            }
            topology.commit_demand(&commit)?;
            for module in &local_placements {
                outcome.record_launch(at.clone(), request.graph.clone(), module.clone());
            }

            let remaining: BTreeSet<ModuleName> =
                graph.modules.keys().filter(|m| !request.is_placed(m)).cloned().collect();

            if remaining.is_empty() {
                for module in &local_placements {
                    let mut deltas = Vec::new();
                    deltas_for_placed_module(graph, &request, module, at, topology, &mut deltas);
                    outcome.discovery_deltas.extend(deltas);
                }
                log::info!("Request {} fully placed at {}.", request.id, at);
                outcome.resolutions.push((request.id.clone(), Resolution::Resolved));
                outcome.completed.push(request);
                continue;
            }

            // Cluster fallback: the peer with the greatest spare CPU takes
            // the leftovers iff the single most demanding one fits its
            // headroom.
            if let Some(peer) = best_cluster_peer(at, topology)? {
                let most_demanding = graph.most_demanding(&remaining).expect("remaining set is non-empty");
                let peer_node = topology.get(&peer)?;
                if most_demanding.demand.fits_within(&peer_node.available) {
                    let mut peer_load = Resources::zero();
                    for module in &remaining {
                        peer_load = peer_load.add(&graph.module(module)?.demand);
                        request.placed.insert(module.clone(), peer.clone());
                        outcome.record_launch(peer.clone(), request.graph.clone(), module.clone());
                    }
                    let mut commit = BTreeMap::new();
                    commit.insert(peer.clone(), peer_load);
                    topology.commit_demand(&commit)?;

                    for module in local_placements.iter().chain(remaining.iter()) {
                        let host = request.placed[module].clone();
                        let mut deltas = Vec::new();
                        deltas_for_placed_module(graph, &request, module, &host, topology, &mut deltas);
                        outcome.discovery_deltas.extend(deltas);
                    }
                    log::info!("Request {} completed by offloading {} module(s) to cluster peer {}.", request.id, remaining.len(), peer);
                    outcome.resolutions.push((request.id.clone(), Resolution::ClusterOffload(peer)));
                    outcome.completed.push(request);
                    continue;
                }
            }

            // Escalate the partially placed request to the parent.
            for module in &local_placements {
                let mut deltas = Vec::new();
                deltas_for_placed_module(graph, &request, module, at, topology, &mut deltas);
                outcome.discovery_deltas.extend(deltas);
            }
            match topology.get(at)?.parent.clone() {
                Some(parent) => {
                    log::info!("Request {} forwarded from {} to parent {} with {} module(s) still unplaced.", request.id, at, parent, remaining.len());
                    outcome.resolutions.push((request.id.clone(), Resolution::Forwarded(parent.clone())));
                    outcome.forwarded.push((parent, request));
                }
                None => {
                    log::error!("PlacementEscalationExhausted: Request {} cannot be placed and {} has no parent.", request.id, at);
                    return Err(Error::UnsatisfiablePlacement(request.id.clone()));
                }
            }
        }

        Ok(outcome)
    }
}

/// The cluster peer of `at` with the greatest spare CPU, if any.
fn best_cluster_peer(at: &NodeId, topology: &FogTopology) -> Result<Option<NodeId>> {
    let node = topology.get(at)?;
    let mut best: Option<(NodeId, f64)> = None;
    for peer in node.cluster_peers.keys() {
        let spare = topology.get(peer)?.spare_cpu();
        if best.as_ref().map(|(_, b)| spare > *b).unwrap_or(true) {
            best = Some((peer.clone(), spare));
        }
    }
    Ok(best.map(|(id, _)| id))
}
