use std::collections::{BTreeMap, BTreeSet};

use crate::domain::placement::request::{PlacementRequest, Resolution};
use crate::domain::placement::strategy::{AddressedDelta, PlacementOutcome, PlacementStrategy, deltas_for_placed_module};
use crate::domain::service::graph::ServiceGraph;
use crate::domain::topology::node::Resources;
use crate::domain::topology::topology::FogTopology;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use crate::error::{Error, Result};

/// Upper bound on fixpoint passes before a batch is declared unsatisfiable.
const MAX_PLACEMENT_PASSES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestStatus {
    Active,
    Done,
    Forward,
}

/// Centralized placement run by a single orchestrating node over its
/// monitored sub-topology.
///
/// Each request is anchored to a node (initially the gateway's parent);
/// frontier modules are packed onto the anchor, spread across its cluster
/// peers when the anchor is full, and the anchor escalates towards the
/// root when the whole cluster is exhausted. Resource demand is committed
/// against live availability only once the whole pass completed.
#[derive(Debug, Default)]
pub struct ClusteredPlacement;

impl PlacementStrategy for ClusteredPlacement {
    fn name(&self) -> &'static str {
        "clustered"
    }

    fn place(
        &self,
        at: &NodeId,
        mut requests: Vec<PlacementRequest>,
        topology: &mut FogTopology,
        graphs: &BTreeMap<ServiceGraphId, ServiceGraph>,
    ) -> Result<PlacementOutcome> {
        let mut monitored: BTreeSet<NodeId> =
            topology.get(at)?.orchestration.as_ref().map(|s| s.monitored.clone()).unwrap_or_default();
        monitored.insert(at.clone());

        // Mutable load shadow of availability, committed only at the end.
        let mut shadow: BTreeMap<NodeId, Resources> = BTreeMap::new();
        // Which service graphs this run placed modules of, per host. The
        // active-peer ordering must not count load another graph put there.
        let mut shadow_graphs: BTreeMap<NodeId, BTreeSet<ServiceGraphId>> = BTreeMap::new();
        // (request index, module, host) for every placement made this run.
        let mut placements: Vec<(usize, ModuleName, NodeId)> = Vec::new();

        let mut status = vec![RequestStatus::Active; requests.len()];
        let mut anchors: Vec<NodeId> = Vec::with_capacity(requests.len());
        for request in &requests {
            let gateway_parent = topology.get(&request.gateway).ok().and_then(|n| n.parent.clone());
            let anchor = match gateway_parent {
                Some(parent) if monitored.contains(&parent) => parent,
                _ => at.clone(),
            };
            anchors.push(anchor);
        }

        let parent_of_orchestrator = topology.get(at)?.parent.clone();

        let mut passes = 0usize;
        loop {
            passes += 1;
            if passes > MAX_PLACEMENT_PASSES {
                let stuck = first_active(&requests, &status);
                log::error!("PlacementNonConvergence: Batch at {} made no full progress within {} passes.", at, MAX_PLACEMENT_PASSES);
                return Err(Error::UnsatisfiablePlacement(stuck));
            }

            let mut progress = false;

            for (idx, request) in requests.iter_mut().enumerate() {
                if status[idx] != RequestStatus::Active {
                    continue;
                }
                let graph = graphs.get(&request.graph).ok_or_else(|| Error::UnknownServiceGraph(request.graph.clone()))?;

                let placed_set = request.placed_modules();
                if placed_set.len() == graph.modules.len() {
                    status[idx] = RequestStatus::Done;
                    progress = true;
                    continue;
                }

                let frontier = graph.placement_frontier(&placed_set);
                let mut blocked = frontier.is_empty();

                for module in frontier {
                    let demand = graph.module(&module)?.demand;

                    let host = match graph.constraints.get(&module) {
                        Some(allowed) => place_pinned(&module, allowed, &demand, topology, &shadow),
                        None => place_on_anchor(&anchors[idx], &request.graph, &demand, topology, &shadow, &shadow_graphs),
                    };

                    match host {
                        Some(host) => {
                            let new_load = shadow.get(&host).copied().unwrap_or_default().add(&demand);
                            shadow.insert(host.clone(), new_load);
                            shadow_graphs.entry(host.clone()).or_default().insert(request.graph.clone());
                            request.placed.insert(module.clone(), host.clone());
                            placements.push((idx, module, host));
                            progress = true;
                        }
                        None => blocked = true,
                    }
                }

                if blocked {
                    // Escalate the anchor towards the root; once escalation
                    // leaves the monitored set, the request is forwarded to
                    // the parent orchestrator.
                    let next_anchor = topology.get(&anchors[idx])?.parent.clone();
                    match next_anchor {
                        Some(parent) if monitored.contains(&parent) => {
                            log::debug!("Request {} escalates its anchor {} -> {}.", request.id, anchors[idx], parent);
                            anchors[idx] = parent;
                            progress = true;
                        }
                        _ => match &parent_of_orchestrator {
                            Some(_) => {
                                log::info!("Request {} exhausted the monitored set of {}, forwarding upward.", request.id, at);
                                status[idx] = RequestStatus::Forward;
                                progress = true;
                            }
                            None => {
                                log::error!("PlacementEscalationExhausted: Request {} cannot be placed at the top-most orchestrator {}.", request.id, at);
                                return Err(Error::UnsatisfiablePlacement(request.id.clone()));
                            }
                        },
                    }
                }
            }

            if status.iter().all(|s| *s != RequestStatus::Active) {
                break;
            }
            if !progress {
                let stuck = first_active(&requests, &status);
                log::error!("PlacementNoProgress: Batch at {} stalled with unplaced modules.", at);
                return Err(Error::UnsatisfiablePlacement(stuck));
            }
        }

        // Commit: subtract the total placed demand from live availability.
        topology.commit_demand(&shadow)?;

        let mut outcome = PlacementOutcome::default();
        let mut deltas: Vec<AddressedDelta> = Vec::new();
        for (idx, module, host) in &placements {
            let request = &requests[*idx];
            let graph = &graphs[&request.graph];
            outcome.record_launch(host.clone(), request.graph.clone(), module.clone());
            deltas_for_placed_module(graph, request, module, host, topology, &mut deltas);
        }
        outcome.discovery_deltas = deltas;

        let forward_target = parent_of_orchestrator;
        for (request, state) in requests.into_iter().zip(status) {
            match state {
                RequestStatus::Done => {
                    outcome.resolutions.push((request.id.clone(), Resolution::Resolved));
                    outcome.completed.push(request);
                }
                RequestStatus::Forward => {
                    let target = forward_target.clone().expect("forward status implies a parent exists");
                    outcome.resolutions.push((request.id.clone(), Resolution::Forwarded(target.clone())));
                    outcome.forwarded.push((target, request));
                }
                RequestStatus::Active => unreachable!("loop exits only once no request is active"),
            }
        }

        log::info!(
            "Clustered placement at {} finished after {} pass(es): {} module(s) placed, {} request(s) resolved, {} forwarded.",
            at,
            passes,
            placements.len(),
            outcome.completed.len(),
            outcome.forwarded.len()
        );
        Ok(outcome)
    }
}

fn first_active(requests: &[PlacementRequest], status: &[RequestStatus]) -> crate::domain::utils::id::RequestId {
    requests
        .iter()
        .zip(status)
        .find(|(_, s)| **s == RequestStatus::Active)
        .map(|(r, _)| r.id.clone())
        .expect("called only while a request is active")
}

fn fits(node_id: &NodeId, demand: &Resources, topology: &FogTopology, shadow: &BTreeMap<NodeId, Resources>) -> bool {
    let Ok(node) = topology.get(node_id) else {
        return false;
    };
    let load = shadow.get(node_id).copied().unwrap_or_default();
    demand.add(&load).fits_within(&node.available)
}

/// Resolves a pinned module: the first allowed node with capacity wins. A
/// pin to a node that does not exist is logged and treated as a failed
/// module, which forces escalation instead of a crash.
fn place_pinned(
    module: &ModuleName,
    allowed: &[NodeId],
    demand: &Resources,
    topology: &FogTopology,
    shadow: &BTreeMap<NodeId, Resources>,
) -> Option<NodeId> {
    for candidate in allowed {
        if !topology.contains(candidate) {
            log::warn!("MalformedPlacementRequest: Pinned node {} for module {} does not exist.", candidate, module);
            continue;
        }
        if fits(candidate, demand, topology, shadow) {
            return Some(candidate.clone());
        }
    }
    None
}

/// Attempts the anchor first, then its cluster peers ordered active-first
/// and by descending spare capacity within each activity tier.
fn place_on_anchor(
    anchor: &NodeId,
    graph: &ServiceGraphId,
    demand: &Resources,
    topology: &FogTopology,
    shadow: &BTreeMap<NodeId, Resources>,
    shadow_graphs: &BTreeMap<NodeId, BTreeSet<ServiceGraphId>>,
) -> Option<NodeId> {
    if fits(anchor, demand, topology, shadow) {
        return Some(anchor.clone());
    }

    let anchor_node = topology.get(anchor).ok()?;
    if anchor_node.cluster_peers.is_empty() {
        return None;
    }

    let mut peers: Vec<NodeId> = anchor_node.cluster_peers.keys().cloned().collect();
    peers.sort_by(|a, b| {
        let active_a = is_active(a, graph, topology, shadow_graphs);
        let active_b = is_active(b, graph, topology, shadow_graphs);
        // Active peers first, then more spare capacity first.
        active_b
            .cmp(&active_a)
            .then_with(|| spare_cpu(b, topology, shadow).partial_cmp(&spare_cpu(a, topology, shadow)).expect("finite capacities"))
    });

    peers.into_iter().find(|peer| fits(peer, demand, topology, shadow))
}

/// A peer counts as active for a request only when it already hosts a
/// module of the same service graph, committed or placed this run.
fn is_active(
    node_id: &NodeId,
    graph: &ServiceGraphId,
    topology: &FogTopology,
    shadow_graphs: &BTreeMap<NodeId, BTreeSet<ServiceGraphId>>,
) -> bool {
    if shadow_graphs.get(node_id).is_some_and(|graphs| graphs.contains(graph)) {
        return true;
    }
    topology.get(node_id).map(|n| n.hosts_any_module_of(graph)).unwrap_or(false)
}

fn spare_cpu(node_id: &NodeId, topology: &FogTopology, shadow: &BTreeMap<NodeId, Resources>) -> f64 {
    let available = topology.get(node_id).map(|n| n.available.cpu).unwrap_or(0.0);
    available - shadow.get(node_id).map(|r| r.cpu).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::api::scenario_dto::FogNodeDto;
    use crate::api::service_graph_dto::{EdgeDto, ModuleDto, ServiceGraphDto};
    use crate::domain::topology::cluster::form_static_clusters;

    fn node_dto(id: &str, role: &str, level: u32, parent: Option<&str>, cpu: f64) -> FogNodeDto {
        FogNodeDto {
            id: id.to_string(),
            role: role.to_string(),
            level,
            parent: parent.map(|p| p.to_string()),
            uplink_latency: 2.0,
            uplink_bandwidth: 100.0,
            downlink_bandwidth: 100.0,
            latitude: 0.0,
            longitude: 0.0,
            cpu,
            ram: 4096.0,
            storage: 8192.0,
        }
    }

    fn module_dto(name: &str, cpu: f64) -> ModuleDto {
        ModuleDto { name: name.to_string(), cpu, ram: 64.0, storage: 128.0, size: 50.0 }
    }

    /// One orchestrator over a full anchor and two clustered spill peers
    /// with asymmetric spare capacity.
    fn spill_topology() -> FogTopology {
        let mut topology = FogTopology::from_dtos(&[
            node_dto("fon", "orchestration", 1, None, 1.0),
            node_dto("edge-a", "compute", 2, Some("fon"), 1.0),
            node_dto("edge-b", "compute", 2, Some("fon"), 500.0),
            node_dto("edge-c", "compute", 2, Some("fon"), 450.0),
            node_dto("mobile-1", "client", 3, Some("edge-a"), 10.0),
            node_dto("mobile-2", "client", 3, Some("edge-a"), 10.0),
        ])
        .expect("valid topology");
        form_static_clusters(&mut topology, 2, 2.0).expect("clustering succeeds");
        topology
    }

    fn single_module_graph(id: &str, module: &str) -> ServiceGraph {
        ServiceGraph::try_from(ServiceGraphDto {
            id: id.to_string(),
            modules: vec![module_dto(module, 100.0)],
            edges: vec![],
            constraints: HashMap::new(),
        })
        .expect("valid graph")
    }

    #[test]
    fn spill_load_of_another_graph_does_not_make_a_peer_active() {
        let mut topology = spill_topology();
        let mut graphs = BTreeMap::new();
        for graph in [single_module_graph("g1", "m1"), single_module_graph("g2", "m2")] {
            graphs.insert(graph.id.clone(), graph);
        }

        let requests = vec![
            PlacementRequest::new(ServiceGraphId::new("g1"), NodeId::new("mobile-1"), BTreeMap::new()),
            PlacementRequest::new(ServiceGraphId::new("g2"), NodeId::new("mobile-2"), BTreeMap::new()),
        ];
        let outcome =
            ClusteredPlacement.place(&NodeId::new("fon"), requests, &mut topology, &graphs).expect("batch placeable");

        assert_eq!(outcome.completed.len(), 2);
        assert!(outcome.resolutions.iter().all(|(_, r)| *r == Resolution::Resolved));

        // g1 spills onto the roomier peer. g2 holds nothing there, so plain
        // spare capacity must pick the other peer instead of piling on.
        assert_eq!(outcome.completed[0].placed[&ModuleName::new("m1")], NodeId::new("edge-b"));
        assert_eq!(outcome.completed[1].placed[&ModuleName::new("m2")], NodeId::new("edge-c"));
    }

    #[test]
    fn a_graph_sticks_to_the_peer_already_holding_its_modules() {
        let mut topology = spill_topology();
        let graph = ServiceGraph::try_from(ServiceGraphDto {
            id: "chain".to_string(),
            modules: vec![module_dto("m1", 100.0), module_dto("m2", 100.0)],
            edges: vec![EdgeDto {
                source: "m1".to_string(),
                target: "m2".to_string(),
                direction: "up".to_string(),
                selectivity: 1.0,
            }],
            constraints: HashMap::new(),
        })
        .expect("valid graph");
        let mut graphs = BTreeMap::new();
        graphs.insert(graph.id.clone(), graph);

        let requests = vec![PlacementRequest::new(ServiceGraphId::new("chain"), NodeId::new("mobile-1"), BTreeMap::new())];
        let outcome =
            ClusteredPlacement.place(&NodeId::new("fon"), requests, &mut topology, &graphs).expect("batch placeable");

        // m2 joins m1 on edge-b even though edge-c has more spare capacity
        // by then.
        assert_eq!(outcome.completed[0].placed[&ModuleName::new("m1")], NodeId::new("edge-b"));
        assert_eq!(outcome.completed[0].placed[&ModuleName::new("m2")], NodeId::new("edge-b"));
    }
}
