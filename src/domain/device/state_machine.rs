//! Per-node event handling: message routing, tuple execution, control-plane
//! dispatch and the placement entry points.

use rand::Rng;

use crate::domain::device::message::{ControlKind, ControlMessage, Message, Tuple};
use crate::domain::placement::strategy::PlacementOutcome;
use crate::domain::service::graph::EdgeDirection;
use crate::domain::topology::cluster::dynamic_cluster_node;
use crate::domain::topology::node::{DeviceState, LinkDirection, Transmission};
use crate::domain::topology::routing::RoutingMatrix;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use crate::error::{Error, Result};
use crate::sim::context::{EventPayload, SimTime, to_delay};
use crate::sim::simulation::Simulation;

use std::collections::BTreeMap;

impl Simulation {
    pub fn handle_event(&mut self, at: NodeId, payload: EventPayload) -> Result<()> {
        match payload {
            EventPayload::Message(message) => self.on_message(at, message),
            EventPayload::LinkFreed(direction) => self.on_link_freed(at, direction),
            EventPayload::StartClustering => self.on_start_clustering(at),
            EventPayload::AttachmentChange { new_parent, new_uplink_latency } => {
                self.on_attachment_change(at, new_parent, new_uplink_latency)
            }
            EventPayload::ModuleDeparted { graph, module } => self.on_module_departed(at, graph, module),
            EventPayload::ModuleArrived { graph, module } => self.on_module_arrived(at, graph, module),
            EventPayload::SubmitPlacement { graph, pinned } => self.on_submit_placement(at, graph, pinned),
            EventPayload::SensorEmission { graph, target_module, remaining, period } => {
                self.on_sensor_emission(at, graph, target_module, remaining, period)
            }
        }
    }

    /// Message arrival. The node is `Processing` for the duration of the
    /// handler and `Idle` again afterwards, also on a path-level error.
    fn on_message(&mut self, at: NodeId, message: Message) -> Result<()> {
        self.topology.get_mut(&at)?.state = DeviceState::Processing;

        let result = match message {
            Message::Tuple(tuple) => self.on_tuple(at.clone(), tuple),
            Message::Control(control) => {
                if control.dest_node == at {
                    self.ctx.stats.control_messages += 1;
                    self.on_control(at.clone(), control.kind)
                } else {
                    self.forward(at.clone(), Message::Control(control))
                }
            }
        };

        if let Ok(node) = self.topology.get_mut(&at) {
            node.state = DeviceState::Idle;
        }
        result
    }

    /// The tuple state machine: deliver, resolve, execute or forward.
    fn on_tuple(&mut self, at: NodeId, mut tuple: Tuple) -> Result<()> {
        // Actuator delivery happens before any resolution or routing.
        if tuple.direction == EdgeDirection::Actuator && tuple.dest_node.as_ref() == Some(&at) {
            log::debug!("ActuatorDelivery: Tuple {} reached its sink at node {}.", tuple.id, at);
            self.ctx.stats.actuator_deliveries += 1;
            return Ok(());
        }

        if tuple.dest_node.is_none() && !self.resolve_tuple_destination(&at, &mut tuple)? {
            return Ok(());
        }

        if tuple.dest_node.as_ref() == Some(&at) {
            self.execute_tuple(at, tuple)
        } else {
            self.ctx.stats.tuples_forwarded += 1;
            self.forward(at, Message::Tuple(tuple))
        }
    }

    /// Fills in `tuple.dest_node`. Returns `false` when the tuple was
    /// consumed here instead (dropped, broadcast or delivered locally).
    fn resolve_tuple_destination(&mut self, at: &NodeId, tuple: &mut Tuple) -> Result<bool> {
        match tuple.direction {
            EdgeDirection::Up => {
                // A locally hosted destination short-circuits discovery.
                if self.topology.get(at)?.hosts_module(&tuple.graph, &tuple.dest_module) {
                    tuple.dest_node = Some(at.clone());
                    return Ok(true);
                }
                let orchestrator = self.topology.get(at)?.orchestrator.clone();
                let resolved = orchestrator.and_then(|orch| {
                    self.topology
                        .get_mut(&orch)
                        .ok()
                        .and_then(|n| n.orchestration.as_mut())
                        .and_then(|state| state.discovery.resolve(&tuple.dest_module))
                });
                match resolved {
                    Some(host) => {
                        tuple.dest_node = Some(host);
                        Ok(true)
                    }
                    None => {
                        // Explicit drop, the module is not deployed anywhere known.
                        log::warn!(
                            "ServiceDiscoveryMiss: Dropping tuple {} at node {}, no known instance of module {}.",
                            tuple.id,
                            at,
                            tuple.dest_module
                        );
                        self.ctx.stats.tuples_dropped += 1;
                        Ok(false)
                    }
                }
            }
            EdgeDirection::Down | EdgeDirection::Actuator => {
                if let Some(host) = tuple.recorded_host(&tuple.dest_module) {
                    tuple.dest_node = Some(host);
                    return Ok(true);
                }
                if tuple.direction == EdgeDirection::Actuator {
                    // Sinks have no history entry; fall back to the lineage
                    // origin, or deliver right here if there is none.
                    match tuple.history.first() {
                        Some((origin, _)) if origin != at => {
                            tuple.dest_node = Some(origin.clone());
                            return Ok(true);
                        }
                        _ => {
                            log::debug!("ActuatorDelivery: Tuple {} delivered at its origin node {}.", tuple.id, at);
                            self.ctx.stats.actuator_deliveries += 1;
                            return Ok(false);
                        }
                    }
                }
                if self.topology.get(at)?.hosts_module(&tuple.graph, &tuple.dest_module) {
                    tuple.dest_node = Some(at.clone());
                    return Ok(true);
                }
                self.broadcast_down(at, tuple)?;
                Ok(false)
            }
        }
    }

    /// DOWN tuple with no usable history: one copy per child subtree.
    fn broadcast_down(&mut self, at: &NodeId, tuple: &Tuple) -> Result<()> {
        let node = self.topology.get(at)?;
        let children: Vec<(NodeId, f64)> =
            node.children.iter().map(|c| (c.clone(), node.child_latencies.get(c).copied().unwrap_or(0.0))).collect();

        if children.is_empty() {
            log::warn!("BroadcastDeadEnd: Dropping DOWN tuple {} at leaf node {}, destination unknown.", tuple.id, at);
            self.ctx.stats.tuples_dropped += 1;
            return Ok(());
        }

        log::debug!("DownBroadcast: Tuple {} fans out to {} child(ren) of node {}.", tuple.id, children.len(), at);
        for (child, latency) in children {
            let mut copy = tuple.clone();
            copy.dest_node = None;
            self.ctx.stats.tuples_forwarded += 1;
            self.transmit(at.clone(), LinkDirection::Down, Transmission { message: Message::Tuple(copy), next_hop: child, latency_ms: latency })?;
        }
        Ok(())
    }

    /// Runs the destination module on a tuple: record the hop in the
    /// traversal history and emit on every outgoing edge that fires.
    fn execute_tuple(&mut self, at: NodeId, mut tuple: Tuple) -> Result<()> {
        if !self.topology.get(&at)?.hosts_module(&tuple.graph, &tuple.dest_module) {
            log::warn!("ModuleNotDeployed: Dropping tuple {} at node {}, module {} is not running here.", tuple.id, at, tuple.dest_module);
            self.ctx.stats.tuples_dropped += 1;
            return Ok(());
        }

        tuple.history.push((at.clone(), tuple.dest_module.clone()));
        self.ctx.stats.tuples_executed += 1;
        log::debug!("TupleExecuted: Module {} on node {} processed tuple {}.", tuple.dest_module, at, tuple.id);

        let Some(graph) = self.graphs.get(&tuple.graph) else {
            return Err(Error::UnknownServiceGraph(tuple.graph.clone()));
        };

        let mut emissions: Vec<Tuple> = Vec::new();
        for edge in graph.outgoing_edges(&tuple.dest_module) {
            if edge.selectivity < 1.0 && !self.ctx.rng.random_bool(edge.selectivity) {
                continue;
            }
            let mut emitted =
                Tuple::new(tuple.graph.clone(), Some(tuple.dest_module.clone()), edge.target.clone(), edge.direction);
            emitted.history = tuple.history.clone();
            emissions.push(emitted);
        }

        // Emissions go through the event queue so long co-hosted module
        // chains never grow the call stack.
        for emitted in emissions {
            self.ctx.stats.tuples_emitted += 1;
            self.ctx.send(at.clone(), 0, EventPayload::Message(Message::Tuple(emitted)));
        }
        Ok(())
    }

    /// Routes a resolved message one hop towards its destination.
    fn forward(&mut self, at: NodeId, message: Message) -> Result<()> {
        let Some(dest) = message.dest_node().cloned() else {
            return Err(Error::TopologyInconsistency { node: at, destination: NodeId::new("<unresolved>") });
        };

        let node = self.topology.get(&at)?;
        let Some(next_hop) = node.routing_table.get(&dest).cloned() else {
            log::error!("RoutingTableMiss: Node {} has no route towards {}, dropping message.", at, dest);
            if matches!(message, Message::Tuple(_)) {
                self.ctx.stats.tuples_dropped += 1;
            }
            return Err(Error::TopologyInconsistency { node: at, destination: dest });
        };

        let (direction, latency) = if node.parent.as_ref() == Some(&next_hop) {
            (LinkDirection::Up, node.uplink_latency)
        } else if let Some(latency) = node.child_latencies.get(&next_hop) {
            (LinkDirection::Down, *latency)
        } else if let Some(latency) = node.cluster_peers.get(&next_hop) {
            (LinkDirection::Cluster, *latency)
        } else {
            log::error!("RoutingTableMiss: Next hop {} of node {} is not an adjacent link, dropping message.", next_hop, at);
            return Err(Error::TopologyInconsistency { node: at, destination: dest });
        };

        self.transmit(at, direction, Transmission { message, next_hop, latency_ms: latency })
    }

    /// Puts a transmission on one of the node's three links, or queues it
    /// while the link is busy.
    fn transmit(&mut self, at: NodeId, direction: LinkDirection, transmission: Transmission) -> Result<()> {
        let wired = self.topology.get_mut(&at)?.link_mut(direction).submit(transmission);
        if let Some(t) = wired {
            let delay = to_delay(t.latency_ms);
            self.ctx.send(t.next_hop, delay, EventPayload::Message(t.message));
            self.ctx.send(at, delay, EventPayload::LinkFreed(direction));
        }
        Ok(())
    }

    fn on_link_freed(&mut self, at: NodeId, direction: LinkDirection) -> Result<()> {
        let next = self.topology.get_mut(&at)?.link_mut(direction).release();
        if let Some(t) = next {
            let delay = to_delay(t.latency_ms);
            self.ctx.send(t.next_hop, delay, EventPayload::Message(t.message));
            self.ctx.send(at, delay, EventPayload::LinkFreed(direction));
        }
        Ok(())
    }

    /// Control-plane dispatch for messages addressed to this node.
    fn on_control(&mut self, at: NodeId, kind: ControlKind) -> Result<()> {
        log::debug!("ControlMessage: Node {} handles a {} message.", at, kind.kind_name());
        match kind {
            ControlKind::Placement(request) => {
                let node = self.topology.get_mut(&at)?;
                if let Some(state) = node.orchestration.as_mut() {
                    state.pending.push(request);
                    self.run_placement(at)
                } else {
                    // A non-orchestrating node re-forwards to its own orchestrator.
                    match node.orchestrator.clone() {
                        Some(orchestrator) if orchestrator != at => {
                            self.send_control(at, ControlMessage { dest_node: orchestrator, kind: ControlKind::Placement(request) })
                        }
                        _ => {
                            log::error!("OrphanedRequest: Node {} cannot orchestrate request {} and has no orchestrator.", at, request.id);
                            self.ctx.stats.placement_failures += 1;
                            Ok(())
                        }
                    }
                }
            }
            ControlKind::Discovery(delta) => {
                let node = self.topology.get_mut(&at)?;
                match node.orchestration.as_mut() {
                    Some(state) => state.discovery.apply(delta),
                    None => log::warn!("MisroutedDelta: Node {} received a discovery delta but is not an orchestrator.", at),
                }
                Ok(())
            }
            ControlKind::ResourceDelta { demand, release } => {
                let node = self.topology.get_mut(&at)?;
                if release {
                    node.release(&demand);
                } else {
                    node.consume(&demand);
                }
                Ok(())
            }
            ControlKind::Deployment(launches) => {
                let node = self.topology.get_mut(&at)?;
                for launch in launches {
                    node.instantiate_module(launch.graph, launch.module);
                }
                Ok(())
            }
        }
    }

    /// Runs the configured strategy over every pending request of the
    /// orchestrator at `at` and applies the outcome.
    fn run_placement(&mut self, at: NodeId) -> Result<()> {
        let batch: Vec<_> = match self.topology.get_mut(&at)?.orchestration.as_mut() {
            Some(state) => state.pending.drain(..).collect(),
            None => Vec::new(),
        };
        if batch.is_empty() {
            return Ok(());
        }

        log::debug!("PlacementPass: Orchestrator {} places {} request(s).", at, batch.len());
        let outcome = self.strategy.place(&at, batch, &mut self.topology, &self.graphs)?;
        self.apply_placement_outcome(at, outcome)
    }

    fn apply_placement_outcome(&mut self, at: NodeId, outcome: PlacementOutcome) -> Result<()> {
        for (request_id, resolution) in &outcome.resolutions {
            log::debug!("RequestResolution: Request {} left the pass at {} as {:?}.", request_id, at, resolution);
        }

        for (host, launches) in outcome.launches {
            self.ctx.stats.modules_placed += launches.len() as u64;
            if host == at {
                let node = self.topology.get_mut(&at)?;
                for launch in launches {
                    node.instantiate_module(launch.graph, launch.module);
                }
            } else {
                self.send_control(at.clone(), ControlMessage { dest_node: host, kind: ControlKind::Deployment(launches) })?;
            }
        }

        for addressed in outcome.discovery_deltas {
            self.send_control(at.clone(), ControlMessage { dest_node: addressed.target, kind: ControlKind::Discovery(addressed.delta) })?;
        }

        for request in outcome.completed {
            log::info!("RequestResolved: Request {} fully placed at t = {} ms.", request.id, self.ctx.now());
            self.ctx.stats.requests_resolved += 1;
            self.resolved.insert(request.id.clone(), request);
        }

        for (target, request) in outcome.forwarded {
            log::info!("RequestForwarded: Orchestrator {} hands request {} to {}.", at, request.id, target);
            self.ctx.stats.requests_forwarded += 1;
            self.send_control(at.clone(), ControlMessage { dest_node: target, kind: ControlKind::Placement(request) })?;
        }

        Ok(())
    }

    /// Delivers a control message locally or routes it towards its target.
    pub(crate) fn send_control(&mut self, from: NodeId, control: ControlMessage) -> Result<()> {
        if control.dest_node == from {
            self.ctx.stats.control_messages += 1;
            self.on_control(from, control.kind)
        } else {
            self.forward(from, Message::Control(control))
        }
    }

    /// A client hands a fresh placement request to its orchestrator. Pinned
    /// modules are instantiated right away at their fixed hosts.
    fn on_submit_placement(&mut self, at: NodeId, graph: ServiceGraphId, pinned: BTreeMap<ModuleName, NodeId>) -> Result<()> {
        let Some(orchestrator) = self.topology.get(&at)?.orchestrator.clone() else {
            log::error!("OrphanedRequest: Client {} has no orchestrator, dropping placement request for graph {}.", at, graph);
            self.ctx.stats.placement_failures += 1;
            return Ok(());
        };

        for (module, host) in &pinned {
            if host == &at {
                self.topology.get_mut(&at)?.instantiate_module(graph.clone(), module.clone());
            } else if self.topology.contains(host) {
                let launch = crate::domain::placement::strategy::ModuleLaunch { graph: graph.clone(), module: module.clone() };
                self.send_control(at.clone(), ControlMessage { dest_node: host.clone(), kind: ControlKind::Deployment(vec![launch]) })?;
            }
        }

        let request = crate::domain::placement::request::PlacementRequest::new(graph, at.clone(), pinned);
        log::info!("RequestSubmitted: Client {} submits request {} to orchestrator {}.", at, request.id, orchestrator);
        self.send_control(at, ControlMessage { dest_node: orchestrator, kind: ControlKind::Placement(request) })
    }

    /// Periodic sensor firing at a client node.
    fn on_sensor_emission(&mut self, at: NodeId, graph: ServiceGraphId, target_module: ModuleName, remaining: u32, period: SimTime) -> Result<()> {
        if remaining > 1 {
            self.ctx.send(
                at.clone(),
                period.max(1),
                EventPayload::SensorEmission { graph: graph.clone(), target_module: target_module.clone(), remaining: remaining - 1, period },
            );
        }

        self.ctx.stats.tuples_emitted += 1;
        let tuple = Tuple::new(graph, None, target_module, EdgeDirection::Up);
        self.on_tuple(at, tuple)
    }

    /// Dynamic cluster formation for one node, followed by a routing rebuild
    /// so the new cluster edges become usable.
    fn on_start_clustering(&mut self, at: NodeId) -> Result<()> {
        let range = self.ctx.config.clustering.range_km;
        let latency = self.ctx.config.clustering.latency;
        dynamic_cluster_node(&mut self.topology, &at, range, latency)?;
        self.ctx.stats.clusters_formed += 1;
        RoutingMatrix::build(&self.topology).install(&mut self.topology)
    }
}
