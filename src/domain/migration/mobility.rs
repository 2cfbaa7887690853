//! Mobility handling: re-attachment of a client to a new parent, orchestrator
//! handover, incremental route repair and migration of the client's modules
//! that were hosted on the abandoned branch.

use std::collections::BTreeSet;

use crate::domain::device::message::{ControlKind, ControlMessage, Message};
use crate::domain::service::discovery::{DeltaKind, DiscoveryDelta};
use crate::domain::topology::node::Resources;
use crate::domain::topology::routing::repair_routes_after_move;
use crate::domain::utils::id::{ModuleName, NodeId, RequestId, ServiceGraphId};
use crate::error::Result;
use crate::sim::context::{EventPayload, SimTime, to_delay};
use crate::sim::simulation::Simulation;

/// One module that has to leave the abandoned branch.
#[derive(Debug)]
struct PlannedMove {
    request: RequestId,
    graph: ServiceGraphId,
    module: ModuleName,
    old_host: NodeId,
}

impl Simulation {
    /// A client's best attachment point changed.
    ///
    /// Re-parents the client, hands it over to the orchestrator responsible
    /// for the new branch, repairs routing tables incrementally and migrates
    /// every module of the client's resolved requests that is hosted strictly
    /// between the client and the lowest common ancestor of the old and new
    /// parent. Migrated modules land on the new parent; their departure and
    /// arrival are delayed by the image transfer time over the respective
    /// branch.
    pub fn on_attachment_change(&mut self, at: NodeId, new_parent: NodeId, new_uplink_latency: f64) -> Result<()> {
        let old_parent = match self.topology.get(&at)?.parent.clone() {
            Some(parent) => parent,
            None => {
                log::warn!("AttachmentChange: Node {} has no current parent, ignoring re-attachment.", at);
                return Ok(());
            }
        };

        if old_parent == new_parent {
            // Same parent, only the link quality changed.
            log::debug!("AttachmentChange: Node {} stays on parent {}, updating uplink latency to {} ms.", at, new_parent, new_uplink_latency);
            self.topology.get_mut(&at)?.uplink_latency = new_uplink_latency;
            self.topology.attach_child(&new_parent, &at, new_uplink_latency)?;
            return Ok(());
        }

        let Some(lca) = self.topology.lowest_common_ancestor(&old_parent, &new_parent) else {
            log::error!("AttachmentChange: Parents {} and {} share no ancestor, ignoring re-attachment of {}.", old_parent, new_parent, at);
            return Ok(());
        };
        log::info!(
            "AttachmentChange: Node {} moves from parent {} to parent {} (branch point {}).",
            at,
            old_parent,
            new_parent,
            lca
        );

        // Nodes strictly between the client and the branch point, on the
        // abandoned branch. Modules hosted there must follow the client.
        let abandoned: BTreeSet<NodeId> =
            self.topology.path_to_root(&old_parent).into_iter().take_while(|id| id != &lca).collect();

        self.topology.detach_child(&old_parent, &at)?;
        self.topology.attach_child(&new_parent, &at, new_uplink_latency)?;
        {
            let node = self.topology.get_mut(&at)?;
            node.parent = Some(new_parent.clone());
            node.uplink_latency = new_uplink_latency;
        }

        self.hand_over_orchestrator(&at, &new_parent)?;

        let moves = self.plan_migrations(&at, &abandoned);
        if !moves.is_empty() {
            self.ctx.stats.migrations += 1;
            self.execute_migrations(&lca, &new_parent, moves)?;
        }

        repair_routes_after_move(&mut self.topology, &at, &new_parent)?;
        Ok(())
    }

    /// Moves the client between monitored sets when the responsible
    /// orchestrator changes with the branch.
    fn hand_over_orchestrator(&mut self, at: &NodeId, new_parent: &NodeId) -> Result<()> {
        let old_orchestrator = self.topology.get(at)?.orchestrator.clone();
        let Some(new_orchestrator) = self.topology.nearest_orchestrator_at_or_above(new_parent) else {
            log::warn!("NoOrchestratorAbove: New parent {} has no orchestration-capable ancestor.", new_parent);
            return Ok(());
        };
        if old_orchestrator.as_ref() == Some(&new_orchestrator) {
            return Ok(());
        }

        if let Some(old_id) = old_orchestrator {
            if let Some(state) = self.topology.get_mut(&old_id)?.orchestration.as_mut() {
                state.monitored.remove(at);
            }
        }
        if let Some(state) = self.topology.get_mut(&new_orchestrator)?.orchestration.as_mut() {
            state.monitored.insert(at.clone());
        }
        self.topology.get_mut(at)?.orchestrator = Some(new_orchestrator.clone());
        log::info!("OrchestratorHandover: Node {} is now monitored by {}.", at, new_orchestrator);
        Ok(())
    }

    /// Collects the modules of the moving client's resolved requests that
    /// are hosted on the abandoned branch.
    fn plan_migrations(&self, at: &NodeId, abandoned: &BTreeSet<NodeId>) -> Vec<PlannedMove> {
        let mut moves = Vec::new();
        for request in self.resolved.values() {
            if &request.gateway != at {
                continue;
            }
            for (module, host) in &request.placed {
                if abandoned.contains(host) {
                    moves.push(PlannedMove {
                        request: request.id.clone(),
                        graph: request.graph.clone(),
                        module: module.clone(),
                        old_host: host.clone(),
                    });
                }
            }
        }
        moves
    }

    /// Schedules departure, arrival, resource deltas and discovery updates
    /// for every planned move, then rewrites the resolved placements.
    fn execute_migrations(&mut self, lca: &NodeId, new_parent: &NodeId, moves: Vec<PlannedMove>) -> Result<()> {
        for planned in moves {
            let (size, demand) = {
                let Some(graph) = self.graphs.get(&planned.graph) else {
                    log::error!("MigrationSkipped: Graph {} of request {} is unknown.", planned.graph, planned.request);
                    continue;
                };
                match graph.module(&planned.module) {
                    Ok(module) => (module.size, module.demand),
                    Err(error) => {
                        log::error!("MigrationSkipped: {}", error);
                        continue;
                    }
                }
            };

            let upload = to_delay(self.transfer_up_ms(&planned.old_host, lca, size));
            let download = to_delay(self.transfer_down_ms(new_parent, lca, size));
            log::info!(
                "ModuleMigration: Module {} of graph {} moves {} -> {} (upload {} ms, download {} ms).",
                planned.module,
                planned.graph,
                planned.old_host,
                new_parent,
                upload,
                download
            );

            self.schedule_departure(&planned, &demand, upload);
            self.schedule_arrival(&planned, new_parent, &demand, download);
            self.emit_relocation_deltas(&planned, new_parent, upload, download);

            if let Some(request) = self.resolved.get_mut(&planned.request) {
                request.placed.insert(planned.module.clone(), new_parent.clone());
            }
            self.ctx.stats.modules_migrated += 1;
        }
        Ok(())
    }

    /// Image upload time in ms from `from` up to the branch point, summed
    /// hop by hop over the uplink bandwidth of each sending node.
    fn transfer_up_ms(&self, from: &NodeId, lca: &NodeId, size_mb: f64) -> f64 {
        self.topology
            .path_to_root(from)
            .into_iter()
            .take_while(|id| id != lca)
            .filter_map(|id| self.topology.get(&id).ok())
            .map(|node| if node.uplink_bandwidth > 0.0 { size_mb / node.uplink_bandwidth * 1_000.0 } else { 0.0 })
            .sum()
    }

    /// Image download time in ms from the branch point down to `to`, summed
    /// hop by hop over the downlink bandwidth of each sending node.
    fn transfer_down_ms(&self, to: &NodeId, lca: &NodeId, size_mb: f64) -> f64 {
        self.topology
            .path_to_root(to)
            .into_iter()
            .take_while(|id| id != lca)
            .filter_map(|id| self.topology.get(&id).ok())
            .filter_map(|node| node.parent.as_ref().and_then(|p| self.topology.get(p).ok()))
            .map(|sender| if sender.downlink_bandwidth > 0.0 { size_mb / sender.downlink_bandwidth * 1_000.0 } else { 0.0 })
            .sum()
    }

    fn schedule_departure(&mut self, planned: &PlannedMove, demand: &Resources, delay: SimTime) {
        self.ctx.send(
            planned.old_host.clone(),
            delay,
            EventPayload::ModuleDeparted { graph: planned.graph.clone(), module: planned.module.clone() },
        );
        self.ctx.send(
            planned.old_host.clone(),
            delay,
            EventPayload::Message(Message::Control(ControlMessage {
                dest_node: planned.old_host.clone(),
                kind: ControlKind::ResourceDelta { demand: *demand, release: true },
            })),
        );
    }

    fn schedule_arrival(&mut self, planned: &PlannedMove, new_parent: &NodeId, demand: &Resources, delay: SimTime) {
        self.ctx.send(
            new_parent.clone(),
            delay,
            EventPayload::ModuleArrived { graph: planned.graph.clone(), module: planned.module.clone() },
        );
        self.ctx.send(
            new_parent.clone(),
            delay,
            EventPayload::Message(Message::Control(ControlMessage {
                dest_node: new_parent.clone(),
                kind: ControlKind::ResourceDelta { demand: *demand, release: false },
            })),
        );
    }

    /// Tells the orchestrators of both branches about the relocation, timed
    /// to the respective transfer completion.
    fn emit_relocation_deltas(&mut self, planned: &PlannedMove, new_parent: &NodeId, upload: SimTime, download: SimTime) {
        let old_orchestrator = self
            .topology
            .get(&planned.old_host)
            .ok()
            .and_then(|n| n.orchestrator.clone())
            .unwrap_or_else(|| planned.old_host.clone());
        let new_orchestrator = self
            .topology
            .get(new_parent)
            .ok()
            .and_then(|n| n.orchestrator.clone())
            .unwrap_or_else(|| new_parent.clone());

        self.ctx.send(
            old_orchestrator.clone(),
            upload,
            EventPayload::Message(Message::Control(ControlMessage {
                dest_node: old_orchestrator,
                kind: ControlKind::Discovery(DiscoveryDelta {
                    service: planned.module.clone(),
                    host: planned.old_host.clone(),
                    kind: DeltaKind::Remove,
                }),
            })),
        );
        self.ctx.send(
            new_orchestrator.clone(),
            download,
            EventPayload::Message(Message::Control(ControlMessage {
                dest_node: new_orchestrator,
                kind: ControlKind::Discovery(DiscoveryDelta {
                    service: planned.module.clone(),
                    host: new_parent.clone(),
                    kind: DeltaKind::Add,
                }),
            })),
        );
    }

    /// The upload of a migrating module finished; the module instance leaves
    /// this node. Resource release arrives as a separate resource delta.
    pub(crate) fn on_module_departed(&mut self, at: NodeId, graph: ServiceGraphId, module: ModuleName) -> Result<()> {
        let node = self.topology.get_mut(&at)?;
        if node.remove_module(&graph, &module) {
            log::debug!("ModuleDeparted: Module {} of graph {} left node {}.", module, graph, at);
        } else {
            log::warn!("ModuleDeparted: Module {} of graph {} was not running on node {}.", module, graph, at);
        }
        Ok(())
    }

    /// The download of a migrating module finished; the module starts on
    /// this node.
    pub(crate) fn on_module_arrived(&mut self, at: NodeId, graph: ServiceGraphId, module: ModuleName) -> Result<()> {
        self.topology.get_mut(&at)?.instantiate_module(graph, module);
        Ok(())
    }
}
