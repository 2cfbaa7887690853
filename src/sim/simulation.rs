use std::collections::BTreeMap;

use crate::api::scenario_dto::ScenarioDto;
use crate::domain::placement::clustered::ClusteredPlacement;
use crate::domain::placement::distributed::DistributedPlacement;
use crate::domain::placement::request::PlacementRequest;
use crate::domain::placement::strategy::PlacementStrategy;
use crate::domain::service::graph::ServiceGraph;
use crate::domain::topology::cluster::form_static_clusters;
use crate::domain::topology::routing::RoutingMatrix;
use crate::domain::topology::topology::FogTopology;
use crate::domain::utils::id::{ModuleName, NodeId, RequestId, ServiceGraphId};
use crate::domain::utils::statistics::SimulationStats;
use crate::error::{Error, Result};
use crate::sim::context::{ClusteringMode, EventPayload, PlacementStrategyKind, SimulationConfig, SimulationContext};

/// One simulation run: the fog topology, the submitted service graphs, the
/// configured placement strategy and the event queue driving it all.
#[derive(Debug)]
pub struct Simulation {
    pub ctx: SimulationContext,
    pub topology: FogTopology,
    pub graphs: BTreeMap<ServiceGraphId, ServiceGraph>,
    pub strategy: Box<dyn PlacementStrategy>,

    /// Fully resolved placement requests; their module -> node maps are
    /// kept current by the migration manager.
    pub resolved: BTreeMap<RequestId, PlacementRequest>,
}

impl Simulation {
    /// Builds the simulation from a parsed scenario: topology, service
    /// graphs, cluster formation, initial routing tables and all seeded
    /// events (placement requests, sensors, mobility).
    pub fn from_scenario(dto: ScenarioDto) -> Result<Self> {
        let config = SimulationConfig::try_from(&dto.config)?;
        let mut topology = FogTopology::from_dtos(&dto.nodes)?;

        let mut graphs: BTreeMap<ServiceGraphId, ServiceGraph> = BTreeMap::new();
        for graph_dto in dto.service_graphs {
            let graph = ServiceGraph::try_from(graph_dto)?;
            if graphs.contains_key(&graph.id) {
                return Err(Error::ModelConstruction(format!("Duplicate service graph id '{}'", graph.id)));
            }
            graphs.insert(graph.id.clone(), graph);
        }

        if config.clustering.mode == ClusteringMode::Static {
            form_static_clusters(&mut topology, config.clustering.level, config.clustering.latency)?;
        }

        RoutingMatrix::build(&topology).install(&mut topology)?;

        let strategy: Box<dyn PlacementStrategy> = match config.strategy {
            PlacementStrategyKind::Clustered => Box::new(ClusteredPlacement),
            PlacementStrategyKind::Distributed => Box::new(DistributedPlacement),
        };
        log::info!("Using the {} placement strategy.", strategy.name());

        let mut ctx = SimulationContext::new(config);

        // Dynamic clustering runs per node, triggered by a signal at t = 0.
        if ctx.config.clustering.mode == ClusteringMode::Dynamic {
            let level = ctx.config.clustering.level;
            for (id, node) in topology.iter() {
                if node.level == level {
                    ctx.send(id.clone(), 0, EventPayload::StartClustering);
                }
            }
        }

        for request in &dto.placement_requests {
            let gateway = NodeId::new(&request.gateway);
            if !topology.contains(&gateway) {
                return Err(Error::ModelConstruction(format!("Placement request references unknown gateway '{}'", request.gateway)));
            }
            let graph_id = ServiceGraphId::new(&request.graph);
            if !graphs.contains_key(&graph_id) {
                return Err(Error::ModelConstruction(format!("Placement request references unknown graph '{}'", request.graph)));
            }
            let pinned: BTreeMap<ModuleName, NodeId> =
                request.pinned.iter().map(|(m, n)| (ModuleName::new(m), NodeId::new(n))).collect();
            ctx.send(gateway, request.time, EventPayload::SubmitPlacement { graph: graph_id, pinned });
        }

        for sensor in &dto.sensors {
            let node = NodeId::new(&sensor.node);
            if !topology.contains(&node) {
                return Err(Error::ModelConstruction(format!("Sensor references unknown node '{}'", sensor.node)));
            }
            if sensor.count == 0 {
                continue;
            }
            ctx.send(
                node,
                sensor.start,
                EventPayload::SensorEmission {
                    graph: ServiceGraphId::new(&sensor.graph),
                    target_module: ModuleName::new(&sensor.target_module),
                    remaining: sensor.count,
                    period: sensor.period,
                },
            );
        }

        for event in &dto.mobility_events {
            let node = NodeId::new(&event.node);
            let new_parent = NodeId::new(&event.new_parent);
            if !topology.contains(&node) || !topology.contains(&new_parent) {
                return Err(Error::ModelConstruction(format!("Mobility event references unknown node(s) '{}'/'{}'", event.node, event.new_parent)));
            }
            ctx.send(node, event.time, EventPayload::AttachmentChange { new_parent, new_uplink_latency: event.new_uplink_latency });
        }

        Ok(Simulation { ctx, topology, graphs, strategy, resolved: BTreeMap::new() })
    }

    /// Drains the event queue up to the configured end time.
    ///
    /// Path-level failures (routing-table misses, unsatisfiable placements)
    /// are logged and end only the affected message path; model-level
    /// failures abort the run.
    pub fn run(&mut self) -> Result<()> {
        let horizon = self.ctx.config.end_time;
        log::info!("Simulation started, horizon {} ms, {} queued event(s).", horizon, self.ctx.pending_events());

        while let Some(event) = self.ctx.pop_until(horizon) {
            let target = event.target.clone();
            if let Err(error) = self.handle_event(target, event.payload) {
                match error {
                    Error::TopologyInconsistency { .. } => {
                        log::error!("{}", error);
                        self.ctx.stats.routing_errors += 1;
                    }
                    Error::UnsatisfiablePlacement(_) => {
                        log::error!("{}", error);
                        self.ctx.stats.placement_failures += 1;
                    }
                    fatal => return Err(fatal),
                }
            }
        }

        log::info!("Simulation ended at t = {} ms.", self.ctx.now());
        Ok(())
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.ctx.stats
    }
}
