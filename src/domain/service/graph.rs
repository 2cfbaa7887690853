use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use crate::api::service_graph_dto::ServiceGraphDto;
use crate::domain::topology::node::Resources;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use crate::error::Error;

/// Direction tag of a service-graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// Towards the cloud, away from the client.
    Up,
    /// Back towards the client.
    Down,
    /// Terminates at an actuator sink.
    Actuator,
}

impl FromStr for EdgeDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(EdgeDirection::Up),
            "down" => Ok(EdgeDirection::Down),
            "actuator" => Ok(EdgeDirection::Actuator),
            other => Err(Error::ModelConstruction(format!("Unknown edge direction '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceModule {
    pub name: ModuleName,
    pub demand: Resources,

    /// Image size in MB, drives migration transfer delay.
    pub size: f64,
}

#[derive(Debug, Clone)]
pub struct ServiceEdge {
    pub source: ModuleName,
    pub target: ModuleName,
    pub direction: EdgeDirection,

    /// Fan-out probability: processing one input emits on this edge with
    /// probability `selectivity`.
    pub selectivity: f64,
}

/// A named application: modules with resource demand, tagged directed edges
/// and optional pinned-placement constraints. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct ServiceGraph {
    pub id: ServiceGraphId,
    pub modules: BTreeMap<ModuleName, ServiceModule>,
    pub edges: Vec<ServiceEdge>,

    /// Module -> allowed hosting nodes.
    pub constraints: HashMap<ModuleName, Vec<NodeId>>,
}

impl TryFrom<ServiceGraphDto> for ServiceGraph {
    type Error = Error;

    fn try_from(dto: ServiceGraphDto) -> Result<Self, Self::Error> {
        let id = ServiceGraphId::new(&dto.id);

        let mut modules = BTreeMap::new();
        for m in &dto.modules {
            let name = ModuleName::new(&m.name);
            if modules.contains_key(&name) {
                return Err(Error::ModelConstruction(format!("Duplicate module '{}' in graph '{}'", m.name, dto.id)));
            }
            modules.insert(name.clone(), ServiceModule { name, demand: Resources::new(m.cpu, m.ram, m.storage), size: m.size });
        }

        let mut edges = Vec::with_capacity(dto.edges.len());
        for e in &dto.edges {
            let source = ModuleName::new(&e.source);
            let target = ModuleName::new(&e.target);
            if !modules.contains_key(&source) {
                return Err(Error::ModelConstruction(format!("Edge source '{}' is not a module of graph '{}'", e.source, dto.id)));
            }
            // Actuator targets are sinks, not modules.
            let direction = EdgeDirection::from_str(&e.direction)?;
            if direction != EdgeDirection::Actuator && !modules.contains_key(&target) {
                return Err(Error::ModelConstruction(format!("Edge target '{}' is not a module of graph '{}'", e.target, dto.id)));
            }
            if !(0.0..=1.0).contains(&e.selectivity) {
                return Err(Error::ModelConstruction(format!("Selectivity {} of edge {} -> {} is outside [0, 1]", e.selectivity, e.source, e.target)));
            }
            edges.push(ServiceEdge { source, target, direction, selectivity: e.selectivity });
        }

        let mut constraints = HashMap::new();
        for (module, nodes) in &dto.constraints {
            constraints.insert(ModuleName::new(module), nodes.iter().map(NodeId::new).collect());
        }

        let graph = ServiceGraph { id, modules, edges, constraints };

        // The placement frontier only drains if the dependency relation is
        // acyclic; a cycle would deadlock every request for this graph and
        // loop module execution on co-hosted nodes.
        let mut reachable: BTreeSet<ModuleName> = BTreeSet::new();
        loop {
            let frontier = graph.dag_sources(&reachable, &BTreeSet::new());
            if frontier.is_empty() {
                break;
            }
            reachable.extend(frontier);
        }
        if reachable.len() != graph.modules.len() {
            let stuck: Vec<&str> = graph.modules.keys().filter(|m| !reachable.contains(*m)).map(|m| m.as_str()).collect();
            return Err(Error::ModelConstruction(format!(
                "Service graph '{}' has a cyclic module dependency involving [{}]",
                dto.id,
                stuck.join(", ")
            )));
        }

        Ok(graph)
    }
}

impl ServiceGraph {
    pub fn module(&self, name: &ModuleName) -> Result<&ServiceModule, Error> {
        self.modules.get(name).ok_or_else(|| Error::UnknownModule { graph: self.id.clone(), module: name.clone() })
    }

    /// Modules sending UP into `module`.
    pub fn up_predecessors(&self, module: &ModuleName) -> Vec<ModuleName> {
        self.edges
            .iter()
            .filter(|e| e.direction == EdgeDirection::Up && &e.target == module)
            .map(|e| e.source.clone())
            .collect()
    }

    /// Modules `module` sends DOWN into.
    pub fn down_successors(&self, module: &ModuleName) -> Vec<ModuleName> {
        self.edges
            .iter()
            .filter(|e| e.direction == EdgeDirection::Down && &e.source == module)
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn outgoing_edges(&self, module: &ModuleName) -> impl Iterator<Item = &ServiceEdge> {
        self.edges.iter().filter(move |e| &e.source == module)
    }

    /// Structural prerequisites of a module: all of its UP-predecessors and
    /// DOWN-successors must be placed before the module itself.
    fn prerequisites(&self, module: &ModuleName) -> BTreeSet<ModuleName> {
        let mut deps: BTreeSet<ModuleName> = self.up_predecessors(module).into_iter().collect();
        deps.extend(self.down_successors(module));
        deps
    }

    /// Modules that structurally depend on `module` (inverse of
    /// `prerequisites`), used to propagate placement failure downstream.
    fn dependents(&self, module: &ModuleName) -> BTreeSet<ModuleName> {
        self.modules.keys().filter(|m| self.prerequisites(m).contains(module)).cloned().collect()
    }

    /// The current placement frontier: unplaced modules whose prerequisites
    /// are all satisfied.
    pub fn placement_frontier(&self, placed: &BTreeSet<ModuleName>) -> Vec<ModuleName> {
        self.dag_sources(placed, &BTreeSet::new())
    }

    /// DAG-source computation with a failed set: failed modules and their
    /// entire downstream closure are removed from the dependency DAG, and
    /// the remaining sources (unplaced modules whose prerequisites are all
    /// placed) are returned in sorted order.
    pub fn dag_sources(&self, placed: &BTreeSet<ModuleName>, failed: &BTreeSet<ModuleName>) -> Vec<ModuleName> {
        let mut excluded: BTreeSet<ModuleName> = failed.clone();
        let mut work: Vec<ModuleName> = failed.iter().cloned().collect();
        while let Some(m) = work.pop() {
            for dependent in self.dependents(&m) {
                if excluded.insert(dependent.clone()) {
                    work.push(dependent);
                }
            }
        }

        self.modules
            .keys()
            .filter(|m| !placed.contains(*m) && !excluded.contains(*m))
            .filter(|m| self.prerequisites(m).iter().all(|dep| placed.contains(dep)))
            .cloned()
            .collect()
    }

    /// The most CPU-demanding module among `names`.
    pub fn most_demanding(&self, names: &BTreeSet<ModuleName>) -> Option<&ServiceModule> {
        names
            .iter()
            .filter_map(|n| self.modules.get(n))
            .max_by(|a, b| a.demand.cpu.partial_cmp(&b.demand.cpu).expect("demands are finite"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::service_graph_dto::{EdgeDto, ModuleDto};

    fn module_dto(name: &str, cpu: f64) -> ModuleDto {
        ModuleDto { name: name.to_string(), cpu, ram: 64.0, storage: 128.0, size: 50.0 }
    }

    fn up_edge(source: &str, target: &str) -> EdgeDto {
        EdgeDto { source: source.to_string(), target: target.to_string(), direction: "up".to_string(), selectivity: 1.0 }
    }

    /// Four-module chain A -> B -> C -> D, all UP edges.
    fn chain() -> ServiceGraph {
        ServiceGraph::try_from(ServiceGraphDto {
            id: "chain".to_string(),
            modules: vec![module_dto("a", 10.0), module_dto("b", 20.0), module_dto("c", 30.0), module_dto("d", 40.0)],
            edges: vec![up_edge("a", "b"), up_edge("b", "c"), up_edge("c", "d")],
            constraints: HashMap::new(),
        })
        .expect("valid graph")
    }

    fn names(list: &[&str]) -> BTreeSet<ModuleName> {
        list.iter().map(|n| ModuleName::new(*n)).collect()
    }

    #[test]
    fn frontier_of_an_unplaced_chain_is_the_first_module() {
        let graph = chain();
        assert_eq!(graph.placement_frontier(&BTreeSet::new()), vec![ModuleName::new("a")]);
    }

    #[test]
    fn frontier_advances_once_the_predecessor_is_placed() {
        let graph = chain();
        assert_eq!(graph.placement_frontier(&names(&["a"])), vec![ModuleName::new("b")]);
    }

    #[test]
    fn failed_module_removes_its_downstream_closure() {
        let graph = chain();
        // With A placed and B failed, C and D transitively depend on the
        // failed B, so the frontier is empty.
        let sources = graph.dag_sources(&names(&["a"]), &names(&["b"]));
        assert!(sources.is_empty(), "expected empty frontier, got {:?}", sources);
    }

    #[test]
    fn down_successors_gate_the_frontier() {
        let graph = ServiceGraph::try_from(ServiceGraphDto {
            id: "updown".to_string(),
            modules: vec![module_dto("client", 5.0), module_dto("proc", 50.0)],
            edges: vec![
                up_edge("client", "proc"),
                EdgeDto { source: "proc".to_string(), target: "client".to_string(), direction: "down".to_string(), selectivity: 1.0 },
            ],
            constraints: HashMap::new(),
        })
        .expect("valid graph");

        // proc requires both its UP-predecessor and its DOWN-successor
        // (both are "client") to be placed.
        assert_eq!(graph.placement_frontier(&BTreeSet::new()), vec![ModuleName::new("client")]);
        assert_eq!(graph.placement_frontier(&names(&["client"])), vec![ModuleName::new("proc")]);
    }

    #[test]
    fn mutual_up_edges_are_rejected_as_a_dependency_cycle() {
        let result = ServiceGraph::try_from(ServiceGraphDto {
            id: "feedback".to_string(),
            modules: vec![module_dto("a", 10.0), module_dto("b", 10.0)],
            edges: vec![up_edge("a", "b"), up_edge("b", "a")],
            constraints: HashMap::new(),
        });
        match result {
            Err(Error::ModelConstruction(message)) => assert!(message.contains("cyclic"), "unexpected message: {}", message),
            other => panic!("expected a construction error, got {:?}", other),
        }
    }

    #[test]
    fn up_down_round_trips_are_not_a_dependency_cycle() {
        // UP client -> proc plus DOWN proc -> client both make proc depend
        // on client, which stays acyclic.
        let result = ServiceGraph::try_from(ServiceGraphDto {
            id: "roundtrip".to_string(),
            modules: vec![module_dto("client", 5.0), module_dto("proc", 50.0)],
            edges: vec![
                up_edge("client", "proc"),
                EdgeDto { source: "proc".to_string(), target: "client".to_string(), direction: "down".to_string(), selectivity: 1.0 },
            ],
            constraints: HashMap::new(),
        });
        assert!(result.is_ok());
    }

    #[test]
    fn selectivity_outside_unit_interval_is_rejected() {
        let result = ServiceGraph::try_from(ServiceGraphDto {
            id: "bad".to_string(),
            modules: vec![module_dto("a", 1.0), module_dto("b", 1.0)],
            edges: vec![EdgeDto { source: "a".to_string(), target: "b".to_string(), direction: "up".to_string(), selectivity: 1.5 }],
            constraints: HashMap::new(),
        });
        assert!(result.is_err());
    }
}
