use std::collections::HashMap;

use fogsim::api::scenario_dto::{
    ClusteringDto, FogNodeDto, PlacementRequestDto, ScenarioDto, SensorDto, SimulationConfigDto,
};
use fogsim::api::service_graph_dto::{EdgeDto, ModuleDto, ServiceGraphDto};
use fogsim::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use fogsim::sim::simulation::Simulation;

fn node_dto(id: &str, role: &str, level: u32, parent: Option<&str>, latency: f64, cpu: f64) -> FogNodeDto {
    FogNodeDto {
        id: id.to_string(),
        role: role.to_string(),
        level,
        parent: parent.map(|p| p.to_string()),
        uplink_latency: latency,
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

fn edge_dto(source: &str, target: &str, direction: &str) -> EdgeDto {
    EdgeDto { source: source.to_string(), target: target.to_string(), direction: direction.to_string(), selectivity: 1.0 }
}

/// Cloud - FON - two clustered edges - one mobile client.
fn small_hierarchy() -> Vec<FogNodeDto> {
    vec![
        node_dto("cloud", "cloud", 0, None, 0.0, 10_000.0),
        node_dto("fon", "orchestration", 1, Some("cloud"), 50.0, 2_000.0),
        node_dto("edge-1", "compute", 2, Some("fon"), 4.0, 500.0),
        node_dto("edge-2", "compute", 2, Some("fon"), 4.0, 500.0),
        node_dto("mobile", "client", 3, Some("edge-1"), 2.0, 100.0),
    ]
}

/// camera (pinned at the client) -> detector, detector -> actuator sink.
fn camera_graph(detector_cpu: f64) -> ServiceGraphDto {
    ServiceGraphDto {
        id: "app".to_string(),
        modules: vec![module_dto("camera", 10.0), module_dto("detector", detector_cpu)],
        edges: vec![edge_dto("camera", "detector", "up"), edge_dto("detector", "alert", "actuator")],
        constraints: HashMap::new(),
    }
}

fn scenario(detector_cpu: f64, sensors: Vec<SensorDto>, requests: Vec<PlacementRequestDto>) -> ScenarioDto {
    ScenarioDto {
        config: SimulationConfigDto {
            end_time: 5_000,
            placement_strategy: "clustered".to_string(),
            clustering: ClusteringDto { mode: "static".to_string(), level: 2, range_km: 0.0, latency: 2.0 },
            rng_seed: 1,
        },
        nodes: small_hierarchy(),
        service_graphs: vec![camera_graph(detector_cpu)],
        placement_requests: requests,
        sensors,
        mobility_events: vec![],
    }
}

fn camera_request() -> PlacementRequestDto {
    let mut pinned = HashMap::new();
    pinned.insert("camera".to_string(), "mobile".to_string());
    PlacementRequestDto { time: 0, graph: "app".to_string(), gateway: "mobile".to_string(), pinned }
}

#[test]
fn pipeline_places_executes_and_delivers_to_the_actuator() {
    let sensors = vec![SensorDto {
        node: "mobile".to_string(),
        graph: "app".to_string(),
        target_module: "camera".to_string(),
        start: 50,
        period: 100,
        count: 3,
    }];
    let mut sim = Simulation::from_scenario(scenario(300.0, sensors, vec![camera_request()])).expect("valid scenario");
    sim.run().expect("run completes");

    let stats = sim.stats();
    assert_eq!(stats.requests_resolved, 1);
    assert_eq!(stats.modules_placed, 1);
    assert_eq!(stats.tuples_executed, 6, "camera and detector each run once per sensor firing");
    assert_eq!(stats.actuator_deliveries, 3);
    assert_eq!(stats.tuples_dropped, 0);

    // The detector landed on the request's anchor, the gateway's parent.
    let edge_1 = sim.topology.get(&NodeId::new("edge-1")).unwrap();
    assert!(edge_1.hosts_module(&ServiceGraphId::new("app"), &ModuleName::new("detector")));
    assert_eq!(edge_1.available.cpu, 200.0, "availability reflects the committed demand");

    // The client's orchestrator learned the detector location.
    let fon = sim.topology.get(&NodeId::new("fon")).unwrap();
    let discovery = &fon.orchestration.as_ref().unwrap().discovery;
    assert_eq!(discovery.hosts(&ModuleName::new("detector")), &[NodeId::new("edge-1")]);
}

#[test]
fn static_clustering_links_the_edge_siblings_symmetrically() {
    let mut sim = Simulation::from_scenario(scenario(300.0, vec![], vec![camera_request()])).expect("valid scenario");
    sim.run().expect("run completes");

    let edge_1 = sim.topology.get(&NodeId::new("edge-1")).unwrap();
    assert!(edge_1.in_cluster);
    assert!(edge_1.cluster_peers.contains_key(&NodeId::new("edge-2")));
    assert!(sim.topology.cluster_membership_is_symmetric());
}

#[test]
fn tuples_towards_an_unplaced_module_are_dropped_explicitly() {
    // No placement request: the detector is never deployed anywhere.
    let sensors = vec![SensorDto {
        node: "mobile".to_string(),
        graph: "app".to_string(),
        target_module: "detector".to_string(),
        start: 10,
        period: 10,
        count: 2,
    }];
    let mut sim = Simulation::from_scenario(scenario(300.0, sensors, vec![])).expect("valid scenario");
    sim.run().expect("run completes");

    let stats = sim.stats();
    assert_eq!(stats.tuples_dropped, 2);
    assert_eq!(stats.actuator_deliveries, 0);
    assert_eq!(stats.tuples_executed, 0);
}

#[test]
fn scenarios_with_a_cyclic_service_graph_are_refused_at_load() {
    // Two modules feeding each other UP, both pinned to the client, would
    // ping-pong execution on one node forever.
    let mut scenario = scenario(300.0, vec![], vec![]);
    scenario.service_graphs = vec![ServiceGraphDto {
        id: "app".to_string(),
        modules: vec![module_dto("ping", 10.0), module_dto("pong", 10.0)],
        edges: vec![edge_dto("ping", "pong", "up"), edge_dto("pong", "ping", "up")],
        constraints: HashMap::new(),
    }];
    let mut pinned = HashMap::new();
    pinned.insert("ping".to_string(), "mobile".to_string());
    pinned.insert("pong".to_string(), "mobile".to_string());
    scenario.placement_requests =
        vec![PlacementRequestDto { time: 0, graph: "app".to_string(), gateway: "mobile".to_string(), pinned }];
    scenario.sensors = vec![SensorDto {
        node: "mobile".to_string(),
        graph: "app".to_string(),
        target_module: "ping".to_string(),
        start: 50,
        period: 100,
        count: 1,
    }];

    assert!(Simulation::from_scenario(scenario).is_err());
}
