use std::collections::HashMap;

use fogsim::api::scenario_dto::{
    ClusteringDto, FogNodeDto, MobilityEventDto, PlacementRequestDto, ScenarioDto, SimulationConfigDto,
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

fn up_edge(source: &str, target: &str) -> EdgeDto {
    EdgeDto { source: source.to_string(), target: target.to_string(), direction: "up".to_string(), selectivity: 1.0 }
}

/// Two separate branches under the cloud; the client starts under branch A
/// and re-attaches to branch B, so the branch point of the move is the
/// cloud itself.
fn two_branch_scenario() -> ScenarioDto {
    let mut pinned = HashMap::new();
    pinned.insert("camera".to_string(), "mobile".to_string());

    ScenarioDto {
        config: SimulationConfigDto {
            end_time: 10_000,
            placement_strategy: "clustered".to_string(),
            clustering: ClusteringDto { mode: "off".to_string(), level: 0, range_km: 0.0, latency: 2.0 },
            rng_seed: 1,
        },
        nodes: vec![
            node_dto("cloud", "cloud", 0, None, 0.0, 10_000.0),
            node_dto("fon-a", "orchestration", 1, Some("cloud"), 50.0, 2_000.0),
            node_dto("fon-b", "orchestration", 1, Some("cloud"), 50.0, 2_000.0),
            node_dto("edge-a", "compute", 2, Some("fon-a"), 4.0, 500.0),
            node_dto("edge-b", "compute", 2, Some("fon-b"), 4.0, 500.0),
            node_dto("mobile", "client", 3, Some("edge-a"), 2.0, 100.0),
        ],
        service_graphs: vec![ServiceGraphDto {
            id: "app".to_string(),
            modules: vec![module_dto("camera", 10.0), module_dto("proc-1", 100.0), module_dto("proc-2", 100.0)],
            edges: vec![up_edge("camera", "proc-1"), up_edge("proc-1", "proc-2")],
            constraints: HashMap::new(),
        }],
        placement_requests: vec![PlacementRequestDto {
            time: 0,
            graph: "app".to_string(),
            gateway: "mobile".to_string(),
            pinned,
        }],
        sensors: vec![],
        mobility_events: vec![MobilityEventDto {
            time: 1_000,
            node: "mobile".to_string(),
            new_parent: "edge-b".to_string(),
            new_uplink_latency: 3.0,
        }],
    }
}

fn hosts(sim: &Simulation, node: &str, module: &str) -> bool {
    sim.topology
        .get(&NodeId::new(node))
        .unwrap()
        .hosts_module(&ServiceGraphId::new("app"), &ModuleName::new(module))
}

#[test]
fn modules_follow_the_client_across_the_branch_point() {
    let mut sim = Simulation::from_scenario(two_branch_scenario()).expect("valid scenario");
    sim.run().expect("run completes");

    assert_eq!(sim.stats().migrations, 1);
    assert_eq!(sim.stats().modules_migrated, 2);

    // Both modules left the abandoned branch and appear exactly once, on
    // the new parent.
    assert!(!hosts(&sim, "edge-a", "proc-1"));
    assert!(!hosts(&sim, "edge-a", "proc-2"));
    assert!(hosts(&sim, "edge-b", "proc-1"));
    assert!(hosts(&sim, "edge-b", "proc-2"));
    assert!(sim.topology.get(&NodeId::new("edge-b")).unwrap().hosted.len() == 2);

    // Resources travelled with the modules.
    assert_eq!(sim.topology.get(&NodeId::new("edge-a")).unwrap().available.cpu, 500.0);
    assert_eq!(sim.topology.get(&NodeId::new("edge-b")).unwrap().available.cpu, 300.0);

    // The resolved request tracks the new hosts.
    let request = sim.resolved.values().next().expect("one resolved request");
    assert_eq!(request.placed.get(&ModuleName::new("proc-1")), Some(&NodeId::new("edge-b")));
    assert_eq!(request.placed.get(&ModuleName::new("proc-2")), Some(&NodeId::new("edge-b")));
}

#[test]
fn discovery_and_monitoring_follow_the_move() {
    let mut sim = Simulation::from_scenario(two_branch_scenario()).expect("valid scenario");
    sim.run().expect("run completes");

    // The old branch's orchestrator no longer lists the abandoned host.
    let fon_a = sim.topology.get(&NodeId::new("fon-a")).unwrap();
    let old_discovery = &fon_a.orchestration.as_ref().unwrap().discovery;
    assert!(old_discovery.hosts(&ModuleName::new("proc-1")).is_empty());
    assert!(old_discovery.hosts(&ModuleName::new("proc-2")).is_empty());
    assert!(!fon_a.orchestration.as_ref().unwrap().monitored.contains(&NodeId::new("mobile")));

    // The new branch's orchestrator took over both concerns.
    let fon_b = sim.topology.get(&NodeId::new("fon-b")).unwrap();
    let new_discovery = &fon_b.orchestration.as_ref().unwrap().discovery;
    assert_eq!(new_discovery.hosts(&ModuleName::new("proc-1")), &[NodeId::new("edge-b")]);
    assert!(fon_b.orchestration.as_ref().unwrap().monitored.contains(&NodeId::new("mobile")));

    let mobile = sim.topology.get(&NodeId::new("mobile")).unwrap();
    assert_eq!(mobile.parent, Some(NodeId::new("edge-b")));
    assert_eq!(mobile.orchestrator, Some(NodeId::new("fon-b")));
    assert_eq!(mobile.uplink_latency, 3.0);
}

#[test]
fn reattachment_to_the_same_parent_only_updates_the_link() {
    let mut scenario = two_branch_scenario();
    scenario.mobility_events[0].new_parent = "edge-a".to_string();
    let mut sim = Simulation::from_scenario(scenario).expect("valid scenario");
    sim.run().expect("run completes");

    assert_eq!(sim.stats().migrations, 0);
    assert!(hosts(&sim, "edge-a", "proc-1"));
    assert_eq!(sim.topology.get(&NodeId::new("mobile")).unwrap().uplink_latency, 3.0);
}
