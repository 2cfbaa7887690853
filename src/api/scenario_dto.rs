use serde::Deserialize;
use std::collections::HashMap;

use crate::api::service_graph_dto::ServiceGraphDto;

/// Clustering configuration.
///
/// `mode` is one of `"off"`, `"static"` or `"dynamic"`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusteringDto {
    pub mode: String,

    /// Hierarchy level at which clusters are formed.
    #[serde(default)]
    pub level: u32,

    /// Communication range in km for dynamic clustering.
    #[serde(default)]
    pub range_km: f64,

    /// Uniform latency (ms) of every cluster link.
    #[serde(default = "default_cluster_latency")]
    pub latency: f64,
}

fn default_cluster_latency() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfigDto {
    /// Logical end time of the run in ms.
    pub end_time: i64,

    /// `"clustered"` (centralized) or `"distributed"` (decentralized).
    pub placement_strategy: String,

    pub clustering: ClusteringDto,

    #[serde(default)]
    pub rng_seed: u64,
}

/// One node of the fog hierarchy.
///
/// `role` is one of `"client"`, `"compute"`, `"orchestration"` or `"cloud"`.
#[derive(Debug, Clone, Deserialize)]
pub struct FogNodeDto {
    pub id: String,
    pub role: String,

    /// Hierarchy level, cloud = 0, increasing towards the edge.
    pub level: u32,

    pub parent: Option<String>,

    /// Latency (ms) of the link towards the parent.
    #[serde(default)]
    pub uplink_latency: f64,

    /// Bandwidth (MB/s) towards the parent.
    #[serde(default = "default_bandwidth")]
    pub uplink_bandwidth: f64,

    /// Bandwidth (MB/s) towards the children.
    #[serde(default = "default_bandwidth")]
    pub downlink_bandwidth: f64,

    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,

    /// CPU capacity in MIPS.
    pub cpu: f64,
    /// RAM capacity in MB.
    pub ram: f64,
    /// Storage capacity in MB.
    pub storage: f64,
}

fn default_bandwidth() -> f64 {
    100.0
}

/// A placement request submitted by a client node at a given time.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementRequestDto {
    pub time: i64,
    pub graph: String,

    /// The client node the request originates from.
    pub gateway: String,

    /// Modules already fixed to a node, e.g. the client-side module.
    #[serde(default)]
    pub pinned: HashMap<String, String>,
}

/// A periodic tuple source attached to a client node.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorDto {
    pub node: String,
    pub graph: String,

    /// The module the emitted tuples are addressed to.
    pub target_module: String,

    pub start: i64,
    pub period: i64,
    pub count: u32,
}

/// A timed change of a client node's best attachment point, as supplied by
/// the location/mobility provider.
#[derive(Debug, Clone, Deserialize)]
pub struct MobilityEventDto {
    pub time: i64,
    pub node: String,
    pub new_parent: String,

    /// Latency (ms) of the new uplink.
    pub new_uplink_latency: f64,
}

/// The root scenario document.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDto {
    pub config: SimulationConfigDto,
    pub nodes: Vec<FogNodeDto>,
    pub service_graphs: Vec<ServiceGraphDto>,

    #[serde(default)]
    pub placement_requests: Vec<PlacementRequestDto>,

    #[serde(default)]
    pub sensors: Vec<SensorDto>,

    #[serde(default)]
    pub mobility_events: Vec<MobilityEventDto>,
}
