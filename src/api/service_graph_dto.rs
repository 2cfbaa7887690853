use serde::Deserialize;
use std::collections::HashMap;

/// A single module (unit of deployment) of a service graph.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDto {
    pub name: String,

    /// CPU demand in MIPS.
    pub cpu: f64,

    /// RAM demand in MB.
    pub ram: f64,

    /// Storage demand in MB.
    pub storage: f64,

    /// Image size in MB, used to compute migration transfer delays.
    #[serde(default)]
    pub size: f64,
}

/// A directed edge between two modules of a service graph.
///
/// `direction` is one of `"up"`, `"down"` or `"actuator"`.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDto {
    pub source: String,
    pub target: String,
    pub direction: String,

    /// Probability that processing one input tuple emits a tuple on this edge.
    #[serde(default = "default_selectivity")]
    pub selectivity: f64,
}

fn default_selectivity() -> f64 {
    1.0
}

/// The complete application description submitted to the orchestration core.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceGraphDto {
    pub id: String,
    pub modules: Vec<ModuleDto>,
    pub edges: Vec<EdgeDto>,

    /// Pinned-placement constraints: module name -> allowed node names.
    #[serde(default)]
    pub constraints: HashMap<String, Vec<String>>,
}
