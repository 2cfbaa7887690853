use rand::SeedableRng;
use rand::rngs::StdRng;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::str::FromStr;

use crate::api::scenario_dto::SimulationConfigDto;
use crate::domain::device::message::Message;
use crate::domain::topology::node::LinkDirection;
use crate::domain::utils::id::{ModuleName, NodeId, ServiceGraphId};
use crate::domain::utils::statistics::SimulationStats;
use crate::error::Error;

/// Logical simulation time in milliseconds.
pub type SimTime = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringMode {
    Off,
    Static,
    Dynamic,
}

impl FromStr for ClusteringMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ClusteringMode::Off),
            "static" => Ok(ClusteringMode::Static),
            "dynamic" => Ok(ClusteringMode::Dynamic),
            other => Err(Error::ModelConstruction(format!("Unknown clustering mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    pub mode: ClusteringMode,
    pub level: u32,
    pub range_km: f64,
    pub latency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategyKind {
    Clustered,
    Distributed,
}

impl FromStr for PlacementStrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clustered" => Ok(PlacementStrategyKind::Clustered),
            "distributed" => Ok(PlacementStrategyKind::Distributed),
            other => Err(Error::ModelConstruction(format!("Unknown placement strategy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub end_time: SimTime,
    pub strategy: PlacementStrategyKind,
    pub clustering: ClusteringConfig,
    pub rng_seed: u64,
}

impl TryFrom<&SimulationConfigDto> for SimulationConfig {
    type Error = Error;

    fn try_from(dto: &SimulationConfigDto) -> Result<Self, Self::Error> {
        Ok(SimulationConfig {
            end_time: dto.end_time,
            strategy: PlacementStrategyKind::from_str(&dto.placement_strategy)?,
            clustering: ClusteringConfig {
                mode: ClusteringMode::from_str(&dto.clustering.mode)?,
                level: dto.clustering.level,
                range_km: dto.clustering.range_km,
                latency: dto.clustering.latency,
            },
            rng_seed: dto.rng_seed,
        })
    }
}

/// Everything that can be scheduled at a node.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A message arrives at the target node.
    Message(Message),

    /// One of the target node's links finished its in-flight transmission.
    LinkFreed(LinkDirection),

    /// Start-clustering signal for dynamic cluster formation.
    StartClustering,

    /// The target client's best attachment point changed.
    AttachmentChange { new_parent: NodeId, new_uplink_latency: f64 },

    /// A migrating module finished uploading away from the target node.
    ModuleDeparted { graph: ServiceGraphId, module: ModuleName },

    /// A migrating module finished downloading onto the target node.
    ModuleArrived { graph: ServiceGraphId, module: ModuleName },

    /// The target client submits a placement request to its orchestrator.
    SubmitPlacement { graph: ServiceGraphId, pinned: BTreeMap<ModuleName, NodeId> },

    /// The target client's sensor emits a tuple towards `target_module`.
    SensorEmission { graph: ServiceGraphId, target_module: ModuleName, remaining: u32, period: SimTime },
}

/// An event scheduled for `target` at logical time `time`.
///
/// Ordering is by `(time, seq)`; the monotonic sequence number makes
/// equal-time events fire in submission order, keeping runs reproducible.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: SimTime,
    seq: u64,
    pub target: NodeId,
    pub payload: EventPayload,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

/// The discrete-event substrate: logical clock, event queue, seeded RNG and
/// run counters, constructed once per run and threaded by reference.
#[derive(Debug)]
pub struct SimulationContext {
    now: SimTime,
    seq: u64,
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    pub rng: StdRng,
    pub config: SimulationConfig,
    pub stats: SimulationStats,
}

impl SimulationContext {
    pub fn new(config: SimulationConfig) -> Self {
        SimulationContext {
            now: 0,
            seq: 0,
            queue: BinaryHeap::new(),
            rng: StdRng::seed_from_u64(config.rng_seed),
            config,
            stats: SimulationStats::default(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules `payload` at `target`, to be processed at `now + delay`.
    /// This is the only time/ordering primitive the core depends on.
    pub fn send(&mut self, target: NodeId, delay: SimTime, payload: EventPayload) {
        let time = self.now + delay.max(0);
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(ScheduledEvent { time, seq, target, payload }));
    }

    /// Pops the next event at or before `horizon`, advancing the clock.
    pub fn pop_until(&mut self, horizon: SimTime) -> Option<ScheduledEvent> {
        match self.queue.peek() {
            Some(Reverse(event)) if event.time <= horizon => {
                let Reverse(event) = self.queue.pop().expect("peeked event exists");
                self.now = event.time;
                self.stats.events_processed += 1;
                Some(event)
            }
            _ => None,
        }
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}

/// Converts a latency or transfer delay in fractional ms to a scheduling
/// delay, never rounding a positive delay down to zero.
pub fn to_delay(ms: f64) -> SimTime {
    if ms <= 0.0 {
        return 0;
    }
    (ms.round() as SimTime).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            end_time: 1_000,
            strategy: PlacementStrategyKind::Clustered,
            clustering: ClusteringConfig { mode: ClusteringMode::Off, level: 0, range_km: 0.0, latency: 0.0 },
            rng_seed: 7,
        }
    }

    #[test]
    fn events_fire_in_time_then_submission_order() {
        let mut ctx = SimulationContext::new(test_config());
        ctx.send(NodeId::new("b"), 10, EventPayload::StartClustering);
        ctx.send(NodeId::new("a"), 5, EventPayload::StartClustering);
        ctx.send(NodeId::new("c"), 10, EventPayload::StartClustering);

        let order: Vec<String> = std::iter::from_fn(|| ctx.pop_until(1_000)).map(|e| e.target.into()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn clock_advances_to_the_popped_event() {
        let mut ctx = SimulationContext::new(test_config());
        ctx.send(NodeId::new("a"), 42, EventPayload::StartClustering);
        let event = ctx.pop_until(1_000).unwrap();
        assert_eq!(event.time, 42);
        assert_eq!(ctx.now(), 42);
    }

    #[test]
    fn horizon_is_respected() {
        let mut ctx = SimulationContext::new(test_config());
        ctx.send(NodeId::new("a"), 500, EventPayload::StartClustering);
        assert!(ctx.pop_until(100).is_none());
        assert_eq!(ctx.pending_events(), 1);
    }

    #[test]
    fn positive_sub_millisecond_delays_never_collapse_to_zero() {
        assert_eq!(to_delay(0.0), 0);
        assert_eq!(to_delay(0.2), 1);
        assert_eq!(to_delay(4.6), 5);
    }
}
