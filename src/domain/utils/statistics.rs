use serde::Serialize;

use crate::error::Result;

/// Counters accumulated over one simulation run, exportable as a one-row
/// CSV for offline analysis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    pub events_processed: u64,

    pub tuples_emitted: u64,
    pub tuples_executed: u64,
    pub tuples_forwarded: u64,
    pub tuples_dropped: u64,
    pub actuator_deliveries: u64,

    pub control_messages: u64,
    pub modules_placed: u64,
    pub requests_resolved: u64,
    pub requests_forwarded: u64,
    pub placement_failures: u64,

    pub clusters_formed: u64,
    pub migrations: u64,
    pub modules_migrated: u64,
    pub routing_errors: u64,
}

impl SimulationStats {
    pub fn write_csv(&self, path: &str) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.serialize(self)?;
        writer.flush().map_err(crate::error::Error::Io)?;
        log::info!("Wrote run metrics to '{}'.", path);
        Ok(())
    }

    pub fn log_summary(&self) {
        log::info!("--- Run summary ---");
        log::info!("Events processed:      {}", self.events_processed);
        log::info!("Tuples emitted:        {}", self.tuples_emitted);
        log::info!("Tuples executed:       {}", self.tuples_executed);
        log::info!("Tuples forwarded:      {}", self.tuples_forwarded);
        log::info!("Tuples dropped:        {}", self.tuples_dropped);
        log::info!("Actuator deliveries:   {}", self.actuator_deliveries);
        log::info!("Control messages:      {}", self.control_messages);
        log::info!("Modules placed:        {}", self.modules_placed);
        log::info!("Requests resolved:     {}", self.requests_resolved);
        log::info!("Requests forwarded:    {}", self.requests_forwarded);
        log::info!("Placement failures:    {}", self.placement_failures);
        log::info!("Migrations:            {} ({} module(s) moved)", self.migrations, self.modules_migrated);
        log::info!("Routing errors:        {}", self.routing_errors);
    }
}
