use std::collections::{BTreeMap, HashMap};

use crate::domain::utils::id::{ModuleName, NodeId};

/// An add/remove mutation applied to a service discovery registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDelta {
    pub service: ModuleName,
    pub host: NodeId,
    pub kind: DeltaKind,
}

/// Per-orchestrator map from service name to the ordered list of hosting
/// nodes, with a round-robin cursor per service.
///
/// Mutated only through deltas from the placement engine and the migration
/// manager; read by the load balancer during UP-destination resolution.
#[derive(Debug, Clone, Default)]
pub struct ServiceDiscovery {
    entries: BTreeMap<ModuleName, Vec<NodeId>>,
    cursors: HashMap<ModuleName, usize>,
}

impl ServiceDiscovery {
    pub fn new() -> Self {
        ServiceDiscovery::default()
    }

    /// Registers a host for a service. Idempotent per (service, host) pair.
    pub fn register(&mut self, service: ModuleName, host: NodeId) {
        let hosts = self.entries.entry(service.clone()).or_default();
        if hosts.contains(&host) {
            log::debug!("Host {} already registered for service {}, ignoring.", host, service);
            return;
        }
        hosts.push(host.clone());
        log::debug!("Registered host {} for service {} ({} host(s) total).", host, service, hosts.len());
    }

    /// Removes a host for a service. Removing the last host removes the
    /// service entry entirely.
    pub fn deregister(&mut self, service: &ModuleName, host: &NodeId) {
        let Some(hosts) = self.entries.get_mut(service) else {
            return;
        };
        hosts.retain(|h| h != host);
        let remaining = hosts.len();
        if remaining == 0 {
            self.entries.remove(service);
            self.cursors.remove(service);
            log::debug!("Service {} has no hosts left, entry removed.", service);
        } else if let Some(cursor) = self.cursors.get_mut(service) {
            // Keep the cursor within the shrunk host list.
            *cursor %= remaining;
        }
    }

    pub fn apply(&mut self, delta: DiscoveryDelta) {
        match delta.kind {
            DeltaKind::Add => self.register(delta.service, delta.host),
            DeltaKind::Remove => self.deregister(&delta.service, &delta.host),
        }
    }

    /// Round-robin resolution: successive lookups cycle through the host
    /// list in registration order. Returns `None` for an unregistered
    /// service; the caller must not route and drops the message.
    pub fn resolve(&mut self, service: &ModuleName) -> Option<NodeId> {
        let hosts = self.entries.get(service)?;
        let cursor = self.cursors.entry(service.clone()).or_insert(0);
        let host = hosts[*cursor % hosts.len()].clone();
        *cursor = (*cursor + 1) % hosts.len();
        Some(host)
    }

    pub fn hosts(&self, service: &ModuleName) -> &[NodeId] {
        self.entries.get(service).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_registered(&self, service: &ModuleName) -> bool {
        self.entries.contains_key(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_hosts_in_order() {
        let mut discovery = ServiceDiscovery::new();
        let service = ModuleName::new("svc");
        for host in ["h0", "h1", "h2"] {
            discovery.register(service.clone(), NodeId::new(host));
        }

        let resolved: Vec<String> = (0..6).map(|_| discovery.resolve(&service).unwrap().into()).collect();
        assert_eq!(resolved, vec!["h0", "h1", "h2", "h0", "h1", "h2"]);
    }

    #[test]
    fn unregistered_service_resolves_to_none() {
        let mut discovery = ServiceDiscovery::new();
        assert_eq!(discovery.resolve(&ModuleName::new("ghost")), None);
    }

    #[test]
    fn registration_is_idempotent_per_pair() {
        let mut discovery = ServiceDiscovery::new();
        let service = ModuleName::new("svc");
        discovery.register(service.clone(), NodeId::new("h0"));
        discovery.register(service.clone(), NodeId::new("h0"));
        assert_eq!(discovery.hosts(&service).len(), 1);
    }

    #[test]
    fn removing_the_last_host_removes_the_entry() {
        let mut discovery = ServiceDiscovery::new();
        let service = ModuleName::new("svc");
        discovery.register(service.clone(), NodeId::new("h0"));
        discovery.deregister(&service, &NodeId::new("h0"));
        assert!(!discovery.is_registered(&service));
        assert_eq!(discovery.resolve(&service), None);
    }

    #[test]
    fn cursor_survives_a_host_removal() {
        let mut discovery = ServiceDiscovery::new();
        let service = ModuleName::new("svc");
        for host in ["h0", "h1", "h2"] {
            discovery.register(service.clone(), NodeId::new(host));
        }
        assert_eq!(discovery.resolve(&service), Some(NodeId::new("h0")));
        assert_eq!(discovery.resolve(&service), Some(NodeId::new("h1")));

        discovery.deregister(&service, &NodeId::new("h2"));
        // Cursor wraps onto the shrunk list instead of indexing out of bounds.
        assert_eq!(discovery.resolve(&service), Some(NodeId::new("h0")));
    }
}
