use bacscope_core::network::NetworkMessage;
use bacscope_datalink::DataLinkAddress;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStatus {
    Available,
    Busy,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterEntry {
    pub router: DataLinkAddress,
    pub status: RouterStatus,
}

/// Routes to remote BACnet networks, keyed by `(source network, destination network)`.
///
/// The source network is the local network number the router was heard on;
/// `0` when it is unknown.
#[derive(Debug, Default)]
pub struct RouterTable {
    routes: RwLock<BTreeMap<(u16, u16), RouterEntry>>,
}

impl RouterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces routes to `dnets` through `router`.
    pub fn update_router_references(&self, snet: u16, router: DataLinkAddress, dnets: &[u16]) {
        let Ok(mut routes) = self.routes.write() else {
            return;
        };
        for dnet in dnets {
            routes.insert(
                (snet, *dnet),
                RouterEntry {
                    router,
                    status: RouterStatus::Available,
                },
            );
        }
    }

    fn set_status(&self, router: DataLinkAddress, dnets: &[u16], status: RouterStatus) {
        let Ok(mut routes) = self.routes.write() else {
            return;
        };
        for ((_, dnet), entry) in routes.iter_mut() {
            if entry.router == router && (dnets.is_empty() || dnets.contains(dnet)) {
                entry.status = status;
            }
        }
    }

    /// Applies a network-layer message heard from `source`.
    pub fn apply(&self, source: DataLinkAddress, message: &NetworkMessage) {
        match message {
            NetworkMessage::IAmRouterToNetwork(networks) => {
                log::debug!("router {source} serves networks {networks:?}");
                self.update_router_references(0, source, networks);
            }
            NetworkMessage::RouterBusyToNetwork(networks) => {
                self.set_status(source, networks, RouterStatus::Busy)
            }
            NetworkMessage::RouterAvailableToNetwork(networks) => {
                self.set_status(source, networks, RouterStatus::Available)
            }
            NetworkMessage::RejectMessageToNetwork { reason, network } => {
                log::warn!("router {source} rejected traffic to network {network}: reason {reason}");
                self.set_status(source, &[*network], RouterStatus::Disconnected)
            }
            NetworkMessage::WhoIsRouterToNetwork(_) => {}
        }
    }

    /// Router to use for `dnet`, preferring available ones.
    pub fn route_for(&self, dnet: u16) -> Option<DataLinkAddress> {
        let routes = self.routes.read().ok()?;
        let mut candidates: Vec<&RouterEntry> = routes
            .iter()
            .filter(|((_, d), _)| *d == dnet)
            .map(|(_, entry)| entry)
            .collect();
        candidates.sort_by_key(|entry| entry.status != RouterStatus::Available);
        candidates
            .first()
            .filter(|entry| entry.status != RouterStatus::Disconnected)
            .map(|entry| entry.router)
    }

    pub fn entries(&self) -> Vec<((u16, u16), RouterEntry)> {
        self.routes
            .read()
            .map(|routes| routes.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    /// Networks reachable through any known router.
    pub fn networks(&self) -> Vec<u16> {
        let mut networks: Vec<u16> = self.entries().iter().map(|((_, dnet), _)| *dnet).collect();
        networks.sort_unstable();
        networks.dedup();
        networks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> DataLinkAddress {
        DataLinkAddress::Ip(text.parse().unwrap())
    }

    #[test]
    fn i_am_router_populates_and_busy_updates() {
        let table = RouterTable::new();
        let router = addr("10.0.0.1:47808");
        table.apply(router, &NetworkMessage::IAmRouterToNetwork(vec![5, 6]));
        assert_eq!(table.route_for(5), Some(router));
        assert_eq!(table.networks(), vec![5, 6]);

        table.apply(router, &NetworkMessage::RouterBusyToNetwork(vec![5]));
        let entries = table.entries();
        assert_eq!(entries[0].1.status, RouterStatus::Busy);
        assert_eq!(entries[1].1.status, RouterStatus::Available);

        table.apply(
            router,
            &NetworkMessage::RejectMessageToNetwork { reason: 1, network: 6 },
        );
        assert_eq!(table.route_for(6), None);
    }

    #[test]
    fn available_router_preferred() {
        let table = RouterTable::new();
        let busy = addr("10.0.0.1:47808");
        let free = addr("10.0.0.2:47808");
        table.update_router_references(1, busy, &[9]);
        table.apply(busy, &NetworkMessage::RouterBusyToNetwork(vec![9]));
        table.update_router_references(2, free, &[9]);
        assert_eq!(table.route_for(9), Some(free));
    }
}
