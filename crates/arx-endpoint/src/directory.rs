//! Network directory — the roster exposed via /network.
//!
//! The roster is injected at construction; the wire-shaped directory map
//! is built once on first request and then read without locking.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use arx_core::codec::Dict;

/// One peer node as configured.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub host: String,
    pub client_port: u16,
    pub packed_key: Vec<u8>,
}

/// Configured peer nodes, keyed by node id.
pub type Roster = BTreeMap<String, NodeInfo>;

pub struct NetworkDirectory {
    roster: Roster,
    cache: OnceLock<Dict>,
}

impl NetworkDirectory {
    pub fn new(roster: Roster) -> Self {
        Self {
            roster,
            cache: OnceLock::new(),
        }
    }

    /// The directory map `{node_id: {port, ip, key}}`.
    pub fn get(&self) -> &Dict {
        self.cache.get_or_init(|| {
            let mut directory = Dict::new();
            for (node_id, info) in &self.roster {
                directory.put(
                    node_id.clone(),
                    Dict::new()
                        .with("port", info.client_port)
                        .with("ip", info.host.clone())
                        .with("key", info.packed_key.clone()),
                );
            }
            directory
        })
    }
}
