use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-protocol listen ports for one cluster node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryPorts {
    #[serde(default)]
    pub json: u16,
    #[serde(default)]
    pub http: u16,
    #[serde(default)]
    pub binary: u16,
}

impl EntryPorts {
    pub fn new(json: u16, http: u16, binary: u16) -> Self {
        Self { json, http, binary }
    }
}

/// One cluster node and the partitions it masters.
///
/// Entries are generally immutable: ownership changes go through
/// `RouterTable::add_entries` with a replacement entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterEntry {
    /// The address of this entry.
    pub address: String,
    #[serde(default)]
    pub ports: EntryPorts,
    /// Partitions this entry is responsible for (master only).
    #[serde(default)]
    pub partitions: Vec<u32>,
    /// Last successful liveness contact. Advisory, never authoritative.
    #[serde(default = "epoch")]
    pub last_seen_at: DateTime<Utc>,
    /// All partitions this entry touches. true indicates master, false a
    /// replica role. Derived during table rebuild, never serialized.
    #[serde(skip)]
    pub partitions_map: HashMap<u32, bool>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl RouterEntry {
    /// Creates an entry with no partitions.
    pub fn new(address: impl Into<String>, ports: EntryPorts) -> Self {
        Self {
            address: address.into(),
            ports,
            partitions: Vec::new(),
            last_seen_at: epoch(),
            partitions_map: HashMap::new(),
        }
    }

    /// Stable identity key. Currently address:jsonport.
    pub fn id(&self) -> String {
        format!("{}:{}", self.address, self.ports.json)
    }

    /// Whether this entry masters the partition.
    pub fn masters(&self, partition: u32) -> bool {
        self.partitions_map.get(&partition).copied().unwrap_or(false)
    }

    pub(crate) fn reset_partitions_map(&mut self) {
        self.partitions_map = self.partitions.iter().map(|p| (*p, true)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id() {
        let entry = RouterEntry::new("10.0.0.5", EntryPorts::new(8009, 8010, 0));
        assert_eq!(entry.id(), "10.0.0.5:8009");
    }

    #[test]
    fn test_masters_after_reset() {
        let mut entry = RouterEntry::new("localhost", EntryPorts::new(8009, 8010, 0));
        entry.partitions = vec![1, 4];
        entry.reset_partitions_map();
        assert!(entry.masters(1));
        assert!(entry.masters(4));
        assert!(!entry.masters(2));
    }
}
