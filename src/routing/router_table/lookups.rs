impl RouterTable {
    /// Finds an entry by its id.
    pub fn find_entry(&self, id: &str) -> Option<&RouterEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Entries associated with the given partition. `[0]` is the master,
    /// followed by up to `replication_factor - 1` replicas in walk order.
    pub fn partition_entries(&self, partition: u32) -> Result<Vec<&RouterEntry>> {
        if partition >= self.total_partitions {
            return Err(ShardError::PartitionOutOfRange(
                partition,
                self.total_partitions,
            ));
        }
        let owners = self
            .entries_by_partition
            .get(partition as usize)
            .ok_or(ShardError::PartitionOutOfRange(
                partition,
                self.total_partitions,
            ))?;
        Ok(owners.iter().map(|&i| &self.entries[i]).collect())
    }

    /// Computes the replicas for a partition mastered by `master`.
    ///
    /// Walks the partitions after `partition` (mod total), skipping any
    /// partition `master` itself masters, and collects distinct owning
    /// entries in walk order. Pure: the same layout always yields the same
    /// list.
    pub fn replicas_for(&self, partition: u32, master: &RouterEntry) -> Result<Vec<&RouterEntry>> {
        if partition >= self.total_partitions {
            return Err(ShardError::PartitionOutOfRange(
                partition,
                self.total_partitions,
            ));
        }
        let master_id = master.id();
        let mut replicas: Vec<&RouterEntry> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(master_id.clone());
        for step in 1..self.total_partitions {
            if replicas.len() + 1 == self.replication_factor {
                break;
            }
            let q = (partition + step) % self.total_partitions;
            if master.masters(q) {
                continue;
            }
            let owner = self
                .entries_by_partition
                .get(q as usize)
                .and_then(|owners| owners.first())
                .map(|&i| &self.entries[i])
                .ok_or_else(|| ShardError::BadTable(format!("partition {} has no master", q)))?;
            if seen.insert(owner.id()) {
                replicas.push(owner);
            }
        }
        Ok(replicas)
    }

    /// Derives the partition for a shard key. Fails until the table has
    /// partitions to route to.
    pub fn partition_for_key(&self, key: &str) -> Result<u32> {
        if self.total_partitions == 0 {
            return Err(ShardError::NoRouterTable);
        }
        Ok(super::shard_hash::partition_for_key(
            key,
            self.total_partitions,
        ))
    }
}
