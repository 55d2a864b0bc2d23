impl RouterTable {
    /// Creates an empty table for a service. Replication factor defaults
    /// to 2; partitions arrive with the first registered entry.
    pub fn new(service: impl Into<String>) -> Result<Self> {
        let service = service.into();
        if service.trim().is_empty() {
            return Err(ShardError::BadTable(
                "service name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            service,
            revision: Utc::now().timestamp_millis(),
            total_partitions: 0,
            replication_factor: 2,
            partition_keys: Vec::new(),
            entries: Vec::new(),
            entries_by_partition: Vec::new(),
        })
    }

    /// Recomputes all derived state and validates the coverage invariant.
    ///
    /// `total_partitions` becomes the sum of entry partition counts (unless
    /// the table has no entries yet, in which case the declared total is the
    /// provisioning target for the first registered entry). Fails when a
    /// partition repeats, is out of range, or is unaccounted for; a failed
    /// rebuild leaves the table unusable for lookups, never half-repaired.
    pub fn rebuild(&mut self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(ShardError::BadTable(
                "replication_factor must be >= 1".to_string(),
            ));
        }

        if self.entries.is_empty() {
            self.entries_by_partition = Vec::new();
            return Ok(());
        }

        let total: u32 = self.entries.iter().map(|e| e.partitions.len() as u32).sum();
        self.total_partitions = total;
        for entry in &mut self.entries {
            entry.reset_partitions_map();
        }

        // Master index. Every partition must appear exactly once.
        let mut masters: Vec<Option<usize>> = vec![None; total as usize];
        for (idx, entry) in self.entries.iter().enumerate() {
            for &p in &entry.partitions {
                if p >= total {
                    return Err(ShardError::BadTable(format!(
                        "partition {} in entry {} is out of range ({} total)",
                        p,
                        entry.id(),
                        total
                    )));
                }
                if let Some(other) = masters[p as usize] {
                    return Err(ShardError::BadTable(format!(
                        "partition {} is mastered by both {} and {}",
                        p,
                        self.entries[other].id(),
                        entry.id()
                    )));
                }
                masters[p as usize] = Some(idx);
            }
        }
        if masters.iter().any(|m| m.is_none()) {
            return Err(ShardError::BadTable(
                "some partitions are unaccounted for".to_string(),
            ));
        }

        // Replica walk. Replicas are computed from the layout, not stored.
        let mut by_partition: Vec<Vec<usize>> = Vec::with_capacity(total as usize);
        let mut replica_marks: Vec<(usize, u32)> = Vec::new();
        for p in 0..total {
            let master = masters[p as usize].expect("master index was just validated");
            let mut owners = vec![master];
            let mut seen: HashSet<usize> = owners.iter().copied().collect();
            for step in 1..total {
                if owners.len() == self.replication_factor {
                    break;
                }
                let q = ((p + step) % total) as usize;
                let owner = masters[q].expect("master index was just validated");
                if owner == master {
                    // mastered by the same entry, skip to the next one
                    continue;
                }
                if seen.insert(owner) {
                    owners.push(owner);
                    replica_marks.push((owner, p));
                }
            }
            by_partition.push(owners);
        }
        for (owner, partition) in replica_marks {
            self.entries[owner]
                .partitions_map
                .entry(partition)
                .or_insert(false);
        }
        self.entries_by_partition = by_partition;
        Ok(())
    }

    /// Serializes the table to its wire document.
    pub fn to_document(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(ShardError::from)
    }

    /// Builds a table from a wire document, validating every invariant.
    ///
    /// The declared `total_partitions` must match what the entries actually
    /// cover; a mismatched document is rejected, never repaired.
    pub fn from_document(doc: Value) -> Result<Self> {
        let mut table: RouterTable = serde_json::from_value(doc)
            .map_err(|e| ShardError::Serialization(format!("unparsable router table: {}", e)))?;
        let declared = table.total_partitions;
        table.rebuild()?;
        if !table.entries.is_empty() && table.total_partitions != declared {
            return Err(ShardError::BadTable(format!(
                "declared total_partitions {} does not match entry coverage {}",
                declared, table.total_partitions
            )));
        }
        Ok(table)
    }
}
