impl RouterTable {
    /// Bumps the revision. Returns (previous, current).
    ///
    /// Wall-clock seeded, but always strictly greater than the previous
    /// revision so two mutations within one clock tick still order.
    pub fn update_revision(&mut self) -> (i64, i64) {
        let previous = self.revision;
        self.revision = Utc::now()
            .timestamp_millis()
            .max(previous.saturating_add(1));
        (previous, self.revision)
    }

    /// Returns a new table with the given entries added.
    ///
    /// An incoming entry replaces any existing entry with the same id
    /// wholesale (never merged); all other entries are kept. The revision is
    /// bumped and the table rebuilt, so the result is immediately routable.
    pub fn add_entries(&self, incoming: Vec<RouterEntry>) -> Result<RouterTable> {
        let incoming_ids: HashSet<String> = incoming.iter().map(|e| e.id()).collect();
        let mut table = self.clone();
        table.entries.retain(|e| !incoming_ids.contains(&e.id()));
        table.entries.extend(incoming);
        table.update_revision();
        table.rebuild()?;
        Ok(table)
    }
}
