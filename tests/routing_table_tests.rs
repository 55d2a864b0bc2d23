/// Router table tests
///
/// Construction, validation and serialization properties of the routing
/// data model.
/// Run with: cargo test --test routing_table_tests
use shardroute::{EntryPorts, RouterEntry, RouterTable, ShardError};

fn entry(address: &str, partitions: Vec<u32>) -> RouterEntry {
    let mut e = RouterEntry::new(address, EntryPorts::new(8009, 8010, 0));
    e.partitions = partitions;
    e
}

fn table(entries: Vec<RouterEntry>, replication_factor: usize) -> RouterTable {
    let mut t = RouterTable::new("trendy").unwrap();
    t.replication_factor = replication_factor;
    t.entries = entries;
    t.rebuild().unwrap();
    t
}

#[test]
fn every_partition_has_exactly_one_master() {
    let t = table(
        vec![
            entry("a", vec![0, 3, 6]),
            entry("b", vec![1, 4, 7]),
            entry("c", vec![2, 5, 8]),
        ],
        2,
    );
    assert_eq!(t.total_partitions, 9);

    for partition in 0..t.total_partitions {
        let masters: Vec<&RouterEntry> = t
            .entries
            .iter()
            .filter(|e| e.partitions.contains(&partition))
            .collect();
        assert_eq!(masters.len(), 1, "partition {} has {} masters", partition, masters.len());
        assert_eq!(
            t.partition_entries(partition).unwrap()[0].id(),
            masters[0].id()
        );
    }
}

#[test]
fn replica_walk_wraps_around_the_ring() {
    let t = table(
        vec![entry("a", vec![0, 1]), entry("b", vec![2, 3])],
        2,
    );
    // the last partition's replica comes from the front of the ring
    let owners = t.partition_entries(3).unwrap();
    assert_eq!(owners[0].address, "b");
    assert_eq!(owners[1].address, "a");
}

#[test]
fn wire_round_trip_through_json_text() {
    let t = table(
        vec![entry("a", vec![0, 2]), entry("b", vec![1, 3])],
        2,
    );
    let text = serde_json::to_string(&t.to_document().unwrap()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    let back = RouterTable::from_document(doc).unwrap();
    assert_eq!(back, t);
}

#[test]
fn wire_field_names_are_stable() {
    let t = table(vec![entry("a", vec![0])], 1);
    let doc = t.to_document().unwrap();
    for field in [
        "service",
        "revision",
        "total_partitions",
        "replication_factor",
        "partition_keys",
        "entries",
    ] {
        assert!(doc.get(field).is_some(), "missing field {}", field);
    }
    let entry_doc = &doc["entries"][0];
    for field in ["address", "ports", "partitions", "last_seen_at"] {
        assert!(entry_doc.get(field).is_some(), "missing entry field {}", field);
    }
    assert!(entry_doc["ports"].get("json").is_some());
}

#[test]
fn malformed_documents_are_rejected_not_repaired() {
    // missing service
    let doc = serde_json::json!({
        "revision": 5, "total_partitions": 0, "replication_factor": 2,
        "entries": []
    });
    assert!(matches!(
        RouterTable::from_document(doc),
        Err(ShardError::Serialization(_))
    ));

    // entry partitions exceeding the declared total
    let t = table(vec![entry("a", vec![0, 1])], 1);
    let mut doc = t.to_document().unwrap();
    doc["entries"][0]["partitions"] = serde_json::json!([0, 5]);
    assert!(RouterTable::from_document(doc).is_err());
}

#[test]
fn add_entries_keeps_coverage_and_bumps_revision() {
    let t = table(vec![entry("a", vec![0, 1, 2, 3])], 1);
    let mut grown = t.clone();
    for round in 0..3 {
        let fresh = entry(&format!("n{}", round), vec![]);
        let next = grown.add_entries(vec![fresh]).unwrap();
        assert!(next.revision > grown.revision, "revision must strictly grow");
        assert_eq!(next.total_partitions, 4);
        assert_eq!(next.entries.len(), grown.entries.len() + 1);
        grown = next;
    }
}

#[test]
fn empty_service_keeps_provisioning_target() {
    let mut t = RouterTable::new("fresh").unwrap();
    t.total_partitions = 16;
    let doc = t.to_document().unwrap();
    let back = RouterTable::from_document(doc).unwrap();
    assert_eq!(back.total_partitions, 16);
    assert!(back.entries.is_empty());
    // but no partition is routable yet
    assert!(back.partition_entries(0).is_err());
}
