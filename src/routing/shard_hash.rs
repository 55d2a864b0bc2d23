/// Joins partition-key values into the shard key, in declared key order.
/// Missing values must be passed as empty strings so the key stays stable.
pub fn shard_key(values: &[&str]) -> String {
    values.join("|")
}

/// Hashes a shard key into a partition index using FNV-1a.
///
/// Ensures stable placement across the cluster given a fixed partition count.
pub fn partition_for_key(key: &str, total_partitions: u32) -> u32 {
    if total_partitions == 0 {
        return 0;
    }
    let mut hash = 14695981039346656037u64;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % total_partitions as u64) as u32
}
