pub mod entry;
pub mod router_table;
pub mod shard_hash;

pub use entry::{EntryPorts, RouterEntry};
pub use router_table::RouterTable;
