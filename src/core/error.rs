use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("Bad router table: {0}")]
    BadTable(String),

    #[error("Stale router table revision {proposed} (current is {current})")]
    StaleRevision { proposed: i64, current: i64 },

    #[error("Partition {0} is out of range ({1} total)")]
    PartitionOutOfRange(u32, u32),

    #[error("No router table available")]
    NoRouterTable,

    #[error("Router table is out of date, please update")]
    RouterTableOld,

    #[error("Remote router table is out of date, please send")]
    SendRouterTable,

    #[error("Partition {0} is locked")]
    PartitionLocked(u32),

    #[error("Partition {0} does not live on this node")]
    NotMyPartition(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("I/0 error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ShardError>;

impl ShardError {
    /// Wire status code for errors that are part of the shard protocol.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ShardError::RouterTableOld => Some(crate::wire::E_ROUTER_TABLE_OLD),
            ShardError::SendRouterTable => Some(crate::wire::E_SEND_ROUTER_TABLE),
            ShardError::PartitionLocked(_) => Some(crate::wire::E_PARTITION_LOCKED),
            ShardError::NotMyPartition(_) => Some(crate::wire::E_NOT_MY_PARTITION),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ShardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
