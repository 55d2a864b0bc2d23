use std::time::Duration;

/// Wire framing used when talking to an entry.
///
/// A closed set selected by configuration at client-creation time; framing
/// itself lives in the transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireProtocol {
    #[default]
    Json,
    Binary,
}

impl WireProtocol {
    /// The entry port this protocol dials.
    pub fn port(&self, ports: &crate::routing::EntryPorts) -> u16 {
        match self {
            WireProtocol::Json => ports.json,
            WireProtocol::Binary => ports.binary,
        }
    }
}

/// Shard client configuration
///
/// Controls how clients to individual entries are created and sized.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Wire framing to use against entries
    pub protocol: WireProtocol,

    /// Connections kept per entry
    pub pool_size: usize,

    /// Maximum requests in flight per entry
    pub max_in_flight: usize,

    /// Timeout for establishing a connection
    pub connect_timeout: Duration,

    /// Timeout for a single routed call
    pub call_timeout: Duration,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            protocol: WireProtocol::Json,
            pool_size: 5,
            max_in_flight: 250,
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(15),
        }
    }

    /// Sizing used by gateway proxies: larger pool, much deeper in-flight
    /// budget.
    pub fn proxy() -> Self {
        Self::new().pool_size(25).max_in_flight(10_000)
    }

    /// Set the wire protocol
    pub fn protocol(mut self, protocol: WireProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the pool size
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the in-flight budget
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-call timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("pool_size must be > 0".to_string());
        }
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
