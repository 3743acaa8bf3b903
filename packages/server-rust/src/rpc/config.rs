//! RPC listener configuration.

#[cfg(test)]
use std::sync::Arc;
use std::time::Duration;

use super::strategy::ServerStrategy;

pub const DEFAULT_RPC_PORT: u16 = 9090;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;
pub const DEFAULT_MAX_READ_BUFFER_SIZE: usize = 16_777_216;
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
    /// Idle time after which a connection with no complete frame is closed.
    pub client_timeout: Duration,
    /// Largest accepted frame; a longer length prefix closes the connection.
    pub max_frame_size: usize,
    /// Bytes of request frames that may be held across all connections.
    pub max_read_buffer_size: usize,
    pub strategy: ServerStrategy,
    /// I/O threads for the multiplexed strategies.
    pub selector_threads: usize,
    /// Dispatch slots for `HalfSyncHalfAsync`.
    pub worker_threads: usize,
    /// Pause between a crash and the next generation. Zero restarts at once.
    pub restart_delay: Duration,
    /// Each notification fails one accept in the running generation.
    #[cfg(test)]
    pub(crate) accept_fault: Arc<tokio::sync::Notify>,
}

impl RpcConfig {
    /// Maps the boolean switch onto a strategy: `true` selects
    /// `NonBlocking`, `false` selects `Threaded`.
    #[must_use]
    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.strategy = if non_blocking {
            ServerStrategy::NonBlocking
        } else {
            ServerStrategy::Threaded
        };
        self
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_RPC_PORT,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_read_buffer_size: DEFAULT_MAX_READ_BUFFER_SIZE,
            strategy: ServerStrategy::NonBlocking,
            selector_threads: 2,
            worker_threads: 8,
            restart_delay: Duration::ZERO,
            #[cfg(test)]
            accept_fault: Arc::default(),
        }
    }
}
