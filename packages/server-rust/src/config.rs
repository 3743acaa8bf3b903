//! Gateway configuration and its command-line/env surface.

use std::time::Duration;

use clap::Parser;

use crate::network::NetworkConfig;
use crate::rpc::{RpcConfig, ServerStrategy};

/// Everything [`Gateway`](crate::gateway::Gateway) needs to come up.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    /// `None` leaves the RPC front-end off.
    pub rpc: Option<RpcConfig>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("rpc max frame size ({frame}) exceeds the read buffer size ({buffer})")]
    FrameLargerThanBuffer { frame: usize, buffer: usize },

    #[error("rest port and rpc port are both {0}")]
    PortClash(u16),
}

impl GatewayConfig {
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        nonzero("max body bytes", self.network.max_body_bytes)?;
        let Some(rpc) = &self.rpc else {
            return Ok(());
        };

        nonzero("rpc max frame size", rpc.max_frame_size)?;
        nonzero("rpc max read buffer size", rpc.max_read_buffer_size)?;
        nonzero("rpc selector threads", rpc.selector_threads)?;
        nonzero("rpc worker threads", rpc.worker_threads)?;
        if rpc.client_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "rpc client timeout",
            });
        }
        if rpc.max_frame_size > rpc.max_read_buffer_size {
            return Err(ConfigError::FrameLargerThanBuffer {
                frame: rpc.max_frame_size,
                buffer: rpc.max_read_buffer_size,
            });
        }
        if rpc.port != 0 && rpc.port == self.network.port {
            return Err(ConfigError::PortClash(rpc.port));
        }
        Ok(())
    }
}

fn nonzero(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { name })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "frontapi-server", version, about = "FrontAPI gateway: REST and RPC front-ends over one call registry")]
pub struct Cli {
    /// Bind address for both listeners.
    #[arg(long, env = "FRONTAPI_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// REST port.
    #[arg(long, env = "FRONTAPI_PORT", default_value_t = 8080)]
    pub port: u16,

    /// URL prefix of the REST front-end. Blank falls back to `/api`.
    #[arg(long, env = "FRONTAPI_REST_MAPPING", default_value = "/api")]
    pub rest_mapping: String,

    /// Largest accepted POST body, in bytes.
    #[arg(long, env = "FRONTAPI_MAX_BODY_BYTES", default_value_t = 1_048_576)]
    pub max_body_bytes: usize,

    /// Start the RPC front-end.
    #[arg(long, env = "FRONTAPI_RPC_ENABLED")]
    pub rpc_enabled: bool,

    #[arg(long, env = "FRONTAPI_RPC_PORT", default_value_t = 9090)]
    pub rpc_port: u16,

    #[arg(long, default_value_t = 1_048_576)]
    pub rpc_max_frame_size: usize,

    #[arg(long, default_value_t = 16_777_216)]
    pub rpc_max_read_buffer_size: usize,

    /// Idle time before an RPC connection is closed, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub rpc_client_timeout_ms: u64,

    /// threaded, non-blocking or half-sync-half-async.
    #[arg(long, default_value = "non-blocking")]
    pub rpc_strategy: ServerStrategy,

    #[arg(long, default_value_t = 2)]
    pub rpc_selector_threads: usize,

    /// Dispatch slots for half-sync-half-async.
    #[arg(long, default_value_t = 8)]
    pub rpc_worker_threads: usize,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Register the `demo` module.
    #[arg(long)]
    pub demo: bool,
}

impl Cli {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the combination is invalid.
    pub fn to_config(&self) -> Result<GatewayConfig, ConfigError> {
        let network = NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            rest_mapping: self.rest_mapping.clone(),
            max_body_bytes: self.max_body_bytes,
            ..NetworkConfig::default()
        };

        let rpc = self.rpc_enabled.then(|| RpcConfig {
            host: self.host.clone(),
            port: self.rpc_port,
            client_timeout: Duration::from_millis(self.rpc_client_timeout_ms),
            max_frame_size: self.rpc_max_frame_size,
            max_read_buffer_size: self.rpc_max_read_buffer_size,
            strategy: self.rpc_strategy,
            selector_threads: self.rpc_selector_threads,
            worker_threads: self.rpc_worker_threads,
            ..RpcConfig::default()
        });

        let config = GatewayConfig { network, rpc };
        config.validate()?;
        Ok(config)
    }
}
