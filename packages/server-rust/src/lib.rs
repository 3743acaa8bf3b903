//! `FrontAPI` server: call registry, REST and RPC front-ends, supervised RPC
//! listener, and clients for both wires.

pub mod client;
pub mod config;
pub mod demo;
pub mod gateway;
pub mod network;
pub mod registry;
pub mod rpc;

pub use config::{Cli, ConfigError, GatewayConfig};
pub use gateway::{BoundAddrs, Gateway};
pub use registry::ApiRegistry;
