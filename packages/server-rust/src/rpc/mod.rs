//! RPC front-end: framed `MsgPack` `callApi` over TCP, run under a
//! supervisor that restarts the listener when it dies.

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod server;
pub mod strategy;
pub mod supervisor;

pub use config::RpcConfig;
pub use connection::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use error::RpcError;
pub use handler::JsonApiHandler;
pub use server::{frame_codec, RpcServer};
pub use strategy::{ServerStrategy, UnknownStrategy};
pub use supervisor::{supervise, Binding, RpcMonitor, RpcSupervisor, SupervisorState};
