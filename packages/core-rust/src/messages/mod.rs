//! Wire messages for the binary RPC front-end.
//!
//! Frames carry named `MsgPack` (`rmp_serde::to_vec_named()`) with camelCase
//! field names. Params and outputs travel as JSON text inside the frame so the
//! RPC and REST paths hand handlers identical values.

pub mod rpc;

pub use rpc::{RpcRequest, RpcResponse};
