use std::time::Duration;

/// Transport failures on the RPC wire, shared by the server and the client.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("frame of {len} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame of {len} bytes exceeds the read buffer budget of {budget} bytes")]
    FrameExceedsBudget { len: usize, budget: usize },
}
