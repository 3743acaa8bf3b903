//! Concurrency strategies for the RPC listener.
//!
//! A strategy decides which runtime the supervisor thread builds and how
//! accepted connections are driven:
//!
//! | Strategy               | Runtime                          | Per connection                     |
//! |------------------------|----------------------------------|------------------------------------|
//! | `Threaded`             | current-thread (accept loop)     | dedicated OS thread + own runtime  |
//! | `NonBlocking`          | multi-thread, `selector_threads` | task on the shared runtime         |
//! | `HalfSyncHalfAsync`    | multi-thread, `selector_threads` | task; dispatch capped at `worker_threads` |

use std::fmt;
use std::str::FromStr;

use tokio::runtime::{Builder, Runtime};

use super::config::RpcConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerStrategy {
    /// One blocking-style worker thread per connection.
    Threaded,
    /// Multiplexed I/O on a small pool of selector threads.
    #[default]
    NonBlocking,
    /// Multiplexed I/O with calls handed to a bounded worker pool.
    HalfSyncHalfAsync,
}

impl ServerStrategy {
    /// Builds the runtime that hosts the accept loop for this strategy.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the runtime builder.
    pub fn build_runtime(self, config: &RpcConfig) -> std::io::Result<Runtime> {
        match self {
            Self::Threaded => Builder::new_current_thread()
                .thread_name("frontapi-rpc-acceptor")
                .enable_all()
                .build(),
            Self::NonBlocking | Self::HalfSyncHalfAsync => Builder::new_multi_thread()
                .worker_threads(config.selector_threads.max(1))
                .thread_name("frontapi-rpc-selector")
                .enable_all()
                .build(),
        }
    }

    /// Size of the dispatch pool, if calls are throttled separately from I/O.
    #[must_use]
    pub fn dispatch_permits(self, config: &RpcConfig) -> Option<usize> {
        match self {
            Self::HalfSyncHalfAsync => Some(config.worker_threads.max(1)),
            Self::Threaded | Self::NonBlocking => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Threaded => "threaded",
            Self::NonBlocking => "non-blocking",
            Self::HalfSyncHalfAsync => "half-sync-half-async",
        }
    }
}

impl fmt::Display for ServerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rpc strategy '{0}' (expected threaded, non-blocking or half-sync-half-async)")]
pub struct UnknownStrategy(pub String);

impl FromStr for ServerStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "threaded" => Ok(Self::Threaded),
            "non-blocking" | "nonblocking" => Ok(Self::NonBlocking),
            "half-sync-half-async" | "hsha" => Ok(Self::HalfSyncHalfAsync),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}
