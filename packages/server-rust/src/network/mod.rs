//! REST front-end: listener lifecycle, handlers, middleware and shutdown.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use module::{build_router, NetworkModule};
pub use shutdown::*;
