//! HTTP/JSON surface (feature `rpc`).
//!
//! - [`create_router`]: axum routes per service, SSE change streams
//! - [`serve`]: bind and serve until the shutdown token fires
//! - [`types`]: request and response bodies
//!
//! Errors use the status table: validation 400, not found 404, conflict and
//! stale 409, process 500, connection lost 503.

mod error;
mod handlers;
mod routes;
mod server;
pub mod types;

pub use error::{status_of, RpcServerError};
pub use handlers::RpcState;
pub use routes::create_router;
pub use server::serve;
