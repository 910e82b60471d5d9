//! HTTP companion API: authentication, routing, and server lifecycle
//! for the desktop-facing control surface.
//!
//! `build_router` returns a `Router` already layered with the HMAC
//! authentication middleware; `start_http_server` binds it to a socket
//! and runs it to completion.

pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::build_router;
pub use server::{start_http_server, HttpServer};
pub use types::ApiContext;
