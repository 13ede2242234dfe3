//! Interception gateway.
//!
//! A forward proxy that terminates TLS for registry hosts and runs every
//! request inside those tunnels through a [`RequestInterceptor`] before
//! forwarding it:
//!
//! ```text
//!  tool ──CONNECT registry:443──▶ gateway ──TLS──▶ registry
//!                                   │
//!                                   ├─ hook: tarball? ─▶ FreshnessPolicy
//!                                   │         block ──▶ Error signal + 403
//!                                   └─ GET /__proxy_ping ─▶ 200 PONG
//! ```
//!
//! Other CONNECT targets are relayed untouched. The gateway runs as its
//! own process, started by the supervisor via [`runner::run_gateway`].

pub mod connect;
mod error;
pub mod hook;
pub mod runner;
pub mod server;
pub mod tls;

pub use error::GatewayError;
pub use hook::{FreshnessHook, InterceptAction, RequestHead, RequestInterceptor};
pub use runner::run_gateway;
pub use server::{GatewayContext, GatewayServer};

/// Path of the liveness probe endpoint.
pub const PING_PATH: &str = "/__proxy_ping";

/// Body the liveness probe answers with.
pub const PING_TOKEN: &str = "PONG";
