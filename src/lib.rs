//! Adaptive bitrate video proxy library.
//!
//! Sits between a video player and an origin server, measures per-client
//! throughput from segment transfers, and rewrites segment requests to the
//! bitrate the connection can sustain.

pub mod abr;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resolver;
pub mod session;

pub use config::schema::ProxyConfig;
pub use lifecycle::ShutdownHandle;
pub use net::event_loop::{ProxyServer, ReadySet, ServerError};
