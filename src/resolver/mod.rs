//! Origin name resolution.
//!
//! # Responsibilities
//! - Turn the configured origin host into an address
//! - Never block the event loop: a lookup in progress reports `Pending`
//!
//! # Design Decisions
//! - The loop re-polls pending lookups once per iteration; a pending lookup
//!   stalls only the session waiting on it
//! - A fixed `www_ip` bypasses resolution entirely

pub mod fixed;
pub mod system;

use std::net::IpAddr;

use crate::config::OriginConfig;

pub use fixed::FixedResolver;
pub use system::SystemResolver;

/// Result of asking for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Ready(IpAddr),
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no addresses found for `{0}`")]
    NoAddress(String),
    #[error("lookup of `{host}` failed: {reason}")]
    Failed { host: String, reason: String },
}

/// Source of origin addresses.
pub trait Resolver: Send {
    fn resolve(&mut self, host: &str) -> Result<Lookup, ResolveError>;
}

impl<R: Resolver + ?Sized> Resolver for Box<R> {
    fn resolve(&mut self, host: &str) -> Result<Lookup, ResolveError> {
        (**self).resolve(host)
    }
}

/// Pick the resolver the origin configuration asks for.
pub fn from_config(origin: &OriginConfig) -> Box<dyn Resolver> {
    match origin.www_ip {
        Some(ip) => Box::new(FixedResolver::new(ip)),
        None => Box::new(SystemResolver::new()),
    }
}
