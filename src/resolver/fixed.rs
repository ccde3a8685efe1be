//! Resolver that always answers with one configured address.

use std::net::IpAddr;

use super::{Lookup, ResolveError, Resolver};

#[derive(Debug, Clone, Copy)]
pub struct FixedResolver {
    addr: IpAddr,
}

impl FixedResolver {
    pub fn new(addr: IpAddr) -> Self {
        Self { addr }
    }
}

impl Resolver for FixedResolver {
    fn resolve(&mut self, _host: &str) -> Result<Lookup, ResolveError> {
        Ok(Lookup::Ready(self.addr))
    }
}
