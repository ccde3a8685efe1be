//! Resolver backed by the system's name service.
//!
//! `getaddrinfo` blocks, so each host is looked up on a short-lived worker
//! thread and the answer collected on a later `resolve` call.
//!
//! One resolver serves every session, and a lookup in flight is shared by
//! all callers asking for the same host. Threads therefore scale with
//! distinct hosts, not with clients. Workers are detached; a slow one keeps
//! its host pending until it answers.

use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use super::{Lookup, ResolveError, Resolver};

/// How long a successful answer is reused.
const CACHE_TTL: Duration = Duration::from_secs(30);

enum Entry {
    InFlight(Receiver<Result<IpAddr, ResolveError>>),
    Resolved { addr: IpAddr, at: Instant },
}

#[derive(Default)]
pub struct SystemResolver {
    entries: HashMap<String, Entry>,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&mut self, host: &str) {
        let (tx, rx) = mpsc::channel();
        let owned = host.to_string();
        std::thread::spawn(move || {
            // The receiver may be gone if the resolver was dropped.
            let _ = tx.send(lookup_blocking(&owned));
        });
        self.entries.insert(host.to_string(), Entry::InFlight(rx));
    }
}

impl Resolver for SystemResolver {
    fn resolve(&mut self, host: &str) -> Result<Lookup, ResolveError> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(Lookup::Ready(addr));
        }

        let outcome = match self.entries.get(host) {
            None => None,
            Some(Entry::Resolved { addr, at }) if at.elapsed() < CACHE_TTL => {
                return Ok(Lookup::Ready(*addr));
            }
            Some(Entry::Resolved { .. }) => None,
            Some(Entry::InFlight(rx)) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return Ok(Lookup::Pending),
                Err(TryRecvError::Disconnected) => Some(Err(ResolveError::Failed {
                    host: host.to_string(),
                    reason: "lookup worker exited".into(),
                })),
            },
        };

        match outcome {
            None => {
                self.start(host);
                Ok(Lookup::Pending)
            }
            Some(Ok(addr)) => {
                tracing::debug!(host, %addr, "Resolved origin");
                self.entries
                    .insert(host.to_string(), Entry::Resolved { addr, at: Instant::now() });
                Ok(Lookup::Ready(addr))
            }
            Some(Err(e)) => {
                self.entries.remove(host);
                Err(e)
            }
        }
    }
}

fn lookup_blocking(host: &str) -> Result<IpAddr, ResolveError> {
    let mut addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|e| ResolveError::Failed {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .map(|sa| sa.ip())
        .collect::<Vec<_>>();
    // Prefer IPv4, the origin's usual family.
    addrs.sort_by_key(|ip| !ip.is_ipv4());
    addrs
        .into_iter()
        .next()
        .ok_or_else(|| ResolveError::NoAddress(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_eventually(resolver: &mut SystemResolver, host: &str) -> Result<IpAddr, ResolveError> {
        for _ in 0..500 {
            match resolver.resolve(host)? {
                Lookup::Ready(addr) => return Ok(addr),
                Lookup::Pending => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        panic!("lookup of {host} never completed");
    }

    #[test]
    fn literal_address_is_ready_immediately() {
        let mut resolver = SystemResolver::new();
        assert_eq!(
            resolver.resolve("127.0.0.1"),
            Ok(Lookup::Ready("127.0.0.1".parse().unwrap()))
        );
    }

    #[test]
    fn localhost_resolves_to_loopback() {
        let mut resolver = SystemResolver::new();
        assert_eq!(resolver.resolve("localhost"), Ok(Lookup::Pending));
        let addr = resolve_eventually(&mut resolver, "localhost").unwrap();
        assert!(addr.is_loopback());

        // Cached answers come back without a new lookup.
        assert_eq!(resolver.resolve("localhost"), Ok(Lookup::Ready(addr)));
    }

    #[test]
    fn callers_share_a_lookup_in_flight() {
        let mut resolver = SystemResolver::new();
        let (tx, rx) = mpsc::channel();
        resolver.entries.insert("origin.test".into(), Entry::InFlight(rx));

        assert_eq!(resolver.resolve("origin.test"), Ok(Lookup::Pending));
        assert_eq!(resolver.resolve("origin.test"), Ok(Lookup::Pending));

        // The original lookup is still the one being waited on.
        let addr: IpAddr = "10.0.0.7".parse().unwrap();
        tx.send(Ok(addr)).unwrap();
        assert_eq!(resolver.resolve("origin.test"), Ok(Lookup::Ready(addr)));
        assert_eq!(resolver.entries.len(), 1);
    }

    #[test]
    fn unknown_host_fails() {
        let mut resolver = SystemResolver::new();
        assert!(resolve_eventually(&mut resolver, "does-not-exist.invalid").is_err());
    }
}
