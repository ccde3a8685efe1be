//! Single-threaded readiness loop driving every client/origin pair.
//!
//! # Responsibilities
//! - Accept clients into a bounded slot table (503 when full)
//! - Resolve and connect the origin for each client
//! - Move bytes between sockets and sessions without blocking
//! - Tear a pair down as a unit on completion or terminal error
//!
//! # Design Decisions
//! - Readiness is edge-triggered, so a serviced pair is driven until no
//!   step makes progress; a pair cut short by the round limit is queued
//!   and serviced again on the next iteration without waiting on poll
//! - Ready pairs are serviced in slot-index order
//! - Origin reads pause while the client has more than
//!   `max_pending_bytes` waiting, and resume once it drains
//! - The global best bitrate is owned here and lent to sessions

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use http::StatusCode;
use mio::{Events, Interest, Poll, Registry, Waker};
use socket2::{Domain, Protocol, Socket, Type};

use crate::abr::GlobalBest;
use crate::config::ProxyConfig;
use crate::http::error_response;
use crate::lifecycle::ShutdownHandle;
use crate::net::connection::{read_nonblocking, ConnectionId, ReadOutcome};
use crate::net::listener::{self, ListenerError};
use crate::net::slots::{Side, SlotKey, SlotTable, LISTENER_TOKEN, WAKER_TOKEN};
use crate::observability::metrics;
use crate::resolver::{Lookup, Resolver};
use crate::session::{ClientSession, SessionError};

/// Steps a pair may take in one service call before yielding.
const MAX_ROUNDS: usize = 32;

/// How long an error page may take to reach a slow client.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Poll wait while a lookup, connect or lingering close is outstanding.
const HOUSEKEEPING_TICK: Duration = Duration::from_millis(10);

/// Error type for server setup and the loop itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("event loop: {0}")]
    Io(#[from] io::Error),
}

/// What one poll produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadySet {
    /// The listener has clients waiting.
    pub listener: bool,
    /// The shutdown waker fired.
    pub wake: bool,
    /// Live pairs with socket activity, sorted by slot index.
    pub sessions: Vec<SlotKey>,
}

enum OriginLink {
    Resolving { deadline: Instant },
    Connecting { stream: TcpStream, addr: SocketAddr, deadline: Instant },
    Connected { stream: TcpStream, addr: SocketAddr },
    Closed,
}

impl OriginLink {
    fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        match self {
            OriginLink::Connecting { stream, .. } | OriginLink::Connected { stream, .. } => Some(stream),
            OriginLink::Resolving { .. } | OriginLink::Closed => None,
        }
    }
}

enum Serviced {
    Idle,
    MoreWork,
    Done,
}

/// How a pair proceeds after a terminal error.
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    /// Close both sockets now.
    Close,
    /// Error page queued; lingering until it is delivered.
    Linger,
    /// Earlier replies are still owed; the page follows them.
    Deferred,
}

/// Loop state lent to a pair while it is serviced.
struct Shared<R> {
    config: ProxyConfig,
    resolver: R,
    global_best: GlobalBest,
    scratch: Vec<u8>,
}

/// A client socket, its origin socket, and the session between them.
struct Pair {
    session: ClientSession,
    client: TcpStream,
    peer: SocketAddr,
    origin: OriginLink,
    client_eof: bool,
    drain_deadline: Option<Instant>,
    write_shut: bool,
    /// Error page held back until the replies ahead of it are relayed.
    deferred_error: Option<StatusCode>,
}

impl Pair {
    fn needs_housekeeping(&self) -> bool {
        self.drain_deadline.is_some()
            || matches!(
                self.origin,
                OriginLink::Resolving { .. } | OriginLink::Connecting { .. }
            )
    }

    fn service<R: Resolver>(
        &mut self,
        key: SlotKey,
        shared: &mut Shared<R>,
        registry: &Registry,
        now: Instant,
    ) -> Result<Serviced, SessionError> {
        if self.drain_deadline.is_some() {
            return Ok(if self.linger(shared, now)? {
                Serviced::Done
            } else {
                Serviced::Idle
            });
        }

        for _ in 0..MAX_ROUNDS {
            let mut progress = self.read_client(shared)?;
            self.session.process_requests(&mut shared.global_best, now)?;
            progress |= self.advance_origin(key, shared, registry, now)?;
            progress |= self.flush_origin()?;
            progress |= self.read_origin(shared, now)?;
            progress |= self.flush_client()?;

            if let Some(status) = self.deferred_error {
                if !self.client_eof && self.session.origin().is_idle() {
                    self.deferred_error = None;
                    return Ok(if self.send_error_page(status, shared, now) {
                        Serviced::Done
                    } else {
                        Serviced::Idle
                    });
                }
            }
            if self.is_complete() {
                return Ok(Serviced::Done);
            }
            if !progress {
                return Ok(Serviced::Idle);
            }
        }
        Ok(Serviced::MoreWork)
    }

    /// A client that hung up takes its origin socket with it.
    fn is_complete(&self) -> bool {
        self.client_eof || self.session.is_finished()
    }

    fn read_client<R>(&mut self, shared: &mut Shared<R>) -> Result<bool, SessionError> {
        if self.client_eof {
            return Ok(false);
        }
        let room = self.session.read_capacity().min(shared.scratch.len());
        if room == 0 {
            return Ok(false);
        }

        match read_nonblocking(&mut self.client, &mut shared.scratch[..room])? {
            ReadOutcome::Data(n) => {
                self.session.store(&shared.scratch[..n])?;
                Ok(true)
            }
            ReadOutcome::WouldBlock => Ok(false),
            ReadOutcome::Closed => {
                tracing::debug!(connection_id = %self.session.id(), "Client closed its side");
                self.client_eof = true;
                Ok(true)
            }
        }
    }

    fn advance_origin<R: Resolver>(
        &mut self,
        key: SlotKey,
        shared: &mut Shared<R>,
        registry: &Registry,
        now: Instant,
    ) -> Result<bool, SessionError> {
        let origin = &shared.config.origin;
        let timeout = Duration::from_millis(origin.resolve_timeout_ms);

        match std::mem::replace(&mut self.origin, OriginLink::Closed) {
            OriginLink::Resolving { deadline } => {
                let lookup = shared
                    .resolver
                    .resolve(&origin.host)
                    .map_err(|e| SessionError::Upstream(e.to_string()))?;
                match lookup {
                    Lookup::Ready(ip) => {
                        let addr = SocketAddr::new(ip, origin.port);
                        let mut stream = connect_origin(addr, origin.bind_ip)
                            .map_err(|e| SessionError::Upstream(format!("connect to {addr}: {e}")))?;
                        registry.register(
                            &mut stream,
                            key.token(Side::Origin),
                            Interest::READABLE | Interest::WRITABLE,
                        )?;
                        self.session.set_origin_addr(ip);
                        tracing::debug!(connection_id = %self.session.id(), origin = %addr, "Connecting to origin");
                        self.origin = OriginLink::Connecting {
                            stream,
                            addr,
                            deadline: now + timeout,
                        };
                        Ok(true)
                    }
                    Lookup::Pending if now >= deadline => Err(SessionError::Upstream(format!(
                        "resolving `{}` timed out",
                        origin.host
                    ))),
                    Lookup::Pending => {
                        self.origin = OriginLink::Resolving { deadline };
                        Ok(false)
                    }
                }
            }
            OriginLink::Connecting { stream, addr, deadline } => {
                match stream.take_error() {
                    Ok(None) => {}
                    Ok(Some(e)) | Err(e) => {
                        return Err(SessionError::Upstream(format!("connect to {addr}: {e}")));
                    }
                }
                match stream.peer_addr() {
                    Ok(_) => {
                        tracing::debug!(connection_id = %self.session.id(), origin = %addr, "Origin connected");
                        self.origin = OriginLink::Connected { stream, addr };
                        Ok(true)
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotConnected && now < deadline => {
                        self.origin = OriginLink::Connecting { stream, addr, deadline };
                        Ok(false)
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => Err(SessionError::Upstream(
                        format!("connect to {addr} timed out"),
                    )),
                    Err(e) => Err(SessionError::Upstream(format!("connect to {addr}: {e}"))),
                }
            }
            OriginLink::Closed if self.session.pending_upstream() > 0 => {
                // A new request after the origin hung up on an idle connection.
                self.origin = OriginLink::Resolving {
                    deadline: now + timeout,
                };
                Ok(true)
            }
            link => {
                self.origin = link;
                Ok(false)
            }
        }
    }

    fn flush_origin(&mut self) -> Result<bool, SessionError> {
        let OriginLink::Connected { stream, .. } = &mut self.origin else {
            return Ok(false);
        };
        let written = self
            .session
            .upstream_mut()
            .flush_to(stream)
            .map_err(|e| SessionError::Upstream(format!("write to origin: {e}")))?;
        Ok(written > 0)
    }

    fn read_origin<R>(&mut self, shared: &mut Shared<R>, now: Instant) -> Result<bool, SessionError> {
        let OriginLink::Connected { stream, addr } = &mut self.origin else {
            return Ok(false);
        };
        if self.session.pending_downstream() >= shared.config.buffers.max_pending_bytes {
            return Ok(false);
        }
        let room = self.session.origin().read_capacity().min(shared.scratch.len());
        if room == 0 {
            return Ok(false);
        }

        let outcome = read_nonblocking(stream, &mut shared.scratch[..room])
            .map_err(|e| SessionError::Upstream(format!("read from origin: {e}")))?;
        match outcome {
            ReadOutcome::Data(n) => {
                self.session
                    .process_origin_bytes(&shared.scratch[..n], &mut shared.global_best, now)?;
                Ok(true)
            }
            ReadOutcome::WouldBlock => Ok(false),
            ReadOutcome::Closed if self.session.origin().is_idle() => {
                tracing::debug!(connection_id = %self.session.id(), origin = %addr, "Origin closed idle connection");
                self.origin = OriginLink::Closed;
                Ok(true)
            }
            ReadOutcome::Closed => Err(SessionError::Upstream(format!(
                "origin {addr} closed with a response outstanding"
            ))),
        }
    }

    fn flush_client(&mut self) -> Result<bool, SessionError> {
        let written = self.session.downstream_mut().flush_to(&mut self.client)?;
        Ok(written > 0)
    }

    /// Deliver the error page, then discard client input until the client
    /// hangs up or the grace period ends. Returns true when the pair can go.
    fn linger<R>(&mut self, shared: &mut Shared<R>, now: Instant) -> Result<bool, SessionError> {
        let expired = self.drain_deadline.is_some_and(|deadline| now >= deadline);

        self.flush_client()?;
        if self.session.pending_downstream() > 0 {
            return Ok(expired);
        }

        if !self.write_shut {
            // Closing with unread input resets the connection, which can
            // discard the error page before the client reads it.
            let _ = self.client.shutdown(std::net::Shutdown::Write);
            self.write_shut = true;
        }

        for _ in 0..MAX_ROUNDS {
            match read_nonblocking(&mut self.client, &mut shared.scratch)? {
                ReadOutcome::Data(_) => continue,
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Closed => return Ok(true),
            }
        }
        Ok(expired)
    }

    /// Handle a terminal error.
    ///
    /// The client gets at most one error page, and only where a response
    /// can start: never inside a relayed body, never ahead of replies to
    /// earlier pipelined requests.
    fn fail<R>(&mut self, error: SessionError, shared: &mut Shared<R>, now: Instant) -> Failure {
        metrics::record_session_error(error.kind());

        let Some(status) = error.response_status() else {
            tracing::debug!(connection_id = %self.session.id(), peer = %self.peer, error = %error, "Client connection lost");
            return Failure::Close;
        };

        tracing::warn!(
            connection_id = %self.session.id(),
            peer = %self.peer,
            status = status.as_u16(),
            error = %error,
            "Session failed"
        );

        let client_side = matches!(error, SessionError::Protocol(_));
        if client_side && !self.session.origin().is_idle() {
            self.session.abandon_input();
            self.deferred_error = Some(status);
            return Failure::Deferred;
        }

        if self.session.origin().is_relaying() {
            tracing::debug!(connection_id = %self.session.id(), "Response already under way; closing without an error page");
            return Failure::Close;
        }

        if self.send_error_page(status, shared, now) {
            Failure::Close
        } else {
            Failure::Linger
        }
    }

    /// Queue the error page and start the lingering close. Returns true
    /// when the pair can go now.
    fn send_error_page<R>(&mut self, status: StatusCode, shared: &mut Shared<R>, now: Instant) -> bool {
        self.session.downstream_mut().push(&error_response(status));
        self.drain_deadline = Some(now + DRAIN_GRACE);

        self.linger(shared, now).unwrap_or(true)
    }
}

/// Open a non-blocking connection to the origin, optionally from a fixed
/// local address.
fn connect_origin(addr: SocketAddr, bind_ip: Option<IpAddr>) -> io::Result<TcpStream> {
    let Some(local) = bind_ip else {
        return TcpStream::connect(addr);
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(local, 0).into())?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if connect_in_progress(&e) => {}
        Err(e) => return Err(e),
    }
    Ok(TcpStream::from_std(socket.into()))
}

#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// The proxy: listener, poll, and every live pair.
pub struct ProxyServer<R: Resolver = Box<dyn Resolver>> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    slots: SlotTable<Pair>,
    backlog: Vec<SlotKey>,
    shared: Shared<R>,
    shutdown: ShutdownHandle,
}

impl<R: Resolver> ProxyServer<R> {
    /// Bind the listener and prepare the loop. Nothing is accepted until
    /// `run` or `run_once`.
    pub fn bind(config: ProxyConfig, resolver: R) -> Result<Self, ServerError> {
        let poll = Poll::new()?;
        let mut listener = listener::bind(&config.listener)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            events: Events::with_capacity(config.event_loop.events_capacity),
            slots: SlotTable::with_capacity(config.listener.max_connections),
            backlog: Vec::new(),
            shutdown: ShutdownHandle::new(waker),
            shared: Shared {
                scratch: vec![0; config.buffers.read_chunk],
                global_best: GlobalBest::new(),
                resolver,
                config,
            },
            poll,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.slots.len()
    }

    pub fn global_best(&self) -> Option<u32> {
        self.shared.global_best.get()
    }

    /// Run until the shutdown handle is triggered.
    pub fn run(&mut self) -> Result<(), ServerError> {
        tracing::info!(
            address = %self.local_addr,
            origin = %self.shared.config.origin.host,
            origin_port = self.shared.config.origin.port,
            max_connections = self.slots.capacity(),
            "Proxy running"
        );

        while !self.shutdown.is_triggered() {
            self.run_once()?;
        }

        for key in self.slots.keys() {
            self.teardown(key);
        }
        tracing::info!("Proxy stopped");
        Ok(())
    }

    /// One poll, then accept, service ready pairs, and do housekeeping.
    pub fn run_once(&mut self) -> Result<(), ServerError> {
        let ready = self.poll_ready()?;
        let now = Instant::now();

        if ready.listener {
            if let Err(e) = self.accept_clients(now) {
                tracing::error!(error = %e, "Accept failed");
            }
        }

        for key in ready.sessions {
            self.service_key(key, now);
        }

        let pending: Vec<SlotKey> = self
            .slots
            .keys()
            .into_iter()
            .filter(|key| self.slots.get(*key).is_some_and(Pair::needs_housekeeping))
            .collect();
        for key in pending {
            self.service_key(key, now);
        }
        Ok(())
    }

    /// Wait for readiness and report it, pairs sorted by slot index.
    pub fn poll_ready(&mut self) -> Result<ReadySet, ServerError> {
        let configured = Duration::from_millis(self.shared.config.event_loop.poll_timeout_ms);
        let timeout = if !self.backlog.is_empty() {
            Duration::ZERO
        } else if self
            .slots
            .keys()
            .iter()
            .any(|key| self.slots.get(*key).is_some_and(Pair::needs_housekeeping))
        {
            configured.min(HOUSEKEEPING_TICK)
        } else {
            configured
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(ReadySet::default()),
            Err(e) => return Err(e.into()),
        }

        let mut ready = ReadySet::default();
        let mut sessions = std::mem::take(&mut self.backlog);
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => ready.listener = true,
                WAKER_TOKEN => ready.wake = true,
                token => {
                    if let Some((key, _side)) = SlotKey::from_token(token) {
                        sessions.push(key);
                    }
                }
            }
        }

        sessions.retain(|key| self.slots.contains(*key));
        sessions.sort_by_key(SlotKey::index);
        sessions.dedup();
        ready.sessions = sessions;
        Ok(ready)
    }

    /// Accept every waiting client. Clients beyond capacity get a 503.
    pub fn accept_clients(&mut self, now: Instant) -> Result<usize, ServerError> {
        let mut admitted = Vec::new();

        for (stream, peer) in listener::accept_pending(&self.listener)? {
            if self.slots.is_full() {
                reject(stream, peer);
                continue;
            }

            let config = &self.shared.config;
            let id = ConnectionId::new();
            let pair = Pair {
                session: ClientSession::new(id, &config.abr, &config.buffers),
                client: stream,
                peer,
                origin: OriginLink::Resolving {
                    deadline: now + Duration::from_millis(config.origin.resolve_timeout_ms),
                },
                client_eof: false,
                drain_deadline: None,
                write_shut: false,
                deferred_error: None,
            };

            let key = match self.slots.insert(pair) {
                Ok(key) => key,
                Err(pair) => {
                    reject(pair.client, peer);
                    continue;
                }
            };

            let registry = self.poll.registry();
            let registered = match self.slots.get_mut(key) {
                Some(pair) => registry.register(
                    &mut pair.client,
                    key.token(Side::Client),
                    Interest::READABLE | Interest::WRITABLE,
                ),
                None => continue,
            };
            if let Err(e) = registered {
                tracing::warn!(peer = %peer, error = %e, "Failed to register client");
                self.slots.remove(key);
                continue;
            }

            tracing::debug!(connection_id = %id, peer = %peer, "Client connected");
            admitted.push(key);
        }

        metrics::set_active_sessions(self.slots.len());
        let count = admitted.len();
        for key in admitted {
            self.service_key(key, now);
        }
        Ok(count)
    }

    /// Close both sockets of a pair and free its slot.
    pub fn teardown(&mut self, key: SlotKey) {
        let Some(mut pair) = self.slots.remove(key) else {
            return;
        };

        let registry = self.poll.registry();
        // Deregistration only fails for sockets the poll never saw.
        let _ = registry.deregister(&mut pair.client);
        if let Some(stream) = pair.origin.stream_mut() {
            let _ = registry.deregister(stream);
        }

        tracing::debug!(
            connection_id = %pair.session.id(),
            peer = %pair.peer,
            "Session closed"
        );
        metrics::set_active_sessions(self.slots.len());
    }

    fn service_key(&mut self, key: SlotKey, now: Instant) {
        let registry = self.poll.registry();
        let Some(pair) = self.slots.get_mut(key) else {
            return;
        };

        let finished = match pair.service(key, &mut self.shared, registry, now) {
            Ok(Serviced::Idle) => false,
            Ok(Serviced::MoreWork) => {
                if !self.backlog.contains(&key) {
                    self.backlog.push(key);
                }
                false
            }
            Ok(Serviced::Done) => true,
            Err(error) => match pair.fail(error, &mut self.shared, now) {
                Failure::Close => true,
                Failure::Linger => false,
                Failure::Deferred => {
                    // Origin bytes may already be waiting; readiness will not fire again.
                    if !self.backlog.contains(&key) {
                        self.backlog.push(key);
                    }
                    false
                }
            },
        };

        if finished {
            self.teardown(key);
        }
    }
}

/// Turn away a client the table has no room for.
fn reject(mut stream: TcpStream, peer: SocketAddr) {
    use std::io::Write;

    metrics::record_rejected_connection();
    let error = SessionError::ResourceExhausted;
    tracing::warn!(peer = %peer, error = %error, "Connection table full; rejecting client");
    if let Some(status) = error.response_status() {
        // Best effort: a fresh socket's send buffer has room for the page.
        let _ = stream.write_all(&error_response(status));
    }
}
