//! Non-blocking TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept every pending client without blocking
//! - Graceful handling of accept errors

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Bind a non-blocking listener on the configured address.
pub fn bind(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| ListenerError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let listener = TcpListener::bind(addr).map_err(ListenerError::Bind)?;
    tracing::info!(address = %addr, "Listener bound");
    Ok(listener)
}

/// Accept every connection currently queued on the listener.
///
/// Transient per-connection failures (a peer that reset before we got to
/// it) are logged and skipped; anything else ends the batch with an error.
pub fn accept_pending(listener: &TcpListener) -> Result<Vec<(TcpStream, SocketAddr)>, ListenerError> {
    let mut accepted = Vec::new();
    loop {
        match listener.accept() {
            Ok(pair) => accepted.push(pair),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_transient(&e) => {
                tracing::debug!(error = %e, "Dropped connection during accept");
            }
            Err(e) => return Err(ListenerError::Accept(e)),
        }
    }
    Ok(accepted)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}
