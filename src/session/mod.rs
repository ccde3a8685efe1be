//! Per-client proxy sessions.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → client.rs (request framing, bitrate planning, rewriting)
//!     → upstream outbox → origin socket
//! origin bytes
//!     → origin.rs (response framing, manifest absorption)
//!     → downstream outbox → client socket
//!     → completed responses back to client.rs (catalog, throughput, activity log)
//! ```
//!
//! # Design Decisions
//! - Sessions never touch sockets; the event loop moves bytes in and out
//! - A session error is terminal for its own pair only

pub mod client;
pub mod origin;

use http::StatusCode;

use crate::http::parser::ProtocolError;

pub use client::{ClientSession, ClientState};
pub use origin::{CompletedResponse, Expectation, OriginSession, ResponseKind};

/// Terminal failure of a client/origin pair.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client sent something we cannot serve.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The origin could not be reached or sent an unusable response.
    #[error("upstream: {0}")]
    Upstream(String),
    /// No slot or buffer space left for this client.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// The socket itself failed; there is nobody left to answer.
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
}

impl SessionError {
    /// Status of the error page owed to the client, if any.
    pub fn response_status(&self) -> Option<StatusCode> {
        match self {
            SessionError::Protocol(e) => Some(e.status()),
            SessionError::Upstream(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            SessionError::ResourceExhausted => Some(StatusCode::SERVICE_UNAVAILABLE),
            SessionError::Transport(_) => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Protocol(_) => "protocol",
            SessionError::Upstream(_) => "upstream",
            SessionError::ResourceExhausted => "resource_exhausted",
            SessionError::Transport(_) => "transport",
        }
    }
}
