//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (non-blocking accept)
//!     → slots.rs (bounded slot, generation-tagged poll tokens)
//!     → event_loop.rs (resolve + connect origin, drive the session)
//!     → connection.rs (reads, queued writes)
//!
//! Origin link states:
//!     Resolving → Connecting → Connected → [Closed → Resolving on next request]
//! ```
//!
//! # Design Decisions
//! - One thread, one poll; every socket is non-blocking
//! - Bounded slot table prevents resource exhaustion
//! - A client and its origin socket live and die together

pub mod buffer;
pub mod connection;
pub mod event_loop;
pub mod listener;
pub mod slots;
