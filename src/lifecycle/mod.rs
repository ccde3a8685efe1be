//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (binary):
//!     Load config → Apply CLI overrides → Validate → Logging/metrics → Bind → Run
//!
//! Shutdown (shutdown.rs):
//!     trigger() → waker fires → loop stops accepting → sockets closed → run() returns
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then listener
//! - Shutdown is cooperative: the loop observes the flag between polls

pub mod shutdown;

pub use shutdown::ShutdownHandle;
