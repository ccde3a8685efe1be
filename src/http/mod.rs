//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client bytes (ConnBuffer)
//!     → parser.rs (request line → headers → body, or Incomplete)
//!     → request.rs (ParsedRequest, upstream serialization)
//!     → [abr controller may replace the URI]
//!     → origin socket
//!
//! origin bytes
//!     → parser.rs (status line + framing headers)
//!     → relayed to client or absorbed as manifest
//!
//! terminal errors
//!     → response.rs (error page) → client socket → close
//! ```

pub mod parser;
pub mod request;
pub mod response;

pub use parser::{ParseError, ProtocolError};
pub use request::ParsedRequest;
pub use response::{error_response, ResponseBuilder};
