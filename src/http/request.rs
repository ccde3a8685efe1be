//! Parsed client requests and their upstream form.
//!
//! # Responsibilities
//! - Hold a fully parsed request (line, headers, body) as one value
//! - Serialize the request for the origin, optionally with a new URI
//!
//! # Design Decisions
//! - A `ParsedRequest` only exists once every part has been parsed
//! - The header block is forwarded byte-for-byte (cookies, auth, host)

use http::Method;

use crate::http::parser::{RequestHeaders, RequestLine};

/// A complete request received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    /// Raw header block, terminator included.
    pub headers: Vec<u8>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
    /// Bytes this request occupied in the input buffer.
    pub wire_len: usize,
}

impl ParsedRequest {
    pub fn from_parts(line: RequestLine, headers: RequestHeaders, body: &[u8]) -> Self {
        Self {
            method: line.method,
            uri: line.uri,
            version: line.version,
            wire_len: headers.head_len + body.len(),
            keep_alive: headers.keep_alive,
            headers: headers.raw,
            body: body.to_vec(),
        }
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Wire form of this request targeting `uri`.
    pub fn to_wire(&self, uri: &str) -> Vec<u8> {
        let line = format!("{} {} HTTP/1.1\r\n", self.method, uri);
        let mut out = Vec::with_capacity(line.len() + self.headers.len() + self.body.len());
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(&self.headers);
        out.extend_from_slice(&self.body);
        out
    }
}
