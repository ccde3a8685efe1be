//! Origin-side response state machine.
//!
//! # Responsibilities
//! - Frame origin responses (status line, headers, `Content-Length` body)
//! - Relay opaque responses to the client chunk by chunk as they arrive
//! - Absorb manifest responses for catalog population
//! - Report each completed response with its timing
//!
//! # Design Decisions
//! - What a response is gets decided when its request is forwarded
//!   (`Expectation`), never by looking at the payload
//! - Expectations queue in request order, which is also response order on
//!   a pipelined HTTP/1.1 connection
//! - `bytes_received` never exceeds `declared_length`; at equality the
//!   session resets and continues with any pipelined bytes

use std::collections::VecDeque;
use std::time::Instant;

use crate::http::parser::{parse_response_head, ParseError, ResponseHead};
use crate::net::buffer::ConnBuffer;
use crate::session::SessionError;

/// What the proxy does with a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Buffered and handed to the catalog; not relayed.
    Manifest,
    /// The no-list manifest requested after a manifest; relayed.
    PostManifestFilter,
    /// Relayed untouched (segments, pages, static assets).
    Opaque,
}

/// A response the origin owes for a forwarded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub kind: ResponseKind,
    /// The request was HEAD, so the response carries no body.
    pub head_only: bool,
    /// Segment file name when the request was a video segment.
    pub chunk: Option<String>,
    pub bitrate: Option<u32>,
    pub forwarded_at: Instant,
}

impl Expectation {
    pub fn new(kind: ResponseKind, forwarded_at: Instant) -> Self {
        Self {
            kind,
            head_only: false,
            chunk: None,
            bitrate: None,
            forwarded_at,
        }
    }

    pub fn head_only(mut self, head_only: bool) -> Self {
        self.head_only = head_only;
        self
    }

    pub fn segment(mut self, chunk: impl Into<String>, bitrate: u32) -> Self {
        self.chunk = Some(chunk.into());
        self.bitrate = Some(bitrate);
        self
    }
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct CompletedResponse {
    pub expectation: Expectation,
    pub status: u16,
    pub body_len: u64,
    /// Manifest body, for `ResponseKind::Manifest` only.
    pub manifest: Option<Vec<u8>>,
    pub keep_alive: bool,
    pub completed_at: Instant,
}

#[derive(Debug)]
enum OriginState {
    AwaitingHead,
    Body {
        expectation: Expectation,
        head: ResponseHead,
    },
}

/// Response-side state paired with one client session.
#[derive(Debug)]
pub struct OriginSession {
    buffer: ConnBuffer,
    state: OriginState,
    expected: VecDeque<Expectation>,
    kind: ResponseKind,
    declared_length: u64,
    bytes_received: u64,
    manifest_body: Vec<u8>,
    max_manifest_bytes: usize,
}

impl OriginSession {
    pub fn new(capacity: usize, max_manifest_bytes: usize) -> Self {
        Self {
            buffer: ConnBuffer::with_capacity(capacity),
            state: OriginState::AwaitingHead,
            expected: VecDeque::new(),
            kind: ResponseKind::Opaque,
            declared_length: 0,
            bytes_received: 0,
            manifest_body: Vec::new(),
            max_manifest_bytes,
        }
    }

    /// Register the response owed for a request just forwarded.
    pub fn expect(&mut self, expectation: Expectation) {
        self.expected.push_back(expectation);
    }

    /// Responses owed, including one in progress.
    pub fn outstanding(&self) -> usize {
        let in_progress = matches!(self.state, OriginState::Body { .. }) as usize;
        self.expected.len() + in_progress
    }

    /// Nothing owed and nothing half-received.
    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0 && self.buffer.is_empty()
    }

    /// Part of a relayed response has been handed to the client and the
    /// rest is still owed.
    pub fn is_relaying(&self) -> bool {
        matches!(self.state, OriginState::Body { .. }) && self.kind != ResponseKind::Manifest
    }

    /// Kind of the response currently being received.
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn declared_length(&self) -> u64 {
        self.declared_length
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes the next read may deliver.
    pub fn read_capacity(&self) -> usize {
        self.buffer.remaining()
    }

    /// Process bytes read from the origin.
    ///
    /// Relayed bytes are appended to `relay`; every response completed by
    /// these bytes is returned in order.
    pub fn feed(
        &mut self,
        bytes: &[u8],
        relay: &mut Vec<u8>,
        now: Instant,
    ) -> Result<Vec<CompletedResponse>, SessionError> {
        self.buffer
            .store(bytes)
            .map_err(|e| SessionError::Upstream(format!("origin response: {e}")))?;

        let mut completed = Vec::new();
        loop {
            match &self.state {
                OriginState::AwaitingHead => {
                    if self.buffer.is_empty() {
                        break;
                    }
                    let head = match parse_response_head(self.buffer.as_slice()) {
                        Ok(head) => head,
                        Err(ParseError::Incomplete) if self.buffer.is_full() => {
                            return Err(SessionError::Upstream(
                                "response head exceeds buffer capacity".into(),
                            ));
                        }
                        Err(ParseError::Incomplete) => break,
                        Err(e) => return Err(SessionError::Upstream(e.to_string())),
                    };
                    self.begin_response(head, relay)?;
                }
                OriginState::Body { .. } => {
                    let remaining = self.declared_length - self.bytes_received;
                    let take = remaining.min(self.buffer.len() as u64) as usize;
                    if take > 0 {
                        let chunk = &self.buffer.as_slice()[..take];
                        if self.kind == ResponseKind::Manifest {
                            self.manifest_body.extend_from_slice(chunk);
                        } else {
                            relay.extend_from_slice(chunk);
                        }
                        self.bytes_received += take as u64;
                        self.buffer.advance(take);
                    }

                    if self.bytes_received < self.declared_length {
                        break;
                    }
                    completed.extend(self.finish_response(now));
                }
            }
        }

        Ok(completed)
    }

    fn begin_response(&mut self, head: ResponseHead, relay: &mut Vec<u8>) -> Result<(), SessionError> {
        let expectation = self
            .expected
            .pop_front()
            .ok_or_else(|| SessionError::Upstream("unsolicited response from origin".into()))?;

        let declared = if expectation.head_only || !status_has_body(head.status) {
            0
        } else {
            head.content_length.ok_or_else(|| {
                SessionError::Upstream("origin response without Content-Length".into())
            })?
        };

        if expectation.kind == ResponseKind::Manifest && declared > self.max_manifest_bytes as u64 {
            return Err(SessionError::Upstream(format!(
                "manifest of {declared} bytes exceeds limit of {}",
                self.max_manifest_bytes
            )));
        }

        if expectation.kind != ResponseKind::Manifest {
            relay.extend_from_slice(&self.buffer.as_slice()[..head.head_len]);
        }
        self.buffer.advance(head.head_len);

        self.kind = expectation.kind;
        self.declared_length = declared;
        self.bytes_received = 0;
        self.manifest_body.clear();
        self.state = OriginState::Body { expectation, head };
        Ok(())
    }

    fn finish_response(&mut self, now: Instant) -> Option<CompletedResponse> {
        let state = std::mem::replace(&mut self.state, OriginState::AwaitingHead);
        let kind = std::mem::replace(&mut self.kind, ResponseKind::Opaque);
        let manifest = (kind == ResponseKind::Manifest).then(|| std::mem::take(&mut self.manifest_body));
        let body_len = self.bytes_received;

        self.declared_length = 0;
        self.bytes_received = 0;

        match state {
            OriginState::Body { expectation, head } => Some(CompletedResponse {
                expectation,
                status: head.status,
                body_len,
                manifest,
                keep_alive: head.keep_alive,
                completed_at: now,
            }),
            OriginState::AwaitingHead => None,
        }
    }
}

fn status_has_body(status: u16) -> bool {
    !(100..200).contains(&status) && status != 204 && status != 304
}
