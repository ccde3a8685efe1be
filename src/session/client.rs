//! Client-side request state machine.
//!
//! # Responsibilities
//! - Frame pipelined HTTP/1.1 requests out of the client's byte stream
//! - Plan each request with the bitrate controller and queue it upstream
//! - Apply completed origin responses (catalog, throughput, activity log)
//!
//! # States
//! ```text
//! AwaitingRequestLine → AwaitingHeaders → [AwaitingBody] → Ready → AwaitingReset
//!        ↑                                                              │
//!        └────────────────────── persistent connection ─────────────────┘
//! ```
//!
//! # Design Decisions
//! - A state advances only when its parser step succeeds; `Incomplete` is
//!   never an error unless the buffer is already full
//! - The parsed request is one value, set and cleared as a whole
//! - After `Connection: close` no further request is read; the session is
//!   finished once the responses already asked for have been relayed

use std::net::IpAddr;
use std::time::Instant;

use http::Method;

use crate::abr::{BitrateController, GlobalBest, RequestPlan};
use crate::config::{AbrConfig, BufferConfig};
use crate::http::parser::{
    parse_body, parse_headers, parse_request_line, ParseError, ProtocolError, RequestHeaders,
    RequestLine,
};
use crate::http::ParsedRequest;
use crate::net::buffer::ConnBuffer;
use crate::net::connection::{ConnectionId, WriteQueue};
use crate::observability::logging::ACTIVITY_TARGET;
use crate::observability::metrics;
use crate::session::origin::{CompletedResponse, Expectation, OriginSession, ResponseKind};
use crate::session::SessionError;

/// Where the request parser stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    AwaitingRequestLine,
    AwaitingHeaders { line: RequestLine },
    AwaitingBody { line: RequestLine, headers: RequestHeaders },
    Ready,
    AwaitingReset,
}

/// Timing of the most recent segment transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentTiming {
    pub forwarded_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

/// One client connection and the origin state paired with it.
#[derive(Debug)]
pub struct ClientSession {
    id: ConnectionId,
    input: ConnBuffer,
    state: ClientState,
    request: Option<ParsedRequest>,
    keep_alive: bool,
    closing: bool,
    controller: BitrateController,
    origin: OriginSession,
    origin_addr: Option<IpAddr>,
    last_chunk: Option<String>,
    last_bitrate: Option<u32>,
    timing: SegmentTiming,
    upstream: WriteQueue,
    downstream: WriteQueue,
}

impl ClientSession {
    pub fn new(id: ConnectionId, abr: &AbrConfig, buffers: &BufferConfig) -> Self {
        Self {
            id,
            input: ConnBuffer::with_capacity(buffers.capacity),
            state: ClientState::AwaitingRequestLine,
            request: None,
            keep_alive: true,
            closing: false,
            controller: BitrateController::new(abr),
            origin: OriginSession::new(buffers.capacity, buffers.max_manifest_bytes),
            origin_addr: None,
            last_chunk: None,
            last_bitrate: None,
            timing: SegmentTiming::default(),
            upstream: WriteQueue::new(),
            downstream: WriteQueue::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn controller(&self) -> &BitrateController {
        &self.controller
    }

    pub fn origin(&self) -> &OriginSession {
        &self.origin
    }

    pub fn last_chunk(&self) -> Option<&str> {
        self.last_chunk.as_deref()
    }

    pub fn last_bitrate(&self) -> Option<u32> {
        self.last_bitrate
    }

    pub fn timing(&self) -> SegmentTiming {
        self.timing
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_origin_addr(&mut self, addr: IpAddr) {
        self.origin_addr = Some(addr);
    }

    /// Bytes the next client read may deliver.
    pub fn read_capacity(&self) -> usize {
        if self.closing {
            0
        } else {
            self.input.remaining()
        }
    }

    /// Whether more client bytes are wanted at all.
    pub fn accepts_requests(&self) -> bool {
        !self.closing
    }

    /// Requests serialized for the origin, waiting to be written.
    pub fn upstream_mut(&mut self) -> &mut WriteQueue {
        &mut self.upstream
    }

    /// Response bytes waiting to be written to the client.
    pub fn downstream_mut(&mut self) -> &mut WriteQueue {
        &mut self.downstream
    }

    pub fn pending_upstream(&self) -> usize {
        self.upstream.len()
    }

    pub fn pending_downstream(&self) -> usize {
        self.downstream.len()
    }

    /// The connection is closing and everything owed to the client is out.
    pub fn is_finished(&self) -> bool {
        self.closing && self.origin.is_idle() && self.downstream.is_empty()
    }

    /// Stop taking requests after a malformed one. Requests already
    /// forwarded still get their replies.
    pub fn abandon_input(&mut self) {
        self.state = ClientState::AwaitingRequestLine;
        self.request = None;
        self.closing = true;
        self.input.clear();
    }

    /// Append bytes read from the client.
    pub fn store(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.input.store(bytes).map_err(|e| {
            tracing::debug!(connection_id = %self.id, error = %e, "Client input overflow");
            SessionError::Protocol(ProtocolError::BadRequest)
        })
    }

    /// Run the request machine until it needs more bytes.
    pub fn process_requests(&mut self, global: &mut GlobalBest, now: Instant) -> Result<(), SessionError> {
        loop {
            let next = match &self.state {
                ClientState::AwaitingRequestLine => {
                    if self.closing {
                        break;
                    }
                    match parse_request_line(self.input.as_slice()) {
                        Ok(line) => ClientState::AwaitingHeaders { line },
                        Err(e) => {
                            self.settle_parse_error(e)?;
                            break;
                        }
                    }
                }
                ClientState::AwaitingHeaders { line } => {
                    match parse_headers(self.input.as_slice(), line) {
                        Ok(headers) => {
                            let total = headers.head_len.checked_add(headers.content_length);
                            if total.map_or(true, |total| total > self.input.capacity()) {
                                return Err(ProtocolError::BadRequest.into());
                            }
                            self.keep_alive = headers.keep_alive;
                            if line.method == Method::POST {
                                ClientState::AwaitingBody {
                                    line: line.clone(),
                                    headers,
                                }
                            } else {
                                self.request = Some(ParsedRequest::from_parts(line.clone(), headers, &[]));
                                ClientState::Ready
                            }
                        }
                        Err(e) => {
                            self.settle_parse_error(e)?;
                            break;
                        }
                    }
                }
                ClientState::AwaitingBody { line, headers } => {
                    match parse_body(self.input.as_slice(), headers) {
                        Ok(body) => {
                            self.request =
                                Some(ParsedRequest::from_parts(line.clone(), headers.clone(), body));
                            ClientState::Ready
                        }
                        Err(e) => {
                            self.settle_parse_error(e)?;
                            break;
                        }
                    }
                }
                ClientState::Ready => {
                    self.forward(global, now)?;
                    ClientState::AwaitingReset
                }
                ClientState::AwaitingReset => {
                    self.reset();
                    ClientState::AwaitingRequestLine
                }
            };
            self.state = next;
        }
        Ok(())
    }

    /// Feed bytes read from the origin and apply completed responses.
    pub fn process_origin_bytes(
        &mut self,
        bytes: &[u8],
        global: &mut GlobalBest,
        now: Instant,
    ) -> Result<(), SessionError> {
        let mut relay = Vec::new();
        let fed = self.origin.feed(bytes, &mut relay, now);
        // Responses completed before a framing error still belong to the client.
        self.downstream.append(&mut relay);
        let completed = fed?;

        for response in completed {
            self.apply_response(response, global);
        }
        Ok(())
    }

    fn settle_parse_error(&self, error: ParseError) -> Result<(), SessionError> {
        match error {
            ParseError::Incomplete if self.input.is_full() => {
                Err(ProtocolError::BadRequest.into())
            }
            ParseError::Incomplete => Ok(()),
            ParseError::Protocol(e) => Err(e.into()),
            ParseError::MalformedResponse(_) => Err(ProtocolError::BadRequest.into()),
        }
    }

    fn forward(&mut self, global: &mut GlobalBest, now: Instant) -> Result<(), SessionError> {
        let Some(request) = self.request.as_ref() else {
            return Ok(());
        };

        let plan = if request.method == Method::GET {
            self.controller.plan_request(&request.uri, global)?
        } else {
            RequestPlan::PassThrough
        };

        match plan {
            RequestPlan::Manifest { nolist_uri } => {
                self.upstream.push(&request.to_wire(&request.uri));
                self.origin.expect(Expectation::new(ResponseKind::Manifest, now));
                self.upstream.push(&request.to_wire(&nolist_uri));
                self.origin
                    .expect(Expectation::new(ResponseKind::PostManifestFilter, now));

                tracing::debug!(
                    connection_id = %self.id,
                    uri = %request.uri,
                    nolist = %nolist_uri,
                    "Forwarding manifest request"
                );
                metrics::record_request("manifest");
            }
            RequestPlan::Segment { uri, chunk, selection } => {
                self.upstream.push(&request.to_wire(&uri));
                self.origin
                    .expect(Expectation::new(ResponseKind::Opaque, now).segment(chunk.clone(), selection.bitrate));

                tracing::debug!(
                    connection_id = %self.id,
                    requested = %request.uri,
                    forwarded = %uri,
                    bitrate = selection.bitrate,
                    source = ?selection.source,
                    avg_tput_kbps = self.controller.average_kbps(),
                    "Rewrote segment request"
                );
                metrics::record_request("segment");
                metrics::record_segment(selection.bitrate);

                self.last_chunk = Some(chunk);
                self.last_bitrate = Some(selection.bitrate);
                self.timing.forwarded_at = Some(now);
            }
            RequestPlan::PassThrough => {
                self.upstream.push(&request.to_wire(&request.uri));
                self.origin
                    .expect(Expectation::new(ResponseKind::Opaque, now).head_only(request.is_head()));

                tracing::trace!(connection_id = %self.id, method = %request.method, uri = %request.uri, "Forwarding request");
                metrics::record_request("other");
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        let consumed = self.request.take().map_or(0, |request| request.wire_len);
        self.input.advance(consumed);

        if !self.keep_alive {
            self.closing = true;
            self.input.clear();
        }
    }

    fn apply_response(&mut self, response: CompletedResponse, global: &mut GlobalBest) {
        match response.expectation.kind {
            ResponseKind::Manifest => {
                if !(200..300).contains(&response.status) {
                    tracing::warn!(
                        connection_id = %self.id,
                        status = response.status,
                        "Manifest fetch failed; catalog not populated"
                    );
                    return;
                }
                let body = response.manifest.unwrap_or_default();
                if self.controller.populate_from_manifest(&body, global) {
                    let bitrates: Vec<u32> = self
                        .controller
                        .catalog()
                        .map(|catalog| catalog.iter().collect())
                        .unwrap_or_default();
                    tracing::info!(
                        connection_id = %self.id,
                        bitrates = ?bitrates,
                        global_best = ?global.get(),
                        "Bitrate catalog populated"
                    );
                }
            }
            ResponseKind::PostManifestFilter => {}
            ResponseKind::Opaque => {
                let Some(chunk) = response.expectation.chunk.as_deref() else {
                    return;
                };
                self.timing.completed_at = Some(response.completed_at);

                let elapsed = response
                    .completed_at
                    .saturating_duration_since(response.expectation.forwarded_at);
                let Some(sample) = self.controller.record_sample(response.body_len, elapsed) else {
                    tracing::debug!(connection_id = %self.id, chunk, "Segment completed instantly; no sample");
                    return;
                };
                metrics::record_throughput(sample);

                tracing::info!(
                    target: ACTIVITY_TARGET,
                    connection_id = %self.id,
                    duration_secs = elapsed.as_secs_f64(),
                    tput_kbps = sample,
                    avg_tput_kbps = self.controller.average_kbps(),
                    bitrate = response.expectation.bitrate.unwrap_or_default(),
                    server_ip = ?self.origin_addr,
                    chunk,
                    "segment"
                );
            }
        }
    }
}
