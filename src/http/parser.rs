//! Incremental HTTP/1.1 message parsing.
//!
//! # Responsibilities
//! - Extract request line, header block and body from an accumulated buffer
//! - Extract status line and framing headers from origin responses
//! - Report `Incomplete` instead of blocking when bytes are missing
//!
//! # Design Decisions
//! - Every function takes an immutable slice starting at the message start
//!   and reports how many bytes the parsed part covers
//! - Stateless: the session state machine decides which step runs next
//! - Only the framing the proxy needs is modeled (no chunked bodies,
//!   trailers or 100-continue)

use http::{Method, StatusCode};

pub const CRLF: &[u8] = b"\r\n";
pub const HEADER_END: &[u8] = b"\r\n\r\n";

/// Client-caused protocol violations, each answered with its own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request")]
    BadRequest,
    #[error("POST without Content-Length")]
    LengthRequired,
    #[error("method not implemented")]
    NotImplemented,
    #[error("HTTP version not supported")]
    VersionNotSupported,
}

impl ProtocolError {
    /// Status code of the error response sent to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::BadRequest => StatusCode::BAD_REQUEST,
            ProtocolError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            ProtocolError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ProtocolError::VersionNotSupported => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
        }
    }
}

/// Outcome of a parser step that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Not enough bytes yet; retry once more input arrives.
    #[error("message incomplete")]
    Incomplete,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The origin sent something the proxy cannot frame.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
}

impl ParseError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: String,
    pub version: String,
    /// Length of the line including its CRLF.
    pub len: usize,
}

/// Header block of a request whose request line is already known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    /// Raw header bytes after the request line, terminator included.
    pub raw: Vec<u8>,
    /// False when the client sent `Connection: close`.
    pub keep_alive: bool,
    /// Declared body length (always 0 for GET/HEAD).
    pub content_length: usize,
    /// Length of request line plus header block.
    pub head_len: usize,
}

/// Status line and framing information of an origin response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u64>,
    pub keep_alive: bool,
    /// Length of status line plus header block.
    pub head_len: usize,
}

/// Parse the request line at the start of `buf`.
pub fn parse_request_line(buf: &[u8]) -> ParseResult<RequestLine> {
    let end = find(buf, CRLF).ok_or(ParseError::Incomplete)?;
    let line = std::str::from_utf8(&buf[..end]).map_err(|_| ProtocolError::BadRequest)?;

    // Runs of spaces separate tokens, like strtok.
    let mut tokens = line.split(' ').filter(|t| !t.is_empty());

    let method = match tokens.next().ok_or(ProtocolError::BadRequest)? {
        "GET" => Method::GET,
        "HEAD" => Method::HEAD,
        "POST" => Method::POST,
        _ => return Err(ProtocolError::NotImplemented.into()),
    };
    let uri = tokens.next().ok_or(ProtocolError::BadRequest)?;
    let version = tokens.next().ok_or(ProtocolError::BadRequest)?;

    if version != "HTTP/1.1" {
        return Err(ProtocolError::VersionNotSupported.into());
    }
    if tokens.next().is_some() {
        return Err(ProtocolError::BadRequest.into());
    }

    Ok(RequestLine {
        method,
        uri: uri.to_owned(),
        version: version.to_owned(),
        len: end + CRLF.len(),
    })
}

/// Parse the header block that follows `line`.
pub fn parse_headers(buf: &[u8], line: &RequestLine) -> ParseResult<RequestHeaders> {
    // The request line's own CRLF may be the first half of the terminator.
    let search_from = line.len - CRLF.len();
    let term = find_from(buf, HEADER_END, search_from).ok_or(ParseError::Incomplete)?;
    let head_len = term + HEADER_END.len();

    let fields = if line.len <= term { &buf[line.len..term] } else { &[][..] };

    let keep_alive = !header_lines(fields).any(|(name, value)| {
        name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close")
    });

    let content_length = if line.method == Method::POST {
        let value = find_header(fields, "content-length").ok_or(ProtocolError::LengthRequired)?;
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::BadRequest.into());
        }
        let length: u64 = value.parse().map_err(|_| ProtocolError::BadRequest)?;
        let length = usize::try_from(length).map_err(|_| ProtocolError::BadRequest)?;
        head_len.checked_add(length).ok_or(ProtocolError::BadRequest)?;
        length
    } else {
        0
    };

    Ok(RequestHeaders {
        raw: buf[line.len..head_len].to_vec(),
        keep_alive,
        content_length,
        head_len,
    })
}

/// Return the request body once all declared bytes are present.
pub fn parse_body<'a>(buf: &'a [u8], headers: &RequestHeaders) -> ParseResult<&'a [u8]> {
    let end = headers
        .head_len
        .checked_add(headers.content_length)
        .ok_or(ProtocolError::BadRequest)?;
    if buf.len() < end {
        return Err(ParseError::Incomplete);
    }
    Ok(&buf[headers.head_len..end])
}

/// Parse the status line and headers of an origin response.
pub fn parse_response_head(buf: &[u8]) -> ParseResult<ResponseHead> {
    let line_end = find(buf, CRLF).ok_or(ParseError::Incomplete)?;
    let term = find_from(buf, HEADER_END, line_end).ok_or(ParseError::Incomplete)?;
    let head_len = term + HEADER_END.len();

    let line = std::str::from_utf8(&buf[..line_end])
        .map_err(|_| ParseError::MalformedResponse("status line is not UTF-8"))?;
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::MalformedResponse("unexpected protocol version"));
    }

    let code = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::MalformedResponse("invalid status code"));
    }
    let status: u16 = code
        .parse()
        .map_err(|_| ParseError::MalformedResponse("invalid status code"))?;
    if status < 100 {
        return Err(ParseError::MalformedResponse("invalid status code"));
    }

    let fields = if line_end + CRLF.len() <= term {
        &buf[line_end + CRLF.len()..term]
    } else {
        &[][..]
    };

    if let Some(encoding) = find_header(fields, "transfer-encoding") {
        if encoding.to_ascii_lowercase().contains("chunked") {
            return Err(ParseError::MalformedResponse(
                "chunked transfer-encoding is not supported",
            ));
        }
    }

    let content_length = match find_header(fields, "content-length") {
        Some(value) => Some(
            value
                .parse::<u64>()
                .map_err(|_| ParseError::MalformedResponse("invalid Content-Length"))?,
        ),
        None => None,
    };

    let keep_alive = !header_lines(fields).any(|(name, value)| {
        name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close")
    });

    Ok(ResponseHead {
        status,
        content_length,
        keep_alive,
        head_len,
    })
}

/// Case-insensitive lookup of a header value in a raw header block.
pub fn find_header<'a>(block: &'a [u8], name: &str) -> Option<&'a str> {
    header_lines(block)
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Iterate `name: value` pairs, skipping lines that are not valid fields.
fn header_lines(block: &[u8]) -> impl Iterator<Item = (&str, &str)> {
    block
        .split(|&b| b == b'\n')
        .filter_map(|line| std::str::from_utf8(line).ok())
        .filter_map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let (name, value) = line.split_once(':')?;
            Some((name.trim(), value.trim()))
        })
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_from(haystack, needle, 0)
}

pub fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
