//! Responses synthesized by the proxy itself.
//!
//! # Responsibilities
//! - Build error responses for terminal session failures
//! - Serialize status line, headers and body in one pass
//!
//! # Design Decisions
//! - Fields are collected first and serialized once; `Content-Length` is
//!   derived from the body at build time
//! - Every synthesized response closes the connection

use http::StatusCode;

pub const SERVER_NAME: &str = "abr-proxy";

/// Builder for a complete HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set an HTML body and the matching content type.
    pub fn html_body(self, html: impl Into<String>) -> Self {
        self.header("Content-Type", "text/html")
            .body(html.into().into_bytes())
    }

    /// Serialize into wire bytes.
    pub fn build(self) -> Vec<u8> {
        let reason = self.status.canonical_reason().unwrap_or("Unknown");
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), reason);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// The error page sent before closing a client connection.
pub fn error_response(status: StatusCode) -> Vec<u8> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let html = format!(
        "<html><head><title>Proxy Error</title></head>\r\n<body>\r\n{} {}\r\n<hr><em>{}</em>\r\n</body></html>\r\n",
        status.as_u16(),
        reason,
        SERVER_NAME
    );

    ResponseBuilder::new(status)
        .header("Server", SERVER_NAME)
        .header("Connection", "close")
        .html_body(html)
        .build()
}
