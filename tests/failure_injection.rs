//! Failure injection tests for the ABR proxy.

use std::net::SocketAddr;
use std::time::Duration;

use abr_proxy::resolver::{Lookup, ResolveError, Resolver};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;

use common::{get, read_reply, start_mock_origin, start_proxy, start_proxy_with, video_routes};

/// Resolver whose lookups never finish.
struct StalledResolver;

impl Resolver for StalledResolver {
    fn resolve(&mut self, _host: &str) -> Result<Lookup, ResolveError> {
        Ok(Lookup::Pending)
    }
}

async fn assert_rejected(proxy: SocketAddr, raw: &[u8], status: u16) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let reply = read_reply(&mut stream, &mut Vec::new()).await;
    assert_eq!(reply.status, status, "request {:?}", String::from_utf8_lossy(raw));
    assert!(reply.head.contains("Connection: close"));
    assert!(reply.head.contains("Server: abr-proxy"));
    common::expect_closed(&mut stream).await;
}

#[tokio::test]
async fn malformed_requests_get_matching_error_pages() {
    let (origin, log) = start_mock_origin(video_routes()).await;
    let proxy = start_proxy(common::proxy_config(origin));

    assert_rejected(proxy.addr, b"PUT /upload HTTP/1.1\r\n\r\n", 501).await;
    assert_rejected(proxy.addr, b"GET /index.html HTTP/1.0\r\n\r\n", 505).await;
    assert_rejected(proxy.addr, b"POST /form HTTP/1.1\r\nHost: x\r\n\r\n", 411).await;
    assert_rejected(proxy.addr, b"GET /index.html\r\n\r\n", 400).await;
    assert_rejected(proxy.addr, b"GET /vod/500SegX-Frag1 HTTP/1.1\r\n\r\n", 400).await;

    assert!(log.paths().is_empty());
}

#[tokio::test]
async fn oversized_request_head_is_bad_request() {
    let (origin, _log) = start_mock_origin(video_routes()).await;
    let mut config = common::proxy_config(origin);
    config.buffers.capacity = 512;
    let proxy = start_proxy(config);

    let mut raw = b"GET /index.html HTTP/1.1\r\nX-Filler: ".to_vec();
    raw.extend(std::iter::repeat(b'a').take(1024));
    raw.extend_from_slice(b"\r\n\r\n");

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    // The proxy may hang up before every byte is accepted.
    let _ = stream.write_all(&raw).await;
    let reply = read_reply(&mut stream, &mut Vec::new()).await;
    assert_eq!(reply.status, 400);
}

#[tokio::test]
async fn clients_beyond_capacity_get_503() {
    let (origin, _log) = start_mock_origin(video_routes()).await;
    let mut config = common::proxy_config(origin);
    config.listener.max_connections = 1;
    let proxy = start_proxy(config);

    let mut holder = TcpStream::connect(proxy.addr).await.unwrap();
    holder.write_all(&get("/index.html")).await.unwrap();
    read_reply(&mut holder, &mut Vec::new()).await;

    let mut extra = TcpStream::connect(proxy.addr).await.unwrap();
    let reply = read_reply(&mut extra, &mut Vec::new()).await;
    assert_eq!(reply.status, 503);
    common::expect_closed(&mut extra).await;

    // The admitted client is unaffected.
    let mut pending = Vec::new();
    holder.write_all(&get("/index.html")).await.unwrap();
    assert_eq!(read_reply(&mut holder, &mut pending).await.status, 200);
}

#[tokio::test]
async fn garbage_from_origin_is_internal_error() {
    let origin = common::start_raw_origin(b"this is not http\r\n\r\n").await;
    let proxy = start_proxy(common::proxy_config(origin));

    let reply = common::request_once(proxy.addr, &get("/index.html")).await;
    assert_eq!(reply.status, 500);
}

#[tokio::test]
async fn origin_reply_without_length_is_internal_error() {
    let origin = common::start_raw_origin(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nbody").await;
    let proxy = start_proxy(common::proxy_config(origin));

    let reply = common::request_once(proxy.addr, &get("/index.html")).await;
    assert_eq!(reply.status, 500);
}

#[tokio::test]
async fn origin_hanging_up_mid_response_closes_without_error_page() {
    let origin = common::start_raw_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial").await;
    let proxy = start_proxy(common::proxy_config(origin));

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream.write_all(&get("/index.html")).await.unwrap();

    // The client sees a truncated 200 and a closed connection, nothing more.
    let relayed = read_until_closed(&mut stream).await;
    assert!(relayed.starts_with("HTTP/1.1 200 OK"));
    assert!(relayed.ends_with("partial"));
    assert!(!relayed.contains("HTTP/1.1 500"));
}

#[tokio::test]
async fn bad_pipelined_request_is_answered_after_earlier_replies() {
    let (origin, log) = start_mock_origin(video_routes()).await;
    let proxy = start_proxy(common::proxy_config(origin));

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    let mut batch = get("/index.html");
    batch.extend_from_slice(b"BREW /pot HTTP/1.1\r\n\r\n");
    stream.write_all(&batch).await.unwrap();

    let mut pending = Vec::new();
    let first = read_reply(&mut stream, &mut pending).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.body_text(), "<html>player</html>");

    let second = read_reply(&mut stream, &mut pending).await;
    assert_eq!(second.status, 501);
    common::expect_closed(&mut stream).await;
    assert_eq!(log.paths(), vec!["/index.html"]);
}

#[tokio::test]
async fn unreachable_origin_is_internal_error() {
    let origin: SocketAddr = format!("127.0.0.1:{}", common::closed_port()).parse().unwrap();
    let proxy = start_proxy(common::proxy_config(origin));

    let reply = common::request_once(proxy.addr, &get("/index.html")).await;
    assert_eq!(reply.status, 500);
}

#[tokio::test]
async fn stalled_name_resolution_times_out() {
    let (origin, log) = start_mock_origin(video_routes()).await;
    let mut config = common::proxy_config(origin);
    config.origin.www_ip = None;
    config.origin.resolve_timeout_ms = 100;
    let proxy = start_proxy_with(config, StalledResolver);

    let started = std::time::Instant::now();
    let reply = common::request_once(proxy.addr, &get("/index.html")).await;
    assert_eq!(reply.status, 500);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(log.paths().is_empty());
}

#[tokio::test]
async fn one_failing_client_does_not_disturb_another() {
    let (origin, _log) = start_mock_origin(video_routes()).await;
    let proxy = start_proxy(common::proxy_config(origin));

    let mut healthy = TcpStream::connect(proxy.addr).await.unwrap();
    let mut pending = Vec::new();
    healthy.write_all(&get("/index.html")).await.unwrap();
    assert_eq!(read_reply(&mut healthy, &mut pending).await.status, 200);

    assert_rejected(proxy.addr, b"DELETE / HTTP/1.1\r\n\r\n", 501).await;

    healthy.write_all(&get("/index.html")).await.unwrap();
    assert_eq!(read_reply(&mut healthy, &mut pending).await.status, 200);
}

/// Everything the proxy sends until it closes the connection.
async fn read_until_closed(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::io::AsyncReadExt::read_to_end(stream, &mut out),
    )
    .await;
    String::from_utf8_lossy(&out).to_string()
}
