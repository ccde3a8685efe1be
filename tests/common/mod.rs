//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use abr_proxy::config::ProxyConfig;
use abr_proxy::resolver::{FixedResolver, Resolver};
use abr_proxy::{ProxyServer, ShutdownHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest xmlns="http://ns.adobe.com/f4m/1.0">
  <id>big_buck_bunny</id>
  <media url="/vod/500Seg" bitrate="500" width="640" height="360"/>
  <media url="/vod/1000Seg" bitrate="1000" width="854" height="480"/>
  <media url="/vod/2000Seg" bitrate="2000" width="1280" height="720"/>
</manifest>
"#;

pub const NOLIST_MANIFEST: &str = r#"<manifest><id>big_buck_bunny</id></manifest>"#;

/// Paths the mock origin was asked for, in arrival order.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    pub fn paths(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, path: String) {
        self.0.lock().unwrap().push(path);
    }
}

/// Routes for the mock origin: path → (status, body).
pub fn video_routes() -> HashMap<String, (u16, Vec<u8>)> {
    let mut routes = HashMap::new();
    routes.insert("/vod/big_buck_bunny.f4m".into(), (200, MANIFEST.as_bytes().to_vec()));
    routes.insert(
        "/vod/big_buck_bunny_nolist.f4m".into(),
        (200, NOLIST_MANIFEST.as_bytes().to_vec()),
    );
    for bitrate in [500, 1000, 2000] {
        for seg in 1..=3 {
            for frag in 1..=9 {
                let path = format!("/vod/{bitrate}Seg{seg}-Frag{frag}");
                let body = format!("segment {bitrate} {seg} {frag}").into_bytes();
                routes.insert(path, (200, body));
            }
        }
    }
    routes.insert("/index.html".into(), (200, b"<html>player</html>".to_vec()));
    routes
}

/// Start a keep-alive mock origin that answers pipelined requests in order.
pub async fn start_mock_origin(routes: HashMap<String, (u16, Vec<u8>)>) -> (SocketAddr, RequestLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = RequestLog::default();
    let routes = Arc::new(routes);

    let task_log = log.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let log = task_log.clone();
            tokio::spawn(serve_origin_connection(socket, routes, log));
        }
    });

    (addr, log)
}

async fn serve_origin_connection(
    mut socket: TcpStream,
    routes: Arc<HashMap<String, (u16, Vec<u8>)>>,
    log: RequestLog,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let content_length = header_value(&head, "content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            let total = end + 4 + content_length;
            if buf.len() < total {
                break;
            }
            buf.drain(..total);

            let mut parts = head.split(' ');
            let method = parts.next().unwrap_or_default().to_string();
            let path = parts.next().unwrap_or_default().to_string();
            log.push(path.clone());

            let (status, body) = routes
                .get(&path)
                .cloned()
                .unwrap_or((404, b"not found".to_vec()));
            let reason = if status == 200 { "OK" } else { "Not Found" };
            let mut response =
                format!("HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
            if method != "HEAD" {
                response.extend_from_slice(&body);
            }
            if socket.write_all(&response).await.is_err() {
                return;
            }
        }

        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Start an origin that answers every connection with `reply` and hangs up.
pub async fn start_raw_origin(reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut scratch = [0u8; 1024];
                let _ = socket.read(&mut scratch).await;
                let _ = socket.write_all(reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Proxy running on its own thread; stopped on drop.
pub struct RunningProxy {
    pub addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        let _ = self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Config pointing at `origin` on loopback, with an ephemeral listen port.
pub fn proxy_config(origin: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.origin.host = origin.ip().to_string();
    config.origin.port = origin.port();
    config.origin.www_ip = Some(origin.ip());
    config.event_loop.poll_timeout_ms = 50;
    config
}

pub fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let ip = config.origin.www_ip.unwrap_or_else(|| "127.0.0.1".parse().unwrap());
    start_proxy_with(config, FixedResolver::new(ip))
}

pub fn start_proxy_with<R: Resolver + 'static>(config: ProxyConfig, resolver: R) -> RunningProxy {
    let mut server = ProxyServer::bind(config, resolver).unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let thread = std::thread::spawn(move || {
        server.run().unwrap();
    });
    RunningProxy {
        addr,
        shutdown,
        thread: Some(thread),
    }
}

/// A response read back by the test client.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Read one `Content-Length`-framed response.
pub async fn read_reply(stream: &mut TcpStream, pending: &mut Vec<u8>) -> Reply {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(pending, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&pending[..end]).to_string();
            let length = header_value(&head, "content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            if pending.len() >= end + 4 + length {
                let body = pending[end + 4..end + 4 + length].to_vec();
                pending.drain(..end + 4 + length);
                let status = head
                    .split(' ')
                    .nth(1)
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(0);
                return Reply { status, head, body };
            }
        }

        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for proxy reply")
            .unwrap();
        assert!(n > 0, "proxy closed the connection before a full reply");
        pending.extend_from_slice(&chunk[..n]);
    }
}

/// Send one request on a fresh connection and read one reply.
pub async fn request_once(proxy: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(raw).await.unwrap();
    read_reply(&mut stream, &mut Vec::new()).await
}

/// Wait until the proxy closes `stream`.
pub async fn expect_closed(stream: &mut TcpStream) {
    let mut scratch = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut scratch))
        .await
        .expect("proxy kept the connection open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

pub fn get(path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: video.example\r\n\r\n").into_bytes()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}
