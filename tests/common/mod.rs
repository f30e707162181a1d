//! Shared helpers: an in-memory connector and a raw-TCP HTTP client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use caregate::middleware::Pipeline;
use caregate::{Connect, Connection, Error, Row, Server};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ── Stub database ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct DbState {
    pub down: AtomicBool,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl DbState {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct StubConnector {
    pub state: Arc<DbState>,
    pub latency: Duration,
}

impl StubConnector {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn down() -> Self {
        let connector = Self::default();
        connector.state.set_down(true);
        connector
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency, ..Self::default() }
    }
}

pub struct StubConnection {
    state: Arc<DbState>,
    latency: Duration,
}

impl Connect for StubConnector {
    type Connection = StubConnection;
    type Error = std::io::Error;

    async fn connect(&self) -> Result<StubConnection, std::io::Error> {
        if self.state.down.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "password authentication failed for user \"clinical_admin\"",
            ));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(StubConnection { state: Arc::clone(&self.state), latency: self.latency })
    }
}

impl Connection for StubConnection {
    type Error = std::io::Error;

    async fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, std::io::Error> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.state.down.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "server closed the connection unexpectedly",
            ));
        }
        let mut row = Row::new();
        row.insert("now".into(), Value::String("2024-05-01T12:00:00.000Z".into()));
        Ok(vec![row])
    }

    async fn close(self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Test server ───────────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    pub async fn start(app: Pipeline) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(Server::from_listener(listener), app)
    }

    /// Small limits keep oversized requests inside one socket read.
    pub async fn start_with_body_limit(app: Pipeline, limit: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(Server::from_listener(listener).body_limit(limit), app)
    }

    fn serve(server: Server, app: Pipeline) -> Self {
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(app, async {
            let _ = rx.await;
        }));
        Self { addr, shutdown: Some(tx), handle }
    }

    pub async fn get(&self, path: &str) -> RawResponse {
        self.send(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"))
            .await
    }

    pub async fn send(&self, raw: &str) -> RawResponse {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        RawResponse::parse(&buf)
    }

    pub async fn stop(mut self) -> Result<(), Error> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap()
    }
}

pub fn request(method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for (name, value) in headers {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    if !body.is_empty() {
        raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    raw
}

// ── Response parsing ──────────────────────────────────────────────────────────

pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Every byte the server wrote on the connection.
    pub raw: String,
}

impl RawResponse {
    fn parse(buf: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(buf).into_owned();
        let (head, body) = raw.split_once("\r\n\r\n").expect("response has a header block");
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .expect("status line");
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
            .collect();
        Self { status, headers, body: body.to_owned(), raw: raw.clone() }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("JSON body")
    }
}
