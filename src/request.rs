//! Incoming HTTP request context.
//!
//! One [`Request`] exists per HTTP request. Middleware stages see it mutably;
//! the matched handler receives it by value. The [`RequestHead`] part is what
//! survives the handler call so stages can annotate the response afterwards.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use http::{Extensions, HeaderMap};
use serde_json::Value;

/// The body as the server collected it.
#[derive(Clone, Debug)]
pub enum Body {
    Full(Bytes),
    /// The client sent more than the server's body limit. The bytes were not kept.
    TooLarge,
    /// Reading the body failed mid-stream.
    Unreadable,
}

/// Method, target, headers and per-request metadata.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub(crate) method: http::Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) received_at: Instant,
    pub(crate) extensions: Extensions,
}

impl RequestHead {
    pub fn method(&self) -> &http::Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn received_at(&self) -> Instant { self.received_at }

    /// Per-request values left by middleware stages.
    pub fn extensions(&self) -> &Extensions { &self.extensions }

    /// Header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An incoming HTTP request.
pub struct Request {
    pub(crate) head: RequestHead,
    pub(crate) body: Body,
    pub(crate) json: Option<Value>,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(head: RequestHead, body: Body) -> Self {
        Self { head, body, json: None, params: HashMap::new() }
    }

    pub(crate) fn from_http(
        parts: http::request::Parts,
        body: Body,
        remote_addr: SocketAddr,
    ) -> Self {
        let head = RequestHead {
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            method: parts.method,
            headers: parts.headers,
            remote_addr,
            received_at: Instant::now(),
            extensions: parts.extensions,
        };
        Self::new(head, body)
    }

    pub fn head(&self) -> &RequestHead { &self.head }
    pub fn method(&self) -> &http::Method { &self.head.method }
    pub fn path(&self) -> &str { &self.head.path }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn remote_addr(&self) -> SocketAddr { self.head.remote_addr }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Raw body bytes. Empty when the body was too large or unreadable.
    pub fn body(&self) -> &[u8] {
        match &self.body {
            Body::Full(bytes) => bytes,
            Body::TooLarge | Body::Unreadable => &[],
        }
    }

    /// The parsed JSON body, set by the JSON body stage.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.head.extensions
    }
}

#[cfg(test)]
impl Request {
    /// A request from `127.0.0.1:40000` with an empty body.
    pub(crate) fn fake(method: http::Method, uri: &str) -> Self {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        Self::from_http(parts, Body::Full(Bytes::new()), ([127, 0, 0, 1], 40000).into())
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.head.headers.insert(name, value.parse().unwrap());
        self
    }

    pub(crate) fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub(crate) fn with_peer(mut self, addr: SocketAddr) -> Self {
        self.head.remote_addr = addr;
        self
    }
}
