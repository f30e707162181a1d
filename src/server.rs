//! HTTP server and graceful shutdown.
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. stops accepting connections;
//! 2. closes idle keep-alive connections and lets in-flight requests finish;
//! 3. returns from [`Server::serve`] so `main` can close the pool and exit.
//!
//! Each request body is collected up to the server's body limit before the
//! request enters the pipeline. Larger bodies are not buffered; the request
//! carries [`Body::TooLarge`] instead and the JSON stage decides what that means.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::middleware::{Pipeline, DEFAULT_JSON_LIMIT};
use crate::request::{Body, Request};

/// The HTTP server. Bound on construction, serving on [`serve`](Server::serve).
pub struct Server {
    listener: TcpListener,
    body_limit: usize,
}

impl Server {
    /// Binds the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener, body_limit: DEFAULT_JSON_LIMIT }
    }

    /// Largest request body buffered, in bytes.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves `app` until SIGTERM or Ctrl-C, then drains in-flight connections.
    pub async fn serve(self, app: Pipeline) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Serves `app` until `signal` resolves, then drains in-flight connections.
    pub async fn serve_with_shutdown(
        self,
        app: Pipeline,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let app = Arc::new(app);
        let body_limit = self.body_limit;
        let addr = self.local_addr()?;

        info!(%addr, "caregate listening");

        let http = ConnBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Checked first so a shutdown stops accepting even with a backlog.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);

                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { dispatch(&app, req, remote_addr, body_limit).await }
                    });

                    // HTTP/1.1 or HTTP/2, whichever the client speaks. Watched so
                    // shutdown can close idle keep-alive connections.
                    let conn = http.serve_connection(TokioIo::new(stream), svc).into_owned();
                    let conn = graceful.watch(conn);

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Idle connections close now; busy ones after their current response.
        graceful.shutdown().await;
        while tasks.join_next().await.is_some() {}

        info!("caregate stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Collects the body, runs the pipeline and produces the single response.
///
/// Infallible: every failure has already become a response by the time the
/// pipeline returns.
async fn dispatch(
    app: &Pipeline,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    body_limit: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, incoming) = req.into_parts();
    let body = collect_body(incoming, body_limit).await;
    let response = app.handle(Request::from_http(parts, body, remote_addr)).await;
    Ok(response.into_inner())
}

async fn collect_body(incoming: Incoming, limit: usize) -> Body {
    match Limited::new(incoming, limit).collect().await {
        Ok(collected) => Body::Full(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Body::TooLarge,
        Err(e) => {
            debug!(error = %e, "request body could not be read");
            Body::Unreadable
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C). Only Ctrl-C on non-Unix.
///
/// If a handler cannot be installed, that signal is simply never delivered.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
